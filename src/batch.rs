//! Packs random scenes into normalised training batches.

use crate::config::SceneConfig;
use crate::error::LaneResult;
use crate::scene::random_road;
use ndarray::{s, Array1, Array2, Array4, Axis};
use rand::Rng;

/// Images are `(n, height, width, 1)` with pixels mapped from `{0, 1}` to
/// `{-2, 2}`. Labels are the offsets divided by the scene width.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Array1<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels as a single-output column, the shape the regressor trains on.
    pub fn labels_column(&self) -> LaneResult<Array2<f32>> {
        let n = self.labels.len();
        Ok(self.labels.clone().into_shape_with_order((n, 1))?)
    }

    /// Splits off the trailing `fraction` of samples for validation.
    pub fn split_validation(self, fraction: f32) -> (Batch, Option<Batch>) {
        let held_out = (self.len() as f32 * fraction).floor() as usize;
        if held_out == 0 || held_out >= self.len() {
            return (self, None);
        }

        let cut = self.len() - held_out;
        let train = Batch {
            images: self.images.slice(s![..cut, .., .., ..]).to_owned(),
            labels: self.labels.slice(s![..cut]).to_owned(),
        };
        let validation = Batch {
            images: self.images.slice(s![cut.., .., .., ..]).to_owned(),
            labels: self.labels.slice(s![cut..]).to_owned(),
        };
        (train, Some(validation))
    }

    /// Copies the samples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Batch {
        Batch {
            images: self.images.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}

/// Shifts and scales raw mask values in place: `pixel = (pixel - 0.5) * 4`.
pub fn normalize_in_place(images: &mut Array4<f32>) {
    images.mapv_inplace(|px| (px - 0.5) * 4.0);
}

/// Generates `size` fresh random scenes and packs them into a batch.
pub fn generate_batch<R: Rng>(rng: &mut R, config: &SceneConfig, size: usize) -> Batch {
    let mut images = Array4::<f32>::zeros((size, config.height, config.width, 1));
    let mut labels = Array1::<f32>::zeros(size);

    for (i, mut image) in images.outer_iter_mut().enumerate() {
        let scene = random_road(rng, config);
        image.assign(&scene.mask.mapv(f32::from));
        labels[i] = scene.offset / config.width as f32;
    }

    normalize_in_place(&mut images);
    Batch { images, labels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scene_config(height: usize, width: usize) -> SceneConfig {
        SceneConfig {
            height,
            width,
            reference_span: None,
        }
    }

    #[test]
    fn test_batch_shape_and_pixel_values() {
        let mut rng = StdRng::seed_from_u64(1);
        let batch = generate_batch(&mut rng, &scene_config(24, 32), 6);

        assert_eq!(batch.images.dim(), (6, 24, 32, 1));
        assert_eq!(batch.labels.len(), 6);
        assert!(batch.images.iter().all(|&px| px == -2.0 || px == 2.0));
        assert!(batch.images.iter().any(|&px| px == 2.0));
    }

    #[test]
    fn test_labels_within_lane_edge() {
        let mut rng = StdRng::seed_from_u64(42);
        let batch = generate_batch(&mut rng, &scene_config(128, 128), 64);
        // Offsets are clamped to the whole column 128 / 3 = 42.
        let bound = 42.0 / 128.0;
        assert!(batch.labels.iter().all(|&l| l.abs() <= bound));
    }

    #[test]
    fn test_normalize_in_place() {
        let mut images = Array4::<f32>::from_shape_vec((1, 1, 2, 1), vec![0.0, 1.0]).unwrap();
        normalize_in_place(&mut images);
        assert_eq!(images.as_slice().unwrap(), &[-2.0, 2.0]);
    }

    #[test]
    fn test_labels_column() {
        let mut rng = StdRng::seed_from_u64(3);
        let batch = generate_batch(&mut rng, &scene_config(8, 8), 5);
        let column = batch.labels_column().unwrap();
        assert_eq!(column.dim(), (5, 1));
        assert_eq!(column[[4, 0]], batch.labels[4]);
    }

    #[test]
    fn test_split_validation_keeps_trailing_quarter() {
        let mut rng = StdRng::seed_from_u64(5);
        let batch = generate_batch(&mut rng, &scene_config(8, 8), 20);
        let last_label = batch.labels[19];

        let (train, validation) = batch.split_validation(0.25);
        let validation = validation.unwrap();
        assert_eq!(train.len(), 15);
        assert_eq!(validation.len(), 5);
        assert_eq!(validation.images.dim(), (5, 8, 8, 1));
        assert_eq!(validation.labels[4], last_label);
    }

    #[test]
    fn test_split_validation_without_holdout() {
        let mut rng = StdRng::seed_from_u64(5);
        let batch = generate_batch(&mut rng, &scene_config(8, 8), 3);
        let (train, validation) = batch.split_validation(0.25);
        assert_eq!(train.len(), 3);
        assert!(validation.is_none());
    }
}
