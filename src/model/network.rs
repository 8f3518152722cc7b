use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView4, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::{Adam, Checkpoint, Conv2d, Dense, Regressor};
use crate::config::{ModelConfig, SceneConfig};
use crate::error::{LaneError, LaneResult};

/// Input size and layer hyperparameters. Two networks can share
/// checkpoints only when their architectures are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub height: usize,
    pub width: usize,
    pub filters: usize,
    pub kernel_size: usize,
}

impl Architecture {
    pub fn from_config(scene: &SceneConfig, model: &ModelConfig) -> Self {
        Self {
            height: scene.height,
            width: scene.width,
            filters: model.filters,
            kernel_size: model.kernel_size,
        }
    }

    pub fn conv(&self) -> Conv2d {
        Conv2d::new(self.filters, self.kernel_size)
    }

    pub fn dense(&self) -> Dense {
        Dense::new((self.features(), 1))
    }

    /// Length of the flattened convolution output.
    pub fn features(&self) -> usize {
        self.height * self.width * self.filters
    }

    pub fn param_count(&self) -> usize {
        self.conv().size() + self.dense().size()
    }
}

/// Intermediate values of one sample's forward pass, kept for backprop.
struct SamplePass {
    padded: Array2<f32>,
    activations: Array3<f32>,
    output: f32,
}

/// Convolution (tanh) followed by a single linear output.
///
/// All parameters live in one flat vector laid out as
/// `[conv kernels | conv biases | dense weights | dense bias]`; each layer
/// views its own range.
#[derive(Debug, Clone)]
pub struct RoadNet {
    architecture: Architecture,
    conv: Conv2d,
    dense: Dense,
    params: Vec<f32>,
    optimizer: Adam,
}

impl RoadNet {
    /// Builds a freshly initialised network. Weights are drawn from
    /// `N(0, init_stddev)`, biases start at zero.
    pub fn new<R: Rng>(
        architecture: Architecture,
        learning_rate: f32,
        init_stddev: f32,
        rng: &mut R,
    ) -> LaneResult<Self> {
        let normal = Normal::new(0.0f32, init_stddev)
            .map_err(|e| LaneError::Model(format!("invalid init_stddev {init_stddev}: {e}")))?;

        let conv = architecture.conv();
        let dense = architecture.dense();
        let mut params = vec![0.0f32; architecture.param_count()];
        {
            let (conv_params, dense_params) = params.split_at_mut(conv.size());
            conv_params[..conv.kernel_len()]
                .iter_mut()
                .for_each(|p| *p = normal.sample(rng));
            dense_params[..dense.weight_len()]
                .iter_mut()
                .for_each(|p| *p = normal.sample(rng));
        }

        Self::with_params(architecture, learning_rate, params)
    }

    pub fn from_config<R: Rng>(scene: &SceneConfig, model: &ModelConfig, rng: &mut R) -> LaneResult<Self> {
        let architecture = Architecture::from_config(scene, model);
        Self::new(architecture, model.learning_rate, model.init_stddev, rng)
    }

    pub fn with_params(architecture: Architecture, learning_rate: f32, params: Vec<f32>) -> LaneResult<Self> {
        let expected = architecture.param_count();
        if params.len() != expected {
            return Err(LaneError::Model(format!(
                "expected {expected} parameters, got {}",
                params.len()
            )));
        }

        Ok(Self {
            architecture,
            conv: architecture.conv(),
            dense: architecture.dense(),
            optimizer: Adam::new(expected, learning_rate),
            params,
        })
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    fn check_images(&self, images: &ArrayView4<f32>) -> LaneResult<()> {
        let (_, h, w, c) = images.dim();
        let arch = self.architecture;
        if (h, w, c) != (arch.height, arch.width, 1) {
            return Err(LaneError::Model(format!(
                "expected images of {}x{}x1, got {h}x{w}x{c}",
                arch.height, arch.width
            )));
        }
        Ok(())
    }

    fn check_targets(images: &ArrayView4<f32>, targets: &ArrayView2<f32>) -> LaneResult<()> {
        if targets.dim() != (images.len_of(Axis(0)), 1) {
            return Err(LaneError::Model(format!(
                "expected ({}, 1) targets, got {:?}",
                images.len_of(Axis(0)),
                targets.dim()
            )));
        }
        Ok(())
    }

    fn forward_sample(&self, image: ArrayView2<f32>) -> LaneResult<SamplePass> {
        let (conv_params, dense_params) = self.params.split_at(self.conv.size());

        let padded = self.conv.pad(image);
        let activations = self.conv.forward(conv_params, padded.view())?;
        let features = activations
            .view()
            .into_shape_with_order(self.architecture.features())?;
        let output = self.dense.forward(dense_params, features)?[0];

        Ok(SamplePass {
            padded,
            activations,
            output,
        })
    }

    /// Mean squared error over the batch and its gradient with respect to
    /// every parameter. Samples are processed in parallel and their
    /// gradients summed.
    fn gradients(&self, images: ArrayView4<f32>, targets: ArrayView2<f32>) -> LaneResult<(Vec<f32>, f32)> {
        let n = images.len_of(Axis(0));
        let len = self.params.len();
        let scale = 1.0 / n as f32;
        let (_, dense_params) = self.params.split_at(self.conv.size());
        let arch = self.architecture;

        (0..n)
            .into_par_iter()
            .try_fold(
                || (vec![0.0f32; len], 0.0f32),
                |(mut grad, loss), i| -> LaneResult<(Vec<f32>, f32)> {
                    let image = images.index_axis_move(Axis(0), i).index_axis_move(Axis(2), 0);
                    let pass = self.forward_sample(image)?;
                    let error = pass.output - targets[[i, 0]];

                    let (conv_grad, dense_grad) = grad.split_at_mut(self.conv.size());
                    let features = pass.activations.view().into_shape_with_order(arch.features())?;
                    let d_out = Array1::from_elem(1, 2.0 * error * scale);
                    let d_features = self
                        .dense
                        .backward(dense_params, dense_grad, features, d_out.view())?;
                    let d_act = d_features.into_shape_with_order((arch.height, arch.width, arch.filters))?;
                    self.conv
                        .backward(conv_grad, pass.padded.view(), pass.activations.view(), d_act.view())?;

                    Ok((grad, loss + error * error * scale))
                },
            )
            .try_reduce(
                || (vec![0.0f32; len], 0.0f32),
                |(mut a, loss_a), (b, loss_b)| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    Ok((a, loss_a + loss_b))
                },
            )
    }
}

impl Regressor for RoadNet {
    fn train_step(&mut self, images: ArrayView4<f32>, targets: ArrayView2<f32>) -> LaneResult<f32> {
        self.check_images(&images)?;
        Self::check_targets(&images, &targets)?;
        if images.len_of(Axis(0)) == 0 {
            return Ok(0.0);
        }

        let (grad, loss) = self.gradients(images, targets)?;
        self.optimizer.update_params(&grad, &mut self.params)?;
        Ok(loss)
    }

    fn evaluate(&self, images: ArrayView4<f32>, targets: ArrayView2<f32>) -> LaneResult<f32> {
        let predictions = self.predict(images)?;
        Self::check_targets(&images, &targets)?;
        Ok((&predictions - &targets)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default())
    }

    fn predict(&self, images: ArrayView4<f32>) -> LaneResult<Array2<f32>> {
        self.check_images(&images)?;
        let n = images.len_of(Axis(0));

        let outputs = (0..n)
            .into_par_iter()
            .map(|i| -> LaneResult<f32> {
                let image = images.index_axis_move(Axis(0), i).index_axis_move(Axis(2), 0);
                Ok(self.forward_sample(image)?.output)
            })
            .collect::<LaneResult<Vec<f32>>>()?;

        Ok(Array2::from_shape_vec((n, 1), outputs)?)
    }

    fn save(&self, path: &Path, epoch: usize) -> LaneResult<()> {
        Checkpoint {
            architecture: self.architecture,
            epoch,
            params: self.params.clone(),
        }
        .write(path)
    }

    fn load(&mut self, path: &Path) -> LaneResult<()> {
        let checkpoint = Checkpoint::read(path)?;
        if checkpoint.architecture != self.architecture {
            return Err(LaneError::Checkpoint(format!(
                "{} was saved for {:?}, model is {:?}",
                path.display(),
                checkpoint.architecture,
                self.architecture
            )));
        }
        if checkpoint.params.len() != self.params.len() {
            return Err(LaneError::Checkpoint(format!(
                "{} holds {} parameters, model needs {}",
                path.display(),
                checkpoint.params.len(),
                self.params.len()
            )));
        }

        self.params = checkpoint.params;
        self.optimizer.reset();
        info!("Loaded {} (epoch {})", path.display(), checkpoint.epoch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::generate_batch;
    use ndarray::Array4;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_architecture() -> Architecture {
        Architecture {
            height: 6,
            width: 6,
            filters: 2,
            kernel_size: 3,
        }
    }

    fn scene(height: usize, width: usize) -> SceneConfig {
        SceneConfig {
            height,
            width,
            reference_span: None,
        }
    }

    #[test]
    fn test_param_count() {
        let arch = Architecture {
            height: 128,
            width: 128,
            filters: 2,
            kernel_size: 5,
        };
        assert_eq!(arch.param_count(), 2 * 25 + 2 + 128 * 128 * 2 + 1);
    }

    #[test]
    fn test_predict_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = RoadNet::new(small_architecture(), 0.001, 0.1, &mut rng).unwrap();
        let batch = generate_batch(&mut rng, &scene(6, 6), 4);
        let predictions = net.predict(batch.images.view()).unwrap();
        assert_eq!(predictions.dim(), (4, 1));
    }

    #[test]
    fn test_rejects_wrong_image_size() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = RoadNet::new(small_architecture(), 0.001, 0.1, &mut rng).unwrap();
        let images = Array4::<f32>::zeros((1, 5, 6, 1));
        assert!(matches!(net.predict(images.view()), Err(LaneError::Model(_))));
    }

    #[test]
    fn test_zero_weights_predict_bias() {
        let arch = small_architecture();
        let mut params = vec![0.0; arch.param_count()];
        *params.last_mut().unwrap() = 0.125;
        let net = RoadNet::with_params(arch, 0.001, params).unwrap();

        let images = Array4::<f32>::from_elem((3, 6, 6, 1), 2.0);
        let predictions = net.predict(images.view()).unwrap();
        assert!(predictions.iter().all(|&p| (p - 0.125).abs() < 1e-6));
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(9);
        let arch = Architecture {
            height: 4,
            width: 5,
            filters: 2,
            kernel_size: 3,
        };
        let net = RoadNet::new(arch, 0.001, 0.3, &mut rng).unwrap();
        let batch = generate_batch(&mut rng, &scene(4, 5), 3);
        let targets = batch.labels_column().unwrap();

        let (grad, loss) = net.gradients(batch.images.view(), targets.view()).unwrap();
        let evaluated = net.evaluate(batch.images.view(), targets.view()).unwrap();
        assert!((loss - evaluated).abs() < 1e-5);

        let eps = 1e-2f32;
        let conv_size = arch.conv().size();
        let probes = [0, 4, 17, conv_size - 1, conv_size, conv_size + 13, arch.param_count() - 1];
        for &i in &probes {
            let mut plus = net.clone();
            plus.params[i] += eps;
            let mut minus = net.clone();
            minus.params[i] -= eps;

            let numeric = (plus.evaluate(batch.images.view(), targets.view()).unwrap()
                - minus.evaluate(batch.images.view(), targets.view()).unwrap())
                / (2.0 * eps);
            assert!(
                (numeric - grad[i]).abs() < 2e-3 + 0.05 * grad[i].abs(),
                "param {i}: numeric {numeric} analytic {}",
                grad[i]
            );
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(21);
        let config = scene(12, 12);
        let arch = Architecture {
            height: 12,
            width: 12,
            filters: 2,
            kernel_size: 5,
        };
        let mut net = RoadNet::new(arch, 0.001, 0.02, &mut rng).unwrap();
        let batch = generate_batch(&mut rng, &config, 32);
        let targets = batch.labels_column().unwrap();

        let before = net.evaluate(batch.images.view(), targets.view()).unwrap();
        for _ in 0..200 {
            net.train_step(batch.images.view(), targets.view()).unwrap();
        }
        let after = net.evaluate(batch.images.view(), targets.view()).unwrap();
        assert!(after < before * 0.5, "before {before}, after {after}");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("road_model1-1");
        let mut rng = StdRng::seed_from_u64(4);
        let trained = RoadNet::new(small_architecture(), 0.001, 0.1, &mut rng).unwrap();
        trained.save(&path, 1).unwrap();

        let mut fresh = RoadNet::new(small_architecture(), 0.001, 0.1, &mut rng).unwrap();
        assert_ne!(fresh.params(), trained.params());
        fresh.load(&path).unwrap();
        assert_eq!(fresh.params(), trained.params());

        let image = Array3::<f32>::from_elem((6, 6, 1), -2.0).insert_axis(Axis(0));
        assert_eq!(fresh.predict(image.view()).unwrap(), trained.predict(image.view()).unwrap());
    }

    #[test]
    fn test_load_rejects_other_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("road_model1-1");
        let mut rng = StdRng::seed_from_u64(4);
        RoadNet::new(small_architecture(), 0.001, 0.1, &mut rng)
            .unwrap()
            .save(&path, 1)
            .unwrap();

        let other = Architecture {
            filters: 3,
            ..small_architecture()
        };
        let mut net = RoadNet::new(other, 0.001, 0.1, &mut rng).unwrap();
        assert!(matches!(net.load(&path), Err(LaneError::Checkpoint(_))));
    }
}
