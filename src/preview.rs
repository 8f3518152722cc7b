//! Spot check of a trained model on one random scene.

use crate::batch::generate_batch;
use crate::config::SceneConfig;
use crate::error::LaneResult;
use crate::model::Regressor;
use ndarray::{ArrayView2, Axis};
use opencv::{
    core::{Mat, Scalar, CV_8UC1},
    highgui,
    prelude::*,
};
use rand::Rng;
use tracing::info;

#[derive(Debug)]
pub struct PreviewSample {
    pub predicted: f32,
    pub label: f32,
    /// The normalised scene that was fed to the model.
    pub image: Mat,
}

/// Renders a normalised single channel scene: lane pixels white, the rest black.
pub fn mask_image(image: ArrayView2<f32>) -> LaneResult<Mat> {
    let (rows, cols) = image.dim();
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, CV_8UC1, Scalar::all(0.0))?;
    for ((r, c), &px) in image.indexed_iter() {
        if px > 0.0 {
            *mat.at_2d_mut::<u8>(r as i32, c as i32)? = 255;
        }
    }
    Ok(mat)
}

/// Predicts the offset of one freshly generated scene.
pub fn preview_random_scene<M: Regressor, R: Rng>(
    model: &M,
    scene: &SceneConfig,
    rng: &mut R,
) -> LaneResult<PreviewSample> {
    let batch = generate_batch(rng, scene, 1);
    let predicted = model.predict(batch.images.view())?[[0, 0]];
    let label = batch.labels[0];
    info!("Predicted {predicted:.6}, label {label:.6}");

    let pixels = batch.images.index_axis(Axis(0), 0);
    let image = mask_image(pixels.index_axis(Axis(2), 0))?;
    Ok(PreviewSample {
        predicted,
        label,
        image,
    })
}

/// Shows the sample and blocks until a key is pressed.
pub fn show_sample(sample: &PreviewSample, window: &str) -> LaneResult<()> {
    highgui::named_window(window, highgui::WINDOW_AUTOSIZE)?;
    highgui::imshow(window, &sample.image)?;
    highgui::wait_key(0)?;
    highgui::destroy_all_windows()?;
    Ok(())
}
