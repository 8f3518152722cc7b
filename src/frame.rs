//! Turns camera frames into model input.

use crate::error::{LaneError, LaneResult};
use ndarray::{Array4, Axis};
use opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT;
use opencv::{
    core::{self, Mat, Size},
    imgproc,
    prelude::*,
};

/// Converts a BGR frame to grayscale. Single channel frames are copied as is.
pub fn to_gray(frame: &Mat) -> LaneResult<Mat> {
    if frame.channels() == 1 {
        return Ok(frame.try_clone()?);
    }
    let mut gray = Mat::default();
    imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0, ALGO_HINT_DEFAULT)?;
    Ok(gray)
}

/// Grayscale, resized to `width x height` and rotated by 180 degrees
/// (flipped around both axes). This is also what the preview window shows.
pub fn prepare_frame(frame: &Mat, height: usize, width: usize) -> LaneResult<Mat> {
    if frame.empty() {
        return Err(LaneError::Camera("empty frame".to_string()));
    }

    let gray = to_gray(frame)?;
    let mut small = Mat::default();
    imgproc::resize(
        &gray,
        &mut small,
        Size::new(width as i32, height as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let mut upside_down = Mat::default();
    core::flip(&small, &mut upside_down, 0)?;
    let mut rotated = Mat::default();
    core::flip(&upside_down, &mut rotated, 1)?;
    Ok(rotated)
}

/// Copies an 8-bit single channel image into a `(1, rows, cols, 1)` tensor.
/// Pixels keep their raw `0..=255` intensity.
pub fn mat_to_tensor(image: &Mat) -> LaneResult<Array4<f32>> {
    if image.channels() != 1 || image.depth() != core::CV_8U {
        return Err(LaneError::Camera(
            "expected a single channel 8-bit image".to_string(),
        ));
    }

    let rows = image.rows() as usize;
    let cols = image.cols() as usize;
    let step = image.step1(0)?;
    let data = image.data_bytes()?;

    let mut tensor = Array4::<f32>::zeros((1, rows, cols, 1));
    let mut image_rows = tensor.index_axis_mut(Axis(0), 0);
    for (y, mut row) in image_rows.outer_iter_mut().enumerate() {
        let start = y * step;
        let pixels = data
            .get(start..start + cols)
            .ok_or_else(|| LaneError::Camera(format!("row {y} outside image buffer")))?;
        for (x, &px) in pixels.iter().enumerate() {
            row[[x, 0]] = f32::from(px);
        }
    }
    Ok(tensor)
}

/// `prepare_frame` followed by `mat_to_tensor`.
pub fn preprocess_frame(frame: &Mat, height: usize, width: usize) -> LaneResult<Array4<f32>> {
    mat_to_tensor(&prepare_frame(frame, height, width)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_uniform_bgr_frame() {
        let frame = Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(100.0)).unwrap();
        let tensor = preprocess_frame(&frame, 16, 16).unwrap();
        assert_eq!(tensor.dim(), (1, 16, 16, 1));
        assert!(tensor.iter().all(|&px| px == 100.0));
    }

    #[test]
    fn test_frame_is_rotated() {
        let frame = Mat::from_slice_2d(&[[1u8, 2, 3], [4, 5, 6]]).unwrap();
        let tensor = preprocess_frame(&frame, 2, 3).unwrap();
        let values: Vec<f32> = tensor.iter().copied().collect();
        assert_eq!(values, vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        assert!(preprocess_frame(&Mat::default(), 8, 8).is_err());
    }

    #[test]
    fn test_color_tensor_is_rejected() {
        let frame = Mat::new_rows_cols_with_default(4, 4, CV_8UC3, Scalar::all(1.0)).unwrap();
        assert!(mat_to_tensor(&frame).is_err());
    }
}
