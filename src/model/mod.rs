//! The lane offset regressor.
//!
//! Training and inference only talk to the [`Regressor`] trait. [`RoadNet`]
//! is the bundled implementation: one convolution with a tanh activation
//! followed by a single linear output, trained with mean squared error and
//! Adam.

mod adam;
pub mod checkpoint;
mod conv;
mod dense;
mod network;

pub use adam::{Adam, AdamHyperparameters};
pub use checkpoint::{Checkpoint, CheckpointPaths};
pub use conv::Conv2d;
pub use dense::Dense;
pub use network::{Architecture, RoadNet};

use crate::error::LaneResult;
use ndarray::{Array2, ArrayView2, ArrayView4};
use std::path::Path;

pub trait Regressor {
    /// Runs one optimisation step on `images` `(n, h, w, 1)` against
    /// `targets` `(n, 1)` and returns the loss before the update.
    fn train_step(&mut self, images: ArrayView4<f32>, targets: ArrayView2<f32>) -> LaneResult<f32>;

    /// Loss of the current parameters, without updating them.
    fn evaluate(&self, images: ArrayView4<f32>, targets: ArrayView2<f32>) -> LaneResult<f32>;

    /// One prediction per image, shaped `(n, 1)`.
    fn predict(&self, images: ArrayView4<f32>) -> LaneResult<Array2<f32>>;

    fn save(&self, path: &Path, epoch: usize) -> LaneResult<()>;

    /// Replaces the parameters of an already built model.
    fn load(&mut self, path: &Path) -> LaneResult<()>;
}
