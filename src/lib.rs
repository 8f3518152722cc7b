//! Estimates the lateral offset of a road lane from a camera image.
//!
//! A small convolutional regressor is trained on synthetic lane masks
//! ([`scene`], [`batch`], [`training`]) and then driven by a live camera
//! ([`video`]), streaming its estimates over UDP ([`telemetry`]).

pub mod batch;
pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod preview;
pub mod scene;
pub mod telemetry;
pub mod training;
pub mod video;

pub use config::Config;
pub use error::{LaneError, LaneResult};
