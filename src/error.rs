//! Error types shared by every stage of the lane offset pipeline.

use thiserror::Error;

/// Result alias used by the library. Handlers propagate failures with `?`
/// and the binary wraps them into `anyhow` at the top level.
pub type LaneResult<T> = Result<T, LaneError>;

#[derive(Error, Debug)]
pub enum LaneError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("OpenCV error: {0}")]
    OpenCv(String),
}

impl From<opencv::Error> for LaneError {
    fn from(err: opencv::Error) -> Self {
        LaneError::OpenCv(err.message)
    }
}

impl From<bincode::Error> for LaneError {
    fn from(err: bincode::Error) -> Self {
        LaneError::Checkpoint(err.to_string())
    }
}
