//! Runtime configuration, loaded from YAML with every field defaulted.

use crate::error::{LaneError, LaneResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scene: SceneConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub video: VideoConfig,
    pub telemetry: TelemetryConfig,
}

/// Dimensions of the synthetic scenes, which are also the model input size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub height: usize,
    pub width: usize,
    /// When set, random offsets are drawn from `(u * span - span / 2) / 3`
    /// regardless of `width`. Unset means the span follows `2 * width`.
    pub reference_span: Option<f32>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            height: 128,
            width: 128,
            reference_span: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub filters: usize,
    pub kernel_size: usize,
    pub learning_rate: f32,
    pub init_stddev: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            filters: 2,
            kernel_size: 5,
            learning_rate: 0.001,
            init_stddev: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPolicy {
    /// One large batch generated up front, revisited every epoch.
    FixedDataset,
    /// A brand new batch for every optimisation step.
    FreshBatches,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub policy: TrainingPolicy,
    /// Scenes generated up front by [`TrainingPolicy::FixedDataset`].
    pub data_size: usize,
    pub epochs: usize,
    /// Samples per optimisation step.
    pub batch_size: usize,
    /// Share of the data held out for validation, in `[0, 1)`.
    pub validation_fraction: f32,
    /// Steps per epoch under [`TrainingPolicy::FreshBatches`].
    pub steps_per_epoch: usize,
    /// A checkpoint is written every this many epochs, and after the last one.
    pub snapshot_every: usize,
    pub checkpoint_dir: PathBuf,
    /// Prefix of the checkpoint files, `<run_id>-<epoch>`.
    pub run_id: String,
    /// Fixed seed for scenes and weight initialisation; random when unset.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            policy: TrainingPolicy::FixedDataset,
            data_size: 2000,
            epochs: 100,
            batch_size: 64,
            validation_fraction: 0.25,
            steps_per_epoch: 32,
            snapshot_every: 1,
            checkpoint_dir: PathBuf::from("checkpoints"),
            run_id: "road_model1".to_string(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Camera index handed to OpenCV.
    pub device_index: i32,
    /// Shows every processed frame in `window_name`.
    pub show_window: bool,
    /// Minimum spacing between processed frames, see [`VideoConfig::frame_delay`].
    pub frame_delay_ms: Option<u64>,
    /// How long each loop iteration waits for a key press.
    pub key_wait_ms: i32,
    pub window_name: String,
    /// Checkpoint to run; the newest of the training run when unset.
    pub checkpoint: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            show_window: true,
            frame_delay_ms: None,
            key_wait_ms: 10,
            window_name: "video".to_string(),
            checkpoint: None,
        }
    }
}

impl VideoConfig {
    /// Minimum spacing between processed frames. Showing the window slows
    /// the loop down, so the default gate is wider in that case.
    pub fn frame_delay(&self) -> Duration {
        let millis = match self.frame_delay_ms {
            Some(ms) => ms,
            None if self.show_window => 200,
            None => 50,
        };
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Receiver of the offset datagrams.
    pub host: String,
    pub port: u16,
    /// Bias the receiver subtracts from every offset before steering.
    pub fudge_factor: f32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4000,
            fudge_factor: 0.011,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> LaneResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise falls back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> LaneResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> LaneResult<()> {
        let invalid = |msg: &str| Err(LaneError::Config(msg.to_string()));

        if self.scene.height == 0 || self.scene.width == 0 {
            return invalid("scene dimensions must be non-zero");
        }
        if let Some(span) = self.scene.reference_span {
            if !span.is_finite() || span <= 0.0 {
                return invalid("scene.reference_span must be a positive number");
            }
        }
        if self.model.filters == 0 {
            return invalid("model.filters must be non-zero");
        }
        if self.model.kernel_size % 2 == 0 {
            return invalid("model.kernel_size must be odd");
        }
        if !(self.model.learning_rate > 0.0) {
            return invalid("model.learning_rate must be positive");
        }
        if !(self.model.init_stddev > 0.0) {
            return invalid("model.init_stddev must be positive");
        }
        if self.training.batch_size == 0 || self.training.data_size == 0 {
            return invalid("training batch and data sizes must be non-zero");
        }
        if !(0.0..1.0).contains(&self.training.validation_fraction) {
            return invalid("training.validation_fraction must lie in [0, 1)");
        }
        if self.training.snapshot_every == 0 || self.training.steps_per_epoch == 0 {
            return invalid("training.snapshot_every and steps_per_epoch must be non-zero");
        }
        if self.training.run_id.is_empty() {
            return invalid("training.run_id must not be empty");
        }
        if self.video.key_wait_ms <= 0 {
            return invalid("video.key_wait_ms must be positive");
        }
        Ok(())
    }
}
