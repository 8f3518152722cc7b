//! Live inference: camera frames in, offset estimates out over UDP.
//!
//! The loop polls the device as fast as it delivers frames but only runs
//! the model on frames admitted by a [`FrameGate`]. Everything the session
//! acquires is released when it is dropped, whichever way the loop ends.

mod device;

pub use device::{CameraDevice, VideoDevice};

use crate::config::{SceneConfig, VideoConfig};
use crate::error::LaneResult;
use crate::frame::{mat_to_tensor, prepare_frame};
use crate::model::Regressor;
use crate::telemetry::TelemetrySender;
use opencv::core::Mat;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const KEY_ESCAPE: i32 = 27;

/// True for Escape and `q`, looking at the low byte of the key code only.
pub fn is_exit_key(code: i32) -> bool {
    let key = code & 0xFF;
    key == KEY_ESCAPE || key == i32::from(b'q')
}

/// Admits at most one frame per `delay`.
#[derive(Debug, Clone)]
pub struct FrameGate {
    delay: Duration,
    next_due: Option<Instant>,
}

impl FrameGate {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_due: None,
        }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now < due => false,
            _ => {
                self.next_due = Some(now + self.delay);
                true
            }
        }
    }
}

/// Frame counters of a finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStats {
    /// Frames the device delivered.
    pub frames_read: usize,
    /// Frames that went through the model and were sent.
    pub processed: usize,
    /// Frames the gate turned away.
    pub dropped: usize,
    /// Reads that produced no frame.
    pub failed_reads: usize,
}

/// One run of the inference loop. Owns the device and releases it on drop.
pub struct VideoSession<'a, D: VideoDevice, M: Regressor> {
    /// Frame source, also used for display and key polling.
    device: D,
    model: &'a M,
    /// Every prediction is sent here once.
    telemetry: TelemetrySender,
    /// Decides which frames reach the model.
    gate: FrameGate,
    /// Preview window name, `None` when the preview is off.
    window: Option<String>,
    key_wait_ms: i32,
    /// Model input size that frames are resized to.
    height: usize,
    width: usize,
}

impl<'a, D: VideoDevice, M: Regressor> VideoSession<'a, D, M> {
    pub fn new(
        device: D,
        model: &'a M,
        telemetry: TelemetrySender,
        video: &VideoConfig,
        scene: &SceneConfig,
    ) -> Self {
        Self {
            device,
            model,
            telemetry,
            gate: FrameGate::new(video.frame_delay()),
            window: video.show_window.then(|| video.window_name.clone()),
            key_wait_ms: video.key_wait_ms,
            height: scene.height,
            width: scene.width,
        }
    }

    /// Runs until the device closes or an exit key is pressed.
    pub fn run(&mut self) -> LaneResult<VideoStats> {
        info!(
            "Video session started, sending to {} every {:?}",
            self.telemetry.target(),
            self.gate.delay
        );
        let started = Instant::now();
        let mut stats = VideoStats::default();

        while self.device.is_opened()? {
            let frame = match self.device.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    stats.failed_reads += 1;
                    debug!("No frame from device");
                    continue;
                }
                Err(err) => {
                    stats.failed_reads += 1;
                    debug!("Frame read failed: {err}");
                    continue;
                }
            };
            stats.frames_read += 1;

            if self.gate.admit(Instant::now()) {
                let offset = self.process(&frame)?;
                println!("{offset}");
                stats.processed += 1;
            } else {
                stats.dropped += 1;
            }

            let key = self.device.wait_key(self.key_wait_ms)?;
            if is_exit_key(key) {
                info!("Exit key pressed");
                break;
            }
        }

        let elapsed = started.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            debug!(
                "{:.1} frames/s read, {:.1} frames/s processed",
                stats.frames_read as f32 / elapsed,
                stats.processed as f32 / elapsed
            );
        }
        info!(
            "Video session stopped: {} frames, {} processed, {} dropped, {} failed reads",
            stats.frames_read, stats.processed, stats.dropped, stats.failed_reads
        );
        Ok(stats)
    }

    /// Prepares one frame, shows it, predicts and sends the offset.
    fn process(&mut self, frame: &Mat) -> LaneResult<f32> {
        let small = prepare_frame(frame, self.height, self.width)?;
        if let Some(window) = &self.window {
            self.device.show(window, &small)?;
        }

        let input = mat_to_tensor(&small)?;
        let offset = self.model.predict(input.view())?[[0, 0]];
        self.telemetry.send(offset)?;
        Ok(offset)
    }
}

impl<D: VideoDevice, M: Regressor> Drop for VideoSession<'_, D, M> {
    fn drop(&mut self) {
        if let Err(err) = self.device.release() {
            warn!("Failed to release video device: {err}");
        }
    }
}
