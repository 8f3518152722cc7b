use crate::error::{LaneError, LaneResult};
use opencv::{core::Mat, highgui, prelude::*, videoio};
use tracing::{debug, info};

/// A frame source with an optional preview window and keyboard.
pub trait VideoDevice {
    fn is_opened(&self) -> LaneResult<bool>;

    /// Next frame, or `None` when the device produced nothing this time.
    fn read_frame(&mut self) -> LaneResult<Option<Mat>>;

    fn show(&mut self, window: &str, image: &Mat) -> LaneResult<()>;

    /// Waits up to `delay_ms` for a key press and returns its code, or a
    /// negative value when no key was pressed.
    fn wait_key(&mut self, delay_ms: i32) -> LaneResult<i32>;

    fn release(&mut self) -> LaneResult<()>;
}

/// A camera opened through OpenCV's video I/O.
pub struct CameraDevice {
    capture: videoio::VideoCapture,
    windowed: bool,
}

impl CameraDevice {
    pub fn open(index: i32, window: Option<&str>) -> LaneResult<Self> {
        let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(LaneError::Camera(format!("cannot open video device {index}")));
        }
        if let Some(name) = window {
            highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
        }
        info!("Opened video device {index}");
        Ok(Self {
            capture,
            windowed: window.is_some(),
        })
    }
}

impl VideoDevice for CameraDevice {
    fn is_opened(&self) -> LaneResult<bool> {
        Ok(self.capture.is_opened()?)
    }

    fn read_frame(&mut self) -> LaneResult<Option<Mat>> {
        let mut frame = Mat::default();
        if self.capture.read(&mut frame)? && !frame.empty() {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    fn show(&mut self, window: &str, image: &Mat) -> LaneResult<()> {
        highgui::imshow(window, image)?;
        Ok(())
    }

    fn wait_key(&mut self, delay_ms: i32) -> LaneResult<i32> {
        Ok(highgui::wait_key(delay_ms)?)
    }

    fn release(&mut self) -> LaneResult<()> {
        self.capture.release()?;
        if self.windowed {
            highgui::destroy_all_windows()?;
        }
        debug!("Released video device");
        Ok(())
    }
}
