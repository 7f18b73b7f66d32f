use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector capability: one frame in, detections out.
///
/// This is the only seam between the stream loop and the model library.
/// Backends may keep per-stream state (a motion background, a warm session),
/// which is why `detect` takes `&mut self` and every stream owns its own
/// instance.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// A frame with nothing in it yields `Ok(vec![])`. `Err` means this frame
    /// could not be processed; the caller skips it and keeps going.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
