pub mod motion;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::{MotionBackend, MotionConfig};
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackend, TractModel};
