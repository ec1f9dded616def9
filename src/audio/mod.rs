/// Microphone capture and snapshot hand-off
pub mod capture;

pub use capture::{AudioCapture, CaptureControl, CaptureError};
