//! Passive BLE capture.
//!
//! Advertisements from a [`source`] are classified and appended to a capture
//! CSV by a [`CaptureSession`].

pub mod capture;
pub mod classify;
pub mod source;

pub use capture::{CaptureOptions, CaptureSession};
