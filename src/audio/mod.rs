//! Audio capture subsystem

pub mod backend;
pub mod capture;
pub mod device;
pub mod frame;
pub mod tone;

pub use backend::{CaptureBackend, CaptureStream, MinBufferError, ReadError};
pub use capture::CaptureEngine;
pub use device::{list_input_devices, CpalBackend, InputDeviceInfo, InputDevicePermission};
pub use frame::{CaptureConfig, CaptureSpec, FallbackCandidate, PcmFrame, SourceKind};
pub use tone::ToneBackend;
