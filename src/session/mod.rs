//! Session lifecycle: state machine, permission, host thread

pub mod controller;
pub mod permission;
pub mod runner;
pub mod state;

pub use controller::{SessionController, SessionParts};
pub use permission::{PermissionAction, PermissionProbe, PermissionState, StaticPermission};
pub use runner::Session;
pub use state::{LinkPhase, SessionInput, SessionPhase, SessionState, UiEvent, UserAction};
