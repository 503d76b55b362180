//! Record-permission sub-machine
//!
//! ```text
//!  Initial           ──Check──►  Granted | NotRequested
//!  NotRequested      ──Request──► Requesting
//!  Requesting        ──Grant───►  Granted
//!  Requesting        ──Deny────►  RationaleNeeded (rationale shown)
//!                                 PermanentlyDenied (otherwise)
//!  RationaleNeeded   ──Ack─────►  Requesting
//!  Granted           ──Check──►  Granted | RationaleNeeded (revoked)
//!  PermanentlyDenied ──Check──►  Granted | PermanentlyDenied
//! ```
//!
//! Every (state, action) pair not listed above leaves the state unchanged.

use serde::Serialize;

/// Answers whether recording is currently allowed.
pub trait PermissionProbe: Send + Sync {
    fn is_granted(&self) -> bool;
}

/// A probe with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl PermissionProbe for StaticPermission {
    fn is_granted(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    #[default]
    Initial,
    NotRequested,
    Requesting,
    Granted,
    RationaleNeeded,
    PermanentlyDenied,
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        self == PermissionState::Granted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionAction {
    /// Re-read the platform answer
    Check,
    Request,
    UserAcknowledgesRationale,
    UserGrants,
    UserDenies { show_rationale: bool },
}

/// Next permission state. `granted` is the probe's current answer and only
/// matters for `Check`.
pub fn transition(state: PermissionState, action: PermissionAction, granted: bool) -> PermissionState {
    use PermissionAction as A;
    use PermissionState as S;

    match (state, action) {
        (S::Initial, A::Check) => {
            if granted {
                S::Granted
            } else {
                S::NotRequested
            }
        }
        (S::NotRequested, A::Request) => S::Requesting,
        (S::Requesting, A::UserGrants) => S::Granted,
        (S::Requesting, A::UserDenies { show_rationale: true }) => S::RationaleNeeded,
        (S::Requesting, A::UserDenies { show_rationale: false }) => S::PermanentlyDenied,
        (S::RationaleNeeded, A::UserAcknowledgesRationale) => S::Requesting,
        (S::Granted, A::Check) => {
            if granted {
                S::Granted
            } else {
                S::RationaleNeeded
            }
        }
        (S::PermanentlyDenied, A::Check) => {
            if granted {
                S::Granted
            } else {
                S::PermanentlyDenied
            }
        }
        (state, _) => state,
    }
}
