//! Simulation error types.

use thiserror::Error;
use timewarp_sync::SyncError;
use timewarp_types::{EventType, LpId, SimTime};

/// Errors that stop a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The sync core reported a protocol violation.
    #[error("protocol violation: {0}")]
    Sync(#[from] SyncError),

    /// An invariant was violated.
    #[error("invariant '{invariant}' violated at step {step}: {message}")]
    InvariantViolation {
        invariant: String,
        message: String,
        step: u64,
    },

    /// The application scheduled an event in the sender's past.
    #[error("LP {lp} scheduled an event at {timestamp}, before its current time {now}")]
    Causality {
        lp: LpId,
        now: SimTime,
        timestamp: SimTime,
    },

    /// The application used a tag from the control range.
    #[error("event type {0} is reserved for control messages")]
    ReservedEventType(EventType),

    /// The harness configuration cannot be run.
    #[error("invalid simulation configuration: {0}")]
    Config(String),
}
