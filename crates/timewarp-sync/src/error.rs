//! Protocol violations.
//!
//! Every variant is fatal: it means the rollback or rendezvous invariants
//! no longer hold and the scheduler must stop the run. Benign conditions
//! (unmatched rollback notifications, late group rollbacks) are reported
//! as [`crate::SyncEvent`]s instead.

use std::fmt::{self, Display};

use thiserror::Error;
use timewarp_types::{EventType, GroupId, LpId, RendezvousMark};

use crate::group::GroupState;
use crate::lp::LpState;

/// Where a control message was being handled when it was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Dequeue time (`receive_filter`).
    Receive,
    /// Execution time (`execute_filter`).
    Process,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Receive => f.write_str("receive"),
            Phase::Process => f.write_str("process"),
        }
    }
}

/// Errors raised by the synchronization core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("unexpected control type {event_type} at {phase} time")]
    UnknownControlType { event_type: EventType, phase: Phase },

    #[error("LP {0} not found")]
    UnknownLp(LpId),

    #[error("group {0} not found")]
    UnknownGroup(GroupId),

    #[error("LP {0} does not belong to a group")]
    NotInGroup(LpId),

    #[error("LP {0} already belongs to a group")]
    AlreadyGrouped(LpId),

    #[error("a group needs at least one member")]
    EmptyGroup,

    #[error("group synchronization is disabled")]
    GroupsDisabled,

    #[error("cross-state synchronization is disabled")]
    CrossStateDisabled,

    #[error("LP {lp} received SYNCH_GROUP while group {group} is {state:?}")]
    InvalidGroupState {
        lp: LpId,
        group: GroupId,
        state: GroupState,
    },

    #[error("LP {lp} cannot open a rendezvous with {peer}: session {pending} still pending in state {state}")]
    RendezvousInProgress {
        lp: LpId,
        peer: LpId,
        pending: RendezvousMark,
        state: LpState,
    },

    #[error("LP {0} cannot open a rendezvous with itself")]
    SelfRendezvous(LpId),

    #[error("group {group} vote counter exceeded membership of {tot}")]
    VoteOverflow { group: GroupId, tot: u32 },

    #[error("LP {0} has no event in execution")]
    NotExecuting(LpId),
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
