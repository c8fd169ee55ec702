//! Structured records of protocol activity.
//!
//! Handlers push these into the [`crate::ExecutionContext`] journal instead
//! of printing. The scheduler decides what to keep.

use serde::Serialize;
use timewarp_types::{GroupId, LpId, RendezvousMark, SimTime};

use crate::group::GroupState;
use crate::lp::LpState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SyncEvent {
    StateChanged {
        lp: LpId,
        from: LpState,
        to: LpState,
        time: SimTime,
    },
    RendezvousOpened {
        initiator: LpId,
        peer: LpId,
        rendezvous_mark: RendezvousMark,
        time: SimTime,
    },
    RendezvousAcked {
        lp: LpId,
        peer: LpId,
        rendezvous_mark: RendezvousMark,
    },
    RendezvousStarted {
        lp: LpId,
        initiator: LpId,
        rendezvous_mark: RendezvousMark,
        time: SimTime,
    },
    Unblocked {
        lp: LpId,
        rendezvous_mark: RendezvousMark,
        matched: bool,
        logged: bool,
    },
    /// A ROLLBACK control antimessage left this LP.
    ControlRollbackSent {
        lp: LpId,
        to: LpId,
        rendezvous_mark: RendezvousMark,
        time: SimTime,
    },
    /// A ROLLBACK control antimessage moved this LP's bound.
    ControlRollbackApplied {
        lp: LpId,
        rendezvous_mark: RendezvousMark,
        time: SimTime,
    },
    /// A ROLLBACK control antimessage matched nothing here.
    UnmatchedRollback {
        lp: LpId,
        rendezvous_mark: RendezvousMark,
    },
    /// A ROLLBACK control antimessage names an entry this LP has not yet
    /// executed.
    FutureRollback {
        lp: LpId,
        rendezvous_mark: RendezvousMark,
        time: SimTime,
        lvt: SimTime,
    },
    SessionAbandoned {
        lp: LpId,
        rendezvous_mark: RendezvousMark,
    },
    GroupStateChanged {
        group: GroupId,
        from: GroupState,
        to: GroupState,
    },
    GroupVote {
        group: GroupId,
        lp: LpId,
        counter: u32,
        tot: u32,
    },
    GroupRollback {
        group: GroupId,
        anchor: LpId,
        target: SimTime,
    },
    LateGroupRollback {
        group: GroupId,
        lp: LpId,
        target: SimTime,
        lvt: SimTime,
    },
}

impl SyncEvent {
    /// Returns true for diagnostics of benign protocol races.
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            SyncEvent::UnmatchedRollback { .. }
                | SyncEvent::FutureRollback { .. }
                | SyncEvent::LateGroupRollback { .. }
        )
    }
}
