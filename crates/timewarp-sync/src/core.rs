//! The synchronization core.
//!
//! [`SyncCore`] owns the LP and group arenas and exposes the hooks the
//! scheduler calls around message delivery and execution:
//!
//! - [`SyncCore::receive_filter`] at dequeue time
//! - [`SyncCore::execute_filter`] at execution time
//! - [`SyncCore::is_reexecutable`] while coasting forward
//! - [`SyncCore::rollback_rendezvous`] whenever an LP's time moves backward
//! - [`SyncCore::handle_rollback_antimessage`] before ordinary antimessage
//!   handling
//!
//! Every handler validates before it mutates and reports protocol
//! violations as [`SyncError`]s, which the scheduler treats as fatal.

use std::sync::{Arc, MutexGuard};

use serde::{Deserialize, Serialize};
use timewarp_types::{LpId, SimTime};

use crate::context::ExecutionContext;
use crate::error::{Phase, Result, SyncError};
use crate::events::SyncEvent;
use crate::group::{Group, GroupState, GroupTable};
use crate::instrumentation::METRICS;
use crate::lp::{LogicalProcess, LpState, LpTable};
use crate::message::{ControlType, Message};

// ============================================================================
// Configuration
// ============================================================================

/// Optional capabilities of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rendezvous (cross-state) synchronization.
    pub cross_state: bool,
    /// Group synchronization on top of rendezvous.
    pub groups: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cross_state: true,
            groups: false,
        }
    }
}

impl SyncConfig {
    /// Both capabilities off: every message is application traffic.
    pub fn disabled() -> Self {
        Self {
            cross_state: false,
            groups: false,
        }
    }

    pub fn with_groups(mut self) -> Self {
        self.groups = true;
        self
    }
}

/// What the scheduler should do with a message after a filter ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// The core handled the message; do not forward it.
    Consume,
    /// Forward the message to the next stage.
    Passthrough,
}

// ============================================================================
// Core
// ============================================================================

/// Synchronization state of one kernel.
#[derive(Debug)]
pub struct SyncCore {
    config: SyncConfig,
    lps: LpTable,
    pub(crate) groups: Option<GroupTable>,
}

impl SyncCore {
    /// Creates a core managing `n_lps` logical processes.
    ///
    /// Groups require cross-state synchronization and are dropped if it is
    /// off.
    pub fn new(n_lps: u32, config: SyncConfig) -> Self {
        let groups = (config.cross_state && config.groups).then(GroupTable::new);
        if config.groups && groups.is_none() {
            tracing::warn!("group synchronization requires cross-state synchronization; groups disabled");
        }
        Self {
            config: SyncConfig {
                groups: groups.is_some(),
                ..config
            },
            lps: LpTable::new(n_lps),
            groups,
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    pub fn lps(&self) -> &LpTable {
        &self.lps
    }

    /// Locks the record of `id`.
    pub fn lp(&self, id: LpId) -> Result<MutexGuard<'_, LogicalProcess>> {
        self.lps.lock(id)
    }

    pub fn groups(&self) -> Option<&GroupTable> {
        self.groups.as_ref()
    }

    /// Returns the group of `lp`, or `None` if it has none or groups are
    /// disabled.
    pub fn group_of(&self, lp: LpId) -> Result<Option<Arc<Group>>> {
        let record = self.lp(lp)?;
        self.group_of_locked(&record)
    }

    pub(crate) fn group_of_locked(&self, lp: &LogicalProcess) -> Result<Option<Arc<Group>>> {
        match (&self.groups, lp.current_group) {
            (Some(groups), Some(id)) => groups.get(id).map(Some),
            _ => Ok(None),
        }
    }

    /// Changes the state of a locked LP and journals the transition.
    pub(crate) fn set_state(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: &mut LogicalProcess,
        to: LpState,
    ) {
        let from = lp.transition(to);
        if from != to {
            ctx.emit(SyncEvent::StateChanged {
                lp: lp.id,
                from,
                to,
                time: lp.lvt(),
            });
        }
    }

    /// Forces a checkpoint of `lp` and runs the state-logging step with the
    /// cursor pointing at it. Returns whether a snapshot was logged.
    pub(crate) fn checkpoint(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: &LogicalProcess,
        now: SimTime,
    ) -> bool {
        let previous = ctx.cursor();
        ctx.enter(lp.id, now);
        ctx.force_checkpoint(lp);
        let logged = ctx.log_state(lp);
        match previous {
            Some(cursor) => ctx.enter(cursor.lp, cursor.now),
            None => ctx.leave(),
        }
        logged
    }

    fn violation(&self, msg: &Message, phase: Phase) -> SyncError {
        METRICS.increment_protocol_violations();
        tracing::error!(
            lp = %msg.receiver,
            from = %msg.sender,
            event_type = %msg.event_type,
            time = %msg.timestamp,
            %phase,
            "control message meaningless here"
        );
        SyncError::UnknownControlType {
            event_type: msg.event_type,
            phase,
        }
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Classifies a positive message at dequeue time and applies the
    /// receive-time effects of ACK, UNBLOCK and GROUP_ROLLBACK.
    pub fn receive_filter(
        &self,
        ctx: &mut ExecutionContext<'_>,
        msg: &Message,
    ) -> Result<FilterDecision> {
        if !msg.is_control() || !self.config.cross_state {
            return Ok(FilterDecision::Passthrough);
        }
        let control = msg
            .control_type()
            .ok_or_else(|| self.violation(msg, Phase::Receive))?;

        match control {
            ControlType::Start
            | ControlType::Rollback
            | ControlType::NullLog
            | ControlType::SynchGroup
            | ControlType::CloseGroup => Ok(FilterDecision::Passthrough),
            ControlType::Ack => {
                self.on_ack(ctx, msg)?;
                Ok(FilterDecision::Consume)
            }
            ControlType::Unblock => {
                self.on_unblock(ctx, msg)?;
                Ok(FilterDecision::Consume)
            }
            ControlType::GroupRollback => {
                self.on_group_rollback(ctx, msg)?;
                Ok(FilterDecision::Consume)
            }
        }
    }

    /// Applies the processing-time effects of a control message.
    ///
    /// Application messages pass through to the application callback.
    pub fn execute_filter(
        &self,
        ctx: &mut ExecutionContext<'_>,
        msg: &Message,
    ) -> Result<FilterDecision> {
        if !msg.is_control() || !self.config.cross_state {
            return Ok(FilterDecision::Passthrough);
        }
        let control = msg
            .control_type()
            .ok_or_else(|| self.violation(msg, Phase::Process))?;

        match control {
            ControlType::Start => self.on_start(ctx, msg)?,
            ControlType::NullLog => self.on_null_log(ctx, msg)?,
            ControlType::CloseGroup => self.on_close_group(ctx, msg)?,
            ControlType::SynchGroup => self.on_synch_group(ctx, msg)?,
            ControlType::Ack
            | ControlType::Unblock
            | ControlType::Rollback
            | ControlType::GroupRollback => return Err(self.violation(msg, Phase::Process)),
        }
        Ok(FilterDecision::Consume)
    }

    /// Returns true if `msg` is re-executed by the application while
    /// coasting forward after a rollback.
    pub fn is_reexecutable(&self, msg: &Message) -> bool {
        !msg.is_control()
    }

    // ========================================================================
    // Scheduler Queries
    // ========================================================================

    /// Returns true if an LP in `ReadyForSynch` may run its synchronized
    /// section.
    ///
    /// An LP whose session anchors its group's window additionally waits
    /// for the whole group to be ready for synch.
    pub fn is_synchronized(&self, lp: LpId) -> Result<bool> {
        let record = self.lp(lp)?;
        if record.state != LpState::ReadyForSynch {
            return Ok(false);
        }
        match self.group_of_locked(&record)? {
            Some(group)
                if group.is_anchor(lp) && group.window_session() == record.wait_on_rendezvous =>
            {
                Ok(group.state() == GroupState::ReadyForSynch)
            }
            _ => Ok(true),
        }
    }

    /// Releases an LP parked on its group once the round it waits on is
    /// over.
    ///
    /// A `WaitForLog` LP waits while the group is in its checkpoint round,
    /// a `WaitForGroup` LP while the group synchronizes. An LP whose vote
    /// came after its round ended is released even if the group has since
    /// opened a new rendezvous round. Returns true if the LP moved to
    /// `Ready`.
    pub fn resume_if_released(&self, ctx: &mut ExecutionContext<'_>, lp: LpId) -> Result<bool> {
        let mut record = self.lp(lp)?;
        let waits_on = match record.state {
            LpState::WaitForLog => GroupState::WaitForLog,
            LpState::WaitForGroup => GroupState::WaitForGroup,
            _ => return Ok(false),
        };
        let released = match self.group_of_locked(&record)? {
            Some(group) => group.state() != waits_on,
            None => true,
        };
        if released {
            self.set_state(ctx, &mut record, LpState::Ready);
        }
        Ok(released)
    }

    /// Publishes the LVT of `lp` to its group.
    pub fn publish_lvt(&self, lp: LpId) -> Result<()> {
        let record = self.lp(lp)?;
        if let Some(group) = self.group_of_locked(&record)? {
            group.publish_lvt(lp, record.lvt());
        }
        Ok(())
    }
}
