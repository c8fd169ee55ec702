//! Group synchronization.
//!
//! A group is a set of LPs whose rendezvous participation is checkpointed
//! and rolled back as a unit. Every group-level transition is gated by a
//! vote counter reaching the membership size, after which the counter
//! resets to zero in the same atomic step.
//!
//! Two counters exist and are never conflated:
//! - `counter_synch`: rendezvous-start and `SYNCH_GROUP` votes
//! - `counter_log`: outstanding `NULL_LOG_MESSAGE` checkpoint votes
//!
//! A round is anchored by the LP that opened the group's synchronization
//! window ([`SyncWindow`]). Only the anchor propagates a group rollback.

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use timewarp_types::{GroupId, LpId, Mark, RendezvousMark, SimTime};

use crate::context::ExecutionContext;
use crate::core::SyncCore;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::instrumentation::METRICS;
use crate::lp::{LogicalProcess, LpState};
use crate::message::{ControlType, Message, MessageKind};

// ============================================================================
// Group State
// ============================================================================

/// Group-level state, mirroring the LP states at group granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GroupState {
    Ready = 0,
    ReadyForSynch = 1,
    WaitForUnblock = 2,
    WaitForLog = 3,
    WaitForGroup = 4,
}

impl GroupState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => GroupState::ReadyForSynch,
            2 => GroupState::WaitForUnblock,
            3 => GroupState::WaitForLog,
            4 => GroupState::WaitForGroup,
            _ => GroupState::Ready,
        }
    }
}

impl Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupState::Ready => "ready",
            GroupState::ReadyForSynch => "ready-for-synch",
            GroupState::WaitForUnblock => "wait-for-unblock",
            GroupState::WaitForLog => "wait-for-log",
            GroupState::WaitForGroup => "wait-for-group",
        };
        f.write_str(name)
    }
}

/// The synchronization round currently open in a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWindow {
    /// LP that opened the round.
    pub anchor: LpId,
    /// Mark of the anchor's input-queue entry that triggered the round.
    pub mark: Mark,
    /// Simulated time of the triggering entry.
    pub time: SimTime,
    /// Rendezvous session the round is built on.
    pub rendezvous_mark: RendezvousMark,
    /// Members that have cast their start vote in this round.
    voted: Vec<LpId>,
}

impl SyncWindow {
    pub fn new(anchor: LpId, mark: Mark, time: SimTime, rendezvous_mark: RendezvousMark) -> Self {
        Self {
            anchor,
            mark,
            time,
            rendezvous_mark,
            voted: Vec::new(),
        }
    }

    pub fn has_voted(&self, lp: LpId) -> bool {
        self.voted.contains(&lp)
    }
}

/// Outcome of a checkpoint vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogVote {
    /// Votes still outstanding.
    Pending(u32),
    /// This vote completed the round.
    Complete,
    /// The counter was already drained; the vote belongs to an abandoned
    /// round.
    Stale,
}

// ============================================================================
// Group
// ============================================================================

/// Shared state of one group.
///
/// Members on different worker threads update the counters concurrently,
/// so they are atomics; the window sits behind its own lock which is
/// always taken after (never before) an LP lock.
#[derive(Debug)]
pub struct Group {
    id: GroupId,
    members: Vec<LpId>,
    state: AtomicU8,
    counter_synch: AtomicU32,
    counter_log: AtomicU32,
    window: Mutex<Option<SyncWindow>>,
    /// Published LVT of each member, as `f64` bits.
    lvts: Vec<AtomicU64>,
}

impl Group {
    pub fn new(id: GroupId, members: Vec<LpId>) -> Self {
        let lvts = members
            .iter()
            .map(|_| AtomicU64::new(SimTime::ZERO.as_f64().to_bits()))
            .collect();
        Self {
            id,
            members,
            state: AtomicU8::new(GroupState::Ready as u8),
            counter_synch: AtomicU32::new(0),
            counter_log: AtomicU32::new(0),
            window: Mutex::new(None),
            lvts,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn members(&self) -> &[LpId] {
        &self.members
    }

    /// Group size (`tot_LP`).
    pub fn tot(&self) -> u32 {
        self.members.len() as u32
    }

    pub fn contains(&self, lp: LpId) -> bool {
        self.members.contains(&lp)
    }

    pub fn state(&self) -> GroupState {
        GroupState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, ctx: &mut ExecutionContext<'_>, to: GroupState) {
        let from = GroupState::from_u8(self.state.swap(to as u8, Ordering::AcqRel));
        if from != to {
            tracing::debug!(group = %self.id, %from, %to, "group state transition");
            ctx.emit(SyncEvent::GroupStateChanged {
                group: self.id,
                from,
                to,
            });
        }
    }

    pub fn counter_synch(&self) -> u32 {
        self.counter_synch.load(Ordering::Acquire)
    }

    pub fn counter_log(&self) -> u32 {
        self.counter_log.load(Ordering::Acquire)
    }

    fn window_guard(&self) -> MutexGuard<'_, Option<SyncWindow>> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the open window, if any.
    pub fn window(&self) -> Option<SyncWindow> {
        self.window_guard().clone()
    }

    /// Returns true if `lp` anchors the open window.
    pub fn is_anchor(&self, lp: LpId) -> bool {
        self.window_guard()
            .as_ref()
            .is_some_and(|window| window.anchor == lp)
    }

    /// Returns true if `time` is the time of the open window.
    pub fn in_window(&self, time: SimTime) -> bool {
        self.window_guard()
            .as_ref()
            .is_some_and(|window| window.time.approx_eq(time))
    }

    /// Returns true if a rollback to `time` undoes the open window.
    pub fn window_reached_by(&self, time: SimTime) -> bool {
        self.window_guard()
            .as_ref()
            .is_some_and(|window| time <= window.time || window.time.approx_eq(time))
    }

    /// Session of the open window.
    pub fn window_session(&self) -> RendezvousMark {
        self.window_guard()
            .as_ref()
            .map_or(RendezvousMark::NONE, |window| window.rendezvous_mark)
    }

    pub(crate) fn open(&self, window: SyncWindow) {
        *self.window_guard() = Some(window);
        self.counter_synch.store(0, Ordering::Release);
        self.counter_log.store(0, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        *self.window_guard() = None;
    }

    /// Records that `lp` cast its start vote in the open window.
    ///
    /// Returns false if the member already voted (a re-execution) or no
    /// window is open.
    pub(crate) fn record_start_vote(&self, lp: LpId) -> bool {
        let mut window = self.window_guard();
        match window.as_mut() {
            Some(window) if !window.has_voted(lp) => {
                window.voted.push(lp);
                true
            }
            _ => false,
        }
    }

    /// Casts a synchronization vote.
    ///
    /// Increments `counter_synch` and resets it to zero in the same atomic
    /// step when it reaches the membership size. Returns true if this vote
    /// completed the round.
    pub(crate) fn vote_synch(&self) -> Result<bool> {
        let tot = self.tot();
        let previous = self
            .counter_synch
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                let next = count + 1;
                match next.cmp(&tot) {
                    std::cmp::Ordering::Less => Some(next),
                    std::cmp::Ordering::Equal => Some(0),
                    std::cmp::Ordering::Greater => None,
                }
            })
            .map_err(|_| SyncError::VoteOverflow {
                group: self.id,
                tot,
            })?;
        METRICS.increment_group_votes();
        Ok(previous + 1 == tot)
    }

    /// Arms the checkpoint vote: every member owes one `NULL_LOG_MESSAGE`.
    pub(crate) fn arm_log(&self) {
        self.counter_log.store(self.tot(), Ordering::Release);
    }

    /// Casts a checkpoint vote by decrementing `counter_log`.
    pub(crate) fn vote_log(&self) -> LogVote {
        match self
            .counter_log
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            }) {
            Ok(1) => LogVote::Complete,
            Ok(previous) => LogVote::Pending(previous - 1),
            Err(_) => LogVote::Stale,
        }
    }

    /// Abandons the current round.
    pub(crate) fn reset_round(&self) {
        self.counter_synch.store(0, Ordering::Release);
        self.counter_log.store(0, Ordering::Release);
        self.close();
    }

    /// Publishes the LVT of a member.
    pub fn publish_lvt(&self, lp: LpId, lvt: SimTime) {
        if let Some(slot) = self
            .members
            .iter()
            .position(|member| *member == lp)
            .and_then(|index| self.lvts.get(index))
        {
            slot.store(lvt.as_f64().to_bits(), Ordering::Release);
        }
    }

    /// Group virtual time: the minimum published LVT over all members.
    pub fn lvt(&self) -> SimTime {
        self.lvts
            .iter()
            .map(|slot| SimTime::new(f64::from_bits(slot.load(Ordering::Acquire))))
            .min()
            .unwrap_or(SimTime::ZERO)
    }
}

// ============================================================================
// Group Table
// ============================================================================

/// Arena of groups indexed by [`GroupId`].
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: RwLock<Vec<Arc<Group>>>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, members: Vec<LpId>) -> Arc<Group> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let group = Arc::new(Group::new(GroupId::new(groups.len() as u32), members));
        groups.push(Arc::clone(&group));
        group
    }

    pub fn get(&self, id: GroupId) -> Result<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.as_usize())
            .cloned()
            .ok_or(SyncError::UnknownGroup(id))
    }

    pub fn len(&self) -> usize {
        self.groups.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ============================================================================
// Group Protocol
// ============================================================================

impl SyncCore {
    /// Forms a group from `members` and records it on each member.
    ///
    /// Membership is validated for every LP before any record changes.
    pub fn form_group(&self, members: &[LpId]) -> Result<GroupId> {
        let groups = self.groups.as_ref().ok_or(SyncError::GroupsDisabled)?;
        if members.is_empty() {
            return Err(SyncError::EmptyGroup);
        }
        let mut unique: Vec<LpId> = Vec::with_capacity(members.len());
        for &member in members {
            let lp = self.lp(member)?;
            if lp.current_group.is_some() {
                return Err(SyncError::AlreadyGrouped(member));
            }
            if !unique.contains(&member) {
                unique.push(member);
            }
        }

        let group = groups.insert(unique);
        for &member in group.members() {
            self.lp(member)?.current_group = Some(group.id());
        }
        tracing::info!(group = %group.id(), tot = group.tot(), "group formed");
        Ok(group.id())
    }

    /// Opens a synchronization window anchored by `lp` on its executing
    /// entry.
    ///
    /// The anchor casts the first start vote. Returns false (and opens
    /// nothing) if the group is mid-round.
    pub fn open_window(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: LpId,
        rendezvous_mark: RendezvousMark,
    ) -> Result<bool> {
        let record = self.lp(lp)?;
        self.open_window_locked(ctx, &record, rendezvous_mark)
    }

    pub(crate) fn open_window_locked(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: &LogicalProcess,
        rendezvous_mark: RendezvousMark,
    ) -> Result<bool> {
        let group = self.group_of_locked(lp)?.ok_or(SyncError::NotInGroup(lp.id))?;
        let entry = lp.queue.current().ok_or(SyncError::NotExecuting(lp.id))?;
        if group.state() != GroupState::Ready || group.window().is_some() {
            return Ok(false);
        }

        group.open(SyncWindow::new(
            lp.id,
            entry.mark,
            entry.timestamp,
            rendezvous_mark,
        ));
        tracing::debug!(
            group = %group.id(),
            anchor = %lp.id,
            time = %entry.timestamp,
            session = %rendezvous_mark,
            "group window opened"
        );
        self.cast_start_vote(ctx, &group, lp.id)?;
        Ok(true)
    }

    /// Casts a member's start vote; the last vote moves the group to
    /// `WaitForUnblock`.
    pub(crate) fn cast_start_vote(
        &self,
        ctx: &mut ExecutionContext<'_>,
        group: &Group,
        lp: LpId,
    ) -> Result<()> {
        if !group.record_start_vote(lp) {
            return Ok(());
        }
        let complete = group.vote_synch()?;
        ctx.emit(SyncEvent::GroupVote {
            group: group.id(),
            lp,
            counter: group.counter_synch(),
            tot: group.tot(),
        });
        if complete {
            group.set_state(ctx, GroupState::WaitForUnblock);
        }
        Ok(())
    }

    /// Puts the group of `lp` into `WaitForGroup` and sends `SYNCH_GROUP`
    /// to every member.
    ///
    /// Returns false if the group is mid-round.
    pub fn synchronize(&self, ctx: &mut ExecutionContext<'_>, lp: LpId) -> Result<bool> {
        let mut record = self.lp(lp)?;
        let group = self
            .group_of_locked(&record)?
            .ok_or(SyncError::NotInGroup(lp))?;
        if group.state() != GroupState::Ready || group.window().is_some() {
            tracing::debug!(group = %group.id(), lp = %lp, state = %group.state(), "group busy, synchronization skipped");
            return Ok(false);
        }

        group.set_state(ctx, GroupState::WaitForGroup);
        self.broadcast(ctx, &mut record, &group, ControlType::SynchGroup);
        Ok(true)
    }

    /// Arms the checkpoint vote and sends `NULL_LOG_MESSAGE` to every
    /// member, then flushes the LP's pending output.
    pub fn force_group_checkpoint(&self, ctx: &mut ExecutionContext<'_>, lp: LpId) -> Result<()> {
        let mut record = self.lp(lp)?;
        let group = self
            .group_of_locked(&record)?
            .ok_or(SyncError::NotInGroup(lp))?;
        self.force_group_checkpoint_locked(ctx, &mut record, &group);
        Ok(())
    }

    pub(crate) fn force_group_checkpoint_locked(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: &mut LogicalProcess,
        group: &Group,
    ) {
        group.arm_log();
        self.broadcast(ctx, lp, group, ControlType::NullLog);
        ctx.flush(lp.id);
    }

    /// Sends `CLOSE_GROUP` to every member of the group of `lp`.
    pub fn close_group(&self, ctx: &mut ExecutionContext<'_>, lp: LpId) -> Result<()> {
        let mut record = self.lp(lp)?;
        let group = self
            .group_of_locked(&record)?
            .ok_or(SyncError::NotInGroup(lp))?;
        self.broadcast(ctx, &mut record, &group, ControlType::CloseGroup);
        Ok(())
    }

    /// Propagates a rollback of the round anchored by `lp` to `target`.
    ///
    /// Every other member receives `GROUP_ROLLBACK`; the round is
    /// abandoned and the group returns to `Ready`.
    pub fn rollback_group(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: LpId,
        target: SimTime,
    ) -> Result<()> {
        let mut record = self.lp(lp)?;
        let group = self
            .group_of_locked(&record)?
            .ok_or(SyncError::NotInGroup(lp))?;
        self.rollback_group_locked(ctx, &mut record, &group, target);
        Ok(())
    }

    pub(crate) fn rollback_group_locked(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: &mut LogicalProcess,
        group: &Group,
        target: SimTime,
    ) {
        let send_time = lp.lvt().min(target);
        for &member in group.members() {
            if member == lp.id {
                continue;
            }
            let msg = Message::control(
                ControlType::GroupRollback,
                lp.id,
                member,
                target,
                send_time,
                MessageKind::Positive,
                lp.marks.next_mark(),
                RendezvousMark::NONE,
            );
            ctx.send(msg);
        }

        group.reset_round();
        group.set_state(ctx, GroupState::Ready);
        METRICS.increment_group_rollbacks();
        tracing::info!(group = %group.id(), anchor = %lp.id, %target, "group rollback");
        ctx.emit(SyncEvent::GroupRollback {
            group: group.id(),
            anchor: lp.id,
            target,
        });
    }

    /// Sends one control message of type `control` to every member,
    /// including `lp` itself.
    fn broadcast(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: &mut LogicalProcess,
        group: &Group,
        control: ControlType,
    ) {
        let now = ctx.now().unwrap_or_else(|| lp.lvt());
        for &member in group.members() {
            let msg = Message::control(
                control,
                lp.id,
                member,
                now,
                now,
                MessageKind::Positive,
                lp.marks.next_mark(),
                RendezvousMark::NONE,
            );
            ctx.send(msg);
        }
    }

    // ========================================================================
    // Receive / Process Handlers
    // ========================================================================

    /// `GROUP_ROLLBACK` at a member (receive time).
    pub(crate) fn on_group_rollback(
        &self,
        ctx: &mut ExecutionContext<'_>,
        msg: &Message,
    ) -> Result<()> {
        let mut lp = self.lp(msg.receiver)?;
        let target = msg.timestamp;
        let lvt = lp.lvt();
        let group = lp.current_group;

        if lvt >= target {
            lp.queue.rewind_before(target);
            self.set_state(ctx, &mut lp, LpState::Rollback);
        } else {
            METRICS.increment_late_notifications();
            tracing::warn!(
                lp = %lp.id,
                from = %msg.sender,
                %target,
                %lvt,
                "group rollback notification behind local time"
            );
            if let Some(group) = group {
                ctx.emit(SyncEvent::LateGroupRollback {
                    group,
                    lp: lp.id,
                    target,
                    lvt,
                });
            }
        }
        Ok(())
    }

    /// `NULL_LOG_MESSAGE` (process time).
    pub(crate) fn on_null_log(&self, ctx: &mut ExecutionContext<'_>, msg: &Message) -> Result<()> {
        let mut lp = self.lp(msg.receiver)?;
        let Some(group) = self.group_of_locked(&lp)? else {
            tracing::warn!(lp = %lp.id, "NULL_LOG_MESSAGE outside a group ignored");
            return Ok(());
        };

        let vote = group.vote_log();
        if msg.sender != msg.receiver {
            self.checkpoint(ctx, &lp, msg.timestamp);
        }
        self.set_state(ctx, &mut lp, LpState::WaitForLog);
        ctx.emit(SyncEvent::GroupVote {
            group: group.id(),
            lp: lp.id,
            counter: group.counter_log(),
            tot: group.tot(),
        });

        match vote {
            LogVote::Pending(_) => {}
            LogVote::Complete => {
                group.close();
                group.set_state(ctx, GroupState::Ready);
            }
            LogVote::Stale => {
                tracing::warn!(
                    lp = %lp.id,
                    group = %group.id(),
                    "NULL_LOG_MESSAGE after the checkpoint round completed"
                );
            }
        }
        Ok(())
    }

    /// `CLOSE_GROUP` (process time).
    pub(crate) fn on_close_group(&self, ctx: &mut ExecutionContext<'_>, msg: &Message) -> Result<()> {
        let lp = self.lp(msg.receiver)?;
        if lp.current_group.is_some() {
            self.checkpoint(ctx, &lp, msg.timestamp);
        }
        Ok(())
    }

    /// `SYNCH_GROUP` (process time).
    pub(crate) fn on_synch_group(&self, ctx: &mut ExecutionContext<'_>, msg: &Message) -> Result<()> {
        let mut lp = self.lp(msg.receiver)?;
        let Some(group) = self.group_of_locked(&lp)? else {
            tracing::warn!(lp = %lp.id, "SYNCH_GROUP outside a group ignored");
            return Ok(());
        };

        match group.state() {
            GroupState::WaitForGroup => {}
            GroupState::ReadyForSynch => {
                tracing::error!(lp = %lp.id, group = %group.id(), "SYNCH_GROUP while group is ready for synch");
                return Err(SyncError::InvalidGroupState {
                    lp: lp.id,
                    group: group.id(),
                    state: GroupState::ReadyForSynch,
                });
            }
            // Re-execution after a rollback: the round already completed.
            _ => return Ok(()),
        }

        let complete = group.vote_synch()?;
        self.set_state(ctx, &mut lp, LpState::WaitForGroup);
        ctx.emit(SyncEvent::GroupVote {
            group: group.id(),
            lp: lp.id,
            counter: group.counter_synch(),
            tot: group.tot(),
        });
        if complete {
            group.set_state(ctx, GroupState::Ready);
        }
        self.checkpoint(ctx, &lp, msg.timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn group_of(n: u32) -> Group {
        Group::new(GroupId::new(0), (0..n).map(LpId::new).collect())
    }

    #[test]
    fn synch_vote_resets_on_completion() {
        let group = group_of(3);
        assert!(!group.vote_synch().expect("vote"));
        assert!(!group.vote_synch().expect("vote"));
        assert_eq!(group.counter_synch(), 2);
        assert!(group.vote_synch().expect("vote"));
        assert_eq!(group.counter_synch(), 0);
    }

    #[test]
    fn log_vote_counts_down_from_tot() {
        let group = group_of(2);
        group.arm_log();
        assert_eq!(group.vote_log(), LogVote::Pending(1));
        assert_eq!(group.vote_log(), LogVote::Complete);
        assert_eq!(group.vote_log(), LogVote::Stale);
        assert_eq!(group.counter_log(), 0);
    }

    #[test]
    fn start_votes_are_deduplicated_per_window() {
        let group = group_of(2);
        assert!(!group.record_start_vote(LpId::new(0)));

        group.open(SyncWindow::new(
            LpId::new(0),
            Mark::compose(LpId::new(0), 1),
            SimTime::new(4.0),
            RendezvousMark::new(11),
        ));
        assert!(group.record_start_vote(LpId::new(1)));
        assert!(!group.record_start_vote(LpId::new(1)));
    }

    #[test]
    fn window_queries() {
        let group = group_of(2);
        assert!(!group.is_anchor(LpId::new(0)));
        assert!(!group.in_window(SimTime::new(4.0)));

        group.open(SyncWindow::new(
            LpId::new(0),
            Mark::compose(LpId::new(0), 1),
            SimTime::new(4.0),
            RendezvousMark::new(11),
        ));
        assert!(group.is_anchor(LpId::new(0)));
        assert!(!group.is_anchor(LpId::new(1)));
        assert!(group.in_window(SimTime::new(4.0)));
        assert!(!group.in_window(SimTime::new(4.5)));
        assert!(group.window_reached_by(SimTime::new(3.0)));
        assert!(!group.window_reached_by(SimTime::new(5.0)));
        assert_eq!(group.window_session(), RendezvousMark::new(11));

        group.reset_round();
        assert!(group.window().is_none());
    }

    #[test]
    fn group_lvt_is_member_minimum() {
        let group = group_of(3);
        group.publish_lvt(LpId::new(0), SimTime::new(5.0));
        group.publish_lvt(LpId::new(1), SimTime::new(3.0));
        group.publish_lvt(LpId::new(2), SimTime::new(7.0));
        assert_eq!(group.lvt(), SimTime::new(3.0));

        // Non-members are ignored.
        group.publish_lvt(LpId::new(9), SimTime::ZERO);
        assert_eq!(group.lvt(), SimTime::new(3.0));
    }

    proptest! {
        #[test]
        fn synch_counter_never_exceeds_tot(tot in 1u32..16, votes in 0usize..200) {
            let group = group_of(tot);
            let mut completions = 0usize;
            for _ in 0..votes {
                if group.vote_synch().expect("counter resets before overflow") {
                    completions += 1;
                    prop_assert_eq!(group.counter_synch(), 0);
                }
                prop_assert!(group.counter_synch() < tot);
            }
            prop_assert_eq!(completions, votes / tot as usize);
        }

        #[test]
        fn log_counter_never_underflows(tot in 1u32..16, votes in 0usize..40) {
            let group = group_of(tot);
            group.arm_log();
            let mut completions = 0usize;
            for _ in 0..votes {
                if group.vote_log() == LogVote::Complete {
                    completions += 1;
                }
                prop_assert!(group.counter_log() <= tot);
            }
            prop_assert_eq!(completions, usize::from(votes >= tot as usize));
        }
    }
}
