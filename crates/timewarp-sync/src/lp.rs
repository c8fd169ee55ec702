//! Logical process records.
//!
//! Each LP owns an input queue of delivered messages, a rendezvous queue of
//! executed START messages, and the bookkeeping of its current rendezvous
//! session. LPs live in an [`LpTable`] arena and are addressed by [`LpId`];
//! nothing stores a reference to another LP's record.

use std::fmt::{self, Display};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use timewarp_types::{GroupId, LpId, Mark, RendezvousMark, SimTime};

use crate::error::{Result, SyncError};
use crate::message::{MarkAllocator, Message};

// ============================================================================
// LP State
// ============================================================================

/// Execution state of a logical process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LpState {
    /// Eligible for scheduling.
    #[default]
    Ready,
    /// Must undo its effects back to the bound before resuming.
    Rollback,
    /// Sent a START and awaits the peer's ACK.
    WaitForSynch,
    /// Executed a peer's START and awaits the UNBLOCK.
    WaitForUnblock,
    /// Received the ACK; may resume the event that opened the session.
    ReadyForSynch,
    /// Awaits completion of a group checkpoint.
    WaitForLog,
    /// Reached a group synchronization point.
    WaitForGroup,
}

impl LpState {
    /// Returns true if the scheduler may run this LP.
    pub fn is_schedulable(self) -> bool {
        matches!(self, LpState::Ready | LpState::ReadyForSynch)
    }

    /// Returns true if the LP is parked waiting on a control message.
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            LpState::WaitForSynch
                | LpState::WaitForUnblock
                | LpState::WaitForLog
                | LpState::WaitForGroup
        )
    }
}

impl Display for LpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LpState::Ready => "ready",
            LpState::Rollback => "rollback",
            LpState::WaitForSynch => "wait-for-synch",
            LpState::WaitForUnblock => "wait-for-unblock",
            LpState::ReadyForSynch => "ready-for-synch",
            LpState::WaitForLog => "wait-for-log",
            LpState::WaitForGroup => "wait-for-group",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Input Queue
// ============================================================================

/// Result of inserting a message into an [`InputQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    /// Position of the new entry.
    pub index: usize,
    /// The entry landed in the already-executed prefix.
    pub straggler: bool,
}

/// An entry annihilated by [`InputQueue::remove_by_mark`].
#[derive(Debug, Clone)]
pub struct Removal {
    /// Position the entry occupied.
    pub index: usize,
    pub msg: Message,
    /// The entry had already been executed.
    pub executed: bool,
}

/// Timestamp-ordered queue of delivered messages.
///
/// Entries are ordered by `(timestamp, arrival)`. The bound is the index of
/// the last executed entry; everything after it is still pending. LVT is
/// the timestamp of the bound entry.
#[derive(Debug, Clone, Default)]
pub struct InputQueue {
    entries: Vec<Message>,
    bound: Option<usize>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a message after every entry with an equal or earlier
    /// timestamp.
    ///
    /// If the entry lands inside the executed prefix, the bound is shifted
    /// so that it keeps pointing at the same executed entry and the
    /// insertion is reported as a straggler.
    pub fn insert(&mut self, msg: Message) -> Insertion {
        let index = self
            .entries
            .partition_point(|entry| entry.timestamp <= msg.timestamp);
        self.entries.insert(index, msg);

        let straggler = match self.bound {
            Some(bound) if index <= bound => {
                self.bound = Some(bound + 1);
                true
            }
            _ => false,
        };

        Insertion { index, straggler }
    }

    /// Removes the positive entry carrying `mark`.
    ///
    /// The bound is adjusted to stay on the same executed prefix; callers
    /// that removed an executed entry must still roll back past it.
    pub fn remove_by_mark(&mut self, mark: Mark) -> Option<Removal> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.mark == mark && entry.is_positive())?;
        let msg = self.entries.remove(index);

        let executed = match self.bound {
            Some(bound) if index <= bound => {
                self.bound = bound.checked_sub(1);
                true
            }
            _ => false,
        };

        Some(Removal {
            index,
            msg,
            executed,
        })
    }

    /// Searches backward from the tail for the entry carrying the given
    /// rendezvous session.
    pub fn find_rendezvous_backward(&self, mark: RendezvousMark) -> Option<usize> {
        if mark.is_none() {
            return None;
        }
        self.entries
            .iter()
            .rposition(|entry| entry.rendezvous_mark == mark)
    }

    /// Local virtual time: timestamp of the last executed entry.
    pub fn lvt(&self) -> SimTime {
        self.bound
            .and_then(|bound| self.entries.get(bound))
            .map_or(SimTime::ZERO, |entry| entry.timestamp)
    }

    pub fn bound(&self) -> Option<usize> {
        self.bound
    }

    pub fn set_bound(&mut self, bound: Option<usize>) {
        debug_assert!(bound.is_none_or(|b| b < self.entries.len()));
        self.bound = bound;
    }

    /// Moves the bound before every entry with timestamp at or after
    /// `time`.
    ///
    /// The bound never moves forward and never leaves the queue head: if
    /// no entry precedes `time`, it stops on the first entry.
    pub fn rewind_before(&mut self, time: SimTime) {
        if self.entries.is_empty() {
            self.bound = None;
            return;
        }
        let before = self.entries.partition_point(|entry| entry.timestamp < time);
        let target = before.saturating_sub(1);
        self.bound = Some(self.bound.map_or(target, |bound| bound.min(target)));
    }

    /// Index of the next entry to execute.
    pub fn next_index(&self) -> usize {
        self.bound.map_or(0, |bound| bound + 1)
    }

    pub fn next_to_execute(&self) -> Option<&Message> {
        self.entries.get(self.next_index())
    }

    /// Marks the next pending entry as executed and returns its index.
    pub fn advance(&mut self) -> Option<usize> {
        let next = self.next_index();
        if next < self.entries.len() {
            self.bound = Some(next);
            Some(next)
        } else {
            None
        }
    }

    /// The entry currently being executed (the bound).
    pub fn current(&self) -> Option<&Message> {
        self.bound.and_then(|bound| self.entries.get(bound))
    }

    pub fn current_mut(&mut self) -> Option<&mut Message> {
        self.bound.and_then(|bound| self.entries.get_mut(bound))
    }

    /// The executed prefix, oldest first.
    pub fn executed(&self) -> &[Message] {
        match self.bound {
            Some(bound) => &self.entries[..=bound],
            None => &[],
        }
    }

    /// Drops executed entries strictly older than `horizon`, always keeping
    /// the bound entry. Returns the number of entries reclaimed.
    pub fn prune_before(&mut self, horizon: SimTime) -> usize {
        let Some(bound) = self.bound else {
            return 0;
        };
        let reclaimable = self.entries[..bound]
            .iter()
            .take_while(|entry| entry.timestamp < horizon)
            .count();
        self.entries.drain(..reclaimable);
        self.bound = Some(bound - reclaimable);
        reclaimable
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.entries.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Rendezvous Queue
// ============================================================================

/// Time-ordered log of START messages this LP has executed.
#[derive(Debug, Clone, Default)]
pub struct RendezvousQueue {
    entries: Vec<Message>,
}

impl RendezvousQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after every entry with an equal or earlier timestamp.
    pub fn insert(&mut self, msg: Message) {
        let index = self
            .entries
            .partition_point(|entry| entry.timestamp <= msg.timestamp);
        self.entries.insert(index, msg);
    }

    /// Removes and returns the most recent entry if its timestamp is
    /// strictly after `time`.
    pub fn pop_after(&mut self, time: SimTime) -> Option<Message> {
        if self.entries.last()?.timestamp > time {
            self.entries.pop()
        } else {
            None
        }
    }

    /// Drops entries strictly older than `horizon`. Returns the number
    /// of entries reclaimed.
    pub fn prune_before(&mut self, horizon: SimTime) -> usize {
        let reclaimable = self
            .entries
            .partition_point(|entry| entry.timestamp < horizon);
        self.entries.drain(..reclaimable);
        reclaimable
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// ECS Table
// ============================================================================

/// Peers bound by rendezvous during the current event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EcsTable {
    peers: Vec<LpId>,
    acked: Vec<LpId>,
}

impl EcsTable {
    pub fn push(&mut self, peer: LpId) {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    pub fn contains(&self, peer: LpId) -> bool {
        self.peers.contains(&peer)
    }

    /// Records the ACK of `peer`. Returns true once every bound peer has
    /// acknowledged.
    pub fn acknowledge(&mut self, peer: LpId) -> bool {
        if self.peers.contains(&peer) && !self.acked.contains(&peer) {
            self.acked.push(peer);
        }
        self.all_acked()
    }

    pub fn all_acked(&self) -> bool {
        !self.peers.is_empty() && self.acked.len() == self.peers.len()
    }

    pub fn peers(&self) -> &[LpId] {
        &self.peers
    }

    /// Number of bound peers (the ECS index).
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.acked.clear();
    }
}

// ============================================================================
// Logical Process
// ============================================================================

/// The synchronization record of one logical process.
#[derive(Debug, Clone)]
pub struct LogicalProcess {
    pub id: LpId,
    pub state: LpState,
    pub queue: InputQueue,
    pub rendezvous_queue: RendezvousQueue,
    /// Session currently blocking this LP.
    pub wait_on_rendezvous: RendezvousMark,
    /// Peer this LP is blocked on.
    pub wait_on_object: Option<LpId>,
    pub ecs: EcsTable,
    pub current_group: Option<GroupId>,
    pub marks: MarkAllocator,
    /// Blocking state to resume once a rollback completes while the
    /// session survives.
    pub session_state: Option<LpState>,
}

impl LogicalProcess {
    pub fn new(id: LpId) -> Self {
        Self {
            id,
            state: LpState::Ready,
            queue: InputQueue::new(),
            rendezvous_queue: RendezvousQueue::new(),
            wait_on_rendezvous: RendezvousMark::NONE,
            wait_on_object: None,
            ecs: EcsTable::default(),
            current_group: None,
            marks: MarkAllocator::new(id),
            session_state: None,
        }
    }

    pub fn lvt(&self) -> SimTime {
        self.queue.lvt()
    }

    /// Changes state, tracing the transition.
    pub fn transition(&mut self, to: LpState) -> LpState {
        let from = self.state;
        if from != to {
            tracing::debug!(lp = %self.id, %from, %to, lvt = %self.lvt(), "LP state transition");
        }
        self.state = to;
        from
    }

    /// Forgets the current rendezvous session.
    pub(crate) fn clear_session(&mut self) {
        self.wait_on_rendezvous = RendezvousMark::NONE;
        self.wait_on_object = None;
        self.ecs.clear();
        self.session_state = None;
    }
}

// ============================================================================
// LP Table
// ============================================================================

/// Arena of LP records indexed by [`LpId`].
///
/// Each record sits behind its own mutex so different LPs can be serviced
/// by different worker threads. Handlers never hold two LP locks at once.
#[derive(Debug)]
pub struct LpTable {
    lps: Vec<Mutex<LogicalProcess>>,
}

impl LpTable {
    pub fn new(n_lps: u32) -> Self {
        Self {
            lps: (0..n_lps)
                .map(|id| Mutex::new(LogicalProcess::new(LpId::new(id))))
                .collect(),
        }
    }

    /// Locks the record of `id`.
    ///
    /// A poisoned lock is recovered: handlers validate before mutating, so
    /// a panic elsewhere never leaves a record half-updated.
    pub fn lock(&self, id: LpId) -> Result<MutexGuard<'_, LogicalProcess>> {
        let slot = self.lps.get(id.as_usize()).ok_or(SyncError::UnknownLp(id))?;
        Ok(slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn contains(&self, id: LpId) -> bool {
        id.as_usize() < self.lps.len()
    }

    pub fn len(&self) -> usize {
        self.lps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lps.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = LpId> + use<> {
        (0..self.lps.len() as u32).map(LpId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use timewarp_types::EventType;

    fn msg(ts: f64, seq: u32) -> Message {
        Message::event(
            LpId::new(9),
            LpId::new(0),
            EventType::new(1),
            SimTime::new(ts),
            SimTime::ZERO,
            Mark::compose(LpId::new(9), seq),
            Bytes::new(),
        )
    }

    fn queue_of(times: &[f64]) -> InputQueue {
        let mut queue = InputQueue::new();
        for (seq, ts) in times.iter().enumerate() {
            queue.insert(msg(*ts, seq as u32 + 1));
        }
        queue
    }

    #[test]
    fn insert_keeps_arrival_order_among_ties() {
        let mut queue = InputQueue::new();
        queue.insert(msg(5.0, 1));
        queue.insert(msg(5.0, 2));
        queue.insert(msg(1.0, 3));

        let seqs: Vec<u32> = queue.iter().map(|m| m.mark.sequence()).collect();
        assert_eq!(seqs, vec![3, 1, 2]);
    }

    #[test]
    fn insert_into_executed_prefix_is_straggler() {
        let mut queue = queue_of(&[1.0, 2.0, 3.0]);
        queue.advance();
        queue.advance();
        assert_eq!(queue.lvt(), SimTime::new(2.0));

        let insertion = queue.insert(msg(1.5, 10));
        assert!(insertion.straggler);
        assert_eq!(insertion.index, 1);
        // Bound still names the 2.0 entry.
        assert_eq!(queue.lvt(), SimTime::new(2.0));

        let insertion = queue.insert(msg(2.5, 11));
        assert!(!insertion.straggler);
    }

    #[test]
    fn insert_tie_with_bound_is_not_straggler() {
        let mut queue = queue_of(&[1.0, 2.0]);
        queue.advance();
        queue.advance();

        // Equal timestamp sorts after the executed entry.
        let insertion = queue.insert(msg(2.0, 10));
        assert!(!insertion.straggler);
        assert_eq!(queue.next_to_execute().map(|m| m.mark.sequence()), Some(10));
    }

    #[test]
    fn remove_executed_entry_moves_bound_back() {
        let mut queue = queue_of(&[1.0, 2.0, 3.0]);
        queue.advance();
        queue.advance();

        let removal = queue
            .remove_by_mark(Mark::compose(LpId::new(9), 2))
            .expect("present");
        assert!(removal.executed);
        assert_eq!(removal.index, 1);
        assert_eq!(removal.msg.timestamp, SimTime::new(2.0));
        assert_eq!(queue.bound(), Some(0));

        let removal = queue
            .remove_by_mark(Mark::compose(LpId::new(9), 3))
            .expect("present");
        assert!(!removal.executed);
        assert_eq!(queue.bound(), Some(0));

        assert!(queue.remove_by_mark(Mark::compose(LpId::new(9), 3)).is_none());
    }

    #[test]
    fn rewind_before_rolls_ties_back_together() {
        let mut queue = queue_of(&[1.0, 2.0, 4.0, 4.0, 5.0]);
        while queue.advance().is_some() {}

        queue.rewind_before(SimTime::new(4.0));
        assert_eq!(queue.bound(), Some(1));
        assert_eq!(queue.lvt(), SimTime::new(2.0));
    }

    #[test]
    fn rewind_before_stops_at_head() {
        let mut queue = queue_of(&[3.0, 4.0]);
        while queue.advance().is_some() {}

        queue.rewind_before(SimTime::new(1.0));
        assert_eq!(queue.bound(), Some(0));
    }

    #[test]
    fn rewind_before_never_moves_forward() {
        let mut queue = queue_of(&[1.0, 2.0, 3.0]);
        queue.advance();

        queue.rewind_before(SimTime::new(3.0));
        assert_eq!(queue.bound(), Some(0));
    }

    #[test]
    fn prune_keeps_bound_entry() {
        let mut queue = queue_of(&[1.0, 2.0, 3.0, 4.0]);
        queue.advance();
        queue.advance();
        queue.advance();

        assert_eq!(queue.prune_before(SimTime::new(10.0)), 2);
        assert_eq!(queue.lvt(), SimTime::new(3.0));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn rendezvous_queue_pops_only_future_entries() {
        let mut rq = RendezvousQueue::new();
        rq.insert(msg(10.0, 1));
        rq.insert(msg(4.0, 2));

        assert!(rq.pop_after(SimTime::new(10.0)).is_none());
        assert_eq!(
            rq.pop_after(SimTime::new(8.0)).map(|m| m.timestamp),
            Some(SimTime::new(10.0))
        );
        assert!(rq.pop_after(SimTime::new(8.0)).is_none());
        assert_eq!(rq.len(), 1);
    }

    #[test]
    fn rendezvous_queue_prunes_committed_entries() {
        let mut rq = RendezvousQueue::new();
        rq.insert(msg(2.0, 1));
        rq.insert(msg(5.0, 2));
        rq.insert(msg(9.0, 3));

        assert_eq!(rq.prune_before(SimTime::new(5.0)), 1);
        assert_eq!(rq.len(), 2);
        assert_eq!(rq.prune_before(SimTime::new(5.0)), 0);
        assert_eq!(rq.prune_before(SimTime::INFINITY), 2);
        assert!(rq.is_empty());
    }

    #[test]
    fn ecs_table_deduplicates_peers() {
        let mut ecs = EcsTable::default();
        ecs.push(LpId::new(2));
        ecs.push(LpId::new(2));
        ecs.push(LpId::new(3));
        assert_eq!(ecs.len(), 2);

        assert!(!ecs.acknowledge(LpId::new(2)));
        assert!(!ecs.acknowledge(LpId::new(7)));
        assert!(ecs.acknowledge(LpId::new(3)));

        ecs.clear();
        assert!(!ecs.all_acked());
    }

    #[test]
    fn lp_table_rejects_unknown_ids() {
        let table = LpTable::new(2);
        assert!(table.lock(LpId::new(1)).is_ok());
        assert!(matches!(
            table.lock(LpId::new(2)),
            Err(SyncError::UnknownLp(_))
        ));
    }
}
