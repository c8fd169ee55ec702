//! Collaborator seams and the per-message execution context.
//!
//! The core never talks to the transport or the checkpoint store
//! directly. Every handler receives an [`ExecutionContext`] scoped to the
//! processing of one message, which carries the collaborators, the
//! "current LP / current time" cursor and the structured event journal.

use timewarp_types::{LpId, SimTime};

use crate::events::SyncEvent;
use crate::lp::LogicalProcess;
use crate::message::Message;

/// Point-to-point message delivery.
///
/// Called synchronously; the core never retries.
pub trait Transport {
    fn send(&mut self, msg: Message);

    /// Pushes any output of `lp` still buffered by the transport.
    fn flush(&mut self, _lp: LpId) {}
}

/// State saving for LPs.
pub trait CheckpointStore {
    /// Takes a snapshot of `lp` now, out of band.
    fn force_checkpoint(&mut self, lp: &LogicalProcess);

    /// Runs the periodic state-logging step. Returns true if a snapshot was
    /// actually taken.
    fn log_state(&mut self, lp: &LogicalProcess) -> bool;
}

/// LP and simulated time a control side effect runs on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub lp: LpId,
    pub now: SimTime,
}

/// Context for handling one message.
pub struct ExecutionContext<'a> {
    transport: &'a mut dyn Transport,
    checkpoints: &'a mut dyn CheckpointStore,
    cursor: Option<Cursor>,
    journal: Vec<SyncEvent>,
    sent: usize,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(transport: &'a mut dyn Transport, checkpoints: &'a mut dyn CheckpointStore) -> Self {
        Self {
            transport,
            checkpoints,
            cursor: None,
            journal: Vec::new(),
            sent: 0,
        }
    }

    /// Points the cursor at `lp` and `now`.
    pub fn enter(&mut self, lp: LpId, now: SimTime) {
        self.cursor = Some(Cursor { lp, now });
    }

    /// Resets the cursor to idle.
    pub fn leave(&mut self) {
        self.cursor = None;
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    pub fn now(&self) -> Option<SimTime> {
        self.cursor.map(|cursor| cursor.now)
    }

    pub fn send(&mut self, msg: Message) {
        tracing::trace!(
            from = %msg.sender,
            to = %msg.receiver,
            event_type = %msg.event_type,
            time = %msg.timestamp,
            mark = %msg.mark,
            "send"
        );
        self.sent += 1;
        self.transport.send(msg);
    }

    pub fn flush(&mut self, lp: LpId) {
        self.transport.flush(lp);
    }

    pub fn force_checkpoint(&mut self, lp: &LogicalProcess) {
        self.checkpoints.force_checkpoint(lp);
    }

    pub fn log_state(&mut self, lp: &LogicalProcess) -> bool {
        self.checkpoints.log_state(lp)
    }

    pub fn emit(&mut self, event: SyncEvent) {
        self.journal.push(event);
    }

    pub fn journal(&self) -> &[SyncEvent] {
        &self.journal
    }

    /// Drains the journal.
    pub fn take_journal(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.journal)
    }

    /// Number of messages sent through this context.
    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl std::fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cursor", &self.cursor)
            .field("journal", &self.journal.len())
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}
