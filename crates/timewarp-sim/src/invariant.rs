//! Invariant checkers for simulation testing.
//!
//! Checkers run between harness steps (or right after a rollback) and
//! report the first property that does not hold.
//!
//! # Available Checkers
//!
//! - [`MarkUniquenessChecker`]: no two positive messages share a mark
//! - [`RendezvousMonotonicityChecker`]: rollback leaves no rendezvous in the future
//! - [`OutstandingRendezvousChecker`]: blocking states agree with session bookkeeping
//! - [`GroupVoteChecker`]: group counters stay within the member count

use std::collections::HashSet;

use timewarp_sync::{Group, GroupState, LogicalProcess, LpState, Message, MessageKind};
use timewarp_types::{Mark, SimTime};

use crate::SimError;

// ============================================================================
// Invariant Result
// ============================================================================

/// Result of an invariant check.
#[derive(Debug, Clone)]
pub enum InvariantResult {
    /// The invariant holds.
    Ok,
    /// The invariant is violated.
    Violated {
        /// Name of the violated invariant.
        invariant: String,
        /// Description of the violation.
        message: String,
        /// Additional context.
        context: Vec<(String, String)>,
    },
}

impl InvariantResult {
    /// Returns true if the invariant holds.
    pub fn is_ok(&self) -> bool {
        matches!(self, InvariantResult::Ok)
    }

    /// Converts to a `SimError` if violated.
    pub fn into_error(self, step: u64) -> Option<SimError> {
        match self {
            InvariantResult::Ok => None,
            InvariantResult::Violated {
                invariant,
                message,
                context,
            } => {
                if !context.is_empty() {
                    tracing::error!(%invariant, ?context, step, "invariant violated");
                }
                Some(SimError::InvariantViolation {
                    invariant,
                    message,
                    step,
                })
            }
        }
    }
}

fn violated(invariant: &str, message: String, context: Vec<(&str, String)>) -> InvariantResult {
    InvariantResult::Violated {
        invariant: invariant.to_string(),
        message,
        context: context
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    }
}

// ============================================================================
// Invariant Checker Trait
// ============================================================================

/// Trait for invariant checkers.
pub trait InvariantChecker {
    /// Returns the name of this checker.
    fn name(&self) -> &'static str;

    /// Resets the checker to its initial state.
    fn reset(&mut self);
}

// ============================================================================
// Mark Uniqueness Checker
// ============================================================================

/// Verifies that every positive or control message carries a fresh mark.
///
/// Antimessages reuse the mark of the message they cancel and are skipped.
#[derive(Debug, Default)]
pub struct MarkUniquenessChecker {
    seen: HashSet<Mark>,
    checked: u64,
}

impl MarkUniquenessChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `msg` as it leaves the transport.
    pub fn observe(&mut self, msg: &Message) -> InvariantResult {
        if msg.kind == MessageKind::Negative {
            return InvariantResult::Ok;
        }
        self.checked += 1;
        if self.seen.insert(msg.mark) {
            return InvariantResult::Ok;
        }
        violated(
            "mark_uniqueness",
            format!("mark {} delivered twice", msg.mark),
            vec![
                ("sender", msg.sender.to_string()),
                ("receiver", msg.receiver.to_string()),
                ("event_type", msg.event_type.to_string()),
            ],
        )
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }
}

impl InvariantChecker for MarkUniquenessChecker {
    fn name(&self) -> &'static str {
        "MarkUniquenessChecker"
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.checked = 0;
    }
}

// ============================================================================
// Rendezvous Monotonicity Checker
// ============================================================================

/// Verifies that after a rollback to `T` no rendezvous-queue entry is
/// newer than `T` and the queue is still in timestamp order.
#[derive(Debug, Default)]
pub struct RendezvousMonotonicityChecker {
    checked: u64,
}

impl RendezvousMonotonicityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_after_rollback(&mut self, lp: &LogicalProcess, target: SimTime) -> InvariantResult {
        self.checked += 1;
        let mut previous = SimTime::ZERO;
        for entry in lp.rendezvous_queue.iter() {
            if entry.timestamp > target {
                return violated(
                    "rendezvous_after_rollback_target",
                    format!(
                        "LP {} kept rendezvous {} at {} after rolling back to {target}",
                        lp.id, entry.rendezvous_mark, entry.timestamp
                    ),
                    vec![("queue_len", lp.rendezvous_queue.len().to_string())],
                );
            }
            if entry.timestamp < previous {
                return violated(
                    "rendezvous_queue_order",
                    format!("LP {} rendezvous queue out of order at {}", lp.id, entry.timestamp),
                    vec![("previous", previous.to_string())],
                );
            }
            previous = entry.timestamp;
        }
        InvariantResult::Ok
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }
}

impl InvariantChecker for RendezvousMonotonicityChecker {
    fn name(&self) -> &'static str {
        "RendezvousMonotonicityChecker"
    }

    fn reset(&mut self) {
        self.checked = 0;
    }
}

// ============================================================================
// Outstanding Rendezvous Checker
// ============================================================================

/// Verifies that an LP's blocking state matches its session bookkeeping.
///
/// - An initiator waiting on or ready for a rendezvous has a session,
///   at least one peer, and its bound entry carries the session mark.
/// - A peer waiting for UNBLOCK knows both the session and the initiator.
/// - An LP without a session has no peers recorded.
#[derive(Debug, Default)]
pub struct OutstandingRendezvousChecker {
    checked: u64,
}

impl OutstandingRendezvousChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, lp: &LogicalProcess) -> InvariantResult {
        self.checked += 1;
        let session = lp.wait_on_rendezvous;
        match lp.state {
            LpState::WaitForSynch | LpState::ReadyForSynch => {
                if session.is_none() || lp.ecs.is_empty() {
                    return violated(
                        "initiator_without_session",
                        format!("LP {} is {} without an open session", lp.id, lp.state),
                        vec![("peers", lp.ecs.len().to_string())],
                    );
                }
                let stamped = lp.queue.current().map(|entry| entry.rendezvous_mark);
                if stamped != Some(session) {
                    return violated(
                        "initiator_bound_entry_stamp",
                        format!("LP {} blocked on {session} but its bound entry is not stamped with it", lp.id),
                        vec![("stamped", format!("{stamped:?}"))],
                    );
                }
            }
            LpState::WaitForUnblock => {
                if session.is_none() || lp.wait_on_object.is_none() {
                    return violated(
                        "peer_without_initiator",
                        format!("LP {} waits for UNBLOCK without a session", lp.id),
                        vec![("wait_on_object", format!("{:?}", lp.wait_on_object))],
                    );
                }
            }
            _ => {}
        }
        if session.is_none() && !lp.ecs.is_empty() {
            return violated(
                "stale_ecs",
                format!("LP {} has no session but {} peers recorded", lp.id, lp.ecs.len()),
                vec![],
            );
        }
        InvariantResult::Ok
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }
}

impl InvariantChecker for OutstandingRendezvousChecker {
    fn name(&self) -> &'static str {
        "OutstandingRendezvousChecker"
    }

    fn reset(&mut self) {
        self.checked = 0;
    }
}

// ============================================================================
// Group Vote Checker
// ============================================================================

/// Verifies group counters and windows.
#[derive(Debug, Default)]
pub struct GroupVoteChecker {
    checked: u64,
}

impl GroupVoteChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, group: &Group) -> InvariantResult {
        self.checked += 1;
        let tot = group.tot();
        if group.counter_synch() >= tot {
            return violated(
                "group_synch_counter",
                format!("group {} counted {} start votes of {tot}", group.id(), group.counter_synch()),
                vec![("state", group.state().to_string())],
            );
        }
        if group.counter_log() > tot {
            return violated(
                "group_log_counter",
                format!("group {} expects {} log votes of {tot}", group.id(), group.counter_log()),
                vec![("state", group.state().to_string())],
            );
        }
        let window = group.window();
        if let Some(window) = &window
            && !group.contains(window.anchor)
        {
            return violated(
                "group_window_anchor",
                format!("group {} window anchored by outsider {}", group.id(), window.anchor),
                vec![],
            );
        }
        if matches!(group.state(), GroupState::WaitForUnblock | GroupState::ReadyForSynch) && window.is_none() {
            return violated(
                "group_round_without_window",
                format!("group {} is {} with no window open", group.id(), group.state()),
                vec![],
            );
        }
        InvariantResult::Ok
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }
}

impl InvariantChecker for GroupVoteChecker {
    fn name(&self) -> &'static str {
        "GroupVoteChecker"
    }

    fn reset(&mut self) {
        self.checked = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use timewarp_sync::ControlType;
    use timewarp_types::{EventType, LpId, RendezvousMark};

    fn event(sender: u32, mark: Mark, ts: f64) -> Message {
        Message::event(
            LpId::new(sender),
            LpId::new(0),
            EventType::new(1),
            SimTime::new(ts),
            SimTime::ZERO,
            mark,
            Bytes::new(),
        )
    }

    #[test]
    fn duplicate_marks_are_reported() {
        let mut checker = MarkUniquenessChecker::new();
        let mark = Mark::compose(LpId::new(1), 4);
        let msg = event(1, mark, 1.0);

        assert!(checker.observe(&msg).is_ok());
        assert!(checker.observe(&msg.antimessage()).is_ok());
        assert!(!checker.observe(&msg).is_ok());

        checker.reset();
        assert!(checker.observe(&msg).is_ok());
        assert_eq!(checker.checked(), 1);
    }

    #[test]
    fn rendezvous_past_target_is_reported() {
        let mut lp = LogicalProcess::new(LpId::new(2));
        let start = Message::control(
            ControlType::Start,
            LpId::new(0),
            LpId::new(2),
            SimTime::new(5.0),
            SimTime::new(5.0),
            MessageKind::Positive,
            Mark::compose(LpId::new(0), 1),
            RendezvousMark::new(1),
        );
        lp.rendezvous_queue.insert(start);

        let mut checker = RendezvousMonotonicityChecker::new();
        assert!(checker.check_after_rollback(&lp, SimTime::new(5.0)).is_ok());
        let result = checker.check_after_rollback(&lp, SimTime::new(4.0));
        let error = result.into_error(7).expect("violation");
        assert!(matches!(error, SimError::InvariantViolation { step: 7, .. }));
    }

    #[test]
    fn blocked_peer_needs_initiator() {
        let mut lp = LogicalProcess::new(LpId::new(1));
        let mut checker = OutstandingRendezvousChecker::new();
        assert!(checker.check(&lp).is_ok());

        lp.transition(LpState::WaitForUnblock);
        assert!(!checker.check(&lp).is_ok());

        lp.wait_on_rendezvous = RendezvousMark::new(1);
        lp.wait_on_object = Some(LpId::new(0));
        assert!(checker.check(&lp).is_ok());
    }

    #[test]
    fn initiator_without_peers_is_reported() {
        let mut lp = LogicalProcess::new(LpId::new(0));
        lp.wait_on_rendezvous = RendezvousMark::new(1);
        lp.transition(LpState::WaitForSynch);

        let mut checker = OutstandingRendezvousChecker::new();
        match checker.check(&lp) {
            InvariantResult::Violated { invariant, .. } => {
                assert_eq!(invariant, "initiator_without_session");
            }
            InvariantResult::Ok => panic!("expected violation"),
        }
    }

    #[test]
    fn fresh_group_is_consistent() {
        let group = Group::new(
            timewarp_types::GroupId::new(0),
            vec![LpId::new(0), LpId::new(1)],
        );
        let mut checker = GroupVoteChecker::new();
        assert!(checker.check(&group).is_ok());
        assert_eq!(checker.name(), "GroupVoteChecker");
    }
}
