//! Event and control messages.
//!
//! This module defines the unit of causality exchanged between LPs:
//!
//! ## Application traffic
//! - Positive messages carrying an application [`EventType`] below the
//!   reserved control range
//! - Their antimessages ([`MessageKind::Negative`], same [`Mark`])
//!
//! ## Control traffic (reserved range `MIN_CONTROL..=MAX_CONTROL`)
//! - [`ControlType::Start`] - Initiator → Peer: open a rendezvous session
//! - [`ControlType::Ack`] - Peer → Initiator: session accepted
//! - [`ControlType::Unblock`] - Initiator → Peer: session finished
//! - [`ControlType::Rollback`] - Peer → Initiator: session undone
//! - [`ControlType::NullLog`] - Group member → Group: checkpoint vote
//! - [`ControlType::SynchGroup`] - Group member → Group: synchronization vote
//! - [`ControlType::CloseGroup`] - Group member → Group: final checkpoint
//! - [`ControlType::GroupRollback`] - Group anchor → Group: undo the round

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use timewarp_types::{EventType, LpId, Mark, RendezvousMark, SimTime};

// ============================================================================
// Control Range
// ============================================================================

/// Lowest tag of the reserved control range (inclusive).
pub const MIN_CONTROL: i32 = i32::MAX - 1024;

/// Highest tag of the reserved control range (inclusive).
pub const MAX_CONTROL: i32 = i32::MAX;

/// Returns true if `event_type` lies in the reserved control range.
pub fn is_control(event_type: EventType) -> bool {
    (MIN_CONTROL..=MAX_CONTROL).contains(&event_type.as_i32())
}

/// Control messages understood by the synchronization core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ControlType {
    Start = MIN_CONTROL,
    Ack,
    Unblock,
    Rollback,
    NullLog,
    SynchGroup,
    CloseGroup,
    GroupRollback,
}

impl ControlType {
    const ALL: [ControlType; 8] = [
        ControlType::Start,
        ControlType::Ack,
        ControlType::Unblock,
        ControlType::Rollback,
        ControlType::NullLog,
        ControlType::SynchGroup,
        ControlType::CloseGroup,
        ControlType::GroupRollback,
    ];

    /// Returns the wire tag of this control message.
    pub fn event_type(self) -> EventType {
        EventType::new(self as i32)
    }

    /// Maps a tag back to a control type.
    ///
    /// Returns `None` both for application tags and for tags inside the
    /// reserved range that name no known control message; callers must
    /// distinguish the two with [`is_control`].
    pub fn from_event_type(event_type: EventType) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|control| control.event_type() == event_type)
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlType::Start => "START",
            ControlType::Ack => "ACK",
            ControlType::Unblock => "UNBLOCK",
            ControlType::Rollback => "ROLLBACK",
            ControlType::NullLog => "NULL_LOG_MESSAGE",
            ControlType::SynchGroup => "SYNCH_GROUP",
            ControlType::CloseGroup => "CLOSE_GROUP",
            ControlType::GroupRollback => "GROUP_ROLLBACK",
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Polarity of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// An ordinary message.
    Positive,
    /// An antimessage annihilating the positive message with the same mark.
    Negative,
    /// A pure control antimessage (rollback notifications).
    Other,
}

/// A simulation message.
///
/// Immutable once handed to the transport. The only field the core ever
/// rewrites on a delivered message is `rendezvous_mark`, which is consumed
/// when a rollback notification for that session is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: LpId,
    pub receiver: LpId,
    pub event_type: EventType,
    /// Simulated delivery time.
    pub timestamp: SimTime,
    /// Simulated time at which the message was generated.
    pub send_time: SimTime,
    pub kind: MessageKind,
    pub mark: Mark,
    pub rendezvous_mark: RendezvousMark,
    pub payload: Bytes,
}

impl Message {
    /// Creates a positive application message.
    pub fn event(
        sender: LpId,
        receiver: LpId,
        event_type: EventType,
        timestamp: SimTime,
        send_time: SimTime,
        mark: Mark,
        payload: Bytes,
    ) -> Self {
        debug_assert!(
            timestamp >= send_time,
            "message scheduled in the past: timestamp={timestamp} send_time={send_time}"
        );
        Self {
            sender,
            receiver,
            event_type,
            timestamp,
            send_time,
            kind: MessageKind::Positive,
            mark,
            rendezvous_mark: RendezvousMark::NONE,
            payload,
        }
    }

    /// Creates a control message with an empty payload.
    pub fn control(
        control: ControlType,
        sender: LpId,
        receiver: LpId,
        timestamp: SimTime,
        send_time: SimTime,
        kind: MessageKind,
        mark: Mark,
        rendezvous_mark: RendezvousMark,
    ) -> Self {
        Self {
            sender,
            receiver,
            event_type: control.event_type(),
            timestamp,
            send_time,
            kind,
            mark,
            rendezvous_mark,
            payload: Bytes::new(),
        }
    }

    /// Derives the antimessage of this message.
    ///
    /// The antimessage shares sender, receiver, timestamp and mark and
    /// carries no payload.
    pub fn antimessage(&self) -> Self {
        Self {
            kind: MessageKind::Negative,
            payload: Bytes::new(),
            ..self.clone()
        }
    }

    /// Returns the control type, if this is a known control message.
    pub fn control_type(&self) -> Option<ControlType> {
        ControlType::from_event_type(self.event_type)
    }

    pub fn is_control(&self) -> bool {
        is_control(self.event_type)
    }

    pub fn is_positive(&self) -> bool {
        self.kind == MessageKind::Positive
    }

    /// Size of the application payload in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

// ============================================================================
// Mark Allocation
// ============================================================================

/// Per-LP allocator of message marks.
///
/// Marks are monotonic per sender and embed the sender id, which makes
/// them unique across the whole run without coordination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkAllocator {
    owner: LpId,
    next_seq: u32,
}

impl MarkAllocator {
    pub fn new(owner: LpId) -> Self {
        Self { owner, next_seq: 1 }
    }

    /// Allocates the next mark.
    ///
    /// # Panics
    ///
    /// Panics once the LP has used up its `u32` sequence space. A run
    /// that sends four billion messages from one LP is not supported.
    pub fn next_mark(&mut self) -> Mark {
        assert!(
            self.next_seq < u32::MAX,
            "mark sequence exhausted for LP {}",
            self.owner
        );
        let mark = Mark::compose(self.owner, self.next_seq);
        self.next_seq += 1;
        mark
    }

    /// Allocates a fresh rendezvous session identifier.
    pub fn next_rendezvous_mark(&mut self) -> RendezvousMark {
        RendezvousMark::from(self.next_mark())
    }

    /// Number of marks handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next_seq - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ControlType::Start; "start")]
    #[test_case(ControlType::Ack; "ack")]
    #[test_case(ControlType::Unblock; "unblock")]
    #[test_case(ControlType::Rollback; "rollback")]
    #[test_case(ControlType::NullLog; "null log")]
    #[test_case(ControlType::SynchGroup; "synch group")]
    #[test_case(ControlType::CloseGroup; "close group")]
    #[test_case(ControlType::GroupRollback; "group rollback")]
    fn control_tags_are_in_reserved_range(control: ControlType) {
        assert!(is_control(control.event_type()));
        assert_eq!(
            ControlType::from_event_type(control.event_type()),
            Some(control)
        );
    }

    #[test_case(0 => false; "zero")]
    #[test_case(42 => false; "application tag")]
    #[test_case(-1 => false; "negative tag")]
    #[test_case(MIN_CONTROL - 1 => false; "just below range")]
    #[test_case(MIN_CONTROL + 500 => true; "unassigned control tag")]
    #[test_case(MAX_CONTROL => true; "top of range")]
    fn classifies_tags(tag: i32) -> bool {
        is_control(EventType::new(tag))
    }

    #[test]
    fn unassigned_control_tag_has_no_control_type() {
        let tag = EventType::new(MIN_CONTROL + 500);
        assert!(is_control(tag));
        assert_eq!(ControlType::from_event_type(tag), None);
    }

    #[test]
    fn antimessage_mirrors_positive() {
        let msg = Message::event(
            LpId::new(1),
            LpId::new(2),
            EventType::new(3),
            SimTime::new(5.0),
            SimTime::new(4.0),
            Mark::compose(LpId::new(1), 9),
            Bytes::from_static(b"payload"),
        );
        let anti = msg.antimessage();

        assert_eq!(anti.kind, MessageKind::Negative);
        assert_eq!(anti.mark, msg.mark);
        assert_eq!(anti.sender, msg.sender);
        assert_eq!(anti.receiver, msg.receiver);
        assert_eq!(anti.timestamp, msg.timestamp);
        assert_eq!(anti.size(), 0);
    }

    #[test]
    #[should_panic(expected = "mark sequence exhausted")]
    fn allocator_panics_when_sequence_runs_out() {
        let mut marks = MarkAllocator {
            owner: LpId::new(3),
            next_seq: u32::MAX - 1,
        };
        let last = marks.next_mark();
        assert_eq!(marks.allocated(), u32::MAX - 1);
        assert_eq!(last, Mark::compose(LpId::new(3), u32::MAX - 1));
        marks.next_mark();
    }

    #[test]
    fn allocator_is_monotonic_per_sender() {
        let mut marks = MarkAllocator::new(LpId::new(4));
        let a = marks.next_mark();
        let b = marks.next_mark();
        assert!(a < b);
        assert_eq!(a.sender(), LpId::new(4));
        assert_eq!(marks.allocated(), 2);
    }
}
