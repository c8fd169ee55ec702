//! # tw-types: Core types for `Timewarp`
//!
//! This crate contains the small value types shared across the `Timewarp`
//! workspace:
//! - Entity IDs ([`LpId`], [`GroupId`], [`KernelId`])
//! - Simulated time ([`SimTime`])
//! - Causality identifiers ([`Mark`], [`RendezvousMark`])
//! - Event tags ([`EventType`])
//!
//! All of them are `Copy` and cheap to pass by value.

use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    ops::{Add, Sub},
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap 4-byte values)
// ============================================================================

/// Identifier of a logical process (one simulated entity).
///
/// LP ids are dense: the simulation kernel allocates them in `0..n_lps`
/// and uses them to index its LP table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LpId(u32);

impl LpId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the id as a `usize` for table indexing.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for LpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LpId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<LpId> for u32 {
    fn from(id: LpId) -> Self {
        id.0
    }
}

/// Identifier of a group of LPs that checkpoint and roll back together.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GroupId(u32);

impl GroupId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for GroupId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identifier of a kernel instance hosting a share of the LPs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct KernelId(u32);

impl KernelId {
    /// The master kernel, responsible for global reductions.
    pub const MASTER: KernelId = KernelId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn is_master(self) -> bool {
        self == Self::MASTER
    }
}

impl Display for KernelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Simulated Time
// ============================================================================

/// A point in simulated time.
///
/// Wraps an `f64` but is totally ordered (via [`f64::total_cmp`]) so it can
/// be used as a sort key for input queues. Equality follows the same total
/// order; use [`SimTime::approx_eq`] when comparing times computed by
/// different LPs.
#[derive(Clone, Copy, Serialize, Deserialize, Default)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);
    pub const INFINITY: SimTime = SimTime(f64::INFINITY);

    pub fn new(time: f64) -> Self {
        debug_assert!(!time.is_nan(), "simulated time must not be NaN");
        Self(time)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Returns true if both times are within `f64::EPSILON` of each other.
    pub fn approx_eq(self, other: SimTime) -> bool {
        (self.0 - other.0).abs() < f64::EPSILON
    }

    pub fn is_infinite(self) -> bool {
        self.0.is_infinite()
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for SimTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl Debug for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimTime({})", self.0)
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

impl From<f64> for SimTime {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl Add<f64> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: f64) -> Self::Output {
        SimTime::new(self.0 + rhs)
    }
}

impl Sub for SimTime {
    type Output = f64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

// ============================================================================
// Causality Identifiers
// ============================================================================

/// Globally unique identifier of a message.
///
/// A message and its antimessage share the same mark. Marks are built from
/// the sender id and a per-sender sequence number:
///
/// - Upper 32 bits: `sender + 1` (never zero, so no mark equals zero)
/// - Lower 32 bits: per-sender sequence
///
/// # Examples
///
/// ```
/// # use timewarp_types::{LpId, Mark};
/// let mark = Mark::compose(LpId::new(3), 7);
/// assert_eq!(mark.sender(), LpId::new(3));
/// assert_eq!(mark.sequence(), 7);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Mark(u64);

impl Mark {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Builds a mark from its sender and per-sender sequence number.
    pub fn compose(sender: LpId, seq: u32) -> Self {
        let sender_bits = (u64::from(sender.as_u32()) + 1) << 32;
        Self(sender_bits | u64::from(seq))
    }

    /// Extracts the LP that allocated this mark.
    pub fn sender(self) -> LpId {
        LpId::new(((self.0 >> 32) as u32).wrapping_sub(1))
    }

    /// Extracts the per-sender sequence number (lower 32 bits).
    pub fn sequence(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Mark {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of one rendezvous session.
///
/// Shared by the START, ACK, UNBLOCK and ROLLBACK messages of a session.
/// [`RendezvousMark::NONE`] (zero) means "not part of a rendezvous".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RendezvousMark(u64);

impl RendezvousMark {
    pub const NONE: RendezvousMark = RendezvousMark(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_some(self) -> bool {
        self.0 != 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for RendezvousMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Mark> for RendezvousMark {
    fn from(mark: Mark) -> Self {
        Self(mark.as_u64())
    }
}

impl From<u64> for RendezvousMark {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Event Tags
// ============================================================================

/// Numeric tag of a message: an application event type or a reserved
/// control tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventType(i32);

impl EventType {
    pub const fn new(tag: i32) -> Self {
        Self(tag)
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for EventType {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn sim_time_orders_totally() {
        let mut times = vec![SimTime::new(3.0), SimTime::ZERO, SimTime::new(1.5)];
        times.sort();
        assert_eq!(
            times,
            vec![SimTime::ZERO, SimTime::new(1.5), SimTime::new(3.0)]
        );
        assert!(SimTime::new(1e300) < SimTime::INFINITY);
    }

    #[test_case(10.0, 10.0, true; "identical")]
    #[test_case(10.0, 10.0 + f64::EPSILON / 4.0, true; "within epsilon")]
    #[test_case(10.0, 10.000_1, false; "distinct")]
    fn sim_time_approx_eq(a: f64, b: f64, expected: bool) {
        assert_eq!(SimTime::new(a).approx_eq(SimTime::new(b)), expected);
    }

    #[test]
    fn rendezvous_mark_none_is_zero() {
        assert!(RendezvousMark::NONE.is_none());
        assert!(RendezvousMark::new(7).is_some());
        assert_eq!(RendezvousMark::default(), RendezvousMark::NONE);
    }

    #[test]
    fn mark_is_never_zero() {
        assert_ne!(Mark::compose(LpId::new(0), 0).as_u64(), 0);
    }

    #[test]
    fn sim_time_serde_roundtrip_preserves_value() {
        let json = serde_json::to_string(&SimTime::new(2.5)).expect("serialize");
        assert_eq!(json, "2.5");
        let back: SimTime = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, SimTime::new(2.5));
    }

    proptest! {
        #[test]
        fn marks_from_distinct_senders_never_collide(
            a in 0u32..10_000, b in 0u32..10_000, sa in any::<u32>(), sb in any::<u32>()
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(Mark::compose(LpId::new(a), sa), Mark::compose(LpId::new(b), sb));
        }

        #[test]
        fn mark_decomposes_into_parts(sender in 0u32..u32::MAX, seq in any::<u32>()) {
            let mark = Mark::compose(LpId::new(sender), seq);
            prop_assert_eq!(mark.sender(), LpId::new(sender));
            prop_assert_eq!(mark.sequence(), seq);
        }
    }
}
