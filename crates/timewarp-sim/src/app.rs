//! Application model driven by the harness.
//!
//! An application never talks to the sync core: it mutates its own state
//! and records what it wants done in an [`Outbox`]. The harness turns the
//! outbox into messages, rendezvous sessions and group requests.

use bytes::Bytes;
use serde::Serialize;
use timewarp_types::{EventType, LpId, SimTime};

/// Tag of the event every LP executes first, at time zero.
pub const INIT: EventType = EventType::new(0);

/// An event the application wants delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub receiver: LpId,
    pub timestamp: SimTime,
    pub event_type: EventType,
    pub payload: Bytes,
}

/// Side effects requested while processing one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbox {
    lp: LpId,
    now: SimTime,
    events: Vec<Scheduled>,
    rendezvous: Vec<LpId>,
    synchronize: bool,
    close_group: bool,
}

impl Outbox {
    pub fn new(lp: LpId, now: SimTime) -> Self {
        Self {
            lp,
            now,
            events: Vec::new(),
            rendezvous: Vec::new(),
            synchronize: false,
            close_group: false,
        }
    }

    pub fn lp(&self) -> LpId {
        self.lp
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedules an event for `receiver` at `timestamp`.
    pub fn schedule(
        &mut self,
        receiver: LpId,
        timestamp: SimTime,
        event_type: EventType,
        payload: impl Into<Bytes>,
    ) {
        self.events.push(Scheduled {
            receiver,
            timestamp,
            event_type,
            payload: payload.into(),
        });
    }

    /// Asks to borrow `peer`'s state before this event completes.
    pub fn rendezvous_with(&mut self, peer: LpId) {
        if !self.rendezvous.contains(&peer) {
            self.rendezvous.push(peer);
        }
    }

    /// Starts a SYNCH_GROUP round for this LP's group.
    pub fn synchronize_group(&mut self) {
        self.synchronize = true;
    }

    /// Asks every member of this LP's group to checkpoint.
    pub fn close_group(&mut self) {
        self.close_group = true;
    }

    pub fn events(&self) -> &[Scheduled] {
        &self.events
    }

    pub fn rendezvous(&self) -> &[LpId] {
        &self.rendezvous
    }

    pub fn wants_synchronize(&self) -> bool {
        self.synchronize
    }

    pub fn wants_close_group(&self) -> bool {
        self.close_group
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.rendezvous.is_empty() && !self.synchronize && !self.close_group
    }
}

/// A simulation model.
///
/// `process_event` must be a deterministic function of its inputs: the
/// harness re-executes events silently after restoring a snapshot and
/// relies on getting the same state back.
pub trait Application {
    type State: Clone + std::fmt::Debug;

    fn init(&self, lp: LpId) -> Self::State;

    fn process_event(
        &self,
        lp: LpId,
        now: SimTime,
        event_type: EventType,
        payload: &[u8],
        state: &mut Self::State,
        out: &mut Outbox,
    );

    /// Runs once per bound peer when a rendezvous of `lp` is synchronized.
    /// Both states may be modified.
    fn on_synchronized(
        &self,
        _lp: LpId,
        _now: SimTime,
        _state: &mut Self::State,
        _peer: LpId,
        _peer_state: &mut Self::State,
    ) {
    }
}

// ============================================================================
// PingPong Workload
// ============================================================================

/// Tag of a token hop.
pub const PING: EventType = EventType::new(1);

/// Per-LP state of [`PingPong`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PingPongState {
    /// Tokens received.
    pub events: u64,
    /// Order-sensitive digest of every token seen.
    pub digest: u64,
    /// Rendezvous sessions this LP took part in.
    pub rendezvous: u64,
    /// Sum of peer event counts observed through rendezvous.
    pub borrowed: u64,
}

/// Tokens bounce between LPs; every `period`-th token an LP borrows the
/// state of its rendezvous peers.
///
/// Peers always have higher ids than the initiator, which keeps the
/// wait-for graph acyclic. In group mode the lowest member of each group
/// rendezvouses with the whole group at once.
#[derive(Debug, Clone)]
pub struct PingPong {
    lps: u32,
    period: u32,
    peers: Vec<Vec<LpId>>,
    whole_group: Vec<bool>,
}

impl PingPong {
    pub fn new(lps: u32, period: u32) -> Self {
        let peers = (0..lps)
            .map(|lp| ((lp + 1)..lps).map(LpId::new).collect())
            .collect();
        Self {
            lps,
            period,
            peers,
            whole_group: vec![false; lps as usize],
        }
    }

    /// Restricts rendezvous to group members: the lowest member of each
    /// group becomes its initiator, the others never initiate.
    pub fn with_groups(mut self, groups: &[Vec<LpId>]) -> Self {
        for members in groups {
            let Some(&anchor) = members.iter().min() else {
                continue;
            };
            for &member in members {
                if let Some(peers) = self.peers.get_mut(member.as_usize()) {
                    peers.clear();
                }
            }
            if let Some(peers) = self.peers.get_mut(anchor.as_usize()) {
                peers.extend(members.iter().copied().filter(|&m| m != anchor));
            }
            if let Some(flag) = self.whole_group.get_mut(anchor.as_usize()) {
                *flag = true;
            }
        }
        self
    }

    pub fn peers_of(&self, lp: LpId) -> &[LpId] {
        self.peers
            .get(lp.as_usize())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn hop(&self, lp: LpId, now: SimTime, hops: u64, state: &PingPongState, out: &mut Outbox) {
        let lps = u64::from(self.lps.max(1));
        let target = if lps == 1 {
            lp
        } else {
            let offset = 1 + state.digest % (lps - 1);
            LpId::new(((u64::from(lp.as_u32()) + offset) % lps) as u32)
        };
        let delay = 0.5 + (state.digest % 4) as f64 * 0.25;
        out.schedule(target, now + delay, PING, hops.to_le_bytes().to_vec());
    }
}

fn decode_hops(payload: &[u8]) -> u64 {
    payload
        .get(..8)
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map_or(0, u64::from_le_bytes)
}

impl Application for PingPong {
    type State = PingPongState;

    fn init(&self, _lp: LpId) -> PingPongState {
        PingPongState::default()
    }

    fn process_event(
        &self,
        lp: LpId,
        now: SimTime,
        event_type: EventType,
        payload: &[u8],
        state: &mut PingPongState,
        out: &mut Outbox,
    ) {
        if event_type == INIT {
            let first = SimTime::new(1.0 + f64::from(lp.as_u32()) * 0.1);
            out.schedule(lp, first, PING, 0u64.to_le_bytes().to_vec());
            return;
        }
        if event_type != PING {
            tracing::warn!(lp = %lp, %event_type, "unknown event type ignored");
            return;
        }

        let hops = decode_hops(payload);
        state.events += 1;
        state.digest = state
            .digest
            .wrapping_mul(31)
            .wrapping_add(hops ^ u64::from(lp.as_u32()));
        self.hop(lp, now, hops + 1, state, out);

        if self.period > 0 && state.events % u64::from(self.period) == 0 {
            let peers = self.peers_of(lp);
            if self.whole_group.get(lp.as_usize()).copied().unwrap_or(false) {
                for &peer in peers {
                    out.rendezvous_with(peer);
                }
            } else if !peers.is_empty() {
                let pick = (state.events / u64::from(self.period)) as usize % peers.len();
                out.rendezvous_with(peers[pick]);
            }
        }
    }

    fn on_synchronized(
        &self,
        _lp: LpId,
        _now: SimTime,
        state: &mut PingPongState,
        _peer: LpId,
        peer_state: &mut PingPongState,
    ) {
        state.borrowed += peer_state.events;
        state.rendezvous += 1;
        peer_state.rendezvous += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schedules_first_token() {
        let app = PingPong::new(4, 2);
        let mut state = app.init(LpId::new(2));
        let mut out = Outbox::new(LpId::new(2), SimTime::ZERO);
        app.process_event(LpId::new(2), SimTime::ZERO, INIT, &[], &mut state, &mut out);

        assert_eq!(out.events().len(), 1);
        assert_eq!(out.events()[0].receiver, LpId::new(2));
        assert_eq!(out.events()[0].timestamp, SimTime::new(1.2));
        assert_eq!(state, PingPongState::default());
    }

    #[test]
    fn tokens_move_forward_in_time() {
        let app = PingPong::new(5, 0);
        let mut state = PingPongState::default();
        let now = SimTime::new(3.0);
        let mut out = Outbox::new(LpId::new(1), now);
        app.process_event(LpId::new(1), now, PING, &7u64.to_le_bytes(), &mut state, &mut out);

        let hop = &out.events()[0];
        assert!(hop.timestamp > now);
        assert_ne!(hop.receiver, LpId::new(1));
        assert_eq!(decode_hops(&hop.payload), 8);
        assert!(out.rendezvous().is_empty());
    }

    #[test]
    fn processing_is_deterministic() {
        let app = PingPong::new(6, 2);
        let run = || {
            let mut state = PingPongState::default();
            let mut outs = Vec::new();
            for i in 0..6u64 {
                let now = SimTime::new(1.0 + i as f64);
                let mut out = Outbox::new(LpId::new(3), now);
                app.process_event(LpId::new(3), now, PING, &i.to_le_bytes(), &mut state, &mut out);
                outs.push(out);
            }
            (state, outs)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn rendezvous_only_with_higher_ids() {
        let app = PingPong::new(4, 1);
        assert_eq!(app.peers_of(LpId::new(1)), &[LpId::new(2), LpId::new(3)]);
        assert!(app.peers_of(LpId::new(3)).is_empty());

        let mut state = PingPongState::default();
        let mut out = Outbox::new(LpId::new(3), SimTime::new(1.0));
        app.process_event(LpId::new(3), SimTime::new(1.0), PING, &[], &mut state, &mut out);
        assert!(out.rendezvous().is_empty());
    }

    #[test]
    fn group_anchor_binds_whole_group() {
        let groups = vec![
            vec![LpId::new(0), LpId::new(1), LpId::new(2)],
            vec![LpId::new(3), LpId::new(4)],
        ];
        let app = PingPong::new(5, 1).with_groups(&groups);
        assert_eq!(app.peers_of(LpId::new(0)), &[LpId::new(1), LpId::new(2)]);
        assert!(app.peers_of(LpId::new(1)).is_empty());
        assert_eq!(app.peers_of(LpId::new(3)), &[LpId::new(4)]);

        let mut state = PingPongState::default();
        let mut out = Outbox::new(LpId::new(0), SimTime::new(1.0));
        app.process_event(LpId::new(0), SimTime::new(1.0), PING, &[], &mut state, &mut out);
        assert_eq!(out.rendezvous(), &[LpId::new(1), LpId::new(2)]);
    }

    #[test]
    fn synchronized_section_touches_both_states() {
        let app = PingPong::new(2, 1);
        let mut own = PingPongState::default();
        let mut peer = PingPongState {
            events: 4,
            ..Default::default()
        };
        app.on_synchronized(LpId::new(0), SimTime::new(1.0), &mut own, LpId::new(1), &mut peer);
        assert_eq!(own.borrowed, 4);
        assert_eq!(own.rendezvous, 1);
        assert_eq!(peer.rendezvous, 1);
    }
}
