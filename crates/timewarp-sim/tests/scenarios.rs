//! End-to-end runs of the harness over the sync core.

use test_case::test_case;
use timewarp_sim::{
    Application, Outbox, PING, PingPong, PingPongState, SimConfig, SimError, Simulation,
};
use timewarp_sync::{SyncConfig, SyncEvent};
use timewarp_types::{EventType, LpId, SimTime};

fn base(seed: u64) -> SimConfig {
    SimConfig::default()
        .with_seed(seed)
        .with_lps(5)
        .with_end_time(20.0)
        .with_max_steps(200_000)
}

#[test_case(1 ; "seed 1")]
#[test_case(7 ; "seed 7")]
#[test_case(1234 ; "seed 1234")]
fn rendezvous_runs_end_unblocked(seed: u64) {
    let config = base(seed);
    let mut sim = Simulation::new(config, PingPong::new(5, 2)).expect("sim");
    let summary = sim.run().expect("run");

    assert!(summary.quiescent, "{summary:?}");
    assert!(summary.blocked.is_empty(), "{:?}", summary.blocked);
    assert!(summary.stats.synchronized_sections > 0);
    assert!(summary.forced_checkpoints > 0);
}

#[test]
fn optimistic_run_commits_the_conservative_history() {
    // Without rendezvous no two tokens ever meet at the same time, so the
    // committed history is unique and both schedules must agree on it.
    let conservative = {
        let mut sim = Simulation::new(base(3).conservative(), PingPong::new(5, 0)).expect("sim");
        let summary = sim.run().expect("run");
        assert_eq!(summary.stats.rollbacks, 0);
        sim.states().to_vec()
    };

    for seed in [3, 11, 42] {
        let mut sim = Simulation::new(base(seed), PingPong::new(5, 0)).expect("sim");
        let summary = sim.run().expect("run");
        assert!(summary.quiescent);
        assert_eq!(sim.states(), conservative.as_slice(), "seed {seed}");
    }
}

#[test]
fn optimism_produces_rollbacks() {
    let total: u64 = (0..8)
        .map(|seed| {
            let mut sim = Simulation::new(base(seed), PingPong::new(5, 2)).expect("sim");
            sim.run().expect("run").stats.rollbacks
        })
        .sum();
    assert!(total > 0);
}

#[test]
fn grouped_run_closes_every_group() {
    let config = base(5).with_lps(6).with_groups(3).with_journal();
    let app = PingPong::new(6, 2).with_groups(&config.group_layout());
    let mut sim = Simulation::new(config, app).expect("sim");
    let summary = sim.run().expect("run");

    assert_eq!(sim.groups().len(), 2);
    assert!(summary.quiescent, "{summary:?}");
    assert!(summary.blocked.is_empty(), "{:?}", summary.blocked);
    let votes = sim
        .journal()
        .iter()
        .filter(|event| matches!(event, SyncEvent::GroupVote { .. }))
        .count();
    assert!(votes > 0);
    for group in sim.core().groups().expect("groups").all() {
        assert!(group.window().is_none());
    }
}

#[test]
fn committed_rendezvous_history_is_reclaimed() {
    let config = base(0).with_end_time(60.0).conservative();
    let mut sim = Simulation::new(config, PingPong::new(5, 2)).expect("sim");
    let summary = sim.run().expect("run");

    assert!(summary.quiescent, "{summary:?}");
    assert!(summary.stats.synchronized_sections > 0);
    for lp in sim.core().lps().ids() {
        let record = sim.core().lp(lp).expect("lp");
        let stale = record
            .rendezvous_queue
            .iter()
            .filter(|entry| entry.timestamp < summary.gvt)
            .count();
        assert_eq!(stale, 0, "{lp} kept {stale} STARTs below GVT {}", summary.gvt);
    }
}

#[test]
fn disabled_cross_state_ignores_rendezvous_requests() {
    let config = base(9).with_sync(SyncConfig::disabled());
    let mut sim = Simulation::new(config, PingPong::new(5, 1)).expect("sim");
    let summary = sim.run().expect("run");

    assert!(summary.blocked.is_empty());
    assert_eq!(summary.stats.synchronized_sections, 0);
    assert!(sim.states().iter().all(|state: &PingPongState| state.rendezvous == 0));
}

#[test]
fn journal_records_rendezvous_lifecycle() {
    let mut sim =
        Simulation::new(base(2).with_journal(), PingPong::new(5, 2)).expect("sim");
    sim.run().expect("run");

    let opened = sim
        .journal()
        .iter()
        .filter(|event| matches!(event, SyncEvent::RendezvousOpened { .. }))
        .count();
    let unblocked = sim
        .journal()
        .iter()
        .filter(|event| matches!(event, SyncEvent::Unblocked { .. }))
        .count();
    assert!(opened > 0);
    assert!(unblocked > 0);
}

// ============================================================================
// Group synchronization points
// ============================================================================

/// Every LP hops a token to itself; LP 0 asks for a group synchronization
/// point on its second token and closes the group on its fourth.
#[derive(Debug)]
struct Checkpointed;

impl Application for Checkpointed {
    type State = u32;

    fn init(&self, _lp: LpId) -> u32 {
        0
    }

    fn process_event(
        &self,
        lp: LpId,
        now: SimTime,
        _event_type: EventType,
        _payload: &[u8],
        state: &mut u32,
        out: &mut Outbox,
    ) {
        *state += 1;
        out.schedule(lp, now + 1.0, PING, Vec::new());
        if lp == LpId::new(0) {
            match *state {
                2 => out.synchronize_group(),
                4 => out.close_group(),
                _ => {}
            }
        }
    }
}

#[test]
fn synchronization_point_parks_the_whole_group() {
    let config = base(0)
        .with_lps(3)
        .with_end_time(8.0)
        .conservative()
        .with_groups(3)
        .with_journal();
    let mut sim = Simulation::new(config, Checkpointed).expect("sim");
    let summary = sim.run().expect("run");

    assert!(summary.quiescent, "{summary:?}");
    assert!(summary.blocked.is_empty(), "{:?}", summary.blocked);
    let parked = sim
        .journal()
        .iter()
        .filter(|event| {
            matches!(
                event,
                SyncEvent::StateChanged {
                    to: timewarp_sync::LpState::WaitForGroup,
                    ..
                }
            )
        })
        .count();
    assert_eq!(parked, 3);
    // Two CLOSE_GROUP rounds: LP 0's request and the one at the end.
    assert!(summary.forced_checkpoints >= 3 + 3 + 3);
    assert!(sim.states().iter().all(|&events| events >= 8));
}

// ============================================================================
// Application errors
// ============================================================================

#[derive(Debug)]
struct Misbehaving {
    reserved: bool,
}

impl Application for Misbehaving {
    type State = ();

    fn init(&self, _lp: LpId) {}

    fn process_event(
        &self,
        lp: LpId,
        now: SimTime,
        _event_type: EventType,
        _payload: &[u8],
        _state: &mut (),
        out: &mut Outbox,
    ) {
        if self.reserved {
            out.schedule(lp, now + 1.0, timewarp_sync::ControlType::Start.event_type(), Vec::new());
        } else {
            out.schedule(lp, SimTime::new(now.as_f64() - 1.0), PING, Vec::new());
        }
    }
}

#[test]
fn reserved_event_types_are_rejected() {
    let mut sim = Simulation::new(base(0).with_lps(1), Misbehaving { reserved: true }).expect("sim");
    assert!(matches!(sim.run(), Err(SimError::ReservedEventType(_))));
}

#[test]
fn scheduling_into_the_past_is_rejected() {
    let mut sim = Simulation::new(base(0).with_lps(1), Misbehaving { reserved: false }).expect("sim");
    assert!(matches!(sim.run(), Err(SimError::Causality { .. })));
}
