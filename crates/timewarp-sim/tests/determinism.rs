//! Same seed, same run.

use proptest::prelude::*;
use timewarp_sim::{PingPong, PingPongState, SimConfig, SimStats, Simulation};
use timewarp_types::SimTime;

fn run(config: SimConfig, period: u32) -> (SimStats, Vec<PingPongState>, Vec<SimTime>) {
    let app = PingPong::new(config.lps, period).with_groups(&config.group_layout());
    let mut sim = Simulation::new(config, app).expect("sim");
    let summary = sim.run().expect("run");
    (summary.stats, sim.states().to_vec(), summary.lvts)
}

#[test]
fn same_seed_same_history() {
    let config = SimConfig::default().with_seed(99).with_lps(6).with_end_time(25.0);
    assert_eq!(run(config.clone(), 2), run(config, 2));
}

#[test]
fn same_seed_same_history_with_groups() {
    let config = SimConfig::default()
        .with_seed(4)
        .with_lps(6)
        .with_end_time(25.0)
        .with_groups(3);
    assert_eq!(run(config.clone(), 2), run(config, 2));
}

#[test]
fn summary_serializes() {
    let config = SimConfig::default().with_seed(1).with_lps(3).with_end_time(5.0);
    let mut sim = Simulation::new(config, PingPong::new(3, 2)).expect("sim");
    let summary = sim.run().expect("run");

    let json = serde_json::to_value(&summary).expect("json");
    assert_eq!(json["seed"], 1);
    assert!(json["stats"]["events_executed"].as_u64().is_some());
    assert_eq!(json["blocked"].as_array().map(Vec::len), Some(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_seed_runs_to_quiescence(seed in any::<u64>(), lps in 2u32..6, period in 0u32..4) {
        let config = SimConfig::default()
            .with_seed(seed)
            .with_lps(lps)
            .with_end_time(10.0)
            .with_gvt_period(64);
        let app = PingPong::new(lps, period);
        let mut sim = Simulation::new(config, app).expect("sim");
        let summary = sim.run().expect("run");

        prop_assert!(summary.quiescent);
        prop_assert!(summary.blocked.is_empty());
        prop_assert!(summary.lvts.iter().all(|&lvt| lvt <= SimTime::new(10.0)));
    }

    #[test]
    fn grouped_runs_reach_quiescence(seed in any::<u64>(), size in 2u32..4) {
        let config = SimConfig::default()
            .with_seed(seed)
            .with_lps(6)
            .with_end_time(10.0)
            .with_groups(size);
        let app = PingPong::new(6, 2).with_groups(&config.group_layout());
        let mut sim = Simulation::new(config, app).expect("sim");
        let summary = sim.run().expect("run");

        prop_assert!(summary.quiescent);
        prop_assert!(summary.blocked.is_empty());
    }
}
