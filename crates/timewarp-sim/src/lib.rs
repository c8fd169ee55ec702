//! # timewarp-sim: Deterministic harness for the Time Warp sync core
//!
//! Drives a [`timewarp_sync::SyncCore`] with an in-memory transport, an
//! in-memory state saver and a small optimistic scheduler, so the
//! rendezvous and group protocols can be exercised end to end from a
//! single seed.

#![allow(clippy::cast_precision_loss)] // Summary times are reported as f64
#![allow(clippy::struct_excessive_bools)] // Config structs have many feature flags
#![allow(clippy::cast_possible_truncation)] // LP indices fit in u32
#![cfg_attr(test, allow(clippy::float_cmp))] // Test assertions use exact float comparisons
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Simulation                             │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌────────────────┐   │
//! │  │ SimTransport│  │ MemoryCheckpoints│  │ SimRng         │   │
//! │  │ (batches)   │  │ (snapshots)      │  │ (deterministic)│   │
//! │  └─────────────┘  └──────────────────┘  └────────────────┘   │
//! │          │                 │                                 │
//! │          ▼                 ▼                                 │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ SyncCore: filters, rendezvous, rollback, groups         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Invariant checkers                                      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use timewarp_sim::{PingPong, SimConfig, Simulation};
//!
//! let config = SimConfig::default().with_seed(42).with_lps(4);
//! let app = PingPong::new(4, 3);
//! let mut sim = Simulation::new(config, app)?;
//! let summary = sim.run()?;
//! assert!(summary.blocked.is_empty());
//! ```

use serde::Serialize;
use timewarp_config::TimewarpConfig;
use timewarp_sync::SyncConfig;
use timewarp_types::{LpId, SimTime};

mod app;
mod checkpoint;
mod error;
pub mod invariant;
mod rng;
mod simulation;
mod transport;

pub use app::{Application, INIT, Outbox, PING, PingPong, PingPongState, Scheduled};
pub use checkpoint::{MemoryCheckpoints, Restored};
pub use error::SimError;
pub use invariant::{
    GroupVoteChecker, InvariantChecker, InvariantResult, MarkUniquenessChecker,
    OutstandingRendezvousChecker, RendezvousMonotonicityChecker,
};
pub use rng::SimRng;
pub use simulation::{BlockedLp, SimStats, SimSummary, Simulation};
pub use transport::SimTransport;

// ============================================================================
// Simulation Configuration
// ============================================================================

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimConfig {
    /// Seed for the deterministic RNG.
    pub seed: u64,
    /// Number of logical processes.
    pub lps: u32,
    /// Events past this time are never executed.
    pub end_time: SimTime,
    /// Maximum number of harness steps.
    pub max_steps: u64,
    /// Application events between periodic snapshots.
    pub checkpoint_period: u32,
    /// Steps between fossil collections (0 disables them).
    pub gvt_period: u64,
    /// Deliver each batch in random order.
    pub shuffle_delivery: bool,
    /// Pick the next LP at random among the runnable ones.
    pub optimistic: bool,
    /// Capabilities of the sync core.
    pub sync: SyncConfig,
    /// Members per statically formed group.
    pub group_size: u32,
    /// Check invariants after every step.
    pub check_invariants: bool,
    /// Keep every sync event for [`Simulation::journal`].
    pub record_journal: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            lps: 4,
            end_time: SimTime::new(50.0),
            max_steps: 100_000,
            checkpoint_period: 4,
            gvt_period: 256,
            shuffle_delivery: true,
            optimistic: true,
            sync: SyncConfig::default(),
            group_size: 2,
            check_invariants: true,
            record_journal: false,
        }
    }
}

impl SimConfig {
    /// Creates a new configuration with the specified seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_lps(mut self, lps: u32) -> Self {
        self.lps = lps;
        self
    }

    pub fn with_end_time(mut self, end_time: f64) -> Self {
        self.end_time = SimTime::new(end_time);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_checkpoint_period(mut self, period: u32) -> Self {
        self.checkpoint_period = period;
        self
    }

    pub fn with_gvt_period(mut self, period: u64) -> Self {
        self.gvt_period = period;
        self
    }

    /// Delivers batches in send order and runs LPs lowest timestamp first.
    pub fn conservative(mut self) -> Self {
        self.shuffle_delivery = false;
        self.optimistic = false;
        self
    }

    /// Enables group synchronization with groups of `size` members.
    pub fn with_groups(mut self, size: u32) -> Self {
        self.sync = self.sync.with_groups();
        self.group_size = size;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn without_invariants(mut self) -> Self {
        self.check_invariants = false;
        self
    }

    pub fn with_journal(mut self) -> Self {
        self.record_journal = true;
        self
    }

    /// Static group layout: consecutive LPs in chunks of `group_size`.
    ///
    /// Empty when groups are off.
    pub fn group_layout(&self) -> Vec<Vec<LpId>> {
        if !(self.sync.groups && self.sync.cross_state) || self.group_size == 0 {
            return Vec::new();
        }
        let ids: Vec<LpId> = (0..self.lps).map(LpId::new).collect();
        ids.chunks(self.group_size as usize)
            .map(<[LpId]>::to_vec)
            .collect()
    }
}

impl From<&TimewarpConfig> for SimConfig {
    fn from(config: &TimewarpConfig) -> Self {
        Self {
            seed: config.simulation.seed,
            lps: config.kernel.lps,
            end_time: SimTime::new(config.simulation.end_time),
            max_steps: config.simulation.max_steps,
            checkpoint_period: config.kernel.checkpoint_period,
            gvt_period: config.kernel.gvt_period,
            shuffle_delivery: config.simulation.shuffle_delivery,
            optimistic: config.simulation.optimistic,
            sync: SyncConfig {
                cross_state: config.sync.cross_state,
                groups: config.sync.groups,
            },
            group_size: config.sync.group_size,
            check_invariants: true,
            record_journal: config.logging.journal.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = SimConfig::default()
            .with_seed(9)
            .with_lps(6)
            .with_end_time(12.5)
            .conservative()
            .with_groups(3);

        assert_eq!(config.seed, 9);
        assert_eq!(config.end_time, SimTime::new(12.5));
        assert!(!config.shuffle_delivery);
        assert!(config.sync.groups);
        assert_eq!(config.group_layout().len(), 2);
    }

    #[test]
    fn uneven_layout_keeps_remainder() {
        let config = SimConfig::default().with_lps(5).with_groups(2);
        let layout = config.group_layout();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[2], vec![LpId::new(4)]);
    }

    #[test]
    fn no_layout_without_groups() {
        assert!(SimConfig::default().group_layout().is_empty());
        let config = SimConfig::default()
            .with_groups(2)
            .with_sync(SyncConfig::disabled().with_groups());
        assert!(config.group_layout().is_empty());
    }

    #[test]
    fn converts_from_file_config() {
        let mut file = TimewarpConfig::default();
        file.kernel.lps = 12;
        file.sync.groups = true;
        file.sync.group_size = 4;
        file.simulation.seed = 77;

        let config = SimConfig::from(&file);
        assert_eq!(config.lps, 12);
        assert_eq!(config.seed, 77);
        assert_eq!(config.group_layout().len(), 3);
        assert!(!config.record_journal);
    }
}
