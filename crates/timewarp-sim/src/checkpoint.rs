//! In-memory state saving.
//!
//! Holds the live application state of every LP and a log of snapshots.
//! A snapshot is keyed by the mark of the input-queue entry that was the
//! LP's bound when it was taken, so it stays valid when entries before it
//! are inserted or pruned.

use std::collections::HashSet;

use timewarp_sync::{CheckpointStore, LogicalProcess, Message};
use timewarp_types::{Mark, SimTime};

#[derive(Debug, Clone)]
struct Snapshot<S> {
    mark: Mark,
    time: SimTime,
    state: S,
}

/// Where a restore left the LP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restored {
    /// First executed entry that must be coasted forward.
    pub coast_from: usize,
    /// Timestamp of the snapshot used, `None` for the initial state.
    pub time: Option<SimTime>,
}

#[derive(Debug)]
pub struct MemoryCheckpoints<S> {
    live: Vec<S>,
    initial: Vec<S>,
    log: Vec<Vec<Snapshot<S>>>,
    since_last: Vec<u32>,
    period: u32,
    taken: u64,
    forced: u64,
}

impl<S: Clone> MemoryCheckpoints<S> {
    /// `period` is the number of `log_state` calls between snapshots.
    pub fn new(initial: Vec<S>, period: u32) -> Self {
        let n = initial.len();
        Self {
            live: initial.clone(),
            initial,
            log: vec![Vec::new(); n],
            since_last: vec![0; n],
            period: period.max(1),
            taken: 0,
            forced: 0,
        }
    }

    pub fn state(&self, lp: usize) -> Option<&S> {
        self.live.get(lp)
    }

    pub fn state_mut(&mut self, lp: usize) -> Option<&mut S> {
        self.live.get_mut(lp)
    }

    /// Mutable access to two distinct LPs' states.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut S, &mut S)> {
        if a == b || a >= self.live.len() || b >= self.live.len() {
            return None;
        }
        if a < b {
            let (left, right) = self.live.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.live.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }

    pub fn states(&self) -> &[S] {
        &self.live
    }

    /// Snapshots held for `lp`.
    pub fn len(&self, lp: usize) -> usize {
        self.log.get(lp).map_or(0, Vec::len)
    }

    pub fn has_snapshot(&self, lp: usize, mark: Mark) -> bool {
        self.log
            .get(lp)
            .is_some_and(|log| log.iter().any(|snapshot| snapshot.mark == mark))
    }

    pub fn taken(&self) -> u64 {
        self.taken
    }

    pub fn forced(&self) -> u64 {
        self.forced
    }

    /// Restores the live state of `lp` from the latest snapshot inside the
    /// executed prefix, dropping snapshots of entries no longer executed.
    pub fn restore(&mut self, lp: usize, executed: &[Message]) -> Restored {
        let live_marks: HashSet<Mark> = executed.iter().map(|entry| entry.mark).collect();
        let Some(log) = self.log.get_mut(lp) else {
            return Restored {
                coast_from: 0,
                time: None,
            };
        };
        log.retain(|snapshot| live_marks.contains(&snapshot.mark));

        let found = executed.iter().enumerate().rev().find_map(|(index, entry)| {
            log.iter()
                .find(|snapshot| snapshot.mark == entry.mark)
                .map(|snapshot| (index, snapshot))
        });

        match found {
            Some((index, snapshot)) => {
                self.live[lp] = snapshot.state.clone();
                self.since_last[lp] = 0;
                Restored {
                    coast_from: index + 1,
                    time: Some(snapshot.time),
                }
            }
            None => {
                self.live[lp] = self.initial[lp].clone();
                self.since_last[lp] = 0;
                Restored {
                    coast_from: 0,
                    time: None,
                }
            }
        }
    }

    /// Drops snapshots whose entries are no longer in the queue.
    pub fn retain(&mut self, lp: usize, marks: &HashSet<Mark>) {
        if let Some(log) = self.log.get_mut(lp) {
            log.retain(|snapshot| marks.contains(&snapshot.mark));
        }
    }

    fn save(&mut self, lp: &LogicalProcess) -> bool {
        let index = lp.id.as_usize();
        let Some(entry) = lp.queue.current() else {
            tracing::debug!(lp = %lp.id, "nothing executed yet, snapshot skipped");
            return false;
        };
        let (mark, time) = (entry.mark, entry.timestamp);
        let (Some(log), Some(state)) = (self.log.get_mut(index), self.live.get(index)) else {
            return false;
        };

        log.retain(|snapshot| snapshot.mark != mark);
        log.push(Snapshot {
            mark,
            time,
            state: state.clone(),
        });
        self.since_last[index] = 0;
        self.taken += 1;
        true
    }
}

impl<S: Clone> CheckpointStore for MemoryCheckpoints<S> {
    fn force_checkpoint(&mut self, lp: &LogicalProcess) {
        if self.save(lp) {
            self.forced += 1;
        }
    }

    fn log_state(&mut self, lp: &LogicalProcess) -> bool {
        let index = lp.id.as_usize();
        let Some(count) = self.since_last.get_mut(index) else {
            return false;
        };
        *count += 1;
        if *count < self.period {
            return false;
        }
        self.save(lp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use timewarp_types::{EventType, LpId};

    fn executed_lp(times: &[f64]) -> LogicalProcess {
        let mut lp = LogicalProcess::new(LpId::new(0));
        for &ts in times {
            let mark = lp.marks.next_mark();
            lp.queue.insert(Message::event(
                lp.id,
                lp.id,
                EventType::new(1),
                SimTime::new(ts),
                SimTime::ZERO,
                mark,
                Bytes::new(),
            ));
            lp.queue.advance();
        }
        lp
    }

    #[test]
    fn log_state_respects_period() {
        let lp = executed_lp(&[1.0]);
        let mut store = MemoryCheckpoints::new(vec![0u32], 3);

        assert!(!store.log_state(&lp));
        assert!(!store.log_state(&lp));
        assert!(store.log_state(&lp));
        assert!(!store.log_state(&lp));
        assert_eq!(store.taken(), 1);
    }

    #[test]
    fn forced_checkpoint_replaces_same_entry() {
        let lp = executed_lp(&[1.0]);
        let mut store = MemoryCheckpoints::new(vec![0u32], 1);

        store.force_checkpoint(&lp);
        *store.state_mut(0).expect("state") = 9;
        store.force_checkpoint(&lp);

        assert_eq!(store.len(0), 1);
        assert_eq!(store.forced(), 2);
        let restored = store.restore(0, lp.queue.executed());
        assert_eq!(restored.coast_from, 1);
        assert_eq!(store.state(0), Some(&9));
    }

    #[test]
    fn restore_uses_latest_live_snapshot() {
        let mut lp = executed_lp(&[1.0, 2.0]);
        let mut store = MemoryCheckpoints::new(vec![0u32], 1);

        lp.queue.set_bound(Some(0));
        *store.state_mut(0).expect("state") = 10;
        store.force_checkpoint(&lp);
        lp.queue.set_bound(Some(1));
        *store.state_mut(0).expect("state") = 20;
        store.force_checkpoint(&lp);
        *store.state_mut(0).expect("state") = 30;

        // Entry at 2.0 rolled back: its snapshot is discarded.
        lp.queue.rewind_before(SimTime::new(2.0));
        let restored = store.restore(0, lp.queue.executed());

        assert_eq!(restored.coast_from, 1);
        assert_eq!(restored.time, Some(SimTime::new(1.0)));
        assert_eq!(store.state(0), Some(&10));
        assert_eq!(store.len(0), 1);
    }

    #[test]
    fn restore_without_snapshot_falls_back_to_initial() {
        let lp = executed_lp(&[1.0, 2.0]);
        let mut store = MemoryCheckpoints::new(vec![5u32], 1);
        *store.state_mut(0).expect("state") = 99;

        let restored = store.restore(0, lp.queue.executed());
        assert_eq!(restored.coast_from, 0);
        assert_eq!(restored.time, None);
        assert_eq!(store.state(0), Some(&5));
    }

    #[test]
    fn pair_mut_rejects_aliasing() {
        let mut store = MemoryCheckpoints::new(vec![1u32, 2, 3], 1);
        assert!(store.pair_mut(1, 1).is_none());
        assert!(store.pair_mut(0, 3).is_none());

        let (a, b) = store.pair_mut(2, 0).expect("distinct");
        assert_eq!((*a, *b), (3, 1));
        *a = 30;
        assert_eq!(store.state(2), Some(&30));
    }
}
