//! The optimistic scheduler driving the sync core.
//!
//! One [`Simulation::step`] delivers every message in flight, releases
//! LPs whose group finished its round, runs the synchronized section of
//! every initiator whose peers all acknowledged, and executes one event.
//! Stragglers and antimessages roll the receiver back: its state is
//! restored from the latest snapshot inside the executed prefix, later
//! entries are coasted forward silently and messages sent by undone
//! events are cancelled.

use std::collections::HashSet;

use bytes::Bytes;
use serde::Serialize;
use timewarp_sync::instrumentation::{METRICS, MetricsSnapshot};
use timewarp_sync::{
    ControlType, ExecutionContext, FilterDecision, LpState, Message, SyncCore, SyncError,
    SyncEvent, Transport, is_control,
};
use timewarp_types::{GroupId, LpId, Mark, RendezvousMark, SimTime};

use crate::app::{Application, INIT, Outbox};
use crate::checkpoint::MemoryCheckpoints;
use crate::invariant::{
    GroupVoteChecker, InvariantResult, MarkUniquenessChecker, OutstandingRendezvousChecker,
    RendezvousMonotonicityChecker,
};
use crate::rng::SimRng;
use crate::transport::SimTransport;
use crate::{SimConfig, SimError};

// ============================================================================
// Statistics
// ============================================================================

/// Counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    /// Application events executed, re-executions included.
    pub events_executed: u64,
    /// Control messages executed.
    pub controls_executed: u64,
    /// Messages taken off the transport.
    pub delivered: u64,
    /// Control messages consumed at receive time.
    pub consumed: u64,
    pub stragglers: u64,
    pub rollbacks: u64,
    /// Events re-executed silently after a restore.
    pub coasted: u64,
    pub antimessages_sent: u64,
    /// Positive/negative pairs cancelled.
    pub annihilated: u64,
    pub synchronized_sections: u64,
    /// Input-queue entries reclaimed below GVT.
    pub fossils_collected: u64,
    /// Diagnostics reported by the core.
    pub diagnostics: u64,
}

/// An LP left blocked when the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedLp {
    pub lp: LpId,
    pub state: String,
    pub rendezvous_mark: RendezvousMark,
}

/// Result of [`Simulation::run`].
#[derive(Debug, Clone, Serialize)]
pub struct SimSummary {
    pub seed: u64,
    pub steps: u64,
    /// True if nothing was left to deliver or execute.
    pub quiescent: bool,
    pub gvt: SimTime,
    pub lvts: Vec<SimTime>,
    pub stats: SimStats,
    pub snapshots_taken: u64,
    pub forced_checkpoints: u64,
    pub blocked: Vec<BlockedLp>,
    /// Process-wide sync core counters at the end of the run.
    pub metrics: MetricsSnapshot,
}

// ============================================================================
// Simulation
// ============================================================================

/// A message an event sent, kept until GVT passes the event.
#[derive(Debug, Clone)]
struct Output {
    origin: Mark,
    message: Message,
}

#[derive(Debug, Default)]
struct Checkers {
    marks: MarkUniquenessChecker,
    monotonicity: RendezvousMonotonicityChecker,
    outstanding: OutstandingRendezvousChecker,
    groups: GroupVoteChecker,
}

/// A deterministic Time Warp run of `A` over a [`SyncCore`].
pub struct Simulation<A: Application> {
    config: SimConfig,
    core: SyncCore,
    app: A,
    transport: SimTransport,
    checkpoints: MemoryCheckpoints<A::State>,
    rng: SimRng,
    outputs: Vec<Vec<Output>>,
    /// Antimessages that arrived before their positive message.
    pending_antis: HashSet<(LpId, Mark)>,
    groups: Vec<GroupId>,
    groups_closed: bool,
    journal: Vec<SyncEvent>,
    checkers: Checkers,
    stats: SimStats,
    step: u64,
    gvt: SimTime,
}

impl<A: Application> Simulation<A> {
    /// Builds the LPs, forms the static groups and queues each LP's
    /// [`INIT`] event at time zero.
    pub fn new(config: SimConfig, app: A) -> Result<Self, SimError> {
        if config.lps == 0 {
            return Err(SimError::Config("at least one LP is required".to_string()));
        }
        let end = config.end_time.as_f64();
        if !end.is_finite() || end <= 0.0 {
            return Err(SimError::Config(format!(
                "end time must be positive and finite, got {}",
                config.end_time
            )));
        }

        let core = SyncCore::new(config.lps, config.sync);
        let mut groups = Vec::new();
        if core.config().groups {
            for members in config.group_layout() {
                groups.push(core.form_group(&members)?);
            }
        }

        let initial: Vec<A::State> = core.lps().ids().map(|lp| app.init(lp)).collect();
        for lp in core.lps().ids() {
            let mut record = core.lp(lp)?;
            let mark = record.marks.next_mark();
            record.queue.insert(Message::event(
                lp,
                lp,
                INIT,
                SimTime::ZERO,
                SimTime::ZERO,
                mark,
                Bytes::new(),
            ));
        }

        tracing::info!(
            seed = config.seed,
            lps = config.lps,
            groups = groups.len(),
            end_time = %config.end_time,
            "simulation created"
        );

        Ok(Self {
            checkpoints: MemoryCheckpoints::new(initial, config.checkpoint_period),
            rng: SimRng::new(config.seed),
            outputs: vec![Vec::new(); config.lps as usize],
            pending_antis: HashSet::new(),
            groups,
            groups_closed: false,
            journal: Vec::new(),
            checkers: Checkers::default(),
            stats: SimStats::default(),
            step: 0,
            gvt: SimTime::ZERO,
            transport: SimTransport::new(),
            config,
            core,
            app,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn core(&self) -> &SyncCore {
        &self.core
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    /// Live application state of every LP.
    pub fn states(&self) -> &[A::State] {
        self.checkpoints.states()
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Sync events recorded so far (empty unless the journal is enabled).
    pub fn journal(&self) -> &[SyncEvent] {
        &self.journal
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    pub fn transport(&self) -> &SimTransport {
        &self.transport
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn gvt(&self) -> SimTime {
        self.gvt
    }

    /// Runs until nothing is left to do or `max_steps` is reached.
    ///
    /// Once the run first goes quiet every group is closed with a final
    /// CLOSE_GROUP round, and the run continues until that settles too.
    pub fn run(&mut self) -> Result<SimSummary, SimError> {
        while self.step < self.config.max_steps {
            if self.step()? {
                continue;
            }
            if !self.groups_closed && !self.groups.is_empty() {
                self.close_groups()?;
                continue;
            }
            break;
        }
        self.collect_fossils()?;
        self.summary()
    }

    /// Performs one harness step. Returns false if nothing happened.
    pub fn step(&mut self) -> Result<bool, SimError> {
        self.step += 1;
        let mut progress = false;

        let rng = self.config.shuffle_delivery.then_some(&mut self.rng);
        let batch = self.transport.take_batch(rng);
        for msg in batch {
            progress = true;
            if self.config.check_invariants {
                let result = self.checkers.marks.observe(&msg);
                self.enforce(result)?;
            }
            self.deliver(msg)?;
        }

        for lp in self.core.lps().ids() {
            if self.with_ctx(|core, ctx| core.resume_if_released(ctx, lp))? {
                progress = true;
            }
        }

        let ready: Vec<LpId> = self
            .core
            .lps()
            .ids()
            .filter(|&lp| {
                self.core
                    .lp(lp)
                    .is_ok_and(|record| record.state == LpState::ReadyForSynch)
            })
            .collect();
        for lp in ready {
            if self.core.is_synchronized(lp)? {
                self.synchronized_section(lp)?;
                progress = true;
            }
        }

        if let Some(lp) = self.next_lp()? {
            self.execute(lp)?;
            progress = true;
        }

        if self.config.gvt_period > 0 && self.step % self.config.gvt_period == 0 {
            self.collect_fossils()?;
        }
        if self.config.check_invariants {
            self.check_invariants()?;
        }
        Ok(progress)
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    fn deliver(&mut self, msg: Message) -> Result<(), SimError> {
        self.stats.delivered += 1;
        let receiver = msg.receiver;

        if msg.is_positive() {
            let decision = self.with_ctx(|core, ctx| core.receive_filter(ctx, &msg))?;
            if decision == FilterDecision::Consume {
                self.stats.consumed += 1;
            } else if self.pending_antis.remove(&(receiver, msg.mark)) {
                self.stats.annihilated += 1;
                tracing::trace!(lp = %receiver, mark = %msg.mark, "annihilated on arrival");
            } else {
                let timestamp = msg.timestamp;
                let mut record = self.core.lp(receiver)?;
                if record.queue.insert(msg).straggler {
                    self.stats.stragglers += 1;
                    tracing::debug!(lp = %receiver, %timestamp, lvt = %record.lvt(), "straggler");
                    record.queue.rewind_before(timestamp);
                    record.transition(LpState::Rollback);
                }
            }
        } else {
            let ordinary = self.with_ctx(|core, ctx| core.handle_rollback_antimessage(ctx, &msg))?;
            if ordinary {
                self.annihilate(&msg)?;
            }
        }

        self.settle(receiver)
    }

    fn annihilate(&mut self, anti: &Message) -> Result<(), SimError> {
        let mut record = self.core.lp(anti.receiver)?;
        let Some(removal) = record.queue.remove_by_mark(anti.mark) else {
            drop(record);
            self.pending_antis.insert((anti.receiver, anti.mark));
            return Ok(());
        };
        self.stats.annihilated += 1;
        if removal.executed {
            record.queue.rewind_before(removal.msg.timestamp);
            record.transition(LpState::Rollback);
        }
        Ok(())
    }

    fn settle(&mut self, lp: LpId) -> Result<(), SimError> {
        let rolling_back = self.core.lp(lp)?.state == LpState::Rollback;
        if rolling_back {
            self.rollback(lp)?;
        }
        Ok(())
    }

    // ========================================================================
    // Rollback
    // ========================================================================

    fn rollback(&mut self, lp: LpId) -> Result<(), SimError> {
        self.stats.rollbacks += 1;
        let index = lp.as_usize();
        let target = self.core.lp(lp)?.lvt();

        let undone = self.with_ctx(|core, ctx| core.rollback_rendezvous(ctx, lp, target))?;
        if self.config.check_invariants {
            let result = {
                let record = self.core.lp(lp)?;
                self.checkers.monotonicity.check_after_rollback(&record, target)
            };
            self.enforce(result)?;
        }

        let executed: Vec<Message> = self.core.lp(lp)?.queue.executed().to_vec();
        let restored = self.checkpoints.restore(index, &executed);
        for entry in executed.get(restored.coast_from..).unwrap_or_default() {
            if !self.core.is_reexecutable(entry) {
                continue;
            }
            let mut silent = Outbox::new(lp, entry.timestamp);
            if let Some(state) = self.checkpoints.state_mut(index) {
                self.app.process_event(
                    lp,
                    entry.timestamp,
                    entry.event_type,
                    &entry.payload,
                    state,
                    &mut silent,
                );
            }
            self.stats.coasted += 1;
        }

        let live: HashSet<Mark> = executed.iter().map(|entry| entry.mark).collect();
        let outputs = std::mem::take(&mut self.outputs[index]);
        let (kept, cancelled): (Vec<Output>, Vec<Output>) = outputs
            .into_iter()
            .partition(|output| live.contains(&output.origin));
        self.outputs[index] = kept;
        for output in cancelled {
            self.transport.send(output.message.antimessage());
            self.stats.antimessages_sent += 1;
        }

        if let Some(group) = self.core.group_of(lp)?
            && group.is_anchor(lp)
            && group.window_reached_by(target)
            && let Some(window) = group.window()
            && !live.contains(&window.mark)
        {
            self.with_ctx(|core, ctx| core.rollback_group(ctx, lp, window.time))?;
        }

        self.with_ctx(|core, ctx| core.complete_rollback(ctx, lp))?;
        self.core.publish_lvt(lp)?;
        tracing::debug!(
            lp = %lp,
            lvt = %target,
            rendezvous_undone = undone,
            coast_from = restored.coast_from,
            "rollback complete"
        );
        Ok(())
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Picks the next LP to run: any `Ready` LP with an event due before
    /// the end time, at random when optimistic, lowest timestamp first
    /// otherwise.
    fn next_lp(&mut self) -> Result<Option<LpId>, SimError> {
        let mut candidates: Vec<(SimTime, LpId)> = Vec::new();
        for lp in self.core.lps().ids() {
            let record = self.core.lp(lp)?;
            if record.state != LpState::Ready {
                continue;
            }
            if let Some(next) = record.queue.next_to_execute()
                && next.timestamp <= self.config.end_time
            {
                candidates.push((next.timestamp, lp));
            }
        }
        if candidates.is_empty() {
            return Ok(None);
        }
        if self.config.optimistic {
            let pick = self.rng.next_usize(candidates.len());
            return Ok(candidates.get(pick).map(|&(_, lp)| lp));
        }
        Ok(candidates.into_iter().min().map(|(_, lp)| lp))
    }

    fn execute(&mut self, lp: LpId) -> Result<(), SimError> {
        let msg = {
            let mut record = self.core.lp(lp)?;
            if record.queue.advance().is_none() {
                return Ok(());
            }
            record.queue.current().cloned()
        };
        let Some(msg) = msg else {
            return Ok(());
        };
        let now = msg.timestamp;

        let decision = self.with_ctx(|core, ctx| {
            ctx.enter(lp, now);
            let decision = core.execute_filter(ctx, &msg);
            ctx.leave();
            decision
        })?;

        if decision == FilterDecision::Passthrough {
            self.stats.events_executed += 1;
            let sent_before = self.transport.len();
            let mut out = Outbox::new(lp, now);
            if let Some(state) = self.checkpoints.state_mut(lp.as_usize()) {
                self.app
                    .process_event(lp, now, msg.event_type, &msg.payload, state, &mut out);
            }
            self.apply_outbox(lp, now, &out)?;

            let outputs: Vec<Output> = self
                .transport
                .sent_since(sent_before, lp)
                .filter(|sent| {
                    sent.is_positive()
                        && (!sent.is_control() || sent.control_type() == Some(ControlType::Start))
                })
                .map(|sent| Output {
                    origin: msg.mark,
                    message: sent.clone(),
                })
                .collect();
            self.outputs[lp.as_usize()].extend(outputs);

            let initial = msg.event_type == INIT;
            self.with_ctx(|core, ctx| {
                let record = core.lp(lp)?;
                if initial {
                    ctx.force_checkpoint(&record);
                } else {
                    ctx.log_state(&record);
                }
                Ok(())
            })?;
        } else {
            self.stats.controls_executed += 1;
        }

        self.core.publish_lvt(lp)?;
        Ok(())
    }

    /// Turns what the application asked for into messages and sessions.
    fn apply_outbox(&mut self, lp: LpId, now: SimTime, out: &Outbox) -> Result<(), SimError> {
        for event in out.events() {
            if is_control(event.event_type) {
                return Err(SimError::ReservedEventType(event.event_type));
            }
            if event.timestamp < now {
                return Err(SimError::Causality {
                    lp,
                    now,
                    timestamp: event.timestamp,
                });
            }
            if !self.core.lps().contains(event.receiver) {
                return Err(SyncError::UnknownLp(event.receiver).into());
            }
        }

        let messages: Vec<Message> = {
            let mut record = self.core.lp(lp)?;
            out.events()
                .iter()
                .map(|event| {
                    Message::event(
                        lp,
                        event.receiver,
                        event.event_type,
                        event.timestamp,
                        now,
                        record.marks.next_mark(),
                        event.payload.clone(),
                    )
                })
                .collect()
        };

        let cross_state = self.core.config().cross_state;
        let grouped = self.core.group_of(lp)?.is_some();
        if !cross_state && !out.rendezvous().is_empty() {
            tracing::trace!(lp = %lp, "rendezvous requests ignored, cross-state disabled");
        }
        self.with_ctx(|core, ctx| {
            for message in messages {
                ctx.send(message);
            }
            if cross_state {
                for &peer in out.rendezvous() {
                    core.open_rendezvous(ctx, lp, peer)?;
                }
            }
            ctx.enter(lp, now);
            let grouped_result = if grouped && out.wants_synchronize() {
                core.synchronize(ctx, lp).map(|_| ())
            } else {
                Ok(())
            };
            let closed = grouped_result.and_then(|()| {
                if grouped && out.wants_close_group() {
                    core.close_group(ctx, lp)
                } else {
                    Ok(())
                }
            });
            ctx.leave();
            closed
        })
    }

    /// Lets the application touch the states of `lp` and its bound peers,
    /// then checkpoints `lp` and releases the peers.
    fn synchronized_section(&mut self, lp: LpId) -> Result<(), SimError> {
        let (session, peers, now) = {
            let record = self.core.lp(lp)?;
            (record.wait_on_rendezvous, record.ecs.peers().to_vec(), record.lvt())
        };
        for peer in peers {
            if self.core.lp(peer)?.wait_on_rendezvous != session {
                tracing::debug!(lp = %lp, %peer, %session, "peer left the session, skipped");
                continue;
            }
            if let Some((own, other)) = self.checkpoints.pair_mut(lp.as_usize(), peer.as_usize()) {
                self.app.on_synchronized(lp, now, own, peer, other);
            }
        }

        let released = self.with_ctx(|core, ctx| {
            ctx.enter(lp, now);
            {
                let record = core.lp(lp)?;
                ctx.force_checkpoint(&record);
            }
            let released = core.unblock_synchronized_objects(ctx, lp);
            ctx.leave();
            released
        })?;
        self.stats.synchronized_sections += 1;
        tracing::debug!(lp = %lp, %session, released, time = %now, "synchronized section done");
        Ok(())
    }

    /// Sends CLOSE_GROUP for every group at the end time.
    fn close_groups(&mut self) -> Result<(), SimError> {
        self.groups_closed = true;
        let Some(table) = self.core.groups() else {
            return Ok(());
        };
        let anchors: Vec<LpId> = table
            .all()
            .iter()
            .filter_map(|group| group.members().iter().min().copied())
            .collect();
        let end = self.config.end_time;
        for lp in anchors {
            self.with_ctx(|core, ctx| {
                ctx.enter(lp, end);
                let closed = core.close_group(ctx, lp);
                ctx.leave();
                closed
            })?;
        }
        tracing::info!(groups = self.groups.len(), "groups closed");
        Ok(())
    }

    // ========================================================================
    // Fossil Collection
    // ========================================================================

    /// Lower bound on the timestamp of anything that can still happen.
    fn compute_gvt(&self) -> Result<SimTime, SimError> {
        let mut gvt = self.transport.min_timestamp().unwrap_or(SimTime::INFINITY);
        for lp in self.core.lps().ids() {
            let record = self.core.lp(lp)?;
            if let Some(next) = record.queue.next_to_execute() {
                gvt = gvt.min(next.timestamp);
            }
            if record.state.is_blocked() || record.state == LpState::ReadyForSynch {
                gvt = gvt.min(record.lvt());
            }
        }
        Ok(gvt)
    }

    fn collect_fossils(&mut self) -> Result<(), SimError> {
        let gvt = self.compute_gvt()?;
        self.gvt = gvt;
        for lp in self.core.lps().ids() {
            let index = lp.as_usize();
            let mut record = self.core.lp(lp)?;
            // Nothing below GVT is ever rolled back, so committed STARTs go.
            let starts = record.rendezvous_queue.prune_before(gvt);
            self.stats.fossils_collected += starts as u64;

            let horizon = record
                .queue
                .executed()
                .iter()
                .rev()
                .find(|entry| entry.timestamp < gvt && self.checkpoints.has_snapshot(index, entry.mark))
                .map(|entry| entry.timestamp);
            let Some(horizon) = horizon else {
                continue;
            };
            let reclaimed = record.queue.prune_before(horizon);
            if reclaimed == 0 {
                continue;
            }
            let marks: HashSet<Mark> = record.queue.iter().map(|entry| entry.mark).collect();
            drop(record);

            self.checkpoints.retain(index, &marks);
            self.outputs[index].retain(|output| marks.contains(&output.origin));
            self.stats.fossils_collected += reclaimed as u64;
        }
        tracing::trace!(%gvt, step = self.step, "fossils collected");
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Runs `f` with a fresh execution context and files its journal.
    fn with_ctx<R>(
        &mut self,
        f: impl FnOnce(&SyncCore, &mut ExecutionContext<'_>) -> Result<R, SyncError>,
    ) -> Result<R, SimError> {
        let mut ctx = ExecutionContext::new(&mut self.transport, &mut self.checkpoints);
        let result = f(&self.core, &mut ctx);
        let events = ctx.take_journal();
        drop(ctx);

        for event in events {
            if event.is_diagnostic() {
                self.stats.diagnostics += 1;
            }
            if self.config.record_journal {
                self.journal.push(event);
            }
        }
        Ok(result?)
    }

    fn enforce(&self, result: InvariantResult) -> Result<(), SimError> {
        match result.into_error(self.step) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_invariants(&mut self) -> Result<(), SimError> {
        for lp in self.core.lps().ids() {
            let result = {
                let record = self.core.lp(lp)?;
                self.checkers.outstanding.check(&record)
            };
            self.enforce(result)?;
        }
        if let Some(table) = self.core.groups() {
            for group in table.all() {
                let result = self.checkers.groups.check(&group);
                self.enforce(result)?;
            }
        }
        Ok(())
    }

    fn summary(&self) -> Result<SimSummary, SimError> {
        let mut lvts = Vec::with_capacity(self.core.lps().len());
        let mut blocked = Vec::new();
        let mut pending = false;
        for lp in self.core.lps().ids() {
            let record = self.core.lp(lp)?;
            lvts.push(record.lvt());
            if record.state != LpState::Ready {
                blocked.push(BlockedLp {
                    lp,
                    state: record.state.to_string(),
                    rendezvous_mark: record.wait_on_rendezvous,
                });
            }
            pending |= record
                .queue
                .next_to_execute()
                .is_some_and(|next| next.timestamp <= self.config.end_time);
        }

        let summary = SimSummary {
            seed: self.config.seed,
            steps: self.step,
            quiescent: !pending && self.transport.is_empty(),
            gvt: self.gvt,
            lvts,
            stats: self.stats,
            snapshots_taken: self.checkpoints.taken(),
            forced_checkpoints: self.checkpoints.forced(),
            blocked,
            metrics: METRICS.snapshot(),
        };
        tracing::info!(
            seed = summary.seed,
            steps = summary.steps,
            events = summary.stats.events_executed,
            rollbacks = summary.stats.rollbacks,
            blocked = summary.blocked.len(),
            "simulation finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{PingPong, PingPongState};

    fn config(seed: u64) -> SimConfig {
        SimConfig::default()
            .with_seed(seed)
            .with_lps(4)
            .with_end_time(15.0)
            .with_max_steps(50_000)
    }

    #[test]
    fn rejects_empty_kernel() {
        let result = Simulation::new(config(0).with_lps(0), PingPong::new(0, 0));
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn init_is_queued_for_every_lp() {
        let sim = Simulation::new(config(0), PingPong::new(4, 3)).expect("sim");
        for lp in sim.core().lps().ids() {
            let record = sim.core().lp(lp).expect("lp");
            assert_eq!(record.queue.len(), 1);
            assert_eq!(record.queue.next_to_execute().map(|m| m.event_type), Some(INIT));
        }
    }

    #[test]
    fn conservative_run_without_rendezvous_never_rolls_back() {
        let mut sim =
            Simulation::new(config(1).conservative(), PingPong::new(4, 0)).expect("sim");
        let summary = sim.run().expect("run");

        assert!(summary.quiescent);
        assert!(summary.blocked.is_empty());
        assert_eq!(summary.stats.rollbacks, 0);
        assert_eq!(summary.stats.synchronized_sections, 0);
        assert!(summary.stats.events_executed > 4);
    }

    #[test]
    fn rendezvous_run_finishes_unblocked() {
        let mut sim = Simulation::new(config(2), PingPong::new(4, 2)).expect("sim");
        let summary = sim.run().expect("run");

        assert!(summary.quiescent, "{summary:?}");
        assert!(summary.blocked.is_empty(), "{:?}", summary.blocked);
        let borrowed: u64 = sim.states().iter().map(|s: &PingPongState| s.rendezvous).sum();
        assert!(borrowed > 0);
    }

    fn token(at: f64) -> Message {
        Message::event(
            LpId::new(1),
            LpId::new(0),
            crate::PING,
            SimTime::new(at),
            SimTime::new(1.0),
            Mark::compose(LpId::new(1), 500),
            Bytes::from(0u64.to_le_bytes().to_vec()),
        )
    }

    fn pair_sim() -> Simulation<PingPong> {
        Simulation::new(config(0).with_lps(2).conservative(), PingPong::new(2, 0)).expect("sim")
    }

    fn queued_marks(sim: &Simulation<PingPong>, lp: LpId) -> Vec<Mark> {
        let record = sim.core().lp(lp).expect("lp");
        record.queue.iter().map(|entry| entry.mark).collect()
    }

    #[test]
    fn early_antimessage_cancels_its_positive_on_arrival() {
        let mut sim = pair_sim();
        let positive = token(5.0);

        sim.deliver(positive.antimessage()).expect("anti");
        assert_eq!(sim.stats().annihilated, 0);
        assert!(sim.pending_antis.contains(&(LpId::new(0), positive.mark)));

        sim.deliver(positive.clone()).expect("positive");
        assert_eq!(sim.stats().annihilated, 1);
        assert!(sim.pending_antis.is_empty());
        assert!(!queued_marks(&sim, LpId::new(0)).contains(&positive.mark));
        assert_eq!(sim.stats().rollbacks, 0);
    }

    #[test]
    fn antimessage_for_pending_positive_removes_it_without_rollback() {
        let mut sim = pair_sim();
        let positive = token(5.0);

        sim.deliver(positive.clone()).expect("positive");
        assert!(queued_marks(&sim, LpId::new(0)).contains(&positive.mark));

        sim.deliver(positive.antimessage()).expect("anti");
        assert_eq!(queued_marks(&sim, LpId::new(0)).len(), 1);
        assert!(!queued_marks(&sim, LpId::new(0)).contains(&positive.mark));
        assert_eq!(sim.stats().annihilated, 1);
        assert_eq!(sim.stats().rollbacks, 0);
        assert!(sim.pending_antis.is_empty());
    }

    #[test]
    fn antimessage_for_executed_positive_rolls_back() {
        let mut sim = pair_sim();
        let positive = token(0.5);
        sim.deliver(positive.clone()).expect("positive");
        sim.execute(LpId::new(0)).expect("init");
        sim.execute(LpId::new(0)).expect("token");
        assert_eq!(sim.core().lp(LpId::new(0)).expect("lp").lvt(), SimTime::new(0.5));

        sim.deliver(positive.antimessage()).expect("anti");
        assert_eq!(sim.stats().annihilated, 1);
        assert_eq!(sim.stats().rollbacks, 1);
        let record = sim.core().lp(LpId::new(0)).expect("lp");
        assert_eq!(record.lvt(), SimTime::ZERO);
        assert_eq!(record.state, LpState::Ready);
        assert_eq!(sim.states()[0].events, 0);
    }

    #[test]
    fn unknown_receiver_is_fatal() {
        #[derive(Debug)]
        struct Stray;
        impl Application for Stray {
            type State = ();
            fn init(&self, _lp: LpId) {}
            fn process_event(
                &self,
                _lp: LpId,
                now: SimTime,
                _event_type: timewarp_types::EventType,
                _payload: &[u8],
                _state: &mut (),
                out: &mut Outbox,
            ) {
                out.schedule(LpId::new(99), now + 1.0, crate::PING, Vec::new());
            }
        }

        let mut sim = Simulation::new(config(0).with_lps(1), Stray).expect("sim");
        let error = sim.run().expect_err("stray receiver");
        assert!(matches!(error, SimError::Sync(SyncError::UnknownLp(_))));
    }
}
