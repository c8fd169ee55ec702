//! Rendezvous (cross-state) protocol.
//!
//! Lets an initiator LP borrow a peer's state in the middle of an event:
//!
//! ```text
//! Initiator                       Peer
//!     |  START(session)  ------->   |  rendezvous queue += START
//!     |                             |  WaitForUnblock
//!     |  <-------  ACK(session)     |
//! ReadyForSynch                     |
//!     |  (synchronized section)     |
//!     |  UNBLOCK(session) ------->  |  Ready, checkpoint
//! ```
//!
//! If the peer later rolls back past the START it sends a ROLLBACK control
//! antimessage to the initiator (see `rollback.rs`).

use timewarp_types::{LpId, RendezvousMark};

use crate::context::ExecutionContext;
use crate::core::SyncCore;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::group::GroupState;
use crate::instrumentation::METRICS;
use crate::lp::LpState;
use crate::message::{ControlType, Message, MessageKind};

impl SyncCore {
    // ========================================================================
    // Initiator Side
    // ========================================================================

    /// Opens (or extends) a rendezvous session from `lp` to `peer`.
    ///
    /// Must be called while `lp` executes an event: the executing entry is
    /// stamped with the session mark so a later ROLLBACK for the session
    /// finds it. Several peers may join the same session from the same
    /// event; opening a session while another one is pending is a protocol
    /// violation.
    pub fn open_rendezvous(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: LpId,
        peer: LpId,
    ) -> Result<RendezvousMark> {
        if !self.config().cross_state {
            return Err(SyncError::CrossStateDisabled);
        }
        if !self.lps().contains(peer) {
            return Err(SyncError::UnknownLp(peer));
        }
        if peer == lp {
            return Err(SyncError::SelfRendezvous(lp));
        }

        let mut record = self.lp(lp)?;
        let entry = record.queue.current().ok_or(SyncError::NotExecuting(lp))?;
        let now = entry.timestamp;
        let stamp = entry.rendezvous_mark;
        let pending = record.wait_on_rendezvous;

        let extends = pending.is_some()
            && stamp == pending
            && matches!(record.state, LpState::WaitForSynch | LpState::ReadyForSynch);
        if pending.is_some() && !extends {
            tracing::error!(lp = %lp, %peer, %pending, state = %record.state, "rendezvous already in progress");
            return Err(SyncError::RendezvousInProgress {
                lp,
                peer,
                pending,
                state: record.state,
            });
        }
        if extends && record.ecs.contains(peer) {
            return Ok(pending);
        }
        let group = self.group_of_locked(&record)?;

        let session = if extends {
            pending
        } else {
            let session = record.marks.next_rendezvous_mark();
            if let Some(current) = record.queue.current_mut() {
                current.rendezvous_mark = session;
            }
            if let Some(group) = &group
                && group.state() == GroupState::Ready
                && group.window().is_none()
            {
                self.open_window_locked(ctx, &record, session)?;
            }
            session
        };

        record.ecs.push(peer);
        record.wait_on_rendezvous = session;
        record.wait_on_object = Some(peer);
        self.set_state(ctx, &mut record, LpState::WaitForSynch);
        record.session_state = Some(LpState::WaitForSynch);

        let start = Message::control(
            ControlType::Start,
            lp,
            peer,
            now,
            now,
            MessageKind::Positive,
            record.marks.next_mark(),
            session,
        );
        ctx.send(start);

        METRICS.increment_rendezvous_started();
        tracing::debug!(lp = %lp, %peer, %session, time = %now, "rendezvous opened");
        ctx.emit(SyncEvent::RendezvousOpened {
            initiator: lp,
            peer,
            rendezvous_mark: session,
            time: now,
        });
        Ok(session)
    }

    /// Ends the session of `lp`: sends UNBLOCK to every bound peer and
    /// clears the session.
    ///
    /// When `lp` anchors its group's window the group moves on to the
    /// checkpoint round. Returns the number of peers unblocked.
    pub fn unblock_synchronized_objects(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: LpId,
    ) -> Result<usize> {
        let mut record = self.lp(lp)?;
        let session = record.wait_on_rendezvous;
        if session.is_none() || record.ecs.is_empty() {
            return Ok(0);
        }
        let group = self.group_of_locked(&record)?;
        let now = record.lvt();

        let peers = record.ecs.peers().to_vec();
        for &peer in &peers {
            let unblock = Message::control(
                ControlType::Unblock,
                lp,
                peer,
                now,
                now,
                MessageKind::Positive,
                record.marks.next_mark(),
                session,
            );
            ctx.send(unblock);
        }
        record.clear_session();
        self.set_state(ctx, &mut record, LpState::Ready);
        tracing::debug!(lp = %lp, %session, peers = peers.len(), "synchronized objects unblocked");

        if let Some(group) = group
            && group.is_anchor(lp)
            && group.window_session() == session
            && group.in_window(now)
        {
            if group.tot() > 1 {
                group.set_state(ctx, GroupState::WaitForLog);
                self.force_group_checkpoint_locked(ctx, &mut record, &group);
            } else {
                group.close();
                group.set_state(ctx, GroupState::Ready);
            }
        }
        Ok(peers.len())
    }

    // ========================================================================
    // Receive-Time Handlers
    // ========================================================================

    /// ACK at the initiator.
    pub(crate) fn on_ack(&self, ctx: &mut ExecutionContext<'_>, msg: &Message) -> Result<()> {
        let mut lp = self.lp(msg.receiver)?;
        if lp.state == LpState::Rollback {
            tracing::debug!(lp = %lp.id, session = %msg.rendezvous_mark, "ACK ignored while rolling back");
            return Ok(());
        }
        if lp.wait_on_rendezvous.is_none() || lp.wait_on_rendezvous != msg.rendezvous_mark {
            tracing::debug!(
                lp = %lp.id,
                session = %msg.rendezvous_mark,
                waiting = %lp.wait_on_rendezvous,
                "stale ACK ignored"
            );
            return Ok(());
        }
        if !lp.ecs.is_empty() && !lp.ecs.acknowledge(msg.sender) {
            // More peers still owe their ACK.
            return Ok(());
        }

        let group = self.group_of_locked(&lp)?;
        self.set_state(ctx, &mut lp, LpState::ReadyForSynch);
        lp.session_state = Some(LpState::ReadyForSynch);
        METRICS.increment_rendezvous_acked();
        ctx.emit(SyncEvent::RendezvousAcked {
            lp: lp.id,
            peer: msg.sender,
            rendezvous_mark: msg.rendezvous_mark,
        });

        if let Some(group) = group
            && group.is_anchor(lp.id)
            && group.window_session() == msg.rendezvous_mark
            && group.in_window(msg.timestamp)
            && group.state() == GroupState::WaitForUnblock
        {
            group.set_state(ctx, GroupState::ReadyForSynch);
        }
        Ok(())
    }

    /// UNBLOCK at a peer.
    ///
    /// Besides releasing a matching session, every UNBLOCK not ignored for
    /// rollback forces a checkpoint: the initiator may have written this
    /// LP's state, and only a snapshot taken now captures that write.
    pub(crate) fn on_unblock(&self, ctx: &mut ExecutionContext<'_>, msg: &Message) -> Result<()> {
        let mut lp = self.lp(msg.receiver)?;
        if lp.state == LpState::Rollback {
            tracing::debug!(lp = %lp.id, session = %msg.rendezvous_mark, "UNBLOCK ignored while rolling back");
            return Ok(());
        }
        let group = self.group_of_locked(&lp)?;

        let matched = lp.wait_on_rendezvous.is_some() && lp.wait_on_rendezvous == msg.rendezvous_mark;
        if matched {
            lp.wait_on_rendezvous = RendezvousMark::NONE;
            lp.wait_on_object = None;
            lp.session_state = None;
            self.set_state(ctx, &mut lp, LpState::Ready);
            METRICS.increment_rendezvous_unblocked();
            if let Some(group) = &group
                && group.is_anchor(lp.id)
                && group.in_window(msg.timestamp)
            {
                group.set_state(ctx, GroupState::Ready);
            }
        }

        ctx.enter(lp.id, msg.timestamp);
        ctx.force_checkpoint(&lp);
        let logged = ctx.log_state(&lp);
        METRICS.increment_unblock_checkpoints();

        if logged
            && let Some(group) = &group
            && group.is_anchor(lp.id)
            && group.in_window(msg.timestamp)
            && group.tot() > 1
        {
            group.set_state(ctx, GroupState::WaitForLog);
            self.force_group_checkpoint_locked(ctx, &mut lp, group);
        }
        ctx.leave();

        ctx.emit(SyncEvent::Unblocked {
            lp: lp.id,
            rendezvous_mark: msg.rendezvous_mark,
            matched,
            logged,
        });
        Ok(())
    }

    // ========================================================================
    // Process-Time Handlers
    // ========================================================================

    /// START at a peer: block on the session and acknowledge it.
    pub(crate) fn on_start(&self, ctx: &mut ExecutionContext<'_>, msg: &Message) -> Result<()> {
        let mut lp = self.lp(msg.receiver)?;
        if let Some(group) = self.group_of_locked(&lp)?
            && group.in_window(msg.timestamp)
            && group.window_session() == msg.rendezvous_mark
        {
            self.cast_start_vote(ctx, &group, lp.id)?;
        }

        lp.rendezvous_queue.insert(msg.clone());
        lp.wait_on_rendezvous = msg.rendezvous_mark;
        lp.wait_on_object = Some(msg.sender);
        self.set_state(ctx, &mut lp, LpState::WaitForUnblock);
        lp.session_state = Some(LpState::WaitForUnblock);

        let ack = Message::control(
            ControlType::Ack,
            lp.id,
            msg.sender,
            msg.timestamp,
            msg.timestamp,
            MessageKind::Positive,
            lp.marks.next_mark(),
            msg.rendezvous_mark,
        );
        ctx.send(ack);

        tracing::debug!(lp = %lp.id, initiator = %msg.sender, session = %msg.rendezvous_mark, time = %msg.timestamp, "rendezvous started");
        ctx.emit(SyncEvent::RendezvousStarted {
            lp: lp.id,
            initiator: msg.sender,
            rendezvous_mark: msg.rendezvous_mark,
            time: msg.timestamp,
        });
        Ok(())
    }
}
