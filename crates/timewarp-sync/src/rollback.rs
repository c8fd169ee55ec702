//! Rendezvous rollback and control antimessages.
//!
//! When an LP's time moves backward, every rendezvous it joined in the
//! undone future must be undone at the initiator too. The LP sends one
//! ROLLBACK control antimessage (kind [`MessageKind::Other`]) per START it
//! pops from its rendezvous queue; the initiator finds the input-queue
//! entry stamped with that session and rolls back to it.

use timewarp_types::{LpId, RendezvousMark, SimTime};

use crate::context::ExecutionContext;
use crate::core::SyncCore;
use crate::error::Result;
use crate::events::SyncEvent;
use crate::instrumentation::METRICS;
use crate::lp::LpState;
use crate::message::{ControlType, Message, MessageKind};

impl SyncCore {
    /// Undoes every rendezvous `lp` joined after `time`.
    ///
    /// Pops rendezvous-queue entries newer than `time` (most recent first)
    /// and sends a ROLLBACK control antimessage to each entry's initiator.
    /// Session stamps on input-queue entries past the bound are cleared,
    /// since re-execution opens fresh sessions. Returns the number of
    /// sessions undone.
    pub fn rollback_rendezvous(
        &self,
        ctx: &mut ExecutionContext<'_>,
        lp: LpId,
        time: SimTime,
    ) -> Result<usize> {
        let mut record = self.lp(lp)?;
        let mut undone = 0;

        while let Some(entry) = record.rendezvous_queue.pop_after(time) {
            let anti = Message::control(
                ControlType::Rollback,
                lp,
                entry.sender,
                entry.timestamp,
                entry.send_time,
                MessageKind::Other,
                record.marks.next_mark(),
                entry.rendezvous_mark,
            );
            ctx.send(anti);
            METRICS.increment_control_antimessages_sent();
            tracing::debug!(
                lp = %lp,
                to = %entry.sender,
                session = %entry.rendezvous_mark,
                time = %entry.timestamp,
                rollback_to = %time,
                "rendezvous undone"
            );
            ctx.emit(SyncEvent::ControlRollbackSent {
                lp,
                to: entry.sender,
                rendezvous_mark: entry.rendezvous_mark,
                time: entry.timestamp,
            });

            if record.wait_on_rendezvous == entry.rendezvous_mark {
                record.clear_session();
            }
            undone += 1;
        }

        for index in record.queue.next_index()..record.queue.len() {
            if let Some(entry) = record.queue.get_mut(index)
                && !entry.is_control()
                && entry.rendezvous_mark.is_some()
            {
                entry.rendezvous_mark = RendezvousMark::NONE;
            }
        }

        Ok(undone)
    }

    /// Routes an antimessage through the core before ordinary antimessage
    /// handling.
    ///
    /// Returns false if the message was handled here and must not be
    /// processed as an ordinary antimessage. A ROLLBACK control
    /// antimessage is always handled here, matched or not.
    pub fn handle_rollback_antimessage(
        &self,
        ctx: &mut ExecutionContext<'_>,
        msg: &Message,
    ) -> Result<bool> {
        if !self.config().cross_state || msg.control_type() != Some(ControlType::Rollback) {
            return Ok(true);
        }

        let mut lp = self.lp(msg.receiver)?;
        let session = msg.rendezvous_mark;
        let Some(index) = lp.queue.find_rendezvous_backward(session) else {
            METRICS.increment_unmatched_rollbacks();
            tracing::debug!(lp = %lp.id, from = %msg.sender, %session, "unmatched rendezvous rollback");
            ctx.emit(SyncEvent::UnmatchedRollback {
                lp: lp.id,
                rendezvous_mark: session,
            });
            return Ok(false);
        };

        let found_at = lp
            .queue
            .get(index)
            .map_or(SimTime::ZERO, |entry| entry.timestamp);
        let lvt = lp.lvt();

        if found_at <= lvt {
            let group = self.group_of_locked(&lp)?;
            lp.queue.rewind_before(found_at);
            if let Some(group) = group
                && group.is_anchor(lp.id)
                && group.window_reached_by(found_at)
            {
                self.rollback_group_locked(ctx, &mut lp, &group, found_at);
            }
            self.set_state(ctx, &mut lp, LpState::Rollback);

            METRICS.increment_control_rollbacks();
            tracing::debug!(lp = %lp.id, %session, time = %found_at, %lvt, "rollback to rendezvous");
            ctx.emit(SyncEvent::ControlRollbackApplied {
                lp: lp.id,
                rendezvous_mark: session,
                time: found_at,
            });
        } else {
            METRICS.increment_late_notifications();
            tracing::warn!(
                lp = %lp.id,
                from = %msg.sender,
                %session,
                time = %found_at,
                %lvt,
                "rendezvous rollback for an entry not yet executed"
            );
            ctx.emit(SyncEvent::FutureRollback {
                lp: lp.id,
                rendezvous_mark: session,
                time: found_at,
                lvt,
            });
        }

        if let Some(entry) = lp.queue.get_mut(index) {
            entry.rendezvous_mark = RendezvousMark::NONE;
        }
        if lp.wait_on_rendezvous == session {
            lp.clear_session();
        }
        Ok(false)
    }

    /// Finishes a rollback of `lp` once its state has been restored.
    ///
    /// A session survives only if an executed entry still carries its
    /// mark; the LP then resumes the blocking state it was in, otherwise
    /// it returns to `Ready`.
    pub fn complete_rollback(&self, ctx: &mut ExecutionContext<'_>, lp: LpId) -> Result<()> {
        let mut record = self.lp(lp)?;
        let session = record.wait_on_rendezvous;

        if session.is_some() {
            let bound = record.queue.bound();
            let survives = record
                .queue
                .find_rendezvous_backward(session)
                .is_some_and(|index| bound.is_some_and(|bound| index <= bound));
            if !survives {
                record.clear_session();
                tracing::debug!(lp = %lp, %session, "rendezvous session abandoned by rollback");
                ctx.emit(SyncEvent::SessionAbandoned {
                    lp,
                    rendezvous_mark: session,
                });
            }
        }

        let resume = if record.wait_on_rendezvous.is_some() {
            record.session_state.unwrap_or(LpState::Ready)
        } else {
            LpState::Ready
        };
        self.set_state(ctx, &mut record, resume);
        Ok(())
    }
}
