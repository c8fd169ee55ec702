//! In-memory transport.
//!
//! Messages sent while handling one step are held in flight and delivered
//! as one batch on the next step, optionally in random order so that
//! stragglers and early antimessages actually happen.

use timewarp_sync::{Message, Transport};
use timewarp_types::{LpId, SimTime};

use crate::rng::SimRng;

#[derive(Debug, Default)]
pub struct SimTransport {
    in_flight: Vec<Message>,
    sent: u64,
    flushes: u64,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every message in flight, shuffled if an RNG is given.
    pub fn take_batch(&mut self, rng: Option<&mut SimRng>) -> Vec<Message> {
        let mut batch = std::mem::take(&mut self.in_flight);
        if let Some(rng) = rng {
            rng.shuffle(&mut batch);
        }
        batch
    }

    pub fn in_flight(&self) -> &[Message] {
        &self.in_flight
    }

    /// Number of messages in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Lowest timestamp in flight.
    pub fn min_timestamp(&self) -> Option<SimTime> {
        self.in_flight.iter().map(|msg| msg.timestamp).min()
    }

    /// Messages sent by `lp` since the in-flight buffer held `from` entries.
    pub fn sent_since(&self, from: usize, lp: LpId) -> impl Iterator<Item = &Message> {
        self.in_flight
            .get(from..)
            .unwrap_or_default()
            .iter()
            .filter(move |msg| msg.sender == lp)
    }

    pub fn total_sent(&self) -> u64 {
        self.sent
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

impl Transport for SimTransport {
    fn send(&mut self, msg: Message) {
        self.sent += 1;
        self.in_flight.push(msg);
    }

    fn flush(&mut self, lp: LpId) {
        // Everything is delivered on the next step anyway.
        self.flushes += 1;
        tracing::trace!(lp = %lp, in_flight = self.in_flight.len(), "flush");
    }
}
