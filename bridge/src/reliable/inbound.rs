//! Per-origin receive state: in-order acceptance, application confirmations, and a bounded dedup
//! set.
//!
//! An envelope is handed to the application at most once at a time and is only acknowledged to
//! its origin after the application confirms it. Acknowledgements are cumulative, so a confirmed
//! envelope behind one still being applied is acknowledged once everything before it is.

use super::wire::DeliveryId;
use std::collections::{HashSet, VecDeque};

/// What to do with a received envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// New delivery: hand it to the application, then call [Inbound::confirm] or
    /// [Inbound::reject].
    Deliver,
    /// Already applied: acknowledge `ack` without reapplying.
    Duplicate { ack: u64 },
    /// Cannot accept yet: request a replay from `seq`.
    Nack { seq: u64 },
    /// Drop silently.
    Ignore,
}

/// Recency-windowed set of applied delivery ids.
struct Seen {
    capacity: usize,
    order: VecDeque<DeliveryId>,
    ids: HashSet<DeliveryId>,
}

impl Seen {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    fn contains(&self, id: &DeliveryId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: DeliveryId) {
        if self.capacity == 0 || !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// An accepted sequence that is not yet acknowledged.
struct Slot {
    seq: u64,
    id: DeliveryId,
    confirmed: bool,
}

pub struct Inbound {
    session: Option<u64>,
    expected: u64,
    /// Sequence already nacked in the current session (so gaps are nacked once).
    nacked: Option<u64>,
    /// Highest sequence of the current session acknowledged to the origin.
    acked: Option<u64>,
    /// Accepted sequences above `acked`, in order.
    slots: VecDeque<Slot>,
    /// Envelopes handed to the application and not yet confirmed or rejected (in any session).
    applying: HashSet<DeliveryId>,
    seen: Seen,
}

impl Inbound {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            session: None,
            expected: 0,
            nacked: None,
            acked: None,
            slots: VecDeque::new(),
            applying: HashSet::new(),
            seen: Seen::new(dedup_capacity),
        }
    }

    /// Next sequence accepted in the current session.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Returns whether `id` was applied recently.
    pub fn seen(&self, id: &DeliveryId) -> bool {
        self.seen.contains(id)
    }

    /// Returns whether nothing received from this origin is waiting on the application.
    pub fn is_idle(&self) -> bool {
        self.applying.is_empty()
    }

    fn nack(&mut self, seq: u64) -> Decision {
        if self.nacked == Some(seq) {
            return Decision::Ignore;
        }
        self.nacked = Some(seq);
        Decision::Nack { seq }
    }

    fn duplicate(&self) -> Decision {
        match self.acked {
            Some(ack) => Decision::Duplicate { ack },
            None => Decision::Ignore,
        }
    }

    /// Acknowledge every leading confirmed slot, returning the new cumulative ack (if it moved).
    fn advance(&mut self) -> Option<u64> {
        let mut moved = None;
        while let Some(slot) = self.slots.front() {
            if !slot.confirmed {
                break;
            }
            moved = Some(slot.seq);
            self.slots.pop_front();
        }
        if moved.is_some() {
            self.acked = moved;
        }
        moved
    }

    /// Classify an envelope received at `(session, seq)`.
    pub fn data(&mut self, session: u64, seq: u64, id: &DeliveryId) -> Decision {
        match self.session {
            Some(current) if session < current => return Decision::Ignore,
            Some(current) if session == current => {}
            _ => {
                // A newer session must start from zero
                if seq != 0 {
                    return Decision::Nack { seq: 0 };
                }
                self.session = Some(session);
                self.expected = 0;
                self.nacked = None;
                self.acked = None;
                self.slots.clear();
            }
        }

        if self.applying.contains(id) {
            // Answered once the application is done with it
            return Decision::Ignore;
        }
        if seq < self.expected {
            return self.duplicate();
        }
        if seq > self.expected {
            return self.nack(self.expected);
        }

        self.expected += 1;
        self.nacked = None;
        if self.seen.contains(id) {
            self.slots.push_back(Slot {
                seq,
                id: *id,
                confirmed: true,
            });
            self.advance();
            return self.duplicate();
        }
        self.slots.push_back(Slot {
            seq,
            id: *id,
            confirmed: false,
        });
        self.applying.insert(*id);
        Decision::Deliver
    }

    /// Record that the application applied the envelope delivered at `(session, seq)`.
    ///
    /// Returns the sequence to acknowledge, if the cumulative acknowledgement moved.
    pub fn confirm(&mut self, session: u64, seq: u64, id: DeliveryId) -> Option<u64> {
        self.applying.remove(&id);
        self.seen.insert(id);
        if self.session != Some(session) {
            return None;
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.seq == seq && slot.id == id)?;
        slot.confirmed = true;
        self.advance()
    }

    /// Record that the application refused the envelope delivered at `(session, seq)`.
    ///
    /// Everything from `seq` on must be received again. Returns the sequence to nack.
    pub fn reject(&mut self, session: u64, seq: u64, id: DeliveryId) -> Option<u64> {
        self.applying.remove(&id);
        if self.session != Some(session) {
            return None;
        }
        let position = self
            .slots
            .iter()
            .position(|slot| slot.seq == seq && slot.id == id)?;
        self.slots.truncate(position);
        self.expected = seq;
        self.nacked = Some(seq);
        Some(seq)
    }
}
