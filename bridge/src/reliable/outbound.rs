//! Per-destination send state: a bounded window of unacknowledged envelopes and a backlog.
//!
//! [Outbound] is a pure state machine. The engine feeds it acknowledgements, nacks, and the
//! current time, and transmits whatever [Outbound::transmit] returns.

use super::wire::{DeliveryId, Envelope, Frame};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Largest multiplier applied to the ack timeout as an envelope is retransmitted.
const MAX_BACKOFF_SHIFT: u32 = 4;

#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Maximum number of unacknowledged envelopes in flight.
    pub window_size: usize,
    /// Maximum number of times an envelope is handed to the transport before it fails.
    pub max_attempts: u32,
    /// How long to wait for progress before replaying the window.
    pub ack_timeout: Duration,
    /// How long a destination stalls after a nack before replaying.
    pub retry_delay: Duration,
}

struct Pending {
    seq: u64,
    envelope: Envelope,
}

/// Frames to transmit and deliveries that exhausted their attempts.
#[derive(Default)]
pub struct Transmit {
    pub frames: Vec<Frame>,
    pub failed: Vec<Envelope>,
}

pub struct Outbound {
    settings: Settings,

    session: u64,
    next_seq: u64,
    window: VecDeque<Pending>,
    backlog: VecDeque<Envelope>,

    /// Index into `window` of the next envelope to (re)transmit.
    cursor: usize,
    stalled_until: Option<Instant>,
    last_activity: Option<Instant>,
}

impl Outbound {
    pub fn new(settings: Settings, session: u64) -> Self {
        Self {
            settings,
            session,
            next_seq: 0,
            window: VecDeque::new(),
            backlog: VecDeque::new(),
            cursor: 0,
            stalled_until: None,
            last_activity: None,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Number of envelopes not yet acknowledged (in flight or waiting).
    pub fn len(&self) -> usize {
        self.window.len() + self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether a delivery is already queued.
    pub fn contains(&self, id: &DeliveryId) -> bool {
        self.window.iter().any(|pending| pending.envelope.id == *id)
            || self.backlog.iter().any(|envelope| envelope.id == *id)
    }

    /// Queue an envelope behind everything already queued.
    pub fn enqueue(&mut self, envelope: Envelope) {
        self.backlog.push_back(envelope);
        self.fill();
    }

    /// Move backlog into the window while there is room.
    fn fill(&mut self) {
        while self.window.len() < self.settings.window_size {
            let Some(envelope) = self.backlog.pop_front() else {
                break;
            };
            self.window.push_back(Pending {
                seq: self.next_seq,
                envelope,
            });
            self.next_seq += 1;
        }
    }

    /// Renumber everything outstanding under a new session.
    ///
    /// Used when the receiver can no longer accept the current numbering (the head was
    /// abandoned or the receiver lost its state).
    fn resequence(&mut self) {
        self.session += 1;
        self.next_seq = 0;
        while let Some(pending) = self.window.pop_back() {
            self.backlog.push_front(pending.envelope);
        }
        self.cursor = 0;
        self.stalled_until = None;
        self.fill();
    }

    /// Collect every frame ready to be sent at `now`.
    pub fn transmit(&mut self, now: Instant) -> Transmit {
        let mut transmit = Transmit::default();
        if let Some(until) = self.stalled_until {
            if now < until {
                return transmit;
            }
            self.stalled_until = None;
        }

        // Abandon the head if replaying it would exceed its attempts
        while self.cursor == 0 {
            let exhausted = self
                .window
                .front()
                .map(|pending| pending.envelope.attempt >= self.settings.max_attempts)
                .unwrap_or(false);
            if !exhausted {
                break;
            }
            if let Some(pending) = self.window.pop_front() {
                transmit.failed.push(pending.envelope);
            }
            self.resequence();
        }
        self.fill();

        while let Some(pending) = self.window.get_mut(self.cursor) {
            pending.envelope.attempt += 1;
            transmit.frames.push(Frame::Data {
                session: self.session,
                seq: pending.seq,
                envelope: pending.envelope.clone(),
            });
            self.cursor += 1;
        }
        if !transmit.frames.is_empty() {
            self.last_activity = Some(now);
        }
        transmit
    }

    /// Drop every envelope up to and including `seq` from the window.
    fn release(&mut self, seq: u64) -> Vec<Envelope> {
        let mut acked = Vec::new();
        while let Some(pending) = self.window.front() {
            if pending.seq > seq {
                break;
            }
            if let Some(pending) = self.window.pop_front() {
                acked.push(pending.envelope);
            }
        }
        self.cursor = self.cursor.saturating_sub(acked.len());
        acked
    }

    /// Handle a cumulative acknowledgement, returning the acknowledged envelopes.
    pub fn ack(&mut self, session: u64, seq: u64, now: Instant) -> Vec<Envelope> {
        if session != self.session {
            return Vec::new();
        }
        let acked = self.release(seq);
        if !acked.is_empty() {
            self.last_activity = Some(now);
        }
        self.fill();
        acked
    }

    /// Handle a nack: the receiver could not accept `seq`, so the window is replayed from `seq`
    /// after a stall.
    ///
    /// A nack says nothing about the envelopes before `seq`. They stay in the window until
    /// acknowledged.
    pub fn nack(&mut self, session: u64, seq: u64, now: Instant) {
        if session != self.session || seq >= self.next_seq {
            return;
        }
        match self.window.front() {
            Some(head) if seq >= head.seq => {
                let index = (seq - head.seq) as usize;
                self.cursor = self.cursor.min(index);
            }
            // The receiver asks for something already released, so it lost its state
            _ => self.resequence(),
        }
        self.stalled_until = Some(now + self.settings.retry_delay);
        self.last_activity = Some(now);
        self.fill();
    }

    /// Ack timeout for the current head, growing with its attempts.
    fn timeout(&self) -> Duration {
        let attempt = self
            .window
            .front()
            .map(|pending| pending.envelope.attempt)
            .unwrap_or(1);
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.settings.ack_timeout.saturating_mul(1 << shift)
    }

    /// Replay the whole window if nothing progressed within the ack timeout.
    ///
    /// Returns whether a replay was scheduled.
    pub fn expire(&mut self, now: Instant) -> bool {
        if self.window.is_empty() || self.cursor == 0 {
            return false;
        }
        let Some(last) = self.last_activity else {
            return false;
        };
        if now < last + self.timeout() {
            return false;
        }
        self.cursor = 0;
        true
    }

    /// Earliest instant at which this destination needs attention.
    pub fn deadline(&self) -> Option<Instant> {
        if let Some(until) = self.stalled_until {
            return Some(until);
        }
        if self.window.is_empty() || self.cursor == 0 {
            return None;
        }
        self.last_activity.map(|last| last + self.timeout())
    }
}
