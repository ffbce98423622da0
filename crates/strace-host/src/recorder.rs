//! In-memory sink for plugin events
//!
//! Events are encoded as they arrive and kept in a bounded ring, the
//! stand-in for the host's telemetry transport.

use crate::config::{BackpressureStrategy, RingBufferConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use strace_common::{Error, NtStatus, Result, TraceEvent};
use strace_core::tracelogging::{self, EncodedEvent};
use strace_core::EventSink;
use tracing::{debug, trace};

/// Counters of an [`EventRing`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub high_water: usize,
    /// Metadata plus payload bytes currently queued
    pub queued_bytes: usize,
    pub recorded: u64,
    /// Queued events pushed out by newer ones
    pub evicted: u64,
    pub rejected: u64,
    pub sampled_out: u64,
}

impl QueueStats {
    /// Events that were recorded or offered but are gone without a drain
    pub fn dropped(&self) -> u64 {
        self.evicted + self.rejected + self.sampled_out
    }
}

/// What [`EventRing::push`] did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Stored after evicting the oldest event
    Evicted,
    Rejected,
    SampledOut,
}

impl PushOutcome {
    pub fn stored(self) -> bool {
        matches!(self, PushOutcome::Stored | PushOutcome::Evicted)
    }
}

fn encoded_size(event: &EncodedEvent) -> usize {
    event.metadata.len() + event.payload.len()
}

/// Bounded queue of encoded events with a backpressure policy
pub struct EventRing {
    events: VecDeque<EncodedEvent>,
    capacity: usize,
    policy: BackpressureStrategy,
    stats: QueueStats,
    /// Pushes seen while full, for sampling
    overflowed: u64,
}

impl EventRing {
    pub fn new(config: RingBufferConfig) -> Self {
        Self {
            events: VecDeque::with_capacity(config.max_events.min(1024)),
            capacity: config.max_events.max(1),
            policy: config.backpressure,
            stats: QueueStats::default(),
            overflowed: 0,
        }
    }

    pub fn push(&mut self, event: EncodedEvent) -> PushOutcome {
        let outcome = if self.events.len() < self.capacity {
            PushOutcome::Stored
        } else {
            match self.policy {
                BackpressureStrategy::DropOldest => PushOutcome::Evicted,
                BackpressureStrategy::Reject => PushOutcome::Rejected,
                BackpressureStrategy::Sample { rate } => {
                    self.overflowed += 1;
                    if self.overflowed % u64::from(rate.max(1)) == 0 {
                        PushOutcome::Evicted
                    } else {
                        PushOutcome::SampledOut
                    }
                }
            }
        };

        match outcome {
            PushOutcome::Rejected => self.stats.rejected += 1,
            PushOutcome::SampledOut => self.stats.sampled_out += 1,
            PushOutcome::Evicted => {
                if let Some(oldest) = self.events.pop_front() {
                    self.stats.queued_bytes -= encoded_size(&oldest);
                }
                self.stats.evicted += 1;
                self.store(event);
            }
            PushOutcome::Stored => self.store(event),
        }
        outcome
    }

    fn store(&mut self, event: EncodedEvent) {
        self.stats.queued_bytes += encoded_size(&event);
        self.events.push_back(event);
        self.stats.recorded += 1;
        self.stats.queued = self.events.len();
        self.stats.high_water = self.stats.high_water.max(self.events.len());
    }

    /// Remove up to `count` of the oldest events
    pub fn drain(&mut self, count: usize) -> Vec<EncodedEvent> {
        let count = count.min(self.events.len());
        let drained: Vec<_> = self.events.drain(..count).collect();
        self.stats.queued_bytes -= drained.iter().map(encoded_size).sum::<usize>();
        self.stats.queued = self.events.len();
        drained
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncodedEvent> {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.stats.queued = 0;
        self.stats.queued_bytes = 0;
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// The event capability shared by every plugin of a host
pub struct EventRecorder {
    ring: Mutex<EventRing>,
}

impl EventRecorder {
    pub fn new(config: RingBufferConfig) -> Self {
        Self {
            ring: Mutex::new(EventRing::new(config)),
        }
    }

    /// Remove and return up to `count` of the oldest events
    pub fn drain(&self, count: usize) -> Vec<EncodedEvent> {
        self.ring.lock().drain(count)
    }

    /// Copy of the queued events, oldest first
    pub fn snapshot(&self) -> Vec<EncodedEvent> {
        self.ring.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.ring.lock().stats().clone()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

impl EventSink for EventRecorder {
    fn trace_event(&self, event: &TraceEvent) -> Result<()> {
        let encoded = tracelogging::encode(event).map_err(|e| {
            debug!(event = %event.event_name, error = %e, "event rejected");
            e
        })?;
        let size = encoded_size(&encoded);

        match self.ring.lock().push(encoded) {
            PushOutcome::Rejected => Err(Error::Status(NtStatus::INSUFFICIENT_RESOURCES)),
            outcome => {
                trace!(provider = %event.provider_name, event = %event.event_name, size, ?outcome, "event offered");
                Ok(())
            }
        }
    }
}
