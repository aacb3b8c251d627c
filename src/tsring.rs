//! Timestamp Ring: fixed-size per-target trace of op start/end.
//!
//! Single-writer-per-worker, append-only: each Worker Agent owns its
//! own `TimestampRing` and the Target Thread only reads it at pass
//! end, so no lock is needed on the hot path.

use crate::config::TimestampMode;
use crate::ticker::Tick;

/// Kind of operation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    Noop,
    Eof,
}

impl From<crate::seeklist::OpKind> for OpKind {
    fn from(k: crate::seeklist::OpKind) -> Self {
        match k {
            crate::seeklist::OpKind::Read => OpKind::Read,
            crate::seeklist::OpKind::Write => OpKind::Write,
            crate::seeklist::OpKind::Noop => OpKind::Noop,
            crate::seeklist::OpKind::Eof => OpKind::Eof,
        }
    }
}

/// One (pass#, op#, worker#, kind, byte_offset, xfer_size, start_tick,
/// end_tick) record.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub pass: u32,
    pub op: u64,
    pub worker: usize,
    pub kind: OpKind,
    pub byte_offset: u64,
    pub xfer_size: usize,
    pub start_tick: Tick,
    pub end_tick: Tick,
}

/// ONESHOT stops recording at capacity; WRAP overwrites the oldest
/// entry. The policy is a recorded constant, not reconfigurable
/// mid-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Oneshot,
    Wrap,
}

/// Ring buffer of `Entry`s plus an in-flight (start-only) entry slot.
pub struct TimestampRing {
    capacity: usize,
    policy: Policy,
    entries: Vec<Entry>,
    next: usize,
    disabled: bool,
    in_flight: Option<Entry>,
}

impl TimestampRing {
    pub fn new(mode: TimestampMode) -> Self {
        let (capacity, policy, disabled) = match mode {
            TimestampMode::Disabled => (0, Policy::Oneshot, true),
            TimestampMode::Oneshot { capacity } => (capacity, Policy::Oneshot, false),
            TimestampMode::Wrap { capacity } => (capacity, Policy::Wrap, false),
        };
        TimestampRing {
            capacity,
            policy,
            entries: Vec::with_capacity(capacity),
            next: 0,
            disabled,
            in_flight: None,
        }
    }

    pub fn record_start(
        &mut self,
        worker: usize,
        pass: u32,
        op: u64,
        byte_offset: u64,
        kind: OpKind,
        tick: Tick,
    ) {
        if self.disabled {
            return;
        }
        self.in_flight = Some(Entry {
            pass,
            op,
            worker,
            kind,
            byte_offset,
            xfer_size: 0,
            start_tick: tick,
            end_tick: tick,
        });
    }

    pub fn record_end(&mut self, xfer_size: usize, tick: Tick) {
        if self.disabled {
            return;
        }
        let Some(mut entry) = self.in_flight.take() else {
            return;
        };
        entry.xfer_size = xfer_size;
        entry.end_tick = tick;
        self.push(entry);
    }

    fn push(&mut self, entry: Entry) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            return;
        }
        match self.policy {
            Policy::Oneshot => {
                // Capacity reached: silently disable further recording.
                self.disabled = true;
            }
            Policy::Wrap => {
                self.entries[self.next] = entry;
                self.next = (self.next + 1) % self.capacity.max(1);
            }
        }
    }

    /// Read-only snapshot in chronological-insertion order (for WRAP
    /// this is wrap order, not necessarily time order once it has
    /// wrapped at least once).
    pub fn snapshot(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::Ticker;

    #[test]
    fn oneshot_stops_recording_at_capacity() {
        let t = Ticker::new();
        let mut ring = TimestampRing::new(TimestampMode::Oneshot { capacity: 2 });
        for i in 0..4u64 {
            ring.record_start(0, 0, i, i * 512, OpKind::Write, t.now());
            ring.record_end(512, t.now());
        }
        assert_eq!(ring.snapshot().len(), 2);
    }

    #[test]
    fn wrap_overwrites_oldest() {
        let t = Ticker::new();
        let mut ring = TimestampRing::new(TimestampMode::Wrap { capacity: 2 });
        for i in 0..4u64 {
            ring.record_start(0, 0, i, i * 512, OpKind::Write, t.now());
            ring.record_end(512, t.now());
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 2);
        // Oldest two (op 0, op 1) should have been overwritten by (op 2, op 3).
        let ops: Vec<u64> = snap.iter().map(|e| e.op).collect();
        assert!(ops.contains(&2) && ops.contains(&3));
    }

    #[test]
    fn disabled_mode_records_nothing() {
        let t = Ticker::new();
        let mut ring = TimestampRing::new(TimestampMode::Disabled);
        ring.record_start(0, 0, 0, 0, OpKind::Read, t.now());
        ring.record_end(10, t.now());
        assert!(ring.snapshot().is_empty());
        assert!(ring.is_disabled());
    }
}
