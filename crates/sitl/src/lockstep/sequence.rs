//! Rolling 8-bit IMU sequence tracking.

/// Classification of an incoming IMU sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    /// First sample seen on this stream.
    First,
    /// Exactly one ahead of the previous sample.
    InOrder,
    /// Ahead by more than one; `missed` samples were lost.
    Gap { missed: u8 },
    /// Same number as the previous sample (re-delivery).
    Duplicate,
    /// Behind the previous sample (reordered delivery).
    Stale,
}

impl SequenceEvent {
    /// Whether the sample should be used.
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            SequenceEvent::First | SequenceEvent::InOrder | SequenceEvent::Gap { .. }
        )
    }
}

/// Wrapping comparison: `a` is newer than `b` if it is within half the
/// sequence space ahead of it.
pub fn sequence_greater_than(a: u8, b: u8) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < 128
}

/// Tracks one IMU stream's rolling sequence and counts anomalies.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    last: Option<u8>,
    duplicates: u64,
    stale: u64,
    gaps: u64,
    missed: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `seq` and, if accepted, make it the new reference.
    pub fn observe(&mut self, seq: u8) -> SequenceEvent {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return SequenceEvent::First;
        };

        let event = if seq == last {
            self.duplicates += 1;
            SequenceEvent::Duplicate
        } else if !sequence_greater_than(seq, last) {
            self.stale += 1;
            SequenceEvent::Stale
        } else {
            let missed = seq.wrapping_sub(last).wrapping_sub(1);
            if missed == 0 {
                SequenceEvent::InOrder
            } else {
                self.gaps += 1;
                self.missed += u64::from(missed);
                SequenceEvent::Gap { missed }
            }
        };

        if event.is_accepted() {
            self.last = Some(seq);
        }
        event
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn stale(&self) -> u64 {
        self.stale
    }

    /// Number of gap events (not the number of missed samples).
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Forget the reference, e.g. after the simulator restarts its stream.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
