use std::sync::{Arc, Mutex};

use crate::types::ImuReading;

/// Latest IMU sample, shared with whichever thread the simulator delivers
/// IMU callbacks on.
///
/// A newer push replaces an unread sample; the sequence tracker reports the
/// resulting gap.
#[derive(Debug, Clone, Default)]
pub struct ImuInbox {
    slot: Arc<Mutex<Option<ImuReading>>>,
}

impl ImuInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reading: ImuReading) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(reading);
    }

    /// Remove and return the pending sample, if any.
    pub fn take(&self) -> Option<ImuReading> {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}
