//! Per-device credits for extra full-data fetches

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::DeviceId;

/// Shared ledger of remaining full-refresh credits.
///
/// Crediting overwrites the count: repeated triggers never accumulate.
#[derive(Debug, Clone, Default)]
pub struct UpdateLedger {
    credits: Arc<Mutex<HashMap<DeviceId, u32>>>,
}

impl UpdateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, id: DeviceId, count: u32) {
        self.credits.lock().insert(id, count);
    }

    /// Take one credit; false when none is left
    pub fn consume(&self, id: DeviceId) -> bool {
        let mut credits = self.credits.lock();
        match credits.get_mut(&id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn remaining(&self, id: DeviceId) -> u32 {
        self.credits.lock().get(&id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_overwrites() {
        let ledger = UpdateLedger::new();
        let id = DeviceId(5);
        ledger.credit(id, 3);
        ledger.credit(id, 1);
        assert!(ledger.consume(id));
        assert!(!ledger.consume(id));
    }

    #[test]
    fn test_consume_counts_down_and_keeps_entry() {
        let ledger = UpdateLedger::new();
        let id = DeviceId(9);
        ledger.credit(id, 2);
        assert!(ledger.consume(id));
        assert!(ledger.consume(id));
        assert!(!ledger.consume(id));
        assert_eq!(ledger.remaining(id), 0);
        assert!(ledger.credits.lock().contains_key(&id));
    }

    #[test]
    fn test_unknown_device_has_no_credit() {
        assert!(!UpdateLedger::new().consume(DeviceId(1)));
    }

    #[test]
    fn test_clones_share_credits() {
        let ledger = UpdateLedger::new();
        let dispatcher_side = ledger.clone();
        dispatcher_side.credit(DeviceId(2), 1);
        assert!(ledger.consume(DeviceId(2)));
    }
}
