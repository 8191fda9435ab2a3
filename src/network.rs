//! Network-key slot table: slot 0 is the public ANT network, slots ≥1 are
//! allocated lazily to the first free slot matching (or not yet holding) a key.

use crate::error::AntError;

#[derive(Debug)]
pub struct NetworkTable {
    slots: Vec<Option<u64>>,
}

impl NetworkTable {
    pub fn new(max_networks: usize) -> Self {
        let mut slots = vec![None; max_networks.max(1)];
        slots[0] = Some(0); // slot 0: the public ANT network
        Self { slots }
    }

    /// Find (or lazily allocate) the slot holding `key`. Slot 0 is reserved
    /// for the public key and is never allocated to an application key.
    pub fn slot_for_key(&mut self, key: u64) -> Result<u8, AntError> {
        if let Some(pos) = self.slots.iter().skip(1).position(|s| *s == Some(key)) {
            return Ok((pos + 1) as u8);
        }
        if let Some(pos) = self.slots.iter().skip(1).position(|s| s.is_none()) {
            let slot = pos + 1;
            self.slots[slot] = Some(key);
            return Ok(slot as u8);
        }
        Err(AntError::NoMoreNetworks)
    }

    /// The key actually stored at `slot`, used to compose `SetNetworkKey` —
    /// never falls back to a hardcoded default.
    pub fn key_for_slot(&self, slot: u8) -> Option<u64> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn free_slot(&mut self, slot: u8) {
        if slot != 0 {
            if let Some(s) = self.slots.get_mut(slot as usize) {
                *s = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ANT_PLUS_NETWORK_KEY;

    #[test]
    fn slot_zero_is_reserved_for_public_key() {
        let table = NetworkTable::new(4);
        assert_eq!(table.key_for_slot(0), Some(0));
    }

    #[test]
    fn allocates_first_free_slot_above_zero() {
        let mut table = NetworkTable::new(4);
        let slot = table.slot_for_key(ANT_PLUS_NETWORK_KEY).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(table.key_for_slot(1), Some(ANT_PLUS_NETWORK_KEY));
    }

    #[test]
    fn reuses_existing_slot_for_same_key() {
        let mut table = NetworkTable::new(4);
        let slot1 = table.slot_for_key(ANT_PLUS_NETWORK_KEY).unwrap();
        let slot2 = table.slot_for_key(ANT_PLUS_NETWORK_KEY).unwrap();
        assert_eq!(slot1, slot2);
    }

    #[test]
    fn different_keys_get_different_slots() {
        let mut table = NetworkTable::new(4);
        let slot1 = table.slot_for_key(0x1111111111111111).unwrap();
        let slot2 = table.slot_for_key(0x2222222222222222).unwrap();
        assert_ne!(slot1, slot2);
    }

    #[test]
    fn exhaustion_fails_with_no_more_networks() {
        let mut table = NetworkTable::new(2); // slot 0 public, slot 1 available
        table.slot_for_key(0x1111111111111111).unwrap();
        let err = table.slot_for_key(0x2222222222222222).unwrap_err();
        assert!(matches!(err, AntError::NoMoreNetworks));
    }

    #[test]
    fn freeing_a_slot_allows_reallocation() {
        let mut table = NetworkTable::new(2);
        table.slot_for_key(0x1111111111111111).unwrap();
        table.free_slot(1);
        let slot = table.slot_for_key(0x2222222222222222).unwrap();
        assert_eq!(slot, 1);
    }
}
