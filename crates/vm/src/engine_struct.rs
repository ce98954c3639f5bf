//! The engine structure registry (C8): up to ten host-defined opaque
//! value types (`effect`, `event`, `location`, `talent`, ...), each
//! referenced from script only by an opaque handle.
//!
//! The VM never inspects a registered value's contents — it only stores
//! it, hands back a handle, and later looks the handle up again or drops
//! it. Grounded on the teacher's `reference_counter::ReferenceCounter`
//! pattern of "track liveness by handle, never by value" but without
//! reference counting: engine structures are deleted explicitly
//! (`DESTRUCT`-driven drop at scope exit), not GC'd.

use crate::error::VmError;
use hashbrown::HashMap;

/// Ten slots, one per engine-structure kind (`EngineStruct(0..10)` in
/// [`crate::value::Type`]).
pub const ENGINE_STRUCT_SLOT_COUNT: u8 = 10;

/// One opaque host value, type-erased. The host chooses what `T` is for
/// each slot; the registry never downcasts.
pub struct EngineStructRegistry<T> {
    slots: [HashMap<u32, T>; ENGINE_STRUCT_SLOT_COUNT as usize],
    next_handle: [u32; ENGINE_STRUCT_SLOT_COUNT as usize],
}

impl<T> Default for EngineStructRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EngineStructRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            next_handle: [0; ENGINE_STRUCT_SLOT_COUNT as usize],
        }
    }

    fn check_slot(slot: u8) -> Result<usize, VmError> {
        if slot >= ENGINE_STRUCT_SLOT_COUNT {
            return Err(VmError::InvalidEngineStructSlot { slot });
        }
        Ok(slot as usize)
    }

    /// Registers a value in `slot`, returning its new handle.
    pub fn create(&mut self, slot: u8, value: T) -> Result<u32, VmError> {
        let idx = Self::check_slot(slot)?;
        let handle = self.next_handle[idx];
        self.next_handle[idx] = handle.wrapping_add(1);
        self.slots[idx].insert(handle, value);
        Ok(handle)
    }

    pub fn get(&self, slot: u8, handle: u32) -> Result<&T, VmError> {
        let idx = Self::check_slot(slot)?;
        self.slots[idx]
            .get(&handle)
            .ok_or(VmError::UnknownEngineStructHandle { slot, handle })
    }

    pub fn get_mut(&mut self, slot: u8, handle: u32) -> Result<&mut T, VmError> {
        let idx = Self::check_slot(slot)?;
        self.slots[idx]
            .get_mut(&handle)
            .ok_or(VmError::UnknownEngineStructHandle { slot, handle })
    }

    /// Drops the value registered under `handle`. A double-delete is not
    /// an error — script code frequently lets an engine-structure local go
    /// out of scope more than once along different control-flow paths
    /// (§4.8 "delete is idempotent").
    pub fn delete(&mut self, slot: u8, handle: u32) -> Result<(), VmError> {
        let idx = Self::check_slot(slot)?;
        self.slots[idx].remove(&handle);
        Ok(())
    }

    /// Structural equality by handle identity — two engine structures
    /// compare equal only when they are literally the same registration
    /// (§4.8 "Compare"), never by inspecting `T`.
    pub fn compare(&self, slot_a: u8, handle_a: Option<u32>, slot_b: u8, handle_b: Option<u32>) -> bool {
        slot_a == slot_b && handle_a == handle_b
    }

    pub fn count(&self, slot: u8) -> Result<usize, VmError> {
        let idx = Self::check_slot(slot)?;
        Ok(self.slots[idx].len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_get_delete_round_trip() {
        let mut reg: EngineStructRegistry<String> = EngineStructRegistry::new();
        let h = reg.create(2, "fireball".into()).unwrap();
        assert_eq!(reg.get(2, h).unwrap(), "fireball");
        reg.delete(2, h).unwrap();
        assert!(reg.get(2, h).is_err());
    }

    #[test]
    fn double_delete_is_not_an_error() {
        let mut reg: EngineStructRegistry<u8> = EngineStructRegistry::new();
        let h = reg.create(0, 1).unwrap();
        reg.delete(0, h).unwrap();
        assert!(reg.delete(0, h).is_ok());
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut reg: EngineStructRegistry<u8> = EngineStructRegistry::new();
        assert!(reg.create(10, 1).is_err());
    }

    #[test]
    fn compare_is_identity_not_structural() {
        let mut reg: EngineStructRegistry<u8> = EngineStructRegistry::new();
        let a = reg.create(1, 5).unwrap();
        let b = reg.create(1, 5).unwrap();
        assert!(!reg.compare(1, Some(a), 1, Some(b)));
        assert!(reg.compare(1, Some(a), 1, Some(a)));
    }
}
