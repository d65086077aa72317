//! The swap-space manager.
//!
//! Multiplexes every process's evicted pages onto one backing store. Each
//! bound key owns one fixed-size slot at byte offset `slot * PAGE_SIZE`.
//! Keys move through three states: reserved (registered at allocation time,
//! no slot yet), bound (a slot holds the page's last written-back content),
//! and released. Slot indices are recycled lowest-first so the store grows
//! only when every existing slot is in use.
//!
//! The manager is constructed once, around an explicitly-opened store, when
//! the subsystem is initialized; there is no lazily-created global.

use std::collections::{BTreeSet, HashMap, HashSet};

use machine::{BackingStore, PAGE_SIZE};

use crate::error::VmError;
use crate::table::PageKey;

pub struct SwapManager {
    store: Box<dyn BackingStore>,
    slots: HashMap<PageKey, usize>,
    reserved: HashSet<PageKey>,
    free_slots: BTreeSet<usize>,
}

impl SwapManager {
    /// Wraps an opened backing store. The store is owned for the life of
    /// the subsystem.
    pub fn new(store: Box<dyn BackingStore>) -> Self {
        Self {
            store,
            slots: HashMap::new(),
            reserved: HashSet::new(),
            free_slots: BTreeSet::new(),
        }
    }

    /// Registers that `key` may later be written back, without consuming a
    /// slot. Reads of a reserved-but-never-written key yield zero pages.
    pub fn reserve(&mut self, key: PageKey) {
        if !self.slots.contains_key(&key) {
            self.reserved.insert(key);
        }
    }

    /// Writes one page of content back for `key`, binding a slot on first
    /// write and overwriting in place afterwards. Returns the slot index.
    ///
    /// # Panics
    /// Panics if `page` is not exactly one page, which indicates a kernel
    /// bug rather than a storage condition.
    pub fn write(&mut self, key: PageKey, page: &[u8]) -> Result<usize, VmError> {
        assert_eq!(page.len(), PAGE_SIZE, "swap writes are whole pages");

        let slot = match self.slots.get(&key) {
            Some(&slot) => slot,
            None => {
                if !self.reserved.remove(&key) {
                    return Err(VmError::UnreservedSwapKey(key));
                }
                let slot = self
                    .free_slots
                    .pop_first()
                    .unwrap_or_else(|| self.slots.len());
                self.slots.insert(key, slot);
                slot
            }
        };

        self.store.write_at((slot * PAGE_SIZE) as u64, page)?;
        log::trace!("swap out {key} -> slot {slot}");
        Ok(slot)
    }

    /// Reads the page bound to `key` into `buf`.
    ///
    /// A key with no bound slot yields a zero-filled page and a diagnostic;
    /// that is the normal first touch of a never-written page, not an error.
    ///
    /// # Panics
    /// Panics if `buf` is not exactly one page.
    pub fn read(&mut self, key: PageKey, buf: &mut [u8]) -> Result<(), VmError> {
        assert_eq!(buf.len(), PAGE_SIZE, "swap reads are whole pages");

        match self.slots.get(&key) {
            Some(&slot) => {
                self.store.read_at((slot * PAGE_SIZE) as u64, buf)?;
                log::trace!("swap in {key} <- slot {slot}");
                Ok(())
            }
            None => {
                log::warn!("swap read for unbound {key}, returning zero page");
                buf.fill(0);
                Ok(())
            }
        }
    }

    /// Drops any reservation or slot binding for `key`, returning the slot
    /// to the free set. Releasing an unknown key is a no-op.
    pub fn release(&mut self, key: PageKey) {
        self.reserved.remove(&key);
        if let Some(slot) = self.slots.remove(&key) {
            self.free_slots.insert(slot);
        }
    }

    /// Returns the slot bound to `key`, if any.
    pub fn bound_slot(&self, key: PageKey) -> Option<usize> {
        self.slots.get(&key).copied()
    }

    /// Returns true if `key` is reserved or bound.
    pub fn knows(&self, key: PageKey) -> bool {
        self.reserved.contains(&key) || self.slots.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ProcessId;
    use machine::{MemoryStore, PageNumber};

    fn key(pid: u32, vpn: usize) -> PageKey {
        PageKey::new(ProcessId::new(pid), PageNumber::new(vpn))
    }

    fn manager() -> SwapManager {
        SwapManager::new(Box::new(MemoryStore::new()))
    }

    fn page(fill: u8) -> Vec<u8> {
        vec![fill; PAGE_SIZE]
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut swap = manager();
        let k = key(1, 0);
        swap.reserve(k);

        swap.write(k, &page(0x5A)).unwrap();

        let mut back = page(0);
        swap.read(k, &mut back).unwrap();
        assert_eq!(back, page(0x5A));
    }

    #[test]
    fn write_without_reservation_is_rejected() {
        let mut swap = manager();
        let err = swap.write(key(1, 0), &page(0)).unwrap_err();
        assert!(matches!(err, VmError::UnreservedSwapKey(_)));
    }

    #[test]
    fn rewrite_keeps_the_same_slot() {
        let mut swap = manager();
        let k = key(1, 0);
        swap.reserve(k);

        let first = swap.write(k, &page(1)).unwrap();
        let second = swap.write(k, &page(2)).unwrap();
        assert_eq!(first, second);

        let mut back = page(0);
        swap.read(k, &mut back).unwrap();
        assert_eq!(back, page(2));
    }

    #[test]
    fn unbound_read_zero_fills() {
        let mut swap = manager();
        let k = key(3, 9);
        swap.reserve(k);

        let mut buf = page(0xFF);
        swap.read(k, &mut buf).unwrap();
        assert_eq!(buf, page(0));
    }

    #[test]
    fn slots_are_recycled_lowest_first() {
        let mut swap = manager();
        for vpn in 0..3 {
            let k = key(1, vpn);
            swap.reserve(k);
            assert_eq!(swap.write(k, &page(vpn as u8)).unwrap(), vpn);
        }

        swap.release(key(1, 0));
        swap.release(key(1, 2));

        // Lowest freed slot first, then the next, then fresh growth.
        for (vpn, expected_slot) in [(10, 0), (11, 2), (12, 3)] {
            let k = key(1, vpn);
            swap.reserve(k);
            assert_eq!(swap.write(k, &page(0)).unwrap(), expected_slot);
        }
    }

    #[test]
    fn release_is_idempotent() {
        let mut swap = manager();
        let k = key(2, 4);
        swap.reserve(k);
        swap.write(k, &page(7)).unwrap();

        swap.release(k);
        swap.release(k);
        assert!(!swap.knows(k));
    }

    #[test]
    fn keys_are_isolated_between_processes() {
        let mut swap = manager();
        let a = key(1, 0);
        let b = key(2, 0);
        swap.reserve(a);
        swap.reserve(b);

        swap.write(a, &page(0xAA)).unwrap();
        swap.write(b, &page(0xBB)).unwrap();

        let mut back = page(0);
        swap.read(a, &mut back).unwrap();
        assert_eq!(back, page(0xAA));
        swap.read(b, &mut back).unwrap();
        assert_eq!(back, page(0xBB));
    }
}
