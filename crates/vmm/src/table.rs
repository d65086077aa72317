//! The inverted page table.
//!
//! The table is keyed by `(process, virtual page)` and holds one
//! `TranslationEntry` per page any process has ever allocated, resident or
//! not. It is the single source of truth for mappings: the hardware TLB and
//! the swap table are reconciled against it, never the other way around.
//!
//! The table itself is not synchronized; callers serialize access through
//! the subsystem-wide lock in [`crate::Vm`].

use core::fmt;
use std::collections::BTreeMap;

use machine::{PageNumber, TranslationEntry};

use crate::error::VmError;

/// A process identifier within the VM subsystem's global key space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The composite lookup key shared by the inverted page table and the
/// swap-space manager. Two keys are equal iff both fields are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub pid: ProcessId,
    pub vpn: PageNumber,
}

impl PageKey {
    #[inline]
    pub const fn new(pid: ProcessId, vpn: PageNumber) -> Self {
        Self { pid, vpn }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(pid {}, vpn {})", self.pid, self.vpn)
    }
}

/// The inverted page table: `(process, virtual page)` to translation entry.
///
/// A `BTreeMap` keeps the key space in a stable order, which the clock
/// victim policy relies on to sweep fairly across all processes.
#[derive(Default)]
pub struct InvertedPageTable {
    entries: BTreeMap<PageKey, TranslationEntry>,
}

impl InvertedPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, if the page was ever allocated.
    pub fn lookup(&self, key: PageKey) -> Option<TranslationEntry> {
        self.entries.get(&key).copied()
    }

    /// Records a new entry. The key must not already exist; callers that
    /// want replacement must `delete` first.
    pub fn insert(&mut self, key: PageKey, entry: TranslationEntry) -> Result<(), VmError> {
        if self.entries.contains_key(&key) {
            return Err(VmError::DuplicateEntry(key));
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Overwrites an existing entry. The key must already exist.
    pub fn update(&mut self, key: PageKey, entry: TranslationEntry) -> Result<(), VmError> {
        match self.entries.get_mut(&key) {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(VmError::MissingEntry(key)),
        }
    }

    /// Removes the entry for `key` and returns it.
    pub fn delete(&mut self, key: PageKey) -> Result<TranslationEntry, VmError> {
        self.entries.remove(&key).ok_or(VmError::MissingEntry(key))
    }

    /// Clears the `used` bit on an entry, if present. Used by second-chance
    /// victim policies as the clock hand sweeps past.
    pub fn clear_used(&mut self, key: PageKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.used = false;
        }
    }

    /// Iterates all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (PageKey, TranslationEntry)> + '_ {
        self.entries.iter().map(|(k, e)| (*k, *e))
    }

    /// Iterates the keys of all currently-resident entries, in key order.
    pub fn valid_keys(&self) -> impl Iterator<Item = PageKey> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| e.valid)
            .map(|(k, _)| *k)
    }

    /// Number of currently-resident entries.
    pub fn valid_count(&self) -> usize {
        self.entries.values().filter(|e| e.valid).count()
    }

    /// Total number of entries, resident or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine::FrameNumber;

    fn key(pid: u32, vpn: usize) -> PageKey {
        PageKey::new(ProcessId::new(pid), PageNumber::new(vpn))
    }

    #[test]
    fn insert_then_lookup() {
        let mut table = InvertedPageTable::new();
        let entry = TranslationEntry::unmapped(PageNumber::new(3), false);

        table.insert(key(1, 3), entry).unwrap();
        assert_eq!(table.lookup(key(1, 3)), Some(entry));
        assert_eq!(table.lookup(key(2, 3)), None);
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let mut table = InvertedPageTable::new();
        let entry = TranslationEntry::unmapped(PageNumber::new(0), false);

        table.insert(key(1, 0), entry).unwrap();
        let err = table.insert(key(1, 0), entry).unwrap_err();
        assert!(matches!(err, VmError::DuplicateEntry(k) if k == key(1, 0)));
    }

    #[test]
    fn update_requires_existing_entry() {
        let mut table = InvertedPageTable::new();
        let entry = TranslationEntry::unmapped(PageNumber::new(0), false);

        assert!(matches!(
            table.update(key(1, 0), entry),
            Err(VmError::MissingEntry(_))
        ));

        table.insert(key(1, 0), entry).unwrap();
        let updated = TranslationEntry::new(PageNumber::new(0), FrameNumber::new(2), false);
        table.update(key(1, 0), updated).unwrap();
        assert_eq!(table.lookup(key(1, 0)), Some(updated));
    }

    #[test]
    fn delete_returns_removed_entry() {
        let mut table = InvertedPageTable::new();
        let entry = TranslationEntry::unmapped(PageNumber::new(5), true);

        table.insert(key(2, 5), entry).unwrap();
        assert_eq!(table.delete(key(2, 5)).unwrap(), entry);
        assert!(matches!(
            table.delete(key(2, 5)),
            Err(VmError::MissingEntry(_))
        ));
    }

    #[test]
    fn valid_accounting_tracks_residency() {
        let mut table = InvertedPageTable::new();
        table
            .insert(key(1, 0), TranslationEntry::unmapped(PageNumber::new(0), false))
            .unwrap();
        table
            .insert(
                key(1, 1),
                TranslationEntry::new(PageNumber::new(1), FrameNumber::new(0), false),
            )
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.valid_count(), 1);
        assert_eq!(table.valid_keys().collect::<Vec<_>>(), vec![key(1, 1)]);
    }

    #[test]
    fn keys_order_by_pid_then_vpn() {
        let mut table = InvertedPageTable::new();
        for k in [key(2, 0), key(1, 1), key(1, 0)] {
            table
                .insert(k, TranslationEntry::unmapped(k.vpn, false))
                .unwrap();
        }

        let keys: Vec<PageKey> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![key(1, 0), key(1, 1), key(2, 0)]);
    }
}
