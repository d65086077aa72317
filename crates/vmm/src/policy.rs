//! Victim-selection policies.
//!
//! When the frame pool is exhausted, the fault handler asks a policy for a
//! resident page to evict. Policies only choose; eviction itself is the
//! caller's job. The whole exchange happens under the subsystem lock, so a
//! policy never sees a page whose fault is still in flight.
//!
//! The default is a clock (second-chance) sweep over the inverted page
//! table's ordered key space. Because keys sort by `(pid, vpn)` and the hand
//! persists across calls, selection rotates through every process's resident
//! pages and starves none.

use crate::table::{InvertedPageTable, PageKey};

/// Chooses a resident page to evict.
pub trait VictimPolicy: Send {
    /// Returns the key of a currently-valid entry, or `None` only if the
    /// table holds no valid entry at all (a fatal condition for the caller).
    fn select(&mut self, table: &mut InvertedPageTable) -> Option<PageKey>;
}

/// Clock (second-chance) replacement.
///
/// The hand sweeps the key space in order, clearing `used` bits as it
/// passes; the first entry found with `used` already clear is the victim.
/// Bounded by two sweeps: after the first pass has cleared every bit, the
/// second pass must select.
#[derive(Default)]
pub struct ClockPolicy {
    hand: Option<PageKey>,
}

impl ClockPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VictimPolicy for ClockPolicy {
    fn select(&mut self, table: &mut InvertedPageTable) -> Option<PageKey> {
        let keys: Vec<PageKey> = table.valid_keys().collect();
        if keys.is_empty() {
            return None;
        }

        let start = match self.hand {
            Some(hand) => keys.iter().position(|&k| k > hand).unwrap_or(0),
            None => 0,
        };

        for pass in 0..2 {
            for i in 0..keys.len() {
                let key = keys[(start + i) % keys.len()];
                let used = table.lookup(key).is_some_and(|e| e.used);
                if !used {
                    self.hand = Some(key);
                    return Some(key);
                }
                if pass == 0 {
                    table.clear_used(key);
                }
            }
        }

        // Every bit was cleared on the first pass, so this is unreachable,
        // but falling back to the sweep start keeps the contract total.
        self.hand = Some(keys[start]);
        Some(keys[start])
    }
}

/// Plain rotation over resident entries, ignoring `used` bits. Kept as a
/// second policy to exercise the pluggable contract.
#[derive(Default)]
pub struct RotatingPolicy {
    hand: Option<PageKey>,
}

impl RotatingPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VictimPolicy for RotatingPolicy {
    fn select(&mut self, table: &mut InvertedPageTable) -> Option<PageKey> {
        let keys: Vec<PageKey> = table.valid_keys().collect();
        if keys.is_empty() {
            return None;
        }
        let index = match self.hand {
            Some(hand) => keys.iter().position(|&k| k > hand).unwrap_or(0),
            None => 0,
        };
        self.hand = Some(keys[index]);
        Some(keys[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ProcessId;
    use machine::{FrameNumber, PageNumber, TranslationEntry};

    fn key(pid: u32, vpn: usize) -> PageKey {
        PageKey::new(ProcessId::new(pid), PageNumber::new(vpn))
    }

    fn resident(table: &mut InvertedPageTable, k: PageKey, used: bool) {
        let mut entry = TranslationEntry::new(k.vpn, FrameNumber::new(k.vpn.as_usize()), false);
        entry.used = used;
        table.insert(k, entry).unwrap();
    }

    #[test]
    fn empty_table_yields_no_victim() {
        let mut table = InvertedPageTable::new();
        assert_eq!(ClockPolicy::new().select(&mut table), None);
        assert_eq!(RotatingPolicy::new().select(&mut table), None);
    }

    #[test]
    fn clock_skips_non_resident_entries() {
        let mut table = InvertedPageTable::new();
        table
            .insert(key(1, 0), TranslationEntry::unmapped(PageNumber::new(0), false))
            .unwrap();
        resident(&mut table, key(1, 1), false);

        assert_eq!(ClockPolicy::new().select(&mut table), Some(key(1, 1)));
    }

    #[test]
    fn clock_gives_used_pages_a_second_chance() {
        let mut table = InvertedPageTable::new();
        resident(&mut table, key(1, 0), true);
        resident(&mut table, key(1, 1), false);

        let mut policy = ClockPolicy::new();
        assert_eq!(policy.select(&mut table), Some(key(1, 1)));
        // The sweep cleared vpn 0's used bit, so it is next.
        assert_eq!(table.lookup(key(1, 0)).unwrap().used, false);
        assert_eq!(policy.select(&mut table), Some(key(1, 0)));
    }

    #[test]
    fn clock_selects_even_when_everything_is_used() {
        let mut table = InvertedPageTable::new();
        resident(&mut table, key(1, 0), true);
        resident(&mut table, key(1, 1), true);

        let victim = ClockPolicy::new().select(&mut table);
        assert!(victim.is_some());
    }

    #[test]
    fn rotation_crosses_process_boundaries() {
        let mut table = InvertedPageTable::new();
        resident(&mut table, key(1, 0), false);
        resident(&mut table, key(1, 1), false);
        resident(&mut table, key(2, 0), false);

        let mut policy = RotatingPolicy::new();
        assert_eq!(policy.select(&mut table), Some(key(1, 0)));
        assert_eq!(policy.select(&mut table), Some(key(1, 1)));
        assert_eq!(policy.select(&mut table), Some(key(2, 0)));
        // Wraps around.
        assert_eq!(policy.select(&mut table), Some(key(1, 0)));
    }
}
