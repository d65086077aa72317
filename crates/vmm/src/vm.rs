//! Shared subsystem state and the coarse VM lock.
//!
//! One `Vm` exists per kernel. It owns the inverted page table, the frame
//! allocator, the swap-space manager, and the victim policy, all behind a
//! single mutex. Every paging operation (fault handling, explicit memory
//! access, context-switch save/restore, teardown) runs its full sequence
//! inside one acquisition of that lock, so same-key operations serialize
//! and a partially-populated entry is never observable. The lock is a
//! parking mutex rather than a spin lock because eviction performs blocking
//! swap I/O while holding it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use machine::{BackingStore, FrameNumber, PAGE_SIZE, Processor, TranslationEntry};

use crate::error::VmError;
use crate::frames::FrameAllocator;
use crate::policy::{ClockPolicy, VictimPolicy};
use crate::swap::SwapManager;
use crate::table::{InvertedPageTable, PageKey};

/// The virtual-memory subsystem shared by all processes.
pub struct Vm {
    processor: Arc<Processor>,
    state: Mutex<VmState>,
}

pub(crate) struct VmState {
    pub table: InvertedPageTable,
    pub frames: FrameAllocator,
    pub swap: SwapManager,
    pub policy: Box<dyn VictimPolicy>,
}

impl Vm {
    /// Creates the subsystem around a processor and an opened backing
    /// store, using the default clock victim policy.
    pub fn new(processor: Arc<Processor>, store: Box<dyn BackingStore>) -> Self {
        Self::with_policy(processor, store, Box::new(ClockPolicy::new()))
    }

    /// Creates the subsystem with an explicit victim policy.
    pub fn with_policy(
        processor: Arc<Processor>,
        store: Box<dyn BackingStore>,
        policy: Box<dyn VictimPolicy>,
    ) -> Self {
        let num_frames = processor.num_frames();
        Self {
            processor,
            state: Mutex::new(VmState {
                table: InvertedPageTable::new(),
                frames: FrameAllocator::new(num_frames),
                swap: SwapManager::new(store),
                policy,
            }),
        }
    }

    /// The processor whose TLB and memory this subsystem manages.
    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, VmState> {
        // A panic mid-operation poisons the lock; the state itself is
        // guarded against partial updates by the operation structure.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the table entry for `key`, if the page was ever allocated.
    pub fn lookup(&self, key: PageKey) -> Option<TranslationEntry> {
        self.lock().table.lookup(key)
    }

    /// Snapshot of every table entry, in key order.
    pub fn entries(&self) -> Vec<(PageKey, TranslationEntry)> {
        self.lock().table.iter().collect()
    }

    /// Total physical frames managed.
    pub fn total_frames(&self) -> usize {
        self.lock().frames.total_frames()
    }

    /// Frames currently in the free pool.
    pub fn free_frames(&self) -> usize {
        self.lock().frames.free_frames()
    }

    /// Pages currently resident across all processes.
    pub fn resident_pages(&self) -> usize {
        self.lock().table.valid_count()
    }

    /// Returns the swap slot bound to `key`, if any.
    pub fn swap_slot(&self, key: PageKey) -> Option<usize> {
        self.lock().swap.bound_slot(key)
    }

    /// Returns true if the swap manager holds any state for `key`.
    pub fn has_swap_state(&self, key: PageKey) -> bool {
        self.lock().swap.knows(key)
    }
}

impl VmState {
    /// Hands out a frame, evicting one victim first if the pool is dry.
    /// Allocation must succeed after exactly one eviction; anything else is
    /// an invariant violation.
    pub(crate) fn acquire_frame(&mut self, processor: &Processor) -> Result<FrameNumber, VmError> {
        if let Some(frame) = self.frames.allocate() {
            return Ok(frame);
        }
        let victim = self.policy.select(&mut self.table).ok_or(VmError::NoVictim)?;
        self.evict(processor, victim)?;
        self.frames
            .allocate()
            .ok_or(VmError::ExhaustedAfterEviction)
    }

    /// Evicts the resident page at `key`: scrubs any mirroring TLB slot,
    /// writes the page back to swap if dirty, invalidates the table entry,
    /// and frees the frame. A no-op if the entry is already non-resident.
    pub(crate) fn evict(&mut self, processor: &Processor, key: PageKey) -> Result<(), VmError> {
        let mut entry = self.table.lookup(key).ok_or(VmError::MissingEntry(key))?;
        if !entry.valid {
            return Ok(());
        }

        // The TLB may hold fresher used/dirty bits for this page. Pull them
        // back into the table and kill the slot so no fast-path access can
        // reach the frame once it is reassigned.
        for slot in 0..processor.tlb_size() {
            let tlb_entry = processor.read_tlb_entry(slot);
            if tlb_entry.valid && tlb_entry.vpn == entry.vpn && tlb_entry.ppn == entry.ppn {
                self.table.update(key, tlb_entry)?;
                entry = tlb_entry;
                processor.write_tlb_entry(slot, TranslationEntry::INVALID);
                break;
            }
        }

        if entry.dirty {
            let mut page = [0u8; PAGE_SIZE];
            processor.read_frame(entry.ppn, &mut page);
            self.swap.write(key, &page)?;
        }

        let frame = entry.ppn;
        let mut invalid = entry;
        invalid.valid = false;
        invalid.used = false;
        invalid.dirty = false;
        self.table.update(key, invalid)?;
        self.frames.free(frame)?;
        log::debug!("evicted {key} from frame {frame}");
        Ok(())
    }
}
