//! The per-process VM controller.
//!
//! One `VmProcess` exists per demand-paged process. It drives TLB-miss
//! handling, explicit memory access, lazy section loading, context-switch
//! save/restore of TLB state, and teardown. All shared state lives in the
//! [`Vm`] it was created with; the controller itself only carries what is
//! private to the process: its allocated pages, its not-yet-loaded section
//! pages, and its TLB shadow.
//!
//! Every public operation acquires the subsystem lock once and runs its
//! whole sequence inside it, so concurrent faults from other processes
//! cannot interleave with a population in progress.

use std::collections::HashMap;
use std::sync::Arc;

use machine::{
    ImageError, PAGE_SIZE, PageNumber, Processor, SectionSource, TranslationEntry, frame_address,
    page_of, page_offset,
};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};

use crate::error::VmError;
use crate::table::{PageKey, ProcessId};
use crate::vm::{Vm, VmState};

/// Where to find a lazily-loaded page in the executable image.
#[derive(Clone, Copy, Debug)]
struct LazyPage {
    section: usize,
    page_offset: usize,
}

/// Per-process demand-paging controller.
pub struct VmProcess {
    pid: ProcessId,
    vm: Arc<Vm>,
    image: Option<Arc<dyn SectionSource + Send + Sync>>,
    /// Every virtual page this process has allocated, in allocation order.
    allocated: Vec<PageNumber>,
    /// Pages whose first population comes from the image rather than swap.
    /// Each descriptor is consumed exactly once.
    lazy: HashMap<PageNumber, LazyPage>,
    /// Hardware TLB contents as of the last context-switch out.
    shadow: Vec<TranslationEntry>,
    /// Deterministic source for random TLB-slot eviction, seeded from the
    /// pid so simulation runs are reproducible.
    rng: ChaCha8Rng,
}

impl VmProcess {
    /// Creates a controller for `pid` against the shared subsystem.
    pub fn new(pid: ProcessId, vm: Arc<Vm>) -> Self {
        let tlb_size = vm.processor().tlb_size();
        Self {
            pid,
            vm,
            image: None,
            allocated: Vec::new(),
            lazy: HashMap::new(),
            shadow: vec![TranslationEntry::INVALID; tlb_size],
            rng: ChaCha8Rng::seed_from_u64(u64::from(pid.as_u32())),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Number of virtual pages this process currently has allocated.
    pub fn page_count(&self) -> usize {
        self.allocated.len()
    }

    /// Registers the executable for demand paging: validates that sections
    /// are contiguous from page zero, records a lazy-load descriptor for
    /// every section page, and allocates the section and stack pages. No
    /// page content is loaded here; first access does that.
    ///
    /// On failure, any partially-created paging state is released before
    /// returning, per the load-time error contract.
    pub fn load_image(
        &mut self,
        image: Arc<dyn SectionSource + Send + Sync>,
        stack_pages: usize,
    ) -> Result<(), VmError> {
        // Validate geometry before creating any state.
        let mut next_page = PageNumber::new(0);
        for s in 0..image.section_count() {
            let info = image.section_info(s).ok_or(ImageError::NoSuchSection(s))?;
            if info.first_page != next_page {
                return Err(VmError::FragmentedImage);
            }
            next_page = next_page + info.page_count;
        }

        self.image = Some(Arc::clone(&image));
        for s in 0..image.section_count() {
            let info = image.section_info(s).ok_or(ImageError::NoSuchSection(s))?;
            for i in 0..info.page_count {
                self.lazy.insert(
                    info.first_page + i,
                    LazyPage {
                        section: s,
                        page_offset: i,
                    },
                );
            }
            if let Err(err) = self.allocate(info.first_page, info.page_count, info.read_only) {
                self.release_resources()?;
                return Err(err);
            }
        }

        if let Err(err) = self.allocate(next_page, stack_pages, false) {
            self.release_resources()?;
            return Err(err);
        }

        log::info!(
            "pid {}: image registered, {} pages ({} lazy)",
            self.pid,
            self.allocated.len(),
            self.lazy.len()
        );
        Ok(())
    }

    /// Allocates `count` virtual pages starting at `first`: one invalid
    /// table entry and one swap reservation per page. No physical frame is
    /// consumed until first access.
    pub fn allocate(
        &mut self,
        first: PageNumber,
        count: usize,
        read_only: bool,
    ) -> Result<(), VmError> {
        let vm = Arc::clone(&self.vm);
        let mut state = vm.lock();
        for i in 0..count {
            let vpn = first + i;
            let key = PageKey::new(self.pid, vpn);
            state
                .table
                .insert(key, TranslationEntry::unmapped(vpn, read_only))?;
            state.swap.reserve(key);
            self.allocated.push(vpn);
        }
        Ok(())
    }

    /// Handles a TLB miss on `vaddr`.
    ///
    /// Looks the page up in the inverted page table, makes it resident if
    /// necessary (acquiring a frame, evicting a victim when the pool is
    /// dry, then lazy-loading or swapping in), and installs the entry into
    /// a TLB slot. On success the caller retries the faulting access.
    ///
    /// A `ProtectionFault` means the address is outside every allocated
    /// region and the process should be terminated.
    pub fn handle_fault(&mut self, vaddr: usize) -> Result<(), VmError> {
        let vm = Arc::clone(&self.vm);
        let processor = Arc::clone(vm.processor());
        let mut state = vm.lock();

        let vpn = page_of(vaddr);
        let key = PageKey::new(self.pid, vpn);
        let mut entry = state
            .table
            .lookup(key)
            .ok_or(VmError::ProtectionFault(key))?;
        if !entry.valid {
            entry = self.populate(&mut state, &processor, key)?;
        }

        let slot = self.pick_tlb_slot(&processor);
        self.install_tlb_entry(&mut state, &processor, slot, entry)?;
        log::trace!("pid {}: fault on vpn {vpn} -> tlb slot {slot}", self.pid);
        Ok(())
    }

    /// Reads `buf.len()` bytes of this process's memory starting at
    /// `vaddr`, making every spanned page resident and marking it used.
    pub fn read_memory(&mut self, vaddr: usize, buf: &mut [u8]) -> Result<(), VmError> {
        let vm = Arc::clone(&self.vm);
        let processor = Arc::clone(vm.processor());
        let mut state = vm.lock();

        let mut copied = 0;
        while copied < buf.len() {
            let addr = vaddr + copied;
            let offset = page_offset(addr);
            let chunk = (PAGE_SIZE - offset).min(buf.len() - copied);
            let key = PageKey::new(self.pid, page_of(addr));
            let entry = self.touch(&mut state, &processor, key, false)?;
            processor.read_bytes(
                frame_address(entry.ppn, offset),
                &mut buf[copied..copied + chunk],
            );
            copied += chunk;
        }
        Ok(())
    }

    /// Writes `buf` into this process's memory starting at `vaddr`, making
    /// every spanned page resident and marking it used and dirty.
    pub fn write_memory(&mut self, vaddr: usize, buf: &[u8]) -> Result<(), VmError> {
        let vm = Arc::clone(&self.vm);
        let processor = Arc::clone(vm.processor());
        let mut state = vm.lock();

        let mut copied = 0;
        while copied < buf.len() {
            let addr = vaddr + copied;
            let offset = page_offset(addr);
            let chunk = (PAGE_SIZE - offset).min(buf.len() - copied);
            let key = PageKey::new(self.pid, page_of(addr));
            let entry = self.touch(&mut state, &processor, key, true)?;
            processor.write_bytes(
                frame_address(entry.ppn, offset),
                &buf[copied..copied + chunk],
            );
            copied += chunk;
        }
        Ok(())
    }

    /// Context-switch out: copies the hardware TLB into this process's
    /// shadow and writes every valid entry back to the inverted page table,
    /// since the TLB holds the freshest used/dirty bits.
    pub fn save_state(&mut self) -> Result<(), VmError> {
        let vm = Arc::clone(&self.vm);
        let processor = Arc::clone(vm.processor());
        let mut state = vm.lock();

        for slot in 0..processor.tlb_size() {
            let entry = processor.read_tlb_entry(slot);
            self.shadow[slot] = entry;
            if entry.valid {
                state
                    .table
                    .update(PageKey::new(self.pid, entry.vpn), entry)?;
            }
        }
        Ok(())
    }

    /// Context-switch in: rebuilds the hardware TLB from the shadow,
    /// re-validating each slot against the inverted page table. Pages
    /// evicted while this process was suspended come back as empty slots,
    /// so the TLB never resurrects a mapping to a reassigned frame.
    pub fn restore_state(&mut self) {
        let vm = Arc::clone(&self.vm);
        let processor = Arc::clone(vm.processor());
        let state = vm.lock();

        for (slot, saved) in self.shadow.iter().enumerate() {
            let entry = if saved.valid {
                match state.table.lookup(PageKey::new(self.pid, saved.vpn)) {
                    Some(current) if current.valid => current,
                    _ => TranslationEntry::INVALID,
                }
            } else {
                TranslationEntry::INVALID
            };
            processor.write_tlb_entry(slot, entry);
        }
    }

    /// Releases every resource this process holds: table entries, owned
    /// frames, swap reservations and slots, and pending lazy descriptors.
    /// Safe to call more than once and at any point in the process's life.
    pub fn release_resources(&mut self) -> Result<(), VmError> {
        let vm = Arc::clone(&self.vm);
        let processor = Arc::clone(vm.processor());
        let mut state = vm.lock();

        for vpn in self.allocated.drain(..) {
            let key = PageKey::new(self.pid, vpn);
            let entry = state.table.delete(key)?;
            if entry.valid {
                // Scrub any TLB slot still pointing at the frame before it
                // can be handed to another process.
                for slot in 0..processor.tlb_size() {
                    let tlb_entry = processor.read_tlb_entry(slot);
                    if tlb_entry.valid && tlb_entry.ppn == entry.ppn {
                        processor.write_tlb_entry(slot, TranslationEntry::INVALID);
                    }
                }
                state.frames.free(entry.ppn)?;
            }
            state.swap.release(key);
        }
        self.lazy.clear();
        self.image = None;
        log::info!("pid {}: resources released", self.pid);
        Ok(())
    }

    /// Makes the page at `key` resident: acquires a frame (evicting if the
    /// pool is dry), fills it from the image on first touch of a lazy page
    /// or from swap otherwise, and marks the table entry valid.
    ///
    /// A lazily-loaded page comes back dirty: its descriptor is consumed
    /// here and the image is never consulted for it again, so the first
    /// eviction must persist the content to swap.
    fn populate(
        &mut self,
        state: &mut VmState,
        processor: &Processor,
        key: PageKey,
    ) -> Result<TranslationEntry, VmError> {
        let prior = state.table.lookup(key).ok_or(VmError::MissingEntry(key))?;
        let frame = state.acquire_frame(processor)?;

        let mut page = [0u8; PAGE_SIZE];
        let mut entry = TranslationEntry::new(key.vpn, frame, prior.read_only);
        entry.used = true;

        let filled: Result<(), VmError> = match self.lazy.remove(&key.vpn) {
            Some(lazy) => {
                entry.dirty = true;
                log::debug!(
                    "pid {}: lazy load vpn {} from section {} page {}",
                    self.pid,
                    key.vpn,
                    lazy.section,
                    lazy.page_offset
                );
                match self.image.as_deref() {
                    Some(image) => image
                        .load_page(lazy.section, lazy.page_offset, &mut page)
                        .map_err(VmError::from),
                    None => Err(VmError::Image(ImageError::NoSuchSection(lazy.section))),
                }
            }
            None => state.swap.read(key, &mut page),
        };
        if let Err(err) = filled {
            state.frames.free(frame)?;
            return Err(err);
        }

        processor.write_frame(frame, &page);
        state.table.update(key, entry)?;
        Ok(entry)
    }

    /// Ensures residency for an explicit (non-trap) access and records the
    /// access bits in the table and any mirroring TLB slot.
    fn touch(
        &mut self,
        state: &mut VmState,
        processor: &Processor,
        key: PageKey,
        write: bool,
    ) -> Result<TranslationEntry, VmError> {
        let mut entry = state
            .table
            .lookup(key)
            .ok_or(VmError::ProtectionFault(key))?;
        if write && entry.read_only {
            return Err(VmError::ReadOnlyFault(key));
        }
        if !entry.valid {
            entry = self.populate(state, processor, key)?;
        }
        entry.used = true;
        if write {
            entry.dirty = true;
        }
        state.table.update(key, entry)?;

        // Keep a mirroring TLB slot in step, so a later context-switch save
        // does not clobber these bits with stale hardware state.
        for slot in 0..processor.tlb_size() {
            let tlb_entry = processor.read_tlb_entry(slot);
            if tlb_entry.valid && tlb_entry.vpn == entry.vpn && tlb_entry.ppn == entry.ppn {
                processor.write_tlb_entry(slot, entry);
                break;
            }
        }
        Ok(entry)
    }

    /// Picks the TLB slot to replace: any invalid slot first, otherwise a
    /// uniformly random one.
    fn pick_tlb_slot(&mut self, processor: &Processor) -> usize {
        for slot in 0..processor.tlb_size() {
            if !processor.read_tlb_entry(slot).valid {
                return slot;
            }
        }
        self.rng.next_u32() as usize % processor.tlb_size()
    }

    /// Installs `entry` into the given TLB slot, first writing a valid
    /// displaced entry back to the inverted page table.
    fn install_tlb_entry(
        &mut self,
        state: &mut VmState,
        processor: &Processor,
        slot: usize,
        entry: TranslationEntry,
    ) -> Result<(), VmError> {
        let displaced = processor.read_tlb_entry(slot);
        if displaced.valid {
            state
                .table
                .update(PageKey::new(self.pid, displaced.vpn), displaced)?;
        }
        processor.write_tlb_entry(slot, entry);
        Ok(())
    }
}
