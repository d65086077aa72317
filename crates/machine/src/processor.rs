//! The simulated processor: flat physical memory, a small TLB, and the
//! fault-address register.
//!
//! The processor is the hardware boundary of the paging subsystem. Address
//! translation consults only the TLB; a miss latches the faulting address
//! into the fault register and leaves it to the kernel's fault handler to
//! repair the TLB and retry. The processor never walks a page table.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::addressing::{FrameNumber, PAGE_SIZE, PageNumber, frame_address, page_of, page_offset};

/// A single virtual-to-physical translation, as held in the TLB.
///
/// `valid = false` means the slot (or mapping) carries no translation; the
/// remaining fields are then meaningless. The `used` and `dirty` bits are
/// maintained by the kernel, not by the simulated hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: PageNumber,
    pub ppn: FrameNumber,
    pub valid: bool,
    pub read_only: bool,
    pub used: bool,
    pub dirty: bool,
}

impl TranslationEntry {
    /// The empty translation used to scrub TLB slots.
    pub const INVALID: Self = Self {
        vpn: PageNumber::new(0),
        ppn: FrameNumber::new(0),
        valid: false,
        read_only: false,
        used: false,
        dirty: false,
    };

    /// Creates a valid translation with clear `used` and `dirty` bits.
    pub const fn new(vpn: PageNumber, ppn: FrameNumber, read_only: bool) -> Self {
        Self {
            vpn,
            ppn,
            valid: true,
            read_only,
            used: false,
            dirty: false,
        }
    }

    /// Creates an invalid translation that remembers its page number and
    /// protection, for pages that are known but not resident.
    pub const fn unmapped(vpn: PageNumber, read_only: bool) -> Self {
        Self {
            vpn,
            ppn: FrameNumber::new(0),
            valid: false,
            read_only,
            used: false,
            dirty: false,
        }
    }
}

impl Default for TranslationEntry {
    fn default() -> Self {
        Self::INVALID
    }
}

/// The simulated processor.
///
/// Owns `num_frames * PAGE_SIZE` bytes of flat physical memory and a TLB of
/// `tlb_size` entries. All state is behind interior mutability so that many
/// process threads can share one processor through an `Arc`.
pub struct Processor {
    memory: Mutex<Box<[u8]>>,
    tlb: Mutex<Box<[TranslationEntry]>>,
    fault_address: AtomicUsize,
    num_frames: usize,
}

impl Processor {
    /// Creates a processor with the given physical memory and TLB capacity.
    pub fn new(num_frames: usize, tlb_size: usize) -> Self {
        Self {
            memory: Mutex::new(vec![0u8; num_frames * PAGE_SIZE].into_boxed_slice()),
            tlb: Mutex::new(vec![TranslationEntry::INVALID; tlb_size].into_boxed_slice()),
            fault_address: AtomicUsize::new(0),
            num_frames,
        }
    }

    /// Returns the number of physical frames this processor has.
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Returns the number of TLB slots.
    pub fn tlb_size(&self) -> usize {
        self.tlb.lock().len()
    }

    /// Reads the TLB entry in the given slot.
    ///
    /// # Panics
    /// Panics if `slot` is out of range, which indicates a kernel bug.
    pub fn read_tlb_entry(&self, slot: usize) -> TranslationEntry {
        self.tlb.lock()[slot]
    }

    /// Writes the TLB entry in the given slot.
    ///
    /// # Panics
    /// Panics if `slot` is out of range, which indicates a kernel bug.
    pub fn write_tlb_entry(&self, slot: usize, entry: TranslationEntry) {
        self.tlb.lock()[slot] = entry;
    }

    /// Translates a virtual address through the TLB.
    ///
    /// Returns the physical address on a hit. On a miss, latches the address
    /// into the fault register and returns `None`; the caller is expected to
    /// run the kernel's fault handler and retry.
    pub fn translate(&self, vaddr: usize) -> Option<usize> {
        let vpn = page_of(vaddr);
        {
            let tlb = self.tlb.lock();
            for entry in tlb.iter() {
                if entry.valid && entry.vpn == vpn {
                    return Some(frame_address(entry.ppn, page_offset(vaddr)));
                }
            }
        }
        self.fault_address.store(vaddr, Ordering::Release);
        log::trace!("tlb miss on vaddr {vaddr:#x} (vpn {vpn}), fault latched");
        None
    }

    /// Returns the most recently latched faulting virtual address.
    pub fn fault_address(&self) -> usize {
        self.fault_address.load(Ordering::Acquire)
    }

    /// Copies one frame of physical memory into `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is not exactly one page or the frame is out of range.
    pub fn read_frame(&self, frame: FrameNumber, buf: &mut [u8]) {
        assert_eq!(buf.len(), PAGE_SIZE, "frame reads are whole pages");
        let memory = self.memory.lock();
        let base = frame.base();
        buf.copy_from_slice(&memory[base..base + PAGE_SIZE]);
    }

    /// Overwrites one frame of physical memory from `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is not exactly one page or the frame is out of range.
    pub fn write_frame(&self, frame: FrameNumber, buf: &[u8]) {
        assert_eq!(buf.len(), PAGE_SIZE, "frame writes are whole pages");
        let mut memory = self.memory.lock();
        let base = frame.base();
        memory[base..base + PAGE_SIZE].copy_from_slice(buf);
    }

    /// Copies bytes out of physical memory starting at `paddr`.
    ///
    /// # Panics
    /// Panics if the range falls outside physical memory.
    pub fn read_bytes(&self, paddr: usize, buf: &mut [u8]) {
        let memory = self.memory.lock();
        buf.copy_from_slice(&memory[paddr..paddr + buf.len()]);
    }

    /// Copies bytes into physical memory starting at `paddr`.
    ///
    /// # Panics
    /// Panics if the range falls outside physical memory.
    pub fn write_bytes(&self, paddr: usize, buf: &[u8]) {
        let mut memory = self.memory.lock();
        memory[paddr..paddr + buf.len()].copy_from_slice(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tlb_is_invalid() {
        let processor = Processor::new(4, 4);
        for slot in 0..processor.tlb_size() {
            assert!(!processor.read_tlb_entry(slot).valid);
        }
    }

    #[test]
    fn translate_hits_valid_entry() {
        let processor = Processor::new(4, 4);
        let entry = TranslationEntry::new(PageNumber::new(2), FrameNumber::new(1), false);
        processor.write_tlb_entry(0, entry);

        let paddr = processor.translate(2 * PAGE_SIZE + 10);
        assert_eq!(paddr, Some(PAGE_SIZE + 10));
    }

    #[test]
    fn translate_miss_latches_fault_address() {
        let processor = Processor::new(4, 4);
        let vaddr = 3 * PAGE_SIZE + 7;

        assert_eq!(processor.translate(vaddr), None);
        assert_eq!(processor.fault_address(), vaddr);
    }

    #[test]
    fn invalid_entries_do_not_translate() {
        let processor = Processor::new(4, 4);
        let mut entry = TranslationEntry::new(PageNumber::new(0), FrameNumber::new(0), false);
        entry.valid = false;
        processor.write_tlb_entry(0, entry);

        assert_eq!(processor.translate(0), None);
    }

    #[test]
    fn frame_copies_round_trip() {
        let processor = Processor::new(2, 4);
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;

        processor.write_frame(FrameNumber::new(1), &page);

        let mut back = [0u8; PAGE_SIZE];
        processor.read_frame(FrameNumber::new(1), &mut back);
        assert_eq!(page, back);

        // Frame 0 stays untouched.
        processor.read_frame(FrameNumber::new(0), &mut back);
        assert_eq!(back, [0u8; PAGE_SIZE]);
    }

    #[test]
    fn byte_copies_cross_frame_boundaries() {
        let processor = Processor::new(2, 4);
        let data = [1u8, 2, 3, 4];
        processor.write_bytes(PAGE_SIZE - 2, &data);

        let mut back = [0u8; 4];
        processor.read_bytes(PAGE_SIZE - 2, &mut back);
        assert_eq!(back, data);
    }
}
