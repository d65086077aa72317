//! Error taxonomy for the VM subsystem.
//!
//! Three classes of failure leave this crate:
//!
//! - Per-process faults (`ProtectionFault`, `ReadOnlyFault`): the access was
//!   illegal; the caller should terminate the faulting process. Subsystem
//!   state is untouched.
//! - Fatal subsystem failures (`Store`, `NoVictim`, `ExhaustedAfterEviction`):
//!   page content integrity or a closed-system invariant can no longer be
//!   guaranteed.
//! - Programming-error faults (`DuplicateEntry`, `MissingEntry`,
//!   `FrameNotAllocated`, `UnreservedSwapKey`): an internal contract was
//!   violated. These are never absorbed silently.
//!
//! Transient conditions (frame exhaustion recovered by eviction, first-touch
//! reads of never-written pages) are handled internally and never surface.

use machine::{FrameNumber, ImageError, StoreError};
use thiserror::Error;

use crate::table::PageKey;

#[derive(Debug, Error)]
pub enum VmError {
    /// Access to a virtual page with no inverted-page-table entry.
    #[error("protection fault: no translation for {0}")]
    ProtectionFault(PageKey),

    /// Write access to a page mapped read-only.
    #[error("protection fault: write to read-only page {0}")]
    ReadOnlyFault(PageKey),

    /// Frames are exhausted and no valid entry exists to evict.
    #[error("no evictable page: frames exhausted with no resident entries")]
    NoVictim,

    /// Eviction freed a frame but allocation still failed.
    #[error("frame pool still exhausted after eviction")]
    ExhaustedAfterEviction,

    /// The backing store failed; page content integrity is lost.
    #[error("swap storage failure")]
    Store(#[from] StoreError),

    /// Executable sections are not contiguous from page zero.
    #[error("executable sections are not contiguous from page zero")]
    FragmentedImage,

    /// The executable image itself is malformed.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// An entry was inserted for a key that already exists.
    #[error("table entry for {0} already exists")]
    DuplicateEntry(PageKey),

    /// An entry was updated or deleted for a key that does not exist.
    #[error("no table entry for {0}")]
    MissingEntry(PageKey),

    /// A frame was freed that is not currently allocated.
    #[error("frame {0} is not allocated (double free?)")]
    FrameNotAllocated(FrameNumber),

    /// A swap write arrived for a key that was never reserved or bound.
    #[error("swap write for {0} without a reservation or bound slot")]
    UnreservedSwapKey(PageKey),
}
