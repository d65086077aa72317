//! Page and frame number types and address arithmetic.
//!
//! This module provides newtypes for physical frame numbers and virtual page
//! numbers, plus the address math the paging subsystem needs: splitting a
//! virtual address into its page number and in-page offset, and turning a
//! frame number back into a physical byte address.

use core::{
    fmt,
    ops::{Add, Sub},
};

/// Size of one page (and one frame) in bytes.
pub const PAGE_SIZE: usize = 1024;

/// Generates a page/frame number newtype.
///
/// Frame and page numbers share everything except their meaning, so one
/// macro stamps out the constructor, accessor, formatting, and offset
/// arithmetic for both.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Wraps a raw number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Unwraps to the raw number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frames are the physical counterpart of pages. Frame numbers are\n\
     zero-indexed and correspond to PAGE_SIZE-aligned physical addresses."
);

impl FrameNumber {
    /// Returns the physical byte address at the start of this frame.
    #[inline]
    pub const fn base(self) -> usize {
        self.0 * PAGE_SIZE
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual memory page number.\n\n\
     Page numbers are zero-indexed and correspond to PAGE_SIZE-aligned\n\
     virtual addresses within a process's address space."
);

impl PageNumber {
    /// Returns the virtual byte address at the start of this page.
    #[inline]
    pub const fn base(self) -> usize {
        self.0 * PAGE_SIZE
    }
}

/// Returns the virtual page containing the given virtual address.
#[inline]
pub const fn page_of(vaddr: usize) -> PageNumber {
    PageNumber::new(vaddr / PAGE_SIZE)
}

/// Returns the byte offset of the given address within its page.
#[inline]
pub const fn page_offset(vaddr: usize) -> usize {
    vaddr % PAGE_SIZE
}

/// Returns the physical byte address `offset` bytes into the given frame.
#[inline]
pub const fn frame_address(frame: FrameNumber, offset: usize) -> usize {
    frame.base() + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_of_splits_addresses() {
        assert_eq!(page_of(0), PageNumber::new(0));
        assert_eq!(page_of(PAGE_SIZE - 1), PageNumber::new(0));
        assert_eq!(page_of(PAGE_SIZE), PageNumber::new(1));
        assert_eq!(page_of(3 * PAGE_SIZE + 17), PageNumber::new(3));
    }

    #[test]
    fn page_offset_wraps_per_page() {
        assert_eq!(page_offset(0), 0);
        assert_eq!(page_offset(PAGE_SIZE + 17), 17);
        assert_eq!(page_offset(5 * PAGE_SIZE - 1), PAGE_SIZE - 1);
    }

    #[test]
    fn frame_address_round_trip() {
        let frame = FrameNumber::new(7);
        assert_eq!(frame_address(frame, 0), 7 * PAGE_SIZE);
        assert_eq!(frame_address(frame, 42), 7 * PAGE_SIZE + 42);
    }

    #[test]
    fn number_arithmetic() {
        let page = PageNumber::new(10);
        assert_eq!((page + 5).as_usize(), 15);
        assert_eq!((page - 3).as_usize(), 7);
        assert_eq!(page - PageNumber::new(4), 6);
    }

    #[test]
    fn display_is_bare_number() {
        assert_eq!(format!("{}", PageNumber::new(12)), "12");
        assert_eq!(format!("{:?}", FrameNumber::new(3)), "FrameNumber(3)");
    }
}
