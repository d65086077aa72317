//! # Altair Machine
//!
//! Simulated hardware for the Altair teaching kernel. This crate provides
//! everything the virtual-memory subsystem treats as "the outside world":
//!
//! - A processor with flat physical memory, a software-visible TLB, and a
//!   fault-address register.
//! - Page/frame number types and address arithmetic.
//! - Backing stores for swapped-out pages (file-backed and in-memory).
//! - Executable images with page-granular, lazily-loadable sections.

mod addressing;
mod image;
mod processor;
mod store;

pub use addressing::{FrameNumber, PAGE_SIZE, PageNumber, frame_address, page_of, page_offset};
pub use image::{Image, ImageError, Section, SectionInfo, SectionSource};
pub use processor::{Processor, TranslationEntry};
pub use store::{BackingStore, FileStore, MemoryStore, StoreError};
