//! # Altair VMM
//!
//! The demand-paging virtual-memory subsystem of the Altair teaching
//! kernel. Processes run against a software-visible TLB backed by a global
//! inverted page table; physical frames are shared across all processes and
//! reclaimed through a pluggable victim policy, with evicted pages written
//! back to a swap store.
//!
//! The crate splits along the same seams the subsystem does at runtime:
//!
//! - [`Vm`] holds the shared state (table, frame pool, swap, policy) behind
//!   one coarse lock.
//! - [`VmProcess`] is the per-process controller: fault handling, explicit
//!   memory access, lazy image loading, context-switch save/restore, and
//!   teardown.
//! - [`VictimPolicy`] is the replacement seam; [`ClockPolicy`] is the
//!   default.

mod error;
mod frames;
mod policy;
mod process;
mod swap;
mod table;
mod vm;

pub use error::VmError;
pub use frames::FrameAllocator;
pub use policy::{ClockPolicy, RotatingPolicy, VictimPolicy};
pub use process::VmProcess;
pub use swap::SwapManager;
pub use table::{InvertedPageTable, PageKey, ProcessId};
pub use vm::Vm;
