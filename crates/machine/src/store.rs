//! Backing stores for swapped-out pages.
//!
//! A backing store is a flat byte array addressed by absolute offset. The
//! swap-space manager layers its slot table on top of this; the store itself
//! knows nothing about pages, slots, or processes. Short reads and writes
//! are hard errors here: page content integrity cannot survive partial I/O.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

/// Errors raised by backing stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying I/O operation failed outright.
    #[error("backing store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Fewer bytes than requested could be read.
    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },
    /// Fewer bytes than requested could be written.
    #[error("short write at offset {offset}: wanted {wanted} bytes, wrote {wrote}")]
    ShortWrite {
        offset: u64,
        wanted: usize,
        wrote: usize,
    },
}

/// Fixed-offset byte storage for evicted pages.
pub trait BackingStore: Send {
    /// Fills `buf` from the store starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Writes all of `buf` to the store starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StoreError>;
}

/// A backing store on a real file, opened or created once and kept open for
/// the life of the subsystem.
pub struct FileStore {
    file: File,
}

impl FileStore {
    /// Opens the named file for read/write, creating it if necessary.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

impl BackingStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut got = 0;
        while got < buf.len() {
            let n = self.file.read(&mut buf[got..])?;
            if n == 0 {
                log::warn!(
                    "short read at offset {offset}: {got} of {} bytes",
                    buf.len()
                );
                return Err(StoreError::ShortRead {
                    offset,
                    wanted: buf.len(),
                    got,
                });
            }
            got += n;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut wrote = 0;
        while wrote < buf.len() {
            let n = self.file.write(&buf[wrote..])?;
            if n == 0 {
                log::warn!(
                    "short write at offset {offset}: {wrote} of {} bytes",
                    buf.len()
                );
                return Err(StoreError::ShortWrite {
                    offset,
                    wanted: buf.len(),
                    wrote,
                });
            }
            wrote += n;
        }
        self.file.flush()?;
        Ok(())
    }
}

/// An in-memory backing store, for tests and hosted simulation runs that
/// should not touch the filesystem.
#[derive(Default)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current extent of the store in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl BackingStore for MemoryStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StoreError> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            let got = self.data.len().saturating_sub(start);
            log::warn!(
                "short read at offset {offset}: {got} of {} bytes",
                buf.len()
            );
            return Err(StoreError::ShortRead {
                offset,
                wanted: buf.len(),
                got,
            });
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StoreError> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        store.write_at(8, b"paging").unwrap();

        let mut back = [0u8; 6];
        store.read_at(8, &mut back).unwrap();
        assert_eq!(&back, b"paging");
    }

    #[test]
    fn memory_store_grows_on_write() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());

        store.write_at(100, &[1, 2, 3]).unwrap();
        assert_eq!(store.len(), 103);
    }

    #[test]
    fn memory_store_read_past_end_is_short() {
        let mut store = MemoryStore::new();
        store.write_at(0, &[9; 4]).unwrap();

        let mut buf = [0u8; 8];
        let err = store.read_at(0, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ShortRead {
                wanted: 8,
                got: 4,
                ..
            }
        ));
    }

    #[test]
    fn file_store_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "altair-store-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut store = FileStore::open(&path).unwrap();

        store.write_at(2048, &[7u8; 32]).unwrap();
        let mut back = [0u8; 32];
        store.read_at(2048, &mut back).unwrap();
        assert_eq!(back, [7u8; 32]);

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn file_store_read_past_end_is_short() {
        let path = std::env::temp_dir().join(format!(
            "altair-store-short-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut store = FileStore::open(&path).unwrap();

        let mut buf = [0u8; 16];
        let err = store.read_at(0, &mut buf).unwrap_err();
        assert!(matches!(err, StoreError::ShortRead { got: 0, .. }));

        drop(store);
        let _ = std::fs::remove_file(&path);
    }
}
