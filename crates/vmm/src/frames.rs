//! The physical frame allocator.
//!
//! A plain free list over the processor's fixed frame pool. The allocator
//! has no eviction logic; when it runs dry the fault handler picks a victim,
//! evicts it, and retries.

use std::collections::VecDeque;

use machine::FrameNumber;

use crate::error::VmError;

pub struct FrameAllocator {
    free: VecDeque<FrameNumber>,
    is_free: Vec<bool>,
}

impl FrameAllocator {
    /// Creates an allocator with all `num_frames` frames free.
    pub fn new(num_frames: usize) -> Self {
        Self {
            free: (0..num_frames).map(FrameNumber::new).collect(),
            is_free: vec![true; num_frames],
        }
    }

    /// Hands out a free frame, or `None` when the pool is exhausted.
    pub fn allocate(&mut self) -> Option<FrameNumber> {
        let frame = self.free.pop_front()?;
        self.is_free[frame.as_usize()] = false;
        Some(frame)
    }

    /// Returns a frame to the pool. Freeing a frame that is already free,
    /// or that this allocator never owned, is a programming error.
    pub fn free(&mut self, frame: FrameNumber) -> Result<(), VmError> {
        match self.is_free.get(frame.as_usize()) {
            Some(false) => {
                self.is_free[frame.as_usize()] = true;
                self.free.push_back(frame);
                Ok(())
            }
            _ => Err(VmError::FrameNotAllocated(frame)),
        }
    }

    /// Total number of frames managed by this allocator.
    pub fn total_frames(&self) -> usize {
        self.is_free.len()
    }

    /// Number of frames currently free.
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_until_exhausted() {
        let mut frames = FrameAllocator::new(3);

        let mut seen = Vec::new();
        while let Some(frame) = frames.allocate() {
            seen.push(frame);
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(frames.free_frames(), 0);
        assert!(frames.allocate().is_none());
    }

    #[test]
    fn freed_frames_are_reused() {
        let mut frames = FrameAllocator::new(1);
        let frame = frames.allocate().unwrap();
        assert!(frames.allocate().is_none());

        frames.free(frame).unwrap();
        assert_eq!(frames.allocate(), Some(frame));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut frames = FrameAllocator::new(2);
        let frame = frames.allocate().unwrap();

        frames.free(frame).unwrap();
        let err = frames.free(frame).unwrap_err();
        assert!(matches!(err, VmError::FrameNotAllocated(f) if f == frame));
    }

    #[test]
    fn freeing_foreign_frame_is_rejected() {
        let mut frames = FrameAllocator::new(2);
        let err = frames.free(FrameNumber::new(7)).unwrap_err();
        assert!(matches!(err, VmError::FrameNotAllocated(_)));
    }

    #[test]
    fn conservation_across_churn() {
        let mut frames = FrameAllocator::new(4);
        let total = frames.total_frames();

        let a = frames.allocate().unwrap();
        let b = frames.allocate().unwrap();
        assert_eq!(frames.free_frames(), total - 2);

        frames.free(a).unwrap();
        let c = frames.allocate().unwrap();
        frames.free(b).unwrap();
        frames.free(c).unwrap();
        assert_eq!(frames.free_frames(), total);
    }
}
