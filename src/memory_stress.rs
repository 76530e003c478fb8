use std::alloc::{self, Layout};
use std::convert::Infallible;
use std::ptr::{self, NonNull};
use std::slice;
use std::thread;
use std::time::Duration;

use sysinfo::System;

use crate::error::WorkerError;
use crate::report::{Event, Reporter};
use crate::request::{Hang, VmParams};

/// Byte written at every touched offset.
pub const SENTINEL: u8 = b'Z';

const FOREVER_NAP: Duration = Duration::from_secs(1024);

/// A heap block owned by one memory worker. Freed on drop.
pub struct Block {
    ptr: NonNull<u8>,
    layout: Option<Layout>,
    len: usize,
}

impl Block {
    /// Reserve `bytes` of zeroed memory, or `None` if the allocator refuses.
    /// Pages are not committed until they are touched.
    pub fn allocate(bytes: usize) -> Option<Self> {
        if bytes == 0 {
            return Some(Self {
                ptr: NonNull::dangling(),
                layout: None,
                len: 0,
            });
        }
        let layout = Layout::array::<u8>(bytes).ok()?;
        // SAFETY: layout has a nonzero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(raw).map(|ptr| Self {
            ptr,
            layout: Some(layout),
            len: bytes,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write the sentinel at every `stride`-th byte, forcing the pages in.
    pub fn touch(&mut self, stride: usize) {
        for offset in (0..self.len).step_by(stride.max(1)) {
            // SAFETY: offset < len, and the block owns len bytes.
            unsafe { ptr::write_volatile(self.ptr.as_ptr().add(offset), SENTINEL) }
        }
    }

    /// Re-read every touched byte and report the first one that changed.
    pub fn verify(&self, stride: usize) -> Result<(), WorkerError> {
        for offset in (0..self.len).step_by(stride.max(1)) {
            // SAFETY: offset < len, and the block owns len bytes.
            let byte = unsafe { ptr::read_volatile(self.ptr.as_ptr().add(offset)) };
            if byte != SENTINEL {
                return Err(WorkerError::Corruption { offset });
            }
        }
        Ok(())
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the block owns len initialized (zeroed) bytes.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: ptr came from alloc_zeroed with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

/// The alloc / touch / hang / verify / free cycle of one memory worker.
pub struct MemoryHog<'a> {
    bytes: u64,
    stride: usize,
    hang: Hang,
    keep: bool,
    block: Option<Block>,
    reporter: &'a dyn Reporter,
}

impl<'a> MemoryHog<'a> {
    pub fn new(params: &VmParams, reporter: &'a dyn Reporter) -> Self {
        Self {
            bytes: params.bytes,
            stride: usize::try_from(params.stride).unwrap_or(usize::MAX),
            hang: params.hang,
            keep: params.keep,
            block: None,
            reporter,
        }
    }

    /// Whether a block survives between cycles.
    pub fn holds_block(&self) -> bool {
        self.block.is_some()
    }

    /// Run one cycle. With [`Hang::Forever`] this never returns.
    pub fn cycle(&mut self) -> Result<(), WorkerError> {
        let mut block = match self.block.take() {
            Some(block) => block,
            None => self.allocate()?,
        };

        self.reporter.report(Event::Touching {
            stride: self.stride as u64,
        });
        block.touch(self.stride);

        match self.hang {
            Hang::Forever => {
                self.reporter.report(Event::SleepingForever);
                loop {
                    thread::sleep(FOREVER_NAP);
                }
            }
            Hang::For(nap) => {
                self.reporter.report(Event::Sleeping {
                    secs: nap.as_secs(),
                });
                thread::sleep(nap);
            }
            Hang::Never => {}
        }

        block.verify(self.stride)?;

        if self.keep {
            self.block = Some(block);
        } else {
            drop(block);
            self.reporter.report(Event::Freed { bytes: self.bytes });
        }
        Ok(())
    }

    fn allocate(&self) -> Result<Block, WorkerError> {
        self.reporter.report(Event::Allocating { bytes: self.bytes });
        usize::try_from(self.bytes)
            .ok()
            .and_then(Block::allocate)
            .ok_or(WorkerError::Allocation { bytes: self.bytes })
    }
}

/// Churn memory until killed, or until allocation fails or corruption shows up.
pub fn stress_memory(params: &VmParams, reporter: &dyn Reporter) -> Result<Infallible, WorkerError> {
    let mut hog = MemoryHog::new(params, reporter);
    loop {
        hog.cycle()?;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total: u64,
    pub available: u64,
}

pub fn check_memory_usage() -> MemoryUsage {
    let mut sys = System::new();
    sys.refresh_memory();

    MemoryUsage {
        total: sys.total_memory(),
        available: sys.available_memory(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CollectingReporter;

    fn params(bytes: u64, stride: u64, keep: bool) -> VmParams {
        VmParams {
            bytes,
            stride,
            hang: Hang::Never,
            keep,
        }
    }

    #[test]
    fn touch_writes_sentinel_at_every_stride() {
        let mut block = Block::allocate(10_000).unwrap();
        block.touch(4096);

        let bytes = block.as_mut_slice();
        for offset in [0, 4096, 8192] {
            assert_eq!(bytes[offset], SENTINEL);
        }
        assert_eq!(bytes[1], 0);
        assert_eq!(bytes[9999], 0);
        assert!(block.verify(4096).is_ok());
    }

    #[test]
    fn verify_reports_corrupted_offset() {
        let mut block = Block::allocate(64).unwrap();
        block.touch(8);
        block.as_mut_slice()[24] = b'X';

        let err = block.verify(8).unwrap_err();
        assert!(matches!(err, WorkerError::Corruption { offset: 24 }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn corruption_between_touched_bytes_goes_unseen() {
        let mut block = Block::allocate(64).unwrap();
        block.touch(8);
        block.as_mut_slice()[25] = b'X';

        assert!(block.verify(8).is_ok());
    }

    #[test]
    fn stride_larger_than_block_touches_first_byte() {
        let mut block = Block::allocate(16).unwrap();
        block.touch(4096);
        assert_eq!(block.as_mut_slice()[0], SENTINEL);
    }

    #[test]
    fn empty_block_is_trivially_valid() {
        let mut block = Block::allocate(0).unwrap();
        block.touch(1);
        assert!(block.is_empty());
        assert!(block.verify(1).is_ok());
    }

    #[test]
    fn impossible_allocation_is_refused() {
        assert!(Block::allocate(1 << 62).is_none());
    }

    #[test]
    fn churns_block_when_not_keeping() {
        let reporter = CollectingReporter::new();
        let mut hog = MemoryHog::new(&params(8192, 512, false), &reporter);

        hog.cycle().unwrap();
        hog.cycle().unwrap();

        assert!(!hog.holds_block());
        assert_eq!(reporter.count(|e| matches!(e, Event::Allocating { .. })), 2);
        assert_eq!(reporter.count(|e| matches!(e, Event::Freed { .. })), 2);
    }

    #[test]
    fn keeps_block_across_cycles() {
        let reporter = CollectingReporter::new();
        let mut hog = MemoryHog::new(&params(8192, 512, true), &reporter);

        hog.cycle().unwrap();
        hog.cycle().unwrap();
        hog.cycle().unwrap();

        assert!(hog.holds_block());
        assert_eq!(reporter.count(|e| matches!(e, Event::Allocating { .. })), 1);
        assert_eq!(reporter.count(|e| matches!(e, Event::Touching { .. })), 3);
        assert_eq!(reporter.count(|e| matches!(e, Event::Freed { .. })), 0);
    }

    #[test]
    fn sleeps_for_positive_hang() {
        let reporter = CollectingReporter::new();
        let mut vm = params(4096, 1024, false);
        vm.hang = Hang::For(Duration::from_secs(1));
        let mut hog = MemoryHog::new(&vm, &reporter);

        let started = std::time::Instant::now();
        hog.cycle().unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(reporter.events().contains(&Event::Sleeping { secs: 1 }));
    }

    #[test]
    fn failed_allocation_ends_the_hog() {
        let reporter = CollectingReporter::new();
        let err = stress_memory(&params(1 << 62, 4096, false), &reporter).unwrap_err();
        assert!(matches!(err, WorkerError::Allocation { bytes } if bytes == 1 << 62));
    }

    #[test]
    fn reads_host_memory() {
        let usage = check_memory_usage();
        assert!(usage.total > 0);
    }
}
