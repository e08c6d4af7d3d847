//! Bump (arena) allocator.
//!
//! Linear allocation over a caller buffer with a single level of undo: only
//! the start of the most recent allocation is remembered.
//!
//! ```text
//!   buf ┌────┬───┬──────┬──────┬─────────────────────┐
//!       │ A1 │pad│  A2  │  A3  │        free         │
//!       └────┴───┴──────┴──────┴─────────────────────┘
//!                       ▲      ▲
//!                  prev_offset curr_offset
//! ```

use std::fmt;

use crate::align::align_pointer;
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::log::{LifecycleLog, LogLevel, LogRecord};

/// Bump allocator with one-level undo.
pub struct Arena<'a> {
    buf: &'a mut [u8],
    curr_offset: usize,
    prev_offset: usize,
    align: usize,
    log: LifecycleLog,
}

impl<'a> Arena<'a> {
    /// Creates an arena over `buf` with configuration from the environment.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self::with_config(buf, &AllocatorConfig::from_env())
    }

    pub fn with_config(buf: &'a mut [u8], config: &AllocatorConfig) -> Self {
        Self {
            buf,
            curr_offset: 0,
            prev_offset: 0,
            align: config.align,
            log: LifecycleLog::new("arena", config.log_level, config.failure_policy),
        }
    }

    fn base(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    /// Allocates `size` zeroed bytes at the default alignment.
    pub fn alloc(&mut self, size: usize) -> Result<usize, AllocError> {
        self.alloc_aligned(size, self.align)
    }

    /// Allocates `size` zeroed bytes whose address is a multiple of `align`.
    ///
    /// Returns the offset of the allocation inside the buffer.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<usize, AllocError> {
        let base = self.base();
        let offset = match align_pointer(base + self.curr_offset, align) {
            Ok(ptr) => ptr - base,
            Err(err) => return Err(self.log.reject("alloc", err, None, Some(size))),
        };
        let capacity = self.buf.len();
        let end = match offset.checked_add(size) {
            Some(end) if end <= capacity => end,
            _ => {
                let err = AllocError::OutOfBounds {
                    offset,
                    requested: size,
                    capacity,
                };
                return Err(self.log.reject("alloc", err, Some(offset), Some(size)));
            }
        };

        self.prev_offset = offset;
        self.curr_offset = end;
        self.buf[offset..end].fill(0);
        self.log.record(
            LogLevel::Trace,
            "alloc",
            "alloc",
            Some(offset),
            Some(size),
            "success",
            format_args!("align={align} curr_offset={end}"),
        );
        Ok(offset)
    }

    /// Resizes an allocation at the default alignment.
    pub fn resize_last(
        &mut self,
        offset: Option<usize>,
        old_size: usize,
        new_size: usize,
    ) -> Result<usize, AllocError> {
        self.resize_last_aligned(offset, old_size, new_size, self.align)
    }

    /// Resizes an allocation.
    ///
    /// `None` allocates a fresh block. The most recent allocation is resized in
    /// place; any other is copied into a fresh block, leaving the old bytes
    /// unreachable until [`reset`](Self::reset). Returns the resulting offset.
    pub fn resize_last_aligned(
        &mut self,
        offset: Option<usize>,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Result<usize, AllocError> {
        let Some(offset) = offset else {
            return self.alloc_aligned(new_size, align);
        };

        let capacity = self.buf.len();
        if offset > capacity {
            let err = AllocError::ResizeOutOfBounds { offset, capacity };
            return Err(self.log.reject("resize", err, Some(offset), Some(new_size)));
        }

        if offset == self.prev_offset {
            let end = match offset.checked_add(new_size) {
                Some(end) if end <= capacity => end,
                _ => {
                    let err = AllocError::OutOfBounds {
                        offset,
                        requested: new_size,
                        capacity,
                    };
                    return Err(self.log.reject("resize", err, Some(offset), Some(new_size)));
                }
            };
            if new_size > old_size {
                self.buf[offset + old_size..end].fill(0);
            }
            self.curr_offset = end;
            self.log.record(
                LogLevel::Trace,
                "resize",
                "resize_in_place",
                Some(offset),
                Some(new_size),
                "success",
                format_args!("old_size={old_size}"),
            );
            return Ok(offset);
        }

        let keep = old_size.min(new_size);
        if offset.checked_add(keep).is_none_or(|end| end > capacity) {
            let err = AllocError::ResizeOutOfBounds { offset, capacity };
            return Err(self.log.reject("resize", err, Some(offset), Some(new_size)));
        }
        let moved = self.alloc_aligned(new_size, align)?;
        self.buf.copy_within(offset..offset + keep, moved);
        self.log.record(
            LogLevel::Debug,
            "resize",
            "resize_move",
            Some(moved),
            Some(new_size),
            "success",
            format_args!("old_offset={offset} old_size={old_size}"),
        );
        Ok(moved)
    }

    /// Undoes the most recent allocation.
    ///
    /// Only one level of history exists; a second call without an intervening
    /// allocation leaves the arena unchanged.
    pub fn pop(&mut self) {
        self.curr_offset = self.prev_offset;
        self.log.record(
            LogLevel::Trace,
            "pop",
            "pop",
            Some(self.prev_offset),
            None,
            "success",
            "",
        );
    }

    /// Forgets every allocation. Memory is not zeroed.
    pub fn reset(&mut self) {
        self.curr_offset = 0;
        self.prev_offset = 0;
        self.log
            .record(LogLevel::Debug, "reset", "reset", None, None, "success", "");
    }

    /// Zeroes the whole backing buffer.
    pub fn zero(&mut self) {
        self.buf.fill(0);
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn curr_offset(&self) -> usize {
        self.curr_offset
    }

    #[must_use]
    pub fn prev_offset(&self) -> usize {
        self.prev_offset
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.curr_offset
    }

    /// Borrows `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], AllocError> {
        let capacity = self.buf.len();
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or(AllocError::ForeignOffset { offset, capacity })
    }

    /// Mutably borrows `len` bytes starting at `offset`.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], AllocError> {
        let capacity = self.buf.len();
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get_mut(offset..end))
            .ok_or(AllocError::ForeignOffset { offset, capacity })
    }

    pub fn lifecycle_logs(&self) -> &[LogRecord] {
        self.log.records()
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<LogRecord> {
        self.log.drain()
    }

    pub fn log_mut(&mut self) -> &mut LifecycleLog {
        &mut self.log
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.buf.len())
            .field("curr_offset", &self.curr_offset)
            .field("prev_offset", &self.prev_offset)
            .field("align", &self.align)
            .finish_non_exhaustive()
    }
}
