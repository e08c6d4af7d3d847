//! LIFO (stack) allocator.
//!
//! Every allocation is preceded by a two-word header: the offset of the
//! previous header and the allocator offset before the allocation was made.
//! The header chain, rooted at the current top, is the only record of
//! allocation history, so any number of allocations can be unwound in
//! reverse order.
//!
//! ```text
//!   ┌─────┬────────┬───────────┬─────┬────────┬───────────┬──────────┐
//!   │ pad │ header │ payload 1 │ pad │ header │ payload 2 │   free   │
//!   └─────┴────────┴───────────┴─────┴───┬────┴───────────┴──────────┘
//!            ▲                           │
//!            └──────── prev link ────────┘ (top)
//! ```

use std::fmt;

use crate::align::align_with_header;
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::header::{WORD, encode, link, read_word, write_word};
use crate::log::{LifecycleLog, LogLevel, LogRecord};

/// Size of the header stored in front of each payload.
pub const HEADER_SIZE: usize = 2 * WORD;

/// Linear allocator with multi-level LIFO undo.
pub struct Stack<'a> {
    buf: &'a mut [u8],
    curr_offset: usize,
    curr_header: Option<usize>,
    align: usize,
    log: LifecycleLog,
}

impl<'a> Stack<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self::with_config(buf, &AllocatorConfig::from_env())
    }

    pub fn with_config(buf: &'a mut [u8], config: &AllocatorConfig) -> Self {
        Self {
            buf,
            curr_offset: 0,
            curr_header: None,
            align: config.align,
            log: LifecycleLog::new("stack", config.log_level, config.failure_policy),
        }
    }

    fn base(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    pub fn alloc(&mut self, size: usize) -> Result<usize, AllocError> {
        self.alloc_aligned(size, self.align)
    }

    /// Allocates `size` zeroed bytes at `align`, with a header in front.
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<usize, AllocError> {
        let base = self.base();
        let payload = match align_with_header(base + self.curr_offset, align, HEADER_SIZE) {
            Ok(ptr) => ptr - base,
            Err(err) => return Err(self.log.reject("alloc", err, None, Some(size))),
        };
        let capacity = self.buf.len();
        let end = match payload.checked_add(size) {
            Some(end) if end <= capacity => end,
            _ => {
                let err = AllocError::OutOfBounds {
                    offset: payload,
                    requested: size,
                    capacity,
                };
                return Err(self.log.reject("alloc", err, Some(payload), Some(size)));
            }
        };

        let header = payload - HEADER_SIZE;
        self.write_header(header, self.curr_header, self.curr_offset)?;
        self.curr_header = Some(header);
        self.curr_offset = end;
        self.buf[payload..end].fill(0);
        self.log.record(
            LogLevel::Trace,
            "alloc",
            "alloc",
            Some(payload),
            Some(size),
            "success",
            format_args!("header={header} curr_offset={end}"),
        );
        Ok(payload)
    }

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
    /// Only the top allocation can change size in place; any other is copied
    /// into a fresh allocation pushed on top. `None` allocates.
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

        if self.top() == Some(offset) {
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

    /// Releases the top allocation.
    ///
    /// Returns `false` (and logs a warning) when there is nothing to pop.
    pub fn pop(&mut self) -> Result<bool, AllocError> {
        let Some(header) = self.curr_header else {
            self.log.record(
                LogLevel::Warn,
                "pop",
                "pop_empty",
                None,
                None,
                "noop",
                "no allocation to pop",
            );
            return Ok(false);
        };
        let (prev, restored) = match self.read_header(header) {
            Some(fields) => fields,
            None => {
                let err = AllocError::CorruptHeader { offset: header };
                return Err(self.log.reject("pop", err, Some(header), None));
            }
        };
        self.curr_header = prev;
        self.curr_offset = restored;
        self.log.record(
            LogLevel::Trace,
            "pop",
            "pop",
            Some(header + HEADER_SIZE),
            None,
            "success",
            format_args!("curr_offset={restored}"),
        );
        Ok(true)
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.curr_header = None;
        self.curr_offset = 0;
        self.log
            .record(LogLevel::Debug, "reset", "reset", None, None, "success", "");
    }

    fn write_header(
        &mut self,
        header: usize,
        prev: Option<usize>,
        restored: usize,
    ) -> Result<(), AllocError> {
        let written = write_word(self.buf, header, encode(prev))
            .and_then(|()| write_word(self.buf, header + WORD, restored));
        if written.is_some() {
            return Ok(());
        }
        let err = AllocError::CorruptHeader { offset: header };
        Err(self.log.reject("alloc", err, Some(header), None))
    }

    /// Header fields: previous header link and the offset to restore.
    fn read_header(&self, header: usize) -> Option<(Option<usize>, usize)> {
        let prev = link(read_word(self.buf, header)?);
        let restored = read_word(self.buf, header + WORD)?;
        // Links only ever point backwards; anything else is a clobbered header.
        if prev.is_some_and(|p| p >= header) || restored > header {
            return None;
        }
        Some((prev, restored))
    }

    /// Offset of the top allocation's payload.
    #[must_use]
    pub fn top(&self) -> Option<usize> {
        self.curr_header.map(|h| h + HEADER_SIZE)
    }

    /// Number of live allocations, found by walking the header chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.curr_header;
        while let Some(header) = current {
            depth += 1;
            current = self.read_header(header).and_then(|(prev, _)| prev);
        }
        depth
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn curr_offset(&self) -> usize {
        self.curr_offset
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], AllocError> {
        let capacity = self.buf.len();
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or(AllocError::ForeignOffset { offset, capacity })
    }

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

impl fmt::Debug for Stack<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("capacity", &self.buf.len())
            .field("curr_offset", &self.curr_offset)
            .field("curr_header", &self.curr_header)
            .field("align", &self.align)
            .finish_non_exhaustive()
    }
}
