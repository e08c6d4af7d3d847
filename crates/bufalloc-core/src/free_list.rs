//! General-purpose free-list allocator.
//!
//! Every block, free or occupied, starts with a `{next, block_size}` header
//! padded to the allocator alignment. Headers are chained through `next` in
//! ascending address order; a `block_size` of zero marks an occupied block.
//! The span of a block (bytes between its header and the next header, or the
//! end of the region) is therefore always recoverable from the chain, and a
//! free block's `block_size` always equals its span.
//!
//! ```text
//!   start                                                     end
//!   ┌────────┬──────────┬────────┬──────────┬────────┬─────────┐
//!   │ hdr  0 │ payload  │ hdr 40 │  free    │ hdr  0 │ payload │
//!   └───┬────┴──────────┴───▲┬───┴──────────┴───▲────┴─────────┘
//!       └───── next ────────┘└────── next ──────┘
//! ```
//!
//! Release restores the block to its full span, merges it with a free
//! successor, then with a free predecessor found by walking the chain, so no
//! two adjacent blocks are ever both free.

use std::fmt;

use crate::align::{align_pointer, align_size};
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::header::{WORD, encode, link, read_word, write_word};
use crate::log::{LifecycleLog, LogLevel, LogRecord};

/// Free-block selection strategy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// First block in address order that is large enough.
    #[default]
    FirstFit,
    /// Smallest block that is large enough; ties go to the lowest address.
    BestFit,
}

impl Placement {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstFit => "first_fit",
            Self::BestFit => "best_fit",
        }
    }
}

/// Snapshot of one block in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub header_offset: usize,
    pub payload_offset: usize,
    /// Usable bytes between the header and the next block.
    pub span: usize,
    pub free: bool,
}

#[derive(Debug, Clone, Copy)]
struct RawBlock {
    header: usize,
    next: Option<usize>,
    /// Stored size word: zero when occupied, otherwise the span.
    size: usize,
    span: usize,
}

/// Iterator over the header chain. Yields `Err(header)` once on the first
/// header that is unreadable or inconsistent, then stops.
struct Chain<'b> {
    buf: &'b [u8],
    end: usize,
    header_size: usize,
    current: Option<usize>,
}

impl Iterator for Chain<'_> {
    type Item = Result<RawBlock, usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.current.take()?;
        let payload = header + self.header_size;
        let decoded = read_word(self.buf, header)
            .zip(read_word(self.buf, header + WORD))
            .map(|(next, size)| (link(next), size));
        let Some((next, size)) = decoded else {
            return Some(Err(header));
        };
        let limit = match next {
            Some(n)
                if n >= payload
                    && n.checked_add(self.header_size).is_some_and(|e| e <= self.end) =>
            {
                n
            }
            None if payload <= self.end => self.end,
            _ => return Some(Err(header)),
        };
        let span = limit - payload;
        if size != 0 && size != span {
            return Some(Err(header));
        }
        self.current = next;
        Some(Ok(RawBlock {
            header,
            next,
            size,
            span,
        }))
    }
}

/// Variable-size block allocator with coalescing.
pub struct FreeList<'a> {
    buf: &'a mut [u8],
    /// Aligned offset of the first header.
    start: usize,
    /// Bytes in the managed region, a multiple of `align`.
    size: usize,
    align: usize,
    header_size: usize,
    log: LifecycleLog,
}

impl<'a> FreeList<'a> {
    pub fn new(buf: &'a mut [u8]) -> Result<Self, AllocError> {
        Self::with_config(buf, &AllocatorConfig::from_env())
    }

    pub fn with_config(buf: &'a mut [u8], config: &AllocatorConfig) -> Result<Self, AllocError> {
        let mut log = LifecycleLog::new("free_list", config.log_level, config.failure_policy);
        let align = config.align;
        let base = buf.as_ptr() as usize;
        let start = align_pointer(base, align)
            .map(|ptr| ptr - base)
            .map_err(|err| log.reject("init", err, None, None))?;
        let header_size =
            align_size(2 * WORD, align).map_err(|err| log.reject("init", err, None, None))?;
        let usable = buf.len().saturating_sub(start);
        let size = usable - usable % align;
        let needed = header_size + align;
        if size < needed {
            let err = AllocError::BufferTooSmall {
                size: buf.len(),
                needed: start + needed,
            };
            return Err(log.reject("init", err, None, Some(buf.len())));
        }

        let mut list = Self {
            buf,
            start,
            size,
            align,
            header_size,
            log,
        };
        list.free_all();
        list.log.record(
            LogLevel::Info,
            "init",
            "init",
            Some(start),
            Some(size),
            "success",
            format_args!("header_size={header_size} align={align}"),
        );
        Ok(list)
    }

    fn end(&self) -> usize {
        self.start + self.size
    }

    fn chain(&self) -> Chain<'_> {
        Chain {
            buf: &self.buf[..],
            end: self.end(),
            header_size: self.header_size,
            current: Some(self.start),
        }
    }

    fn write_header(
        &mut self,
        symbol: &'static str,
        header: usize,
        next: Option<usize>,
        size: usize,
    ) -> Result<(), AllocError> {
        let written = write_word(self.buf, header, encode(next))
            .and_then(|()| write_word(self.buf, header + WORD, size));
        match written {
            Some(()) => Ok(()),
            None => Err(self.corrupt(symbol, header)),
        }
    }

    fn corrupt(&mut self, symbol: &'static str, header: usize) -> AllocError {
        self.log
            .reject(symbol, AllocError::CorruptHeader { offset: header }, Some(header), None)
    }

    /// Allocates `size` zeroed bytes (zero is treated as one) and returns the
    /// payload offset.
    pub fn alloc(&mut self, size: usize, placement: Placement) -> Result<usize, AllocError> {
        let request = align_size(size.max(1), self.align)
            .map_err(|err| self.log.reject("alloc", err, None, Some(size)))?;

        let mut chosen: Option<RawBlock> = None;
        let mut failed = None;
        for block in self.chain() {
            let block = match block {
                Ok(block) => block,
                Err(header) => {
                    failed = Some(header);
                    break;
                }
            };
            if block.size < request {
                continue;
            }
            match placement {
                Placement::FirstFit => {
                    chosen = Some(block);
                    break;
                }
                Placement::BestFit => {
                    if chosen.is_none_or(|best| block.size < best.size) {
                        chosen = Some(block);
                    }
                }
            }
        }
        if let Some(header) = failed {
            return Err(self.corrupt("alloc", header));
        }
        let Some(block) = chosen else {
            let err = AllocError::Exhausted { requested: request };
            return Err(self.log.reject("alloc", err, None, Some(size)));
        };

        let payload = block.header + self.header_size;
        let leftover = block.size - request;
        let granted = if leftover >= self.header_size + self.align {
            let split = payload + request;
            self.write_header("alloc", split, block.next, leftover - self.header_size)?;
            self.write_header("alloc", block.header, Some(split), 0)?;
            request
        } else {
            self.write_header("alloc", block.header, block.next, 0)?;
            block.size
        };
        self.buf[payload..payload + granted].fill(0);
        self.log.record(
            LogLevel::Trace,
            "alloc",
            "alloc",
            Some(payload),
            Some(granted),
            "success",
            placement.as_str(),
        );
        Ok(payload)
    }

    /// Releases the block whose payload starts at `offset`.
    ///
    /// `size` is the caller's view of the allocation; it may be smaller than
    /// the block span (alignment and absorbed remainders) but never larger.
    pub fn free(&mut self, offset: usize, size: usize) -> Result<(), AllocError> {
        if offset < self.start + self.header_size || offset >= self.end() {
            let err = AllocError::ForeignOffset {
                offset,
                capacity: self.end(),
            };
            return Err(self.log.reject("free", err, Some(offset), Some(size)));
        }

        let mut prev: Option<RawBlock> = None;
        let mut target: Option<RawBlock> = None;
        let mut failed = None;
        for block in self.chain() {
            let block = match block {
                Ok(block) => block,
                Err(header) => {
                    failed = Some(header);
                    break;
                }
            };
            let payload = block.header + self.header_size;
            if payload == offset {
                target = Some(block);
                break;
            }
            if payload > offset {
                break;
            }
            prev = Some(block);
        }
        if let Some(header) = failed {
            return Err(self.corrupt("free", header));
        }
        let Some(block) = target else {
            let err = AllocError::UnknownAllocation { offset };
            return Err(self.log.reject("free", err, Some(offset), Some(size)));
        };
        if block.size != 0 {
            let err = AllocError::DoubleFree { offset };
            return Err(self.log.reject("free", err, Some(offset), Some(size)));
        }
        if size > block.span {
            let err = AllocError::SizeMismatch {
                offset,
                size,
                span: block.span,
            };
            return Err(self.log.reject("free", err, Some(offset), Some(size)));
        }

        let mut header = block.header;
        let mut next = block.next;
        let mut free_size = block.span;

        let successor = next.map(|n| {
            let mut chain = self.chain();
            chain.current = Some(n);
            chain.next()
        });
        match successor {
            Some(Some(Ok(succ))) if succ.size != 0 => {
                free_size += self.header_size + succ.size;
                next = succ.next;
                self.log.record(
                    LogLevel::Debug,
                    "free",
                    "coalesce",
                    Some(succ.header),
                    Some(free_size),
                    "forward",
                    "",
                );
            }
            Some(Some(Err(h))) => return Err(self.corrupt("free", h)),
            _ => {}
        }

        if let Some(pred) = prev.filter(|p| p.size != 0) {
            header = pred.header;
            free_size += pred.size + self.header_size;
            self.log.record(
                LogLevel::Debug,
                "free",
                "coalesce",
                Some(pred.header),
                Some(free_size),
                "backward",
                "",
            );
        }

        self.write_header("free", header, next, free_size)?;
        self.log.record(
            LogLevel::Trace,
            "free",
            "free",
            Some(offset),
            Some(block.span),
            "success",
            "",
        );
        Ok(())
    }

    /// Returns the allocator to a single free block covering the region.
    pub fn free_all(&mut self) {
        let size = self.size - self.header_size;
        // The region always holds at least one header past `start`.
        let written = self.write_header("free_all", self.start, None, size);
        debug_assert!(written.is_ok(), "first header outside the region");
        self.log.record(
            LogLevel::Debug,
            "free_all",
            "free_all",
            Some(self.start),
            Some(size),
            "success",
            "",
        );
    }

    /// Every block in address order. Stops at the first corrupt header.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.chain()
            .map_while(Result::ok)
            .map(|b| BlockInfo {
                header_offset: b.header,
                payload_offset: b.header + self.header_size,
                span: b.span,
                free: b.size != 0,
            })
            .collect()
    }

    /// Walks the whole chain and checks the layout invariants: headers are
    /// consistent, blocks tile the region exactly, and no two neighbours are
    /// both free.
    pub fn check_consistency(&self) -> Result<(), AllocError> {
        let mut covered = 0;
        let mut prev_free = false;
        for block in self.chain() {
            let block = block.map_err(|offset| AllocError::CorruptHeader { offset })?;
            let free = block.size != 0;
            if free && prev_free {
                return Err(AllocError::CorruptHeader {
                    offset: block.header,
                });
            }
            prev_free = free;
            covered += self.header_size + block.span;
        }
        if covered == self.size {
            Ok(())
        } else {
            Err(AllocError::CorruptHeader { offset: self.start })
        }
    }

    /// Total payload bytes held by free blocks.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.chain()
            .map_while(Result::ok)
            .map(|b| b.size)
            .sum()
    }

    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        self.chain()
            .map_while(Result::ok)
            .map(|b| b.size)
            .max()
            .unwrap_or(0)
    }

    /// Bytes in the managed region, headers included.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Offset of the first header.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
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

impl fmt::Debug for FreeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field("start", &self.start)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("header_size", &self.header_size)
            .field("free_bytes", &self.free_bytes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::AlignedBuf;

    fn config() -> AllocatorConfig {
        AllocatorConfig::default()
            .with_align(8)
            .with_log_level(LogLevel::Trace)
    }

    // Header is two words padded to 8: 16 bytes on 64-bit targets.
    const H: usize = 2 * WORD;

    #[test]
    fn fresh_list_is_one_free_block() {
        let mut buf = AlignedBuf::<128>::new();
        let list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        assert_eq!(list.header_size(), H);
        assert_eq!(
            list.blocks(),
            vec![BlockInfo {
                header_offset: 0,
                payload_offset: H,
                span: 128 - H,
                free: true,
            }]
        );
        assert_eq!(list.free_bytes(), 128 - H);
        list.check_consistency().unwrap();
    }

    #[test]
    fn failed_header_write_is_reported_not_skipped() {
        let mut buf = AlignedBuf::<128>::new();
        let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        assert_eq!(
            list.write_header("free", 128, None, 0),
            Err(AllocError::CorruptHeader { offset: 128 })
        );
        let logs = list.drain_lifecycle_logs();
        let last = logs.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.event, "corrupt_header");
        assert_eq!(last.symbol, "free");
        // The live layout is untouched.
        list.check_consistency().unwrap();
    }

    #[test]
    fn adjacent_frees_coalesce_in_either_order() {
        for reverse in [false, true] {
            let mut buf = AlignedBuf::<128>::new();
            let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
            let a = list.alloc(32, Placement::FirstFit).unwrap();
            let b = list.alloc(16, Placement::FirstFit).unwrap();
            assert_eq!(a, H);
            assert_eq!(b, H + 32 + H);
            assert_eq!(list.blocks().len(), 3);

            if reverse {
                list.free(b, 16).unwrap();
                list.free(a, 32).unwrap();
            } else {
                list.free(a, 32).unwrap();
                list.free(b, 16).unwrap();
            }
            assert_eq!(list.blocks().len(), 1);
            assert_eq!(list.largest_free_block(), list.capacity() - H);
            list.check_consistency().unwrap();
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn best_fit_prefers_the_tightest_block() {
        for (placement, expected) in [(Placement::BestFit, 152), (Placement::FirstFit, 16)] {
            let mut buf = AlignedBuf::<208>::new();
            let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
            // Free blocks of 40, 16 and 32 bytes separated by live 8-byte spacers.
            let a = list.alloc(40, Placement::FirstFit).unwrap();
            let _s1 = list.alloc(8, Placement::FirstFit).unwrap();
            let b = list.alloc(10, Placement::FirstFit).unwrap();
            let _s2 = list.alloc(8, Placement::FirstFit).unwrap();
            let c = list.alloc(25, Placement::FirstFit).unwrap();
            let s3 = list.alloc(8, Placement::FirstFit).unwrap();
            assert_eq!([a, b, c], [16, 96, 152]);
            assert_eq!(s3 + 8, list.capacity());
            list.free(a, 40).unwrap();
            list.free(b, 10).unwrap();
            list.free(c, 25).unwrap();

            assert_eq!(list.alloc(20, placement), Ok(expected));
            list.check_consistency().unwrap();
        }
    }

    #[test]
    fn small_remainder_is_absorbed() {
        let mut buf = AlignedBuf::<64>::new();
        let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        // 48-byte block; a 40-byte request leaves 8 < H + 8.
        let a = list.alloc(40, Placement::FirstFit).unwrap();
        let blocks = list.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].span, 64 - H);
        assert!(!blocks[0].free);
        // The caller may free with its own size; the full span comes back.
        list.free(a, 40).unwrap();
        assert_eq!(list.free_bytes(), 64 - H);
    }

    #[test]
    fn zero_sized_request_gets_a_block() {
        let mut buf = AlignedBuf::<64>::new();
        let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        let a = list.alloc(0, Placement::FirstFit).unwrap();
        assert_eq!(list.blocks()[0].span, 8);
        list.free(a, 0).unwrap();
        list.check_consistency().unwrap();
    }

    #[test]
    fn exhaustion_is_recoverable() {
        let mut buf = AlignedBuf::<64>::new();
        let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        let err = list.alloc(64, Placement::BestFit).unwrap_err();
        assert_eq!(err, AllocError::Exhausted { requested: 64 });
        let last = list.lifecycle_logs().last().unwrap();
        assert_eq!(last.level, LogLevel::Warn);
        assert_eq!(last.event, "exhausted");
        // Nothing changed.
        assert_eq!(list.free_bytes(), 64 - H);
    }

    #[test]
    fn bad_frees_are_rejected() {
        let mut buf = AlignedBuf::<128>::new();
        let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        let a = list.alloc(16, Placement::FirstFit).unwrap();
        let _b = list.alloc(16, Placement::FirstFit).unwrap();

        assert_eq!(
            list.free(0, 8),
            Err(AllocError::ForeignOffset {
                offset: 0,
                capacity: 128
            })
        );
        assert_eq!(
            list.free(a + 8, 8),
            Err(AllocError::UnknownAllocation { offset: a + 8 })
        );
        assert_eq!(
            list.free(a, 17),
            Err(AllocError::SizeMismatch {
                offset: a,
                size: 17,
                span: 16
            })
        );
        list.free(a, 16).unwrap();
        assert_eq!(list.free(a, 16), Err(AllocError::DoubleFree { offset: a }));

        let logs = list.drain_lifecycle_logs();
        assert!(logs.iter().any(|r| r.event == "double_free_detected"));
        list.check_consistency().unwrap();
    }

    #[test]
    fn freeing_between_free_neighbours_merges_three_ways() {
        let mut buf = AlignedBuf::<256>::new();
        let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        let a = list.alloc(16, Placement::FirstFit).unwrap();
        let b = list.alloc(16, Placement::FirstFit).unwrap();
        let c = list.alloc(16, Placement::FirstFit).unwrap();
        let _guard = list.alloc(16, Placement::FirstFit).unwrap();
        list.free(a, 16).unwrap();
        list.free(c, 16).unwrap();
        assert_eq!(list.blocks().iter().filter(|b| b.free).count(), 3);

        list.free(b, 16).unwrap();
        let blocks = list.blocks();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].free);
        assert_eq!(blocks[0].span, 16 * 3 + 2 * H);
        list.check_consistency().unwrap();
    }

    #[test]
    fn free_all_resets_the_chain() {
        let mut buf = AlignedBuf::<128>::new();
        let mut list = FreeList::with_config(&mut buf.0, &config()).unwrap();
        for _ in 0..3 {
            list.alloc(8, Placement::FirstFit).unwrap();
        }
        list.free_all();
        assert_eq!(list.blocks().len(), 1);
        assert_eq!(list.free_bytes(), 128 - H);
    }

    #[test]
    fn payloads_are_aligned_to_the_real_address() {
        let mut buf = AlignedBuf::<160>::new();
        let slice = &mut buf.0[3..];
        let base = slice.as_ptr() as usize;
        let mut list = FreeList::with_config(slice, &config()).unwrap();
        assert_eq!(list.start(), 5);
        for size in [1, 7, 13] {
            let offset = list.alloc(size, Placement::FirstFit).unwrap();
            assert_eq!((base + offset) % 8, 0);
        }
        list.check_consistency().unwrap();
    }

    #[test]
    fn construction_rejects_tiny_buffers() {
        let mut buf = AlignedBuf::<64>::new();
        assert!(matches!(
            FreeList::with_config(&mut buf.0[..H], &config()).err(),
            Some(AllocError::BufferTooSmall { .. })
        ));
        assert_eq!(
            FreeList::with_config(&mut buf.0, &config().with_align(0)).err(),
            Some(AllocError::InvalidAlignment { align: 0 })
        );
    }
}
