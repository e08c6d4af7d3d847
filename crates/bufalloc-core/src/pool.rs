//! Fixed-slot (pool) allocator.
//!
//! The aligned part of the buffer is cut into uniform slots. Free slots form
//! an intrusive singly linked list: the first word of each free slot holds the
//! offset of the next free slot. Occupied slots carry no metadata.
//!
//! ```text
//!   head ──► ┌──────┐   ┌──────┐   ┌──────┐
//!            │ next ├──►│ next ├──►│ NIL  │
//!            │ free │   │ free │   │ free │
//!            └──────┘   └──────┘   └──────┘
//! ```

use std::fmt;

use crate::align::{align_pointer, align_size};
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::header::{WORD, encode, link, read_word, write_word};
use crate::log::{LifecycleLog, LogLevel, LogRecord};

/// Allocator handing out slots of one fixed size.
pub struct Pool<'a> {
    buf: &'a mut [u8],
    /// First aligned offset in `buf`; slot 0 starts here.
    start: usize,
    /// Bytes covered by slots; always a multiple of `slot_size`.
    size: usize,
    slot_size: usize,
    head: Option<usize>,
    log: LifecycleLog,
}

impl<'a> Pool<'a> {
    pub fn new(buf: &'a mut [u8], slot_size: usize) -> Result<Self, AllocError> {
        Self::with_config(buf, slot_size, &AllocatorConfig::from_env())
    }

    /// Builds a pool whose slots are `slot_size` rounded up to `config.align`
    /// and start at the first aligned address of `buf`.
    pub fn with_config(
        buf: &'a mut [u8],
        slot_size: usize,
        config: &AllocatorConfig,
    ) -> Result<Self, AllocError> {
        let mut log = LifecycleLog::new("pool", config.log_level, config.failure_policy);
        let align = config.align;
        let base = buf.as_ptr() as usize;
        let start = align_pointer(base, align)
            .map(|ptr| ptr - base)
            .map_err(|err| log.reject("init", err, None, None))?;
        let slot_size = align_size(slot_size, align)
            .map_err(|err| log.reject("init", err, None, Some(slot_size)))?;
        if slot_size < WORD {
            let err = AllocError::SlotTooSmall {
                slot_size,
                min: WORD,
            };
            return Err(log.reject("init", err, None, Some(slot_size)));
        }
        let usable = buf.len().saturating_sub(start);
        let size = usable - usable % slot_size;
        if size == 0 {
            let err = AllocError::BufferTooSmall {
                size: buf.len(),
                needed: start + slot_size,
            };
            return Err(log.reject("init", err, None, Some(buf.len())));
        }

        let mut pool = Self {
            buf,
            start,
            size,
            slot_size,
            head: None,
            log,
        };
        pool.free_all();
        let slots = pool.slot_count();
        pool.log.record(
            LogLevel::Info,
            "init",
            "init",
            Some(start),
            Some(size),
            "success",
            format_args!("slot_size={slot_size} slots={slots}"),
        );
        Ok(pool)
    }

    /// Takes a slot off the free list and returns its offset, zero-filled.
    pub fn alloc(&mut self) -> Result<usize, AllocError> {
        let Some(slot) = self.head else {
            let err = AllocError::Exhausted {
                requested: self.slot_size,
            };
            return Err(self.log.reject("alloc", err, None, Some(self.slot_size)));
        };
        let next = match read_word(self.buf, slot).map(link) {
            Some(next) if next.is_none_or(|n| self.is_slot(n)) => next,
            _ => {
                let err = AllocError::CorruptHeader { offset: slot };
                return Err(self.log.reject("alloc", err, Some(slot), None));
            }
        };
        self.head = next;
        self.buf[slot..slot + self.slot_size].fill(0);
        self.log.record(
            LogLevel::Trace,
            "alloc",
            "alloc",
            Some(slot),
            Some(self.slot_size),
            "success",
            "",
        );
        Ok(slot)
    }

    /// Returns a slot to the head of the free list.
    ///
    /// A slot that is already on the free list is rejected as a double free,
    /// found by walking the list.
    pub fn free(&mut self, slot: usize) -> Result<(), AllocError> {
        if slot < self.start || slot >= self.start + self.size {
            let err = AllocError::ForeignOffset {
                offset: slot,
                capacity: self.start + self.size,
            };
            return Err(self.log.reject("free", err, Some(slot), None));
        }
        if !self.is_slot(slot) {
            let err = AllocError::UnknownAllocation { offset: slot };
            return Err(self.log.reject("free", err, Some(slot), None));
        }
        if self.free_slots().any(|free| free == slot) {
            let err = AllocError::DoubleFree { offset: slot };
            return Err(self.log.reject("free", err, Some(slot), None));
        }
        self.write_link("free", slot, self.head)?;
        self.head = Some(slot);
        self.log.record(
            LogLevel::Trace,
            "free",
            "free",
            Some(slot),
            Some(self.slot_size),
            "success",
            "",
        );
        Ok(())
    }

    /// Marks every slot free, chaining them in ascending address order onto
    /// the head (the highest slot ends up first).
    pub fn free_all(&mut self) {
        self.head = None;
        for slot in (self.start..self.start + self.size).step_by(self.slot_size) {
            // Every slot is at least one word and lies inside the buffer.
            if write_word(self.buf, slot, encode(self.head)).is_some() {
                self.head = Some(slot);
            }
        }
        self.log.record(
            LogLevel::Debug,
            "free_all",
            "free_all",
            None,
            Some(self.size),
            "success",
            "",
        );
    }

    fn write_link(
        &mut self,
        symbol: &'static str,
        slot: usize,
        next: Option<usize>,
    ) -> Result<(), AllocError> {
        if write_word(self.buf, slot, encode(next)).is_some() {
            return Ok(());
        }
        let err = AllocError::CorruptHeader { offset: slot };
        Err(self.log.reject(symbol, err, Some(slot), None))
    }

    /// Free slots from the head, bounded by the slot count so a damaged
    /// link cannot loop forever.
    fn free_slots(&self) -> impl Iterator<Item = usize> + '_ {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let slot = current?;
            current = read_word(self.buf, slot).and_then(link);
            Some(slot)
        })
        .take(self.slot_count())
    }

    fn is_slot(&self, offset: usize) -> bool {
        offset >= self.start
            && offset < self.start + self.size
            && (offset - self.start) % self.slot_size == 0
    }

    /// Number of slots currently on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_slots().count()
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.size / self.slot_size
    }

    /// Slot size after alignment.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Offset of the first slot.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn bytes(&self, slot: usize) -> Result<&[u8], AllocError> {
        let capacity = self.buf.len();
        slot.checked_add(self.slot_size)
            .and_then(|end| self.buf.get(slot..end))
            .ok_or(AllocError::ForeignOffset {
                offset: slot,
                capacity,
            })
    }

    pub fn bytes_mut(&mut self, slot: usize) -> Result<&mut [u8], AllocError> {
        let capacity = self.buf.len();
        slot.checked_add(self.slot_size)
            .and_then(|end| self.buf.get_mut(slot..end))
            .ok_or(AllocError::ForeignOffset {
                offset: slot,
                capacity,
            })
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

impl fmt::Debug for Pool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("start", &self.start)
            .field("size", &self.size)
            .field("slot_size", &self.slot_size)
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::AlignedBuf;

    fn config() -> AllocatorConfig {
        AllocatorConfig::default().with_align(8)
    }

    #[test]
    fn eighty_bytes_of_sixteen_byte_slots() {
        let mut buf = AlignedBuf::<80>::new();
        let mut pool = Pool::with_config(&mut buf.0, 16, &config()).unwrap();
        assert_eq!(pool.slot_count(), 5);
        assert_eq!(pool.free_count(), 5);

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(pool.alloc().unwrap());
        }
        // Highest slot first: slots were chained in ascending order onto the head.
        assert_eq!(seen, vec![64, 48, 32, 16, 0]);
        assert_eq!(pool.alloc(), Err(AllocError::Exhausted { requested: 16 }));
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn freed_slot_is_reused_first() {
        let mut buf = AlignedBuf::<80>::new();
        let mut pool = Pool::with_config(&mut buf.0, 16, &config()).unwrap();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.free(a).unwrap();
        pool.free(b).unwrap();
        assert_eq!(pool.alloc(), Ok(b));
        assert_eq!(pool.alloc(), Ok(a));
    }

    #[test]
    fn slots_come_back_zeroed() {
        let mut buf = AlignedBuf::<64>::new();
        let mut pool = Pool::with_config(&mut buf.0, 16, &config()).unwrap();
        let a = pool.alloc().unwrap();
        pool.bytes_mut(a).unwrap().fill(0xFF);
        pool.free(a).unwrap();
        let again = pool.alloc().unwrap();
        assert_eq!(again, a);
        assert_eq!(pool.bytes(again).unwrap(), &[0u8; 16]);
    }

    #[test]
    fn slot_size_is_aligned() {
        let mut buf = AlignedBuf::<100>::new();
        let pool = Pool::with_config(&mut buf.0, 10, &config()).unwrap();
        assert_eq!(pool.slot_size(), 16);
        // 100 / 16 = 6 slots; the 4-byte tail is unused.
        assert_eq!(pool.slot_count(), 6);
    }

    #[test]
    fn unaligned_buffer_start_is_skipped() {
        let mut buf = AlignedBuf::<72>::new();
        let pool = Pool::with_config(&mut buf.0[3..], 16, &config()).unwrap();
        assert_eq!(pool.start(), 5);
        assert_eq!(pool.slot_count(), 4);
    }

    #[test]
    fn bad_free_targets_are_rejected() {
        let mut buf = AlignedBuf::<80>::new();
        let mut pool = Pool::with_config(&mut buf.0, 16, &config()).unwrap();
        let _ = pool.alloc().unwrap();
        assert_eq!(
            pool.free(80),
            Err(AllocError::ForeignOffset {
                offset: 80,
                capacity: 80
            })
        );
        assert_eq!(
            pool.free(20),
            Err(AllocError::UnknownAllocation { offset: 20 })
        );
        assert_eq!(pool.free_count(), 4);

        let logs = pool.drain_lifecycle_logs();
        assert_eq!(
            logs.iter()
                .filter(|r| r.level == LogLevel::Warn && r.symbol == "free")
                .count(),
            2
        );
    }

    #[test]
    fn double_free_is_rejected_and_slot_stays_single_owner() {
        let mut buf = AlignedBuf::<80>::new();
        let mut pool = Pool::with_config(&mut buf.0, 16, &config()).unwrap();
        let a = pool.alloc().unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(AllocError::DoubleFree { offset: a }));
        assert_eq!(pool.free_count(), 5);

        // A slot deeper in the list is caught too.
        let untouched = pool.start() + 16;
        assert_eq!(
            pool.free(untouched),
            Err(AllocError::DoubleFree { offset: untouched })
        );

        let x = pool.alloc().unwrap();
        let y = pool.alloc().unwrap();
        assert_eq!(x, a);
        assert_ne!(x, y);
        assert_eq!(pool.free_count(), 3);

        let logs = pool.drain_lifecycle_logs();
        assert_eq!(
            logs.iter()
                .filter(|r| r.level == LogLevel::Warn && r.event == "double_free_detected")
                .count(),
            2
        );
    }

    #[test]
    fn failed_link_write_is_logged_as_violation() {
        let mut buf = AlignedBuf::<64>::new();
        let mut pool = Pool::with_config(&mut buf.0, 16, &config()).unwrap();
        assert_eq!(
            pool.write_link("free", 64, None),
            Err(AllocError::CorruptHeader { offset: 64 })
        );
        let logs = pool.drain_lifecycle_logs();
        let last = logs.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.event, "corrupt_header");
        assert_eq!(last.offset, Some(64));
    }

    #[test]
    fn construction_errors() {
        let mut buf = AlignedBuf::<64>::new();
        assert_eq!(
            Pool::with_config(&mut buf.0, 0, &config()).err(),
            Some(AllocError::SlotTooSmall {
                slot_size: 0,
                min: WORD
            })
        );
        assert!(matches!(
            Pool::with_config(&mut buf.0[..8], 16, &config()).err(),
            Some(AllocError::BufferTooSmall { .. })
        ));
        assert_eq!(
            Pool::with_config(&mut buf.0, 16, &config().with_align(6)).err(),
            Some(AllocError::InvalidAlignment { align: 6 })
        );
    }

    #[test]
    fn free_all_restores_every_slot() {
        let mut buf = AlignedBuf::<128>::new();
        let mut pool = Pool::with_config(&mut buf.0, 32, &config()).unwrap();
        while pool.alloc().is_ok() {}
        assert_eq!(pool.free_count(), 0);
        pool.free_all();
        assert_eq!(pool.free_count(), 4);
    }
}
