//! Growable array of fixed-size byte elements on the system heap.
//!
//! Unlike the buffer allocators this container owns its storage. Capacity,
//! occupied count and element size are plain fields; the storage vector always
//! holds exactly `capacity * element_size` initialised bytes.

use std::fmt;
use std::slice::ChunksExact;

use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::log::{LifecycleLog, LogLevel, LogRecord};

pub struct DynArray {
    storage: Vec<u8>,
    capacity: usize,
    occupied: usize,
    element_size: usize,
    log: LifecycleLog,
}

/// Allocates `n` elements in `slot`, creating the array (capacity `n`) on
/// first use. Returns the index of the first new element.
///
/// An existing array with a different element size is rejected.
pub fn alloc(
    slot: &mut Option<DynArray>,
    element_size: usize,
    n: usize,
) -> Result<usize, AllocError> {
    let array = match slot {
        Some(array) => array,
        None => slot.insert(DynArray::with_capacity(element_size, n)?),
    };
    if array.element_size != element_size {
        let err = AllocError::ElementSizeMismatch {
            expected: array.element_size,
            got: element_size,
        };
        return Err(array.log.reject("alloc", err, None, Some(element_size)));
    }
    array.alloc(n)
}

impl DynArray {
    pub fn with_capacity(element_size: usize, count: usize) -> Result<Self, AllocError> {
        Self::with_config(element_size, count, &AllocatorConfig::from_env())
    }

    /// Only the failure policy and log level of `config` apply; heap storage
    /// is aligned by the global allocator.
    pub fn with_config(
        element_size: usize,
        count: usize,
        config: &AllocatorConfig,
    ) -> Result<Self, AllocError> {
        let mut log = LifecycleLog::new("dyn_array", config.log_level, config.failure_policy);
        if element_size == 0 {
            return Err(log.reject("init", AllocError::ZeroElementSize, None, Some(count)));
        }
        let mut array = Self {
            storage: Vec::new(),
            capacity: 0,
            occupied: 0,
            element_size,
            log,
        };
        array.grow_to(count, "init")?;
        array.log.record(
            LogLevel::Info,
            "init",
            "init",
            None,
            Some(count),
            "success",
            format_args!("element_size={element_size}"),
        );
        Ok(array)
    }

    fn grow_to(&mut self, capacity: usize, symbol: &'static str) -> Result<(), AllocError> {
        let Some(bytes) = capacity.checked_mul(self.element_size) else {
            let err = AllocError::HeapExhausted { bytes: usize::MAX };
            return Err(self.log.reject(symbol, err, None, Some(capacity)));
        };
        let additional = bytes.saturating_sub(self.storage.len());
        if self.storage.try_reserve_exact(additional).is_err() {
            let err = AllocError::HeapExhausted { bytes };
            return Err(self.log.reject(symbol, err, None, Some(capacity)));
        }
        self.storage.resize(bytes, 0);
        if capacity != self.capacity {
            self.log.record(
                LogLevel::Debug,
                symbol,
                "grow",
                None,
                Some(capacity),
                "success",
                format_args!("{} -> {capacity}", self.capacity),
            );
        }
        self.capacity = capacity;
        Ok(())
    }

    fn byte_range(&self, index: usize, count: usize) -> std::ops::Range<usize> {
        index * self.element_size..(index + count) * self.element_size
    }

    /// Appends `n` zeroed elements and returns the index of the first one.
    ///
    /// When the capacity is too small it grows to at least twice its current
    /// value.
    pub fn alloc(&mut self, n: usize) -> Result<usize, AllocError> {
        let Some(needed) = self.occupied.checked_add(n) else {
            let err = AllocError::HeapExhausted { bytes: usize::MAX };
            return Err(self.log.reject("alloc", err, None, Some(n)));
        };
        if needed > self.capacity {
            self.grow_to(needed.max(self.capacity.saturating_mul(2)), "alloc")?;
        }
        let index = self.occupied;
        let range = self.byte_range(index, n);
        self.storage[range].fill(0);
        self.occupied = needed;
        Ok(index)
    }

    fn check_element(&mut self, symbol: &'static str, element: &[u8]) -> Result<(), AllocError> {
        if element.len() == self.element_size {
            return Ok(());
        }
        let err = AllocError::ElementSizeMismatch {
            expected: self.element_size,
            got: element.len(),
        };
        Err(self.log.reject(symbol, err, None, Some(element.len())))
    }

    /// Appends one element; its length must equal the element size.
    pub fn push(&mut self, element: &[u8]) -> Result<usize, AllocError> {
        self.check_element("push", element)?;
        let index = self.alloc(1)?;
        let range = self.byte_range(index, 1);
        self.storage[range].copy_from_slice(element);
        Ok(index)
    }

    pub fn insert(&mut self, pos: usize, element: &[u8]) -> Result<(), AllocError> {
        self.check_element("insert", element)?;
        self.make_space(pos, 1)?;
        let range = self.byte_range(pos, 1);
        self.storage[range].copy_from_slice(element);
        Ok(())
    }

    /// Opens a gap of `n` zeroed elements at `pos`, shifting the tail right.
    pub fn make_space(&mut self, pos: usize, n: usize) -> Result<(), AllocError> {
        if pos > self.occupied {
            let err = AllocError::IndexOutOfRange {
                index: pos,
                len: self.occupied,
            };
            return Err(self.log.reject("make_space", err, Some(pos), Some(n)));
        }
        let old_len = self.occupied;
        self.alloc(n)?;
        let tail = self.byte_range(pos, old_len - pos);
        self.storage.copy_within(tail, (pos + n) * self.element_size);
        let gap = self.byte_range(pos, n);
        self.storage[gap].fill(0);
        Ok(())
    }

    /// Drops the last element. Returns `false` (and logs) when empty.
    pub fn pop_last(&mut self) -> bool {
        if self.pop_empty("pop_last") {
            return false;
        }
        self.occupied -= 1;
        true
    }

    /// Drops the first element, shifting the rest left.
    pub fn pop_first(&mut self) -> bool {
        if self.pop_empty("pop_first") {
            return false;
        }
        let rest = self.byte_range(1, self.occupied - 1);
        self.storage.copy_within(rest, 0);
        self.occupied -= 1;
        true
    }

    fn pop_empty(&mut self, symbol: &'static str) -> bool {
        if self.occupied > 0 {
            return false;
        }
        self.log.record(
            LogLevel::Warn,
            symbol,
            "pop_empty",
            None,
            None,
            "noop",
            "array is empty",
        );
        true
    }

    pub fn clear(&mut self) {
        self.occupied = 0;
    }

    /// Truncates to `len` elements. Growing through this call is rejected.
    pub fn reset_size(&mut self, len: usize) -> Result<(), AllocError> {
        if len > self.occupied {
            let err = AllocError::IndexOutOfRange {
                index: len,
                len: self.occupied,
            };
            return Err(self.log.reject("reset_size", err, None, Some(len)));
        }
        self.occupied = len;
        Ok(())
    }

    /// Grows the capacity to `capacity` elements; smaller values are a no-op.
    pub fn reserve(&mut self, capacity: usize) -> Result<(), AllocError> {
        if capacity <= self.capacity {
            return Ok(());
        }
        self.grow_to(capacity, "reserve")
    }

    pub fn shrink_to_fit(&mut self) {
        let bytes = self.occupied * self.element_size;
        self.storage.truncate(bytes);
        self.storage.shrink_to_fit();
        if self.capacity != self.occupied {
            self.log.record(
                LogLevel::Debug,
                "shrink_to_fit",
                "shrink",
                None,
                Some(self.occupied),
                "success",
                format_args!("{} -> {}", self.capacity, self.occupied),
            );
        }
        self.capacity = self.occupied;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.occupied
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        (index < self.occupied).then(|| &self.storage[self.byte_range(index, 1)])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        if index >= self.occupied {
            return None;
        }
        let range = self.byte_range(index, 1);
        Some(&mut self.storage[range])
    }

    /// The occupied elements as one contiguous byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage[..self.occupied * self.element_size]
    }

    pub fn iter(&self) -> ChunksExact<'_, u8> {
        self.as_bytes().chunks_exact(self.element_size)
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

impl fmt::Debug for DynArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynArray")
            .field("capacity", &self.capacity)
            .field("occupied", &self.occupied)
            .field("element_size", &self.element_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AllocatorConfig {
        AllocatorConfig::default().with_log_level(LogLevel::Trace)
    }

    fn u32_array(values: &[u32]) -> DynArray {
        let mut array = DynArray::with_config(4, 1, &config()).unwrap();
        for v in values {
            array.push(&v.to_ne_bytes()).unwrap();
        }
        array
    }

    fn values(array: &DynArray) -> Vec<u32> {
        array
            .iter()
            .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn pop_first_shifts_left() {
        let mut array = u32_array(&[1, 2, 3]);
        assert!(array.pop_first());
        assert_eq!(values(&array), vec![2, 3]);
        assert!(array.pop_last());
        assert_eq!(values(&array), vec![2]);
    }

    #[test]
    fn capacity_at_least_doubles_only_when_needed() {
        let mut array = DynArray::with_config(1, 2, &config()).unwrap();
        let mut capacity = array.capacity();
        for i in 0..200u8 {
            array.push(&[i]).unwrap();
            assert!(array.capacity() >= array.len());
            if array.capacity() != capacity {
                assert!(array.capacity() >= 2 * capacity);
                assert_eq!(array.len(), capacity + 1, "grew before it was full");
                capacity = array.capacity();
            }
        }
        assert_eq!(array.as_bytes().len(), 200);
    }

    #[test]
    fn bulk_alloc_grows_past_double() {
        let mut array = DynArray::with_config(8, 2, &config()).unwrap();
        assert_eq!(array.alloc(10), Ok(0));
        assert_eq!(array.capacity(), 10);
        assert_eq!(array.alloc(1), Ok(10));
        assert_eq!(array.capacity(), 20);
        assert!(array.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn insert_and_make_space() {
        let mut array = u32_array(&[1, 4]);
        array.insert(1, &2u32.to_ne_bytes()).unwrap();
        array.insert(3, &5u32.to_ne_bytes()).unwrap();
        assert_eq!(values(&array), vec![1, 2, 4, 5]);

        array.make_space(2, 1).unwrap();
        assert_eq!(values(&array), vec![1, 2, 0, 4, 5]);
        array.get_mut(2).unwrap().copy_from_slice(&3u32.to_ne_bytes());
        assert_eq!(values(&array), vec![1, 2, 3, 4, 5]);

        assert_eq!(
            array.make_space(9, 1),
            Err(AllocError::IndexOutOfRange { index: 9, len: 5 })
        );
    }

    #[test]
    fn wrong_element_length_is_a_violation() {
        let mut array = u32_array(&[]);
        assert_eq!(
            array.push(&[1, 2]),
            Err(AllocError::ElementSizeMismatch {
                expected: 4,
                got: 2
            })
        );
        assert!(array.is_empty());
        let last = array.lifecycle_logs().last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.event, "element_size_mismatch");
    }

    #[test]
    fn empty_pops_are_logged_noops() {
        let mut array = u32_array(&[]);
        assert!(!array.pop_last());
        assert!(!array.pop_first());
        let warnings: Vec<_> = array
            .drain_lifecycle_logs()
            .into_iter()
            .filter(|r| r.event == "pop_empty")
            .map(|r| r.symbol)
            .collect();
        assert_eq!(warnings, vec!["pop_last", "pop_first"]);
    }

    #[test]
    fn module_alloc_initialises_lazily() {
        let mut slot = None;
        assert_eq!(alloc(&mut slot, 8, 3), Ok(0));
        let array = slot.as_ref().unwrap();
        assert_eq!((array.len(), array.capacity()), (3, 3));

        assert_eq!(alloc(&mut slot, 8, 1), Ok(3));
        assert_eq!(
            alloc(&mut slot, 4, 1),
            Err(AllocError::ElementSizeMismatch {
                expected: 8,
                got: 4
            })
        );
        assert_eq!(slot.as_ref().map(DynArray::len), Some(4));
    }

    #[test]
    fn reserve_shrink_and_reset() {
        let mut array = u32_array(&[7, 8, 9]);
        array.reserve(2).unwrap();
        assert!(array.capacity() >= 3);
        array.reserve(64).unwrap();
        assert_eq!(array.capacity(), 64);
        array.shrink_to_fit();
        assert_eq!(array.capacity(), 3);
        assert_eq!(values(&array), vec![7, 8, 9]);

        assert_eq!(
            array.reset_size(5),
            Err(AllocError::IndexOutOfRange { index: 5, len: 3 })
        );
        array.reset_size(1).unwrap();
        assert_eq!(values(&array), vec![7]);
        array.clear();
        assert!(array.is_empty());
        assert_eq!(array.get(0), None);
    }

    #[test]
    fn size_overflow_reports_heap_exhaustion() {
        let mut array = DynArray::with_config(2, 0, &config()).unwrap();
        assert_eq!(
            array.reserve(usize::MAX),
            Err(AllocError::HeapExhausted { bytes: usize::MAX })
        );
        assert_eq!(array.capacity(), 0);
    }

    #[test]
    fn zero_element_size_is_rejected() {
        assert_eq!(
            DynArray::with_config(0, 4, &config()).err(),
            Some(AllocError::ZeroElementSize)
        );
    }
}
