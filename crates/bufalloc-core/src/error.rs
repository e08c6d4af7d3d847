//! Allocation errors.
//!
//! Every fallible operation in this crate returns [`AllocError`]. The
//! [`ErrorKind`] of an error decides how it is logged (ERROR for contract
//! violations, WARN otherwise) and whether [`FailurePolicy::Abort`] terminates
//! the process.
//!
//! [`FailurePolicy::Abort`]: crate::config::FailurePolicy::Abort

use thiserror::Error;

/// Coarse classification of an [`AllocError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Programming error in the caller; continuing risks corrupting adjacent memory.
    ContractViolation,
    /// Expected, recoverable out-of-space condition.
    Exhausted,
    /// Rejected argument; the allocator state is unchanged.
    InvalidArgument,
}

impl ErrorKind {
    /// Returns true for errors that abort under the strict failure policy.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::ContractViolation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("alignment {align} is not a power of two")]
    InvalidAlignment { align: usize },
    #[error("aligning {value} to {align} overflows the address space")]
    AddressOverflow { value: usize, align: usize },
    #[error("allocation of {requested} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        requested: usize,
        capacity: usize,
    },
    #[error("resize target at offset {offset} lies outside the {capacity}-byte buffer")]
    ResizeOutOfBounds { offset: usize, capacity: usize },
    #[error("header at offset {offset} is unreadable or inconsistent")]
    CorruptHeader { offset: usize },
    #[error("element of {got} bytes pushed into an array of {expected}-byte elements")]
    ElementSizeMismatch { expected: usize, got: usize },
    #[error("no free block can hold {requested} bytes")]
    Exhausted { requested: usize },
    #[error("heap reallocation to {bytes} bytes failed")]
    HeapExhausted { bytes: usize },
    #[error("offset {offset} is outside the managed region of {capacity} bytes")]
    ForeignOffset { offset: usize, capacity: usize },
    #[error("offset {offset} is not the start of a live allocation")]
    UnknownAllocation { offset: usize },
    #[error("offset {offset} was already freed")]
    DoubleFree { offset: usize },
    #[error("free of {size} bytes exceeds the {span}-byte block at offset {offset}")]
    SizeMismatch {
        offset: usize,
        size: usize,
        span: usize,
    },
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("buffer of {size} bytes is too small; at least {needed} bytes are required")]
    BufferTooSmall { size: usize, needed: usize },
    #[error("slot size {slot_size} cannot hold a {min}-byte free-list link")]
    SlotTooSmall { slot_size: usize, min: usize },
    #[error("element size must be non-zero")]
    ZeroElementSize,
}

impl AllocError {
    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAlignment { .. }
            | Self::AddressOverflow { .. }
            | Self::OutOfBounds { .. }
            | Self::ResizeOutOfBounds { .. }
            | Self::CorruptHeader { .. }
            | Self::ElementSizeMismatch { .. } => ErrorKind::ContractViolation,
            Self::Exhausted { .. } | Self::HeapExhausted { .. } => ErrorKind::Exhausted,
            Self::ForeignOffset { .. }
            | Self::UnknownAllocation { .. }
            | Self::DoubleFree { .. }
            | Self::SizeMismatch { .. }
            | Self::IndexOutOfRange { .. }
            | Self::BufferTooSmall { .. }
            | Self::SlotTooSmall { .. }
            | Self::ZeroElementSize => ErrorKind::InvalidArgument,
        }
    }

    /// Machine-readable event label used in lifecycle log records.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::InvalidAlignment { .. } => "invalid_alignment",
            Self::AddressOverflow { .. } => "address_overflow",
            Self::OutOfBounds { .. } => "out_of_bounds",
            Self::ResizeOutOfBounds { .. } => "resize_out_of_bounds",
            Self::CorruptHeader { .. } => "corrupt_header",
            Self::ElementSizeMismatch { .. } => "element_size_mismatch",
            Self::Exhausted { .. } => "exhausted",
            Self::HeapExhausted { .. } => "heap_exhausted",
            Self::ForeignOffset { .. } => "foreign_offset",
            Self::UnknownAllocation { .. } => "unknown_allocation",
            Self::DoubleFree { .. } => "double_free_detected",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::BufferTooSmall { .. } => "buffer_too_small",
            Self::SlotTooSmall { .. } => "slot_too_small",
            Self::ZeroElementSize => "zero_element_size",
        }
    }
}

/// Call-site opt-in to abort-on-violation.
pub trait ContractExt<T> {
    /// Aborts the process if the result is a contract violation; passes every
    /// other result through unchanged.
    fn abort_on_violation(self) -> Result<T, AllocError>;
}

impl<T> ContractExt<T> for Result<T, AllocError> {
    fn abort_on_violation(self) -> Result<T, AllocError> {
        match self {
            Err(err) if err.kind().is_fatal() => {
                eprintln!("bufalloc: fatal contract violation: {err}");
                std::process::abort();
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_policy_table() {
        assert_eq!(
            AllocError::InvalidAlignment { align: 3 }.kind(),
            ErrorKind::ContractViolation
        );
        assert_eq!(
            AllocError::Exhausted { requested: 8 }.kind(),
            ErrorKind::Exhausted
        );
        assert_eq!(
            AllocError::ForeignOffset {
                offset: 1,
                capacity: 0
            }
            .kind(),
            ErrorKind::InvalidArgument
        );
        assert!(ErrorKind::ContractViolation.is_fatal());
        assert!(!ErrorKind::Exhausted.is_fatal());
    }

    #[test]
    fn display_mentions_values() {
        let err = AllocError::OutOfBounds {
            offset: 8,
            requested: 200,
            capacity: 100,
        };
        let text = err.to_string();
        assert!(text.contains("200"));
        assert!(text.contains("100"));
        assert_eq!(err.event(), "out_of_bounds");
    }

    #[test]
    fn abort_on_violation_passes_recoverable_errors() {
        let res: Result<usize, AllocError> = Err(AllocError::Exhausted { requested: 4 });
        assert_eq!(
            res.abort_on_violation(),
            Err(AllocError::Exhausted { requested: 4 })
        );
        let ok: Result<usize, AllocError> = Ok(7);
        assert_eq!(ok.abort_on_violation(), Ok(7));
    }
}
