//! Alignment arithmetic.
//!
//! All rounding is done with the `align - 1` mask, never with division, so
//! every entry point first checks that `align` is a non-zero power of two.

use crate::error::AllocError;

/// Returns true if `align` is a non-zero power of two.
#[must_use]
pub const fn is_power_of_two(align: usize) -> bool {
    align != 0 && align & (align - 1) == 0
}

fn check(align: usize) -> Result<usize, AllocError> {
    if is_power_of_two(align) {
        Ok(align - 1)
    } else {
        Err(AllocError::InvalidAlignment { align })
    }
}

/// Rounds `ptr` up to the nearest multiple of `align`.
pub fn align_pointer(ptr: usize, align: usize) -> Result<usize, AllocError> {
    let mask = check(align)?;
    match ptr & mask {
        0 => Ok(ptr),
        rem => ptr
            .checked_add(align - rem)
            .ok_or(AllocError::AddressOverflow { value: ptr, align }),
    }
}

/// Rounds a byte count up to the nearest multiple of `align`.
pub fn align_size(size: usize, align: usize) -> Result<usize, AllocError> {
    align_pointer(size, align)
}

/// Padding to add to `ptr` so the result is aligned and preceded by at least
/// `header_size` bytes.
///
/// The padding to the next boundary is taken first (zero if `ptr` is already
/// aligned). If that leaves less than `header_size` bytes, the shortfall is
/// rounded up to whole alignment steps: stopping at the first boundary past
/// the header would leave the header straddling the payload.
pub fn padding_with_header(
    ptr: usize,
    align: usize,
    header_size: usize,
) -> Result<usize, AllocError> {
    let mask = check(align)?;
    let mut padding = (align - (ptr & mask)) & mask;
    if padding < header_size {
        padding += align_size(header_size - padding, align)?;
    }
    Ok(padding)
}

/// Smallest aligned position ≥ `ptr` with room for a `header_size`-byte header
/// immediately before it.
pub fn align_with_header(
    ptr: usize,
    align: usize,
    header_size: usize,
) -> Result<usize, AllocError> {
    let padding = padding_with_header(ptr, align, header_size)?;
    ptr.checked_add(padding)
        .ok_or(AllocError::AddressOverflow { value: ptr, align })
}

/// True if `offset` lies strictly inside a buffer of `len` bytes.
#[must_use]
pub const fn within_bounds(offset: usize, len: usize) -> bool {
    offset < len
}
