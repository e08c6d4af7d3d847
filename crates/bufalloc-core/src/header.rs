//! Machine-word encoding for intrusive headers stored in caller buffers.
//!
//! Links are buffer offsets; [`NIL`] terminates a chain. Every access is
//! bounds-checked and yields `None` instead of touching memory outside the
//! slice.

use std::mem;

/// Size of one encoded header word.
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// Link value meaning "no next/previous header".
pub(crate) const NIL: usize = usize::MAX;

pub(crate) fn read_word(buf: &[u8], offset: usize) -> Option<usize> {
    let end = offset.checked_add(WORD)?;
    let bytes = buf.get(offset..end)?;
    let mut raw = [0u8; WORD];
    raw.copy_from_slice(bytes);
    Some(usize::from_ne_bytes(raw))
}

pub(crate) fn write_word(buf: &mut [u8], offset: usize, value: usize) -> Option<()> {
    let end = offset.checked_add(WORD)?;
    buf.get_mut(offset..end)?
        .copy_from_slice(&value.to_ne_bytes());
    Some(())
}

/// Converts a stored link into an optional offset.
pub(crate) fn link(value: usize) -> Option<usize> {
    (value != NIL).then_some(value)
}

/// Encodes an optional offset as a stored link.
pub(crate) fn encode(link: Option<usize>) -> usize {
    link.unwrap_or(NIL)
}
