//! Binary pack parsing: `CSMP` / `CINS` / `CMUS` / `CSFX`.
//!
//! One file per format, following the directory-plus-data-area layout the
//! spec's §6 lays out, in the style of `zx-common`'s per-format modules:
//! a small header struct, a `from_bytes`-style parse that bounds-checks
//! before indexing, and no magic-union byte tricks (little-endian reads
//! are explicit shifts/masks throughout, per the "Byte layout and
//! endianness" design note).

pub mod instrument;
pub mod music;
pub mod sample;
pub mod sfx;

use crate::error::CoreError;

/// Reads a little-endian `u32` at `offset`, bounds-checked.
pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32, CoreError> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or(CoreError::Truncated)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Reads a little-endian `i32` (Q16.16) at `offset`, bounds-checked.
pub(crate) fn read_i32(data: &[u8], offset: usize) -> Result<i32, CoreError> {
    Ok(read_u32(data, offset)? as i32)
}

/// Reads a signed byte at `offset`, bounds-checked.
pub(crate) fn read_i8(data: &[u8], offset: usize) -> Result<i8, CoreError> {
    data.get(offset).copied().map(|b| b as i8).ok_or(CoreError::Truncated)
}

/// Validates a 4-byte magic header at the start of `data`.
pub(crate) fn check_magic(data: &[u8], magic: &[u8; 4]) -> Result<(), CoreError> {
    if data.len() < 4 || &data[0..4] != magic {
        return Err(CoreError::InvalidMagic);
    }
    Ok(())
}

/// Validates that `data`'s base address is 4-byte aligned, as packs that
/// carry a directory of `u32`/Q16.16 fields require.
pub(crate) fn check_aligned(data: &[u8]) -> Result<(), CoreError> {
    if !data.is_empty() && (data.as_ptr() as usize) % 4 != 0 {
        return Err(CoreError::Misaligned);
    }
    Ok(())
}
