//! Music pack (`CMUS`): directory + music-VM byte scripts.
//!
//! Unlike the other three pack formats, `CMUS` carries no alignment
//! requirement (its directory entries are a mix of `i8` and misaligned
//! `u32`, spec §6), so `setup` skips `check_aligned`.

use crate::error::CoreError;

use super::{check_magic, read_i8, read_u32};

/// Upper bound on music-pack track count; equal to the channel count since
/// the core pairs exactly one track per channel (spec §3 "Track").
pub const TRACKS_MAXENTRIES: usize = crate::config::CHANNELS;

const MAGIC: &[u8; 4] = b"CMUS";
const DIRECTORY_ENTRY_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
struct TrackEntry {
    priority: i8,
    script_offset: u32,
}

/// A resolved track: its configured priority and where its music script
/// begins.
#[derive(Debug, Clone, Copy)]
pub struct TrackScript<'pack> {
    pub priority: i8,
    pub script: &'pack [u8],
}

/// Validated `CMUS` pack.
pub struct MusicPack<'pack> {
    data: &'pack [u8],
    entries: [TrackEntry; TRACKS_MAXENTRIES],
    count: usize,
}

impl<'pack> MusicPack<'pack> {
    /// Validates `pack`. Tracks beyond `TRACKS_MAXENTRIES` are ignored
    /// rather than rejected outright, since a track with no paired
    /// channel simply never plays (spec §3 "Each track is statically
    /// paired with one patch and one channel").
    pub fn setup(pack: &'pack [u8]) -> Result<Self, CoreError> {
        check_magic(pack, MAGIC)?;

        let declared = read_u32(pack, 4)? as usize;
        let count = declared.min(TRACKS_MAXENTRIES);

        let dir_end = 8 + declared * DIRECTORY_ENTRY_SIZE;
        if pack.len() < dir_end {
            return Err(CoreError::Truncated);
        }

        let mut entries = [TrackEntry::default(); TRACKS_MAXENTRIES];
        for (i, slot) in entries.iter_mut().enumerate().take(count) {
            let base = 8 + i * DIRECTORY_ENTRY_SIZE;
            let priority = read_i8(pack, base)?;
            let script_offset = read_u32(pack, base + 1)?;
            if script_offset as usize > pack.len() {
                return Err(CoreError::Truncated);
            }
            *slot = TrackEntry {
                priority,
                script_offset,
            };
        }

        tracing::debug!(count, declared, "music pack validated");

        Ok(Self {
            data: pack,
            entries,
            count,
        })
    }

    /// Track `index`'s configured priority and script, if it has a paired
    /// channel slot.
    pub fn get(&self, index: usize) -> Option<TrackScript<'pack>> {
        if index >= self.count {
            return None;
        }
        let entry = self.entries[index];
        Some(TrackScript {
            priority: entry.priority,
            script: &self.data[entry.script_offset as usize..],
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pack(entries: &[(i8, u32)], data: &[u8]) -> Vec<u8> {
        let mut pack = Vec::new();
        pack.extend_from_slice(b"CMUS");
        pack.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for &(priority, script_offset) in entries {
            pack.push(priority as u8);
            pack.extend_from_slice(&script_offset.to_le_bytes());
        }
        pack.extend_from_slice(data);
        pack
    }

    #[test]
    fn rejects_bad_magic() {
        let mut pack = build_pack(&[], &[]);
        pack[0] = b'X';
        assert_eq!(MusicPack::setup(&pack).unwrap_err(), CoreError::InvalidMagic);
    }

    #[test]
    fn resolves_track_script() {
        let script = [9u8, 9, 9];
        let pack = build_pack(&[(4, 13)], &script);
        let store = MusicPack::setup(&pack).unwrap();
        let t = store.get(0).unwrap();
        assert_eq!(t.priority, 4);
        assert_eq!(t.script, &script);
    }

    #[test]
    fn excess_tracks_beyond_channel_count_are_ignored() {
        let entries: Vec<(i8, u32)> = (0..(TRACKS_MAXENTRIES as u32 + 3))
            .map(|i| (1i8, 8 + i))
            .collect();
        let pack = build_pack(&entries, &[]);
        let store = MusicPack::setup(&pack).unwrap();
        assert_eq!(store.len(), TRACKS_MAXENTRIES);
    }
}
