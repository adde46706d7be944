//! Voice allocator: the three-pass priority scan that maps an SFX's patches
//! onto channels (spec §4.6).
//!
//! Scans in reverse index order so SFX fills from the top of the channel
//! array while music naturally claims from the bottom (tracks are paired
//! index-for-index with their channel), reducing collisions between the
//! two callers of this allocator.

use crate::channel::Channel;
use crate::pack::sample::SampleStore;
use crate::patch::Patch;
use crate::queue::SfxDispatch;
use crate::track::Track;

/// Dispatches every patch `req.sfx` declares onto an available channel,
/// stopping at the first patch that finds none (spec: "drop the remaining
/// patches of this SFX").
pub fn dispatch<'pack>(
    req: &SfxDispatch<'pack>,
    channels: &mut [Channel<'pack>],
    patches: &mut [Patch<'pack>],
    tracks: &[Track<'pack>],
    samples: &SampleStore<'pack>,
) {
    for sfx_patch in req.sfx.patches() {
        let Some(i) = find_channel(req.priority, patches, tracks) else {
            tracing::debug!(
                priority = req.priority,
                "sfx dispatch dropped: no channel available"
            );
            break;
        };

        let (pcm, len) = samples.get(sfx_patch.sample_id as usize);

        patches[i].priority = req.priority;
        patches[i].instrument = false;
        patches[i].bind_script(sfx_patch.script, 0);
        channels[i].set_sample(pcm, len);
        patches[i].key_on(&mut channels[i]);
        channels[i].pan_left = req.vol_left;
        channels[i].pan_right = req.vol_right;
    }
}

/// The reverse-scan, three-pass allocation rule. Returns the first channel
/// index that satisfies any pass, trying idle channels first, then SFX
/// slots, then finally stealing from music.
fn find_channel<'pack>(
    incoming_priority: i8,
    patches: &[Patch<'pack>],
    tracks: &[Track<'pack>],
) -> Option<usize> {
    let n = patches.len();

    // Pass 1: fully idle.
    for i in (0..n).rev() {
        if patches[i].priority == 0 && tracks[i].priority == 0 {
            return Some(i);
        }
    }
    // Pass 2: steal from a lower-priority SFX only (track itself idle).
    for i in (0..n).rev() {
        if patches[i].priority < incoming_priority && tracks[i].priority == 0 {
            return Some(i);
        }
    }
    // Pass 3: steal from music as a last resort.
    for i in (0..n).rev() {
        if patches[i].priority < incoming_priority {
            return Some(i);
        }
    }
    None
}
