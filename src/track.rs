//! Music VM: the byte-coded track decoder (spec §4.5).
//!
//! A `Track` drives note-on/off events into its paired `Patch` and shares
//! the same bounded loop/call stack shape, plus `CALL`/`RETURN`/`BREAK`
//! subroutine support that patches don't need.

use crate::channel::{Channel, ChannelMode};
use crate::config::{CALL_TAG, NOTE_INVALID, STACK_DEPTH};
use crate::fixed::{q16_16_from_le_bytes, q8_8_mul_high};
use crate::pack::instrument::InstrumentStore;
use crate::pack::sample::SampleStore;
use crate::patch::Patch;

/// The pack handles a `NOTE_ON` needs to resolve an instrument into a
/// playable sample and frequency. `None` when no instrument pack is
/// currently installed — `NOTE_ON` is then silently ignored, matching the
/// "runtime mutators no-op when not ready" policy (spec §7).
pub type Instruments<'a, 'pack> = Option<(&'a InstrumentStore<'pack>, &'a SampleStore<'pack>)>;

const SET_PRIORITY: u8 = 0;
const SET_PANNING: u8 = 1;
const SET_INSTRUMENT: u8 = 2;
const NOTE_ON: u8 = 3;
const NOTE_OFF: u8 = 4;
const PITCH: u8 = 5;
const LOOP_START: u8 = 6;
const LOOP_END: u8 = 7;
const CALL: u8 = 8;
const RETURN: u8 = 9;
const BREAK: u8 = 10;
const NOP: u8 = 11;
const SET_MOOD: u8 = 12;

#[derive(Debug, Clone, Copy, Default)]
struct StackFrame {
    /// `CALL_TAG` marks a call-return frame; any other value is a
    /// `LOOP_START` repeat count, same encoding as the patch VM.
    count: i8,
    offset: u32,
}

/// A running music-script instance, statically paired with one patch and
/// one channel at the same index.
#[derive(Debug, Clone, Copy)]
pub struct Track<'pack> {
    pub priority: i8,
    script: &'pack [u8],
    offset: u32,
    delay: u32,
    pub instrument_select: Option<usize>,
    pub last_note: u8,
    pub main_vol: i8,
    pub pan_left: i8,
    pub pan_right: i8,
    pub vol_left: i8,
    pub vol_right: i8,
    recalc_volume: bool,
    stack: [StackFrame; STACK_DEPTH],
    stack_pos: usize,
}

impl<'pack> Default for Track<'pack> {
    fn default() -> Self {
        Self {
            priority: 0,
            script: &[],
            offset: 0,
            delay: 0,
            instrument_select: None,
            last_note: NOTE_INVALID,
            main_vol: crate::config::DEFAULT_VOLUME,
            pan_left: 0,
            pan_right: 0,
            vol_left: 0,
            vol_right: 0,
            recalc_volume: true,
            stack: [StackFrame::default(); STACK_DEPTH],
            stack_pos: 0,
        }
    }
}

impl<'pack> Track<'pack> {
    pub fn is_idle(&self) -> bool {
        self.priority == 0
    }

    /// Binds a new script and priority at `music_setup` time, resetting
    /// decode state and pan back to `DEFAULT_VOLUME`; `atten_music` and
    /// `SET_PANNING` manage volume/pan independently after that.
    pub fn bind(&mut self, script: &'pack [u8], priority: i8) {
        self.script = script;
        self.priority = priority;
        self.offset = 0;
        self.delay = 0;
        self.stack_pos = 0;
        self.instrument_select = None;
        self.last_note = NOTE_INVALID;
        self.pan_left = crate::config::DEFAULT_VOLUME;
        self.pan_right = crate::config::DEFAULT_VOLUME;
        self.recalc_volume = true;
    }

    fn read_u8(&self, at: u32) -> Option<u8> {
        self.script.get(at as usize).copied()
    }

    fn terminate(&mut self, patch: &mut Patch<'pack>, channel: &mut Channel<'pack>) {
        self.priority = 0;
        if patch.instrument {
            channel.mode = ChannelMode::Off;
            patch.priority = 0;
            patch.instrument = false;
        }
    }

    /// `recalc_volume()` (§4.5): predoubled Q8.8 product, high byte kept.
    /// Runs before decode whenever dirty, and propagates to the channel if
    /// the paired patch currently belongs to this track's instrument.
    fn recalc_volume_if_dirty(&mut self, patch: &Patch<'pack>, channel: &mut Channel<'pack>) {
        if !self.recalc_volume {
            return;
        }
        let main = self.main_vol as i16;
        self.vol_left = q8_8_mul_high(main, self.pan_left, true);
        self.vol_right = q8_8_mul_high(main, self.pan_right, true);
        self.recalc_volume = false;
        if patch.instrument {
            channel.pan_left = self.vol_left;
            channel.pan_right = self.vol_right;
        }
    }

    fn consume_delay(&mut self) -> u32 {
        let mut delay: u32 = 0;
        for i in 0..4u32 {
            let Some(byte) = self.read_u8(self.offset) else {
                break;
            };
            self.offset += 1;
            delay |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                break;
            }
        }
        delay
    }

    fn read_i32_le(&mut self) -> i32 {
        let bytes = [
            self.read_u8(self.offset).unwrap_or(0),
            self.read_u8(self.offset + 1).unwrap_or(0),
            self.read_u8(self.offset + 2).unwrap_or(0),
            self.read_u8(self.offset + 3).unwrap_or(0),
        ];
        self.offset += 4;
        i32::from_le_bytes(bytes)
    }

    /// `music_decode` (§4.5 + §4.7 step 4), one tick of this track.
    ///
    /// `patch` and `channel` are this track's paired slots (same index).
    /// `instruments` resolves `SET_INSTRUMENT`/`NOTE_ON` against the
    /// installed instrument pack.
    ///
    /// Returns `true` if this tick executed a `BREAK`, signalling the
    /// caller to also unwind every *other* track to its nearest call frame
    /// (spec §4.5: "across all tracks") — this track's own stack is already
    /// unwound inline before returning.
    pub fn decode(
        &mut self,
        patch: &mut Patch<'pack>,
        channel: &mut Channel<'pack>,
        instruments: Instruments<'_, 'pack>,
        mood: &mut i32,
    ) -> bool {
        self.recalc_volume_if_dirty(patch, channel);
        let mut did_break = false;

        while self.priority != 0 && self.delay == 0 {
            let Some(byte) = self.read_u8(self.offset) else {
                self.terminate(patch, channel);
                return did_break;
            };

            if byte & 0x80 != 0 {
                self.delay = self.consume_delay();
                continue;
            }

            self.offset += 1;
            match byte {
                SET_PRIORITY => {
                    let p = self.read_u8(self.offset).unwrap_or(0) as i8;
                    self.offset += 1;
                    self.priority = p;
                    if p == 0 {
                        self.terminate(patch, channel);
                        return did_break;
                    }
                }
                SET_PANNING => {
                    let l = self.read_u8(self.offset).unwrap_or(0) as i8;
                    let r = self.read_u8(self.offset + 1).unwrap_or(0) as i8;
                    self.offset += 2;
                    self.pan_left = l;
                    self.pan_right = r;
                    self.recalc_volume = true;
                    self.recalc_volume_if_dirty(patch, channel);
                }
                SET_INSTRUMENT => {
                    let idx = self.read_u8(self.offset).unwrap_or(0) as usize;
                    self.offset += 1;
                    self.instrument_select = Some(idx);
                }
                NOTE_ON => {
                    let note = self.read_u8(self.offset).unwrap_or(0);
                    self.offset += 1;
                    self.last_note = note;
                    self.note_on(patch, channel, instruments, note);
                }
                NOTE_OFF => {
                    if patch.instrument {
                        patch.key_off(channel);
                    }
                }
                PITCH => {
                    let pitch_lo = [
                        self.read_u8(self.offset).unwrap_or(0),
                        self.read_u8(self.offset + 1).unwrap_or(0),
                    ];
                    let pitch_hi = [
                        self.read_u8(self.offset + 2).unwrap_or(0),
                        self.read_u8(self.offset + 3).unwrap_or(0),
                    ];
                    let adj_lo = [
                        self.read_u8(self.offset + 4).unwrap_or(0),
                        self.read_u8(self.offset + 5).unwrap_or(0),
                    ];
                    let adj_hi = [
                        self.read_u8(self.offset + 6).unwrap_or(0),
                        self.read_u8(self.offset + 7).unwrap_or(0),
                    ];
                    self.offset += 8;
                    patch.freq_pitch = q16_16_from_le_bytes(pitch_lo, pitch_hi);
                    patch.pitch_adj = q16_16_from_le_bytes(adj_lo, adj_hi);
                }
                LOOP_START => {
                    let count = self.read_u8(self.offset).unwrap_or(0) as i8;
                    self.offset += 1;
                    if self.stack_pos < STACK_DEPTH {
                        self.stack[self.stack_pos] = StackFrame {
                            count,
                            offset: self.offset,
                        };
                        self.stack_pos += 1;
                    }
                }
                LOOP_END => {
                    if self.stack_pos > 0 {
                        let top = &mut self.stack[self.stack_pos - 1];
                        if top.count == 0 || top.count == 1 {
                            self.stack_pos -= 1;
                        } else if top.count < 0 {
                            self.offset = top.offset;
                        } else {
                            self.offset = top.offset;
                            top.count -= 1;
                        }
                    }
                }
                CALL => {
                    let rel = self.read_i32_le();
                    let return_offset = self.offset;
                    if self.stack_pos < STACK_DEPTH {
                        self.stack[self.stack_pos] = StackFrame {
                            count: CALL_TAG,
                            offset: return_offset,
                        };
                        self.stack_pos += 1;
                    }
                    self.offset = (return_offset as i64 + rel as i64) as u32;
                }
                RETURN => {
                    while self.stack_pos > 0 && self.stack[self.stack_pos - 1].count != CALL_TAG {
                        self.stack_pos -= 1;
                    }
                    if self.stack_pos > 0 {
                        self.stack_pos -= 1;
                        self.offset = self.stack[self.stack_pos].offset;
                    }
                }
                BREAK => {
                    self.unwind_to_call_frame();
                    did_break = true;
                }
                NOP => {}
                SET_MOOD => {
                    *mood = self.read_i32_le();
                }
                _ => {
                    self.terminate(patch, channel);
                    return did_break;
                }
            }
        }

        if self.priority != 0 {
            self.delay -= 1;
        }
        did_break
    }

    /// The `BREAK` handler's effect on a single track, called by the
    /// engine for every track when any one of them emits `BREAK` (§4.5:
    /// "across all tracks").
    pub fn unwind_to_call_frame(&mut self) {
        while self.stack_pos > 0 && self.stack[self.stack_pos - 1].count != CALL_TAG {
            self.stack_pos -= 1;
        }
        if self.stack_pos > 0 {
            self.stack_pos -= 1;
            self.offset = self.stack[self.stack_pos].offset;
        }
        self.delay = 0;
    }

    fn note_on(
        &mut self,
        patch: &mut Patch<'pack>,
        channel: &mut Channel<'pack>,
        instruments: Instruments<'_, 'pack>,
        note: u8,
    ) {
        let Some((instruments, samples)) = instruments else {
            return;
        };
        let Some(idx) = self.instrument_select else {
            return;
        };
        let Some(inst) = instruments.get(idx) else {
            return;
        };

        let eligible = patch.is_idle() || patch.instrument || patch.priority < self.priority;
        if !eligible {
            return;
        }

        let freq_hz = instruments.note_hz(note);
        let sample_idx = inst.sample_id as usize;
        let (pcm, len) = samples.get(sample_idx);

        patch.instrument = true;
        patch.priority = self.priority;
        patch.bind_script(inst.script, inst.note_off_offset);
        patch.freq_base = samples.calc_phase(sample_idx, freq_hz);
        patch.key_on(channel);
        channel.set_sample(pcm, len);
        channel.pan_left = self.vol_left;
        channel.pan_right = self.vol_right;
    }

    pub fn stack_len(&self) -> usize {
        self.stack_pos
    }

    /// Marks the volume dirty so the next `decode` call recomputes
    /// `vol_left`/`vol_right` before running any opcodes. Used by the
    /// engine's `atten_music` step (§4.7 step 3), which changes `main_vol`
    /// outside of a `SET_PANNING` opcode.
    pub fn mark_recalc_volume(&mut self) {
        self.recalc_volume = true;
    }

    pub fn script_offset(&self) -> u32 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_priority_zero_kills_owned_instrument() {
        let mut track = Track::default();
        track.bind(&[SET_PRIORITY, 0], 4);
        let mut patch = Patch::default();
        patch.instrument = true;
        patch.priority = 4;
        let mut ch = Channel::default();
        ch.mode = crate::channel::ChannelMode::SingleShot;
        let mut mood = 0;
        track.decode(&mut patch, &mut ch, None, &mut mood);
        assert_eq!(track.priority, 0);
        assert_eq!(patch.priority, 0);
        assert_eq!(ch.mode, crate::channel::ChannelMode::Off);
    }

    #[test]
    fn set_panning_marks_recalc_and_propagates_to_instrument_channel() {
        let mut track = Track::default();
        track.main_vol = 127;
        track.bind(&[SET_PANNING, 127, 0, SET_PRIORITY, 1], 1);
        let mut patch = Patch::default();
        patch.instrument = true;
        let mut ch = Channel::default();
        let mut mood = 0;
        track.decode(&mut patch, &mut ch, None, &mut mood);
        assert_eq!(track.vol_right, 0);
        assert_eq!(ch.pan_left, track.vol_left);
    }

    #[test]
    fn unknown_opcode_terminates_track_and_owned_instrument() {
        let mut track = Track::default();
        track.bind(&[250], 3);
        let mut patch = Patch::default();
        patch.instrument = true;
        patch.priority = 3;
        let mut ch = Channel::default();
        let mut mood = 0;
        track.decode(&mut patch, &mut ch, None, &mut mood);
        assert_eq!(track.priority, 0);
        assert_eq!(patch.priority, 0);
        assert_eq!(patch.instrument, false);
    }

    #[test]
    fn call_pushes_return_frame_and_jumps() {
        // CALL +2 (skip the NOP right after the operand), then RETURN.
        let script = [CALL, 2, 0, 0, 0, NOP, NOP, RETURN, SET_PRIORITY, 0];
        let mut track = Track::default();
        track.bind(&script, 1);
        let mut patch = Patch::default();
        let mut ch = Channel::default();
        let mut mood = 0;
        track.decode(&mut patch, &mut ch, None, &mut mood);
        // RETURN lands back right after the CALL operand (offset 5), then
        // runs the trailing NOP and SET_PRIORITY 0.
        assert_eq!(track.priority, 0);
    }

    #[test]
    fn break_unwinds_a_single_call_frame_and_clears_delay() {
        let script = [CALL, 3, 0, 0, 0, 0x81, 0x00, NOP, NOP, NOP];
        let mut track = Track::default();
        track.bind(&script, 1);
        track.delay = 0;
        // Manually push a call frame as CALL would, then invoke BREAK logic.
        track.stack[0] = StackFrame {
            count: CALL_TAG,
            offset: 5,
        };
        track.stack_pos = 1;
        track.delay = 9;
        track.unwind_to_call_frame();
        assert_eq!(track.stack_len(), 0);
        assert_eq!(track.script_offset(), 5);
        assert_eq!(track.delay, 0);
    }

    #[test]
    fn loop_start_full_stack_saturates() {
        let mut script = Vec::new();
        for _ in 0..(STACK_DEPTH + 2) {
            script.push(LOOP_START);
            script.push(9);
        }
        script.push(SET_PRIORITY);
        script.push(0);
        let mut track = Track::default();
        track.bind(&script, 1);
        let mut patch = Patch::default();
        let mut ch = Channel::default();
        let mut mood = 0;
        track.decode(&mut patch, &mut ch, None, &mut mood);
        assert_eq!(track.stack_len(), STACK_DEPTH);
    }

    #[test]
    fn variable_length_delay_caps_at_four_bytes() {
        let script = [0x81, 0x02, SET_PRIORITY, 0];
        let mut track = Track::default();
        track.bind(&script, 1);
        let mut patch = Patch::default();
        let mut ch = Channel::default();
        let mut mood = 0;
        for _ in 0..256 {
            track.decode(&mut patch, &mut ch, None, &mut mood);
            assert_eq!(track.priority, 1);
        }
        track.decode(&mut patch, &mut ch, None, &mut mood);
        assert_eq!(track.priority, 0);
    }
}
