//! Patch VM: the byte-coded instrument/SFX decoder (spec §4.3).
//!
//! A `Patch` owns no memory beyond its bounded loop/call stack; its script
//! is a borrowed slice shared with whichever instrument or SFX pack
//! dispatched it, and its current offset is just an index into that slice.

use crate::channel::{Channel, ChannelMode};
use crate::config::STACK_DEPTH;
use crate::fixed::{q16_16_from_le_bytes, Q16_16, Q8_8};

const END: u8 = 0;
const MODE_SINGLESHOT: u8 = 1;
const MODE_LOOP: u8 = 2;
const VOLUME: u8 = 3;
const FREQUENCY: u8 = 4;
const LOOP_START: u8 = 5;
const LOOP_END: u8 = 6;
const NOP: u8 = 7;

/// One loop/call-stack frame: a repeat count and the script offset to jump
/// back to.
#[derive(Debug, Clone, Copy, Default)]
struct StackFrame {
    count: i8,
    offset: u32,
}

/// A running instrument or SFX instance bound to one channel.
#[derive(Debug, Clone, Copy)]
pub struct Patch<'pack> {
    pub instrument: bool,
    pub priority: i8,
    script: &'pack [u8],
    pub offset: u32,
    pub note_off_offset: u32,
    delay: u32,
    pub freq_base: Q16_16,
    pub freq_pitch: Q16_16,
    pub pitch_adj: Q16_16,
    freq_offset: Q16_16,
    offset_adj: Q16_16,
    vol_cur: Q8_8,
    vol_adj: Q8_8,
    stack: [StackFrame; STACK_DEPTH],
    stack_pos: usize,
}

impl<'pack> Default for Patch<'pack> {
    fn default() -> Self {
        Self {
            instrument: false,
            priority: 0,
            script: &[],
            offset: 0,
            note_off_offset: 0,
            delay: 0,
            freq_base: 0,
            freq_pitch: 0,
            pitch_adj: 0,
            freq_offset: 0,
            offset_adj: 0,
            vol_cur: 0,
            vol_adj: 0,
            stack: [StackFrame::default(); STACK_DEPTH],
            stack_pos: 0,
        }
    }
}

impl<'pack> Patch<'pack> {
    pub fn is_idle(&self) -> bool {
        self.priority == 0
    }

    pub fn stack_len(&self) -> usize {
        self.stack_pos
    }

    /// Ticks remaining before the decoder resumes reading opcodes.
    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Current Q8.8 running volume (introspection only; rendering reads
    /// `channel.main_vol`, the high byte set by `recalc`).
    pub fn vol_cur(&self) -> Q8_8 {
        self.vol_cur
    }

    /// Binds a new script (from dispatch or a music NOTE_ON) without
    /// touching priority or the channel; callers set those separately.
    pub fn bind_script(&mut self, script: &'pack [u8], note_off_offset: u32) {
        self.script = script;
        self.note_off_offset = note_off_offset;
    }

    /// `patch_key_on` (§4.3): resets the decoder and channel phase for a
    /// fresh note, leaving `priority`/`instrument`/script binding alone.
    pub fn key_on(&mut self, channel: &mut Channel<'pack>) {
        channel.mode = ChannelMode::Off;
        channel.phase_acc = 0;
        self.freq_offset = 0;
        self.offset_adj = 0;
        self.vol_cur = 0;
        self.vol_adj = 0;
        self.offset = 0;
        self.stack_pos = 0;
        self.delay = 0;
    }

    /// `patch_key_off` (§4.3).
    pub fn key_off(&mut self, channel: &mut Channel<'pack>) {
        if self.instrument {
            self.offset = self.note_off_offset;
            self.stack_pos = 0;
            self.delay = 0;
        } else {
            channel.mode = ChannelMode::Off;
            self.priority = 0;
        }
    }

    fn terminate(&mut self, channel: &mut Channel<'pack>) {
        channel.mode = ChannelMode::Off;
        self.priority = 0;
        self.instrument = false;
    }

    fn read_u8(&self, at: u32) -> Option<u8> {
        self.script.get(at as usize).copied()
    }

    /// Consumes a MIDI-style variable-length delay starting at `self.offset`
    /// (which must already point at a byte with the top bit set). Never
    /// reads more than four bytes regardless of continuation bits.
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

    /// `patch_decode` (§4.3): runs until `delay != 0` or the script ends.
    pub fn decode(&mut self, channel: &mut Channel<'pack>) {
        while self.priority != 0 && self.delay == 0 {
            let Some(byte) = self.read_u8(self.offset) else {
                self.terminate(channel);
                return;
            };

            if byte & 0x80 != 0 {
                self.delay = self.consume_delay();
                continue;
            }

            self.offset += 1;
            match byte {
                END => {
                    self.terminate(channel);
                    return;
                }
                MODE_SINGLESHOT => {
                    channel.mode = ChannelMode::SingleShot;
                }
                MODE_LOOP => {
                    let lo = self.read_u16_le();
                    let hi = self.read_u16_le();
                    channel.loop_start = lo;
                    channel.loop_end = hi;
                    channel.mode = ChannelMode::Loop;
                }
                VOLUME => {
                    let vol = self.read_u8(self.offset).unwrap_or(0) as i16;
                    let adj_lo = self.read_u8(self.offset + 1).unwrap_or(0);
                    let adj_hi = self.read_u8(self.offset + 2).unwrap_or(0);
                    self.offset += 3;
                    self.vol_cur = vol << 8;
                    self.vol_adj = i16::from_le_bytes([adj_lo, adj_hi]);
                }
                FREQUENCY => {
                    let off_lo = [
                        self.read_u8(self.offset).unwrap_or(0),
                        self.read_u8(self.offset + 1).unwrap_or(0),
                    ];
                    let off_hi = [
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
                    self.freq_offset = q16_16_from_le_bytes(off_lo, off_hi);
                    self.offset_adj = q16_16_from_le_bytes(adj_lo, adj_hi);
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
                NOP => {}
                _ => {
                    self.terminate(channel);
                    return;
                }
            }
        }

        if self.priority != 0 {
            self.delay -= 1;
        }
    }

    fn read_u16_le(&mut self) -> u16 {
        let lo = self.read_u8(self.offset).unwrap_or(0);
        let hi = self.read_u8(self.offset + 1).unwrap_or(0);
        self.offset += 2;
        u16::from_le_bytes([lo, hi])
    }

    /// `patch_recalc` (§4.3): runs every tick after `decode`, even while
    /// idle (a no-op when `priority == 0` since nothing reads the result).
    pub fn recalc(&mut self, channel: &mut Channel<'pack>) {
        self.freq_pitch = self.freq_pitch.wrapping_add(self.pitch_adj);
        self.freq_offset = self.freq_offset.wrapping_add(self.offset_adj);
        channel.phase_inc = if self.instrument {
            self.freq_base
                .wrapping_add(self.freq_pitch)
                .wrapping_add(self.freq_offset)
        } else {
            self.freq_offset
        };
        self.vol_cur = self.vol_cur.wrapping_add(self.vol_adj);
        channel.main_vol = (self.vol_cur >> 8) as i8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Channel<'static> {
        Channel::default()
    }

    #[test]
    fn end_terminates_patch() {
        let mut patch = Patch::default();
        patch.priority = 1;
        patch.bind_script(&[END], 0);
        let mut ch = channel();
        patch.decode(&mut ch);
        assert_eq!(patch.priority, 0);
        assert_eq!(ch.mode, ChannelMode::Off);
    }

    #[test]
    fn unknown_opcode_terminates_patch() {
        let mut patch = Patch::default();
        patch.priority = 1;
        patch.bind_script(&[200], 0);
        let mut ch = channel();
        patch.decode(&mut ch);
        assert_eq!(patch.priority, 0);
    }

    #[test]
    fn mode_loop_sets_bounds_and_channel_mode() {
        let mut patch = Patch::default();
        patch.priority = 1;
        let script = [MODE_LOOP, 2, 0, 6, 0, END];
        patch.bind_script(&script, 0);
        let mut ch = channel();
        patch.decode(&mut ch);
        assert_eq!(ch.mode, ChannelMode::Loop);
        assert_eq!(ch.loop_start, 2);
        assert_eq!(ch.loop_end, 6);
    }

    #[test]
    fn volume_opcode_byte_order() {
        // §9 open question: adj high byte is the third operand byte, low
        // byte the second.
        let mut patch = Patch::default();
        patch.priority = 1;
        let script = [VOLUME, 127, 0x34, 0x12, END];
        patch.bind_script(&script, 0);
        let mut ch = channel();
        patch.decode(&mut ch);
        assert_eq!(patch.vol_cur, 127 << 8);
        assert_eq!(patch.vol_adj, 0x1234u16 as i16);
    }

    #[test]
    fn variable_length_delay_caps_at_four_bytes_and_delays_257_ticks() {
        // 0x81 0x02 END -> 1 + (2 << 7) = 257 ticks of delay.
        let script = [0x81, 0x02, END];
        let mut patch = Patch::default();
        patch.priority = 1;
        patch.bind_script(&script, 0);
        let mut ch = channel();

        for _ in 0..256 {
            patch.decode(&mut ch);
            assert_eq!(patch.priority, 1, "patch must still be active before tick 257");
        }
        patch.decode(&mut ch);
        assert_eq!(patch.priority, 0, "END must fire exactly on tick 257");
    }

    #[test]
    fn loop_start_end_repeats_fixed_count() {
        // LOOP_START count=2 at offset 2; body increments a counter via
        // NOP; LOOP_END at the end jumps back twice then falls through.
        let script = [LOOP_START, 2, NOP, LOOP_END, END];
        let mut patch = Patch::default();
        patch.priority = 1;
        patch.bind_script(&script, 0);
        let mut ch = channel();
        patch.decode(&mut ch);
        assert_eq!(patch.priority, 0); // single decode() call drains the whole script
    }

    #[test]
    fn loop_start_full_stack_is_silent_no_op() {
        // Each LOOP_START carries a nonzero count so it stays pushed; more
        // pushes than STACK_DEPTH must saturate rather than overflow.
        let mut script = Vec::new();
        for _ in 0..(STACK_DEPTH + 2) {
            script.push(LOOP_START);
            script.push(9);
        }
        script.push(END);
        let mut patch = Patch::default();
        patch.priority = 1;
        patch.bind_script(&script, 0);
        let mut ch = channel();
        patch.decode(&mut ch);
        assert_eq!(patch.stack_len(), STACK_DEPTH);
    }

    #[test]
    fn key_on_resets_decoder_state() {
        let mut patch = Patch::default();
        patch.offset = 99;
        patch.vol_cur = 5;
        patch.vol_adj = 3;
        patch.stack_pos = 2;
        patch.delay = 7;
        let mut ch = channel();
        ch.mode = ChannelMode::Loop;
        patch.key_on(&mut ch);
        assert_eq!(patch.offset, 0);
        assert_eq!(patch.vol_cur, 0);
        assert_eq!(patch.vol_adj, 0);
        assert_eq!(patch.stack_len(), 0);
        assert_eq!(patch.delay, 0);
        assert_eq!(ch.mode, ChannelMode::Off);
    }

    #[test]
    fn key_off_on_instrument_jumps_to_note_off() {
        let mut patch = Patch::default();
        patch.instrument = true;
        patch.note_off_offset = 42;
        patch.offset = 3;
        patch.stack_pos = 1;
        let mut ch = channel();
        patch.key_off(&mut ch);
        assert_eq!(patch.offset, 42);
        assert_eq!(patch.stack_len(), 0);
    }

    #[test]
    fn key_off_on_sfx_turns_channel_off_and_clears_priority() {
        let mut patch = Patch::default();
        patch.instrument = false;
        patch.priority = 5;
        let mut ch = channel();
        ch.mode = ChannelMode::SingleShot;
        patch.key_off(&mut ch);
        assert_eq!(ch.mode, ChannelMode::Off);
        assert_eq!(patch.priority, 0);
    }

    #[test]
    fn recalc_combines_base_pitch_and_offset_for_instruments() {
        let mut patch = Patch::default();
        patch.instrument = true;
        patch.priority = 1;
        patch.freq_base = 100;
        patch.freq_pitch = 10;
        patch.pitch_adj = 1;
        let mut ch = channel();
        patch.recalc(&mut ch);
        assert_eq!(ch.phase_inc, 100 + 11);
    }

    #[test]
    fn recalc_uses_only_freq_offset_for_sfx() {
        let mut patch = Patch::default();
        patch.instrument = false;
        patch.priority = 1;
        patch.freq_base = 999; // ignored for SFX
        patch.freq_offset = 42;
        let mut ch = channel();
        patch.recalc(&mut ch);
        assert_eq!(ch.phase_inc, 42);
    }

    #[test]
    fn recalc_sets_channel_main_vol_from_high_byte() {
        let mut patch = Patch::default();
        patch.vol_cur = 64 << 8;
        let mut ch = channel();
        patch.recalc(&mut ch);
        assert_eq!(ch.main_vol, 64);
    }
}
