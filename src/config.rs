//! Compile-time operating parameters and runtime engine configuration.
//!
//! The hard constants fix the core's operating parameters exactly;
//! `EngineConfig` exposes the handful of values a host may
//! reasonably want to override at `Engine::new` time (render/decode rate,
//! buffer center) without touching the fixed-size array constants that
//! the rest of the crate relies on for layout.

/// Number of channel/patch/track slots. Fixed for the lifetime of the process.
pub const CHANNELS: usize = 16;

/// Default per-sample / per-track volume when nothing else has been set.
pub const DEFAULT_VOLUME: i8 = 127;

/// Default output sample rate in Hz.
pub const RENDER_RATE: u32 = 48_000;

/// Default tick rate in Hz. Must divide `RENDER_RATE`.
pub const DECODE_RATE: u32 = 240;

/// Stereo sample pairs rendered per tick at the default rates.
pub const BUFFER_SAMPLES: usize = (RENDER_RATE / DECODE_RATE) as usize;

/// Interleaved L,R shorts rendered per tick at the default rates.
pub const BUFFER_LEN: usize = 2 * BUFFER_SAMPLES;

/// Silence level written to unoccupied buffer cells.
pub const BUFFER_CENTER: i16 = 0;

/// Maximum number of samples a sample pack directory may declare.
pub const SAMPLES_MAXENTRIES: usize = 256;

/// Maximum length, in frames, of a single sample.
pub const SAMPLES_MAXLENGTH: usize = 32_768;

/// Depth of the bounded loop/call stack carried inside each patch and track.
pub const STACK_DEPTH: usize = 4;

/// Depth of the SFX dispatch and batch rings.
pub const DISPATCH_DEPTH: usize = 32;

/// Depth of the host->core request ring.
pub const REQUEST_DEPTH: usize = 32;

/// Opcode values at or above this terminate a patch script.
pub const PATCH_FOOTER: u8 = 8;

/// Opcode values at or above this terminate a music script.
pub const MUSIC_FOOTER: u8 = 13;

/// Sentinel `last_note` value meaning "no note has sounded yet".
pub const NOTE_INVALID: u8 = 0x80;

/// Loop/call-stack tag marking a `CALL` return frame (music VM only).
pub const CALL_TAG: i8 = -128;

/// Runtime-tunable knobs that don't affect the fixed-size layout of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Output sample rate in Hz, used by the sample store's phase-ratio precompute.
    pub render_rate: u32,
    /// Tick rate in Hz; `render_rate` must be an integer multiple of this.
    pub decode_rate: u32,
    /// Silence level written to unoccupied buffer cells and added during stamp.
    pub buffer_center: i16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_rate: RENDER_RATE,
            decode_rate: DECODE_RATE,
            buffer_center: BUFFER_CENTER,
        }
    }
}

impl EngineConfig {
    /// Stereo sample pairs rendered per tick under this configuration.
    pub fn buffer_samples(&self) -> usize {
        (self.render_rate / self.decode_rate) as usize
    }

    /// Interleaved L,R shorts rendered per tick under this configuration.
    pub fn buffer_len(&self) -> usize {
        2 * self.buffer_samples()
    }
}
