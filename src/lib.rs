//! CoreTone: a deterministic, fixed-point software wavetable synthesizer
//! core for a retro-console emulator's music/SFX channel.
//!
//! Given a sample pack, an instrument pack, and (at run time) music and SFX
//! binaries, [`Engine`] renders a stereo 16-bit PCM buffer one tick at a
//! time. There is no floating point in the render path, no dynamic
//! allocation once an [`Engine`] is constructed, and no interpolation
//! between sample points — see `SPEC_FULL.md` for the full contract this
//! crate implements.
//!
//! ```
//! use coretone::{Engine, EngineConfig};
//!
//! let sample_pack = {
//!     let mut p = Vec::new();
//!     p.extend_from_slice(b"CSMP");
//!     p.extend_from_slice(&0u32.to_le_bytes());
//!     p
//! };
//! let instrument_pack = {
//!     let mut p = Vec::new();
//!     p.extend_from_slice(b"CINS");
//!     p.extend_from_slice(&0u32.to_le_bytes());
//!     p
//! };
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! engine.init(&sample_pack, &instrument_pack).expect("valid packs");
//!
//! let mut buffer = [0i16; coretone::config::BUFFER_LEN];
//! engine.update(&mut buffer);
//! assert!(buffer.iter().all(|&s| s == coretone::config::BUFFER_CENTER));
//! ```

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fixed;
pub mod note_table;
pub mod pack;
pub mod patch;
pub mod queue;
pub mod track;
pub mod voice;

pub use config::EngineConfig;
pub use engine::{ChannelState, Engine, EngineInfo, EngineState, PatchState, RenderCallback, TrackState};
pub use error::CoreError;
