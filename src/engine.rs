//! The single owned `Engine` value and its `update()` scheduler.
//!
//! Every operation the public API exposes is a method on one value instead
//! of a set of process-wide globals — the same shape `nethercore-zx` uses
//! for its `ZRollbackState`, just mutable and audio-rate rather than
//! snapshot-and-rollback.

use bytemuck::{Pod, Zeroable};

use crate::channel::{Channel, ChannelMode};
use crate::config::{EngineConfig, CHANNELS, DISPATCH_DEPTH, REQUEST_DEPTH};
use crate::error::CoreError;
use crate::pack::instrument::InstrumentStore;
use crate::pack::music::MusicPack;
use crate::pack::sample::SampleStore;
use crate::pack::sfx::SfxBinary;
use crate::patch::Patch;
use crate::queue::{Action, Ring, SfxDispatch};
use crate::track::Track;
use crate::voice;

/// Post-render callback contract: invoked once per tick after rendering;
/// returning zero de-installs it.
pub type RenderCallback = Box<dyn FnMut(&[i16], u32, usize, bool) -> i32>;

/// The one entry point for the whole core. Holds every pack reference,
/// fixed-size state array, and queue; the host places this behind whatever
/// synchronisation it chooses (see `lock_hint`).
pub struct Engine<'pack> {
    config: EngineConfig,
    ready: bool,

    samples: Option<SampleStore<'pack>>,
    instruments: Option<InstrumentStore<'pack>>,
    music: Option<MusicPack<'pack>>,

    channels: [Channel<'pack>; CHANNELS],
    patches: [Patch<'pack>; CHANNELS],
    tracks: [Track<'pack>; CHANNELS],

    paused: bool,
    music_playing: bool,
    mood: i32,

    music_stop_req: bool,
    all_stop_req: bool,
    music_play_req: Option<&'pack [u8]>,
    music_atten_req: Option<i8>,

    dispatch_ring: Ring<SfxDispatch<'pack>>,
    batch_ring: Ring<SfxDispatch<'pack>>,
    action_ring: Ring<Action>,

    render_call: Option<RenderCallback>,
}

impl<'pack> Engine<'pack> {
    /// Builds an idle engine. `init` must still succeed before any
    /// rendering or music/SFX mutator has an effect.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ready: false,
            samples: None,
            instruments: None,
            music: None,
            channels: [Channel::default(); CHANNELS],
            patches: [Patch::default(); CHANNELS],
            tracks: [Track::default(); CHANNELS],
            paused: false,
            music_playing: false,
            mood: 0,
            music_stop_req: false,
            all_stop_req: false,
            music_play_req: None,
            music_atten_req: None,
            dispatch_ring: Ring::new(DISPATCH_DEPTH),
            batch_ring: Ring::new(DISPATCH_DEPTH),
            action_ring: Ring::new(REQUEST_DEPTH),
            render_call: None,
        }
    }

    // ---- Setup -----------------------------------------------------

    /// Validates and installs the sample and instrument packs. On any
    /// validation failure the engine is left exactly as it was before the
    /// call.
    pub fn init(&mut self, sample_pack: &'pack [u8], instrument_pack: &'pack [u8]) -> Result<(), CoreError> {
        let samples = SampleStore::setup(sample_pack, self.config.render_rate)?;
        let instruments = InstrumentStore::setup(instrument_pack)?;
        self.samples = Some(samples);
        self.instruments = Some(instruments);
        self.ready = true;
        tracing::info!("coretone engine initialised");
        Ok(())
    }

    fn require_ready(&self) -> bool {
        if !self.ready {
            tracing::debug!("coretone call ignored: engine not ready");
        }
        self.ready
    }

    // ---- Transport ---------------------------------------------------

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Requests a full stop, processed at the top of the next `update()`.
    pub fn stop_all(&mut self) {
        self.all_stop_req = true;
    }

    pub fn set_render_call(&mut self, cb: Option<RenderCallback>) {
        self.render_call = cb;
    }

    /// The mutex API is a documented stub: real synchronisation is the
    /// host's responsibility.
    pub fn lock_hint(&self) -> Result<(), CoreError> {
        Err(CoreError::Unimplemented)
    }

    // ---- Music ---------------------------------------------------------

    pub fn play_music(&mut self, music_pack: &'pack [u8]) {
        if !self.require_ready() {
            return;
        }
        self.music_play_req = Some(music_pack);
    }

    pub fn stop_music(&mut self) {
        self.music_stop_req = true;
    }

    pub fn atten_music(&mut self, volume: i8) {
        if !self.require_ready() {
            return;
        }
        self.music_atten_req = Some(volume);
    }

    pub fn check_music(&self) -> bool {
        self.music_playing
    }

    pub fn get_mood(&self) -> i32 {
        self.mood
    }

    // ---- SFX -------------------------------------------------------------

    /// Parses `sfx` and enqueues it onto the dispatch ring for the next
    /// `update()`'s SFX drain. A malformed binary or a full ring silently
    /// drops the request.
    pub fn play_sfx(&mut self, sfx: &'pack [u8], priority: i8, vol_left: i8, vol_right: i8) {
        self.enqueue_sfx(sfx, priority, vol_left, vol_right, false);
    }

    /// Enqueues a `StopSfx` action, drained during the next `update()`.
    pub fn stop_sfx(&mut self, priority: i8) {
        if !self.require_ready() || priority == 0 {
            return;
        }
        if !self.action_ring.push(Action::StopSfx(priority)) {
            tracing::debug!("action ring full: stop_sfx dropped");
        }
    }

    /// `add_sfx`: enqueues onto the batch ring instead of dispatch; only
    /// `dump_sfx` makes it eligible for allocation.
    pub fn add_sfx(&mut self, sfx: &'pack [u8], priority: i8, vol_left: i8, vol_right: i8) {
        self.enqueue_sfx(sfx, priority, vol_left, vol_right, true);
    }

    fn enqueue_sfx(&mut self, sfx: &'pack [u8], priority: i8, vol_left: i8, vol_right: i8, batch: bool) {
        if !self.require_ready() || priority == 0 {
            return;
        }
        let sfx = match SfxBinary::setup(sfx) {
            Ok(sfx) => sfx,
            Err(err) => {
                tracing::warn!(%err, "sfx binary rejected");
                return;
            }
        };
        let req = SfxDispatch {
            sfx,
            priority,
            vol_left,
            vol_right,
        };
        let ring = if batch { &mut self.batch_ring } else { &mut self.dispatch_ring };
        if !ring.push(req) {
            tracing::debug!(priority, "sfx ring full, request dropped");
        }
    }

    /// Moves every currently-queued batch entry onto the dispatch ring.
    /// Drains the whole batch ring even if the dispatch ring fills partway
    /// through — overflow is a silent drop, not a reason to leave stale
    /// entries sitting in the batch ring.
    pub fn dump_sfx(&mut self) {
        while let Some(req) = self.batch_ring.pop() {
            if !self.dispatch_ring.push(req) {
                tracing::debug!("dispatch ring full during dump_sfx, entry dropped");
            }
        }
    }

    // ---- Introspection -----------------------------------------------

    pub fn get_state(&self) -> EngineState {
        let mut channels = [ChannelState::default(); CHANNELS];
        let mut patches = [PatchState::default(); CHANNELS];
        let mut tracks = [TrackState::default(); CHANNELS];

        for i in 0..CHANNELS {
            channels[i] = ChannelState {
                mode: match self.channels[i].mode {
                    ChannelMode::Off => 0,
                    ChannelMode::SingleShot => 1,
                    ChannelMode::Loop => 2,
                },
                phase_acc: self.channels[i].phase_acc,
                phase_inc: self.channels[i].phase_inc,
                sample_len: self.channels[i].sample_len() as u32,
                loop_start: self.channels[i].loop_start as u32,
                loop_end: self.channels[i].loop_end as u32,
                main_vol: self.channels[i].main_vol as i32,
                pan_left: self.channels[i].pan_left as i32,
                pan_right: self.channels[i].pan_right as i32,
            };
            patches[i] = PatchState {
                instrument: self.patches[i].instrument as u32,
                priority: self.patches[i].priority as i32,
                offset: self.patches[i].offset,
                delay: self.patches[i].delay(),
                freq_base: self.patches[i].freq_base,
                vol_cur: self.patches[i].vol_cur() as i32,
                stack_len: self.patches[i].stack_len() as u32,
            };
            tracks[i] = TrackState {
                priority: self.tracks[i].priority as i32,
                instrument_select: self.tracks[i]
                    .instrument_select
                    .map(|v| v as i32)
                    .unwrap_or(-1),
                last_note: self.tracks[i].last_note as u32,
                main_vol: self.tracks[i].main_vol as i32,
                vol_left: self.tracks[i].vol_left as i32,
                vol_right: self.tracks[i].vol_right as i32,
                stack_len: self.tracks[i].stack_len() as u32,
                script_offset: self.tracks[i].script_offset(),
            };
        }

        EngineState { channels, patches, tracks }
    }

    pub fn get_info(&self) -> EngineInfo {
        EngineInfo {
            channels: CHANNELS as u32,
            render_rate: self.config.render_rate,
            decode_rate: self.config.decode_rate,
            samples_max_entries: crate::config::SAMPLES_MAXENTRIES as u32,
            samples_max_length: crate::config::SAMPLES_MAXLENGTH as u32,
        }
    }

    // ---- Tick scheduler (spec §4.7) -----------------------------------

    /// Runs exactly one tick: stops, music play/atten/decode, SFX dispatch
    /// drain, action drain, patch decode+render, callback. Writes exactly
    /// `buffer.len()` shorts.
    pub fn update(&mut self, buffer: &mut [i16]) {
        self.step_stops();
        self.step_music_play();
        self.step_music_atten();
        self.step_music_decode();
        self.step_sfx_dispatch();
        self.step_actions();
        self.step_render(buffer);
        self.step_callback(buffer);
    }

    fn step_stops(&mut self) {
        if !self.music_stop_req && !self.all_stop_req {
            return;
        }
        for i in 0..CHANNELS {
            self.tracks[i].priority = 0;
            if self.patches[i].instrument || self.all_stop_req {
                self.patches[i].priority = 0;
                self.patches[i].instrument = false;
                self.channels[i].mode = ChannelMode::Off;
            }
        }
        self.music_playing = false;
        self.mood = 0;
        self.music_stop_req = false;
        self.all_stop_req = false;
    }

    fn step_music_play(&mut self) {
        let Some(pack) = self.music_play_req.take() else {
            return;
        };
        match MusicPack::setup(pack) {
            Ok(music) => {
                for i in 0..CHANNELS {
                    match music.get(i) {
                        Some(t) => self.tracks[i].bind(t.script, t.priority),
                        None => self.tracks[i].bind(&[], 0),
                    }
                    self.patches[i].freq_pitch = 0;
                    self.patches[i].pitch_adj = 0;
                }
                self.music = Some(music);
                self.music_playing = true;
                self.mood = 0;
            }
            Err(err) => {
                tracing::warn!(%err, "music pack rejected by music_setup");
            }
        }
    }

    fn step_music_atten(&mut self) {
        let Some(volume) = self.music_atten_req.take() else {
            return;
        };
        for track in &mut self.tracks {
            track.main_vol = volume;
            track.mark_recalc_volume();
        }
    }

    fn step_music_decode(&mut self) {
        if !self.music_playing || self.paused {
            return;
        }
        let mut any_active = false;
        for i in 0..CHANNELS {
            let broke = self.tracks[i].decode(
                &mut self.patches[i],
                &mut self.channels[i],
                self.instruments.as_ref().zip(self.samples.as_ref()),
                &mut self.mood,
            );
            if broke {
                for j in 0..CHANNELS {
                    if j != i {
                        self.tracks[j].unwind_to_call_frame();
                    }
                }
            }
            if self.tracks[i].priority != 0 {
                any_active = true;
            }
        }
        if !any_active {
            self.music_playing = false;
            self.mood = 0;
        }
    }

    fn step_sfx_dispatch(&mut self) {
        let Some(samples) = self.samples.as_ref() else {
            return;
        };
        while let Some(req) = self.dispatch_ring.pop() {
            voice::dispatch(&req, &mut self.channels, &mut self.patches, &self.tracks, samples);
        }
    }

    fn step_actions(&mut self) {
        while let Some(action) = self.action_ring.pop() {
            match action {
                Action::StopSfx(priority) => {
                    for i in 0..CHANNELS {
                        if !self.patches[i].instrument && self.patches[i].priority == priority {
                            self.patches[i].priority = 0;
                            self.channels[i].mode = ChannelMode::Off;
                        }
                    }
                }
            }
        }
    }

    fn step_render(&mut self, buffer: &mut [i16]) {
        let mut rendered_any = false;
        if !self.paused {
            let mut first = true;
            for i in 0..CHANNELS {
                if self.patches[i].priority != 0 {
                    self.patches[i].decode(&mut self.channels[i]);
                    self.patches[i].recalc(&mut self.channels[i]);
                }
                if self.channels[i].mode != ChannelMode::Off {
                    self.channels[i].render(buffer, first, self.config.buffer_center);
                    first = false;
                    rendered_any = true;
                }
            }
        }
        if !rendered_any {
            buffer.fill(self.config.buffer_center);
        }
    }

    fn step_callback(&mut self, buffer: &[i16]) {
        let Some(cb) = self.render_call.as_mut() else {
            return;
        };
        let stereo_samples = buffer.len() / 2;
        let result = cb(buffer, self.config.render_rate, stereo_samples, self.paused);
        if result == 0 {
            self.render_call = None;
        }
    }
}

/// `get_info()` snapshot (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineInfo {
    pub channels: u32,
    pub render_rate: u32,
    pub decode_rate: u32,
    pub samples_max_entries: u32,
    pub samples_max_length: u32,
}

/// `get_state()` snapshot (spec §6): zero-copy, byte-stable introspection
/// view, distinct from the live VM structs (see SPEC_FULL.md §3 "layout
/// annotations").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct EngineState {
    pub channels: [ChannelState; CHANNELS],
    pub patches: [PatchState; CHANNELS],
    pub tracks: [TrackState; CHANNELS],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ChannelState {
    pub mode: u32,
    pub phase_acc: i32,
    pub phase_inc: i32,
    pub sample_len: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub main_vol: i32,
    pub pan_left: i32,
    pub pan_right: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PatchState {
    pub instrument: u32,
    pub priority: i32,
    pub offset: u32,
    pub delay: u32,
    pub freq_base: i32,
    pub vol_cur: i32,
    pub stack_len: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct TrackState {
    pub priority: i32,
    pub instrument_select: i32,
    pub last_note: u32,
    pub main_vol: i32,
    pub vol_left: i32,
    pub vol_right: i32,
    pub stack_len: u32,
    pub script_offset: u32,
}
