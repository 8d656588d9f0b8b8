//! The mixer engine
//!
//! Owns the track registry and the output-buffer arena, selects process and
//! track hooks whenever configuration changes, and drives one output block
//! per `process()` call. Tracks sharing a main buffer form a group whose
//! accumulator is cleared exactly once per cycle; within a group, tracks
//! are summed in ascending name order.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use sm_core::convert::{f32_from_q4_27_slice, i16_from_f32_slice, i16_from_q4_27_slice};
use sm_core::fixed::{clamp16, float_from_q4_27, StereoGain, UNITY_GAIN_FLOAT};
use sm_core::{
    BufferProvider, ChannelMask, MixError, MixResult, PcmFormat, MAX_NUM_CHANNELS, MAX_NUM_VOLUMES,
};
use sm_dsp::{AccBuffer, InputSlice, MixType};

use crate::track::{
    get_track_hook, needs, run_mix, run_mix_save, track_16bits_mono, track_16bits_stereo,
    volume_ramp_stereo, volume_stereo, wrap_provider, SaveSlice, Track, TrackHook, TrackType,
};

/// Frames accumulated per inner iteration of the no-resample path.
const BLOCKSIZE: usize = 16;

/// Handle to a mixer-owned output region (main or aux buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Typed control surface, one variant per recognised `{target, param}`
/// pair. Values the original passed through `void*` are carried in the
/// variant payloads; unknown pairs are unrepresentable.
#[derive(Debug, Clone, Copy)]
pub enum Param {
    // track configuration
    ChannelMask(ChannelMask),
    MixerChannelMask(ChannelMask),
    Format(PcmFormat),
    MixerFormat(PcmFormat),
    MainBuffer(Option<BufferId>),
    AuxBuffer(Option<BufferId>),
    TeeBuffer(Option<BufferId>),
    TeeBufferFrameCount(usize),
    // sample-rate conversion
    SampleRate(u32),
    ResetResampler,
    RemoveResampler,
    // gain; `ramp` spreads the change over one output block
    Volume { channel: usize, value: f32, ramp: bool },
    AuxLevel { value: f32, ramp: bool },
}

/// Process-level hook selected by the validate pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessHook {
    /// Zero the outputs and drain the providers.
    Nop,
    /// Block loop through a stack accumulator.
    GenericNoResampling,
    /// Whole-cycle accumulation through the heap temporaries.
    GenericResampling,
    /// Single track, no resampling: write the sink encoding directly.
    OneTrack,
}

/// Multi-track PCM mixer producing `frame_count` frames per process call.
pub struct Mixer {
    sample_rate: u32,
    frame_count: usize,
    /// Float mixing plane ("new mixer path"); false selects the 16-bit
    /// plane with the legacy stereo fast paths.
    use_float_mix: bool,

    tracks: BTreeMap<i32, Track>,
    /// Enabled track names, ascending.
    enabled: Vec<i32>,
    /// Main-buffer id -> names sharing it, each list ascending.
    groups: BTreeMap<usize, SmallVec<[i32; 4]>>,

    hook: ProcessHook,
    needs_validate: bool,

    /// Output-region arena; word-backed so every sink encoding can view it.
    buffers: Vec<Vec<i32>>,

    // shared temporaries, allocated on transition into a resampling
    // configuration and reused afterwards
    output_temp_q: Vec<i32>,
    output_temp_f: Vec<f32>,
    resample_temp_q: Vec<i32>,
    resample_temp_f: Vec<f32>,
}

impl Mixer {
    /// Float-plane mixer. `frame_count` is immutable for the mixer's
    /// lifetime.
    pub fn new(frame_count: usize, sample_rate: u32) -> Self {
        Self::with_plane(frame_count, sample_rate, true)
    }

    /// 16-bit-plane mixer retaining the legacy stereo fast paths, for
    /// bit-exact output on 16-bit stereo sinks.
    pub fn new_legacy(frame_count: usize, sample_rate: u32) -> Self {
        Self::with_plane(frame_count, sample_rate, false)
    }

    fn with_plane(frame_count: usize, sample_rate: u32, use_float_mix: bool) -> Self {
        assert!(frame_count > 0, "zero frame count");
        assert!(sample_rate > 0, "zero sample rate");
        Self {
            sample_rate,
            frame_count,
            use_float_mix,
            tracks: BTreeMap::new(),
            enabled: Vec::new(),
            groups: BTreeMap::new(),
            hook: ProcessHook::Nop,
            needs_validate: false,
            buffers: Vec::new(),
            output_temp_q: Vec::new(),
            output_temp_f: Vec::new(),
            resample_temp_q: Vec::new(),
            resample_temp_f: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    // ---- output-buffer arena ----

    /// Allocate a main (mix) buffer sized for any channel count and sink
    /// encoding this mixer can produce.
    pub fn alloc_main_buffer(&mut self) -> BufferId {
        self.buffers
            .push(vec![0; self.frame_count * MAX_NUM_CHANNELS]);
        BufferId(self.buffers.len() - 1)
    }

    /// Allocate a mono aux (effect send) buffer.
    pub fn alloc_aux_buffer(&mut self) -> BufferId {
        self.buffers.push(vec![0; self.frame_count]);
        BufferId(self.buffers.len() - 1)
    }

    pub fn buffer_i16(&self, id: BufferId) -> &[i16] {
        bytemuck::cast_slice(&self.buffers[id.0])
    }

    pub fn buffer_f32(&self, id: BufferId) -> &[f32] {
        bytemuck::cast_slice(&self.buffers[id.0])
    }

    pub fn buffer_i32(&self, id: BufferId) -> &[i32] {
        &self.buffers[id.0]
    }

    /// Clear a buffer. The mixer zeroes main buffers itself each cycle;
    /// aux buffers accumulate and are the caller's to clear.
    pub fn clear_buffer(&mut self, id: BufferId) {
        self.buffers[id.0].fill(0);
    }

    // ---- track control plane ----

    pub fn exists(&self, name: i32) -> bool {
        self.tracks.contains_key(&name)
    }

    /// Create a track. Fails with `InvalidChannelMask` on a bad mask;
    /// creating a duplicate name is a caller bug and panics.
    pub fn create(
        &mut self,
        name: i32,
        channel_mask: ChannelMask,
        format: PcmFormat,
        session_id: i32,
    ) -> MixResult<()> {
        assert!(!self.exists(name), "track name {name} already exists");
        if !channel_mask.is_valid() {
            log::error!("create: invalid channel mask {channel_mask:?}");
            return Err(MixError::InvalidChannelMask(channel_mask));
        }
        let mixer_in_format = if self.use_float_mix {
            PcmFormat::F32
        } else {
            PcmFormat::I16
        };
        log::trace!("create({name}, {channel_mask:?}, {format:?})");
        self.tracks.insert(
            name,
            Track::new(channel_mask, format, session_id, self.sample_rate, mixer_in_format),
        );
        Ok(())
    }

    pub fn destroy(&mut self, name: i32) {
        let track = self.tracks.remove(&name);
        let track = track.unwrap_or_else(|| panic!("invalid track name: {name}"));
        log::trace!("destroy({name}), session {}", track.session_id);
        if track.enabled {
            self.invalidate();
        }
    }

    pub fn enable(&mut self, name: i32) {
        let track = self.track_mut(name);
        if !track.enabled {
            assert!(
                track.main_buffer.is_some(),
                "main buffer must be set before enable"
            );
            track.enabled = true;
            log::trace!("enable({name})");
            self.invalidate();
        }
    }

    pub fn disable(&mut self, name: i32) {
        let track = self.track_mut(name);
        if track.enabled {
            track.enabled = false;
            log::trace!("disable({name})");
            self.invalidate();
        }
    }

    /// Attach the pull source for a track. The provider is wrapped in a
    /// reformat stage when the track input encoding differs from the
    /// mixer-internal one.
    pub fn set_buffer_provider(&mut self, name: i32, provider: Box<dyn BufferProvider>) {
        let frame_count = self.frame_count;
        let track = self.track_mut(name);
        track.input = Some(wrap_provider(
            provider,
            track.format,
            track.mixer_in_format,
            track.channel_count,
            frame_count,
        ));
    }

    pub fn set_parameter(&mut self, name: i32, param: Param) {
        let frame_count = self.frame_count;
        let device_rate = self.sample_rate;
        let buffer_count = self.buffers.len();
        match param {
            Param::ChannelMask(mask) => {
                let mixer_mask = self.track_mut(name).mixer_channel_mask;
                if self.set_channel_masks(name, mask, mixer_mask) {
                    log::trace!("set_parameter({name}, CHANNEL_MASK, {mask:?})");
                    self.invalidate();
                }
            }
            Param::MixerChannelMask(mask) => {
                let track_mask = self.track_mut(name).channel_mask;
                if self.set_channel_masks(name, track_mask, mask) {
                    log::trace!("set_parameter({name}, MIXER_CHANNEL_MASK, {mask:?})");
                    self.invalidate();
                }
            }
            Param::MainBuffer(buffer) => {
                if let Some(b) = buffer {
                    assert!(b.0 < buffer_count, "unknown buffer id");
                }
                let track = self.track_mut(name);
                if track.main_buffer != buffer {
                    track.main_buffer = buffer;
                    log::trace!("set_parameter({name}, MAIN_BUFFER, {buffer:?})");
                    self.invalidate();
                }
            }
            Param::AuxBuffer(buffer) => {
                if let Some(b) = buffer {
                    assert!(b.0 < buffer_count, "unknown buffer id");
                }
                let track = self.track_mut(name);
                if track.aux_buffer != buffer {
                    track.aux_buffer = buffer;
                    log::trace!("set_parameter({name}, AUX_BUFFER, {buffer:?})");
                    self.invalidate();
                }
            }
            Param::TeeBuffer(buffer) => {
                if let Some(b) = buffer {
                    assert!(b.0 < buffer_count, "unknown buffer id");
                }
                let track = self.track_mut(name);
                if track.tee_buffer != buffer {
                    track.tee_buffer = buffer;
                    self.invalidate();
                }
            }
            Param::TeeBufferFrameCount(frames) => {
                let track = self.track_mut(name);
                if track.tee_frame_count != frames {
                    track.tee_frame_count = frames;
                    self.invalidate();
                }
            }
            Param::Format(format) => {
                let track = self.track_mut(name);
                if track.format != format {
                    track.format = format;
                    track.reconfigure_input(frame_count);
                    log::trace!("set_parameter({name}, FORMAT, {format:?})");
                    self.invalidate();
                }
            }
            Param::MixerFormat(format) => {
                assert!(format.is_mix_format(), "bad mixer format: {format:?}");
                let track = self.track_mut(name);
                if track.mixer_format != format {
                    track.mixer_format = format;
                    log::trace!("set_parameter({name}, MIXER_FORMAT, {format:?})");
                }
            }
            Param::SampleRate(rate) => {
                assert!(rate > 0, "bad sample rate: {rate}");
                if self.track_mut(name).set_resampler(rate, device_rate) {
                    log::trace!("set_parameter({name}, SAMPLE_RATE, {rate})");
                    self.invalidate();
                }
            }
            Param::ResetResampler => {
                self.track_mut(name).reset_resampler();
                self.invalidate();
            }
            Param::RemoveResampler => {
                let track = self.track_mut(name);
                track.resampler = None;
                track.sample_rate = device_rate;
                self.invalidate();
            }
            Param::Volume { channel, value, ramp } => {
                assert!(channel < MAX_NUM_VOLUMES, "bad volume channel: {channel}");
                let ramp_frames = if ramp { frame_count } else { 0 };
                if self
                    .track_mut(name)
                    .volume
                    .set_volume(channel, value, ramp_frames)
                {
                    log::trace!("set_parameter({name}, VOLUME{channel}, {value})");
                    self.invalidate();
                }
            }
            Param::AuxLevel { value, ramp } => {
                let ramp_frames = if ramp { frame_count } else { 0 };
                if self.track_mut(name).volume.set_aux_level(value, ramp_frames) {
                    log::trace!("set_parameter({name}, AUXLEVEL, {value})");
                    self.invalidate();
                }
            }
        }
    }

    /// Frames the track's resampler has consumed but not yet emitted.
    pub fn get_unreleased_frames(&self, name: i32) -> usize {
        self.tracks
            .get(&name)
            .map(|t| t.unreleased_frames())
            .unwrap_or(0)
    }

    /// Space-separated track names, for diagnostics.
    pub fn track_names(&self) -> String {
        self.tracks
            .keys()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    // ---- processing ----

    /// Produce one output block into every group's main buffer.
    pub fn process(&mut self) {
        if self.needs_validate {
            self.validate();
        } else {
            self.run_hook();
        }
    }

    fn invalidate(&mut self) {
        self.needs_validate = true;
    }

    fn track_mut(&mut self, name: i32) -> &mut Track {
        self.tracks
            .get_mut(&name)
            .unwrap_or_else(|| panic!("invalid track name: {name}"))
    }

    fn set_channel_masks(
        &mut self,
        name: i32,
        track_mask: ChannelMask,
        mixer_mask: ChannelMask,
    ) -> bool {
        let device_rate = self.sample_rate;
        let frame_count = self.frame_count;
        let track = self.track_mut(name);
        if track_mask == track.channel_mask && mixer_mask == track.mixer_channel_mask {
            return false;
        }
        assert!(
            track_mask.is_valid() && mixer_mask.is_valid(),
            "invalid channel mask"
        );
        track.channel_mask = track_mask;
        track.channel_count = track_mask.count();
        track.mixer_channel_mask = mixer_mask;
        track.mixer_channel_count = mixer_mask.count();
        // resampler and reformat channel widths may have changed
        track.recreate_resampler(device_rate);
        track.reconfigure_input(frame_count);
        true
    }

    /// Rebuild enabled/groups, reassign hooks, run one cycle so pending
    /// ramps complete, then reclassify tracks that ended up muted. The
    /// second pass exists because a ramp to zero must run before its track
    /// can be demoted to the no-op kernel.
    fn validate(&mut self) {
        let legacy = !self.use_float_mix;
        let mut all_stereo_no_resample = true;
        let mut resampling = false;
        let mut volume_ramp = false;

        self.enabled.clear();
        self.groups.clear();
        for (&name, t) in self.tracks.iter_mut() {
            if !t.enabled {
                continue;
            }
            self.enabled.push(name); // ascending by construction
            let main = t.main_buffer.expect("main buffer must be set before enable");
            self.groups.entry(main.0).or_default().push(name);

            let mut n = (t.channel_count as u32 - 1) & needs::CHANNEL_COUNT_MASK;
            if t.does_resample() {
                n |= needs::RESAMPLE;
            }
            if t.volume.aux_level_fix != 0 && t.aux_buffer.is_some() {
                n |= needs::AUX;
            }
            if (t.volume.volume_inc_fix[0] | t.volume.volume_inc_fix[1]) != 0 {
                volume_ramp = true;
            } else if !t.does_resample() && t.volume.is_muted() {
                n |= needs::MUTE;
            }
            t.needs = n;

            if n & needs::MUTE != 0 {
                t.hook = TrackHook::Nop;
            } else {
                if n & needs::AUX != 0 {
                    all_stereo_no_resample = false;
                }
                if n & needs::RESAMPLE != 0 {
                    all_stereo_no_resample = false;
                    resampling = true;
                    let tt = if t.channel_count == 1 && t.is_mono_expand() {
                        TrackType::ResampleMono
                    } else if t.channel_count >= 2 && t.use_stereo_volume() {
                        TrackType::ResampleStereo
                    } else {
                        TrackType::Resample
                    };
                    t.hook =
                        get_track_hook(tt, t.mixer_channel_count, t.mixer_in_format, legacy);
                } else if t.channel_count == 1 {
                    all_stereo_no_resample = false;
                    let tt = if t.is_mono_expand() {
                        TrackType::NoResampleMono
                    } else {
                        TrackType::NoResample
                    };
                    t.hook =
                        get_track_hook(tt, t.mixer_channel_count, t.mixer_in_format, legacy);
                } else {
                    let tt = if t.use_stereo_volume() {
                        TrackType::NoResampleStereo
                    } else {
                        TrackType::NoResample
                    };
                    t.hook =
                        get_track_hook(tt, t.mixer_channel_count, t.mixer_in_format, legacy);
                }
            }
        }

        self.hook = ProcessHook::Nop;
        if !self.enabled.is_empty() {
            if resampling {
                if self.use_float_mix {
                    if self.output_temp_f.is_empty() {
                        self.output_temp_f = vec![0.0; MAX_NUM_CHANNELS * self.frame_count];
                    }
                    if self.resample_temp_f.is_empty() {
                        self.resample_temp_f = vec![0.0; MAX_NUM_CHANNELS * self.frame_count];
                    }
                } else {
                    if self.output_temp_q.is_empty() {
                        self.output_temp_q = vec![0; MAX_NUM_CHANNELS * self.frame_count];
                    }
                    if self.resample_temp_q.is_empty() {
                        self.resample_temp_q = vec![0; MAX_NUM_CHANNELS * self.frame_count];
                    }
                }
                self.hook = ProcessHook::GenericResampling;
            } else {
                self.hook = ProcessHook::GenericNoResampling;
                if all_stereo_no_resample && !volume_ramp && self.enabled.len() == 1 {
                    // a muted track must not claim the fast path: mono needs
                    // its expansion handling, which the one-track hook lacks
                    let t = &self.tracks[&self.enabled[0]];
                    if t.needs & needs::MUTE == 0 {
                        self.hook = ProcessHook::OneTrack;
                    }
                }
            }
        }

        log::debug!(
            "mixer configuration change: {} enabled, all_stereo_no_resample={}, resampling={}, volume_ramp={}",
            self.enabled.len(),
            all_stereo_no_resample,
            resampling,
            volume_ramp
        );

        self.needs_validate = false;
        self.run_hook();

        // ramps have advanced one block; demote tracks that are now muted
        if !self.enabled.is_empty() {
            let mut all_muted = true;
            for i in 0..self.enabled.len() {
                let name = self.enabled[i];
                let t = self.track_mut(name);
                if !t.does_resample() && t.volume.is_muted() {
                    t.needs |= needs::MUTE;
                    t.hook = TrackHook::Nop;
                } else {
                    all_muted = false;
                }
            }
            if all_muted {
                self.hook = ProcessHook::Nop;
            } else if all_stereo_no_resample && self.enabled.len() == 1 {
                self.hook = ProcessHook::OneTrack;
            }
        }
    }

    fn run_hook(&mut self) {
        match self.hook {
            ProcessHook::Nop => self.process_nop(),
            ProcessHook::GenericNoResampling => self.process_generic_no_resampling(),
            ProcessHook::GenericResampling => self.process_generic_resampling(),
            ProcessHook::OneTrack => self.process_one_track(),
        }
    }

    /// Zero every group's output region and drain each provider of one
    /// block's worth of frames.
    fn process_nop(&mut self) {
        let frame_count = self.frame_count;
        let Self {
            tracks,
            buffers,
            groups,
            ..
        } = self;
        for (&main, group) in groups.iter() {
            let head = &tracks[&group[0]];
            let ch = head.mixer_channel_count;
            let out_format = head.mixer_format;
            zero_region(&mut buffers[main], out_format, 0, frame_count * ch);

            for name in group.iter() {
                let track = tracks.get_mut(name).unwrap();
                let frame_size = track.mixer_in_format.bytes_per_frame(track.channel_count);
                let Some(input) = track.input.as_mut() else {
                    continue;
                };
                let provider = input.provider_mut();
                let mut remaining = frame_count;
                while remaining > 0 {
                    let n = match provider.get_next_buffer(remaining) {
                        None => 0,
                        Some(buf) => buf.frames(frame_size).min(remaining),
                    };
                    if n == 0 {
                        break;
                    }
                    provider.release_buffer(n);
                    remaining -= n;
                }
            }
        }
    }

    /// Block loop: clear a stack accumulator per chunk, sum every track of
    /// the group into it, convert to the sink encoding at the right offset.
    fn process_generic_no_resampling(&mut self) {
        let frame_count = self.frame_count;
        let use_float = self.use_float_mix;
        let Self {
            tracks,
            buffers,
            groups,
            ..
        } = self;

        let mut temp_q = [0i32; BLOCKSIZE * MAX_NUM_CHANNELS];
        let mut temp_f = [0f32; BLOCKSIZE * MAX_NUM_CHANNELS];

        for (&main, group) in groups.iter() {
            let head = &tracks[&group[0]];
            let ch = head.mixer_channel_count;
            let out_format = head.mixer_format;
            for name in group.iter() {
                tracks.get_mut(name).unwrap().stopped = false;
            }

            let mut done = 0usize;
            while done < frame_count {
                let chunk = BLOCKSIZE.min(frame_count - done);
                temp_q[..chunk * ch].fill(0);
                temp_f[..chunk * ch].fill(0.0);

                for name in group.iter() {
                    let track = tracks.get_mut(name).unwrap();
                    if track.stopped {
                        continue;
                    }
                    let aux_id = if track.needs & needs::AUX != 0 {
                        track.aux_buffer
                    } else {
                        None
                    };
                    let in_format = track.mixer_in_format;
                    let frame_size = in_format.bytes_per_frame(track.channel_count);
                    let hook = track.hook;
                    let Track {
                        input,
                        volume,
                        stopped,
                        ..
                    } = track;
                    let Some(input) = input.as_mut() else {
                        *stopped = true;
                        continue;
                    };
                    let provider = input.provider_mut();

                    let mut mixed = 0usize;
                    while mixed < chunk {
                        let want = frame_count - done - mixed;
                        let used = match provider.get_next_buffer(want) {
                            None => 0,
                            Some(buf) => {
                                let avail = buf.frames(frame_size);
                                let use_frames = avail.min(chunk - mixed);
                                if use_frames == 0 {
                                    0
                                } else {
                                    let bytes = &buf.data[..use_frames * frame_size];
                                    match input_view(bytes, in_format) {
                                        None => {
                                            log::error!(
                                                "misaligned input buffer on track {name}"
                                            );
                                            0
                                        }
                                        Some(view) => {
                                            let ramp = volume.needs_ramp();
                                            let out_range =
                                                mixed * ch..(mixed + use_frames) * ch;
                                            let aux = aux_view(
                                                buffers,
                                                aux_id,
                                                use_float,
                                                done + mixed,
                                                use_frames,
                                            );
                                            match hook {
                                                TrackHook::Nop => {}
                                                TrackHook::Legacy16BitsStereo
                                                | TrackHook::Legacy16BitsMono => {
                                                    let InputSlice::I16(input) = view else {
                                                        unreachable!(
                                                            "legacy path expects 16-bit input"
                                                        )
                                                    };
                                                    let aux = aux.map(|a| match a {
                                                        AccBuffer::Q27(a) => a,
                                                        AccBuffer::Float(_) => unreachable!(
                                                            "aux plane mismatch"
                                                        ),
                                                    });
                                                    let out = &mut temp_q[out_range];
                                                    if hook == TrackHook::Legacy16BitsStereo {
                                                        track_16bits_stereo(
                                                            volume, out, input, use_frames,
                                                            aux,
                                                        );
                                                    } else {
                                                        track_16bits_mono(
                                                            volume, out, input, use_frames,
                                                            aux,
                                                        );
                                                    }
                                                }
                                                TrackHook::NoResample(mix) => {
                                                    let out = if use_float {
                                                        AccBuffer::Float(&mut temp_f[out_range])
                                                    } else {
                                                        AccBuffer::Q27(&mut temp_q[out_range])
                                                    };
                                                    run_mix(
                                                        mix, volume, ch, use_frames, out,
                                                        view, aux, ramp, true,
                                                    );
                                                }
                                                _ => {}
                                            }
                                            use_frames
                                        }
                                    }
                                }
                            }
                        };
                        if used == 0 {
                            *stopped = true;
                            break;
                        }
                        provider.release_buffer(used);
                        mixed += used;
                    }
                }

                convert_mixer_format(
                    &mut buffers[main],
                    out_format,
                    use_float,
                    done * ch,
                    &temp_q[..chunk * ch],
                    &temp_f[..chunk * ch],
                );
                done += chunk;
            }
        }
    }

    /// Whole-cycle accumulation: resampling tracks pull through their
    /// converter into the shared temporaries; the rest pull directly.
    fn process_generic_resampling(&mut self) {
        let frame_count = self.frame_count;
        let use_float = self.use_float_mix;
        let Self {
            tracks,
            buffers,
            groups,
            output_temp_q,
            output_temp_f,
            resample_temp_q,
            resample_temp_f,
            ..
        } = self;

        for (&main, group) in groups.iter() {
            let head = &tracks[&group[0]];
            let ch = head.mixer_channel_count;
            let out_format = head.mixer_format;
            if use_float {
                output_temp_f[..frame_count * ch].fill(0.0);
            } else {
                output_temp_q[..frame_count * ch].fill(0);
            }

            for name in group.iter() {
                let track = tracks.get_mut(name).unwrap();
                track.stopped = false;
                let aux_id = if track.needs & needs::AUX != 0 {
                    track.aux_buffer
                } else {
                    None
                };

                if track.needs & needs::RESAMPLE != 0 {
                    let aux = aux_view(buffers, aux_id, use_float, 0, frame_count);
                    mix_resample_track(
                        track,
                        use_float,
                        frame_count,
                        output_temp_q,
                        output_temp_f,
                        resample_temp_q,
                        resample_temp_f,
                        aux,
                    );
                } else {
                    let in_format = track.mixer_in_format;
                    let frame_size = in_format.bytes_per_frame(track.channel_count);
                    let hook = track.hook;
                    let Track { input, volume, .. } = track;
                    let Some(input) = input.as_mut() else {
                        continue;
                    };
                    let provider = input.provider_mut();

                    let mut out_frames = 0usize;
                    while out_frames < frame_count {
                        let used = match provider.get_next_buffer(frame_count - out_frames) {
                            None => 0,
                            Some(buf) => {
                                let avail = buf.frames(frame_size);
                                let use_frames = avail.min(frame_count - out_frames);
                                if use_frames == 0 {
                                    0
                                } else {
                                    let bytes = &buf.data[..use_frames * frame_size];
                                    match input_view(bytes, in_format) {
                                        None => {
                                            log::error!(
                                                "misaligned input buffer on track {name}"
                                            );
                                            0
                                        }
                                        Some(view) => {
                                            let ramp = volume.needs_ramp();
                                            let out_range = out_frames * ch
                                                ..(out_frames + use_frames) * ch;
                                            let aux = aux_view(
                                                buffers, aux_id, use_float, out_frames,
                                                use_frames,
                                            );
                                            match hook {
                                                TrackHook::Nop => {}
                                                TrackHook::Legacy16BitsStereo
                                                | TrackHook::Legacy16BitsMono => {
                                                    let InputSlice::I16(input) = view else {
                                                        unreachable!(
                                                            "legacy path expects 16-bit input"
                                                        )
                                                    };
                                                    let aux = aux.map(|a| match a {
                                                        AccBuffer::Q27(a) => a,
                                                        AccBuffer::Float(_) => unreachable!(
                                                            "aux plane mismatch"
                                                        ),
                                                    });
                                                    let out = &mut output_temp_q[out_range];
                                                    if hook == TrackHook::Legacy16BitsStereo {
                                                        track_16bits_stereo(
                                                            volume, out, input, use_frames,
                                                            aux,
                                                        );
                                                    } else {
                                                        track_16bits_mono(
                                                            volume, out, input, use_frames,
                                                            aux,
                                                        );
                                                    }
                                                }
                                                TrackHook::NoResample(mix) => {
                                                    let out = if use_float {
                                                        AccBuffer::Float(
                                                            &mut output_temp_f[out_range],
                                                        )
                                                    } else {
                                                        AccBuffer::Q27(
                                                            &mut output_temp_q[out_range],
                                                        )
                                                    };
                                                    run_mix(
                                                        mix, volume, ch, use_frames, out,
                                                        view, aux, ramp, true,
                                                    );
                                                }
                                                _ => {}
                                            }
                                            use_frames
                                        }
                                    }
                                }
                            }
                        };
                        if used == 0 {
                            break;
                        }
                        provider.release_buffer(used);
                        out_frames += used;
                    }
                }
            }

            convert_mixer_format(
                &mut buffers[main],
                out_format,
                use_float,
                0,
                &output_temp_q[..if use_float { 0 } else { frame_count * ch }],
                &output_temp_f[..if use_float { frame_count * ch } else { 0 }],
            );
        }
    }

    /// Single enabled track, no resampling: apply gain while writing the
    /// sink encoding straight into the main buffer. A provider failure
    /// zero-fills the remainder of the block.
    fn process_one_track(&mut self) {
        assert_eq!(self.enabled.len(), 1, "one-track hook requires one track");
        let frame_count = self.frame_count;
        let use_float = self.use_float_mix;
        let name = self.enabled[0];
        let Self {
            tracks, buffers, ..
        } = self;
        let track = tracks.get_mut(&name).unwrap();

        let ch = track.mixer_channel_count;
        let out_format = track.mixer_format;
        let in_format = track.mixer_in_format;
        let main = track
            .main_buffer
            .expect("main buffer must be set before enable")
            .0;

        if !use_float && ch == 2 && in_format == PcmFormat::I16 {
            process_one_track_legacy16(track, buffers, main, frame_count, out_format, name);
            return;
        }

        let aux_id = if track.needs & needs::AUX != 0 {
            track.aux_buffer
        } else {
            None
        };
        let mix = if track.use_stereo_volume() {
            MixType::MultiStereoVol
        } else {
            MixType::Multi.monovol(ch)
        };
        let frame_size = in_format.bytes_per_frame(track.channel_count);
        let ramp = track.volume.needs_ramp();
        let (main_words, mut aux_words) = main_and_aux(buffers, main, aux_id.map(|b| b.0));
        let Track { input, volume, .. } = track;
        let Some(input) = input.as_mut() else {
            zero_region(main_words, out_format, 0, frame_count * ch);
            return;
        };
        let provider = input.provider_mut();

        let mut done = 0usize;
        let mut underrun = false;
        while done < frame_count {
            let used = match provider.get_next_buffer(frame_count - done) {
                None => 0,
                Some(buf) => {
                    let avail = buf.frames(frame_size);
                    let use_frames = avail.min(frame_count - done);
                    if use_frames == 0 {
                        0
                    } else {
                        let bytes = &buf.data[..use_frames * frame_size];
                        match input_view(bytes, in_format) {
                            None => {
                                log::error!("one-track path: misaligned buffer on track {name}");
                                0
                            }
                            Some(view) => {
                                let out_range = done * ch..(done + use_frames) * ch;
                                let out = match out_format {
                                    PcmFormat::I16 => SaveSlice::I16(
                                        &mut bytemuck::cast_slice_mut::<i32, i16>(
                                            main_words.as_mut_slice(),
                                        )[out_range],
                                    ),
                                    PcmFormat::F32 => SaveSlice::F32(
                                        &mut bytemuck::cast_slice_mut::<i32, f32>(
                                            main_words.as_mut_slice(),
                                        )[out_range],
                                    ),
                                    other => panic!("bad mixer output format: {other:?}"),
                                };
                                let aux = aux_words.as_deref_mut().map(|w| {
                                    if use_float {
                                        AccBuffer::Float(
                                            &mut bytemuck::cast_slice_mut::<i32, f32>(w)
                                                [done..done + use_frames],
                                        )
                                    } else {
                                        AccBuffer::Q27(&mut w[done..done + use_frames])
                                    }
                                });
                                run_mix_save(mix, volume, ch, use_frames, out, view, aux, ramp);
                                use_frames
                            }
                        }
                    }
                }
            };
            if used == 0 {
                underrun = true;
                break;
            }
            provider.release_buffer(used);
            done += used;
        }
        if underrun {
            zero_region(main_words, out_format, done * ch, frame_count * ch);
            return;
        }
        if ramp {
            volume.adjust_volume_ramp(aux_id.is_some(), use_float);
        }
    }
}

/// Split mutable access to the main region and an optional, distinct aux
/// region of the arena.
fn main_and_aux<'a>(
    buffers: &'a mut [Vec<i32>],
    main: usize,
    aux: Option<usize>,
) -> (&'a mut Vec<i32>, Option<&'a mut Vec<i32>>) {
    match aux {
        None => (&mut buffers[main], None),
        Some(a) if a == main => panic!("aux buffer aliases the main buffer"),
        Some(a) if a < main => {
            let (lo, hi) = buffers.split_at_mut(main);
            (&mut hi[0], Some(&mut lo[a]))
        }
        Some(a) => {
            let (lo, hi) = buffers.split_at_mut(a);
            (&mut lo[main], Some(&mut hi[0]))
        }
    }
}

/// Legacy one-track 16-bit stereo path, packed stereo gain and all.
fn process_one_track_legacy16(
    track: &mut Track,
    buffers: &mut [Vec<i32>],
    main: usize,
    frame_count: usize,
    out_format: PcmFormat,
    name: i32,
) {
    const FRAME_SIZE: usize = 4; // 16-bit stereo
    let Track { input, volume, .. } = track;
    let gain = StereoGain::pack(volume.volume_fix[0], volume.volume_fix[1]);
    let (vl, vr) = (gain.left() as i32, gain.right() as i32);

    let Some(input) = input.as_mut() else {
        zero_region(&mut buffers[main], out_format, 0, frame_count * 2);
        return;
    };
    let provider = input.provider_mut();

    let mut done = 0usize;
    let mut underrun = false;
    while done < frame_count {
        let used = match provider.get_next_buffer(frame_count - done) {
            None => 0,
            Some(buf) => {
                let avail = buf.frames(FRAME_SIZE);
                let use_frames = avail.min(frame_count - done);
                if use_frames == 0 {
                    0
                } else {
                    match bytemuck::try_cast_slice::<u8, i16>(&buf.data[..use_frames * FRAME_SIZE])
                    {
                        Err(_) => {
                            log::error!("one-track 16-bit path: misaligned buffer on track {name}");
                            0
                        }
                        Ok(input) => {
                            match out_format {
                                PcmFormat::F32 => {
                                    let out = &mut bytemuck::cast_slice_mut::<i32, f32>(
                                        &mut buffers[main],
                                    )[done * 2..(done + use_frames) * 2];
                                    for i in 0..use_frames {
                                        out[i * 2] =
                                            float_from_q4_27(input[i * 2] as i32 * vl);
                                        out[i * 2 + 1] =
                                            float_from_q4_27(input[i * 2 + 1] as i32 * vr);
                                    }
                                }
                                PcmFormat::I16 => {
                                    let out = &mut bytemuck::cast_slice_mut::<i32, i16>(
                                        &mut buffers[main],
                                    )[done * 2..(done + use_frames) * 2];
                                    if gain.is_boosted() {
                                        // boosted volume can clip even with one track
                                        for i in 0..use_frames {
                                            out[i * 2] = clamp16(
                                                (input[i * 2] as i32 * vl) >> 12,
                                            );
                                            out[i * 2 + 1] = clamp16(
                                                (input[i * 2 + 1] as i32 * vr) >> 12,
                                            );
                                        }
                                    } else {
                                        for i in 0..use_frames {
                                            out[i * 2] =
                                                ((input[i * 2] as i32 * vl) >> 12) as i16;
                                            out[i * 2 + 1] =
                                                ((input[i * 2 + 1] as i32 * vr) >> 12) as i16;
                                        }
                                    }
                                }
                                other => panic!("bad mixer output format: {other:?}"),
                            }
                            use_frames
                        }
                    }
                }
            }
        };
        if used == 0 {
            underrun = true;
            break;
        }
        provider.release_buffer(used);
        done += used;
    }
    if underrun {
        zero_region(&mut buffers[main], out_format, done * 2, frame_count * 2);
    }
}

/// Resample into the group accumulator, either directly (constant gain) or
/// through the shared resample temp when a ramp, an aux send, or channel
/// expansion requires a second pass.
#[allow(clippy::too_many_arguments)]
fn mix_resample_track(
    track: &mut Track,
    use_float: bool,
    frames: usize,
    out_q: &mut [i32],
    out_f: &mut [f32],
    rtemp_q: &mut [i32],
    rtemp_f: &mut [f32],
    aux: Option<AccBuffer<'_>>,
) {
    let ch = track.mixer_channel_count;
    let sample_rate = track.sample_rate;
    let hook = track.hook;
    let Track {
        resampler,
        input,
        volume,
        ..
    } = track;
    let Some(rs) = resampler.as_mut() else {
        return;
    };
    let Some(input) = input.as_mut() else {
        return;
    };
    let provider = input.provider_mut();
    rs.set_sample_rate(sample_rate);

    match hook {
        TrackHook::LegacyResample => {
            let ramp = volume.needs_ramp();
            if ramp || aux.is_some() {
                // resample at unity into the temp, apply gain second so the
                // send level sees post-resample samples
                rs.set_volume(UNITY_GAIN_FLOAT, UNITY_GAIN_FLOAT);
                rtemp_q[..frames * 2].fill(0);
                rs.resample(AccBuffer::Q27(&mut rtemp_q[..frames * 2]), frames, provider);
                let aux = aux.map(|a| match a {
                    AccBuffer::Q27(a) => a,
                    AccBuffer::Float(_) => unreachable!("aux plane mismatch"),
                });
                let temp = &rtemp_q[..frames * 2];
                let out = &mut out_q[..frames * 2];
                if ramp {
                    volume_ramp_stereo(volume, out, temp, frames, aux);
                } else {
                    volume_stereo(volume, out, temp, frames, aux);
                }
            } else {
                rs.set_volume(volume.volume[0], volume.volume[1]);
                rs.resample(AccBuffer::Q27(&mut out_q[..frames * 2]), frames, provider);
            }
        }
        TrackHook::Resample(mix) => {
            let ramp = volume.needs_ramp();
            if mix == MixType::StereoExpand || ramp || aux.is_some() {
                rs.set_volume(UNITY_GAIN_FLOAT, UNITY_GAIN_FLOAT);
                let temp_ch = rs.channels();
                if use_float {
                    rtemp_f[..frames * temp_ch].fill(0.0);
                    rs.resample(
                        AccBuffer::Float(&mut rtemp_f[..frames * temp_ch]),
                        frames,
                        provider,
                    );
                    run_mix(
                        mix,
                        volume,
                        ch,
                        frames,
                        AccBuffer::Float(&mut out_f[..frames * ch]),
                        InputSlice::F32(&rtemp_f[..frames * temp_ch]),
                        aux,
                        ramp,
                        true,
                    );
                } else {
                    rtemp_q[..frames * temp_ch].fill(0);
                    rs.resample(
                        AccBuffer::Q27(&mut rtemp_q[..frames * temp_ch]),
                        frames,
                        provider,
                    );
                    run_mix(
                        mix,
                        volume,
                        ch,
                        frames,
                        AccBuffer::Q27(&mut out_q[..frames * ch]),
                        InputSlice::Q27(&rtemp_q[..frames * temp_ch]),
                        aux,
                        ramp,
                        true,
                    );
                }
            } else {
                rs.set_volume(volume.volume[0], volume.volume[1]);
                let out = if use_float {
                    AccBuffer::Float(&mut out_f[..frames * ch])
                } else {
                    AccBuffer::Q27(&mut out_q[..frames * ch])
                };
                rs.resample(out, frames, provider);
            }
        }
        _ => {}
    }
}

/// Alignment-checked typed view of pulled input bytes. `None` maps to the
/// original misaligned-pointer branch: the track goes silent for the block.
fn input_view(bytes: &[u8], format: PcmFormat) -> Option<InputSlice<'_>> {
    match format {
        PcmFormat::F32 => bytemuck::try_cast_slice::<u8, f32>(bytes)
            .ok()
            .map(InputSlice::F32),
        _ => bytemuck::try_cast_slice::<u8, i16>(bytes)
            .ok()
            .map(InputSlice::I16),
    }
}

/// Mutable aux view at a frame offset, on the plane the mixer runs.
fn aux_view<'a>(
    buffers: &'a mut [Vec<i32>],
    aux_id: Option<BufferId>,
    use_float: bool,
    offset: usize,
    frames: usize,
) -> Option<AccBuffer<'a>> {
    let id = aux_id?;
    let words = &mut buffers[id.0];
    Some(if use_float {
        AccBuffer::Float(&mut bytemuck::cast_slice_mut::<i32, f32>(words)[offset..offset + frames])
    } else {
        AccBuffer::Q27(&mut words[offset..offset + frames])
    })
}

/// Zero `[from, to)` samples of an output region in its sink encoding.
fn zero_region(words: &mut [i32], format: PcmFormat, from_samples: usize, to_samples: usize) {
    match format {
        PcmFormat::I16 => {
            bytemuck::cast_slice_mut::<i32, i16>(words)[from_samples..to_samples].fill(0)
        }
        PcmFormat::F32 => {
            bytemuck::cast_slice_mut::<i32, f32>(words)[from_samples..to_samples].fill(0.0)
        }
        other => panic!("bad mixer output format: {other:?}"),
    }
}

/// Convert the accumulator temporary into the sink encoding at a sample
/// offset into the output region.
fn convert_mixer_format(
    words: &mut [i32],
    out_format: PcmFormat,
    use_float: bool,
    sample_offset: usize,
    temp_q: &[i32],
    temp_f: &[f32],
) {
    if use_float {
        let range = sample_offset..sample_offset + temp_f.len();
        match out_format {
            PcmFormat::F32 => {
                bytemuck::cast_slice_mut::<i32, f32>(words)[range].copy_from_slice(temp_f)
            }
            PcmFormat::I16 => {
                i16_from_f32_slice(&mut bytemuck::cast_slice_mut::<i32, i16>(words)[range], temp_f)
            }
            other => panic!("bad mixer output format: {other:?}"),
        }
    } else {
        let range = sample_offset..sample_offset + temp_q.len();
        match out_format {
            PcmFormat::I16 => {
                i16_from_q4_27_slice(&mut bytemuck::cast_slice_mut::<i32, i16>(words)[range], temp_q)
            }
            PcmFormat::F32 => {
                f32_from_q4_27_slice(&mut bytemuck::cast_slice_mut::<i32, f32>(words)[range], temp_q)
            }
            other => panic!("bad mixer output format: {other:?}"),
        }
    }
}
