//! Per-track state
//!
//! A track carries its input configuration, the mix-side configuration, the
//! dual-representation gain state, and the kernel selected for it by the
//! last validate pass. The legacy 16-bit stereo/mono kernels live here as
//! well; they are only reachable on the fixed-point plane.

use std::num::FpCategory;

use sm_core::fixed::{float_from_u4_28, mul_add, u4_28_from_float, UNITY_GAIN_FLOAT, UNITY_GAIN_INT};
use sm_core::{BufferProvider, ChannelMask, PcmFormat, MAX_NUM_VOLUMES};
use sm_dsp::ops::{fp, q};
use sm_dsp::resample::{create_resampler, quality_for_rate, Resampler};
use sm_dsp::{AccBuffer, InputSlice, MixType};

use crate::mixer::BufferId;
use crate::provider::ReformatProvider;

/// Bits describing what a track needs from the engine this cycle.
pub(crate) mod needs {
    /// Low bits hold `channel_count - 1`.
    pub const CHANNEL_COUNT_MASK: u32 = 0x0000_0007;
    pub const MUTE: u32 = 0x0000_0100;
    pub const RESAMPLE: u32 = 0x0000_1000;
    pub const AUX: u32 = 0x0001_0000;
}

/// Kernel selected for a track by the validate pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackHook {
    /// Muted: contribute nothing (the engine still drains the provider).
    Nop,
    /// Legacy fixed-point stereo resample path.
    LegacyResample,
    Legacy16BitsStereo,
    Legacy16BitsMono,
    /// Resample through the shared temp, then mix with the given shape.
    Resample(MixType),
    /// Mix straight out of the provider buffer with the given shape.
    NoResample(MixType),
}

/// Coarse track classification used during hook selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrackType {
    Nop,
    Resample,
    ResampleMono,
    ResampleStereo,
    NoResample,
    NoResampleMono,
    NoResampleStereo,
}

/// Map a track classification to a kernel.
///
/// On the fixed-point plane, stereo 16-bit tracks keep the legacy kernels
/// for bit-exact output on 16-bit stereo sinks.
pub(crate) fn get_track_hook(
    track_type: TrackType,
    channels: usize,
    mixer_in_format: PcmFormat,
    legacy: bool,
) -> TrackHook {
    if legacy && channels == 2 && mixer_in_format == PcmFormat::I16 {
        match track_type {
            TrackType::Nop => return TrackHook::Nop,
            TrackType::Resample => return TrackHook::LegacyResample,
            TrackType::NoResampleMono => return TrackHook::Legacy16BitsMono,
            TrackType::NoResample | TrackType::NoResampleStereo => {
                return TrackHook::Legacy16BitsStereo
            }
            _ => {} // mono/stereo resample specialisations use the generic path
        }
    }
    match track_type {
        TrackType::Nop => TrackHook::Nop,
        TrackType::Resample => TrackHook::Resample(MixType::Multi.monovol(channels)),
        TrackType::ResampleMono => TrackHook::Resample(MixType::StereoExpand),
        TrackType::ResampleStereo => TrackHook::Resample(MixType::MultiStereoVol),
        TrackType::NoResample => TrackHook::NoResample(MixType::Multi.monovol(channels)),
        TrackType::NoResampleMono => TrackHook::NoResample(MixType::MonoExpand),
        TrackType::NoResampleStereo => TrackHook::NoResample(MixType::MultiStereoVol),
    }
}

/// Per-channel gain in the two coherent representations: U4.12 targets
/// ramped through U4.28, and the float triple alongside.
#[derive(Debug, Default)]
pub(crate) struct VolumeState {
    pub volume: [f32; MAX_NUM_VOLUMES],
    pub prev_volume: [f32; MAX_NUM_VOLUMES],
    pub volume_inc: [f32; MAX_NUM_VOLUMES],
    pub aux_level: f32,
    pub prev_aux_level: f32,
    pub aux_inc: f32,

    pub volume_fix: [i16; MAX_NUM_VOLUMES],
    pub prev_volume_fix: [i32; MAX_NUM_VOLUMES],
    pub volume_inc_fix: [i32; MAX_NUM_VOLUMES],
    pub aux_level_fix: i16,
    pub prev_aux_level_fix: i32,
    pub aux_inc_fix: i32,
}

impl VolumeState {
    /// A ramp is pending while any integer increment is nonzero; the set
    /// path keeps the float increments coherent with that.
    #[inline]
    pub fn needs_ramp(&self) -> bool {
        (self.volume_inc_fix[0] | self.volume_inc_fix[1] | self.aux_inc_fix) != 0
    }

    /// Muted only if every float channel gain is exactly zero.
    #[inline]
    pub fn is_muted(&self) -> bool {
        self.volume.iter().all(|v| *v == 0.0)
    }

    pub fn set_volume(&mut self, channel: usize, value: f32, ramp: usize) -> bool {
        set_volume_ramp_variables(
            value,
            ramp,
            &mut self.volume_fix[channel],
            &mut self.prev_volume_fix[channel],
            &mut self.volume_inc_fix[channel],
            &mut self.volume[channel],
            &mut self.prev_volume[channel],
            &mut self.volume_inc[channel],
        )
    }

    pub fn set_aux_level(&mut self, value: f32, ramp: usize) -> bool {
        set_volume_ramp_variables(
            value,
            ramp,
            &mut self.aux_level_fix,
            &mut self.prev_aux_level_fix,
            &mut self.aux_inc_fix,
            &mut self.aux_level,
            &mut self.prev_aux_level,
            &mut self.aux_inc,
        )
    }

    /// Check whether the pending ramp has completed and clear the increments
    /// if so. Whichever representation did not drive the mix is re-synced
    /// from the live one so the two stay coherent.
    ///
    /// If one channel still ramps, all channels keep ramping; clamping is
    /// per channel.
    pub fn adjust_volume_ramp(&mut self, aux: bool, use_float: bool) {
        if use_float {
            for i in 0..MAX_NUM_VOLUMES {
                if (self.volume_inc[i] > 0.0
                    && self.prev_volume[i] + self.volume_inc[i] >= self.volume[i])
                    || (self.volume_inc[i] < 0.0
                        && self.prev_volume[i] + self.volume_inc[i] <= self.volume[i])
                {
                    self.volume_inc_fix[i] = 0;
                    self.prev_volume_fix[i] = (self.volume_fix[i] as i32) << 16;
                    self.volume_inc[i] = 0.0;
                    self.prev_volume[i] = self.volume[i];
                } else {
                    self.prev_volume_fix[i] = u4_28_from_float(self.prev_volume[i]);
                }
            }
        } else {
            for i in 0..MAX_NUM_VOLUMES {
                if (self.volume_inc_fix[i] > 0
                    && ((self.prev_volume_fix[i] + self.volume_inc_fix[i]) >> 16)
                        >= self.volume_fix[i] as i32)
                    || (self.volume_inc_fix[i] < 0
                        && ((self.prev_volume_fix[i] + self.volume_inc_fix[i]) >> 16)
                            <= self.volume_fix[i] as i32)
                {
                    self.volume_inc_fix[i] = 0;
                    self.prev_volume_fix[i] = (self.volume_fix[i] as i32) << 16;
                    self.volume_inc[i] = 0.0;
                    self.prev_volume[i] = self.volume[i];
                } else {
                    self.prev_volume[i] = float_from_u4_28(self.prev_volume_fix[i]);
                }
            }
        }

        if aux {
            if use_float {
                if (self.aux_inc > 0.0 && self.prev_aux_level + self.aux_inc >= self.aux_level)
                    || (self.aux_inc < 0.0
                        && self.prev_aux_level + self.aux_inc <= self.aux_level)
                {
                    self.aux_inc_fix = 0;
                    self.prev_aux_level_fix = (self.aux_level_fix as i32) << 16;
                    self.aux_inc = 0.0;
                    self.prev_aux_level = self.aux_level;
                }
            } else if (self.aux_inc_fix > 0
                && ((self.prev_aux_level_fix + self.aux_inc_fix) >> 16)
                    >= self.aux_level_fix as i32)
                || (self.aux_inc_fix < 0
                    && ((self.prev_aux_level_fix + self.aux_inc_fix) >> 16)
                        <= self.aux_level_fix as i32)
            {
                self.aux_inc_fix = 0;
                self.prev_aux_level_fix = (self.aux_level_fix as i32) << 16;
                self.aux_inc = 0.0;
                self.prev_aux_level = self.aux_level;
            }
        }
    }
}

/// Install a new gain target, possibly ramped over `ramp` output frames.
///
/// The incoming value is sanitised (NaN/subnormal/negative to zero,
/// infinities and anything above unity to unity). A requested ramp is used
/// only if the float increment is a normal number that makes forward
/// progress *and* the U4.28 increment is nonzero; otherwise both
/// representations snap to the target immediately.
#[allow(clippy::too_many_arguments)]
pub(crate) fn set_volume_ramp_variables(
    new_volume: f32,
    ramp: usize,
    int_set: &mut i16,
    int_prev: &mut i32,
    int_inc: &mut i32,
    float_set: &mut f32,
    float_prev: &mut f32,
    float_inc: &mut f32,
) -> bool {
    // exact equality: a tolerance would make the committed value differ
    // from what the caller set
    if new_volume == *float_set {
        return false;
    }
    let mut ramp = ramp;
    let mut new_volume = new_volume;
    if new_volume < 0.0 {
        new_volume = 0.0;
    } else {
        match new_volume.classify() {
            FpCategory::Subnormal | FpCategory::Nan => new_volume = 0.0,
            FpCategory::Zero => {}
            FpCategory::Infinite => new_volume = UNITY_GAIN_FLOAT,
            FpCategory::Normal => {
                if new_volume > UNITY_GAIN_FLOAT {
                    new_volume = UNITY_GAIN_FLOAT;
                }
            }
        }
    }

    if ramp != 0 {
        let inc = (new_volume - *float_prev) / ramp as f32;
        let maxv = new_volume.max(*float_prev);
        if inc.is_normal() && maxv + inc != maxv {
            *float_inc = inc;
        } else {
            ramp = 0;
        }
    }

    // integer volume is capped at unity so U4.28 cannot wrap
    let scaled = new_volume * UNITY_GAIN_INT as f32;
    let int_volume = if scaled >= UNITY_GAIN_INT as f32 {
        UNITY_GAIN_INT as i32
    } else {
        scaled as i32
    };

    if ramp != 0 {
        let inc = ((int_volume << 16) - *int_prev) / ramp as i32;
        if inc != 0 {
            *int_inc = inc;
        } else {
            ramp = 0;
        }
    }

    if ramp == 0 {
        *float_inc = 0.0;
        *float_prev = new_volume;
        *int_inc = 0;
        *int_prev = int_volume << 16;
    }
    *float_set = new_volume;
    *int_set = int_volume as i16;
    true
}

/// Track input chain: the caller's provider, wrapped in a reformat stage
/// when the input encoding differs from the mixer-internal one.
pub(crate) enum TrackInput {
    Direct(Box<dyn BufferProvider>),
    Reformat(ReformatProvider),
}

impl TrackInput {
    pub fn provider_mut(&mut self) -> &mut dyn BufferProvider {
        match self {
            TrackInput::Direct(p) => p.as_mut(),
            TrackInput::Reformat(r) => r,
        }
    }

    pub fn into_provider(self) -> Box<dyn BufferProvider> {
        match self {
            TrackInput::Direct(p) => p,
            TrackInput::Reformat(r) => r.into_inner(),
        }
    }
}

pub(crate) struct Track {
    pub channel_mask: ChannelMask,
    pub channel_count: usize,
    pub format: PcmFormat,
    pub sample_rate: u32,

    pub mixer_channel_mask: ChannelMask,
    pub mixer_channel_count: usize,
    pub mixer_format: PcmFormat,
    pub mixer_in_format: PcmFormat,

    pub main_buffer: Option<BufferId>,
    pub aux_buffer: Option<BufferId>,
    pub tee_buffer: Option<BufferId>,
    pub tee_frame_count: usize,

    pub session_id: i32,
    pub enabled: bool,
    pub needs: u32,
    pub hook: TrackHook,

    pub input: Option<TrackInput>,
    pub resampler: Option<Box<dyn Resampler>>,
    pub volume: VolumeState,

    /// Provider ran dry this cycle; the track contributes silence for the
    /// rest of the block.
    pub stopped: bool,
}

impl Track {
    pub fn new(
        channel_mask: ChannelMask,
        format: PcmFormat,
        session_id: i32,
        device_sample_rate: u32,
        mixer_in_format: PcmFormat,
    ) -> Self {
        Self {
            channel_mask,
            channel_count: channel_mask.count(),
            format,
            sample_rate: device_sample_rate,
            mixer_channel_mask: ChannelMask::STEREO,
            mixer_channel_count: 2,
            mixer_format: PcmFormat::I16,
            mixer_in_format,
            main_buffer: None,
            aux_buffer: None,
            tee_buffer: None,
            tee_frame_count: 0,
            session_id,
            enabled: false,
            needs: 0,
            hook: TrackHook::Nop,
            input: None,
            resampler: None,
            volume: VolumeState::default(),
            stopped: false,
        }
    }

    #[inline]
    pub fn does_resample(&self) -> bool {
        self.resampler.is_some()
    }

    /// Stereo-volume handling applies to stereo tracks mixed to a
    /// position-mask output.
    #[inline]
    pub fn use_stereo_volume(&self) -> bool {
        self.channel_mask == ChannelMask::STEREO && self.mixer_channel_mask.is_position()
    }

    /// Mono tracks mixed to a position-mask output get the expansion paths.
    #[inline]
    pub fn is_mono_expand(&self) -> bool {
        self.channel_mask == ChannelMask::MONO && self.mixer_channel_mask.is_position()
    }

    /// Adopt `rate` as the track input rate, creating a converter the first
    /// time the rate diverges from the device rate. Once created, the
    /// converter lingers (as a pass-through) even at the device rate.
    pub fn set_resampler(&mut self, track_rate: u32, device_rate: u32) -> bool {
        if track_rate != device_rate || self.resampler.is_some() {
            if self.sample_rate != track_rate {
                self.sample_rate = track_rate;
                if self.resampler.is_none() {
                    log::debug!(
                        "creating resampler from track {} Hz to device {} Hz",
                        track_rate,
                        device_rate
                    );
                    // quality sticks to the initial ratio; dynamic-rate
                    // tracks keep it (known limitation)
                    let quality = quality_for_rate(track_rate);
                    self.resampler = Some(create_resampler(
                        self.mixer_in_format,
                        self.channel_count,
                        device_rate,
                        quality,
                    ));
                }
                return true;
            }
        }
        false
    }

    /// Destroy and recreate the converter after a channel change, keeping
    /// the configured rate.
    pub fn recreate_resampler(&mut self, device_rate: u32) {
        if self.resampler.is_some() {
            let rate = self.sample_rate;
            self.resampler = None;
            self.sample_rate = device_rate;
            self.set_resampler(rate, device_rate);
        }
    }

    pub fn reset_resampler(&mut self) {
        if let Some(rs) = self.resampler.as_mut() {
            rs.reset();
        }
    }

    pub fn unreleased_frames(&self) -> usize {
        self.resampler
            .as_ref()
            .map(|r| r.unreleased_frames())
            .unwrap_or(0)
    }

    /// Rebuild the reformat stage around the caller's provider after a
    /// format or channel change.
    pub fn reconfigure_input(&mut self, frame_count: usize) {
        if let Some(input) = self.input.take() {
            let provider = input.into_provider();
            self.input = Some(wrap_provider(
                provider,
                self.format,
                self.mixer_in_format,
                self.channel_count,
                frame_count,
            ));
        }
    }
}

pub(crate) fn wrap_provider(
    provider: Box<dyn BufferProvider>,
    src_format: PcmFormat,
    dst_format: PcmFormat,
    channels: usize,
    frame_count: usize,
) -> TrackInput {
    if src_format == dst_format {
        TrackInput::Direct(provider)
    } else {
        TrackInput::Reformat(ReformatProvider::new(
            provider, src_format, dst_format, channels, frame_count,
        ))
    }
}

/// Sink encoding view for the one-track save path.
pub(crate) enum SaveSlice<'a> {
    I16(&'a mut [i16]),
    F32(&'a mut [f32]),
}

/// Accumulating dispatch shared by the no-resample and post-resample paths.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_mix(
    mix: MixType,
    vol: &mut VolumeState,
    channels: usize,
    frames: usize,
    out: AccBuffer<'_>,
    input: InputSlice<'_>,
    aux: Option<AccBuffer<'_>>,
    ramp: bool,
    adjust: bool,
) {
    let has_aux = aux.is_some();
    match (out, input) {
        (AccBuffer::Float(out), InputSlice::F32(input)) => {
            let aux = aux.map(|a| match a {
                AccBuffer::Float(a) => a,
                AccBuffer::Q27(_) => unreachable!("aux plane mismatch"),
            });
            if ramp {
                fp::volume_ramp_multi(
                    mix,
                    channels,
                    frames,
                    out,
                    input,
                    &mut vol.prev_volume,
                    vol.volume_inc,
                    aux,
                    &mut vol.prev_aux_level,
                    vol.aux_inc,
                );
                if adjust {
                    vol.adjust_volume_ramp(has_aux, true);
                }
            } else {
                fp::volume_multi(
                    mix, channels, frames, out, input, vol.volume, aux, vol.aux_level,
                );
            }
        }
        (AccBuffer::Q27(out), input) => {
            let aux = aux.map(|a| match a {
                AccBuffer::Q27(a) => a,
                AccBuffer::Float(_) => unreachable!("aux plane mismatch"),
            });
            match input {
                InputSlice::I16(input) => {
                    mix_q(mix, vol, channels, frames, out, input, aux, ramp, adjust)
                }
                InputSlice::Q27(input) => {
                    mix_q(mix, vol, channels, frames, out, input, aux, ramp, adjust)
                }
                InputSlice::F32(_) => unreachable!("mixer plane mismatch"),
            }
        }
        _ => unreachable!("mixer plane mismatch"),
    }
}

#[allow(clippy::too_many_arguments)]
fn mix_q<TI: q::QInput>(
    mix: MixType,
    vol: &mut VolumeState,
    channels: usize,
    frames: usize,
    out: &mut [i32],
    input: &[TI],
    aux: Option<&mut [i32]>,
    ramp: bool,
    adjust: bool,
) {
    let has_aux = aux.is_some();
    if ramp {
        q::volume_ramp_multi(
            mix,
            channels,
            frames,
            out,
            input,
            &mut vol.prev_volume_fix,
            vol.volume_inc_fix,
            aux,
            &mut vol.prev_aux_level_fix,
            vol.aux_inc_fix,
        );
        if adjust {
            vol.adjust_volume_ramp(has_aux, false);
        }
    } else {
        q::volume_multi(
            mix,
            channels,
            frames,
            out,
            input,
            vol.volume_fix,
            aux,
            vol.aux_level_fix,
        );
    }
}

/// Store dispatch for the one-track fast path. Ramp state advances but
/// overshoot adjustment is left to the caller at end of cycle.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_mix_save(
    mix: MixType,
    vol: &mut VolumeState,
    channels: usize,
    frames: usize,
    out: SaveSlice<'_>,
    input: InputSlice<'_>,
    aux: Option<AccBuffer<'_>>,
    ramp: bool,
) {
    match input {
        InputSlice::F32(input) => {
            let aux = aux.map(|a| match a {
                AccBuffer::Float(a) => a,
                AccBuffer::Q27(_) => unreachable!("aux plane mismatch"),
            });
            match (out, ramp) {
                (SaveSlice::F32(out), false) => fp::volume_multi_save_f32(
                    mix, channels, frames, out, input, vol.volume, aux, vol.aux_level,
                ),
                (SaveSlice::I16(out), false) => fp::volume_multi_save_i16(
                    mix, channels, frames, out, input, vol.volume, aux, vol.aux_level,
                ),
                (SaveSlice::F32(out), true) => fp::volume_ramp_multi_save_f32(
                    mix,
                    channels,
                    frames,
                    out,
                    input,
                    &mut vol.prev_volume,
                    vol.volume_inc,
                    aux,
                    &mut vol.prev_aux_level,
                    vol.aux_inc,
                ),
                (SaveSlice::I16(out), true) => fp::volume_ramp_multi_save_i16(
                    mix,
                    channels,
                    frames,
                    out,
                    input,
                    &mut vol.prev_volume,
                    vol.volume_inc,
                    aux,
                    &mut vol.prev_aux_level,
                    vol.aux_inc,
                ),
            }
        }
        InputSlice::I16(input) => {
            let aux = aux.map(|a| match a {
                AccBuffer::Q27(a) => a,
                AccBuffer::Float(_) => unreachable!("aux plane mismatch"),
            });
            match (out, ramp) {
                (SaveSlice::F32(out), false) => q::volume_multi_save_f32(
                    mix, channels, frames, out, input, vol.volume_fix, aux, vol.aux_level_fix,
                ),
                (SaveSlice::I16(out), false) => q::volume_multi_save_i16(
                    mix, channels, frames, out, input, vol.volume_fix, aux, vol.aux_level_fix,
                ),
                (SaveSlice::F32(out), true) => q::volume_ramp_multi_save_f32(
                    mix,
                    channels,
                    frames,
                    out,
                    input,
                    &mut vol.prev_volume_fix,
                    vol.volume_inc_fix,
                    aux,
                    &mut vol.prev_aux_level_fix,
                    vol.aux_inc_fix,
                ),
                (SaveSlice::I16(out), true) => q::volume_ramp_multi_save_i16(
                    mix,
                    channels,
                    frames,
                    out,
                    input,
                    &mut vol.prev_volume_fix,
                    vol.volume_inc_fix,
                    aux,
                    &mut vol.prev_aux_level_fix,
                    vol.aux_inc_fix,
                ),
            }
        }
        InputSlice::Q27(_) => unreachable!("resample temp cannot feed the one-track path"),
    }
}

// ---- legacy fixed-point kernels ----

/// 16-bit interleaved stereo into a Q4.27 accumulator.
pub(crate) fn track_16bits_stereo(
    vol: &mut VolumeState,
    out: &mut [i32],
    input: &[i16],
    frames: usize,
    aux: Option<&mut [i32]>,
) {
    if let Some(aux) = aux {
        if vol.needs_ramp() {
            let mut vl = vol.prev_volume_fix[0];
            let mut vr = vol.prev_volume_fix[1];
            let mut va = vol.prev_aux_level_fix;
            for i in 0..frames {
                let l = input[i * 2] as i32;
                let r = input[i * 2 + 1] as i32;
                out[i * 2] = out[i * 2].saturating_add((vl >> 16) * l);
                out[i * 2 + 1] = out[i * 2 + 1].saturating_add((vr >> 16) * r);
                aux[i] = aux[i].saturating_add((va >> 17) * (l + r));
                vl += vol.volume_inc_fix[0];
                vr += vol.volume_inc_fix[1];
                va += vol.aux_inc_fix;
            }
            vol.prev_volume_fix[0] = vl;
            vol.prev_volume_fix[1] = vr;
            vol.prev_aux_level_fix = va;
            vol.adjust_volume_ramp(true, false);
        } else {
            let gain = sm_core::StereoGain::pack(vol.volume_fix[0], vol.volume_fix[1]);
            let va = vol.aux_level_fix;
            for i in 0..frames {
                let l = input[i * 2];
                let r = input[i * 2 + 1];
                let a = ((l as i32 + r as i32) >> 1) as i16;
                out[i * 2] = mul_add(l, gain.left(), out[i * 2]);
                out[i * 2 + 1] = mul_add(r, gain.right(), out[i * 2 + 1]);
                aux[i] = mul_add(a, va, aux[i]);
            }
        }
    } else if vol.needs_ramp() {
        let mut vl = vol.prev_volume_fix[0];
        let mut vr = vol.prev_volume_fix[1];
        for i in 0..frames {
            out[i * 2] = out[i * 2].saturating_add((vl >> 16) * input[i * 2] as i32);
            out[i * 2 + 1] =
                out[i * 2 + 1].saturating_add((vr >> 16) * input[i * 2 + 1] as i32);
            vl += vol.volume_inc_fix[0];
            vr += vol.volume_inc_fix[1];
        }
        vol.prev_volume_fix[0] = vl;
        vol.prev_volume_fix[1] = vr;
        vol.adjust_volume_ramp(false, false);
    } else {
        let gain = sm_core::StereoGain::pack(vol.volume_fix[0], vol.volume_fix[1]);
        for i in 0..frames {
            out[i * 2] = mul_add(input[i * 2], gain.left(), out[i * 2]);
            out[i * 2 + 1] = mul_add(input[i * 2 + 1], gain.right(), out[i * 2 + 1]);
        }
    }
}

/// 16-bit mono expanded to both output channels of a Q4.27 accumulator.
pub(crate) fn track_16bits_mono(
    vol: &mut VolumeState,
    out: &mut [i32],
    input: &[i16],
    frames: usize,
    aux: Option<&mut [i32]>,
) {
    if let Some(aux) = aux {
        if vol.needs_ramp() {
            let mut vl = vol.prev_volume_fix[0];
            let mut vr = vol.prev_volume_fix[1];
            let mut va = vol.prev_aux_level_fix;
            for i in 0..frames {
                let s = input[i] as i32;
                out[i * 2] = out[i * 2].saturating_add((vl >> 16) * s);
                out[i * 2 + 1] = out[i * 2 + 1].saturating_add((vr >> 16) * s);
                aux[i] = aux[i].saturating_add((va >> 16) * s);
                vl += vol.volume_inc_fix[0];
                vr += vol.volume_inc_fix[1];
                va += vol.aux_inc_fix;
            }
            vol.prev_volume_fix[0] = vl;
            vol.prev_volume_fix[1] = vr;
            vol.prev_aux_level_fix = va;
            vol.adjust_volume_ramp(true, false);
        } else {
            let (vl, vr) = (vol.volume_fix[0], vol.volume_fix[1]);
            let va = vol.aux_level_fix;
            for i in 0..frames {
                let s = input[i];
                out[i * 2] = mul_add(s, vl, out[i * 2]);
                out[i * 2 + 1] = mul_add(s, vr, out[i * 2 + 1]);
                aux[i] = mul_add(s, va, aux[i]);
            }
        }
    } else if vol.needs_ramp() {
        let mut vl = vol.prev_volume_fix[0];
        let mut vr = vol.prev_volume_fix[1];
        for i in 0..frames {
            let s = input[i] as i32;
            out[i * 2] = out[i * 2].saturating_add((vl >> 16) * s);
            out[i * 2 + 1] = out[i * 2 + 1].saturating_add((vr >> 16) * s);
            vl += vol.volume_inc_fix[0];
            vr += vol.volume_inc_fix[1];
        }
        vol.prev_volume_fix[0] = vl;
        vol.prev_volume_fix[1] = vr;
        vol.adjust_volume_ramp(false, false);
    } else {
        let (vl, vr) = (vol.volume_fix[0], vol.volume_fix[1]);
        for i in 0..frames {
            let s = input[i];
            out[i * 2] = mul_add(s, vl, out[i * 2]);
            out[i * 2 + 1] = mul_add(s, vr, out[i * 2 + 1]);
        }
    }
}

/// Ramped stereo scale of the Q4.27 resample temp into the accumulator.
pub(crate) fn volume_ramp_stereo(
    vol: &mut VolumeState,
    out: &mut [i32],
    temp: &[i32],
    frames: usize,
    aux: Option<&mut [i32]>,
) {
    let mut vl = vol.prev_volume_fix[0];
    let mut vr = vol.prev_volume_fix[1];
    let has_aux = aux.is_some();
    if let Some(aux) = aux {
        let mut va = vol.prev_aux_level_fix;
        for i in 0..frames {
            let l = temp[i * 2] >> 12;
            let r = temp[i * 2 + 1] >> 12;
            out[i * 2] = out[i * 2].saturating_add((vl >> 16) * l);
            out[i * 2 + 1] = out[i * 2 + 1].saturating_add((vr >> 16) * r);
            aux[i] = aux[i].saturating_add((va >> 17) * (l + r));
            vl += vol.volume_inc_fix[0];
            vr += vol.volume_inc_fix[1];
            va += vol.aux_inc_fix;
        }
        vol.prev_aux_level_fix = va;
    } else {
        for i in 0..frames {
            out[i * 2] = out[i * 2].saturating_add((vl >> 16) * (temp[i * 2] >> 12));
            out[i * 2 + 1] =
                out[i * 2 + 1].saturating_add((vr >> 16) * (temp[i * 2 + 1] >> 12));
            vl += vol.volume_inc_fix[0];
            vr += vol.volume_inc_fix[1];
        }
    }
    vol.prev_volume_fix[0] = vl;
    vol.prev_volume_fix[1] = vr;
    vol.adjust_volume_ramp(has_aux, false);
}

/// Constant stereo scale of the Q4.27 resample temp into the accumulator.
pub(crate) fn volume_stereo(
    vol: &VolumeState,
    out: &mut [i32],
    temp: &[i32],
    frames: usize,
    aux: Option<&mut [i32]>,
) {
    let (vl, vr) = (vol.volume_fix[0], vol.volume_fix[1]);
    if let Some(aux) = aux {
        let va = vol.aux_level_fix;
        for i in 0..frames {
            let l = (temp[i * 2] >> 12) as i16;
            let r = (temp[i * 2 + 1] >> 12) as i16;
            let a = ((l as i32 + r as i32) >> 1) as i16;
            out[i * 2] = mul_add(l, vl, out[i * 2]);
            out[i * 2 + 1] = mul_add(r, vr, out[i * 2 + 1]);
            aux[i] = mul_add(a, va, aux[i]);
        }
    } else {
        for i in 0..frames {
            let l = (temp[i * 2] >> 12) as i16;
            let r = (temp[i * 2 + 1] >> 12) as i16;
            out[i * 2] = mul_add(l, vl, out[i * 2]);
            out[i * 2 + 1] = mul_add(r, vr, out[i * 2 + 1]);
        }
    }
}
