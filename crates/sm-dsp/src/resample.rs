//! Sample-rate conversion
//!
//! The engine only depends on the [`Resampler`] contract: an accumulating
//! converter that pulls its own input from a [`BufferProvider`] and owns
//! whatever history it needs across cycles. Two built-ins are provided,
//! selected by rate at creation: a linear interpolator for low quality and
//! a Catmull-Rom cubic for the default.

use serde::{Deserialize, Serialize};

use sm_core::{BufferProvider, PcmFormat, MAX_NUM_CHANNELS, UNITY_GAIN_FLOAT};

/// Mutable view of a mix accumulator, one variant per sample plane.
pub enum AccBuffer<'a> {
    /// Q4.27 accumulator elements.
    Q27(&'a mut [i32]),
    /// Float accumulator elements.
    Float(&'a mut [f32]),
}

/// Sample-rate converter owned by a track.
///
/// `resample` produces `frames` output frames, *accumulating* them into
/// `dst` with the configured per-channel gain applied, pulling as much
/// input from `provider` as the rate ratio requires. A provider with no
/// data ends the call early; whatever was already accumulated stays.
pub trait Resampler {
    /// Change the input sample rate (the output rate is fixed at creation).
    fn set_sample_rate(&mut self, rate: u32);

    /// Gain applied to output channels 0 and 1 while accumulating.
    fn set_volume(&mut self, left: f32, right: f32);

    fn resample(&mut self, dst: AccBuffer<'_>, frames: usize, provider: &mut dyn BufferProvider);

    /// Drop all interpolation history.
    fn reset(&mut self);

    /// Input frames consumed but not yet fully emitted.
    fn unreleased_frames(&self) -> usize;

    /// Output interleave width. Mono input is duplicated to stereo.
    fn channels(&self) -> usize;
}

/// Conversion quality, fixed at creation from the initial track rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    /// Linear interpolation.
    Low,
    /// Catmull-Rom cubic interpolation.
    Default,
}

/// True for the music/video rate families (multiples of 11025 or 12000 Hz).
/// Telephony-family rates get the low-quality converter.
#[inline]
pub fn is_music_rate(rate: u32) -> bool {
    rate % 11025 == 0 || rate % 12000 == 0
}

/// Quality rule applied when a track first diverges from the device rate.
/// The choice sticks even if the track rate changes later.
#[inline]
pub fn quality_for_rate(rate: u32) -> Quality {
    if is_music_rate(rate) {
        Quality::Default
    } else {
        Quality::Low
    }
}

/// Create a converter for a track with `channels` input channels carrying
/// `format` samples, producing `out_rate` output.
pub fn create_resampler(
    format: PcmFormat,
    channels: usize,
    out_rate: u32,
    quality: Quality,
) -> Box<dyn Resampler> {
    log::debug!(
        "creating {:?} resampler: format {:?}, {} ch, out {} Hz",
        quality,
        format,
        channels,
        out_rate
    );
    Box::new(InterpResampler::new(format, channels, out_rate, quality))
}

/// History depth: enough points for the cubic window.
const HIST: usize = 4;

/// Polynomial interpolating converter behind [`Resampler`].
pub struct InterpResampler {
    quality: Quality,
    format: PcmFormat,
    in_channels: usize,
    out_channels: usize,
    in_rate: u32,
    out_rate: u32,
    vol: [f32; 2],
    /// Last [`HIST`] input frames per channel, newest last.
    hist: [[f32; HIST]; MAX_NUM_CHANNELS],
    /// Fractional position past the interpolation interval; a whole frame
    /// is consumed each time this reaches 1.
    frac: f64,
    /// Total input frames pushed since the last reset.
    primed: usize,
}

impl InterpResampler {
    pub fn new(format: PcmFormat, channels: usize, out_rate: u32, quality: Quality) -> Self {
        assert!(
            matches!(format, PcmFormat::I16 | PcmFormat::F32),
            "resampler input must be a mix format"
        );
        assert!(channels >= 1 && channels <= MAX_NUM_CHANNELS);
        Self {
            quality,
            format,
            in_channels: channels,
            out_channels: if channels == 1 { 2 } else { channels },
            in_rate: out_rate,
            out_rate,
            vol: [UNITY_GAIN_FLOAT; 2],
            hist: [[0.0; HIST]; MAX_NUM_CHANNELS],
            frac: 0.0,
            primed: 0,
        }
    }

    #[inline]
    fn decode(&self, data: &[u8], frame: usize, channel: usize) -> f32 {
        let idx = (frame * self.in_channels + channel) * self.format.bytes_per_sample();
        match self.format {
            PcmFormat::I16 => {
                i16::from_ne_bytes([data[idx], data[idx + 1]]) as f32 / 32768.0
            }
            _ => f32::from_ne_bytes([data[idx], data[idx + 1], data[idx + 2], data[idx + 3]]),
        }
    }

    fn push_frame(&mut self, data: &[u8], frame: usize) {
        for c in 0..self.in_channels {
            let s = self.decode(data, frame, c);
            let h = &mut self.hist[c];
            h.copy_within(1.., 0);
            h[HIST - 1] = s;
        }
        self.primed += 1;
    }

    /// Interpolate channel `c` at the current fractional position, between
    /// the two middle history points.
    #[inline]
    fn interp(&self, c: usize) -> f32 {
        let h = &self.hist[c];
        let t = self.frac as f32;
        match self.quality {
            Quality::Low => h[1] + (h[2] - h[1]) * t,
            Quality::Default => {
                // Catmull-Rom over h[0..4], evaluated inside [h[1], h[2]]
                let (p0, p1, p2, p3) = (h[0], h[1], h[2], h[3]);
                let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
                let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
                let c2 = -0.5 * p0 + 0.5 * p2;
                ((a * t + b) * t + c2) * t + p1
            }
        }
    }

    fn emit(&self, dst: &mut AccBuffer<'_>, frame: usize) {
        for ch in 0..self.out_channels {
            let src = if self.in_channels == 1 {
                0
            } else {
                ch.min(self.in_channels - 1)
            };
            let gain = match ch {
                0 => self.vol[0],
                1 => self.vol[1],
                _ => self.vol[0],
            };
            let y = self.interp(src) * gain;
            let idx = frame * self.out_channels + ch;
            match dst {
                AccBuffer::Float(d) => d[idx] += y,
                AccBuffer::Q27(d) => {
                    d[idx] = d[idx].saturating_add((y * 134_217_728.0) as i32)
                }
            }
        }
    }
}

impl Resampler for InterpResampler {
    fn set_sample_rate(&mut self, rate: u32) {
        if rate != self.in_rate {
            log::trace!("resampler rate {} -> {} Hz", self.in_rate, rate);
            self.in_rate = rate;
        }
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        self.vol = [left, right];
    }

    fn resample(&mut self, mut dst: AccBuffer<'_>, frames: usize, provider: &mut dyn BufferProvider) {
        let step = self.in_rate as f64 / self.out_rate as f64;
        let frame_size = self.format.bytes_per_frame(self.in_channels);
        let mut out = 0usize;

        'cycle: while out < frames {
            while self.frac < 1.0 {
                self.emit(&mut dst, out);
                out += 1;
                self.frac += step;
                if out == frames {
                    break 'cycle;
                }
            }

            // a whole number of input frames is due
            let remaining = frames - out;
            let need = ((self.frac + step * (remaining - 1) as f64) as usize).max(1);
            let used = {
                let Some(buf) = provider.get_next_buffer(need) else {
                    break;
                };
                let avail = buf.frames(frame_size);
                let mut used = 0usize;
                while self.frac >= 1.0 && used < avail {
                    self.push_frame(buf.data, used);
                    used += 1;
                    self.frac -= 1.0;
                }
                used
            };
            provider.release_buffer(used);
            if used == 0 {
                break;
            }
        }
    }

    fn reset(&mut self) {
        self.hist = [[0.0; HIST]; MAX_NUM_CHANNELS];
        self.frac = 0.0;
        self.primed = 0;
    }

    fn unreleased_frames(&self) -> usize {
        // frames still held in the interpolation window
        self.primed.min(HIST - 2)
    }

    fn channels(&self) -> usize {
        self.out_channels
    }
}
