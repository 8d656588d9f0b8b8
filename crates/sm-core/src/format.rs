//! Linear PCM sample encodings and channel masks

use serde::{Deserialize, Serialize};

/// Hard channel limit per track and per mix bus.
pub const MAX_NUM_CHANNELS: usize = 8;

/// Number of independent volume channels (stereo volume only).
pub const MAX_NUM_VOLUMES: usize = 2;

/// Linear PCM sample encodings understood by the mixer.
///
/// All five are accepted as track input. The mixer-internal accumulator
/// element and the sink output are restricted to `I16` and `F32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PcmFormat {
    /// Unsigned 8-bit, zero point at 0x80.
    U8,
    /// Signed 16-bit (Q0.15).
    I16,
    /// Signed 24-bit, packed into three bytes per sample.
    I24Packed,
    /// Signed 32-bit (Q0.31).
    I32,
    /// 32-bit IEEE float, nominal range [-1.0, 1.0).
    F32,
}

impl PcmFormat {
    #[inline]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            PcmFormat::U8 => 1,
            PcmFormat::I16 => 2,
            PcmFormat::I24Packed => 3,
            PcmFormat::I32 => 4,
            PcmFormat::F32 => 4,
        }
    }

    #[inline]
    pub const fn bytes_per_frame(self, channels: usize) -> usize {
        self.bytes_per_sample() * channels
    }

    /// Valid as mixer-internal or sink output encoding.
    #[inline]
    pub const fn is_mix_format(self) -> bool {
        matches!(self, PcmFormat::I16 | PcmFormat::F32)
    }
}

/// Output channel mask, up to [`MAX_NUM_CHANNELS`] channels.
///
/// Position masks name speaker positions bit by bit; index masks only carry
/// a channel count. Mono and stereo position masks get dedicated handling
/// in the mixer (mono expansion, stereo volume).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelMask {
    Position(u32),
    Index(u32),
}

impl ChannelMask {
    pub const MONO: ChannelMask = ChannelMask::Position(0x1);
    pub const STEREO: ChannelMask = ChannelMask::Position(0x3);

    /// Position mask covering the first `channels` positions.
    pub fn position(channels: usize) -> ChannelMask {
        ChannelMask::Position((1u32 << channels) - 1)
    }

    /// Index mask for `channels` anonymous channels.
    pub fn index(channels: usize) -> ChannelMask {
        ChannelMask::Index((1u32 << channels) - 1)
    }

    #[inline]
    pub fn count(self) -> usize {
        match self {
            ChannelMask::Position(bits) | ChannelMask::Index(bits) => bits.count_ones() as usize,
        }
    }

    #[inline]
    pub fn is_position(self) -> bool {
        matches!(self, ChannelMask::Position(_))
    }

    /// Usable as a track or mix-bus mask.
    #[inline]
    pub fn is_valid(self) -> bool {
        let n = self.count();
        n >= 1 && n <= MAX_NUM_CHANNELS
    }
}
