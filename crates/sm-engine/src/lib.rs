//! sm-engine: the soundmix multi-track PCM mixer
//!
//! One `Mixer` owns N tracks, each with its own input format, channel
//! mask, sample rate, gain ramp state and pull source. Every `process()`
//! call produces one block of `frame_count` frames per output buffer:
//!
//! - tracks sharing a main buffer form a group summed into one accumulator
//! - per-track kernels are selected up front by a validate pass, not
//!   branched per sample
//! - gains ramp linearly over one block, tracked coherently in fixed-point
//!   and float
//! - a track whose provider runs dry contributes silence for the rest of
//!   the block and resumes next cycle
//!
//! The mixer is single-threaded cooperative: the caller serialises control
//! calls and `process()`. Nothing here blocks, and steady-state processing
//! does not allocate.

mod mixer;
mod provider;
mod track;

pub use mixer::{BufferId, Mixer, Param};
pub use provider::ReformatProvider;

// re-export the contracts callers implement against
pub use sm_core::{Buffer, BufferProvider, ChannelMask, MixError, MixResult, PcmFormat, SliceProvider};
pub use sm_dsp::{AccBuffer, Quality, Resampler};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_validates_channel_mask() {
        let mut mixer = Mixer::new(64, 48000);
        assert!(mixer
            .create(0, ChannelMask::STEREO, PcmFormat::I16, 0)
            .is_ok());
        assert!(mixer
            .create(1, ChannelMask::Position(0), PcmFormat::I16, 0)
            .is_err());
        assert!(mixer
            .create(1, ChannelMask::position(9), PcmFormat::F32, 0)
            .is_err());
        assert!(mixer.exists(0));
        assert!(!mixer.exists(1));
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn test_duplicate_name_is_fatal() {
        let mut mixer = Mixer::new(64, 48000);
        mixer
            .create(3, ChannelMask::STEREO, PcmFormat::I16, 0)
            .unwrap();
        let _ = mixer.create(3, ChannelMask::MONO, PcmFormat::I16, 0);
    }

    #[test]
    #[should_panic(expected = "main buffer must be set")]
    fn test_enable_requires_main_buffer() {
        let mut mixer = Mixer::new(64, 48000);
        mixer
            .create(0, ChannelMask::STEREO, PcmFormat::I16, 0)
            .unwrap();
        mixer.enable(0);
    }

    #[test]
    fn test_track_names_and_unreleased() {
        let mut mixer = Mixer::new(64, 48000);
        mixer
            .create(7, ChannelMask::STEREO, PcmFormat::I16, 0)
            .unwrap();
        mixer
            .create(2, ChannelMask::MONO, PcmFormat::I16, 0)
            .unwrap();
        assert_eq!(mixer.track_names(), "2 7");
        assert_eq!(mixer.get_unreleased_frames(2), 0);
        assert_eq!(mixer.get_unreleased_frames(99), 0);
    }

    #[test]
    fn test_empty_mixer_processes() {
        let mut mixer = Mixer::new(64, 48000);
        mixer.process();
        mixer.process();
    }
}
