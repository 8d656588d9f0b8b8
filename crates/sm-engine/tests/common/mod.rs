//! Shared helpers for the engine integration tests.

use sm_engine::{BufferId, ChannelMask, Mixer, Param, PcmFormat, SliceProvider};

/// Create, configure and enable a 16-bit stereo track fed from `samples`.
pub fn stereo_i16_track(
    mixer: &mut Mixer,
    name: i32,
    main: BufferId,
    samples: &[i16],
    gain: f32,
) {
    mixer
        .create(name, ChannelMask::STEREO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(name, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(name, Box::new(SliceProvider::from_i16(samples, 2)));
    set_gain(mixer, name, gain);
    mixer.enable(name);
}

/// Create, configure and enable a 16-bit mono track fed from `samples`.
pub fn mono_i16_track(mixer: &mut Mixer, name: i32, main: BufferId, samples: &[i16], gain: f32) {
    mixer
        .create(name, ChannelMask::MONO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(name, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(name, Box::new(SliceProvider::from_i16(samples, 1)));
    set_gain(mixer, name, gain);
    mixer.enable(name);
}

/// Instantaneous equal gain on both volume channels.
pub fn set_gain(mixer: &mut Mixer, name: i32, gain: f32) {
    mixer.set_parameter(
        name,
        Param::Volume {
            channel: 0,
            value: gain,
            ramp: false,
        },
    );
    mixer.set_parameter(
        name,
        Param::Volume {
            channel: 1,
            value: gain,
            ramp: false,
        },
    );
}

/// Interleaved stereo block with both channels carrying `value`.
pub fn constant_stereo(value: i16, frames: usize) -> Vec<i16> {
    vec![value; frames * 2]
}
