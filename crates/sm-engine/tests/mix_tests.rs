//! End-to-end mixing scenarios at frame_count = 64.

mod common;

use common::*;
use sm_engine::{ChannelMask, Mixer, Param, PcmFormat, SliceProvider};

const FRAMES: usize = 64;

#[test]
fn test_one_stereo_track_unity_gain_is_transparent() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    let input: Vec<i16> = (0..(FRAMES * 2) as i16).collect();
    stereo_i16_track(&mut mixer, 0, main, &input, 1.0);

    mixer.process();

    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    assert_eq!(out, &input[..]);
    assert_eq!(out[FRAMES * 2 - 2], 126);
    assert_eq!(out[FRAMES * 2 - 1], 127);
}

#[test]
fn test_two_mono_tracks_at_half_gain_sum_exactly() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    mono_i16_track(&mut mixer, 0, main, &vec![0x4000; FRAMES], 0.5);
    mono_i16_track(&mut mixer, 1, main, &vec![0x4000; FRAMES], 0.5);

    mixer.process();

    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x4000);
    }
}

#[test]
fn test_stereo_ramp_zero_to_unity_over_one_block() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    mixer
        .create(0, ChannelMask::STEREO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    let mut provider = SliceProvider::from_i16(&constant_stereo(0x7FFF, FRAMES), 2);
    provider.push_i16(&constant_stereo(0x7FFF, FRAMES));
    mixer.set_buffer_provider(0, Box::new(provider));
    mixer.set_parameter(
        0,
        Param::Volume {
            channel: 0,
            value: 1.0,
            ramp: true,
        },
    );
    mixer.set_parameter(
        0,
        Param::Volume {
            channel: 1,
            value: 1.0,
            ramp: true,
        },
    );
    mixer.enable(0);

    mixer.process();
    {
        let out = &mixer.buffer_i16(main)[..FRAMES * 2];
        // gain on frame i is i/FRAMES
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 0);
        assert!(out[2 * 32] >= 0x3F00 && out[2 * 32] <= 0x4100, "mid frame {}", out[2 * 32]);
        assert!(out[2 * 63] >= 32200, "last frame {}", out[2 * 63]);
    }

    // the ramp committed: the next block runs at constant unity gain
    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x7FFF);
    }
}

#[test]
fn test_mono_22050_track_into_48000_device() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    mixer
        .create(0, ChannelMask::MONO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    mixer.set_parameter(0, Param::SampleRate(22050));
    mixer.set_buffer_provider(0, Box::new(SliceProvider::from_i16(&vec![0x4000; 256], 1)));
    set_gain(&mut mixer, 0, 1.0);
    mixer.enable(0);

    mixer.process();

    // mono expands to both device channels at full level once the
    // interpolator has primed
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    assert!(out[2 * 32] >= 0x3F00 && out[2 * 32] <= 0x4100, "got {}", out[2 * 32]);
    assert!(out[2 * 32 + 1] >= 0x3F00 && out[2 * 32 + 1] <= 0x4100);
    // the converter holds history it has consumed but not emitted
    assert!(mixer.get_unreleased_frames(0) > 0);
}

#[test]
fn test_provider_underrun_mid_block_then_recovery() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    // only 30 frames available in the first cycle
    let provider = SliceProvider::from_i16(&constant_stereo(0x1000, 30), 2);
    mixer
        .create(0, ChannelMask::STEREO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(0, Box::new(provider));
    set_gain(&mut mixer, 0, 1.0);
    mixer.enable(0);

    mixer.process();
    {
        let out = &mixer.buffer_i16(main)[..FRAMES * 2];
        for f in 0..30 {
            assert_eq!(out[f * 2], 0x1000, "frame {f}");
            assert_eq!(out[f * 2 + 1], 0x1000, "frame {f}");
        }
        for f in 30..FRAMES {
            assert_eq!(out[f * 2], 0, "frame {f}");
            assert_eq!(out[f * 2 + 1], 0, "frame {f}");
        }
    }

    // refill; the next cycle resumes normally
    mixer.set_buffer_provider(
        0,
        Box::new(SliceProvider::from_i16(&constant_stereo(0x1000, FRAMES), 2)),
    );
    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x1000);
    }
}

#[test]
fn test_single_track_fast_path_saturates_instead_of_wrapping() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    let mut provider = SliceProvider::from_i16(&constant_stereo(0x7FFF, FRAMES), 2);
    provider.push_i16(&constant_stereo(0x7FFF, FRAMES));
    mixer
        .create(0, ChannelMask::STEREO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(0, Box::new(provider));
    // boost request is limited to unity at the control surface
    set_gain(&mut mixer, 0, 1.5);
    mixer.enable(0);

    mixer.process();
    {
        let out = &mixer.buffer_i16(main)[..FRAMES * 2];
        for &s in out {
            assert_eq!(s, 0x7FFF); // clamped, never wrapped negative
        }
    }

    set_gain(&mut mixer, 0, 0.9);
    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        // 0.9 gain never clips
        assert!((29489..=29491).contains(&s), "got {s}");
        assert!(s < i16::MAX);
    }
}

#[test]
fn test_formats_reach_the_mix() {
    // 8-bit, 24-bit packed, 32-bit and float inputs all land at the same
    // level as the 16-bit reference
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    let p24: Vec<u8> = (0..FRAMES * 2).flat_map(|_| [0x00u8, 0x00, 0x40]).collect();
    mixer
        .create(0, ChannelMask::STEREO, PcmFormat::I24Packed, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(0, Box::new(SliceProvider::from_bytes(p24, 6)));
    set_gain(&mut mixer, 0, 1.0);
    mixer.enable(0);

    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x4000);
    }

    // swap the input format to float on the same track
    mixer.disable(0);
    mixer.set_parameter(0, Param::Format(PcmFormat::F32));
    mixer.set_buffer_provider(0, Box::new(SliceProvider::from_f32(&vec![0.25; FRAMES * 2], 2)));
    mixer.enable(0);
    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x2000);
    }
}

#[test]
fn test_float_output_format() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    let input = constant_stereo(0x4000, FRAMES);
    stereo_i16_track(&mut mixer, 0, main, &input, 1.0);
    mixer.set_parameter(0, Param::MixerFormat(PcmFormat::F32));

    mixer.process();
    let out = &mixer.buffer_f32(main)[..FRAMES * 2];
    for &s in out {
        assert!((s - 0.5).abs() < 1e-6);
    }
}
