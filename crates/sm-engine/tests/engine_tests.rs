//! Engine-level properties: silence, additivity, ordering, muting, aux
//! sends, channel counts, and the legacy 16-bit plane.

mod common;

use common::*;
use sm_engine::{ChannelMask, Mixer, Param, PcmFormat, SliceProvider};

const FRAMES: usize = 64;

#[test]
fn test_silence_preservation() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    // default gain is zero: both tracks are muted
    stereo_i16_track(&mut mixer, 0, main, &constant_stereo(0x7FFF, FRAMES * 2), 0.0);
    stereo_i16_track(&mut mixer, 1, main, &constant_stereo(-0x8000, FRAMES * 2), 0.0);

    mixer.process();
    assert!(mixer.buffer_i16(main)[..FRAMES * 2].iter().all(|&s| s == 0));

    // second cycle runs the demoted no-op hook; output stays bit-exact zero
    mixer.process();
    assert!(mixer.buffer_i16(main)[..FRAMES * 2].iter().all(|&s| s == 0));
}

#[test]
fn test_additivity_within_rounding() {
    let a: Vec<i16> = (0..(FRAMES * 2) as i16).map(|i| i * 131).collect();
    let b: Vec<i16> = (0..(FRAMES * 2) as i16).map(|i| -i * 97).collect();

    let run = |tracks: &[(&[i16], f32)]| -> Vec<i16> {
        let mut mixer = Mixer::new(FRAMES, 48000);
        let main = mixer.alloc_main_buffer();
        for (i, (data, gain)) in tracks.iter().enumerate() {
            stereo_i16_track(&mut mixer, i as i32, main, data, *gain);
        }
        mixer.process();
        mixer.buffer_i16(main)[..FRAMES * 2].to_vec()
    };

    let only_a = run(&[(&a, 0.7)]);
    let only_b = run(&[(&b, 0.3)]);
    let both = run(&[(&a, 0.7), (&b, 0.3)]);

    for i in 0..FRAMES * 2 {
        let sum = only_a[i] as i32 + only_b[i] as i32;
        assert!(
            (both[i] as i32 - sum).abs() <= 1,
            "sample {i}: {} vs {}",
            both[i],
            sum
        );
    }
}

#[test]
fn test_order_independence() {
    let a: Vec<i16> = (0..(FRAMES * 2) as i16).map(|i| i * 113).collect();
    let b = constant_stereo(0x2000, FRAMES);

    let run = |create_order: [i32; 2]| -> Vec<i16> {
        let mut mixer = Mixer::new(FRAMES, 48000);
        let main = mixer.alloc_main_buffer();
        for &name in &create_order {
            let data: &[i16] = if name == 0 { &a } else { &b };
            let gain = if name == 0 { 0.6 } else { 0.4 };
            stereo_i16_track(&mut mixer, name, main, data, gain);
        }
        mixer.process();
        mixer.buffer_i16(main)[..FRAMES * 2].to_vec()
    };

    assert_eq!(run([0, 1]), run([1, 0]));
}

#[test]
fn test_mute_leaves_other_tracks_untouched() {
    let live: Vec<i16> = (0..(FRAMES * 2) as i16).collect();

    let solo = {
        let mut mixer = Mixer::new(FRAMES, 48000);
        let main = mixer.alloc_main_buffer();
        stereo_i16_track(&mut mixer, 0, main, &live, 1.0);
        mixer.process();
        mixer.buffer_i16(main)[..FRAMES * 2].to_vec()
    };

    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();
    stereo_i16_track(&mut mixer, 0, main, &live, 1.0);
    stereo_i16_track(&mut mixer, 1, main, &constant_stereo(0x7FFF, FRAMES), 0.0);
    mixer.process();

    assert_eq!(&mixer.buffer_i16(main)[..FRAMES * 2], &solo[..]);
}

#[test]
fn test_ramp_is_monotone_on_constant_input() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    mixer
        .create(0, ChannelMask::STEREO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(
        0,
        Box::new(SliceProvider::from_i16(&constant_stereo(0x7FFF, FRAMES), 2)),
    );
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

    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for f in 1..FRAMES {
        assert!(out[f * 2] >= out[(f - 1) * 2], "frame {f}");
        assert!(out[f * 2 + 1] >= out[(f - 1) * 2 + 1], "frame {f}");
    }
}

#[test]
fn test_aux_send_carries_half_stereo_sum() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();
    let aux = mixer.alloc_aux_buffer();

    // L = 0.25, R = 0.75 full scale
    let input: Vec<i16> = (0..FRAMES)
        .flat_map(|_| [0x2000i16, 0x6000])
        .collect();
    stereo_i16_track(&mut mixer, 0, main, &input, 1.0);
    mixer.set_parameter(0, Param::AuxBuffer(Some(aux)));
    mixer.set_parameter(
        0,
        Param::AuxLevel {
            value: 1.0,
            ramp: false,
        },
    );

    mixer.clear_buffer(aux);
    mixer.process();

    let main_out = &mixer.buffer_i16(main)[..FRAMES * 2];
    assert_eq!(main_out[0], 0x2000);
    assert_eq!(main_out[1], 0x6000);

    let aux_out = &mixer.buffer_f32(aux)[..FRAMES];
    for &s in aux_out {
        assert!((s - 0.5).abs() < 1e-5, "aux sample {s}");
    }
}

#[test]
fn test_six_channel_track_shares_one_volume() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    mixer
        .create(0, ChannelMask::position(6), PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MixerChannelMask(ChannelMask::position(6)));
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(
        0,
        Box::new(SliceProvider::from_i16(&vec![0x4000i16; FRAMES * 6], 6)),
    );
    // only channel 0's volume applies above two channels
    mixer.set_parameter(
        0,
        Param::Volume {
            channel: 0,
            value: 0.5,
            ramp: false,
        },
    );
    mixer.enable(0);
    mixer.process();

    let out = &mixer.buffer_i16(main)[..FRAMES * 6];
    for &s in out {
        assert_eq!(s, 0x2000);
    }
}

#[test]
fn test_resampler_lifecycle_parameters() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    mono_i16_track(&mut mixer, 0, main, &vec![0x4000; 512], 1.0);
    mixer.set_parameter(0, Param::SampleRate(22050));
    mixer.process();
    assert!(mixer.get_unreleased_frames(0) > 0);

    mixer.set_parameter(0, Param::ResetResampler);
    assert_eq!(mixer.get_unreleased_frames(0), 0);

    // removal restores the device rate; mixing keeps working
    mixer.set_parameter(0, Param::RemoveResampler);
    mixer.process();
    assert_eq!(mixer.get_unreleased_frames(0), 0);
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    assert_eq!(out[2 * 32], 0x4000);
}

#[test]
fn test_tee_parameters_are_accepted() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();
    let tee = mixer.alloc_main_buffer();

    let input = constant_stereo(0x1000, FRAMES);
    stereo_i16_track(&mut mixer, 0, main, &input, 1.0);
    mixer.set_parameter(0, Param::TeeBuffer(Some(tee)));
    mixer.set_parameter(0, Param::TeeBufferFrameCount(FRAMES));

    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x1000);
    }
}

#[test]
fn test_steady_state_is_stable_across_cycles() {
    let mut mixer = Mixer::new(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    let mut provider = SliceProvider::from_i16(&constant_stereo(0x3000, FRAMES), 2);
    for _ in 0..3 {
        provider.push_i16(&constant_stereo(0x3000, FRAMES));
    }
    mixer
        .create(0, ChannelMask::STEREO, PcmFormat::I16, 0)
        .unwrap();
    mixer.set_parameter(0, Param::MainBuffer(Some(main)));
    mixer.set_buffer_provider(0, Box::new(provider));
    set_gain(&mut mixer, 0, 0.75);
    mixer.enable(0);

    mixer.process();
    let first = mixer.buffer_i16(main)[..FRAMES * 2].to_vec();
    for _ in 0..3 {
        mixer.process();
        assert_eq!(&mixer.buffer_i16(main)[..FRAMES * 2], &first[..]);
    }
}

// ---- legacy 16-bit plane ----

#[test]
fn test_legacy_single_stereo_track_is_bit_exact() {
    let mut mixer = Mixer::new_legacy(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    let input: Vec<i16> = (0..(FRAMES * 2) as i16).map(|i| i * 251 - 16000).collect();
    stereo_i16_track(&mut mixer, 0, main, &input, 1.0);

    mixer.process();
    assert_eq!(&mixer.buffer_i16(main)[..FRAMES * 2], &input[..]);
}

#[test]
fn test_legacy_two_tracks_sum_in_fixed_point() {
    let mut mixer = Mixer::new_legacy(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    stereo_i16_track(&mut mixer, 0, main, &constant_stereo(0x4000, FRAMES), 0.5);
    stereo_i16_track(&mut mixer, 1, main, &constant_stereo(0x4000, FRAMES), 0.5);

    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x4000);
    }
}

#[test]
fn test_legacy_resampled_stereo_track() {
    let mut mixer = Mixer::new_legacy(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    stereo_i16_track(&mut mixer, 0, main, &constant_stereo(0x2000, 512), 1.0);
    mixer.set_parameter(0, Param::SampleRate(24000));

    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    // settled value after interpolator priming
    assert_eq!(out[2 * 32], 0x2000);
    assert_eq!(out[2 * 32 + 1], 0x2000);
}

#[test]
fn test_legacy_mono_track_expands() {
    let mut mixer = Mixer::new_legacy(FRAMES, 48000);
    let main = mixer.alloc_main_buffer();

    mono_i16_track(&mut mixer, 0, main, &vec![0x2000; FRAMES], 1.0);
    stereo_i16_track(&mut mixer, 1, main, &constant_stereo(0x1000, FRAMES), 1.0);

    mixer.process();
    let out = &mixer.buffer_i16(main)[..FRAMES * 2];
    for &s in out {
        assert_eq!(s, 0x3000);
    }
}
