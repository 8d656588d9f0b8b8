//! sm-dsp: mixing kernels and sample-rate conversion for soundmix
//!
//! Provides:
//! - `ops` - the inner mixing loops over every (mix shape, volume shape,
//!   sample plane) combination the engine dispatches to
//! - `resample` - the resampler contract the engine drives, plus the
//!   built-in linear and cubic converters

pub mod ops;
pub mod resample;

pub use ops::{InputSlice, MixType};
pub use resample::{
    create_resampler, is_music_rate, quality_for_rate, AccBuffer, InterpResampler, Quality,
    Resampler,
};
