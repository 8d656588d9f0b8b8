//! Error types for soundmix

use thiserror::Error;

use crate::format::{ChannelMask, PcmFormat};

/// Core error type
#[derive(Error, Debug)]
pub enum MixError {
    #[error("invalid channel mask: {0:?}")]
    InvalidChannelMask(ChannelMask),

    #[error("invalid format: {0:?}")]
    InvalidFormat(PcmFormat),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result type alias
pub type MixResult<T> = Result<T, MixError>;
