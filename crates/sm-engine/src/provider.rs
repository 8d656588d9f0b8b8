//! Input reformatting
//!
//! The mixing kernels consume the mixer-internal encoding only. When a
//! track's input format differs, its provider is wrapped in a
//! [`ReformatProvider`] that converts pulled frames through a buffer sized
//! at configuration time, so the hot path stays allocation-free. Frames the
//! engine does not consume are re-offered on the next pull, exactly like
//! any other provider.

use sm_core::convert::{f32_from_pcm_bytes, i16_from_pcm_bytes};
use sm_core::{Buffer, BufferProvider, PcmFormat};

enum Scratch {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

pub struct ReformatProvider {
    inner: Box<dyn BufferProvider>,
    src_format: PcmFormat,
    channels: usize,
    scratch: Scratch,
}

impl ReformatProvider {
    /// Wrap `inner`, converting `src_format` frames of `channels` channels
    /// to `dst_format`. At most `max_frames` frames are offered per pull.
    pub fn new(
        inner: Box<dyn BufferProvider>,
        src_format: PcmFormat,
        dst_format: PcmFormat,
        channels: usize,
        max_frames: usize,
    ) -> Self {
        let cap = max_frames.max(1) * channels;
        let scratch = match dst_format {
            PcmFormat::I16 => Scratch::I16(vec![0; cap]),
            PcmFormat::F32 => Scratch::F32(vec![0.0; cap]),
            other => panic!("bad mixer input format: {other:?}"),
        };
        Self {
            inner,
            src_format,
            channels,
            scratch,
        }
    }

    pub fn into_inner(self) -> Box<dyn BufferProvider> {
        self.inner
    }

    fn capacity_frames(&self) -> usize {
        let samples = match &self.scratch {
            Scratch::I16(v) => v.len(),
            Scratch::F32(v) => v.len(),
        };
        samples / self.channels
    }
}

impl BufferProvider for ReformatProvider {
    fn get_next_buffer(&mut self, max_frames: usize) -> Option<Buffer<'_>> {
        let want = max_frames.min(self.capacity_frames());
        let src_frame = self.src_format.bytes_per_frame(self.channels);
        let Self {
            inner,
            src_format,
            channels,
            scratch,
        } = self;

        let frames = {
            let buf = inner.get_next_buffer(want)?;
            let frames = buf.frames(src_frame);
            let src = &buf.data[..frames * src_frame];
            match scratch {
                Scratch::I16(dst) => {
                    i16_from_pcm_bytes(&mut dst[..frames * *channels], src, *src_format)
                }
                Scratch::F32(dst) => {
                    f32_from_pcm_bytes(&mut dst[..frames * *channels], src, *src_format)
                }
            };
            frames
        };
        if frames == 0 {
            inner.release_buffer(0);
            return None;
        }
        Some(Buffer {
            data: match scratch {
                Scratch::I16(v) => bytemuck::cast_slice(&v[..frames * *channels]),
                Scratch::F32(v) => bytemuck::cast_slice(&v[..frames * *channels]),
            },
        })
    }

    fn release_buffer(&mut self, frames: usize) {
        self.inner.release_buffer(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sm_core::SliceProvider;

    #[test]
    fn test_i16_to_f32() {
        let inner = SliceProvider::from_i16(&[0x4000, -0x4000, 0, 0x2000], 2);
        let mut p = ReformatProvider::new(
            Box::new(inner),
            PcmFormat::I16,
            PcmFormat::F32,
            2,
            64,
        );
        let buf = p.get_next_buffer(8).unwrap();
        let samples: &[f32] = bytemuck::cast_slice(buf.data);
        assert_eq!(samples, &[0.5, -0.5, 0.0, 0.25]);
        p.release_buffer(2);
        assert!(p.get_next_buffer(8).is_none());
    }

    #[test]
    fn test_u8_to_i16_partial_release() {
        let inner = SliceProvider::from_bytes(vec![0x80, 0xC0, 0x40, 0x80], 1);
        let mut p = ReformatProvider::new(
            Box::new(inner),
            PcmFormat::U8,
            PcmFormat::I16,
            1,
            64,
        );
        {
            let buf = p.get_next_buffer(4).unwrap();
            let samples: &[i16] = bytemuck::cast_slice(buf.data);
            assert_eq!(samples, &[0, 0x4000, -0x4000, 0]);
        }
        p.release_buffer(1);
        // unreleased frames come back, reconverted
        let buf = p.get_next_buffer(4).unwrap();
        let samples: &[i16] = bytemuck::cast_slice(buf.data);
        assert_eq!(samples, &[0x4000, -0x4000, 0]);
    }

    #[test]
    fn test_pull_capped_by_scratch() {
        let inner = SliceProvider::from_i16(&vec![0i16; 256], 1);
        let mut p = ReformatProvider::new(
            Box::new(inner),
            PcmFormat::I16,
            PcmFormat::F32,
            1,
            16,
        );
        let buf = p.get_next_buffer(1000).unwrap();
        assert_eq!(buf.frames(4), 16);
    }
}
