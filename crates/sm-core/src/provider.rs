//! Pull-based buffer contract
//!
//! The mixer never pushes: each track, and each resampler on a track's
//! behalf, pulls PCM through this interface. A provider may legitimately
//! have no data (a concurrent flush upstream); it signals that by returning
//! `None` instead of blocking, and the track contributes silence for the
//! rest of the block.

/// One contiguous run of whole input frames, raw bytes in the track's
/// input encoding.
pub struct Buffer<'a> {
    pub data: &'a [u8],
}

impl<'a> Buffer<'a> {
    #[inline]
    pub fn frames(&self, frame_size: usize) -> usize {
        self.data.len() / frame_size
    }
}

/// Pull source for track input.
///
/// `get_next_buffer` returns up to `max_frames` whole frames, or `None` when
/// no data is available right now. `release_buffer` consumes the frames the
/// caller actually used; unreleased frames must be offered again by the next
/// `get_next_buffer`. Several get/release pairs per cycle are normal.
pub trait BufferProvider {
    fn get_next_buffer(&mut self, max_frames: usize) -> Option<Buffer<'_>>;
    fn release_buffer(&mut self, frames: usize);
}

/// A provider serving frames from an in-memory region.
///
/// Backing storage is word-aligned so that 16-bit and float frames handed
/// out are safe to view as typed slices. More data may be appended between
/// cycles, which makes this useful both for tests and for simple
/// precomputed sources.
pub struct SliceProvider {
    words: Vec<i32>,
    len: usize, // bytes in use
    frame_size: usize,
    pos: usize, // frames consumed
}

impl SliceProvider {
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "zero frame size");
        Self {
            words: Vec::new(),
            len: 0,
            frame_size,
            pos: 0,
        }
    }

    pub fn from_i16(samples: &[i16], channels: usize) -> Self {
        let mut p = Self::new(2 * channels);
        p.push_i16(samples);
        p
    }

    pub fn from_f32(samples: &[f32], channels: usize) -> Self {
        let mut p = Self::new(4 * channels);
        p.push_f32(samples);
        p
    }

    pub fn from_bytes(bytes: Vec<u8>, frame_size: usize) -> Self {
        let mut p = Self::new(frame_size);
        p.push_bytes(&bytes);
        p
    }

    pub fn push_i16(&mut self, samples: &[i16]) {
        self.push_bytes(bytemuck::cast_slice(samples));
    }

    pub fn push_f32(&mut self, samples: &[f32]) {
        self.push_bytes(bytemuck::cast_slice(samples));
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let needed = self.len + bytes.len();
        self.words.resize((needed + 3) / 4, 0);
        let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        dst[self.len..needed].copy_from_slice(bytes);
        self.len = needed;
    }

    pub fn remaining_frames(&self) -> usize {
        self.len / self.frame_size - self.pos
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }
}

impl BufferProvider for SliceProvider {
    fn get_next_buffer(&mut self, max_frames: usize) -> Option<Buffer<'_>> {
        let avail = self.remaining_frames();
        if avail == 0 || max_frames == 0 {
            return None;
        }
        let n = avail.min(max_frames);
        let start = self.pos * self.frame_size;
        Some(Buffer {
            data: &self.bytes()[start..start + n * self.frame_size],
        })
    }

    fn release_buffer(&mut self, frames: usize) {
        self.pos = (self.pos + frames).min(self.len / self.frame_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_get_release() {
        let samples: Vec<i16> = (0..32).collect();
        let mut p = SliceProvider::from_i16(&samples, 2); // 16 stereo frames

        let buf = p.get_next_buffer(4).unwrap();
        assert_eq!(buf.frames(4), 4);
        p.release_buffer(2);

        // unreleased frames are offered again
        let buf = p.get_next_buffer(100).unwrap();
        let head: &[i16] = bytemuck::cast_slice(buf.data);
        assert_eq!(head[0], 4);
        assert_eq!(buf.frames(4), 14);
        p.release_buffer(14);

        assert!(p.get_next_buffer(1).is_none());
    }

    #[test]
    fn test_append_resumes() {
        let mut p = SliceProvider::from_i16(&[1, 2], 1);
        p.release_buffer(2);
        assert!(p.get_next_buffer(1).is_none());

        p.push_i16(&[3, 4]);
        let buf = p.get_next_buffer(8).unwrap();
        assert_eq!(buf.frames(2), 2);
    }
}
