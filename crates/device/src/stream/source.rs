//! Frame sources feeding the transfer pump

use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use tracing::info;

/// JPEG start-of-image marker
const JPEG_SOI: u16 = 0xFFD8;
/// JPEG end-of-image marker
const JPEG_EOI: u16 = 0xFFD9;

/// Supplies encoded frames to the pump
///
/// Returned frames are cheap to clone; callers must not assume a frame
/// stays meaningful after the next call.
pub trait FrameSource {
    fn next_frame(&mut self) -> Bytes;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Bytes {
        (**self).next_frame()
    }
}

/// Streams the same encoded image over and over
#[derive(Debug, Clone)]
pub struct StaticFrameSource {
    frame: Bytes,
}

impl StaticFrameSource {
    pub fn new(frame: impl Into<Bytes>) -> Self {
        Self {
            frame: frame.into(),
        }
    }

    /// Load the image from disk
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        info!("Loaded {} byte frame from {}", data.len(), path.display());
        Ok(Self::new(data))
    }

    pub fn frame_len(&self) -> usize {
        self.frame.len()
    }
}

impl FrameSource for StaticFrameSource {
    fn next_frame(&mut self) -> Bytes {
        self.frame.clone()
    }
}

/// Generates marker-delimited frames of a fixed size
///
/// Each frame is `SOI | counter (u64 LE) | filler | EOI`, which lets a
/// receiver check ordering without decoding anything.
#[derive(Debug, Clone)]
pub struct SyntheticFrameSource {
    frame_size: usize,
    counter: u64,
    buffer: BytesMut,
}

impl SyntheticFrameSource {
    /// Smallest frame that holds both markers and the counter
    pub const MIN_FRAME_SIZE: usize = 12;

    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(Self::MIN_FRAME_SIZE);
        Self {
            frame_size,
            counter: 0,
            buffer: BytesMut::with_capacity(frame_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Frames produced so far
    pub fn frames_generated(&self) -> u64 {
        self.counter
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self) -> Bytes {
        let filler = self.frame_size - Self::MIN_FRAME_SIZE;
        self.buffer.reserve(self.frame_size);
        self.buffer.put_u16(JPEG_SOI);
        self.buffer.put_u64_le(self.counter);
        self.buffer.put_bytes((self.counter & 0x7f) as u8, filler);
        self.buffer.put_u16(JPEG_EOI);
        self.counter += 1;
        self.buffer.split().freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_repeats() {
        let mut source = StaticFrameSource::new(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        let a = source.next_frame();
        let b = source.next_frame();
        assert_eq!(a, b);
        assert_eq!(source.frame_len(), 5);
    }

    #[test]
    fn test_static_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]).unwrap();

        let mut source = StaticFrameSource::from_file(&path).unwrap();
        assert_eq!(source.next_frame().len(), 7);
        assert!(StaticFrameSource::from_file(&dir.path().join("missing.jpg")).is_err());
    }

    #[test]
    fn test_synthetic_frames() {
        let mut source = SyntheticFrameSource::new(64);
        let first = source.next_frame();
        let second = source.next_frame();

        assert_eq!(first.len(), 64);
        assert_eq!(&first[..2], &[0xFF, 0xD8]);
        assert_eq!(&first[62..], &[0xFF, 0xD9]);
        assert_eq!(&first[2..10], &0u64.to_le_bytes());
        assert_eq!(&second[2..10], &1u64.to_le_bytes());
        assert_eq!(source.frames_generated(), 2);
    }

    #[test]
    fn test_synthetic_minimum_size() {
        let mut source = SyntheticFrameSource::new(1);
        assert_eq!(source.frame_size(), SyntheticFrameSource::MIN_FRAME_SIZE);
        assert_eq!(source.next_frame().len(), SyntheticFrameSource::MIN_FRAME_SIZE);
    }
}
