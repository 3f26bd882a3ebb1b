//! Video payload fragmentation
//!
//! An encoded frame travels to the host as a sequence of isochronous payload
//! transfers, each prefixed by a UVC payload header. Fragments are laid out
//! back to back in a single packet buffer: fragment `i` starts at
//! `i * max_fragment_size`, every fragment except the last is exactly
//! `max_fragment_size` bytes, and the last carries the remainder.

use crate::error::{ProtocolError, Result};
use std::ops::Range;

/// Size of the payload header written by [`UvcPayloadPacketizer`]
pub const PAYLOAD_HEADER_SIZE: usize = 2;

/// bmHeaderInfo: frame id, toggled at every frame boundary
pub const HEADER_FID: u8 = 0x01;
/// bmHeaderInfo: end of frame, set on the last payload of a frame
pub const HEADER_EOF: u8 = 0x02;
/// bmHeaderInfo: end of header
pub const HEADER_EOH: u8 = 0x80;

/// Number of fragments needed for `total_len` bytes
///
/// `max_fragment_size` must be non-zero.
pub fn fragment_count(total_len: usize, max_fragment_size: usize) -> usize {
    total_len.div_ceil(max_fragment_size)
}

/// Worst-case packet buffer size for a frame of `max_frame_size` bytes
///
/// Accounts for one payload header per fragment.
pub fn packet_buffer_capacity(max_frame_size: usize, max_payload_size: usize) -> Result<usize> {
    let per_fragment = payload_data_size(max_payload_size)?;
    let fragments = fragment_count(max_frame_size, per_fragment).max(1);
    Ok(fragments * max_payload_size)
}

fn payload_data_size(max_payload_size: usize) -> Result<usize> {
    if max_payload_size <= PAYLOAD_HEADER_SIZE {
        return Err(ProtocolError::InvalidPayloadSize {
            size: max_payload_size,
            header: PAYLOAD_HEADER_SIZE,
        });
    }
    Ok(max_payload_size - PAYLOAD_HEADER_SIZE)
}

/// Partitioning of a packetized frame inside the packet buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    total_len: usize,
    max_fragment_size: usize,
    fragment_count: usize,
}

impl PacketLayout {
    /// Describe `total_len` bytes split into `max_fragment_size` pieces
    pub fn new(total_len: usize, max_fragment_size: usize) -> Result<Self> {
        if max_fragment_size == 0 {
            return Err(ProtocolError::InvalidPayloadSize {
                size: 0,
                header: PAYLOAD_HEADER_SIZE,
            });
        }
        Ok(Self {
            total_len,
            max_fragment_size,
            fragment_count: fragment_count(total_len, max_fragment_size),
        })
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    pub fn max_fragment_size(&self) -> usize {
        self.max_fragment_size
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    pub fn is_empty(&self) -> bool {
        self.fragment_count == 0
    }

    /// Byte range of fragment `index` within the packet buffer
    pub fn fragment(&self, index: usize) -> Option<Range<usize>> {
        if index >= self.fragment_count {
            return None;
        }
        let start = index * self.max_fragment_size;
        let end = if index + 1 == self.fragment_count {
            self.total_len
        } else {
            start + self.max_fragment_size
        };
        Some(start..end)
    }

    /// Byte ranges of all fragments, in submission order
    pub fn fragments(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.fragment_count).filter_map(move |i| self.fragment(i))
    }
}

/// Splits an encoded frame into header-prefixed payload fragments
pub trait Packetizer {
    /// Largest fragment this packetizer produces
    fn max_payload_size(&self) -> usize;

    /// Packetize `frame` into `out`, returning the layout of what was written
    ///
    /// Fails instead of writing past `out` when the buffer is too small.
    fn fill(&mut self, frame: &[u8], out: &mut [u8]) -> Result<PacketLayout>;
}

/// Packetizer emitting the 2-byte UVC payload header used for MJPEG streams
///
/// Every fragment carries `[bHeaderLength, bmHeaderInfo]` followed by up to
/// `max_payload_size - 2` bytes of frame data. FID alternates per frame and
/// EOF marks the last fragment. An empty frame produces a single header-only
/// fragment so the host still observes the frame boundary.
#[derive(Debug, Clone)]
pub struct UvcPayloadPacketizer {
    max_payload_size: usize,
    frame_id: bool,
}

impl UvcPayloadPacketizer {
    pub fn new(max_payload_size: usize) -> Result<Self> {
        payload_data_size(max_payload_size)?;
        Ok(Self {
            max_payload_size,
            frame_id: false,
        })
    }

    /// FID value the next frame will carry
    pub fn frame_id(&self) -> bool {
        self.frame_id
    }

    /// Bytes needed to packetize a frame of `frame_len` bytes
    pub fn packetized_len(&self, frame_len: usize) -> usize {
        let per_fragment = self.max_payload_size - PAYLOAD_HEADER_SIZE;
        let fragments = fragment_count(frame_len, per_fragment).max(1);
        frame_len + fragments * PAYLOAD_HEADER_SIZE
    }
}

impl Packetizer for UvcPayloadPacketizer {
    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn fill(&mut self, frame: &[u8], out: &mut [u8]) -> Result<PacketLayout> {
        let per_fragment = self.max_payload_size - PAYLOAD_HEADER_SIZE;
        let needed = self.packetized_len(frame.len());
        if needed > out.len() {
            return Err(ProtocolError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }

        let fid = if self.frame_id { HEADER_FID } else { 0 };
        let fragments = fragment_count(frame.len(), per_fragment).max(1);
        let mut chunks = frame.chunks(per_fragment);

        for i in 0..fragments {
            let base = i * self.max_payload_size;
            let chunk = chunks.next().unwrap_or(&[]);
            let mut info = HEADER_EOH | fid;
            if i + 1 == fragments {
                info |= HEADER_EOF;
            }
            out[base] = PAYLOAD_HEADER_SIZE as u8;
            out[base + 1] = info;
            out[base + PAYLOAD_HEADER_SIZE..base + PAYLOAD_HEADER_SIZE + chunk.len()]
                .copy_from_slice(chunk);
        }

        self.frame_id = !self.frame_id;
        PacketLayout::new(needed, self.max_payload_size)
    }
}
