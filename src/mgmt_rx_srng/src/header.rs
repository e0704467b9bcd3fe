/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! On-wire header the firmware prepends to every management frame.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::RxBuffer;

/// Reasons a retired buffer is dropped instead of delivered.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Buffer of {0} bytes cannot hold a frame header")]
    Truncated(usize),
    #[error("Header claims an empty payload")]
    EmptyPayload,
    #[error("Header claims {claimed} payload bytes but the buffer holds {available}")]
    Overrun { claimed: usize, available: usize },
}

/// Fixed header in front of each frame, little-endian on the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct MgmtRxHeader {
    /// Payload length in bytes, header excluded.
    pub payload_len: u16,
    pub reserved: u16,
}

const _: () = assert!(core::mem::size_of::<MgmtRxHeader>() == 4);
const _: () = assert!(MgmtRxHeader::PAYLOAD_LEN_OFFSET == 0);

impl MgmtRxHeader {
    pub const SIZE: usize = core::mem::size_of::<Self>();
    pub const PAYLOAD_LEN_OFFSET: usize = core::mem::offset_of!(Self, payload_len);

    /// Header for a payload of `len` bytes, in wire byte order.
    pub fn new(len: u16) -> Self {
        Self {
            payload_len: len.to_le(),
            reserved: 0,
        }
    }

    /// Payload length in host byte order.
    #[inline]
    pub fn payload_len(&self) -> usize {
        u16::from_le(self.payload_len) as usize
    }

    /// Parse and validate the header at the front of `frame`.
    ///
    /// `frame` is the whole buffer as the device filled it; the claimed
    /// payload must fit behind the header.
    pub fn parse(frame: &[u8]) -> Result<Self, FrameError> {
        let raw = frame
            .get(..Self::SIZE)
            .ok_or(FrameError::Truncated(frame.len()))?;
        let hdr: Self = bytemuck::pod_read_unaligned(raw);

        let claimed = hdr.payload_len();
        let available = frame.len() - Self::SIZE;
        if claimed == 0 {
            return Err(FrameError::EmptyPayload);
        }
        if claimed > available {
            return Err(FrameError::Overrun { claimed, available });
        }

        Ok(hdr)
    }

    /// Header as wire bytes.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        bytemuck::cast(self)
    }
}

/// Validate the header of a retired buffer, then cut the buffer down to
/// its payload. Returns the payload length.
///
/// The buffer is left untouched on error.
pub fn strip_header<B: RxBuffer>(buf: &mut B) -> Result<usize, FrameError> {
    let len = MgmtRxHeader::parse(buf.data())?.payload_len();
    buf.pull_head(MgmtRxHeader::SIZE);
    buf.trim(len);
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal owned buffer for exercising header stripping.
    struct VecBuf {
        data: Vec<u8>,
        start: usize,
    }

    impl RxBuffer for VecBuf {
        fn bus_addr(&self) -> u64 {
            0
        }

        fn data(&self) -> &[u8] {
            &self.data[self.start..]
        }

        fn pull_head(&mut self, len: usize) {
            self.start = (self.start + len).min(self.data.len());
        }

        fn trim(&mut self, len: usize) {
            let end = (self.start + len).min(self.data.len());
            self.data.truncate(end);
        }
    }

    fn frame(claimed: u16, payload: &[u8], capacity: usize) -> Vec<u8> {
        let mut data = MgmtRxHeader::new(claimed).to_bytes().to_vec();
        data.extend_from_slice(payload);
        data.resize(capacity, 0xee);
        data
    }

    #[test]
    fn test_parse_reads_little_endian_length() {
        let err = MgmtRxHeader::parse(&[0x34, 0x01, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Overrun {
                claimed: 0x134,
                available: 2
            }
        );

        let data = frame(0x0102, &[], 0x0102 + 4);
        assert_eq!(MgmtRxHeader::parse(&data).unwrap().payload_len(), 0x0102);
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        assert_eq!(
            MgmtRxHeader::parse(&[1, 0, 0]),
            Err(FrameError::Truncated(3))
        );
        assert_eq!(MgmtRxHeader::parse(&[]), Err(FrameError::Truncated(0)));
    }

    #[test]
    fn test_parse_rejects_zero_length() {
        let data = frame(0, b"abc", 64);
        assert_eq!(MgmtRxHeader::parse(&data), Err(FrameError::EmptyPayload));
    }

    #[test]
    fn test_parse_accepts_payload_filling_the_buffer() {
        let data = frame(60, &[7; 60], 64);
        assert_eq!(MgmtRxHeader::parse(&data).unwrap().payload_len(), 60);

        let data = frame(61, &[7; 60], 64);
        assert!(matches!(
            MgmtRxHeader::parse(&data),
            Err(FrameError::Overrun {
                claimed: 61,
                available: 60
            })
        ));
    }

    #[test]
    fn test_strip_header_leaves_only_payload() {
        let mut buf = VecBuf {
            data: frame(5, b"hello", 128),
            start: 0,
        };

        assert_eq!(strip_header(&mut buf).unwrap(), 5);
        assert_eq!(buf.data(), b"hello");
    }

    #[test]
    fn test_strip_header_keeps_malformed_buffer_intact() {
        let mut buf = VecBuf {
            data: frame(200, b"hello", 128),
            start: 0,
        };

        assert!(strip_header(&mut buf).is_err());
        assert_eq!(buf.data().len(), 128);
    }
}
