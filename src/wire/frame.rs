//! Length-prefixed framing for stream transports.
//!
//! A frame is a 2-byte little-endian payload length followed by the
//! payload.  The length does not count the header itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 2;

/// Largest payload a 2-byte header can describe.
pub const MAX_ENCODABLE_PAYLOAD: usize = u16::MAX as usize;

/// Prefixes a payload with its length.
pub fn encode_frame(payload: &[u8]) -> WireResult<Bytes> {
    let len = u16::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        size: payload.len(),
        max: MAX_ENCODABLE_PAYLOAD,
    })?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u16_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingHeader,
    AwaitingPayload(usize),
}

/// Incremental frame decoder for a single connection.
#[derive(Debug)]
pub struct FrameDecoder {
    max_payload: usize,
    state: DecodeState,
}

impl FrameDecoder {
    /// `max_payload` is the receive buffer capacity; longer frames are
    /// rejected instead of buffered.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            state: DecodeState::AwaitingHeader,
        }
    }

    /// True when no frame is partially consumed.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::AwaitingHeader
    }

    /// Pulls the next complete payload out of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.  Consumed bytes are
    /// removed from `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> WireResult<Option<Bytes>> {
        if let DecodeState::AwaitingHeader = self.state {
            if buf.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }
            let len = buf.get_u16_le() as usize;
            if len == 0 {
                return Err(WireError::EmptyFrame);
            }
            if len > self.max_payload {
                return Err(WireError::FrameTooLarge {
                    size: len,
                    max: self.max_payload,
                });
            }
            self.state = DecodeState::AwaitingPayload(len);
        }

        match self.state {
            DecodeState::AwaitingPayload(len) if buf.len() >= len => {
                self.state = DecodeState::AwaitingHeader;
                Ok(Some(buf.split_to(len).freeze()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..2], &[5, 0]);

        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::from(&frame[..]);
        let payload = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        assert!(buf.is_empty());
        assert!(decoder.is_idle());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let frame = encode_frame(b"abcdef").unwrap();
        let mut decoder = FrameDecoder::new(1024);
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&frame[..1]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[1..4]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(!decoder.is_idle());

        buf.extend_from_slice(&frame[4..]);
        assert_eq!(&decoder.decode(&mut buf).unwrap().unwrap()[..], b"abcdef");
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"one").unwrap());
        buf.extend_from_slice(&encode_frame(b"two").unwrap());

        let mut decoder = FrameDecoder::new(16);
        assert_eq!(&decoder.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&decoder.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let frame = encode_frame(&[7u8; 64]).unwrap();
        let mut decoder = FrameDecoder::new(32);
        let mut buf = BytesMut::from(&frame[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(WireError::FrameTooLarge { size: 64, max: 32 })
        ));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let mut decoder = FrameDecoder::new(32);
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(matches!(decoder.decode(&mut buf), Err(WireError::EmptyFrame)));
    }

    #[test]
    fn unencodable_payload() {
        let big = vec![0u8; MAX_ENCODABLE_PAYLOAD + 1];
        assert!(encode_frame(&big).is_err());
    }
}
