//! Wire protocol codec
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! +------+---------+----------------+------------------+
//! | type | subtype | length (u16 BE)| payload (UTF-8)  |
//! +------+---------+----------------+------------------+
//!   1 B      1 B          2 B          `length` bytes
//! ```
//!
//! [`decode`] never consumes input: it reports how many bytes a complete
//! frame occupies and leaves advancing the buffer to the caller, so a
//! partially received frame is simply retried once more bytes arrive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Header size: type, subtype, and the 16-bit length
pub const HEADER_LEN: usize = 4;

/// Protocol ceiling for a payload
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// One complete protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub subtype: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame carrying `text` as its payload
    pub fn new(kind: u8, subtype: u8, text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge { len: text.len() });
        }
        Ok(Self {
            kind,
            subtype,
            payload: Bytes::copy_from_slice(text.as_bytes()),
        })
    }

    /// Build a frame with a zero-length payload
    pub fn empty(kind: u8, subtype: u8) -> Self {
        Self {
            kind,
            subtype,
            payload: Bytes::new(),
        }
    }

    /// Payload as UTF-8 text
    pub fn text(&self) -> Result<&str, ProtocolError> {
        std::str::from_utf8(&self.payload).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Header plus payload size on the wire
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append the wire representation to `dst`
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.kind);
        dst.put_u8(self.subtype);
        debug_assert!(
            self.payload.len() <= MAX_PAYLOAD,
            "payload of {} bytes does not fit a frame",
            self.payload.len()
        );
        dst.put_u16(self.payload.len() as u16);
        dst.extend_from_slice(&self.payload);
    }

    /// Wire representation as an owned buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }
}

/// Result of a decode attempt
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A full frame occupying the first `consumed` bytes of the input
    Frame { frame: Frame, consumed: usize },
    /// The input holds less than one frame
    NeedMoreData,
}

/// Encode a frame. `None` encodes as a zero-length payload.
pub fn encode(kind: u8, subtype: u8, text: Option<&str>) -> Result<Bytes, ProtocolError> {
    Ok(Frame::new(kind, subtype, text.unwrap_or_default())?.to_bytes())
}

/// Decode the frame at the start of `buf`, trusting its declared length
pub fn decode(buf: &[u8]) -> Result<Decoded, ProtocolError> {
    decode_bounded(buf, MAX_PAYLOAD)
}

/// Decode the frame at the start of `buf`, rejecting declared lengths
/// above `limit`.
///
/// The length check runs as soon as the header is available, so an
/// oversized frame is refused before its payload is buffered.
pub fn decode_bounded(buf: &[u8], limit: usize) -> Result<Decoded, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::NeedMoreData);
    }

    let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if declared > limit {
        return Err(ProtocolError::InvalidLength { declared, limit });
    }

    let total = HEADER_LEN + declared;
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    Ok(Decoded::Frame {
        frame: Frame {
            kind: buf[0],
            subtype: buf[1],
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..total]),
        },
        consumed: total,
    })
}

/// `tokio_util` adapter over [`decode`] for async peers
#[derive(Debug, Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match decode(src)? {
            Decoded::Frame { frame, consumed } => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Decoded::NeedMoreData => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        frame.write_to(dst);
        Ok(())
    }
}
