//! Length-prefixed binary frames.
//!
//! ## Wire format
//!
//! Header layout, little-endian, 11 bytes:
//!
//! ```text
//! offset 0  u32  message id    -- nonzero for requests/responses, 0 for callbacks
//! offset 4  u8   frame kind    -- 0x01 request, 0x02 response, 0x03 callback
//! offset 5  u16  endpoint len  -- bytes of UTF-8 endpoint that follow
//! offset 7  u32  body len      -- bytes of body that follow
//! ```
//!
//! The parser is buffer-aware: with fewer than 11 bytes, or with an
//! incomplete payload, it yields [`Decoded::NeedMore`] and consumes
//! nothing; otherwise it consumes exactly `11 + endpoint_len + body_len`
//! bytes.

use std::borrow::Cow;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::endpoint;
use crate::{Result, WireError};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 11;

/// Maximum accepted body size (to prevent allocation attacks).
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Kind discriminator carried in the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x01,
    Response = 0x02,
    Callback = 0x03,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(FrameKind::Request),
            0x02 => Ok(FrameKind::Response),
            0x03 => Ok(FrameKind::Callback),
            other => Err(WireError::MalformedFrame(format!(
                "unknown frame kind 0x{other:02x}"
            ))),
        }
    }
}

/// A single protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id; zero exactly for callbacks.
    pub id: u32,
    pub kind: FrameKind,
    /// Endpoint verb; borrowed from the interning table when known.
    pub endpoint: Cow<'static, str>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn request(id: u32, endpoint: impl Into<Cow<'static, str>>, body: Vec<u8>) -> Self {
        Self {
            id,
            kind: FrameKind::Request,
            endpoint: endpoint.into(),
            body,
        }
    }

    pub fn response(id: u32, endpoint: impl Into<Cow<'static, str>>, body: Vec<u8>) -> Self {
        Self {
            id,
            kind: FrameKind::Response,
            endpoint: endpoint.into(),
            body,
        }
    }

    /// Callbacks are unsolicited and always carry message id 0.
    pub fn callback(endpoint: impl Into<Cow<'static, str>>, body: Vec<u8>) -> Self {
        Self {
            id: 0,
            kind: FrameKind::Callback,
            endpoint: endpoint.into(),
            body,
        }
    }

    fn validate(&self) -> Result<()> {
        match (self.kind, self.id) {
            (FrameKind::Callback, id) if id != 0 => Err(WireError::MalformedFrame(format!(
                "callback frame with nonzero id {id}"
            ))),
            (FrameKind::Request | FrameKind::Response, 0) => Err(WireError::MalformedFrame(
                "request/response frame with id 0".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Total encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.endpoint.len() + self.body.len()
    }

    /// Append the encoded frame to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        self.validate()?;
        let endpoint_len = u16::try_from(self.endpoint.len()).map_err(|_| {
            WireError::MalformedFrame(format!("endpoint too long: {} bytes", self.endpoint.len()))
        })?;
        let body_len = u32::try_from(self.body.len())
            .ok()
            .filter(|&n| n as usize <= MAX_BODY_LEN)
            .ok_or_else(|| {
                WireError::MalformedFrame(format!("body too large: {} bytes", self.body.len()))
            })?;

        out.reserve(self.encoded_len());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.push(self.kind as u8);
        out.extend_from_slice(&endpoint_len.to_le_bytes());
        out.extend_from_slice(&body_len.to_le_bytes());
        out.extend_from_slice(self.endpoint.as_bytes());
        out.extend_from_slice(&self.body);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }
}

/// Outcome of one decode attempt against a byte buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// The buffer does not yet hold a complete frame.
    NeedMore,
    /// A complete frame, and how many buffer bytes it consumed.
    Frame { frame: Frame, consumed: usize },
}

/// Try to decode one frame from the front of `buf`.
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::NeedMore);
    }

    let id = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = FrameKind::from_byte(buf[4])?;
    let endpoint_len = u16::from_le_bytes([buf[5], buf[6]]) as usize;
    let body_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;

    if body_len > MAX_BODY_LEN {
        return Err(WireError::MalformedFrame(format!(
            "declared body of {body_len} bytes exceeds maximum"
        )));
    }

    let total = HEADER_LEN + endpoint_len + body_len;
    if buf.len() < total {
        return Ok(Decoded::NeedMore);
    }

    let endpoint_bytes = &buf[HEADER_LEN..HEADER_LEN + endpoint_len];
    let endpoint = endpoint::intern(endpoint_bytes)
        .map_err(|e| WireError::MalformedFrame(format!("endpoint is not UTF-8: {e}")))?;
    let body = buf[HEADER_LEN + endpoint_len..total].to_vec();

    let frame = Frame {
        id,
        kind,
        endpoint,
        body,
    };
    frame.validate()?;

    Ok(Decoded::Frame {
        frame,
        consumed: total,
    })
}

/// Incremental frame reader over an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    /// Bytes of `buf` already consumed by returned frames.
    consumed: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(4096),
            consumed: 0,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean EOF at a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MalformedFrame`] on framing violations and
    /// [`WireError::Io`] when the stream fails or ends mid-frame.
    pub async fn next(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Decoded::Frame { frame, consumed } = decode(&self.buf[self.consumed..])? {
                self.consumed += consumed;
                // Reclaim the buffer once everything in it was consumed,
                // or compact when the dead prefix gets large.
                if self.consumed == self.buf.len() {
                    self.buf.clear();
                    self.consumed = 0;
                } else if self.consumed >= 64 * 1024 {
                    self.buf.drain(..self.consumed);
                    self.consumed = 0;
                }
                return Ok(Some(frame));
            }

            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.consumed == self.buf.len() {
                    return Ok(None);
                }
                return Err(WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended mid-frame",
                )));
            }
        }
    }
}

/// Write one frame to an async stream without flushing.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Drain a frame channel into `writer` with opportunistic batching.
///
/// Awaits one frame, greedily takes everything already queued, then
/// flushes once: immediate latency when idle, batched throughput under
/// load. Returns when the channel closes or the stream fails.
pub async fn pump_frames<W: AsyncWrite + Unpin>(
    writer: W,
    mut frames: tokio::sync::mpsc::Receiver<Frame>,
) {
    let mut writer = tokio::io::BufWriter::new(writer);
    while let Some(frame) = frames.recv().await {
        if write_frame(&mut writer, &frame).await.is_err() {
            return;
        }
        while let Ok(next) = frames.try_recv() {
            if write_frame(&mut writer, &next).await.is_err() {
                return;
            }
        }
        if writer.flush().await.is_err() {
            return;
        }
    }
    let _ = writer.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame) -> Frame {
        let bytes = frame.encode().expect("encode");
        match decode(&bytes).expect("decode") {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                frame
            }
            Decoded::NeedMore => unreachable!("complete buffer"),
        }
    }

    #[test]
    fn test_roundtrip_request() {
        let frame = Frame::request(7, endpoint::INVOKE, vec![1, 2, 3]);
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_roundtrip_callback_id_zero() {
        let frame = Frame::callback(endpoint::INVOKE_CALLBACK, vec![0xAA; 300]);
        let back = roundtrip(&frame);
        assert_eq!(back.id, 0);
        assert_eq!(back, frame);
    }

    #[test]
    fn test_empty_body_is_valid() {
        let frame = Frame::request(1, endpoint::PING, Vec::new());
        let back = roundtrip(&frame);
        assert!(back.body.is_empty());
    }

    #[test]
    fn test_need_more_on_partial_header() {
        assert_eq!(decode(&[0u8; 5]).expect("decode"), Decoded::NeedMore);
    }

    #[test]
    fn test_need_more_on_partial_payload() {
        let bytes = Frame::request(3, endpoint::HEAP, vec![9; 40])
            .encode()
            .expect("encode");
        assert_eq!(
            decode(&bytes[..bytes.len() - 1]).expect("decode"),
            Decoded::NeedMore
        );
    }

    #[test]
    fn test_consumes_exactly_one_frame() {
        let mut bytes = Frame::request(1, endpoint::PING, Vec::new())
            .encode()
            .expect("encode");
        let first_len = bytes.len();
        let mut second = Frame::request(2, endpoint::DOMAINS, vec![5])
            .encode()
            .expect("encode");
        bytes.append(&mut second);

        match decode(&bytes).expect("decode") {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(frame.id, 1);
                assert_eq!(consumed, first_len);
            }
            Decoded::NeedMore => unreachable!(),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut bytes = Frame::request(1, endpoint::PING, Vec::new())
            .encode()
            .expect("encode");
        bytes[4] = 0x7F;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_nonzero_id_callback_rejected() {
        let mut frame = Frame::callback(endpoint::INVOKE_CALLBACK, Vec::new());
        frame.id = 12;
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_zero_id_request_rejected() {
        let frame = Frame::request(0, endpoint::PING, Vec::new());
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_oversized_declared_body_rejected() {
        let mut bytes = Frame::request(1, endpoint::PING, Vec::new())
            .encode()
            .expect("encode");
        bytes[7..11].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_unknown_endpoint_accepted() {
        let frame = Frame::request(4, Cow::Owned("/mystery".to_string()), vec![1]);
        let back = roundtrip(&frame);
        assert_eq!(back.endpoint.as_ref(), "/mystery");
    }

    #[tokio::test]
    async fn test_frame_reader_across_split_writes() {
        let frame = Frame::request(11, endpoint::OBJECT, vec![7; 100]);
        let bytes = frame.encode().expect("encode");
        let (split_a, split_b) = bytes.split_at(13);

        let (client, mut server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(client);

        server.write_all(split_a).await.expect("write");
        server.flush().await.expect("flush");
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reader.next(),
        )
        .await;
        assert!(pending.is_err(), "reader must wait for the full frame");

        server.write_all(split_b).await.expect("write");
        server.flush().await.expect("flush");
        let got = reader.next().await.expect("read").expect("frame");
        assert_eq!(got, frame);
    }

    #[tokio::test]
    async fn test_pump_frames_batches_and_preserves_order() {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let (client, server) = tokio::io::duplex(4096);

        for id in 1..=5u32 {
            tx.send(Frame::request(id, endpoint::PING, vec![id as u8]))
                .await
                .expect("send");
        }
        drop(tx);
        let pump = tokio::spawn(pump_frames(server, rx));

        let mut reader = FrameReader::new(client);
        for id in 1..=5u32 {
            let frame = reader.next().await.expect("read").expect("frame");
            assert_eq!(frame.id, id);
        }
        pump.await.expect("pump");
        assert!(reader.next().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_frame_reader_clean_eof() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut reader = FrameReader::new(client);
        assert!(reader.next().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_frame_reader_eof_mid_frame() {
        let bytes = Frame::request(2, endpoint::TYPES, vec![1, 2, 3])
            .encode()
            .expect("encode");
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(&bytes[..7]).await.expect("write");
        drop(server);

        let mut reader = FrameReader::new(client);
        assert!(matches!(reader.next().await, Err(WireError::Io(_))));
    }
}
