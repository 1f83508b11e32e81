//! Block Transfer Framing (C7): a framed multiplex over a long-lived byte
//! channel (spec.md §4.7). Pure, transport-agnostic codec — the gRPC
//! bidirectional stream that actually carries these bytes lives in
//! `vortex-worker`.

use crate::error::StorageError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use tokio::sync::mpsc;

pub const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    PullIntermediate,
    PullLast,
    PushIntermediate,
    PushLast,
}

impl FrameType {
    fn tag(self) -> u16 {
        match self {
            FrameType::PullIntermediate => 1,
            FrameType::PullLast => 2,
            FrameType::PushIntermediate => 3,
            FrameType::PushLast => 4,
        }
    }

    fn from_tag(tag: u16) -> Result<Self, StorageError> {
        match tag {
            1 => Ok(FrameType::PullIntermediate),
            2 => Ok(FrameType::PullLast),
            3 => Ok(FrameType::PushIntermediate),
            4 => Ok(FrameType::PushLast),
            other => Err(StorageError::DataCorruption {
                context: "frame header".into(),
                details: format!("unknown frame type tag {other}"),
            }),
        }
    }

    pub fn is_last(self) -> bool {
        matches!(self, FrameType::PullLast | FrameType::PushLast)
    }
}

/// The 6-byte big-endian frame header: 2-byte type tag, 2-byte transfer id,
/// 4-byte body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub transfer_id: u16,
    pub body_len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, transfer_id: u16, body: Bytes) -> Self {
        Self {
            header: FrameHeader {
                frame_type,
                transfer_id,
                body_len: body.len() as u32,
            },
            body,
        }
    }
}

/// Packs one frame's header and body. Bodies may be empty (heartbeat or
/// terminator).
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + frame.body.len());
    buf.put_u16(frame.header.frame_type.tag());
    buf.put_u16(frame.header.transfer_id);
    buf.put_u32(frame.header.body_len);
    buf.put_slice(&frame.body);
    buf.freeze()
}

/// Decodes exactly one frame from the front of `input`, returning the frame
/// and the number of bytes consumed. Returns `None` if `input` does not yet
/// contain a full frame (caller should buffer more bytes and retry).
pub fn decode_frame(input: &[u8]) -> Result<Option<(Frame, usize)>, StorageError> {
    if input.len() < HEADER_LEN {
        return Ok(None);
    }
    let mut header_bytes = &input[..HEADER_LEN];
    let tag = header_bytes.get_u16();
    let transfer_id = header_bytes.get_u16();
    let body_len = header_bytes.get_u32() as usize;

    if input.len() < HEADER_LEN + body_len {
        return Ok(None);
    }

    let frame_type = FrameType::from_tag(tag)?;
    let body = Bytes::copy_from_slice(&input[HEADER_LEN..HEADER_LEN + body_len]);
    let frame = Frame {
        header: FrameHeader {
            frame_type,
            transfer_id,
            body_len: body_len as u32,
        },
        body,
    };
    Ok(Some((frame, HEADER_LEN + body_len)))
}

/// Demultiplexes an incoming sequence of frames into per-`transfer_id` byte
/// streams, releasing a transfer id as soon as its `*_LAST` frame is
/// observed (spec.md §4.7: "transfer ids are unique per direction per
/// channel and are released when LAST is observed").
#[derive(Default)]
pub struct TransferMultiplexer {
    active: HashMap<u16, mpsc::Sender<Bytes>>,
}

impl TransferMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new transfer id, returning the receiving half the caller
    /// reads the transfer's body chunks from.
    pub fn begin_transfer(&mut self, transfer_id: u16, buffer: usize) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(buffer);
        self.active.insert(transfer_id, tx);
        rx
    }

    /// Feeds one received frame to its transfer's channel. Frames for a
    /// transfer id with no registered receiver are dropped (the receiver
    /// disconnected or the transfer id was never begun locally).
    pub async fn accept(&mut self, frame: Frame) {
        let transfer_id = frame.header.transfer_id;
        let is_last = frame.header.frame_type.is_last();

        if let Some(sender) = self.active.get(&transfer_id) {
            // A disconnected receiver just means nobody is reading anymore;
            // drop the frame rather than treat it as a protocol error.
            let _ = sender.send(frame.body).await;
        }
        if is_last {
            self.active.remove(&transfer_id);
        }
    }

    pub fn is_active(&self, transfer_id: u16) -> bool {
        self.active.contains_key(&transfer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields_and_body() {
        let frame = Frame::new(FrameType::PushIntermediate, 42, Bytes::from_static(b"hello"));
        let encoded = encode_frame(&frame);
        let (decoded, consumed) = decode_frame(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn round_trips_an_empty_body() {
        let frame = Frame::new(FrameType::PullLast, 7, Bytes::new());
        let encoded = encode_frame(&frame);
        assert_eq!(encoded.len(), HEADER_LEN);
        let (decoded, consumed) = decode_frame(&encoded).unwrap().unwrap();
        assert_eq!(consumed, HEADER_LEN);
        assert_eq!(decoded.body.len(), 0);
    }

    #[test]
    fn decode_reports_incomplete_input_rather_than_erroring() {
        let frame = Frame::new(FrameType::PushIntermediate, 1, Bytes::from_static(b"abcdef"));
        let encoded = encode_frame(&frame);
        assert!(decode_frame(&encoded[..HEADER_LEN + 2]).unwrap().is_none());
        assert!(decode_frame(&encoded[..3]).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_an_unknown_type_tag() {
        let mut bytes = BytesMut::new();
        bytes.put_u16(99);
        bytes.put_u16(0);
        bytes.put_u32(0);
        assert!(decode_frame(&bytes).is_err());
    }

    #[test]
    fn intermediate_frame_body_total_equals_sender_input() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let chunks: Vec<&[u8]> = payload.chunks(5).collect();
        let mut total = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            let is_last = i == chunks.len() - 1;
            let frame_type = if is_last {
                FrameType::PushLast
            } else {
                FrameType::PushIntermediate
            };
            let frame = Frame::new(frame_type, 1, Bytes::copy_from_slice(chunk));
            let encoded = encode_frame(&frame);
            let (decoded, _) = decode_frame(&encoded).unwrap().unwrap();
            total += decoded.body.len();
        }
        assert_eq!(total, payload.len());
    }

    #[tokio::test]
    async fn multiplexer_routes_frames_by_transfer_id_and_releases_on_last() {
        let mut mux = TransferMultiplexer::new();
        let mut rx = mux.begin_transfer(5, 8);
        assert!(mux.is_active(5));

        mux.accept(Frame::new(FrameType::PushIntermediate, 5, Bytes::from_static(b"a")))
            .await;
        mux.accept(Frame::new(FrameType::PushLast, 5, Bytes::from_static(b"b")))
            .await;
        assert!(!mux.is_active(5));

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn multiplexer_drops_frames_for_unknown_transfer_ids() {
        let mut mux = TransferMultiplexer::new();
        // No panic, no registered receiver.
        mux.accept(Frame::new(FrameType::PushIntermediate, 1, Bytes::from_static(b"x")))
            .await;
        assert!(!mux.is_active(1));
    }
}
