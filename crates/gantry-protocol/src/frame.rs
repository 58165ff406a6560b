// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for QUIC stream framing.
//!
//! Each QUIC stream carries one RPC call with the following frame format:
//! - 4 bytes: metadata length (big-endian)
//! - 2 bytes: message type
//! - N bytes: JSON metadata
//! - 4 bytes: payload length (big-endian)
//! - M bytes: payload (config bytes, possibly compressed)
//!
//! Metadata and payload travel in separate sections so the payload bytes
//! are never JSON-escaped or re-encoded; checksums computed over them
//! server-side stay valid on the client.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum total frame size (64 MB).
/// Large enough for whole-application config payloads.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Frame header size (4 bytes metadata length + 2 bytes type)
pub const HEADER_SIZE: usize = 6;

/// Size of the payload length word that follows the metadata section.
pub const PAYLOAD_LEN_SIZE: usize = 4;

/// Message types for the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// getConfig request
    GetConfig = 1,
    /// getConfig response
    Response = 2,
    /// Error response
    Error = 3,
    /// Liveness probe; echoed back unchanged
    Ping = 4,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::GetConfig),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Error),
            4 => Ok(MessageType::Ping),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// A framed message with type, JSON metadata, and binary payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub metadata: Bytes,
    pub payload: Bytes,
}

impl Frame {
    /// Create a getConfig request frame (no payload section content)
    pub fn get_config<M: Serialize>(meta: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::GetConfig, meta, Bytes::new())
    }

    /// Create a response frame carrying a config payload
    pub fn response<M: Serialize>(meta: &M, payload: Bytes) -> Result<Self, FrameError> {
        Self::new(MessageType::Response, meta, payload)
    }

    /// Create an error frame
    pub fn error<M: Serialize>(meta: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Error, meta, Bytes::new())
    }

    /// Create a ping frame
    pub fn ping() -> Self {
        Self {
            message_type: MessageType::Ping,
            metadata: Bytes::new(),
            payload: Bytes::new(),
        }
    }

    /// Create a new frame with the given type, metadata, and payload
    pub fn new<M: Serialize>(
        message_type: MessageType,
        meta: &M,
        payload: Bytes,
    ) -> Result<Self, FrameError> {
        let metadata = Bytes::from(serde_json::to_vec(meta)?);
        let total = HEADER_SIZE + metadata.len() + PAYLOAD_LEN_SIZE + payload.len();
        if total > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(total));
        }
        Ok(Self {
            message_type,
            metadata,
            payload,
        })
    }

    /// Decode the metadata section as JSON
    pub fn decode_metadata<M: DeserializeOwned>(&self) -> Result<M, FrameError> {
        Ok(serde_json::from_slice(&self.metadata)?)
    }

    /// Encode the frame to bytes for wire transmission
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            HEADER_SIZE + self.metadata.len() + PAYLOAD_LEN_SIZE + self.payload.len(),
        );
        buf.put_u32(self.metadata.len() as u32);
        buf.put_u16(self.message_type as u16);
        buf.put(self.metadata.clone());
        buf.put_u32(self.payload.len() as u32);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from bytes
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }

        let metadata_len = bytes.get_u32() as usize;
        let message_type = MessageType::try_from(bytes.get_u16())?;

        if metadata_len > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(metadata_len));
        }
        if bytes.len() < metadata_len + PAYLOAD_LEN_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame metadata",
            )));
        }
        let metadata = bytes.split_to(metadata_len);

        let payload_len = bytes.get_u32() as usize;
        if metadata_len + payload_len > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(metadata_len + payload_len));
        }
        if bytes.len() < payload_len {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame payload",
            )));
        }
        let payload = bytes.split_to(payload_len);

        Ok(Self {
            message_type,
            metadata,
            payload,
        })
    }
}

/// Write a frame to an async writer
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let encoded = frame.encode();
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Read a frame from an async reader
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    // Read header
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let metadata_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let message_type = MessageType::try_from(u16::from_be_bytes([header[4], header[5]]))?;

    if metadata_len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(metadata_len));
    }

    // Read metadata section
    let mut metadata = vec![0u8; metadata_len];
    reader.read_exact(&mut metadata).await?;

    // Read payload section
    let mut payload_len_buf = [0u8; PAYLOAD_LEN_SIZE];
    reader.read_exact(&mut payload_len_buf).await?;
    let payload_len = u32::from_be_bytes(payload_len_buf) as usize;
    if metadata_len + payload_len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(metadata_len + payload_len));
    }
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    Ok(Frame {
        message_type,
        metadata: Bytes::from(metadata),
        payload: Bytes::from(payload),
    })
}

/// Framed codec for encoding/decoding frames on a stream
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next frame from the stream
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.stream).await
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write a frame to the stream
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.stream, frame).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Send a frame and wait for the peer's answer frame
    pub async fn call(&mut self, frame: &Frame) -> Result<Frame, FrameError> {
        self.write_frame(frame).await?;
        self.read_frame().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ConfigKey, ConfigRequest, ConfigRequestBuilder};

    fn test_request() -> ConfigRequest {
        ConfigRequestBuilder::new(
            &ConfigKey::new("query-limits", "platform.search", "search/qrs0"),
            "node1.example.com",
        )
        .build()
    }

    #[test]
    fn test_message_type_round_trip() {
        for &mt in &[
            MessageType::GetConfig,
            MessageType::Response,
            MessageType::Error,
            MessageType::Ping,
        ] {
            let value = mt as u16;
            let decoded = MessageType::try_from(value).unwrap();
            assert_eq!(mt, decoded);
        }
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::GetConfig as u16, 1);
        assert_eq!(MessageType::Response as u16, 2);
        assert_eq!(MessageType::Error as u16, 3);
        assert_eq!(MessageType::Ping as u16, 4);
    }

    #[test]
    fn test_message_type_invalid_conversion() {
        assert!(MessageType::try_from(0u16).is_err());
        assert!(MessageType::try_from(5u16).is_err());
        assert!(MessageType::try_from(u16::MAX).is_err());
    }

    #[test]
    fn test_constants() {
        assert_eq!(MAX_FRAME_SIZE, 64 * 1024 * 1024);
        assert_eq!(HEADER_SIZE, 6);
        assert_eq!(PAYLOAD_LEN_SIZE, 4);
    }

    #[test]
    fn test_frame_encode_structure() {
        let payload = Bytes::from_static(b"config payload");
        let frame = Frame::response(&test_request(), payload.clone()).unwrap();
        let encoded = frame.encode();

        // First 4 bytes: metadata length (big-endian)
        let metadata_len =
            u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(metadata_len, frame.metadata.len());

        // Bytes 4-5: message type
        let msg_type = u16::from_be_bytes([encoded[4], encoded[5]]);
        assert_eq!(msg_type, MessageType::Response as u16);

        // After the metadata: 4 bytes payload length, then the payload
        let at = HEADER_SIZE + metadata_len;
        let payload_len = u32::from_be_bytes([
            encoded[at],
            encoded[at + 1],
            encoded[at + 2],
            encoded[at + 3],
        ]) as usize;
        assert_eq!(payload_len, payload.len());
        assert_eq!(&encoded[at + PAYLOAD_LEN_SIZE..], payload.as_ref());
        assert_eq!(
            encoded.len(),
            HEADER_SIZE + metadata_len + PAYLOAD_LEN_SIZE + payload_len
        );
    }

    #[test]
    fn test_frame_encode_decode() {
        let payload = Bytes::from_static(b"raw payload bytes \x00\x01\x02");
        let frame = Frame::response(&test_request(), payload).unwrap();
        let encoded = frame.encode();
        let decoded = Frame::decode_from_bytes(encoded).unwrap();

        assert_eq!(frame.message_type, decoded.message_type);
        assert_eq!(frame.metadata, decoded.metadata);
        assert_eq!(frame.payload, decoded.payload);

        let request: ConfigRequest = decoded.decode_metadata().unwrap();
        assert_eq!(request, test_request());
    }

    #[test]
    fn test_get_config_frame_has_empty_payload() {
        let frame = Frame::get_config(&test_request()).unwrap();
        assert_eq!(frame.message_type, MessageType::GetConfig);
        assert!(frame.payload.is_empty());
        assert!(!frame.metadata.is_empty());
    }

    #[test]
    fn test_ping_frame() {
        let frame = Frame::ping();
        assert_eq!(frame.message_type, MessageType::Ping);
        let decoded = Frame::decode_from_bytes(frame.encode()).unwrap();
        assert_eq!(decoded.message_type, MessageType::Ping);
        assert!(decoded.metadata.is_empty());
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_frame_too_large_on_create() {
        let payload = Bytes::from(vec![0u8; MAX_FRAME_SIZE]);
        let result = Frame::response(&test_request(), payload);
        assert!(matches!(result, Err(FrameError::FrameTooLarge(_))));
    }

    #[test]
    fn test_decode_from_bytes_incomplete_header() {
        let bytes = Bytes::from_static(&[0, 0, 0]);
        let result = Frame::decode_from_bytes(bytes);
        match result.unwrap_err() {
            FrameError::Io(e) => assert!(e.to_string().contains("incomplete frame header")),
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_from_bytes_incomplete_metadata() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(100); // metadata length = 100
        bytes.put_u16(1); // type = GetConfig
        bytes.put(&[0u8; 10][..]); // only 10 bytes follow

        let result = Frame::decode_from_bytes(bytes.freeze());
        match result.unwrap_err() {
            FrameError::Io(e) => assert!(e.to_string().contains("incomplete frame metadata")),
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_from_bytes_incomplete_payload() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(2); // metadata length
        bytes.put_u16(2); // type = Response
        bytes.put(&b"{}"[..]);
        bytes.put_u32(50); // payload length = 50, but nothing follows

        let result = Frame::decode_from_bytes(bytes.freeze());
        match result.unwrap_err() {
            FrameError::Io(e) => assert!(e.to_string().contains("incomplete frame payload")),
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_from_bytes_invalid_message_type() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(0);
        bytes.put_u16(99);

        let result = Frame::decode_from_bytes(bytes.freeze());
        assert!(matches!(
            result.unwrap_err(),
            FrameError::InvalidMessageType(99)
        ));
    }

    #[test]
    fn test_decode_from_bytes_metadata_too_large() {
        let mut bytes = BytesMut::new();
        bytes.put_u32((MAX_FRAME_SIZE + 1) as u32);
        bytes.put_u16(1);

        let result = Frame::decode_from_bytes(bytes.freeze());
        match result.unwrap_err() {
            FrameError::FrameTooLarge(size) => assert_eq!(size, MAX_FRAME_SIZE + 1),
            other => panic!("expected FrameTooLarge, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_metadata_rejects_garbage() {
        let frame = Frame {
            message_type: MessageType::GetConfig,
            metadata: Bytes::from_static(b"not json"),
            payload: Bytes::new(),
        };
        let result: Result<ConfigRequest, _> = frame.decode_metadata();
        assert!(matches!(result, Err(FrameError::Json(_))));
    }

    #[tokio::test]
    async fn test_read_write_frame() {
        use tokio::io::duplex;

        let frame = Frame::response(&test_request(), Bytes::from_static(b"payload")).unwrap();
        let (mut writer, mut reader) = duplex(4096);

        write_frame(&mut writer, &frame).await.unwrap();

        let read = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.message_type, read.message_type);
        assert_eq!(frame.metadata, read.metadata);
        assert_eq!(frame.payload, read.payload);
    }

    #[tokio::test]
    async fn test_read_frame_connection_closed() {
        use tokio::io::duplex;

        let (_, mut reader) = duplex(1024);
        // Writer is dropped, reader will get EOF

        let result = read_frame(&mut reader).await;
        match result.unwrap_err() {
            FrameError::ConnectionClosed => {}
            e => panic!("expected ConnectionClosed, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_write_read_multiple_frames() {
        use tokio::io::duplex;

        let (mut writer, mut reader) = duplex(8192);

        let frame1 = Frame::get_config(&test_request()).unwrap();
        let frame2 = Frame::response(&test_request(), Bytes::from_static(b"payload")).unwrap();

        write_frame(&mut writer, &frame1).await.unwrap();
        write_frame(&mut writer, &frame2).await.unwrap();
        drop(writer);

        let read1 = read_frame(&mut reader).await.unwrap();
        let read2 = read_frame(&mut reader).await.unwrap();

        assert_eq!(read1.message_type, MessageType::GetConfig);
        assert_eq!(read2.message_type, MessageType::Response);
        assert_eq!(read2.payload, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_framed_stream_call() {
        use tokio::io::duplex;

        let (client_io, server_io) = duplex(8192);
        let mut client = FramedStream::new(client_io);
        let mut server = FramedStream::new(server_io);

        let server_task = tokio::spawn(async move {
            let request = server.read_frame().await.unwrap();
            assert_eq!(request.message_type, MessageType::GetConfig);
            let meta: ConfigRequest = request.decode_metadata().unwrap();
            assert_eq!(meta.def_name, "query-limits");
            let reply = Frame::response(&meta, Bytes::from_static(b"answer")).unwrap();
            server.write_frame(&reply).await.unwrap();
        });

        let frame = Frame::get_config(&test_request()).unwrap();
        let reply = client.call(&frame).await.unwrap();
        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(reply.payload, Bytes::from_static(b"answer"));

        server_task.await.unwrap();
    }

    #[test]
    fn test_framed_stream_into_inner() {
        let data = "stream state".to_string();
        let framed = FramedStream::new(data.clone());
        assert_eq!(framed.into_inner(), data);
    }
}
