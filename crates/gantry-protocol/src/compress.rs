// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payload compression.
//!
//! Payloads travel either uncompressed or as raw LZ4 blocks. Raw blocks do
//! not embed the uncompressed size, so [`CompressionInfo`] carries it
//! explicitly whenever LZ4 is in use. Checksums are always computed over
//! the uncompressed form, never over the wire bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Compression algorithm applied to a payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompressionType {
    /// No compression.
    #[default]
    Uncompressed,
    /// Raw LZ4 block, uncompressed size carried out of band.
    Lz4,
}

impl CompressionType {
    /// The wire name of this compression type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uncompressed => "UNCOMPRESSED",
            Self::Lz4 => "LZ4",
        }
    }

    /// Parses a wire name, rejecting unknown algorithms.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "UNCOMPRESSED" => Ok(Self::Uncompressed),
            "LZ4" => Ok(Self::Lz4),
            other => Err(ProtocolError::UnknownCompressionType(other.to_string())),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes how a payload is encoded on the wire.
///
/// `uncompressed_size` is present exactly when `compression` is LZ4; raw
/// LZ4 blocks cannot be decoded without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionInfo {
    /// Algorithm applied to the payload bytes.
    #[serde(rename = "compressionType")]
    pub compression: CompressionType,
    /// Size of the payload before compression, present for LZ4.
    #[serde(rename = "uncompressedSize", skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub uncompressed_size: Option<usize>,
}

impl CompressionInfo {
    /// Info for an uncompressed payload.
    pub fn uncompressed() -> Self {
        Self {
            compression: CompressionType::Uncompressed,
            uncompressed_size: None,
        }
    }

    /// Info for an LZ4 payload of the given original size.
    pub fn lz4(uncompressed_size: usize) -> Self {
        Self {
            compression: CompressionType::Lz4,
            uncompressed_size: Some(uncompressed_size),
        }
    }
}

impl Default for CompressionInfo {
    fn default() -> Self {
        Self::uncompressed()
    }
}

/// A config payload together with its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    data: Bytes,
    info: CompressionInfo,
}

impl Payload {
    /// Wraps canonical (uncompressed) payload bytes.
    pub fn uncompressed(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            info: CompressionInfo::uncompressed(),
        }
    }

    /// Wraps bytes received from the wire with their declared encoding.
    pub fn from_wire(data: Bytes, info: CompressionInfo) -> Self {
        Self { data, info }
    }

    /// The payload bytes in their current encoding.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// How the payload bytes are currently encoded.
    pub fn compression_info(&self) -> CompressionInfo {
        self.info
    }

    /// Number of bytes in the current encoding.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the current encoding holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Re-encodes the payload with the wanted compression type.
    ///
    /// Converting LZ4 back to uncompressed requires the recorded
    /// uncompressed size and fails without it.
    pub fn with_compression(self, wanted: CompressionType) -> Result<Payload, ProtocolError> {
        match (self.info.compression, wanted) {
            (from, to) if from == to => Ok(self),
            (CompressionType::Uncompressed, CompressionType::Lz4) => {
                let uncompressed_size = self.data.len();
                let compressed = lz4_flex::block::compress(&self.data);
                Ok(Payload {
                    data: Bytes::from(compressed),
                    info: CompressionInfo::lz4(uncompressed_size),
                })
            }
            (CompressionType::Lz4, CompressionType::Uncompressed) => {
                Ok(Payload::uncompressed(self.decompressed_bytes()?))
            }
            // Both enums are two-valued, the arms above are exhaustive.
            _ => unreachable!("unhandled compression conversion"),
        }
    }

    /// The canonical uncompressed payload bytes, decoding if necessary.
    pub fn to_uncompressed(&self) -> Result<Bytes, ProtocolError> {
        match self.info.compression {
            CompressionType::Uncompressed => Ok(self.data.clone()),
            CompressionType::Lz4 => self.decompressed_bytes(),
        }
    }

    fn decompressed_bytes(&self) -> Result<Bytes, ProtocolError> {
        let size = self
            .info
            .uncompressed_size
            .ok_or(ProtocolError::MissingUncompressedSize)?;
        let decompressed = lz4_flex::block::decompress(&self.data, size)
            .map_err(|e| ProtocolError::Decompress(e.to_string()))?;
        Ok(Bytes::from(decompressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_type_parse() {
        assert_eq!(
            CompressionType::parse("UNCOMPRESSED").unwrap(),
            CompressionType::Uncompressed
        );
        assert_eq!(CompressionType::parse("LZ4").unwrap(), CompressionType::Lz4);
        assert!(matches!(
            CompressionType::parse("SNAPPY"),
            Err(ProtocolError::UnknownCompressionType(_))
        ));
    }

    #[test]
    fn test_compression_type_serde_names() {
        let json = serde_json::to_string(&CompressionType::Lz4).unwrap();
        assert_eq!(json, "\"LZ4\"");
        let json = serde_json::to_string(&CompressionType::Uncompressed).unwrap();
        assert_eq!(json, "\"UNCOMPRESSED\"");
    }

    #[test]
    fn test_lz4_round_trip() {
        let canonical = b"generation 7 config payload, repeated. ".repeat(64);
        let payload = Payload::uncompressed(canonical.clone());
        let compressed = payload.with_compression(CompressionType::Lz4).unwrap();

        assert_eq!(compressed.compression_info().compression, CompressionType::Lz4);
        assert_eq!(
            compressed.compression_info().uncompressed_size,
            Some(canonical.len())
        );
        assert!(compressed.len() < canonical.len());

        let restored = compressed.to_uncompressed().unwrap();
        assert_eq!(restored.as_ref(), canonical.as_slice());
    }

    #[test]
    fn test_with_compression_is_idempotent() {
        let payload = Payload::uncompressed(Bytes::from_static(b"payload"));
        let same = payload
            .clone()
            .with_compression(CompressionType::Uncompressed)
            .unwrap();
        assert_eq!(same, payload);

        let lz4 = payload.with_compression(CompressionType::Lz4).unwrap();
        let still_lz4 = lz4.clone().with_compression(CompressionType::Lz4).unwrap();
        assert_eq!(still_lz4, lz4);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let payload = Payload::uncompressed(Bytes::new());
        let compressed = payload.with_compression(CompressionType::Lz4).unwrap();
        assert_eq!(compressed.compression_info().uncompressed_size, Some(0));
        let restored = compressed.to_uncompressed().unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_decompress_without_size_fails() {
        let block = lz4_flex::block::compress(b"some payload");
        let payload = Payload::from_wire(
            Bytes::from(block),
            CompressionInfo {
                compression: CompressionType::Lz4,
                uncompressed_size: None,
            },
        );
        assert!(matches!(
            payload.to_uncompressed(),
            Err(ProtocolError::MissingUncompressedSize)
        ));
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let payload = Payload::from_wire(
            Bytes::from_static(b"\xff\xff\xff\xff not lz4"),
            CompressionInfo::lz4(1024),
        );
        assert!(matches!(
            payload.to_uncompressed(),
            Err(ProtocolError::Decompress(_))
        ));
    }

    #[test]
    fn test_compression_info_serde() {
        let info = CompressionInfo::lz4(4096);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["compressionType"], "LZ4");
        assert_eq!(json["uncompressedSize"], 4096);

        let info = CompressionInfo::uncompressed();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["compressionType"], "UNCOMPRESSED");
        assert!(json.get("uncompressedSize").is_none());

        let parsed: CompressionInfo =
            serde_json::from_str("{\"compressionType\":\"UNCOMPRESSED\"}").unwrap();
        assert_eq!(parsed, CompressionInfo::uncompressed());
    }
}
