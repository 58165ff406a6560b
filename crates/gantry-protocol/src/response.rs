// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The getConfig response.
//!
//! Response metadata travels as JSON in the frame's metadata section; the
//! config payload itself travels in the frame's binary payload section,
//! possibly LZ4-compressed. The metadata describes the payload (checksums
//! of its uncompressed form, compression applied on the wire) and where it
//! came from (generation).

use serde::{Deserialize, Serialize};

use crate::checksum::PayloadChecksums;
use crate::compress::CompressionInfo;
use crate::error::ErrorCode;
use crate::request::{ConfigRequest, PROTOCOL_VERSION};
use crate::trace::Trace;

/// Metadata of a getConfig response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResponse {
    /// Protocol version, echoes [`PROTOCOL_VERSION`].
    pub version: i64,
    /// Definition name, echoed from the request.
    #[serde(rename = "defName")]
    pub def_name: String,
    /// Definition namespace, echoed from the request.
    #[serde(rename = "defNamespace")]
    pub def_namespace: String,
    /// Definition MD5, echoed from the request.
    #[serde(rename = "defMD5", default)]
    pub def_md5: String,
    /// Config id, echoed from the request.
    #[serde(rename = "configId")]
    pub config_id: String,
    /// Client hostname, echoed from the request.
    #[serde(rename = "clientHostname", default)]
    pub client_hostname: String,
    /// Generation the payload was resolved from.
    pub generation: i64,
    /// True if applying this config requires a service restart.
    #[serde(rename = "applyOnRestart", default)]
    pub apply_on_restart: bool,
    /// MD5 of the uncompressed payload, empty if not computed.
    #[serde(rename = "configMD5", default)]
    pub config_md5: String,
    /// xxhash64 of the uncompressed payload, empty if not computed.
    #[serde(rename = "configXxhash64", default)]
    pub config_xxhash64: String,
    /// How the payload section is encoded on the wire.
    #[serde(rename = "compressionInfo", default)]
    pub compression_info: CompressionInfo,
    /// Trace recorded while the request was resolved.
    #[serde(default)]
    pub trace: Trace,
}

impl ConfigResponse {
    /// Builds response metadata for a resolved config.
    pub fn new(
        request: &ConfigRequest,
        generation: i64,
        checksums: &PayloadChecksums,
        compression_info: CompressionInfo,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            def_name: request.def_name.clone(),
            def_namespace: request.def_namespace.clone(),
            def_md5: request.def_md5.clone(),
            config_id: request.config_id.clone(),
            client_hostname: request.client_hostname.clone(),
            generation,
            apply_on_restart: false,
            config_md5: checksums.md5.clone().unwrap_or_default(),
            config_xxhash64: checksums.xxhash64.clone().unwrap_or_default(),
            compression_info,
            trace: request.trace.clone(),
        }
    }

    /// Checksums of the uncompressed payload this response describes.
    pub fn checksums(&self) -> PayloadChecksums {
        PayloadChecksums::from_fields(
            Some(self.config_md5.clone()),
            Some(self.config_xxhash64.clone()),
        )
    }

    /// Whether this response carries a strictly newer generation than the
    /// one named in `request`.
    pub fn has_updated_generation(&self, request: &ConfigRequest) -> bool {
        self.generation > request.current_generation
    }

    /// Whether this response's payload differs from the one the client
    /// described in `request`.
    ///
    /// Checksums comparable on both sides decide; if nothing is comparable
    /// the client is assumed to hold nothing and the payload counts as
    /// updated.
    pub fn has_updated_config(&self, request: &ConfigRequest) -> bool {
        self.checksums().differs_from(&request.checksums())
    }
}

/// Metadata of an error response.
///
/// Besides the code and message, an error echoes the identification fields
/// of the request it rejects and carries the trace recorded up to the
/// failure, so clients can attribute the rejection without correlating
/// frames themselves. Transport-level errors raised before a request was
/// decoded leave the identification fields empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable numeric error code, see [`ErrorCode`].
    #[serde(rename = "errorCode")]
    pub error_code: u32,
    /// Human-readable description of what was rejected.
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    /// Definition name, echoed from the request.
    #[serde(rename = "defName", default)]
    pub def_name: String,
    /// Definition namespace, echoed from the request.
    #[serde(rename = "defNamespace", default)]
    pub def_namespace: String,
    /// Config id, echoed from the request.
    #[serde(rename = "configId", default)]
    pub config_id: String,
    /// Client hostname, echoed from the request.
    #[serde(rename = "clientHostname", default)]
    pub client_hostname: String,
    /// Trace recorded up to the point of failure.
    #[serde(default)]
    pub trace: Trace,
}

impl ErrorResponse {
    /// Builds an error response for a code with a description.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code.code(),
            error_message: message.into(),
            def_name: String::new(),
            def_namespace: String::new(),
            config_id: String::new(),
            client_hostname: String::new(),
            trace: Trace::silent(),
        }
    }

    /// Echoes the identification fields and trace of the rejected request.
    pub fn for_request(mut self, request: &ConfigRequest) -> Self {
        self.def_name = request.def_name.clone();
        self.def_namespace = request.def_namespace.clone();
        self.config_id = request.config_id.clone();
        self.client_hostname = request.client_hostname.clone();
        self.trace = request.trace.clone();
        self
    }

    /// Replaces the carried trace, for handlers that traced past the point
    /// the request was decoded.
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    /// The decoded error code, if the numeric value is known.
    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.error_code).ok()
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{}: {}", code.name(), self.error_message),
            None => write!(f, "error {}: {}", self.error_code, self.error_message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ConfigKey, ConfigRequestBuilder};

    fn request_holding(generation: i64, payload: Option<&[u8]>) -> ConfigRequest {
        let key = ConfigKey::new("query-limits", "platform.search", "search/qrs0");
        let mut builder = ConfigRequestBuilder::new(&key, "node1.example.com");
        if let Some(payload) = payload {
            builder = builder.current(generation, &PayloadChecksums::from_payload(payload));
        } else {
            builder = builder.current(generation, &PayloadChecksums::default());
        }
        builder.build()
    }

    fn response_for(request: &ConfigRequest, generation: i64, payload: &[u8]) -> ConfigResponse {
        ConfigResponse::new(
            request,
            generation,
            &PayloadChecksums::from_payload(payload),
            CompressionInfo::uncompressed(),
        )
    }

    #[test]
    fn test_has_updated_generation_is_strict() {
        let request = request_holding(7, Some(b"payload"));
        assert!(response_for(&request, 8, b"payload").has_updated_generation(&request));
        assert!(!response_for(&request, 7, b"payload").has_updated_generation(&request));
        assert!(!response_for(&request, 6, b"payload").has_updated_generation(&request));
    }

    #[test]
    fn test_has_updated_config_compares_checksums() {
        let request = request_holding(7, Some(b"old payload"));
        assert!(response_for(&request, 8, b"new payload").has_updated_config(&request));
        assert!(!response_for(&request, 8, b"old payload").has_updated_config(&request));
    }

    #[test]
    fn test_has_updated_config_with_empty_client_checksums() {
        // A client that holds nothing always counts as outdated.
        let request = request_holding(0, None);
        assert!(response_for(&request, 1, b"payload").has_updated_config(&request));
    }

    #[test]
    fn test_generation_can_bump_without_config_change() {
        // A redeploy that produces identical payloads still advances the
        // generation; the two predicates are independent.
        let request = request_holding(7, Some(b"payload"));
        let response = response_for(&request, 8, b"payload");
        assert!(response.has_updated_generation(&request));
        assert!(!response.has_updated_config(&request));
    }

    #[test]
    fn test_response_serde_wire_names() {
        let request = request_holding(7, Some(b"payload"));
        let response = response_for(&request, 8, b"payload");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["version"], 3);
        assert_eq!(json["defName"], "query-limits");
        assert_eq!(json["defNamespace"], "platform.search");
        assert_eq!(json["defMD5"], "");
        assert_eq!(json["configId"], "search/qrs0");
        assert_eq!(json["clientHostname"], "node1.example.com");
        assert_eq!(json["generation"], 8);
        assert_eq!(json["applyOnRestart"], false);
        assert_eq!(json["compressionInfo"]["compressionType"], "UNCOMPRESSED");
        assert!(json["configMD5"].as_str().unwrap().len() == 32);

        let restored: ConfigResponse = serde_json::from_value(json).unwrap();
        assert_eq!(restored, response);
    }

    #[test]
    fn test_error_response_display() {
        let err = ErrorResponse::new(ErrorCode::IllegalTimeout, "timeout must be positive");
        assert_eq!(err.to_string(), "ILLEGAL_TIMEOUT: timeout must be positive");
        assert_eq!(err.code(), Some(ErrorCode::IllegalTimeout));

        let mut unknown = ErrorResponse::new(ErrorCode::InternalError, "???");
        unknown.error_code = 5;
        assert_eq!(unknown.code(), None);
        assert_eq!(unknown.to_string(), "error 5: ???");
    }

    #[test]
    fn test_error_response_serde() {
        let err = ErrorResponse::new(ErrorCode::UnknownConfig, "no such definition");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["errorCode"], 100_001);
        assert_eq!(json["errorMessage"], "no such definition");
        assert_eq!(json["defName"], "");
        assert_eq!(json["clientHostname"], "");
    }

    #[test]
    fn test_error_response_echoes_request_identity() {
        let request = request_holding(7, Some(b"payload"));
        let err =
            ErrorResponse::new(ErrorCode::UnknownConfig, "no such definition").for_request(&request);
        assert_eq!(err.def_name, "query-limits");
        assert_eq!(err.def_namespace, "platform.search");
        assert_eq!(err.config_id, "search/qrs0");
        assert_eq!(err.client_hostname, "node1.example.com");

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["defName"], "query-limits");
        assert_eq!(json["configId"], "search/qrs0");
        let restored: ErrorResponse = serde_json::from_value(json).unwrap();
        assert_eq!(restored, err);
    }
}
