// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! getConfig request handling.
//!
//! One function per RPC, taking a state struct and the decoded request
//! metadata. The long-poll contract lives here: a client that is already
//! up to date is parked on the application's generation watch and answered
//! either when a newer generation activates or when its timeout elapses,
//! in which case it gets a normal response carrying the current generation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument};

use gantry_protocol::compress::{CompressionInfo, Payload};
use gantry_protocol::error::ErrorCode;
use gantry_protocol::request::{ConfigKey, ConfigRequest, PROTOCOL_VERSION};
use gantry_protocol::response::{ConfigResponse, ErrorResponse};
use gantry_protocol::trace::Trace;

use crate::cache::CachedConfig;
use crate::request_handler::{RequestHandler, is_supermodel_key};

/// Shared state for getConfig handlers.
#[derive(Clone)]
pub struct ConfigHandlerState {
    /// Resolution facade over activated applications.
    pub request_handler: Arc<RequestHandler>,
    /// Flips to true once bootstrap redeployment has finished.
    pub ready: watch::Receiver<bool>,
}

impl ConfigHandlerState {
    /// Create handler state.
    pub fn new(request_handler: Arc<RequestHandler>, ready: watch::Receiver<bool>) -> Self {
        Self {
            request_handler,
            ready,
        }
    }
}

/// Handle a getConfig request, possibly holding it open.
///
/// Returns response metadata plus the payload in the client's requested
/// compression, or the error response to reject with.
#[instrument(
    skip(state, request),
    fields(key = %request.config_key(), client = %request.client_hostname)
)]
pub async fn handle_get_config(
    state: &ConfigHandlerState,
    request: ConfigRequest,
) -> Result<(ConfigResponse, Payload), ErrorResponse> {
    // 1. Protocol version gate, then field validation. Nothing is resolved
    //    for a malformed request.
    if request.protocol_version != PROTOCOL_VERSION {
        return Err(ErrorResponse::new(
            ErrorCode::InternalError,
            format!(
                "unsupported protocol version {}, expected {}",
                request.protocol_version, PROTOCOL_VERSION
            ),
        )
        .for_request(&request));
    }
    if let Err(code) = request.validate() {
        debug!(code = code.name(), "Rejected malformed getConfig request");
        return Err(ErrorResponse::new(
            code,
            format!("invalid getConfig request for {}", request.config_key()),
        )
        .for_request(&request));
    }

    let mut trace = request.trace.clone();
    let deadline = Instant::now() + Duration::from_millis(request.timeout_ms as u64);

    // 2. Hold the request until bootstrap has marked this server ready, up
    //    to the request's own deadline.
    let mut ready = state.ready.clone();
    if !*ready.borrow() {
        trace.trace(2, "waiting for server to finish bootstrapping");
        match timeout_at(deadline, ready.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => {
                return Err(ErrorResponse::new(
                    ErrorCode::InternalError,
                    "server is not ready to serve config",
                )
                .for_request(&request)
                .with_trace(trace));
            }
        }
    }

    let key = request.config_key();
    trace.trace(3, format!("resolving {}", key));

    // 3. Resolve; answer immediately if the client is out of date, park on
    //    the generation watch otherwise.
    loop {
        let cached = resolve(state, &key, &request, &mut trace)?;

        let candidate = ConfigResponse::new(
            &request,
            cached.generation,
            &cached.checksums,
            CompressionInfo::uncompressed(),
        );
        if candidate.has_updated_generation(&request) || candidate.has_updated_config(&request) {
            trace.trace(
                1,
                format!("returning config from generation {}", cached.generation),
            );
            return finish(&request, &cached, trace);
        }

        let Some(mut generations) = generation_watch(state, &key, &request) else {
            // The application vanished between resolve and subscribe; the
            // resolved snapshot is still a valid answer.
            return finish(&request, &cached, trace);
        };
        // A generation that landed between resolve and subscribe would
        // otherwise be missed; re-resolve instead of parking.
        if *generations.borrow_and_update() > cached.generation {
            continue;
        }

        trace.trace(
            1,
            format!(
                "client is up to date at generation {}, delaying response",
                cached.generation
            ),
        );
        match timeout_at(deadline, generations.changed()).await {
            Ok(Ok(())) => {
                trace.trace(2, "woken by a new generation");
                continue;
            }
            Ok(Err(_)) => {
                // Watch closed: the application was removed while parked.
                return Err(ErrorResponse::new(
                    ErrorCode::UnknownConfig,
                    format!("application serving {} was removed", key),
                )
                .for_request(&request)
                .with_trace(trace));
            }
            Err(_) => {
                trace.trace(1, "timeout elapsed, answering with current config");
                return finish(&request, &cached, trace);
            }
        }
    }
}

fn resolve(
    state: &ConfigHandlerState,
    key: &ConfigKey,
    request: &ConfigRequest,
    trace: &mut Trace,
) -> Result<Arc<CachedConfig>, ErrorResponse> {
    let handler = &state.request_handler;
    if is_supermodel_key(key) {
        trace.trace(2, "resolving from the super model");
        return handler
            .resolve_supermodel(key, &request.def_md5)
            .map_err(|err| {
                err.to_error_response()
                    .for_request(request)
                    .with_trace(trace.clone())
            });
    }

    let Some(set) = handler.resolve_application(&request.client_hostname) else {
        return Err(ErrorResponse::new(
            ErrorCode::UnknownConfig,
            format!(
                "no active application for client {}",
                request.client_hostname
            ),
        )
        .for_request(request)
        .with_trace(trace.clone()));
    };
    trace.trace(
        2,
        format!(
            "resolving from application {} generation {}",
            set.application(),
            set.generation()
        ),
    );
    handler
        .resolve_config(&set, key, &request.def_md5)
        .map_err(|err| {
            err.to_error_response()
                .for_request(request)
                .with_trace(trace.clone())
        })
}

fn generation_watch(
    state: &ConfigHandlerState,
    key: &ConfigKey,
    request: &ConfigRequest,
) -> Option<watch::Receiver<i64>> {
    if is_supermodel_key(key) {
        return Some(state.request_handler.supermodel_watch());
    }
    let set = state
        .request_handler
        .resolve_application(&request.client_hostname)?;
    state.request_handler.generation_watch(set.application())
}

fn finish(
    request: &ConfigRequest,
    cached: &CachedConfig,
    trace: Trace,
) -> Result<(ConfigResponse, Payload), ErrorResponse> {
    // Payloads are cached uncompressed; the wire encoding is derived here,
    // once the requested compression is known.
    let payload = match Payload::uncompressed(cached.payload.clone())
        .with_compression(request.compression_type)
    {
        Ok(payload) => payload,
        Err(err) => {
            return Err(ErrorResponse::new(
                ErrorCode::InternalError,
                format!("failed to encode payload: {}", err),
            )
            .for_request(request)
            .with_trace(trace));
        }
    };
    let mut response = ConfigResponse::new(
        request,
        cached.generation,
        &cached.checksums,
        payload.compression_info(),
    );
    response.apply_on_restart = cached.apply_on_restart;
    response.trace = trace;
    Ok((response, payload))
}
