// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Config QUIC server for gantry-core.
//!
//! Accepts connections from config subscribers and routes getConfig calls to
//! the config handlers. Each stream carries one call; a parked long-poll
//! request therefore never blocks other requests on the same connection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use gantry_protocol::error::ErrorCode;
use gantry_protocol::frame::{Frame, MessageType};
use gantry_protocol::request::ConfigRequest;
use gantry_protocol::response::ErrorResponse;
use gantry_protocol::server::{ConnectionHandler, GantryServer, StreamHandler};

use crate::config_handlers::{ConfigHandlerState, handle_get_config};

/// Shared state for the config server
pub type ConfigServerState = ConfigHandlerState;

/// Run the config QUIC server
#[instrument(skip(state))]
pub async fn run_config_server(
    bind_addr: SocketAddr,
    state: Arc<ConfigServerState>,
) -> Result<()> {
    let server = GantryServer::localhost(bind_addr)?;

    info!(addr = %bind_addr, "Config QUIC server starting");

    server
        .run(move |conn: ConnectionHandler| {
            let state = state.clone();
            async move {
                handle_connection(conn, state).await;
            }
        })
        .await?;

    Ok(())
}

/// Handle a single connection
#[instrument(skip(conn, state), fields(remote = %conn.remote_address()))]
pub async fn handle_connection(conn: ConnectionHandler, state: Arc<ConfigServerState>) {
    debug!("New subscriber connection accepted");

    conn.run(move |stream: StreamHandler| {
        let state = state.clone();
        async move {
            if let Err(e) = handle_stream(stream, state).await {
                error!("Stream error: {}", e);
            }
        }
    })
    .await;

    debug!("Subscriber connection closed");
}

/// Handle a single stream (one getConfig call or a ping)
async fn handle_stream(mut stream: StreamHandler, state: Arc<ConfigServerState>) -> Result<()> {
    let request_frame = stream.read_frame().await?;

    match request_frame.message_type {
        MessageType::GetConfig => {
            let request: ConfigRequest = match request_frame.decode_metadata() {
                Ok(request) => request,
                Err(e) => {
                    warn!("Received undecodable getConfig request: {}", e);
                    let error = ErrorResponse::new(
                        ErrorCode::InternalError,
                        format!("malformed getConfig request: {}", e),
                    );
                    stream.write_error(&error).await?;
                    stream.finish()?;
                    return Ok(());
                }
            };

            // May park for up to the request's timeout before answering.
            match handle_get_config(&state, request).await {
                Ok((response, payload)) => {
                    let frame = Frame::response(&response, payload.data().clone())?;
                    stream.write_frame(&frame).await?;
                }
                Err(error) => {
                    stream.write_error(&error).await?;
                }
            }
        }

        MessageType::Ping => {
            stream.write_frame(&Frame::ping()).await?;
        }

        other => {
            warn!("Received unexpected message type: {:?}", other);
            let error = ErrorResponse::new(
                ErrorCode::InternalError,
                format!("unexpected message type: {:?}", other),
            );
            stream.write_error(&error).await?;
        }
    }

    stream.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_config_server_compiles() {
        // Basic compilation test
    }
}
