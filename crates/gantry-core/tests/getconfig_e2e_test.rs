// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for the getConfig wire protocol.

mod common;

use std::time::Duration;

use common::*;
use gantry_protocol::checksum::PayloadChecksums;
use gantry_protocol::client::ClientError;
use gantry_protocol::compress::CompressionType;
use gantry_protocol::error::ErrorCode;
use gantry_protocol::request::{ConfigKey, ConfigRequestBuilder};

#[tokio::test]
async fn test_deploy_then_get_config() {
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    // 1. Deploy a package
    let outcome = ctx
        .repo
        .deploy(&app(), sample_package(1000))
        .await
        .expect("Failed to deploy");
    assert_eq!(outcome.generation, 1);

    // 2. Fetch its config over the wire
    let request = sample_request().build();
    let (response, payload) = ctx
        .client
        .get_config(&request)
        .await
        .expect("Failed to fetch config");

    assert_eq!(response.generation, 1);
    let data = payload.to_uncompressed().expect("Failed to decode payload");
    assert_eq!(data.as_ref(), br#"{"max-hits":1000}"#);

    // 3. Response checksums describe the uncompressed payload
    let checksums = PayloadChecksums::from_payload(&data);
    assert_eq!(checksums.md5.as_deref(), Some(response.config_md5.as_str()));
    assert_eq!(
        checksums.xxhash64.as_deref(),
        Some(response.config_xxhash64.as_str())
    );
}

#[tokio::test]
async fn test_long_poll_wakes_on_activation() {
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    // 1. Deploy and fetch the current config
    ctx.repo
        .deploy(&app(), sample_package(1000))
        .await
        .expect("Failed to deploy");
    let (first, payload) = ctx
        .client
        .get_config(&sample_request().build())
        .await
        .expect("Failed to fetch config");
    assert_eq!(first.generation, 1);
    let data = payload.to_uncompressed().expect("Failed to decode payload");
    let held = PayloadChecksums::from_payload(&data);

    // 2. Park an up-to-date subscriber, then deploy a new generation while
    //    it waits
    let parked_request = sample_request().current(1, &held).timeout_ms(10_000).build();
    let parked = ctx.client.get_config(&parked_request);
    let deploy = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.repo.deploy(&app(), sample_package(2000)).await
    };
    let (parked_result, deploy_result) = tokio::join!(parked, deploy);
    deploy_result.expect("Failed to deploy updated package");

    // 3. The parked request is answered with the new generation
    let (response, payload) = parked_result.expect("Parked fetch failed");
    assert_eq!(response.generation, 2);
    let data = payload.to_uncompressed().expect("Failed to decode payload");
    assert_eq!(data.as_ref(), br#"{"max-hits":2000}"#);
}

#[tokio::test]
async fn test_long_poll_timeout_returns_current_generation() {
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    // 1. Deploy and learn the current checksums
    ctx.repo
        .deploy(&app(), sample_package(1000))
        .await
        .expect("Failed to deploy");
    let (_, payload) = ctx
        .client
        .get_config(&sample_request().build())
        .await
        .expect("Failed to fetch config");
    let data = payload.to_uncompressed().expect("Failed to decode payload");
    let held = PayloadChecksums::from_payload(&data);

    // 2. An up-to-date subscriber with a short timeout is held, then
    //    answered normally with the unchanged generation
    let request = sample_request().current(1, &held).timeout_ms(500).build();
    let started = std::time::Instant::now();
    let (response, _) = ctx
        .client
        .get_config(&request)
        .await
        .expect("Timed-out fetch failed");

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(response.generation, 1);
    assert!(!response.has_updated_generation(&request));
    assert!(!response.has_updated_config(&request));
}

#[tokio::test]
async fn test_unknown_config_is_rejected() {
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    ctx.repo
        .deploy(&app(), sample_package(1000))
        .await
        .expect("Failed to deploy");

    let request = ConfigRequestBuilder::new(
        &ConfigKey::new("no-such-config", "platform.search", "default"),
        TEST_HOSTNAME,
    )
    .build();
    let err = ctx.client.get_config(&request).await.unwrap_err();
    match err {
        ClientError::Rejected(error) => {
            assert_eq!(error.code(), Some(ErrorCode::UnknownConfig));
        }
        other => panic!("Unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_ping() {
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    ctx.client.ping().await.expect("Ping failed");
    assert!(ctx.client.is_connected().await);
}

#[tokio::test]
async fn test_lz4_payload_round_trips() {
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    ctx.repo
        .deploy(&app(), sample_package(1000))
        .await
        .expect("Failed to deploy");

    // 1. Ask for LZ4; the wire payload comes back compressed
    let request = sample_request().compression(CompressionType::Lz4).build();
    let (response, payload) = ctx
        .client
        .get_config(&request)
        .await
        .expect("Failed to fetch config");
    assert_eq!(
        payload.compression_info().compression,
        CompressionType::Lz4
    );

    // 2. Decompressing restores the canonical payload
    let data = payload.to_uncompressed().expect("Failed to decompress");
    assert_eq!(data.as_ref(), br#"{"max-hits":1000}"#);
    assert_eq!(response.compression_info.uncompressed_size, Some(data.len()));

    // 3. Checksums describe the uncompressed form, not the wire bytes
    let checksums = PayloadChecksums::from_payload(&data);
    assert_eq!(checksums.md5.as_deref(), Some(response.config_md5.as_str()));
    assert_eq!(
        checksums.xxhash64.as_deref(),
        Some(response.config_xxhash64.as_str())
    );
}
