// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for bootstrap: restart with an unchanged server version loads
//! sessions in place, an upgrade redeploys every application.

mod common;

use std::time::Duration;

use common::*;
use gantry_core::bootstrap::Bootstrapper;
use gantry_core::config::ExitMode;

fn bootstrapper(ctx: &TestContext, version: &str) -> Bootstrapper {
    Bootstrapper::new(
        ctx.repo.clone(),
        ctx.coordinator.clone(),
        version,
        4,
        Duration::from_secs(30),
        Duration::from_millis(10),
        ExitMode::Exit,
    )
}

#[tokio::test]
async fn test_restart_with_same_version_loads_without_redeploy() {
    let Some(first) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    // 1. First boot stores the server version, then a deployment lands
    bootstrapper(&first, "7.1.0")
        .run()
        .await
        .expect("First bootstrap failed");
    first
        .repo
        .deploy(&app(), sample_package(1000))
        .await
        .expect("Failed to deploy");

    // 2. Restart: a fresh server over the same store, same version
    let Some(restarted) =
        TestContext::with_coordinator(first.coordinator.clone(), "cfg1.example.com").await
    else {
        eprintln!("Skipping test: failed to create restarted context");
        return;
    };
    let summary = bootstrapper(&restarted, "7.1.0")
        .run()
        .await
        .expect("Bootstrap after restart failed");
    assert_eq!(summary.loaded, 1);
    assert_eq!(summary.redeployed, 0);
    assert!(summary.failed.is_empty());

    // 3. The restarted server serves the existing generation; no new
    //    session was created
    let (response, _) = restarted
        .client
        .get_config(&sample_request().build())
        .await
        .expect("Failed to fetch config after restart");
    assert_eq!(response.generation, 1);
    assert!(
        restarted
            .repo
            .session_store()
            .load_session("acme", 2)
            .await
            .expect("Failed to probe session")
            .is_none()
    );

    // 4. Bootstrap marked the super model complete
    assert!(
        restarted
            .state
            .request_handler
            .supermodel()
            .snapshot()
            .complete
    );
}

#[tokio::test]
async fn test_upgrade_redeploys_applications() {
    let Some(first) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    // 1. Boot at 7.1.0 and deploy
    bootstrapper(&first, "7.1.0")
        .run()
        .await
        .expect("First bootstrap failed");
    first
        .repo
        .deploy(&app(), sample_package(1000))
        .await
        .expect("Failed to deploy");

    // 2. Restart at 7.2.0: the version mismatch forces a redeploy
    let Some(upgraded) =
        TestContext::with_coordinator(first.coordinator.clone(), "cfg1.example.com").await
    else {
        eprintln!("Skipping test: failed to create upgraded context");
        return;
    };
    let summary = bootstrapper(&upgraded, "7.2.0")
        .run()
        .await
        .expect("Bootstrap after upgrade failed");
    assert_eq!(summary.redeployed, 1);
    assert_eq!(summary.loaded, 0);

    // 3. The redeploy produced a new generation with the same content
    let (response, payload) = upgraded
        .client
        .get_config(&sample_request().build())
        .await
        .expect("Failed to fetch config after upgrade");
    assert_eq!(response.generation, 2);
    let data = payload.to_uncompressed().expect("Failed to decode payload");
    assert_eq!(data.as_ref(), br#"{"max-hits":1000}"#);

    // 4. The stored server version moved to 7.2.0
    let stored = upgraded
        .coordinator
        .get("/gantry/server-version")
        .await
        .expect("Failed to read version node")
        .expect("Version node missing");
    assert_eq!(stored.as_slice(), b"7.2.0");
}
