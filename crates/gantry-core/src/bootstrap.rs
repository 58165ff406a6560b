// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup bootstrap.
//!
//! Before a server takes config traffic it must serve every application the
//! cluster knows. If the server binary's version matches the last stored
//! one, active sessions are simply loaded into memory. After an upgrade the
//! applications are redeployed instead, so models are rebuilt by the new
//! version: shuffled, in parallel on a bounded pool, with failed ones
//! retried in rounds of growing backoff until a wall-clock budget runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::application::ApplicationId;
use crate::config::ExitMode;
use crate::coordination::Coordinator;
use crate::deploy::ApplicationRepo;
use crate::error::CoreError;

pub(crate) const VERSION_PATH: &str = "/gantry/server-version";

/// Longest sleep between retry rounds.
const MAX_RETRY_SLEEP: Duration = Duration::from_secs(600);

/// What bootstrap did.
#[derive(Debug, Clone, Default)]
pub struct BootstrapSummary {
    /// Applications redeployed because the server version changed.
    pub redeployed: usize,
    /// Applications loaded from their active session as-is.
    pub loaded: usize,
    /// Applications still failing when bootstrap gave up (CONTINUE mode).
    pub failed: Vec<ApplicationId>,
}

/// Runs the startup sequence for one server.
pub struct Bootstrapper {
    repo: Arc<ApplicationRepo>,
    coordinator: Arc<dyn Coordinator>,
    version: String,
    redeploy_threads: usize,
    max_duration: Duration,
    retry_base: Duration,
    exit_mode: ExitMode,
}

impl Bootstrapper {
    /// Create a bootstrapper for this server binary's `version`.
    pub fn new(
        repo: Arc<ApplicationRepo>,
        coordinator: Arc<dyn Coordinator>,
        version: impl Into<String>,
        redeploy_threads: usize,
        max_duration: Duration,
        retry_base: Duration,
        exit_mode: ExitMode,
    ) -> Self {
        Self {
            repo,
            coordinator,
            version: version.into(),
            redeploy_threads: redeploy_threads.max(1),
            max_duration,
            retry_base,
            exit_mode,
        }
    }

    /// Run bootstrap to completion.
    ///
    /// On success every known application is served and the super model is
    /// marked complete. An error means the redeploy budget was exhausted in
    /// EXIT mode and the process should terminate.
    pub async fn run(&self) -> Result<BootstrapSummary, CoreError> {
        let stored = match self.coordinator.get(VERSION_PATH).await? {
            Some(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            None => None,
        };
        let applications = self.repo.list_applications().await?;

        let mut summary = BootstrapSummary::default();
        if stored.as_deref() == Some(self.version.as_str()) {
            info!(
                version = %self.version,
                applications = applications.len(),
                "Server version unchanged, loading active sessions"
            );
            summary.loaded = self.load_all(&applications).await;
        } else {
            info!(
                stored_version = stored.as_deref().unwrap_or("<none>"),
                version = %self.version,
                applications = applications.len(),
                "Server version changed, redeploying all applications"
            );
            summary = self.redeploy_all(applications).await?;
            self.coordinator
                .set(VERSION_PATH, self.version.as_bytes())
                .await?;
        }

        self.repo.request_handler().supermodel().mark_complete();
        info!(
            redeployed = summary.redeployed,
            loaded = summary.loaded,
            failed = summary.failed.len(),
            "Bootstrap finished"
        );
        Ok(summary)
    }

    async fn load_all(&self, applications: &[ApplicationId]) -> usize {
        let mut loaded = 0;
        for application in applications {
            match self.repo.load_application(application).await {
                Ok(Some(generation)) => {
                    info!(application = %application, generation, "Application loaded");
                    loaded += 1;
                }
                Ok(None) => {
                    warn!(application = %application, "Application has no active session, skipping");
                }
                Err(err) => {
                    warn!(
                        application = %application,
                        error = %err,
                        "Failed to load application; it will not be served"
                    );
                }
            }
        }
        loaded
    }

    async fn redeploy_all(
        &self,
        mut remaining: Vec<ApplicationId>,
    ) -> Result<BootstrapSummary, CoreError> {
        let started = Instant::now();
        let total = remaining.len();
        let mut attempts: HashMap<ApplicationId, u32> = HashMap::new();
        let mut failed_rounds: u32 = 0;

        while !remaining.is_empty() {
            // Shuffle so a stuck application does not always retry first.
            remaining.shuffle(&mut rand::thread_rng());
            let round = std::mem::take(&mut remaining);
            let failed = self.redeploy_round(round, &mut attempts).await?;
            if failed.is_empty() {
                break;
            }
            failed_rounds += 1;

            let sleep = self
                .retry_base
                .saturating_mul(failed_rounds)
                .min(MAX_RETRY_SLEEP);
            if started.elapsed() + sleep >= self.max_duration {
                return self.give_up(total, failed);
            }
            info!(
                failing = failed.len(),
                round = failed_rounds,
                sleep_secs = sleep.as_secs_f64(),
                "Retrying failed bootstrap redeployments"
            );
            tokio::time::sleep(sleep).await;
            remaining = failed;
        }

        Ok(BootstrapSummary {
            redeployed: total,
            loaded: 0,
            failed: Vec::new(),
        })
    }

    async fn redeploy_round(
        &self,
        applications: Vec<ApplicationId>,
        attempts: &mut HashMap<ApplicationId, u32>,
    ) -> Result<Vec<ApplicationId>, CoreError> {
        let semaphore = Arc::new(Semaphore::new(self.redeploy_threads));
        let mut tasks = JoinSet::new();
        for application in applications {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|err| CoreError::CoordinationFailed {
                    operation: "bootstrap".to_string(),
                    details: err.to_string(),
                })?;
            let repo = self.repo.clone();
            tasks.spawn(async move {
                let result = repo.redeploy(&application).await;
                drop(permit);
                (application, result)
            });
        }

        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (application, result) = joined.map_err(|err| CoreError::CoordinationFailed {
                operation: "bootstrap".to_string(),
                details: err.to_string(),
            })?;
            match result {
                Ok(generation) => {
                    info!(application = %application, generation, "Application redeployed");
                }
                Err(err) => {
                    let count = attempts.entry(application.clone()).or_insert(0);
                    *count += 1;
                    // Transient failures are expected during rolling
                    // restarts and logged quieter.
                    if err.is_transient() {
                        info!(
                            application = %application,
                            attempt = *count,
                            error = %err,
                            "Transient redeploy failure, will retry"
                        );
                    } else {
                        warn!(
                            application = %application,
                            attempt = *count,
                            error = %err,
                            "Redeploy failed, will retry"
                        );
                    }
                    failed.push(application);
                }
            }
        }
        Ok(failed)
    }

    fn give_up(
        &self,
        total: usize,
        failed: Vec<ApplicationId>,
    ) -> Result<BootstrapSummary, CoreError> {
        let names = failed
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        match self.exit_mode {
            ExitMode::Exit => Err(CoreError::ActivationFailed {
                reason: format!(
                    "bootstrap did not finish within {:?}; still failing: {}",
                    self.max_duration, names
                ),
                transient: false,
            }),
            ExitMode::Continue => {
                warn!(
                    failing = failed.len(),
                    applications = %names,
                    "Bootstrap budget exhausted, serving without the failing applications"
                );
                Ok(BootstrapSummary {
                    redeployed: total - failed.len(),
                    loaded: 0,
                    failed,
                })
            }
        }
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("version", &self.version)
            .field("redeploy_threads", &self.redeploy_threads)
            .field("max_duration", &self.max_duration)
            .field("exit_mode", &self.exit_mode)
            .finish()
    }
}
