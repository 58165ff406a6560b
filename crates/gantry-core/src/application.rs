// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application identity and the immutable per-generation application snapshot.

use std::fmt;
use std::sync::Arc;

use gantry_protocol::ConfigKey;
use serde::{Deserialize, Serialize};

use crate::model::{ConfigModel, ConfigPayload};

/// Identity of a deployed application: tenant, application name, instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId {
    /// Tenant that owns the application.
    pub tenant: String,
    /// Application name within the tenant.
    pub application: String,
    /// Instance name, `default` for single-instance deployments.
    pub instance: String,
}

impl ApplicationId {
    /// Create an id from all three parts.
    pub fn new(tenant: &str, application: &str, instance: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            application: application.to_string(),
            instance: instance.to_string(),
        }
    }

    /// Create an id with the `default` instance.
    pub fn from_application(tenant: &str, application: &str) -> Self {
        Self::new(tenant, application, "default")
    }

    /// The reserved id under which the super model is served.
    pub fn global() -> Self {
        Self::new("*", "*", "*")
    }

    /// Whether this is the reserved super model id.
    pub fn is_global(&self) -> bool {
        self.tenant == "*" && self.application == "*" && self.instance == "*"
    }

    /// Node name used under a tenant's applications directory.
    pub fn node_name(&self) -> String {
        format!("{}:{}", self.application, self.instance)
    }

    /// Parse an id back from a tenant context and a node name.
    pub fn from_node_name(tenant: &str, name: &str) -> Option<Self> {
        let (application, instance) = name.split_once(':')?;
        if application.is_empty() || instance.is_empty() {
            return None;
        }
        Some(Self::new(tenant, application, instance))
    }

    /// Fully-qualified serialized form, `tenant:application:instance`.
    pub fn serialized(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tenant, self.application, self.instance)
    }
}

/// Summary of one active application, as published in the super model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    /// The application id.
    pub application: ApplicationId,
    /// The active generation.
    pub generation: i64,
    /// Hostnames allocated to the application.
    pub hosts: Vec<String>,
}

/// Immutable snapshot of an application's config model for one generation.
///
/// Request handling always works against a single `Arc<ApplicationSet>`;
/// activation swaps the whole snapshot in one reference store so readers
/// never observe a half-updated application.
#[derive(Clone)]
pub struct ApplicationSet {
    application: ApplicationId,
    generation: i64,
    model: Arc<dyn ConfigModel>,
    hosts: Vec<String>,
}

impl ApplicationSet {
    /// Build a snapshot from an activated model.
    pub fn new(
        application: ApplicationId,
        generation: i64,
        model: Arc<dyn ConfigModel>,
        hosts: Vec<String>,
    ) -> Self {
        Self {
            application,
            generation,
            model,
            hosts,
        }
    }

    /// The application id.
    pub fn application(&self) -> &ApplicationId {
        &self.application
    }

    /// The generation this snapshot serves.
    pub fn generation(&self) -> i64 {
        self.generation
    }

    /// Hostnames allocated to the application.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// The compiled model behind this snapshot.
    pub fn model(&self) -> &Arc<dyn ConfigModel> {
        &self.model
    }

    /// Resolve a config key against this snapshot's model.
    pub fn resolve(&self, key: &ConfigKey) -> Option<ConfigPayload> {
        self.model.resolve(key)
    }

    /// Summary used by the super model.
    pub fn info(&self) -> ApplicationInfo {
        ApplicationInfo {
            application: self.application.clone(),
            generation: self.generation,
            hosts: self.hosts.clone(),
        }
    }
}

impl fmt::Debug for ApplicationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationSet")
            .field("application", &self.application)
            .field("generation", &self.generation)
            .field("hosts", &self.hosts)
            .field("model", &"...")
            .finish()
    }
}
