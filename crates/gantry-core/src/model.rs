// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application packages, compiled config models, and the model factory.
//!
//! A deployment starts from an [`ApplicationPackage`]: config documents plus
//! the hosts the application runs on. Preparing a session compiles the
//! package into a [`ConfigModel`], an immutable lookup structure the request
//! path resolves config payloads from. The factory also diffs the new model
//! against the previously active one to report restart-level config changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use gantry_protocol::request::{is_valid_def_name, is_valid_namespace};
use gantry_protocol::ConfigKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::application::ApplicationId;
use crate::error::CoreError;

/// A resolved config payload plus how consumers must apply it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    /// Canonical JSON payload bytes.
    pub data: Bytes,
    /// True when consumers only pick the change up on restart.
    pub apply_on_restart: bool,
}

impl ConfigPayload {
    /// Create a payload.
    pub fn new(data: Bytes, apply_on_restart: bool) -> Self {
        Self {
            data,
            apply_on_restart,
        }
    }
}

/// Compiled, immutable config lookup for one application generation.
pub trait ConfigModel: Send + Sync {
    /// Every key this model can resolve.
    fn known_configs(&self) -> Vec<ConfigKey>;

    /// Resolve one key to its payload, or None when the model has no match.
    fn resolve(&self, key: &ConfigKey) -> Option<ConfigPayload>;

    /// Whether the model carries the given config definition at all.
    fn covers_definition(&self, name: &str, namespace: &str) -> bool {
        self.known_configs()
            .iter()
            .any(|key| key.name == name && key.namespace == namespace)
    }
}

/// How consumers must act on a config change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Services must be restarted to pick up the change.
    Restart,
    /// Data must be re-fed to pick up the change.
    Refeed,
}

/// One action consumers must take when the prepared session activates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeAction {
    /// What kind of action is needed.
    pub kind: ActionKind,
    /// Human-readable description of the change.
    pub message: String,
    /// Config keys affected by the change.
    pub keys: Vec<String>,
}

/// All actions produced by preparing a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeActions {
    /// The individual actions, empty when the change is fully live.
    pub actions: Vec<ConfigChangeAction>,
}

impl ConfigChangeActions {
    /// True when no action is required.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True when at least one change needs a restart.
    pub fn restart_required(&self) -> bool {
        self.actions
            .iter()
            .any(|action| action.kind == ActionKind::Restart)
    }
}

/// One config document in an application package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Definition name, e.g. `qr-templates`.
    pub name: String,
    /// Definition namespace, e.g. `search`.
    pub namespace: String,
    /// True when consumers only apply changes to this config on restart.
    #[serde(default)]
    pub restart_on_change: bool,
    /// Payload served to config ids without an override.
    pub default: serde_json::Value,
    /// Payload overrides per config id.
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
}

/// A host the application runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    /// Hostname as config clients will present it.
    pub hostname: String,
    /// Service ids running on the host, doubling as config ids.
    #[serde(default)]
    pub services: Vec<String>,
}

/// Everything a deployment needs: config documents plus hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPackage {
    /// Config documents, one per definition.
    pub documents: Vec<ConfigDocument>,
    /// Hosts the application runs on.
    pub hosts: Vec<HostSpec>,
}

impl ApplicationPackage {
    /// Content hash of the package, stable across equal packages.
    pub fn checksum(&self) -> String {
        // serde_json objects serialize with sorted keys, so equal packages
        // hash equal.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Validate names and hosts before a session is created from the package.
    pub fn validate(&self) -> Result<(), CoreError> {
        for document in &self.documents {
            if !is_valid_def_name(&document.name) {
                return Err(CoreError::ValidationError {
                    field: "documents".to_string(),
                    message: format!("invalid config name '{}'", document.name),
                });
            }
            if !is_valid_namespace(&document.namespace) {
                return Err(CoreError::ValidationError {
                    field: "documents".to_string(),
                    message: format!("invalid namespace '{}'", document.namespace),
                });
            }
        }
        for host in &self.hosts {
            if host.hostname.is_empty() {
                return Err(CoreError::ValidationError {
                    field: "hosts".to_string(),
                    message: "empty hostname".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Hostnames in the package, in declaration order.
    pub fn hostnames(&self) -> Vec<String> {
        self.hosts.iter().map(|host| host.hostname.clone()).collect()
    }
}

/// Canonical payload bytes for a config value.
pub fn canonical_bytes(value: &serde_json::Value) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

/// Input to a model build: which application, which generation, from what.
pub struct ModelContext {
    /// The application being deployed.
    pub application: ApplicationId,
    /// The generation the built model will serve.
    pub generation: i64,
    /// The package to compile.
    pub package: ApplicationPackage,
    /// The previously active model, for change-action diffing.
    pub previous: Option<Arc<dyn ConfigModel>>,
}

/// A compiled model plus the actions its activation requires.
pub struct BuiltModel {
    /// The compiled model.
    pub model: Arc<dyn ConfigModel>,
    /// Actions consumers must take once this model activates.
    pub actions: ConfigChangeActions,
}

impl std::fmt::Debug for BuiltModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltModel")
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// Builds config models from application packages.
#[async_trait]
pub trait ModelFactory: Send + Sync {
    /// Compile the package in `context` into a servable model.
    async fn build(&self, context: &ModelContext) -> Result<BuiltModel, CoreError>;
}

struct DocEntry {
    restart_on_change: bool,
    default: Bytes,
    overrides: HashMap<String, Bytes>,
}

/// Model compiled directly from the documents of an [`ApplicationPackage`].
pub struct PackageModel {
    configs: HashMap<(String, String), DocEntry>,
}

impl PackageModel {
    fn compile(package: &ApplicationPackage) -> Self {
        let mut configs = HashMap::new();
        for document in &package.documents {
            let overrides = document
                .overrides
                .iter()
                .map(|(config_id, value)| (config_id.clone(), canonical_bytes(value)))
                .collect();
            configs.insert(
                (document.namespace.clone(), document.name.clone()),
                DocEntry {
                    restart_on_change: document.restart_on_change,
                    default: canonical_bytes(&document.default),
                    overrides,
                },
            );
        }
        Self { configs }
    }
}

impl ConfigModel for PackageModel {
    fn known_configs(&self) -> Vec<ConfigKey> {
        let mut keys: Vec<ConfigKey> = self
            .configs
            .keys()
            .map(|(namespace, name)| ConfigKey::new(name.clone(), namespace.clone(), "default"))
            .collect();
        keys.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        keys
    }

    fn resolve(&self, key: &ConfigKey) -> Option<ConfigPayload> {
        let entry = self
            .configs
            .get(&(key.namespace.clone(), key.name.clone()))?;
        let data = entry
            .overrides
            .get(&key.config_id)
            .unwrap_or(&entry.default)
            .clone();
        Some(ConfigPayload::new(data, entry.restart_on_change))
    }
}

/// Default [`ModelFactory`]: compiles packages and diffs restart-flagged
/// configs against the previous model.
#[derive(Default)]
pub struct PackageModelFactory;

impl PackageModelFactory {
    /// Create the factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelFactory for PackageModelFactory {
    async fn build(&self, context: &ModelContext) -> Result<BuiltModel, CoreError> {
        context.package.validate().map_err(|err| match err {
            CoreError::ValidationError { message, .. } => CoreError::ModelBuildFailed {
                application: context.application.serialized(),
                reason: message,
            },
            other => other,
        })?;

        let model = Arc::new(PackageModel::compile(&context.package));

        let mut actions = ConfigChangeActions::default();
        if let Some(previous) = &context.previous {
            for key in model.known_configs() {
                let Some(new_payload) = model.resolve(&key) else {
                    continue;
                };
                if !new_payload.apply_on_restart {
                    continue;
                }
                let changed = match previous.resolve(&key) {
                    Some(old_payload) => old_payload.data != new_payload.data,
                    None => false,
                };
                if changed {
                    actions.actions.push(ConfigChangeAction {
                        kind: ActionKind::Restart,
                        message: format!("config {} changed, restart required", key),
                        keys: vec![key.to_string()],
                    });
                }
            }
        }

        Ok(BuiltModel { model, actions })
    }
}

/// Provisioning failure, split by whether a retry is expected to help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    /// Temporary capacity or connectivity problem.
    #[error("transient provisioning failure: {0}")]
    Transient(String),
    /// The request itself cannot be satisfied.
    #[error("provisioning failed: {0}")]
    Permanent(String),
}

impl ProvisionError {
    /// Whether a retry is expected to help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Allocates and commits hosts for deployments.
///
/// `activate` runs inside the activation critical section, before the
/// state transaction commits. `remove` runs during application deletion
/// and its failures are logged, not fatal.
#[async_trait]
pub trait HostProvisioner: Send + Sync {
    /// Reserve hosts during prepare.
    async fn allocate(
        &self,
        application: &ApplicationId,
        hosts: &[HostSpec],
    ) -> Result<(), ProvisionError>;

    /// Commit the reservation during activation.
    async fn activate(&self, application: &ApplicationId) -> Result<(), ProvisionError>;

    /// Release hosts when the application is deleted.
    async fn remove(&self, application: &ApplicationId) -> Result<(), ProvisionError>;
}

/// Provisioner for static host lists: every operation is a no-op because
/// the package already names its hosts.
#[derive(Debug, Default)]
pub struct StaticProvisioner;

#[async_trait]
impl HostProvisioner for StaticProvisioner {
    async fn allocate(
        &self,
        _application: &ApplicationId,
        _hosts: &[HostSpec],
    ) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn activate(&self, _application: &ApplicationId) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn remove(&self, _application: &ApplicationId) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_package() -> ApplicationPackage {
        ApplicationPackage {
            documents: vec![
                ConfigDocument {
                    name: "qr-templates".to_string(),
                    namespace: "search".to_string(),
                    restart_on_change: false,
                    default: json!({"max-hits": 1000}),
                    overrides: BTreeMap::from([(
                        "container/qrs".to_string(),
                        json!({"max-hits": 50}),
                    )]),
                },
                ConfigDocument {
                    name: "threadpool".to_string(),
                    namespace: "container".to_string(),
                    restart_on_change: true,
                    default: json!({"threads": 8}),
                    overrides: BTreeMap::new(),
                },
            ],
            hosts: vec![HostSpec {
                hostname: "node1.example.com".to_string(),
                services: vec!["container/qrs".to_string()],
            }],
        }
    }

    fn context(generation: i64, previous: Option<Arc<dyn ConfigModel>>) -> ModelContext {
        ModelContext {
            application: ApplicationId::from_application("acme", "shop"),
            generation,
            package: sample_package(),
            previous,
        }
    }

    // ========================================================================
    // Package Tests
    // ========================================================================

    #[test]
    fn test_package_checksum_is_stable() {
        let a = sample_package();
        let b = sample_package();
        assert_eq!(a.checksum(), b.checksum());

        let mut c = sample_package();
        c.documents[0].default = json!({"max-hits": 2000});
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_package_validation_rejects_bad_names() {
        let mut package = sample_package();
        package.documents[0].name = "9starts-with-digit".to_string();
        assert!(package.validate().is_err());

        let mut package = sample_package();
        package.documents[0].namespace = "Upper".to_string();
        assert!(package.validate().is_err());

        let mut package = sample_package();
        package.hosts[0].hostname = String::new();
        assert!(package.validate().is_err());

        assert!(sample_package().validate().is_ok());
    }

    // ========================================================================
    // Model Tests
    // ========================================================================

    #[tokio::test]
    async fn test_model_resolves_default_and_override() {
        let built = PackageModelFactory::new().build(&context(1, None)).await.unwrap();

        let default = built
            .model
            .resolve(&ConfigKey::new("qr-templates", "search", "default"))
            .unwrap();
        assert_eq!(default.data.as_ref(), br#"{"max-hits":1000}"#);
        assert!(!default.apply_on_restart);

        let overridden = built
            .model
            .resolve(&ConfigKey::new("qr-templates", "search", "container/qrs"))
            .unwrap();
        assert_eq!(overridden.data.as_ref(), br#"{"max-hits":50}"#);
    }

    #[tokio::test]
    async fn test_model_unknown_key_is_none() {
        let built = PackageModelFactory::new().build(&context(1, None)).await.unwrap();
        assert!(
            built
                .model
                .resolve(&ConfigKey::new("missing", "search", "default"))
                .is_none()
        );
        assert!(built.model.covers_definition("qr-templates", "search"));
        assert!(!built.model.covers_definition("qr-templates", "container"));
    }

    #[tokio::test]
    async fn test_restart_flag_carried_on_payload() {
        let built = PackageModelFactory::new().build(&context(1, None)).await.unwrap();
        let payload = built
            .model
            .resolve(&ConfigKey::new("threadpool", "container", "default"))
            .unwrap();
        assert!(payload.apply_on_restart);
    }

    // ========================================================================
    // Change Action Tests
    // ========================================================================

    #[tokio::test]
    async fn test_first_build_has_no_actions() {
        let built = PackageModelFactory::new().build(&context(1, None)).await.unwrap();
        assert!(built.actions.is_empty());
    }

    #[tokio::test]
    async fn test_restart_config_change_produces_action() {
        let factory = PackageModelFactory::new();
        let first = factory.build(&context(1, None)).await.unwrap();

        let mut changed = context(2, Some(first.model.clone()));
        changed.package.documents[1].default = json!({"threads": 16});
        let second = factory.build(&changed).await.unwrap();

        assert!(second.actions.restart_required());
        assert_eq!(second.actions.actions.len(), 1);
        assert!(
            second.actions.actions[0]
                .message
                .contains("container.threadpool@default")
        );
    }

    #[tokio::test]
    async fn test_live_config_change_produces_no_action() {
        let factory = PackageModelFactory::new();
        let first = factory.build(&context(1, None)).await.unwrap();

        let mut changed = context(2, Some(first.model.clone()));
        changed.package.documents[0].default = json!({"max-hits": 2000});
        let second = factory.build(&changed).await.unwrap();

        assert!(second.actions.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_package_fails_build() {
        let mut bad = context(1, None);
        bad.package.documents[0].name = "!".to_string();
        let err = PackageModelFactory::new().build(&bad).await.unwrap_err();
        assert!(matches!(err, CoreError::ModelBuildFailed { .. }));
    }

    #[test]
    fn test_provision_error_transience() {
        assert!(ProvisionError::Transient("busy".to_string()).is_transient());
        assert!(!ProvisionError::Permanent("no such flavor".to_string()).is_transient());
    }
}
