// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for gantry-core.
//!
//! Provides a unified error type that maps to wire error responses.

#![allow(dead_code)] // Variants and methods used in tests and for future expansion

use std::fmt;

use gantry_protocol::{ErrorCode, ErrorResponse};

use crate::coordination::CoordinationError;
use crate::session::ActivationError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during deployment and config serving.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Application was not found in the deployment store.
    ApplicationNotFound {
        /// The serialized application id that was not found.
        application: String,
    },

    /// Session was not found for the tenant.
    SessionNotFound {
        /// The tenant that owns the session namespace.
        tenant: String,
        /// The session id that was not found.
        session_id: i64,
    },

    /// No config matched the requested key in the active model.
    ConfigNotFound {
        /// The requested config key (`namespace.name@configId`).
        key: String,
    },

    /// Session is in an invalid state for the requested operation.
    InvalidSessionState {
        /// The session id.
        session_id: i64,
        /// The expected status.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Building the config model from an application package failed.
    ModelBuildFailed {
        /// The serialized application id.
        application: String,
        /// The reason for failure.
        reason: String,
    },

    /// Activation of a prepared session failed.
    ActivationFailed {
        /// The reason for failure.
        reason: String,
        /// Whether a retry is expected to help.
        transient: bool,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Coordination store operation failed.
    CoordinationFailed {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Convert this error to an [`ErrorResponse`] for protocol responses.
    ///
    /// Not-found conditions map to `UNKNOWN_CONFIG`; everything else is an
    /// internal server error from the client's point of view.
    pub fn to_error_response(&self) -> ErrorResponse {
        let code = match self {
            Self::ApplicationNotFound { .. } | Self::ConfigNotFound { .. } => {
                ErrorCode::UnknownConfig
            }
            _ => ErrorCode::InternalError,
        };
        ErrorResponse::new(code, &self.to_string())
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ApplicationNotFound { .. } => "APPLICATION_NOT_FOUND",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            Self::InvalidSessionState { .. } => "INVALID_SESSION_STATE",
            Self::ModelBuildFailed { .. } => "MODEL_BUILD_FAILED",
            Self::ActivationFailed { .. } => "ACTIVATION_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::CoordinationFailed { .. } => "COORDINATION_FAILED",
        }
    }

    /// Whether a retry of the failed operation is expected to help.
    ///
    /// Bootstrap redeployment uses this to decide between a quiet retry
    /// (transient) and a loud warning (everything else).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ActivationFailed { transient, .. } => *transient,
            Self::CoordinationFailed { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplicationNotFound { application } => {
                write!(f, "Application '{}' not found", application)
            }
            Self::SessionNotFound { tenant, session_id } => {
                write!(f, "Session {} not found for tenant '{}'", session_id, tenant)
            }
            Self::ConfigNotFound { key } => {
                write!(f, "Config '{}' not found", key)
            }
            Self::InvalidSessionState {
                session_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Session {} is in invalid state: expected '{}', got '{}'",
                    session_id, expected, actual
                )
            }
            Self::ModelBuildFailed {
                application,
                reason,
            } => {
                write!(
                    f,
                    "Failed to build model for application '{}': {}",
                    application, reason
                )
            }
            Self::ActivationFailed { reason, .. } => {
                write!(f, "Activation failed: {}", reason)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::CoordinationFailed { operation, details } => {
                write!(f, "Coordination error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<CoordinationError> for CoreError {
    fn from(err: CoordinationError) -> Self {
        CoreError::CoordinationFailed {
            operation: err.operation().to_string(),
            details: err.to_string(),
        }
    }
}

impl From<ActivationError> for CoreError {
    fn from(err: ActivationError) -> Self {
        let transient = err.is_transient();
        CoreError::ActivationFailed {
            reason: err.to_string(),
            transient,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::CoordinationFailed {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_codes() {
        let test_cases = vec![
            (
                CoreError::ApplicationNotFound {
                    application: "acme:shop:default".to_string(),
                },
                "APPLICATION_NOT_FOUND",
            ),
            (
                CoreError::SessionNotFound {
                    tenant: "acme".to_string(),
                    session_id: 7,
                },
                "SESSION_NOT_FOUND",
            ),
            (
                CoreError::ConfigNotFound {
                    key: "search.qr-templates@default".to_string(),
                },
                "CONFIG_NOT_FOUND",
            ),
            (
                CoreError::InvalidSessionState {
                    session_id: 3,
                    expected: "prepared".to_string(),
                    actual: "new".to_string(),
                },
                "INVALID_SESSION_STATE",
            ),
            (
                CoreError::ModelBuildFailed {
                    application: "acme:shop:default".to_string(),
                    reason: "bad document".to_string(),
                },
                "MODEL_BUILD_FAILED",
            ),
            (
                CoreError::ActivationFailed {
                    reason: "lock contention".to_string(),
                    transient: true,
                },
                "ACTIVATION_FAILED",
            ),
            (
                CoreError::ValidationError {
                    field: "hosts".to_string(),
                    message: "empty hostname".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                CoreError::CoordinationFailed {
                    operation: "set".to_string(),
                    details: "connection refused".to_string(),
                },
                "COORDINATION_FAILED",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_core_error_display() {
        let err = CoreError::ApplicationNotFound {
            application: "acme:shop:default".to_string(),
        };
        assert_eq!(err.to_string(), "Application 'acme:shop:default' not found");

        let err = CoreError::SessionNotFound {
            tenant: "acme".to_string(),
            session_id: 42,
        };
        assert_eq!(err.to_string(), "Session 42 not found for tenant 'acme'");

        let err = CoreError::InvalidSessionState {
            session_id: 3,
            expected: "prepared".to_string(),
            actual: "new".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Session 3 is in invalid state: expected 'prepared', got 'new'"
        );

        let err = CoreError::ValidationError {
            field: "hosts".to_string(),
            message: "must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error for 'hosts': must not be empty"
        );

        let err = CoreError::CoordinationFailed {
            operation: "transaction".to_string(),
            details: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Coordination error during 'transaction': connection refused"
        );
    }

    #[test]
    fn test_to_error_response_mapping() {
        let not_found = CoreError::ConfigNotFound {
            key: "search.qr-templates@default".to_string(),
        };
        assert_eq!(not_found.to_error_response().code(), Some(ErrorCode::UnknownConfig));

        let app_missing = CoreError::ApplicationNotFound {
            application: "acme:shop:default".to_string(),
        };
        assert_eq!(
            app_missing.to_error_response().code(),
            Some(ErrorCode::UnknownConfig)
        );

        let internal = CoreError::CoordinationFailed {
            operation: "set".to_string(),
            details: "boom".to_string(),
        };
        assert_eq!(
            internal.to_error_response().code(),
            Some(ErrorCode::InternalError)
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(
            CoreError::ActivationFailed {
                reason: "x".to_string(),
                transient: true
            }
            .is_transient()
        );
        assert!(
            !CoreError::ActivationFailed {
                reason: "x".to_string(),
                transient: false
            }
            .is_transient()
        );
        assert!(
            CoreError::CoordinationFailed {
                operation: "set".to_string(),
                details: "x".to_string()
            }
            .is_transient()
        );
        assert!(
            !CoreError::ConfigNotFound {
                key: "x".to_string()
            }
            .is_transient()
        );
    }
}
