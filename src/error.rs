//! Error taxonomy for membership operations.
//!
//! Each component reports its own [`ErrorKind`]; the coordinator forwards the
//! originating kind unchanged, so callers always receive a classified error
//! together with a human-readable message and optional structured details.

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the crate's public operations.
pub type MembershipResult<T> = std::result::Result<T, MembershipError>;

/// Machine-readable error classification, serialized under `error.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidSecretParameters,
    BatchAssignmentError,
    BatchCapacityExceeded,
    PolynomialError,
    DatabaseError,
    DuplicateMember,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSecretParameters => "InvalidSecretParameters",
            Self::BatchAssignmentError => "BatchAssignmentError",
            Self::BatchCapacityExceeded => "BatchCapacityExceeded",
            Self::PolynomialError => "PolynomialError",
            Self::DatabaseError => "DatabaseError",
            Self::DuplicateMember => "DuplicateMember",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("invalid secret parameters: {message}")]
    InvalidSecretParameters { message: String },

    #[error("batch assignment failed: {message}")]
    BatchAssignment {
        message: String,
        #[source]
        source: StoreError,
    },

    #[error("batch {batch_id} is full ({members}/{capacity} members)")]
    BatchCapacityExceeded {
        batch_id: Uuid,
        members: usize,
        capacity: usize,
    },

    #[error("polynomial error: {message}")]
    Polynomial {
        message: String,
        batch_id: Option<Uuid>,
    },

    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: StoreError,
    },

    #[error("a member with the same secret already exists in organization {organization_id}")]
    DuplicateMember {
        organization_id: Uuid,
        user_id: Uuid,
    },
}

impl MembershipError {
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidSecretParameters {
            message: message.into(),
        }
    }

    pub fn batch_assignment(message: impl Into<String>, source: StoreError) -> Self {
        Self::BatchAssignment {
            message: message.into(),
            source,
        }
    }

    pub fn polynomial(message: impl Into<String>, batch_id: Option<Uuid>) -> Self {
        Self::Polynomial {
            message: message.into(),
            batch_id,
        }
    }

    pub fn database(message: impl Into<String>, source: StoreError) -> Self {
        Self::Database {
            message: message.into(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSecretParameters { .. } => ErrorKind::InvalidSecretParameters,
            Self::BatchAssignment { .. } => ErrorKind::BatchAssignmentError,
            Self::BatchCapacityExceeded { .. } => ErrorKind::BatchCapacityExceeded,
            Self::Polynomial { .. } => ErrorKind::PolynomialError,
            Self::Database { .. } => ErrorKind::DatabaseError,
            Self::DuplicateMember { .. } => ErrorKind::DuplicateMember,
        }
    }

    /// Failures caused by a concurrent writer: the batch filled up or its
    /// version moved between read and commit. A fresh attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BatchCapacityExceeded { .. } => true,
            Self::Database { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidSecretParameters { .. } => None,
            Self::BatchAssignment { source, .. } => Some(json!({ "cause": source.to_string() })),
            Self::BatchCapacityExceeded {
                batch_id,
                members,
                capacity,
            } => Some(json!({
                "batchId": batch_id,
                "members": members,
                "capacity": capacity,
            })),
            Self::Polynomial { batch_id, .. } => batch_id.map(|id| json!({ "batchId": id })),
            Self::Database { source, .. } => Some(json!({ "cause": source.to_string() })),
            Self::DuplicateMember {
                organization_id,
                user_id,
            } => Some(json!({
                "organizationId": organization_id,
                "userId": user_id,
            })),
        }
    }

    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

/// Wire form of an error: `{ "type", "message", "details" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&MembershipError> for ErrorPayload {
    fn from(err: &MembershipError) -> Self {
        err.to_payload()
    }
}
