//! Record types shared by the store, the directory and the coordinator.

use crate::error::{ErrorPayload, MembershipError};
use crate::field::FieldElement;
use crate::polynomial::{Polynomial, PolynomialError};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An organization as seen by this crate: read-only input providing the salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    /// Normalized wallet address: lowercase hex, no `0x` prefix.
    pub wallet_address: String,
    /// Per-organization salt mixed into every member secret.
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    #[must_use]
    pub fn new(wallet_address: String, salt: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address,
            salt,
            created_at: Utc::now(),
        }
    }
}

/// A group of at most `MAX_BATCH_SIZE` members sharing one polynomial.
///
/// `equation` is the persisted polynomial: decimal-string coefficients in
/// ascending degree order. `version` is bumped by every write and is the
/// compare-and-swap token for concurrent updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub equation: Vec<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// A fresh batch whose equation is the zero-member polynomial `[1]`.
    #[must_use]
    pub fn new(organization_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            equation: Polynomial::empty_batch().to_decimal_strings(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decodes the stored equation.
    pub fn polynomial(&self) -> Result<Polynomial, PolynomialError> {
        debug!(
            "Decoding batch {} equation ({} coefficients)",
            self.id,
            self.equation.len()
        );
        Polynomial::from_decimal_strings(&self.equation)
    }
}

/// A member of exactly one batch.
///
/// No email is stored. The derived secret is the only link between a person
/// and their batch, recomputed from the email and organization salt on lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub batch_id: Uuid,
    pub user_secret: FieldElement,
    pub balance: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
    /// Keccak-256 of `reference_number`, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new user, beyond email and organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserFields {
    #[serde(default)]
    pub balance: Option<u64>,
    #[serde(default)]
    pub reference_number: Option<String>,
}

/// A committed membership: the new user and the batch that now contains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user: User,
    pub batch: Batch,
}

/// Response returned to the request-handling layer.
///
/// Serializes as `{"success": true, "user": .., "batch": ..}` or
/// `{"success": false, "error": {"type", "message", "details"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Batch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl MembershipResponse {
    #[must_use]
    pub fn success(membership: Membership) -> Self {
        Self {
            success: true,
            user: Some(membership.user),
            batch: Some(membership.batch),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(err: &MembershipError) -> Self {
        Self {
            success: false,
            user: None,
            batch: None,
            error: Some(err.to_payload()),
        }
    }
}

impl From<Result<Membership, MembershipError>> for MembershipResponse {
    fn from(result: Result<Membership, MembershipError>) -> Self {
        match result {
            Ok(membership) => Self::success(membership),
            Err(err) => Self::failure(&err),
        }
    }
}
