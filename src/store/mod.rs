//! Storage collaborator for organizations, batches and users.
//!
//! The coordinator only needs a handful of operations, captured by
//! [`MembershipStore`]. Batch writes are guarded by an optimistic version
//! check: the caller passes the version it read, the store rejects the write
//! with [`StoreError::VersionConflict`] if another writer got there first, and
//! bumps the version on success.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

use crate::field::FieldElement;
use crate::types::{Batch, Organization, User};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: String },

    /// A user with the same secret is already a member of the organization.
    #[error("organization {organization_id} already has member {user_id} with this secret")]
    DuplicateSecret {
        organization_id: Uuid,
        user_id: Uuid,
    },

    #[error("batch {batch_id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        batch_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupted store: {reason}")]
    Corrupted { reason: String },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    fn already_exists(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }
}

/// Operations the membership engine consumes from persistent storage.
///
/// `insert_batch_and_user`, `write_batch_and_user` and
/// `write_batch_and_remove_user` must be atomic: after an error, neither the
/// batch nor the user set may show any change.
pub trait MembershipStore: Send + Sync {
    fn read_organization(&self, id: Uuid) -> Result<Organization, StoreError>;

    /// Looks up an organization by its normalized wallet address.
    fn find_organization_by_wallet(&self, wallet: &str)
        -> Result<Option<Organization>, StoreError>;

    fn insert_organization(&self, organization: Organization) -> Result<(), StoreError>;

    fn list_batches(&self, organization_id: Uuid) -> Result<Vec<Batch>, StoreError>;

    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError>;

    fn read_batch(&self, id: Uuid) -> Result<Batch, StoreError>;

    fn count_users(&self, batch_id: Uuid) -> Result<usize, StoreError>;

    /// Replaces a batch equation without touching users.
    fn update_batch(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
    ) -> Result<Batch, StoreError>;

    fn read_user(&self, id: Uuid) -> Result<User, StoreError>;

    fn find_user_by_secret(
        &self,
        organization_id: Uuid,
        secret: &FieldElement,
    ) -> Result<Option<User>, StoreError>;

    /// Atomically stores a batch that did not exist yet, with `equation` and
    /// its first member `user`. The stored batch is one version past `batch`.
    fn insert_batch_and_user(
        &self,
        batch: Batch,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError>;

    /// Atomically replaces the batch equation and inserts `user`.
    fn write_batch_and_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError>;

    /// Atomically replaces the batch equation and deletes `user_id`.
    fn write_batch_and_remove_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user_id: Uuid,
    ) -> Result<Batch, StoreError>;
}

/// Complete contents of a store. Shared by the in-memory and file-backed
/// implementations; every mutating method validates fully before it writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    #[serde(default)]
    pub organizations: HashMap<Uuid, Organization>,
    #[serde(default)]
    pub batches: HashMap<Uuid, Batch>,
    #[serde(default)]
    pub users: HashMap<Uuid, User>,
}

impl StoreState {
    pub fn organization(&self, id: Uuid) -> Result<Organization, StoreError> {
        self.organizations
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("organization", id))
    }

    #[must_use]
    pub fn organization_by_wallet(&self, wallet: &str) -> Option<Organization> {
        self.organizations
            .values()
            .find(|org| org.wallet_address.eq_ignore_ascii_case(wallet))
            .cloned()
    }

    pub fn insert_organization(&mut self, organization: Organization) -> Result<(), StoreError> {
        if self.organizations.contains_key(&organization.id) {
            return Err(StoreError::already_exists("organization", organization.id));
        }
        if self
            .organization_by_wallet(&organization.wallet_address)
            .is_some()
        {
            return Err(StoreError::already_exists(
                "organization wallet",
                &organization.wallet_address,
            ));
        }
        self.organizations.insert(organization.id, organization);
        Ok(())
    }

    #[must_use]
    pub fn batches_for(&self, organization_id: Uuid) -> Vec<Batch> {
        self.batches
            .values()
            .filter(|batch| batch.organization_id == organization_id)
            .cloned()
            .collect()
    }

    pub fn insert_batch(&mut self, batch: Batch) -> Result<(), StoreError> {
        if !self.organizations.contains_key(&batch.organization_id) {
            return Err(StoreError::not_found("organization", batch.organization_id));
        }
        if self.batches.contains_key(&batch.id) {
            return Err(StoreError::already_exists("batch", batch.id));
        }
        self.batches.insert(batch.id, batch);
        Ok(())
    }

    pub fn batch(&self, id: Uuid) -> Result<Batch, StoreError> {
        self.batches
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("batch", id))
    }

    pub fn count_users(&self, batch_id: Uuid) -> Result<usize, StoreError> {
        if !self.batches.contains_key(&batch_id) {
            return Err(StoreError::not_found("batch", batch_id));
        }
        Ok(self
            .users
            .values()
            .filter(|user| user.batch_id == batch_id)
            .count())
    }

    pub fn user(&self, id: Uuid) -> Result<User, StoreError> {
        self.users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    #[must_use]
    pub fn user_by_secret(&self, organization_id: Uuid, secret: &FieldElement) -> Option<User> {
        self.users
            .values()
            .find(|user| user.organization_id == organization_id && &user.user_secret == secret)
            .cloned()
    }

    fn check_version(&self, batch_id: Uuid, expected_version: u64) -> Result<(), StoreError> {
        let batch = self
            .batches
            .get(&batch_id)
            .ok_or_else(|| StoreError::not_found("batch", batch_id))?;
        if batch.version != expected_version {
            return Err(StoreError::VersionConflict {
                batch_id,
                expected: expected_version,
                actual: batch.version,
            });
        }
        Ok(())
    }

    fn apply_equation(&mut self, batch_id: Uuid, equation: Vec<String>) -> Result<Batch, StoreError> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::not_found("batch", batch_id))?;
        batch.equation = equation;
        batch.version += 1;
        batch.updated_at = Utc::now();
        Ok(batch.clone())
    }

    pub fn update_batch(
        &mut self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
    ) -> Result<Batch, StoreError> {
        self.check_version(batch_id, expected_version)?;
        self.apply_equation(batch_id, equation)
    }

    /// Checks that `user` can join `batch_id` without breaking uniqueness.
    fn check_new_user(&self, batch_id: Uuid, user: &User) -> Result<(), StoreError> {
        if user.batch_id != batch_id {
            return Err(StoreError::Corrupted {
                reason: format!(
                    "user {} references batch {} but is being committed to batch {}",
                    user.id, user.batch_id, batch_id
                ),
            });
        }
        if self.users.contains_key(&user.id) {
            return Err(StoreError::already_exists("user", user.id));
        }
        if let Some(existing) = self.user_by_secret(user.organization_id, &user.user_secret) {
            return Err(StoreError::DuplicateSecret {
                organization_id: user.organization_id,
                user_id: existing.id,
            });
        }
        Ok(())
    }

    pub fn insert_batch_and_user(
        &mut self,
        batch: Batch,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError> {
        if !self.organizations.contains_key(&batch.organization_id) {
            return Err(StoreError::not_found("organization", batch.organization_id));
        }
        if self.batches.contains_key(&batch.id) {
            return Err(StoreError::already_exists("batch", batch.id));
        }
        if user.organization_id != batch.organization_id {
            return Err(StoreError::Corrupted {
                reason: format!(
                    "user {} belongs to organization {} but batch {} to {}",
                    user.id, user.organization_id, batch.id, batch.organization_id
                ),
            });
        }
        self.check_new_user(batch.id, &user)?;

        let batch_id = batch.id;
        self.batches.insert(batch_id, batch);
        let stored = self.apply_equation(batch_id, equation)?;
        self.users.insert(user.id, user);
        Ok(stored)
    }

    pub fn write_batch_and_user(
        &mut self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError> {
        self.check_version(batch_id, expected_version)?;
        self.check_new_user(batch_id, &user)?;

        let batch = self.apply_equation(batch_id, equation)?;
        self.users.insert(user.id, user);
        Ok(batch)
    }

    pub fn write_batch_and_remove_user(
        &mut self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user_id: Uuid,
    ) -> Result<Batch, StoreError> {
        self.check_version(batch_id, expected_version)?;
        let user = self
            .users
            .get(&user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        if user.batch_id != batch_id {
            return Err(StoreError::Corrupted {
                reason: format!("user {user_id} is not a member of batch {batch_id}"),
            });
        }

        let batch = self.apply_equation(batch_id, equation)?;
        self.users.remove(&user_id);
        Ok(batch)
    }
}
