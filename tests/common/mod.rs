//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use zkp_batch_membership::{
    store::StoreState, Batch, CoordinatorSettings, FieldElement, InMemoryStore,
    MembershipCoordinator, MembershipStore, NewUserFields, Organization, StoreError, User,
};

pub const ORG_WALLET: &str = "742d35cc6634c0532925a3b844bc454e4438f44e";
pub const ORG_SALT: &str = "00112233445566778899aabbccddeeff";

/// In-memory store whose individual operations can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    pub fail_commits: AtomicBool,
    pub fail_counts: AtomicBool,
    pub fail_lists: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StoreState {
        self.inner.snapshot()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: format!("injected {what} failure"),
            });
        }
        Ok(())
    }
}

impl MembershipStore for FlakyStore {
    fn read_organization(&self, id: Uuid) -> Result<Organization, StoreError> {
        self.inner.read_organization(id)
    }

    fn find_organization_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<Organization>, StoreError> {
        self.inner.find_organization_by_wallet(wallet)
    }

    fn insert_organization(&self, organization: Organization) -> Result<(), StoreError> {
        self.inner.insert_organization(organization)
    }

    fn list_batches(&self, organization_id: Uuid) -> Result<Vec<Batch>, StoreError> {
        Self::check(&self.fail_lists, "list")?;
        self.inner.list_batches(organization_id)
    }

    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError> {
        self.inner.insert_batch(batch)
    }

    fn read_batch(&self, id: Uuid) -> Result<Batch, StoreError> {
        self.inner.read_batch(id)
    }

    fn count_users(&self, batch_id: Uuid) -> Result<usize, StoreError> {
        Self::check(&self.fail_counts, "count")?;
        self.inner.count_users(batch_id)
    }

    fn update_batch(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
    ) -> Result<Batch, StoreError> {
        self.inner.update_batch(batch_id, expected_version, equation)
    }

    fn read_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.inner.read_user(id)
    }

    fn find_user_by_secret(
        &self,
        organization_id: Uuid,
        secret: &FieldElement,
    ) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_secret(organization_id, secret)
    }

    fn insert_batch_and_user(
        &self,
        batch: Batch,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError> {
        Self::check(&self.fail_commits, "commit")?;
        self.inner.insert_batch_and_user(batch, equation, user)
    }

    fn write_batch_and_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError> {
        Self::check(&self.fail_commits, "commit")?;
        self.inner
            .write_batch_and_user(batch_id, expected_version, equation, user)
    }

    fn write_batch_and_remove_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user_id: Uuid,
    ) -> Result<Batch, StoreError> {
        Self::check(&self.fail_commits, "commit")?;
        self.inner
            .write_batch_and_remove_user(batch_id, expected_version, equation, user_id)
    }
}

pub fn organization() -> Organization {
    Organization::new(ORG_WALLET.to_string(), ORG_SALT.to_string())
}

pub fn coordinator_with<S: MembershipStore>(
    store: Arc<S>,
    max_batch_size: usize,
    max_attempts: u32,
) -> (MembershipCoordinator<S>, Organization) {
    let org = organization();
    store
        .insert_organization(org.clone())
        .expect("Failed to insert organization");
    let settings = CoordinatorSettings {
        max_batch_size,
        max_attempts,
    };
    (MembershipCoordinator::new(store, settings), org)
}

pub fn email(i: usize) -> String {
    format!("member-{i:04}@example.com")
}

/// Adds `count` members with emails `offset..offset + count`.
pub fn fill<S: MembershipStore>(
    coordinator: &MembershipCoordinator<S>,
    org: &Organization,
    offset: usize,
    count: usize,
) -> Vec<User> {
    (offset..offset + count)
        .map(|i| {
            coordinator
                .create_user_with_batch(&org.id.to_string(), &email(i), NewUserFields::default())
                .unwrap_or_else(|e| panic!("Failed to add member {i}: {e}"))
                .user
        })
        .collect()
}
