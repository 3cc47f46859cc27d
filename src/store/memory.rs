use super::{MembershipStore, StoreError, StoreState};
use crate::field::FieldElement;
use crate::types::{Batch, Organization, User};
use parking_lot::RwLock;
use uuid::Uuid;

/// Process-local store. Each write holds the lock for its whole
/// check-and-apply sequence, which makes the paired writes atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }
}

impl MembershipStore for InMemoryStore {
    fn read_organization(&self, id: Uuid) -> Result<Organization, StoreError> {
        self.state.read().organization(id)
    }

    fn find_organization_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<Organization>, StoreError> {
        Ok(self.state.read().organization_by_wallet(wallet))
    }

    fn insert_organization(&self, organization: Organization) -> Result<(), StoreError> {
        self.state.write().insert_organization(organization)
    }

    fn list_batches(&self, organization_id: Uuid) -> Result<Vec<Batch>, StoreError> {
        Ok(self.state.read().batches_for(organization_id))
    }

    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError> {
        self.state.write().insert_batch(batch)
    }

    fn read_batch(&self, id: Uuid) -> Result<Batch, StoreError> {
        self.state.read().batch(id)
    }

    fn count_users(&self, batch_id: Uuid) -> Result<usize, StoreError> {
        self.state.read().count_users(batch_id)
    }

    fn update_batch(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
    ) -> Result<Batch, StoreError> {
        self.state
            .write()
            .update_batch(batch_id, expected_version, equation)
    }

    fn read_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.state.read().user(id)
    }

    fn find_user_by_secret(
        &self,
        organization_id: Uuid,
        secret: &FieldElement,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().user_by_secret(organization_id, secret))
    }

    fn insert_batch_and_user(
        &self,
        batch: Batch,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError> {
        self.state.write().insert_batch_and_user(batch, equation, user)
    }

    fn write_batch_and_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError> {
        self.state
            .write()
            .write_batch_and_user(batch_id, expected_version, equation, user)
    }

    fn write_batch_and_remove_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user_id: Uuid,
    ) -> Result<Batch, StoreError> {
        self.state
            .write()
            .write_batch_and_remove_user(batch_id, expected_version, equation, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Barrier;
    use std::thread;

    fn seeded() -> (InMemoryStore, Batch) {
        let store = InMemoryStore::new();
        let org = Organization::new("cd".repeat(20), "salt".to_string());
        store.insert_organization(org.clone()).unwrap();
        let batch = Batch::new(org.id);
        store.insert_batch(batch.clone()).unwrap();
        (store, batch)
    }

    fn member(batch: &Batch, secret: u64) -> User {
        User {
            id: Uuid::new_v4(),
            organization_id: batch.organization_id,
            batch_id: batch.id,
            user_secret: FieldElement::from_u64(secret),
            balance: 0,
            reference_number: None,
            reference_hash: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_from_state_restores_snapshot() {
        let (store, batch) = seeded();
        store
            .write_batch_and_user(batch.id, 0, vec!["0".into(), "1".into()], member(&batch, 0))
            .unwrap();

        let restored = InMemoryStore::from_state(store.snapshot());
        assert_eq!(restored.read_batch(batch.id).unwrap().version, 1);
        assert_eq!(restored.count_users(batch.id).unwrap(), 1);
    }

    #[test]
    fn test_only_one_writer_wins_a_version() {
        const WRITERS: u64 = 8;
        let (store, batch) = seeded();
        let barrier = Barrier::new(WRITERS as usize);

        let wins = thread::scope(|s| {
            let handles: Vec<_> = (1..=WRITERS)
                .map(|secret| {
                    let (store, barrier, batch) = (&store, &barrier, &batch);
                    s.spawn(move || {
                        barrier.wait();
                        store
                            .write_batch_and_user(
                                batch.id,
                                0,
                                vec![secret.to_string(), "1".into()],
                                member(batch, secret),
                            )
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(wins, 1);
        assert_eq!(store.read_batch(batch.id).unwrap().version, 1);
        assert_eq!(store.count_users(batch.id).unwrap(), 1);
    }
}
