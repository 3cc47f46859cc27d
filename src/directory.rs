//! Batch lookup, creation and capacity tracking.
//!
//! Capacity checks here are advisory. The coordinator repeats the check
//! against a freshly read batch and commits with a version guard, which is
//! what actually keeps a batch at or below its capacity.

use crate::error::{MembershipError, MembershipResult};
use crate::polynomial::Polynomial;
use crate::store::MembershipStore;
use crate::types::Batch;
use crate::MAX_BATCH_SIZE;
use log::{debug, info};
use uuid::Uuid;

/// Where a new member goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSlot {
    /// A stored batch that had spare capacity when it was listed.
    Existing(Batch),
    /// A `[1]` batch not yet stored. It is written together with its first
    /// member, so an aborted request leaves no empty batch behind.
    Fresh(Batch),
}

impl BatchSlot {
    #[must_use]
    pub fn batch(&self) -> &Batch {
        match self {
            Self::Existing(batch) | Self::Fresh(batch) => batch,
        }
    }
}

pub struct BatchDirectory<'a, S: MembershipStore + ?Sized> {
    store: &'a S,
    capacity: usize,
}

impl<'a, S: MembershipStore + ?Sized> BatchDirectory<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.clamp(1, MAX_BATCH_SIZE),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a batch of `organization_id` with spare capacity, if any.
    ///
    /// Among several candidates the most recently created one wins, so older
    /// batches fill up and stay full instead of being topped up one by one.
    pub fn find_available_batch(&self, organization_id: Uuid) -> MembershipResult<Option<Batch>> {
        let mut batches = self.store.list_batches(organization_id).map_err(|e| {
            MembershipError::batch_assignment(
                format!("could not list batches of organization {organization_id}"),
                e,
            )
        })?;
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for batch in batches {
            let members = self.store.count_users(batch.id).map_err(|e| {
                MembershipError::batch_assignment(
                    format!("could not count members of batch {}", batch.id),
                    e,
                )
            })?;
            if members < self.capacity {
                debug!(
                    "Batch {} has capacity ({}/{})",
                    batch.id, members, self.capacity
                );
                return Ok(Some(batch));
            }
        }

        debug!("No batch with spare capacity for organization {organization_id}");
        Ok(None)
    }

    /// Creates an empty batch whose equation is `[1]`.
    pub fn create_batch(&self, organization_id: Uuid) -> MembershipResult<Batch> {
        let batch = Batch::new(organization_id);
        self.store.insert_batch(batch.clone()).map_err(|e| {
            MembershipError::batch_assignment(
                format!("could not create a batch for organization {organization_id}"),
                e,
            )
        })?;
        info!("Created batch {} for organization {}", batch.id, organization_id);
        Ok(batch)
    }

    /// Finds a batch with spare capacity, or prepares an unsaved one.
    pub fn select_batch(&self, organization_id: Uuid) -> MembershipResult<BatchSlot> {
        match self.find_available_batch(organization_id)? {
            Some(batch) => Ok(BatchSlot::Existing(batch)),
            None => {
                let batch = Batch::new(organization_id);
                debug!(
                    "Prepared batch {} for organization {}",
                    batch.id, organization_id
                );
                Ok(BatchSlot::Fresh(batch))
            }
        }
    }

    pub fn member_count(&self, batch_id: Uuid) -> MembershipResult<usize> {
        self.store.count_users(batch_id).map_err(|e| {
            MembershipError::database(format!("could not count members of batch {batch_id}"), e)
        })
    }

    pub fn has_capacity(&self, batch_id: Uuid) -> MembershipResult<bool> {
        Ok(self.member_count(batch_id)? < self.capacity)
    }

    /// Persists `polynomial` as the batch equation, guarded by `expected_version`.
    pub fn update_equation(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        polynomial: &Polynomial,
    ) -> MembershipResult<Batch> {
        self.store
            .update_batch(batch_id, expected_version, polynomial.to_decimal_strings())
            .map_err(|e| {
                MembershipError::database(format!("could not update equation of batch {batch_id}"), e)
            })
    }
}
