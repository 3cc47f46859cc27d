//! Orchestration of member creation and removal.
//!
//! A creation request moves through
//! `Start -> SecretDerived -> BatchSelected -> PolynomialUpdated -> Committed`,
//! or ends in `Aborted`. The batch equation and the new user record are
//! committed together in one store call guarded by the batch version, so a
//! user is never visible without its secret being a root of its batch, and a
//! concurrent writer can never be silently overwritten.

use crate::directory::{BatchDirectory, BatchSlot};
use crate::error::{MembershipError, MembershipResult};
use crate::ethereum::OrganizationRef;
use crate::field::FieldElement;
use crate::polynomial::Polynomial;
use crate::secret::{derive_secret, reference_hash};
use crate::store::{MembershipStore, StoreError};
use crate::types::{Batch, Membership, MembershipResponse, NewUserFields, Organization, User};
use crate::MAX_BATCH_SIZE;
use chrono::Utc;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub max_batch_size: usize,
    pub max_attempts: u32,
}

impl CoordinatorSettings {
    /// Caps the batch size at [`MAX_BATCH_SIZE`] and raises zero values to 1.
    #[must_use]
    pub fn normalized(self) -> Self {
        let normalized = Self {
            max_batch_size: self.max_batch_size.clamp(1, MAX_BATCH_SIZE),
            max_attempts: self.max_attempts.max(1),
        };
        if normalized != self {
            warn!("Coordinator settings {self:?} adjusted to {normalized:?}");
        }
        normalized
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    Start,
    SecretDerived,
    BatchSelected,
    PolynomialUpdated,
    Committed,
    Aborted,
}

impl fmt::Display for CreationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-request state, kept only for the duration of one call.
struct CreationTracker {
    request: String,
    state: CreationState,
}

impl CreationTracker {
    fn new(org_ref: &str) -> Self {
        Self {
            request: org_ref.trim().to_string(),
            state: CreationState::Start,
        }
    }

    fn advance(&mut self, next: CreationState) {
        debug!("Membership request for {}: {} -> {}", self.request, self.state, next);
        self.state = next;
    }

    fn abort(&mut self, err: &MembershipError) {
        warn!(
            "Membership request for {} aborted in state {}: {} ({})",
            self.request,
            self.state,
            err,
            err.kind()
        );
        self.state = CreationState::Aborted;
    }
}

pub struct MembershipCoordinator<S: MembershipStore + ?Sized> {
    store: Arc<S>,
    settings: CoordinatorSettings,
}

impl<S: MembershipStore + ?Sized> MembershipCoordinator<S> {
    /// Settings outside the supported range are normalized, so no batch can
    /// be configured past [`MAX_BATCH_SIZE`] members.
    pub fn new(store: Arc<S>, settings: CoordinatorSettings) -> Self {
        Self {
            store,
            settings: settings.normalized(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> CoordinatorSettings {
        self.settings
    }

    fn directory(&self) -> BatchDirectory<'_, S> {
        BatchDirectory::new(&*self.store, self.settings.max_batch_size)
    }

    /// Resolves an organization id or wallet address to its record.
    ///
    /// An unknown organization has no salt to derive secrets from, so it is
    /// reported as `InvalidSecretParameters`.
    pub fn resolve_organization(&self, org_ref: &str) -> MembershipResult<Organization> {
        let reference = OrganizationRef::parse(org_ref)
            .map_err(|e| MembershipError::invalid_parameters(format!("{e:#}")))?;

        let found = match &reference {
            OrganizationRef::Id(id) => match self.store.read_organization(*id) {
                Ok(org) => Some(org),
                Err(e) if e.is_not_found() => None,
                Err(e) => {
                    return Err(MembershipError::database(
                        format!("could not read organization {reference}"),
                        e,
                    ))
                }
            },
            OrganizationRef::Wallet(wallet) => {
                self.store.find_organization_by_wallet(wallet).map_err(|e| {
                    MembershipError::database(format!("could not read organization {reference}"), e)
                })?
            }
        };

        found.ok_or_else(|| {
            MembershipError::invalid_parameters(format!(
                "organization {reference} not found, no salt available"
            ))
        })
    }

    /// Creates a user and places their secret into a batch with spare capacity.
    pub fn create_user_with_batch(
        &self,
        org_ref: &str,
        email: &str,
        fields: NewUserFields,
    ) -> MembershipResult<Membership> {
        let mut tracker = CreationTracker::new(org_ref);
        let result = self.run_creation(&mut tracker, org_ref, email, &fields);

        match &result {
            Ok(membership) => info!(
                "Created user {} in batch {} ({} members)",
                membership.user.id,
                membership.batch.id,
                membership.batch.equation.len() - 1
            ),
            Err(err) => tracker.abort(err),
        }
        result
    }

    /// Same as [`create_user_with_batch`](Self::create_user_with_batch), in
    /// the serializable form handed back to the request layer.
    pub fn handle_create_request(
        &self,
        org_ref: &str,
        email: &str,
        fields: NewUserFields,
    ) -> MembershipResponse {
        self.create_user_with_batch(org_ref, email, fields).into()
    }

    fn run_creation(
        &self,
        tracker: &mut CreationTracker,
        org_ref: &str,
        email: &str,
        fields: &NewUserFields,
    ) -> MembershipResult<Membership> {
        let organization = self.resolve_organization(org_ref)?;
        let secret = derive_secret(email, &organization.salt)?;
        tracker.advance(CreationState::SecretDerived);

        let existing = self
            .store
            .find_user_by_secret(organization.id, &secret)
            .map_err(|e| MembershipError::database("could not check for an existing member", e))?;
        if let Some(existing) = existing {
            return Err(MembershipError::DuplicateMember {
                organization_id: organization.id,
                user_id: existing.id,
            });
        }

        let directory = self.directory();
        let mut attempt = 1;
        loop {
            let slot = directory.select_batch(organization.id)?;
            let batch_id = slot.batch().id;
            tracker.advance(CreationState::BatchSelected);

            match self.commit_new_member(&directory, tracker, slot, &organization, &secret, fields) {
                Ok(membership) => return Ok(membership),
                Err(err) if err.is_retryable() && attempt < self.settings.max_attempts => {
                    warn!(
                        "Attempt {}/{} for {} lost a race on batch {}: {}",
                        attempt, self.settings.max_attempts, tracker.request, batch_id, err
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn commit_new_member(
        &self,
        directory: &BatchDirectory<'_, S>,
        tracker: &mut CreationTracker,
        slot: BatchSlot,
        organization: &Organization,
        secret: &FieldElement,
        fields: &NewUserFields,
    ) -> MembershipResult<Membership> {
        let (batch, fresh) = match slot {
            BatchSlot::Existing(selected) => (self.read_batch(selected.id)?, false),
            BatchSlot::Fresh(batch) => (batch, true),
        };
        let polynomial = decode_equation(&batch)?;
        let members = if fresh {
            0
        } else {
            directory.member_count(batch.id)?
        };

        if members >= directory.capacity() {
            return Err(MembershipError::BatchCapacityExceeded {
                batch_id: batch.id,
                members,
                capacity: directory.capacity(),
            });
        }
        if polynomial.member_count() != members || !polynomial.is_monic() {
            return Err(self.out_of_sync(&batch, &polynomial, members));
        }

        let updated = polynomial.add_root(secret);
        if updated.member_count() != members + 1
            || !updated.is_monic()
            || !updated.verify_root(secret)
        {
            return Err(MembershipError::polynomial(
                format!("adding a root to batch {} produced an invalid equation", batch.id),
                Some(batch.id),
            ));
        }
        tracker.advance(CreationState::PolynomialUpdated);

        let reference_number = fields
            .reference_number
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let user = User {
            id: Uuid::new_v4(),
            organization_id: organization.id,
            batch_id: batch.id,
            user_secret: secret.clone(),
            balance: fields.balance.unwrap_or(0),
            reference_hash: reference_number.as_deref().map(reference_hash),
            reference_number,
            created_at: Utc::now(),
        };

        let equation = updated.to_decimal_strings();
        let written = if fresh {
            self.store
                .insert_batch_and_user(batch.clone(), equation, user.clone())
        } else {
            self.store
                .write_batch_and_user(batch.id, batch.version, equation, user.clone())
        };
        let committed = written.map_err(|e| match e {
            StoreError::DuplicateSecret {
                organization_id,
                user_id,
            } => MembershipError::DuplicateMember {
                organization_id,
                user_id,
            },
            other => MembershipError::database(
                format!("could not commit member to batch {}", batch.id),
                other,
            ),
        })?;
        if fresh {
            info!(
                "Created batch {} for organization {}",
                committed.id, organization.id
            );
        }
        tracker.advance(CreationState::Committed);

        Ok(Membership {
            user,
            batch: committed,
        })
    }

    /// Degree and member count disagree. If the batch moved since it was
    /// read, that is a race with another writer and worth retrying; otherwise
    /// the stored equation really is inconsistent.
    fn out_of_sync(&self, batch: &Batch, polynomial: &Polynomial, members: usize) -> MembershipError {
        match self.store.read_batch(batch.id) {
            Ok(current) if current.version != batch.version => MembershipError::database(
                format!("batch {} changed while it was being read", batch.id),
                StoreError::VersionConflict {
                    batch_id: batch.id,
                    expected: batch.version,
                    actual: current.version,
                },
            ),
            _ => MembershipError::polynomial(
                format!(
                    "batch {} equation has degree {} but {} members are recorded",
                    batch.id,
                    polynomial.degree(),
                    members
                ),
                Some(batch.id),
            ),
        }
    }

    fn read_batch(&self, batch_id: Uuid) -> MembershipResult<Batch> {
        self.store
            .read_batch(batch_id)
            .map_err(|e| MembershipError::database(format!("could not read batch {batch_id}"), e))
    }

    fn read_user(&self, user_id: Uuid) -> MembershipResult<User> {
        self.store
            .read_user(user_id)
            .map_err(|e| MembershipError::database(format!("could not read user {user_id}"), e))
    }

    /// Removes a user and divides their secret out of the batch equation.
    ///
    /// Returns the updated batch.
    pub fn remove_user(&self, user_id: Uuid) -> MembershipResult<Batch> {
        let user = self.read_user(user_id)?;
        let mut attempt = 1;
        loop {
            let batch = self.read_batch(user.batch_id)?;
            let polynomial = decode_equation(&batch)?;
            let reduced = polynomial.remove_root(&user.user_secret).ok_or_else(|| {
                MembershipError::polynomial(
                    format!("secret of user {} is not a root of batch {}", user.id, batch.id),
                    Some(batch.id),
                )
            })?;

            match self.store.write_batch_and_remove_user(
                batch.id,
                batch.version,
                reduced.to_decimal_strings(),
                user.id,
            ) {
                Ok(updated) => {
                    info!("Removed user {} from batch {}", user.id, updated.id);
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() && attempt < self.settings.max_attempts => {
                    warn!("Removal of user {} raced on batch {}: {}", user.id, batch.id, e);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(MembershipError::database(
                        format!("could not remove user {} from batch {}", user.id, batch.id),
                        e,
                    ))
                }
            }
        }
    }

    /// True iff the user's secret is a root of their batch equation.
    pub fn verify_membership(&self, user_id: Uuid) -> MembershipResult<bool> {
        let user = self.read_user(user_id)?;
        let batch = self.read_batch(user.batch_id)?;
        let polynomial = decode_equation(&batch)?;
        Ok(polynomial.verify_root(&user.user_secret))
    }

    /// Looks up the member registered under `email`, if any.
    pub fn find_member(&self, org_ref: &str, email: &str) -> MembershipResult<Option<User>> {
        let organization = self.resolve_organization(org_ref)?;
        let secret = derive_secret(email, &organization.salt)?;
        self.store
            .find_user_by_secret(organization.id, &secret)
            .map_err(|e| MembershipError::database("could not look up member", e))
    }
}

fn decode_equation(batch: &Batch) -> MembershipResult<Polynomial> {
    batch.polynomial().map_err(|e| {
        MembershipError::polynomial(
            format!("stored equation of batch {} is invalid: {e}", batch.id),
            Some(batch.id),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::InMemoryStore;

    const WALLET: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    fn setup(max_batch_size: usize) -> (MembershipCoordinator<InMemoryStore>, Organization) {
        let store = Arc::new(InMemoryStore::new());
        let org = Organization::new(
            "742d35cc6634c0532925a3b844bc454e4438f44e".to_string(),
            "00112233445566778899aabbccddeeff".to_string(),
        );
        store.insert_organization(org.clone()).unwrap();
        let settings = CoordinatorSettings {
            max_batch_size,
            max_attempts: 3,
        };
        (MembershipCoordinator::new(store, settings), org)
    }

    #[test]
    fn test_first_member_creates_batch() {
        let (coordinator, org) = setup(128);
        let membership = coordinator
            .create_user_with_batch(&org.id.to_string(), "alice@example.com", NewUserFields::default())
            .unwrap();

        let secret = derive_secret("alice@example.com", &org.salt).unwrap();
        assert_eq!(membership.user.user_secret, secret);
        assert_eq!(membership.batch.version, 1);

        let poly = membership.batch.polynomial().unwrap();
        assert_eq!(poly, Polynomial::empty_batch().add_root(&secret));
        assert!(poly.verify_root(&secret));
    }

    #[test]
    fn test_wallet_reference_resolves() {
        let (coordinator, _) = setup(128);
        let membership = coordinator
            .create_user_with_batch(WALLET, "bob@example.com", NewUserFields::default())
            .unwrap();
        assert!(coordinator.verify_membership(membership.user.id).unwrap());
    }

    #[test]
    fn test_unknown_organization() {
        let (coordinator, _) = setup(128);
        let err = coordinator
            .create_user_with_batch(&Uuid::new_v4().to_string(), "x@example.com", NewUserFields::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSecretParameters);
    }

    #[test]
    fn test_empty_email_aborts_without_batch() {
        let (coordinator, org) = setup(128);
        let err = coordinator
            .create_user_with_batch(&org.id.to_string(), "  ", NewUserFields::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSecretParameters);
        assert!(coordinator.store().list_batches(org.id).unwrap().is_empty());
    }

    #[test]
    fn test_reference_number_is_hashed() {
        let (coordinator, org) = setup(128);
        let fields = NewUserFields {
            balance: Some(250),
            reference_number: Some(" INV-42 ".to_string()),
        };
        let membership = coordinator
            .create_user_with_batch(&org.id.to_string(), "carol@example.com", fields)
            .unwrap();
        assert_eq!(membership.user.balance, 250);
        assert_eq!(membership.user.reference_number.as_deref(), Some("INV-42"));
        assert_eq!(membership.user.reference_hash, Some(reference_hash("INV-42")));
    }

    #[test]
    fn test_rollover_to_new_batch() {
        let (coordinator, org) = setup(2);
        let org_ref = org.id.to_string();
        let first = coordinator
            .create_user_with_batch(&org_ref, "a@example.com", NewUserFields::default())
            .unwrap();
        let second = coordinator
            .create_user_with_batch(&org_ref, "b@example.com", NewUserFields::default())
            .unwrap();
        let third = coordinator
            .create_user_with_batch(&org_ref, "c@example.com", NewUserFields::default())
            .unwrap();

        assert_eq!(first.batch.id, second.batch.id);
        assert_ne!(second.batch.id, third.batch.id);
        assert_eq!(third.batch.polynomial().unwrap().degree(), 1);
    }

    #[test]
    fn test_remove_user_restores_equation() {
        let (coordinator, org) = setup(128);
        let org_ref = org.id.to_string();
        let alice = coordinator
            .create_user_with_batch(&org_ref, "alice@example.com", NewUserFields::default())
            .unwrap();
        let before_bob = alice.batch.polynomial().unwrap();
        let bob = coordinator
            .create_user_with_batch(&org_ref, "bob@example.com", NewUserFields::default())
            .unwrap();

        let batch = coordinator.remove_user(bob.user.id).unwrap();
        assert_eq!(batch.polynomial().unwrap(), before_bob);
        assert!(coordinator.verify_membership(alice.user.id).unwrap());
        assert!(coordinator.store().read_user(bob.user.id).is_err());
    }

    #[test]
    fn test_settings_are_capped_at_max_batch_size() {
        let store = Arc::new(InMemoryStore::new());
        let settings = CoordinatorSettings {
            max_batch_size: 200,
            max_attempts: 0,
        };
        let coordinator = MembershipCoordinator::new(store, settings);
        assert_eq!(coordinator.settings().max_batch_size, MAX_BATCH_SIZE);
        assert_eq!(coordinator.settings().max_attempts, 1);
        assert_eq!(CoordinatorSettings::default().normalized(), CoordinatorSettings::default());
    }

    #[test]
    fn test_find_member_by_email() {
        let (coordinator, org) = setup(128);
        let org_ref = org.id.to_string();
        let created = coordinator
            .create_user_with_batch(&org_ref, "dave@example.com", NewUserFields::default())
            .unwrap();

        let found = coordinator.find_member(&org_ref, "dave@example.com").unwrap();
        assert_eq!(found.map(|u| u.id), Some(created.user.id));
        assert!(coordinator
            .find_member(&org_ref, "nobody@example.com")
            .unwrap()
            .is_none());
    }
}
