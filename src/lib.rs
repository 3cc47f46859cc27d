//! Batch-Polynomial Membership Engine
//!
//! Members of an organization are grouped into batches of up to
//! [`MAX_BATCH_SIZE`] users. Each batch is represented by a monic polynomial
//! over the BN254 scalar field whose roots are exactly the secrets of its
//! members, so a later membership proof only has to show knowledge of a root.
//!
//! # Components
//!
//! - [`field`]: modular arithmetic over the BN254 scalar field
//! - [`polynomial`]: root insertion, removal and verification
//! - [`secret`]: deterministic `(email, salt)` to field element derivation
//! - [`directory`]: batch lookup, creation and capacity tracking
//! - [`coordinator`]: the atomic create/remove member protocol
//! - [`store`]: the storage collaborator trait and its implementations
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use zkp_batch_membership::{
//!     CoordinatorSettings, InMemoryStore, MembershipCoordinator, MembershipStore,
//!     NewUserFields, Organization,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let org = Organization::new(
//!     "742d35cc6634c0532925a3b844bc454e4438f44e".to_string(),
//!     "00112233445566778899aabbccddeeff".to_string(),
//! );
//! store.insert_organization(org.clone()).unwrap();
//!
//! let coordinator = MembershipCoordinator::new(store, CoordinatorSettings::default());
//! let membership = coordinator
//!     .create_user_with_batch(&org.id.to_string(), "alice@example.com", NewUserFields::default())
//!     .unwrap();
//!
//! let poly = membership.batch.polynomial().unwrap();
//! assert!(poly.verify_root(&membership.user.user_secret));
//! ```

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod ethereum;
pub mod field;
pub mod polynomial;
pub mod secret;
pub mod store;
pub mod types;

pub use coordinator::{CoordinatorSettings, CreationState, MembershipCoordinator};
pub use directory::{BatchDirectory, BatchSlot};
pub use error::{ErrorKind, ErrorPayload, MembershipError, MembershipResult};
pub use field::{FieldElement, MODULUS_DECIMAL};
pub use polynomial::Polynomial;
pub use secret::derive_secret;
pub use store::{InMemoryStore, JsonFileStore, MembershipStore, StoreError};
pub use types::{Batch, Membership, MembershipResponse, NewUserFields, Organization, User};

/// Maximum number of members a single batch polynomial may hold, which is
/// also the maximum degree of any stored batch equation.
pub const MAX_BATCH_SIZE: usize = 128;
