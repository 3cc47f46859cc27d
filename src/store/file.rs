use super::{MembershipStore, StoreError, StoreState};
use crate::field::FieldElement;
use crate::types::{Batch, Organization, User};
use fs2::FileExt;
use log::{debug, info};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Store persisted as a single JSON document.
///
/// Every mutation holds an exclusive OS lock on a sibling `.lock` file,
/// re-reads the document from disk, applies the change, writes it to a
/// temporary file and renames that over the original. Several handles or
/// processes can share one path: a write based on a stale read fails the
/// batch version check instead of overwriting the other writer's commit.
/// Reads are served from the copy refreshed by the last mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = Self::load(&path)?;
        if path.exists() {
            info!(
                "Loaded store {} ({} organizations, {} batches, {} users)",
                path.display(),
                state.organizations.len(),
                state.batches.len(),
                state.users.len()
            );
        } else {
            debug!("Store file {} does not exist, starting empty", path.display());
        }

        Ok(Self {
            lock_path: sibling(&path, ".lock"),
            path,
            state: RwLock::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }

    fn load(path: &Path) -> Result<StoreState, StoreError> {
        if !path.exists() {
            return Ok(StoreState::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Blocks until this process holds the exclusive lock for the store.
    fn lock(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        file.lock_exclusive()?;
        debug!("Acquired store lock {}", self.lock_path.display());
        Ok(file)
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let tmp_path = sibling(&self.path, ".tmp");
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&tmp_path, content)?;
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        debug!("Persisted store to {}", self.path.display());
        Ok(())
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.write();
        let lock = self.lock()?;

        let mut next = Self::load(&self.path)?;
        *guard = next.clone();
        let value = apply(&mut next)?;
        self.persist(&next)?;
        *guard = next;

        FileExt::unlock(&lock)?;
        Ok(value)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl MembershipStore for JsonFileStore {
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
        self.mutate(|state| state.insert_organization(organization))
    }

    fn list_batches(&self, organization_id: Uuid) -> Result<Vec<Batch>, StoreError> {
        Ok(self.state.read().batches_for(organization_id))
    }

    fn insert_batch(&self, batch: Batch) -> Result<(), StoreError> {
        self.mutate(|state| state.insert_batch(batch))
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
        self.mutate(|state| state.update_batch(batch_id, expected_version, equation))
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
        self.mutate(|state| state.insert_batch_and_user(batch, equation, user))
    }

    fn write_batch_and_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user: User,
    ) -> Result<Batch, StoreError> {
        self.mutate(|state| state.write_batch_and_user(batch_id, expected_version, equation, user))
    }

    fn write_batch_and_remove_user(
        &self,
        batch_id: Uuid,
        expected_version: u64,
        equation: Vec<String>,
        user_id: Uuid,
    ) -> Result<Batch, StoreError> {
        self.mutate(|state| {
            state.write_batch_and_remove_user(batch_id, expected_version, equation, user_id)
        })
    }
}
