mod common;

use common::{coordinator_with, email, fill};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use zkp_batch_membership::{
    CoordinatorSettings, ErrorKind, JsonFileStore, MembershipCoordinator, MembershipStore,
    NewUserFields, StoreError,
};

#[test]
fn test_members_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let (org, users) = {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let (coordinator, org) = coordinator_with(store, 3, 5);
        let users = fill(&coordinator, &org, 0, 5);
        (org, users)
    };
    assert!(path.exists());

    let reopened = Arc::new(JsonFileStore::open(&path).unwrap());
    assert_eq!(reopened.read_organization(org.id).unwrap(), org);
    assert_eq!(reopened.list_batches(org.id).unwrap().len(), 2);

    let coordinator = MembershipCoordinator::new(Arc::clone(&reopened), CoordinatorSettings {
        max_batch_size: 3,
        max_attempts: 5,
    });
    for user in &users {
        assert_eq!(&reopened.read_user(user.id).unwrap(), user);
        assert!(coordinator.verify_membership(user.id).unwrap());
    }

    let next = coordinator
        .create_user_with_batch(&org.id.to_string(), &email(5), NewUserFields::default())
        .unwrap();
    assert_eq!(next.batch.polynomial().unwrap().degree(), 3);
}

#[test]
fn test_equation_is_stored_as_decimal_strings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let (coordinator, org) = coordinator_with(store, 128, 5);
    let membership = fill(&coordinator, &org, 0, 1).remove(0);

    let document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let batch = &document["batches"][membership.batch_id.to_string()];
    let equation = batch["equation"].as_array().unwrap();
    assert_eq!(equation.len(), 2);
    assert!(equation
        .iter()
        .all(|c| c.as_str().unwrap().chars().all(|ch| ch.is_ascii_digit())));
    assert_eq!(equation[1], "1");
    assert_eq!(batch["version"], 1);

    let user = &document["users"][membership.id.to_string()];
    assert_eq!(user["userSecret"], membership.user_secret.to_decimal());
    assert!(user.get("email").is_none());
}

#[test]
fn test_version_conflict_leaves_file_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let (coordinator, org) = coordinator_with(Arc::clone(&store), 128, 5);
    let member = fill(&coordinator, &org, 0, 1).remove(0);

    let before = fs::read_to_string(&path).unwrap();
    let stale = store.read_batch(member.batch_id).unwrap().version - 1;
    let err = store
        .update_batch(member.batch_id, stale, vec!["1".to_string()])
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));
    assert!(err.is_conflict());
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn test_corrupted_file_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    fs::write(&path, "{ not json").unwrap();

    let err = JsonFileStore::open(&path).unwrap_err();
    assert!(matches!(err, StoreError::Serialization(_)));
}

#[test]
fn test_missing_file_opens_empty_without_writing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("store.json");

    let store = JsonFileStore::open(&path).unwrap();
    assert!(store.snapshot().organizations.is_empty());
    assert!(!path.exists());
    assert_eq!(store.path(), path.as_path());
}

#[test]
fn test_two_handles_on_one_file_keep_every_member() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let first = Arc::new(JsonFileStore::open(&path).unwrap());
    let (coordinator_a, org) = coordinator_with(Arc::clone(&first), 128, 5);
    fill(&coordinator_a, &org, 0, 1);

    let second = Arc::new(JsonFileStore::open(&path).unwrap());
    let coordinator_b = MembershipCoordinator::new(Arc::clone(&second), CoordinatorSettings {
        max_batch_size: 128,
        max_attempts: 5,
    });

    fill(&coordinator_a, &org, 1, 1);
    // The second handle still sees the batch at version 1 and must retry.
    fill(&coordinator_b, &org, 2, 1);
    assert!(path.with_file_name("store.json.lock").exists());

    let reopened = Arc::new(JsonFileStore::open(&path).unwrap());
    let state = reopened.snapshot();
    assert_eq!(state.users.len(), 3);
    let batches = reopened.list_batches(org.id).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].version, 3);
    assert_eq!(batches[0].polynomial().unwrap().degree(), 3);

    let coordinator = MembershipCoordinator::new(Arc::clone(&reopened), CoordinatorSettings {
        max_batch_size: 128,
        max_attempts: 5,
    });
    for user in state.users.values() {
        assert!(coordinator.verify_membership(user.id).unwrap());
    }
}

#[test]
fn test_stale_handle_rejects_duplicate_written_elsewhere() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let first = Arc::new(JsonFileStore::open(&path).unwrap());
    let (coordinator_a, org) = coordinator_with(Arc::clone(&first), 128, 5);
    fill(&coordinator_a, &org, 0, 1);

    let second = Arc::new(JsonFileStore::open(&path).unwrap());
    let coordinator_b = MembershipCoordinator::new(Arc::clone(&second), CoordinatorSettings {
        max_batch_size: 128,
        max_attempts: 5,
    });
    let taken = fill(&coordinator_a, &org, 1, 1).remove(0);

    let err = coordinator_b
        .create_user_with_batch(&org.id.to_string(), &email(1), NewUserFields::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateMember);
    assert_eq!(err.details().unwrap()["userId"], serde_json::json!(taken.id));
    assert_eq!(JsonFileStore::open(&path).unwrap().snapshot().users.len(), 2);
}
