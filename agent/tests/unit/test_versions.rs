//! Version store unit tests

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use bvagent::errors::AgentError;
use bvagent::filesys::file::File;
use bvagent::models::service::ServiceName;
use bvagent::storage::layout::StorageLayout;
use bvagent::storage::versions::VersionStore;

#[tokio::test]
async fn test_saved_versions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(dir.path());

    let store = VersionStore::open(layout.versions_file()).await;
    assert_ok!(store.save(ServiceName::Device, "sha256:v2").await);
    assert_ok!(store.save(ServiceName::Agent, "sha256:a1").await);
    drop(store);

    let reopened = VersionStore::open(layout.versions_file()).await;
    assert_eq!(reopened.get(ServiceName::Device).await.as_deref(), Some("sha256:v2"));
    assert_eq!(reopened.get(ServiceName::Agent).await.as_deref(), Some("sha256:a1"));
}

#[tokio::test]
async fn test_record_keeps_service_name_keys() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("versions.json"));

    let store = VersionStore::open(file.clone()).await;
    store.save(ServiceName::Device, "sha256:d").await.unwrap();

    let raw: serde_json::Value = file.read_json().await.unwrap();
    assert_eq!(raw["device"], "sha256:d");
    assert!(raw["agent"].is_null());
}

#[tokio::test]
async fn test_no_temp_files_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = VersionStore::open(File::new(dir.path().join("versions.json"))).await;

    for i in 0..5 {
        store
            .save(ServiceName::Device, &format!("sha256:v{}", i))
            .await
            .unwrap();
    }

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names, vec!["versions.json".to_string()]);
}

#[tokio::test]
async fn test_failed_save_leaves_memory_untouched() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the state directory should be
    let blocker = dir.path().join("state");
    tokio::fs::write(&blocker, b"not a directory").await.unwrap();

    let store = VersionStore::open(File::new(blocker.join("versions.json"))).await;
    let err = assert_err!(store.save(ServiceName::Device, "sha256:v2").await);

    assert!(matches!(err, AgentError::StorageError(_)));
    assert_eq!(store.get(ServiceName::Device).await, None);
}

#[tokio::test]
async fn test_concurrent_saves_are_all_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("versions.json"));
    let store = Arc::new(VersionStore::open(file.clone()).await);

    let agent = {
        let store = store.clone();
        tokio::spawn(async move { store.save(ServiceName::Agent, "sha256:a").await })
    };
    let device = {
        let store = store.clone();
        tokio::spawn(async move { store.save(ServiceName::Device, "sha256:d").await })
    };
    assert_ok!(agent.await.unwrap());
    assert_ok!(device.await.unwrap());

    let reopened = VersionStore::open(file).await;
    let versions = reopened.load().await;
    assert_eq!(versions[&ServiceName::Agent].as_deref(), Some("sha256:a"));
    assert_eq!(versions[&ServiceName::Device].as_deref(), Some("sha256:d"));
}
