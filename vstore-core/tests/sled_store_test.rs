//! Version manager on the sled-backed store

mod common;

use std::sync::Arc;

use common::{alice, checkin, init_tracing, versioned, TestNode, Workspace};
use tempfile::TempDir;
use vstore_core::{BroadcastDispatcher, VersionError, VersionManager, VersionManagerConfig};

fn config(dir: &TempDir) -> VersionManagerConfig {
    VersionManagerConfig {
        storage_path: Some(dir.path().to_path_buf()),
        ..VersionManagerConfig::default()
    }
}

async fn open(dir: &TempDir) -> Arc<VersionManager> {
    VersionManager::open_on_disk(config(dir), Arc::new(BroadcastDispatcher::default()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_histories_survive_reopen() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let ws = Workspace::new();
    let mut node = TestNode::new(&ws);

    let (history_id, v1, activity) = {
        let manager = open(&temp_dir).await;
        let history_id = versioned(&manager, &mut node).await;
        let activity = manager.create_activity(&alice(), "release").await.unwrap();
        let v1 = checkin(&manager, &mut node).await;
        manager
            .set_version_label(&alice(), history_id, Some("1.0"), "stable", false)
            .await
            .unwrap();
        manager.close().await.unwrap();
        (history_id, v1, activity)
    };

    let manager = open(&temp_dir).await;
    let history = manager.get_version_history(history_id).await.unwrap();
    assert_eq!(history.version_id_by_label("stable"), Some(v1));
    assert_eq!(history.latest_version_id(), v1);
    assert_eq!(manager.get_activity(activity).await.unwrap().title(), "release");

    let of_node = manager.get_version_history_of_node(node.id).await.unwrap().unwrap();
    assert_eq!(of_node.id(), history_id);

    // Next checkin continues the numbering
    let v2 = checkin(&manager, &mut node).await;
    assert_eq!(manager.get_version(v2).await.unwrap().name(), "1.1");
}

#[tokio::test]
async fn test_open_on_disk_requires_storage_path() {
    let result = VersionManager::open_on_disk(
        VersionManagerConfig::default(),
        Arc::new(BroadcastDispatcher::default()),
    )
    .await;
    assert!(matches!(result, Err(VersionError::Storage(_))));
}
