//! Storage reconciliation and lifecycle edge cases.

use std::collections::BTreeSet;
use std::time::Duration;

use quire_core::test_support::{MockOp, MockPersistence};
use quire_core::tracing_utils::create_test_subscriber;
use quire_core::{
    AutosaveState, BrokenReason, CreateFileSpec, FileError, FileEventKind, NodeId, NodeKind,
    QuireConfig, ReferenceStatus, StorageError, StoredNode, Workspace,
};

fn seeded() -> MockPersistence {
    let storage = MockPersistence::new();
    storage.seed(StoredNode::new("docs", "Docs", NodeKind::Folder), "");
    storage.seed(
        StoredNode::new("n1", "one.md", NodeKind::File)
            .with_parent("docs")
            .with_references(vec![NodeId::from("n2")]),
        "alpha",
    );
    storage.seed(StoredNode::new("n2", "two.md", NodeKind::File), "beta");
    storage
}

#[tokio::test]
async fn refresh_imports_remote_nodes() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    let mut events = workspace.subscribe();

    let files = workspace.refresh_files().await.unwrap();
    assert_eq!(files.len(), 3);

    let n1 = workspace.get_file("n1").unwrap();
    assert!(n1.is_persisted());
    assert!(!n1.is_dirty());
    assert_eq!(n1.node().content, None);
    assert_eq!(n1.node().parent_id, Some(NodeId::from("docs")));

    let edges = workspace.get_file_references("n1").unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].status, ReferenceStatus::Resolved);
    assert_eq!(workspace.get_backlinks("n2"), vec![NodeId::from("n1")]);

    let kinds: Vec<FileEventKind> = events.drain().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FileEventKind::Created; 3]);

    // A second pass with nothing new is quiet
    workspace.refresh_files().await.unwrap();
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn content_is_loaded_once() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();

    let content = workspace.get_file_content("n1").await.unwrap();
    assert_eq!(content.as_deref(), Some("alpha"));
    let content = workspace.get_file_content("n1").await.unwrap();
    assert_eq!(content.as_deref(), Some("alpha"));
    assert_eq!(storage.stats().read_count, 1);
    assert!(!workspace.get_file("n1").unwrap().is_dirty());

    assert_eq!(workspace.get_file_content("docs").await.unwrap(), None);
    assert_eq!(storage.stats().read_count, 1);
}

#[tokio::test]
async fn refresh_evicts_stale_content_on_clean_nodes() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();
    workspace.get_file_content("n2").await.unwrap();

    storage.seed(StoredNode::new("n2", "renamed.md", NodeKind::File), "beta 2");
    let mut events = workspace.subscribe();
    workspace.refresh_files().await.unwrap();

    let n2 = workspace.get_file("n2").unwrap();
    assert_eq!(n2.node().name, "renamed.md");
    assert_eq!(n2.node().content, None);
    assert!(!n2.is_dirty());
    let kinds: Vec<FileEventKind> = events.drain().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FileEventKind::Updated]);

    let content = workspace.get_file_content("n2").await.unwrap();
    assert_eq!(content.as_deref(), Some("beta 2"));
}

#[tokio::test]
async fn refresh_keeps_dirty_nodes_and_evicts_missing_clean_ones() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();
    let temp = workspace.create_temp_file(None).unwrap().id().clone();

    workspace.get_file_content("n1").await.unwrap();
    workspace
        .update_file_content("n1", "local edit".to_string(), None)
        .unwrap();
    storage.seed(StoredNode::new("n1", "theirs.md", NodeKind::File), "remote edit");
    storage.remove_remote("n2");

    let mut events = workspace.subscribe();
    workspace.refresh_files().await.unwrap();

    let n1 = workspace.get_file("n1").unwrap();
    assert!(n1.is_dirty());
    assert_eq!(n1.node().name, "one.md");
    assert_eq!(n1.node().content.as_deref(), Some("local edit"));

    assert!(workspace.get_file("n2").is_none());
    assert!(workspace.get_file(&temp).is_some());
    let kinds: Vec<FileEventKind> = events.drain().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FileEventKind::Deleted]);

    let edges = workspace.get_file_references("n1").unwrap();
    assert!(edges[0].is_broken());
}

#[tokio::test]
async fn refresh_moves_orphans_to_root() {
    let (subscriber, logs) = create_test_subscriber();
    let _guard = tracing::subscriber::set_default(subscriber);

    let storage = MockPersistence::new();
    storage.seed(
        StoredNode::new("lost", "lost.md", NodeKind::File).with_parent("gone"),
        "text",
    );
    let workspace = Workspace::new(storage);
    workspace.refresh_files().await.unwrap();

    assert_eq!(workspace.get_file("lost").unwrap().node().parent_id, None);
    assert!(logs.contains_at_level("WARN", "moved to root"));
}

#[tokio::test]
async fn refresh_surfaces_listing_errors() {
    let storage = seeded();
    storage.fail_next(MockOp::List, StorageError::network("timeout"));
    let workspace = Workspace::new(storage);

    let err = workspace.refresh_files().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(workspace.list_files().is_empty());
}

#[tokio::test]
async fn discard_restores_last_saved_content() {
    let workspace = Workspace::new(MockPersistence::new());
    let id = workspace.create_temp_file(None).unwrap().id().clone();
    workspace
        .save_file(&id, Some("saved".to_string()), None)
        .await
        .unwrap();
    workspace
        .update_file_content(&id, "scratch".to_string(), None)
        .unwrap();

    let reverted = workspace.discard_changes(&id).unwrap();
    assert_eq!(reverted.node().content.as_deref(), Some("saved"));
    assert!(!reverted.is_dirty());
    assert!(!workspace.has_unsaved_changes());
}

#[tokio::test]
async fn discard_empties_a_transient_file() {
    let workspace = Workspace::new(MockPersistence::new());
    let id = workspace.create_temp_file(None).unwrap().id().clone();
    workspace
        .update_file_content(&id, "scratch".to_string(), None)
        .unwrap();

    let reverted = workspace.discard_changes(&id).unwrap();
    assert!(reverted.is_transient());
    assert_eq!(reverted.node().content.as_deref(), Some(""));
    assert!(!reverted.is_dirty());

    let folder = workspace.create_directory(None, "Notes").unwrap();
    assert!(matches!(
        workspace.discard_changes(folder.id()),
        Err(FileError::NotAFile(_))
    ));
}

#[tokio::test]
async fn deleting_a_persisted_file_deletes_the_record() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();

    workspace.delete_file("n2").await.unwrap();
    assert_eq!(storage.stats().delete_count, 1);
    assert!(storage.stored_node("n2").is_none());

    // Already gone remotely is fine
    storage.remove_remote("n1");
    workspace.delete_file("n1").await.unwrap();
    assert!(workspace.get_file("n1").is_none());
}

#[tokio::test]
async fn failed_storage_delete_keeps_the_node() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();
    storage.fail_next(MockOp::Delete, StorageError::network("offline"));

    let err = workspace.delete_file("n2").await.unwrap_err();
    assert!(matches!(err, FileError::Storage(_)));
    assert!(workspace.get_file("n2").is_some());
    assert!(storage.stored_node("n2").is_some());
}

#[tokio::test]
async fn non_empty_folders_cannot_be_deleted() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();

    assert!(matches!(
        workspace.delete_file("docs").await,
        Err(FileError::FolderNotEmpty(_))
    ));
    assert_eq!(storage.stats().delete_count, 0);

    workspace.delete_file("n1").await.unwrap();
    workspace.delete_file("docs").await.unwrap();
    assert_eq!(storage.record_count(), 1);
}

#[tokio::test]
async fn reassigned_ids_follow_through_every_index() {
    let workspace = Workspace::new(MockPersistence::new());
    let temp = workspace.create_temp_file(None).unwrap().id().clone();
    workspace.create_file(CreateFileSpec::file("a", "a.md")).unwrap();
    workspace
        .update_file_references("a", [temp.clone()].into_iter().collect())
        .unwrap();
    workspace.select_file(&temp).unwrap();
    let mut events = workspace.subscribe();

    let moved = workspace.reassign_id(&temp, "doc-1").unwrap();
    assert_eq!(moved.id(), &NodeId::from("doc-1"));
    assert!(workspace.get_file(&temp).is_none());

    let a = workspace.get_file("a").unwrap();
    assert_eq!(a.node().references, BTreeSet::from([NodeId::from("doc-1")]));
    assert_eq!(workspace.get_backlinks("doc-1"), vec![NodeId::from("a")]);
    assert!(workspace.get_backlinks(&temp).is_empty());
    assert_eq!(
        workspace.current_editing_file().unwrap().id(),
        &NodeId::from("doc-1")
    );

    let event = events.drain().pop().unwrap();
    assert_eq!(event.kind, FileEventKind::Renamed);
    assert_eq!(event.previous_id, Some(temp));

    assert!(matches!(
        workspace.reassign_id("doc-1", "a"),
        Err(FileError::DuplicateId(_))
    ));
    workspace.save_file("doc-1", None, None).await.unwrap();
    assert!(matches!(
        workspace.reassign_id("doc-1", "doc-2"),
        Err(FileError::AlreadyPersisted(_))
    ));
}

#[tokio::test]
async fn moves_reject_cycles_and_non_folders() {
    let workspace = Workspace::new(MockPersistence::new());
    workspace.create_file(CreateFileSpec::folder("top", "Top")).unwrap();
    workspace
        .create_file(CreateFileSpec::folder("inner", "Inner").with_parent("top"))
        .unwrap();
    workspace.create_file(CreateFileSpec::file("f", "f.md")).unwrap();

    assert!(matches!(
        workspace.move_file("top", Some("inner")),
        Err(FileError::CyclicParent { .. })
    ));
    assert!(matches!(
        workspace.move_file("top", Some("top")),
        Err(FileError::CyclicParent { .. })
    ));
    assert!(matches!(
        workspace.move_file("inner", Some("f")),
        Err(FileError::InvalidParent(_))
    ));

    let mut events = workspace.subscribe();
    let moved = workspace.move_file("f", Some("inner")).unwrap();
    assert_eq!(moved.node().parent_id, Some(NodeId::from("inner")));
    let event = events.drain().pop().unwrap();
    assert_eq!(event.kind, FileEventKind::Moved);
    assert_eq!(event.previous_id, None);
}

#[tokio::test]
async fn content_edits_target_files_only() {
    let workspace = Workspace::new(MockPersistence::new());
    let folder = workspace.create_directory(None, "Notes").unwrap();

    let err = workspace
        .update_file_content(folder.id(), "text".to_string(), None)
        .unwrap_err();
    assert!(matches!(err, FileError::NotAFile(_)));
    assert!(err.is_structural());

    let err = workspace
        .update_file_content("missing", "text".to_string(), None)
        .unwrap_err();
    assert!(matches!(err, FileError::NotFound(_)));
}

#[tokio::test]
async fn builder_reads_autosave_config() {
    let mut config = QuireConfig::default();
    config.autosave.interval_ms = 500;
    let workspace = Workspace::builder(MockPersistence::new())
        .config(&config)
        .build();
    assert_eq!(workspace.auto_save_interval(), Some(Duration::from_millis(500)));

    config.autosave.enabled = false;
    let workspace = Workspace::builder(MockPersistence::new())
        .config(&config)
        .build();
    assert_eq!(workspace.auto_save_interval(), None);
}

#[tokio::test]
async fn refresh_does_not_heal_pending_edges() {
    let workspace = Workspace::new(MockPersistence::new());
    workspace.create_file(CreateFileSpec::file("f1", "a.md")).unwrap();
    workspace
        .update_file_references("f1", BTreeSet::from([NodeId::from("f2")]))
        .unwrap();
    workspace.save_file("f1", None, None).await.unwrap();
    workspace.create_file(CreateFileSpec::file("f2", "b.md")).unwrap();

    workspace.refresh_files().await.unwrap();

    let edges = workspace.get_file_references("f1").unwrap();
    assert_eq!(edges[0].status, ReferenceStatus::Broken(BrokenReason::Pending));
}

#[tokio::test]
async fn refresh_keeps_deleted_edges_flagged() {
    let workspace = Workspace::new(MockPersistence::new());
    workspace.create_file(CreateFileSpec::file("f1", "a.md")).unwrap();
    workspace.create_file(CreateFileSpec::file("f2", "b.md")).unwrap();
    workspace
        .update_file_references("f1", BTreeSet::from([NodeId::from("f2")]))
        .unwrap();
    workspace.save_file("f1", None, None).await.unwrap();
    workspace.save_file("f2", None, None).await.unwrap();
    workspace.delete_file("f2").await.unwrap();

    workspace.refresh_files().await.unwrap();

    let edges = workspace.get_file_references("f1").unwrap();
    assert_eq!(edges[0].status, ReferenceStatus::Broken(BrokenReason::Deleted));
}

#[tokio::test]
async fn refresh_applies_remote_reference_changes() {
    let storage = seeded();
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();

    storage.seed(
        StoredNode::new("n1", "one.md", NodeKind::File).with_parent("docs"),
        "alpha",
    );
    workspace.refresh_files().await.unwrap();

    assert!(workspace.get_file_references("n1").unwrap().is_empty());
    assert!(workspace.get_backlinks("n2").is_empty());
    assert!(!workspace.has_unsaved_changes());
}

#[tokio::test]
async fn renames_and_moves_stay_unsaved_until_written() {
    let storage = MockPersistence::new();
    let workspace = Workspace::new(storage.clone());
    let folder = workspace.create_directory(None, "Docs").unwrap().id().clone();
    workspace.save_file(&folder, None, None).await.unwrap();
    let id = workspace.create_temp_file(None).unwrap().id().clone();
    workspace.save_file(&id, None, Some("old.md")).await.unwrap();
    assert!(!workspace.has_unsaved_changes());

    let renamed = workspace.rename_file(&id, "new.md").unwrap();
    assert!(!renamed.is_dirty());
    assert!(renamed.has_unsaved_changes());
    assert!(workspace.has_unsaved_changes());
    workspace.move_file(&id, Some(folder.as_str())).unwrap();

    workspace.refresh_files().await.unwrap();
    let file = workspace.get_file(&id).unwrap();
    assert_eq!(file.node().name, "new.md");
    assert_eq!(file.node().parent_id.as_ref(), Some(&folder));

    workspace.save_file(&id, None, None).await.unwrap();
    assert!(!workspace.has_unsaved_changes());
    let stored = storage.stored_node(&id).unwrap();
    assert_eq!(stored.name, "new.md");
    assert_eq!(stored.parent_id.as_ref(), Some(&folder));

    // Renaming back matches storage again
    workspace.rename_file(&id, "tmp.md").unwrap();
    workspace.rename_file(&id, "new.md").unwrap();
    assert!(!workspace.has_unsaved_changes());
}

#[tokio::test]
async fn failed_rename_save_keeps_the_new_name_pending() {
    let storage = MockPersistence::new();
    let workspace = Workspace::new(storage.clone());
    let id = workspace.create_temp_file(None).unwrap().id().clone();
    workspace.save_file(&id, None, Some("old.md")).await.unwrap();
    storage.fail_next(MockOp::Update, StorageError::network("offline"));

    let err = workspace
        .save_file(&id, None, Some("other.md"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let file = workspace.get_file(&id).unwrap();
    assert_eq!(file.node().name, "other.md");
    assert!(file.has_unsaved_changes());
    assert_eq!(workspace.autosave_state(&id).unwrap(), AutosaveState::Dirty);

    workspace.refresh_files().await.unwrap();
    assert_eq!(workspace.get_file(&id).unwrap().node().name, "other.md");
    assert_eq!(storage.stored_node(&id).unwrap().name, "old.md");
}

#[tokio::test]
async fn discard_restores_saved_metadata() {
    let workspace = Workspace::new(MockPersistence::new());
    let id = workspace.create_temp_file(None).unwrap().id().clone();
    workspace.save_file(&id, None, Some("kept.md")).await.unwrap();
    workspace.rename_file(&id, "scratch.md").unwrap();

    let reverted = workspace.discard_changes(&id).unwrap();
    assert_eq!(reverted.node().name, "kept.md");
    assert!(!reverted.has_unsaved_changes());
}

#[tokio::test]
async fn child_created_during_folder_delete_moves_to_root() {
    let storage = MockPersistence::new();
    storage.seed(StoredNode::new("docs", "Docs", NodeKind::Folder), "");
    let workspace = Workspace::new(storage.clone());
    workspace.refresh_files().await.unwrap();

    storage.hold_writes();
    let delete = {
        let workspace = workspace.clone();
        tokio::spawn(async move { workspace.delete_file("docs").await })
    };
    storage.wait_for_writes(1).await;
    workspace
        .create_file(CreateFileSpec::file("late", "late.md").with_parent("docs"))
        .unwrap();
    let mut events = workspace.subscribe();

    storage.release_writes();
    delete.await.unwrap().unwrap();

    assert!(workspace.get_file("docs").is_none());
    assert!(storage.stored_node("docs").is_none());
    assert_eq!(workspace.get_file("late").unwrap().node().parent_id, None);

    let received = events.drain();
    assert_eq!(received[0].kind, FileEventKind::Moved);
    assert_eq!(received[0].previous_id, Some(NodeId::from("docs")));
    assert_eq!(received.last().unwrap().kind, FileEventKind::Deleted);
}

#[tokio::test]
async fn builder_saturates_oversized_durations() {
    let workspace = Workspace::builder(MockPersistence::new())
        .autosave_interval(Some(Duration::MAX))
        .build();
    assert_eq!(
        workspace.auto_save_interval(),
        Some(Duration::from_millis(u64::MAX))
    );
}
