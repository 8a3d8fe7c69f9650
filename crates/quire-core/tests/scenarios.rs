//! End-to-end walkthroughs of the main editor flows.

use std::collections::BTreeSet;
use std::time::Duration;

use quire_core::test_support::MockPersistence;
use quire_core::{
    BrokenReason, CreateFileSpec, FileError, NodeId, ReferenceStatus, Workspace,
};

fn refs(ids: &[&str]) -> BTreeSet<NodeId> {
    ids.iter().map(|id| NodeId::from(*id)).collect()
}

#[tokio::test]
async fn temp_file_is_promoted_on_first_save() {
    let storage = MockPersistence::new();
    let workspace = Workspace::new(storage.clone());

    let temp = workspace.create_temp_file(None).unwrap();
    let t1 = temp.id().clone();
    assert!(temp.is_transient());
    assert_eq!(temp.node().name, "Untitled");

    let edited = workspace
        .update_file_content(&t1, "hello".to_string(), Some(refs(&[])))
        .unwrap();
    assert!(edited.is_dirty());

    let saved = workspace
        .save_file(&t1, Some("hello".to_string()), Some("note.md"))
        .await
        .unwrap();

    assert!(saved.is_persisted());
    assert_eq!(saved.id(), &t1);
    assert_eq!(saved.node().name, "note.md");
    assert!(!saved.is_dirty());
    assert!(saved.save_state().last_saved.is_some());
    assert_eq!(storage.stats().create_count, 1);
    assert_eq!(storage.stored_content(&t1).as_deref(), Some("hello"));
    assert_eq!(storage.stored_node(&t1).unwrap().name, "note.md");
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let workspace = Workspace::new(MockPersistence::new());

    let docs = workspace.create_directory(None, "Docs").unwrap();
    let d1 = docs.id().clone();

    let f1 = workspace
        .create_file(CreateFileSpec::file("f1", "a.md").with_parent(d1.clone()))
        .unwrap();
    assert_eq!(f1.node().parent_id.as_ref(), Some(&d1));

    let err = workspace
        .create_file(CreateFileSpec::file("f1", "b.md"))
        .unwrap_err();
    assert_eq!(err, FileError::DuplicateId(NodeId::from("f1")));
    assert_eq!(workspace.list_files().len(), 2);
}

#[tokio::test]
async fn pending_references_are_not_healed_implicitly() {
    let workspace = Workspace::new(MockPersistence::new());
    workspace.create_file(CreateFileSpec::file("f1", "a.md")).unwrap();

    let edges = workspace.update_file_references("f1", refs(&["f2"])).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].status, ReferenceStatus::Broken(BrokenReason::Pending));

    workspace.create_file(CreateFileSpec::file("f2", "b.md")).unwrap();
    let edges = workspace.get_file_references("f1").unwrap();
    assert_eq!(edges[0].status, ReferenceStatus::Broken(BrokenReason::Pending));

    let edges = workspace.update_file_references("f1", refs(&["f2"])).unwrap();
    assert_eq!(edges[0].status, ReferenceStatus::Resolved);
}

#[tokio::test(start_paused = true)]
async fn autosave_coalesces_edits_within_debounce() {
    let storage = MockPersistence::new();
    let workspace = Workspace::builder(storage.clone())
        .debounce(Duration::from_millis(50))
        .build();
    workspace.set_auto_save_interval(200);
    let handle = workspace.start_autosave();

    let id = workspace.create_temp_file(None).unwrap().id().clone();
    workspace
        .update_file_content(&id, "one".to_string(), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    workspace
        .update_file_content(&id, "two".to_string(), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    workspace
        .update_file_content(&id, "three".to_string(), None)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(storage.stats().create_count, 1);
    assert_eq!(storage.stats().update_count, 0);
    assert_eq!(storage.stored_content(&id).as_deref(), Some("three"));

    let file = workspace.get_file(&id).unwrap();
    assert!(file.is_persisted());
    assert!(!file.is_dirty());
    assert!(file.save_state().last_auto_save.is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn deleting_a_target_flags_inbound_edges() {
    let workspace = Workspace::new(MockPersistence::new());
    workspace
        .create_file(CreateFileSpec::file("f1", "a.md").with_content("see f2"))
        .unwrap();
    workspace.create_file(CreateFileSpec::file("f2", "b.md")).unwrap();
    workspace.update_file_references("f1", refs(&["f2"])).unwrap();
    let before = workspace.get_file("f1").unwrap();

    workspace.delete_file("f2").await.unwrap();

    let edges = workspace.get_file_references("f1").unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].target, NodeId::from("f2"));
    assert_eq!(edges[0].status, ReferenceStatus::Broken(BrokenReason::Deleted));

    let after = workspace.get_file("f1").unwrap();
    assert_eq!(after, before);
    assert_eq!(workspace.get_backlinks("f2"), vec![NodeId::from("f1")]);
}
