use super::*;
use crate::{
    editor::EditorPhase,
    test_support::{collaborators, item, FakeBlobStore, FakeDocumentStore},
};
use shared::domain::MediaKind;

#[tokio::test]
async fn refresh_lists_saved_sequences() {
    let store = FakeDocumentStore::with_items(&[item(MediaKind::Model, "M1", "Pump")]).await;
    let mut browser = SequenceBrowser::new(collaborators(store.clone(), FakeBlobStore::new()));
    assert!(browser.refresh().await.expect("refresh").is_empty());

    let mut editor = browser.open_new().await.expect("open");
    let pump = browser
        .catalog()
        .and_then(|c| c.models().first().cloned())
        .expect("catalog item");
    editor.add_entry(pump).expect("add");
    editor.set_name("Week 1").expect("name");
    let saved = editor.save().await.expect("save");

    let listed = browser.refresh().await.expect("refresh");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], saved.sequence);
}

#[tokio::test]
async fn catalog_is_loaded_once_and_shared() {
    let store = FakeDocumentStore::with_items(&[item(MediaKind::Video, "V1", "Intro")]).await;
    let mut browser = SequenceBrowser::new(collaborators(store.clone(), FakeBlobStore::new()));

    let first = browser.open_new().await.expect("first");
    let second = browser.open_new().await.expect("second");

    assert!(Arc::ptr_eq(
        first.catalog().expect("catalog"),
        second.catalog().expect("catalog")
    ));
    assert_eq!(store.list_media_calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    browser.invalidate_catalog();
    browser.open_new().await.expect("third");
    assert_eq!(store.list_media_calls.load(std::sync::atomic::Ordering::SeqCst), 4);
}

#[tokio::test]
async fn catalog_failure_leaves_existing_editor_load_pending() {
    let store = FakeDocumentStore::new();
    let now = chrono::Utc::now();
    store
        .insert_sequence(
            "S1",
            shared::domain::SequenceDocument {
                name: "Offline".into(),
                description: String::new(),
                sequence: vec![shared::domain::SequenceEntryRef::new(MediaKind::Model, "M1")],
                created_at: now,
                updated_at: now,
            },
        )
        .await;
    store.fail_media_listing();
    let mut browser = SequenceBrowser::new(collaborators(store, FakeBlobStore::new()));

    let editor = browser
        .open_existing(SequenceId::from("S1"))
        .await
        .expect("open");

    assert_eq!(editor.phase(), EditorPhase::Loading);
    assert_eq!(editor.name(), "Offline");
    assert!(browser.catalog().is_none());
}
