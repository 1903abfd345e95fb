//! Tests for the tree engine
//!
//! These tests verify:
//! - Replay of collections, sets and deletes after reattaching
//! - Truncation of a torn tail
//! - `copy_to` keeps only live items and shrinks the file
//! - Custom comparators
//! - Removed collections stay removed
//! - Closed engines reject every call

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kvfile::engine::{EngineStore, Item, KeyCompare, MAGIC};
use kvfile::KvFileError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("engine.db");
    (temp_dir, path)
}

fn open_file(path: &Path) -> File {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .unwrap()
}

fn open_engine(path: &Path) -> EngineStore {
    EngineStore::open(open_file(path)).unwrap()
}

fn reverse_compare() -> KeyCompare {
    Arc::new(|a: &[u8], b: &[u8]| b.cmp(a))
}

fn keys_of(engine: &EngineStore, collection: &str) -> Vec<Vec<u8>> {
    let collection = engine.get_collection(collection).unwrap().unwrap();
    let mut keys = Vec::new();
    collection
        .visit_items_ascend(b"", |item| {
            keys.push(item.key.clone());
            true
        })
        .unwrap();
    keys
}

// =============================================================================
// Open and Replay Tests
// =============================================================================

#[test]
fn test_open_empty_file_writes_header() {
    let (_temp, path) = setup_temp_path();

    let engine = open_engine(&path);
    engine.close().unwrap();

    assert_eq!(fs::read(&path).unwrap(), MAGIC);
}

#[test]
fn test_open_rejects_foreign_file() {
    let (_temp, path) = setup_temp_path();
    fs::write(&path, b"definitely not a store file").unwrap();

    let result = EngineStore::open(open_file(&path));

    assert!(matches!(result, Err(KvFileError::Corruption(_))));
}

#[test]
fn test_replay_restores_items() {
    let (_temp, path) = setup_temp_path();

    {
        let engine = open_engine(&path);
        let users = engine.set_collection("users", None).unwrap();
        users.set_item(Item::new(b"ada".to_vec(), b"1".to_vec(), 10)).unwrap();
        users.set_item(Item::new(b"bob".to_vec(), b"2".to_vec(), 20)).unwrap();
        users.set_item(Item::new(b"ada".to_vec(), b"3".to_vec(), 30)).unwrap();
        assert!(users.delete(b"bob").unwrap());
        engine.flush().unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(&path);
    let users = engine.get_collection("users").unwrap().unwrap();

    assert_eq!(users.len().unwrap(), 1);
    let ada = users.get_item(b"ada").unwrap().unwrap();
    assert_eq!(ada.val, b"3");
    assert_eq!(ada.priority, 30);
    assert_eq!(users.get(b"bob").unwrap(), None);
}

#[test]
fn test_close_appends_pending_mutations() {
    let (_temp, path) = setup_temp_path();

    {
        let engine = open_engine(&path);
        let users = engine.set_collection("users", None).unwrap();
        users.set_item(Item::with_random_priority(b"ada".to_vec(), b"1".to_vec())).unwrap();
        engine.flush().unwrap();
        users.set_item(Item::with_random_priority(b"bob".to_vec(), b"2".to_vec())).unwrap();
        engine.set_collection("late", None).unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(&path);
    let users = engine.get_collection("users").unwrap().unwrap();
    assert_eq!(users.get(b"ada").unwrap(), Some(b"1".to_vec()));
    assert_eq!(users.get(b"bob").unwrap(), Some(b"2".to_vec()));
    assert!(engine.get_collection("late").unwrap().is_some());
}

#[test]
fn test_mutations_after_close_are_rejected() {
    let (_temp, path) = setup_temp_path();
    let engine = open_engine(&path);
    let users = engine.set_collection("users", None).unwrap();

    engine.close().unwrap();

    let late = users.set_item(Item::with_random_priority(b"k".to_vec(), b"v".to_vec()));
    assert!(matches!(late, Err(KvFileError::EngineClosed)));
    assert!(matches!(users.delete(b"k"), Err(KvFileError::EngineClosed)));
    assert!(matches!(
        engine.set_collection("other", None),
        Err(KvFileError::EngineClosed)
    ));
}

#[test]
fn test_empty_collection_survives_reopen() {
    let (_temp, path) = setup_temp_path();

    {
        let engine = open_engine(&path);
        engine.set_collection("empty", None).unwrap();
        engine.flush().unwrap();
    }

    let engine = open_engine(&path);
    assert_eq!(engine.collection_names().unwrap(), vec!["empty".to_string()]);
}

#[test]
fn test_torn_tail_is_truncated() {
    let (_temp, path) = setup_temp_path();

    {
        let engine = open_engine(&path);
        let c = engine.set_collection("c", None).unwrap();
        c.set_item(Item::new(b"k".to_vec(), b"v".to_vec(), 1)).unwrap();
        engine.flush().unwrap();
    }
    let intact_len = fs::metadata(&path).unwrap().len();

    // Half of a frame header
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xFF, 0x00, 0x00]).unwrap();
    drop(file);

    let engine = open_engine(&path);
    assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

    let c = engine.get_collection("c").unwrap().unwrap();
    assert_eq!(c.get(b"k").unwrap(), Some(b"v".to_vec()));

    // Appends continue after the valid prefix
    c.set_item(Item::new(b"k2".to_vec(), b"v2".to_vec(), 2)).unwrap();
    engine.flush().unwrap();
    drop(engine);

    let engine = open_engine(&path);
    assert_eq!(engine.get_collection("c").unwrap().unwrap().len().unwrap(), 2);
}

#[test]
fn test_snapshot_attach_leaves_torn_file_unchanged() {
    let (_temp, path) = setup_temp_path();

    {
        let engine = open_engine(&path);
        let c = engine.set_collection("c", None).unwrap();
        c.set_item(Item::new(b"k".to_vec(), b"v".to_vec(), 1)).unwrap();
        engine.close().unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x09; 9]).unwrap();
    drop(file);
    let torn = fs::read(&path).unwrap();

    let snapshot = EngineStore::open_snapshot(File::open(&path).unwrap()).unwrap();
    let c = snapshot.get_collection("c").unwrap().unwrap();
    assert_eq!(c.get(b"k").unwrap(), Some(b"v".to_vec()));
    snapshot.close().unwrap();

    assert_eq!(fs::read(&path).unwrap(), torn);
}

#[test]
fn test_snapshot_attach_leaves_empty_file_empty() {
    let (_temp, path) = setup_temp_path();
    File::create(&path).unwrap();

    let snapshot = EngineStore::open_snapshot(File::open(&path).unwrap()).unwrap();
    assert!(snapshot.collection_names().unwrap().is_empty());
    snapshot.close().unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
}

// =============================================================================
// Copy Tests
// =============================================================================

#[test]
fn test_copy_to_keeps_only_live_items() {
    let (temp, path) = setup_temp_path();
    let copy_path = temp.path().join("copy.db");

    let engine = open_engine(&path);
    let c = engine.set_collection("c", None).unwrap();
    for round in 0..5 {
        for i in 0..100 {
            let key = format!("key{:03}", i).into_bytes();
            let val = format!("value{}-{}", i, round).into_bytes();
            c.set_item(Item::with_random_priority(key, val)).unwrap();
        }
    }
    for i in 50..100 {
        c.delete(format!("key{:03}", i).as_bytes()).unwrap();
    }
    engine.flush().unwrap();

    let target = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&copy_path)
        .unwrap();
    let copy = engine.copy_to(target, 7).unwrap();
    copy.flush().unwrap();

    let original_len = fs::metadata(&path).unwrap().len();
    let copy_len = fs::metadata(&copy_path).unwrap().len();
    assert!(copy_len < original_len / 4, "{} vs {}", copy_len, original_len);

    // The returned store sees the copied state
    let copied = copy.get_collection("c").unwrap().unwrap();
    assert_eq!(copied.len().unwrap(), 50);
    assert_eq!(copied.get(b"key010").unwrap(), Some(b"value10-4".to_vec()));
    copy.close().unwrap();

    // And so does a fresh attach to the copy
    let reopened = open_engine(&copy_path);
    let c = reopened.get_collection("c").unwrap().unwrap();
    assert_eq!(c.len().unwrap(), 50);
    assert_eq!(c.get(b"key060").unwrap(), None);
    assert_eq!(c.get_item(b"key000").unwrap().unwrap().val, b"value0-4");
}

#[test]
fn test_copy_to_preserves_priorities() {
    let (temp, path) = setup_temp_path();
    let copy_path = temp.path().join("copy.db");

    let engine = open_engine(&path);
    let c = engine.set_collection("c", None).unwrap();
    c.set_item(Item::new(b"a".to_vec(), b"1".to_vec(), 42)).unwrap();
    engine.flush().unwrap();

    let copy = engine.copy_to(File::create(&copy_path).unwrap(), 0).unwrap();
    copy.close().unwrap();

    let reopened = open_engine(&copy_path);
    let item = reopened.get_collection("c").unwrap().unwrap().get_item(b"a").unwrap();
    assert_eq!(item.unwrap().priority, 42);
}

// =============================================================================
// Comparator Tests
// =============================================================================

#[test]
fn test_custom_comparator_orders_visits() {
    let (_temp, path) = setup_temp_path();
    let engine = open_engine(&path);

    let c = engine.set_collection("desc", Some(reverse_compare())).unwrap();
    for key in [b"b", b"a", b"c"] {
        c.set_item(Item::with_random_priority(key.to_vec(), Vec::new())).unwrap();
    }

    assert_eq!(keys_of(&engine, "desc"), vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    assert_eq!(c.min_item().unwrap().unwrap().key, b"c");
    assert_eq!(c.max_item().unwrap().unwrap().key, b"a");
}

#[test]
fn test_set_collection_with_comparator_resorts_existing() {
    let (_temp, path) = setup_temp_path();
    let engine = open_engine(&path);

    let c = engine.set_collection("c", None).unwrap();
    for key in [b"a", b"b", b"c"] {
        c.set_item(Item::with_random_priority(key.to_vec(), Vec::new())).unwrap();
    }
    assert_eq!(keys_of(&engine, "c")[0], b"a");

    engine.set_collection("c", Some(reverse_compare())).unwrap();

    assert_eq!(keys_of(&engine, "c"), vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn test_visit_starts_at_key() {
    let (_temp, path) = setup_temp_path();
    let engine = open_engine(&path);

    let c = engine.set_collection("c", None).unwrap();
    for i in 0..10u8 {
        c.set_item(Item::with_random_priority(vec![b'a' + i], Vec::new())).unwrap();
    }

    let mut seen = Vec::new();
    c.visit_items_ascend(b"e", |item| {
        seen.push(item.key[0]);
        seen.len() < 3
    })
    .unwrap();

    assert_eq!(seen, vec![b'e', b'f', b'g']);
}

// =============================================================================
// Collection Lifecycle Tests
// =============================================================================

#[test]
fn test_removed_collection_stays_removed() {
    let (_temp, path) = setup_temp_path();

    {
        let engine = open_engine(&path);
        let doomed = engine.set_collection("doomed", None).unwrap();
        doomed.set_item(Item::with_random_priority(b"k".to_vec(), b"v".to_vec())).unwrap();
        engine.set_collection("kept", None).unwrap();
        engine.flush().unwrap();

        assert!(engine.remove_collection("doomed").unwrap());
        assert!(!engine.remove_collection("doomed").unwrap());
        assert!(matches!(
            doomed.get(b"k"),
            Err(KvFileError::CollectionRemoved(_))
        ));
        engine.flush().unwrap();
    }

    let engine = open_engine(&path);
    assert_eq!(engine.collection_names().unwrap(), vec!["kept".to_string()]);
}

#[test]
fn test_private_collection_is_not_persisted() {
    let (_temp, path) = setup_temp_path();

    {
        let engine = open_engine(&path);
        let private = engine.make_private_collection(None).unwrap();
        private.set_item(Item::with_random_priority(b"k".to_vec(), b"v".to_vec())).unwrap();
        private.write().unwrap();
        engine.flush().unwrap();

        assert_eq!(private.name(), None);
        assert_eq!(private.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.records_written(), 0);
    }

    let engine = open_engine(&path);
    assert!(engine.collection_names().unwrap().is_empty());
}

#[test]
fn test_closed_engine_rejects_calls() {
    let (_temp, path) = setup_temp_path();
    let engine = open_engine(&path);
    let c = engine.set_collection("c", None).unwrap();

    engine.close().unwrap();

    assert!(matches!(engine.flush(), Err(KvFileError::EngineClosed)));
    assert!(matches!(engine.collection_names(), Err(KvFileError::EngineClosed)));
    assert!(matches!(c.get(b"k"), Err(KvFileError::EngineClosed)));
}
