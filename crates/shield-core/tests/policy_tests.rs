//! Integration tests for the policy store

use shield_core::policy::{PolicyPersistence, TomlPolicyFile};
use shield_core::{classify, Error, ListType, PolicyStore, Profile};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

#[test]
fn test_persisted_policy_roundtrip() {
    let dir = TempDir::new().unwrap();
    let file = TomlPolicyFile::new(dir.path().join("nested").join("policy.toml"));

    let store = PolicyStore::new();
    store.add_entry("*.casino.example", ListType::Block).unwrap();
    store.add_entry("school.example", ListType::Allow).unwrap();
    store.upsert_profile(Profile::new(1, "Weekdays").with_schedule(480, 1200)).unwrap();
    store
        .upsert_profile(Profile::new(2, "Weekend").with_schedule(540, 1320).activated())
        .unwrap();
    store.save_to(&file).unwrap();

    let active = file.load_active_profile().unwrap().unwrap();
    assert_eq!(active.id, 2);

    let restored = PolicyStore::new();
    restored.load_from(&file).unwrap();
    assert_eq!(restored.entries(ListType::Block).len(), 1);
    assert_eq!(restored.entries(ListType::Allow).len(), 1);
    assert_eq!(restored.profiles().len(), 2);
    assert_eq!(restored.active_profile().map(|p| p.id), Some(2));
    assert!(classify("live.casino.example", &restored.snapshot()).is_blocked);
}

#[test]
fn test_profile_lifecycle_rules() {
    let store = PolicyStore::new();
    store.upsert_profile(Profile::new(1, "A").activated()).unwrap();
    store.upsert_profile(Profile::new(2, "B")).unwrap();

    store.activate_profile(2).unwrap();
    let active: Vec<u32> = store.profiles().iter().filter(|p| p.is_active).map(|p| p.id).collect();
    assert_eq!(active, vec![2]);

    assert!(matches!(store.remove_profile(2), Err(Error::ProfileActive { id: 2 })));
    assert!(matches!(store.activate_profile(7), Err(Error::ProfileNotFound { id: 7 })));

    store.deactivate_profile(2).unwrap();
    assert_eq!(store.remove_profile(2).unwrap().name, "B");
    assert!(store.active_profile().is_none());
}

#[test]
fn test_readers_see_whole_snapshots() {
    let store = Arc::new(PolicyStore::new());

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..200 {
                let patterns = [format!("a{i}.example"), format!("b{i}.example")];
                store
                    .add_entries(patterns.iter().map(String::as_str), ListType::Block)
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = store.snapshot();
                    // Batches land atomically
                    assert_eq!(snapshot.list(ListType::Block).len() % 2, 0);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.entries(ListType::Block).len(), 400);
}

#[test]
fn test_list_file_edit_is_picked_up() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocklist.txt");
    std::fs::write(&path, "one.example\ntwo.example\n").unwrap();

    let store = PolicyStore::new();
    assert_eq!(store.load_list_file(&path, ListType::Block).unwrap(), 2);

    std::fs::write(&path, "two.example\nthree.example\n").unwrap();
    store.load_list_file(&path, ListType::Block).unwrap();

    let snapshot = store.snapshot();
    assert!(!classify("one.example", &snapshot).is_blocked);
    assert!(classify("three.example", &snapshot).is_blocked);
}

#[test]
fn test_large_list_file_loads_and_reloads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocklist.txt");
    let mut content = String::from("# generated\n");
    for i in 0..20_000 {
        if i % 4 == 0 {
            content.push_str(&format!("*.tracker{i}.example\n"));
        } else {
            content.push_str(&format!("blocked{i}.example\n"));
        }
    }
    std::fs::write(&path, &content).unwrap();

    let store = PolicyStore::new();
    let started = std::time::Instant::now();
    assert_eq!(store.load_list_file(&path, ListType::Block).unwrap(), 20_000);
    assert!(
        started.elapsed() < std::time::Duration::from_secs(5),
        "loading took {:?}",
        started.elapsed()
    );

    let snapshot = store.snapshot();
    assert!(classify("cdn.tracker19996.example", &snapshot).is_blocked);
    assert!(classify("blocked19999.example", &snapshot).is_blocked);

    // Reloading the same file drops nothing and adds nothing
    let started = std::time::Instant::now();
    store.load_list_file(&path, ListType::Block).unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(store.entries(ListType::Block).len(), 20_000);
}
