use std::sync::Arc;

use powerauth_crypto::{generate_random_key, DerivedKey};
use powerauth_keystore::{KeyStore, KeyStoreError, MemoryStorage, SecureStorage};
use pretty_assertions::assert_eq;

fn store() -> (Arc<MemoryStorage>, KeyStore) {
    let storage = Arc::new(MemoryStorage::new());
    let store = KeyStore::new(storage.clone(), "test-instance");
    store.initialize().unwrap();
    (storage, store)
}

// ── Lifecycle ────────────────────────────────────────────────────

#[test]
fn initialize_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let store = KeyStore::new(storage, "app");
    assert!(!store.is_initialized().unwrap());

    store.initialize().unwrap();
    assert!(store.is_initialized().unwrap());

    store.put_sealed("entry", b"value").unwrap();
    store.initialize().unwrap();
    // A second initialize must not rotate the vault key.
    assert_eq!(store.get_sealed("entry").unwrap().unwrap(), b"value");
}

#[test]
fn uninitialized_store_rejects_sealed_writes() {
    let storage = Arc::new(MemoryStorage::new());
    let store = KeyStore::new(storage, "app");
    assert!(matches!(
        store.put_sealed("entry", b"value"),
        Err(KeyStoreError::NotInitialized)
    ));
}

#[test]
fn wipe_removes_everything() {
    let (storage, store) = store();
    store.put_sealed("record", b"data").unwrap();
    store
        .put_guarded("bio", &generate_random_key(), b"key")
        .unwrap();

    store.wipe().unwrap();
    assert!(!store.is_initialized().unwrap());
    assert!(!store.contains("record").unwrap());
    assert!(storage.keys("powerauth/test-instance/").unwrap().is_empty());
}

#[test]
fn namespaces_are_isolated() {
    let storage = Arc::new(MemoryStorage::new());
    let a = KeyStore::new(storage.clone(), "bank");
    let b = KeyStore::new(storage.clone(), "wallet");
    a.initialize().unwrap();
    b.initialize().unwrap();

    a.put_sealed("record", b"bank-record").unwrap();
    assert!(b.get_sealed("record").unwrap().is_none());

    a.wipe().unwrap();
    assert!(b.is_initialized().unwrap());
}

// ── Sealed entries ───────────────────────────────────────────────

#[test]
fn sealed_roundtrip() {
    let (_, store) = store();
    store.put_sealed("possession", b"key bytes").unwrap();
    assert_eq!(
        store.get_sealed("possession").unwrap().unwrap(),
        b"key bytes"
    );
}

#[test]
fn sealed_entries_are_not_plaintext_at_rest() {
    let (storage, store) = store();
    store.put_sealed("record", b"super secret record").unwrap();

    let raw = storage
        .get("powerauth/test-instance/record")
        .unwrap()
        .unwrap();
    let raw_text = String::from_utf8_lossy(&raw);
    assert!(!raw_text.contains("super secret record"));
}

#[test]
fn missing_sealed_entry_is_none() {
    let (_, store) = store();
    assert!(store.get_sealed("absent").unwrap().is_none());
}

#[test]
fn json_roundtrip() {
    let (_, store) = store();

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Record {
        id: String,
        count: u64,
    }

    let record = Record {
        id: "abc".to_string(),
        count: 7,
    };
    store.put_json("record", &record).unwrap();
    let restored: Record = store.get_json("record").unwrap().unwrap();
    assert_eq!(restored, record);
}

#[test]
fn overwrite_replaces_value() {
    let (_, store) = store();
    store.put_sealed("entry", b"v1").unwrap();
    store.put_sealed("entry", b"v2").unwrap();
    assert_eq!(store.get_sealed("entry").unwrap().unwrap(), b"v2");
}

// ── Guarded entries ──────────────────────────────────────────────

#[test]
fn guarded_roundtrip_with_correct_key() {
    let (_, store) = store();
    let unlock = generate_random_key();
    store.put_guarded("biometry", &unlock, b"factor key").unwrap();

    let out = store
        .with_guarded("biometry", &unlock, |bytes| bytes.to_vec())
        .unwrap();
    assert_eq!(out, b"factor key");
}

#[test]
fn guarded_rejects_wrong_key() {
    let (_, store) = store();
    store
        .put_guarded("biometry", &generate_random_key(), b"factor key")
        .unwrap();

    let result = store.with_guarded("biometry", &generate_random_key(), |bytes| bytes.to_vec());
    assert!(matches!(result, Err(KeyStoreError::Crypto(_))));
}

#[test]
fn guarded_missing_entry_reported() {
    let (_, store) = store();
    let result = store.with_guarded("absent", &generate_random_key(), |_| ());
    assert!(matches!(result, Err(KeyStoreError::EntryNotFound(_))));
}

// ── Concealed entries ────────────────────────────────────────────

#[test]
fn concealed_roundtrip_with_correct_key() {
    let (_, store) = store();
    let unlock = DerivedKey::from_bytes([3u8; 32]);
    store
        .put_concealed("knowledge", &unlock, &[0xaau8; 32])
        .unwrap();

    let out = store
        .with_concealed("knowledge", &unlock, |bytes| bytes.to_vec())
        .unwrap();
    assert_eq!(out, [0xaau8; 32]);
}

#[test]
fn concealed_wrong_key_yields_garbage_not_error() {
    let (_, store) = store();
    let right = DerivedKey::from_bytes([3u8; 32]);
    let wrong = DerivedKey::from_bytes([4u8; 32]);
    store
        .put_concealed("knowledge", &right, &[0xaau8; 32])
        .unwrap();

    let out = store
        .with_concealed("knowledge", &wrong, |bytes| bytes.to_vec())
        .unwrap();
    assert_eq!(out.len(), 32);
    assert_ne!(out, [0xaau8; 32]);
}

#[test]
fn delete_is_idempotent() {
    let (_, store) = store();
    store.put_sealed("entry", b"x").unwrap();
    store.delete("entry").unwrap();
    store.delete("entry").unwrap();
    assert!(!store.contains("entry").unwrap());
}
