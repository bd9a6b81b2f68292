use powerauth_crypto::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt};

fn test_params() -> KdfParams {
    KdfParams {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

// ── derive_key ───────────────────────────────────────────────────

#[test]
fn derive_key_is_deterministic() {
    let salt = Salt::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
    let params = test_params();
    let key1 = derive_key("correct horse", &salt, &params).unwrap();
    let key2 = derive_key("correct horse", &salt, &params).unwrap();
    assert_eq!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn different_passwords_produce_different_keys() {
    let salt = Salt::from_bytes([7u8; 16]);
    let params = test_params();
    let key1 = derive_key("password1", &salt, &params).unwrap();
    let key2 = derive_key("password2", &salt, &params).unwrap();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn different_salts_produce_different_keys() {
    let params = test_params();
    let key1 = derive_key("same", &Salt::from_bytes([1u8; 16]), &params).unwrap();
    let key2 = derive_key("same", &Salt::from_bytes([2u8; 16]), &params).unwrap();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn unicode_password_derives() {
    let salt = Salt::from_bytes([9u8; 16]);
    let key = derive_key("p\u{00e4}ssw\u{00f6}rd", &salt, &test_params()).unwrap();
    assert_eq!(key.as_bytes().len(), 32);
}

#[test]
fn zero_time_cost_rejected() {
    let salt = Salt::from_bytes([1u8; 16]);
    let bad = KdfParams {
        memory_cost: 1024,
        time_cost: 0,
        parallelism: 1,
    };
    assert!(derive_key("pw", &salt, &bad).is_err());
}

// ── DerivedKey ───────────────────────────────────────────────────

#[test]
fn from_bytes_roundtrip() {
    let bytes = [42u8; 32];
    let key = DerivedKey::from_bytes(bytes);
    assert_eq!(*key.as_bytes(), bytes);
}

#[test]
fn from_slice_validates_length() {
    assert!(DerivedKey::from_slice(&[0u8; 32]).is_ok());
    assert!(DerivedKey::from_slice(&[0u8; 31]).is_err());
    assert!(DerivedKey::from_slice(&[0u8; 33]).is_err());
}

#[test]
fn debug_does_not_leak_bytes() {
    let key = generate_random_key();
    let debug = format!("{:?}", key);
    assert!(debug.contains("REDACTED"));
}

#[test]
fn random_keys_are_unique() {
    let key1 = generate_random_key();
    let key2 = generate_random_key();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

// ── Salt and params ──────────────────────────────────────────────

#[test]
fn salt_random_produces_unique() {
    assert_ne!(Salt::random().as_bytes(), Salt::random().as_bytes());
}

#[test]
fn salt_serde_roundtrip() {
    let salt = Salt::from_bytes([3u8; 16]);
    let json = serde_json::to_string(&salt).unwrap();
    let parsed: Salt = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, salt);
}

#[test]
fn kdf_params_default_values() {
    let params = KdfParams::default();
    assert_eq!(params.memory_cost, 19 * 1024);
    assert_eq!(params.time_cost, 2);
    assert_eq!(params.parallelism, 1);
}

#[test]
fn kdf_params_serde_roundtrip() {
    let params = test_params();
    let json = serde_json::to_string(&params).unwrap();
    let parsed: KdfParams = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, params);
}
