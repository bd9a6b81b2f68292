//! Property-based tests for the crypto module.
//!
//! These verify the properties the rest of the client leans on:
//! - Sealing is reversible with the correct key and fails closed otherwise
//! - The keystream wrap is reversible and never fails open into an oracle
//! - Factor derivation separates factors and activations
//! - Activation codes survive their encoding and reject corruption

use powerauth_crypto::{
    advance_counter_data, conceal, decrypt, derive_factor_key, encrypt, generate_random_key,
    reveal, ActivationCode, DerivedKey,
};
use powerauth_types::SignatureFactor;
use proptest::prelude::*;

fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2000)
}

fn key_strategy() -> impl Strategy<Value = DerivedKey> {
    prop::array::uniform32(any::<u8>()).prop_map(DerivedKey::from_bytes)
}

proptest! {
    #[test]
    fn seal_roundtrip_preserves_data(plaintext in plaintext_strategy(), key in key_strategy()) {
        let encrypted = encrypt(&key, &plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn seal_rejects_wrong_key(plaintext in plaintext_strategy(), key in key_strategy()) {
        let other = generate_random_key();
        prop_assume!(key.as_bytes() != other.as_bytes());
        let encrypted = encrypt(&key, &plaintext).unwrap();
        prop_assert!(decrypt(&other, &encrypted).is_err());
    }

    #[test]
    fn wrap_roundtrip_preserves_data(plaintext in plaintext_strategy(), key in key_strategy()) {
        let concealed = conceal(&key, &plaintext);
        prop_assert_eq!(reveal(&key, &concealed), plaintext);
    }

    #[test]
    fn wrap_never_fails_under_any_key(plaintext in plaintext_strategy(), key in key_strategy()) {
        let other = generate_random_key();
        let concealed = conceal(&key, &plaintext);
        // Must always produce output of the right length, even keyed wrong.
        prop_assert_eq!(reveal(&other, &concealed).len(), plaintext.len());
    }

    #[test]
    fn factor_keys_never_collide_across_activations(
        master in prop::array::uniform32(any::<u8>()),
        id_a in "[a-f0-9]{8}",
        id_b in "[a-f0-9]{8}",
    ) {
        prop_assume!(id_a != id_b);
        let master = DerivedKey::from_bytes(master);
        let a = derive_factor_key(&master, &id_a, SignatureFactor::Possession).unwrap();
        let b = derive_factor_key(&master, &id_b, SignatureFactor::Possession).unwrap();
        prop_assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn counter_data_advance_moves(ctr in prop::array::uniform16(any::<u8>())) {
        prop_assert_ne!(advance_counter_data(&ctr), ctr);
    }

    #[test]
    fn code_canonical_form_reparses(_seed in any::<u64>()) {
        let code = ActivationCode::generate();
        let parsed = ActivationCode::parse(&code.canonical()).unwrap();
        prop_assert_eq!(parsed, code);
    }

    #[test]
    fn code_rejects_single_character_corruption(
        _seed in any::<u64>(),
        position in 0usize..23,
    ) {
        let text = ActivationCode::generate().canonical();
        let mut chars: Vec<char> = text.chars().collect();
        prop_assume!(chars[position] != '-');
        let replacement = if chars[position] == 'A' { 'B' } else { 'A' };
        chars[position] = replacement;
        let corrupted: String = chars.into_iter().collect();
        prop_assert!(ActivationCode::parse(&corrupted).is_err());
    }
}
