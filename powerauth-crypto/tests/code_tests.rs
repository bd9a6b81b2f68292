use powerauth_crypto::ActivationCode;

// ── Generation ───────────────────────────────────────────────────

#[test]
fn generated_code_has_canonical_shape() {
    let code = ActivationCode::generate();
    let text = code.canonical();
    let groups: Vec<&str> = text.split('-').collect();
    assert_eq!(groups.len(), 4);
    for group in groups {
        assert_eq!(group.len(), 5);
        assert!(group
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
    }
}

#[test]
fn generated_code_parses_back() {
    for _ in 0..20 {
        let code = ActivationCode::generate();
        let parsed = ActivationCode::parse(&code.canonical()).unwrap();
        assert_eq!(parsed, code);
    }
}

#[test]
fn generated_codes_are_unique() {
    let a = ActivationCode::generate();
    let b = ActivationCode::generate();
    assert_ne!(a, b);
}

// ── Validation ───────────────────────────────────────────────────

#[test]
fn corrupted_character_fails_checksum() {
    let code = ActivationCode::generate().canonical();
    let mut chars: Vec<char> = code.chars().collect();
    // Flip the first character to a different alphabet member.
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    let corrupted: String = chars.into_iter().collect();
    assert!(ActivationCode::parse(&corrupted).is_err());
}

#[test]
fn wrong_grouping_rejected() {
    assert!(ActivationCode::parse("AAAAA-AAAAA-AAAAA").is_err());
    assert!(ActivationCode::parse("AAAA-AAAAA-AAAAA-AAAAAA").is_err());
    assert!(ActivationCode::parse("AAAAAAAAAAAAAAAAAAAA").is_err());
    assert!(ActivationCode::parse("").is_err());
}

#[test]
fn characters_outside_alphabet_rejected() {
    // 0, 1, 8, 9 are not in the RFC 4648 Base32 alphabet.
    assert!(ActivationCode::parse("AAAA0-AAAAA-AAAAA-AAAAA").is_err());
    assert!(ActivationCode::parse("AAAA1-AAAAA-AAAAA-AAAAA").is_err());
    assert!(ActivationCode::parse("aaaaa-aaaaa-aaaaa-aaaaa").is_err());
}

#[test]
fn all_zero_code_fails_checksum() {
    // 20 'A' characters decode cleanly but carry a zero checksum over
    // nonzero CRC input space only by coincidence; CRC16(0..0) == 0,
    // so this one actually parses. Use a nonzero prefix instead.
    assert!(ActivationCode::parse("BAAAA-AAAAA-AAAAA-AAAAA").is_err());
}

#[test]
fn display_matches_canonical() {
    let code = ActivationCode::generate();
    assert_eq!(code.to_string(), code.canonical());
}

#[test]
fn from_str_parses() {
    let code = ActivationCode::generate();
    let parsed: ActivationCode = code.canonical().parse().unwrap();
    assert_eq!(parsed, code);
}

#[test]
fn serde_roundtrip_revalidates() {
    let code = ActivationCode::generate();
    let json = serde_json::to_string(&code).unwrap();
    let parsed: ActivationCode = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, code);

    let bad: Result<ActivationCode, _> =
        serde_json::from_str("\"AAAAB-AAAAA-AAAAA-AAAAA\"");
    assert!(bad.is_err());
}
