use powerauth_types::{ProtocolVersion, SignatureFactor};

// ── Protocol versions ────────────────────────────────────────────

#[test]
fn latest_is_v3() {
    assert_eq!(ProtocolVersion::latest(), ProtocolVersion::V3);
}

#[test]
fn versions_order_by_age() {
    assert!(ProtocolVersion::V2 < ProtocolVersion::V3);
}

#[test]
fn header_labels() {
    assert_eq!(ProtocolVersion::V2.as_str(), "2.1");
    assert_eq!(ProtocolVersion::V3.as_str(), "3.0");
}

#[test]
fn parses_known_labels() {
    assert_eq!("2.0".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V2);
    assert_eq!("2.1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V2);
    assert_eq!("3.0".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V3);
}

#[test]
fn rejects_unknown_label() {
    assert!("4.0".parse::<ProtocolVersion>().is_err());
    assert!("".parse::<ProtocolVersion>().is_err());
}

// ── Signature factors ────────────────────────────────────────────

#[test]
fn factors_in_canonical_order() {
    assert_eq!(
        SignatureFactor::ALL,
        [
            SignatureFactor::Possession,
            SignatureFactor::Knowledge,
            SignatureFactor::Biometry,
        ]
    );
    assert!(SignatureFactor::Possession < SignatureFactor::Knowledge);
    assert!(SignatureFactor::Knowledge < SignatureFactor::Biometry);
}

#[test]
fn factor_labels() {
    assert_eq!(SignatureFactor::Possession.as_str(), "possession");
    assert_eq!(SignatureFactor::Knowledge.as_str(), "knowledge");
    assert_eq!(SignatureFactor::Biometry.as_str(), "biometry");
}
