use powerauth_types::{ActivationState, ActivationStatus};

#[test]
fn remaining_attempts_subtracts() {
    let status = ActivationStatus::new(ActivationState::Active, 2, 5);
    assert_eq!(status.remaining_attempts(), 3);
}

#[test]
fn remaining_attempts_saturates_at_zero() {
    let status = ActivationStatus::new(ActivationState::Blocked, 7, 5);
    assert_eq!(status.remaining_attempts(), 0);
}

#[test]
fn fresh_activation_has_full_budget() {
    let status = ActivationStatus::new(ActivationState::Active, 0, 5);
    assert_eq!(status.remaining_attempts(), 5);
}

#[test]
fn serialization_roundtrip() {
    let status = ActivationStatus::new(ActivationState::Blocked, 5, 5);
    let json = serde_json::to_string(&status).unwrap();
    let parsed: ActivationStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(status, parsed);
}
