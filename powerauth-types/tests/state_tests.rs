use powerauth_types::ActivationState;

// ── Wire codes ───────────────────────────────────────────────────

#[test]
fn wire_codes_match_protocol() {
    assert_eq!(ActivationState::Created.wire_code(), 1);
    assert_eq!(ActivationState::PendingCommit.wire_code(), 2);
    assert_eq!(ActivationState::Active.wire_code(), 3);
    assert_eq!(ActivationState::Blocked.wire_code(), 4);
    assert_eq!(ActivationState::Removed.wire_code(), 5);
    assert_eq!(ActivationState::Deadlock.wire_code(), 128);
}

#[test]
fn from_wire_code_roundtrip() {
    for code in [1u8, 2, 3, 4, 5, 128] {
        let state = ActivationState::from_wire_code(code).unwrap();
        assert_eq!(state.wire_code(), code);
    }
}

#[test]
fn from_wire_code_rejects_unknown() {
    for code in [0u8, 6, 7, 64, 127, 129, 255] {
        assert!(ActivationState::from_wire_code(code).is_err());
    }
}

#[test]
fn serializes_as_wire_code() {
    let json = serde_json::to_string(&ActivationState::Deadlock).unwrap();
    assert_eq!(json, "128");
    let parsed: ActivationState = serde_json::from_str("3").unwrap();
    assert_eq!(parsed, ActivationState::Active);
}

#[test]
fn deserialization_rejects_unknown_code() {
    let result: Result<ActivationState, _> = serde_json::from_str("42");
    assert!(result.is_err());
}

// ── Predicates ───────────────────────────────────────────────────

#[test]
fn terminal_states() {
    assert!(ActivationState::Removed.is_terminal());
    assert!(ActivationState::Deadlock.is_terminal());
    assert!(!ActivationState::Active.is_terminal());
    assert!(!ActivationState::Blocked.is_terminal());
}

#[test]
fn pending_states() {
    assert!(ActivationState::Created.is_pending());
    assert!(ActivationState::PendingCommit.is_pending());
    assert!(!ActivationState::Active.is_pending());
    assert!(!ActivationState::Removed.is_pending());
}

#[test]
fn only_active_allows_signing() {
    for code in [1u8, 2, 3, 4, 5, 128] {
        let state = ActivationState::from_wire_code(code).unwrap();
        assert_eq!(state.allows_signing(), state == ActivationState::Active);
    }
}

// ── Server transitions ───────────────────────────────────────────

#[test]
fn server_may_activate_pending_activation() {
    assert!(ActivationState::Created.accepts_server_transition(ActivationState::Active));
    assert!(ActivationState::PendingCommit.accepts_server_transition(ActivationState::Active));
}

#[test]
fn server_may_block_and_unblock() {
    assert!(ActivationState::Active.accepts_server_transition(ActivationState::Blocked));
    assert!(ActivationState::Blocked.accepts_server_transition(ActivationState::Active));
}

#[test]
fn server_may_remove_from_any_live_state() {
    for code in [1u8, 2, 3, 4] {
        let state = ActivationState::from_wire_code(code).unwrap();
        assert!(state.accepts_server_transition(ActivationState::Removed));
    }
}

#[test]
fn terminal_states_accept_nothing() {
    for terminal in [ActivationState::Removed, ActivationState::Deadlock] {
        for code in [1u8, 2, 3, 4, 5, 128] {
            let next = ActivationState::from_wire_code(code).unwrap();
            assert!(!terminal.accepts_server_transition(next));
        }
    }
}

#[test]
fn server_never_drives_deadlock() {
    for code in [1u8, 2, 3, 4] {
        let state = ActivationState::from_wire_code(code).unwrap();
        assert!(!state.accepts_server_transition(ActivationState::Deadlock));
    }
}

#[test]
fn server_cannot_regress_active_to_pending() {
    assert!(!ActivationState::Active.accepts_server_transition(ActivationState::Created));
    assert!(!ActivationState::Active.accepts_server_transition(ActivationState::PendingCommit));
}
