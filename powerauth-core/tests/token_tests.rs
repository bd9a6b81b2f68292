use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use powerauth_core::biometry::mock::MockBiometry;
use powerauth_core::transport::mock::{MockServer, APPLICATION_KEY, APPLICATION_SECRET};
use powerauth_core::{
    compute_token_digest, ActivationEngine, Authentication, PowerAuth, PowerAuthConfig,
    PowerAuthError, ReplayCounter, TOKEN_HEADER_NAME,
};
use powerauth_crypto::{ActivationCode, KdfParams};
use powerauth_keystore::MemoryStorage;
use powerauth_types::InstanceId;
use pretty_assertions::assert_eq;

const PASSWORD: &str = "1404";
const DEVICE_NAME: &str = "Integration Test Device";

fn cheap_kdf() -> KdfParams {
    KdfParams {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

fn config_for(server: &MockServer, instance: &str) -> PowerAuthConfig {
    PowerAuthConfig::new(
        InstanceId::new(instance).unwrap(),
        APPLICATION_KEY,
        APPLICATION_SECRET,
        server.master_public_key(),
        "https://api.example.com/enrollment",
    )
    .unwrap()
    .with_kdf_params(cheap_kdf())
}

async fn make_engine(server: &Arc<MockServer>) -> Arc<ActivationEngine> {
    let registry = PowerAuth::new(
        Arc::new(MemoryStorage::new()),
        server.clone(),
        Arc::new(MockBiometry::new()),
    );
    registry
        .configure(config_for(server, "wallet"))
        .await
        .unwrap()
}

async fn make_active_engine(server: &Arc<MockServer>) -> (Arc<ActivationEngine>, String) {
    let engine = make_engine(server).await;
    let id = engine
        .create_activation(&ActivationCode::generate().canonical(), DEVICE_NAME)
        .await
        .unwrap();
    engine.commit_activation(PASSWORD, None).await.unwrap();
    (engine, id.as_str().to_string())
}

// ── Token ceremony ───────────────────────────────────────────────

#[tokio::test]
async fn token_ceremony_issues_verifiable_headers() {
    let server = Arc::new(MockServer::new());
    let (engine, id) = make_active_engine(&server).await;

    let token = engine
        .request_access_token("push", &Authentication::possession_with_password(PASSWORD))
        .await
        .unwrap();
    assert_eq!(token.name, "push");
    assert_eq!(server.token_count(&id), Some(1));

    let header = engine.token_header("push").await.unwrap();
    assert_eq!(header.token_id, token.token_id);
    assert_eq!(header.version, "3.0");
    assert_eq!(STANDARD.decode(&header.nonce).unwrap().len(), 16);

    // A resource server recomputes the digest from its copy of the secret.
    let secret = STANDARD
        .decode(server.token_secret(&id, &token.token_id).unwrap())
        .unwrap();
    let expected = compute_token_digest(&secret, &header.nonce, header.timestamp).unwrap();
    assert_eq!(header.digest, expected);

    // The rendered value goes out under the protocol's header name.
    assert_eq!(TOKEN_HEADER_NAME, "X-PowerAuth-Token");
    let value = header.header_value();
    assert!(value.starts_with("PowerAuth "));
    assert!(value.contains(&format!("token_id=\"{}\"", header.token_id)));
    assert!(value.contains(&format!("token_digest=\"{}\"", header.digest)));
}

#[tokio::test]
async fn repeated_request_returns_same_token() {
    let server = Arc::new(MockServer::new());
    let (engine, id) = make_active_engine(&server).await;
    let auth = Authentication::possession_with_password(PASSWORD);

    let first = engine.request_access_token("push", &auth).await.unwrap();
    let second = engine.request_access_token("push", &auth).await.unwrap();

    assert_eq!(first.token_id, second.token_id);
    assert_eq!(server.token_count(&id), Some(1));
    let creates = server
        .calls()
        .iter()
        .filter(|c| *c == "token/create")
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn distinct_names_get_distinct_tokens() {
    let server = Arc::new(MockServer::new());
    let (engine, id) = make_active_engine(&server).await;
    let auth = Authentication::possession_with_password(PASSWORD);

    let push = engine.request_access_token("push", &auth).await.unwrap();
    let stats = engine.request_access_token("stats", &auth).await.unwrap();

    assert_ne!(push.token_id, stats.token_id);
    assert_eq!(server.token_count(&id), Some(2));
}

#[tokio::test]
async fn unknown_token_name_is_rejected() {
    let server = Arc::new(MockServer::new());
    let (engine, _id) = make_active_engine(&server).await;

    let err = engine.token_header("ghost").await.unwrap_err();
    assert!(matches!(err, PowerAuthError::InvalidToken(name) if name == "ghost"));

    let err = engine
        .remove_access_token("ghost", &Authentication::possession_with_password(PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, PowerAuthError::InvalidToken(_)));
}

#[tokio::test]
async fn empty_token_name_is_rejected() {
    let server = Arc::new(MockServer::new());
    let (engine, _id) = make_active_engine(&server).await;
    let calls_before = server.calls().len();

    let err = engine
        .request_access_token("", &Authentication::possession_with_password(PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, PowerAuthError::WrongParameter(_)));
    assert_eq!(server.calls().len(), calls_before);
}

// ── Token headers ────────────────────────────────────────────────

#[tokio::test]
async fn token_headers_do_not_consume_signing_counter() {
    let server = Arc::new(MockServer::new());
    let (engine, _id) = make_active_engine(&server).await;
    engine
        .request_access_token("push", &Authentication::possession_with_password(PASSWORD))
        .await
        .unwrap();

    let before = engine
        .sign_request(&Authentication::possession(), "POST", "/pa/ping", b"{}")
        .await
        .unwrap();
    for _ in 0..5 {
        engine.token_header("push").await.unwrap();
    }
    let after = engine
        .sign_request(&Authentication::possession(), "POST", "/pa/ping", b"{}")
        .await
        .unwrap();

    // Five token headers later the chain has moved by exactly one step.
    let seed: [u8; 16] = STANDARD.decode(&before.nonce).unwrap().try_into().unwrap();
    let counter = ReplayCounter::HashChain { ctr_data: seed };
    assert_eq!(
        counter.advanced().element(),
        STANDARD.decode(&after.nonce).unwrap()
    );

    engine.validate_password(PASSWORD).await.unwrap();
}

#[tokio::test]
async fn token_headers_vary_per_use() {
    let server = Arc::new(MockServer::new());
    let (engine, _id) = make_active_engine(&server).await;
    engine
        .request_access_token("push", &Authentication::possession_with_password(PASSWORD))
        .await
        .unwrap();

    let first = engine.token_header("push").await.unwrap();
    let second = engine.token_header("push").await.unwrap();

    assert_ne!(first.nonce, second.nonce);
    assert!(second.timestamp >= first.timestamp);
}

// ── Token removal ────────────────────────────────────────────────

#[tokio::test]
async fn remove_token_forgets_both_sides() {
    let server = Arc::new(MockServer::new());
    let (engine, id) = make_active_engine(&server).await;
    let auth = Authentication::possession_with_password(PASSWORD);

    let token = engine.request_access_token("push", &auth).await.unwrap();
    engine.remove_access_token("push", &auth).await.unwrap();

    assert_eq!(server.token_count(&id), Some(0));
    let err = engine.token_header("push").await.unwrap_err();
    assert!(matches!(err, PowerAuthError::InvalidToken(_)));

    let renewed = engine.request_access_token("push", &auth).await.unwrap();
    assert_ne!(renewed.token_id, token.token_id);
}

#[tokio::test]
async fn remove_tolerates_revoked_server_token() {
    let server = Arc::new(MockServer::new());
    let (engine, id) = make_active_engine(&server).await;
    let auth = Authentication::possession_with_password(PASSWORD);

    let token = engine.request_access_token("push", &auth).await.unwrap();
    server.revoke_token(&id, &token.token_id);

    engine.remove_access_token("push", &auth).await.unwrap();
    let err = engine.token_header("push").await.unwrap_err();
    assert!(matches!(err, PowerAuthError::InvalidToken(_)));
}

#[tokio::test]
async fn token_creation_requires_verified_signature() {
    let server = Arc::new(MockServer::new());
    let (engine, id) = make_active_engine(&server).await;

    let err = engine
        .request_access_token("push", &Authentication::possession_with_password("0000"))
        .await
        .unwrap_err();
    assert!(matches!(err, PowerAuthError::Signature(_)));
    assert_eq!(server.token_count(&id), Some(0));
    assert_eq!(server.fail_count(&id), Some(1));
}

#[tokio::test]
async fn tokens_are_wiped_with_activation() {
    let server = Arc::new(MockServer::new());
    let (engine, _id) = make_active_engine(&server).await;
    let auth = Authentication::possession_with_password(PASSWORD);

    engine.request_access_token("push", &auth).await.unwrap();
    engine.remove_activation(&auth).await.unwrap();

    let err = engine.token_header("push").await.unwrap_err();
    assert!(matches!(err, PowerAuthError::MissingActivation));
}

// ── Persistence ──────────────────────────────────────────────────

#[tokio::test]
async fn tokens_survive_restart() {
    let server = Arc::new(MockServer::new());
    let storage = Arc::new(MemoryStorage::new());
    let registry = PowerAuth::new(
        storage.clone(),
        server.clone(),
        Arc::new(MockBiometry::new()),
    );
    let engine = registry
        .configure(config_for(&server, "wallet"))
        .await
        .unwrap();
    let id = engine
        .create_activation(&ActivationCode::generate().canonical(), DEVICE_NAME)
        .await
        .unwrap();
    engine.commit_activation(PASSWORD, None).await.unwrap();
    let token = engine
        .request_access_token("push", &Authentication::possession_with_password(PASSWORD))
        .await
        .unwrap();
    drop(engine);
    drop(registry);

    let registry = PowerAuth::new(storage, server.clone(), Arc::new(MockBiometry::new()));
    let engine = registry
        .configure(config_for(&server, "wallet"))
        .await
        .unwrap();
    let header = engine.token_header("push").await.unwrap();
    assert_eq!(header.token_id, token.token_id);

    let secret = STANDARD
        .decode(server.token_secret(id.as_str(), &token.token_id).unwrap())
        .unwrap();
    let expected = compute_token_digest(&secret, &header.nonce, header.timestamp).unwrap();
    assert_eq!(header.digest, expected);

    let creates = server
        .calls()
        .iter()
        .filter(|c| *c == "token/create")
        .count();
    assert_eq!(creates, 1);
}
