//! Route table and status codes through the full router.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use blst::min_pk::SecretKey;
use serde_json::{json, Value};
use tower::ServiceExt;
use vigil_api::{router, ApiContext};
use vigil_core::{SignerIdentifier, TaskRegistry, Version};
use vigil_keys::{
    ArtifactSigner, BlsArtifactSigner, KeystoreFileManager, ProxyKeysConfig, SignerRegistry,
};
use vigil_protection::{DbSlashingProtection, SlashingProtection, StoreConfig};
use vigil_signing::{CommitBoostSigner, KeyManager, SigningOrchestrator, SigningRootCalculator};

struct App {
    _dir: tempfile::TempDir,
    router: Router,
    key: SignerIdentifier,
}

async fn app(key_manager: bool) -> App {
    let dir = tempfile::tempdir().unwrap();
    let protection: Arc<dyn SlashingProtection> = Arc::new(
        DbSlashingProtection::open(&StoreConfig::new(dir.path().join("protection.db"))).unwrap(),
    );
    let registry = SignerRegistry::builder().spawn();
    let secret = SecretKey::key_gen(&[1; 32], &[]).unwrap().to_bytes();
    let signer = Arc::new(BlsArtifactSigner::from_secret_bytes(&secret).unwrap());
    let key = signer.identifier().clone();
    registry.add_signer(signer).await.unwrap();

    let keys_dir = dir.path().join("keys");
    std::fs::create_dir(&keys_dir).unwrap();
    let proxy_password = dir.path().join("proxy.password");
    std::fs::write(&proxy_password, "proxy-pw").unwrap();
    let proxy_keys = ProxyKeysConfig {
        directory: dir.path().join("proxies"),
        password_file: proxy_password,
    };
    let context = ApiContext {
        orchestrator: SigningOrchestrator::new(
            registry.clone(),
            Some(protection.clone()),
            SigningRootCalculator::new(Version::ZERO, 32).unwrap(),
        ),
        commit_boost: CommitBoostSigner::new(registry.clone(), Version::ZERO)
            .with_proxy_keys(proxy_keys)
            .with_kdf_iterations(2),
        key_manager: key_manager.then(|| {
            KeyManager::new(
                registry.clone(),
                Some(protection.clone()),
                KeystoreFileManager::new(&keys_dir),
            )
        }),
        protection: Some(protection),
        tasks: Arc::new(TaskRegistry::new()),
    };
    App {
        _dir: dir,
        router: router(context),
        key,
    }
}

fn block(slot: u64, body: u8) -> Value {
    json!({
        "type": "BLOCK",
        "fork_info": {
            "fork": {"previous_version": "0x00000000", "current_version": "0x01000000", "epoch": "1"},
            "genesis_validators_root": format!("0x{}", "aa".repeat(32)),
        },
        "block": {
            "slot": slot.to_string(),
            "proposer_index": "5",
            "parent_root": format!("0x{}", "11".repeat(32)),
            "state_root": format!("0x{}", "22".repeat(32)),
            "body_root": format!("0x{}", hex::encode([body; 32])),
        }
    })
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn sign_returns_text_or_json() {
    let app = app(false).await;
    let uri = format!("/api/v1/eth2/sign/{}", app.key.to_prefixed());

    let (status, text) = send(&app.router, post(&uri, &block(33, 0x33))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with("0x"));
    assert_eq!(text.len(), 2 + 96 * 2);

    let mut request = post(&uri, &block(33, 0x33));
    request
        .headers_mut()
        .insert(header::ACCEPT, "application/json".parse().unwrap());
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["signature"], text);
}

#[tokio::test]
async fn sign_status_codes() {
    let app = app(false).await;
    let uri = format!("/api/v1/eth2/sign/{}", app.key.as_str());

    let (status, _) = send(&app.router, post(&uri, &block(33, 0x33))).await;
    assert_eq!(status, StatusCode::OK);

    // Double proposal.
    let (status, _) = send(&app.router, post(&uri, &block(33, 0x44))).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);

    let unknown = format!(
        "/api/v1/eth2/sign/{}",
        SignerIdentifier::from_public_key(&[7; 48]).to_prefixed()
    );
    let (status, _) = send(&app.router, post(&unknown, &block(40, 0x33))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app.router, post(&uri, &json!({"type": "BLOCK"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut mismatched = block(41, 0x33);
    mismatched["signingRoot"] = json!(format!("0x{}", "01".repeat(32)));
    let (status, _) = send(&app.router, post(&uri, &mismatched)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn public_keys_and_health() {
    let app = app(false).await;

    let (status, body) = send(&app.router, get("/api/v1/eth2/publicKeys")).await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<String> = serde_json::from_str(&body).unwrap();
    assert_eq!(keys, vec![app.key.to_prefixed()]);

    let (status, body) = send(&app.router, get("/upcheck")).await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"));

    let (status, body) = send(&app.router, get("/healthcheck")).await;
    assert_eq!(status, StatusCode::OK);
    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["status"], "UP");
    assert_eq!(report["checks"][0]["data"]["keys_loaded"], 1);

    let (status, _) = send(&app.router, post("/reload", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn key_manager_routes_follow_configuration() {
    let disabled = app(false).await;
    let (status, _) = send(&disabled.router, get("/eth/v1/keystores")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let enabled = app(true).await;
    let (status, body) = send(&enabled.router, get("/eth/v1/keystores")).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(listed["data"][0]["validating_pubkey"], enabled.key.to_prefixed());

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/eth/v1/keystores")
        .body(Body::from(
            json!({"pubkeys": [SignerIdentifier::from_public_key(&[7; 48]).to_prefixed()]})
                .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&enabled.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let deleted: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(deleted["data"][0]["status"], "not_found");
}

#[tokio::test]
async fn commit_boost_signs_with_consensus_key() {
    let app = app(false).await;

    let (status, body) = send(&app.router, get("/signer/v1/get_pubkeys")).await;
    assert_eq!(status, StatusCode::OK);
    let keys: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(keys["keys"][0]["consensus"], app.key.to_prefixed());

    let request = json!({
        "type": "consensus",
        "pubkey": app.key.to_prefixed(),
        "object_root": format!("0x{}", "55".repeat(32)),
    });
    let (status, body) = send(&app.router, post("/signer/v1/request_signature", &request)).await;
    assert_eq!(status, StatusCode::OK);
    let signature: String = serde_json::from_str(&body).unwrap();
    assert!(signature.starts_with("0x"));

    let proxy = json!({
        "type": "proxy_bls",
        "proxy": app.key.to_prefixed(),
        "object_root": format!("0x{}", "55".repeat(32)),
    });
    let (status, _) = send(&app.router, post("/signer/v1/request_signature", &proxy)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn commit_boost_generates_proxy_keys() {
    let app = app(false).await;

    for scheme in ["BLS", "ECDSA"] {
        let request = json!({"pubkey": app.key.to_prefixed(), "scheme": scheme});
        let (status, body) =
            send(&app.router, post("/signer/v1/generate_proxy_key", &request)).await;
        assert_eq!(status, StatusCode::OK);
        let delegation: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(delegation["message"]["delegator"], app.key.to_prefixed());
        assert!(delegation["signature"].as_str().unwrap().starts_with("0x"));
    }

    let (_, body) = send(&app.router, get("/signer/v1/get_pubkeys")).await;
    let keys: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(keys["keys"][0]["proxy_bls"].as_array().unwrap().len(), 1);
    assert_eq!(keys["keys"][0]["proxy_ecdsa"].as_array().unwrap().len(), 1);

    let unknown = json!({
        "pubkey": SignerIdentifier::from_public_key(&[9; 48]).to_prefixed(),
        "scheme": "bls",
    });
    let (status, _) = send(&app.router, post("/signer/v1/generate_proxy_key", &unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let malformed = json!({"pubkey": app.key.to_prefixed(), "scheme": "rsa"});
    let (status, _) = send(&app.router, post("/signer/v1/generate_proxy_key", &malformed)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
