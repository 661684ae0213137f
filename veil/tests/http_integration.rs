// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP integration tests for veil's two listeners.
//!
//! These tests use `axum-test` to run the full request/response cycle
//! through the routers with all middleware applied, using the noop
//! attester in place of the Nitro hypervisor.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum_test::TestServer;
use sha2::{Digest, Sha256};
use veil::application::{AppState, external_router, internal_router};
use veil::attester::{Attester, DocType, RawDocument};
use veil::configuration::VeilOptions;
use veil::hashes::{Hashes, Sha256Hash};
use veil::nonce::Nonce;

const ZERO_NONCE_B64: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// The TLS-certificate hash every test server starts out with.
fn tls_hash() -> Sha256Hash {
    Sha256Hash([0xaa; 32])
}

fn test_state(options: VeilOptions) -> Arc<AppState> {
    let hashes = Arc::new(veil::hashes::SharedHashes::default());
    hashes.set_tls_hash(tls_hash());
    let (state, _ready_rx) = AppState::new(options, Arc::new(Attester::new_noop()), hashes);
    state
}

fn external_server(options: VeilOptions) -> TestServer {
    TestServer::new(external_router(test_state(options))).unwrap()
}

fn internal_server(options: VeilOptions) -> TestServer {
    TestServer::new(internal_router(test_state(options))).unwrap()
}

/// Starts a real HTTP backend that answers 418 to any request, standing in
/// for the enclave application's web server.
async fn spawn_teapot_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(|| async { StatusCode::IM_A_TEAPOT });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// =============================================================================
// Index
// =============================================================================

#[tokio::test]
async fn test_index_mentions_enclave() {
    let server = external_server(VeilOptions::default());
    let response = server.get("/enclave").await;
    response.assert_status_ok();
    assert!(response.text().contains("AWS Nitro Enclave"));
}

#[tokio::test]
async fn test_index_mentions_code_uri() {
    let options = VeilOptions {
        enclave_code_uri: Some("https://example.com/code".to_string()),
        ..Default::default()
    };
    let server = external_server(options);
    let response = server.get("/enclave").await;
    assert!(response.text().contains("https://example.com/code"));
}

// =============================================================================
// Attestation endpoint
// =============================================================================

#[tokio::test]
async fn test_attestation_happy_path() {
    let server = external_server(VeilOptions::default());
    let response = server
        .get("/enclave/attestation")
        .add_query_param("nonce", ZERO_NONCE_B64)
        .await;
    response.assert_status_ok();

    let raw: RawDocument = response.json();
    assert_eq!(raw.doc_type, DocType::Noop);

    let doc = Attester::new_noop().verify(&raw, None).unwrap();
    let aux = doc.aux_info();
    assert_eq!(&aux.nonce.unwrap()[..20], &[0u8; 20]);

    // The document also pins the service's key-material hashes.
    let embedded = Hashes::deserialize(&aux.public_key.unwrap()).unwrap();
    assert_eq!(embedded.tls_key_hash, Some(tls_hash()));
    assert_eq!(embedded.app_key_hash, None);
}

#[tokio::test]
async fn test_attestation_missing_nonce() {
    let server = external_server(VeilOptions::default());
    let response = server.get("/enclave/attestation").await;
    response.assert_status_bad_request();
    response.assert_json(&serde_json::json!({
        "error": "could not find nonce in URL query parameters"
    }));
}

#[tokio::test]
async fn test_attestation_malformed_nonce() {
    let server = external_server(VeilOptions::default());

    let response = server
        .get("/enclave/attestation")
        .add_query_param("nonce", "@@not-base64@@")
        .await;
    response.assert_status_bad_request();

    let short = data_encoding::BASE64.encode(&[0u8; 8]);
    let response = server
        .get("/enclave/attestation")
        .add_query_param("nonce", short)
        .await;
    response.assert_status_bad_request();
}

// =============================================================================
// Config endpoint
// =============================================================================

#[tokio::test]
async fn test_config_without_nonce_is_plain() {
    let server = external_server(VeilOptions::default());
    let response = server.get("/enclave/config").await;
    response.assert_status_ok();
    assert!(response.maybe_header("X-Veil-Attestation").is_none());

    let config: serde_json::Value = response.json();
    assert_eq!(config["ext_port"], 8443);
}

#[tokio::test]
async fn test_config_with_nonce_is_attested() {
    let server = external_server(VeilOptions::default());
    let nonce = Nonce::new();
    let response = server
        .get("/enclave/config")
        .add_query_param("nonce", nonce.b64())
        .await;
    response.assert_status_ok();

    let header = response
        .maybe_header("X-Veil-Attestation")
        .expect("attested response must carry the attestation header");
    let raw: RawDocument = serde_json::from_slice(header.as_bytes()).unwrap();
    let doc = Attester::new_noop().verify(&raw, None).unwrap();
    let aux = doc.aux_info();

    // The document echoes the nonce and pins the response body's digest.
    assert_eq!(&aux.nonce.unwrap()[..20], nonce.as_slice());
    let body_digest: [u8; 32] = Sha256::digest(response.text().as_bytes()).into();
    assert_eq!(aux.user_data.unwrap(), body_digest);
}

#[tokio::test]
async fn test_config_with_malformed_nonce() {
    let server = external_server(VeilOptions::default());
    let response = server
        .get("/enclave/config")
        .add_query_param("nonce", "???")
        .await;
    response.assert_status_bad_request();
}

// =============================================================================
// Ready latch
// =============================================================================

#[tokio::test]
async fn test_ready_latch() {
    let options = VeilOptions {
        wait_for_app: true,
        ..Default::default()
    };
    let server = internal_server(options);

    server.get("/enclave/ready").await.assert_status_ok();
    server
        .get("/enclave/ready")
        .await
        .assert_status(StatusCode::GONE);
    server
        .get("/enclave/ready")
        .await
        .assert_status(StatusCode::GONE);
}

#[tokio::test]
async fn test_ready_absent_without_wait_for_app() {
    let server = internal_server(VeilOptions::default());
    server
        .get("/enclave/ready")
        .await
        .assert_status_not_found();
}

// =============================================================================
// Hash upload
// =============================================================================

#[tokio::test]
async fn test_hash_upload_takes_app_hash_only() {
    let options = VeilOptions::default();
    let state = test_state(options);
    let server = TestServer::new(internal_router(state.clone())).unwrap();

    let posted = Hashes {
        tls_key_hash: Some(Sha256Hash([0x00; 32])),
        app_key_hash: Some(Sha256Hash([0x01; 32])),
    };
    server
        .post("/enclave/hash")
        .json(&posted)
        .await
        .assert_status_ok();

    let response = server.get("/enclave/hashes").await;
    response.assert_status_ok();
    let hashes: Hashes = response.json();

    // The posted TLS hash must not overwrite the server's own.
    assert_eq!(hashes.tls_key_hash, Some(tls_hash()));
    assert_eq!(hashes.app_key_hash, Some(Sha256Hash([0x01; 32])));
}

#[tokio::test]
async fn test_hash_upload_accepts_missing_app_hash() {
    let server = internal_server(VeilOptions::default());
    server
        .post("/enclave/hash")
        .json(&serde_json::json!({}))
        .await
        .assert_status_ok();

    let hashes: Hashes = server.get("/enclave/hashes").await.json();
    assert_eq!(hashes.app_key_hash, None);
}

#[tokio::test]
async fn test_hash_upload_rejects_garbage() {
    let server = internal_server(VeilOptions::default());
    let response = server
        .post("/enclave/hash")
        .bytes("{not json".into())
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_hash_upload_rejects_oversized_body() {
    let server = internal_server(VeilOptions::default());
    let oversized = format!("{{\"pad\": \"{}\"}}", "a".repeat(512));
    let response = server.post("/enclave/hash").bytes(oversized.into()).await;
    response.assert_status_bad_request();
}

// =============================================================================
// Reverse proxy
// =============================================================================

#[tokio::test]
async fn test_proxy_forwards_to_app_web_server() {
    let backend = spawn_teapot_backend().await;
    let options = VeilOptions {
        app_web_srv: Some(backend.parse().unwrap()),
        ..Default::default()
    };
    let server = external_server(options);

    // Unmatched paths reach the application...
    server
        .get("/")
        .await
        .assert_status(StatusCode::IM_A_TEAPOT);
    server
        .get("/api/v1/thing")
        .await
        .assert_status(StatusCode::IM_A_TEAPOT);

    // ...while /enclave endpoints are served locally.
    server.get("/enclave").await.assert_status_ok();
    server
        .get("/enclave/attestation")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_proxy_without_app_web_server_is_404() {
    let server = external_server(VeilOptions::default());
    server.get("/").await.assert_status_not_found();
}
