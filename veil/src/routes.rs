// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP route handlers for both of veil's listeners.
//!
//! External (TLS) listener:
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | GET | `/enclave` | [`index`] | Plain-text index page |
//! | GET | `/enclave/config` | [`config`] | The service configuration, attested if a nonce is given |
//! | GET | `/enclave/attestation` | [`attestation`] | A fresh attestation document |
//! | *   | `/*` | [`proxy`] | Reverse proxy to the application web server |
//!
//! Internal (plaintext) listener:
//!
//! | Method | Path | Handler | Description |
//! |--------|------|---------|-------------|
//! | GET | `/enclave/ready` | [`ready`] | One-shot readiness signal |
//! | GET | `/enclave/hashes` | [`hashes`] | The current key-material hashes |
//! | POST | `/enclave/hash` | [`app_hash`] | Register the application's key hash |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use data_encoding::BASE64;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use crate::application::AppState;
use crate::constants::{ATTESTATION_HEADER, PARAM_NONCE};
use crate::errors::AppError;
use crate::hashes::Hashes;
use crate::nonce::Nonce;

/// A one-shot readiness latch. The first [`ReadyLatch::signal`] call
/// completes the channel the service startup waits on; every later call
/// reports that the latch has already tripped.
pub struct ReadyLatch {
    sender: Mutex<Option<oneshot::Sender<()>>>,
}

impl ReadyLatch {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (sender, receiver) = oneshot::channel();
        let latch = Self {
            sender: Mutex::new(Some(sender)),
        };
        (latch, receiver)
    }

    /// Trips the latch. Returns true on the first call only; the mutex
    /// around the taken-once sender enforces exactly-once semantics across
    /// concurrent callers.
    pub fn signal(&self) -> bool {
        let mut sender = self.sender.lock().expect("ready latch mutex poisoned");
        match sender.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// Extracts the client's nonce from the request's query parameters, e.g.:
/// https://example.com/enclave/attestation?nonce=jtEcS7icZiwF5GMvmvnjuZ9xjcc%3D
fn extract_nonce(params: &HashMap<String, String>) -> Result<Nonce, AppError> {
    let value = params.get(PARAM_NONCE).ok_or(AppError::NoNonce)?;
    let raw = BASE64
        .decode(value.as_bytes())
        .map_err(|_| AppError::BadNonceFormat)?;
    Nonce::from_slice(&raw).map_err(AppError::BadNonceLength)
}

/// Informs the visitor that this host runs inside an enclave. Useful for
/// testing.
pub async fn index(State(state): State<Arc<AppState>>) -> String {
    let mut page = "This host runs inside an AWS Nitro Enclave.".to_string();
    if let Some(uri) = &state.options.enclave_code_uri {
        page.push_str(&format!(
            "\nThe application's source code is available at: {uri}."
        ));
    }
    page.push('\n');
    page
}

/// Returns the enclave's configuration. With a nonce present the response
/// is attested; without one it is plain JSON.
pub async fn config(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    if params.contains_key(PARAM_NONCE) {
        let nonce = extract_nonce(&params)?;
        encode_and_attest(&state, StatusCode::OK, &nonce, &state.options).await
    } else {
        Ok((StatusCode::OK, Json(state.options.clone())).into_response())
    }
}

/// Returns an attestation document embedding the client's nonce and the
/// service's key-material hashes.
pub async fn attestation(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let nonce = extract_nonce(&params)?;

    let builder = state.builder.clone();
    let raw = tokio::task::spawn_blocking(move || builder.attest(Some(&nonce), None))
        .await
        .map_err(|_| AppError::Internal)?
        .map_err(|err| AppError::Attestation(err.to_string()))?;

    Ok(Json(raw).into_response())
}

/// Signals that the enclave application is ready: 200 on the first call,
/// 410 Gone thereafter.
pub async fn ready(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.ready.signal() {
        StatusCode::OK
    } else {
        StatusCode::GONE
    }
}

/// Returns the hashes that get embedded in attestation documents.
pub async fn hashes(State(state): State<Arc<AppState>>) -> Json<Hashes> {
    Json(state.hashes.snapshot())
}

/// Lets the enclave application register a hash over its key material,
/// which ties the attestation document to the keys the application uses.
/// Only the `app_key_hash` field is taken; the TLS slot stays veil's.
pub async fn app_hash(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> Result<StatusCode, AppError> {
    let bytes = axum::body::to_bytes(body, max_hashes_len())
        .await
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let theirs: Hashes = serde_json::from_slice(&bytes)
        .map_err(|err| AppError::BadRequest(err.to_string()))?;
    state.hashes.set_app_hash(theirs.app_key_hash);

    Ok(StatusCode::OK)
}

/// The longest JSON encoding of a [`Hashes`] value, plus one byte for a
/// trailing newline. Requests to `/enclave/hash` are capped at this size.
fn max_hashes_len() -> usize {
    static LEN: OnceLock<usize> = OnceLock::new();
    *LEN.get_or_init(|| {
        let full = Hashes {
            tls_key_hash: Some(crate::hashes::Sha256Hash([0; 32])),
            app_key_hash: Some(crate::hashes::Sha256Hash([0; 32])),
        };
        serde_json::to_vec(&full).map(|b| b.len()).unwrap_or(0) + 1
    })
}

/// Forwards any unmatched external request to the application web server,
/// preserving method, path, query, headers, and body. Responds 404 when no
/// application web server is configured.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, AppError> {
    let Some(upstream) = &state.options.app_web_srv else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let (mut parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = format!(
        "{}://{}{}",
        upstream.scheme(),
        upstream.authority(),
        path_and_query
    );
    parts.uri = uri.parse().map_err(|_| AppError::Internal)?;

    parts
        .headers
        .insert("X-Forwarded-Proto", header::HeaderValue::from_static("https"));
    if let Ok(host) = header::HeaderValue::from_str(&state.options.fqdn) {
        parts.headers.insert("X-Forwarded-Host", host);
    }

    let response = state
        .proxy
        .request(Request::from_parts(parts, body))
        .await
        .map_err(|err| AppError::BadGateway(err.to_string()))?;

    Ok(response.map(Body::new))
}

/// Encodes `value` as the response body and attests it: the body's SHA-256
/// digest and the client's nonce go into a fresh attestation document,
/// which rides along in the response header.
///
/// The two-pass order matters: marshal the body, hash it, attest with the
/// hash, set the header, then write the body.
async fn encode_and_attest<T: Serialize>(
    state: &AppState,
    status: StatusCode,
    nonce: &Nonce,
    value: &T,
) -> Result<Response, AppError> {
    let body = serde_json::to_vec(value)?;
    let digest: [u8; 32] = Sha256::digest(&body).into();

    let builder = state.builder.clone();
    let nonce = *nonce;
    let raw = tokio::task::spawn_blocking(move || builder.attest(Some(&nonce), Some(digest)))
        .await
        .map_err(|_| AppError::Internal)?
        .map_err(|err| AppError::Attestation(err.to_string()))?;

    let header_value = serde_json::to_string(&raw)?;
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(ATTESTATION_HEADER, header_value)
        .body(Body::from(body))
        .map_err(|_| AppError::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_latch_trips_once() {
        let (latch, mut receiver) = ReadyLatch::new();
        assert!(latch.signal());
        assert!(!latch.signal());
        assert!(!latch.signal());
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn test_extract_nonce() {
        let mut params = HashMap::new();
        params.insert(
            PARAM_NONCE.to_string(),
            "AAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
        );
        let nonce = extract_nonce(&params).unwrap();
        assert_eq!(nonce.as_slice(), &[0u8; 20]);
    }

    #[test]
    fn test_extract_nonce_missing() {
        assert!(matches!(
            extract_nonce(&HashMap::new()),
            Err(AppError::NoNonce)
        ));
    }

    #[test]
    fn test_extract_nonce_not_base64() {
        let mut params = HashMap::new();
        params.insert(PARAM_NONCE.to_string(), "not base64!".to_string());
        assert!(matches!(
            extract_nonce(&params),
            Err(AppError::BadNonceFormat)
        ));
    }

    #[test]
    fn test_extract_nonce_too_short() {
        let mut params = HashMap::new();
        params.insert(PARAM_NONCE.to_string(), BASE64.encode(&[0u8; 12]));
        assert!(matches!(
            extract_nonce(&params),
            Err(AppError::BadNonceLength(_))
        ));
    }

    #[test]
    fn test_max_hashes_len_covers_full_value() {
        let full = Hashes {
            tls_key_hash: Some(crate::hashes::Sha256Hash([0xff; 32])),
            app_key_hash: Some(crate::hashes::Sha256Hash([0xff; 32])),
        };
        assert!(serde_json::to_vec(&full).unwrap().len() < max_hashes_len());
    }
}
