// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Returned when a byte slice is shorter than a fixed-width type requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid length: got {got} bytes but need at least {need}")]
pub struct InvalidLength {
    pub got: usize,
    pub need: usize,
}

/// Application-level errors surfaced to HTTP clients.
///
/// Handlers never panic on client input; every error maps to a JSON body of
/// the form `{"error": "<message>"}` with a request-attributable (4xx) or
/// server-attributable (5xx) status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("could not find nonce in URL query parameters")]
    NoNonce,
    #[error("unexpected nonce format; must be Base64 string")]
    BadNonceFormat,
    #[error("unexpected nonce length: {0}")]
    BadNonceLength(InvalidLength),
    #[error("{0}")]
    BadRequest(String),
    #[error("failed to attest HTTP request: {0}")]
    Attestation(String),
    #[error("failed to reach application web server: {0}")]
    BadGateway(String),
    #[error("internal server error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NoNonce | Self::BadNonceFormat | Self::BadNonceLength(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Attestation(_) | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(json!({"error": self.to_string()}));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(source: serde_json::Error) -> Self {
        tracing::error!("{:?}", source);
        AppError::Internal
    }
}

impl From<anyhow::Error> for AppError {
    fn from(source: anyhow::Error) -> Self {
        tracing::error!("{:?}", source);
        AppError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_nonce_body() {
        let response = AppError::NoNonce.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json["error"],
            "could not find nonce in URL query parameters"
        );
    }

    #[tokio::test]
    async fn test_bad_gateway_status() {
        let response = AppError::BadGateway("refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
