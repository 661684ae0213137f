// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! HTTP client helpers shared by the sidecar and the verifier.

use std::time::{Duration, Instant};

use anyhow::{Context, bail};

use crate::constants::UNAUTH_CLIENT_TIMEOUT;

/// Returns an HTTP client that skips HTTPS certificate validation.
///
/// In the context of veil, this is fine because all we need is a
/// confidential channel, not an authenticated one: authentication happens
/// at the next layer, using attestation documents.
pub fn new_unauth_client() -> anyhow::Result<reqwest::Client> {
    // More than one rustls crypto provider is compiled in; make sure one
    // is selected before the TLS configuration is built. A second install
    // is a no-op.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(UNAUTH_CLIENT_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Waits for the service at `url` to answer an HTTP GET request, polling
/// every 10 ms. Returns an error once `deadline` has elapsed without a
/// response.
pub async fn wait_for_svc(
    client: &reqwest::Client,
    url: &str,
    deadline: Duration,
) -> anyhow::Result<()> {
    let start = Instant::now();
    loop {
        if client.get(url).send().await.is_ok() {
            return Ok(());
        }
        if start.elapsed() > deadline {
            bail!("deadline exceeded waiting for {url}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_svc_deadline() {
        let client = new_unauth_client().unwrap();
        // Nothing listens on this port; the poll loop must give up.
        let err = wait_for_svc(
            &client,
            "http://127.0.0.1:1/",
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("deadline exceeded"));
    }

    #[tokio::test]
    async fn test_wait_for_svc_success() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route("/", axum::routing::get(|| async { "ok" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = new_unauth_client().unwrap();
        wait_for_svc(
            &client,
            &format!("http://{addr}/"),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    }
}
