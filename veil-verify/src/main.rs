// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Companion tool that checks whether a remote enclave runs the code it
//! claims to run.
//!
//! The tool takes the locally reproduced image measurements, fetches a
//! live attestation document from the enclave (bound to a fresh nonce),
//! verifies it against the pinned AWS Nitro root, and compares the
//! document's PCR values with the expected ones.

mod measurements;

use anyhow::Context;
use clap::{ArgAction, Parser};
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use url::Url;
use veil::attestation::AttestationError;
use veil::attester::{Attester, RawDocument};
use veil::constants::PARAM_NONCE;
use veil::http_client;
use veil::nonce::Nonce;
use veil::pcr::Pcrs;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct VerifyOptions {
    /// Address of the enclave, e.g. https://example.com:8443
    #[arg(long)]
    addr: String,

    /// JSON-encoded enclave image measurements, as emitted by the
    /// reproducible image build.
    #[arg(long)]
    measurements: String,

    /// Expect a noop attestation document. Only useful against an enclave
    /// that also runs with --insecure; the result carries no authority.
    #[arg(long, default_value = "false", action = ArgAction::SetTrue)]
    insecure: bool,

    /// Enable extra logging.
    #[arg(long, default_value = "false", action = ArgAction::SetTrue)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = VerifyOptions::parse();

    let default_level = if options.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .init();

    let expected = measurements::to_pcrs(&options.measurements)?;
    attest_enclave(&options, &expected).await
}

/// Fetches and verifies the enclave's attestation document, then compares
/// its PCR values against the expected ones.
async fn attest_enclave(options: &VerifyOptions, expected: &Pcrs) -> anyhow::Result<()> {
    // A fresh nonce ensures that we are talking to a live enclave rather
    // than to a replayed attestation document.
    let nonce = Nonce::new();
    let url = build_url(&options.addr, &nonce)?;

    // We don't verify HTTPS certificates because authentication happens
    // via the attestation document, not the TLS PKI.
    let client = http_client::new_unauth_client()?;
    let response = client
        .get(url.as_str())
        .send()
        .await
        .context("failed to request attestation document")?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .context("failed to read response body")?;
    if !status.is_success() {
        anyhow::bail!(
            "enclave returned {status} with body: {}",
            String::from_utf8_lossy(&body)
        );
    }

    let raw: RawDocument =
        serde_json::from_slice(&body).context("failed to parse attestation document")?;

    let attester = if options.insecure {
        Attester::new_noop()
    } else {
        Attester::new_nitro()
    };
    let mut doc = match attester.verify(&raw, Some(&nonce)) {
        Ok(doc) => doc,
        Err(AttestationError::DebugMode(doc)) => {
            tracing::warn!("enclave runs in debug mode; its memory is exposed to the host");
            *doc
        }
        Err(err) => {
            return Err(err).context("failed to verify attestation document");
        }
    };

    // The NSM pads its response with empty registers that carry no
    // measurement; drop them before comparing.
    doc.pcrs.remove_empty();

    if expected.equal(&doc.pcrs) {
        println!("{}", "Enclave's code matches local code!".green());
    } else {
        println!("{}", "Enclave's code DOES NOT match local code!".red());
        println!("Expected PCRs:\n{expected}but got PCRs:\n{}", doc.pcrs);
    }
    Ok(())
}

fn build_url(addr: &str, nonce: &Nonce) -> anyhow::Result<Url> {
    let mut url = Url::parse(addr).context("failed to parse enclave address")?;
    url.set_path("/enclave/attestation");
    url.query_pairs_mut().append_pair(PARAM_NONCE, &nonce.b64());
    Ok(url)
}
