// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Service topology and lifecycle.
//!
//! Veil runs two HTTP listeners: an internal one at `127.0.0.1:<int-port>`
//! (plaintext, reachable only from within the enclave) and an external one
//! at `0.0.0.0:<ext-port>` (TLS, fronting the Internet). The startup order
//! is fixed: system checks and setup, certificate mint, packet tunnel,
//! internal listener, readiness gate, external listener. A single shutdown
//! signal propagates to both listeners and the tunnel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use axum_server::tls_rustls::RustlsConfig;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::attester::Attester;
use crate::builder::AttestationBuilder;
use crate::configuration::VeilOptions;
use crate::constants::{REQUEST_BODY_LIMIT, REQUEST_TIMEOUT};
use crate::hashes::{Sha256Hash, SharedHashes};
use crate::routes::{self, ReadyLatch};
use crate::{nitro_root_cert, system, tls, tunnel};

/// How long in-flight requests get to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// An HTTP client suitable for the single-host reverse proxy.
pub type ProxyClient = hyper_util::client::legacy::Client<
    hyper_util::client::legacy::connect::HttpConnector,
    axum::body::Body,
>;

fn new_proxy_client() -> ProxyClient {
    hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(hyper_util::client::legacy::connect::HttpConnector::new())
}

/// State shared by all route handlers.
pub struct AppState {
    pub options: VeilOptions,
    pub builder: AttestationBuilder,
    pub hashes: Arc<SharedHashes>,
    pub ready: ReadyLatch,
    pub proxy: ProxyClient,
}

impl AppState {
    /// Builds the shared state plus the receiving end of the readiness
    /// latch.
    pub fn new(
        options: VeilOptions,
        attester: Arc<Attester>,
        hashes: Arc<SharedHashes>,
    ) -> (Arc<Self>, tokio::sync::oneshot::Receiver<()>) {
        let builder = AttestationBuilder::new(attester, hashes.clone());
        let (ready, ready_rx) = ReadyLatch::new();
        let state = Arc::new(Self {
            options,
            builder,
            hashes,
            ready,
            proxy: new_proxy_client(),
        });
        (state, ready_rx)
    }
}

/// The router served by the external (TLS) listener.
pub fn external_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/enclave", get(routes::index))
        .route("/enclave/config", get(routes::config))
        .route("/enclave/attestation", get(routes::attestation))
        .fallback(routes::proxy)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

/// The router served by the internal (plaintext) listener.
pub fn internal_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/enclave/hashes", get(routes::hashes))
        .route("/enclave/hash", post(routes::app_hash));
    if state.options.wait_for_app {
        router = router.route("/enclave/ready", get(routes::ready));
    }
    router
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

/// Runs the service until `shutdown` fires.
pub async fn run(
    options: VeilOptions,
    attester: Arc<Attester>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    check_system_safety(&options).context("failed system safety check")?;
    setup_system(&options).context("failed to set up system")?;

    // Mint the TLS certificate for the external listener and anchor it in
    // future attestation documents.
    let (cert_pem, key_pem) =
        tls::create_certificate(&options.fqdn).context("failed to create certificate")?;
    let hashes = Arc::new(SharedHashes::default());
    hashes.set_tls_hash(Sha256Hash::of(cert_pem.as_bytes()));

    let (state, ready_rx) = AppState::new(options.clone(), attester, hashes);

    // Set up the packet tunnel to the host-side proxy.
    if !options.insecure {
        tokio::spawn(tunnel::supervise(options.vsock_port, shutdown.clone()));
    }

    // Start the internal web server.
    let int_addr = SocketAddr::from(([127, 0, 0, 1], options.int_port));
    let int_handle = axum_server::Handle::new();
    let int_server = axum_server::bind(int_addr)
        .handle(int_handle.clone())
        .serve(internal_router(state.clone()).into_make_service());
    let int_task = tokio::spawn(int_server);
    tracing::info!("[veil] starting internal web server at http://{int_addr}");

    // If desired, wait for the application's readiness signal before
    // exposing the external web server.
    if options.wait_for_app {
        tracing::info!("[veil] waiting for the application's readiness signal");
        let mut shutdown = shutdown.clone();
        tokio::select! {
            _ = ready_rx => {}
            _ = shutdown.changed() => {
                int_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                let _ = int_task.await;
                return Ok(());
            }
        }
    }

    // Start the external web server.
    let tls_config = RustlsConfig::from_pem(cert_pem.into_bytes(), key_pem.into_bytes())
        .await
        .context("failed to build TLS configuration")?;
    let ext_addr = SocketAddr::from(([0, 0, 0, 0], options.ext_port));
    let ext_handle = axum_server::Handle::new();
    let ext_server = axum_server::bind_rustls(ext_addr, tls_config)
        .handle(ext_handle.clone())
        .serve(external_router(state).into_make_service());
    let ext_task = tokio::spawn(ext_server);
    tracing::info!("[veil] starting external web server at https://{ext_addr}");

    // Block until cancellation, then shut both servers down.
    let mut shutdown = shutdown.clone();
    let _ = shutdown.changed().await;
    tracing::info!("[veil] shutting down");
    int_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    ext_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    let _ = int_task.await;
    let _ = ext_task.await;

    Ok(())
}

/// Sanity checks that must pass before the service starts. Skipped under
/// `--insecure`, which is meant for environments without the Nitro
/// hypervisor.
fn check_system_safety(options: &VeilOptions) -> anyhow::Result<()> {
    if options.insecure {
        return Ok(());
    }

    if !nitro_root_cert::verify_root_cert_hash() {
        anyhow::bail!("embedded root certificate does not match expected hash");
    }
    if !system::has_secure_rng() {
        anyhow::bail!("system does not use the NSM hardware RNG");
    }
    Ok(())
}

/// One-time system setup. Skipped under `--insecure`, where the resolver,
/// entropy pool, and loopback interface are the host's business.
fn setup_system(options: &VeilOptions) -> anyhow::Result<()> {
    if options.insecure {
        return Ok(());
    }

    system::set_resolver(&options.resolver)?;
    system::seed_randomness()?;
    system::setup_loopback()?;
    Ok(())
}

/// Completes when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("[veil] received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("[veil] received SIGTERM, starting graceful shutdown");
        }
    }
}
