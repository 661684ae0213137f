// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use veil::application;
use veil::attester::Attester;
use veil::configuration::VeilOptions;
use veil::http_client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the rustls crypto provider before any TLS operations.
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    let options = VeilOptions::parse();

    let default_level = if options.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .init();

    options.validate()?;
    tracing::info!("[veil] {:?}", &options);

    // A single cancellation signal reaches every long-lived task: both web
    // servers, the tunnel supervisor, and the application command.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = Arc::new(shutdown_tx);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        application::shutdown_signal().await;
        let _ = signal_shutdown.send(true);
    });

    // Run the application command, if specified. When the application
    // stops or crashes, veil terminates.
    if let Some(cmd) = options.app_cmd.clone() {
        let app_shutdown = shutdown.clone();
        let int_port = options.int_port;
        tokio::spawn(async move {
            if let Err(err) = eventually_run_app_cmd(int_port, &cmd).await {
                tracing::error!("[veil] app unavailable: {err:#}");
            }
            let _ = app_shutdown.send(true);
        });
    }

    let attester = Arc::new(if options.insecure {
        tracing::warn!("[veil] using noop attester; documents carry no authority");
        Attester::new_noop()
    } else {
        Attester::new_nitro()
    });

    application::run(options, attester, shutdown_rx).await
}

/// Waits for the internal web server to come up, then runs the
/// application command and waits for it to terminate.
async fn eventually_run_app_cmd(int_port: u16, cmd: &str) -> anyhow::Result<()> {
    let client = http_client::new_unauth_client()?;
    let url = format!("http://127.0.0.1:{int_port}");
    http_client::wait_for_svc(&client, &url, Duration::from_secs(10))
        .await
        .context("internal service did not come up")?;
    tracing::info!("[veil] internal service ready; running app command");

    run_app_cmd(cmd).await
}

async fn run_app_cmd(cmd: &str) -> anyhow::Result<()> {
    let args: Vec<&str> = cmd.split_whitespace().collect();
    let (program, rest) = args.split_first().context("app command is empty")?;

    tracing::info!("[veil] starting application");
    let status = tokio::process::Command::new(program)
        .args(rest)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .context("failed to run app command")?;
    tracing::info!("[veil] application terminated");

    if !status.success() {
        anyhow::bail!("application exited with {status}");
    }
    Ok(())
}
