// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The packet tunnel between the enclave and the host-side proxy.
//!
//! A single TCP-over-VSOCK connection carries all IP packets leaving and
//! entering the enclave. VSOCK is a stream transport, so packets are
//! re-delimited on the wire with a two-byte big-endian length prefix:
//!
//! ```text
//! +------------------+---------------------+
//! | Length (2 bytes) | Packet (N bytes)    |
//! | big-endian       | raw IP packet       |
//! +------------------+---------------------+
//! ```
//!
//! Two forwarders run concurrently, one per direction. The tunnel is
//! best-effort: when either direction fails, both sides are closed and the
//! supervisor redials with bounded exponential backoff. Packet loss during
//! downtime is visible to the application as connection failures.

use std::time::Duration;

use anyhow::{Context, anyhow};
use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_vsock::{VsockAddr, VsockStream};

use crate::constants::{MAX_BACKOFF, MIN_BACKOFF, PROXY_CID, TUN_ADDR, TUN_MTU, TUN_NAME, TUN_NETMASK};

const LEN_PREFIX_SIZE: usize = 2;

/// Runs the tunnel until `shutdown` fires, redialing on failure.
///
/// The backoff doubles after every failed attempt, capped at
/// [`MAX_BACKOFF`], and resets to [`MIN_BACKOFF`] once a connection has
/// both forwarders running.
pub async fn supervise(port: u32, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = MIN_BACKOFF;
    loop {
        match setup_tunnel(port, &mut backoff, &mut shutdown).await {
            // The tunnel only returns cleanly on cancellation.
            Ok(()) => return,
            Err(err) => tracing::warn!("[veil] tunnel failed: {err:#}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return,
        }
        backoff = cap_backoff(backoff * 2);
    }
}

fn cap_backoff(backoff: Duration) -> Duration {
    backoff.min(MAX_BACKOFF)
}

/// Establishes the tunnel and forwards traffic until either forwarder
/// fails or `shutdown` fires. Blocks while the tunnel is up.
async fn setup_tunnel(
    port: u32,
    backoff: &mut Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let conn = VsockStream::connect(VsockAddr::new(PROXY_CID, port))
        .await
        .context("failed to connect to host proxy")?;
    tracing::info!("[veil] established TCP connection with host proxy");

    let tun = setup_tun().context("failed to set up tun device")?;
    tracing::info!("[veil] set up tun device");

    let (vsock_read, vsock_write) = tokio::io::split(conn);
    let (tun_read, tun_write) = tokio::io::split(tun);

    let (err_tx, mut err_rx) = mpsc::channel(2);
    let outbound = tokio::spawn(tun_to_vsock(tun_read, vsock_write, err_tx.clone()));
    let inbound = tokio::spawn(vsock_to_tun(vsock_read, tun_write, err_tx));
    tracing::info!("[veil] started tasks to forward traffic");

    // Only now that both forwarders are running does the connection count
    // as successful.
    *backoff = MIN_BACKOFF;

    let result = tokio::select! {
        // Surface the first error; the tunnel is torn down as a whole.
        Some(err) = err_rx.recv() => Err(err),
        _ = shutdown.changed() => Ok(()),
    };
    outbound.abort();
    inbound.abort();
    result
}

/// Forwards packets from the tun device to the TCP-over-VSOCK connection,
/// framing each with a length prefix. Runs until a read or write fails
/// (EOF included), then closes the output side and reports the error.
pub async fn tun_to_vsock<R, W>(mut from: R, mut to: W, errors: mpsc::Sender<anyhow::Error>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut packet = vec![0u8; TUN_MTU];
    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + TUN_MTU);

    let err = loop {
        match from.read(&mut packet).await {
            Ok(0) => break std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            Ok(n) => {
                let mut len_buf = [0u8; LEN_PREFIX_SIZE];
                BigEndian::write_u16(&mut len_buf, n as u16);
                frame.clear();
                frame.extend_from_slice(&len_buf);
                frame.extend_from_slice(&packet[..n]);
                // A single write per packet; frames must not interleave.
                if let Err(err) = to.write_all(&frame).await {
                    break err;
                }
            }
            Err(err) => break err,
        }
    };

    let _ = to.shutdown().await;
    let _ = errors
        .send(anyhow!(err).context("stopped tun-to-vsock forwarding"))
        .await;
}

/// Forwards packets from the TCP-over-VSOCK connection to the tun device,
/// reading the length prefix and then exactly that many payload bytes.
/// Runs until a read or write fails (EOF included), then closes the output
/// side and reports the error.
pub async fn vsock_to_tun<R, W>(mut from: R, mut to: W, errors: mpsc::Sender<anyhow::Error>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX_SIZE];
    let mut packet = vec![0u8; TUN_MTU];

    let err = loop {
        if let Err(err) = from.read_exact(&mut len_buf).await {
            break err;
        }
        let len = BigEndian::read_u16(&len_buf) as usize;

        if let Err(err) = from.read_exact(&mut packet[..len]).await {
            break err;
        }
        if let Err(err) = to.write_all(&packet[..len]).await {
            break err;
        }
    };

    let _ = to.shutdown().await;
    let _ = errors
        .send(anyhow!(err).context("stopped vsock-to-tun forwarding"))
        .await;
}

/// Creates and configures the enclave-side tun device.
fn setup_tun() -> anyhow::Result<tokio_tun::Tun> {
    tokio_tun::Tun::builder()
        .name(TUN_NAME)
        .tap(false)
        .packet_info(false)
        .mtu(TUN_MTU as i32)
        .address(TUN_ADDR.parse().context("invalid tun address")?)
        .netmask(TUN_NETMASK.parse().context("invalid tun netmask")?)
        .up()
        .try_build()
        .map_err(|err| anyhow!("failed to create tun device: {err}"))
}
