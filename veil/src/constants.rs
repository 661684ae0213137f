// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Compile-time constants shared across the veil sidecar.

use std::time::Duration;

/// Length of a freshness nonce in bytes.
pub const NONCE_LEN: usize = 20;

/// Maximum length of each auxiliary field in an attestation document.
/// See page 65 of the AWS Nitro Enclaves user guide:
/// <https://docs.aws.amazon.com/pdfs/enclaves/latest/user/enclaves-user.pdf>
pub const AUX_FIELD_LEN: usize = 1024;

/// The CID of the parent EC2 instance. According to AWS docs, it is always 3:
/// <https://docs.aws.amazon.com/enclaves/latest/user/nitro-enclave-concepts.html>
pub const PROXY_CID: u32 = 3;

/// Default vsock port for the connection to the host-side proxy.
pub const DEFAULT_VSOCK_PORT: u32 = 1024;

/// MTU of the tunnel's tun device. The tunnel's two-byte length prefix
/// limits a single packet to 65535 bytes, so the MTU must not exceed this.
pub const TUN_MTU: usize = 65535;

/// Initial reconnection backoff for the packet tunnel.
pub const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound for the tunnel's reconnection backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// The HTTP response header carrying the JSON-encoded attestation document.
///
/// The header may exceed 8 KiB but still fits comfortably into the 1 MiB
/// default header limit of common HTTP servers.
pub const ATTESTATION_HEADER: &str = "X-Veil-Attestation";

/// URL query parameter that clients use to submit a nonce.
pub const PARAM_NONCE: &str = "nonce";

/// Maximum request body size (1 MB) for both HTTP listeners.
pub const REQUEST_BODY_LIMIT: usize = 1024 * 1024;

/// Request timeout for both HTTP listeners.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout of the unauthenticated HTTP client.
pub const UNAUTH_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of NSM-provided random bytes used to seed the system entropy pool.
pub const ENTROPY_SEED_LEN: usize = 2048;

/// Validity of the external listener's self-signed certificate.
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Organization embedded in the self-signed certificate.
pub const CERT_ORG: &str = "veil";

/// Address of the tunnel's enclave-side tun device.
pub const TUN_ADDR: &str = "10.0.0.2";

/// Netmask of the tunnel's enclave-side tun device.
pub const TUN_NETMASK: &str = "255.255.255.252";

/// Name of the tunnel's enclave-side tun device.
pub const TUN_NAME: &str = "tun0";
