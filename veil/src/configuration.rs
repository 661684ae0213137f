// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::net::IpAddr;

use clap::{ArgAction, Parser};
use serde::Serialize;
use url::Url;

/// Veil's configuration. Built from command line flags at startup,
/// immutable thereafter, and shared read-only across all components.
#[derive(Debug, Clone, Parser, Serialize)]
#[command(author, version, about, long_about = None)]
pub struct VeilOptions {
    /// TCP port of the Internet-facing (TLS) web server. The port is not
    /// directly reachable; the EC2 host forwards Internet traffic to it.
    #[arg(long, default_value = "8443", env("VEIL_EXT_PORT"))]
    pub ext_port: u16,

    /// TCP port of the enclave-internal (plaintext) web server, used only
    /// by the enclave application.
    #[arg(long, default_value = "8080", env("VEIL_INT_PORT"))]
    pub int_port: u16,

    /// Fully qualified domain name set in the external listener's HTTPS
    /// certificate, e.g. "example.com".
    #[arg(long, env("VEIL_FQDN"))]
    pub fqdn: String,

    /// The enclave application's web server, e.g. "http://127.0.0.1:8081".
    /// Veil reverse-proxies unrecognized external requests to this server.
    /// Non-HTTP enclave applications can leave this unset.
    #[arg(long, env("VEIL_APP_WEB_SRV"))]
    pub app_web_srv: Option<Url>,

    /// Command that starts the enclave application. Veil runs it once the
    /// internal web server responds, and shuts down when it exits.
    #[arg(long, env("VEIL_APP_CMD"))]
    pub app_cmd: Option<String>,

    /// IP address of the DNS resolver the enclave should use.
    #[arg(long, default_value = "1.1.1.1", env("VEIL_RESOLVER"))]
    pub resolver: IpAddr,

    /// The vsock port for the packet tunnel to the host-side proxy.
    #[arg(long, default_value = "1024", env("VEIL_VSOCK_PORT"))]
    pub vsock_port: u32,

    /// Wait for the application's readiness signal
    /// (GET http://127.0.0.1:<int-port>/enclave/ready) before starting the
    /// Internet-facing web server.
    #[arg(long, default_value = "false", action = ArgAction::SetTrue)]
    pub wait_for_app: bool,

    /// Facilitate local testing: use the noop attester, skip the system
    /// sanity checks, and run without the packet tunnel.
    #[arg(long, default_value = "false", action = ArgAction::SetTrue)]
    pub insecure: bool,

    /// Enable debug logging. Only useful with nitro-cli's --debug-mode.
    #[arg(long, default_value = "false", action = ArgAction::SetTrue)]
    pub debug: bool,

    /// URI of the source code running inside the enclave, shown on the
    /// index page as part of the remote attestation instructions.
    #[arg(long, env("VEIL_ENCLAVE_CODE_URI"))]
    pub enclave_code_uri: Option<String>,
}

impl VeilOptions {
    /// Checks field combinations that clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ext_port == 0 {
            anyhow::bail!("--ext-port must be a valid port number");
        }
        if self.int_port == 0 {
            anyhow::bail!("--int-port must be a valid port number");
        }
        if self.vsock_port == 0 {
            anyhow::bail!("--vsock-port must not be 0");
        }
        Ok(())
    }
}

impl Default for VeilOptions {
    fn default() -> Self {
        VeilOptions {
            ext_port: 8443,
            int_port: 8080,
            fqdn: "example.com".to_string(),
            app_web_srv: None,
            app_cmd: None,
            resolver: "1.1.1.1".parse().expect("valid resolver address"),
            vsock_port: 1024,
            wait_for_app: false,
            insecure: true,
            debug: false,
            enclave_code_uri: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let options = VeilOptions::parse_from(["veil", "--fqdn", "example.com"]);
        assert_eq!(options.ext_port, 8443);
        assert_eq!(options.int_port, 8080);
        assert_eq!(options.vsock_port, 1024);
        assert!(!options.wait_for_app);
        assert!(!options.insecure);
        options.validate().unwrap();
    }

    #[test]
    fn test_parse_flags() {
        let options = VeilOptions::parse_from([
            "veil",
            "--fqdn",
            "enclave.example.com",
            "--ext-port",
            "443",
            "--app-web-srv",
            "http://127.0.0.1:8081",
            "--wait-for-app",
            "--insecure",
        ]);
        assert_eq!(options.ext_port, 443);
        assert!(options.wait_for_app);
        assert!(options.insecure);
        assert_eq!(
            options.app_web_srv.unwrap().as_str(),
            "http://127.0.0.1:8081/"
        );
    }

    #[test]
    fn test_validate_rejects_zero_vsock_port() {
        let options = VeilOptions {
            vsock_port: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        let result =
            VeilOptions::try_parse_from(["veil", "--fqdn", "example.com", "--ext-port", "65536"]);
        assert!(result.is_err());
    }
}
