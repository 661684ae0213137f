// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Enclave system setup: entropy, DNS, and the loopback interface.
//!
//! A freshly booted Nitro Enclave has an empty entropy pool, no DNS
//! configuration, and a downed loopback interface. These routines run once
//! at startup, before the web servers come up, and are skipped under
//! `--insecure` because none of them work outside an enclave.

use std::net::IpAddr;

use anyhow::Context;

/// Path to the kernel's currently selected hardware RNG.
const PATH_TO_RNG: &str = "/sys/devices/virtual/misc/hw_random/rng_current";

/// The RNG we insist on: the Nitro Secure Module's hardware RNG.
const WANT_RNG: &str = "nsm-hwrng";

/// A Nitro Enclave's /etc/resolv.conf is a symlink into this directory,
/// which does not exist at boot.
const RESOLVCONF_DIR: &str = "/run/resolvconf";

/// Returns true if the kernel draws randomness from the Nitro hardware
/// RNG. Suggested in:
/// <https://blog.trailofbits.com/2024/09/24/notes-on-aws-nitro-enclaves-attack-surface/>
pub fn has_secure_rng() -> bool {
    match std::fs::read_to_string(PATH_TO_RNG) {
        Ok(have) => have.trim() == WANT_RNG,
        Err(err) => {
            tracing::error!("[veil] failed to read {PATH_TO_RNG}: {err}");
            false
        }
    }
}

/// Points the enclave's DNS resolution at the given resolver.
pub fn set_resolver(resolver: &IpAddr) -> anyhow::Result<()> {
    tracing::info!("[veil] setting DNS resolver to {resolver}");
    std::fs::create_dir_all(RESOLVCONF_DIR)
        .with_context(|| format!("failed to create {RESOLVCONF_DIR}"))?;
    std::fs::write(
        format!("{RESOLVCONF_DIR}/resolv.conf"),
        resolv_conf(resolver),
    )
    .context("failed to write resolv.conf")
}

fn resolv_conf(resolver: &IpAddr) -> String {
    format!("nameserver {resolver}\n")
}

/// Seeds the system entropy pool with randomness from the Nitro Secure
/// Module. Each chunk written to /dev/random is followed by an
/// RNDADDTOENTCNT ioctl so the kernel credits the entropy.
#[cfg(target_os = "linux")]
pub fn seed_randomness() -> anyhow::Result<()> {
    use aws_nitro_enclaves_nsm_api::api::{Request, Response};
    use std::io::Write;

    use crate::attester::NsmSession;
    use crate::constants::ENTROPY_SEED_LEN;

    tracing::info!("[veil] seeding system entropy pool");
    let session = NsmSession::open().context("failed to open NSM session")?;

    let mut device = std::fs::OpenOptions::new()
        .write(true)
        .open("/dev/random")
        .context("failed to open /dev/random")?;

    let mut total = 0;
    while total < ENTROPY_SEED_LEN {
        let random = match session.send(Request::GetRandom) {
            Response::GetRandom { random } if !random.is_empty() => random,
            Response::GetRandom { .. } => anyhow::bail!("got no random bytes from NSM"),
            Response::Error(code) => anyhow::bail!("NSM GetRandom failed: {code:?}"),
            _ => anyhow::bail!("unexpected NSM response type"),
        };

        device
            .write_all(&random)
            .context("failed to write to /dev/random")?;
        credit_entropy(&device, random.len())?;
        total += random.len();
    }
    Ok(())
}

/// Tells the kernel to update its entropy count for the bytes just
/// written.
#[cfg(target_os = "linux")]
fn credit_entropy(device: &std::fs::File, count: usize) -> anyhow::Result<()> {
    use std::os::fd::AsRawFd;

    // _IOW('R', 0x01, int) from linux/random.h; libc does not export it.
    const RNDADDTOENTCNT: libc::c_ulong = 0x4004_5201;

    let count = count as libc::c_int;
    let rc = unsafe { libc::ioctl(device.as_raw_fd(), RNDADDTOENTCNT, &count) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("RNDADDTOENTCNT ioctl failed");
    }
    Ok(())
}

/// Brings up the loopback interface with 127.0.0.1/8.
#[cfg(target_os = "linux")]
pub fn setup_loopback() -> anyhow::Result<()> {
    use std::net::Ipv4Addr;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    tracing::info!("[veil] setting up loopback interface");

    fn sockaddr_of(addr: Ipv4Addr) -> libc::sockaddr {
        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from(addr).to_be(),
            },
            sin_zero: [0; 8],
        };
        // sockaddr_in and sockaddr share their size and layout prefix.
        unsafe { std::mem::transmute(sin) }
    }

    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return Err(std::io::Error::last_os_error()).context("failed to open socket");
        }
        // Closes the socket on every return path below.
        let socket = OwnedFd::from_raw_fd(fd);

        let mut ifr: libc::ifreq = std::mem::zeroed();
        for (dst, src) in ifr.ifr_name.iter_mut().zip(b"lo\0") {
            *dst = *src as libc::c_char;
        }

        ifr.ifr_ifru.ifru_addr = sockaddr_of(Ipv4Addr::LOCALHOST);
        if libc::ioctl(socket.as_raw_fd(), libc::SIOCSIFADDR, &ifr) != 0 {
            return Err(std::io::Error::last_os_error()).context("failed to set address");
        }

        ifr.ifr_ifru.ifru_netmask = sockaddr_of(Ipv4Addr::new(255, 0, 0, 0));
        if libc::ioctl(socket.as_raw_fd(), libc::SIOCSIFNETMASK, &ifr) != 0 {
            return Err(std::io::Error::last_os_error()).context("failed to set netmask");
        }

        if libc::ioctl(socket.as_raw_fd(), libc::SIOCGIFFLAGS, &mut ifr) != 0 {
            return Err(std::io::Error::last_os_error()).context("failed to get flags");
        }
        ifr.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        if libc::ioctl(socket.as_raw_fd(), libc::SIOCSIFFLAGS, &ifr) != 0 {
            return Err(std::io::Error::last_os_error()).context("failed to set flags");
        }
    }
    Ok(())
}

/// Stub for development machines; the real implementations require a Linux
/// kernel (and, for entropy, the NSM device).
#[cfg(not(target_os = "linux"))]
pub fn seed_randomness() -> anyhow::Result<()> {
    anyhow::bail!("entropy seeding is only available on Linux")
}

#[cfg(not(target_os = "linux"))]
pub fn setup_loopback() -> anyhow::Result<()> {
    anyhow::bail!("loopback setup is only available on Linux")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolv_conf_format() {
        let resolver: IpAddr = "1.1.1.1".parse().unwrap();
        assert_eq!(resolv_conf(&resolver), "nameserver 1.1.1.1\n");
    }

    #[test]
    fn test_has_secure_rng_outside_enclave() {
        // Test machines either lack the sysfs file or run another RNG;
        // the check must fail closed rather than panic.
        let _ = has_secure_rng();
    }
}
