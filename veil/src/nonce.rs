// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Nonces guarantee the freshness of attestation documents.
//!
//! A client creates a nonce, embeds it in its attestation request, and
//! checks that the signed document echoes the same bytes back. Nonces
//! travel as standard Base64 (query-escaped when placed in a URL).

use data_encoding::BASE64;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::constants::NONCE_LEN;
use crate::errors::InvalidLength;

/// A random value that guarantees attestation document freshness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce(pub [u8; NONCE_LEN]);

impl Nonce {
    /// Creates a new nonce from the operating system's CSPRNG.
    pub fn new() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Turns a byte slice into a nonce.
    ///
    /// Slices shorter than [`NONCE_LEN`] are rejected; longer slices are
    /// truncated to the first [`NONCE_LEN`] bytes.
    pub fn from_slice(s: &[u8]) -> Result<Self, InvalidLength> {
        if s.len() < NONCE_LEN {
            return Err(InvalidLength {
                got: s.len(),
                need: NONCE_LEN,
            });
        }
        let mut bytes = [0u8; NONCE_LEN];
        bytes.copy_from_slice(&s[..NONCE_LEN]);
        Ok(Self(bytes))
    }

    /// Returns the nonce as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the Base64 representation of the nonce.
    pub fn b64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Returns the nonce as a URL-escaped Base64 string, ready to be used
    /// as the value of a query parameter.
    pub fn url_encode(&self) -> String {
        url::form_urlencoded::byte_serialize(self.b64().as_bytes()).collect()
    }
}

impl Default for Nonce {
    fn default() -> Self {
        Self::new()
    }
}
