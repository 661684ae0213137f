// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Hashes over key material that get embedded in attestation documents.
//!
//! Two digests tie an attestation document to the keys a client ends up
//! talking to: the hash over the service's TLS certificate (always set at
//! startup) and an optional hash that the enclave application registers
//! for its own key material via `POST /enclave/hash`.

use std::fmt;
use std::sync::Mutex;

use data_encoding::BASE64;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A SHA-256 digest, carried as a Base64 string on the JSON wire.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    /// Hashes the given bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Returns the Base64 representation of the digest.
    pub fn b64(&self) -> String {
        BASE64.encode(&self.0)
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.b64())
    }
}

impl Serialize for Sha256Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.b64())
    }
}

impl<'de> Deserialize<'de> for Sha256Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(s.as_bytes())
            .map_err(|err| de::Error::custom(format!("hash is not valid Base64: {err}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("hash must decode to exactly 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// Rejection of a malformed serialized hash pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid hash format")]
pub struct InvalidFormat;

/// The pair of key-material hashes embedded in attestation documents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashes {
    /// Hash over the service's PEM-encoded TLS certificate. Always set
    /// once the service is running.
    #[serde(default)]
    pub tls_key_hash: Option<Sha256Hash>,
    /// Hash over the enclave application's key material. Only set once the
    /// application has registered it.
    #[serde(default)]
    pub app_key_hash: Option<Sha256Hash>,
}

impl Hashes {
    /// Serializes the pair into its auxiliary-field format, e.g.:
    ///   sha256:3CMEDy2oTLyBCLE2BufzgUy6zIY=...;sha256:92AfmU4AXOKZ...
    /// or, with the application hash unset:
    ///   sha256:gDH6rnBA5e+dzTDeZv429hmWuYg=...;sha256:
    pub fn serialize(&self) -> Vec<u8> {
        let tls = self.tls_key_hash.map(|h| h.b64()).unwrap_or_default();
        let app = self.app_key_hash.map(|h| h.b64()).unwrap_or_default();
        format!("sha256:{tls};sha256:{app}").into_bytes()
    }

    /// The inverse of [`Hashes::serialize`]. Rejects input that does not
    /// consist of exactly two semicolon-separated segments, or whose hash
    /// segments do not Base64-decode to exactly 32 bytes.
    pub fn deserialize(b: &[u8]) -> Result<Self, InvalidFormat> {
        let s = std::str::from_utf8(b).map_err(|_| InvalidFormat)?;
        let segments: Vec<&str> = s.split(';').collect();
        let &[tls, app] = segments.as_slice() else {
            return Err(InvalidFormat);
        };

        let decode = |segment: &str| -> Result<Sha256Hash, InvalidFormat> {
            let b64 = segment.strip_prefix("sha256:").unwrap_or(segment);
            let bytes = BASE64.decode(b64.as_bytes()).map_err(|_| InvalidFormat)?;
            let bytes: [u8; 32] = bytes.try_into().map_err(|_| InvalidFormat)?;
            Ok(Sha256Hash(bytes))
        };

        let tls_key_hash = Some(decode(tls)?);
        // The application's hash is optional.
        let app_key_hash = match app.strip_prefix("sha256:").unwrap_or(app) {
            "" => None,
            _ => Some(decode(app)?),
        };

        Ok(Self {
            tls_key_hash,
            app_key_hash,
        })
    }
}

/// [`Hashes`] behind a mutex: the TLS slot is written once at startup, the
/// application slot whenever the application uploads a new hash, and the
/// attestation builder reads the pair on every attested response.
#[derive(Default)]
pub struct SharedHashes(Mutex<Hashes>);

impl SharedHashes {
    pub fn set_tls_hash(&self, hash: Sha256Hash) {
        self.lock().tls_key_hash = Some(hash);
    }

    pub fn set_app_hash(&self, hash: Option<Sha256Hash>) {
        self.lock().app_key_hash = hash;
    }

    /// Returns a copy of the current pair.
    pub fn snapshot(&self) -> Hashes {
        *self.lock()
    }

    /// Serializes the current pair into its auxiliary-field format.
    pub fn serialize(&self) -> Vec<u8> {
        self.lock().serialize()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Hashes> {
        self.0.lock().expect("hashes mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_hash(byte: u8) -> Sha256Hash {
        Sha256Hash([byte; 32])
    }

    #[test]
    fn test_serialize_roundtrip() {
        let hashes = Hashes {
            tls_key_hash: Some(random_hash(0x3c)),
            app_key_hash: Some(random_hash(0x92)),
        };
        assert_eq!(Hashes::deserialize(&hashes.serialize()).unwrap(), hashes);
    }

    #[test]
    fn test_serialize_roundtrip_without_app_hash() {
        let hashes = Hashes {
            tls_key_hash: Some(random_hash(0x80)),
            app_key_hash: None,
        };
        assert_eq!(Hashes::deserialize(&hashes.serialize()).unwrap(), hashes);
    }

    #[test]
    fn test_deserialize_rejects_wrong_segment_count() {
        assert_eq!(Hashes::deserialize(b"sha256:abc"), Err(InvalidFormat));
        assert_eq!(
            Hashes::deserialize(b"sha256:a;sha256:b;sha256:c"),
            Err(InvalidFormat)
        );
    }

    #[test]
    fn test_deserialize_rejects_bad_base64() {
        let good = Hashes {
            tls_key_hash: Some(random_hash(1)),
            app_key_hash: None,
        };
        let mut bytes = good.serialize();
        bytes[8] = b'!';
        assert_eq!(Hashes::deserialize(&bytes), Err(InvalidFormat));
    }

    #[test]
    fn test_deserialize_rejects_wrong_hash_length() {
        let short = BASE64.encode(&[0u8; 16]);
        let input = format!("sha256:{short};sha256:");
        assert_eq!(Hashes::deserialize(input.as_bytes()), Err(InvalidFormat));
    }

    #[test]
    fn test_json_accepts_null_and_missing_app_hash() {
        let hashes: Hashes = serde_json::from_str(r#"{"tls_key_hash": null}"#).unwrap();
        assert_eq!(hashes.app_key_hash, None);

        let b64 = random_hash(7).b64();
        let hashes: Hashes =
            serde_json::from_str(&format!(r#"{{"app_key_hash": "{b64}"}}"#)).unwrap();
        assert_eq!(hashes.app_key_hash, Some(random_hash(7)));
    }

    #[test]
    fn test_json_rejects_wrong_length_hash() {
        let b64 = BASE64.encode(&[0u8; 31]);
        let result: Result<Hashes, _> =
            serde_json::from_str(&format!(r#"{{"app_key_hash": "{b64}"}}"#));
        assert!(result.is_err());
    }

    #[test]
    fn test_shared_hashes_keeps_tls_slot() {
        let shared = SharedHashes::default();
        shared.set_tls_hash(random_hash(0xaa));
        shared.set_app_hash(Some(random_hash(0xbb)));

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.tls_key_hash, Some(random_hash(0xaa)));
        assert_eq!(snapshot.app_key_hash, Some(random_hash(0xbb)));
    }
}
