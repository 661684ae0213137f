// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The pinned AWS Nitro Enclaves Root Certificate (G1).
//!
//! This certificate is the sole root of trust for attestation-document
//! verification; system trust stores are never consulted. It is embedded
//! verbatim from
//! <https://aws-nitro-enclaves.amazonaws.com/AWS_NitroEnclaves_Root-G1.zip>
//! and its SHA-256 hash must match the value AWS publishes at
//! <https://docs.aws.amazon.com/enclaves/latest/user/verify-root.html>.

use sha2::{Digest, Sha256};

/// Expected SHA-256 hash of the PEM-encoded root certificate.
pub const AWS_NITRO_ROOT_CERT_SHA256: &str =
    "6eb9688305e4bbca67f44b59c29a0661ae930f09b5945b5d1d9ae01125c8d6c0";

/// AWS Nitro Enclaves Root Certificate (G1) in PEM format.
///
/// Subject: CN = aws.nitro-enclaves
/// Validity: Not Before: Oct 28 2019, Not After: Oct 28 2049
/// Signature Algorithm: ecdsa-with-SHA384
/// Public Key Algorithm: id-ecPublicKey (P-384)
pub const AWS_NITRO_ROOT_CERT_PEM: &str = r#"-----BEGIN CERTIFICATE-----
MIICETCCAZagAwIBAgIRAPkxdWgbkK/hHUbMtOTn+FYwCgYIKoZIzj0EAwMwSTEL
MAkGA1UEBhMCVVMxDzANBgNVBAoMBkFtYXpvbjEMMAoGA1UECwwDQVdTMRswGQYD
VQQDDBJhd3Mubml0cm8tZW5jbGF2ZXMwHhcNMTkxMDI4MTMyODA1WhcNNDkxMDI4
MTQyODA1WjBJMQswCQYDVQQGEwJVUzEPMA0GA1UECgwGQW1hem9uMQwwCgYDVQQL
DANBV1MxGzAZBgNVBAMMEmF3cy5uaXRyby1lbmNsYXZlczB2MBAGByqGSM49AgEG
BSuBBAAiA2IABPwCVOumCMHzaHDimtqQvkY4MpJzbolL//Zy2YlES1BR5TSksfbb
48C8WBoyt7F2Bw7eEtaaP+ohG2bnUs990d0JX28TcPQXCEPZ3BABIeTPYwEoCWZE
h8l5YoQwTcU/9KNCMEAwDwYDVR0TAQH/BAUwAwEB/zAdBgNVHQ4EFgQUkCW1DdkF
R+eWw5b6cp3PmanfS5YwDgYDVR0PAQH/BAQDAgGGMAoGCCqGSM49BAMDA2kAMGYC
MQCjfy+Rocm9Xue4YnwWmNJVA44fA0P5W2OpYow9OYCVRaEevL8uO1XYru5xtMPW
rfMCMQCi85sWBbJwKKXdS6BptQFuZbT73o/gBh1qUxl/nNr12UO8Yfwr6wPLb+6N
IwLz3/Y=
-----END CERTIFICATE-----"#;

/// Checks that the embedded root certificate still hashes to the expected
/// value. Called once at startup.
pub fn verify_root_cert_hash() -> bool {
    let hash = Sha256::digest(AWS_NITRO_ROOT_CERT_PEM.as_bytes());
    data_encoding::HEXLOWER.encode(&hash) == AWS_NITRO_ROOT_CERT_SHA256
}

/// Returns the DER encoding of the root certificate, which the chain
/// verification uses as its trust anchor.
pub fn root_cert_der() -> Result<Vec<u8>, data_encoding::DecodeError> {
    let pem_body = AWS_NITRO_ROOT_CERT_PEM
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect::<String>();

    data_encoding::BASE64.decode(pem_body.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cert_hash_matches() {
        assert!(verify_root_cert_hash());
    }

    #[test]
    fn test_root_cert_pem_shape() {
        assert!(AWS_NITRO_ROOT_CERT_PEM.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(AWS_NITRO_ROOT_CERT_PEM.ends_with("-----END CERTIFICATE-----"));
    }

    #[test]
    fn test_root_cert_der_decodes() {
        let der = root_cert_der().unwrap();
        // X.509 certificates start with a DER SEQUENCE tag.
        assert_eq!(der.first(), Some(&0x30));
    }

    #[test]
    fn test_root_cert_parses_as_trust_anchor() {
        let der = root_cert_der().unwrap();
        webpki::TrustAnchor::try_from_cert_der(&der).unwrap();
    }
}
