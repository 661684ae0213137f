// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Parsing and verification of AWS Nitro Enclave attestation documents.
//!
//! An attestation document is a COSE_Sign1 structure over a CBOR payload,
//! signed by a leaf certificate that chains up to the AWS Nitro Enclaves
//! root. Verification follows the document specification on page 70 of
//! <https://docs.aws.amazon.com/pdfs/enclaves/latest/user/enclaves-user.pdf>:
//!
//! 1. Decode the COSE_Sign1 four-tuple and check the ES384 algorithm.
//! 2. Decode the payload into a [`Document`] and check its structure.
//! 3. Parse the leaf and CA bundle certificates and verify the chain up to
//!    the pinned root.
//! 4. Reconstruct the COSE Signature1 structure and verify the ECDSA P-384
//!    signature with the leaf certificate's public key.

use std::time::{SystemTime, UNIX_EPOCH};

use ciborium::Value as CborValue;
use coset::{CborSerializable, CoseSign1, RegisteredLabelWithPrivate, TaggedCborSerializable, iana};
use p384::ecdsa::signature::Verifier;
use p384::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use x509_cert::der::Decode;
use x509_cert::der::oid::ObjectIdentifier;

use crate::attester::AuxInfo;
use crate::constants::AUX_FIELD_LEN;
use crate::nitro_root_cert;
use crate::pcr::Pcrs;

/// id-ecPublicKey, the public key algorithm the leaf certificate must use.
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// ecdsa-with-SHA384, the signature algorithm the leaf certificate must use.
const OID_ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");

/// Signature algorithms acceptable for the certificate chain.
static CHAIN_SIG_ALGS: &[&webpki::SignatureAlgorithm] = &[&webpki::ECDSA_P384_SHA384];

/// Output length of SHA-384, the digest that signs the COSE payload.
const SHA384_LEN: usize = 48;

/// Why verification of an attestation document failed.
///
/// All variants are fatal to the verification outcome except
/// [`AttestationError::DebugMode`], which is advisory: it carries the
/// successfully parsed document so callers can decide to accept it in test
/// environments while still learning the fact.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("attestation document type mismatch")]
    TypeMismatch,
    #[error("auxiliary field exceeds {AUX_FIELD_LEN} bytes")]
    AuxFieldTooLong,
    #[error("failed to open session to Nitro Secure Module")]
    NsmSession,
    #[error("Nitro Secure Module request failed: {0}")]
    Nsm(String),
    #[error("malformed COSE envelope: {0}")]
    MalformedEnvelope(String),
    #[error("malformed attestation payload: {0}")]
    MalformedPayload(String),
    #[error("mandatory field missing or invalid: {0}")]
    MissingField(&'static str),
    #[error("COSE algorithm is not ECDSA with SHA-384")]
    BadAlgorithm,
    #[error("bad certificate: {0}")]
    BadCertificate(String),
    #[error("payload signature does not match signature from certificate")]
    BadSignature,
    #[error("nonce does not match")]
    NonceMismatch,
    #[error("attestation document was produced in debug mode")]
    DebugMode(Box<Document>),
}

/// The decoded payload of an attestation document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub module_id: String,
    pub timestamp: u64,
    pub digest: String,
    pub pcrs: Pcrs,
    pub certificate: ByteBuf,
    pub cabundle: Vec<ByteBuf>,
    #[serde(default)]
    pub public_key: Option<ByteBuf>,
    #[serde(default)]
    pub user_data: Option<ByteBuf>,
    #[serde(default)]
    pub nonce: Option<ByteBuf>,
}

impl Document {
    /// Builds a document that carries nothing but the given auxiliary
    /// fields. This is what the noop attester's verification returns.
    pub(crate) fn from_aux(aux: AuxInfo) -> Self {
        Self {
            module_id: "noop".to_string(),
            timestamp: crate::attester::timestamp_ms(),
            digest: "SHA384".to_string(),
            pcrs: Pcrs::default(),
            certificate: ByteBuf::new(),
            cabundle: Vec::new(),
            public_key: aux.public_key.map(ByteBuf::from),
            user_data: aux.user_data.map(ByteBuf::from),
            nonce: aux.nonce.map(ByteBuf::from),
        }
    }

    /// Returns the document's auxiliary fields.
    pub fn aux_info(&self) -> AuxInfo {
        AuxInfo {
            public_key: self.public_key.clone().map(ByteBuf::into_vec),
            user_data: self.user_data.clone().map(ByteBuf::into_vec),
            nonce: self.nonce.clone().map(ByteBuf::into_vec),
        }
    }
}

/// Options for [`verify_document`].
#[derive(Default)]
pub struct VerifyOptions {
    /// The time at which the certificate chain is verified. Defaults to
    /// the wall clock; supply a fixed time when replaying recorded
    /// documents.
    pub current_time: Option<SystemTime>,
    /// A DER-encoded root certificate to trust instead of the pinned AWS
    /// Nitro Enclaves root. Only tests should set this.
    pub root: Option<Vec<u8>>,
}

/// Verifies the COSE_Sign1 attestation document in `data` and returns its
/// decoded payload.
///
/// Nonce comparison and the debug-mode advisory are the caller's concern;
/// see [`crate::attester::Attester::verify_at`].
pub fn verify_document(
    data: &[u8],
    options: &VerifyOptions,
) -> Result<Document, AttestationError> {
    // The NSM emits the COSE_Sign1 array untagged; accept the tagged form
    // as well, which some tooling produces when re-encoding documents.
    let cose = CoseSign1::from_slice(data)
        .or_else(|_| CoseSign1::from_tagged_slice(data))
        .map_err(|err| AttestationError::MalformedEnvelope(err.to_string()))?;

    let protected = match cose.protected.original_data.as_deref() {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => {
            return Err(AttestationError::MalformedEnvelope(
                "protected section is empty".to_string(),
            ));
        }
    };
    let payload = match cose.payload.as_deref() {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => {
            return Err(AttestationError::MalformedEnvelope(
                "payload section is empty".to_string(),
            ));
        }
    };
    if cose.signature.is_empty() {
        return Err(AttestationError::MalformedEnvelope(
            "signature section is empty".to_string(),
        ));
    }

    // The protected header must announce ECDSA with SHA-384, either as the
    // registered integer -35 or as the string "ES384":
    // https://datatracker.ietf.org/doc/html/rfc8152#section-8.1
    match &cose.protected.header.alg {
        Some(RegisteredLabelWithPrivate::Assigned(iana::Algorithm::ES384)) => {}
        Some(RegisteredLabelWithPrivate::Text(alg)) if alg == "ES384" => {}
        _ => return Err(AttestationError::BadAlgorithm),
    }

    let doc: Document = ciborium::from_reader(payload)
        .map_err(|err| AttestationError::MalformedPayload(err.to_string()))?;
    check_structure(&doc)?;

    let leaf = parse_leaf_certificate(&doc.certificate)?;
    for item in &doc.cabundle {
        x509_cert::Certificate::from_der(item)
            .map_err(|err| AttestationError::BadCertificate(err.to_string()))?;
    }
    verify_certificate_chain(&doc, options)?;
    verify_signature(&leaf, protected, payload, &cose.signature)?;

    Ok(doc)
}

/// Sanity checks on the decoded payload, per the attestation document
/// specification.
fn check_structure(doc: &Document) -> Result<(), AttestationError> {
    if doc.module_id.is_empty() {
        return Err(AttestationError::MissingField("module_id"));
    }
    if doc.digest.is_empty() {
        return Err(AttestationError::MissingField("digest"));
    }
    if doc.digest != "SHA384" {
        return Err(AttestationError::MalformedPayload(
            "'digest' is not SHA384".to_string(),
        ));
    }
    if doc.timestamp < 1 {
        return Err(AttestationError::MissingField("timestamp"));
    }
    if doc.pcrs.is_empty() || doc.pcrs.len() > 32 {
        return Err(AttestationError::MalformedPayload(
            "'pcrs' holds less than 1 or more than 32 entries".to_string(),
        ));
    }
    for (index, value) in &doc.pcrs.0 {
        if *index > 31 {
            return Err(AttestationError::MalformedPayload(
                "'pcrs' key index exceeds 31".to_string(),
            ));
        }
        if ![32, 48, 64].contains(&value.len()) {
            return Err(AttestationError::MalformedPayload(
                "'pcrs' value length not in {32, 48, 64}".to_string(),
            ));
        }
    }
    if doc.certificate.is_empty() {
        return Err(AttestationError::MissingField("certificate"));
    }
    if doc.cabundle.is_empty() {
        return Err(AttestationError::MissingField("cabundle"));
    }
    for item in &doc.cabundle {
        if item.is_empty() || item.len() > 1024 {
            return Err(AttestationError::MalformedPayload(
                "'cabundle' entry length not in [1, 1024]".to_string(),
            ));
        }
    }
    let aux_fields = [&doc.public_key, &doc.user_data, &doc.nonce];
    if aux_fields
        .iter()
        .any(|f| f.as_ref().is_some_and(|v| v.len() > AUX_FIELD_LEN))
    {
        return Err(AttestationError::AuxFieldTooLong);
    }
    Ok(())
}

/// Parses the leaf certificate and checks its key and signature algorithms.
fn parse_leaf_certificate(der: &[u8]) -> Result<x509_cert::Certificate, AttestationError> {
    let cert = x509_cert::Certificate::from_der(der)
        .map_err(|err| AttestationError::BadCertificate(err.to_string()))?;

    if cert
        .tbs_certificate
        .subject_public_key_info
        .algorithm
        .oid
        != OID_EC_PUBLIC_KEY
    {
        return Err(AttestationError::BadCertificate(
            "public key algorithm is not ECDSA".to_string(),
        ));
    }
    if cert.signature_algorithm.oid != OID_ECDSA_WITH_SHA384 {
        return Err(AttestationError::BadCertificate(
            "signature algorithm is not ECDSA with SHA-384".to_string(),
        ));
    }
    Ok(cert)
}

/// Verifies the leaf certificate against the CA bundle and the pinned root.
///
/// Extended key usage is treated permissively; the chain's job is to anchor
/// the signing key in the hypervisor's PKI, not to authorize a TLS role.
fn verify_certificate_chain(
    doc: &Document,
    options: &VerifyOptions,
) -> Result<(), AttestationError> {
    let root_der = match &options.root {
        Some(der) => der.clone(),
        None => nitro_root_cert::root_cert_der()
            .map_err(|err| AttestationError::BadCertificate(err.to_string()))?,
    };
    let anchor = [webpki::TrustAnchor::try_from_cert_der(&root_der)
        .map_err(|err| AttestationError::BadCertificate(err.to_string()))?];
    let anchors = webpki::TlsServerTrustAnchors(&anchor);

    // The CA bundle is ordered root first, leaf's issuer last. webpki
    // ignores entries it doesn't need, so the root's presence is harmless.
    let intermediates: Vec<&[u8]> = doc.cabundle.iter().map(|item| item.as_slice()).collect();

    let end_entity = webpki::EndEntityCert::try_from(doc.certificate.as_slice())
        .map_err(|err| AttestationError::BadCertificate(err.to_string()))?;

    let current_time = options.current_time.unwrap_or_else(SystemTime::now);
    let seconds = current_time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| AttestationError::BadCertificate("verification time predates epoch".to_string()))?
        .as_secs();

    end_entity
        .verify_is_valid_tls_server_cert(
            CHAIN_SIG_ALGS,
            &anchors,
            &intermediates,
            webpki::Time::from_seconds_since_unix_epoch(seconds),
        )
        .map_err(|err| AttestationError::BadCertificate(err.to_string()))
}

/// Reconstructs the COSE Signature1 structure and verifies its ECDSA P-384
/// signature with the leaf certificate's public key.
fn verify_signature(
    leaf: &x509_cert::Certificate,
    protected: &[u8],
    payload: &[u8],
    signature: &[u8],
) -> Result<(), AttestationError> {
    // The signature is two concatenated big-endian integers (r, s), each
    // as long as the SHA-384 digest of the signed structure.
    if signature.len() != 2 * SHA384_LEN {
        return Err(AttestationError::BadSignature);
    }

    let sig_structure = CborValue::Array(vec![
        CborValue::Text("Signature1".to_string()),
        CborValue::Bytes(protected.to_vec()),
        CborValue::Bytes(Vec::new()),
        CborValue::Bytes(payload.to_vec()),
    ]);
    let mut sig_structure_bytes = Vec::new();
    ciborium::into_writer(&sig_structure, &mut sig_structure_bytes)
        .map_err(|err| AttestationError::MalformedEnvelope(err.to_string()))?;

    let public_key = leaf
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| {
            AttestationError::BadCertificate("public key has unused bits".to_string())
        })?;
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|err| AttestationError::BadCertificate(err.to_string()))?;
    let signature =
        Signature::from_slice(signature).map_err(|_| AttestationError::BadSignature)?;

    verifying_key
        .verify(&sig_structure_bytes, &signature)
        .map_err(|_| AttestationError::BadSignature)
}
