// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Creation and verification of attestation documents.
//!
//! The [`Attester`] has two arms: `Nitro` draws on the Nitro Secure Module
//! and is the only arm that produces authoritative documents; `Noop` encodes
//! the auxiliary fields as JSON and exists so tests can exercise the handler
//! plumbing without the AWS Nitro hypervisor. Any code path that treats a
//! `noop` document as authoritative is insecure by construction, which is
//! why the arm is only ever selected by the `--insecure` flag.

use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use aws_nitro_enclaves_nsm_api::api::{Request, Response};
use aws_nitro_enclaves_nsm_api::driver;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::attestation::{AttestationError, Document, VerifyOptions, verify_document};
use crate::constants::AUX_FIELD_LEN;
use crate::nonce::Nonce;

/// The provenance of a [`RawDocument`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Nitro,
    Noop,
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocType::Nitro => write!(f, "nitro"),
            DocType::Noop => write!(f, "noop"),
        }
    }
}

/// The auxiliary fields that callers can have embedded in an attestation
/// document. Each field is limited to [`AUX_FIELD_LEN`] bytes by the NSM.
///
/// The semantics of the fields are convention: veil uses `nonce` for
/// freshness, `public_key` for the serialized key-material hashes, and
/// `user_data` for the SHA-256 digest of an attested HTTP response body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxInfo {
    #[serde(default, with = "base64_opt")]
    pub public_key: Option<Vec<u8>>,
    #[serde(default, with = "base64_opt")]
    pub user_data: Option<Vec<u8>>,
    #[serde(default, with = "base64_opt")]
    pub nonce: Option<Vec<u8>>,
}

impl AuxInfo {
    /// Checks that no field exceeds the NSM's per-field limit.
    pub fn validate(&self) -> Result<(), AttestationError> {
        let fields = [&self.public_key, &self.user_data, &self.nonce];
        if fields
            .iter()
            .any(|f| f.as_ref().is_some_and(|v| v.len() > AUX_FIELD_LEN))
        {
            return Err(AttestationError::AuxFieldTooLong);
        }
        Ok(())
    }
}

/// The transport envelope for an attestation document: the document bytes
/// tagged with the attester that produced them. For `nitro`, the bytes are
/// a COSE_Sign1 structure; for `noop`, a JSON encoding of [`AuxInfo`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(rename = "type")]
    pub doc_type: DocType,
    #[serde(rename = "attestation_document", with = "base64_bytes")]
    pub doc: Vec<u8>,
}

/// Produces and verifies attestation documents.
pub enum Attester {
    Nitro(NitroAttester),
    Noop,
}

impl Attester {
    pub fn new_nitro() -> Self {
        Attester::Nitro(NitroAttester::default())
    }

    pub fn new_noop() -> Self {
        Attester::Noop
    }

    /// Returns the document type this attester produces and accepts.
    pub fn doc_type(&self) -> DocType {
        match self {
            Attester::Nitro(_) => DocType::Nitro,
            Attester::Noop => DocType::Noop,
        }
    }

    /// Requests an attestation document embedding the given auxiliary
    /// fields.
    pub fn attest(&self, aux: &AuxInfo) -> Result<RawDocument, AttestationError> {
        aux.validate()?;
        match self {
            Attester::Nitro(nitro) => nitro.attest(aux),
            Attester::Noop => {
                let doc = serde_json::to_vec(aux)
                    .map_err(|err| AttestationError::MalformedPayload(err.to_string()))?;
                Ok(RawDocument {
                    doc_type: DocType::Noop,
                    doc,
                })
            }
        }
    }

    /// Verifies the given document at the current wall-clock time. See
    /// [`Attester::verify_at`].
    pub fn verify(
        &self,
        raw: &RawDocument,
        nonce: Option<&Nonce>,
    ) -> Result<Document, AttestationError> {
        self.verify_at(raw, nonce, &VerifyOptions::default())
    }

    /// Verifies the given document and returns its parsed form.
    ///
    /// For the nitro arm this checks the COSE_Sign1 envelope, the
    /// certificate chain up to the pinned AWS root, and the signature; if
    /// `nonce` is given, the document must echo it. A document whose PCRs
    /// indicate debug mode fails with [`AttestationError::DebugMode`],
    /// which carries the parsed document so callers in test environments
    /// can still choose to accept it.
    ///
    /// The noop arm decodes the JSON auxiliary fields and ignores the
    /// nonce.
    pub fn verify_at(
        &self,
        raw: &RawDocument,
        nonce: Option<&Nonce>,
        options: &VerifyOptions,
    ) -> Result<Document, AttestationError> {
        if raw.doc_type != self.doc_type() {
            return Err(AttestationError::TypeMismatch);
        }

        match self {
            Attester::Noop => {
                let aux: AuxInfo = serde_json::from_slice(&raw.doc)
                    .map_err(|err| AttestationError::MalformedPayload(err.to_string()))?;
                Ok(Document::from_aux(aux))
            }
            Attester::Nitro(_) => {
                let doc = verify_document(&raw.doc, options)?;

                // Check that the document embeds the nonce we may have
                // asked for.
                if let Some(ours) = nonce {
                    let doc_nonce = doc
                        .nonce
                        .as_deref()
                        .ok_or(AttestationError::NonceMismatch)?;
                    let theirs = Nonce::from_slice(doc_nonce)
                        .map_err(|_| AttestationError::NonceMismatch)?;
                    if *ours != theirs {
                        return Err(AttestationError::NonceMismatch);
                    }
                }

                // An enclave in debug mode exposes its memory to the
                // parent instance, so the fact must reach the caller even
                // though the document itself verified.
                if doc.pcrs.is_debug_mode() {
                    return Err(AttestationError::DebugMode(Box::new(doc)));
                }
                Ok(doc)
            }
        }
    }
}

/// A long-lived session to the Nitro Secure Module. At most one exists per
/// attester; it is opened on first use and closed when the attester drops.
pub(crate) struct NsmSession(i32);

impl NsmSession {
    pub(crate) fn open() -> Result<Self, AttestationError> {
        let fd = driver::nsm_init();
        if fd < 0 {
            return Err(AttestationError::NsmSession);
        }
        Ok(Self(fd))
    }

    pub(crate) fn send(&self, request: Request) -> Response {
        driver::nsm_process_request(self.0, request)
    }
}

impl Drop for NsmSession {
    fn drop(&mut self) {
        driver::nsm_exit(self.0);
    }
}

/// The hardware-backed attester. Attestation requests serialize on the NSM
/// session; the NSM responds quickly and attestation is low-QPS.
#[derive(Default)]
pub struct NitroAttester {
    session: Mutex<Option<NsmSession>>,
}

impl NitroAttester {
    fn attest(&self, aux: &AuxInfo) -> Result<RawDocument, AttestationError> {
        let mut session = self.session.lock().expect("NSM session mutex poisoned");
        if session.is_none() {
            *session = Some(NsmSession::open()?);
        }
        let session = session.as_ref().expect("session was just opened");

        let request = Request::Attestation {
            public_key: aux.public_key.clone().map(ByteBuf::from),
            user_data: aux.user_data.clone().map(ByteBuf::from),
            nonce: aux.nonce.clone().map(ByteBuf::from),
        };

        match session.send(request) {
            Response::Attestation { document } if !document.is_empty() => Ok(RawDocument {
                doc_type: DocType::Nitro,
                doc: document,
            }),
            Response::Attestation { .. } => Err(AttestationError::Nsm(
                "attestation response contains no document".to_string(),
            )),
            Response::Error(code) => Err(AttestationError::Nsm(format!("{code:?}"))),
            _ => Err(AttestationError::Nsm(
                "unexpected NSM response type".to_string(),
            )),
        }
    }
}

pub(crate) fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) mod base64_bytes {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s.as_bytes()).map_err(de::Error::custom)
    }
}

mod base64_opt {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => BASE64
                .decode(s.as_bytes())
                .map(Some)
                .map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}
