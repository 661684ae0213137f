// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Assembly of per-request attestation documents.
//!
//! Two kinds of auxiliary data coexist in veil's documents: the service's
//! key-material hashes, which live for the lifetime of the service, and the
//! per-request fields (the client's nonce and the response body digest).
//! The builder pins the shared hash store and assembles a fresh [`AuxInfo`]
//! for every attestation, so concurrent requests never observe each other's
//! transient fields.

use std::sync::Arc;

use crate::attestation::AttestationError;
use crate::attester::{Attester, AuxInfo, RawDocument};
use crate::hashes::SharedHashes;
use crate::nonce::Nonce;

/// Bundles an attester with the auxiliary fields its documents embed.
#[derive(Clone)]
pub struct AttestationBuilder {
    attester: Arc<Attester>,
    hashes: Arc<SharedHashes>,
}

impl AttestationBuilder {
    pub fn new(attester: Arc<Attester>, hashes: Arc<SharedHashes>) -> Self {
        Self { attester, hashes }
    }

    /// Returns the underlying attester.
    pub fn attester(&self) -> &Attester {
        &self.attester
    }

    /// Requests an attestation document.
    ///
    /// The document's `public_key` slot always carries the current
    /// serialization of the shared hashes; `nonce` and `user_data` are set
    /// from the arguments, with `None` leaving the slot unset.
    pub fn attest(
        &self,
        nonce: Option<&Nonce>,
        body_digest: Option<[u8; 32]>,
    ) -> Result<RawDocument, AttestationError> {
        let aux = AuxInfo {
            public_key: Some(self.hashes.serialize()),
            user_data: body_digest.map(|digest| digest.to_vec()),
            nonce: nonce.map(|n| n.as_slice().to_vec()),
        };
        self.attester.attest(&aux)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashes::{Hashes, Sha256Hash};

    fn noop_builder() -> (AttestationBuilder, Arc<SharedHashes>) {
        let hashes = Arc::new(SharedHashes::default());
        hashes.set_tls_hash(Sha256Hash([0xaa; 32]));
        let builder = AttestationBuilder::new(Arc::new(Attester::new_noop()), hashes.clone());
        (builder, hashes)
    }

    #[test]
    fn test_attest_embeds_all_fields() {
        let (builder, _) = noop_builder();
        let nonce = Nonce::new();

        let raw = builder.attest(Some(&nonce), Some([0x11; 32])).unwrap();
        let doc = builder.attester().verify(&raw, None).unwrap();
        let aux = doc.aux_info();

        assert_eq!(aux.nonce.as_deref(), Some(nonce.as_slice()));
        assert_eq!(aux.user_data.as_deref(), Some(&[0x11u8; 32][..]));

        let embedded = Hashes::deserialize(aux.public_key.as_deref().unwrap()).unwrap();
        assert_eq!(embedded.tls_key_hash, Some(Sha256Hash([0xaa; 32])));
        assert_eq!(embedded.app_key_hash, None);
    }

    #[test]
    fn test_attest_picks_up_late_app_hash() {
        let (builder, hashes) = noop_builder();
        hashes.set_app_hash(Some(Sha256Hash([0xbb; 32])));

        let raw = builder.attest(None, None).unwrap();
        let doc = builder.attester().verify(&raw, None).unwrap();
        let aux = doc.aux_info();

        assert_eq!(aux.nonce, None);
        assert_eq!(aux.user_data, None);
        let embedded = Hashes::deserialize(aux.public_key.as_deref().unwrap()).unwrap();
        assert_eq!(embedded.app_key_hash, Some(Sha256Hash([0xbb; 32])));
    }
}
