// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Parsing of enclave image measurements into expected PCR values.

use anyhow::{Context, bail};
use serde::Deserialize;
use veil::pcr::Pcrs;

/// The JSON document that `nitro-cli build-enclave` (and the reproducible
/// image build) emits. An example:
///
/// ```json
/// {
///   "Measurements": {
///     "HashAlgorithm": "Sha384 { ... }",
///     "PCR0": "8b927cf0bbf2d668a8c24c69afd23bff2dda713b4f0d70195205950f9a5a1fbb7089ad937e3025ee8d5a084f3d6c9126",
///     "PCR1": "4b4d5b3661b3efc12920900c80e126e4ce783c522de6c02a2a5bf7af3a2b9327b86776f188e4be1c1c404a129dbda493",
///     "PCR2": "22d2194eb27a7cda42e66dd5b91ef13e5a153d797c04ae179e59bef1c93438d6ad0365c175c119230e36d0f8d6b6b59e"
///   }
/// }
/// ```
#[derive(Debug, Deserialize)]
struct BuildInfo {
    #[serde(rename = "Measurements")]
    measurements: Measurements,
}

#[derive(Debug, Deserialize)]
struct Measurements {
    #[serde(rename = "HashAlgorithm")]
    hash_algorithm: String,
    #[serde(rename = "PCR0")]
    pcr0: String,
    #[serde(rename = "PCR1")]
    pcr1: String,
    #[serde(rename = "PCR2")]
    pcr2: String,
}

/// Converts the given JSON-encoded enclave image measurements into the PCR
/// values we expect the enclave to attest to.
pub fn to_pcrs(json: &str) -> anyhow::Result<Pcrs> {
    let info: BuildInfo =
        serde_json::from_str(json).context("failed to parse measurements JSON")?;

    let algorithm = info.measurements.hash_algorithm.to_lowercase();
    if !algorithm.starts_with("sha384") {
        bail!("expected hash algorithm \"sha384\" but got {algorithm:?}");
    }

    let mut pcrs = Pcrs::default();
    let registers = [
        &info.measurements.pcr0,
        &info.measurements.pcr1,
        &info.measurements.pcr2,
    ];
    for (index, hex) in registers.iter().enumerate() {
        let value = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .with_context(|| format!("PCR{index} is not valid hex"))?;
        pcrs.insert(index as u8, value);
    }
    Ok(pcrs)
}
