// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Platform configuration register (PCR) values and their comparison.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Length of a SHA-384 PCR value, the digest the Nitro hypervisor emits.
pub const PCR_LEN: usize = 48;

/// The enclave's platform configuration register values, keyed by index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pcrs(pub BTreeMap<u8, ByteBuf>);

impl Pcrs {
    /// Inserts the given PCR value at the given index.
    pub fn insert(&mut self, index: u8, value: Vec<u8>) {
        self.0.insert(index, ByteBuf::from(value));
    }

    /// Returns the number of registers in the map.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the map contains no registers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if (and only if) the two given PCR maps are identical.
    ///
    /// PCR4 contains a hash over the parent's instance ID. Enclaves running
    /// the same image on different parent instances therefore always differ
    /// in PCR4, so index 4 is excluded from the comparison on both sides:
    /// <https://docs.aws.amazon.com/enclaves/latest/user/set-up-attestation.html>
    pub fn equal(&self, theirs: &Pcrs) -> bool {
        let ours = self.0.iter().filter(|(index, _)| **index != 4);
        let theirs_len = theirs.0.keys().filter(|index| **index != 4).count();

        if ours.clone().count() != theirs_len {
            return false;
        }

        for (index, our_value) in ours {
            match theirs.0.get(index) {
                Some(their_value) if their_value == our_value => {}
                _ => return false,
            }
        }
        true
    }

    /// Returns true if the PCR values suggest that the enclave was started
    /// in debug mode, i.e., registers 0, 1, and 2 are present and all zero.
    pub fn is_debug_mode(&self) -> bool {
        let zeroes = [0u8; PCR_LEN];
        [0u8, 1, 2].iter().all(|index| {
            self.0
                .get(index)
                .is_some_and(|value| value.as_slice() == zeroes.as_slice())
        })
    }

    /// Removes registers whose value is all zero.
    ///
    /// The NSM device pads its response with empty registers that carry no
    /// measurement, which would otherwise break [`Pcrs::equal`].
    pub fn remove_empty(&mut self) {
        let zeroes = [0u8; PCR_LEN];
        self.0.retain(|_, value| value.as_slice() != zeroes.as_slice());
    }
}

impl fmt::Display for Pcrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in &self.0 {
            writeln!(
                f,
                "PCR[{index:>2}]: {}",
                data_encoding::HEXLOWER.encode(value)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pcrs {
        let mut pcrs = Pcrs::default();
        pcrs.insert(0, vec![0xaa; PCR_LEN]);
        pcrs.insert(1, vec![0xbb; PCR_LEN]);
        pcrs.insert(2, vec![0xcc; PCR_LEN]);
        pcrs
    }

    #[test]
    fn test_equal_is_reflexive() {
        let pcrs = sample();
        assert!(pcrs.equal(&pcrs));
    }

    #[test]
    fn test_equal_is_symmetric() {
        let a = sample();
        let mut b = sample();
        assert!(a.equal(&b) && b.equal(&a));

        b.insert(2, vec![0xdd; PCR_LEN]);
        assert!(!a.equal(&b) && !b.equal(&a));
    }

    #[test]
    fn test_equal_ignores_pcr4() {
        let mut a = sample();
        let mut b = sample();
        a.insert(4, vec![0x11; PCR_LEN]);
        b.insert(4, vec![0x22; PCR_LEN]);
        assert!(a.equal(&b));

        // Also when only one side carries PCR4 at all.
        let c = sample();
        assert!(a.equal(&c));
    }

    #[test]
    fn test_equal_detects_missing_index() {
        let a = sample();
        let mut b = sample();
        b.0.remove(&2);
        assert!(!a.equal(&b));
        assert!(!b.equal(&a));
    }

    #[test]
    fn test_equal_detects_extra_index() {
        let a = sample();
        let mut b = sample();
        b.insert(3, vec![0xee; PCR_LEN]);
        assert!(!a.equal(&b));
    }

    #[test]
    fn test_debug_mode() {
        let mut pcrs = Pcrs::default();
        pcrs.insert(0, vec![0; PCR_LEN]);
        pcrs.insert(1, vec![0; PCR_LEN]);
        pcrs.insert(2, vec![0; PCR_LEN]);
        assert!(pcrs.is_debug_mode());

        // Registers 3 and 4 play no role in the determination.
        pcrs.insert(3, vec![0x33; PCR_LEN]);
        pcrs.insert(4, vec![0x44; PCR_LEN]);
        assert!(pcrs.is_debug_mode());

        pcrs.insert(1, vec![0x01; PCR_LEN]);
        assert!(!pcrs.is_debug_mode());
    }

    #[test]
    fn test_debug_mode_requires_all_three() {
        let mut pcrs = Pcrs::default();
        pcrs.insert(0, vec![0; PCR_LEN]);
        pcrs.insert(1, vec![0; PCR_LEN]);
        assert!(!pcrs.is_debug_mode());
    }

    #[test]
    fn test_remove_empty() {
        let mut pcrs = sample();
        pcrs.insert(8, vec![0; PCR_LEN]);
        pcrs.insert(9, vec![0; PCR_LEN]);
        pcrs.remove_empty();
        assert_eq!(pcrs.len(), 3);
    }
}
