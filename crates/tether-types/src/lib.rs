//! # tether-types
//!
//! Shared plain types for the tether renter client.
//!
//! This crate is the single source of truth for the identifiers and side
//! tables that flow between the upload core, the contractor and the worker
//! pool: host public keys, piece digests, contract metadata and the
//! offline / good-for-renew utility maps.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Host storage-accounting unit in bytes (4 MiB).
///
/// Hosts charge per sector regardless of how much of it a piece fills, so
/// uploaded-byte accounting multiplies by this rather than the piece size.
pub const SECTOR_SIZE: u64 = 1 << 22;

/// Blockchain height, used for contract expirations.
pub type BlockHeight = u64;

/// Permission bits recorded in file metadata.
pub type FileMode = u32;

/// Ed25519-style public key identifying a storage host.
///
/// The all-zero key is the *blank* host used by the dry-run path to record
/// piece digests without any host involvement.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct HostPublicKey(pub [u8; 32]);

impl HostPublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The blank key recorded by dry-run uploads.
    pub fn is_blank(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for HostPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// BLAKE3 digest of one encoded piece.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceDigest(pub [u8; 32]);

impl PieceDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PieceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Storage contract metadata as exposed by the contractor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    /// Height at which the contract's proof window opens.
    pub end_height: BlockHeight,
}

/// Contract set keyed by host public key.
pub type ContractMap = HashMap<HostPublicKey, ContractInfo>;

/// Host status side tables supplied by the contractor.
///
/// A host missing from a map is treated as *not offline* and *not
/// good-for-renew* respectively, matching the contractor's map-of-bool
/// semantics. The upload core never mutates these.
#[derive(Clone, Debug, Default)]
pub struct HostUtilities {
    pub offline: HashMap<HostPublicKey, bool>,
    pub good_for_renew: HashMap<HostPublicKey, bool>,
}

impl HostUtilities {
    pub fn is_offline(&self, host: &HostPublicKey) -> bool {
        self.offline.get(host).copied().unwrap_or(false)
    }

    pub fn is_good_for_renew(&self, host: &HostPublicKey) -> bool {
        self.good_for_renew.get(host).copied().unwrap_or(false)
    }

    /// A host counts toward redundancy only if it is online and its
    /// contract will be renewed.
    pub fn is_usable(&self, host: &HostPublicKey) -> bool {
        !self.is_offline(host) && self.is_good_for_renew(host)
    }

    pub fn set_offline(&mut self, host: HostPublicKey, offline: bool) {
        self.offline.insert(host, offline);
    }

    pub fn set_good_for_renew(&mut self, host: HostPublicKey, good: bool) {
        self.good_for_renew.insert(host, good);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_host_key() {
        assert!(HostPublicKey::default().is_blank());
        assert!(!HostPublicKey::from_bytes([1u8; 32]).is_blank());
    }

    #[test]
    fn test_host_key_display_is_hex() {
        let key = HostPublicKey::from_bytes([0xab; 32]);
        assert_eq!(key.to_string(), "ab".repeat(32));
    }

    #[test]
    fn test_utilities_default_to_unusable() {
        let utils = HostUtilities::default();
        let host = HostPublicKey::from_bytes([7u8; 32]);

        // Unknown hosts are online but not good-for-renew.
        assert!(!utils.is_offline(&host));
        assert!(!utils.is_good_for_renew(&host));
        assert!(!utils.is_usable(&host));
    }

    #[test]
    fn test_utilities_usable_requires_both_flags() {
        let host = HostPublicKey::from_bytes([7u8; 32]);
        let mut utils = HostUtilities::default();

        utils.set_good_for_renew(host, true);
        assert!(utils.is_usable(&host));

        utils.set_offline(host, true);
        assert!(!utils.is_usable(&host));
    }
}
