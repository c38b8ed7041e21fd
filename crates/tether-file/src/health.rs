//! Availability, redundancy and progress accounting.
//!
//! These queries drive admission into the upload heap and the
//! upload-available signal: `available` means every chunk has at least one
//! live piece, `redundancy >= 1.0` means every chunk is reconstructible
//! from usable hosts.

use std::collections::HashSet;

use tether_types::{BlockHeight, ContractMap, HostPublicKey, HostUtilities, SECTOR_SIZE};

use crate::file::TetherFile;
use crate::metadata::ChunkRecord;
use crate::{FileError, Result};

impl TetherFile {
    /// True when every chunk has at least one piece on a host that is not
    /// flagged offline. A chunk with no pieces makes the file unavailable.
    pub fn available(&self, utils: &HostUtilities) -> bool {
        self.with_meta(|meta| {
            if meta.chunks.is_empty() {
                return false;
            }
            meta.chunks.iter().all(|chunk| {
                chunk
                    .pieces
                    .iter()
                    .flatten()
                    .any(|p| !utils.is_offline(&p.host))
            })
        })
    }

    /// Minimum over chunks of (distinct usable hosts holding a piece)
    /// divided by the data piece count. Usable means online and
    /// good-for-renew. An empty file yields 0.
    pub fn redundancy(&self, utils: &HostUtilities) -> f64 {
        self.with_meta(|meta| {
            let min_hosts = meta
                .chunks
                .iter()
                .map(|chunk| distinct_usable_hosts(chunk, utils))
                .min()
                .unwrap_or(0);
            min_hosts as f64 / meta.min_pieces() as f64
        })
    }

    /// Stored-piece ratio as a percentage, duplicates across hosts
    /// included, capped at 100: the worker pool may re-upload pieces to
    /// replacement hosts and push the raw ratio above 1.0.
    pub fn upload_progress(&self) -> f64 {
        self.with_meta(|meta| {
            let placed: usize = meta.chunks.iter().map(ChunkRecord::placement_count).sum();
            let desired = meta.chunks.len() * meta.num_pieces();
            if desired == 0 {
                return 0.0;
            }
            (100.0 * placed as f64 / desired as f64).min(100.0)
        })
    }

    /// Bytes the file occupies on hosts. Hosts charge for full sectors, so
    /// this counts sectors, not piece sizes.
    pub fn uploaded_bytes(&self) -> u64 {
        self.with_meta(|meta| {
            let placed: usize = meta.chunks.iter().map(ChunkRecord::placement_count).sum();
            placed as u64 * SECTOR_SIZE
        })
    }

    /// Lowest end height among contracts holding at least one piece of
    /// this file, or 0 when no piece is covered by a contract.
    pub fn expiration(&self, contracts: &ContractMap) -> BlockHeight {
        let hosts = self.host_public_keys();
        hosts
            .iter()
            .filter_map(|host| contracts.get(host))
            .map(|c| c.end_height)
            .min()
            .unwrap_or(0)
    }

    /// Distinct piece indices of one chunk that are already placed on a
    /// host the worker pool can reach and that is not offline. This is the
    /// `pieces_completed` input of the upload admission test.
    pub fn usable_piece_count(
        &self,
        chunk_index: u64,
        worker_hosts: &HashSet<HostPublicKey>,
        utils: &HostUtilities,
    ) -> Result<usize> {
        self.with_meta(|meta| {
            let chunk = meta
                .chunks
                .get(chunk_index as usize)
                .ok_or_else(|| FileError::OutOfRange(format!("chunk {chunk_index}")))?;
            let completed = chunk
                .pieces
                .iter()
                .filter(|placements| {
                    placements
                        .iter()
                        .any(|p| worker_hosts.contains(&p.host) && !utils.is_offline(&p.host))
                })
                .count();
            Ok(completed)
        })
    }
}

fn distinct_usable_hosts(chunk: &ChunkRecord, utils: &HostUtilities) -> usize {
    let hosts: HashSet<&HostPublicKey> = chunk
        .pieces
        .iter()
        .flatten()
        .filter(|p| utils.is_usable(&p.host))
        .map(|p| &p.host)
        .collect();
    hosts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tether_ec::{CipherType, ErasureParams, MasterKey};
    use tether_types::{ContractInfo, PieceDigest};

    fn host(b: u8) -> HostPublicKey {
        HostPublicKey::from_bytes([b; 32])
    }

    fn new_file(
        dir: &std::path::Path,
        data_pieces: u32,
        parity_pieces: u32,
        size: u64,
    ) -> Arc<TetherFile> {
        let erasure = ErasureParams::new(data_pieces, parity_pieces, 16).unwrap();
        let meta = crate::FileMetadata::new(
            erasure,
            CipherType::Plain,
            MasterKey::from_bytes([3u8; 32]),
            size,
            0o600,
        );
        TetherFile::create("health".into(), dir.join("health.tether"), meta).unwrap()
    }

    /// Utilities where every numbered host is online and good-for-renew.
    fn friendly_utils(hosts: u8) -> HostUtilities {
        let mut utils = HostUtilities::default();
        for b in 0..hosts {
            utils.set_offline(host(b), false);
            utils.set_good_for_renew(host(b), true);
        }
        utils
    }

    #[test]
    fn test_available_requires_every_chunk() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 1, 1, 100);
        let never_offline = HostUtilities::default();

        assert!(!f.available(&never_offline));

        for i in 0..f.num_chunks() {
            f.add_piece(host(0), i, 0, PieceDigest::default()).unwrap();
        }
        assert!(f.available(&never_offline));

        let mut offline = HostUtilities::default();
        offline.set_offline(host(0), true);
        assert!(!f.available(&offline));
    }

    #[test]
    fn test_redundancy_partial_coverage_is_zero() {
        for data_pieces in [1u32, 2, 10] {
            let dir = tempdir().unwrap();
            let f = new_file(dir.path(), data_pieces, 10, 1000);
            let utils = friendly_utils(6);

            // Empty file has 0 redundancy.
            assert_eq!(f.redundancy(&utils), 0.0);

            // One piece for every chunk but the last leaves redundancy 0.
            for i in 0..f.num_chunks() - 1 {
                f.add_piece(host(0), i, 0, PieceDigest::default()).unwrap();
            }
            assert_eq!(f.redundancy(&utils), 0.0);

            // A second host on the same chunks still leaves the last chunk
            // bare.
            for i in 0..f.num_chunks() - 1 {
                f.add_piece(host(1), i, 1, PieceDigest::default()).unwrap();
            }
            assert_eq!(f.redundancy(&utils), 0.0);

            // Covering the last chunk brings the minimum to one host.
            f.add_piece(host(2), f.num_chunks() - 1, 0, PieceDigest::default())
                .unwrap();
            assert_eq!(f.redundancy(&utils), 1.0 / f.min_pieces() as f64);
        }
    }

    #[test]
    fn test_redundancy_counts_distinct_usable_hosts() {
        // 2 data + 10 parity pieces over 10 chunks.
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 2, 10, 320);
        assert_eq!(f.num_chunks(), 10);
        let utils = friendly_utils(6);

        // One host covering chunks 0..8, another covering chunk 9: the
        // weakest chunk has a single host.
        for i in 0..9 {
            f.add_piece(host(0), i, 0, PieceDigest::default()).unwrap();
        }
        f.add_piece(host(1), 9, 0, PieceDigest::default()).unwrap();
        assert_eq!(f.redundancy(&utils), 0.5);

        // Three distinct hosts on every chunk.
        for chunk in 0..f.num_chunks() {
            for (piece, h) in [(0u32, 0u8), (1, 1), (2, 2)] {
                f.add_piece(host(h), chunk, piece, PieceDigest::default())
                    .unwrap();
            }
        }
        assert_eq!(f.redundancy(&utils), 1.5);

        // Marking a contributing host offline drops every chunk's count by
        // one.
        let mut offline = friendly_utils(6);
        offline.set_offline(host(2), true);
        assert_eq!(f.redundancy(&offline), 1.0);

        // Hosts not good-for-renew do not count either.
        let mut not_renewing = friendly_utils(6);
        not_renewing.set_good_for_renew(host(2), false);
        assert_eq!(f.redundancy(&not_renewing), 1.0);
    }

    #[test]
    fn test_uploaded_bytes_counts_sectors() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 1, 3, 1000);
        for piece in 0..4u32 {
            f.add_piece(host(0), 0, piece, PieceDigest::default()).unwrap();
        }
        assert_eq!(f.uploaded_bytes(), 4 * SECTOR_SIZE);
    }

    #[test]
    fn test_upload_progress_pins_at_100() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 1, 1, 4);
        assert_eq!(f.upload_progress(), 0.0);
        for piece in 0..2u32 {
            f.add_piece(host(0), 0, piece, PieceDigest::default()).unwrap();
            f.add_piece(host(1), 0, piece, PieceDigest::default()).unwrap();
        }
        assert_eq!(f.upload_progress(), 100.0);
    }

    #[test]
    fn test_expiration_lowest_end_height() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 1, 2, 1000);
        let mut contracts = ContractMap::new();

        assert_eq!(f.expiration(&contracts), 0);

        f.add_piece(host(0), 0, 0, PieceDigest::default()).unwrap();
        f.add_piece(host(1), 0, 1, PieceDigest::default()).unwrap();
        f.add_piece(host(2), 0, 2, PieceDigest::default()).unwrap();

        contracts.insert(host(0), ContractInfo { end_height: 100 });
        assert_eq!(f.expiration(&contracts), 100);

        contracts.insert(host(1), ContractInfo { end_height: 50 });
        assert_eq!(f.expiration(&contracts), 50);

        contracts.insert(host(2), ContractInfo { end_height: 75 });
        assert_eq!(f.expiration(&contracts), 50);
    }

    #[test]
    fn test_usable_piece_count_filters_hosts() {
        let dir = tempdir().unwrap();
        let f = new_file(dir.path(), 2, 2, 0);
        let workers: HashSet<_> = [host(0), host(1)].into();
        let mut utils = HostUtilities::default();

        f.add_piece(host(0), 0, 0, PieceDigest::default()).unwrap();
        f.add_piece(host(1), 0, 1, PieceDigest::default()).unwrap();
        f.add_piece(host(9), 0, 2, PieceDigest::default()).unwrap(); // no worker

        assert_eq!(f.usable_piece_count(0, &workers, &utils).unwrap(), 2);

        utils.set_offline(host(1), true);
        assert_eq!(f.usable_piece_count(0, &workers, &utils).unwrap(), 1);

        assert!(f.usable_piece_count(5, &workers, &utils).is_err());
    }

    proptest! {
        // Adding a piece never decreases redundancy; progress stays in
        // [0, 100] for any placement sequence.
        #[test]
        fn prop_redundancy_monotone_and_progress_capped(
            placements in proptest::collection::vec(
                (0u64..4, 0u32..4, 0u8..6), 0..64,
            ),
        ) {
            let dir = tempdir().unwrap();
            let f = new_file(dir.path(), 2, 2, 0);
            f.grow_num_chunks(4).unwrap();
            let utils = friendly_utils(6);

            let mut last = f.redundancy(&utils);
            for (chunk, piece, h) in placements {
                f.add_piece(host(h), chunk, piece, PieceDigest::default()).unwrap();
                let now = f.redundancy(&utils);
                prop_assert!(now >= last);
                last = now;

                let progress = f.upload_progress();
                prop_assert!((0.0..=100.0).contains(&progress));
            }

            // Marking any host offline never increases redundancy.
            for h in 0..6u8 {
                let mut degraded = friendly_utils(6);
                degraded.set_offline(host(h), true);
                prop_assert!(f.redundancy(&degraded) <= last);
            }
        }
    }
}
