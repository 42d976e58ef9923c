//! FAT access: chain walking, allocation, and release.

use super::layout::{END_OF_CHAIN, FREE_COUNT_UNKNOWN};
use super::{end_of_chain, Filesystem};
use crate::error::{Error, Result};
use crate::spi::SpiBus;
use log::trace;

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize>
    Filesystem<S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    /// Read the FAT entry for `from`: the next cluster in its chain, or an
    /// end-of-chain value.
    pub(crate) fn next_cluster(&mut self, from: u32) -> Result<u32> {
        if end_of_chain(from) {
            return Err(Error::ClusterLookup);
        }
        let vol = self.vol()?;
        let mut entry = [0u8; 4];
        self.dev
            .read_partial(vol.fat_sector_of(from), vol.fat_offset_of(from), &mut entry)?;
        Ok(u32::from_le_bytes(entry))
    }

    /// Linear-probe the FAT for a free cluster, starting just past `from`
    /// and wrapping to cluster 3 (2 is the root directory). A full circle
    /// without a hit means the volume is full.
    pub(crate) fn find_free_from(&mut self, from: u32) -> Result<u32> {
        let vol = self.vol()?;
        let final_cluster =
            (vol.total_sectors - vol.data_start) / vol.sectors_per_cluster as u32;

        let mut candidate = from;
        let mut wraps = 0;
        loop {
            candidate += 1;
            if candidate >= final_cluster {
                candidate = 3;
                wraps += 1;
                if wraps > 1 {
                    return Err(Error::Full);
                }
            }
            if candidate == from {
                return Err(Error::Full);
            }

            let mut entry = [0u8; 4];
            self.dev.read_partial(
                vol.fat_sector_of(candidate),
                vol.fat_offset_of(candidate),
                &mut entry,
            )?;
            if u32::from_le_bytes(entry) == 0 {
                trace!("next empty cluster: {}", candidate);
                return Ok(candidate);
            }
        }
    }

    /// Write `value` into `cluster`'s entry in every FAT copy.
    ///
    /// The whole 32-bit slot is rewritten; the reserved top nibble is not
    /// read back and preserved.
    pub(crate) fn set_cluster_entry(&mut self, cluster: u32, value: u32) -> Result<()> {
        let vol = self.vol()?;
        let mut target_sector = vol.fat_sector_of(cluster);
        let offset = vol.fat_offset_of(cluster);

        for _ in 0..vol.number_of_fats {
            self.dev
                .write_partial(target_sector, offset, &value.to_le_bytes())?;
            target_sector += vol.sectors_per_fat;
        }
        Ok(())
    }

    /// Claim a free cluster near `hint`: mark it end-of-chain and account
    /// for it in the free count.
    pub(crate) fn allocate_cluster(&mut self, hint: u32) -> Result<u32> {
        let cluster = self.find_free_from(hint)?;
        self.set_cluster_entry(cluster, END_OF_CHAIN)?;
        if self.free_clusters != FREE_COUNT_UNKNOWN {
            self.free_clusters -= 1;
        }
        Ok(cluster)
    }

    /// Grow the chain containing `cluster_in_chain` by one cluster and
    /// return the new tail.
    pub(crate) fn append_cluster(&mut self, cluster_in_chain: u32) -> Result<u32> {
        if end_of_chain(cluster_in_chain) {
            return Err(Error::ClusterLookup);
        }

        // walk to the chain's tail
        let mut tail = cluster_in_chain;
        let mut next = self.next_cluster(tail)?;
        while !end_of_chain(next) {
            tail = next;
            next = self.next_cluster(tail)?;
        }

        let added = self.allocate_cluster(tail)?;
        // only now point the old tail at the new cluster
        self.set_cluster_entry(tail, added)?;
        Ok(added)
    }

    /// Release every cluster of the chain starting at `first`. A chain that
    /// never had a cluster (first is end-of-chain) is fine.
    pub(crate) fn free_chain(&mut self, first: u32) -> Result<()> {
        let mut current = first;
        if end_of_chain(current) {
            return Ok(());
        }

        loop {
            let next = self.next_cluster(current)?;
            self.set_cluster_entry(current, 0)?;
            if self.free_clusters != FREE_COUNT_UNKNOWN {
                self.free_clusters += 1;
            }
            if end_of_chain(next) {
                return Ok(());
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::small_fs;
    use super::super::{end_of_chain, layout::END_OF_CHAIN};
    use crate::error::Error;

    #[test]
    fn end_of_chain_values() {
        assert!(end_of_chain(0));
        assert!(end_of_chain(1));
        assert!(end_of_chain(0x0FFF_FFF8));
        assert!(end_of_chain(0x0FFF_FFFF));
        assert!(end_of_chain(0xFFFF_FFFF));
        assert!(!end_of_chain(2));
        assert!(!end_of_chain(1234));
    }

    #[test]
    fn root_chain_terminates() {
        let mut fs = small_fs();
        let next = fs.next_cluster(2).unwrap();
        assert!(end_of_chain(next));
    }

    #[test]
    fn lookup_of_end_of_chain_is_an_error() {
        let mut fs = small_fs();
        assert_eq!(fs.next_cluster(0), Err(Error::ClusterLookup));
        assert_eq!(fs.next_cluster(END_OF_CHAIN), Err(Error::ClusterLookup));
    }

    #[test]
    fn find_free_skips_used_clusters() {
        let mut fs = small_fs();
        // first free cluster after root
        assert_eq!(fs.find_free_from(2).unwrap(), 3);
        fs.set_cluster_entry(3, END_OF_CHAIN).unwrap();
        assert_eq!(fs.find_free_from(2).unwrap(), 4);
    }

    #[test]
    fn append_links_old_tail_to_new_cluster() {
        let mut fs = small_fs();
        let free_before = fs.free_clusters().unwrap();

        let head = fs.find_free_from(2).unwrap();
        fs.set_cluster_entry(head, END_OF_CHAIN).unwrap();
        let added = fs.append_cluster(head).unwrap();

        assert_eq!(fs.next_cluster(head).unwrap(), added);
        assert!(end_of_chain(fs.next_cluster(added).unwrap()));
        assert_eq!(fs.free_clusters().unwrap(), free_before - 1);
    }

    #[test]
    fn set_cluster_entry_updates_both_fats() {
        let mut fs = small_fs();
        fs.set_cluster_entry(5, 0x00AB_CDEF).unwrap();
        let vol = fs.vol().unwrap();

        let mut first = [0u8; 4];
        fs.dev
            .read_partial(vol.fat_sector_of(5), vol.fat_offset_of(5), &mut first)
            .unwrap();
        let mut second = [0u8; 4];
        fs.dev
            .read_partial(
                vol.fat_sector_of(5) + vol.sectors_per_fat,
                vol.fat_offset_of(5),
                &mut second,
            )
            .unwrap();
        assert_eq!(u32::from_le_bytes(first), 0x00AB_CDEF);
        assert_eq!(u32::from_le_bytes(second), 0x00AB_CDEF);
    }

    #[test]
    fn free_chain_zeroes_every_link() {
        let mut fs = small_fs();
        let head = fs.find_free_from(2).unwrap();
        fs.set_cluster_entry(head, END_OF_CHAIN).unwrap();
        let second = fs.append_cluster(head).unwrap();
        let third = fs.append_cluster(head).unwrap();
        let free_before = fs.free_clusters().unwrap();

        fs.free_chain(head).unwrap();

        for cluster in [head, second, third] {
            assert_eq!(fs.next_cluster(cluster).unwrap(), 0);
        }
        assert_eq!(fs.free_clusters().unwrap(), free_before + 3);
    }

    #[test]
    fn free_chain_tolerates_an_empty_file() {
        let mut fs = small_fs();
        fs.free_chain(0).unwrap();
        fs.free_chain(END_OF_CHAIN).unwrap();
    }
}
