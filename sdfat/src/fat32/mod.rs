//! FAT32 engine: on-disk discovery, the FAT, directories, and open files.
//!
//! All state lives in one [`Filesystem`] value threaded through every
//! operation; nothing here is global. The engine talks to the card only
//! through the cache-backed [`BlockDevice`](crate::device::BlockDevice), in
//! partial-sector reads and writes.

pub(crate) mod layout;
pub(crate) mod names;

mod dir;
mod file;
mod table;

pub use dir::DirList;
pub use file::{File, FileId, Mode};
pub use layout::{DirEntry, EntryFlags};
pub use names::FileName;

use crate::device::{BlockDevice, CrcMode};
use crate::error::{Error, Result};
use crate::spi::SpiBus;
use layout::{
    PartitionEntry, VolumeId, END_SIGNATURE, FREE_COUNT_UNKNOWN, FSINFO_FREE_COUNT_OFFSET,
    FSINFO_LEAD_SIGNATURE, FSINFO_STRUCT_SIGNATURE,
};
use log::{debug, info};

use file::OpenFile;

/// Seek target meaning "the end of the file".
pub const FILE_END_POS: u32 = 0xFFFF_FFFF;

/// Volume geometry computed once at mount.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Volume {
    /// First sector of the partition (holds the volume ID).
    pub partition_start: u32,
    /// First FAT sector: partition start plus hidden and reserved sectors.
    pub fat_start: u32,
    /// Sector count of the partition, as reported by the volume ID.
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub number_of_fats: u8,
    pub sectors_per_fat: u32,
    /// First sector of the data region (cluster 2).
    pub data_start: u32,
    pub root_cluster: u32,
}

impl Volume {
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.data_start + (cluster - 2) * self.sectors_per_cluster as u32
    }

    /// FAT sector holding `cluster`'s entry; 128 entries per sector.
    pub fn fat_sector_of(&self, cluster: u32) -> u32 {
        self.fat_start + (cluster >> 7)
    }

    /// Byte offset of `cluster`'s entry within its FAT sector.
    pub fn fat_offset_of(&self, cluster: u32) -> usize {
        ((cluster & 127) * 4) as usize
    }
}

/// End-of-chain test: the low 28 bits all set (reserved and bad ranges
/// included), or any value below the first valid cluster number.
pub(crate) fn end_of_chain(cluster: u32) -> bool {
    cluster < 2 || (cluster & 0x0FFF_FFF0) == 0x0FFF_FFF0
}

/// A mounted (or mountable) FAT32 filesystem on an SPI SD card.
///
/// `CACHE_SLOTS` sizes the block cache and `MAX_OPEN_FILES` the open-file
/// table; both are compile-time capacities so RAM use stays fixed.
pub struct Filesystem<S: SpiBus, const CACHE_SLOTS: usize = 8, const MAX_OPEN_FILES: usize = 8> {
    pub(crate) dev: BlockDevice<S, CACHE_SLOTS>,
    pub(crate) volume: Option<Volume>,
    /// Absolute FS info sector, or 0 when free-count tracking is disabled.
    pub(crate) fs_info_sector: u32,
    pub(crate) starting_free_clusters: u32,
    pub(crate) free_clusters: u32,
    pub(crate) current_dir: u32,
    pub(crate) files: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize>
    Filesystem<S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    pub fn new(spi: S) -> Self {
        Filesystem {
            dev: BlockDevice::new(spi),
            volume: None,
            fs_info_sector: 0,
            starting_free_clusters: FREE_COUNT_UNKNOWN,
            free_clusters: FREE_COUNT_UNKNOWN,
            current_dir: 0,
            files: [None; MAX_OPEN_FILES],
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    /// The tracked free-cluster count, if the volume supports one.
    pub fn free_clusters(&self) -> Option<u32> {
        if self.free_clusters == FREE_COUNT_UNKNOWN {
            None
        } else {
            Some(self.free_clusters)
        }
    }

    /// Cache statistics: (hits, misses, writebacks, resident blocks).
    pub fn cache_stats(&self) -> (u32, u32, u32, usize) {
        self.dev.cache_stats()
    }

    /// Total block-level card accesses.
    pub fn block_accesses(&self) -> u32 {
        self.dev.block_accesses()
    }

    /// The underlying block device, e.g. to toggle write verification.
    pub fn device_mut(&mut self) -> &mut BlockDevice<S, CACHE_SLOTS> {
        &mut self.dev
    }

    /// Give the SPI bus back, discarding any unflushed state.
    pub fn release(self) -> S {
        self.dev.release()
    }

    pub(crate) fn require_mounted(&self) -> Result<()> {
        if self.volume.is_some() {
            Ok(())
        } else {
            Err(Error::NotMounted)
        }
    }

    pub(crate) fn vol(&self) -> Result<Volume> {
        self.volume.ok_or(Error::NotMounted)
    }

    /// Initialize the card and mount the first FAT32 partition: verify the
    /// MBR, the volume ID, and the FS info sector, compute the geometry,
    /// clear the open-file table, and land in the root directory.
    pub fn mount(&mut self) -> Result<()> {
        self.volume = None;
        self.dev.init(CrcMode::UseCrc)?;

        let mut sector = [0u8; 512];

        // block 0: master boot record
        self.dev.read_partial(0, 0, &mut sector)?;
        if layout::read_u16(&sector, 510) != END_SIGNATURE {
            return Err(Error::Mbr);
        }

        let mut partition_start = 0u32;
        let mut partition_sectors = 0u32;
        for i in 0..4 {
            let entry = PartitionEntry::parse(&sector[446 + i * 16..446 + (i + 1) * 16]);
            if entry.is_fat32() {
                partition_start = entry.start_sector;
                partition_sectors = entry.number_of_sectors;
                break;
            }
        }
        if partition_start == 0 || partition_sectors == 0 {
            return Err(Error::NoFat32);
        }

        // the partition's volume ID
        self.dev.read_partial(partition_start, 0, &mut sector)?;
        let id = VolumeId::parse(&sector);
        if !id.looks_like_fat32() {
            return Err(Error::VolumeId);
        }

        let fat_start = partition_start + id.hidden_sectors + id.reserved_sectors as u32;
        let volume = Volume {
            partition_start,
            fat_start,
            // trust the volume ID over the MBR for the sector count
            total_sectors: id.fat32_sectors,
            sectors_per_cluster: id.sectors_per_cluster,
            number_of_fats: id.number_of_fats,
            sectors_per_fat: id.fat32_sectors_per_fat,
            data_start: fat_start + id.fat32_sectors_per_fat * id.number_of_fats as u32,
            root_cluster: id.root_cluster,
        };

        // FS info sector: optional, and only trusted when its signatures hold
        if id.fs_info_sector == 0 || id.fs_info_sector == 0xFFFF {
            debug!("free cluster tracking unsupported");
            self.fs_info_sector = 0;
            self.free_clusters = FREE_COUNT_UNKNOWN;
            self.starting_free_clusters = FREE_COUNT_UNKNOWN;
        } else {
            let fs_info_sector = partition_start + id.fs_info_sector as u32;
            self.dev.read_partial(fs_info_sector, 0, &mut sector)?;
            if layout::read_u32(&sector, 0) != FSINFO_LEAD_SIGNATURE
                || layout::read_u32(&sector, 484) != FSINFO_STRUCT_SIGNATURE
                || layout::read_u16(&sector, 510) != END_SIGNATURE
            {
                debug!("bad FS info signatures, free cluster count unknown");
                self.fs_info_sector = 0;
                self.free_clusters = FREE_COUNT_UNKNOWN;
                self.starting_free_clusters = FREE_COUNT_UNKNOWN;
            } else {
                self.fs_info_sector = fs_info_sector;
                self.free_clusters = layout::read_u32(&sector, FSINFO_FREE_COUNT_OFFSET);
                self.starting_free_clusters = self.free_clusters;
            }
        }

        self.files = [None; MAX_OPEN_FILES];
        self.current_dir = volume.root_cluster;
        self.volume = Some(volume);

        info!(
            "mounted FAT32: partition at sector {}, {} sectors, {} per cluster, root at cluster {}",
            volume.partition_start,
            volume.total_sectors,
            volume.sectors_per_cluster,
            volume.root_cluster
        );
        Ok(())
    }

    /// Unmount: close every open file, write back the free-cluster count if
    /// it changed, flush the cache, and reset the card.
    pub fn unmount(&mut self) -> Result<()> {
        self.require_mounted()?;

        for index in 0..MAX_OPEN_FILES {
            self.close(FileId(index as u8))?;
        }

        if self.free_clusters != FREE_COUNT_UNKNOWN
            && self.fs_info_sector != 0
            && self.starting_free_clusters != self.free_clusters
        {
            debug!("updating free cluster count to {}", self.free_clusters);
            self.dev.write_partial(
                self.fs_info_sector,
                FSINFO_FREE_COUNT_OFFSET,
                &self.free_clusters.to_le_bytes(),
            )?;
        }

        self.dev.flush()?;
        self.volume = None;
        self.dev.shutdown()?;
        Ok(())
    }
}
