//! Directory traversal and the directory-level operations.
//!
//! The walk state is an explicit [`DirCursor`] owned by the caller (or by a
//! [`DirList`] handed to the user for listing), so concurrent walks and
//! directory changes cannot corrupt each other.

use super::layout::{
    decode_entry, encode_dot_entry, encode_entry, read_u16, read_u32, write_u16, write_u32,
    DirEntry, EntryFlags, DIR_ENTRY_SIZE, ENTRY_END, ENTRY_FREE,
};
use super::{end_of_chain, names, FileName, Filesystem};
use crate::error::{Error, Result};
use crate::spi::SpiBus;
use log::debug;

/// Position of one directory-entry slot inside a directory's cluster chain.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DirCursor {
    cluster: u32,
    sector_in_cluster: u32,
    offset: usize,
    /// Set once the walk has run off the end of the cluster chain.
    done: bool,
}

/// An in-progress directory listing, produced by
/// [`Filesystem::list_first`] and advanced by [`Filesystem::list_next`].
pub struct DirList {
    cursor: DirCursor,
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize>
    Filesystem<S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    /// A cursor at the first entry of the current directory.
    fn dir_start(&self) -> Result<DirCursor> {
        self.require_mounted()?;
        Ok(DirCursor {
            cluster: self.current_dir,
            sector_in_cluster: 0,
            offset: 0,
            done: false,
        })
    }

    fn read_raw_entry(&mut self, cursor: &DirCursor) -> Result<[u8; DIR_ENTRY_SIZE]> {
        let vol = self.vol()?;
        let sector = vol.cluster_to_sector(cursor.cluster) + cursor.sector_in_cluster;
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        self.dev.read_partial(sector, cursor.offset, &mut raw)?;
        Ok(raw)
    }

    fn write_raw_entry(&mut self, cursor: &DirCursor, raw: &[u8; DIR_ENTRY_SIZE]) -> Result<()> {
        let vol = self.vol()?;
        let sector = vol.cluster_to_sector(cursor.cluster) + cursor.sector_in_cluster;
        self.dev.write_partial(sector, cursor.offset, raw)
    }

    /// Advance to the next entry slot, following the FAT across cluster
    /// boundaries. `Ok(false)` means the cluster chain ended.
    fn step(&mut self, cursor: &mut DirCursor) -> Result<bool> {
        let vol = self.vol()?;
        cursor.offset += DIR_ENTRY_SIZE;
        if cursor.offset >= 512 {
            cursor.offset = 0;
            cursor.sector_in_cluster += 1;
            if cursor.sector_in_cluster >= vol.sectors_per_cluster as u32 {
                let next = self.next_cluster(cursor.cluster)?;
                if end_of_chain(next) {
                    return Ok(false);
                }
                cursor.cluster = next;
                cursor.sector_in_cluster = 0;
            }
        }
        Ok(true)
    }

    /// Read the entry under the cursor and advance. `Ok(None)` at the end of
    /// the directory (either the 0x00 marker or the end of the chain); the
    /// cursor then stays put, so further calls keep reporting the end.
    pub(crate) fn next_entry(&mut self, cursor: &mut DirCursor) -> Result<Option<DirEntry>> {
        if cursor.done {
            return Ok(None);
        }

        let raw = self.read_raw_entry(cursor)?;
        if raw[0] == ENTRY_END {
            return Ok(None);
        }

        let entry = decode_entry(&raw);
        if !self.step(cursor)? {
            cursor.done = true;
        }
        Ok(Some(entry))
    }

    /// Find a live entry by its on-disk name. The walk sees deleted slots
    /// too, but a valid name can never match one.
    pub(crate) fn search_disk_name(&mut self, target: &[u8; 11]) -> Result<DirEntry> {
        let mut cursor = self.dir_start()?;
        loop {
            match self.next_entry(&mut cursor)? {
                Some(entry) if entry.name == *target => return Ok(entry),
                Some(_) => {}
                None => return Err(Error::NotFound),
            }
        }
    }

    /// Install `entry` in the current directory: reuse the first deleted
    /// slot, or take the end-of-directory marker's slot and push the marker
    /// one entry further, extending the directory by a zero-filled cluster
    /// when the marker has nowhere to go.
    pub(crate) fn add_entry(&mut self, entry: &DirEntry) -> Result<()> {
        let to_add = encode_entry(entry);
        let end_marker = [0u8; DIR_ENTRY_SIZE];
        let mut cursor = self.dir_start()?;
        let mut insert_at: Option<DirCursor> = None;

        loop {
            if insert_at.is_none() {
                let raw = self.read_raw_entry(&cursor)?;
                if raw[0] == ENTRY_FREE {
                    return self.write_raw_entry(&cursor, &to_add);
                }
                if raw[0] == ENTRY_END {
                    // don't write yet: first make sure the end marker can
                    // move into the next slot, so a full volume fails cleanly
                    insert_at = Some(cursor);
                }
            }

            if self.step(&mut cursor)? {
                if let Some(at) = insert_at {
                    self.write_raw_entry(&cursor, &end_marker)?;
                    return self.write_raw_entry(&at, &to_add);
                }
            } else {
                let at = match insert_at {
                    Some(at) => at,
                    // walked the whole chain without an end marker or a
                    // free slot
                    None => return Err(Error::EndOfDir),
                };

                debug!("directory full, appending a cluster");
                let new_cluster = self.append_cluster(cursor.cluster)?;
                self.zero_cluster(new_cluster)?;
                let marker_cursor = DirCursor {
                    cluster: new_cluster,
                    sector_in_cluster: 0,
                    offset: 0,
                    done: false,
                };
                self.write_raw_entry(&marker_cursor, &end_marker)?;
                return self.write_raw_entry(&at, &to_add);
            }
        }
    }

    /// Mark the named entry deleted and report its (first cluster, size) so
    /// the caller can release the chain.
    pub(crate) fn remove_entry(&mut self, target: &[u8; 11]) -> Result<(u32, u32)> {
        let mut cursor = self.dir_start()?;
        loop {
            let mut raw = self.read_raw_entry(&cursor)?;
            if raw[0] == ENTRY_END {
                return Err(Error::EndOfDir);
            }
            if raw[..11] == target[..] {
                let first_cluster = ((read_u16(&raw, 20) as u32) << 16) | read_u16(&raw, 26) as u32;
                let size = read_u32(&raw, 28);
                raw[0] = ENTRY_FREE;
                self.write_raw_entry(&cursor, &raw)?;
                return Ok((first_cluster, size));
            }
            if !self.step(&mut cursor)? {
                return Err(Error::EndOfDir);
            }
        }
    }

    /// Rewrite the named entry's first cluster and size in place.
    pub(crate) fn update_entry(
        &mut self,
        target: &[u8; 11],
        first_cluster: u32,
        size: u32,
    ) -> Result<()> {
        let mut cursor = self.dir_start()?;
        loop {
            let mut raw = self.read_raw_entry(&cursor)?;
            if raw[0] == ENTRY_END {
                return Err(Error::EndOfDir);
            }
            if raw[..11] == target[..] {
                write_u16(&mut raw, 20, (first_cluster >> 16) as u16);
                write_u16(&mut raw, 26, first_cluster as u16);
                write_u32(&mut raw, 28, size);
                return self.write_raw_entry(&cursor, &raw);
            }
            if !self.step(&mut cursor)? {
                return Err(Error::EndOfDir);
            }
        }
    }

    /// Zero-fill every sector of a cluster.
    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<()> {
        let vol = self.vol()?;
        let zeros = [0u8; 512];
        let first_sector = vol.cluster_to_sector(cluster);
        for n in 0..vol.sectors_per_cluster as u32 {
            self.dev.write_partial(first_sector + n, 0, &zeros)?;
        }
        Ok(())
    }

    /// Create an object in the current directory. For directories this
    /// allocates and zero-fills the first cluster and writes the `.` and
    /// `..` entries; `entry.first_cluster` is filled in either way.
    pub(crate) fn add_object(&mut self, entry: &mut DirEntry) -> Result<()> {
        match self.search_disk_name(&entry.name) {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }

        if entry.flags.contains(EntryFlags::DIR) {
            let vol = self.vol()?;
            let new_cluster = self.allocate_cluster(self.current_dir)?;
            entry.first_cluster = new_cluster;

            self.zero_cluster(new_cluster)?;

            let sector = vol.cluster_to_sector(new_cluster);
            // "." points at the new directory itself
            let dot = encode_dot_entry(b".          ", new_cluster);
            self.dev.write_partial(sector, 0, &dot)?;

            // ".." points at the parent, with root spelled as cluster 0
            let parent = if self.current_dir == vol.root_cluster {
                0
            } else {
                self.current_dir
            };
            let dotdot = encode_dot_entry(b"..         ", parent);
            self.dev.write_partial(sector, DIR_ENTRY_SIZE, &dotdot)?;
        } else {
            // a new file owns no clusters until the first write
            entry.first_cluster = 0;
        }

        self.add_entry(entry)
    }

    // -------------------------------------------------------------------------
    // user-facing directory operations
    // -------------------------------------------------------------------------

    /// Enter a subdirectory of the current directory.
    pub fn push(&mut self, name: &str) -> Result<()> {
        self.require_mounted()?;
        names::validate(name, true)?;

        let entry = self.search_disk_name(&names::search_form(name))?;
        if !entry.flags.contains(EntryFlags::DIR) {
            return Err(Error::NotDir);
        }

        let vol = self.vol()?;
        // ".." in a child of root points at cluster 0, meaning root
        self.current_dir = if entry.first_cluster == 0 {
            vol.root_cluster
        } else {
            entry.first_cluster
        };
        Ok(())
    }

    /// Go up one directory; fails at the root.
    pub fn pop(&mut self) -> Result<()> {
        self.require_mounted()?;
        let vol = self.vol()?;
        if self.current_dir == vol.root_cluster {
            return Err(Error::AtRoot);
        }
        self.push("..")
    }

    /// Create a subdirectory in the current directory.
    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        self.require_mounted()?;
        names::validate(name, true)?;

        let mut entry = DirEntry {
            name: names::to_disk(name),
            flags: EntryFlags::DIR,
            first_cluster: 0,
            size: 0,
        };
        self.add_object(&mut entry)
    }

    /// Remove an empty subdirectory of the current directory.
    pub fn rmdir(&mut self, name: &str) -> Result<()> {
        self.require_mounted()?;
        names::validate(name, true)?;

        // look inside: anything beyond ".", "..", and deleted slots blocks
        // the removal
        self.push(name)?;
        let mut cursor = self.dir_start()?;
        loop {
            match self.next_entry(&mut cursor) {
                Ok(Some(entry)) => {
                    if entry.name[0] == b'.' || entry.flags.contains(EntryFlags::EMPTY) {
                        continue;
                    }
                    self.pop()?;
                    return Err(Error::NotEmpty);
                }
                Ok(None) => break,
                Err(e) => {
                    self.pop()?;
                    return Err(e);
                }
            }
        }
        self.pop()?;

        let (first_cluster, _) = self
            .remove_entry(&names::to_disk(name))
            .map_err(|e| if e == Error::EndOfDir { Error::NotFound } else { e })?;
        self.free_chain(first_cluster)
    }

    /// Delete a file from the current directory, closing it first if it is
    /// open, and release its cluster chain.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.require_mounted()?;
        names::validate(name, false)?;
        let disk_name = names::to_disk(name);

        for index in 0..MAX_OPEN_FILES {
            let matches = match &self.files[index] {
                Some(file) => {
                    file.dir_first_cluster == self.current_dir && file.name_on_disk == disk_name
                }
                None => false,
            };
            if matches {
                debug!("deleting an open file, closing it first");
                self.close(super::FileId(index as u8))?;
            }
        }

        let (first_cluster, _) = self
            .remove_entry(&disk_name)
            .map_err(|e| if e == Error::EndOfDir { Error::NotFound } else { e })?;
        self.free_chain(first_cluster)
    }

    /// Look a name up in the current directory; `Ok` carries whether it is a
    /// directory.
    pub fn exists(&mut self, name: &str) -> Result<bool> {
        self.require_mounted()?;
        names::validate(name, false)?;
        let entry = self.search_disk_name(&names::search_form(name))?;
        Ok(entry.flags.contains(EntryFlags::DIR))
    }

    /// Size in bytes of a file in the current directory.
    pub fn size(&mut self, name: &str) -> Result<u32> {
        self.require_mounted()?;
        names::validate(name, false)?;
        let entry = self.search_disk_name(&names::search_form(name))?;
        Ok(entry.size)
    }

    /// Begin listing the current directory. Returns the listing state and
    /// the first visible name, or `None` for an empty directory. Deleted
    /// and hidden entries are skipped.
    pub fn list_first(&mut self) -> Result<(DirList, Option<FileName>)> {
        let mut list = DirList {
            cursor: self.dir_start()?,
        };
        let name = self.list_advance(&mut list)?;
        Ok((list, name))
    }

    /// The next visible name of a listing started with [`list_first`].
    ///
    /// [`list_first`]: Filesystem::list_first
    pub fn list_next(&mut self, list: &mut DirList) -> Result<Option<FileName>> {
        self.require_mounted()?;
        self.list_advance(list)
    }

    fn list_advance(&mut self, list: &mut DirList) -> Result<Option<FileName>> {
        loop {
            match self.next_entry(&mut list.cursor)? {
                Some(entry) => {
                    if entry
                        .flags
                        .intersects(EntryFlags::EMPTY | EntryFlags::HIDDEN)
                    {
                        continue;
                    }
                    return Ok(Some(names::from_disk(&entry.name)));
                }
                None => return Ok(None),
            }
        }
    }
}
