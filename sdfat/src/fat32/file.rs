//! Open files: the cursor table and the read/write/seek machinery.

use super::layout::{DirEntry, EntryFlags};
use super::{end_of_chain, names, Filesystem, FILE_END_POS};
use crate::error::{Error, Result};
use crate::spi::SpiBus;
use log::debug;

/// How a file is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Existing file, reads only, cursor at 0.
    Read,
    /// Existing file, cursor at the end.
    Append,
    /// Fresh file; an existing one of the same name is deleted first.
    Create,
}

/// Handle to an open file, as returned by [`Filesystem::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileId(pub(crate) u8);

/// Live cursor of one open file.
///
/// While open, `(current_cluster, sector_in_cluster, offset_in_sector)` is
/// the concrete position for byte `seek_offset`, except that
/// `current_cluster` may sit on an end-of-chain value when the cursor is at
/// the end of the allocated chain; the next write allocates then.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OpenFile {
    pub mode: Mode,
    /// First cluster of the directory holding this file's entry.
    pub dir_first_cluster: u32,
    pub name_on_disk: [u8; 11],
    pub first_cluster: u32,
    pub seek_offset: u32,
    pub current_cluster: u32,
    pub sector_in_cluster: u8,
    pub offset_in_sector: u16,
    pub size: u32,
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize>
    Filesystem<S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    fn slot(&self, id: FileId) -> Result<(usize, OpenFile)> {
        let index = id.0 as usize;
        if index >= MAX_OPEN_FILES {
            return Err(Error::BadFileId);
        }
        match self.files[index] {
            Some(file) => Ok((index, file)),
            None => Err(Error::NotOpen),
        }
    }

    /// Open a file in the current directory.
    pub fn open(&mut self, name: &str, mode: Mode) -> Result<FileId> {
        self.require_mounted()?;
        names::validate(name, false)?;
        let disk_name = names::to_disk(name);

        // at most one cursor per (directory, name)
        for file in self.files.iter().flatten() {
            if file.dir_first_cluster == self.current_dir && file.name_on_disk == disk_name {
                return Err(Error::AlreadyOpen);
            }
        }

        let index = self
            .files
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(Error::TooManyFiles)?;

        let existing = match self.search_disk_name(&names::search_form(name)) {
            Ok(entry) => {
                if entry.flags.contains(EntryFlags::DIR) {
                    return Err(Error::NotFile);
                }
                if mode == Mode::Create {
                    debug!("create over an existing file, deleting it");
                    self.delete(name)?;
                    None
                } else {
                    Some(entry)
                }
            }
            Err(Error::NotFound) => {
                if mode != Mode::Create {
                    return Err(Error::NotFound);
                }
                None
            }
            Err(e) => return Err(e),
        };

        let entry = match existing {
            Some(entry) => entry,
            None => {
                let mut entry = DirEntry {
                    name: disk_name,
                    flags: EntryFlags::empty(),
                    first_cluster: 0,
                    size: 0,
                };
                self.add_object(&mut entry)?;
                entry
            }
        };

        self.files[index] = Some(OpenFile {
            mode,
            dir_first_cluster: self.current_dir,
            name_on_disk: disk_name,
            first_cluster: entry.first_cluster,
            seek_offset: 0,
            current_cluster: entry.first_cluster,
            sector_in_cluster: 0,
            offset_in_sector: 0,
            size: entry.size,
        });
        let id = FileId(index as u8);

        if mode == Mode::Append {
            if let Err(e) = self.seek(id, FILE_END_POS) {
                // close-on-failure; the seek error is what the caller sees
                let _ = self.close(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Close a file, writing its directory entry back if it was writable.
    /// Closing a slot that is not open is a successful no-op.
    pub fn close(&mut self, id: FileId) -> Result<()> {
        self.require_mounted()?;
        let index = id.0 as usize;
        if index >= MAX_OPEN_FILES {
            return Err(Error::BadFileId);
        }
        let file = match self.files[index] {
            Some(file) => file,
            None => return Ok(()),
        };

        let mut result = Ok(());
        if file.mode != Mode::Read {
            debug!(
                "closing writable file: first cluster {}, size {}",
                file.first_cluster, file.size
            );
            // the entry lives in the file's own directory, which need not be
            // the current one
            let saved_dir = self.current_dir;
            self.current_dir = file.dir_first_cluster;
            result = self.update_entry(&file.name_on_disk, file.first_cluster, file.size);
            self.current_dir = saved_dir;
        }

        self.files[index] = None;
        result
    }

    /// Move the cursor to `offset`; [`FILE_END_POS`] means the end of the
    /// file. Seeking past the end is an error.
    pub fn seek(&mut self, id: FileId, offset: u32) -> Result<()> {
        self.require_mounted()?;
        let (index, mut file) = self.slot(id)?;
        let result = self.seek_inner(&mut file, offset);
        self.files[index] = Some(file);
        result
    }

    fn seek_inner(&mut self, file: &mut OpenFile, offset: u32) -> Result<()> {
        let vol = self.vol()?;
        let mut offset = if offset == FILE_END_POS {
            file.size
        } else {
            offset
        };
        if offset > file.size {
            return Err(Error::SeekTooFar);
        }

        file.sector_in_cluster = 0;
        file.current_cluster = file.first_cluster;
        file.seek_offset = offset;

        // walk whole sectors, following the FAT at cluster boundaries
        while offset >= 512 {
            offset -= 512;
            file.sector_in_cluster += 1;
            if file.sector_in_cluster >= vol.sectors_per_cluster {
                file.current_cluster = self.next_cluster(file.current_cluster)?;
                file.sector_in_cluster = 0;
            }
        }
        file.offset_in_sector = offset as u16;
        Ok(())
    }

    /// The cursor's byte offset.
    pub fn tell(&self, id: FileId) -> Result<u32> {
        self.require_mounted()?;
        let (_, file) = self.slot(id)?;
        Ok(file.seek_offset)
    }

    /// Read exactly `buf.len()` bytes at the cursor. Reading past the end of
    /// the file is rejected up front.
    pub fn read(&mut self, id: FileId, buf: &mut [u8]) -> Result<()> {
        self.require_mounted()?;
        let (index, mut file) = self.slot(id)?;

        if file.seek_offset as u64 + buf.len() as u64 > file.size as u64 {
            return Err(Error::SeekTooFar);
        }

        let result = self.read_inner(&mut file, buf);
        self.files[index] = Some(file);
        result
    }

    fn read_inner(&mut self, file: &mut OpenFile, buf: &mut [u8]) -> Result<()> {
        let vol = self.vol()?;
        let mut pos = 0usize;

        // drain to the end of the current sector while the request crosses it
        while file.offset_in_sector as usize + (buf.len() - pos) >= 512 {
            let take = 512 - file.offset_in_sector as usize;
            if end_of_chain(file.current_cluster) {
                // the chain is shorter than the recorded size
                return Err(Error::SeekTooFar);
            }

            let sector =
                vol.cluster_to_sector(file.current_cluster) + file.sector_in_cluster as u32;
            self.dev
                .read_partial(sector, file.offset_in_sector as usize, &mut buf[pos..pos + take])?;
            pos += take;

            file.offset_in_sector = 0;
            file.sector_in_cluster += 1;
            file.seek_offset += take as u32;

            if file.sector_in_cluster >= vol.sectors_per_cluster {
                // may land on end-of-chain when the read ends exactly at the
                // last allocated byte
                file.current_cluster = self.next_cluster(file.current_cluster)?;
                file.sector_in_cluster = 0;
            }
        }

        if pos < buf.len() {
            if end_of_chain(file.current_cluster) {
                return Err(Error::SeekTooFar);
            }
            let sector =
                vol.cluster_to_sector(file.current_cluster) + file.sector_in_cluster as u32;
            self.dev
                .read_partial(sector, file.offset_in_sector as usize, &mut buf[pos..])?;
            let rest = (buf.len() - pos) as u32;
            file.offset_in_sector += rest as u16;
            file.seek_offset += rest;
        }
        Ok(())
    }

    /// Write `buf` at the cursor, growing the file (and its cluster chain)
    /// as needed.
    pub fn write(&mut self, id: FileId, buf: &[u8]) -> Result<()> {
        self.require_mounted()?;
        let (index, mut file) = self.slot(id)?;
        if file.mode == Mode::Read {
            return Err(Error::FileReadOnly);
        }

        let result = self.write_inner(&mut file, buf);
        self.files[index] = Some(file);
        result
    }

    fn write_inner(&mut self, file: &mut OpenFile, buf: &[u8]) -> Result<()> {
        let vol = self.vol()?;
        let mut pos = 0usize;

        while file.offset_in_sector as usize + (buf.len() - pos) >= 512 {
            let take = 512 - file.offset_in_sector as usize;
            if end_of_chain(file.current_cluster) {
                self.extend_file(file)?;
            }

            let sector =
                vol.cluster_to_sector(file.current_cluster) + file.sector_in_cluster as u32;
            self.dev
                .write_partial(sector, file.offset_in_sector as usize, &buf[pos..pos + take])?;
            pos += take;

            file.offset_in_sector = 0;
            file.sector_in_cluster += 1;
            file.seek_offset += take as u32;
            if file.seek_offset > file.size {
                file.size = file.seek_offset;
            }

            if file.sector_in_cluster >= vol.sectors_per_cluster {
                // may be end-of-chain; the next write through here allocates
                file.current_cluster = self.next_cluster(file.current_cluster)?;
                file.sector_in_cluster = 0;
            }
        }

        if pos < buf.len() {
            if end_of_chain(file.current_cluster) {
                self.extend_file(file)?;
            }
            let sector =
                vol.cluster_to_sector(file.current_cluster) + file.sector_in_cluster as u32;
            self.dev
                .write_partial(sector, file.offset_in_sector as usize, &buf[pos..])?;
            let rest = (buf.len() - pos) as u32;
            file.offset_in_sector += rest as u16;
            file.seek_offset += rest;
            if file.seek_offset > file.size {
                file.size = file.seek_offset;
            }
        }
        Ok(())
    }

    /// Give the cursor an allocated cluster to write into: the file's very
    /// first cluster, or one appended to its chain.
    fn extend_file(&mut self, file: &mut OpenFile) -> Result<()> {
        if end_of_chain(file.first_cluster) {
            let new_cluster = self.allocate_cluster(file.dir_first_cluster)?;
            debug!("first cluster {} allocated", new_cluster);
            file.first_cluster = new_cluster;
            file.current_cluster = new_cluster;
        } else {
            file.current_cluster = self.append_cluster(file.first_cluster)?;
            debug!("appended cluster {}", file.current_cluster);
        }
        Ok(())
    }

    /// Borrow an open file as an [`embedded_io`]-flavoured handle.
    pub fn handle(&mut self, id: FileId) -> File<'_, S, CACHE_SLOTS, MAX_OPEN_FILES> {
        File { fs: self, id }
    }
}

// =============================================================================
// embedded-io adapter
// =============================================================================

/// A borrowed open file implementing the `embedded_io` traits.
///
/// Unlike [`Filesystem::read`], reads here follow the usual I/O convention:
/// short reads at the end of the file instead of an error.
pub struct File<'a, S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize> {
    fs: &'a mut Filesystem<S, CACHE_SLOTS, MAX_OPEN_FILES>,
    id: FileId,
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize>
    File<'_, S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    pub fn id(&self) -> FileId {
        self.id
    }

    fn remaining(&self) -> Result<u32> {
        let (_, file) = self.fs.slot(self.id)?;
        Ok(file.size - file.seek_offset)
    }
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize> embedded_io::ErrorType
    for File<'_, S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    type Error = Error;
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize> embedded_io::Read
    for File<'_, S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = (self.remaining()? as usize).min(buf.len());
        if len == 0 {
            return Ok(0);
        }
        self.fs.read(self.id, &mut buf[..len])?;
        Ok(len)
    }
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize> embedded_io::Write
    for File<'_, S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.fs.write(self.id, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: SpiBus, const CACHE_SLOTS: usize, const MAX_OPEN_FILES: usize> embedded_io::Seek
    for File<'_, S, CACHE_SLOTS, MAX_OPEN_FILES>
{
    fn seek(&mut self, pos: embedded_io::SeekFrom) -> Result<u64> {
        let (_, file) = self.fs.slot(self.id)?;
        let target = match pos {
            embedded_io::SeekFrom::Start(offset) => offset as i64,
            embedded_io::SeekFrom::End(delta) => file.size as i64 + delta,
            embedded_io::SeekFrom::Current(delta) => file.seek_offset as i64 + delta,
        };
        if target < 0 || target > file.size as i64 {
            return Err(Error::SeekTooFar);
        }
        self.fs.seek(self.id, target as u32)?;
        Ok(target as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{mounted, small_fs};
    use super::super::FILE_END_POS;
    use super::*;

    #[test]
    fn create_write_reopen_read() {
        let mut fs = small_fs();
        let id = fs.open("a.txt", Mode::Create).unwrap();
        fs.write(id, b"hello").unwrap();
        fs.close(id).unwrap();

        assert_eq!(fs.size("a.txt").unwrap(), 5);

        let id = fs.open("a.txt", Mode::Read).unwrap();
        let mut buf = [0u8; 5];
        fs.read(id, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.tell(id).unwrap(), 5);

        let mut one = [0u8; 1];
        assert_eq!(fs.read(id, &mut one), Err(Error::SeekTooFar));
        fs.close(id).unwrap();
    }

    #[test]
    fn open_missing_file_fails() {
        let mut fs = small_fs();
        assert_eq!(fs.open("no.txt", Mode::Read).unwrap_err(), Error::NotFound);
        assert_eq!(
            fs.open("no.txt", Mode::Append).unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn open_directory_as_file_fails() {
        let mut fs = small_fs();
        fs.mkdir("adir").unwrap();
        assert_eq!(fs.open("adir", Mode::Read).unwrap_err(), Error::NotFile);
        assert_eq!(fs.open("adir", Mode::Create).unwrap_err(), Error::NotFile);
    }

    #[test]
    fn double_open_is_rejected() {
        let mut fs = small_fs();
        let id = fs.open("once.txt", Mode::Create).unwrap();
        assert_eq!(
            fs.open("once.txt", Mode::Read).unwrap_err(),
            Error::AlreadyOpen
        );
        fs.close(id).unwrap();
    }

    #[test]
    fn open_table_capacity_is_bounded() {
        let mut fs = small_fs();
        // MAX_OPEN_FILES = 4 in the test harness
        let mut ids = vec![];
        for name in ["f0.txt", "f1.txt", "f2.txt", "f3.txt"] {
            ids.push(fs.open(name, Mode::Create).unwrap());
        }
        assert_eq!(
            fs.open("f4.txt", Mode::Create).unwrap_err(),
            Error::TooManyFiles
        );
        for id in ids {
            fs.close(id).unwrap();
        }
    }

    #[test]
    fn file_ids_are_validated() {
        let mut fs = small_fs();
        assert_eq!(fs.close(FileId(200)), Err(Error::BadFileId));
        assert_eq!(fs.tell(FileId(1)), Err(Error::NotOpen));
        let mut buf = [0u8; 1];
        assert_eq!(fs.read(FileId(1), &mut buf), Err(Error::NotOpen));
        // closing a closed slot is fine
        assert_eq!(fs.close(FileId(1)), Ok(()));
    }

    #[test]
    fn read_mode_rejects_writes() {
        let mut fs = small_fs();
        let id = fs.open("ro.txt", Mode::Create).unwrap();
        fs.write(id, b"data").unwrap();
        fs.close(id).unwrap();

        let id = fs.open("ro.txt", Mode::Read).unwrap();
        assert_eq!(fs.write(id, b"nope"), Err(Error::FileReadOnly));
        fs.close(id).unwrap();
    }

    #[test]
    fn append_starts_at_the_end() {
        let mut fs = small_fs();
        let id = fs.open("log.txt", Mode::Create).unwrap();
        fs.write(id, b"first").unwrap();
        fs.close(id).unwrap();

        let id = fs.open("log.txt", Mode::Append).unwrap();
        assert_eq!(fs.tell(id).unwrap(), 5);
        fs.write(id, b" second").unwrap();
        fs.close(id).unwrap();

        let id = fs.open("log.txt", Mode::Read).unwrap();
        let mut buf = [0u8; 12];
        fs.read(id, &mut buf).unwrap();
        assert_eq!(&buf, b"first second");
        fs.close(id).unwrap();
    }

    #[test]
    fn create_truncates_an_existing_file() {
        let mut fs = small_fs();
        let id = fs.open("re.txt", Mode::Create).unwrap();
        fs.write(id, b"a long first version").unwrap();
        fs.close(id).unwrap();
        let free_after_first = fs.free_clusters().unwrap();

        let id = fs.open("re.txt", Mode::Create).unwrap();
        fs.write(id, b"v2").unwrap();
        fs.close(id).unwrap();

        assert_eq!(fs.size("re.txt").unwrap(), 2);
        // the old chain was released and a fresh cluster allocated
        assert_eq!(fs.free_clusters().unwrap(), free_after_first);
    }

    #[test]
    fn seek_and_tell_agree() {
        let mut fs = small_fs();
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let id = fs.open("seek.bin", Mode::Create).unwrap();
        fs.write(id, &data).unwrap();
        fs.close(id).unwrap();

        let id = fs.open("seek.bin", Mode::Read).unwrap();
        for offset in [0u32, 1, 511, 512, 513, 1024, 2047, 2999, 3000] {
            fs.seek(id, offset).unwrap();
            assert_eq!(fs.tell(id).unwrap(), offset);
        }

        // spot-check the data under a mid-file seek
        fs.seek(id, 1500).unwrap();
        let mut buf = [0u8; 4];
        fs.read(id, &mut buf).unwrap();
        assert_eq!(buf[0], data[1500]);

        fs.seek(id, FILE_END_POS).unwrap();
        assert_eq!(fs.tell(id).unwrap(), 3000);
        assert_eq!(fs.seek(id, 3001), Err(Error::SeekTooFar));
        fs.close(id).unwrap();
    }

    #[test]
    fn size_never_shrinks_during_a_session() {
        let mut fs = small_fs();
        let id = fs.open("grow.bin", Mode::Create).unwrap();
        fs.write(id, &[1u8; 700]).unwrap();
        fs.seek(id, 0).unwrap();
        fs.write(id, &[2u8; 10]).unwrap();

        // overwriting at the front does not shrink the file
        let (_, file) = fs.slot(id).unwrap();
        assert_eq!(file.size, 700);
        fs.close(id).unwrap();
        assert_eq!(fs.size("grow.bin").unwrap(), 700);
    }

    #[test]
    fn append_across_a_cluster_boundary_links_a_new_cluster() {
        let mut fs = small_fs();
        // two sectors per cluster: 1024 bytes
        let id = fs.open("span.bin", Mode::Create).unwrap();
        fs.write(id, &[7u8; 1000]).unwrap();
        fs.close(id).unwrap();
        let free_before = fs.free_clusters().unwrap();

        let id = fs.open("span.bin", Mode::Append).unwrap();
        fs.write(id, &[8u8; 100]).unwrap();
        fs.close(id).unwrap();

        assert_eq!(fs.size("span.bin").unwrap(), 1100);
        assert_eq!(fs.free_clusters().unwrap(), free_before - 1);

        let first = fs.search_disk_name(b"SPAN    BIN").unwrap().first_cluster;
        let second = fs.next_cluster(first).unwrap();
        assert!(!super::super::end_of_chain(second));
        assert!(super::super::end_of_chain(fs.next_cluster(second).unwrap()));

        let id = fs.open("span.bin", Mode::Read).unwrap();
        fs.seek(id, 995).unwrap();
        let mut buf = [0u8; 10];
        fs.read(id, &mut buf).unwrap();
        assert_eq!(&buf, &[7, 7, 7, 7, 7, 8, 8, 8, 8, 8]);
        fs.close(id).unwrap();
    }

    #[test]
    fn chunked_copy_preserves_content() {
        // the classic drill: copy a 16437-byte file 80 bytes at a time
        let mut fs = mounted(16384, 2);
        let data: Vec<u8> = (0..16437u32).map(|i| (i * 7 % 253) as u8).collect();

        let id = fs.open("python.txt", Mode::Create).unwrap();
        fs.write(id, &data).unwrap();
        fs.close(id).unwrap();
        assert_eq!(fs.size("python.txt").unwrap(), 16437);

        fs.mkdir("created").unwrap();

        let size = fs.size("python.txt").unwrap();
        let mut offset = 0u32;
        while offset < size {
            let len = 80.min(size - offset) as usize;
            let mut chunk = vec![0u8; len];

            let src = fs.open("python.txt", Mode::Read).unwrap();
            fs.seek(src, offset).unwrap();
            fs.read(src, &mut chunk).unwrap();
            fs.close(src).unwrap();

            fs.push("created").unwrap();
            let dst = if offset == 0 {
                fs.open("py_copy.txt", Mode::Create).unwrap()
            } else {
                fs.open("py_copy.txt", Mode::Append).unwrap()
            };
            fs.write(dst, &chunk).unwrap();
            fs.close(dst).unwrap();
            fs.pop().unwrap();

            offset += len as u32;
        }

        fs.push("created").unwrap();
        assert_eq!(fs.size("py_copy.txt").unwrap(), 16437);
        let id = fs.open("py_copy.txt", Mode::Read).unwrap();
        let mut back = vec![0u8; 16437];
        fs.read(id, &mut back).unwrap();
        assert_eq!(back, data);
        fs.close(id).unwrap();
        fs.pop().unwrap();
    }

    #[test]
    fn delete_closes_the_open_file_first() {
        let mut fs = small_fs();
        let id = fs.open("temp.txt", Mode::Create).unwrap();
        fs.write(id, b"scratch").unwrap();

        fs.delete("temp.txt").unwrap();
        assert_eq!(fs.exists("temp.txt"), Err(Error::NotFound));
        // the slot was released by the implicit close
        assert_eq!(fs.tell(id), Err(Error::NotOpen));
    }

    #[test]
    fn io_trait_handle_reads_and_seeks() {
        use embedded_io::{Read, Seek, SeekFrom, Write};

        let mut fs = small_fs();
        let id = fs.open("io.txt", Mode::Create).unwrap();
        {
            let mut handle = fs.handle(id);
            assert_eq!(handle.write(b"embedded bytes").unwrap(), 14);
        }
        fs.close(id).unwrap();

        let id = fs.open("io.txt", Mode::Read).unwrap();
        let mut handle = fs.handle(id);
        let mut buf = [0u8; 32];
        // short read at the end of the file, then a clean EOF
        assert_eq!(handle.read(&mut buf).unwrap(), 14);
        assert_eq!(&buf[..14], b"embedded bytes");
        assert_eq!(handle.read(&mut buf).unwrap(), 0);

        assert_eq!(handle.seek(SeekFrom::Start(9)).unwrap(), 9);
        assert_eq!(handle.read(&mut buf[..5]).unwrap(), 5);
        assert_eq!(&buf[..5], b"bytes");

        assert_eq!(handle.seek(SeekFrom::End(-5)).unwrap(), 9);
        assert!(handle.seek(SeekFrom::Current(100)).is_err());
        fs.close(id).unwrap();
    }
}
