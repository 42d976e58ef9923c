//! FAT32 filesystem driver for SPI-attached SD/SDHC cards.
//!
//! Three layers, bottom up:
//!
//! - [`sd`]: the raw card protocol — reset/init handshake with SD vs SDHC
//!   detection, CRC-protected single-block transfers, resync.
//! - [`device`]: a small write-back LRU cache over the card plus the retry
//!   ladder, including clock step-down recovery for flaky cards.
//! - [`fat32`]: the filesystem engine — mount/unmount, directories, 8.3
//!   names, and a fixed-size open-file table.
//!
//! The board supplies the transport by implementing [`SpiBus`]; everything
//! above it is platform independent and allocation free, with RAM bounded by
//! the `CACHE_SLOTS` and `MAX_OPEN_FILES` capacities on [`Filesystem`].
//!
//! ```no_run
//! # fn example<S: sdfat::SpiBus>(spi: S) -> sdfat::Result<()> {
//! let mut fs: sdfat::Filesystem<S> = sdfat::Filesystem::new(spi);
//! fs.mount()?;
//! let id = fs.open("boot.cfg", sdfat::Mode::Read)?;
//! let mut buf = [0u8; 64];
//! fs.read(id, &mut buf)?;
//! fs.close(id)?;
//! fs.unmount()?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), no_std)]

#[cfg(all(feature = "sim", not(test)))]
extern crate std;

mod cache;
mod device;
mod sd;

pub mod crc;
pub mod error;
pub mod fat32;
pub mod spi;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use device::{BlockDevice, CrcMode};
pub use error::{Error, Result};
pub use fat32::{
    DirEntry, DirList, EntryFlags, File, FileId, FileName, Filesystem, Mode, FILE_END_POS,
};
pub use spi::{SpiBus, SpiSpeed};
