//! Error taxonomy shared by the device layer and the FAT32 engine.
//!
//! Every fallible operation in the crate returns [`Result`]; there is no
//! side-channel error state. Device-layer codes come first, filesystem codes
//! after, mirroring how the two layers stack.

/// Crate-wide result type.
pub type Result<T> = core::result::Result<T, Error>;

/// Failure codes surfaced by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // ----- card / block device -----
    /// The card did not answer the reset command
    Reset,
    /// The card rejected CRC mode, or silently ignores it
    EnableCrc,
    /// The initialization handshake never completed
    Init,
    /// The card rejected the 512-byte block length
    BlockLength,
    /// The card has not been initialized yet
    CardUninit,
    /// Tried to read or write beyond the 512-byte block length
    TooFar,
    /// The card stopped responding
    Timeout,
    /// Too many CRC failures when reading or writing
    Crc,
    /// The block cache lost track of a sector
    CacheFailure,
    /// Unclassified device error that survived recovery
    Unknown,

    // ----- filesystem -----
    /// Block 0 is not a valid master boot record
    Mbr,
    /// No FAT32 partition in the partition table
    NoFat32,
    /// Unexpected values in the FAT32 volume ID
    VolumeId,
    /// The filesystem has not been mounted
    NotMounted,
    /// Followed a cluster chain past its end
    ClusterLookup,
    /// Tried to pop out of the root directory
    AtRoot,
    /// The file or directory was not found
    NotFound,
    /// Tried to enter something that is not a directory
    NotDir,
    /// Walked off the end of a directory
    EndOfDir,
    /// Tried to open a directory as a file
    NotFile,
    /// The file id does not refer to an open file
    NotOpen,
    /// Tried to read or seek beyond the file's length
    SeekTooFar,
    /// An object of that name already exists
    AlreadyExists,
    /// The file was opened read-only
    FileReadOnly,
    /// No free clusters left on the card
    Full,
    /// Bad name: empty, too long, or invalid characters
    InvalidName,
    /// Tried to remove a directory that still has entries
    NotEmpty,
    /// The file is already open in another slot
    AlreadyOpen,
    /// All open-file slots are in use
    TooManyFiles,
    /// File id out of range
    BadFileId,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let message = match self {
            Error::Reset => "card reset failed",
            Error::EnableCrc => "card does not honour CRC mode",
            Error::Init => "card initialization failed",
            Error::BlockLength => "card rejected block length",
            Error::CardUninit => "card not initialized",
            Error::TooFar => "access beyond block length",
            Error::Timeout => "card timeout",
            Error::Crc => "CRC failure",
            Error::CacheFailure => "block cache failure",
            Error::Unknown => "unknown device error",
            Error::Mbr => "invalid master boot record",
            Error::NoFat32 => "no FAT32 partition",
            Error::VolumeId => "invalid FAT32 volume ID",
            Error::NotMounted => "filesystem not mounted",
            Error::ClusterLookup => "bad FAT entry",
            Error::AtRoot => "already at root directory",
            Error::NotFound => "not found",
            Error::NotDir => "not a directory",
            Error::EndOfDir => "end of directory",
            Error::NotFile => "not a file",
            Error::NotOpen => "file not open",
            Error::SeekTooFar => "position beyond end of file",
            Error::AlreadyExists => "already exists",
            Error::FileReadOnly => "file opened read-only",
            Error::Full => "no free clusters",
            Error::InvalidName => "invalid name",
            Error::NotEmpty => "directory not empty",
            Error::AlreadyOpen => "file already open",
            Error::TooManyFiles => "too many open files",
            Error::BadFileId => "bad file id",
        };
        write!(f, "{}", message)
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::Timeout => embedded_io::ErrorKind::TimedOut,
            Error::NotFound => embedded_io::ErrorKind::NotFound,
            Error::AlreadyExists => embedded_io::ErrorKind::AlreadyExists,
            Error::FileReadOnly => embedded_io::ErrorKind::PermissionDenied,
            Error::Full => embedded_io::ErrorKind::OutOfMemory,
            Error::Crc => embedded_io::ErrorKind::InvalidData,
            Error::TooFar | Error::SeekTooFar | Error::InvalidName | Error::BadFileId => {
                embedded_io::ErrorKind::InvalidInput
            }
            _ => embedded_io::ErrorKind::Other,
        }
    }
}
