use thiserror::Error;

/// Errors produced by the UNIX v6 filesystem core.
///
/// Every fallible operation returns `Result<T, Error>` rather than the negative-sentinel
/// convention of the original implementation; the error kinds are the same one-per-failure-mode
/// set, just carried as enum variants instead of magic integers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad parameter")]
    BadParameter,

    #[error("bad boot sector")]
    BadBootSector,

    #[error("inode number out of range")]
    InodeOutOfRange,

    #[error("unallocated inode")]
    UnallocatedInode,

    #[error("not a directory")]
    InvalidDirectoryInode,

    #[error("offset out of range")]
    OffsetOutOfRange,

    #[error("file too large")]
    FileTooLarge,

    #[error("bitmap full")]
    BitmapFull,

    #[error("not enough blocks for requested geometry")]
    NotEnoughBlocks,

    #[error("filename too long")]
    FilenameTooLong,

    #[error("filename already exists")]
    FilenameAlreadyExists,
}

pub type Result<T> = std::result::Result<T, Error>;
