//! The error type every layer below the Dispatcher returns, and its mapping
//! to the POSIX errno values `fuser` expects on a reply.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("is a directory")]
    IsDirectory,

    #[error("not a directory")]
    NotDirectory,

    #[error("file name too long")]
    NameTooLong,

    #[error("file exists")]
    Exists,

    #[error("directory not empty")]
    NotEmpty,

    #[error("invalid or non-UTF-8 name")]
    InvalidName,

    #[error("readdir buffer full")]
    NoMemory,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// The bare (positive) errno `fuser`'s reply types expect.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::Exists => libc::EEXIST,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::InvalidName => libc::EILSEQ,
            FsError::NoMemory => libc::ENOMEM,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> i32 {
        e.errno()
    }
}

/// Classify a `std::io::Error` from a probe/create/remove of a node or
/// marker file into the taxonomy above, where the raw OS error isn't
/// already specific enough (e.g. "not found" really does mean ENOENT here).
pub fn io_not_found_is(e: std::io::Error, not_found: FsError) -> FsError {
    if e.kind() == std::io::ErrorKind::NotFound {
        not_found
    } else {
        FsError::Io(e)
    }
}

pub fn io_exists_is(e: std::io::Error, exists: FsError) -> FsError {
    if e.kind() == std::io::ErrorKind::AlreadyExists {
        exists
    } else {
        FsError::Io(e)
    }
}
