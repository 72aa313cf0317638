//! Filesystem error kinds and their mapping to POSIX codes.

use std::fmt;
use std::io;

/// Result alias for all filesystem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error surfaced by a filesystem operation.
///
/// Every operation fails with exactly one of these kinds; nothing is retried
/// internally. [`Error::errno`] yields the negated POSIX code the hook layer
/// expects.
#[derive(Debug)]
pub enum Error {
    /// Access check failed.
    Access,
    /// Offset past the end of the file.
    Seek,
    /// The operation needs a regular file but found a directory.
    IsDir,
    /// A bitmap has no free entry left.
    NoSpace,
    /// The target of a create operation already exists.
    Exists,
    /// Path lookup miss.
    NotFound,
    /// The operation is not supported there (e.g. mkdir under a regular file).
    Unsupported,
    /// A device transfer failed.
    Io(io::Error),
    /// Malformed argument, or an operation on the root that the root forbids.
    Inval,
}

impl Error {
    /// Returns the negated POSIX error code for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Access => -libc::EACCES,
            Self::Seek => -libc::ESPIPE,
            Self::IsDir => -libc::EISDIR,
            Self::NoSpace => -libc::ENOSPC,
            Self::Exists => -libc::EEXIST,
            Self::NotFound => -libc::ENOENT,
            Self::Unsupported => -libc::ENXIO,
            Self::Io(_) => -libc::EIO,
            Self::Inval => -libc::EINVAL,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => write!(fmt, "permission denied"),
            Self::Seek => write!(fmt, "offset out of range"),
            Self::IsDir => write!(fmt, "is a directory"),
            Self::NoSpace => write!(fmt, "no space left on device"),
            Self::Exists => write!(fmt, "file exists"),
            Self::NotFound => write!(fmt, "no such file or directory"),
            Self::Unsupported => write!(fmt, "operation not supported"),
            Self::Io(err) => write!(fmt, "I/O error: {err}"),
            Self::Inval => write!(fmt, "invalid argument"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}
