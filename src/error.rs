use std::io;
use std::sync::PoisonError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// Bad magic, unknown version, unknown enum byte, corrupt structure.
    Format(String),
    NotFound(String),
    IllegalState(String),
    Runtime(String),
    Decode(&'static str, io::Error),
    ChecksumMismatch,
    LockError(io::Error),
    MutexPoisoned,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::MutexPoisoned
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Format(msg) => write!(f, "Format error: {}", msg),
            Error::NotFound(what) => write!(f, "Not found: {}", what),
            Error::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            Error::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
        }
    }
}

impl std::error::Error for Error {}
