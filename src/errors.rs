//! Error types for thread handle operations.
//!
//! Operational errors are returned as [`ThreadError`]. Precondition
//! violations never show up here: they go through [`crate::assert`].

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for thread handle operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Errors returned by operations on a [`crate::Thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadError {
    /// The handle does not own any registration (default-constructed or taken)
    NoSuchProcess,
    /// The handle owns a registration that is no longer alive
    InvalidArgument,
}

impl ThreadError {
    /// The POSIX `errno` value this error corresponds to.
    pub fn errno(self) -> i32 {
        match self {
            ThreadError::NoSuchProcess => 3,    // ESRCH
            ThreadError::InvalidArgument => 22, // EINVAL
        }
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::NoSuchProcess => write!(f, "No such process"),
            ThreadError::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}
