//! Error kinds produced by the emitter.
//!
//! Mirrors the failure semantics of spec §7: most kinds are fatal and
//! propagate straight to the caller via `?`; `UnresolvedType` is caught and
//! logged at the call site instead (see [`crate::die`]).

use core::fmt;

#[derive(Debug)]
pub enum Error {
    /// Allocation failed; the commit in progress is abandoned.
    OutOfMemory,
    /// A short write or copy against the backing object file.
    Io(IoError),
    /// `ptr_width` outside `0..=64`, checked once at [`crate::emitter::Emitter::new`].
    UnsupportedTarget(u8),
    /// A type or declaration shape has no emission rule. Recovered from by
    /// emitting `pad1` and logging; surfaced here only when propagation is
    /// unavoidable (e.g. from a `TryFrom` conversion).
    UnresolvedType,
    /// A header writer computed a size exceeding its preallocated padding.
    /// Fatal: the emitter does not repack.
    HeaderOverflow { wanted: usize, budget: usize },
    /// Catch-all for violated internal invariants (a free-set entry with no
    /// owner, a pending-reloc table entry left undefined past commit, etc).
    Malformed(&'static str),
}

/// A small stand-in for `std::io::Error` so the crate builds under `no_std`.
/// Under `std`, `From<std::io::Error>` produces this with the OS error
/// message carried as a static-ish description.
#[derive(Debug)]
pub struct IoError {
    pub message: alloc::string::String,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::Io(e) => write!(f, "i/o error: {}", e.message),
            Error::UnsupportedTarget(width) => {
                write!(f, "unsupported pointer width: {width}")
            }
            Error::UnresolvedType => write!(f, "type has no emission rule"),
            Error::HeaderOverflow { wanted, budget } => write!(
                f,
                "header writer overflowed its preallocated region: wanted {wanted} bytes, budget was {budget}"
            ),
            Error::Malformed(msg) => write!(f, "malformed emitter state: {msg}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(IoError {
            message: alloc::string::ToString::to_string(&err),
        })
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Io(IoError {
            message: alloc::format!("{err}"),
        })
    }
}

pub type Result<T> = core::result::Result<T, Error>;
