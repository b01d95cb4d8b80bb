use std::fmt;

/// Failure kinds for KeyFile operations.
///
/// The recovery variants (`InsufficientShares`, `UnrecoverableEntry`,
/// `CorruptEntry`) never cross the public boundary: [`crate::KeyLocker::get`]
/// collapses all of them into `NoEntry`. A tool that reports *why* nothing
/// was recovered tells an attacker whether a password was almost right.
#[derive(Debug)]
pub enum LockerError {
    /// Invalid byte-range spec, mode selection, or parameter combination.
    Usage(String),
    /// Fewer slots decoded plausibly than any threshold could use.
    InsufficientShares,
    /// Slots decoded plausibly but no combination produced a valid entry.
    UnrecoverableEntry,
    /// A byte string failed the entry checksum.
    CorruptEntry,
    /// The public recovery result: no entry for this password and device.
    NoEntry,
}

impl fmt::Display for LockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockerError::Usage(msg) => write!(f, "{msg}"),
            LockerError::InsufficientShares => write!(f, "not enough shares decoded"),
            LockerError::UnrecoverableEntry => write!(f, "no share combination was valid"),
            LockerError::CorruptEntry => write!(f, "entry checksum mismatch"),
            LockerError::NoEntry => write!(f, "no entry was recovered"),
        }
    }
}

impl std::error::Error for LockerError {}
