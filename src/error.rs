/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Error types for alignment, signing and verification.

use std::{fmt, io};

/// Every failure the library can report.
#[derive(Debug)]
pub enum ApkError {
    /// Input is not a well-formed zip container
    MalformedArchive(String),
    /// Key or certificate could not be parsed, is unsupported, or the pair does not match
    InvalidKey(String),
    /// An entry could not be placed on its alignment boundary
    Alignment {
        entry: String,
        offset: u64,
        reason: String,
    },
    /// Read or write failure
    SigningIo(io::Error),
    /// Aligning an archive that already carries signatures
    AlreadySignedConflict(String),
    /// Errors bubbled up from the zip reader/writer
    Zip(zip::result::ZipError),
    /// Signing or verification primitive failed
    Crypto(ring::error::Unspecified),
    /// PEM framing errors
    Pem(pem::PemError),
    /// Signature checks that did not hold
    Validation(String),
    /// Bad arguments or options
    Config(String),
}

pub type Result<T> = std::result::Result<T, ApkError>;

impl ApkError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedArchive(msg.into())
    }

    pub fn alignment(entry: &str, offset: u64, reason: impl Into<String>) -> Self {
        Self::Alignment {
            entry: entry.to_string(),
            offset,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ApkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApkError::MalformedArchive(s) => write!(f, "Malformed Archive: {}", s),
            ApkError::InvalidKey(s) => write!(f, "Invalid Key: {}", s),
            ApkError::Alignment {
                entry,
                offset,
                reason,
            } => write!(
                f,
                "Alignment Error: `{}` at offset {}: {}",
                entry, offset, reason
            ),
            ApkError::SigningIo(e) => write!(f, "I/O Error: {}", e),
            ApkError::AlreadySignedConflict(s) => write!(f, "Already Signed: {}", s),
            ApkError::Zip(e) => write!(f, "ZIP Error: {}", e),
            ApkError::Crypto(e) => write!(f, "Cryptography Error: {}", e),
            ApkError::Pem(e) => write!(f, "PEM Parsing Error: {}", e),
            ApkError::Validation(s) => write!(f, "Validation Error: {}", s),
            ApkError::Config(s) => write!(f, "Configuration Error: {}", s),
        }
    }
}

impl std::error::Error for ApkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApkError::SigningIo(e) => Some(e),
            ApkError::Zip(e) => Some(e),
            ApkError::Pem(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ApkError {
    fn from(e: io::Error) -> Self {
        Self::SigningIo(e)
    }
}

impl From<zip::result::ZipError> for ApkError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Zip(e)
    }
}

impl From<ring::error::Unspecified> for ApkError {
    fn from(e: ring::error::Unspecified) -> Self {
        Self::Crypto(e)
    }
}

impl From<pem::PemError> for ApkError {
    fn from(e: pem::PemError) -> Self {
        Self::Pem(e)
    }
}
