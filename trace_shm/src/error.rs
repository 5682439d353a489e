//! Error types for mapping shared-memory objects

use thiserror::Error;
use trace_common::ErrorCode;

/// Errors raised while creating, opening or validating a mapped region
#[derive(Error, Debug)]
pub enum ShmError {
    /// Object not found
    #[error("Shared-memory object not found: {name}")]
    NotFound {
        /// Object path
        name: String,
    },

    /// Permission denied
    #[error("Permission denied accessing shared-memory object: {name}")]
    PermissionDenied {
        /// Object path
        name: String,
    },

    /// Invalid region size
    #[error("Invalid region size: {size} bytes")]
    InvalidSize {
        /// Requested size in bytes
        size: usize,
    },

    /// Mapped base address is not aligned
    #[error("Memory alignment error: address {address:#x} not aligned to {alignment}")]
    AlignmentError {
        /// Base address
        address: usize,
        /// Required alignment
        alignment: usize,
    },

    /// Object exists but its contents are not what was expected
    #[error("Corrupted shared-memory object {name}: {reason}")]
    Corrupted {
        /// Object path
        name: String,
        /// What failed to validate
        reason: &'static str,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

impl ShmError {
    /// Classify an IO error for the object at `path`.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                name: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                name: path.to_string(),
            },
            _ => Self::Io { source: err },
        }
    }
}

impl From<ShmError> for ErrorCode {
    fn from(err: ShmError) -> Self {
        match err {
            ShmError::InvalidSize { .. } | ShmError::AlignmentError { .. } => {
                ErrorCode::InvalidArgumentFatal
            }
            _ => ErrorCode::RingBufferInvalidMemoryResourceRecoverable,
        }
    }
}

/// Result type for shared-memory operations
pub type ShmResult<T> = Result<T, ShmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_is_classified() {
        let err = ShmError::from_io(
            std::io::Error::from(std::io::ErrorKind::NotFound),
            "/dev/shm/missing",
        );
        assert!(matches!(err, ShmError::NotFound { ref name } if name == "/dev/shm/missing"));
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ErrorCode::from(ShmError::InvalidSize { size: 0 }),
            ErrorCode::InvalidArgumentFatal
        );
        assert_eq!(
            ErrorCode::from(ShmError::NotFound {
                name: "x".to_string()
            }),
            ErrorCode::RingBufferInvalidMemoryResourceRecoverable
        );
    }
}
