//! TOML configuration for trace library deployments.
//!
//! Any `Deserialize` type can be loaded through [`ConfigLoader`]; the
//! library's own settings live in [`TraceLibraryConfig`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use trace_common::config::{ConfigError, ConfigLoader, TraceLibraryConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = TraceLibraryConfig::load(Path::new("trace.toml"))?;
//!     config.validate()?;
//!     println!("ring buffer: {}", config.ring_buffer.path);
//!     Ok(())
//! }
//! ```

use crate::consts::{MAX_15_BITS, NUMBER_OF_ELEMENTS, RING_BUFFER_SHARED_MEMORY_NAME};
use crate::types::{INVALID_SHM_OBJECT_HANDLE, ShmObjectHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Failure while loading or checking a configuration file.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// File unreadable or not valid TOML for the target type.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Values parsed but out of range.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Verbosity of the `tracing` output, lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-job events.
    Trace,
    /// Allocation and drain details.
    Debug,
    /// Lifecycle events only.
    #[default]
    Info,
    /// Recoverable failures.
    Warn,
    /// Fatal failures.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Settings every trace process carries.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "trace-client-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Name of this process instance.
    pub service_name: String,
}

impl SharedConfig {
    /// Reject an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_ring_buffer_path() -> String {
    RING_BUFFER_SHARED_MEMORY_NAME.to_string()
}

fn default_number_of_elements() -> u16 {
    NUMBER_OF_ELEMENTS
}

/// Shared-memory ring buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBufferConfig {
    /// Name of the segment under `/dev/shm`.
    #[serde(default = "default_ring_buffer_path")]
    pub path: String,

    /// Slot count, at most `0x7FFF`.
    #[serde(default = "default_number_of_elements")]
    pub number_of_elements: u16,

    /// Keep producer/consumer statistics in the segment.
    #[serde(default)]
    pub statistics_enabled: bool,

    /// The owner creates the segment; everyone else opens it.
    #[serde(default)]
    pub is_owner: bool,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            path: default_ring_buffer_path(),
            number_of_elements: default_number_of_elements(),
            statistics_enabled: false,
            is_owner: false,
        }
    }
}

fn default_region_size() -> usize {
    1 << 20
}

fn default_allocator_size() -> usize {
    512 << 10
}

fn default_metadata_handle() -> ShmObjectHandle {
    0
}

/// Trace metadata region settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Segment name under `/dev/shm`; `None` maps an anonymous region.
    #[serde(default)]
    pub region_path: Option<String>,

    /// Mapped size in bytes.
    #[serde(default = "default_region_size")]
    pub region_size: usize,

    /// Bytes of the region managed by the circular allocator.
    #[serde(default = "default_allocator_size")]
    pub allocator_size: usize,

    /// Handle the region is registered under.
    #[serde(default = "default_metadata_handle")]
    pub shm_object_handle: ShmObjectHandle,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            region_path: None,
            region_size: default_region_size(),
            allocator_size: default_allocator_size(),
            shm_object_handle: default_metadata_handle(),
        }
    }
}

/// Complete configuration of a trace library instance.
///
/// ```toml
/// [shared]
/// service_name = "trace-client-01"
///
/// [ring_buffer]
/// path = "trace_ring_buffer"
/// number_of_elements = 500
/// is_owner = true
///
/// [metadata]
/// region_size = 1048576
/// allocator_size = 524288
/// shm_object_handle = 7
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceLibraryConfig {
    /// Common settings.
    pub shared: SharedConfig,

    /// Ring buffer settings.
    #[serde(default)]
    pub ring_buffer: RingBufferConfig,

    /// Metadata region settings.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl TraceLibraryConfig {
    /// Check value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let ring = &self.ring_buffer;
        if ring.path.is_empty() {
            return Err(ConfigError::ValidationError(
                "ring_buffer.path cannot be empty".to_string(),
            ));
        }
        if ring.number_of_elements == 0 || ring.number_of_elements > MAX_15_BITS {
            return Err(ConfigError::ValidationError(format!(
                "ring_buffer.number_of_elements must be in 1..={MAX_15_BITS}, got {}",
                ring.number_of_elements
            )));
        }

        let meta = &self.metadata;
        if meta.shm_object_handle == INVALID_SHM_OBJECT_HANDLE {
            return Err(ConfigError::ValidationError(
                "metadata.shm_object_handle cannot be -1".to_string(),
            ));
        }
        if meta.allocator_size == 0 || meta.allocator_size > meta.region_size {
            return Err(ConfigError::ValidationError(format!(
                "metadata.allocator_size ({}) must be non-zero and fit in region_size ({})",
                meta.allocator_size, meta.region_size
            )));
        }
        if matches!(&meta.region_path, Some(path) if path.is_empty()) {
            return Err(ConfigError::ValidationError(
                "metadata.region_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load any deserializable configuration type from a TOML file.
///
/// - missing file: [`ConfigError::FileNotFound`]
/// - unreadable file or bad TOML: [`ConfigError::ParseError`]
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file.flush().unwrap();
        file
    }

    fn minimal() -> TraceLibraryConfig {
        TraceLibraryConfig {
            shared: SharedConfig {
                log_level: LogLevel::Info,
                service_name: "trace-test".to_string(),
            },
            ring_buffer: RingBufferConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }

    #[test]
    fn test_log_level_round_trip_in_table() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Wrapper {
            level: LogLevel,
        }

        let text = toml::to_string(&Wrapper {
            level: LogLevel::Warn,
        })
        .unwrap();
        assert!(text.contains("warn"));
        assert_eq!(
            toml::from_str::<Wrapper>("level = \"trace\"").unwrap().level,
            LogLevel::Trace
        );
        assert_eq!(LogLevel::default().as_directive(), "info");
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let mut config = minimal();
        config.shared.service_name.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_defaults_validate() {
        assert!(minimal().validate().is_ok());
        assert_eq!(minimal().ring_buffer.number_of_elements, 500);
        assert_eq!(minimal().ring_buffer.path, "trace_ring_buffer");
    }

    #[test]
    fn test_number_of_elements_bounds() {
        let mut config = minimal();
        config.ring_buffer.number_of_elements = 0;
        assert!(config.validate().is_err());
        config.ring_buffer.number_of_elements = MAX_15_BITS + 1;
        assert!(config.validate().is_err());
        config.ring_buffer.number_of_elements = MAX_15_BITS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_allocator_must_fit_region() {
        let mut config = minimal();
        config.metadata.region_size = 4096;
        config.metadata.allocator_size = 8192;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_handle_rejected() {
        let mut config = minimal();
        config.metadata.shm_object_handle = INVALID_SHM_OBJECT_HANDLE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_not_found() {
        let result = TraceLibraryConfig::load(Path::new("/nonexistent/trace.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_load_parse_error() {
        let file = write_config("[shared\nservice_name = ");
        let result = TraceLibraryConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"[shared]
log_level = "debug"
service_name = "trace-client-01"

[ring_buffer]
path = "test_ring"
number_of_elements = 64
statistics_enabled = true
is_owner = true

[metadata]
region_path = "test_meta"
region_size = 65536
allocator_size = 32768
shm_object_handle = 7
"#,
        );

        let config = TraceLibraryConfig::load(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.ring_buffer.path, "test_ring");
        assert_eq!(config.ring_buffer.number_of_elements, 64);
        assert!(config.ring_buffer.statistics_enabled);
        assert!(config.ring_buffer.is_owner);
        assert_eq!(config.metadata.region_path.as_deref(), Some("test_meta"));
        assert_eq!(config.metadata.shm_object_handle, 7);
    }

    #[test]
    fn test_sections_default_when_absent() {
        let file = write_config("[shared]\nservice_name = \"only-shared\"\n");
        let config = TraceLibraryConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Info);
        assert_eq!(config.ring_buffer.number_of_elements, NUMBER_OF_ELEMENTS);
        assert!(config.metadata.region_path.is_none());
        assert!(config.validate().is_ok());
    }
}
