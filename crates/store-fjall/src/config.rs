//! Storage configuration

use std::path::PathBuf;

/// Configuration for the fjall event store
#[derive(Clone)]
pub struct FjallConfig {
    /// Directory for storage data
    pub data_dir: PathBuf,

    /// Block cache size for fjall (in bytes)
    pub cache_size: u64,

    /// Compression type for event rows
    pub compression: fjall::CompressionType,

    /// Persist mode applied after each append
    pub persist_mode: fjall::PersistMode,
}

impl Default for FjallConfig {
    fn default() -> Self {
        // Kept (not auto-deleted) so a default-config store survives the
        // TempDir guard going out of scope
        let data_dir = tempfile::tempdir()
            .expect("failed to create temporary directory")
            .keep();

        Self {
            data_dir,
            cache_size: 64 * 1024 * 1024, // 64 MB
            compression: fjall::CompressionType::Lz4,
            persist_mode: fjall::PersistMode::Buffer,
        }
    }
}

impl FjallConfig {
    /// Create a new config with the given data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set block cache size
    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Set compression type
    pub fn with_compression(mut self, compression: fjall::CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Set persist mode
    pub fn with_persist_mode(mut self, mode: fjall::PersistMode) -> Self {
        self.persist_mode = mode;
        self
    }
}
