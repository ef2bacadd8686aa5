use std::env;
use std::path::PathBuf;

/// Runtime configuration for the temp-file service.
///
/// The handle TTL and the post-serve grace delay are deliberately absent:
/// they are fixed constants of the store, not deployment knobs.
#[derive(Debug, Clone)]
pub struct TempFileConfig {
    /// Directory for transient file bytes (default: `<tmp>/temp-file-backend`)
    pub scratch_dir: PathBuf,

    /// Maximum upload size in bytes (default: 64 MB)
    pub max_file_size: usize,

    /// Listen address (default: "127.0.0.1:3000")
    pub bind_addr: String,
}

impl Default for TempFileConfig {
    fn default() -> Self {
        Self {
            scratch_dir: env::temp_dir().join("temp-file-backend"),
            max_file_size: 64 * 1024 * 1024, // 64 MB
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl TempFileConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            scratch_dir: env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.scratch_dir),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            bind_addr: env::var("BIND_ADDR").unwrap_or(default.bind_addr),
        }
    }

    /// Create config for development and tests (small size cap)
    pub fn development() -> Self {
        Self {
            scratch_dir: env::temp_dir().join("temp-file-backend-dev"),
            max_file_size: 8 * 1024 * 1024,
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TempFileConfig::default();
        assert_eq!(config.max_file_size, 64 * 1024 * 1024);
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert!(config.scratch_dir.ends_with("temp-file-backend"));
    }

    #[test]
    fn test_development_config() {
        let config = TempFileConfig::development();
        assert_eq!(config.max_file_size, 8 * 1024 * 1024);
    }
}
