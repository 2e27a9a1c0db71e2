//! Configuration file loading for the mount binary.
//!
//! The file is JSON; environment variables referenced as `$VAR` or `${VAR}`
//! are expanded before parsing so credentials and endpoints can live in the
//! environment. Unknown keys are ignored by the schema itself.

use std::path::Path;

use thiserror::Error;

use msfs_vfs::MountConfig;

/// Errors while loading the mount configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for the schema.
    #[error("Cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Load and parse the configuration file at `path`.
pub fn load(path: &Path) -> Result<MountConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    // Undefined variables expand to empty, matching what a shell-based
    // mount helper would have produced.
    let expanded = shellexpand::env_with_context_no_errors(&raw, |var| {
        Some(std::env::var(var).unwrap_or_default())
    });

    serde_json::from_str(&expanded).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_expands_env_vars() {
        std::env::set_var("MSFS_TEST_BUCKET", "prod-data");
        let dir = std::env::temp_dir();
        let path = dir.join("msfs-config-test.json");
        std::fs::write(
            &path,
            r#"{
                "cache_lines": 16,
                "backends": [
                    {
                        "dir_name": "data",
                        "bucket": "${MSFS_TEST_BUCKET}",
                        "driver": "s3"
                    }
                ]
            }"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.cache_lines, 16);
        assert_eq!(config.backends[0].bucket, "prod-data");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_missing_file() {
        let result = load(Path::new("/nonexistent/msfs.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
