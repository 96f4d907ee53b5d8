//! Removal of runtime artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::tor::RuntimeLayout;

/// Errors that can occur during cleanup
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Failed to remove {path}/ directory: {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Remove the working root below `base_dir` and the config file.
///
/// Paths that do not exist are skipped, so this is safe to run repeatedly
/// and without a run ever having happened. It does not look at whether tor
/// is still running.
pub fn clean_up(base_dir: &Path, config_file: &Path) -> Result<(), CleanupError> {
    let layout = RuntimeLayout::new(base_dir);
    let root = layout.root();

    match fs::remove_dir_all(root) {
        Ok(()) => debug!(path = %root.display(), "Removed working directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(CleanupError::RemoveDir {
                path: root.to_path_buf(),
                source,
            })
        }
    }

    match fs::remove_file(config_file) {
        Ok(()) => debug!(path = %config_file.display(), "Removed config file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(CleanupError::RemoveFile {
                path: config_file.to_path_buf(),
                source,
            })
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{generate_default_config, DEFAULT_CONFIG_FILE};
    use tempfile::TempDir;

    #[test]
    fn test_clean_up_removes_everything() {
        let temp_dir = TempDir::new().unwrap();
        let layout = RuntimeLayout::new(temp_dir.path());
        layout.prepare().unwrap();
        fs::write(layout.torrc(), "SocksPort 9050\n").unwrap();
        fs::write(layout.hostname(), "example.onion\n").unwrap();
        let config_file = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        generate_default_config(&config_file).unwrap();

        clean_up(temp_dir.path(), &config_file).unwrap();

        assert!(!layout.root().exists());
        assert!(!config_file.exists());
    }

    #[test]
    fn test_clean_up_twice() {
        let temp_dir = TempDir::new().unwrap();
        RuntimeLayout::new(temp_dir.path()).prepare().unwrap();
        let config_file = temp_dir.path().join(DEFAULT_CONFIG_FILE);

        clean_up(temp_dir.path(), &config_file).unwrap();
        clean_up(temp_dir.path(), &config_file).unwrap();
    }

    #[test]
    fn test_clean_up_pristine_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(DEFAULT_CONFIG_FILE);

        clean_up(temp_dir.path(), &config_file).unwrap();
    }

    #[test]
    fn test_clean_up_leaves_other_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("index.html"), "<p>keep me</p>").unwrap();
        RuntimeLayout::new(temp_dir.path()).prepare().unwrap();

        clean_up(temp_dir.path(), &temp_dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();

        assert!(temp_dir.path().join("index.html").exists());
    }

    #[test]
    fn test_clean_up_config_path_is_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("subway.json");
        fs::create_dir(&config_file).unwrap();

        let result = clean_up(temp_dir.path(), &config_file);
        assert!(matches!(result, Err(CleanupError::RemoveFile { .. })));
    }
}
