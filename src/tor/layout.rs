//! Runtime directory layout for the private tor instance

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{TorError, TorResult};

/// Name of the working root, created inside the base directory
pub const WORK_DIR_NAME: &str = ".subway";

/// Hidden service data directory, inside the working root
pub const DATA_DIR_NAME: &str = "data";

/// Generated tor configuration, inside the working root
pub const TORRC_FILE: &str = "torrc";

/// File tor writes the onion address to, inside the data directory
pub const HOSTNAME_FILE: &str = "hostname";

/// Paths used by one run, all below a single working root.
///
/// Computed once and never mutated; removing `root` removes everything tor
/// or subway wrote during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    root: PathBuf,
    data_dir: PathBuf,
    torrc: PathBuf,
    hostname: PathBuf,
}

impl RuntimeLayout {
    /// Derive the layout below `base_dir`.
    pub fn new(base_dir: &Path) -> Self {
        let root = base_dir.join(WORK_DIR_NAME);
        let data_dir = root.join(DATA_DIR_NAME);
        let torrc = root.join(TORRC_FILE);
        let hostname = data_dir.join(HOSTNAME_FILE);

        Self {
            root,
            data_dir,
            torrc,
            hostname,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn torrc(&self) -> &Path {
        &self.torrc
    }

    pub fn hostname(&self) -> &Path {
        &self.hostname
    }

    /// Create the working root and data directory if missing.
    ///
    /// Both are private to the current user; tor refuses to use a hidden
    /// service directory that other users can read.
    pub fn prepare(&self) -> TorResult<()> {
        create_private_dir(&self.root)?;
        create_private_dir(&self.data_dir)?;
        debug!(root = %self.root.display(), "Runtime directories ready");
        Ok(())
    }
}

fn create_private_dir(path: &Path) -> TorResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path).map_err(|source| TorError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths_are_below_root() {
        let layout = RuntimeLayout::new(Path::new("/srv/site"));

        assert_eq!(layout.root(), Path::new("/srv/site/.subway"));
        assert_eq!(layout.data_dir(), Path::new("/srv/site/.subway/data"));
        assert_eq!(layout.torrc(), Path::new("/srv/site/.subway/torrc"));
        assert_eq!(
            layout.hostname(),
            Path::new("/srv/site/.subway/data/hostname")
        );

        for path in [layout.data_dir(), layout.torrc(), layout.hostname()] {
            assert!(path.starts_with(layout.root()));
        }
    }

    #[test]
    fn test_prepare_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let layout = RuntimeLayout::new(temp_dir.path());

        layout.prepare().unwrap();

        assert!(layout.root().is_dir());
        assert!(layout.data_dir().is_dir());
        assert!(!layout.torrc().exists());
    }

    #[test]
    fn test_prepare_is_repeatable() {
        let temp_dir = TempDir::new().unwrap();
        let layout = RuntimeLayout::new(temp_dir.path());

        layout.prepare().unwrap();
        layout.prepare().unwrap();

        assert!(layout.data_dir().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_directories_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let layout = RuntimeLayout::new(temp_dir.path());
        layout.prepare().unwrap();

        let mode = fs::metadata(layout.data_dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_prepare_fails_when_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(WORK_DIR_NAME), "not a directory").unwrap();
        let layout = RuntimeLayout::new(temp_dir.path());

        let result = layout.prepare();
        assert!(matches!(result, Err(TorError::Directory { .. })));
    }
}
