//! Directory handles.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Handle to an existing directory.
///
/// The handle owns nothing on disk by itself; whoever holds it decides
/// whether to call [`Directory::remove`].
#[derive(Debug, PartialEq, Eq)]
pub struct Directory {
    name: PathBuf,
}

impl Directory {
    /// Wrap a directory path
    pub fn new(name: impl Into<PathBuf>) -> Self {
        Self { name: name.into() }
    }

    /// Path this handle was created from
    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Recursively delete the directory
    pub fn remove(self) -> io::Result<()> {
        fs::remove_dir_all(&self.name)
    }
}

/// Create a fresh local temporary directory.
///
/// The directory is not deleted automatically; ownership passes to the caller.
pub fn tmp_dir() -> io::Result<Directory> {
    let dir = tempfile::Builder::new().prefix("stagewright-").tempdir()?;
    Ok(Directory::new(dir.into_path()))
}
