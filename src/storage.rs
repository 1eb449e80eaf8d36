use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Byte-level persistence under a conversation/character root. Paths are
/// relative, `/`-separated, and resolved by the implementation.
pub trait Storage: Send + Sync {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;
    fn delete(&self, path: &str) -> Result<()>;
    fn exists(&self, path: &str) -> Result<bool>;
    /// File names (not full paths) directly inside `dir`, sorted.
    fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// `Storage` over a base directory on the local filesystem.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut out = self.root.clone();
        // Relative components only; anything path-like has been sanitized
        // by the caller, this guards against stray separators.
        for part in path.split('/').filter(|p| !p.is_empty() && *p != "..") {
            out.push(part);
        }
        out
    }
}

impl Storage for FileStorage {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path);
        if !full.exists() {
            return Ok(None);
        }
        debug!(path = %full.display(), "storage read");
        Ok(Some(fs::read(&full)?))
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!(path = %full.display(), bytes = data.len(), "storage write");
        fs::write(&full, data)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        if full.exists() {
            debug!(path = %full.display(), "storage delete");
            fs::remove_file(&full)?;
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path).exists())
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let full = self.resolve(dir);
        if !full.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
