use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};

/// Scratch space for the input image of one pipeline run.
#[derive(Debug, Clone)]
pub struct EphemeralStore {
    dir: PathBuf,
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl EphemeralStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    pub fn write(&self, bytes: &[u8], suffix: &str) -> Result<EphemeralFile> {
        let mut file = tempfile::Builder::new()
            .prefix("slide-")
            .suffix(suffix)
            .tempfile_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .with_context(|| "failed to write temp file")?;
        let path = file.into_temp_path();
        debug!("ephemeral file created: {}", path.display());
        Ok(EphemeralFile { path: Some(path) })
    }
}

/// Handle to a file owned by one invocation. Dropping the handle deletes the
/// file, so every exit path releases it.
#[derive(Debug)]
pub struct EphemeralFile {
    path: Option<TempPath>,
}

impl EphemeralFile {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(self.path())
            .with_context(|| format!("failed to read temp file {}", self.path().display()))
    }

    /// Best effort; a file that is already gone is not an error.
    pub fn delete(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let shown = path.display().to_string();
        match path.close() {
            Ok(()) => debug!("ephemeral file deleted: {}", shown),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to delete ephemeral file {}: {}", shown, err),
        }
    }
}

impl Drop for EphemeralFile {
    fn drop(&mut self) {
        self.remove();
    }
}
