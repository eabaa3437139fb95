//! Process liveness marker

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Pid file that is removed when the guard is dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes the current process id to `path`, replacing a stale marker
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Ok(previous) = fs::read_to_string(&path) {
            tracing::warn!(
                "Replacing existing pid file {} (pid {})",
                path.display(),
                previous.trim()
            );
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, std::process::id().to_string())?;
        tracing::debug!("Wrote pid file {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed pid file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove pid file {}: {}", self.path.display(), e),
        }
    }
}
