use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// The daemon's own PID file.
///
/// Written at startup so operators can address the daemon with `kill`;
/// removed during shutdown. A failed write is reported but does not stop
/// the daemon.
pub struct PidFile {
    path: PathBuf,
    written: AtomicBool,
}

impl PidFile {
    pub fn new(path: PathBuf) -> PidFile {
        PidFile {
            path,
            written: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self) -> io::Result<()> {
        fs::write(&self.path, format!("{}\n", std::process::id()))?;
        self.written.store(true, Ordering::SeqCst);
        debug!("Wrote PID file {}", self.path.display());
        Ok(())
    }

    /// Removes the PID file if this process wrote one. Removal failure is
    /// logged, never escalated. Removing twice is a no-op.
    pub fn remove(&self) {
        if !self.written.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            info!("Could not remove PID file {}: {}", self.path.display(), e);
        }
    }
}
