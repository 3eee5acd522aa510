//! Per-request scratch areas.
//!
//! Every request owns exactly one [`ScratchArea`]: a uniquely named directory
//! under the configured root that holds staged uploads and renderer
//! intermediates. It is removed by [`ScratchArea::release`], and by `Drop` as
//! a backstop when the request future is dropped or a task panics, so no
//! directory outlives its request.
//!
//! Blocking workers that write into the area hold a [`ScratchLease`]. While
//! any lease is alive the directory stays put; the last holder to let go
//! removes it. A request future dropped mid-render therefore never pulls the
//! directory out from under a running job.
//!
//! Inputs staged outside the area (a caller-supplied document path) are
//! registered with [`ScratchArea::adopt`] and removed together with it.

use crate::error::ConvertError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;
use tracing::{debug, error};

const SCRATCH_PREFIX: &str = "pagemill-";

/// Factory for per-request scratch areas.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    /// Scratch areas will be created under `root` (created if missing).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scratch areas under the OS temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named scratch area.
    pub fn acquire(&self) -> Result<ScratchArea, ConvertError> {
        let create_err = |source| ConvertError::ScratchCreate {
            root: self.root.clone(),
            source,
        };
        std::fs::create_dir_all(&self.root).map_err(create_err)?;
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.root)
            .map_err(create_err)?;

        let path = dir.path().to_path_buf();
        debug!("Acquired scratch area {}", path.display());
        Ok(ScratchArea {
            path: path.clone(),
            state: Arc::new(Mutex::new(AreaState {
                dir: Some(dir),
                path,
                adopted: Vec::new(),
            })),
        })
    }
}

/// What must be removed when the last owner lets go.
#[derive(Debug)]
struct AreaState {
    dir: Option<TempDir>,
    path: PathBuf,
    adopted: Vec<PathBuf>,
}

impl AreaState {
    fn is_released(&self) -> bool {
        self.dir.is_none() && self.adopted.is_empty()
    }

    /// Remove adopted inputs, then the directory and all its descendants.
    ///
    /// Every removal is attempted even if an earlier one fails; the first
    /// failure is returned.
    fn release(&mut self) -> Result<(), ConvertError> {
        let mut first_err: Option<ConvertError> = None;

        for path in std::mem::take(&mut self.adopted) {
            if let Err(source) = remove_file_if_present(&path) {
                error!("Failed to remove staged input {}: {}", path.display(), source);
                first_err.get_or_insert(ConvertError::ScratchRelease { path, source });
            }
        }

        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!("Released scratch area {}", self.path.display()),
                Err(source) if source.kind() == io::ErrorKind::NotFound => {
                    debug!("Scratch area {} was already gone", self.path.display())
                }
                Err(source) => {
                    error!(
                        "Failed to remove scratch area {}: {}",
                        self.path.display(),
                        source
                    );
                    first_err.get_or_insert(ConvertError::ScratchRelease {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for AreaState {
    fn drop(&mut self) {
        if !self.is_released() {
            // Errors are logged inside release.
            let _ = self.release();
        }
    }
}

fn lock(state: &Mutex<AreaState>) -> MutexGuard<'_, AreaState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A request's ephemeral working directory.
#[derive(Debug)]
pub struct ScratchArea {
    path: PathBuf,
    state: Arc<Mutex<AreaState>>,
}

impl ScratchArea {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a child artifact inside the area.
    pub fn child(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Take ownership of a file staged outside the area.
    ///
    /// Paths already inside the area need no tracking and are ignored.
    pub fn adopt(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !path.starts_with(&self.path) {
            debug!("Scratch area adopts external input {}", path.display());
            lock(&self.state).adopted.push(path);
        }
    }

    /// Keep the area alive for a worker until the returned lease is dropped.
    pub fn lease(&self) -> ScratchLease {
        ScratchLease {
            path: self.path.clone(),
            _state: Arc::clone(&self.state),
        }
    }

    pub fn is_released(&self) -> bool {
        lock(&self.state).is_released()
    }

    /// Remove adopted inputs, then the area and all its descendants.
    ///
    /// Idempotent; missing paths are not an error. If leases are still
    /// outstanding, removal is left to the last of them and this returns
    /// `Ok`.
    pub fn release(&mut self) -> Result<(), ConvertError> {
        let leases = Arc::strong_count(&self.state) - 1;
        if leases > 0 {
            debug!(
                "Scratch area {} still leased by {} worker(s); removal deferred",
                self.path.display(),
                leases
            );
            return Ok(());
        }
        lock(&self.state).release()
    }
}

/// Shared hold on a [`ScratchArea`] for a blocking worker.
#[derive(Debug, Clone)]
pub struct ScratchLease {
    path: PathBuf,
    _state: Arc<Mutex<AreaState>>,
}

impl ScratchLease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
