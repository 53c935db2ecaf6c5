//! Object store contract and a local-directory implementation.
//!
//! Artifacts are produced on one machine and restored on another; the store
//! is whatever moves the bytes in between. Only whole-object get/put is
//! required. Stores report plain `io::Error`s; the helpers here attach the
//! pipeline phase.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::artifact::reader::{inspect_artifact, ArtifactReader, Restored};
use crate::artifact::state::{RestoreState, StateTracker};
use crate::artifact::ArtifactInfo;
use crate::config::EngineConfig;
use crate::error::{Phase, Result, SnapshotError};
use crate::index::IndexFactory;

/// Whole-object storage keyed by string.
pub trait ObjectStore {
    /// Open the object stored under `key`.
    fn get(&self, key: &str) -> io::Result<Box<dyn Read + '_>>;

    /// Store everything `data` yields under `key`, replacing any previous
    /// object. Readers must never observe a partially written object.
    fn put(&self, key: &str, data: &mut dyn Read) -> io::Result<()>;
}

// ── LocalDirStore ──────────────────────────────────────────────────

/// Objects are files under a root directory. Keys may contain `/` to form
/// subdirectories but never `..` or absolute paths.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SnapshotError::Configuration(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object key {:?}", key),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalDirStore {
    fn get(&self, key: &str) -> io::Result<Box<dyn Read + '_>> {
        let file = File::open(self.path_for(key)?)?;
        Ok(Box::new(file))
    }

    fn put(&self, key: &str, data: &mut dyn Read) -> io::Result<()> {
        let path = self.path_for(key)?;
        let dir = path.parent().unwrap_or(self.root.as_path());
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".idxpack-")
            .suffix(".upload")
            .tempfile_in(dir)?;
        io::copy(data, tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Upload the artifact at `path` under `key`. The frame is validated first
/// so a truncated file is never shipped.
pub fn ship_artifact<S: ObjectStore + ?Sized>(
    store: &S,
    key: &str,
    path: impl AsRef<Path>,
) -> Result<ArtifactInfo> {
    let path = path.as_ref();
    let info = inspect_artifact(path)?;
    let mut file = File::open(path).map_err(|e| SnapshotError::io(Phase::Read, e))?;
    store
        .put(key, &mut file)
        .map_err(|e| SnapshotError::io(Phase::Write, e))?;
    tracing::info!(
        key,
        path = %path.display(),
        bytes = info.file_len,
        "artifact shipped"
    );
    Ok(info)
}

/// Download the object under `key` to `staging_path`. The file appears only
/// once the download is complete. Returns the number of bytes fetched.
pub fn fetch_artifact<S: ObjectStore + ?Sized>(
    store: &S,
    key: &str,
    staging_path: impl AsRef<Path>,
) -> Result<u64> {
    let staging_path = staging_path.as_ref();
    let dir = match staging_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = staging_file(dir)?;
    let bytes = download(store, key, tmp.as_file_mut())?;
    tmp.persist(staging_path)
        .map_err(|e| SnapshotError::io(Phase::Read, e.error))?;
    tracing::debug!(key, path = %staging_path.display(), bytes, "artifact fetched");
    Ok(bytes)
}

/// Fetch `key` into a staging file under `staging_dir` and restore from it.
/// The staging file is removed afterwards, whatever the outcome.
pub fn restore_from_store<S, F>(
    store: &S,
    key: &str,
    staging_dir: impl AsRef<Path>,
    config: &EngineConfig,
    factory: &F,
) -> Result<Restored<F::Index>>
where
    S: ObjectStore + ?Sized,
    F: IndexFactory,
{
    let reader = ArtifactReader::new(config.clone())?.expecting(config.compression);
    let mut tracker = StateTracker::new();
    tracker.advance(RestoreState::Downloading)?;

    let downloaded = staging_file(staging_dir.as_ref()).and_then(|mut tmp| {
        let bytes = download(store, key, tmp.as_file_mut())?;
        Ok((tmp, bytes))
    });
    let (staging, bytes) = match downloaded {
        Ok(ok) => ok,
        Err(e) => {
            tracker.fail();
            tracing::error!(key, code = e.code(), error = %e, "artifact download failed");
            return Err(e);
        }
    };
    tracing::debug!(key, bytes, "artifact downloaded");

    reader.restore_tracked(staging.path(), factory, tracker)
}

fn staging_file(dir: &Path) -> Result<tempfile::NamedTempFile> {
    if !dir.is_dir() {
        return Err(SnapshotError::Configuration(format!(
            "staging directory {} does not exist",
            dir.display()
        )));
    }
    tempfile::Builder::new()
        .prefix(".idxpack-")
        .suffix(".fetch")
        .tempfile_in(dir)
        .map_err(|e| SnapshotError::io(Phase::Read, e))
}

fn download<S: ObjectStore + ?Sized>(store: &S, key: &str, out: &mut File) -> Result<u64> {
    let mut object = store.get(key).map_err(|e| SnapshotError::io(Phase::Read, e))?;
    let bytes = io::copy(&mut object, out).map_err(|e| SnapshotError::io(Phase::Read, e))?;
    out.flush().map_err(|e| SnapshotError::io(Phase::Read, e))?;
    Ok(bytes)
}
