//! Path-confined file store.
//!
//! Every operation resolves its argument against a fixed root and refuses to
//! touch anything outside it. Writes go through a sibling temporary file that
//! is renamed onto the target, so readers observe either the previous content
//! or the new content, never a partial file.
//!
//! Concurrent writes to the same path are not serialized: the last rename to
//! land wins, and a backup taken by one writer may already be stale.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("path must be within {root}: {path}")]
    OutOfScope { path: PathBuf, root: PathBuf },
    #[error("not found: {0}")]
    NotFound(PathBuf),
    #[error("deletion of {0} must be confirmed")]
    NotConfirmed(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Like [`StoreError::io`] but maps a missing file to `NotFound`.
    fn lookup(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::io(path, source)
        }
    }
}

/// Result of the best-effort snapshot taken before an overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(PathBuf),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The caller asked for no backup.
    Disabled,
    /// Nothing existed at the target yet.
    Missing,
    /// The previous content could not be read.
    Unreadable(String),
    /// The backup file could not be written.
    WriteFailed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub backup: bool,
    /// Mark the file `0o755` (hook scripts).
    pub executable: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            backup: true,
            executable: false,
        }
    }
}

#[derive(Default)]
pub struct ListOptions<'a> {
    pub recursive: bool,
    /// Entry-name predicate; rejected directories are not descended into.
    pub filter: Option<&'a (dyn Fn(&str) -> bool + Send + Sync)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySizeReport {
    pub bytes: u64,
    pub item_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    pub executable: bool,
}

#[derive(Debug, Clone)]
pub struct ConfinedStore {
    root: PathBuf,
}

impl ConfinedStore {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        Ok(Self {
            root: normalize(&root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True iff `path` normalizes to the root or a descendant of it.
    /// Relative paths are taken relative to the root.
    pub fn validate(&self, path: impl AsRef<Path>) -> bool {
        self.absolutize(path.as_ref()).starts_with(&self.root)
    }

    /// Validates `path` and returns its normalized absolute form.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let resolved = self.absolutize(path.as_ref());
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(self.out_of_scope(path.as_ref()))
        }
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<String> {
        let target = self.resolve(path)?;
        fs::read_to_string(&target)
            .await
            .map_err(|e| StoreError::lookup(&target, e))
    }

    pub async fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        let target = self.resolve(path)?;
        fs::try_exists(&target)
            .await
            .map_err(|e| StoreError::io(&target, e))
    }

    pub async fn write(&self, path: impl AsRef<Path>, content: &str, backup: bool) -> Result<()> {
        self.write_with(
            path,
            content,
            WriteOptions {
                backup,
                ..WriteOptions::default()
            },
        )
        .await
        .map(|_| ())
    }

    /// Full write path: parent creation, optional backup, temp file, rename.
    pub async fn write_with(
        &self,
        path: impl AsRef<Path>,
        content: &str,
        opts: WriteOptions,
    ) -> Result<BackupOutcome> {
        let target = self.resolve_entry(path.as_ref())?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let backup = if opts.backup {
            snapshot(&target).await
        } else {
            BackupOutcome::Skipped(SkipReason::Disabled)
        };

        let tmp = self.stage(&target, content, opts.executable).await?;
        commit(&tmp, &target).await?;
        debug!(path = %target.display(), bytes = content.len(), ?backup, "wrote file");
        Ok(backup)
    }

    /// Writes `content` next to `target` under a temporary name. The target
    /// itself is untouched until [`commit`] renames the staged file.
    async fn stage(&self, target: &Path, content: &str, executable: bool) -> Result<PathBuf> {
        let tmp = create_sibling(target, "tmp", content.as_bytes())
            .await
            .map_err(|e| StoreError::io(target, e))?;
        if executable {
            if let Err(e) = set_executable(&tmp).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(StoreError::io(&tmp, e));
            }
        }
        Ok(tmp)
    }

    pub async fn delete(&self, path: impl AsRef<Path>, confirmed: bool) -> Result<()> {
        let path = path.as_ref();
        if !confirmed {
            return Err(StoreError::NotConfirmed(path.to_path_buf()));
        }
        let target = self.resolve_entry(path)?;
        let meta = fs::symlink_metadata(&target)
            .await
            .map_err(|e| StoreError::lookup(&target, e))?;
        let removed = if meta.is_dir() {
            fs::remove_dir_all(&target).await
        } else {
            fs::remove_file(&target).await
        };
        removed.map_err(|e| StoreError::lookup(&target, e))?;
        debug!(path = %target.display(), dir = meta.is_dir(), "deleted");
        Ok(())
    }

    /// Recursively sums file sizes below `path`. Entries that cannot be read
    /// (permissions, races with deletion) are skipped; a missing directory
    /// reports zero.
    pub async fn directory_size(&self, path: impl AsRef<Path>) -> Result<DirectorySizeReport> {
        let target = self.resolve(path)?;
        let walk_root = target.clone();
        tokio::task::spawn_blocking(move || {
            let mut report = DirectorySizeReport::default();
            for entry in WalkDir::new(&walk_root).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_dir() {
                    continue;
                }
                if let Ok(metadata) = entry.metadata() {
                    report.bytes += metadata.len();
                    report.item_count += 1;
                }
            }
            report
        })
        .await
        .map_err(|e| StoreError::io(&target, io::Error::other(e)))
    }

    /// Files under `path`, sorted. Directories are only returned through
    /// their contents when `recursive` is set.
    pub async fn list_entries(
        &self,
        path: impl AsRef<Path>,
        opts: ListOptions<'_>,
    ) -> Result<Vec<PathBuf>> {
        let target = self.resolve(path)?;
        let mut files = Vec::new();
        let mut pending = vec![target];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StoreError::lookup(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir, e))?
            {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(filter) = opts.filter {
                    if !filter(&name) {
                        continue;
                    }
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(&entry.path(), e))?;
                if file_type.is_dir() {
                    if opts.recursive {
                        pending.push(entry.path());
                    }
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }

        files.sort();
        Ok(files)
    }

    pub async fn file_stats(&self, path: impl AsRef<Path>) -> Result<FileStats> {
        let target = self.resolve(path)?;
        let meta = fs::metadata(&target)
            .await
            .map_err(|e| StoreError::lookup(&target, e))?;
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| StoreError::io(&target, e))?;
        Ok(FileStats {
            executable: is_executable(&meta),
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified,
            path: target,
        })
    }

    /// Resolves a path that names an entry strictly below the root; the root
    /// itself can be listed and measured but never replaced or removed.
    fn resolve_entry(&self, path: &Path) -> Result<PathBuf> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(self.out_of_scope(path));
        }
        Ok(target)
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.root.join(path))
        }
    }

    fn out_of_scope(&self, path: &Path) -> StoreError {
        StoreError::OutOfScope {
            path: path.to_path_buf(),
            root: self.root.clone(),
        }
    }
}

/// Renames a staged file onto its target, removing the staged file if the
/// rename fails.
async fn commit(tmp: &Path, target: &Path) -> Result<()> {
    if let Err(e) = fs::rename(tmp, target).await {
        let _ = fs::remove_file(tmp).await;
        return Err(StoreError::io(target, e));
    }
    Ok(())
}

async fn snapshot(target: &Path) -> BackupOutcome {
    let content = match fs::read(target).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return BackupOutcome::Skipped(SkipReason::Missing)
        }
        Err(e) => return BackupOutcome::Skipped(SkipReason::Unreadable(e.to_string())),
    };
    match create_sibling(target, "backup", &content).await {
        Ok(backup) => BackupOutcome::Created(backup),
        Err(e) => {
            warn!(path = %target.display(), error = %e, "backup failed, continuing with write");
            BackupOutcome::Skipped(SkipReason::WriteFailed(e.to_string()))
        }
    }
}

/// Names tried before giving up on a free `<path>.<marker>.<stamp>`.
const MAX_SIBLING_ATTEMPTS: i64 = 1000;

/// Creates `<path>.<marker>.<unix-epoch-ms>` exclusively and fills it with
/// `content`. A name already taken by another write bumps the stamp, so
/// every call gets its own file even within one millisecond.
async fn create_sibling(path: &Path, marker: &str, content: &[u8]) -> io::Result<PathBuf> {
    let now = Utc::now().timestamp_millis();
    for stamp in now..now + MAX_SIBLING_ATTEMPTS {
        let candidate = sibling(path, marker, stamp);
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };
        let filled = async {
            file.write_all(content).await?;
            file.flush().await
        }
        .await;
        drop(file);
        if let Err(e) = filled {
            let _ = fs::remove_file(&candidate).await;
            return Err(e);
        }
        return Ok(candidate);
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free {} name next to {}", marker, path.display()),
    ))
}

fn sibling(path: &Path, marker: &str, stamp: i64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.{}", marker, stamp));
    PathBuf::from(name)
}

/// Lexical normalization: drops `.` and folds `..` into its parent without
/// consulting the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}
