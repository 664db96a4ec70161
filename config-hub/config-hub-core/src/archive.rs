//! Backup and restore of the configuration as gzip-compressed tarballs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::layout::BACKUP_ITEMS;
use crate::store::{ConfinedStore, StoreError};

const MANIFEST: &str = ".backup-info.json";
const MANIFEST_VERSION: &str = "1.0";
const RESTORE_TEMP_PREFIX: &str = ".restore-temp-";
const PRE_RESTORE_PREFIX: &str = ".pre-restore-backup-";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("no configuration files found to backup")]
    NothingToBackup,
    #[error("invalid backup archive: {0}")]
    InvalidArchive(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupItem {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub created: String,
    pub version: String,
    pub items: Vec<BackupItem>,
}

pub struct BackupArchive {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub info: BackupInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Existing entries are moved aside to `<name>.backup.<ms>` first.
    #[default]
    Merge,
    /// Current items are copied to `.pre-restore-backup-<ms>/` first.
    Replace,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored_items: Vec<String>,
    /// Top-level entries that were not restored (symlinks, devices).
    pub skipped_items: Vec<String>,
    pub mode: RestoreMode,
    pub backup_info: Option<BackupInfo>,
}

/// Packs the backup items that exist under the root, plus a manifest.
pub async fn export(store: &ConfinedStore) -> Result<BackupArchive> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || export_blocking(&store))
        .await
        .map_err(io::Error::other)?
}

fn export_blocking(store: &ConfinedStore) -> Result<BackupArchive> {
    let mut items = Vec::new();
    for name in BACKUP_ITEMS {
        let path = store.resolve(name)?;
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        items.push(BackupItem {
            path: name.to_string(),
            kind: if meta.is_dir() {
                ItemKind::Directory
            } else {
                ItemKind::File
            },
            size: if meta.is_dir() { 0 } else { meta.len() },
        });
    }
    if items.is_empty() {
        return Err(ArchiveError::NothingToBackup);
    }

    let now = Utc::now();
    let info = BackupInfo {
        created: now.to_rfc3339(),
        version: MANIFEST_VERSION.to_string(),
        items,
    };

    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(enc);
    tar.follow_symlinks(false);
    for item in &info.items {
        let path = store.root().join(&item.path);
        match item.kind {
            ItemKind::Directory => tar.append_dir_all(&item.path, &path)?,
            ItemKind::File => tar.append_path_with_name(&path, &item.path)?,
        }
    }

    let manifest = serde_json::to_vec_pretty(&info).map_err(io::Error::other)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(now.timestamp().max(0) as u64);
    header.set_cksum();
    tar.append_data(&mut header, MANIFEST, manifest.as_slice())?;

    let bytes = tar.into_inner()?.finish()?;
    info!(items = info.items.len(), bytes = bytes.len(), "exported backup");
    Ok(BackupArchive {
        filename: format!("claude-config-backup-{}.tar.gz", now.format("%Y-%m-%dT%H-%M-%S")),
        bytes,
        info,
    })
}

/// Unpacks `bytes` into a scratch directory under the root, then copies every
/// top-level entry into place. The scratch directory is removed whether or
/// not the restore succeeds.
pub async fn restore(
    store: &ConfinedStore,
    bytes: Vec<u8>,
    mode: RestoreMode,
) -> Result<RestoreReport> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || {
        let stamp = Utc::now().timestamp_millis();
        let scratch = store.resolve(format!("{}{}", RESTORE_TEMP_PREFIX, stamp))?;
        fs::create_dir_all(&scratch)?;
        let result = restore_blocking(&store, &bytes, mode, &scratch, stamp);
        if let Err(e) = fs::remove_dir_all(&scratch) {
            warn!(
                path = %scratch.display(),
                error = %e,
                "failed to remove restore scratch directory"
            );
        }
        result
    })
    .await
    .map_err(io::Error::other)?
}

fn restore_blocking(
    store: &ConfinedStore,
    bytes: &[u8],
    mode: RestoreMode,
    scratch: &Path,
    stamp: i64,
) -> Result<RestoreReport> {
    // unpack refuses absolute paths and `..` components
    tar::Archive::new(GzDecoder::new(bytes))
        .unpack(scratch)
        .map_err(|e| ArchiveError::InvalidArchive(e.to_string()))?;

    let backup_info = fs::read(scratch.join(MANIFEST))
        .ok()
        .and_then(|raw| serde_json::from_slice::<BackupInfo>(&raw).ok());

    if mode == RestoreMode::Replace {
        let keep = store.resolve(format!("{}{}", PRE_RESTORE_PREFIX, stamp))?;
        fs::create_dir_all(&keep)?;
        for name in BACKUP_ITEMS {
            let current = store.resolve(name)?;
            if current.exists() {
                copy_recursive(&current, &keep.join(name))?;
            }
        }
    }

    let mut entries: Vec<(String, fs::FileType)> = fs::read_dir(scratch)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let file_type = e.file_type().ok()?;
            Some((e.file_name().to_string_lossy().into_owned(), file_type))
        })
        .filter(|(name, _)| name != MANIFEST)
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut restored_items = Vec::new();
    let mut skipped_items = Vec::new();
    for (name, file_type) in entries {
        // only regular files and directories are copied out of the scratch tree
        if !file_type.is_file() && !file_type.is_dir() {
            warn!(item = %name, "skipping archive entry that is neither file nor directory");
            skipped_items.push(name);
            continue;
        }
        let dest = store.resolve(&name)?;
        if mode == RestoreMode::Merge && fs::symlink_metadata(&dest).is_ok() {
            let mut aside = dest.clone().into_os_string();
            aside.push(format!(".backup.{}", stamp));
            fs::rename(&dest, PathBuf::from(aside))?;
        }
        copy_recursive(&scratch.join(&name), &dest)?;
        restored_items.push(name);
    }

    info!(
        restored = restored_items.len(),
        skipped = skipped_items.len(),
        ?mode,
        "restored backup"
    );
    Ok(RestoreReport {
        restored_items,
        skipped_items,
        mode,
        backup_info,
    })
}

/// Deletes every `.pre-restore-backup-*` directory under the root.
pub async fn prune_pre_restore_backups(store: &ConfinedStore) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(store.root()).await?;
    let mut deleted = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with(PRE_RESTORE_PREFIX) {
            store.delete(entry.path(), true).await?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Copies a file or directory tree, overwriting files and merging into
/// existing directories. Symlinks are skipped.
fn copy_recursive(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = if rel.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(rel)
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
