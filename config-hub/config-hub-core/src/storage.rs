//! Storage accounting for the configuration root.

use serde::Serialize;
use tokio::fs;

use crate::layout::{
    AGENTS_DIR, EPHEMERAL_DIRS, HOOKS_DIR, HOOK_EXTENSION, MARKDOWN_EXTENSION, PROJECTS_DIR,
    RULES_DIR, SKILLS_DIR,
};
use crate::store::{ConfinedStore, Result, StoreError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySize {
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub size_human: String,
    pub item_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_size: String,
    pub total_bytes: u64,
    pub directories: Vec<DirectorySize>,
    /// Session data the tool regenerates; safe to prune.
    pub ephemeral_directories: Vec<DirectorySize>,
}

/// Sizes every non-hidden top-level directory of the root.
pub async fn storage_stats(store: &ConfinedStore) -> Result<StorageStats> {
    let root = store.root();
    let mut entries = fs::read_dir(root).await.map_err(|e| StoreError::Io {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut directories = Vec::new();
    let mut ephemeral_directories = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        match entry.file_type().await {
            Ok(ft) if ft.is_dir() => {}
            _ => continue,
        }

        let path = entry.path();
        let report = store.directory_size(&path).await?;
        let info = DirectorySize {
            size_human: format_bytes(report.bytes),
            size_bytes: report.bytes,
            item_count: report.item_count,
            path: path.to_string_lossy().into_owned(),
            name,
        };
        if EPHEMERAL_DIRS.contains(&info.name.as_str()) {
            ephemeral_directories.push(info);
        } else {
            directories.push(info);
        }
    }

    directories.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
    ephemeral_directories.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));

    let total_bytes = directories
        .iter()
        .chain(ephemeral_directories.iter())
        .map(|d| d.size_bytes)
        .sum();

    Ok(StorageStats {
        total_size: format_bytes(total_bytes),
        total_bytes,
        directories,
        ephemeral_directories,
    })
}

/// Dashboard counters for the configuration root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStats {
    pub rules: usize,
    pub skills: usize,
    pub agents: usize,
    pub hooks: usize,
    pub projects: usize,
    pub storage_size: String,
    pub storage_size_bytes: u64,
}

/// Counts rules (`*.md`), skills and agents (bundles or `*.md`), hooks
/// (`*.sh`) and projects (directories), plus the total size of the root.
/// A missing directory counts as zero.
pub async fn config_stats(store: &ConfinedStore) -> Result<ConfigStats> {
    let markdown = |name: &str, is_dir: bool| !is_dir && name.ends_with(MARKDOWN_EXTENSION);
    let bundle = |name: &str, is_dir: bool| is_dir || name.ends_with(MARKDOWN_EXTENSION);
    let hook = |name: &str, is_dir: bool| !is_dir && name.ends_with(HOOK_EXTENSION);
    let project = |_: &str, is_dir: bool| is_dir;

    let total = store.directory_size(store.root()).await?;
    Ok(ConfigStats {
        rules: count_entries(store, RULES_DIR, markdown).await?,
        skills: count_entries(store, SKILLS_DIR, bundle).await?,
        agents: count_entries(store, AGENTS_DIR, bundle).await?,
        hooks: count_entries(store, HOOKS_DIR, hook).await?,
        projects: count_entries(store, PROJECTS_DIR, project).await?,
        storage_size: format_bytes(total.bytes),
        storage_size_bytes: total.bytes,
    })
}

/// Direct children of `dir` accepted by `keep(name, is_dir)`. Symlinks are
/// neither files nor directories here.
async fn count_entries(
    store: &ConfinedStore,
    dir: &str,
    keep: impl Fn(&str, bool) -> bool,
) -> Result<usize> {
    let path = store.resolve(dir)?;
    let mut entries = match fs::read_dir(&path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::Io { path, source: e }),
    };

    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }
        if keep(&entry.file_name().to_string_lossy(), file_type.is_dir()) {
            count += 1;
        }
    }
    Ok(count)
}

/// Human-readable size in 1024 steps with at most one decimal, e.g.
/// `1.5 KB`, `3 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    let rounded = (size * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", rounded, UNITS[unit])
    }
}
