//! Flat folders of named files (hooks, prompts) addressed by file name.

use std::path::PathBuf;

use config_hub_core::store::{ConfinedStore, FileStats, ListOptions, StoreError};

use super::{ApiError, ApiResult};

pub(super) struct FolderEntry {
    pub name: String,
    pub path: PathBuf,
    pub stats: FileStats,
}

/// `<dir>/<name>` for a plain file name: no separators, no `.`/`..`.
pub(super) fn entry_path(dir: &str, name: &str) -> ApiResult<PathBuf> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ApiError::bad_request(format!("invalid file name: {}", name)));
    }
    Ok(PathBuf::from(dir).join(name))
}

/// Files directly inside `dir` ending in `extension`, sorted by name. A
/// missing folder lists as empty.
pub(super) async fn list_folder(
    store: &ConfinedStore,
    dir: &str,
    extension: &'static str,
) -> ApiResult<Vec<FolderEntry>> {
    let matches = move |name: &str| name.ends_with(extension);
    let filter: &(dyn Fn(&str) -> bool + Send + Sync) = &matches;
    let opts = ListOptions {
        recursive: false,
        filter: Some(filter),
    };
    let files = match store.list_entries(dir, opts).await {
        Ok(files) => files,
        Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let stats = store.file_stats(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        entries.push(FolderEntry { name, path, stats });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
