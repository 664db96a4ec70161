//! `settings.json` as a JSON document: whole-file replacement and
//! dotted-path updates, both written through the store with a backup.

use serde_json::{Map, Value};

use crate::layout::SETTINGS_FILE;
use crate::store::{BackupOutcome, ConfinedStore, StoreError, WriteOptions};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("settings file is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("settings path must not be empty")]
    EmptyPath,
    #[error("cannot set {path}: {segment} is not an object")]
    NotAnObject { path: String, segment: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

pub async fn read_settings(store: &ConfinedStore) -> Result<Value> {
    let raw = store.read(SETTINGS_FILE).await?;
    serde_json::from_str(&raw).map_err(SettingsError::Malformed)
}

/// Replaces the whole document, pretty-printed with two-space indentation.
pub async fn write_settings(store: &ConfinedStore, settings: &Value) -> Result<BackupOutcome> {
    let body = serde_json::to_string_pretty(settings).map_err(SettingsError::Malformed)?;
    let outcome = store
        .write_with(
            SETTINGS_FILE,
            &body,
            WriteOptions {
                backup: true,
                executable: false,
            },
        )
        .await?;
    Ok(outcome)
}

/// Sets the value at a dotted path such as `permissions.allow`, creating
/// missing intermediate objects, and writes the result back.
pub async fn patch_settings(store: &ConfinedStore, path: &str, value: Value) -> Result<Value> {
    let mut settings = read_settings(store).await?;
    set_dotted(&mut settings, path, value)?;
    write_settings(store, &settings).await?;
    Ok(settings)
}

pub fn set_dotted(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    if path.is_empty() {
        return Err(SettingsError::EmptyPath);
    }
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);

    let mut current = doc;
    let mut walked = String::new();
    for segment in segments {
        let object = as_object(current, path, &walked)?;
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);
        current = object
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_object(current, path, &walked)?.insert(last.to_string(), value);
    Ok(())
}

fn as_object<'a>(
    value: &'a mut Value,
    path: &str,
    walked: &str,
) -> Result<&'a mut Map<String, Value>> {
    value.as_object_mut().ok_or_else(|| SettingsError::NotAnObject {
        path: path.to_string(),
        segment: if walked.is_empty() {
            "<root>".to_string()
        } else {
            walked.to_string()
        },
    })
}
