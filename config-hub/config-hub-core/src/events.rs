use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Message sent to change-stream subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    #[serde(rename_all = "camelCase")]
    Connected { connection_id: ConnectionId },
    Change {
        path: String,
        category: String,
        timestamp: i64,
    },
    Rename {
        path: String,
        category: String,
        timestamp: i64,
    },
    Heartbeat { timestamp: i64 },
}

impl ChangeEvent {
    pub fn connected(connection_id: ConnectionId) -> Self {
        Self::Connected { connection_id }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Stamps a coalesced file change with the current time.
    pub fn from_change(change: FileChange) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        let FileChange {
            kind,
            path,
            category,
        } = change;
        match kind {
            ChangeKind::Change => Self::Change {
                path,
                category,
                timestamp,
            },
            ChangeKind::Rename => Self::Rename {
                path,
                category,
                timestamp,
            },
        }
    }
}

/// Platform-independent kind of a filesystem change.
///
/// `Rename` covers anything that changes which names exist (create, remove,
/// rename); `Change` covers content and metadata updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Change,
    Rename,
}

/// A normalized change, before debouncing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChange {
    pub kind: ChangeKind,
    /// Relative to the watched directory, or the file name for top-level files.
    pub path: String,
    pub category: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn wire_shape() {
        let id = Uuid::new_v4();
        let v = serde_json::to_value(ChangeEvent::connected(id)).unwrap();
        assert_eq!(v, json!({"type": "connected", "connectionId": id.to_string()}));

        let v = serde_json::to_value(ChangeEvent::from_change(FileChange {
            kind: ChangeKind::Rename,
            path: "deploy/SKILL.md".into(),
            category: "skills".into(),
        }))
        .unwrap();
        assert_eq!(v["type"], "rename");
        assert_eq!(v["path"], "deploy/SKILL.md");
        assert_eq!(v["category"], "skills");
        assert!(v["timestamp"].as_i64().unwrap() > 0);

        let v: Value = serde_json::to_value(ChangeEvent::heartbeat()).unwrap();
        assert_eq!(v["type"], "heartbeat");
    }
}
