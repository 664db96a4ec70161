//! Well-known names inside the configuration root.

use std::path::PathBuf;
use std::time::Duration;

/// Directory name of the configuration root under the user's home.
pub const ROOT_DIR_NAME: &str = ".claude";

/// Subdirectories watched recursively by the change stream.
pub const WATCHED_DIRS: &[&str] = &["skills", "agents", "rules", "hooks", "prompts", "templates"];

/// Top-level files watched by the change stream.
pub const WATCHED_FILES: &[&str] = &["CLAUDE.md", "settings.json"];

/// Category label attached to events from top-level files.
pub const ROOT_CATEGORY: &str = "root";

pub const SETTINGS_FILE: &str = "settings.json";
pub const RULES_DIR: &str = "rules";
pub const SKILLS_DIR: &str = "skills";
pub const AGENTS_DIR: &str = "agents";
pub const PROJECTS_DIR: &str = "projects";
pub const HOOKS_DIR: &str = "hooks";
pub const HOOK_EXTENSION: &str = ".sh";
pub const PROMPTS_DIR: &str = "prompts";
pub const MARKDOWN_EXTENSION: &str = ".md";

/// Append-only log of hook executions, one JSON object per line.
pub const HOOK_METRICS_FILE: &str = "hook-metrics.jsonl";

/// Items included in a configuration backup archive.
pub const BACKUP_ITEMS: &[&str] = &[
    "CLAUDE.md",
    "README.md",
    "settings.json",
    "skills",
    "agents",
    "rules",
    "hooks",
    "prompts",
    "templates",
];

/// Directories holding session data the tool regenerates on its own.
pub const EPHEMERAL_DIRS: &[&str] = &[
    "projects",
    "shell-snapshots",
    "file-history",
    "todos",
    "session-env",
    "debug",
    "cache",
    "downloads",
    "statsig",
    "ide",
];

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// `<home>/.claude`, or `None` when no home directory can be determined.
pub fn default_root() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(ROOT_DIR_NAME))
}
