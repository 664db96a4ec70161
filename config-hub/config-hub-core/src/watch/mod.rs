//! Change notification stream.
//!
//! Each subscriber gets its own set of OS watches over the watched
//! subdirectories and top-level files. Raw notifications are normalized into
//! [`FileChange`]s, debounced per `(kind, path, category)` and delivered as
//! [`ChangeEvent`]s together with periodic heartbeats. Dropping the
//! [`Subscription`] tears the connection down: heartbeat, pending debounce
//! timers, watches, then the outbound channel.
//!
//! Targets that do not exist when a subscriber connects are skipped and are
//! not picked up later by that connection; subscribers reconnect to see them.

mod registry;
#[cfg(test)]
mod tests;

pub use registry::{ConnectionState, WatchHandle, WatchRegistry};

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{ChangeEvent, ChangeKind, ConnectionId, FileChange};
use crate::layout;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub debounce: Duration,
    pub heartbeat: Duration,
    /// Subdirectories of the root, watched recursively.
    pub directories: Vec<String>,
    /// Top-level files of the root.
    pub files: Vec<String>,
    /// Outbound events buffered per subscriber.
    pub buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: layout::DEFAULT_DEBOUNCE,
            heartbeat: layout::DEFAULT_HEARTBEAT,
            directories: layout::WATCHED_DIRS.iter().map(|s| s.to_string()).collect(),
            files: layout::WATCHED_FILES.iter().map(|s| s.to_string()).collect(),
            buffer: 256,
        }
    }
}

#[derive(Debug, Clone)]
enum TargetScope {
    Directory,
    File { name: OsString },
}

/// One watched location and the category its events are tagged with.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub category: String,
    pub path: PathBuf,
    scope: TargetScope,
}

impl WatchTarget {
    pub fn directory(root: &Path, name: &str) -> Self {
        Self {
            category: name.to_string(),
            path: root.join(name),
            scope: TargetScope::Directory,
        }
    }

    /// Top-level file. Watched through its parent directory so that atomic
    /// replacements (rename onto the name) keep being observed.
    pub fn file(root: &Path, name: &str) -> Self {
        Self {
            category: layout::ROOT_CATEGORY.to_string(),
            path: root.join(name),
            scope: TargetScope::File { name: name.into() },
        }
    }

    fn watch_path(&self) -> &Path {
        match self.scope {
            TargetScope::Directory => &self.path,
            TargetScope::File { .. } => self.path.parent().unwrap_or(self.path.as_path()),
        }
    }

    fn mode(&self) -> RecursiveMode {
        match self.scope {
            TargetScope::Directory => RecursiveMode::Recursive,
            TargetScope::File { .. } => RecursiveMode::NonRecursive,
        }
    }

    /// Path reported to subscribers, or `None` when `changed` is not part of
    /// this target.
    fn relative(&self, changed: &Path) -> Option<String> {
        match &self.scope {
            TargetScope::Directory => {
                let rel = changed.strip_prefix(&self.path).ok()?;
                if rel.as_os_str().is_empty() {
                    return None;
                }
                Some(rel.to_string_lossy().into_owned())
            }
            TargetScope::File { name } => {
                let matches = changed.file_name()? == name.as_os_str();
                matches.then(|| name.to_string_lossy().into_owned())
            }
        }
    }
}

pub fn watch_targets(root: &Path, config: &WatchConfig) -> Vec<WatchTarget> {
    config
        .directories
        .iter()
        .map(|dir| WatchTarget::directory(root, dir))
        .chain(config.files.iter().map(|file| WatchTarget::file(root, file)))
        .collect()
}

/// Maps a platform event kind onto the wire vocabulary. Access events carry
/// no change and are dropped.
pub fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(ChangeKind::Rename)
        }
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some(ChangeKind::Change),
        EventKind::Access(_) => None,
    }
}

fn normalize(target: &WatchTarget, event: &notify::Event) -> Vec<FileChange> {
    let Some(kind) = classify(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .filter_map(|path| target.relative(path))
        .map(|path| FileChange {
            kind,
            path,
            category: target.category.clone(),
        })
        .collect()
}

struct RawSignal {
    target: usize,
    result: notify::Result<notify::Event>,
}

/// Entry point for subscribers. Holds the watch targets and the shared
/// connection registry.
pub struct ChangeStream {
    targets: Arc<[WatchTarget]>,
    config: WatchConfig,
    registry: WatchRegistry,
}

impl ChangeStream {
    pub fn new(root: impl AsRef<Path>, config: WatchConfig, registry: WatchRegistry) -> Self {
        // notify reports canonical paths on some platforms
        let root = std::fs::canonicalize(root.as_ref())
            .unwrap_or_else(|_| root.as_ref().to_path_buf());
        let targets = watch_targets(&root, &config).into();
        Self {
            targets,
            config,
            registry,
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    /// Opens a connection. The first event is always `connected`.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        self.registry.register(id);

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let handles = self.attach(id, &raw_tx);
        drop(raw_tx);

        info!(connection = %id, watches = handles.len(), "change stream opened");
        self.registry.open(id, handles);
        self.spawn_connection(id, raw_rx)
    }

    fn attach(
        &self,
        id: ConnectionId,
        raw_tx: &mpsc::UnboundedSender<RawSignal>,
    ) -> Vec<WatchHandle> {
        let mut handles = Vec::new();
        for (index, target) in self.targets.iter().enumerate() {
            if !target.path.exists() {
                debug!(
                    connection = %id,
                    path = %target.path.display(),
                    "watch target missing, skipping"
                );
                continue;
            }
            let tx = raw_tx.clone();
            let watcher = RecommendedWatcher::new(
                move |result: notify::Result<notify::Event>| {
                    let _ = tx.send(RawSignal {
                        target: index,
                        result,
                    });
                },
                notify::Config::default(),
            );
            let mut watcher = match watcher {
                Ok(watcher) => watcher,
                Err(e) => {
                    warn!(
                        connection = %id,
                        category = %target.category,
                        error = %e,
                        "failed to create watcher"
                    );
                    continue;
                }
            };
            if let Err(e) = watcher.watch(target.watch_path(), target.mode()) {
                warn!(
                    connection = %id,
                    path = %target.path.display(),
                    error = %e,
                    "failed to watch"
                );
                continue;
            }
            handles.push(self.registry.track(watcher));
        }
        handles
    }

    fn spawn_connection(
        &self,
        id: ConnectionId,
        raw_rx: mpsc::UnboundedReceiver<RawSignal>,
    ) -> Subscription {
        let (out_tx, out_rx) = mpsc::channel(self.config.buffer.max(1));
        // fresh channel with capacity >= 1
        let _ = out_tx.try_send(ChangeEvent::connected(id));

        let connection = Connection {
            id,
            targets: self.targets.clone(),
            debounce: self.config.debounce,
            heartbeat: self.config.heartbeat.max(Duration::from_millis(1)),
            registry: self.registry.clone(),
            out: out_tx,
        };
        tokio::spawn(connection.run(raw_rx));
        Subscription { id, rx: out_rx }
    }
}

/// Receiving end of one connection. Dropping it closes the connection.
pub struct Subscription {
    id: ConnectionId,
    rx: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct Connection {
    id: ConnectionId,
    targets: Arc<[WatchTarget]>,
    debounce: Duration,
    heartbeat: Duration,
    registry: WatchRegistry,
    out: mpsc::Sender<ChangeEvent>,
}

type Pending = HashMap<FileChange, (u64, JoinHandle<()>)>;

impl Connection {
    async fn run(self, mut raw_rx: mpsc::UnboundedReceiver<RawSignal>) {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending = Pending::new();
        let mut generation = 0u64;
        let (fire_tx, mut fire_rx) = mpsc::unbounded_channel::<(FileChange, u64)>();

        let end = loop {
            tokio::select! {
                _ = self.out.closed() => break ConnectionState::Closed,
                _ = heartbeat.tick() => {
                    if self.out.send(ChangeEvent::heartbeat()).await.is_err() {
                        break ConnectionState::Closed;
                    }
                }
                Some((change, fired)) = fire_rx.recv() => {
                    if pending.get(&change).map(|(current, _)| *current) == Some(fired) {
                        pending.remove(&change);
                    }
                    if self.out.send(ChangeEvent::from_change(change)).await.is_err() {
                        break ConnectionState::Closed;
                    }
                }
                Some(signal) = raw_rx.recv() => match signal.result {
                    Ok(event) => {
                        let Some(target) = self.targets.get(signal.target) else { continue };
                        for change in normalize(target, &event) {
                            generation += 1;
                            self.schedule(&mut pending, change, generation, &fire_tx);
                        }
                    }
                    Err(e) => {
                        warn!(connection = %self.id, error = %e, "watch error, closing stream");
                        break ConnectionState::Errored;
                    }
                },
            }
        };

        let Connection {
            id, registry, out, ..
        } = self;
        drop(heartbeat);
        for (_, (_, timer)) in pending.drain() {
            timer.abort();
        }
        let lifetime = registry.close(id);
        drop(out);
        info!(
            connection = %id,
            state = ?end,
            lifetime_ms = lifetime.map(|d| d.num_milliseconds()).unwrap_or_default(),
            "change stream closed"
        );
    }

    /// Restarts the quiet period for `change`; the event fires once no new
    /// notification for the same key arrives within the debounce window.
    fn schedule(
        &self,
        pending: &mut Pending,
        change: FileChange,
        generation: u64,
        fire_tx: &mpsc::UnboundedSender<(FileChange, u64)>,
    ) {
        if let Some((_, timer)) = pending.remove(&change) {
            timer.abort();
        }
        let delay = self.debounce;
        let fire_tx = fire_tx.clone();
        let key = change.clone();
        let timer = tokio::spawn(async move {
            sleep(delay).await;
            let _ = fire_tx.send((key, generation));
        });
        pending.insert(change, (generation, timer));
    }
}
