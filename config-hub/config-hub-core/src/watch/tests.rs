use super::*;
use crate::store::ConfinedStore;
use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind, RenameMode};
use tempfile::TempDir;
use tokio::time::timeout;

fn quiet_config() -> WatchConfig {
    WatchConfig {
        heartbeat: Duration::from_secs(3600),
        ..WatchConfig::default()
    }
}

fn stream_for(dir: &TempDir, config: WatchConfig) -> (ChangeStream, PathBuf) {
    let root = dir.path().join(".claude");
    std::fs::create_dir_all(&root).unwrap();
    let root = std::fs::canonicalize(&root).unwrap();
    (ChangeStream::new(&root, config, WatchRegistry::new()), root)
}

fn target_index(stream: &ChangeStream, category: &str) -> usize {
    stream
        .targets()
        .iter()
        .position(|t| t.category == category)
        .unwrap()
}

/// Opens a connection fed by a hand-driven raw channel instead of OS watches.
fn injected(stream: &ChangeStream) -> (Subscription, mpsc::UnboundedSender<RawSignal>) {
    let id = Uuid::new_v4();
    stream.registry.register(id);
    stream.registry.open(id, Vec::new());
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    (stream.spawn_connection(id, raw_rx), raw_tx)
}

fn modified(path: PathBuf) -> notify::Event {
    notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path)
}

async fn expect_connected(sub: &mut Subscription) {
    let first = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
    assert_eq!(first, Some(ChangeEvent::connected(sub.id())));
}

async fn wait_until_idle(registry: &WatchRegistry) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.connection_count() > 0 || registry.active_handles() > 0 {
        assert!(Instant::now() < deadline, "connections did not shut down");
        sleep(Duration::from_millis(10)).await;
    }
}

#[test]
fn classify_normalizes_platform_kinds() {
    assert_eq!(
        classify(&EventKind::Create(CreateKind::File)),
        Some(ChangeKind::Rename)
    );
    assert_eq!(
        classify(&EventKind::Remove(RemoveKind::Any)),
        Some(ChangeKind::Rename)
    );
    assert_eq!(
        classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
        Some(ChangeKind::Rename)
    );
    assert_eq!(
        classify(&EventKind::Modify(ModifyKind::Data(DataChange::Any))),
        Some(ChangeKind::Change)
    );
    assert_eq!(classify(&EventKind::Any), Some(ChangeKind::Change));
    assert_eq!(classify(&EventKind::Access(AccessKind::Read)), None);
}

#[test]
fn normalize_reports_paths_relative_to_target() {
    let root = PathBuf::from("/home/u/.claude");
    let skills = WatchTarget::directory(&root, "skills");
    let claude_md = WatchTarget::file(&root, "CLAUDE.md");

    let event = modified(root.join("skills/deploy/SKILL.md"));
    assert_eq!(
        normalize(&skills, &event),
        vec![FileChange {
            kind: ChangeKind::Change,
            path: "deploy/SKILL.md".into(),
            category: "skills".into(),
        }]
    );

    // events on the watched directory itself carry no path
    assert!(normalize(&skills, &modified(root.join("skills"))).is_empty());

    let event = modified(root.join("CLAUDE.md"));
    assert_eq!(normalize(&claude_md, &event)[0].path, "CLAUDE.md");
    assert_eq!(normalize(&claude_md, &event)[0].category, "root");
    assert!(normalize(&claude_md, &modified(root.join("README.md"))).is_empty());
}

#[tokio::test]
async fn debounce_collapses_bursts() {
    let dir = TempDir::new().unwrap();
    let (stream, root) = stream_for(&dir, quiet_config());
    let rules = target_index(&stream, "rules");
    let (mut sub, raw_tx) = injected(&stream);
    expect_connected(&mut sub).await;

    for _ in 0..3 {
        raw_tx
            .send(RawSignal {
                target: rules,
                result: Ok(modified(root.join("rules/style.md"))),
            })
            .unwrap();
        sleep(Duration::from_millis(15)).await;
    }
    let last = Instant::now() - Duration::from_millis(15);

    let event = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
    assert!(last.elapsed() >= Duration::from_millis(95));
    match event {
        ChangeEvent::Change { path, category, .. } => {
            assert_eq!(path, "style.md");
            assert_eq!(category, "rules");
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert!(timeout(Duration::from_millis(300), sub.recv()).await.is_err());
}

#[tokio::test]
async fn debounce_keeps_distinct_keys_apart() {
    let dir = TempDir::new().unwrap();
    let (stream, root) = stream_for(&dir, quiet_config());
    let agents = target_index(&stream, "agents");
    let (mut sub, raw_tx) = injected(&stream);
    expect_connected(&mut sub).await;

    let created = notify::Event::new(EventKind::Create(CreateKind::File))
        .add_path(root.join("agents/reviewer.md"));
    raw_tx
        .send(RawSignal {
            target: agents,
            result: Ok(created),
        })
        .unwrap();
    raw_tx
        .send(RawSignal {
            target: agents,
            result: Ok(modified(root.join("agents/reviewer.md"))),
        })
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..2 {
        match timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap() {
            ChangeEvent::Change { .. } => kinds.push("change"),
            ChangeEvent::Rename { .. } => kinds.push("rename"),
            other => panic!("unexpected event {:?}", other),
        }
    }
    kinds.sort();
    assert_eq!(kinds, vec!["change", "rename"]);
}

#[tokio::test]
async fn heartbeat_is_periodic() {
    let dir = TempDir::new().unwrap();
    let (stream, _root) = stream_for(
        &dir,
        WatchConfig {
            heartbeat: Duration::from_millis(50),
            ..WatchConfig::default()
        },
    );
    let mut sub = stream.subscribe();
    expect_connected(&mut sub).await;

    for _ in 0..2 {
        let event = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        assert!(matches!(event, ChangeEvent::Heartbeat { .. }));
    }
}

#[tokio::test]
async fn watch_error_ends_the_stream() {
    let dir = TempDir::new().unwrap();
    let (stream, _root) = stream_for(&dir, quiet_config());
    let (mut sub, raw_tx) = injected(&stream);
    expect_connected(&mut sub).await;

    raw_tx
        .send(RawSignal {
            target: 0,
            result: Err(notify::Error::generic("inotify queue overflow")),
        })
        .unwrap();

    assert_eq!(timeout(Duration::from_secs(1), sub.recv()).await.unwrap(), None);
    wait_until_idle(stream.registry()).await;
}

#[tokio::test]
async fn missing_targets_are_skipped() {
    let dir = TempDir::new().unwrap();
    let (stream, root) = stream_for(&dir, quiet_config());
    std::fs::create_dir_all(root.join("rules")).unwrap();
    std::fs::write(root.join("CLAUDE.md"), "# notes").unwrap();

    let mut sub = stream.subscribe();
    expect_connected(&mut sub).await;
    assert_eq!(stream.registry().handles_for(sub.id()), 2);
    assert_eq!(stream.registry().state(sub.id()), Some(ConnectionState::Open));
    assert_eq!(stream.registry().active_handles(), 2);

    drop(sub);
    wait_until_idle(stream.registry()).await;
}

#[tokio::test]
async fn repeated_connections_release_all_watches() {
    let dir = TempDir::new().unwrap();
    let (stream, root) = stream_for(&dir, quiet_config());
    for name in layout::WATCHED_DIRS {
        std::fs::create_dir_all(root.join(name)).unwrap();
    }
    std::fs::write(root.join("CLAUDE.md"), "").unwrap();
    std::fs::write(root.join("settings.json"), "{}").unwrap();

    for _ in 0..50 {
        let mut sub = stream.subscribe();
        expect_connected(&mut sub).await;
        assert!(stream.registry().active_handles() > 0);
        drop(sub);
        wait_until_idle(stream.registry()).await;
    }

    assert_eq!(stream.registry().active_handles(), 0);
    assert_eq!(stream.registry().connection_count(), 0);
}

#[tokio::test]
async fn store_writes_are_observed() {
    let dir = TempDir::new().unwrap();
    let (stream, root) = stream_for(&dir, quiet_config());
    std::fs::create_dir_all(root.join("rules")).unwrap();
    let store = ConfinedStore::new(&root).unwrap();

    let mut sub = stream.subscribe();
    expect_connected(&mut sub).await;
    store.write("rules/testing.md", "# testing", true).await.unwrap();

    let found = timeout(Duration::from_secs(5), async {
        while let Some(event) = sub.recv().await {
            match event {
                ChangeEvent::Change { path, category, .. }
                | ChangeEvent::Rename { path, category, .. }
                    if path == "testing.md" =>
                {
                    return category;
                }
                _ => {}
            }
        }
        String::new()
    })
    .await
    .unwrap();
    assert_eq!(found, "rules");
}
