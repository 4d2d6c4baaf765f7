use super::*;
use crate::kernel::services::adapters::MemoryRuntime;
use crate::kernel::services::host::RuntimeHost;
use crate::kernel::services::ports::SandboxRuntime;
use crate::kernel::services::{workspace_bus, WorkspaceBusReceiver};

const WAIT: Duration = Duration::from_secs(2);

struct Fixture {
    rt: Arc<MemoryRuntime>,
    host: Arc<RuntimeHost>,
    ws: Arc<Workspace>,
    events: WorkspaceBusReceiver,
}

fn fixture<'a, I>(files: I) -> Fixture
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let rt = Arc::new(MemoryRuntime::new().with_files(files));
    let host = Arc::new(RuntimeHost::new());
    let ws = Arc::new(Workspace::new(Arc::clone(&host), workspace_bus()));
    let events = ws.subscribe();
    Fixture {
        rt,
        host,
        ws,
        events,
    }
}

impl Fixture {
    async fn boot(&self) {
        self.host.attach(self.rt.clone()).await.unwrap();
    }

    fn drain(&mut self) {
        while self.events.try_recv().is_some() {}
    }

    async fn next_tree_change(&mut self) -> bool {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(WorkspaceEvent::TreeChanged(_)) => return true,
                    Some(_) => continue,
                    None => return false,
                }
            }
        };
        tokio::time::timeout(WAIT, wait).await.unwrap_or(false)
    }

    fn count_tree_changes(&mut self) -> usize {
        let mut n = 0;
        while let Some(event) = self.events.try_recv() {
            if matches!(event, WorkspaceEvent::TreeChanged(_)) {
                n += 1;
            }
        }
        n
    }
}

fn settings(window_ms: u64, poll_ms: Option<u64>) -> ReconcilerSettings {
    ReconcilerSettings {
        coalesce_window_ms: window_ms,
        fallback_poll_ms: poll_ms,
    }
}

async fn wait_state(handle: &ReconcilerHandle, expected: ReconcilerState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == expected))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

#[tokio::test]
async fn stays_unattached_until_runtime_ready() {
    let mut fx = fixture([("a.ts", "")]);
    let handle = spawn(Arc::clone(&fx.ws), settings(16, None));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(handle.state(), ReconcilerState::Unattached);
    assert_eq!(fx.rt.subscriber_count(), 0);

    fx.boot().await;
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;
    assert_eq!(fx.rt.subscriber_count(), 1);
    assert_eq!(fx.ws.tree().len(), 1);
    assert!(fx.count_tree_changes() >= 1);
}

#[tokio::test]
async fn burst_of_events_collapses_into_one_rebuild() {
    let mut fx = fixture([("keep.ts", "")]);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(50, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;
    fx.drain();

    for name in ["a.ts", "b.ts", "c.ts", "d.ts", "e.ts"] {
        fx.rt.write_file(name, "").await.unwrap();
    }

    assert!(fx.next_tree_change().await);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fx.count_tree_changes(), 0);
    assert_eq!(fx.ws.tree().len(), 6);
}

#[tokio::test]
async fn zero_window_rebuilds_per_event() {
    let mut fx = fixture([("README.md", "")]);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(0, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;
    fx.drain();

    for name in ["a.ts", "b.ts", "c.ts"] {
        fx.rt.write_file(name, "").await.unwrap();
    }

    for _ in 0..3 {
        assert!(fx.next_tree_change().await);
    }
}

#[tokio::test]
async fn external_delete_closes_open_file() {
    let mut fx = fixture([("src/a.ts", "a"), ("src/b.ts", "b")]);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(16, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;

    fx.ws.open("src/b.ts").await.unwrap();
    fx.ws.open("src/a.ts").await.unwrap();
    fx.ws.edit("src/a.ts", "lost edit").await;
    fx.drain();

    fx.rt.remove_path("src/a.ts", false).await.unwrap();

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(WorkspaceEvent::TableChanged(entries)) = fx.events.recv().await {
                return entries;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].path, "src/b.ts");
    assert_eq!(fx.ws.active().await.as_deref(), Some("src/b.ts"));
}

#[tokio::test]
async fn commit_does_not_close_or_reopen() {
    let mut fx = fixture([("a.ts", "x")]);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(16, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;

    fx.ws.open("a.ts").await.unwrap();
    fx.ws.edit("a.ts", "y").await;
    fx.drain();

    fx.ws.commit("a.ts").await.unwrap();
    assert!(fx.next_tree_change().await);

    let entry = fx.ws.entry("a.ts").await.unwrap();
    assert_eq!(entry.persisted_content, "y");
    assert_eq!(fx.ws.active().await.as_deref(), Some("a.ts"));
    assert!(!fx.ws.dirty_paths().await.contains(&"a.ts".to_string()));
}

#[tokio::test]
async fn watch_failure_without_poll_disposes() {
    let mut fx = fixture([("a.ts", "")]);
    fx.rt.fail_subscribe(true);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(16, None));

    wait_state(&handle, ReconcilerState::Disposed).await;
    let mut saw_failure = false;
    while let Some(event) = fx.events.try_recv() {
        saw_failure |= matches!(event, WorkspaceEvent::WatchFailed(_));
    }
    assert!(saw_failure);
    assert_eq!(fx.ws.tree().len(), 1);
}

#[tokio::test]
async fn watch_failure_with_poll_keeps_reconciling() {
    let fx = fixture([("a.ts", "a"), ("b.ts", "b")]);
    fx.rt.fail_subscribe(true);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(16, Some(20)));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Poll)).await;

    fx.ws.open("a.ts").await.unwrap();
    fx.rt.remove_path("a.ts", false).await.unwrap();

    let closed = tokio::time::timeout(WAIT, async {
        while fx.ws.entry("a.ts").await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn runtime_loss_disposes_and_unsubscribes() {
    let fx = fixture([("README.md", "")]);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(16, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;

    fx.host.mark_lost("sandbox crashed");
    wait_state(&handle, ReconcilerState::Disposed).await;
    assert_eq!(fx.rt.subscriber_count(), 0);
}

#[tokio::test]
async fn stream_end_disposes() {
    let fx = fixture([("README.md", "")]);
    fx.boot().await;
    let handle = spawn(Arc::clone(&fx.ws), settings(16, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;

    fx.rt.close_streams();
    wait_state(&handle, ReconcilerState::Disposed).await;
}

#[tokio::test]
async fn dispose_and_drop_stop_watching() {
    let fx = fixture([("README.md", "")]);
    fx.boot().await;

    let mut handle = spawn(Arc::clone(&fx.ws), settings(16, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;
    handle.dispose();
    handle.dispose();
    wait_state(&handle, ReconcilerState::Disposed).await;
    handle.join().await;
    assert_eq!(fx.rt.subscriber_count(), 0);

    let handle = spawn(Arc::clone(&fx.ws), settings(16, None));
    wait_state(&handle, ReconcilerState::Watching(WatchSource::Stream)).await;
    let mut state = handle.watch_state();
    drop(handle);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ReconcilerState::Disposed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fx.rt.subscriber_count(), 0);
}
