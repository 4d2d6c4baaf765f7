use super::*;
use crate::kernel::services::adapters::MemoryRuntime;
use crate::kernel::services::workspace_bus;

async fn ready_workspace<'a, I>(files: I) -> (Arc<MemoryRuntime>, Arc<Workspace>)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let rt = Arc::new(MemoryRuntime::new().with_files(files));
    let host = Arc::new(RuntimeHost::new());
    host.attach(rt.clone()).await.unwrap();
    let ws = Arc::new(Workspace::new(host, workspace_bus()));
    (rt, ws)
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn open_reads_content_and_activates() {
    let (_rt, ws) = ready_workspace([("src/a.ts", "let a = 1;")]).await;
    let mut events = ws.subscribe();

    assert_eq!(ws.open("src/a.ts").await, Ok(OpenOutcome::Opened));
    let entry = ws.entry("src/a.ts").await.unwrap();
    assert_eq!(entry.live_content, "let a = 1;");
    assert_eq!(entry.persisted_content, entry.live_content);
    assert_eq!(entry.language_tag, "ts");
    assert_eq!(ws.active().await.as_deref(), Some("src/a.ts"));

    assert!(matches!(
        events.try_recv(),
        Some(WorkspaceEvent::TableChanged(entries)) if entries.len() == 1
    ));
}

#[tokio::test]
async fn open_of_folder_missing_or_unreadable_is_a_no_op() {
    let (rt, ws) = ready_workspace([("src/a.ts", ""), ("b.ts", "")]).await;
    rt.fail_read_file("b.ts");

    assert_eq!(ws.open("src").await, Ok(OpenOutcome::Directory));
    assert_eq!(ws.open("nope.ts").await, Ok(OpenOutcome::Missing));
    assert_eq!(ws.open("b.ts").await, Ok(OpenOutcome::Unreadable));
    assert!(ws.entries().await.is_empty());
    assert_eq!(ws.active().await, None);
}

#[tokio::test]
async fn names_with_surrounding_spaces_open_by_tree_id() {
    let (_rt, ws) = ready_workspace([(" notes.txt", "n"), ("docs/draft ", "d")]).await;
    ws.refresh().await.unwrap();
    let tree = ws.tree();

    for id in [" notes.txt", "docs/draft "] {
        let node = crate::models::file_tree::find(&tree, id).unwrap();
        assert_eq!(ws.open(&node.id).await, Ok(OpenOutcome::Opened));
    }
    assert_eq!(ws.entry(" notes.txt").await.unwrap().live_content, "n");
    assert_eq!(ws.active().await.as_deref(), Some("docs/draft "));
}

#[tokio::test]
async fn reopening_only_activates() {
    let (rt, ws) = ready_workspace([("a.ts", "a"), ("b.ts", "b")]).await;
    ws.open("a.ts").await.unwrap();
    ws.open("b.ts").await.unwrap();
    ws.activate("a.ts").await;
    ws.edit("a.ts", "edited").await;
    rt.seed_file("a.ts", "changed on disk");

    assert_eq!(ws.open("a.ts").await, Ok(OpenOutcome::Activated));
    assert_eq!(ws.entry("a.ts").await.unwrap().live_content, "edited");
    assert_eq!(ws.entries().await.len(), 2);
}

#[tokio::test]
async fn superseded_open_does_not_steal_focus() {
    let (rt, ws) = ready_workspace([("a.ts", "a"), ("b.ts", "b")]).await;
    rt.hold_reads("a.ts");

    let slow = {
        let ws = Arc::clone(&ws);
        tokio::spawn(async move { ws.open("a.ts").await })
    };
    settle().await;

    assert_eq!(ws.open("b.ts").await, Ok(OpenOutcome::Opened));
    rt.release_reads("a.ts");
    assert_eq!(slow.await.unwrap(), Ok(OpenOutcome::Opened));

    assert_eq!(ws.active().await.as_deref(), Some("b.ts"));
    assert!(ws.entry("a.ts").await.is_some());
}

#[tokio::test]
async fn commit_writes_live_snapshot_and_cleans() {
    let (rt, ws) = ready_workspace([("a.ts", "x")]).await;
    ws.open("a.ts").await.unwrap();

    assert_eq!(ws.commit("a.ts").await, Ok(CommitOutcome::Clean));
    assert!(ws.edit("a.ts", "y").await);
    assert_eq!(ws.dirty_paths().await, vec!["a.ts".to_string()]);

    assert_eq!(ws.commit("a.ts").await, Ok(CommitOutcome::Committed));
    assert_eq!(rt.file_content("a.ts").as_deref(), Some("y"));
    let entry = ws.entry("a.ts").await.unwrap();
    assert_eq!(entry.persisted_content, "y");
    assert!(!entry.is_dirty());
    assert_eq!(ws.commit("other.ts").await, Ok(CommitOutcome::NotOpen));
}

#[tokio::test]
async fn failed_commit_keeps_dirty_and_reports() {
    let (rt, ws) = ready_workspace([("a.ts", "x")]).await;
    ws.open("a.ts").await.unwrap();
    ws.edit("a.ts", "y").await;
    rt.fail_writes_to("a.ts");
    let mut events = ws.subscribe();

    let err = ws.commit("a.ts").await.unwrap_err();
    assert!(matches!(err, WorkspaceError::Write { ref path, .. } if path == "a.ts"));

    let entry = ws.entry("a.ts").await.unwrap();
    assert_eq!(entry.persisted_content, "x");
    assert_eq!(entry.live_content, "y");
    assert!(entry.is_dirty());
    assert_eq!(rt.file_content("a.ts").as_deref(), Some("x"));
    assert!(matches!(
        events.try_recv(),
        Some(WorkspaceEvent::CommitFailed { path, .. }) if path == "a.ts"
    ));
}

#[tokio::test]
async fn external_delete_closes_entry_and_drops_edits() {
    let (rt, ws) = ready_workspace([("src/a.ts", "a"), ("src/b.ts", "b")]).await;
    ws.refresh().await.unwrap();
    ws.open("src/b.ts").await.unwrap();
    ws.open("src/a.ts").await.unwrap();
    ws.edit("src/a.ts", "unsaved work").await;

    rt.remove_path("src/a.ts", false).await.unwrap();
    let closed = ws.refresh().await.unwrap();

    assert_eq!(closed, vec!["src/a.ts".to_string()]);
    assert!(ws.entry("src/a.ts").await.is_none());
    assert_eq!(ws.active().await.as_deref(), Some("src/b.ts"));
    assert!(ws.refresh().await.unwrap().is_empty());
}

#[tokio::test]
async fn committed_file_survives_the_following_refresh() {
    let (_rt, ws) = ready_workspace([("a.ts", "x"), ("b.ts", "b")]).await;
    ws.open("a.ts").await.unwrap();
    ws.edit("a.ts", "y").await;
    ws.commit("a.ts").await.unwrap();

    assert!(ws.refresh().await.unwrap().is_empty());
    assert_eq!(ws.active().await.as_deref(), Some("a.ts"));
}

#[tokio::test]
async fn reconcile_during_commit_is_deferred_then_rechecked() {
    let (rt, ws) = ready_workspace([("src/a.ts", "x")]).await;
    ws.open("src/a.ts").await.unwrap();
    ws.edit("src/a.ts", "y").await;
    rt.hold_writes();

    let commit = {
        let ws = Arc::clone(&ws);
        tokio::spawn(async move { ws.commit("src/a.ts").await })
    };
    settle().await;

    rt.remove_path("src", true).await.unwrap();
    assert!(ws.refresh().await.unwrap().is_empty());
    assert!(ws.entry("src/a.ts").await.is_some());

    rt.release_writes();
    assert!(commit.await.unwrap().is_err());
    assert!(ws.entry("src/a.ts").await.is_none());
    assert_eq!(ws.active().await, None);
}

#[tokio::test]
async fn refresh_publishes_tree() {
    let (_rt, ws) = ready_workspace([("src/a.ts", ""), ("README.md", "")]).await;
    let mut events = ws.subscribe();

    ws.refresh().await.unwrap();
    let tree = ws.tree();
    assert_eq!(tree.len(), 2);
    assert!(matches!(
        events.try_recv(),
        Some(WorkspaceEvent::TreeChanged(t)) if Arc::ptr_eq(&t, &tree)
    ));
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn file_operations_go_through_runtime() {
    let (rt, ws) = ready_workspace([("keep.txt", "")]).await;

    ws.create_file("src/deep/new.ts").await.unwrap();
    assert_eq!(rt.file_content("src/deep/new.ts").as_deref(), Some(""));

    ws.create_folder("assets/img").await.unwrap();
    assert_eq!(rt.probe("assets/img").await, PathKind::Directory);

    ws.remove("src").await.unwrap();
    assert_eq!(rt.probe("src/deep/new.ts").await, PathKind::NotFound);
    assert!(matches!(
        ws.remove("src").await,
        Err(WorkspaceError::Fs(FsError::NotFound(_)))
    ));
}

#[tokio::test]
async fn operations_fail_without_runtime() {
    let ws = Workspace::new(Arc::new(RuntimeHost::new()), workspace_bus());
    assert_eq!(ws.open("a.ts").await, Err(WorkspaceError::RuntimeUnavailable));
    assert_eq!(ws.refresh().await, Err(WorkspaceError::RuntimeUnavailable));
    assert_eq!(
        ws.create_file("a.ts").await,
        Err(WorkspaceError::RuntimeUnavailable)
    );
}

#[tokio::test]
async fn diff_compares_persisted_with_live() {
    let (_rt, ws) = ready_workspace([("a.ts", "one\ntwo\n")]).await;
    ws.open("a.ts").await.unwrap();
    assert!(ws.diff("a.ts").await.unwrap().is_empty());

    ws.edit("a.ts", "one\n2\nthree\n").await;
    let stats = ws.diff("a.ts").await.unwrap().stats();
    assert_eq!((stats.added, stats.removed), (2, 1));
    assert!(ws.diff("missing.ts").await.is_none());
}
