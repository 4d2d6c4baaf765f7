use super::*;

fn paths(items: &[&str]) -> FxHashSet<String> {
    items.iter().map(|p| p.to_string()).collect()
}

fn open(table: &mut OpenFileTable, path: &str, content: &str) {
    let ticket = table.begin_activation();
    table.insert_opened(ticket, path, content.to_string());
}

#[test]
fn opened_entry_is_clean_and_active() {
    let mut table = OpenFileTable::new();
    open(&mut table, "src/a.ts", "let a = 1;");

    let entry = table.get("src/a.ts").unwrap();
    assert_eq!(entry.live_content, entry.persisted_content);
    assert_eq!(entry.language_tag, "ts");
    assert!(!entry.is_dirty());
    assert_eq!(table.active(), Some("src/a.ts"));
}

#[test]
fn edit_tracks_dirty_against_persisted() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "x");

    assert!(table.edit("a.ts", "y"));
    assert_eq!(table.get("a.ts").unwrap().live_content, "y");
    assert_eq!(table.get("a.ts").unwrap().persisted_content, "x");
    assert!(table.is_dirty("a.ts"));

    assert!(table.edit("a.ts", "x"));
    assert!(!table.is_dirty("a.ts"));
}

#[test]
fn edit_of_inactive_path_is_ignored() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "a");
    open(&mut table, "b.ts", "b");

    assert!(!table.edit("a.ts", "changed"));
    assert!(!table.edit("missing.ts", "changed"));
    assert_eq!(table.get("a.ts").unwrap().live_content, "a");
}

#[test]
fn closing_active_reassigns_to_last_inserted() {
    let mut table = OpenFileTable::new();
    open(&mut table, "b.ts", "b");
    open(&mut table, "c.ts", "c");
    open(&mut table, "a.ts", "a");
    assert_eq!(table.active(), Some("a.ts"));

    assert!(table.close("a.ts"));
    assert_eq!(table.active(), Some("c.ts"));

    assert!(table.close("c.ts"));
    assert_eq!(table.active(), Some("b.ts"));

    assert!(table.close("b.ts"));
    assert_eq!(table.active(), None);
    assert!(table.is_empty());
}

#[test]
fn closing_non_active_keeps_active() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "a");
    open(&mut table, "b.ts", "b");
    table.activate("a.ts");

    assert!(table.close("b.ts"));
    assert_eq!(table.active(), Some("a.ts"));
    assert!(!table.close("b.ts"));
}

#[test]
fn active_with_second_tab_open_moves_on_close() {
    let mut table = OpenFileTable::new();
    open(&mut table, "b.ts", "b");
    open(&mut table, "a.ts", "a");
    assert_eq!(table.active(), Some("a.ts"));

    table.close("a.ts");
    assert_eq!(table.active(), Some("b.ts"));
}

#[test]
fn reconcile_closes_missing_paths_and_is_idempotent() {
    let mut table = OpenFileTable::new();
    open(&mut table, "src/a.ts", "a");
    open(&mut table, "src/b.ts", "b");
    table.edit("src/b.ts", "unsaved");

    let current = paths(&["src", "src/a.ts"]);
    assert_eq!(table.reconcile(&current), vec!["src/b.ts".to_string()]);
    assert_eq!(table.active(), Some("src/a.ts"));

    let before: Vec<OpenFileEntry> = table.entries().to_vec();
    assert!(table.reconcile(&current).is_empty());
    assert_eq!(table.entries(), before.as_slice());
}

#[test]
fn activation_after_open_started_keeps_focus() {
    let mut table = OpenFileTable::new();
    open(&mut table, "b.ts", "b");

    let slow = table.begin_activation();
    open(&mut table, "c.ts", "c");

    assert!(!table.insert_opened(slow, "a.ts", "a".to_string()));
    assert!(table.contains("a.ts"));
    assert_eq!(table.active(), Some("c.ts"));
}

#[test]
fn explicit_activate_supersedes_pending_open() {
    let mut table = OpenFileTable::new();
    open(&mut table, "b.ts", "b");

    let pending = table.begin_activation();
    assert!(table.activate("b.ts"));
    assert!(!table.insert_opened(pending, "a.ts", "a".to_string()));
    assert_eq!(table.active(), Some("b.ts"));
    assert!(!table.activate("nope.ts"));
}

#[test]
fn duplicate_insert_keeps_existing_buffer() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "disk");
    table.edit("a.ts", "edited");

    let ticket = table.begin_activation();
    table.insert_opened(ticket, "a.ts", "disk".to_string());
    assert_eq!(table.len(), 1);
    assert_eq!(table.get("a.ts").unwrap().live_content, "edited");
}

#[test]
fn commit_is_gated_on_dirty() {
    let mut table = OpenFileTable::new();
    assert_eq!(table.begin_commit("a.ts"), CommitStart::NotOpen);

    open(&mut table, "a.ts", "x");
    assert_eq!(table.begin_commit("a.ts"), CommitStart::Clean);
    assert!(!table.commit_in_flight("a.ts"));

    table.edit("a.ts", "y");
    assert_eq!(table.begin_commit("a.ts"), CommitStart::Write("y".to_string()));
    assert!(table.commit_in_flight("a.ts"));
}

#[test]
fn successful_commit_persists_snapshot_not_later_edits() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "x");
    table.edit("a.ts", "y");
    let CommitStart::Write(snapshot) = table.begin_commit("a.ts") else {
        panic!("expected write");
    };
    table.edit("a.ts", "z");

    assert!(!table.finish_commit("a.ts", &snapshot, true));
    let entry = table.get("a.ts").unwrap();
    assert_eq!(entry.persisted_content, "y");
    assert_eq!(entry.live_content, "z");
    assert!(entry.is_dirty());
    assert!(!table.commit_in_flight("a.ts"));
}

#[test]
fn failed_commit_keeps_persisted_and_dirty() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "x");
    table.edit("a.ts", "y");
    let CommitStart::Write(snapshot) = table.begin_commit("a.ts") else {
        panic!("expected write");
    };

    table.finish_commit("a.ts", &snapshot, false);
    assert_eq!(table.get("a.ts").unwrap().persisted_content, "x");
    assert!(table.is_dirty("a.ts"));
    assert_eq!(table.dirty_paths(), vec!["a.ts".to_string()]);
}

#[test]
fn reconcile_defers_in_flight_commit_until_settled() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "x");
    table.edit("a.ts", "y");
    let CommitStart::Write(first) = table.begin_commit("a.ts") else {
        panic!("expected write");
    };
    let CommitStart::Write(second) = table.begin_commit("a.ts") else {
        panic!("expected write");
    };

    assert!(table.reconcile(&paths(&[])).is_empty());
    assert!(table.contains("a.ts"));

    assert!(!table.finish_commit("a.ts", &first, false));
    assert!(table.finish_commit("a.ts", &second, false));
    assert!(!table.finish_commit("a.ts", &second, false));
}

#[test]
fn closing_clears_deferred_mark() {
    let mut table = OpenFileTable::new();
    open(&mut table, "a.ts", "x");
    table.edit("a.ts", "y");
    let CommitStart::Write(snapshot) = table.begin_commit("a.ts") else {
        panic!("expected write");
    };
    table.reconcile(&paths(&[]));
    table.close("a.ts");

    assert!(!table.finish_commit("a.ts", &snapshot, true));
    assert!(table.get("a.ts").is_none());
}
