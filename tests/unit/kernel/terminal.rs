use super::*;
use crate::kernel::services::adapters::{MemoryRuntime, ProcessRecord};

fn shell() -> CommandSettings {
    CommandSettings {
        command: "jsh".to_string(),
        args: Vec::new(),
    }
}

fn runtime_with_shell() -> MemoryRuntime {
    let rt = MemoryRuntime::new();
    rt.register_program("jsh", |_| vec!["welcome\n".to_string()]);
    rt
}

async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn start_collects_output_and_echoes_input() {
    let rt = runtime_with_shell();
    let mut session = TerminalSession::new(1, 80, 24, 100);

    session.start(&rt, &shell()).await.unwrap();
    assert!(session.is_running());
    assert!(session.drain_output());
    assert_eq!(session.lines().collect::<Vec<_>>(), vec!["welcome"]);

    session.write_input("ls\n").unwrap();
    settle().await;
    assert!(session.drain_output());
    assert_eq!(session.lines().collect::<Vec<_>>(), vec!["welcome", "ls"]);
    assert!(!session.drain_output());
}

#[tokio::test]
async fn spawn_failure_is_recorded() {
    let rt = MemoryRuntime::new();
    let mut session = TerminalSession::new(1, 80, 24, 100);

    let err = session.start(&rt, &shell()).await.unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
    assert!(matches!(session.status, SessionStatus::Failed(_)));
    assert_eq!(session.write_input("x"), Err(ProcessError::Closed));
}

#[test]
fn input_before_start_is_rejected() {
    let session = TerminalSession::new(1, 80, 24, 100);
    assert_eq!(session.status, SessionStatus::Idle);
    assert_eq!(session.write_input("ls\n"), Err(ProcessError::Closed));
}

#[tokio::test]
async fn resize_reaches_the_process() {
    let rt = runtime_with_shell();
    let mut session = TerminalSession::new(1, 80, 24, 100);
    session.start(&rt, &shell()).await.unwrap();

    assert!(session.resize(100, 40));
    assert!(!session.resize(100, 40));
    assert!(rt.process_log().contains(&ProcessRecord::Resized {
        command: "jsh".to_string(),
        cols: 100,
        rows: 40,
    }));

    assert!(session.resize(0, 0));
    assert_eq!((session.cols, session.rows), (1, 1));
}

#[test]
fn scrollback_is_bounded() {
    let mut session = TerminalSession::new(1, 80, 2, 3);
    assert!(session.process_output("a\nb\nc\nd\n"));
    assert_eq!(session.lines().collect::<Vec<_>>(), vec!["b", "c", "d"]);
    assert_eq!(session.visible_rows(), vec!["c", "d"]);
}

#[test]
fn partial_lines_and_crlf() {
    let mut session = TerminalSession::new(1, 80, 24, 10);
    session.process_output("hel");
    assert_eq!(session.lines().collect::<Vec<_>>(), vec!["hel"]);
    session.process_output("lo\r\nwor");
    assert_eq!(session.lines().collect::<Vec<_>>(), vec!["hello", "wor"]);
    assert!(!session.process_output(""));
}

#[tokio::test]
async fn dispose_kills_process() {
    let rt = runtime_with_shell();
    let mut session = TerminalSession::new(1, 80, 24, 100);
    session.start(&rt, &shell()).await.unwrap();

    session.dispose();
    session.dispose();
    assert_eq!(session.status, SessionStatus::Exited(None));
    assert_eq!(session.write_input("x"), Err(ProcessError::Closed));
    let kills = rt
        .process_log()
        .into_iter()
        .filter(|r| matches!(r, ProcessRecord::Killed(_)))
        .count();
    assert_eq!(kills, 1);
}

#[tokio::test]
async fn removing_session_kills_and_moves_focus() {
    let rt = runtime_with_shell();
    let mut state = TerminalState::new(100);
    let first = state.open_session(80, 24);
    let second = state.open_session(80, 24);
    assert_eq!(state.active, Some(second));

    state
        .active_session_mut()
        .unwrap()
        .start(&rt, &shell())
        .await
        .unwrap();
    assert!(state.drain_all());

    assert!(state.remove_session(second));
    assert_eq!(state.active, Some(first));
    assert!(!state.remove_session(second));
    assert!(rt
        .process_log()
        .contains(&ProcessRecord::Killed("jsh".to_string())));
}
