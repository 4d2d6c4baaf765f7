use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use idex::kernel::services::adapters::{load_settings, LoadedSettings, LocalRuntime};
use idex::kernel::services::ports::SandboxRuntime;
use idex::kernel::services::{workspace_bus, RuntimeHost, WorkspaceEvent};
use idex::kernel::{reconciler, PreviewServer, Workspace};
use idex::models::file_tree::count_files;

mod logging;

struct Args {
    root: Option<PathBuf>,
    serve: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        root: None,
        serve: false,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--serve" => args.serve = true,
            _ => args.root = Some(PathBuf::from(arg)),
        }
    }
    args
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let args = parse_args();
    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("not a directory: {}", root.display()),
        ));
    }

    let LoadedSettings { settings, fallback } = load_settings();
    let _logging = logging::init(settings.log_filter.as_deref());
    if let Some(e) = fallback {
        tracing::warn!(error = %e, "settings unreadable, using defaults");
    }

    let host = Arc::new(RuntimeHost::new());
    let boot_root = root.clone();
    let runtime = host
        .boot(|| async move {
            let runtime: Arc<dyn SandboxRuntime> = Arc::new(LocalRuntime::new(&boot_root));
            Ok(runtime)
        })
        .await
        .map_err(|e| io::Error::other(e.to_string()))?;
    tracing::info!(root = %root.display(), "workspace opened");

    let workspace = Arc::new(Workspace::new(Arc::clone(&host), workspace_bus()));
    let mut events = workspace.subscribe();
    let mut reconciler = reconciler::spawn(Arc::clone(&workspace), settings.reconciler.clone());

    let mut preview = if args.serve {
        PreviewServer::launch(runtime.as_ref(), &settings.preview).await
    } else {
        PreviewServer::idle()
    };
    let mut preview_url = host.watch_preview();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            changed = preview_url.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = preview_url.borrow_and_update().clone();
                if let Some(url) = current {
                    tracing::info!(port = url.port, url = %url.url, "preview available");
                }
            }
        }
    }

    reconciler.dispose();
    reconciler.join().await;
    preview.stop().await;
    Ok(())
}

fn log_event(event: &WorkspaceEvent) {
    match event {
        WorkspaceEvent::TreeChanged(tree) => {
            tracing::info!(files = count_files(tree), "tree changed");
        }
        WorkspaceEvent::TableChanged(entries) => {
            let dirty = entries.iter().filter(|e| e.is_dirty()).count();
            tracing::info!(open = entries.len(), dirty, "open files changed");
        }
        WorkspaceEvent::CommitFailed { path, error } => {
            tracing::error!(path = %path, error = %error, "commit failed");
        }
        WorkspaceEvent::WatchFailed(error) => {
            tracing::warn!(error = %error, "file watching unavailable, no auto-refresh");
        }
        WorkspaceEvent::ReconcilerStateChanged(state) => {
            tracing::info!(state = ?state, "reconciler state changed");
        }
    }
}
