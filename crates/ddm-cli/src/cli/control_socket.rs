//! Control socket: server (during `ddm run`) and client (every other command).
//!
//! A one-shot command like `ddm pause 3` mutates its own short-lived engine
//! and the durable mirror, but a live `ddm run` process holds its own
//! in-memory task registry and worker pool that never re-reads the database
//! mid-flight. Without this socket a paused task would keep being served by
//! a worker that already claimed it until the live process restarts. Each
//! one-shot command notifies the live process over this socket so it applies
//! the same signal to its in-memory copy immediately.
//!
//! Protocol: one line per command: "pause <id>", "resume <id>", "cancel <id>",
//! or "priority <id> <level>". Ignores malformed lines and unknown job ids.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use ddm_core::facade::JobFacade;
use ddm_core::task::Priority;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Spawns a task that listens on `path` and applies each incoming command to
/// `facade`'s live engine. Returns quietly (logging a warning) if the socket
/// cannot be bound, since the control socket is a convenience, not a
/// correctness requirement — the database mirror is still authoritative.
pub fn spawn_control_listener(facade: Arc<JobFacade>, path: impl AsRef<Path>) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let handle = tokio::spawn(async move {
        let _ = std::fs::remove_file(&path);
        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket bind: {}", e);
                return;
            }
        };
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let facade = Arc::clone(&facade);
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            apply_command(&facade, line.trim()).await;
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn apply_command(facade: &JobFacade, line: &str) {
    let mut parts = line.splitn(3, ' ');
    let (Some(cmd), Some(id_str)) = (parts.next(), parts.next()) else {
        return;
    };
    let Ok(id) = id_str.parse::<i64>() else {
        return;
    };
    let result = match cmd {
        "pause" => facade.pause(id).await,
        "resume" => facade.resume(id).await,
        "cancel" => facade.cancel(id).await,
        "priority" => match parts.next().and_then(parse_priority) {
            Some(level) => facade.set_priority(id, level).await,
            None => return,
        },
        _ => return,
    };
    if let Err(e) = result {
        tracing::debug!(%id, cmd, "control socket command failed: {}", e);
    }
}

fn parse_priority(s: &str) -> Option<Priority> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Some(Priority::Low),
        "normal" => Some(Priority::Normal),
        "high" => Some(Priority::High),
        "urgent" => Some(Priority::Urgent),
        _ => None,
    }
}

/// Sends a single command line to the control socket. No-op if no `ddm run`
/// process is listening.
pub async fn send_command(socket_path: &Path, line: &str) -> Result<()> {
    if !socket_path.exists() {
        return Ok(());
    }
    let Ok(mut stream) = UnixStream::connect(socket_path).await else {
        return Ok(());
    };
    stream.write_all(format!("{line}\n").as_bytes()).await?;
    Ok(())
}
