//! `ddm run` – start the engine's worker pool and process queued jobs until
//! interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ddm_core::engine::{DownloadEngine, EngineStats};
use ddm_core::facade::JobFacade;

use crate::cli::control_socket;

const STATS_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_run(engine: Arc<DownloadEngine>, facade: Arc<JobFacade>) -> Result<()> {
    let socket_path = ddm_core::config::control_socket_path()?;
    if control_socket::spawn_control_listener(Arc::clone(&facade), &socket_path).is_ok() {
        tracing::debug!(path = %socket_path.display(), "control socket listening");
    }

    println!("ddm run: {} worker(s)", engine.get_stats().worker_count);

    let mut interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => print_stats(&engine.get_stats()),
            _ = tokio::signal::ctrl_c() => {
                println!();
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    engine.shutdown().await;
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

fn print_stats(stats: &EngineStats) {
    let rate = stats
        .rate_limiter
        .rate_bytes_per_sec
        .map(|r| format!("{:.2} MiB/s cap", r as f64 / 1_048_576.0))
        .unwrap_or_else(|| "unthrottled".to_string());
    print!(
        "\r  {} active, {} queued, {} total ({})  ",
        stats.active_tasks, stats.queued_tasks, stats.total_tasks, rate
    );
    use std::io::Write;
    let _ = std::io::stdout().flush();
}
