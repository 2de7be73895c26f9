//! Live progress monitor run alongside a blocking fetch.
//!
//! The fetcher itself runs on a blocking thread (curl is synchronous); this
//! samples a shared byte counter from the async side so `TaskProgress`
//! (and therefore `getStats`/events) update smoothly instead of jumping
//! only when the blocking call returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::task::TaskProgress;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Polls `counter` (the live downloaded-byte total) every `SAMPLE_INTERVAL`
/// until `done` is observed true, reconciling `progress` and computing a
/// rolling speed. Call `done.store(true, ...)` once the blocking fetch
/// returns, then `.await` this future once more so the final sample lands.
pub async fn monitor(progress: Arc<TaskProgress>, counter: Arc<AtomicU64>, done: Arc<std::sync::atomic::AtomicBool>) {
    let mut last = counter.load(Ordering::Relaxed);
    let mut last_tick = tokio::time::Instant::now();
    loop {
        tokio::time::sleep(SAMPLE_INTERVAL).await;
        let now = counter.load(Ordering::Relaxed);
        let elapsed = last_tick.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let speed = ((now.saturating_sub(last)) as f64 / elapsed) as u64;
            progress.set_speed_bps(speed);
        }
        progress.set_downloaded(now);
        last = now;
        last_tick = tokio::time::Instant::now();
        if done.load(Ordering::Relaxed) {
            progress.set_downloaded(counter.load(Ordering::Relaxed));
            return;
        }
    }
}

/// Same idea as [`monitor`] but for the segmented path, where there is no
/// single running counter: `in_flight` holds one counter per segment,
/// updated only for segments incomplete at call time (see
/// `downloader::download_segments`). A segment's counter reaches its full
/// length on completion and is never reset, so live progress is simply
/// `completed_base` (bytes already on disk from segments complete *before*
/// this call) plus the live sum of `in_flight`.
pub async fn monitor_segments(
    progress: Arc<TaskProgress>,
    in_flight: Arc<Vec<AtomicU64>>,
    completed_base: u64,
    done: Arc<std::sync::atomic::AtomicBool>,
) {
    let sum = |v: &[AtomicU64]| v.iter().map(|c| c.load(Ordering::Relaxed)).sum::<u64>();
    let mut last = completed_base + sum(&in_flight);
    let mut last_tick = tokio::time::Instant::now();
    loop {
        tokio::time::sleep(SAMPLE_INTERVAL).await;
        let now = completed_base + sum(&in_flight);
        let elapsed = last_tick.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let speed = ((now.saturating_sub(last)) as f64 / elapsed) as u64;
            progress.set_speed_bps(speed);
        }
        progress.set_downloaded(now);
        last = now;
        last_tick = tokio::time::Instant::now();
        if done.load(Ordering::Relaxed) {
            progress.set_downloaded(completed_base + sum(&in_flight));
            return;
        }
    }
}
