//! Per-task fetch driver: HEAD probe, resume decision,
//! segmented-or-single-stream dispatch, and the resulting state transition.
//!
//! Follows a probe → validate → plan → execute → classify pipeline, with an
//! error-downcast step at the end that tells a cooperative abort (pause or
//! cancel) apart from a genuine transfer failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::Result;

use crate::balancer::{AccountBalancer, AccountSource, AcquiredAccount};
use crate::config::DdmConfig;
use crate::downloader::{self, CurlOptions};
use crate::events::EventBus;
use crate::fetch_head::{self, HeadResult};
use crate::host_policy::HostPolicy;
use crate::rate_limiter::RateLimiter;
use crate::resolver::LinkResolver;
use crate::retry::{RetryPolicy, SegmentError};
use crate::safe_resume::{validate_for_resume, StoredMetadata};
use crate::segmenter::{self, SegmentBitmap};
use crate::storage::{self, StorageWriter, StorageWriterBuilder};
use crate::store::{MirrorRow, TaskStore};
use crate::task::{Task, TaskId, TaskRegistry, TaskState};

use super::progress;

/// Everything a fetch needs that outlives any single task: shared with the
/// engine and every other worker in the pool.
pub struct WorkerContext {
    pub registry: Arc<TaskRegistry>,
    pub store: Arc<TaskStore>,
    pub events: Arc<EventBus>,
    pub rate_limiter: Arc<RateLimiter>,
    pub host_policy: Arc<Mutex<HostPolicy>>,
    pub config: DdmConfig,
    pub resolver: Option<Arc<dyn LinkResolver>>,
    /// Present only when the engine was started with an `AccountSource`
    ///; a generic direct-URL task (no host accounts) leaves
    /// both `None` and the balancer sits idle.
    pub balancer: Option<Arc<AccountBalancer>>,
    pub account_source: Option<Arc<dyn AccountSource>>,
}

/// Acquires an account for this attempt, if the engine was wired with a
/// balancer and account source. Released by the caller once the fetch
/// finishes, success or failure.
fn acquire_account(ctx: &WorkerContext) -> Option<AcquiredAccount> {
    let balancer = ctx.balancer.as_ref()?;
    let source = ctx.account_source.as_ref()?;
    balancer.acquire(source.as_ref())
}

/// How a failed fetch attempt maps onto the task state machine.
enum FetchFailure {
    Offline,
    Completed,
    Waiting,
    Failed(String),
}

/// Classifies an error surfaced by `download_segments`/`download_single` into
/// a state transition. Checked in order: a known `HtmlResponse`/`SegmentError`
/// carried intact through `anyhow`'s context chain, then the HTTP status
/// parsed back out of a plain message (`fetch_head`/`download_single` both
/// bail with `"... returned HTTP {code}"`).
fn classify_fetch_error(e: &anyhow::Error) -> FetchFailure {
    if e.downcast_ref::<downloader::single::HtmlResponse>().is_some() {
        return FetchFailure::Failed("server returned an HTML page instead of the file".into());
    }
    if let Some(se) = e.downcast_ref::<SegmentError>() {
        if let SegmentError::Http(code) = se {
            return classify_http_code(*code);
        }
        return match crate::retry::classify(se) {
            crate::retry::ErrorKind::Other => FetchFailure::Failed(e.to_string()),
            _ => FetchFailure::Waiting,
        };
    }
    if let Some(code) = crate::precheck::extract_http_code(&e.to_string()) {
        return classify_http_code(code);
    }
    FetchFailure::Failed(e.to_string())
}

/// HTTP status → state transition. 404/410 mean
/// the host itself is gone (`Offline`); 416 means the range we asked for
/// isn't satisfiable, i.e. the file is already whole (`Completed`); 429 and
/// 5xx are transient (`Waiting` with backoff); anything else is a diagnostic
/// dead end, not auto-retried.
fn classify_http_code(code: u32) -> FetchFailure {
    match code {
        404 | 410 => FetchFailure::Offline,
        416 => FetchFailure::Completed,
        429 | 500..=599 => FetchFailure::Waiting,
        _ => FetchFailure::Failed(format!("HTTP {}", code)),
    }
}

fn backoff_wait_until(cfg: &DdmConfig, retry_count: u32) -> SystemTime {
    let secs = (cfg.backoff_multiplier_secs.saturating_mul(retry_count as u64)).min(cfg.backoff_max_secs);
    SystemTime::now() + Duration::from_secs(secs)
}

/// Writes the task's current state back to the durable mirror and fans the
/// change out over the event bus. Best-effort: a store failure is logged,
/// never propagated, since the in-memory registry is always authoritative
/// for a running process.
async fn persist_and_emit(ctx: &WorkerContext, task_id: &str) {
    let Some(task) = ctx.registry.get(task_id) else { return };
    if let Err(e) = ctx.store.upsert(&MirrorRow::from(&task)).await {
        tracing::warn!(task_id, error = %e, "failed to persist task state");
    }
    ctx.events
        .publish_task_updated(task_id, crate::events::task_event_map(&task));
}

/// Drives one task from wherever it currently sits through to a terminal (or
/// waiting/paused) state. Called by a pool worker with a task popped off the
/// priority queue; returns once the task is no longer actively downloading.
pub async fn run_task(ctx: Arc<WorkerContext>, task_id: TaskId) {
    let Some(task) = ctx.registry.get(&task_id) else { return };

    if task.signals.is_cancelled() {
        ctx.registry.update(&task_id, |t| t.state = TaskState::Cancelled);
        persist_and_emit(&ctx, &task_id).await;
        return;
    }
    if task.signals.is_paused() {
        ctx.registry.update(&task_id, |t| t.state = TaskState::Paused);
        persist_and_emit(&ctx, &task_id).await;
        return;
    }

    ctx.registry.update(&task_id, |t| {
        t.state = TaskState::Starting;
        if t.started_at.is_none() {
            t.started_at = Some(SystemTime::now());
        }
    });
    persist_and_emit(&ctx, &task_id).await;

    let mut url = task.url.clone();
    let mut headers = task.headers.clone();

    if let Some(resolver) = ctx.resolver.clone() {
        let host_url = url.clone();
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve(&host_url)).await;
        match resolved {
            Ok(Ok(link)) => {
                url = link.direct_url;
                for (k, v) in link.headers {
                    headers.insert(k, v);
                }
            }
            Ok(Err(e)) => {
                finish_with_error(&ctx, &task_id, &e.context("resolving link")).await;
                return;
            }
            Err(join_err) => {
                finish_with_error(
                    &ctx,
                    &task_id,
                    &anyhow::anyhow!("link resolver panicked: {}", join_err),
                )
                .await;
                return;
            }
        }
    }

    let head = {
        let probe_url = url.clone();
        let probe_headers = headers.clone();
        tokio::task::spawn_blocking(move || fetch_head::probe(&probe_url, &probe_headers)).await
    };

    let head = match head {
        Ok(Ok(h)) => h,
        Ok(Err(e)) => {
            finish_with_error(&ctx, &task_id, &e).await;
            return;
        }
        Err(join_err) => {
            finish_with_error(&ctx, &task_id, &anyhow::anyhow!("HEAD probe panicked: {}", join_err)).await;
            return;
        }
    };

    {
        let mut policy = ctx.host_policy.lock().unwrap();
        let _ = policy.record_head_result(&url, &head);
    }

    let acquired = acquire_account(&ctx);
    let result = run_fetch(&ctx, &task_id, &url, &headers, &head).await;
    if let Some(acc) = &acquired {
        let success = result.is_ok();
        let err_text = result.as_ref().err().map(|e| e.to_string());
        ctx.balancer
            .as_ref()
            .expect("balancer present when acquire_account returned Some")
            .release(&acc.email, success, err_text.as_deref());
    }
    if let Err(e) = result {
        finish_with_error(&ctx, &task_id, &e).await;
    }
}

/// Verifies `path` against the task's expected SHA-256, when both
/// `DdmConfig::verify_checksum` is enabled and the caller supplied one at
/// submission. A mismatch surfaces as an error so the caller fails the task
/// instead of finalizing a corrupt file.
async fn verify_checksum_if_configured(ctx: &WorkerContext, task_id: &str, path: &std::path::Path) -> Result<()> {
    if !ctx.config.verify_checksum {
        return Ok(());
    }
    let Some(expected) = ctx.registry.get(task_id).and_then(|t| t.expected_sha256) else {
        return Ok(());
    };
    let path = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || crate::checksum::sha256_path(&path))
        .await
        .map_err(|join_err| anyhow::anyhow!("checksum computation panicked: {}", join_err))??;
    if !actual.eq_ignore_ascii_case(&expected) {
        anyhow::bail!("checksum mismatch: expected {}, got {}", expected, actual);
    }
    Ok(())
}

/// The actual transfer, isolated from `run_task` so every exit path (success,
/// classified failure, I/O setup error) funnels through one `Result`.
async fn run_fetch(
    ctx: &WorkerContext,
    task_id: &str,
    url: &str,
    headers: &HashMap<String, String>,
    head: &HeadResult,
) -> Result<()> {
    let Some(task) = ctx.registry.get(task_id) else { return Ok(()) };

    let final_path = task.destination.clone();
    let temp_path = storage::temp_path(&final_path);
    let local_size = tokio::fs::metadata(&temp_path).await.map(|m| m.len()).unwrap_or(0);
    let remote_size = head.content_length;

    // Smart match: the file on disk is already exactly the remote
    // size. Finalize without fetching a single byte.
    if let Some(remote) = remote_size {
        if local_size == remote && remote > 0 {
            verify_checksum_if_configured(ctx, task_id, &temp_path).await?;
            let writer = StorageWriter::open_existing(&temp_path)?;
            writer.finalize(&final_path)?;
            ctx.registry.update(task_id, |t| {
                t.progress.set_total(remote);
                t.progress.set_downloaded(remote);
                t.state = TaskState::Completed;
                t.completed_at = Some(SystemTime::now());
            });
            persist_and_emit(ctx, task_id).await;
            return Ok(());
        }
    }

    // Integrity case: local file is larger than the remote, or the remote
    // size is unknown on what would otherwise be a resume. Trust nothing;
    // restart from zero.
    let mut local_size = local_size;
    let oversized = remote_size.map(|remote| local_size > remote).unwrap_or(local_size > 0);
    if oversized {
        local_size = 0;
    }

    // Safe resume: a changed ETag/Last-Modified/size invalidates whatever is
    // on disk just as surely as an oversized file would.
    if local_size > 0 {
        let stored = StoredMetadata {
            total_size: task.progress.total(),
            etag: task.etag.as_deref(),
            last_modified: task.last_modified.as_deref(),
        };
        if validate_for_resume(stored, head).is_err() {
            local_size = 0;
        }
    }

    if local_size == 0 {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }

    ctx.registry.update(task_id, |t| {
        t.progress.set_total(remote_size.unwrap_or(0));
        t.etag = head.etag.clone();
        t.last_modified = head.last_modified.clone();
        t.state = TaskState::Downloading;
    });
    persist_and_emit(ctx, task_id).await;

    // Resume always goes through the single-stream path: the segment bitmap
    // lives only in memory for the lifetime of one segmented run, so there
    // is nothing to reconstruct across a restart.
    let use_segments = local_size == 0
        && head.accept_ranges
        && remote_size.map(|s| s >= ctx.config.small_file_threshold_bytes).unwrap_or(false);

    let outcome = if use_segments {
        run_segmented(ctx, task_id, url, headers, remote_size.unwrap()).await
    } else {
        run_single_stream(ctx, task_id, url, headers, local_size, remote_size).await
    };

    match outcome {
        Ok(FetchOutcome::Completed) => {
            let final_path = ctx.registry.get(task_id).map(|t| t.destination.clone());
            if let Some(final_path) = final_path {
                let writer = StorageWriter::open_existing(&temp_path)?;
                writer.sync()?;
                verify_checksum_if_configured(ctx, task_id, &temp_path).await?;
                writer.finalize(&final_path)?;
            }
            ctx.registry.update(task_id, |t| {
                t.state = TaskState::Completed;
                t.completed_at = Some(SystemTime::now());
            });
            persist_and_emit(ctx, task_id).await;
            Ok(())
        }
        // Cancel/pause already applied its own state transition and persisted it.
        Ok(FetchOutcome::AlreadyHandled) => Ok(()),
        Err(e) => Err(e),
    }
}

/// How a fetch path's `Result` should be read by `run_fetch`: a plain `Err`
/// always means "classify and fail", but a clean `Ok` needs to distinguish an
/// actual completed transfer from a cooperative cancel/pause that already
/// applied its own state transition (neither of which should be finalized).
enum FetchOutcome {
    Completed,
    AlreadyHandled,
}

async fn run_segmented(
    ctx: &WorkerContext,
    task_id: &str,
    url: &str,
    headers: &HashMap<String, String>,
    total_size: u64,
) -> Result<FetchOutcome> {
    let Some(task) = ctx.registry.get(task_id) else { return Ok(FetchOutcome::AlreadyHandled) };
    let final_path = task.destination.clone();
    let temp_path = storage::temp_path(&final_path);

    let c_max = (ctx.config.max_segments.min(8)).max(1) as u32;
    let segment_count = segmenter::select_segment_count(total_size, c_max);
    ctx.registry.update(task_id, |t| t.segment_count = segment_count);

    let segments = segmenter::plan_segments(total_size, segment_count as usize);
    let mut bitmap = SegmentBitmap::new(segments.len());

    // File creation and preallocation are blocking syscalls; offload them
    // from the async runtime thread the same way the transfer itself runs
    // on a blocking thread below.
    let prealloc_path = temp_path.clone();
    let storage = tokio::task::spawn_blocking(move || -> Result<StorageWriter> {
        let mut builder = StorageWriterBuilder::create(&prealloc_path)?;
        builder.preallocate(total_size)?;
        Ok(builder.build())
    })
    .await
    .map_err(|join_err| anyhow::anyhow!("preallocation panicked: {}", join_err))??;

    let in_flight: Arc<Vec<AtomicU64>> = Arc::new(segments.iter().map(|_| AtomicU64::new(0)).collect());
    let done = Arc::new(AtomicBool::new(false));
    let monitor_handle = tokio::spawn(progress::monitor_segments(
        Arc::clone(&task.progress),
        Arc::clone(&in_flight),
        0,
        Arc::clone(&done),
    ));

    let retry_policy = RetryPolicy::default();
    let curl = CurlOptions::default();
    let url_owned = url.to_string();
    let headers_owned = headers.clone();
    let rate_limiter = Arc::clone(&ctx.rate_limiter);
    let signals = Arc::clone(&task.signals);
    let in_flight_blocking = Arc::clone(&in_flight);

    let result = tokio::task::spawn_blocking(move || {
        let mut summary = downloader::DownloadSummary::default();
        let r = downloader::download_segments(
            &url_owned,
            &headers_owned,
            &segments,
            &storage,
            &mut bitmap,
            None,
            Some(&retry_policy),
            &mut summary,
            None,
            Some(in_flight_blocking),
            None,
            curl,
            Some(rate_limiter),
            Some(signals),
        );
        (r, bitmap, summary)
    })
    .await;

    done.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = monitor_handle.await;

    let (r, bitmap, summary) = match result {
        Ok(triple) => triple,
        Err(join_err) => return Err(anyhow::anyhow!("segmented fetch panicked: {}", join_err)),
    };

    {
        let mut policy = ctx.host_policy.lock().unwrap();
        let elapsed = task
            .started_at
            .and_then(|s| SystemTime::now().duration_since(s).ok())
            .unwrap_or_default();
        let _ = policy.record_job_outcome(url, segment_count as usize, total_size, elapsed, summary.throttle_events, summary.error_events);
    }

    match r {
        Ok(()) => {
            if bitmap.all_completed(segments_len(segment_count)) {
                Ok(FetchOutcome::Completed)
            } else if task.signals.is_cancelled() {
                handle_transfer_failure(ctx, task_id, &task, anyhow::anyhow!(downloader::Aborted)).await
            } else {
                Err(anyhow::anyhow!("segmented fetch returned without completing all segments"))
            }
        }
        Err(e) => handle_transfer_failure(ctx, task_id, &task, e).await,
    }
}

fn segments_len(segment_count: u32) -> usize {
    segment_count as usize
}

async fn run_single_stream(
    ctx: &WorkerContext,
    task_id: &str,
    url: &str,
    headers: &HashMap<String, String>,
    resume_from: u64,
    expected_len: Option<u64>,
) -> Result<FetchOutcome> {
    let Some(task) = ctx.registry.get(task_id) else { return Ok(FetchOutcome::AlreadyHandled) };
    let final_path = task.destination.clone();
    let temp_path = storage::temp_path(&final_path);

    let prealloc_path = temp_path.clone();
    let storage = tokio::task::spawn_blocking(move || -> Result<StorageWriter> {
        if resume_from > 0 {
            StorageWriter::open_existing(&prealloc_path)
        } else {
            // Single-stream writes land sequentially at an always-increasing
            // offset, so unlike the segmented path there is no need to
            // pre-allocate the full size up front (E2E scenario 1, spec §8).
            let builder = StorageWriterBuilder::create(&prealloc_path)?;
            Ok(builder.build())
        }
    })
    .await
    .map_err(|join_err| anyhow::anyhow!("temp file setup panicked: {}", join_err))??;

    task.progress.set_downloaded(resume_from);

    let live_progress = Arc::new(AtomicU64::new(resume_from));
    let done = Arc::new(AtomicBool::new(false));
    let monitor_handle = tokio::spawn(progress::monitor(
        Arc::clone(&task.progress),
        Arc::clone(&live_progress),
        Arc::clone(&done),
    ));

    let url = url.to_string();
    let headers = headers.clone();
    let curl = CurlOptions::default();
    let rate_limiter = Arc::clone(&ctx.rate_limiter);
    let signals = Arc::clone(&task.signals);
    let live_progress_blocking = Arc::clone(&live_progress);

    let result = tokio::task::spawn_blocking(move || {
        downloader::single::download_single(
            &url,
            &headers,
            &storage,
            resume_from,
            expected_len,
            curl,
            Some(rate_limiter),
            Some(signals),
            Some(live_progress_blocking),
        )
    })
    .await;

    done.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = monitor_handle.await;

    match result {
        Ok(Ok(_written)) => Ok(FetchOutcome::Completed),
        Ok(Err(e)) => handle_transfer_failure(ctx, task_id, &task, e).await,
        Err(join_err) => Err(anyhow::anyhow!("single-stream fetch panicked: {}", join_err)),
    }
}

/// Shared tail of both fetch paths: cancel beats pause beats a classified
/// error. Cancel/pause apply their own state transition
/// inline and report `AlreadyHandled` so `run_fetch` does not also finalize
/// the (incomplete) temp file as if the transfer had succeeded.
async fn handle_transfer_failure(ctx: &WorkerContext, task_id: &str, task: &Task, e: anyhow::Error) -> Result<FetchOutcome> {
    if task.signals.is_cancelled() {
        storage::remove_artifacts(&task.destination);
        ctx.registry.update(task_id, |t| t.state = TaskState::Cancelled);
        persist_and_emit(ctx, task_id).await;
        return Ok(FetchOutcome::AlreadyHandled);
    }
    if task.signals.is_paused() {
        ctx.registry.update(task_id, |t| t.state = TaskState::Paused);
        persist_and_emit(ctx, task_id).await;
        return Ok(FetchOutcome::AlreadyHandled);
    }
    Err(e)
}

/// Applies a classified failure to the task and persists it. Called for every
/// error that escapes `run_fetch` (HEAD probe failure or an unhandled
/// transfer error), never for a cooperative cancel/pause, which short-circuit
/// earlier via `handle_transfer_failure`.
async fn finish_with_error(ctx: &WorkerContext, task_id: &str, e: &anyhow::Error) {
    let cfg = &ctx.config;
    match classify_fetch_error(e) {
        FetchFailure::Offline => {
            ctx.registry.update(task_id, |t| {
                t.state = TaskState::Offline;
                t.last_error = Some(e.to_string());
            });
        }
        FetchFailure::Completed => {
            if let Some(task) = ctx.registry.get(task_id) {
                let temp_path = storage::temp_path(&task.destination);
                if let Ok(writer) = StorageWriter::open_existing(&temp_path) {
                    let _ = writer.finalize(&task.destination);
                }
            }
            ctx.registry.update(task_id, |t| {
                t.state = TaskState::Completed;
                t.completed_at = Some(SystemTime::now());
            });
        }
        FetchFailure::Waiting => {
            ctx.registry.update(task_id, |t| {
                t.retry_count += 1;
                t.wait_until = Some(backoff_wait_until(cfg, t.retry_count));
                t.state = TaskState::Waiting;
                t.last_error = Some(e.to_string());
            });
        }
        FetchFailure::Failed(msg) => {
            ctx.registry.update(task_id, |t| {
                t.state = TaskState::Failed;
                t.last_error = Some(msg);
            });
        }
    }
    persist_and_emit(ctx, task_id).await;
}
