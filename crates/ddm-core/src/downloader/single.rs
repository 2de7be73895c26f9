//! Single-stream HTTP GET downloader (non-Range fallback,).
//!
//! Writes the response body sequentially to storage. Used when ranges are
//! unsupported, the file is small, the ceiling is 1, or a partial file
//! already exists at the destination (`resume_from` becomes the `Range:
//! bytes=X-` start).

use anyhow::{Context, Result};
use crate::rate_limiter::RateLimiter;
use crate::storage::StorageWriter;
use crate::task::TaskSignals;
use super::CurlOptions;
use std::collections::HashMap;
use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Raised when the server answers a download request with an HTML page
/// (detected via `Content-Type: text/html`) instead of the expected binary
/// payload — typically a login wall or an error page behind a 200 status.
#[derive(Debug, thiserror::Error)]
#[error("server returned HTML (error page)")]
pub struct HtmlResponse;

/// Downloads a URL with a single GET, writing sequentially to `storage` starting
/// at `resume_from`. `rate_limiter` and `signals` are honored exactly as in
/// [`super::segment::download_one_segment`]. Returns the number of bytes written
/// (cumulative, including `resume_from`).
#[allow(clippy::too_many_arguments)]
pub fn download_single(
    url: &str,
    custom_headers: &HashMap<String, String>,
    storage: &StorageWriter,
    resume_from: u64,
    expected_len: Option<u64>,
    curl: CurlOptions,
    rate_limiter: Option<Arc<RateLimiter>>,
    signals: Option<Arc<TaskSignals>>,
    live_progress: Option<Arc<AtomicU64>>,
) -> Result<u64> {
    let offset = Arc::new(AtomicU64::new(resume_from));
    let offset_cb = Arc::clone(&offset);
    let storage = storage.clone();
    let content_type: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let content_type_header_cb = Arc::clone(&content_type);
    let content_type_write_cb = Arc::clone(&content_type);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    if let Some(speed) = curl.max_recv_speed {
        easy.max_recv_speed(speed).map_err(|e| anyhow::anyhow!("curl: {}", e))?;
    }
    if let Some(sz) = curl.buffer_size {
        easy.buffer_size(sz).map_err(|e| anyhow::anyhow!("curl: {}", e))?;
    }
    easy.connect_timeout(Duration::from_secs(30))?;
    easy.low_speed_limit(1024).map_err(|e| anyhow::anyhow!("curl: {}", e))?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.timeout(Duration::from_secs(3600))?;
    if resume_from > 0 {
        easy.range(&format!("{}-", resume_from))?;
    }

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(move |data| {
            if let Ok(line) = str::from_utf8(data) {
                if let Some(value) = line
                    .to_ascii_lowercase()
                    .strip_prefix("content-type:")
                    .map(|s| s.trim().to_string())
                {
                    *content_type_header_cb.lock().unwrap() = Some(value);
                }
            }
            true
        })?;
        transfer.write_function(move |data| {
            if let Some(ct) = content_type_cb_is_html(&content_type_write_cb) {
                if ct {
                    return Ok(0);
                }
            }
            if let Some(s) = &signals {
                while s.is_paused() && !s.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(200));
                }
                if s.is_cancelled() {
                    return Ok(0);
                }
            }
            let off = offset_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
            match storage.write_at(off, data) {
                Ok(()) => {
                    if let Some(rl) = &rate_limiter {
                        rl.consume_blocking(data.len() as u64);
                    }
                    if let Some(p) = &live_progress {
                        p.store(off + data.len() as u64, Ordering::Relaxed);
                    }
                    Ok(data.len())
                }
                Err(e) => {
                    tracing::warn!("single download write failed: {}", e);
                    Ok(0)
                }
            }
        })?;
        let perform_result = transfer.perform();
        // The write callback aborts the transfer (returns Ok(0)) the moment it
        // sees an HTML content type, which makes curl fail the transfer with a
        // generic "aborted by callback" error. Check for that condition first
        // so the typed `HtmlResponse` survives instead of being swallowed by
        // the abort's generic error.
        if content_type_cb_is_html(&content_type).unwrap_or(false) {
            return Err(HtmlResponse.into());
        }
        perform_result.context("GET request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if code < 200 || code >= 300 {
        anyhow::bail!("GET {} returned HTTP {}", url, code);
    }

    let written = offset.load(Ordering::Relaxed);
    if let Some(exp) = expected_len {
        if written != exp {
            anyhow::bail!("partial transfer: wrote {} of {}", written, exp);
        }
    }
    Ok(written)
}

fn content_type_cb_is_html(content_type: &Mutex<Option<String>>) -> Option<bool> {
    content_type
        .lock()
        .unwrap()
        .as_ref()
        .map(|ct| ct.starts_with("text/html"))
}

