//! Single-segment HTTP Range GET and write to storage.

use crate::rate_limiter::RateLimiter;
use crate::retry::SegmentError;
use crate::segmenter::Segment;
use crate::storage::StorageWriter;
use crate::task::TaskSignals;
use super::CurlOptions;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of a single segment download (used for retry classification).
pub(super) type SegmentResult = Result<(), SegmentError>;

/// Downloads a single segment: GET with Range header, write body to storage at segment offset.
/// `in_flight` is `(shared in-flight byte counters, this segment's index)`, updated as bytes
/// arrive so the caller can report live aggregate throughput across segments.
/// `rate_limiter`, if given, is consumed (blocking) after every chunk write step 4.
/// `signals`, if given, is checked between chunks: pause blocks cooperatively, cancel aborts the
/// transfer by returning a short write (surfaces as a `PartialTransfer`, never retried as such by
/// the caller since the worker checks `is_cancelled()` itself once the segment returns).
/// Returns `SegmentError` so callers can classify and retry with backoff.
#[allow(clippy::too_many_arguments)]
pub(super) fn download_one_segment(
    url: &str,
    custom_headers: &HashMap<String, String>,
    segment: &Segment,
    storage: &StorageWriter,
    in_flight: Option<(Arc<Vec<AtomicU64>>, usize)>,
    curl: CurlOptions,
    rate_limiter: Option<Arc<RateLimiter>>,
    signals: Option<Arc<TaskSignals>>,
) -> SegmentResult {
    let bytes_written = Arc::new(AtomicU64::new(0));
    let bytes_written_in_cb = Arc::clone(&bytes_written);
    let storage_error: Arc<Mutex<Option<std::io::Error>>> = Arc::new(Mutex::new(None));
    let storage_error_cb = Arc::clone(&storage_error);
    let segment_start = segment.start;
    let storage = storage.clone();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.connect_timeout(Duration::from_secs(30))
        .map_err(SegmentError::Curl)?;
    if let Some(speed) = curl.max_recv_speed {
        easy.max_recv_speed(speed).map_err(SegmentError::Curl)?;
    }
    if let Some(sz) = curl.buffer_size {
        easy.buffer_size(sz).map_err(SegmentError::Curl)?;
    }
    // Prefer low-speed timeout: abort if throughput drops below 1 KiB/s for 60s.
    // Keeps large segments on slow links from being killed by a hard wall-clock timeout.
    easy.low_speed_limit(1024)
        .map_err(SegmentError::Curl)?;
    easy.low_speed_time(Duration::from_secs(60))
        .map_err(SegmentError::Curl)?;
    // Safety net: hard timeout after 1 hour so a completely stuck transfer eventually fails.
    easy.timeout(Duration::from_secs(3600))
        .map_err(SegmentError::Curl)?;

    let range_str = format!("{}-{}", segment.start, segment.end.saturating_sub(1));
    easy.range(&range_str).map_err(SegmentError::Curl)?;

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(SegmentError::Curl)?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list).map_err(SegmentError::Curl)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(move |data| {
                if let Some(s) = &signals {
                    while s.is_paused() && !s.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(200));
                    }
                    if s.is_cancelled() {
                        return Ok(0);
                    }
                }
                let off = bytes_written_in_cb.fetch_add(data.len() as u64, Ordering::Relaxed);
                if let Some((counters, index)) = &in_flight {
                    if let Some(counter) = counters.get(*index) {
                        counter.fetch_add(data.len() as u64, Ordering::Relaxed);
                    }
                }
                match storage.write_at(segment_start + off, data) {
                    Ok(()) => {
                        if let Some(rl) = &rate_limiter {
                            rl.consume_blocking(data.len() as u64);
                        }
                        Ok(data.len())
                    }
                    Err(e) => {
                        let io_err = e
                            .downcast::<std::io::Error>()
                            .unwrap_or_else(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                        let _ = storage_error_cb.lock().unwrap().replace(io_err);
                        Ok(0)
                    }
                }
            })
            .map_err(SegmentError::Curl)?;
        let perform_result = transfer.perform();
        if let Err(e) = perform_result {
            if e.is_write_error() {
                if let Some(io_err) = storage_error.lock().unwrap().take() {
                    return Err(SegmentError::Storage(io_err));
                }
            }
            return Err(SegmentError::Curl(e));
        }
    }

    let code = easy.response_code().map_err(SegmentError::Curl)? as u32;
    if code < 200 || code >= 300 {
        return Err(SegmentError::Http(code));
    }

    let received = bytes_written.load(Ordering::Relaxed);
    let expected = segment.len();
    if received != expected {
        return Err(SegmentError::PartialTransfer { expected, received });
    }

    Ok(())
}

/// Parses the HTTP status code out of a response's raw header lines (the
/// first of which is the status line, e.g. `"HTTP/1.1 206 Partial Content"`).
pub(super) fn parse_http_status(headers: &[String]) -> Option<u32> {
    let status_line = headers.iter().find(|l| l.to_ascii_uppercase().starts_with("HTTP/"))?;
    status_line.split_whitespace().nth(1)?.parse().ok()
}

/// Parses a `Content-Range: bytes START-END/TOTAL` header, case-insensitively,
/// returning `(start, end)` (end inclusive) if present and well-formed.
pub(super) fn parse_content_range(headers: &[String]) -> Option<(u64, u64)> {
    let line = headers.iter().find(|l| l.to_ascii_lowercase().starts_with("content-range:"))?;
    let value = line.splitn(2, ':').nth(1)?.trim();
    let range = value.strip_prefix("bytes ")?;
    let (range, _total) = range.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
