//! Link pre-checker: HEAD-probe with TTL cache, classifies availability
//! (TTL cache, LRU eviction at 1000 entries, status classification), using
//! `fetch_head` for the actual probe.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::fetch_head;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Available,
    Offline,
    TempOffline,
    RateLimited,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct LinkCheckResult {
    pub status: LinkStatus,
    pub size_bytes: Option<u64>,
    pub supports_ranges: bool,
    pub checked_at: Instant,
    pub error_message: Option<String>,
}

impl LinkCheckResult {
    pub fn is_available(&self) -> bool {
        self.status == LinkStatus::Available
    }
}

struct CacheEntry {
    result: LinkCheckResult,
}

pub struct LinkChecker {
    ttl: Duration,
    lru_cap: usize,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for LinkChecker {
    fn default() -> Self {
        LinkChecker::new(Duration::from_secs(300), 1000)
    }
}

impl LinkChecker {
    pub fn new(ttl: Duration, lru_cap: usize) -> Self {
        LinkChecker {
            ttl,
            lru_cap,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Checks `url`, consulting the TTL cache first. Performs the actual HEAD
    /// probe on a blocking thread (curl is synchronous).
    pub async fn check(&self, url: &str) -> LinkCheckResult {
        if let Some(cached) = self.cached(url) {
            return cached;
        }
        let result = self.probe(url).await;
        self.insert(url.to_string(), result.clone());
        result
    }

    fn cached(&self, url: &str) -> Option<LinkCheckResult> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(entry) = cache.get(url) {
            if entry.result.checked_at.elapsed() < self.ttl {
                return Some(entry.result.clone());
            }
            cache.remove(url);
        }
        None
    }

    fn insert(&self, url: String, result: LinkCheckResult) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(url, CacheEntry { result });
        if cache.len() > self.lru_cap {
            // Simple LRU: evict the oldest 10% by checked_at in one batch
            // rather than one entry at a time.
            let evict_n = (cache.len() / 10).max(1);
            let mut entries: Vec<(String, Instant)> = cache
                .iter()
                .map(|(k, v)| (k.clone(), v.result.checked_at))
                .collect();
            entries.sort_by_key(|(_, t)| *t);
            for (k, _) in entries.into_iter().take(evict_n) {
                cache.remove(&k);
            }
        }
    }

    async fn probe(&self, url: &str) -> LinkCheckResult {
        let url = url.to_string();
        let headers = HashMap::new();
        let probe_result =
            tokio::task::spawn_blocking(move || fetch_head::probe(&url, &headers)).await;

        let now = Instant::now();
        match probe_result {
            Ok(Ok(head)) => LinkCheckResult {
                status: LinkStatus::Available,
                size_bytes: head.content_length,
                supports_ranges: head.accept_ranges,
                checked_at: now,
                error_message: None,
            },
            Ok(Err(e)) => classify_error(&e.to_string(), now),
            Err(join_err) => LinkCheckResult {
                status: LinkStatus::Invalid,
                size_bytes: None,
                supports_ranges: false,
                checked_at: now,
                error_message: Some(join_err.to_string()),
            },
        }
    }

    pub fn clear(&self, url: Option<&str>) {
        let mut cache = self.cache.lock().unwrap();
        match url {
            Some(u) => {
                cache.remove(u);
            }
            None => cache.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

/// Maps a HEAD failure's message (carrying the HTTP status, since `fetch_head`
/// bails with `"HEAD {url} returned HTTP {code}"`) to a [`LinkStatus`], per
/// response-code table.
fn classify_error(message: &str, now: Instant) -> LinkCheckResult {
    let status = if let Some(code) = extract_http_code(message) {
        match code {
            404 | 410 => LinkStatus::Offline,
            429 => LinkStatus::RateLimited,
            500..=599 => LinkStatus::TempOffline,
            _ => LinkStatus::Invalid,
        }
    } else if message.to_ascii_lowercase().contains("timeout")
        || message.to_ascii_lowercase().contains("connect")
    {
        LinkStatus::TempOffline
    } else {
        LinkStatus::Invalid
    };
    LinkCheckResult {
        status,
        size_bytes: None,
        supports_ranges: false,
        checked_at: now,
        error_message: Some(message.to_string()),
    }
}

/// Pulls the HTTP status code out of a `fetch_head`/`downloader::single`
/// error message (both bail with `"... returned HTTP {code}"` rather than a
/// structured status), so the worker can special-case 404/410/416 without
/// duplicating this parsing.
pub(crate) fn extract_http_code(message: &str) -> Option<u32> {
    let idx = message.rfind("HTTP ")?;
    message[idx + 5..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}
