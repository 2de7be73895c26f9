//! Account balancer: round-robin over host accounts with health tracking
//! (round-robin index, 3-consecutive-failures disable, quota/ban text
//! matching), shaped like `host_policy::state`: a `HashMap<Key, Entry>`
//! guarded by one lock, `acquire`/`release` instead of `record_*`.

mod status;

pub use status::AccountStatus;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Collaborator the balancer delegates to for account enumeration and
/// client construction (`listAccounts()`, `clientFor(email)`).
pub trait AccountSource: Send + Sync {
    fn list_accounts(&self) -> Vec<String>;
    /// Opaque per-account client handle. The balancer treats it as a token;
    /// it never inspects or caches it beyond the one acquisition.
    fn client_for(&self, email: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct AcquiredAccount {
    pub email: String,
    pub client: String,
}

pub struct AccountBalancer {
    max_per_account: u32,
    statuses: Mutex<HashMap<String, AccountStatus>>,
    round_robin: Mutex<usize>,
}

impl AccountBalancer {
    pub fn new(max_per_account: u32) -> Self {
        AccountBalancer {
            max_per_account,
            statuses: Mutex::new(HashMap::new()),
            round_robin: Mutex::new(0),
        }
    }

    fn refresh(&self, source: &dyn AccountSource) {
        let emails = source.list_accounts();
        let mut statuses = self.statuses.lock().unwrap();
        for email in &emails {
            statuses
                .entry(email.clone())
                .or_insert_with(|| AccountStatus::new(email.clone()));
        }
        statuses.retain(|email, _| emails.contains(email));
    }

    /// Round-robins over accounts that are available, not quota-exhausted
    /// (or whose reset time has passed), and below their concurrency cap.
    pub fn acquire(&self, source: &dyn AccountSource) -> Option<AcquiredAccount> {
        self.refresh(source);
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.is_empty() {
            return None;
        }
        let mut emails: Vec<String> = statuses.keys().cloned().collect();
        emails.sort();
        let len = emails.len();
        let mut idx = self.round_robin.lock().unwrap();

        for _ in 0..len {
            let email = &emails[*idx % len];
            *idx = (*idx + 1) % len;
            let status = statuses.get_mut(email).unwrap();
            if !status.is_available(self.max_per_account) {
                continue;
            }
            if let Some(client) = source.client_for(email) {
                status.current_downloads += 1;
                status.total_downloads += 1;
                status.last_used = Some(SystemTime::now());
                status.consecutive_failures = 0;
                return Some(AcquiredAccount {
                    email: email.clone(),
                    client,
                });
            } else {
                status.consecutive_failures += 1;
                if status.consecutive_failures >= 3 {
                    status.is_available = false;
                }
            }
        }
        None
    }

    /// `errorText` containing "quota" parks the account for 24h; "banned",
    /// "suspended", or "invalid" take it offline permanently.
    pub fn release(&self, email: &str, success: bool, error_text: Option<&str>) {
        let mut statuses = self.statuses.lock().unwrap();
        let Some(status) = statuses.get_mut(email) else {
            return;
        };
        status.current_downloads = status.current_downloads.saturating_sub(1);
        if success {
            return;
        }
        status.last_error = error_text.map(String::from);
        let lower = error_text.unwrap_or_default().to_ascii_lowercase();
        if lower.contains("quota") {
            status.quota_exceeded = true;
            status.quota_reset_at = Some(SystemTime::now() + Duration::from_secs(24 * 3600));
        } else if lower.contains("banned") || lower.contains("suspended") || lower.contains("invalid") {
            status.is_available = false;
        }
    }

    pub fn stats(&self) -> Vec<AccountStatus> {
        self.statuses.lock().unwrap().values().cloned().collect()
    }

    pub fn reset_account(&self, email: &str) -> bool {
        let mut statuses = self.statuses.lock().unwrap();
        if let Some(status) = statuses.get_mut(email) {
            status.is_available = true;
            status.quota_exceeded = false;
            status.quota_reset_at = None;
            status.consecutive_failures = 0;
            status.last_error = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        emails: Vec<String>,
    }

    impl AccountSource for FakeSource {
        fn list_accounts(&self) -> Vec<String> {
            self.emails.clone()
        }
        fn client_for(&self, email: &str) -> Option<String> {
            Some(format!("client-{email}"))
        }
    }

    #[test]
    fn acquire_round_robins_across_accounts() {
        let balancer = AccountBalancer::new(2);
        let source = FakeSource {
            emails: vec!["a@x".into(), "b@x".into()],
        };
        let first = balancer.acquire(&source).unwrap();
        balancer.release(&first.email, true, None);
        let second = balancer.acquire(&source).unwrap();
        assert_ne!(first.email, second.email);
    }

    #[test]
    fn three_consecutive_client_failures_disable_account() {
        struct AlwaysFails;
        impl AccountSource for AlwaysFails {
            fn list_accounts(&self) -> Vec<String> {
                vec!["broken@x".into()]
            }
            fn client_for(&self, _email: &str) -> Option<String> {
                None
            }
        }
        let balancer = AccountBalancer::new(2);
        let source = AlwaysFails;
        for _ in 0..3 {
            assert!(balancer.acquire(&source).is_none());
        }
        let stats = balancer.stats();
        assert!(!stats[0].is_available);
    }

    #[test]
    fn quota_error_parks_account_for_24h() {
        let balancer = AccountBalancer::new(2);
        let source = FakeSource {
            emails: vec!["q@x".into()],
        };
        let acc = balancer.acquire(&source).unwrap();
        balancer.release(&acc.email, false, Some("quota exceeded"));
        assert!(balancer.acquire(&source).is_none());
        let stats = balancer.stats();
        assert!(stats[0].quota_exceeded);
        assert!(stats[0].quota_reset_at.is_some());
    }

    #[test]
    fn banned_error_disables_account_permanently() {
        let balancer = AccountBalancer::new(2);
        let source = FakeSource {
            emails: vec!["b@x".into()],
        };
        let acc = balancer.acquire(&source).unwrap();
        balancer.release(&acc.email, false, Some("account banned"));
        assert!(balancer.acquire(&source).is_none());
    }

    #[test]
    fn concurrency_cap_blocks_further_acquisition() {
        let balancer = AccountBalancer::new(1);
        let source = FakeSource {
            emails: vec!["c@x".into()],
        };
        assert!(balancer.acquire(&source).is_some());
        assert!(balancer.acquire(&source).is_none());
    }
}
