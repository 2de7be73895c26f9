//! Per-account status record.

use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct AccountStatus {
    pub email: String,
    pub is_available: bool,
    pub current_downloads: u32,
    pub total_downloads: u64,
    pub quota_exceeded: bool,
    pub quota_reset_at: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_used: Option<SystemTime>,
}

impl AccountStatus {
    pub fn new(email: String) -> Self {
        AccountStatus {
            email,
            is_available: true,
            current_downloads: 0,
            total_downloads: 0,
            quota_exceeded: false,
            quota_reset_at: None,
            consecutive_failures: 0,
            last_error: None,
            last_used: None,
        }
    }

    /// Re-enables a quota-exhausted account once its reset time has passed,
    /// mirroring lazy reset-on-check pattern.
    pub fn is_available(&mut self, max_per_account: u32) -> bool {
        if !self.is_available {
            return false;
        }
        if self.quota_exceeded {
            match self.quota_reset_at {
                Some(t) if SystemTime::now() >= t => {
                    self.quota_exceeded = false;
                    self.quota_reset_at = None;
                }
                _ => return false,
            }
        }
        self.current_downloads < max_per_account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn quota_resets_lazily_once_elapsed() {
        let mut status = AccountStatus::new("a@x".into());
        status.quota_exceeded = true;
        status.quota_reset_at = Some(SystemTime::now() - Duration::from_secs(1));
        assert!(status.is_available(2));
        assert!(!status.quota_exceeded);
    }

    #[test]
    fn quota_still_blocks_before_reset_time() {
        let mut status = AccountStatus::new("a@x".into());
        status.quota_exceeded = true;
        status.quota_reset_at = Some(SystemTime::now() + Duration::from_secs(3600));
        assert!(!status.is_available(2));
    }
}
