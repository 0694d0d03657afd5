//! Per-entry usage counters
//!
//! Both provider clients and tool server handles keep a [`UsageCounters`]
//! instance and expose a [`UsageSnapshot`] in their stats records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lock-free request/error counters plus last-used time
#[derive(Debug, Default)]
pub struct UsageCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    last_used: Mutex<Option<DateTime<Utc>>>,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request and stamp the last-used time.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_used.lock().unwrap_or_else(|p| p.into_inner());
        *last = Some(Utc::now());
    }

    /// Count one failed request.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough copy for reporting.
    pub fn snapshot(&self) -> UsageSnapshot {
        let request_count = self.request_count();
        let error_count = self.error_count();
        let last_used = *self.last_used.lock().unwrap_or_else(|p| p.into_inner());
        UsageSnapshot {
            request_count,
            error_count,
            success_rate: success_rate(request_count, error_count),
            last_used,
        }
    }
}

/// Point-in-time view of [`UsageCounters`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
}

/// `(requests - errors) / max(requests, 1)`
pub fn success_rate(requests: u64, errors: u64) -> f64 {
    requests.saturating_sub(errors) as f64 / requests.max(1) as f64
}
