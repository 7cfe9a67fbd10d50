use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

/// Documented defaults used until the first response is observed.
pub const DEFAULT_LIMIT: i64 = 5000;

/// Last known budget for one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub remaining: i64,
    pub limit: i64,
    /// REST only; the GraphQL budget carries no reset time here.
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateBudget {
    fn placeholder() -> Self {
        Self {
            remaining: DEFAULT_LIMIT,
            limit: DEFAULT_LIMIT,
            reset_at: None,
        }
    }

    /// `remaining < threshold * limit`; never true while `limit` is zero.
    pub fn is_below(&self, threshold: f64) -> bool {
        if self.limit <= 0 {
            return false;
        }
        (self.remaining as f64) < threshold * self.limit as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub rest: RateBudget,
    pub graphql: RateBudget,
}

/// Quota state shared by every in-flight call.
///
/// Writes are last-write-wins. The lock is never held across an await point.
pub struct QuotaTracker {
    state: RwLock<QuotaSnapshot>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(QuotaSnapshot {
                rest: RateBudget::placeholder(),
                graphql: RateBudget::placeholder(),
            }),
        }
    }

    /// Record REST rate-limit headers. `reset_epoch` is seconds since the Unix epoch.
    pub fn record_rest(&self, limit: i64, remaining: i64, reset_epoch: Option<i64>) {
        let reset_at = reset_epoch.and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.rest.limit = limit;
        state.rest.remaining = remaining;
        if reset_at.is_some() {
            state.rest.reset_at = reset_at;
        }
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rest(&self) -> RateBudget {
        self.snapshot().rest
    }

    pub fn graphql(&self) -> RateBudget {
        self.snapshot().graphql
    }

    /// Returns `(rest, graphql)` flags for `remaining < threshold * limit`.
    pub fn is_approaching_limit(&self, threshold: f64) -> (bool, bool) {
        let snap = self.snapshot();
        (snap.rest.is_below(threshold), snap.graphql.is_below(threshold))
    }

    #[cfg(test)]
    pub(crate) fn set_graphql(&self, limit: i64, remaining: i64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.graphql.limit = limit;
        state.graphql.remaining = remaining;
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new()
    }
}
