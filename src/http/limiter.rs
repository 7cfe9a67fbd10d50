use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// GitHub allows 100 concurrent requests per account; stay below that.
pub const MAX_CONCURRENT_REQUESTS: usize = 90;

/// REST: 5000 requests/hour for authenticated users.
pub const REST_REQUESTS_PER_HOUR: u32 = 5000;

/// GraphQL: 5000 points/hour, billed separately from REST.
pub const GRAPHQL_POINTS_PER_HOUR: u32 = 5000;

/// Short spikes allowed on top of the steady hourly rate.
pub const DEFAULT_BURST: u32 = 10;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

/// Token bucket for one API protocol.
///
/// Refills evenly across the hour and allows `burst` calls back to back. Waiting
/// callers are not queued fairly; whichever is ready first wins.
pub struct TokenBucket {
    inner: DirectLimiter,
}

impl TokenBucket {
    /// Spread `per_hour` calls evenly over an hour with the given burst.
    pub fn per_hour(per_hour: u32, burst: u32) -> Self {
        Self::with_quota(Quota::per_hour(non_zero(per_hour)).allow_burst(non_zero(burst)))
    }

    pub fn per_second(per_second: u32, burst: u32) -> Self {
        Self::with_quota(Quota::per_second(non_zero(per_second)).allow_burst(non_zero(burst)))
    }

    pub fn with_quota(quota: Quota) -> Self {
        Self {
            inner: RateLimiter::direct(quota),
        }
    }

    /// Wait for a token. If `cancel` fires first the wait is abandoned and no token
    /// is consumed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ApiError> {
        if self.try_acquire() {
            return Ok(());
        }
        debug!("rate limiter: waiting for a token");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            _ = self.inner.until_ready() => Ok(()),
        }
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }
}

/// Counting semaphore bounding in-flight calls across both protocols.
///
/// Permits are owned so they can travel with a response until its body is read.
/// A permit is released when it drops, which covers every exit path of a call
/// including errors and cancellation.
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, ApiError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(permit);
        }
        debug!("concurrency gate full ({} in flight)", self.capacity);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            // The semaphore is private and never closed.
            permit = self.semaphore.clone().acquire_owned() => permit.map_err(|_| ApiError::Cancelled),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_REQUESTS)
    }
}
