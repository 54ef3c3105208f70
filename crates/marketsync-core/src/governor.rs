//! # Admission Governor
//!
//! Gates provider round-trips on the provider's own quota counters.
//!
//! Each [`QuotaClass`] owns one lane. A caller holds the lane from the quota
//! check until its [`AdmissionPermit`] is dropped, so two concurrent callers
//! can never both spend the last unit of a window. The per-second window is
//! settled before the per-minute window. Every wait is bounded: one sleep
//! until the reported reset plus a margin, one re-check, then at most one
//! fixed backoff before the call is admitted anyway.
//!
//! When the quota source itself fails, admission is granted after a warning
//! and paced by a local fallback limiter.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::provider::QuotaSource;
use crate::{QuotaClass, QuotaStatus};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Margins and backoffs applied when a quota window is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorPolicy {
    pub second_margin: Duration,
    pub second_backoff: Duration,
    pub minute_margin: Duration,
    pub minute_backoff: Duration,
    /// Local pacing used while the quota source is unreachable.
    pub fallback_per_second: u32,
}

impl Default for GovernorPolicy {
    fn default() -> Self {
        Self {
            second_margin: Duration::from_millis(500),
            second_backoff: Duration::from_secs(1),
            minute_margin: Duration::from_secs(1),
            minute_backoff: Duration::from_secs(5),
            fallback_per_second: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Second,
    Minute,
}

impl Window {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
        }
    }

    const fn remaining(self, status: &QuotaStatus) -> u32 {
        match self {
            Self::Second => status.remaining_per_second,
            Self::Minute => status.remaining_per_minute,
        }
    }

    const fn reset(self, status: &QuotaStatus) -> Duration {
        match self {
            Self::Second => status.second_reset,
            Self::Minute => status.minute_reset,
        }
    }
}

/// Capacity grant for one gated round-trip. Dropping it releases the lane.
#[derive(Debug)]
pub struct AdmissionPermit {
    class: QuotaClass,
    waited: Duration,
    fail_open: bool,
    _lane: OwnedMutexGuard<()>,
}

impl AdmissionPermit {
    pub const fn class(&self) -> QuotaClass {
        self.class
    }

    /// Time spent suspended inside the governor.
    pub const fn waited(&self) -> Duration {
        self.waited
    }

    /// Granted without a successful quota check.
    pub const fn fail_open(&self) -> bool {
        self.fail_open
    }
}

/// Process-wide quota gate shared by every fetch.
pub struct AdmissionGovernor {
    source: Arc<dyn QuotaSource>,
    policy: GovernorPolicy,
    lanes: [Arc<Mutex<()>>; 3],
    fallback: DirectRateLimiter,
}

impl AdmissionGovernor {
    pub fn new(source: Arc<dyn QuotaSource>, policy: GovernorPolicy) -> Self {
        let per_second = NonZeroU32::new(policy.fallback_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            source,
            lanes: [
                Arc::new(Mutex::new(())),
                Arc::new(Mutex::new(())),
                Arc::new(Mutex::new(())),
            ],
            fallback: RateLimiter::direct(Quota::per_second(per_second)),
            policy,
        }
    }

    pub fn policy(&self) -> &GovernorPolicy {
        &self.policy
    }

    /// Block until one unit is available in both windows of `class`.
    ///
    /// Never fails. The returned permit must be held across the gated call.
    pub async fn acquire(&self, class: QuotaClass) -> AdmissionPermit {
        let lane = Arc::clone(&self.lanes[class.index()]).lock_owned().await;
        let started = Instant::now();

        let fail_open = match self.source.quota_status(class).await {
            Ok(status) => {
                let settled = match self.settle(class, Window::Second, status).await {
                    Some(status) => self.settle(class, Window::Minute, status).await,
                    None => None,
                };
                if settled.is_none() {
                    self.fallback.until_ready().await;
                }
                settled.is_none()
            }
            Err(error) => {
                warn!(
                    quota_class = %class,
                    error = %error,
                    "quota status unavailable; admitting request without quota check"
                );
                self.fallback.until_ready().await;
                true
            }
        };

        let waited = started.elapsed();
        debug!(quota_class = %class, waited_ms = waited.as_millis() as u64, "request admitted");
        AdmissionPermit {
            class,
            waited,
            fail_open,
            _lane: lane,
        }
    }

    /// Wait out one exhausted window. Returns the freshest status seen, or
    /// `None` when the quota source failed on the re-check.
    async fn settle(
        &self,
        class: QuotaClass,
        window: Window,
        status: QuotaStatus,
    ) -> Option<QuotaStatus> {
        if window.remaining(&status) > 0 {
            return Some(status);
        }

        let (margin, backoff) = match window {
            Window::Second => (self.policy.second_margin, self.policy.second_backoff),
            Window::Minute => (self.policy.minute_margin, self.policy.minute_backoff),
        };
        let delay = window.reset(&status) + margin;
        info!(
            quota_class = %class,
            window = window.as_str(),
            delay_ms = delay.as_millis() as u64,
            "quota window exhausted; waiting for reset"
        );
        sleep(delay).await;

        let status = match self.source.quota_status(class).await {
            Ok(fresh) if window.remaining(&fresh) > 0 => return Some(fresh),
            Ok(fresh) => fresh,
            Err(error) => {
                warn!(
                    quota_class = %class,
                    window = window.as_str(),
                    error = %error,
                    "quota re-check failed; admitting request without quota check"
                );
                return None;
            }
        };

        warn!(
            quota_class = %class,
            window = window.as_str(),
            backoff_ms = backoff.as_millis() as u64,
            "quota still exhausted after reset; applying backoff"
        );
        sleep(backoff).await;
        Some(status)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::provider::{ProviderError, ProviderFuture};

    struct ScriptedQuota {
        responses: StdMutex<VecDeque<Result<QuotaStatus, ProviderError>>>,
        calls: StdMutex<usize>,
    }

    impl ScriptedQuota {
        fn new(responses: Vec<Result<QuotaStatus, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: StdMutex::new(responses.into()),
                calls: StdMutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("calls lock")
        }
    }

    impl QuotaSource for ScriptedQuota {
        fn quota_status<'a>(&'a self, _class: QuotaClass) -> ProviderFuture<'a, QuotaStatus> {
            *self.calls.lock().expect("calls lock") += 1;
            let next = self
                .responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or(Ok(QuotaStatus::available(10, 100)));
            Box::pin(async move { next })
        }
    }

    fn exhausted_second(reset_ms: u64) -> QuotaStatus {
        QuotaStatus {
            remaining_per_second: 0,
            remaining_per_minute: 50,
            second_reset: Duration::from_millis(reset_ms),
            minute_reset: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_windows_admit_immediately() {
        let source = ScriptedQuota::new(vec![Ok(QuotaStatus::available(5, 50))]);
        let governor = AdmissionGovernor::new(source.clone(), GovernorPolicy::default());

        let permit = governor.acquire(QuotaClass::Quote).await;

        assert_eq!(permit.waited(), Duration::ZERO);
        assert!(!permit.fail_open());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_second_window_waits_for_reported_reset() {
        let source = ScriptedQuota::new(vec![
            Ok(exhausted_second(1_000)),
            Ok(QuotaStatus::available(5, 50)),
        ]);
        let governor = AdmissionGovernor::new(source.clone(), GovernorPolicy::default());

        let started = Instant::now();
        let permit = governor.acquire(QuotaClass::Quote).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(1_000), "elapsed {elapsed:?}");
        assert_eq!(elapsed, Duration::from_millis(1_500));
        assert_eq!(permit.class(), QuotaClass::Quote);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn still_exhausted_after_reset_applies_one_backoff_then_proceeds() {
        let source = ScriptedQuota::new(vec![Ok(exhausted_second(200)), Ok(exhausted_second(200))]);
        let governor = AdmissionGovernor::new(source.clone(), GovernorPolicy::default());

        let started = Instant::now();
        governor.acquire(QuotaClass::Quote).await;

        // 200ms reset + 500ms margin + 1000ms backoff
        assert_eq!(started.elapsed(), Duration::from_millis(1_700));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn minute_window_uses_longer_margin_and_backoff() {
        let exhausted_minute = QuotaStatus {
            remaining_per_second: 3,
            remaining_per_minute: 0,
            second_reset: Duration::from_millis(100),
            minute_reset: Duration::from_secs(2),
        };
        let source = ScriptedQuota::new(vec![Ok(exhausted_minute), Ok(exhausted_minute)]);
        let governor = AdmissionGovernor::new(source, GovernorPolicy::default());

        let started = Instant::now();
        governor.acquire(QuotaClass::Quote).await;

        // 2s reset + 1s margin + 5s backoff
        assert_eq!(started.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn second_window_is_settled_before_minute_window() {
        let both_exhausted = QuotaStatus {
            remaining_per_second: 0,
            remaining_per_minute: 0,
            second_reset: Duration::from_millis(500),
            minute_reset: Duration::from_secs(10),
        };
        let source = ScriptedQuota::new(vec![
            Ok(both_exhausted),
            Ok(QuotaStatus::available(5, 20)),
        ]);
        let governor = AdmissionGovernor::new(source.clone(), GovernorPolicy::default());

        let started = Instant::now();
        governor.acquire(QuotaClass::Quote).await;

        // The fresh status after the second-window wait shows minute capacity.
        assert_eq!(started.elapsed(), Duration::from_millis(1_000));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_quota_source_fails_open() {
        let source = ScriptedQuota::new(vec![Err(ProviderError::transport("bridge down"))]);
        let governor = AdmissionGovernor::new(source, GovernorPolicy::default());

        let permit = governor.acquire(QuotaClass::Order).await;

        assert!(permit.fail_open());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_recheck_after_waiting_fails_open() {
        let both_exhausted = QuotaStatus {
            remaining_per_second: 0,
            remaining_per_minute: 0,
            second_reset: Duration::from_millis(100),
            minute_reset: Duration::from_secs(30),
        };
        let source = ScriptedQuota::new(vec![
            Ok(both_exhausted),
            Err(ProviderError::transport("bridge down")),
        ]);
        let governor = AdmissionGovernor::new(source.clone(), GovernorPolicy::default());

        let permit = governor.acquire(QuotaClass::Quote).await;

        // 100ms reset + 500ms margin, then no minute-window wait.
        assert_eq!(permit.waited(), Duration::from_millis(600));
        assert!(permit.fail_open());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lane_is_held_until_permit_drops() {
        let source = ScriptedQuota::new(Vec::new());
        let governor = Arc::new(AdmissionGovernor::new(source, GovernorPolicy::default()));

        let first = governor.acquire(QuotaClass::Quote).await;
        let contender = {
            let governor = Arc::clone(&governor);
            tokio::spawn(async move { governor.acquire(QuotaClass::Quote).await.class() })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        // Other classes are independent lanes.
        let other = governor.acquire(QuotaClass::Order).await;
        assert_eq!(other.class(), QuotaClass::Order);

        drop(first);
        assert_eq!(contender.await.expect("join"), QuotaClass::Quote);
    }
}
