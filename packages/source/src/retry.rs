//! Bounded, jittered retry around a single fetch attempt.
//!
//! Every fetcher attempt goes through [`fetch_with_retry`] (or
//! [`retry_strategy`] for a [`FetchStrategy`]):
//!
//! ```ignore
//! use crate::retry::{self, RetryPolicy};
//!
//! let outcome = retry::fetch_with_retry(
//!     SourceKind::Site,
//!     &RetryPolicy::SITE,
//!     &LogNotifier,
//!     || fetcher.fetch(),
//! )
//! .await;
//! ```
//!
//! Retryable failures are logged with the attempt number, then the loop
//! sleeps a random delay drawn uniformly from the policy's jitter range so
//! that installations polling the same upstream drift apart. A credential
//! rejection ends the loop at once. Running out of attempts sends exactly
//! one [`Notification`] and returns [`FetchOutcome::Exhausted`] instead of
//! an error.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use taiwan_aqm_source_models::{Snapshot, SourceKind};

use crate::notify::{Notification, Notifier};
use crate::{FetchError, FetchStrategy};

/// Attempt bound and inter-attempt jitter range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Treated as at least 1.
    pub max_attempts: u32,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    /// Fixed-station feed: 5 attempts, 5–15 s apart.
    pub const SITE: Self = Self {
        max_attempts: 5,
        jitter_min: Duration::from_secs(5),
        jitter_max: Duration::from_secs(15),
    };

    /// Micro-sensor feed: 3 attempts, 1–3 s apart.
    pub const MICRO_SENSOR: Self = Self {
        max_attempts: 3,
        jitter_min: Duration::from_secs(1),
        jitter_max: Duration::from_secs(3),
    };

    /// A policy that retries without waiting.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    /// Draws the delay before the next attempt.
    ///
    /// The random generator is thread-local and is dropped before this
    /// returns, so callers may hold the result across `.await`.
    #[must_use]
    pub fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let min = millis(self.jitter_min);
        let max = millis(self.jitter_max);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::SITE
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of a whole retry cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
    /// An attempt succeeded.
    Fetched(T),
    /// Every attempt failed with a retryable error. The notification has
    /// already been sent.
    Exhausted {
        attempts: u32,
        last_error: FetchError,
    },
    /// Upstream rejected the credentials; no further attempts were made.
    AuthRejected(FetchError),
}

impl<T> FetchOutcome<T> {
    /// Returns the fetched value, discarding the failure detail.
    pub fn fetched(self) -> Option<T> {
        match self {
            Self::Fetched(value) => Some(value),
            Self::Exhausted { .. } | Self::AuthRejected(_) => None,
        }
    }
}

/// Runs `attempt` until it succeeds, the credentials are rejected, or
/// `policy.max_attempts` attempts have failed.
///
/// The jitter sleep happens only between attempts, never after the last.
#[allow(clippy::future_not_send)]
pub async fn fetch_with_retry<T, F, Fut>(
    api: SourceKind,
    policy: &RetryPolicy,
    notifier: &dyn Notifier,
    mut attempt: F,
) -> FetchOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut made = 0_u32;

    loop {
        made += 1;

        match attempt().await {
            Ok(value) => {
                if made > 1 {
                    log::info!("[{api}] Fetch succeeded on attempt {made}/{max_attempts}");
                }
                return FetchOutcome::Fetched(value);
            }
            Err(e) if e.is_auth_failure() => {
                log::error!("[{api}] {e}, stopping retries");
                return FetchOutcome::AuthRejected(e);
            }
            Err(e) => {
                if made >= max_attempts {
                    log::error!("[{api}] Failed to fetch data after {made} attempts: {e}");
                    notifier.notify(Notification::exhausted(api, made)).await;
                    return FetchOutcome::Exhausted {
                        attempts: made,
                        last_error: e,
                    };
                }

                let delay = policy.jitter();
                log::warn!("[{api}] {e}. Retrying... ({made}/{max_attempts}) in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`fetch_with_retry`] over a [`FetchStrategy`].
pub async fn retry_strategy<S>(
    strategy: &S,
    policy: &RetryPolicy,
    notifier: &dyn Notifier,
) -> FetchOutcome<Snapshot<S::Record>>
where
    S: FetchStrategy + ?Sized,
{
    fetch_with_retry(strategy.api(), policy, notifier, || strategy.fetch()).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) {
            self.sent.lock().unwrap().push(notification);
        }
    }

    fn timeout(api: SourceKind) -> FetchError {
        FetchError::RequestTimeout {
            api,
            detail: "deadline elapsed".to_owned(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_without_notifying() {
        let notifier = RecordingNotifier::default();
        let mut calls = 0_u32;

        let outcome = fetch_with_retry(
            SourceKind::Site,
            &RetryPolicy::immediate(5),
            &notifier,
            || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 5 {
                        Err(timeout(SourceKind::Site))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(outcome, FetchOutcome::Fetched(5));
        assert_eq!(calls, 5);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn exhaustion_notifies_exactly_once() {
        let notifier = RecordingNotifier::default();
        let mut calls = 0_u32;

        let outcome: FetchOutcome<()> = fetch_with_retry(
            SourceKind::MicroSensor,
            &RetryPolicy::immediate(3),
            &notifier,
            || {
                calls += 1;
                async {
                    Err(FetchError::NoDataFound {
                        api: SourceKind::MicroSensor,
                    })
                }
            },
        )
        .await;

        assert_eq!(calls, 3);
        assert_eq!(
            outcome,
            FetchOutcome::Exhausted {
                attempts: 3,
                last_error: FetchError::NoDataFound {
                    api: SourceKind::MicroSensor
                },
            }
        );
        assert_eq!(
            notifier.sent(),
            vec![Notification::exhausted(SourceKind::MicroSensor, 3)]
        );
    }

    #[tokio::test]
    async fn auth_failure_short_circuits() {
        let notifier = RecordingNotifier::default();
        let mut calls = 0_u32;

        let outcome: FetchOutcome<()> = fetch_with_retry(
            SourceKind::Site,
            &RetryPolicy::immediate(5),
            &notifier,
            || {
                calls += 1;
                async {
                    Err(FetchError::AuthFailure {
                        api: SourceKind::Site,
                    })
                }
            },
        )
        .await;

        assert_eq!(calls, 1);
        assert!(matches!(outcome, FetchOutcome::AuthRejected(e) if e.is_auth_failure()));
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn zero_bound_still_attempts_once() {
        let notifier = RecordingNotifier::default();
        let mut calls = 0_u32;

        let outcome: FetchOutcome<()> = fetch_with_retry(
            SourceKind::Site,
            &RetryPolicy::immediate(0),
            &notifier,
            || {
                calls += 1;
                async {
                    Err(FetchError::UnexpectedStatus {
                        api: SourceKind::Site,
                        code: 500,
                    })
                }
            },
        )
        .await;

        assert_eq!(calls, 1);
        assert!(matches!(outcome, FetchOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(notifier.sent().len(), 1);
    }

    struct Scripted {
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl FetchStrategy for Scripted {
        type Record = String;

        fn api(&self) -> SourceKind {
            SourceKind::Site
        }

        async fn fetch(&self) -> Result<Snapshot<String>, FetchError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::NoRecordsFound {
                    api: SourceKind::Site,
                });
            }
            Ok(Snapshot::from([("1".to_owned(), "ok".to_owned())]))
        }
    }

    #[tokio::test]
    async fn retries_a_strategy() {
        let notifier = RecordingNotifier::default();
        let strategy = Scripted {
            failures_left: Mutex::new(2),
        };

        let snapshot = retry_strategy(&strategy, &RetryPolicy::immediate(3), &notifier)
            .await
            .fetched()
            .unwrap();

        assert_eq!(snapshot.get("1").map(String::as_str), Some("ok"));
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::MICRO_SENSOR;
        for _ in 0..100 {
            let delay = policy.jitter();
            assert!(delay >= policy.jitter_min && delay <= policy.jitter_max);
        }
    }

    #[test]
    fn degenerate_range_uses_minimum() {
        let policy = RetryPolicy {
            max_attempts: 1,
            jitter_min: Duration::from_millis(250),
            jitter_max: Duration::from_millis(100),
        };
        assert_eq!(policy.jitter(), Duration::from_millis(250));
    }
}
