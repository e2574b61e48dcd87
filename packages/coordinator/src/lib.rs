#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polling coordinators.
//!
//! A [`PollCoordinator`] owns one [`FetchStrategy`] and the last good
//! [`Snapshot`] it produced. Setup runs the first refresh inline and fails
//! if it fails; after that a background task refreshes on a [`Schedule`].
//! Failed refreshes never clear the published snapshot, they only flip
//! [`PollCoordinator::last_update_succeeded`].
//!
//! [`AirQualityMonitor`] is the per-instance context that runs one
//! coordinator per upstream feed.

pub mod monitor;
pub mod schedule;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use taiwan_aqm_config::ConfigError;
use taiwan_aqm_source::FetchStrategy;
use taiwan_aqm_source::notify::Notifier;
use taiwan_aqm_source::retry::{FetchOutcome, RetryPolicy, retry_strategy};
use taiwan_aqm_source_models::Snapshot;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

pub use monitor::AirQualityMonitor;
pub use schedule::Schedule;

/// Errors from setting up a coordinator or monitor.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The first refresh exhausted its retries.
    #[error("{name}: first refresh failed, setup aborted")]
    FirstRefreshFailed { name: String },

    /// Upstream rejected the credentials.
    #[error("{name}: API key rejected, re-authentication required")]
    ReauthRequired { name: String },

    /// Setup was requested in a state other than
    /// [`CoordinatorState::Uninitialized`].
    #[error("{name}: cannot start while {state}")]
    NotStartable {
        name: String,
        state: CoordinatorState,
    },

    /// Shutdown ran while the first refresh was in flight.
    #[error("{name}: shut down during setup")]
    Cancelled { name: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Lifecycle of a [`PollCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum CoordinatorState {
    Uninitialized,
    FirstRefreshPending,
    Ready,
    RefreshInFlight,
    /// Credentials were rejected; the schedule has stopped.
    ReauthRequired,
    Stopped,
}

/// Result of a single refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot with this many records was published.
    Updated { records: usize },
    /// Retries were exhausted; the previous snapshot is still served.
    Failed,
    /// Another refresh was in flight, or the coordinator is not running
    /// (not yet started, stopped, or awaiting re-authentication).
    Skipped,
    /// Upstream rejected the credentials.
    ReauthRequired,
}

struct Inner<S: FetchStrategy> {
    name: String,
    strategy: S,
    policy: RetryPolicy,
    notifier: Arc<dyn Notifier>,
    snapshot: watch::Sender<Arc<Snapshot<S::Record>>>,
    state: watch::Sender<CoordinatorState>,
    last_update_succeeded: AtomicBool,
    refresh_lock: Mutex<()>,
}

impl<S: FetchStrategy> Inner<S> {
    /// Moves to `to` unless the coordinator has stopped. Returns whether
    /// the state changed.
    fn transition(&self, to: CoordinatorState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == CoordinatorState::Stopped || *state == to {
                return false;
            }
            log::debug!("[{}] {state} -> {to}", self.name);
            *state = to;
            true
        })
    }

    /// Runs one refresh. `first` is set only by
    /// [`PollCoordinator::start`], which alone may refresh a coordinator in
    /// [`CoordinatorState::FirstRefreshPending`]; every other caller needs
    /// [`CoordinatorState::Ready`].
    async fn refresh(&self, first: bool) -> RefreshOutcome {
        let required = if first {
            CoordinatorState::FirstRefreshPending
        } else {
            CoordinatorState::Ready
        };
        let current = *self.state.borrow();
        if current != required {
            log::debug!("[{}] Not refreshing while {current}", self.name);
            return RefreshOutcome::Skipped;
        }
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            log::debug!("[{}] Refresh already in flight, skipping", self.name);
            return RefreshOutcome::Skipped;
        };

        if !first {
            self.transition(CoordinatorState::RefreshInFlight);
        }

        match retry_strategy(&self.strategy, &self.policy, self.notifier.as_ref()).await {
            FetchOutcome::Fetched(snapshot) => {
                let records = snapshot.len();
                self.snapshot.send_replace(Arc::new(snapshot));
                self.last_update_succeeded.store(true, Ordering::Release);
                self.transition(CoordinatorState::Ready);
                log::info!("[{}] Snapshot updated with {records} records", self.name);
                RefreshOutcome::Updated { records }
            }
            FetchOutcome::Exhausted { attempts, last_error } => {
                self.last_update_succeeded.store(false, Ordering::Release);
                if !first {
                    self.transition(CoordinatorState::Ready);
                }
                log::warn!(
                    "[{}] Refresh failed after {attempts} attempts ({last_error}), keeping previous snapshot",
                    self.name
                );
                RefreshOutcome::Failed
            }
            FetchOutcome::AuthRejected(e) => {
                self.last_update_succeeded.store(false, Ordering::Release);
                self.transition(CoordinatorState::ReauthRequired);
                log::error!("[{}] {e}", self.name);
                RefreshOutcome::ReauthRequired
            }
        }
    }
}

/// Keeps one upstream's snapshot fresh.
pub struct PollCoordinator<S: FetchStrategy> {
    inner: Arc<Inner<S>>,
    schedule: Schedule,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FetchStrategy> std::fmt::Debug for PollCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollCoordinator")
            .field("name", &self.inner.name)
            .field("schedule", &self.schedule)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<S: FetchStrategy + 'static> PollCoordinator<S> {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        strategy: S,
        policy: RetryPolicy,
        schedule: Schedule,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::new()));
        let (state, _) = watch::channel(CoordinatorState::Uninitialized);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                strategy,
                policy,
                notifier,
                snapshot,
                state,
                last_update_succeeded: AtomicBool::new(false),
                refresh_lock: Mutex::new(()),
            }),
            schedule,
            shutdown,
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Runs the first refresh and, if it succeeds, starts the schedule.
    ///
    /// A failed first refresh returns the coordinator to
    /// [`CoordinatorState::Uninitialized`] so setup may be retried.
    ///
    /// # Errors
    ///
    /// * [`CoordinatorError::NotStartable`] unless uninitialized.
    /// * [`CoordinatorError::FirstRefreshFailed`] if retries ran out.
    /// * [`CoordinatorError::ReauthRequired`] if the key was rejected.
    /// * [`CoordinatorError::Cancelled`] if [`PollCoordinator::shutdown`]
    ///   ran before the first refresh finished; no schedule is started.
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        let name = self.inner.name.clone();
        let mut current = CoordinatorState::Uninitialized;
        let claimed = self.inner.state.send_if_modified(|state| {
            current = *state;
            if *state == CoordinatorState::Uninitialized {
                *state = CoordinatorState::FirstRefreshPending;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(CoordinatorError::NotStartable {
                name,
                state: current,
            });
        }

        log::info!("[{name}] Running first refresh");
        match self.inner.refresh(true).await {
            RefreshOutcome::Updated { .. } => {}
            RefreshOutcome::ReauthRequired => {
                return Err(CoordinatorError::ReauthRequired { name });
            }
            RefreshOutcome::Failed | RefreshOutcome::Skipped => {
                self.inner.state.send_if_modified(|state| {
                    if *state == CoordinatorState::FirstRefreshPending {
                        *state = CoordinatorState::Uninitialized;
                        true
                    } else {
                        false
                    }
                });
                return Err(CoordinatorError::FirstRefreshFailed { name });
            }
        }

        let mut task = self.task.lock().await;
        if *self.shutdown.borrow() {
            log::info!("[{name}] Shut down during first refresh, not scheduling");
            return Err(CoordinatorError::Cancelled { name });
        }
        *task = Some(tokio::spawn(run_schedule(
            Arc::clone(&self.inner),
            self.schedule,
            self.shutdown.subscribe(),
        )));
        drop(task);

        log::info!("[{name}] Scheduled refresh: {:?}", self.schedule);
        Ok(())
    }

    /// Refreshes now. Only a started coordinator in
    /// [`CoordinatorState::Ready`] refreshes; anything else, including an
    /// overlapping call, is [`RefreshOutcome::Skipped`].
    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh(false).await
    }

    /// Last good snapshot; empty until the first refresh succeeds.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot<S::Record>> {
        Arc::clone(&self.inner.snapshot.borrow())
    }

    /// Receiver notified every time a new snapshot is published.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot<S::Record>>> {
        self.inner.snapshot.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    /// Whether the most recent refresh produced a snapshot.
    #[must_use]
    pub fn last_update_succeeded(&self) -> bool {
        self.inner.last_update_succeeded.load(Ordering::Acquire)
    }

    /// Stops the schedule. Safe to call more than once, and before or
    /// after a failed [`PollCoordinator::start`].
    ///
    /// An in-flight refresh is abandoned; the published snapshot is left
    /// as it was.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                log::error!("[{}] Schedule task failed: {e}", self.inner.name);
            }
        }
        if self.inner.transition(CoordinatorState::Stopped) {
            log::info!("[{}] Stopped", self.inner.name);
        }
    }
}

async fn run_schedule<S: FetchStrategy>(
    inner: Arc<Inner<S>>,
    schedule: Schedule,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let delay = schedule.next_delay(&chrono::Local::now());
        log::debug!("[{}] Next refresh in {delay:?}", inner.name);

        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(delay) => {}
        }
        if *shutdown.borrow() {
            break;
        }

        if inner.refresh(false).await == RefreshOutcome::ReauthRequired {
            log::error!("[{}] Stopping schedule until re-authenticated", inner.name);
            break;
        }
    }
}
