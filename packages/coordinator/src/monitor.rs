//! Per-instance context running one coordinator per configured feed.

use std::sync::Arc;
use std::time::Duration;

use taiwan_aqm_config::Config;
use taiwan_aqm_source::FetchStrategy;
use taiwan_aqm_source::http::build_client;
use taiwan_aqm_source::micro_sensor::MicroSensorFetcher;
use taiwan_aqm_source::notify::Notifier;
use taiwan_aqm_source::site::SiteFetcher;
use taiwan_aqm_source_models::SourceKind;

use crate::{CoordinatorError, PollCoordinator};

/// The fixed-station and micro sensor coordinators of one monitor.
///
/// The two coordinators share no mutable state: each owns its own HTTP
/// client, schedule, and snapshot. A feed with no configured stations has
/// no coordinator.
#[derive(Debug)]
pub struct AirQualityMonitor {
    site: Option<PollCoordinator<SiteFetcher>>,
    micro: Option<PollCoordinator<MicroSensorFetcher>>,
}

impl AirQualityMonitor {
    /// Builds the coordinators without fetching anything.
    ///
    /// # Errors
    ///
    /// * [`CoordinatorError::Client`] if an HTTP client cannot be built.
    /// * [`CoordinatorError::Config`] if `utc_offset` is invalid.
    pub fn from_config(
        config: &Config,
        notifier: &Arc<dyn Notifier>,
    ) -> Result<Self, CoordinatorError> {
        let site = if config.sites.is_empty() {
            None
        } else {
            let feed = &config.site_feed;
            Some(PollCoordinator::new(
                SourceKind::Site.to_string(),
                site_fetcher(config)?,
                feed.retry.policy(),
                feed.schedule.into(),
                Arc::clone(notifier),
            ))
        };

        let micro = if config.micro_sensors.is_empty() {
            None
        } else {
            let feed = &config.micro_feed;
            Some(PollCoordinator::new(
                SourceKind::MicroSensor.to_string(),
                micro_fetcher(config)?,
                feed.retry.policy(),
                feed.schedule.into(),
                Arc::clone(notifier),
            ))
        };

        Ok(Self { site, micro })
    }

    /// Runs both first refreshes concurrently and starts both schedules.
    ///
    /// If either feed fails, both coordinators are shut down.
    ///
    /// # Errors
    ///
    /// Returns the first feed's [`CoordinatorError`], fixed stations
    /// first.
    pub async fn setup(&self) -> Result<(), CoordinatorError> {
        let (site, micro) = tokio::join!(
            start_if_configured(self.site.as_ref()),
            start_if_configured(self.micro.as_ref()),
        );

        if let Err(e) = site.and(micro) {
            log::error!("Monitor setup failed: {e}");
            self.shutdown().await;
            return Err(e);
        }
        Ok(())
    }

    #[must_use]
    pub const fn site(&self) -> Option<&PollCoordinator<SiteFetcher>> {
        self.site.as_ref()
    }

    #[must_use]
    pub const fn micro(&self) -> Option<&PollCoordinator<MicroSensorFetcher>> {
        self.micro.as_ref()
    }

    /// Stops both schedules. Idempotent.
    pub async fn shutdown(&self) {
        tokio::join!(
            stop_if_configured(self.site.as_ref()),
            stop_if_configured(self.micro.as_ref()),
        );
    }
}

/// Builds the fixed-station fetcher described by `config`, with its own
/// HTTP client.
///
/// # Errors
///
/// Returns [`CoordinatorError::Client`] if the HTTP client cannot be built.
pub fn site_fetcher(config: &Config) -> Result<SiteFetcher, CoordinatorError> {
    let feed = &config.site_feed;
    Ok(SiteFetcher::new(
        build_client(config.accept_invalid_certs)?,
        config.api_key.clone(),
        config.sites.iter().cloned(),
    )
    .with_url(&feed.url)
    .with_format(feed.format)
    .with_timeout(Duration::from_secs(feed.timeout_secs)))
}

/// Builds the micro sensor fetcher described by `config`, with its own
/// HTTP client.
///
/// # Errors
///
/// * [`CoordinatorError::Client`] if the HTTP client cannot be built.
/// * [`CoordinatorError::Config`] if `utc_offset` is invalid.
pub fn micro_fetcher(config: &Config) -> Result<MicroSensorFetcher, CoordinatorError> {
    let feed = &config.micro_feed;
    Ok(MicroSensorFetcher::new(
        build_client(config.accept_invalid_certs)?,
        config.micro_sensors.iter().cloned(),
        config.offset()?,
    )
    .with_url(&feed.url)
    .with_timeout(Duration::from_secs(feed.timeout_secs)))
}

async fn start_if_configured<S: FetchStrategy + 'static>(
    coordinator: Option<&PollCoordinator<S>>,
) -> Result<(), CoordinatorError> {
    match coordinator {
        Some(coordinator) => coordinator.start().await,
        None => Ok(()),
    }
}

async fn stop_if_configured<S: FetchStrategy + 'static>(coordinator: Option<&PollCoordinator<S>>) {
    if let Some(coordinator) = coordinator {
        coordinator.shutdown().await;
    }
}
