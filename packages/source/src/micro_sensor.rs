//! Low-cost micro sensors on the `SensorThings` endpoint.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use taiwan_aqm_parser::sensor_things::parse_things;
use taiwan_aqm_source_models::{MicroSensorRecord, Snapshot, SourceKind};

use crate::{FetchError, FetchStrategy, http, key_by_id, parse_off_thread};

/// `SensorThings` Things collection.
pub const DEFAULT_URL: &str = "https://sta.colife.org.tw/STA_AirQuality_EPAIoT/v1.0/Things";

/// Per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Expansion returning each Thing's location and only the newest
/// observation of every datastream.
pub const EXPAND: &str = "Locations($select=location),Datastreams($expand=Observations($orderby=phenomenonTime desc;$top=1))";

/// `$filter` expression matching any of `station_ids`.
///
/// Single quotes inside an id are doubled, as OData string literals
/// require.
#[must_use]
pub fn station_filter<'a>(station_ids: impl IntoIterator<Item = &'a str>) -> String {
    station_ids
        .into_iter()
        .map(|id| format!("properties/stationID eq '{}'", id.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Fetches and filters micro sensor Things.
#[derive(Debug, Clone)]
pub struct MicroSensorFetcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    station_ids: BTreeSet<String>,
    offset: FixedOffset,
}

impl MicroSensorFetcher {
    /// Observation times are rendered in `offset`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        station_ids: impl IntoIterator<Item = String>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            client,
            url: DEFAULT_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            station_ids: station_ids.into_iter().collect(),
            offset,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn station_ids(&self) -> &BTreeSet<String> {
        &self.station_ids
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let filter = station_filter(self.station_ids.iter().map(String::as_str));
        self.client
            .get(&self.url)
            .query(&[("$expand", EXPAND), ("$filter", filter.as_str())])
            .timeout(self.timeout)
    }
}

#[async_trait]
impl FetchStrategy for MicroSensorFetcher {
    type Record = MicroSensorRecord;

    fn api(&self) -> SourceKind {
        SourceKind::MicroSensor
    }

    async fn fetch(&self) -> Result<Snapshot<MicroSensorRecord>, FetchError> {
        let api = SourceKind::MicroSensor;
        if self.station_ids.is_empty() {
            log::warn!("[{api}] No micro sensors configured");
            return Err(FetchError::NoDataFound { api });
        }

        let body = http::get_bytes(api, self.request()).await?;
        let offset = self.offset;
        let things = parse_off_thread(api, body, move |bytes| parse_things(bytes, &offset)).await?;
        if things.is_empty() {
            log::warn!("[{api}] No Things in response");
            return Err(FetchError::NoDataFound { api });
        }

        let total = things.len();
        let snapshot = key_by_id(things, &self.station_ids, |t| t.station_id.as_str());
        if snapshot.is_empty() {
            log::warn!(
                "[{api}] None of the {total} Things match configured stations {:?}",
                self.station_ids
            );
            return Err(FetchError::NoDataFound { api });
        }

        log::info!("[{api}] Kept {} of {total} Things", snapshot.len());
        Ok(snapshot)
    }
}
