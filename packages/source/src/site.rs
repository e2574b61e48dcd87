//! Fixed government monitoring stations (`aqx_p_432`).

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taiwan_aqm_parser::site::{parse_csv, parse_json};
use taiwan_aqm_source_models::{Snapshot, SourceKind, StationRecord};

use crate::{FetchError, FetchStrategy, http, key_by_id, parse_off_thread, registry};

/// Station feed endpoint.
pub const DEFAULT_URL: &str = "https://data.moenv.gov.tw/api/v2/aqx_p_432";

/// Per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Body format requested from the station feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteFormat {
    #[default]
    Csv,
    Json,
}

impl SiteFormat {
    /// Value of the `format` query parameter.
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Json => "JSON",
        }
    }
}

/// Fetches and filters the station feed.
#[derive(Clone)]
pub struct SiteFetcher {
    client: reqwest::Client,
    url: String,
    api_key: String,
    format: SiteFormat,
    timeout: Duration,
    site_ids: BTreeSet<String>,
}

impl fmt::Debug for SiteFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteFetcher")
            .field("url", &self.url)
            .field("format", &self.format)
            .field("timeout", &self.timeout)
            .field("site_ids", &self.site_ids)
            .finish_non_exhaustive()
    }
}

impl SiteFetcher {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        site_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            client,
            url: DEFAULT_URL.to_owned(),
            api_key: api_key.into(),
            format: SiteFormat::default(),
            timeout: DEFAULT_TIMEOUT,
            site_ids: site_ids.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub const fn with_format(mut self, format: SiteFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn site_ids(&self) -> &BTreeSet<String> {
        &self.site_ids
    }

    fn request(&self) -> reqwest::RequestBuilder {
        self.client
            .get(&self.url)
            .query(&[
                ("language", "zh"),
                ("api_key", self.api_key.as_str()),
                ("format", self.format.query_value()),
            ])
            .timeout(self.timeout)
    }
}

#[async_trait]
impl FetchStrategy for SiteFetcher {
    type Record = StationRecord;

    fn api(&self) -> SourceKind {
        SourceKind::Site
    }

    async fn fetch(&self) -> Result<Snapshot<StationRecord>, FetchError> {
        let api = SourceKind::Site;
        let body = http::get_bytes(api, self.request()).await?;

        let records = match self.format {
            SiteFormat::Csv => parse_off_thread(api, body, parse_csv).await?,
            SiteFormat::Json => parse_off_thread(api, body, parse_json).await?,
        };
        if records.is_empty() {
            log::warn!("[{api}] No records found in response");
            return Err(FetchError::NoRecordsFound { api });
        }

        let total = records.len();
        let snapshot = key_by_id(records, &self.site_ids, |r| r.station_id.as_str());
        if snapshot.is_empty() {
            log::warn!(
                "[{api}] None of the {total} records match configured sites {:?}",
                self.site_ids
            );
            return Err(FetchError::NoDataFound { api });
        }

        for id in snapshot.keys() {
            log::debug!(
                "[{api}] Updated {id} ({})",
                registry::site_name(id).unwrap_or("unregistered")
            );
        }
        log::info!("[{api}] Kept {} of {total} records", snapshot.len());

        Ok(snapshot)
    }
}
