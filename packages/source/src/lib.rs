#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Air-quality data sources and the fetch-with-retry engine.
//!
//! Each upstream feed implements the [`FetchStrategy`] trait: one attempt
//! that issues the HTTP request, hands the body to
//! [`taiwan_aqm_parser`], and classifies any failure into a
//! [`FetchError`]. The [`retry`] module wraps a strategy in the bounded,
//! jittered retry policy and the exhaustion notification.

pub mod http;
pub mod micro_sensor;
pub mod notify;
pub mod registry;
pub mod retry;
pub mod site;
pub mod things;

#[cfg(test)]
mod test_server;

use std::collections::BTreeSet;

use async_trait::async_trait;
use taiwan_aqm_source_models::{Snapshot, SourceKind};

/// Classified failure of a single fetch attempt.
///
/// Every variant carries the upstream it came from. Only
/// [`FetchError::AuthFailure`] is terminal; all others are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Upstream rejected the API key.
    #[error("{api} API key expired or invalid")]
    AuthFailure {
        /// Failing upstream.
        api: SourceKind,
    },

    /// Records were returned, but none for the configured identifiers.
    #[error("No valid data found in the {api} API response")]
    NoDataFound {
        /// Failing upstream.
        api: SourceKind,
    },

    /// The response held no records at all.
    #[error("No records found in the {api} API response")]
    NoRecordsFound {
        /// Failing upstream.
        api: SourceKind,
    },

    /// HTTP status outside the success range.
    #[error("{api} API returned unexpected status code: {code}")]
    UnexpectedStatus {
        /// Failing upstream.
        api: SourceKind,
        /// HTTP status code.
        code: u16,
    },

    /// The request exceeded its deadline.
    #[error("{api} API request timed out: {detail}")]
    RequestTimeout {
        /// Failing upstream.
        api: SourceKind,
        /// Underlying timeout description.
        detail: String,
    },

    /// Any other transport-level failure.
    #[error("{api} API request failed: {detail}")]
    RequestFailed {
        /// Failing upstream.
        api: SourceKind,
        /// Underlying error description.
        detail: String,
    },
}

impl FetchError {
    /// Classifies a transport error from `reqwest`.
    #[must_use]
    pub fn from_reqwest(api: SourceKind, e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::RequestTimeout {
                api,
                detail: e.to_string(),
            }
        } else {
            Self::RequestFailed {
                api,
                detail: e.to_string(),
            }
        }
    }

    /// The upstream this failure belongs to.
    #[must_use]
    pub const fn api(&self) -> SourceKind {
        match self {
            Self::AuthFailure { api }
            | Self::NoDataFound { api }
            | Self::NoRecordsFound { api }
            | Self::UnexpectedStatus { api, .. }
            | Self::RequestTimeout { api, .. }
            | Self::RequestFailed { api, .. } => *api,
        }
    }

    /// Returns `true` for the credential rejection kind.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }

    /// Returns `true` if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !self.is_auth_failure()
    }
}

/// One fetch-and-parse attempt against an upstream feed.
///
/// Implementations never retry internally; [`retry::fetch_with_retry`]
/// owns the retry loop.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Record type stored in the resulting [`Snapshot`].
    type Record: Clone + Send + Sync + 'static;

    /// Which upstream this strategy talks to.
    fn api(&self) -> SourceKind;

    /// Performs a single attempt.
    ///
    /// # Errors
    ///
    /// Returns a classified [`FetchError`] on any failure.
    async fn fetch(&self) -> Result<Snapshot<Self::Record>, FetchError>;
}

/// Keeps only records whose id is in `wanted` and keys them by that id.
///
/// When several records share an id the last one wins.
pub fn key_by_id<R, F>(records: Vec<R>, wanted: &BTreeSet<String>, id: F) -> Snapshot<R>
where
    F: Fn(&R) -> &str,
{
    let mut snapshot = Snapshot::new();
    for record in records {
        let key = id(&record);
        if wanted.contains(key) {
            snapshot.insert(key.to_owned(), record);
        }
    }
    snapshot
}

/// Runs `parse` over `body` on the blocking pool.
///
/// A credential rejection becomes [`FetchError::AuthFailure`]. Any other
/// parse failure, including a panic in the parse task, is logged and
/// treated as no usable records so the caller's retry loop keeps control.
///
/// # Errors
///
/// Returns [`FetchError::AuthFailure`] only.
pub async fn parse_off_thread<R, F>(
    api: SourceKind,
    body: Vec<u8>,
    parse: F,
) -> Result<Vec<R>, FetchError>
where
    R: Send + 'static,
    F: FnOnce(&[u8]) -> Result<Vec<R>, taiwan_aqm_parser::ParseError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || parse(&body)).await {
        Ok(Ok(records)) => Ok(records),
        Ok(Err(taiwan_aqm_parser::ParseError::AuthRejected)) => {
            Err(FetchError::AuthFailure { api })
        }
        Ok(Err(e)) => {
            log::error!("[{api}] Failed to parse response: {e}");
            Ok(Vec::new())
        }
        Err(e) => {
            log::error!("[{api}] Parse task failed: {e}");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_failure_is_terminal() {
        let api = SourceKind::Site;
        assert!(!FetchError::AuthFailure { api }.is_retryable());
        assert!(FetchError::NoDataFound { api }.is_retryable());
        assert!(FetchError::NoRecordsFound { api }.is_retryable());
        assert!(FetchError::UnexpectedStatus { api, code: 502 }.is_retryable());
        assert!(
            FetchError::RequestTimeout {
                api,
                detail: String::new()
            }
            .is_retryable()
        );
        assert!(
            FetchError::RequestFailed {
                api,
                detail: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn messages_name_the_source() {
        let err = FetchError::UnexpectedStatus {
            api: SourceKind::MicroSensor,
            code: 503,
        };
        assert_eq!(
            err.to_string(),
            "Micro_Sensor API returned unexpected status code: 503"
        );
        assert_eq!(err.api(), SourceKind::MicroSensor);
    }

    #[test]
    fn filters_to_configured_ids() {
        let records = vec!["A", "B", "C"];
        let wanted: BTreeSet<String> = ["A", "C"].iter().map(|s| (*s).to_owned()).collect();
        let snapshot = key_by_id(records, &wanted, |r| *r);
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn parse_failures_become_empty_results() {
        let api = SourceKind::Site;

        let ok = parse_off_thread(api, b"1,2".to_vec(), |b| Ok(vec![b.len()])).await;
        assert_eq!(ok, Ok(vec![3]));

        let empty = parse_off_thread::<usize, _>(api, Vec::new(), |_| {
            Err(taiwan_aqm_parser::ParseError::EmptyBody)
        })
        .await;
        assert_eq!(empty, Ok(Vec::new()));

        let panicked =
            parse_off_thread::<usize, _>(api, Vec::new(), |_| panic!("bad row")).await;
        assert_eq!(panicked, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn auth_rejection_is_classified() {
        let result = parse_off_thread::<usize, _>(SourceKind::MicroSensor, Vec::new(), |_| {
            Err(taiwan_aqm_parser::ParseError::AuthRejected)
        })
        .await;
        assert_eq!(
            result,
            Err(FetchError::AuthFailure {
                api: SourceKind::MicroSensor
            })
        );
    }
}
