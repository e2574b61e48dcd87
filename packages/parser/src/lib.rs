#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Response parsing for the air-quality feeds.
//!
//! Everything here is a pure function over owned bytes or text: no I/O
//! and no scheduling. Two pipelines are provided:
//!
//! * [`site`] turns the fixed-station feed (CSV, or JSON with a `records`
//!   array) into [`StationRecord`](taiwan_aqm_source_models::StationRecord)s.
//! * [`sensor_things`] flattens the micro sensor `SensorThings` feed into
//!   [`MicroSensorRecord`](taiwan_aqm_source_models::MicroSensorRecord)s.
//!
//! Both share the encoding fallback chain in [`decode`] and the
//! strict-then-recovery JSON extraction in [`json`].

pub mod decode;
pub mod json;
pub mod sensor_things;
pub mod site;

/// Lower-cased fragments of the upstream's bilingual "API key does not
/// exist / has expired / is invalid" messages.
pub const AUTH_FAILURE_KEYWORDS: &[&str] =
    &["不存在", "過期", "失效", "無效", "expired", "invalid"];

/// Errors produced while parsing a response body.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The body is an upstream message rejecting the API key.
    #[error("API key rejected by upstream")]
    AuthRejected,

    /// The body was empty or whitespace only.
    #[error("empty response body")]
    EmptyBody,

    /// The body could not be read as delimited rows.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The body could not be read as JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns `true` if `text` looks like an upstream credential rejection.
///
/// Matching is a case-insensitive substring search over
/// [`AUTH_FAILURE_KEYWORDS`] and runs before any structured parse, since
/// such bodies are neither valid CSV nor meaningful JSON.
#[must_use]
pub fn is_auth_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    AUTH_FAILURE_KEYWORDS
        .iter()
        .any(|keyword| lower.contains(keyword))
}

/// Fails with [`ParseError::AuthRejected`] if `text` is a credential
/// rejection, logging the start of the body.
///
/// # Errors
///
/// Returns [`ParseError::AuthRejected`] when [`is_auth_failure`] matches.
pub fn ensure_authorized(text: &str) -> Result<(), ParseError> {
    if is_auth_failure(text) {
        let preview: String = text.chars().take(100).collect();
        log::error!("Detected possible auth issue in API response: {preview}");
        return Err(ParseError::AuthRejected);
    }
    Ok(())
}
