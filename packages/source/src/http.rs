//! Shared HTTP client construction and response classification.

use std::time::Duration;

use taiwan_aqm_source_models::SourceKind;

use crate::FetchError;

/// User-Agent header sent with every upstream request.
pub const USER_AGENT: &str = concat!("taiwan_aqm/", env!("CARGO_PKG_VERSION"));

/// Builds the HTTP client shared by every fetcher of one monitor.
///
/// The upstream government endpoints have served incomplete certificate
/// chains, so verification can be disabled per configuration.
///
/// # Errors
///
/// Returns [`reqwest::Error`] if the TLS backend cannot be initialised.
pub fn build_client(accept_invalid_certs: bool) -> Result<reqwest::Client, reqwest::Error> {
    if accept_invalid_certs {
        log::debug!("TLS certificate verification disabled");
    }
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .connect_timeout(Duration::from_secs(10))
        .build()
}

/// Sends `request` and returns the raw body bytes.
///
/// Decoding is left to the parser, which sniffs the charset itself.
///
/// # Errors
///
/// * [`FetchError::RequestTimeout`] if the deadline elapsed.
/// * [`FetchError::UnexpectedStatus`] for a non-2xx status.
/// * [`FetchError::RequestFailed`] for any other transport failure.
pub async fn get_bytes(
    api: SourceKind,
    request: reqwest::RequestBuilder,
) -> Result<Vec<u8>, FetchError> {
    let response = request
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(api, &e))?;

    let status = response.status();
    if !status.is_success() {
        log::warn!("[{api}] HTTP {status} from {}", response.url());
        return Err(FetchError::UnexpectedStatus {
            api,
            code: status.as_u16(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::from_reqwest(api, &e))?;

    log::debug!("[{api}] received {} bytes", body.len());
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_the_crate_version() {
        assert!(USER_AGENT.starts_with("taiwan_aqm/"));
        assert!(USER_AGENT.len() > "taiwan_aqm/".len());
    }

    #[test]
    fn builds_client_with_and_without_verification() {
        assert!(build_client(true).is_ok());
        assert!(build_client(false).is_ok());
    }
}
