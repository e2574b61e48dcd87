//! Resolves a micro sensor's business station id to its `SensorThings`
//! `@iot.id`.

use std::time::Duration;

use serde_json::Value;
use taiwan_aqm_parser::decode::decode_body;
use taiwan_aqm_parser::json::{VALUE_KEY, parse_document};
use taiwan_aqm_source_models::SourceKind;

use crate::{FetchError, http};

/// Deadline for a single lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Looks up the Thing registered under `station_id`.
///
/// Returns `Ok(None)` when no Thing carries that station id.
///
/// # Errors
///
/// * Any transport or status failure from [`http::get_bytes`].
/// * [`FetchError::NoRecordsFound`] if the body is not a `SensorThings`
///   document.
pub async fn lookup_thing_id(
    client: &reqwest::Client,
    base_url: &str,
    station_id: &str,
) -> Result<Option<Value>, FetchError> {
    let api = SourceKind::MicroSensor;
    let filter = format!(
        "properties/stationID eq '{}'",
        station_id.replace('\'', "''")
    );
    let request = client
        .get(base_url)
        .query(&[("$filter", filter.as_str()), ("$select", "@iot.id")])
        .timeout(LOOKUP_TIMEOUT);

    let body = http::get_bytes(api, request).await?;
    let thing_id = thing_id_from_body(&body).ok_or(FetchError::NoRecordsFound { api })?;

    match &thing_id {
        Some(id) => log::info!("[{api}] Station {station_id} is Thing {id}"),
        None => log::warn!("[{api}] No Thing registered for station {station_id}"),
    }
    Ok(thing_id)
}

/// `None` if the body is not a JSON object; `Some(None)` if it reports
/// no matching Thing.
fn thing_id_from_body(body: &[u8]) -> Option<Option<Value>> {
    let document = parse_document(&decode_body(body).text)?;
    if !document.is_object() {
        return None;
    }
    if document.get("@iot.count").and_then(Value::as_u64) == Some(0) {
        return Some(None);
    }
    Some(
        document
            .get(VALUE_KEY)
            .and_then(Value::as_array)
            .and_then(|things| things.first())
            .and_then(|thing| thing.get("@iot.id"))
            .cloned(),
    )
}
