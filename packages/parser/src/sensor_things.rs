//! Flattening of `SensorThings` micro sensor responses.
//!
//! A response looks like `{"@iot.count": n, "value": [Thing, ...]}` where
//! each Thing carries `properties`, `Locations[0].location.coordinates`
//! and `Datastreams[].Observations[0]` (newest first).

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use taiwan_aqm_source_models::{
    Coordinate, MicroSensorRecord, Reading, SensorType, UNKNOWN,
};

use crate::ParseError;
use crate::decode::decode_body;
use crate::json::{VALUE_KEY, extract_array, parse_document};

/// Latitude bounds covering Taiwan and its outlying islands.
pub const LAT_RANGE: (f64, f64) = (10.36, 26.40);

/// Longitude bounds covering Taiwan and its outlying islands.
pub const LON_RANGE: (f64, f64) = (114.35, 122.11);

/// Lower-cased datastream name fragments for each sensor type, in
/// classification order.
const SENSOR_KEYWORDS: &[(SensorType, &[&str])] = &[
    (SensorType::Pm25, &["pm2.5", "pm25"]),
    (SensorType::Pm10, &["pm10"]),
    (SensorType::Pm1, &["pm1"]),
    (SensorType::Temperature, &["temperature"]),
    (SensorType::Humidity, &["humidity"]),
    (SensorType::Co, &["co"]),
    (SensorType::O3, &["o3"]),
    (SensorType::No2, &["no2"]),
    (SensorType::Voc, &["voc", "tvoc"]),
];

/// Parses a raw `SensorThings` body.
///
/// A response with `@iot.count` of zero or no `value` array yields an
/// empty list. Things without a `properties.stationID` are skipped.
///
/// # Errors
///
/// Returns [`ParseError::EmptyBody`] if the body is blank.
pub fn parse_things(bytes: &[u8], offset: &FixedOffset) -> Result<Vec<MicroSensorRecord>, ParseError> {
    let text = decode_body(bytes).text;
    if text.trim().is_empty() {
        return Err(ParseError::EmptyBody);
    }

    if let Some(document) = parse_document(&text)
        && document.get("@iot.count").and_then(Value::as_u64) == Some(0)
    {
        log::debug!("SensorThings response reports zero Things");
        return Ok(Vec::new());
    }

    let things: Vec<MicroSensorRecord> = extract_array(&text, VALUE_KEY)
        .iter()
        .filter_map(|thing| flatten_thing(thing, offset))
        .collect();

    log::debug!("Parsed {} Things from SensorThings response", things.len());
    Ok(things)
}

/// Flattens one Thing. Returns `None` when it has no station id.
#[must_use]
pub fn flatten_thing(thing: &Value, offset: &FixedOffset) -> Option<MicroSensorRecord> {
    let properties = thing.get("properties")?;
    let station_id = match properties.get("stationID")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let text = |key: &str| properties.get(key).and_then(Value::as_str).map(str::to_owned);

    let (latitude, longitude) = thing
        .get("Locations")
        .and_then(|locations| locations.get(0))
        .and_then(|location| location.pointer("/location/coordinates"))
        .and_then(Value::as_array)
        .and_then(|coords| Some((coords.first()?.as_f64()?, coords.get(1)?.as_f64()?)))
        .map_or((Coordinate::Unknown, Coordinate::Unknown), |(a, b)| {
            disambiguate_coordinates(a, b)
        });

    let mut readings = BTreeMap::new();
    let datastreams = thing
        .get("Datastreams")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);

    for datastream in datastreams {
        let Some(latest) = datastream
            .get("Observations")
            .and_then(Value::as_array)
            .and_then(|observations| observations.first())
        else {
            continue;
        };

        let name = datastream
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(sensor) = classify_datastream(name) else {
            continue;
        };

        readings.insert(
            sensor,
            Reading {
                value: latest.get("result").cloned().unwrap_or(Value::Null),
                time: format_observation_time(
                    latest.get("phenomenonTime").and_then(Value::as_str),
                    offset,
                ),
            },
        );
    }

    Some(MicroSensorRecord {
        station_id,
        thing_id: thing.get("@iot.id").cloned(),
        description: text("Description"),
        area_type: text("areaType"),
        area_description: text("areaDescription"),
        authority: text("authority"),
        latitude,
        longitude,
        readings,
    })
}

/// Maps a datastream name onto a canonical sensor type.
///
/// Case-insensitive substring match against [`SENSOR_KEYWORDS`]; the
/// first matching type wins. Names containing `main` never classify as
/// temperature or humidity, and names containing `voc` never classify as
/// CO.
#[must_use]
pub fn classify_datastream(name: &str) -> Option<SensorType> {
    let name = name.to_lowercase();

    SENSOR_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map(|(sensor, _)| *sensor)
        .find(|sensor| match sensor {
            SensorType::Temperature | SensorType::Humidity => !name.contains("main"),
            SensorType::Co => !name.contains("voc"),
            _ => true,
        })
}

/// Classifies an ambiguous coordinate pair into `(latitude, longitude)`.
///
/// Either ordering is accepted if it falls inside [`LAT_RANGE`] and
/// [`LON_RANGE`]; otherwise both are [`Coordinate::Unknown`].
#[must_use]
pub fn disambiguate_coordinates(a: f64, b: f64) -> (Coordinate, Coordinate) {
    let is_lat = |v: f64| (LAT_RANGE.0..=LAT_RANGE.1).contains(&v);
    let is_lon = |v: f64| (LON_RANGE.0..=LON_RANGE.1).contains(&v);

    if is_lat(a) && is_lon(b) {
        (Coordinate::Degrees(a), Coordinate::Degrees(b))
    } else if is_lat(b) && is_lon(a) {
        (Coordinate::Degrees(b), Coordinate::Degrees(a))
    } else {
        (Coordinate::Unknown, Coordinate::Unknown)
    }
}

/// Renders an observation `phenomenonTime` in `offset` as
/// `%Y-%m-%d %H:%M:%S`.
///
/// Interval times (`start/end`) use the end instant. Missing or
/// unparseable times render as `"unknown"`.
#[must_use]
pub fn format_observation_time(raw: Option<&str>, offset: &FixedOffset) -> String {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return UNKNOWN.to_owned();
    };
    let instant = raw.rsplit('/').next().unwrap_or(raw);

    match DateTime::parse_from_rfc3339(instant) {
        Ok(dt) => dt
            .with_timezone(offset)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        Err(e) => {
            log::error!("Error parsing observation time '{raw}': {e}");
            UNKNOWN.to_owned()
        }
    }
}
