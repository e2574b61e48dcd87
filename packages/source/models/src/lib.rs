#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Record types shared by the parser, fetchers, and poll coordinators.
//!
//! Upstream payloads from the fixed-station feed and the micro-sensor
//! `SensorThings` feed are normalized into [`StationRecord`] and
//! [`MicroSensorRecord`] values, then keyed by station identifier into a
//! [`Snapshot`].

pub mod sensor_info;

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

/// Placeholder emitted for coordinates and timestamps that could not be
/// determined.
pub const UNKNOWN: &str = "unknown";

/// Column that carries the station identifier in the fixed-station feed.
pub const SITE_ID_FIELD: &str = "siteid";

/// Which upstream API a record or failure belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr,
)]
pub enum SourceKind {
    /// Fixed government monitoring stations.
    #[strum(serialize = "Site")]
    Site,
    /// `SensorThings` micro sensor network.
    #[strum(serialize = "Micro_Sensor")]
    MicroSensor,
}

/// The authoritative id → record mapping owned by a coordinator.
///
/// Replaced wholesale on every successful poll; never merged.
pub type Snapshot<R> = BTreeMap<String, R>;

/// One fixed monitoring station's latest reading.
///
/// `fields` holds exactly the columns upstream returned for the row. A
/// column reported as the empty string is kept as `""`, which is distinct
/// from the column being absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationRecord {
    /// Upstream registry identifier (the `siteid` column).
    pub station_id: String,
    /// Raw column → value pairs, uncoerced.
    pub fields: BTreeMap<String, String>,
}

impl StationRecord {
    /// Builds a record from a parsed row. Returns `None` when the row has
    /// no usable `siteid`.
    #[must_use]
    pub fn from_fields(fields: BTreeMap<String, String>) -> Option<Self> {
        let station_id = fields.get(SITE_ID_FIELD)?.trim().to_owned();
        if station_id.is_empty() {
            return None;
        }
        Some(Self { station_id, fields })
    }

    /// Returns the raw value for `key`, or `None` if the column is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Returns `true` if `key` is present but reported as empty.
    #[must_use]
    pub fn is_unreported(&self, key: &str) -> bool {
        self.get(key).is_some_and(str::is_empty)
    }
}

/// A latitude or longitude that is either known or the `"unknown"`
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coordinate {
    /// Degrees, WGS84.
    Degrees(f64),
    /// Axis order could not be determined.
    Unknown,
}

impl Coordinate {
    /// Returns the value in degrees, if known.
    #[must_use]
    pub const fn degrees(self) -> Option<f64> {
        match self {
            Self::Degrees(v) => Some(v),
            Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Degrees(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Degrees(v) => serializer.serialize_f64(*v),
            Self::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

/// Canonical sensor type for a `SensorThings` datastream.
///
/// Declaration order is the classification order: the first type whose
/// keywords match a datastream name wins.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum SensorType {
    /// Fine particulate matter.
    #[strum(serialize = "pm2.5")]
    #[serde(rename = "pm2.5")]
    Pm25,
    /// Coarse particulate matter.
    #[strum(serialize = "pm10")]
    #[serde(rename = "pm10")]
    Pm10,
    /// Ultrafine particulate matter.
    #[strum(serialize = "pm1")]
    #[serde(rename = "pm1")]
    Pm1,
    #[strum(serialize = "temperature")]
    #[serde(rename = "temperature")]
    Temperature,
    #[strum(serialize = "humidity")]
    #[serde(rename = "humidity")]
    Humidity,
    /// Carbon monoxide.
    #[strum(serialize = "co")]
    #[serde(rename = "co")]
    Co,
    /// Ozone.
    #[strum(serialize = "o3")]
    #[serde(rename = "o3")]
    O3,
    /// Nitrogen dioxide.
    #[strum(serialize = "no2")]
    #[serde(rename = "no2")]
    No2,
    /// Volatile organic compounds.
    #[strum(serialize = "voc")]
    #[serde(rename = "voc")]
    Voc,
}

impl SensorType {
    /// All sensor types in classification order.
    pub const ALL: &[Self] = &[
        Self::Pm25,
        Self::Pm10,
        Self::Pm1,
        Self::Temperature,
        Self::Humidity,
        Self::Co,
        Self::O3,
        Self::No2,
        Self::Voc,
    ];

    /// Key under which this reading's timestamp is exposed (e.g.
    /// `"pm2.5_time"`).
    #[must_use]
    pub fn time_key(self) -> String {
        format!("{}_time", self.as_ref())
    }
}

/// Most recent observation of one datastream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Raw `result` value from the observation.
    pub value: serde_json::Value,
    /// Local `%Y-%m-%d %H:%M:%S` timestamp, or `"unknown"`.
    pub time: String,
}

/// One micro air-quality sensor Thing in the `SensorThings` network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MicroSensorRecord {
    /// Business station code (`properties.stationID`).
    pub station_id: String,
    /// Protocol-level `@iot.id`.
    pub thing_id: Option<serde_json::Value>,
    pub description: Option<String>,
    pub area_type: Option<String>,
    pub area_description: Option<String>,
    pub authority: Option<String>,
    pub latitude: Coordinate,
    pub longitude: Coordinate,
    /// Only populated for sensor types present in the Thing's datastreams.
    pub readings: BTreeMap<SensorType, Reading>,
}

impl MicroSensorRecord {
    /// Returns the latest reading for `sensor`, if the Thing reports it.
    #[must_use]
    pub fn reading(&self, sensor: SensorType) -> Option<&Reading> {
        self.readings.get(&sensor)
    }

    /// Flattens the record into `key → value` pairs, with each reading
    /// exposed as `<type>` and `<type>_time`.
    #[must_use]
    pub fn to_fields(&self) -> BTreeMap<String, serde_json::Value> {
        let mut fields = BTreeMap::new();
        let text = |s: &Option<String>| {
            s.clone()
                .map_or(serde_json::Value::Null, serde_json::Value::String)
        };
        let coord = |c: Coordinate| match c {
            Coordinate::Degrees(v) => serde_json::json!(v),
            Coordinate::Unknown => serde_json::Value::String(UNKNOWN.to_owned()),
        };

        fields.insert(
            "thing_id".to_owned(),
            self.thing_id.clone().unwrap_or(serde_json::Value::Null),
        );
        fields.insert(
            "stationID".to_owned(),
            serde_json::Value::String(self.station_id.clone()),
        );
        fields.insert("Description".to_owned(), text(&self.description));
        fields.insert("areaType".to_owned(), text(&self.area_type));
        fields.insert("areaDescription".to_owned(), text(&self.area_description));
        fields.insert("authority".to_owned(), text(&self.authority));
        fields.insert("latitude".to_owned(), coord(self.latitude));
        fields.insert("longitude".to_owned(), coord(self.longitude));

        for (sensor, reading) in &self.readings {
            fields.insert(sensor.as_ref().to_owned(), reading.value.clone());
            fields.insert(
                sensor.time_key(),
                serde_json::Value::String(reading.time.clone()),
            );
        }

        fields
    }
}
