//! Declarative metadata for the values exposed as sensors.
//!
//! Presentation layers look entries up by record key to decide units,
//! precision, and icons. Nothing in the fetch path depends on this table.

use serde::Serialize;
use strum_macros::{AsRefStr, Display};

/// Kind of quantity a sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceClass {
    Aqi,
    CarbonMonoxide,
    Pm1,
    Pm10,
    Pm25,
    Temperature,
    Humidity,
    /// Gas concentrations reported in parts per billion.
    VolatileOrganicCompoundsParts,
}

/// Metadata for one record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorInfo {
    /// Record key (column name or micro-sensor type).
    pub key: &'static str,
    pub device_class: Option<DeviceClass>,
    pub unit: Option<&'static str>,
    /// Whether the value is a point-in-time measurement.
    pub measurement: bool,
    /// Suggested number of decimal places.
    pub precision: Option<u8>,
    pub icon: Option<&'static str>,
}

const fn gauge(key: &'static str, class: DeviceClass, unit: Option<&'static str>) -> SensorInfo {
    SensorInfo {
        key,
        device_class: Some(class),
        unit,
        measurement: true,
        precision: Some(2),
        icon: None,
    }
}

const fn ppb(key: &'static str) -> SensorInfo {
    SensorInfo {
        icon: Some("mdi:molecule"),
        ..gauge(key, DeviceClass::VolatileOrganicCompoundsParts, Some("ppb"))
    }
}

const fn text(key: &'static str, icon: &'static str) -> SensorInfo {
    SensorInfo {
        key,
        device_class: None,
        unit: None,
        measurement: false,
        precision: None,
        icon: Some(icon),
    }
}

const MICROGRAMS: Option<&str> = Some("µg/m³");

/// Sensors exposed for fixed monitoring stations.
pub const SITE_SENSORS: &[SensorInfo] = &[
    gauge("aqi", DeviceClass::Aqi, None),
    text("pollutant", "mdi:smog"),
    text("status", "mdi:nature-people-outline"),
    text("publishtime", "mdi:update"),
    ppb("so2"),
    ppb("so2_avg"),
    gauge("co", DeviceClass::CarbonMonoxide, Some("ppm")),
    gauge("co_8hr", DeviceClass::CarbonMonoxide, Some("ppm")),
    ppb("o3"),
    ppb("o3_8hr"),
    ppb("no2"),
    ppb("nox"),
    ppb("no"),
    gauge("pm10", DeviceClass::Pm10, MICROGRAMS),
    gauge("pm10_avg", DeviceClass::Pm10, MICROGRAMS),
    gauge("pm2.5", DeviceClass::Pm25, MICROGRAMS),
    gauge("pm2.5_avg", DeviceClass::Pm25, MICROGRAMS),
];

/// Sensors exposed for micro sensor Things.
pub const MICRO_SENSORS: &[SensorInfo] = &[
    gauge("pm2.5", DeviceClass::Pm25, MICROGRAMS),
    gauge("temperature", DeviceClass::Temperature, Some("°C")),
    gauge("humidity", DeviceClass::Humidity, Some("%")),
];

/// Looks up metadata for a station key.
#[must_use]
pub fn site_sensor(key: &str) -> Option<&'static SensorInfo> {
    SITE_SENSORS.iter().find(|info| info.key == key)
}

/// Looks up metadata for a micro sensor key.
#[must_use]
pub fn micro_sensor(key: &str) -> Option<&'static SensorInfo> {
    MICRO_SENSORS.iter().find(|info| info.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_keys_are_unique() {
        let mut keys: Vec<&str> = SITE_SENSORS.iter().map(|s| s.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), SITE_SENSORS.len());
    }

    #[test]
    fn gas_sensors_report_ppb() {
        let so2 = site_sensor("so2").unwrap();
        assert_eq!(so2.unit, Some("ppb"));
        assert_eq!(so2.icon, Some("mdi:molecule"));
        assert!(so2.measurement);
    }

    #[test]
    fn text_sensors_have_no_unit() {
        let status = site_sensor("status").unwrap();
        assert_eq!(status.device_class, None);
        assert_eq!(status.unit, None);
        assert!(!status.measurement);
    }

    #[test]
    fn micro_sensor_lookup() {
        assert_eq!(micro_sensor("temperature").unwrap().unit, Some("°C"));
        assert!(micro_sensor("so2").is_none());
    }
}
