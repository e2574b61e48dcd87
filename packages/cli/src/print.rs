//! Plain-text rendering of snapshots.

use std::fmt::Write as _;

use serde_json::Value;
use taiwan_aqm_source::registry;
use taiwan_aqm_source_models::sensor_info::{self, SITE_SENSORS, SensorInfo};
use taiwan_aqm_source_models::{MicroSensorRecord, Snapshot, StationRecord};

/// Renders a raw value with the unit and precision of `info`.
///
/// Precision is only applied to values that already carry decimals, so
/// integer readings such as the AQI stay integral.
fn format_value(raw: &str, info: Option<&SensorInfo>) -> String {
    let Some(info) = info else {
        return raw.to_owned();
    };

    let number = match (info.precision, raw.parse::<f64>()) {
        (Some(precision), Ok(value)) if raw.contains('.') => {
            format!("{value:.prec$}", prec = usize::from(precision))
        }
        _ => raw.to_owned(),
    };

    match info.unit {
        Some(unit) => format!("{number} {unit}"),
        None => number,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_owned(),
        other => other.to_string(),
    }
}

/// One block per station, catalogued keys in catalogue order. Keys the
/// station left blank are shown as `-`.
pub fn render_sites(snapshot: &Snapshot<StationRecord>) -> String {
    let mut out = String::new();

    for (id, record) in snapshot {
        let name = record
            .get("sitename")
            .or_else(|| registry::site_name(id))
            .unwrap_or("");
        let _ = writeln!(out, "{id} {name}");

        for info in SITE_SENSORS {
            let Some(raw) = record.get(info.key) else {
                continue;
            };
            let shown = if record.is_unreported(info.key) {
                "-".to_owned()
            } else {
                format_value(raw, Some(info))
            };
            let _ = writeln!(out, "  {:<12} {shown}", info.key);
        }
    }

    out
}

/// One block per Thing with its location and every reading.
pub fn render_micro(snapshot: &Snapshot<MicroSensorRecord>) -> String {
    let mut out = String::new();

    for (id, record) in snapshot {
        let description = record.description.as_deref().unwrap_or("");
        let _ = writeln!(out, "{id} {description}");
        let _ = writeln!(
            out,
            "  {:<12} {}, {}",
            "location", record.latitude, record.longitude
        );

        for (sensor, reading) in &record.readings {
            let key = sensor.as_ref();
            let shown = format_value(&value_text(&reading.value), sensor_info::micro_sensor(key));
            let _ = writeln!(out, "  {key:<12} {shown} ({})", reading.time);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use taiwan_aqm_source_models::{Coordinate, Reading, SensorType};

    use super::*;

    fn station(pairs: &[(&str, &str)]) -> StationRecord {
        StationRecord::from_fields(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn formats_units_and_precision() {
        let pm25 = sensor_info::site_sensor("pm2.5");
        assert_eq!(format_value("18", pm25), "18 µg/m³");
        assert_eq!(format_value("18.456", pm25), "18.46 µg/m³");
        assert_eq!(format_value("57", sensor_info::site_sensor("aqi")), "57");
        assert_eq!(format_value("良好", sensor_info::site_sensor("status")), "良好");
        assert_eq!(format_value("x", None), "x");
    }

    #[test]
    fn renders_station_blocks() {
        let snapshot = Snapshot::from([(
            "32".to_owned(),
            station(&[("siteid", "32"), ("aqi", "57"), ("so2", ""), ("county", "臺中市")]),
        )]);

        let text = render_sites(&snapshot);

        assert!(text.starts_with("32 臺中市西屯\n"));
        assert!(text.contains("  aqi          57\n"));
        assert!(text.contains("  so2          -\n"));
        assert!(!text.contains("county"));
    }

    #[test]
    fn renders_micro_blocks() {
        let record = MicroSensorRecord {
            station_id: "10287843".to_owned(),
            thing_id: Some(Value::from(7)),
            description: Some("臺中市西屯區".to_owned()),
            area_type: None,
            area_description: None,
            authority: None,
            latitude: Coordinate::Degrees(24.16),
            longitude: Coordinate::Unknown,
            readings: BTreeMap::from([(
                SensorType::Temperature,
                Reading {
                    value: Value::from(26.5),
                    time: "2024-05-01 10:00:00".to_owned(),
                },
            )]),
        };
        let snapshot = Snapshot::from([("10287843".to_owned(), record)]);

        let text = render_micro(&snapshot);

        assert!(text.contains("10287843 臺中市西屯區\n"));
        assert!(text.contains("location     24.16, unknown"));
        assert!(text.contains("temperature  26.50 °C (2024-05-01 10:00:00)"));
    }
}
