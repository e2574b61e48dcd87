//! Fixed-station feed parsing (CSV and JSON formats).
//!
//! Each kept row becomes a [`StationRecord`] holding every column present
//! in that row as an uncoerced string. Rows without a `siteid` are dropped.

use std::collections::BTreeMap;

use serde_json::Value;
use taiwan_aqm_source_models::StationRecord;

use crate::decode::decode_body;
use crate::json::{RECORDS_KEY, extract_array};
use crate::{ParseError, ensure_authorized};

/// Decodes and validates a body shared by both formats: decoding never
/// fails, a blank body is [`ParseError::EmptyBody`], and credential
/// rejections are caught before any structured parse.
fn prepare(bytes: &[u8]) -> Result<String, ParseError> {
    let decoded = decode_body(bytes);
    log::debug!(
        "Raw Site API response length: {} characters ({})",
        decoded.text.chars().count(),
        decoded.encoding
    );

    if decoded.text.trim().is_empty() {
        log::warn!("Received empty body in Site API response");
        return Err(ParseError::EmptyBody);
    }

    ensure_authorized(&decoded.text)?;
    Ok(decoded.text)
}

/// Parses a CSV body with a header row.
///
/// Rows shorter than the header only carry the columns they actually
/// have; surplus cells beyond the header are ignored.
///
/// # Errors
///
/// * [`ParseError::EmptyBody`] if the body is blank.
/// * [`ParseError::AuthRejected`] if the body is a key rejection message.
/// * [`ParseError::Csv`] if the rows cannot be read.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<StationRecord>, ParseError> {
    let text = prepare(bytes)?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_owned())
        .collect();

    let mut records = Vec::new();
    let mut dropped = 0_usize;

    for row in reader.records() {
        let row = row?;
        let fields: BTreeMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .map(|(header, value)| (header.clone(), value.to_owned()))
            .collect();

        match StationRecord::from_fields(fields) {
            Some(record) => records.push(record),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        log::debug!("Dropped {dropped} CSV rows without a siteid");
    }
    log::debug!("Parsed {} records from CSV", records.len());

    Ok(records)
}

/// Parses a JSON body whose records live under `"records"`.
///
/// Scalar values are stringified (`null` becomes `""`); nested objects and
/// arrays are skipped.
///
/// # Errors
///
/// * [`ParseError::EmptyBody`] if the body is blank.
/// * [`ParseError::AuthRejected`] if the body is a key rejection message.
pub fn parse_json(bytes: &[u8]) -> Result<Vec<StationRecord>, ParseError> {
    let text = prepare(bytes)?;

    let records: Vec<StationRecord> = extract_array(&text, RECORDS_KEY)
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => StationRecord::from_fields(
                object
                    .into_iter()
                    .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key, v)))
                    .collect(),
            ),
            _ => None,
        })
        .collect();

    log::debug!("Parsed {} records from JSON", records.len());
    Ok(records)
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "sitename,county,aqi,pollutant,status,so2,siteid\n\
                       士林,臺北市,35,,良好,1.2,11\n\
                       中山,臺北市,52,細懸浮微粒,普通,,12\n";

    #[test]
    fn parses_rows_as_raw_strings() {
        let records = parse_csv(CSV.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].station_id, "11");
        assert_eq!(records[0].get("aqi"), Some("35"));
        assert_eq!(records[0].get("pollutant"), Some(""));
        assert_eq!(records[1].get("status"), Some("普通"));
        assert_eq!(records[1].get("so2"), Some(""));
    }

    #[test]
    fn bom_and_plain_bodies_match() {
        let mut with_bom = b"\xEF\xBB\xBF".to_vec();
        with_bom.extend_from_slice(CSV.as_bytes());
        assert_eq!(
            parse_csv(&with_bom).unwrap(),
            parse_csv(CSV.as_bytes()).unwrap()
        );
    }

    #[test]
    fn big5_body_matches_utf8() {
        let (big5, _, _) = encoding_rs::BIG5.encode(CSV);
        assert_eq!(
            parse_csv(&big5).unwrap(),
            parse_csv(CSV.as_bytes()).unwrap()
        );
    }

    #[test]
    fn rows_without_siteid_are_dropped() {
        let body = "siteid,aqi\n1,20\n,30\n3,40\n";
        let ids: Vec<String> = parse_csv(body.as_bytes())
            .unwrap()
            .into_iter()
            .map(|r| r.station_id)
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn short_rows_omit_missing_columns() {
        let body = "siteid,aqi,so2\n1,20\n";
        let records = parse_csv(body.as_bytes()).unwrap();
        assert_eq!(records[0].get("aqi"), Some("20"));
        assert_eq!(records[0].get("so2"), None);
    }

    #[test]
    fn blank_body_is_empty_signal() {
        assert!(matches!(parse_csv(b"  \r\n "), Err(ParseError::EmptyBody)));
        assert!(matches!(parse_json(b""), Err(ParseError::EmptyBody)));
    }

    #[test]
    fn auth_message_wins_over_valid_csv() {
        // Parses as a one-column CSV, but is still a rejection.
        let body = "message\nAPI key expired\n";
        assert!(matches!(
            parse_csv(body.as_bytes()),
            Err(ParseError::AuthRejected)
        ));
    }

    #[test]
    fn auth_message_wins_over_valid_json() {
        let body = r#"{"records": [], "message": "api_key 無效"}"#;
        assert!(matches!(
            parse_json(body.as_bytes()),
            Err(ParseError::AuthRejected)
        ));
    }

    #[test]
    fn json_records_are_stringified() {
        let body = r#"{"records": [
            {"siteid": "32", "aqi": 57, "so2": null, "extra": {"a": 1}},
            {"aqi": "12"}
        ]}"#;
        let records = parse_json(body.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("aqi"), Some("57"));
        assert_eq!(records[0].get("so2"), Some(""));
        assert_eq!(records[0].get("extra"), None);
    }

    #[test]
    fn truncated_json_recovers_records() {
        let body = r#"{"records": [{"siteid": "1", "aqi": "20"}, {"siteid": "2", "aqi": "30"}], "__extr"#;
        let records = parse_json(body.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("aqi"), Some("30"));
    }
}
