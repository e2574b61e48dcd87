//! Strict-then-recovery extraction of a record array from a JSON document.
//!
//! Upstream occasionally truncates or wraps its JSON responses. When the
//! whole document does not parse, the array under the wanted key is cut
//! out by locating `"<key>": [` and scanning to its matching `]`, and that
//! fragment alone is parsed.

use regex::Regex;
use serde_json::Value;

/// Key holding the record array in the fixed-station JSON feed.
pub const RECORDS_KEY: &str = "records";

/// Key holding the Thing array in `SensorThings` responses.
pub const VALUE_KEY: &str = "value";

/// Parses `text` as a whole document and returns it, or `None` if it is
/// not valid JSON.
#[must_use]
pub fn parse_document(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Returns the array stored under `key`.
///
/// Never fails: a document with no such array, or a malformed document
/// whose fragment cannot be recovered, yields an empty list.
#[must_use]
pub fn extract_array(text: &str, key: &str) -> Vec<Value> {
    match parse_document(text) {
        Some(Value::Object(mut object)) => match object.remove(key) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                log::warn!("JSON key \"{key}\" is not an array");
                Vec::new()
            }
            None => {
                log::warn!("JSON response has no \"{key}\" array");
                Vec::new()
            }
        },
        Some(Value::Array(items)) => items,
        Some(_) => {
            log::warn!("JSON response is neither an object nor an array");
            Vec::new()
        }
        None => recover_array(text, key),
    }
}

/// Recovery path for documents that fail the strict parse.
#[must_use]
pub fn recover_array(text: &str, key: &str) -> Vec<Value> {
    log::warn!("Strict JSON parse failed, attempting to recover \"{key}\" array");

    let Some(fragment) = find_array_fragment(text, key) else {
        log::error!("No \"{key}\" array found in malformed JSON response");
        return Vec::new();
    };

    match serde_json::from_str::<Vec<Value>>(fragment) {
        Ok(items) => {
            log::debug!("Recovered {} items from \"{key}\" fragment", items.len());
            items
        }
        Err(e) => {
            log::error!("Recovered \"{key}\" fragment is not a JSON array: {e}");
            Vec::new()
        }
    }
}

/// Locates the `[...]` fragment following `"<key>":`, including both
/// brackets. Brackets inside string literals are ignored. Returns `None`
/// if the key is absent or the array is never closed.
#[must_use]
pub fn find_array_fragment<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!(r#""{}"\s*:\s*\["#, regex::escape(key));
    let re = Regex::new(&pattern).ok()?;
    let found = re.find(text)?;
    let start = found.end() - 1;

    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_returns_records() {
        let body = r#"{"fields": [], "records": [{"siteid": "1"}, {"siteid": "2"}]}"#;
        let records = extract_array(body, RECORDS_KEY);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["siteid"], "2");
    }

    #[test]
    fn missing_key_is_empty() {
        assert!(extract_array(r#"{"total": 0}"#, RECORDS_KEY).is_empty());
        assert!(extract_array(r#"{"records": "none"}"#, RECORDS_KEY).is_empty());
    }

    #[test]
    fn truncated_document_recovers_complete_fragment() {
        let body = r#"{"records": [{"siteid": "1", "aqi": "40"}, {"siteid": "2", "aqi": ""}], "links": {"next": "htt"#;
        let records = extract_array(body, RECORDS_KEY);
        assert_eq!(
            records,
            vec![
                serde_json::json!({"siteid": "1", "aqi": "40"}),
                serde_json::json!({"siteid": "2", "aqi": ""}),
            ]
        );
    }

    #[test]
    fn wrapped_document_recovers_fragment() {
        let body = r#"callback({"value": [{"@iot.id": 7, "name": "a]b"}]});"#;
        let items = extract_array(body, VALUE_KEY);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "a]b");
    }

    #[test]
    fn nested_arrays_are_kept_whole() {
        let text = r#"{"value": [{"coordinates": [121.5, 25.0]}, {"x": []}], "#;
        assert_eq!(
            find_array_fragment(text, VALUE_KEY),
            Some(r#"[{"coordinates": [121.5, 25.0]}, {"x": []}]"#)
        );
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let text = r#"{"records": [{"note": "say \"]\" twice"}] oops"#;
        let records = extract_array(text, RECORDS_KEY);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["note"], r#"say "]" twice"#);
    }

    #[test]
    fn unclosed_array_yields_empty() {
        let body = r#"{"records": [{"siteid": "1"}, {"siteid": "#;
        assert!(find_array_fragment(body, RECORDS_KEY).is_none());
        assert!(extract_array(body, RECORDS_KEY).is_empty());
    }

    #[test]
    fn no_match_yields_empty() {
        assert!(extract_array("<html>502 Bad Gateway</html>", RECORDS_KEY).is_empty());
    }
}
