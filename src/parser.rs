use std::collections::HashMap;

use crate::model::{CounterEvent, LogEntry};

/// A non-fatal condition surfaced while parsing one [`LogEntry`].
///
/// The reader turns these into [`crate::events::ConsumerEvent::Warn`]
/// notifications; this module stays a pure function and never touches the
/// event bus directly, so it can be unit tested in isolation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserWarning {
    /// Required fields (`scope`, `delta`) missing or unparseable. The raw
    /// fields are carried along for the diagnostic log line.
    MalformedEvent { fields: Vec<(String, String)> },
    /// `metadata` was present but could not be decoded. Non-fatal: the
    /// event is still produced, just without metadata.
    MetadataDecodeFailed { error: String },
}

/// Outcome of parsing a single log entry.
///
/// `event` is `None` exactly when a [`ParserWarning::MalformedEvent`] is
/// present; every other warning can coexist with a produced event.
pub struct ParseResult {
    pub event: Option<CounterEvent>,
    pub warnings: Vec<ParserWarning>,
}

/// Parse a flat field list into a [`CounterEvent`].
///
/// Field lists are short (at most 4 pairs in practice) so this scans
/// linearly rather than building a temporary map.
pub fn parse_entry(entry: &LogEntry) -> ParseResult {
    let scope = entry.field("scope").filter(|s| !s.is_empty());
    let delta = entry.field("delta").and_then(|d| d.trim().parse::<i64>().ok());

    let (scope, delta) = match (scope, delta) {
        (Some(scope), Some(delta)) => (scope.to_string(), delta),
        _ => {
            return ParseResult {
                event: None,
                warnings: vec![ParserWarning::MalformedEvent {
                    fields: entry.fields.clone(),
                }],
            }
        }
    };

    let timestamp_ms = entry
        .field("timestamp")
        .and_then(|t| t.trim().parse::<i64>().ok())
        .unwrap_or_else(now_ms);

    let mut warnings = Vec::new();
    let metadata = entry.field("metadata").and_then(|raw| {
        match serde_json::from_str::<HashMap<String, String>>(raw) {
            Ok(map) => Some(map),
            Err(e) => {
                warnings.push(ParserWarning::MetadataDecodeFailed {
                    error: e.to_string(),
                });
                None
            }
        }
    });

    ParseResult {
        event: Some(CounterEvent {
            scope,
            delta,
            timestamp_ms,
            metadata,
        }),
        warnings,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fields: &[(&str, &str)]) -> LogEntry {
        LogEntry {
            id: "1-0".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn parses_a_well_formed_event() {
        let e = entry(&[("scope", "likes"), ("delta", "1"), ("timestamp", "1000")]);
        let result = parse_entry(&e);
        assert!(result.warnings.is_empty());
        let event = result.event.expect("event should parse");
        assert_eq!(event.scope, "likes");
        assert_eq!(event.delta, 1);
        assert_eq!(event.timestamp_ms, 1000);
        assert!(event.metadata.is_none());
    }

    #[test]
    fn missing_scope_is_malformed() {
        let e = entry(&[("delta", "1")]);
        let result = parse_entry(&e);
        assert!(result.event.is_none());
        assert!(matches!(
            result.warnings.as_slice(),
            [ParserWarning::MalformedEvent { .. }]
        ));
    }

    #[test]
    fn missing_delta_is_malformed() {
        let e = entry(&[("scope", "likes")]);
        let result = parse_entry(&e);
        assert!(result.event.is_none());
    }

    #[test]
    fn unparseable_delta_is_malformed() {
        let e = entry(&[("scope", "likes"), ("delta", "not-a-number")]);
        let result = parse_entry(&e);
        assert!(result.event.is_none());
    }

    #[test]
    fn zero_delta_is_legal() {
        let e = entry(&[("scope", "likes"), ("delta", "0")]);
        let result = parse_entry(&e);
        assert_eq!(result.event.unwrap().delta, 0);
    }

    #[test]
    fn missing_timestamp_defaults_to_wall_clock() {
        let e = entry(&[("scope", "likes"), ("delta", "1")]);
        let before = now_ms();
        let event = parse_entry(&e).event.unwrap();
        assert!(event.timestamp_ms >= before);
    }

    #[test]
    fn bad_metadata_warns_but_keeps_event() {
        let e = entry(&[("scope", "likes"), ("delta", "1"), ("metadata", "{not json")]);
        let result = parse_entry(&e);
        assert!(result.event.is_some());
        assert!(matches!(
            result.warnings.as_slice(),
            [ParserWarning::MetadataDecodeFailed { .. }]
        ));
    }

    #[test]
    fn valid_metadata_is_decoded() {
        let e = entry(&[
            ("scope", "likes"),
            ("delta", "1"),
            ("metadata", r#"{"source":"mobile"}"#),
        ]);
        let event = parse_entry(&e).event.unwrap();
        assert_eq!(
            event.metadata.unwrap().get("source").map(String::as_str),
            Some("mobile")
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let e = entry(&[("scope", "likes"), ("delta", "1"), ("bogus", "xyz")]);
        let result = parse_entry(&e);
        assert!(result.event.is_some());
        assert!(result.warnings.is_empty());
    }
}
