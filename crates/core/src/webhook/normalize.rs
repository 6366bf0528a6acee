//! Inbound webhook body normalization.
//!
//! Kommo delivers the same logical event in several transport shapes: plain
//! JSON, form-urlencoded with percent-escaped bracketed keys
//! (`leads%5Badd%5D%5B0%5D%5Bid%5D=7`), and occasionally form bodies whose
//! values are themselves serialized JSON. The normalizer folds all of them
//! into one canonical nested [`Value`] and never fails: anything it cannot
//! make sense of becomes [`NormalizedBody::Malformed`] so the pipeline can
//! archive it and acknowledge receipt.

use serde_json::{Map, Value};

/// JS runtimes stringify objects used as form keys to this marker; when it
/// shows up the value is usually a JSON document worth parsing.
const OBJECT_MARKER: &str = "[object Object]";

#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedBody {
    Json(Value),
    Form(Value),
    Malformed { raw: String, reason: String },
}

impl NormalizedBody {
    /// Canonical payload object, `None` for malformed input.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Json(value) | Self::Form(value) => Some(value),
            Self::Malformed { .. } => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }

    /// Parsed-payload representation stored in the webhook archive. The
    /// undecoded body is archived separately, so the malformed marker only
    /// carries the decode failure reason.
    pub fn archive_value(&self) -> Value {
        match self {
            Self::Json(value) | Self::Form(value) => value.clone(),
            Self::Malformed { reason, .. } => serde_json::json!({
                "error": "malformed_body",
                "reason": reason,
            }),
        }
    }
}

/// Normalizes a raw request body using the `content-type` hint.
pub fn normalize_body(content_type: Option<&str>, body: &[u8]) -> NormalizedBody {
    let raw = String::from_utf8_lossy(body).into_owned();
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    let looks_like_json = {
        let trimmed = raw.trim_start();
        trimmed.starts_with('{') || trimmed.starts_with('[')
    };

    if content_type.contains("json") {
        return match serde_json::from_str::<Value>(&raw) {
            Ok(value) => NormalizedBody::Json(value),
            Err(error) => NormalizedBody::Malformed { raw, reason: error.to_string() },
        };
    }

    // Form endpoints sometimes receive JSON bodies with a form content-type;
    // a JSON-looking body gets one parse attempt before form decoding.
    if looks_like_json {
        if let Ok(value) = serde_json::from_str::<Value>(&raw) {
            return NormalizedBody::Json(value);
        }
    }

    if content_type.contains("x-www-form-urlencoded") || raw.contains('=') {
        return decode_form(&raw);
    }

    NormalizedBody::Malformed { raw, reason: "unrecognized body encoding".to_string() }
}

fn decode_form(raw: &str) -> NormalizedBody {
    let mut root = Value::Object(Map::new());
    let mut pairs = 0usize;

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let key = key.into_owned();
        let value = value.into_owned();
        if key.is_empty() {
            continue;
        }
        pairs += 1;

        let key = key.replace(OBJECT_MARKER, "value");
        let segments = parse_key_segments(&key);
        insert_nested(&mut root, &segments, coerce_form_value(&value));
    }

    if pairs == 0 {
        return NormalizedBody::Malformed {
            raw: raw.to_string(),
            reason: "no form pairs decoded".to_string(),
        };
    }

    NormalizedBody::Form(root)
}

/// Form values carrying serialized JSON are merged as structured data; plain
/// values stay strings and are coerced downstream.
fn coerce_form_value(value: &str) -> Value {
    let trimmed = value.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            return parsed;
        }
    }
    Value::String(value.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// `leads[add][0][id]` → `Key(leads), Key(add), Index(0), Key(id)`.
fn parse_key_segments(key: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = key;

    if let Some(bracket) = rest.find('[') {
        if bracket > 0 {
            segments.push(Segment::Key(rest[..bracket].to_string()));
        }
        rest = &rest[bracket..];
    } else {
        return vec![Segment::Key(rest.to_string())];
    }

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            // Unbalanced bracket; keep the tail as a literal key.
            segments.push(Segment::Key(rest[open + 1..].to_string()));
            break;
        };
        let inner = &rest[open + 1..open + close];
        match inner.parse::<usize>() {
            Ok(index) => segments.push(Segment::Index(index)),
            Err(_) => segments.push(Segment::Key(inner.to_string())),
        }
        rest = &rest[open + close + 1..];
    }

    if segments.is_empty() {
        segments.push(Segment::Key(key.to_string()));
    }
    segments
}

fn insert_nested(target: &mut Value, segments: &[Segment], value: Value) {
    let Some((head, tail)) = segments.split_first() else {
        *target = value;
        return;
    };

    match head {
        Segment::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let map = target.as_object_mut().expect("object ensured above");
            let slot = map.entry(key.clone()).or_insert(Value::Null);
            insert_nested(slot, tail, value);
        }
        Segment::Index(index) => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            let array = target.as_array_mut().expect("array ensured above");
            while array.len() <= *index {
                array.push(Value::Null);
            }
            insert_nested(&mut array[*index], tail, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{normalize_body, NormalizedBody};

    #[test]
    fn parses_json_content_type() {
        let body = br#"{"leads":{"add":[{"id":777}]}}"#;
        let normalized = normalize_body(Some("application/json"), body);
        assert_eq!(normalized, NormalizedBody::Json(json!({"leads": {"add": [{"id": 777}]}})));
    }

    #[test]
    fn decodes_percent_escaped_bracketed_keys() {
        let body = b"leads%5Badd%5D%5B0%5D%5Bid%5D=777&leads%5Badd%5D%5B0%5D%5Bstatus_id%5D=57";
        let normalized = normalize_body(Some("application/x-www-form-urlencoded"), body);
        let NormalizedBody::Form(payload) = normalized else {
            panic!("expected form payload");
        };
        assert_eq!(payload["leads"]["add"][0]["id"], json!("777"));
        assert_eq!(payload["leads"]["add"][0]["status_id"], json!("57"));
    }

    #[test]
    fn json_body_with_form_content_type_is_parsed_as_json() {
        let body = br#"{"lead_id": 42}"#;
        let normalized = normalize_body(Some("application/x-www-form-urlencoded"), body);
        assert_eq!(normalized, NormalizedBody::Json(json!({"lead_id": 42})));
    }

    #[test]
    fn merges_json_values_embedded_in_form_fields() {
        let body = b"data=%7B%22leads%22%3A%7B%22add%22%3A%5B%7B%22id%22%3A9%7D%5D%7D%7D";
        let normalized = normalize_body(Some("application/x-www-form-urlencoded"), body);
        let NormalizedBody::Form(payload) = normalized else {
            panic!("expected form payload");
        };
        assert_eq!(payload["data"]["leads"]["add"][0]["id"], json!(9));
    }

    #[test]
    fn object_marker_keys_do_not_poison_the_payload() {
        let body = b"payload%5B%5Bobject%20Object%5D%5D=%7B%22id%22%3A5%7D";
        let normalized = normalize_body(Some("application/x-www-form-urlencoded"), body);
        assert!(!normalized.is_malformed());
    }

    #[test]
    fn malformed_json_is_tagged_not_raised() {
        let normalized = normalize_body(Some("application/json"), b"{not json");
        let NormalizedBody::Malformed { raw, reason } = normalized else {
            panic!("expected malformed tag");
        };
        assert_eq!(raw, "{not json");
        assert!(!reason.is_empty());
        let archived = NormalizedBody::Malformed { raw, reason }.archive_value();
        assert_eq!(archived["error"], json!("malformed_body"));
    }

    #[test]
    fn garbage_without_content_type_is_malformed() {
        let normalized = normalize_body(None, b"\x00\x01binary");
        assert!(normalized.is_malformed());
    }

    #[test]
    fn later_pairs_deepen_rather_than_replace() {
        let body = b"lead[id]=3&lead[name]=Acme";
        let NormalizedBody::Form(payload) =
            normalize_body(Some("application/x-www-form-urlencoded"), body)
        else {
            panic!("expected form payload");
        };
        assert_eq!(payload["lead"], json!({"id": "3", "name": "Acme"}));
    }
}
