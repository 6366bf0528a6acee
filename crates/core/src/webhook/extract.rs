//! Deal-identifier extraction from normalized webhook payloads.
//!
//! The payload shape varies by trigger type (add vs. status-change) and by
//! transport encoding, so extraction is a layered, declaration-ordered rule
//! table instead of a pile of conditionals: dotted paths over candidate
//! roots, then a structural scan of the `leads` object, then raw-body
//! pattern matching as a last resort.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Dotted/indexed paths tried first, in order.
const ID_PATHS: &[&str] =
    &["leads.add[0].id", "leads.status[0].id", "_embedded.leads[0].id", "lead_id", "id", "lead.id"];

/// Wrapper keys under which some transports nest the actual payload.
const NESTED_ROOTS: &[&str] = &["body", "data", "result"];

/// Extracts the integer deal id, or `None` when no recognized shape matches.
pub fn extract_deal_id(payload: &Value, raw_body: Option<&str>) -> Option<i64> {
    let roots = candidate_roots(payload);

    for path in ID_PATHS {
        for root in &roots {
            if let Some(id) = resolve_path(root, path).and_then(coerce_i64) {
                return Some(id);
            }
        }
    }

    for root in &roots {
        if let Some(id) = scan_leads_object(root) {
            return Some(id);
        }
    }

    raw_body.and_then(scan_raw_body)
}

fn candidate_roots(payload: &Value) -> Vec<&Value> {
    let mut roots = vec![payload];
    for key in NESTED_ROOTS {
        if let Some(nested) = payload.get(key) {
            if nested.is_object() {
                roots.push(nested);
            }
        }
    }
    roots
}

/// Walks a dotted path; a segment may carry `[n]` index suffixes.
fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (key, indexes) = split_indexes(segment);
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index in indexes {
            current = current.get(index)?;
        }
    }
    Some(current)
}

fn split_indexes(segment: &str) -> (&str, Vec<usize>) {
    let Some(bracket) = segment.find('[') else {
        return (segment, Vec::new());
    };
    let key = &segment[..bracket];
    let indexes = segment[bracket..]
        .split(['[', ']'])
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<usize>().ok())
        .collect();
    (key, indexes)
}

/// Second layer: any key of the `leads` object holding a non-empty array of
/// items with an `id` field yields the first such id.
fn scan_leads_object(root: &Value) -> Option<i64> {
    let leads = root.get("leads")?.as_object()?;
    for items in leads.values() {
        let Some(items) = items.as_array() else {
            continue;
        };
        for item in items {
            if let Some(id) = item.get("id").and_then(coerce_i64) {
                return Some(id);
            }
        }
    }
    None
}

/// Last resort for double-escaped or otherwise undecodable transports.
fn scan_raw_body(raw: &str) -> Option<i64> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"leads%5Badd%5D%5B0%5D%5Bid%5D=(\d+)",
            r"leads\[add\]\[0\]\[id\]=(\d+)",
            r"\bid=(\d+)",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("raw-body pattern compiles"))
        .collect()
    });

    for pattern in patterns {
        if let Some(captures) = pattern.captures(raw) {
            if let Ok(id) = captures[1].parse::<i64>() {
                return Some(id);
            }
        }
    }
    None
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}
