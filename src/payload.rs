//! Unvalidated model payload.
//!
//! The parsed JSON is first sorted into collections of [`RawItem`]s without
//! trusting any field. The normalizer then coerces each item into a typed
//! record with the lenient scalar readers below.

use chrono::NaiveDate;
use serde_json::{Map, Value};

const TASK_KEYS: &[&str] = &["tasks", "actions", "todos", "actionItems", "action_items"];
const WELLBEING_KEYS: &[&str] = &["wellbeing", "wellbeingLog", "wellbeing_log"];
const INSIGHT_KEYS: &[&str] = &["staffInsights", "staff_insights", "insights"];
const EVENT_KEYS: &[&str] = &["calendarEvents", "calendar_events", "events"];
const NOTE_KEYS: &[&str] = &["strategyNotes", "strategy_notes", "notes"];

/// One element of a payload collection as the model sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    Object(Map<String, Value>),
    /// A bare string where an object was expected.
    Text(String),
}

impl RawItem {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::Object(map.clone())),
            Value::String(s) if !s.trim().is_empty() => Some(Self::Text(s.trim().to_string())),
            _ => None,
        }
    }

    /// First non-null value among `keys`.
    pub fn get(&self, keys: &[&str]) -> Option<&Value> {
        match self {
            Self::Object(map) => keys
                .iter()
                .filter_map(|k| map.get(*k))
                .find(|v| !v.is_null()),
            Self::Text(_) => None,
        }
    }

    /// Text field; a bare-string item answers with its own text when
    /// `primary` is set.
    pub fn text(&self, keys: &[&str], primary: bool) -> String {
        match self {
            Self::Text(s) if primary => s.clone(),
            _ => self.get(keys).map(coerce_string).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnvalidatedPayload {
    pub tasks: Vec<RawItem>,
    pub wellbeing: Option<RawItem>,
    pub staff_insights: Vec<RawItem>,
    pub calendar_events: Vec<RawItem>,
    pub strategy_notes: Vec<RawItem>,
}

impl UnvalidatedPayload {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            tasks: collect_items(map, TASK_KEYS),
            wellbeing: first_present(map, WELLBEING_KEYS).and_then(|v| match v {
                Value::Array(items) => items.iter().find_map(RawItem::from_value),
                other => RawItem::from_value(other),
            }),
            staff_insights: collect_items(map, INSIGHT_KEYS),
            calendar_events: collect_items(map, EVENT_KEYS),
            strategy_notes: collect_items(map, NOTE_KEYS),
        }
    }
}

fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

/// An array under the first present key; a lone object counts as one item.
fn collect_items(map: &Map<String, Value>, keys: &[&str]) -> Vec<RawItem> {
    match first_present(map, keys) {
        Some(Value::Array(items)) => items.iter().filter_map(RawItem::from_value).collect(),
        Some(other) => RawItem::from_value(other).into_iter().collect(),
        None => Vec::new(),
    }
}

// ============================================================================
// Scalar coercion
// ============================================================================

pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// A whole number from a number or a string with a leading number
/// (`"7"`, `"7/10"`). Zero and negatives are treated as absent.
pub fn coerce_u32(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => leading_number(s)?.0,
        _ => return None,
    };
    positive(n)
}

/// Minutes from a number or a string with an optional unit: `"15"`,
/// `"20 min"`, `"1.5 hrs"`. Any other unit makes the value absent.
pub fn coerce_minutes(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let (n, unit) = leading_number(s)?;
            match unit.trim_end_matches('.').to_lowercase().as_str() {
                "" | "m" | "min" | "mins" | "minute" | "minutes" => n,
                "h" | "hr" | "hrs" | "hour" | "hours" => n * 60.0,
                _ => return None,
            }
        }
        _ => return None,
    };
    positive(n)
}

/// The leading decimal of `s` and the trimmed text after it.
fn leading_number(s: &str) -> Option<(f64, &str)> {
    let s = s.trim();
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let n = s[..end].parse::<f64>().ok()?;
    Some((n, s[end..].trim()))
}

fn positive(n: f64) -> Option<u32> {
    if n >= 1.0 && n <= u32::MAX as f64 {
        Some(n.round() as u32)
    } else {
        None
    }
}

pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A calendar day from a string that starts with `YYYY-MM-DD`.
pub fn coerce_day(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_day)
}

pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}
