//! Inbound log event shapes
//!
//! Events arrive in one of two shapes: the flat legacy log the collector
//! emits, and the nested OCSF-style structured event. Both are modeled as
//! typed structs with a flattened side-map so unknown keys survive the
//! round trip (keyword matching and alert payloads see the full event).

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat legacy log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyEvent {
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LegacyEvent {
    /// Metadata map used for selection matching. An empty `metadata` falls
    /// through to `log_metadata`, matching the collector's two field names.
    pub fn effective_metadata(&self) -> Map<String, Value> {
        match &self.metadata {
            Some(map) if !map.is_empty() => map.clone(),
            _ => self.log_metadata.clone().unwrap_or_default(),
        }
    }
}

/// OCSF-style structured event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcsfEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_event: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_endpoint: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_endpoint: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OcsfEvent {
    /// Union of the top-level fields and `raw_event`, the map selection and
    /// keyword checks run against. `raw_event` entries win on collisions
    /// since the raw payload is what rule selections were written against.
    pub fn combined_fields(&self) -> Map<String, Value> {
        let mut combined = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Some(raw) = &self.raw_event {
            for (key, value) in raw {
                combined.insert(key.clone(), value.clone());
            }
        }
        combined
    }
}

/// An inbound event, classified by shape.
#[derive(Debug, Clone)]
pub enum LogEvent {
    Legacy(LegacyEvent),
    Ocsf(OcsfEvent),
}

impl LogEvent {
    /// Classify and deserialize a raw JSON body. OCSF is detected by the
    /// presence of `category_name` or an explicit `format: "ocsf"` marker.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(EngineError::bad_request("log entry must be a JSON object"));
        }
        let is_ocsf = value.get("category_name").is_some()
            || value
                .get("format")
                .and_then(|v| v.as_str())
                .map(|s| s.eq_ignore_ascii_case("ocsf"))
                .unwrap_or(false);

        if is_ocsf {
            let event: OcsfEvent = serde_json::from_value(value)?;
            Ok(LogEvent::Ocsf(event))
        } else {
            let event: LegacyEvent = serde_json::from_value(value)?;
            Ok(LogEvent::Legacy(event))
        }
    }

    /// Deduplication key, when the event carries an id.
    pub fn id_key(&self) -> Option<String> {
        let id = match self {
            LogEvent::Legacy(ev) => ev.id.as_ref(),
            LogEvent::Ocsf(ev) => ev.id.as_ref(),
        }?;
        match id {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Source label used on alerts.
    pub fn source_label(&self) -> String {
        let label = match self {
            LogEvent::Legacy(ev) => {
                if ev.source.is_empty() {
                    None
                } else {
                    Some(ev.source.clone())
                }
            }
            LogEvent::Ocsf(ev) => ev.category_name.clone(),
        };
        label.unwrap_or_else(|| "unknown".to_string())
    }

    /// The full event as JSON; flattened side-maps restore every inbound key.
    pub fn to_value(&self) -> Value {
        let serialized = match self {
            LogEvent::Legacy(ev) => serde_json::to_value(ev),
            LogEvent::Ocsf(ev) => serde_json::to_value(ev),
        };
        serialized.unwrap_or(Value::Null)
    }
}

/// Case-insensitive key lookup. Exact hits win; otherwise the first
/// ASCII-case-insensitive key match is returned.
pub fn lookup_ci<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(key) {
        return Some(value);
    }
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Scalar-friendly text rendering of a JSON value, for the string
/// comparisons the matcher performs.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
