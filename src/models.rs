//! Core data model: rules, alerts, and the API wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};

/// Severity level of a detection rule.
///
/// Rule files carry free-form strings; anything outside the known set
/// collapses to `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLevel {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl RuleLevel {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "informational" => RuleLevel::Informational,
            "low" => RuleLevel::Low,
            "high" => RuleLevel::High,
            "critical" => RuleLevel::Critical,
            _ => RuleLevel::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleLevel::Informational => "informational",
            RuleLevel::Low => "low",
            RuleLevel::Medium => "medium",
            RuleLevel::High => "high",
            RuleLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RuleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection predicate of a rule.
///
/// Only the subset of the Sigma detection syntax actually present in the
/// corpus is modeled: `selection` field maps (AND semantics) and `keywords`
/// lists (OR semantics). Anything else never matches.
#[derive(Debug, Clone)]
pub enum Detection {
    /// Field -> expected value (or list of values), AND-combined.
    /// Field names may carry a `|contains` modifier.
    Selection(Map<String, Value>),
    /// Substrings probed against the whole serialized event.
    Keywords(Value),
    /// Present in the file but not in the supported subset.
    Unsupported,
}

impl Detection {
    /// Build a predicate from a rule file's `detection` mapping.
    /// `selection` takes precedence over `keywords` when both exist.
    pub fn from_document(detection: &Value) -> Self {
        let Some(obj) = detection.as_object() else {
            return Detection::Unsupported;
        };
        if let Some(selection) = obj.get("selection") {
            return match selection.as_object() {
                Some(map) => Detection::Selection(map.clone()),
                // A malformed selection disables the rule rather than
                // widening it.
                None => Detection::Selection(Map::new()),
            };
        }
        if let Some(keywords) = obj.get("keywords") {
            return Detection::Keywords(keywords.clone());
        }
        Detection::Unsupported
    }
}

/// Advisory log-source filter evaluated before the detection predicate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSourceFilter {
    pub product: Option<String>,
    pub service: Option<String>,
    pub category: Option<String>,
}

impl LogSourceFilter {
    pub fn from_document(logsource: Option<&Value>) -> Self {
        let Some(obj) = logsource.and_then(|v| v.as_object()) else {
            return LogSourceFilter::default();
        };
        let field = |key: &str| obj.get(key).and_then(|v| v.as_str()).map(String::from);
        LogSourceFilter {
            product: field("product"),
            service: field("service"),
            category: field("category"),
        }
    }
}

/// A loaded detection rule.
///
/// Immutable after load except for the `enabled` flag, which the state
/// refresher and the toggle handlers patch in place on the live snapshot.
#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub description: String,
    pub level: RuleLevel,
    pub detection: Detection,
    pub logsource: LogSourceFilter,
    /// Slash-joined directory subpath under the rules root.
    pub category: String,
    enabled: AtomicBool,
}

impl Rule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        title: String,
        description: String,
        level: RuleLevel,
        detection: Detection,
        logsource: LogSourceFilter,
        category: String,
        enabled: bool,
    ) -> Self {
        Rule {
            id,
            title,
            description,
            level,
            detection,
            logsource,
            category,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Alert raised when an enabled rule matches an inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub rule_id: String,
    pub rule_name: String,
    pub timestamp: DateTime<Utc>,
    pub log_source: String,
    pub matched_log: Value,
    pub severity: RuleLevel,
}

// API wire types

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleSummary {
    pub id: String,
    pub title: String,
    pub severity: RuleLevel,
    pub description: String,
    pub enabled: bool,
    pub category: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RulesListResponse {
    pub total: usize,
    pub rules: Vec<RuleSummary>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ToggleRequest {
    pub rule_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BulkToggleRequest {
    pub enabled: bool,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkToggleResponse {
    pub success: bool,
    pub message: String,
    pub updated_count: usize,
}
