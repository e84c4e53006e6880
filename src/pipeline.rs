//! Per-event analysis
//!
//! One inbound event at a time: suppress internal telemetry, deduplicate
//! by event id, then evaluate enabled rules in load order and stop at the
//! first match. At most one alert is raised per event.

use crate::event::LogEvent;
use crate::matcher;
use crate::models::Alert;
use crate::state::EngineState;
use chrono::Utc;
use tracing::{debug, info};

/// Sibling services of this engine. Their own telemetry must never
/// trigger detections.
pub const INTERNAL_SERVICES: [&str; 6] = [
    "api",
    "collector",
    "detection",
    "iplookup",
    "frontend",
    "detections_page",
];

/// Analyze a single event against all enabled rules.
pub fn analyze(state: &EngineState, event: &LogEvent) -> Option<Alert> {
    if let LogEvent::Legacy(ev) = event {
        if INTERNAL_SERVICES.contains(&ev.source.as_str()) {
            return None;
        }
    }

    if let Some(id) = event.id_key() {
        if state.stats.seen_recently(&id) {
            info!("Skipping duplicate log ID: {}", id);
            return None;
        }
    }

    state.stats.record_processed();

    let rules = state.rules_snapshot();
    let synonyms = &state.config.matcher.category_synonyms;
    let matched = rules
        .iter()
        .filter(|rule| rule.is_enabled())
        .find(|rule| matcher::matches(rule, event, synonyms));

    let rule = match matched {
        Some(rule) => rule,
        None => {
            debug!("No enabled rule matched event");
            return None;
        }
    };

    let alert = Alert {
        rule_id: rule.id.clone(),
        rule_name: rule.title.clone(),
        timestamp: Utc::now(),
        log_source: event.source_label(),
        matched_log: event.to_value(),
        severity: rule.level,
    };
    state.stats.record_alert();
    info!("Rule {} matched event from {}", alert.rule_id, alert.log_source);
    Some(alert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{Detection, LogSourceFilter, Rule, RuleLevel};
    use serde_json::json;
    use std::sync::Arc;

    fn engine_with_rules(rules: Vec<Rule>) -> Arc<EngineState> {
        let mut config = Config::default();
        config.state_store.base_url = "http://127.0.0.1:1".to_string();
        let state = EngineState::new(config);
        state.install_rules(rules);
        state
    }

    fn keyword_rule(id: &str, keyword: &str, enabled: bool) -> Rule {
        Rule::new(
            id.to_string(),
            format!("Rule {id}"),
            String::new(),
            RuleLevel::High,
            Detection::from_document(&json!({"keywords": [keyword]})),
            LogSourceFilter::default(),
            "uncategorized".into(),
            enabled,
        )
    }

    fn event(value: serde_json::Value) -> LogEvent {
        LogEvent::from_value(value).unwrap()
    }

    #[test]
    fn test_internal_sources_never_alert() {
        let state = engine_with_rules(vec![keyword_rule("r1", "error", true)]);
        for source in INTERNAL_SERVICES {
            let ev = event(json!({"source": source, "message": "error error error"}));
            assert!(analyze(&state, &ev).is_none(), "alerted for {source}");
        }
        assert_eq!(state.stats.processed_logs(), 0);
    }

    #[test]
    fn test_first_match_wins() {
        let state = engine_with_rules(vec![
            keyword_rule("first", "failed", true),
            keyword_rule("second", "failed", true),
        ]);
        let ev = event(json!({"source": "auth", "message": "login failed"}));
        let alert = analyze(&state, &ev).unwrap();
        assert_eq!(alert.rule_id, "first");
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let state = engine_with_rules(vec![
            keyword_rule("off", "failed", false),
            keyword_rule("on", "failed", true),
        ]);
        let ev = event(json!({"source": "auth", "message": "login failed"}));
        let alert = analyze(&state, &ev).unwrap();
        assert_eq!(alert.rule_id, "on");
    }

    #[test]
    fn test_toggle_off_takes_effect_without_reload() {
        let state = engine_with_rules(vec![keyword_rule("r1", "failed", true)]);
        let ev = event(json!({"source": "auth", "message": "login failed"}));
        assert!(analyze(&state, &ev).is_some());

        state.rules_snapshot()[0].set_enabled(false);
        let ev = event(json!({"source": "auth", "message": "login failed"}));
        assert!(analyze(&state, &ev).is_none());
    }

    #[test]
    fn test_duplicate_ids_alert_once() {
        let state = engine_with_rules(vec![keyword_rule("r1", "failed", true)]);
        let ev = event(json!({"id": "evt-1", "source": "auth", "message": "failed"}));
        assert!(analyze(&state, &ev).is_some());
        assert!(analyze(&state, &ev).is_none());
        // Only the first call moved the processed counter.
        assert_eq!(state.stats.processed_logs(), 1);
    }

    #[test]
    fn test_events_without_id_are_not_deduplicated() {
        let state = engine_with_rules(vec![keyword_rule("r1", "failed", true)]);
        let ev = event(json!({"source": "auth", "message": "failed"}));
        assert!(analyze(&state, &ev).is_some());
        assert!(analyze(&state, &ev).is_some());
    }

    #[test]
    fn test_alert_fields_copied_from_rule_and_event() {
        let state = engine_with_rules(vec![keyword_rule("r1", "segfault", true)]);
        let ev = event(json!({"source": "kernel", "message": "segfault at 0x0"}));
        let alert = analyze(&state, &ev).unwrap();

        assert_eq!(alert.rule_name, "Rule r1");
        assert_eq!(alert.log_source, "kernel");
        assert_eq!(alert.severity, RuleLevel::High);
        assert_eq!(alert.matched_log["message"], json!("segfault at 0x0"));
        assert_eq!(state.stats.alerts_last_24h(), 1);
    }

    #[test]
    fn test_ocsf_alert_uses_category_name_as_source() {
        let state = engine_with_rules(vec![keyword_rule("r1", "authentication", true)]);
        let ev = event(json!({
            "category_name": "Identity & Access Management",
            "class_name": "Authentication"
        }));
        let alert = analyze(&state, &ev).unwrap();
        assert_eq!(alert.log_source, "Identity & Access Management");
    }

    #[test]
    fn test_no_match_returns_none_but_counts() {
        let state = engine_with_rules(vec![keyword_rule("r1", "segfault", true)]);
        let ev = event(json!({"source": "auth", "message": "all quiet"}));
        assert!(analyze(&state, &ev).is_none());
        assert_eq!(state.stats.processed_logs(), 1);
        assert_eq!(state.stats.alerts_last_24h(), 0);
    }
}
