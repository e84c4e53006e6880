//! Rule matching
//!
//! Pure predicates deciding whether a log event satisfies a rule. The
//! semantics mirror the restricted Sigma subset the corpus actually uses:
//! `selection` field maps with an optional `|contains` modifier (AND) and
//! `keywords` lists (OR). All string comparisons are case-insensitive and
//! substring-friendly; rule authors rely on that.
//!
//! For OCSF events the rule's `logsource.category` is bridged through a
//! synonym table onto the OCSF category taxonomy. The table is a
//! best-effort heuristic carried in configuration, with a direct substring
//! probe as the fallback for unmapped categories.

use crate::event::{lookup_ci, value_text, LegacyEvent, LogEvent, OcsfEvent};
use crate::models::{Detection, Rule};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type SynonymTable = HashMap<String, Vec<String>>;

/// Decide whether `rule` matches `event`. Pure and total: absent or
/// oddly-typed fields fail the predicate instead of failing the call.
pub fn matches(rule: &Rule, event: &LogEvent, synonyms: &SynonymTable) -> bool {
    match event {
        LogEvent::Legacy(ev) => matches_legacy(rule, ev, event),
        LogEvent::Ocsf(ev) => matches_ocsf(rule, ev, event, synonyms),
    }
}

fn matches_legacy(rule: &Rule, ev: &LegacyEvent, event: &LogEvent) -> bool {
    let source = ev.source.to_lowercase();
    if let Some(product) = &rule.logsource.product {
        if !source.contains(&product.to_lowercase()) {
            return false;
        }
    }
    if let Some(service) = &rule.logsource.service {
        if !source.contains(&service.to_lowercase()) {
            return false;
        }
    }

    let metadata = ev.effective_metadata();

    // A metadata product/category that disagrees with the rule's logsource
    // rules the match out before any field comparison runs.
    if let (Some(meta_product), Some(rule_product)) =
        (lookup_ci(&metadata, "product"), &rule.logsource.product)
    {
        if !value_text(meta_product).eq_ignore_ascii_case(rule_product) {
            return false;
        }
    }
    if let (Some(meta_category), Some(rule_category)) =
        (lookup_ci(&metadata, "category"), &rule.logsource.category)
    {
        if !value_text(meta_category).eq_ignore_ascii_case(rule_category) {
            return false;
        }
    }

    match &rule.detection {
        Detection::Selection(selection) => selection_matches(selection, &metadata),
        Detection::Keywords(keywords) => keywords_match(keywords, &serialized_lower(event)),
        Detection::Unsupported => false,
    }
}

fn matches_ocsf(rule: &Rule, ev: &OcsfEvent, event: &LogEvent, synonyms: &SynonymTable) -> bool {
    if let Some(category) = &rule.logsource.category {
        if !category_allows(category, ev, synonyms) {
            return false;
        }
    }

    let combined = ev.combined_fields();
    match &rule.detection {
        Detection::Selection(selection) => selection_matches(selection, &combined),
        Detection::Keywords(keywords) => keywords_match(keywords, &serialized_lower(event)),
        Detection::Unsupported => false,
    }
}

/// Map a rule category onto the event's OCSF taxonomy. Known synonyms must
/// appear in `category_name` or `activity_name`; unmapped categories fall
/// back to a direct substring probe that also covers `class_name`.
fn category_allows(rule_category: &str, ev: &OcsfEvent, synonyms: &SynonymTable) -> bool {
    let category = rule_category.to_lowercase();
    let category_name = ev.category_name.as_deref().unwrap_or("").to_lowercase();
    let activity_name = ev.activity_name.as_deref().unwrap_or("").to_lowercase();

    if let Some(names) = synonyms.get(&category) {
        return names.iter().any(|name| {
            let name = name.to_lowercase();
            category_name.contains(&name) || activity_name.contains(&name)
        });
    }

    let class_name = ev.class_name.as_deref().unwrap_or("").to_lowercase();
    category_name.contains(&category)
        || activity_name.contains(&category)
        || class_name.contains(&category)
}

/// AND over every selection field. Empty selections never match.
fn selection_matches(selection: &Map<String, Value>, fields: &Map<String, Value>) -> bool {
    if selection.is_empty() {
        return false;
    }

    for (field, expected) in selection {
        let (name, contains) = match field.find("|contains") {
            Some(_) => (field.split('|').next().unwrap_or(field), true),
            None => (field.as_str(), false),
        };

        let actual = lookup_ci(fields, name)
            .map(value_text)
            .unwrap_or_default()
            .to_lowercase();

        let ok = if contains {
            match expected {
                Value::Array(values) => values
                    .iter()
                    .any(|v| actual.contains(&value_text(v).to_lowercase())),
                single => actual.contains(&value_text(single).to_lowercase()),
            }
        } else {
            match expected {
                Value::Array(values) => values
                    .iter()
                    .any(|v| value_text(v).eq_ignore_ascii_case(&actual)),
                single => value_text(single).eq_ignore_ascii_case(&actual),
            }
        };

        if !ok {
            return false;
        }
    }
    true
}

/// OR over keyword substrings against the serialized, case-folded event.
fn keywords_match(keywords: &Value, haystack: &str) -> bool {
    match keywords {
        Value::Array(values) => values
            .iter()
            .any(|v| haystack.contains(&value_text(v).to_lowercase())),
        single => haystack.contains(&value_text(single).to_lowercase()),
    }
}

fn serialized_lower(event: &LogEvent) -> String {
    serde_json::to_string(&event.to_value())
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_category_synonyms;
    use crate::models::{LogSourceFilter, RuleLevel};
    use serde_json::json;

    fn rule(detection: Value, logsource: Value) -> Rule {
        Rule::new(
            "r1".into(),
            "Test Rule".into(),
            String::new(),
            RuleLevel::Medium,
            Detection::from_document(&detection),
            LogSourceFilter::from_document(Some(&logsource)),
            "uncategorized".into(),
            true,
        )
    }

    fn legacy(value: Value) -> LogEvent {
        LogEvent::from_value(value).unwrap()
    }

    fn synonyms() -> SynonymTable {
        default_category_synonyms()
    }

    #[test]
    fn test_contains_selection_matches_substring() {
        let r = rule(json!({"selection": {"product|contains": "ssh"}}), json!({}));
        let ev = legacy(json!({"source": "auth", "metadata": {"product": "openssh-failed"}}));
        assert!(matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_contains_selection_rejects_non_substring() {
        let r = rule(json!({"selection": {"product|contains": "ssh"}}), json!({}));
        let ev = legacy(json!({"source": "auth", "metadata": {"product": "apache"}}));
        assert!(!matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_contains_matches_inside_message_field() {
        let r = rule(json!({"selection": {"reason|contains": "fail"}}), json!({}));
        let ev = legacy(json!({
            "source": "auth",
            "metadata": {"reason": "Failed password for root"}
        }));
        assert!(matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_exact_selection_is_case_insensitive() {
        let r = rule(json!({"selection": {"user": "Admin"}}), json!({}));
        for stored in ["admin", "ADMIN", "Admin"] {
            let ev = legacy(json!({"source": "auth", "metadata": {"user": stored}}));
            assert!(matches(&r, &ev, &synonyms()), "failed for {stored}");
        }
        let ev = legacy(json!({"source": "auth", "metadata": {"user": "administrator"}}));
        assert!(!matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_exact_selection_with_list_is_membership() {
        let r = rule(
            json!({"selection": {"event_id": ["4624", "4625"]}}),
            json!({}),
        );
        let hit = legacy(json!({"source": "wineventlog", "metadata": {"event_id": "4625"}}));
        let miss = legacy(json!({"source": "wineventlog", "metadata": {"event_id": "4688"}}));
        assert!(matches(&r, &hit, &synonyms()));
        assert!(!matches(&r, &miss, &synonyms()));
    }

    #[test]
    fn test_selection_requires_all_fields() {
        let r = rule(
            json!({"selection": {"product": "sshd", "action|contains": "fail"}}),
            json!({}),
        );
        let both = legacy(json!({
            "source": "auth",
            "metadata": {"product": "sshd", "action": "login failed"}
        }));
        let one = legacy(json!({
            "source": "auth",
            "metadata": {"product": "sshd", "action": "login ok"}
        }));
        assert!(matches(&r, &both, &synonyms()));
        assert!(!matches(&r, &one, &synonyms()));
    }

    #[test]
    fn test_empty_selection_never_matches() {
        let r = rule(json!({"selection": {}}), json!({}));
        let ev = legacy(json!({"source": "auth", "metadata": {"anything": "at all"}}));
        assert!(!matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_non_mapping_selection_never_matches() {
        let r = rule(json!({"selection": ["broken"]}), json!({}));
        let ev = legacy(json!({"source": "auth", "metadata": {"x": "y"}}));
        assert!(!matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_numeric_selection_values_compare_as_text() {
        let r = rule(json!({"selection": {"event_id": 4624}}), json!({}));
        let ev = legacy(json!({"source": "wineventlog", "metadata": {"event_id": "4624"}}));
        assert!(matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_logsource_product_must_be_in_source() {
        let r = rule(
            json!({"selection": {"user": "root"}}),
            json!({"product": "nginx"}),
        );
        let ev = legacy(json!({"source": "auth", "metadata": {"user": "root"}}));
        assert!(!matches(&r, &ev, &synonyms()));

        let ev = legacy(json!({"source": "nginx-access", "metadata": {"user": "root"}}));
        assert!(matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_metadata_product_disagreement_rejects() {
        let r = rule(
            json!({"selection": {"user|contains": "root"}}),
            json!({"product": "sshd"}),
        );
        let ev = legacy(json!({
            "source": "sshd",
            "metadata": {"product": "apache", "user": "root"}
        }));
        assert!(!matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_keywords_match_anywhere_in_event() {
        let r = rule(json!({"keywords": ["password", "sudo"]}), json!({}));
        let ev = legacy(json!({
            "source": "auth",
            "message": "Failed PASSWORD for invalid user"
        }));
        assert!(matches(&r, &ev, &synonyms()));

        let ev = legacy(json!({"source": "auth", "message": "session opened"}));
        assert!(!matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_single_string_keyword() {
        let r = rule(json!({"keywords": "segfault"}), json!({}));
        let ev = legacy(json!({"source": "kernel", "message": "Segfault at 0x0"}));
        assert!(matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_unsupported_detection_never_matches() {
        let r = rule(json!({"condition": "selection and not filter"}), json!({}));
        let ev = legacy(json!({"source": "auth", "message": "anything"}));
        assert!(!matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_ocsf_category_synonym_bridge() {
        let r = rule(
            json!({"selection": {"status|contains": "fail"}}),
            json!({"category": "authentication"}),
        );
        let hit = LogEvent::from_value(json!({
            "category_name": "Identity & Access Management",
            "activity_name": "User Authentication",
            "raw_event": {"status": "Failed"}
        }))
        .unwrap();
        assert!(matches(&r, &hit, &synonyms()));

        let wrong_category = LogEvent::from_value(json!({
            "category_name": "Network Activity",
            "raw_event": {"status": "Failed"}
        }))
        .unwrap();
        assert!(!matches(&r, &wrong_category, &synonyms()));
    }

    #[test]
    fn test_ocsf_unknown_category_falls_back_to_substring() {
        let r = rule(
            json!({"selection": {"status": "success"}}),
            json!({"category": "application"}),
        );
        let ev = LogEvent::from_value(json!({
            "category_name": "Application Activity",
            "raw_event": {"status": "Success"}
        }))
        .unwrap();
        assert!(matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_ocsf_selection_sees_top_level_and_raw_event() {
        let r = rule(
            json!({"selection": {"class_name": "Authentication", "port": "22"}}),
            json!({}),
        );
        let ev = LogEvent::from_value(json!({
            "category_name": "Identity & Access Management",
            "class_name": "Authentication",
            "raw_event": {"port": 22}
        }))
        .unwrap();
        assert!(matches(&r, &ev, &synonyms()));
    }

    #[test]
    fn test_ocsf_keywords_scan_whole_event() {
        let r = rule(json!({"keywords": ["192.168.1.100"]}), json!({}));
        let ev = LogEvent::from_value(json!({
            "category_name": "Network Activity",
            "src_endpoint": {"ip": "192.168.1.100"}
        }))
        .unwrap();
        assert!(matches(&r, &ev, &synonyms()));
    }
}
