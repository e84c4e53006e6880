//! Rule corpus loading
//!
//! Walks the rules directory, parses each YAML file into a [`Rule`], and
//! installs the result as a fresh snapshot. One malformed file never
//! aborts the batch: it is logged, counted, and skipped. The whole
//! sequence (directory provisioning + walk) retries a bounded number of
//! times before the engine settles for whatever partial corpus it has.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::event::value_text;
use crate::models::{Detection, LogSourceFilter, Rule, RuleLevel};
use crate::source::{is_rule_file, RuleSource};
use crate::state::{EngineState, RuleStateStore};
use crate::stats::EngineStatus;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
    pub attempts: u32,
}

/// Load and install the corpus, retrying the full sequence on failure.
/// After exhausting the retries the engine keeps whatever it has (possibly
/// nothing) and reports itself degraded.
pub async fn load_with_retries(state: &EngineState) -> LoadStats {
    let source = RuleSource::new(state.config.rules.clone());
    let retries = state.config.rules.load_retries.max(1);
    let delay = Duration::from_secs(state.config.rules.load_retry_delay_secs);
    let mut stats = LoadStats::default();

    for attempt in 1..=retries {
        stats.attempts = attempt;
        if !source.ensure().await {
            warn!(
                "Failed to set up rules directory (attempt {}/{})",
                attempt, retries
            );
        } else {
            match load_rules(&state.config, &state.store) {
                Ok((rules, load)) => {
                    info!(
                        "Successfully loaded {} rules ({} files skipped)",
                        rules.len(),
                        load.skipped
                    );
                    state.install_rules(rules);
                    state.stats.set_rules_loaded();
                    state.stats.set_status(EngineStatus::Operational);
                    stats.loaded = load.loaded;
                    stats.skipped = load.skipped;
                    return stats;
                }
                Err(e) => {
                    error!(
                        "Error loading rules (attempt {}/{}): {}",
                        attempt, retries, e
                    );
                }
            }
        }
        if attempt < retries {
            tokio::time::sleep(delay).await;
        }
    }

    error!("Failed to load rules after {} attempts", retries);
    state.install_rules(Vec::new());
    state.stats.set_status(EngineStatus::Degraded);
    stats
}

/// Walk the rules subdirectory and parse every rule file, in a stable
/// name-sorted walk order. Duplicate ids: the later file wins.
pub fn load_rules(config: &Config, store: &RuleStateStore) -> Result<(Vec<Rule>, LoadStats)> {
    let rules_root = config.rules_root();
    if !rules_root.is_dir() {
        return Err(EngineError::rule_source(format!(
            "rules directory not found: {}",
            rules_root.display()
        )));
    }

    let mut rules: Vec<Rule> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(&rules_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() || !is_rule_file(entry.path()) {
            continue;
        }
        match parse_rule_file(entry.path(), &rules_root, store) {
            Some(rule) => match positions.get(&rule.id) {
                Some(&pos) => rules[pos] = rule,
                None => {
                    positions.insert(rule.id.clone(), rules.len());
                    rules.push(rule);
                }
            },
            None => skipped += 1,
        }
    }

    let stats = LoadStats {
        loaded: rules.len(),
        skipped,
        attempts: 0,
    };
    Ok((rules, stats))
}

/// Parse one rule file. Returns `None` (after logging) for anything that
/// is not a well-formed rule document.
fn parse_rule_file(path: &Path, rules_root: &Path, store: &RuleStateStore) -> Option<Rule> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Error reading rule {}: {}", path.display(), e);
            return None;
        }
    };

    let doc: Value = match serde_yaml::from_str(&content) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Error loading rule {}: {}", path.display(), e);
            return None;
        }
    };

    let Some(obj) = doc.as_object() else {
        debug!("Skipping non-mapping rule file {}", path.display());
        return None;
    };
    let (Some(detection), Some(title)) = (obj.get("detection"), obj.get("title")) else {
        debug!("Skipping incomplete rule file {}", path.display());
        return None;
    };

    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| file_stem(path));

    let level = obj
        .get("level")
        .map(|v| RuleLevel::parse(&value_text(v)))
        .unwrap_or(RuleLevel::Medium);

    let enabled = store.get(&id);

    Some(Rule::new(
        id,
        value_text(title),
        obj.get("description").map(value_text).unwrap_or_default(),
        level,
        Detection::from_document(detection),
        LogSourceFilter::from_document(obj.get("logsource")),
        derive_category(path, rules_root),
        enabled,
    ))
}

/// Slash-joined directory subpath of the rule under the rules root;
/// `"uncategorized"` for files sitting at the root itself.
pub fn derive_category(path: &Path, rules_root: &Path) -> String {
    let relative = path.strip_prefix(rules_root).unwrap_or(path);
    let parts: Vec<&str> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|component| match component {
                    Component::Normal(part) => part.to_str(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    if parts.is_empty() {
        "uncategorized".to_string()
    } else {
        parts.join("/")
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("unknown")
        .to_string()
}
