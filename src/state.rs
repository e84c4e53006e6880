//! Rule enable/disable state
//!
//! The authoritative enabled/disabled flag per rule lives in the API
//! service; this module keeps a best-effort local cache, seeds it at
//! startup, and reconciles it on a fixed interval. Local toggles apply
//! immediately and are pushed back to the store without retries; the
//! periodic refresh self-heals any divergence.

use crate::config::{Config, StateStoreConfig};
use crate::error::{EngineError, Result};
use crate::models::Rule;
use crate::stats::{EngineStatus, ProcessingStats};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Local cache of the authoritative rule-state map.
pub struct RuleStateStore {
    client: reqwest::Client,
    config: StateStoreConfig,
    states: Mutex<HashMap<String, bool>>,
}

impl RuleStateStore {
    pub fn new(config: StateStoreConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        RuleStateStore {
            client,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Typed fetch of the remote state map.
    pub async fn try_fetch(&self) -> Result<HashMap<String, bool>> {
        let url = format!("{}/api/rule-states", self.config.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(EngineError::internal(format!(
                "rule-state fetch returned status {}",
                response.status()
            )));
        }
        Ok(response.json::<HashMap<String, bool>>().await?)
    }

    /// Best-effort fetch: failures are logged and collapse to an empty map.
    pub async fn fetch(&self) -> HashMap<String, bool> {
        match self.try_fetch().await {
            Ok(states) => states,
            Err(e) => {
                error!("Error getting rule states from API: {}", e);
                HashMap::new()
            }
        }
    }

    /// Seed the local cache at startup. Bounded retries; loading proceeds
    /// with an empty (all-disabled) state if the store stays unreachable.
    pub async fn seed_with_retries(&self) {
        let attempts = self.config.fetch_retries.max(1);
        for attempt in 1..=attempts {
            match self.try_fetch().await {
                Ok(states) => {
                    info!("Loaded {} rule states from API", states.len());
                    self.merge(states);
                    return;
                }
                Err(e) => {
                    warn!(
                        "Rule-state fetch failed (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_secs(self.config.fetch_retry_delay_secs)).await;
            }
        }
        warn!("Proceeding without rule states; all rules start disabled");
    }

    pub fn get(&self, rule_id: &str) -> bool {
        self.states.lock().get(rule_id).copied().unwrap_or(false)
    }

    pub fn set(&self, rule_id: &str, enabled: bool) {
        self.states.lock().insert(rule_id.to_string(), enabled);
    }

    pub fn merge(&self, states: HashMap<String, bool>) {
        self.states.lock().extend(states);
    }

    /// Push a single toggle to the authoritative store. Best-effort: a
    /// failure is logged and left for the next refresh to reconcile.
    pub async fn push_state(&self, rule_id: &str, enabled: bool) -> bool {
        let url = format!("{}/api/rule-states/{}", self.config.base_url, rule_id);
        let result = self
            .client
            .post(&url)
            .query(&[("enabled", enabled)])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    "Failed to persist rule state for {}: status {}",
                    rule_id,
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Failed to persist rule state for {}: {}", rule_id, e);
                false
            }
        }
    }

    /// Push a batch of toggles. Same best-effort contract as `push_state`.
    pub async fn push_bulk(&self, states: &HashMap<String, bool>) -> bool {
        let url = format!("{}/api/rule-states/bulk", self.config.base_url);
        let result = self.client.post(&url).json(states).send().await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    "Failed to persist {} rule states: status {}",
                    states.len(),
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Failed to persist {} rule states: {}", states.len(), e);
                false
            }
        }
    }
}

/// Shared engine state handed to request handlers and background workers.
///
/// The rule set is an immutable snapshot swapped wholesale on reload;
/// `enabled` is the only field patched in place, so readers never need a
/// lock around evaluation.
pub struct EngineState {
    pub config: Arc<Config>,
    pub rules: ArcSwap<Vec<Rule>>,
    pub store: RuleStateStore,
    pub stats: ProcessingStats,
}

impl EngineState {
    pub fn new(config: Config) -> Arc<Self> {
        let store = RuleStateStore::new(config.state_store.clone());
        Arc::new(EngineState {
            config: Arc::new(config),
            rules: ArcSwap::from_pointee(Vec::new()),
            store,
            stats: ProcessingStats::new(),
        })
    }

    pub fn rules_snapshot(&self) -> Arc<Vec<Rule>> {
        self.rules.load_full()
    }

    /// Replace the rule set wholesale and refresh the counters.
    pub fn install_rules(&self, rules: Vec<Rule>) {
        let total = rules.len();
        let enabled = rules.iter().filter(|r| r.is_enabled()).count();
        self.rules.store(Arc::new(rules));
        self.stats.set_rule_counts(total, enabled);
        info!("Installed {} rules ({} enabled)", total, enabled);
    }

    pub fn recount_enabled(&self) {
        let rules = self.rules.load();
        let enabled = rules.iter().filter(|r| r.is_enabled()).count();
        self.stats.set_enabled_rules(enabled);
    }
}

/// Reconcile local flags with the authoritative store once.
pub async fn refresh_once(state: &EngineState) {
    let remote = match state.store.try_fetch().await {
        Ok(remote) => remote,
        Err(e) => {
            warn!("Rule-state refresh failed: {}", e);
            return;
        }
    };

    let rules = state.rules.load();
    let mut patched = 0usize;
    for rule in rules.iter() {
        if let Some(&enabled) = remote.get(&rule.id) {
            if rule.is_enabled() != enabled {
                rule.set_enabled(enabled);
                patched += 1;
            }
        }
    }
    state.store.merge(remote);
    state.recount_enabled();

    if patched > 0 {
        debug!("Rule-state refresh patched {} rules", patched);
    }
    if state.stats.rules_loaded() && state.stats.status() == EngineStatus::Degraded {
        state.stats.set_status(EngineStatus::Operational);
        info!("Rule-state refresh succeeded; engine operational again");
    }
}

/// Background worker re-pulling the authoritative state on a fixed
/// interval, for as long as the process runs.
pub fn spawn_state_refresh(state: Arc<EngineState>) -> JoinHandle<()> {
    let interval_secs = state.config.state_store.refresh_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately; the startup sequence
        // already seeded the state, so skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            refresh_once(&state).await;
        }
    })
}
