//! HTTP API for the detection engine
//!
//! Inbound surface consumed by the collector and the frontend: event
//! analysis, rule listing and toggling, stats and health.

use crate::error::{EngineError, Result};
use crate::event::LogEvent;
use crate::models::{
    AnalyzeResponse, BulkToggleRequest, BulkToggleResponse, RuleSummary, RulesListResponse,
    ToggleRequest, ToggleResponse,
};
use crate::pipeline;
use crate::state::EngineState;
use crate::stats::{EngineStatus, HealthDetails, HealthReport, StatsSnapshot};
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Build the HTTP router.
pub fn build_router(state: Arc<EngineState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.server.request_timeout_secs,
        )));

    Router::new()
        .route("/analyze", post(analyze_log))
        .route("/rules", get(list_rules))
        .route("/rules/toggle", post(toggle_rule))
        .route("/rules/bulk-toggle", post(bulk_toggle_rules))
        .route("/stats", get(get_stats))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(middleware)
}

/// Evaluate one inbound event. The response is an array for forward
/// compatibility, but first-match-wins keeps it at 0 or 1 entries.
async fn analyze_log(
    State(state): State<Arc<EngineState>>,
    Json(body): Json<Value>,
) -> Result<Json<AnalyzeResponse>> {
    let event = LogEvent::from_value(body)?;
    let alerts = pipeline::analyze(&state, &event).into_iter().collect();
    Ok(Json(AnalyzeResponse { alerts }))
}

async fn list_rules(State(state): State<Arc<EngineState>>) -> Json<RulesListResponse> {
    let rules = state.rules_snapshot();
    let summaries: Vec<RuleSummary> = rules
        .iter()
        .map(|rule| RuleSummary {
            id: rule.id.clone(),
            title: rule.title.clone(),
            severity: rule.level,
            description: rule.description.clone(),
            enabled: rule.is_enabled(),
            category: rule.category.clone(),
        })
        .collect();
    Json(RulesListResponse {
        total: summaries.len(),
        rules: summaries,
    })
}

/// Toggle a single rule. The local flag flips immediately so the next
/// `/analyze` call sees it; persistence to the state store is best-effort.
async fn toggle_rule(
    State(state): State<Arc<EngineState>>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>> {
    let rules = state.rules_snapshot();
    let rule = rules
        .iter()
        .find(|rule| rule.id == request.rule_id)
        .ok_or_else(|| EngineError::not_found(format!("Rule {} not found", request.rule_id)))?;

    rule.set_enabled(request.enabled);
    state.store.set(&request.rule_id, request.enabled);
    state.recount_enabled();

    if !state.store.push_state(&request.rule_id, request.enabled).await {
        warn!(
            "Failed to persist rule state to API for {}",
            request.rule_id
        );
    }

    Ok(Json(ToggleResponse {
        success: true,
        message: format!(
            "Rule {} {}",
            request.rule_id,
            if request.enabled { "enabled" } else { "disabled" }
        ),
    }))
}

/// Toggle every rule, optionally limited to one category.
async fn bulk_toggle_rules(
    State(state): State<Arc<EngineState>>,
    Json(request): Json<BulkToggleRequest>,
) -> Json<BulkToggleResponse> {
    let rules = state.rules_snapshot();
    let mut updated: HashMap<String, bool> = HashMap::new();

    for rule in rules.iter() {
        if let Some(category) = &request.category {
            if &rule.category != category {
                continue;
            }
        }
        rule.set_enabled(request.enabled);
        state.store.set(&rule.id, request.enabled);
        updated.insert(rule.id.clone(), request.enabled);
    }
    state.recount_enabled();

    if !updated.is_empty() && !state.store.push_bulk(&updated).await {
        warn!("Failed to persist {} rule states to API", updated.len());
    }

    let category_msg = request
        .category
        .as_ref()
        .map(|c| format!(" in category '{c}'"))
        .unwrap_or_default();
    Json(BulkToggleResponse {
        success: true,
        message: format!(
            "{} rules{} {}",
            updated.len(),
            category_msg,
            if request.enabled { "enabled" } else { "disabled" }
        ),
        updated_count: updated.len(),
    })
}

async fn get_stats(State(state): State<Arc<EngineState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

/// Health check. The details let callers distinguish "never started"
/// from "started but degraded".
async fn health_check(State(state): State<Arc<EngineState>>) -> Json<HealthReport> {
    let rules_dir_exists = Path::new(&state.config.rules.directory).exists();
    let rules_loaded = state.stats.rules_loaded();

    let status = if !rules_dir_exists {
        EngineStatus::Degraded
    } else if !rules_loaded {
        EngineStatus::Starting
    } else {
        state.stats.status()
    };

    Json(HealthReport {
        status,
        rules_loaded: state.stats.total_rules(),
        timestamp: chrono::Utc::now(),
        details: HealthDetails {
            rules_dir_exists,
            rules_loaded,
            enabled_rules: state.stats.enabled_rules(),
        },
    })
}
