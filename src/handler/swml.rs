use crate::app::AppState;
use crate::config::{InboundConfig, OutboundConfig};
use crate::directory::{ring_targets, DirectoryStore};
use crate::ringplan::{inbound_plan, outbound_plan, RingPlan};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct WebhookCall {
    pub call_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub direction: Option<String>,
}

/// Call setup payload posted by the platform.
#[derive(Debug, Default)]
pub struct WebhookPayload {
    pub call: Option<WebhookCall>,
    pub vars: Option<Map<String, Value>>,
    pub params: Option<Map<String, Value>>,
    pub raw: Value,
}

impl WebhookPayload {
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }
        let raw: Value = serde_json::from_slice(body)?;
        let call = match raw.get("call") {
            Some(Value::Null) | None => None,
            Some(call) => Some(serde_json::from_value(call.clone())?),
        };
        let vars = raw.get("vars").and_then(|v| v.as_object()).cloned();
        let params = raw.get("params").and_then(|v| v.as_object()).cloned();
        Ok(Self {
            call,
            vars,
            params,
            raw,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).map(|v| v.to_string())
}

fn from_map(map: &Option<Map<String, Value>>, key: &str) -> Option<String> {
    non_empty(map.as_ref().and_then(|m| m.get(key)).and_then(|v| v.as_str()))
}

/// Resolve a call-setup variable: query string, then call-scope vars,
/// then execute/transfer params, then the raw call field.
pub fn resolve_variable(
    query: &HashMap<String, String>,
    payload: &WebhookPayload,
    key: &str,
    call_field: Option<&str>,
) -> Option<String> {
    non_empty(query.get(key).map(|v| v.as_str()))
        .or_else(|| from_map(&payload.vars, key))
        .or_else(|| from_map(&payload.params, key))
        .or_else(|| non_empty(call_field))
}

async fn lookup_targets(store: &dyn DirectoryStore, called: &str) -> Result<Vec<String>> {
    match store.find_group_by_number(called).await? {
        Some(group) => {
            debug!(group = group.name, "found dispatch group");
            ring_targets(store, &group.id).await
        }
        None => {
            info!(called, "no dispatch group for number");
            Ok(vec![])
        }
    }
}

/// Build the ring plan for a call to one of the dispatch numbers.
/// Lookup failures degrade to the unavailable apology.
pub async fn route_inbound(
    store: &dyn DirectoryStore,
    config: &InboundConfig,
    called: Option<&str>,
    caller: Option<&str>,
) -> RingPlan {
    let Some(called) = non_empty(called) else {
        warn!(caller, "inbound call without a called number");
        return inbound_plan(&[], config);
    };
    let targets = match lookup_targets(store, &called).await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(called, caller, "directory lookup failed: {}", e);
            vec![]
        }
    };
    info!(called, caller, targets = targets.len(), "inbound ring plan");
    inbound_plan(&targets, config)
}

pub enum OutboundRoute {
    Connect(RingPlan),
    MissingDestination(Value),
}

pub fn route_outbound(
    query: &HashMap<String, String>,
    payload: &WebhookPayload,
    config: &OutboundConfig,
) -> OutboundRoute {
    let call_to = payload.call.as_ref().and_then(|c| c.to.as_deref());
    let call_from = payload.call.as_ref().and_then(|c| c.from.as_deref());
    let destination = resolve_variable(query, payload, "destination", call_to);
    let caller_id = resolve_variable(query, payload, "callerID", call_from);

    let Some(destination) = destination else {
        warn!("outbound call without a destination");
        return OutboundRoute::MissingDestination(json!({
            "error": "Missing destination parameter",
            "received": {
                "query": query,
                "vars": payload.raw.get("vars"),
                "params": payload.raw.get("params"),
                "call": payload.raw.get("call"),
            }
        }));
    };
    if caller_id.is_none() {
        warn!(destination, "no caller line provided, platform default applies");
    }
    info!(destination, caller_id, "outbound ring plan");
    OutboundRoute::Connect(outbound_plan(&destination, caller_id.as_deref(), config))
}

fn plan_response(plan: RingPlan) -> Response {
    (StatusCode::OK, Json(plan)).into_response()
}

pub async fn inbound_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match WebhookPayload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("invalid inbound webhook payload: {}", e);
            return plan_response(RingPlan::apology(&state.config.inbound.error_message));
        }
    };
    let called = payload.call.as_ref().and_then(|c| c.to.clone());
    let caller = payload.call.as_ref().and_then(|c| c.from.clone());
    let plan = route_inbound(
        state.directory.as_ref(),
        &state.config.inbound,
        called.as_deref(),
        caller.as_deref(),
    )
    .await;
    plan_response(plan)
}

pub async fn outbound_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let payload = match WebhookPayload::parse(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("invalid outbound webhook payload: {}", e);
            return plan_response(RingPlan::apology(&state.config.outbound.error_message));
        }
    };
    match route_outbound(&query, &payload, &state.config.outbound) {
        OutboundRoute::Connect(plan) => plan_response(plan),
        OutboundRoute::MissingDestination(document) => {
            (StatusCode::BAD_REQUEST, Json(document)).into_response()
        }
    }
}
