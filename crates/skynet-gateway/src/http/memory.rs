use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use skynet_memory::{ExportPayload, ImportFact, ImportSummary, MemoryScope};

use crate::app::AppState;

fn scope(user_id: &str, profile_id: &str) -> MemoryScope {
    MemoryScope::new("default", user_id, profile_id)
}

fn default_user_id() -> String {
    "default".to_string()
}

fn default_profile_id() -> String {
    "default".to_string()
}

fn default_limit() -> i64 {
    50
}

fn default_status() -> String {
    "pending".to_string()
}

fn default_facts_limit() -> i64 {
    200
}

fn default_summaries_limit() -> i64 {
    200
}

fn internal_error(message: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": message.to_string()})))
}

fn not_found(kind: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": format!("{kind} not found")})))
}

#[derive(Debug, Deserialize)]
pub struct ScopedQuery {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_profile_id")]
    pub profile_id: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub async fn list_facts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopedQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let facts = state.memory.list_facts(&scope, query.limit).map_err(internal_error)?;
    Ok(Json(json!({"facts": facts})))
}

#[derive(Debug, Deserialize)]
pub struct ScopedIdQuery {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_profile_id")]
    pub profile_id: String,
}

pub async fn delete_fact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ScopedIdQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let deleted = state.memory.delete_fact(&scope, id).map_err(internal_error)?;
    if !deleted {
        return Err(not_found("fact"));
    }
    Ok(Json(json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct CandidatesQuery {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_profile_id")]
    pub profile_id: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub async fn list_candidates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandidatesQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let candidates = state
        .memory
        .list_candidates(&scope, &query.status, query.limit)
        .map_err(internal_error)?;
    Ok(Json(json!({"candidates": candidates})))
}

pub async fn accept_candidate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ScopedIdQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let fact = state.memory.accept_candidate(&scope, id).map_err(internal_error)?;
    match fact {
        Some(fact) => Ok(Json(json!({"fact": fact}))),
        None => Err(not_found("candidate")),
    }
}

pub async fn reject_candidate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ScopedIdQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let rejected = state.memory.reject_candidate(&scope, id).map_err(internal_error)?;
    if !rejected {
        return Err(not_found("candidate"));
    }
    Ok(Json(json!({"rejected": true})))
}

pub async fn list_summaries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopedQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let summaries = state.memory.list_summaries(&scope, query.limit).map_err(internal_error)?;
    Ok(Json(json!({"summaries": summaries})))
}

pub async fn delete_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ScopedIdQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let deleted = state.memory.delete_summary(&scope, id).map_err(internal_error)?;
    if !deleted {
        return Err(not_found("summary"));
    }
    Ok(Json(json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_profile_id")]
    pub profile_id: String,
    #[serde(default = "default_facts_limit")]
    pub facts_limit: i64,
    #[serde(default = "default_summaries_limit")]
    pub summaries_limit: i64,
}

pub async fn export_memory(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportPayload>, (StatusCode, Json<Value>)> {
    let scope = scope(&query.user_id, &query.profile_id);
    let payload = state
        .memory
        .export_data(&scope, query.facts_limit, query.summaries_limit)
        .map_err(internal_error)?;
    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_profile_id")]
    pub profile_id: String,
    #[serde(default)]
    pub facts: Vec<ImportFact>,
    #[serde(default)]
    pub summaries: Vec<ImportSummary>,
}

pub async fn import_memory(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = scope(&request.user_id, &request.profile_id);
    let stats = state
        .memory
        .import_data(&scope, &request.facts, &request.summaries)
        .map_err(internal_error)?;
    Ok(Json(json!({"imported": stats})))
}
