//! The control-plane HTTP API: settings, secrets, query jobs, and one-shot
//! credential validation. JSON in, JSON out, bound to 127.0.0.1 only.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use support_tracker_core::secrets::{SecretKey, SecretStore};
use support_tracker_core::settings::SettingsStore;
use support_tracker_engine::{CancelResult, EngineConfig, Scheduler, StartRequest, validate};
use uuid::Uuid;

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    pub settings: SettingsStore,
    pub secrets: Arc<dyn SecretStore>,
    pub scheduler: Scheduler,
    pub config: EngineConfig,
    pub http: reqwest::Client,
}

type ApiError = (StatusCode, Json<Value>);

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{err}") })),
    )
}

fn not_found(message: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message })))
}

/// Build the control-plane router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/settings", get(get_settings).patch(patch_settings))
        .route(
            "/api/secrets/{key}",
            get(get_secret).put(put_secret).delete(delete_secret),
        )
        .route("/api/secrets/check", post(check_secrets))
        .route("/api/queries", post(start_query).get(list_queries))
        .route("/api/queries/{id}", get(get_query))
        .route("/api/queries/{id}/cancel", post(cancel_query))
        .route(
            "/api/validate/tracker",
            post(validate_tracker_post).get(validate_tracker_get),
        )
        .route(
            "/api/validate/scm",
            post(validate_scm_post).get(validate_scm_get),
        )
        .route(
            "/api/validate/qa-internal",
            post(validate_qa_internal_post).get(validate_qa_internal_get),
        )
        .with_state(state)
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.load().map_err(internal_error)?;
    Ok(Json(serde_json::to_value(settings).map_err(internal_error)?))
}

async fn patch_settings(
    State(state): State<AppState>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let updated = state.settings.apply_patch(patch).map_err(internal_error)?;
    Ok(Json(serde_json::to_value(updated).map_err(internal_error)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RevealQuery {
    reveal: bool,
}

fn parse_secret_key(key: &str) -> Result<SecretKey, ApiError> {
    SecretKey::parse(key).ok_or_else(|| not_found("unknown secret key"))
}

async fn get_secret(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<RevealQuery>,
) -> Result<Json<Value>, ApiError> {
    let key = parse_secret_key(&key)?;
    let value = state.secrets.get(key).map_err(internal_error)?;
    let has_value = value.as_deref().is_some_and(|v| !v.is_empty());

    let mut body = json!({ "hasValue": has_value });
    if query.reveal && has_value {
        body["value"] = Value::String(value.unwrap_or_default());
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct SecretValueBody {
    value: String,
}

async fn put_secret(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SecretValueBody>,
) -> Result<Json<Value>, ApiError> {
    let key = parse_secret_key(&key)?;
    state.secrets.set(key, &body.value).map_err(internal_error)?;
    Ok(Json(json!({ "success": true })))
}

async fn delete_secret(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let key = parse_secret_key(&key)?;
    state.secrets.delete(key).map_err(internal_error)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct CheckSecretsBody {
    keys: Vec<String>,
}

async fn check_secrets(
    State(state): State<AppState>,
    Json(body): Json<CheckSecretsBody>,
) -> Result<Json<Value>, ApiError> {
    let mut out = serde_json::Map::new();
    for name in body.keys {
        let present = match SecretKey::parse(&name) {
            Some(key) => state.secrets.has(key).map_err(internal_error)?,
            None => false,
        };
        out.insert(name, Value::Bool(present));
    }
    Ok(Json(Value::Object(out)))
}

async fn start_query(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Json<Value> {
    let id = state.scheduler.start(request);
    Json(json!({ "jobId": id }))
}

async fn list_queries(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.scheduler.list()))
}

async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let view = state
        .scheduler
        .get(id)
        .ok_or_else(|| not_found("job not found"))?;
    Ok(Json(serde_json::to_value(view).map_err(internal_error)?))
}

async fn cancel_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    match state.scheduler.cancel(id) {
        CancelResult::Cancelled => Ok(Json(json!({ "success": true }))),
        CancelResult::AlreadyTerminal => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "job already terminated" })),
        )),
        CancelResult::NotFound => Err(not_found("job not found")),
    }
}

fn validation_response(result: Result<(), support_tracker_engine::UpstreamError>) -> Json<Value> {
    match result {
        Ok(()) => Json(json!({ "valid": true })),
        Err(err) => Json(json!({ "valid": false, "error": format!("{err}") })),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TrackerCredsBody {
    org: Option<String>,
    project: Option<String>,
    username: Option<String>,
    token: Option<String>,
}

async fn validate_tracker(state: &AppState, body: TrackerCredsBody) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.load().map_err(internal_error)?;
    let org = body.org.unwrap_or(settings.azure_dev_ops.org);
    let project = body.project.unwrap_or(settings.azure_dev_ops.project);
    let username = match body.username {
        Some(u) => u,
        None => state
            .secrets
            .get(SecretKey::TrackerUsername)
            .map_err(internal_error)?
            .unwrap_or_default(),
    };
    let token = match body.token {
        Some(t) => t,
        None => state
            .secrets
            .get(SecretKey::TrackerPat)
            .map_err(internal_error)?
            .unwrap_or_default(),
    };

    Ok(validation_response(
        validate::check_tracker(
            &state.http,
            &state.config.tracker_base,
            &org,
            &project,
            &settings.azure_dev_ops.api_version,
            &username,
            &token,
            state.config.validation_timeout,
        )
        .await,
    ))
}

async fn validate_tracker_post(
    State(state): State<AppState>,
    Json(body): Json<TrackerCredsBody>,
) -> Result<Json<Value>, ApiError> {
    validate_tracker(&state, body).await
}

async fn validate_tracker_get(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    validate_tracker(&state, TrackerCredsBody::default()).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScmCredsBody {
    token: Option<String>,
}

async fn validate_scm(state: &AppState, body: ScmCredsBody) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.load().map_err(internal_error)?;
    let token = match body.token {
        Some(t) => t,
        None => state
            .secrets
            .get(SecretKey::ScmToken)
            .map_err(internal_error)?
            .unwrap_or_default(),
    };

    Ok(validation_response(
        validate::check_scm(
            &state.http,
            &settings.github.api_url,
            &token,
            state.config.validation_timeout,
        )
        .await,
    ))
}

async fn validate_scm_post(
    State(state): State<AppState>,
    Json(body): Json<ScmCredsBody>,
) -> Result<Json<Value>, ApiError> {
    validate_scm(&state, body).await
}

async fn validate_scm_get(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    validate_scm(&state, ScmCredsBody::default()).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QaInternalCredsBody {
    key: Option<String>,
}

async fn validate_qa_internal(
    state: &AppState,
    body: QaInternalCredsBody,
) -> Result<Json<Value>, ApiError> {
    let key = match body.key {
        Some(k) => k,
        None => state
            .secrets
            .get(SecretKey::QaInternalKey)
            .map_err(internal_error)?
            .unwrap_or_default(),
    };

    Ok(validation_response(
        validate::check_qa_internal(
            &state.http,
            &state.config.qa_internal_base,
            &key,
            state.config.validation_timeout,
        )
        .await,
    ))
}

async fn validate_qa_internal_post(
    State(state): State<AppState>,
    Json(body): Json<QaInternalCredsBody>,
) -> Result<Json<Value>, ApiError> {
    validate_qa_internal(&state, body).await
}

async fn validate_qa_internal_get(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    validate_qa_internal(&state, QaInternalCredsBody::default()).await
}
