//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::cache::PutOptions;
use crate::coordinator::Loader;
use crate::error::{CacheError, Result};
use crate::models::{
    AccessRequest, AccessResponse, ClearResponse, ContextQuery, DeleteResponse, FocusRequest,
    GetResponse, HealthResponse, LoadResponse, PredictResponse, PrefetchRequest,
    PrefetchResponse, PrefetchStateResponse, PutRequest, PutResponse, StatsResponse,
    VisibilityRequest,
};
use crate::service::CacheService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CacheService>,
    /// Origin behind GET /load/:key
    pub origin: Arc<dyn Loader>,
}

impl AppState {
    pub fn new(service: Arc<CacheService>, origin: Arc<dyn Loader>) -> Self {
        Self { service, origin }
    }

    fn prefetch_state(&self) -> PrefetchStateResponse {
        let scheduler = self.service.scheduler();
        PrefetchStateResponse {
            paused: scheduler.is_paused(),
            queued: scheduler.queued_count(),
            active: scheduler.active_count(),
        }
    }
}

// == Cache Endpoints ==
/// Handler for PUT /cache
pub async fn put_handler(
    State(state): State<AppState>,
    Json(req): Json<PutRequest>,
) -> Result<Json<PutResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let (key, value, opts) = req.into_parts();
    let tier = state.service.put(&key, value, opts).await?;
    Ok(Json(PutResponse::new(key, tier)))
}

/// Handler for GET /cache/:key
///
/// A miss answers 404 with `hit: false`.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<(StatusCode, Json<GetResponse>)> {
    match state.service.get(&key).await? {
        Some(value) => {
            let tier = state.service.store().tier_of(&key).await;
            Ok((StatusCode::OK, Json(GetResponse::hit(key, value, tier))))
        }
        None => Ok((StatusCode::NOT_FOUND, Json(GetResponse::miss(key)))),
    }
}

/// Handler for DELETE /cache/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.service.invalidate(&key).await?;
    Ok(Json(DeleteResponse::new(key, deleted)))
}

/// Handler for DELETE /cache
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    state.service.clear_all().await?;
    Ok(Json(ClearResponse::cleared()))
}

/// Handler for GET /load/:key
///
/// Gets the key or loads it from the content origin. With `?subject=` the
/// access is recorded first.
pub async fn load_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<LoadResponse>> {
    if let Some(subject) = query.subject.as_deref().filter(|s| !s.is_empty()) {
        state.service.record_access(subject, &key, query.context());
    }

    let (value, source) = state
        .service
        .coordinator()
        .get_or_load_traced(&key, state.origin.clone(), PutOptions::default())
        .await?;
    Ok(Json(LoadResponse { key, value, source }))
}

// == Prediction Endpoints ==
/// Handler for POST /access
pub async fn access_handler(
    State(state): State<AppState>,
    Json(req): Json<AccessRequest>,
) -> Result<Json<AccessResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let event = state
        .service
        .record_access(&req.subject_id, &req.key, req.context);
    Ok(Json(AccessResponse {
        subject_id: event.subject_id,
        key: event.key,
        timestamp: event.timestamp,
    }))
}

/// Handler for GET /predict/:subject
pub async fn predict_handler(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> Json<PredictResponse> {
    let predictions = state.service.predict(&subject_id, &query.context());
    Json(PredictResponse {
        subject_id,
        predictions,
    })
}

// == Prefetch Endpoints ==
/// Handler for POST /prefetch
pub async fn prefetch_handler(
    State(state): State<AppState>,
    Json(req): Json<PrefetchRequest>,
) -> Result<Json<PrefetchResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let accepted = state
        .service
        .start_prefetch(&req.subject_id, &req.context, req.options())
        .await;
    Ok(Json(PrefetchResponse {
        accepted,
        paused: state.service.scheduler().is_paused(),
    }))
}

/// Handler for POST /prefetch/pause
pub async fn pause_handler(State(state): State<AppState>) -> Json<PrefetchStateResponse> {
    state.service.pause_prefetch();
    Json(state.prefetch_state())
}

/// Handler for POST /prefetch/resume
pub async fn resume_handler(State(state): State<AppState>) -> Json<PrefetchStateResponse> {
    state.service.resume_prefetch();
    Json(state.prefetch_state())
}

/// Handler for POST /events/focus
pub async fn focus_handler(
    State(state): State<AppState>,
    Json(req): Json<FocusRequest>,
) -> Result<StatusCode> {
    if req.subject_id.is_empty() {
        return Err(CacheError::InvalidRequest(
            "Subject id cannot be empty".to_string(),
        ));
    }
    state.service.events().focus_hint(&req.subject_id, &req.context);
    Ok(StatusCode::ACCEPTED)
}

/// Handler for POST /events/visibility
pub async fn visibility_handler(
    State(state): State<AppState>,
    Json(req): Json<VisibilityRequest>,
) -> Json<PrefetchStateResponse> {
    state.service.events().visibility_change(req.visible);
    Json(state.prefetch_state())
}

// == Service Endpoints ==
/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.service.get_stats().await;
    Json(StatsResponse::new(
        stats,
        state.service.coordinator().in_flight_count(),
        state.service.recorder().subject_count(),
    ))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Payload;
    use crate::config::Config;
    use crate::coordinator::loader_fn;

    fn test_state() -> AppState {
        let origin = loader_fn(|key: String| async move {
            anyhow::Ok(Payload::from(format!("origin:{}", key)))
        });
        let service = CacheService::in_memory(Config::default(), origin.clone()).unwrap();
        AppState::new(Arc::new(service), origin)
    }

    fn put_request(key: &str, value: &str) -> PutRequest {
        serde_json::from_value(serde_json::json!({"key": key, "value": value})).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_handler() {
        let state = test_state();

        let result = put_handler(State(state.clone()), Json(put_request("test_key", "v"))).await;
        assert_eq!(result.unwrap().key, "test_key");

        let (status, response) = get_handler(State(state), Path("test_key".to_string()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.value, Some(Payload::from("v")));
    }

    #[tokio::test]
    async fn test_get_miss_is_not_found() {
        let state = test_state();
        let (status, response) = get_handler(State(state), Path("nonexistent".to_string()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!response.hit);
    }

    #[tokio::test]
    async fn test_put_invalid_request() {
        let state = test_state();
        let result = put_handler(State(state), Json(put_request("", "value"))).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_load_handler_records_subject() {
        let state = test_state();
        let query = ContextQuery {
            subject: Some("alice".to_string()),
            ..ContextQuery::default()
        };

        let response = load_handler(State(state.clone()), Path("lesson_1".to_string()), Query(query))
            .await
            .unwrap();
        assert_eq!(response.value, Payload::from("origin:lesson_1"));
        assert_eq!(state.service.recorder().history("alice").len(), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume_handlers() {
        let state = test_state();
        assert!(pause_handler(State(state.clone())).await.paused);
        assert!(!resume_handler(State(state)).await.paused);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }
}
