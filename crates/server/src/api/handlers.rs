//! HTTP request handlers and shared application state.
//!
//! The API is a thin translator: `take` maps query parameters onto the core
//! store and bucket operations and renders the verdict as a status code plus
//! a bare decimal body, the shape load balancers consume.

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;

use turnstile_core::config::MAX_BUCKET_NAME_LEN;
use turnstile_core::{Clock, Rate, WireError};

use crate::api::errors::ApiError;
use crate::api::metrics;
use crate::api::models::{BucketView, HealthResponse};
use crate::replication::ReplicatedStore;

/// Shared application state passed to every handler via Axum's `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: ReplicatedStore,
    pub clock: Clock,
    pub prometheus_handle: PrometheusHandle,
    pub start_time: Instant,
}

/// `POST /take/<name>?rate=F:D&count=N` — the admission decision.
///
/// Responds `200 OK` when the take is admitted and `429 Too Many Requests`
/// when it is not; either way the body is the decimal number of remaining
/// tokens. A missing `rate` is a zero rate, which admits nothing; a
/// malformed one is the caller's error. `count` defaults to 1 when missing,
/// malformed, or zero.
pub async fn take(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, String), ApiError> {
    if name.len() > MAX_BUCKET_NAME_LEN {
        return Err(ApiError::BadRequest(WireError::NameTooLarge.to_string()));
    }

    let rate = match params.get("rate") {
        Some(raw) => Rate::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => Rate::default(),
    };

    let count = params
        .get("count")
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|&count| count > 0)
        .unwrap_or(1);

    let (bucket, _) = state.store.get_bucket(&name);
    let (remaining, ok) = bucket.take(state.clock.now(), rate, count);
    state.store.upsert_bucket(&bucket).await;

    metrics::record_take(ok);
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    Ok((code, remaining.to_string()))
}

/// `GET /buckets` — lists every bucket's replicated state.
pub async fn list_buckets(State(state): State<AppState>) -> Json<Vec<BucketView>> {
    let mut views: Vec<BucketView> = state
        .store
        .local()
        .buckets()
        .iter()
        .map(|bucket| {
            let s = bucket.snapshot();
            BucketView {
                name: s.name,
                added: s.added,
                taken: s.taken,
                elapsed_ns: s.elapsed.as_nanos() as u64,
                tokens: (s.added - s.taken) as u64,
            }
        })
        .collect();
    views.sort_by(|a, b| a.name.cmp(&b.name));
    Json(views)
}

/// `GET /health` — server status and operational counters.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        buckets: state.store.local().len(),
        peers: state.store.peer_count(),
    })
}

/// `GET /metrics` — Prometheus exposition.
pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}
