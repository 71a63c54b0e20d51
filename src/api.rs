use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::Serialize;

use crate::challenge::{ChallengeAction, ChallengePayload, KIND};
use crate::solver::Solver;

pub const VERSION: &str = "v1alpha1";

pub struct AppState {
    pub group_name: String,
    pub solver: Arc<dyn Solver>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

pub fn create_router(group_name: String, solver: Arc<dyn Solver>) -> Router {
    let state = Arc::new(AppState { group_name, solver });

    Router::new()
        .route("/apis/{group}", get(api_group))
        .route("/apis/{group}/v1alpha1", get(api_resources))
        .route("/apis/{group}/v1alpha1/{solver}", post(solve))
        .route("/healthz", get(health_check))
        .route("/livez", get(health_check))
        .route("/readyz", get(health_check))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

async fn access_log(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let user = request
        .headers()
        .get("x-remote-user")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration = start.elapsed();

    // Access log format: method path "user-agent" user status duration
    info!(
        target: "access",
        "{} {} \"{}\" {} {} {:.3}ms",
        method, path, user_agent, user, status, duration.as_secs_f64() * 1000.0
    );

    response
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

fn not_found(message: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            success: false,
            error: message,
        }),
    )
        .into_response()
}

async fn api_group(State(state): State<Arc<AppState>>, Path(group): Path<String>) -> Response {
    if group != state.group_name {
        return not_found(format!("API group not found: {}", group));
    }

    let group_version = format!("{}/{}", state.group_name, VERSION);
    Json(serde_json::json!({
        "kind": "APIGroup",
        "apiVersion": "v1",
        "name": state.group_name,
        "versions": [{"groupVersion": group_version, "version": VERSION}],
        "preferredVersion": {"groupVersion": group_version, "version": VERSION}
    }))
    .into_response()
}

async fn api_resources(State(state): State<Arc<AppState>>, Path(group): Path<String>) -> Response {
    if group != state.group_name {
        return not_found(format!("API group not found: {}", group));
    }

    let name = state.solver.name();
    Json(serde_json::json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": format!("{}/{}", state.group_name, VERSION),
        "resources": [{
            "name": name,
            "singularName": name,
            "namespaced": false,
            "kind": KIND,
            "verbs": ["create"]
        }]
    }))
    .into_response()
}

async fn solve(
    State(state): State<Arc<AppState>>,
    Path((group, solver_name)): Path<(String, String)>,
    Json(payload): Json<ChallengePayload>,
) -> Response {
    if group != state.group_name {
        return not_found(format!("API group not found: {}", group));
    }
    if solver_name != state.solver.name() {
        return not_found(format!("Solver not found: {}", solver_name));
    }

    let Some(request) = payload.request else {
        warn!("Challenge payload without request");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                success: false,
                error: "Challenge payload has no request".to_string(),
            }),
        )
            .into_response();
    };

    let result = match request.action {
        ChallengeAction::Present => state.solver.present(&request).await,
        ChallengeAction::CleanUp => state.solver.cleanup(&request).await,
    };

    match &result {
        Ok(()) => info!(
            "{:?} succeeded for {} (uid {})",
            request.action, request.resolved_fqdn, request.uid
        ),
        Err(e) => error!(
            "{:?} failed for {} (uid {}): {:#}",
            request.action, request.resolved_fqdn, request.uid, e
        ),
    }

    (
        StatusCode::CREATED,
        Json(ChallengePayload::respond(&request.uid, &result)),
    )
        .into_response()
}
