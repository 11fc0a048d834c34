//! Proxied game API endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value as JsonValue, json};

use crate::state::AppContext;

/// Every proxied call must finish inside this window, recovery retries
/// included.
const PROXY_DEADLINE: Duration = Duration::from_secs(90);

pub struct ApiResponse {
    status: StatusCode,
    body: JsonValue,
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let json = serde_json::to_string(&self.body).unwrap_or_else(|_| "{}".to_string());
        (self.status, [("content-type", "application/json")], json).into_response()
    }
}

pub fn error_response(status: StatusCode, message: &str) -> ApiResponse {
    ApiResponse {
        status,
        body: json!({
            "result": "failed",
            "status": status.as_u16(),
            "message": message,
        }),
    }
}

async fn proxy_game_api(
    ctx: &AppContext,
    server: &str,
    path: &str,
    params: Option<&HashMap<String, String>>,
) -> ApiResponse {
    let manager = match ctx.manager(server) {
        Ok(m) => m,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    match tokio::time::timeout(PROXY_DEADLINE, manager.get_game_api(path, params)).await {
        Ok((body, status)) => ApiResponse {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
            body,
        },
        Err(_) => error_response(StatusCode::GATEWAY_TIMEOUT, "Upstream call timed out"),
    }
}

pub async fn get_user_profile(
    State(ctx): State<Arc<AppContext>>,
    Path((server, user_id)): Path<(String, String)>,
) -> ApiResponse {
    if !user_id.chars().all(|c| c.is_ascii_digit()) || user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id must be numeric");
    }
    // `{userId}` resolves to the pool account's own id inside the client.
    let path = format!("/user/{{userId}}/{}/profile", user_id);
    proxy_game_api(&ctx, &server, &path, None).await
}

pub async fn get_system(
    State(ctx): State<Arc<AppContext>>,
    Path(server): Path<String>,
) -> ApiResponse {
    proxy_game_api(&ctx, &server, "/system", None).await
}

pub async fn get_information(
    State(ctx): State<Arc<AppContext>>,
    Path(server): Path<String>,
) -> ApiResponse {
    proxy_game_api(&ctx, &server, "/information", None).await
}

pub async fn get_event_ranking_top100(
    State(ctx): State<Arc<AppContext>>,
    Path((server, event_id)): Path<(String, String)>,
) -> ApiResponse {
    if !event_id.chars().all(|c| c.is_ascii_digit()) || event_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "event_id must be numeric");
    }
    let path = format!(
        "/user/{{userId}}/event/{}/ranking?rankingViewType=top100",
        event_id
    );
    proxy_game_api(&ctx, &server, &path, None).await
}

pub async fn get_event_ranking_border(
    State(ctx): State<Arc<AppContext>>,
    Path((server, event_id)): Path<(String, String)>,
) -> ApiResponse {
    if !event_id.chars().all(|c| c.is_ascii_digit()) || event_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "event_id must be numeric");
    }
    let path = format!("/event/{}/ranking-border", event_id);
    proxy_game_api(&ctx, &server, &path, None).await
}

/// Catch-all passthrough under `/api/{server}/proxy/...` for endpoints the
/// named routes do not cover. Query parameters are forwarded as-is.
pub async fn proxy_passthrough(
    State(ctx): State<Arc<AppContext>>,
    Path((server, rest)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let path = format!("/{}", rest);
    let params = if params.is_empty() {
        None
    } else {
        Some(&params)
    };
    proxy_game_api(&ctx, &server, &path, params).await
}
