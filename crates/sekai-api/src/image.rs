//! The public photo proxy.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::state::AppContext;

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// `GET /image/{server}/mysekai/{a}/{b}`
///
/// CP regions address photos by a pair of 64-char hex hashes; Nuverse
/// regions by numeric user id and photo index.
pub async fn get_mysekai_image(
    State(ctx): State<Arc<AppContext>>,
    Path((server, param1, param2)): Path<(String, String, String)>,
) -> Response {
    let manager = match ctx.manager(&server) {
        Ok(m) => m,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let result = if manager.region.is_cp_server() {
        if !is_hex64(&param1) || !is_hex64(&param2) {
            return (
                StatusCode::BAD_REQUEST,
                "invalid path format (expected 64-char hex)",
            )
                .into_response();
        }
        let combined = format!("{}/{}", param1, param2);
        manager.get_cp_mysekai_image(&combined).await
    } else {
        if !is_digits(&param1) || !is_digits(&param2) {
            return (
                StatusCode::BAD_REQUEST,
                "invalid path format (expected numeric user id and index)",
            )
                .into_response();
        }
        manager.get_nuverse_mysekai_image(&param1, &param2).await
    };
    match result {
        Ok(bytes) => (StatusCode::OK, [("content-type", "image/png")], bytes).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            format!("fetch image failed: {}", e),
        )
            .into_response(),
    }
}
