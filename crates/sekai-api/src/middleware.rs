//! Bearer-token authentication for the proxied API routes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::handlers::error_response;
use crate::state::AppContext;
use crate::users::AuthUser;

/// Checks the bearer token against the user store and its per-server
/// grants. With no user store configured, every request passes.
pub async fn auth_middleware(
    State(ctx): State<Arc<AppContext>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    req.extensions_mut().insert(None::<AuthUser>);
    let Some(ref users) = ctx.users else {
        return next.run(req).await;
    };

    let token = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if token.is_empty() {
        return error_response(StatusCode::UNAUTHORIZED, "Missing token").into_response();
    }

    let server = extract_server_from_path(req.uri().path());
    match users.authorize(&token, &server) {
        Ok(Some(user)) => {
            req.extensions_mut().insert(Some(user));
            next.run(req).await
        }
        Ok(None) => {
            warn!("rejected unknown token for server {}", server);
            error_response(StatusCode::UNAUTHORIZED, "Invalid token").into_response()
        }
        Err(_) => error_response(StatusCode::FORBIDDEN, "Not authorized for this server")
            .into_response(),
    }
}

/// The region is the first path segment of the nested API router
/// (`/{server}/...`).
fn extract_server_from_path(path: &str) -> String {
    path.split('/')
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_server_from_path() {
        assert_eq!(extract_server_from_path("/jp/system"), "jp");
        assert_eq!(extract_server_from_path("/EN/information"), "en");
        assert_eq!(extract_server_from_path(""), "");
    }
}
