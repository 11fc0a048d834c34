//! Route registration.

use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::image;
use crate::middleware::auth_middleware;
use crate::state::AppContext;

pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let public_routes = Router::new().route(
        "/image/{server}/mysekai/{param1}/{param2}",
        get(image::get_mysekai_image),
    );

    let api_routes = Router::new()
        .route("/{server}/{user_id}/profile", get(handlers::get_user_profile))
        .route("/{server}/system", get(handlers::get_system))
        .route("/{server}/information", get(handlers::get_information))
        .route(
            "/{server}/event/{event_id}/ranking-top100",
            get(handlers::get_event_ranking_top100),
        )
        .route(
            "/{server}/event/{event_id}/ranking-border",
            get(handlers::get_event_ranking_border),
        )
        .route(
            "/{server}/proxy/{*rest}",
            get(handlers::proxy_passthrough),
        )
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
