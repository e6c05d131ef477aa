use crate::auth;
use crate::handlers;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/callback", post(handlers::public::callback))
        .route("/health", get(handlers::public::health))
        .route("/ready", get(handlers::public::ready));

    if state.cfg.admin_token.is_some() {
        let admin_routes = Router::new()
            .route("/metrics", get(crate::metrics::metrics_handler))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_admin_token,
            ));
        app = app.merge(admin_routes);
    }

    let body_limit = state.cfg.callback_max_body_bytes;
    app.with_state(state)
        // Oversized callback bodies are refused with 413 before the handler runs.
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
