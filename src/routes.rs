use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header::STRICT_TRANSPORT_SECURITY},
    middleware,
    routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::{AppState, handlers, middleware_auth};

/// Build the HTTP application: public, reader and admin routes plus the shared layers.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/register", post(handlers::register))
        .route("/api/v1/login", post(handlers::login))
        .route("/api/v1/refresh", post(handlers::refresh_token));

    let reader_routes = Router::new()
        .route("/api/v1/me", get(handlers::me))
        .route("/api/v1/books", get(handlers::list_books))
        .route("/api/v1/books/{id}", get(handlers::get_book))
        .route(
            "/api/v1/borrow-requests",
            post(handlers::request_borrow).put(handlers::transition_borrow),
        )
        .route("/api/v1/me/borrows", get(handlers::my_borrows))
        .route("/api/v1/me/borrows/{id}/return", put(handlers::return_borrow))
        .route("/api/v1/me/history", get(handlers::my_history))
        .route("/api/v1/me/notifications", get(handlers::my_notifications))
        .route("/api/v1/leaderboard", get(handlers::leaderboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_auth::auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/v1/admin/books", post(handlers::create_book))
        .route("/api/v1/admin/borrow-requests", get(handlers::list_borrow_requests))
        .route("/api/v1/admin/notifications", get(handlers::admin_notifications))
        .route("/api/v1/admin/dashboard", get(handlers::dashboard))
        .route_layer(middleware::from_fn(middleware_auth::require_admin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_auth::auth_middleware,
        ));

    let hsts_value: HeaderValue =
        HeaderValue::from_static("max-age=63072000; includeSubDomains; preload");

    Router::new()
        .merge(public_routes)
        .merge(reader_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetResponseHeaderLayer::if_not_present(
            STRICT_TRANSPORT_SECURITY,
            hsts_value,
        ))
}
