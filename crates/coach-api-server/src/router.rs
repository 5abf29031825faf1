use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::any::Any;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;
use crate::utils::error::ApiError;

/// Max accepted request body (chat messages are short)
const BODY_LIMIT_BYTES: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/chat", post(handlers::chat::chat_handler))
        .route("/history", get(handlers::chat::history_handler))
        .route("/clear_history", post(handlers::chat::clear_history_handler))
        .route("/health", get(handlers::health::health_check))
        .with_state(state);

    with_middleware(routes)
}

fn with_middleware(router: Router) -> Router {
    router
        // Panics -> 500 {"error": ...}
        .layer(CatchPanicLayer::custom(panic_response))
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    };

    ApiError::Internal(detail).into_response()
}
