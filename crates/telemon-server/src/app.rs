use crate::state::AppState;
use crate::{api, logging};
use axum::middleware;
use axum::Router;

/// Builds the HTTP router. Layers run outermost first: request logging, the
/// trusted-subnet check, then the payload envelope around the handlers.
pub fn build_http_app(state: AppState) -> Router {
    api::routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::payload_envelope,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::trusted_subnet,
        ))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}
