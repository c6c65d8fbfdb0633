//! Route configuration

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use mediaconv_infra::request_id_middleware;

use crate::constants::MULTIPART_OVERHEAD_BYTES;
use crate::handlers;
use crate::state::AppState;

pub fn setup_routes(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_size_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let job_routes = Router::new()
        .route("/jobs", post(handlers::jobs::create_job))
        .route(
            "/jobs/{id}",
            get(handlers::jobs::get_status).delete(handlers::jobs::delete_job),
        )
        .route(
            "/jobs/{id}/media",
            post(handlers::upload::upload_media).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/jobs/{id}/convert", post(handlers::jobs::start_conversion))
        .route("/jobs/{id}/download", get(handlers::download::download));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(job_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_id_middleware)),
        )
        .with_state(state)
}
