use std::future::ready;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    evaluator::FlagEvaluator,
    handler,
    metrics_utils::{setup_metrics_recorder, track_metrics},
};

#[derive(Clone)]
pub struct State {
    pub evaluator: Arc<dyn FlagEvaluator + Send + Sync>,
}

pub fn router(evaluator: Arc<dyn FlagEvaluator + Send + Sync>, config: &Config) -> Router {
    let state = State { evaluator };

    let status_router = Router::new()
        .route("/", get(handler::index))
        .route("/_readiness", get(handler::index))
        .route("/_liveness", get(handler::index));

    let overrides_router = Router::new()
        .route(
            &config.override_path,
            post(handler::post_overrides).delete(handler::delete_overrides),
        )
        .route(&config.preview_path, get(handler::preview_flags));

    let router = Router::new()
        .merge(status_router)
        .merge(overrides_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Global metrics recorders can play poorly with e.g. tests
    if config.enable_metrics {
        let recorder_handle = setup_metrics_recorder();
        router.route("/metrics", get(move || ready(recorder_handle.render())))
    } else {
        router
    }
}
