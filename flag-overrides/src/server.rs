use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::evaluator::FlagEvaluator;
use crate::router;

pub async fn serve<F>(
    config: Config,
    evaluator: Arc<dyn FlagEvaluator + Send + Sync>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router::router(evaluator, &config);

    tracing::info!(
        override_path = %config.override_path,
        preview_path = %config.preview_path,
        "listening on {:?}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
