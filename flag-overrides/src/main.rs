use std::sync::Arc;

use envconfig::Envconfig;
use tokio::signal;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use flag_overrides::config::Config;
use flag_overrides::evaluator::RemoteFlagEvaluator;
use flag_overrides::server::serve;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("Invalid configuration:");

    // Pretty span output when DEBUG is set, JSON lines otherwise.
    let log_layer = {
        let base_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true);

        if config.debug {
            base_layer
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };

    tracing_subscriber::registry().with(log_layer).init();

    // Missing credentials are fatal: there is nothing to evaluate flags against.
    let evaluator = RemoteFlagEvaluator::from_config(&config)
        .expect("Invalid flags evaluator configuration:");

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("could not bind port");

    if let Err(e) = serve(config, Arc::new(evaluator), listener, shutdown()).await {
        tracing::error!("server exited with error: {}", e);
        std::process::exit(1);
    }
}
