use std::time::Duration;

use tracing::info;

use teleflow::api;
use teleflow::config::Config;
use teleflow::runtime::Runtime;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let runtime = Runtime::builder()
        .provider(config.provider())
        .session_ttl(config.session_ttl)
        .build();

    api::spawn_scheduler(runtime.clone(), config.scheduler_tick);
    api::spawn_session_sweeper(runtime.clone(), Duration::from_secs(60));

    let app = api::router(runtime);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    info!(%addr, "listening");
    axum::serve(listener, app)
        .await
        .expect("server terminated unexpectedly");
}
