use std::sync::Arc;

use backend::{app, config::ServerConfig, logging, lookup::StaticLookup, AppState};

#[tokio::main]
async fn main() {
    logging::init();
    let config = ServerConfig::from_env().expect("configuration");

    let state = AppState::new(Arc::new(StaticLookup::builtin()), config.lookup_timeout);

    let registry = state.registry.clone();
    let max_idle = config.session_max_idle;
    let mut ticker = tokio::time::interval(config.reap_interval);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            registry.reap_idle(max_idle).await;
        }
    });

    tracing::info!(bind = %config.bind, "starting server");
    axum::serve(
        tokio::net::TcpListener::bind(config.bind)
            .await
            .expect("bind"),
        app(state),
    )
    .await
    .expect("server error");
}
