mod notifier;
mod problem;
mod router;
mod telemetry;
mod trigger;

use std::{net::SocketAddr, sync::Arc};

use order_notify_util::{load_env_file, AppConfig};
use tracing::info;

use crate::notifier::StatusChangeNotifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let notifier = StatusChangeNotifier::from_config(&config)?;
    let trigger_secret: Arc<[u8]> = Arc::from(config.trigger_secret.as_bytes());

    let state = router::AppState::new(metrics, notifier, trigger_secret, config.client.clone());

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        orders_path = %config.orders_path,
        prune_stale_tokens = config.prune_stale_tokens,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
