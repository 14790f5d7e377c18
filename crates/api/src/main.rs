use std::net::SocketAddr;

use tokio::net::TcpListener;

use kanal_infra::config::AppConfig;
use kanal_infra::logging::init_tracing;

mod error;
mod middleware;
mod observability;
mod routes;
mod state;
mod validation;

#[cfg(test)]
mod tests;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let state = state::AppState::new(config.clone()).await?;
    let sweeper = spawn_retention_task(state.clone());

    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, environment = %config.app_env, "kanal api listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    Ok(())
}

fn spawn_retention_task(state: state::AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.sweeper.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match state.sweeper.sweep().await {
                Ok(stats) => {
                    observability::register_retention_purge(
                        "reaction_events",
                        stats.reaction_events_purged,
                    );
                    observability::register_retention_purge(
                        "deletion_records",
                        stats.deletion_records_purged,
                    );
                }
                Err(err) => {
                    tracing::error!(error = %err, "retention sweep failed");
                }
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
    }
    tracing::info!("shutdown signal received");
}
