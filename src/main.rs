use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hubcache::config::Config;
use hubcache::jobs::SqliteJobQueue;
use hubcache::runner::run_batch;
use hubcache::server;
use hubcache::store::Store;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubcache=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let store = match Store::open(&config.db_path) {
        Ok(store) => store,
        Err(error) => {
            error!(%error, path = %config.db_path.display(), "failed to open store");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    // Batch runner tick: pending events drain on a fixed cadence, bounded per
    // invocation.
    let ticker = {
        let store = store.clone();
        let shutdown = shutdown.clone();
        let batch_config = config.batch;
        let interval = config.tick_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let store = store.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            run_batch(&store, &SqliteJobQueue, &batch_config)
                        })
                        .await;
                        match result {
                            Ok(Ok(_report)) => {}
                            Ok(Err(error)) => error!(%error, "batch run failed"),
                            Err(join_error) => error!(error = %join_error, "batch task panicked"),
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("batch runner stopping");
                        break;
                    }
                }
            }
        })
    };

    let app = server::router(store);
    info!(addr = %config.bind_addr, "listening");

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, addr = %config.bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };

    let serve_shutdown = shutdown.clone();
    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            serve_shutdown.cancel();
        })
        .await
    {
        error!(%error, "server error");
    }

    shutdown.cancel();
    ticker.await.ok();
}
