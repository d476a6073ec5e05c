use std::net::SocketAddr;
use std::time::Duration;

use imgrelay::{cache::cleaner, config::Config, router, telemetry, App};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_env();
    telemetry::init(&cfg);

    if let Err(e) = cfg.validate() {
        tracing::error!(error = %e, "startup aborted");
        return Err(e.into());
    }

    tokio::fs::create_dir_all(&cfg.cache_dir).await?;
    let port = cfg.port;

    let app = App::new(cfg).await;

    tokio::spawn(cleaner::run(app.config.clone()));

    // Keep the local limiter's per-IP map bounded.
    {
        let app = app.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                if let Some(limiter) = &app.limiter {
                    limiter.retain_recent();
                }
            }
        });
    }

    #[cfg(unix)]
    {
        let app = app.clone();
        tokio::spawn(async move {
            let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                .expect("install SIGHUP handler");
            while hangup.recv().await.is_some() {
                let fresh = Config::from_env();
                match fresh.validate() {
                    Ok(()) => {
                        app.config.replace(fresh);
                        tracing::info!("configuration reloaded");
                    }
                    Err(e) => tracing::error!(error = %e, "config reload rejected, keeping current snapshot"),
                }
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "imgrelay listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router(app).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    telemetry::shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
}
