mod config;
mod decision;
mod error;
mod http;
mod model;
mod mqtt;
mod registry;
mod scheduler;
#[cfg(feature = "sim")]
mod sim;
mod source;
mod state;
mod web;
mod zone;

use anyhow::{Context, Result};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{PredictionSourceConfig, ReadingSourceConfig};
use http::{HttpPredictionSource, HttpReadingSource};
use mqtt::{MqttReadingSource, MqttSettings};
use registry::ZoneRegistry;
use scheduler::RefreshScheduler;
use source::{PredictionSource, ReadingSource};
use state::SharedState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agro_hub=info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Registry ────────────────────────────────────────────────────
    let registry = Arc::new(
        ZoneRegistry::new(cfg.build_zones()).context("failed to build zone registry")?,
    );
    info!(zones = registry.len(), config = %config_path, "zones loaded");

    // ── Shared state (ephemeral, for the API) ───────────────────────
    let shared = state::shared();
    shared
        .write()
        .await
        .record_system("hub started".to_string());

    // ── External sources ────────────────────────────────────────────
    let reading = reading_source(&cfg.reading_source, &shared)?;
    let prediction = prediction_source(&cfg.prediction_source)?;

    let scheduler = Arc::new(RefreshScheduler::new(
        Arc::clone(&registry),
        reading,
        prediction,
        shared.clone(),
        cfg.scheduler.fetch_timeout(),
    ));

    // ── Web server ──────────────────────────────────────────────────
    let app = web::AppState {
        registry: Arc::clone(&registry),
        scheduler: Arc::clone(&scheduler),
        shared: shared.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            error!("web server error: {e:#}");
        }
    });

    // ── Scheduler ───────────────────────────────────────────────────
    let (stop, stop_rx) = watch::channel(false);
    let refresher = tokio::spawn(scheduler.run(cfg.scheduler.refresh_interval(), stop_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    // Send fails only once the receiver is gone, i.e. the loop already exited.
    let _ = stop.send(true);
    refresher.await.context("scheduler task panicked")?;

    shared
        .write()
        .await
        .record_system("hub stopped".to_string());
    Ok(())
}

fn reading_source(cfg: &ReadingSourceConfig, shared: &SharedState) -> Result<Arc<dyn ReadingSource>> {
    let source: Arc<dyn ReadingSource> = match cfg {
        ReadingSourceConfig::Http { url, endpoint } => {
            info!(%url, ?endpoint, "reading source: http");
            Arc::new(HttpReadingSource::new(url.clone(), *endpoint))
        }
        ReadingSourceConfig::Mqtt {
            host,
            port,
            client_id,
            stale_timeout_sec,
        } => {
            info!(%host, port, "reading source: mqtt");
            Arc::new(MqttReadingSource::spawn(
                MqttSettings {
                    host: host.clone(),
                    port: *port,
                    client_id: client_id.clone(),
                    stale_after: Duration::from_secs(*stale_timeout_sec),
                },
                shared.clone(),
            ))
        }
        #[cfg(feature = "sim")]
        ReadingSourceConfig::Sim => {
            info!("reading source: sim");
            Arc::new(sim::SimReadingSource)
        }
        #[cfg(not(feature = "sim"))]
        ReadingSourceConfig::Sim => {
            anyhow::bail!("reading_source kind 'sim' requires the 'sim' feature")
        }
    };
    Ok(source)
}

fn prediction_source(cfg: &PredictionSourceConfig) -> Result<Arc<dyn PredictionSource>> {
    let source: Arc<dyn PredictionSource> = match cfg {
        PredictionSourceConfig::Http { url } => {
            info!(%url, "prediction source: http");
            Arc::new(HttpPredictionSource::new(url.clone()))
        }
        #[cfg(feature = "sim")]
        PredictionSourceConfig::Sim => {
            info!("prediction source: sim");
            Arc::new(sim::SimPredictionSource)
        }
        #[cfg(not(feature = "sim"))]
        PredictionSourceConfig::Sim => {
            anyhow::bail!("prediction_source kind 'sim' requires the 'sim' feature")
        }
    };
    Ok(source)
}
