use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleetwatch::{
    config::read_config_file,
    notify::{LogSink, NotificationSink},
    poller::PollEngine,
    store::StateStore,
    util::{get_state_file, get_targets_file},
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Targets file (defaults to $FLEETWATCH_TARGETS_FILE)
    #[arg(short)]
    file: Option<PathBuf>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleetwatch", LevelFilter::TRACE),
        ("fleetwatch_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[cfg(feature = "mqtt")]
fn mqtt_sink() -> Option<Arc<dyn NotificationSink>> {
    use fleetwatch::notify::mqtt::{MqttConfig, MqttSink};

    let config = MqttConfig::from_env()?;
    Some(Arc::new(MqttSink::connect(&config)))
}

#[cfg(not(feature = "mqtt"))]
fn mqtt_sink() -> Option<Arc<dyn NotificationSink>> {
    None
}

fn notification_sink() -> Arc<dyn NotificationSink> {
    if let Some(sink) = mqtt_sink() {
        return sink;
    }

    info!("no MQTT broker configured, logging resolved identities only");
    Arc::new(LogSink)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let targets_file = args.file.unwrap_or_else(get_targets_file);
    let config = read_config_file(&targets_file)
        .with_context(|| format!("failed to load {}", targets_file.display()))?
        .with_env_overrides();

    let state_file = get_state_file();
    let store = Arc::new(
        StateStore::open(&state_file)
            .await
            .with_context(|| format!("failed to open state file {}", state_file.display()))?,
    );

    let sink = notification_sink();
    let engine = PollEngine::new(config, store.clone(), sink.clone()).await?;

    // targets configured with a durable id are known before the first sweep
    let identities = engine.registry().identity_map();
    if !identities.is_empty() {
        if let Err(e) = sink.notify(&identities).await {
            warn!("initial identity notification failed: {e:#}");
        }
    }

    let target_count = engine.registry().len();
    info!(
        "monitoring {target_count} targets every {:?}",
        engine.interval()
    );
    let poller = engine.spawn();

    #[cfg(feature = "api")]
    {
        use fleetwatch::api::{ApiConfig, ApiState, spawn_api_server};

        let api_config = ApiConfig {
            bind_addr: fleetwatch::util::get_api_addr(),
            enable_cors: true,
        };
        spawn_api_server(api_config, ApiState::new(store.clone(), target_count)).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    if !poller.stop().await {
        warn!("poller still busy at shutdown");
    }

    Ok(())
}
