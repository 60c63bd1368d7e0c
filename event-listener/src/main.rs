//! Event listener binary

use anyhow::Context;
use event_listener::{
    Config, HealthMonitor, ListenerContainer, LoggingProcessor, NatsBroker, RecordListener,
    RuleValidator,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting Event Listener");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        "📋 Configuration loaded (topic: {}, group: {}, broker: {})",
        config.consumer.topic, config.consumer.group_id, config.broker.address
    );

    let broker = Arc::new(
        NatsBroker::connect(&config)
            .await
            .context("Failed to connect to broker")?,
    );

    let cancel = CancellationToken::new();

    let monitor = HealthMonitor::new(
        broker.clone(),
        config.health_monitor_config(),
        cancel.clone(),
    );
    let monitor_handle = monitor.spawn();

    let listener = RecordListener::new(
        monitor.state(),
        Arc::new(RuleValidator::new()),
        Arc::new(LoggingProcessor),
    );
    let container = ListenerContainer::new(broker, listener, config.container_config());
    let mut container_handle = tokio::spawn(container.run(cancel.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("🛑 Shutdown signal received");
        }
        result = &mut container_handle => {
            error!("Listener container exited unexpectedly: {:?}", result);
        }
    }

    cancel.cancel();

    if !container_handle.is_finished() {
        match container_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Listener container failed: {}", e),
            Err(e) => error!("Listener container task failed: {}", e),
        }
    }
    if let Err(e) = monitor_handle.await {
        error!("Health monitor task failed: {}", e);
    }

    info!("👋 Event Listener stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
