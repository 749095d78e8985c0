use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;

use ara_batch_delivery::batch::Batcher;
use ara_batch_delivery::config::Settings;
use ara_batch_delivery::connection_manager::ConnectionManager;
use ara_batch_delivery::error::AppError;
use ara_batch_delivery::load::LoadMonitor;
use ara_batch_delivery::tasks::FlushTask;
use ara_batch_delivery::telemetry::init_telemetry;
use ara_batch_delivery::transport::ChannelTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().map_err(AppError::from)?;

    // Keep the guard alive until exit so spans are flushed
    let _telemetry = init_telemetry(&settings.otel).map_err(AppError::from)?;
    tracing::info!(
        max_batch_size = settings.batch.max_batch_size,
        max_wait_time_ms = settings.batch.max_wait_time_ms,
        max_retries = settings.retry.max_retries,
        "Configuration loaded"
    );

    let connection_manager = Arc::new(ConnectionManager::new());
    let transport = Arc::new(ChannelTransport::with_timeout(
        connection_manager.clone(),
        Duration::from_millis(settings.transport.send_timeout_ms),
    ));
    let batcher = Arc::new(Batcher::new(
        settings.batch_config(),
        settings.retry_policy(),
        transport,
        connection_manager.clone(),
    ));
    let load_monitor = Arc::new(LoadMonitor::new());

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start flush task in background
    let flush_task = FlushTask::new(
        settings.scheduler.clone(),
        batcher.clone(),
        load_monitor.clone(),
        shutdown_tx.subscribe(),
    );
    let flush_handle = tokio::spawn(async move {
        flush_task.run().await;
    });

    tracing::info!("Batch delivery engine running");

    shutdown_signal_handler(shutdown_tx).await?;

    // Wait for the final drain
    tracing::info!("Waiting for flush task to drain queues...");
    if let Err(e) = flush_handle.await {
        tracing::error!(error = %e, "Flush task panicked");
    }

    let stats = connection_manager.stats();
    let load = load_monitor.get_metrics();
    tracing::info!(
        connections = stats.total_connections,
        peak_load = load.peak_load,
        average_load = load.average_load,
        "Shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) -> Result<(), AppError> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Send shutdown signal to the flush task
    let _ = shutdown_tx.send(());
    Ok(())
}
