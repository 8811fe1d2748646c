use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod init;

#[tokio::main]
async fn main() -> Result<(), init::InitError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let orchestrator = init::init_orchestrator().await?;

    let mut events = orchestrator.subscribe();
    let log_events = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(?event, "orchestration event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    init::shutdown();
    log_events.abort();
    Ok(())
}
