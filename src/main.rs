use anyhow::Result;
use sensor_ingest::config::Config;
use sensor_ingest::db::{self, Storage};
use sensor_ingest::mqtt;
use sensor_ingest::processor::MessageProcessor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_ingest=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    // Startup blocks here; exhausting the retry ceiling is fatal since
    // there is no buffering path without storage.
    let conn = db::connect_with_retry(&config.database_url, &config.retry_policy()).await?;
    tracing::info!("storage connection established");

    let storage = Storage::new(conn, config.insert_timeout());
    let processor = Arc::new(MessageProcessor::new(storage, config.ack_policy));

    let cancel = CancellationToken::new();
    let mut listener = tokio::spawn(mqtt::run_listener(config, processor, cancel.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received; draining in-flight messages");
            cancel.cancel();
        }
        res = &mut listener => {
            report_listener_exit(res);
            return Ok(());
        }
    }

    report_listener_exit(listener.await);
    Ok(())
}

fn report_listener_exit(res: Result<Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "listener exited with error"),
        Err(err) => tracing::error!(error = %err, "listener task failed"),
    }
}
