use crate::reading::SensorReading;
use chrono::{DateTime, Utc};
use sqlx::{Connection, MySqlConnection};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Fatal at startup only: the retry ceiling was exhausted without a live
/// connection, and there is no buffering path to fall back on.
#[derive(Debug, Error)]
#[error("storage unreachable after {attempts} connection attempts")]
pub struct ConnectionError {
    pub attempts: u32,
    #[source]
    pub last: sqlx::Error,
}

/// Bounded retry with a fixed inter-attempt delay; no backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or the attempt ceiling is hit. The delay
    /// is applied between attempts, not after the last one.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ConnectionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let ceiling = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= ceiling => {
                    return Err(ConnectionError {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        ceiling,
                        error = %err,
                        "storage connection attempt failed; retrying"
                    );
                    sleep(self.delay).await;
                }
            }
        }
    }
}

pub async fn connect_with_retry(
    url: &str,
    policy: &RetryPolicy,
) -> Result<MySqlConnection, ConnectionError> {
    policy
        .run(|attempt| async move {
            tracing::info!(attempt, "connecting to MySQL");
            let mut conn = MySqlConnection::connect(url).await?;
            conn.ping().await?;
            Ok(conn)
        })
        .await
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("insert timed out after {limit:?}")]
    Timeout { limit: Duration },
}

const INSERT_READING_SQL: &str = "\
    INSERT INTO sensor_readings \
    (device_id, timestamp_utc, temperature_celsius, humidity_percent, processing_timestamp_utc) \
    VALUES (?, ?, ?, ?, ?)";

/// Owns the single storage connection. Every insert+commit runs inside one
/// critical section, so concurrent handlers can never interleave on the
/// connection's transaction state.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<MySqlConnection>>,
    insert_timeout: Option<Duration>,
}

impl Storage {
    pub fn new(conn: MySqlConnection, insert_timeout: Option<Duration>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            insert_timeout,
        }
    }

    pub async fn insert_reading(
        &self,
        reading: &SensorReading,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        match self.insert_timeout {
            Some(limit) => tokio::time::timeout(limit, self.insert_tx(reading, processed_at))
                .await
                .map_err(|_| StorageError::Timeout { limit })?,
            None => self.insert_tx(reading, processed_at).await,
        }
    }

    async fn insert_tx(
        &self,
        reading: &SensorReading,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().await;
        let mut tx = conn.begin().await?;
        sqlx::query(INSERT_READING_SQL)
            .bind(&reading.device_id)
            .bind(reading.timestamp_utc)
            .bind(reading.temperature_celsius)
            .bind(reading.humidity_percent)
            .bind(processed_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
