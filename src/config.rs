use crate::db::RetryPolicy;
use crate::processor::AckPolicy;
use anyhow::Result;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub database_url: String,
    pub connect_attempts: u32,
    pub connect_retry_delay_secs: u64,
    pub insert_timeout_ms: Option<u64>,
    pub ack_policy: AckPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mqtt_host = env::var("INGEST_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = env::var("INGEST_MQTT_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(1883);
        let mqtt_username = env::var("INGEST_MQTT_USERNAME").ok();
        let mqtt_password = env::var("INGEST_MQTT_PASSWORD").ok();
        let mqtt_topic =
            env::var("INGEST_MQTT_TOPIC").unwrap_or_else(|_| "iot/sensor-data/raw".to_string());
        let mqtt_client_id = env::var("INGEST_MQTT_CLIENT_ID")
            .unwrap_or_else(|_| format!("sensor-ingest-{}", std::process::id()));
        let mqtt_keepalive_secs = env::var("INGEST_MQTT_KEEPALIVE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let database_url = env::var("INGEST_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(database_url_from_parts);

        let connect_attempts = env::var("INGEST_CONNECT_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v != 0)
            .unwrap_or(20);
        let connect_retry_delay_secs = env::var("INGEST_CONNECT_RETRY_DELAY_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        let insert_timeout_ms = env::var("INGEST_INSERT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != 0);

        let ack_policy = match env::var("INGEST_ACK_POLICY").ok() {
            Some(value) if value.trim().eq_ignore_ascii_case("require-storage") => {
                AckPolicy::RequireStorage
            }
            Some(value) if value.trim().eq_ignore_ascii_case("always") || value.trim().is_empty() => {
                AckPolicy::Always
            }
            Some(value) => {
                tracing::warn!(policy = %value, "unknown ack policy; defaulting to always");
                AckPolicy::Always
            }
            None => AckPolicy::Always,
        };

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic,
            mqtt_client_id,
            mqtt_keepalive_secs,
            database_url,
            connect_attempts,
            connect_retry_delay_secs,
            insert_timeout_ms,
            ack_policy,
        })
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts,
            delay: Duration::from_secs(self.connect_retry_delay_secs),
        }
    }

    pub fn insert_timeout(&self) -> Option<Duration> {
        self.insert_timeout_ms.map(Duration::from_millis)
    }
}

fn database_url_from_parts() -> String {
    let host = env::var("MYSQL_HOST").unwrap_or_else(|_| "mysql-db".to_string());
    let port = env::var("MYSQL_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3306);
    let user = env::var("MYSQL_USER").unwrap_or_else(|_| "root".to_string());
    let password = env::var("MYSQL_PASSWORD").unwrap_or_else(|_| "password123".to_string());
    let database = env::var("MYSQL_DATABASE").unwrap_or_else(|_| "iot_data".to_string());
    format!("mysql://{user}:{password}@{host}:{port}/{database}")
}
