//! Publishes one randomized reading every two seconds, for local runs
//! against the consumer.

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use sensor_ingest::config::Config;
use sensor_ingest::reading::SensorReading;
use tokio::time::{interval, sleep, Duration};

const DEVICE_ID: &str = "sensor_1";

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

fn sample_reading() -> SensorReading {
    let mut rng = rand::thread_rng();
    SensorReading {
        device_id: DEVICE_ID.to_string(),
        timestamp_utc: Utc::now(),
        temperature_celsius: round2(rng.gen_range(15.0..35.0)),
        humidity_percent: round2(rng.gen_range(30.0..80.0)),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let mut mqttoptions = MqttOptions::new(
        format!("{}-generator", config.mqtt_client_id),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    mqttoptions.set_keep_alive(config.mqtt_keepalive());
    if let Some(username) = &config.mqtt_username {
        mqttoptions.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);
    tracing::info!(topic = %config.mqtt_topic, device = DEVICE_ID, "publishing readings");

    let mut ticker = interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("generator stopping");
                let _ = client.disconnect().await;
                return Ok(());
            }
            _ = ticker.tick() => {
                let reading = sample_reading();
                let payload = serde_json::to_vec(&reading)?;
                if let Err(err) = client
                    .publish(config.mqtt_topic.as_str(), QoS::AtLeastOnce, false, payload)
                    .await
                {
                    tracing::warn!(error = %err, "failed to queue reading");
                } else {
                    tracing::debug!(
                        temperature = reading.temperature_celsius,
                        humidity = reading.humidity_percent,
                        "reading queued"
                    );
                }
            }
            event = eventloop.poll() => {
                if let Err(err) = event {
                    tracing::warn!(error = %err, "MQTT connection lost; retrying");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
