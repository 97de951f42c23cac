use crate::config::Config;
use crate::processor::{AckDecision, MessageProcessor};
use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Subscribes to the reading channel and dispatches each delivery to the
/// processor on its own task. Cancellation stops the acceptance of new
/// deliveries; in-flight handlers always run to completion.
pub async fn run_listener(
    config: Config,
    processor: Arc<MessageProcessor>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        // The broker must retain undelivered QoS 1 messages across
        // reconnects, and acks are sent only after a handler concludes.
        mqttoptions.set_clean_session(false);
        mqttoptions.set_manual_acks(true);
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);
        match client
            .subscribe(config.mqtt_topic.clone(), QoS::AtLeastOnce)
            .await
        {
            Ok(_) => tracing::info!(topic = %config.mqtt_topic, "subscribed to reading feed"),
            Err(err) => {
                tracing::warn!(error = %err, "failed to subscribe; retrying");
                sleep(Duration::from_secs(2)).await;
                continue;
            }
        }

        let mut handlers: JoinSet<()> = JoinSet::new();
        let connection_dropped = loop {
            tokio::select! {
                _ = cancel.cancelled() => break false,
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let processor = processor.clone();
                        let client = client.clone();
                        handlers.spawn(async move {
                            let decision = processor.handle(publish.payload.as_ref()).await;
                            if decision == AckDecision::Ack {
                                if let Err(err) = client.ack(&publish).await {
                                    tracing::warn!(error = %err, "failed to ack delivery");
                                }
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                        break true;
                    }
                }
            }
        };

        drain_in_flight(&mut handlers, &mut eventloop).await;

        if !connection_dropped {
            let _ = client.disconnect().await;
            tracing::info!("listener stopped");
            return Ok(());
        }
        sleep(Duration::from_secs(1)).await;
    }
}

// Keeps polling the event loop while in-flight handlers finish so their
// acks still reach the broker.
async fn drain_in_flight(handlers: &mut JoinSet<()>, eventloop: &mut EventLoop) {
    while !handlers.is_empty() {
        tokio::select! {
            _ = handlers.join_next() => {}
            event = eventloop.poll() => {
                if event.is_err() {
                    // Connection already gone; pending acks cannot be
                    // delivered, the broker will redeliver.
                    while handlers.join_next().await.is_some() {}
                    return;
                }
            }
        }
    }
}
