use crate::db::{Storage, StorageError};
use crate::reading::{validate, SensorReading, ValidationError};
use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("insert failed: {0}")]
    Persistence(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Withhold,
}

/// Decides whether a concluded processing attempt acknowledges the delivery.
///
/// `Always` acks every outcome, so a transient storage fault drops the
/// message instead of redelivering it.
/// `RequireStorage` treats decode and validation failures as terminal
/// (acked, dropped) but withholds the ack on persistence failure so the
/// broker redelivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    #[default]
    Always,
    RequireStorage,
}

impl AckPolicy {
    pub fn decide(&self, result: &Result<SensorReading, ProcessError>) -> AckDecision {
        match (self, result) {
            (AckPolicy::Always, _) => AckDecision::Ack,
            (AckPolicy::RequireStorage, Err(ProcessError::Persistence(_))) => AckDecision::Withhold,
            (AckPolicy::RequireStorage, _) => AckDecision::Ack,
        }
    }
}

/// Orchestrates decode -> validate -> persist for one inbound message.
/// Per-message errors never escape: the listener only sees the ack decision.
pub struct MessageProcessor {
    storage: Storage,
    policy: AckPolicy,
}

impl MessageProcessor {
    pub fn new(storage: Storage, policy: AckPolicy) -> Self {
        Self { storage, policy }
    }

    pub async fn handle(&self, payload: &[u8]) -> AckDecision {
        let result = self.process(payload).await;
        match &result {
            Ok(reading) => {
                tracing::debug!(device = %reading.device_id, "reading persisted");
            }
            Err(err @ ProcessError::Persistence(_)) => {
                tracing::error!(error = %err, "failed to persist reading");
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable or invalid message");
            }
        }

        let decision = self.policy.decide(&result);
        if decision == AckDecision::Withhold {
            tracing::warn!("withholding ack; broker will redeliver");
        }
        decision
    }

    async fn process(&self, payload: &[u8]) -> Result<SensorReading, ProcessError> {
        let event: Map<String, Value> = serde_json::from_slice(payload)?;
        let reading = validate(&event)?;
        let processed_at = Utc::now();
        self.storage.insert_reading(&reading, processed_at).await?;
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_reading() -> SensorReading {
        SensorReading {
            device_id: "sensor_1".to_string(),
            timestamp_utc: Utc::now(),
            temperature_celsius: 25.5,
            humidity_percent: 40.2,
        }
    }

    fn decode_error() -> ProcessError {
        let err = serde_json::from_slice::<Map<String, Value>>(b"not json")
            .expect_err("invalid json");
        ProcessError::Decode(err)
    }

    fn validation_error() -> ProcessError {
        ProcessError::Validation(ValidationError::MissingField {
            field: "humidity_percent",
        })
    }

    fn persistence_error() -> ProcessError {
        ProcessError::Persistence(StorageError::Timeout {
            limit: Duration::from_millis(100),
        })
    }

    #[test]
    fn always_policy_acks_every_outcome() {
        let policy = AckPolicy::Always;
        assert_eq!(policy.decide(&Ok(sample_reading())), AckDecision::Ack);
        assert_eq!(policy.decide(&Err(decode_error())), AckDecision::Ack);
        assert_eq!(policy.decide(&Err(validation_error())), AckDecision::Ack);
        assert_eq!(policy.decide(&Err(persistence_error())), AckDecision::Ack);
    }

    #[test]
    fn require_storage_withholds_only_on_persistence_failure() {
        let policy = AckPolicy::RequireStorage;
        assert_eq!(policy.decide(&Ok(sample_reading())), AckDecision::Ack);
        assert_eq!(policy.decide(&Err(decode_error())), AckDecision::Ack);
        assert_eq!(policy.decide(&Err(validation_error())), AckDecision::Ack);
        assert_eq!(
            policy.decide(&Err(persistence_error())),
            AckDecision::Withhold
        );
    }

    #[test]
    fn default_policy_is_always() {
        assert_eq!(AckPolicy::default(), AckPolicy::Always);
    }
}
