use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const TEMPERATURE_MIN: f64 = -50.0;
pub const TEMPERATURE_MAX: f64 = 100.0;
pub const HUMIDITY_MIN: f64 = 0.0;
pub const HUMIDITY_MAX: f64 = 100.0;

/// Canonical field order; the first missing field in this order is the one
/// reported.
pub const REQUIRED_FIELDS: [&str; 4] = [
    "device_id",
    "timestamp_utc",
    "temperature_celsius",
    "humidity_percent",
];

/// A validated device reading. Immutable once constructed; the ingestion
/// timestamp is captured separately at persistence time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub device_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub temperature_celsius: f64,
    pub humidity_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field: {field}")]
    MissingField { field: &'static str },
    #[error("device_id must be a non-empty string")]
    InvalidDeviceId,
    #[error("field {field} is not numeric")]
    NotNumeric { field: &'static str },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("malformed timestamp: {value}")]
    MalformedTimestamp { value: String },
}

/// Turns a parsed event into a well-formed reading or a typed rejection.
///
/// Pure: no I/O, no shared state. Checks run in a fixed order (presence in
/// canonical field order, device id shape, numeric coercion, ranges,
/// timestamp parse) so a multi-fault event always reports the same single
/// cause.
pub fn validate(event: &Map<String, Value>) -> Result<SensorReading, ValidationError> {
    for field in REQUIRED_FIELDS {
        if !event.contains_key(field) {
            return Err(ValidationError::MissingField { field });
        }
    }

    let device_id = match event.get("device_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(ValidationError::InvalidDeviceId),
    };

    let temperature_celsius = numeric_field(event, "temperature_celsius")?;
    let humidity_percent = numeric_field(event, "humidity_percent")?;

    // NaN fails both range checks.
    if !(TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temperature_celsius) {
        return Err(ValidationError::OutOfRange {
            field: "temperature_celsius",
            value: temperature_celsius,
        });
    }
    if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&humidity_percent) {
        return Err(ValidationError::OutOfRange {
            field: "humidity_percent",
            value: humidity_percent,
        });
    }

    let timestamp_utc = match event.get("timestamp_utc") {
        Some(value) => parse_timestamp(value)?,
        None => return Err(ValidationError::MissingField { field: "timestamp_utc" }),
    };

    Ok(SensorReading {
        device_id,
        timestamp_utc,
        temperature_celsius,
        humidity_percent,
    })
}

// JSON numbers pass through; numeric strings are coerced.
fn numeric_field(event: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    match event.get(field) {
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or(ValidationError::NotNumeric { field }),
        Some(Value::String(raw)) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::NotNumeric { field }),
        _ => Err(ValidationError::NotNumeric { field }),
    }
}

// Event time must carry an explicit offset; naive timestamps are malformed.
fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, ValidationError> {
    let raw = match value.as_str() {
        Some(raw) => raw,
        None => {
            return Err(ValidationError::MalformedTimestamp {
                value: value.to_string(),
            })
        }
    };
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ValidationError::MalformedTimestamp {
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    fn valid_event() -> Map<String, Value> {
        event(json!({
            "device_id": "sensor_1",
            "timestamp_utc": "2024-01-01T00:00:00+00:00",
            "temperature_celsius": 25.5,
            "humidity_percent": 40.2,
        }))
    }

    #[test]
    fn accepts_in_range_reading() {
        let reading = validate(&valid_event()).expect("valid");
        assert_eq!(reading.device_id, "sensor_1");
        assert_eq!(reading.temperature_celsius, 25.5);
        assert_eq!(reading.humidity_percent, 40.2);
        assert_eq!(reading.timestamp_utc.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn accepts_boundary_values() {
        let mut ev = valid_event();
        ev.insert("temperature_celsius".into(), json!(-50.0));
        ev.insert("humidity_percent".into(), json!(100.0));
        assert!(validate(&ev).is_ok());

        ev.insert("temperature_celsius".into(), json!(100.0));
        ev.insert("humidity_percent".into(), json!(0.0));
        assert!(validate(&ev).is_ok());
    }

    #[test]
    fn reports_first_missing_field_in_canonical_order() {
        let mut ev = valid_event();
        ev.remove("device_id");
        ev.remove("humidity_percent");
        assert_eq!(
            validate(&ev),
            Err(ValidationError::MissingField { field: "device_id" })
        );

        let mut ev = valid_event();
        ev.remove("humidity_percent");
        assert_eq!(
            validate(&ev),
            Err(ValidationError::MissingField { field: "humidity_percent" })
        );
    }

    #[test]
    fn rejects_empty_or_non_string_device_id() {
        let mut ev = valid_event();
        ev.insert("device_id".into(), json!(""));
        assert_eq!(validate(&ev), Err(ValidationError::InvalidDeviceId));

        let mut ev = valid_event();
        ev.insert("device_id".into(), json!(7));
        assert_eq!(validate(&ev), Err(ValidationError::InvalidDeviceId));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut ev = valid_event();
        ev.insert("temperature_celsius".into(), json!(150.5));
        assert_eq!(
            validate(&ev),
            Err(ValidationError::OutOfRange {
                field: "temperature_celsius",
                value: 150.5,
            })
        );
    }

    #[test]
    fn rejects_out_of_range_humidity() {
        let mut ev = valid_event();
        ev.insert("humidity_percent".into(), json!(-0.1));
        assert_eq!(
            validate(&ev),
            Err(ValidationError::OutOfRange {
                field: "humidity_percent",
                value: -0.1,
            })
        );
    }

    #[test]
    fn coerces_numeric_strings() {
        let mut ev = valid_event();
        ev.insert("temperature_celsius".into(), json!(" 25.5 "));
        let reading = validate(&ev).expect("coerced");
        assert_eq!(reading.temperature_celsius, 25.5);
    }

    #[test]
    fn rejects_non_numeric_values() {
        let mut ev = valid_event();
        ev.insert("humidity_percent".into(), json!("soggy"));
        assert_eq!(
            validate(&ev),
            Err(ValidationError::NotNumeric { field: "humidity_percent" })
        );
    }

    #[test]
    fn rejects_nan() {
        let mut ev = valid_event();
        ev.insert("temperature_celsius".into(), json!("NaN"));
        assert!(matches!(
            validate(&ev),
            Err(ValidationError::OutOfRange { field: "temperature_celsius", .. })
        ));
    }

    #[test]
    fn rejects_naive_timestamp() {
        let mut ev = valid_event();
        ev.insert("timestamp_utc".into(), json!("2024-01-01T00:00:00"));
        assert_eq!(
            validate(&ev),
            Err(ValidationError::MalformedTimestamp {
                value: "2024-01-01T00:00:00".to_string()
            })
        );
    }

    #[test]
    fn accepts_zulu_timestamp() {
        let mut ev = valid_event();
        ev.insert("timestamp_utc".into(), json!("2024-06-15T12:30:00Z"));
        assert!(validate(&ev).is_ok());
    }

    #[test]
    fn range_check_precedes_timestamp_parse() {
        let mut ev = valid_event();
        ev.insert("temperature_celsius".into(), json!(200.0));
        ev.insert("timestamp_utc".into(), json!("not-a-timestamp"));
        assert!(matches!(
            validate(&ev),
            Err(ValidationError::OutOfRange { field: "temperature_celsius", .. })
        ));
    }

    #[test]
    fn validate_is_pure() {
        let ev = valid_event();
        assert_eq!(validate(&ev), validate(&ev));

        let mut bad = valid_event();
        bad.remove("timestamp_utc");
        assert_eq!(validate(&bad), validate(&bad));
    }
}
