use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while decoding a payload or a change-log row into a [`Record`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {reason}")]
    Malformed { reason: String },
    /// The payload is valid JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// A required field is absent or null.
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
    /// A field is present with a value of the wrong shape.
    #[error("field `{field}` is invalid, expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// One telemetry reading of a vehicle battery.
///
/// `id` identifies the device and is not unique across time. `entry_time` is the logical time
/// of the reading and orders change-log polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    pub entry_time: DateTime<Utc>,
    pub voltage: f32,
    pub current: f32,
    pub capacity: f32,
    pub power: i32,
    pub temperature: f32,
    pub soc: i32,
    pub internal_resistance: f32,
}

/// Accepted keys per field, in lookup order.
const ID_KEYS: &[&str] = &["id", "vehicle_id", "vehicleId"];
const ENTRY_TIME_KEYS: &[&str] = &["entry_time", "entryTime"];
const INTERNAL_RESISTANCE_KEYS: &[&str] = &["internal_resistance", "internalResistance"];

impl Record {
    /// Decodes a raw broker payload.
    pub fn decode(payload: &[u8]) -> Result<Record, DecodeError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|err| DecodeError::Malformed {
                reason: err.to_string(),
            })?;

        Record::from_json(&value)
    }

    /// Decodes an already parsed JSON value, such as a change-log row.
    pub fn from_json(value: &Value) -> Result<Record, DecodeError> {
        match value {
            Value::Object(object) => Record::from_object(object),
            _ => Err(DecodeError::NotAnObject),
        }
    }

    fn from_object(object: &Map<String, Value>) -> Result<Record, DecodeError> {
        let id = match lookup(object, ID_KEYS) {
            None => return Err(DecodeError::MissingField { field: "id" }),
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(_) => {
                return Err(DecodeError::InvalidField {
                    field: "id",
                    expected: "a non-empty string",
                });
            }
        };

        let entry_time = match lookup(object, ENTRY_TIME_KEYS) {
            None => return Err(DecodeError::MissingField { field: "entry_time" }),
            Some(value) => parse_timestamp(value)?,
        };

        Ok(Record {
            id,
            entry_time,
            voltage: float_field(object, &["voltage"], "voltage")?,
            current: float_field(object, &["current"], "current")?,
            capacity: float_field(object, &["capacity"], "capacity")?,
            power: int_field(object, &["power"], "power")?,
            temperature: float_field(object, &["temperature"], "temperature")?,
            soc: int_field(object, &["soc"], "soc")?,
            internal_resistance: float_field(
                object,
                INTERNAL_RESISTANCE_KEYS,
                "internal_resistance",
            )?,
        })
    }

    /// Encodes the record as the JSON wire format published on the broker.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Finds the first non-null value among `keys`. Null counts as absent.
fn lookup<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, DecodeError> {
    let invalid = DecodeError::InvalidField {
        field: "entry_time",
        expected: "an RFC 3339 timestamp",
    };

    let Value::String(raw) = value else {
        return Err(invalid);
    };

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    // `timestamp without time zone` columns serialize without an offset; they are stored in UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| invalid)
}

fn float_field(
    object: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<f32, DecodeError> {
    match lookup(object, keys) {
        None => Ok(0.0),
        Some(value) => value
            .as_f64()
            .map(|number| number as f32)
            .ok_or(DecodeError::InvalidField {
                field,
                expected: "a number",
            }),
    }
}

fn int_field(
    object: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<i32, DecodeError> {
    let invalid = DecodeError::InvalidField {
        field,
        expected: "a 32-bit integer",
    };

    let Some(value) = lookup(object, keys) else {
        return Ok(0);
    };

    if let Some(number) = value.as_i64() {
        return i32::try_from(number).map_err(|_| invalid);
    }

    match value.as_f64() {
        Some(number)
            if number.fract() == 0.0
                && number >= f64::from(i32::MIN)
                && number <= f64::from(i32::MAX) =>
        {
            Ok(number as i32)
        }
        _ => Err(invalid),
    }
}
