// src/peripherals/snapshot.rs - JSON snapshot encoding shared by all registries
//!
//! Each registry serializes a plain record with an `initialized` flag and one
//! collection field. Collections keyed by identifier use the identifier's
//! decimal string as the JSON object key, e.g. an ADC snapshot:
//!
//! ```json
//! {"initialized":true,"channels":{"3":{"sampleRate":100,"lastValue":2051}}}
//! ```
//!
//! Decoding is done into the full record type before any live state is
//! touched, so a restore either applies the whole snapshot or nothing.

use crate::error::{PeripheralError, PeripheralResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::str::FromStr;

pub fn encode<T: Serialize>(record: &T) -> PeripheralResult<String> {
    Ok(serde_json::to_string(record)?)
}

pub fn decode<T: DeserializeOwned>(kind: &str, blob: &str) -> PeripheralResult<T> {
    serde_json::from_str(blob).map_err(|e| {
        tracing::warn!("Rejected {} snapshot: {}", kind, e);
        PeripheralError::from(e)
    })
}

/// Parse a collection key back into its identifier type.
pub fn parse_key<K: FromStr>(kind: &str, key: &str) -> PeripheralResult<K> {
    key.parse::<K>().map_err(|_| {
        tracing::warn!("Rejected {} snapshot: bad key '{}'", kind, key);
        PeripheralError::MalformedSnapshot(format!("invalid {} key '{}'", kind, key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        initialized: bool,
        count: u8,
    }

    #[test]
    fn test_decode_rejects_wrong_types() {
        let result: PeripheralResult<Record> = decode("test", r#"{"initialized":1,"count":2}"#);
        assert!(matches!(result, Err(PeripheralError::MalformedSnapshot(_))));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let result: PeripheralResult<Record> = decode("test", r#"{"initialized":true}"#);
        assert!(matches!(result, Err(PeripheralError::MalformedSnapshot(_))));
    }

    #[test]
    fn test_decode_rejects_out_of_range() {
        let result: PeripheralResult<Record> = decode("test", r#"{"initialized":true,"count":300}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_then_decode() {
        let record = Record { initialized: true, count: 7 };
        let blob = encode(&record).unwrap();
        assert_eq!(decode::<Record>("test", &blob).unwrap(), record);
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key::<u8>("adc", "12").unwrap(), 12);
        assert!(parse_key::<u8>("adc", "ch1").is_err());
        assert!(parse_key::<u8>("adc", "256").is_err());
    }
}
