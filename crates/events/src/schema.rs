//! Per-type schema registry and typed decoding.
//!
//! Payloads are stored as JSON but never travel past the store/projection
//! boundary untyped: every event family implements [`DecodeEvent`] and each
//! stored record is decoded into a concrete variant keyed by
//! `(event_type, schema_version)`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("unsupported schema version for '{event_type}': found {found}, registered {registered}")]
    UnsupportedVersion {
        event_type: String,
        found: u32,
        registered: u32,
    },

    #[error("malformed payload for '{event_type}': {message}")]
    Payload { event_type: String, message: String },

    #[error("payload encoding failed for '{event_type}': {message}")]
    Encode { event_type: String, message: String },

    #[error("event type '{event_type}' registered twice with versions {first} and {second}")]
    Duplicate {
        event_type: String,
        first: u32,
        second: u32,
    },
}

/// An event family that can be encoded to and decoded from stored payloads.
pub trait DecodeEvent: Sized {
    /// `(event_type, schema_version)` for every variant this family owns.
    fn schema() -> &'static [(&'static str, u32)];

    fn decode(event_type: &str, schema_version: u32, payload: &JsonValue) -> Result<Self, SchemaError>;

    /// JSON payload of the variant (without the type tag).
    fn encode(&self) -> Result<JsonValue, SchemaError>;

    fn owns(event_type: &str) -> bool {
        Self::schema().iter().any(|(t, _)| *t == event_type)
    }
}

/// Deserialize a payload into `T`, tagging errors with the event type.
pub fn decode_payload<T: DeserializeOwned>(event_type: &str, payload: &JsonValue) -> Result<T, SchemaError> {
    T::deserialize(payload).map_err(|e| SchemaError::Payload {
        event_type: event_type.to_string(),
        message: e.to_string(),
    })
}

pub fn encode_payload<T: Serialize>(event_type: &str, payload: &T) -> Result<JsonValue, SchemaError> {
    serde_json::to_value(payload).map_err(|e| SchemaError::Encode {
        event_type: event_type.to_string(),
        message: e.to_string(),
    })
}

/// Explicit `event_type -> schema_version` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    versions: BTreeMap<String, u32>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one event type. Re-registering with the same version is a no-op.
    pub fn register(&mut self, event_type: &str, schema_version: u32) -> Result<(), SchemaError> {
        match self.versions.get(event_type) {
            Some(existing) if *existing != schema_version => Err(SchemaError::Duplicate {
                event_type: event_type.to_string(),
                first: *existing,
                second: schema_version,
            }),
            Some(_) => Ok(()),
            None => {
                self.versions.insert(event_type.to_string(), schema_version);
                Ok(())
            }
        }
    }

    /// Register every event type of a family.
    pub fn register_family<E: DecodeEvent>(&mut self) -> Result<(), SchemaError> {
        for (event_type, version) in E::schema() {
            self.register(event_type, *version)?;
        }
        Ok(())
    }

    pub fn with_family<E: DecodeEvent>(mut self) -> Result<Self, SchemaError> {
        self.register_family::<E>()?;
        Ok(self)
    }

    pub fn version_of(&self, event_type: &str) -> Option<u32> {
        self.versions.get(event_type).copied()
    }

    /// Ok if `(event_type, schema_version)` is registered.
    pub fn check(&self, event_type: &str, schema_version: u32) -> Result<(), SchemaError> {
        match self.versions.get(event_type) {
            None => Err(SchemaError::UnknownEventType(event_type.to_string())),
            Some(registered) if *registered != schema_version => Err(SchemaError::UnsupportedVersion {
                event_type: event_type.to_string(),
                found: schema_version,
                registered: *registered,
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        count: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Pinged(Pinged),
    }

    impl DecodeEvent for TestEvent {
        fn schema() -> &'static [(&'static str, u32)] {
            &[("test.pinged", 1)]
        }

        fn decode(event_type: &str, _schema_version: u32, payload: &JsonValue) -> Result<Self, SchemaError> {
            match event_type {
                "test.pinged" => Ok(TestEvent::Pinged(decode_payload(event_type, payload)?)),
                other => Err(SchemaError::UnknownEventType(other.to_string())),
            }
        }

        fn encode(&self) -> Result<JsonValue, SchemaError> {
            match self {
                TestEvent::Pinged(p) => encode_payload("test.pinged", p),
            }
        }
    }

    #[test]
    fn registry_checks_type_and_version() {
        let registry = SchemaRegistry::new().with_family::<TestEvent>().unwrap();
        assert!(registry.check("test.pinged", 1).is_ok());
        assert_eq!(
            registry.check("test.pinged", 2),
            Err(SchemaError::UnsupportedVersion {
                event_type: "test.pinged".to_string(),
                found: 2,
                registered: 1,
            })
        );
        assert!(matches!(registry.check("test.other", 1), Err(SchemaError::UnknownEventType(_))));
    }

    #[test]
    fn conflicting_registration_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register("a", 1).unwrap();
        registry.register("a", 1).unwrap();
        assert!(matches!(registry.register("a", 2), Err(SchemaError::Duplicate { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn malformed_payload_names_event_type() {
        let err = TestEvent::decode("test.pinged", 1, &serde_json::json!({"count": "nope"})).unwrap_err();
        match err {
            SchemaError::Payload { event_type, .. } => assert_eq!(event_type, "test.pinged"),
            other => panic!("Expected Payload error, got {other:?}"),
        }
    }

    #[test]
    fn encode_then_decode_preserves_variant() {
        let ev = TestEvent::Pinged(Pinged { count: 3 });
        let payload = ev.encode().unwrap();
        assert_eq!(TestEvent::decode("test.pinged", 1, &payload).unwrap(), ev);
    }
}
