//! Replication wire message.
//!
//! A message is a JSON object with four string fields:
//!
//! | Field | Meaning | Values |
//! |-------|---------|--------|
//! | `F` | function | only `"See"` is meaningful |
//! | `T` | kind | `"oracle"` or `"hash"` |
//! | `K` | key | opaque string |
//! | `V` | value | lowercase hex `u64`, no `0x` prefix |
//!
//! Unknown fields are ignored and missing fields decode as empty strings,
//! which makes the message unrecognized.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

use super::kind::{Function, Kind};

/// A replicated update as published on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    /// Function name.
    #[serde(rename = "F", default)]
    pub function: String,
    /// Observation kind.
    #[serde(rename = "T", default)]
    pub kind: String,
    /// Key the observation was recorded against.
    #[serde(rename = "K", default)]
    pub key: String,
    /// Hex-encoded fingerprint.
    #[serde(rename = "V", default)]
    pub value: String,
}

/// A decoded, recognized update ready to be applied locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedUpdate {
    /// Observation kind.
    pub kind: Kind,
    /// Key the observation was recorded against.
    pub key: String,
    /// Fingerprint or hash value.
    pub fingerprint: u64,
}

impl PublishMessage {
    /// Builds a `See` message for a local observation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use seenstore::{Kind, PublishMessage};
    ///
    /// let msg = PublishMessage::see(Kind::Hash, "x", 42);
    /// assert_eq!(msg.value, "2a");
    /// ```
    #[must_use]
    pub fn see(kind: Kind, key: &str, fingerprint: u64) -> Self {
        Self {
            function: Function::See.as_str().to_string(),
            kind: kind.as_str().to_string(),
            key: key.to_string(),
            value: format!("{fingerprint:x}"),
        }
    }

    /// Serializes the message to a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::OperationFailed {
            operation: "encode_publish_message".to_string(),
            cause: e.to_string(),
        })
    }

    /// Deserializes a message from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the payload is not a JSON object
    /// with string-valued fields.
    pub fn from_bytes(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidInput(format!("malformed publish message: {e}")))
    }

    /// Parses the value as a base-16 `u64`.
    ///
    /// Only unsigned hex digits are accepted. Malformed values, including
    /// signed ones, parse to zero rather than failing.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        if self.value.is_empty() || !self.value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return 0;
        }
        u64::from_str_radix(&self.value, 16).unwrap_or(0)
    }

    /// Decodes the message into an update if its function and kind are
    /// recognized.
    #[must_use]
    pub fn decode(&self) -> Option<ReplicatedUpdate> {
        match Function::parse(&self.function)? {
            Function::See => Some(ReplicatedUpdate {
                kind: Kind::parse(&self.kind)?,
                key: self.key.clone(),
                fingerprint: self.fingerprint(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_see_message_shape() {
        let msg = PublishMessage::see(Kind::Oracle, "example.com", 0xdead_beef);
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(json["F"], "See");
        assert_eq!(json["T"], "oracle");
        assert_eq!(json["K"], "example.com");
        assert_eq!(json["V"], "deadbeef");
        assert_eq!(json.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_value_is_lowercase_unprefixed_hex() {
        let msg = PublishMessage::see(Kind::Hash, "k", u64::MAX);
        assert_eq!(msg.value, "ffffffffffffffff");

        let msg = PublishMessage::see(Kind::Hash, "k", 0);
        assert_eq!(msg.value, "0");
    }

    #[test]
    fn test_decode_hash_message() {
        let msg = PublishMessage::from_bytes(br#"{"F":"See","T":"hash","K":"x","V":"2a"}"#).unwrap();
        let update = msg.decode().unwrap();

        assert_eq!(update.kind, Kind::Hash);
        assert_eq!(update.key, "x");
        assert_eq!(update.fingerprint, 42);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let msg =
            PublishMessage::from_bytes(br#"{"F":"See","T":"oracle","K":"x","V":"1","X":"y"}"#)
                .unwrap();
        assert!(msg.decode().is_some());
    }

    #[test]
    fn test_missing_fields_are_unrecognized() {
        let msg = PublishMessage::from_bytes(br#"{"T":"hash","K":"x","V":"1"}"#).unwrap();
        assert_eq!(msg.function, "");
        assert!(msg.decode().is_none());

        let msg = PublishMessage::from_bytes(br#"{"F":"See","K":"x","V":"1"}"#).unwrap();
        assert!(msg.decode().is_none());
    }

    #[test]
    fn test_unknown_function_or_kind_dropped() {
        let msg = PublishMessage {
            function: "Seen".to_string(),
            kind: "hash".to_string(),
            key: "x".to_string(),
            value: "1".to_string(),
        };
        assert!(msg.decode().is_none());

        let msg = PublishMessage {
            function: "See".to_string(),
            kind: "bogus".to_string(),
            key: "x".to_string(),
            value: "1".to_string(),
        };
        assert!(msg.decode().is_none());
    }

    #[test]
    fn test_malformed_value_parses_to_zero() {
        for value in ["zz", "", "0x2a", "+2a", "-2a", " 2a", "10000000000000000"] {
            let msg = PublishMessage {
                function: "See".to_string(),
                kind: "hash".to_string(),
                key: "x".to_string(),
                value: value.to_string(),
            };
            assert_eq!(msg.fingerprint(), 0, "value {value:?}");
            assert_eq!(msg.decode().unwrap().fingerprint, 0);
        }
    }

    #[test]
    fn test_non_json_payload_is_invalid_input() {
        let err = PublishMessage::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = PublishMessage::from_bytes(br#"{"F":1}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
