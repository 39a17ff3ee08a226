//! Message Envelope
//!
//! Every protocol message, inbound or outbound, travels inside the same JSON
//! envelope:
//!
//! ```text
//! { "version": "1.0", "timestamp": "<ISO-8601>", "deviceName": "<string>",
//!   "messageType": "<string>", "data": { ... } }
//! ```
//!
//! Outbound envelopes are always built by [`EnvelopeCodec`], which stamps the
//! process-wide metadata and emits exactly one line per envelope. Inbound
//! envelopes are parsed leniently: only `messageType` is mandatory, and a
//! missing or unreadable timestamp is replaced by the receipt time.

use crate::protocol::DELIMITER;
use crate::{NetworkError, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Protocol envelope. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    version: String,
    #[serde(
        default = "Utc::now",
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    timestamp: DateTime<Utc>,
    #[serde(default)]
    device_name: String,
    message_type: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    /// Create an envelope from its parts
    pub fn new(
        version: impl Into<String>,
        timestamp: DateTime<Utc>,
        device_name: impl Into<String>,
        message_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            version: version.into(),
            timestamp,
            device_name: device_name.into(),
            message_type: message_type.into(),
            data,
        }
    }

    /// Parse one validated candidate message into an envelope
    pub fn parse(candidate: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(candidate)
            .map_err(|e| NetworkError::protocol_with_source("Malformed envelope", e))?;

        if envelope.message_type.trim().is_empty() {
            return Err(NetworkError::protocol("Envelope has an empty messageType"));
        }

        Ok(envelope)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Routing discriminator
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Type-specific payload
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Serialize to a single line of JSON without the delimiter
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now))
}

/// Accepts RFC 3339 and offset-less ISO-8601 (read as UTC)
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Builds and frames outbound envelopes
///
/// All outbound traffic goes through here so every frame carries the same
/// version and device name and ends with exactly one delimiter.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    version: String,
    device_name: String,
}

impl EnvelopeCodec {
    pub fn new(version: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            device_name: device_name.into(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Build an envelope stamped with the current time
    pub fn build(&self, message_type: &str, data: Value) -> Envelope {
        Envelope::new(
            self.version.clone(),
            Utc::now(),
            self.device_name.clone(),
            message_type,
            data,
        )
    }

    /// Serialize an envelope into a delimited wire frame
    pub fn encode(&self, envelope: &Envelope) -> Result<String> {
        let mut line = envelope.to_json()?;
        line.push(DELIMITER as char);
        Ok(line)
    }

    /// Build and encode in one step
    pub fn frame(&self, message_type: &str, data: Value) -> Result<String> {
        self.encode(&self.build(message_type, data))
    }

    /// Frame a caller-supplied envelope
    ///
    /// The text must be a single JSON object. It is re-serialized compactly so
    /// embedded newlines can never break framing.
    pub fn frame_raw(&self, raw: &str) -> Result<String> {
        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|e| NetworkError::protocol_with_source("Raw envelope is not valid JSON", e))?;

        let object = value
            .as_object()
            .ok_or_else(|| NetworkError::protocol("Raw envelope is not a JSON object"))?;

        if !object.get("messageType").is_some_and(Value::is_string) {
            return Err(NetworkError::protocol("Raw envelope has no messageType"));
        }

        let mut line = serde_json::to_string(&value)?;
        line.push(DELIMITER as char);
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn test_build_stamps_metadata() {
        let codec = EnvelopeCodec::new("1.0", "KIOSK-07");
        let envelope = codec.build("heartbeat", json!({"status": "online"}));

        assert_eq!(envelope.version(), "1.0");
        assert_eq!(envelope.device_name(), "KIOSK-07");
        assert_eq!(envelope.message_type(), "heartbeat");
        assert_eq!(envelope.data()["status"], "online");
    }

    #[test]
    fn test_encode_is_single_delimited_line() {
        let codec = EnvelopeCodec::new("1.0", "KIOSK-07");
        let line = codec
            .frame("upload_access_logs", json!({"logs": ["a\nb", "c"]}))
            .unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["deviceName"], "KIOSK-07");
        assert_eq!(value["messageType"], "upload_access_logs");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_parse_minimal_inbound() {
        let envelope =
            Envelope::parse(r#"{"messageType":"heartbeat_response","data":{"status":"ok"}}"#)
                .unwrap();

        assert_eq!(envelope.message_type(), "heartbeat_response");
        assert_eq!(envelope.version(), "");
        assert_eq!(envelope.data()["status"], "ok");
    }

    #[test]
    fn test_parse_requires_message_type() {
        let err = Envelope::parse(r#"{"version":"1.0","data":{}}"#).unwrap_err();
        assert!(matches!(err, NetworkError::Protocol { .. }));

        let err = Envelope::parse(r#"{"messageType":"  "}"#).unwrap_err();
        assert!(matches!(err, NetworkError::Protocol { .. }));
    }

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let envelope = Envelope::parse(
            r#"{"timestamp":"2024-03-05T08:09:10.250","messageType":"sync_users","data":[]}"#,
        )
        .unwrap();

        let ts = envelope.timestamp();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 3, 5));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (8, 9, 10));
    }

    #[test]
    fn test_unreadable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let envelope =
            Envelope::parse(r#"{"timestamp":"yesterday","messageType":"error"}"#).unwrap();
        assert!(envelope.timestamp() >= before);
    }

    #[test]
    fn test_frame_raw_compacts_and_validates() {
        let codec = EnvelopeCodec::new("1.0", "KIOSK-07");
        let raw = "{\n  \"messageType\": \"open_locker_response\",\n  \"data\": {\"ok\": true}\n}";

        let line = codec.frame_raw(raw).unwrap();
        assert_eq!(line.matches('\n').count(), 1);

        assert!(codec.frame_raw("[1,2]").is_err());
        assert!(codec.frame_raw(r#"{"data":{}}"#).is_err());
        assert!(codec.frame_raw("not-json").is_err());
    }
}
