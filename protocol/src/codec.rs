//! Record framing for the event channel.
//!
//! Each record is a single line: the event key, one space, then a single-line JSON
//! payload. Log data is carried inline as base64.

use std::fmt;
use std::str::FromStr;

use harness_core::ContextError;
use harness_types::{LogDataType, Metrics, MultiMap, TestDescription};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KEY_SEPARATOR: char = ' ';

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("record is not valid UTF-8")]
    InvalidUtf8,
    #[error("unknown event key '{0}'")]
    UnknownKey(String),
    #[error("record for {key} has no payload")]
    MissingPayload { key: EventKey },
    #[error("malformed {key} payload: {source}")]
    Payload {
        key: EventKey,
        source: serde_json::Error,
    },
    #[error("failed to encode {key} record: {source}")]
    Encode {
        key: EventKey,
        source: serde_json::Error,
    },
    #[error("event channel IO failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    InvocationFailed,
    InvocationAttributes,
    TestRunStarted,
    TestRunFailed,
    TestRunEnded,
    TestStarted,
    TestFailed,
    TestAssumptionFailure,
    TestIgnored,
    TestEnded,
    TestLog,
}

impl EventKey {
    pub const ALL: [EventKey; 11] = [
        Self::InvocationFailed,
        Self::InvocationAttributes,
        Self::TestRunStarted,
        Self::TestRunFailed,
        Self::TestRunEnded,
        Self::TestStarted,
        Self::TestFailed,
        Self::TestAssumptionFailure,
        Self::TestIgnored,
        Self::TestEnded,
        Self::TestLog,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvocationFailed => "INVOCATION_FAILED",
            Self::InvocationAttributes => "INVOCATION_ATTRIBUTES",
            Self::TestRunStarted => "TEST_RUN_STARTED",
            Self::TestRunFailed => "TEST_RUN_FAILED",
            Self::TestRunEnded => "TEST_RUN_ENDED",
            Self::TestStarted => "TEST_STARTED",
            Self::TestFailed => "TEST_FAILED",
            Self::TestAssumptionFailure => "TEST_ASSUMPTION_FAILURE",
            Self::TestIgnored => "TEST_IGNORED",
            Self::TestEnded => "TEST_ENDED",
            Self::TestLog => "TEST_LOG",
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKey(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub attributes: MultiMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStarted {
    pub run_name: String,
    pub test_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnded {
    pub elapsed_ms: u64,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTrace {
    #[serde(flatten)]
    pub test: TestDescription,
    pub trace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEnded {
    #[serde(flatten)]
    pub test: TestDescription,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLog {
    pub data_name: String,
    pub data_type: LogDataType,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// One lifecycle event as carried over the side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    InvocationFailed(Message),
    InvocationAttributes(Attributes),
    TestRunStarted(RunStarted),
    TestRunFailed(Message),
    TestRunEnded(RunEnded),
    TestStarted(TestDescription),
    TestFailed(TestTrace),
    TestAssumptionFailure(TestTrace),
    TestIgnored(TestDescription),
    TestEnded(TestEnded),
    TestLog(TestLog),
}

impl EventRecord {
    #[must_use]
    pub fn key(&self) -> EventKey {
        match self {
            Self::InvocationFailed(_) => EventKey::InvocationFailed,
            Self::InvocationAttributes(_) => EventKey::InvocationAttributes,
            Self::TestRunStarted(_) => EventKey::TestRunStarted,
            Self::TestRunFailed(_) => EventKey::TestRunFailed,
            Self::TestRunEnded(_) => EventKey::TestRunEnded,
            Self::TestStarted(_) => EventKey::TestStarted,
            Self::TestFailed(_) => EventKey::TestFailed,
            Self::TestAssumptionFailure(_) => EventKey::TestAssumptionFailure,
            Self::TestIgnored(_) => EventKey::TestIgnored,
            Self::TestEnded(_) => EventKey::TestEnded,
            Self::TestLog(_) => EventKey::TestLog,
        }
    }

    /// Encode as a single line, without the trailing newline.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let key = self.key();
        let payload = match self {
            Self::InvocationFailed(p) | Self::TestRunFailed(p) => serde_json::to_string(p),
            Self::InvocationAttributes(p) => serde_json::to_string(p),
            Self::TestRunStarted(p) => serde_json::to_string(p),
            Self::TestRunEnded(p) => serde_json::to_string(p),
            Self::TestStarted(p) | Self::TestIgnored(p) => serde_json::to_string(p),
            Self::TestFailed(p) | Self::TestAssumptionFailure(p) => serde_json::to_string(p),
            Self::TestEnded(p) => serde_json::to_string(p),
            Self::TestLog(p) => serde_json::to_string(p),
        }
        .map_err(|source| ProtocolError::Encode { key, source })?;
        Ok(format!("{key}{KEY_SEPARATOR}{payload}"))
    }

    /// Decode one line (trailing `\r`/`\n` tolerated).
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (raw_key, payload) = match line.split_once(KEY_SEPARATOR) {
            Some((raw_key, payload)) => (raw_key, payload.trim()),
            None => (line, ""),
        };
        let key: EventKey = raw_key.parse()?;
        if payload.is_empty() {
            return Err(ProtocolError::MissingPayload { key });
        }

        let record = match key {
            EventKey::InvocationFailed => Self::InvocationFailed(parse(key, payload)?),
            EventKey::InvocationAttributes => Self::InvocationAttributes(parse(key, payload)?),
            EventKey::TestRunStarted => Self::TestRunStarted(parse(key, payload)?),
            EventKey::TestRunFailed => Self::TestRunFailed(parse(key, payload)?),
            EventKey::TestRunEnded => Self::TestRunEnded(parse(key, payload)?),
            EventKey::TestStarted => Self::TestStarted(parse(key, payload)?),
            EventKey::TestFailed => Self::TestFailed(parse(key, payload)?),
            EventKey::TestAssumptionFailure => Self::TestAssumptionFailure(parse(key, payload)?),
            EventKey::TestIgnored => Self::TestIgnored(parse(key, payload)?),
            EventKey::TestEnded => Self::TestEnded(parse(key, payload)?),
            EventKey::TestLog => Self::TestLog(parse(key, payload)?),
        };
        Ok(record)
    }
}

fn parse<T: serde::de::DeserializeOwned>(key: EventKey, payload: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(payload).map_err(|source| ProtocolError::Payload { key, source })
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test() -> TestDescription {
        TestDescription::new("com.example.FooTest", "testBar")
    }

    #[test]
    fn encoded_record_is_one_line_with_key_prefix() {
        let record = EventRecord::TestFailed(TestTrace {
            test: test(),
            trace: "line one\nline two".to_string(),
        });
        let line = record.encode().unwrap();
        assert!(line.starts_with("TEST_FAILED {"));
        assert!(!line.contains('\n'));
        assert_eq!(EventRecord::decode(&line).unwrap(), record);
    }

    #[test]
    fn test_payload_is_flat() {
        let line = EventRecord::TestStarted(test()).encode().unwrap();
        assert_eq!(
            line,
            r#"TEST_STARTED {"class_name":"com.example.FooTest","test_name":"testBar"}"#
        );
    }

    #[test]
    fn log_data_travels_as_base64() {
        let record = EventRecord::TestLog(TestLog {
            data_name: "host_log".to_string(),
            data_type: LogDataType::Text,
            data: vec![0, 159, 146, 150],
        });
        let line = record.encode().unwrap();
        assert!(line.contains(r#""data":"AJ+Slg==""#));
        assert_eq!(EventRecord::decode(&line).unwrap(), record);
    }

    #[test]
    fn metrics_default_when_absent() {
        let record =
            EventRecord::decode(r#"TEST_ENDED {"class_name":"C","test_name":"m"}"#).unwrap();
        match record {
            EventRecord::TestEnded(ended) => assert!(ended.metrics.is_empty()),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn decode_tolerates_line_endings() {
        let record = EventRecord::decode("TEST_RUN_FAILED {\"message\":\"x\"}\r\n").unwrap();
        assert_eq!(
            record,
            EventRecord::TestRunFailed(Message {
                message: "x".to_string()
            })
        );
    }

    #[test]
    fn decode_rejects_unknown_key() {
        assert!(matches!(
            EventRecord::decode("TEST_EXPLODED {}"),
            Err(ProtocolError::UnknownKey(key)) if key == "TEST_EXPLODED"
        ));
    }

    #[test]
    fn decode_rejects_missing_payload() {
        assert!(matches!(
            EventRecord::decode("TEST_STARTED"),
            Err(ProtocolError::MissingPayload {
                key: EventKey::TestStarted
            })
        ));
    }

    #[test]
    fn decode_rejects_truncated_json() {
        assert!(matches!(
            EventRecord::decode(r#"TEST_ENDED {"class_name":"C","test_na"#),
            Err(ProtocolError::Payload {
                key: EventKey::TestEnded,
                ..
            })
        ));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let line = r#"TEST_LOG {"data_name":"x","data_type":"TEXT","data":"@@@"}"#;
        assert!(matches!(
            EventRecord::decode(line),
            Err(ProtocolError::Payload {
                key: EventKey::TestLog,
                ..
            })
        ));
    }

    #[test]
    fn every_key_parses_back() {
        for key in EventKey::ALL {
            assert_eq!(key.as_str().parse::<EventKey>().unwrap(), key);
        }
    }
}
