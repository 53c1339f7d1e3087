use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier carried by a request and echoed by its reply.
///
/// Ids this engine issues are always positive numbers; ids received from a
/// peer are echoed back in whatever form the peer chose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// The correlation id this value maps to, if it could have been issued
    /// by an engine (a positive integer).
    pub fn call_id(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) if *n > 0 => Some(*n as u64),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Ids beyond `i64::MAX` cannot be JSON-RPC numbers here and fall back to
/// their decimal string
impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        match i64::try_from(id) {
            Ok(n) => RequestId::Number(n),
            Err(_) => RequestId::String(id.to_string()),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// The `jsonrpc` member; only "2.0" is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JsonRpcVersion {
    #[default]
    V2_0,
}

impl JsonRpcVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonRpcVersion::V2_0 => crate::JSONRPC_VERSION,
        }
    }
}

impl fmt::Display for JsonRpcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            crate::JSONRPC_VERSION => Ok(JsonRpcVersion::V2_0),
            other => Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_only_for_positive_numbers() {
        assert_eq!(RequestId::Number(7).call_id(), Some(7));
        assert_eq!(RequestId::Number(0).call_id(), None);
        assert_eq!(RequestId::Number(-3).call_id(), None);
        assert_eq!(RequestId::from("7").call_id(), None);
    }

    #[test]
    fn test_request_id_wire_form() {
        assert_eq!(serde_json::to_string(&RequestId::from(42u64)).unwrap(), "42");
        assert_eq!(
            RequestId::from(i64::MAX as u64),
            RequestId::Number(i64::MAX)
        );
        assert_eq!(
            RequestId::from(u64::MAX),
            RequestId::String(u64::MAX.to_string())
        );
        assert_eq!(
            serde_json::to_string(&RequestId::from("abc")).unwrap(),
            r#""abc""#
        );
    }

    #[test]
    fn test_version_rejects_other_values() {
        assert!(serde_json::from_str::<JsonRpcVersion>(r#""2.0""#).is_ok());
        assert!(serde_json::from_str::<JsonRpcVersion>(r#""1.0""#).is_err());
    }
}
