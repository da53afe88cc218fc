// Core identifiers shared across all intelhub crates.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// Opaque, server-generated identifier for one live connection.
///
/// Doubles as the `senderId` stamped on every outbound envelope, so a
/// recipient can recognise events that originated from itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh identifier (122 random bits from a v4 UUID).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of resource a user is composing against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// An intelligence report. Older clients call this `intelligence`.
    #[serde(alias = "intelligence")]
    Report,
    Alert,
    Annotation,
}

impl ContextKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "report" | "intelligence" => Some(Self::Report),
            "alert" => Some(Self::Alert),
            "annotation" => Some(Self::Annotation),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Alert => "alert",
            Self::Annotation => "annotation",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of the resource a user is viewing or editing.
///
/// Clients send these as JSON numbers or strings; both forms are reduced to
/// one canonical string so `42` and `"42"` name the same context. Integral
/// ids serialize back out as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parse from an arbitrary JSON value. Returns `None` for null, empty
    /// strings and non-scalar values.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Some(Self(canonical_number(number))),
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Self(trimmed.to_owned()))
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `42.0` and `42` render the same; other floats keep serde_json's form.
fn canonical_number(number: &serde_json::Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(float)
            if float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 =>
        {
            (float as i64).to_string()
        }
        _ => number.to_string(),
    }
}

impl From<i64> for ContextId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ContextId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<i64>() {
            Ok(number) if number.to_string() == self.0 => serializer.serialize_i64(number),
            _ => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for ContextId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value)
            .ok_or_else(|| de::Error::custom("context id must be a number or non-empty string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connection_ids_are_unique_and_long_enough() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        // 32 hex chars = 128 bits, of which 122 are random.
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn context_kind_accepts_legacy_intelligence_name() {
        assert_eq!(ContextKind::parse("intelligence"), Some(ContextKind::Report));
        let kind: ContextKind = serde_json::from_value(json!("intelligence")).unwrap();
        assert_eq!(kind, ContextKind::Report);
        assert_eq!(serde_json::to_value(kind).unwrap(), json!("report"));
        assert_eq!(ContextKind::parse("memo"), None);
    }

    #[test]
    fn numeric_and_string_context_ids_are_equal() {
        let from_number = ContextId::from_json(&json!(42)).unwrap();
        let from_string = ContextId::from_json(&json!("42")).unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number, ContextId::from(42));
    }

    #[test]
    fn integral_floats_name_the_same_context() {
        assert_eq!(ContextId::from_json(&json!(42.0)), Some(ContextId::from(42)));
        assert_eq!(ContextId::from_json(&json!(-3.0)), Some(ContextId::from(-3)));
        assert_eq!(ContextId::from_json(&json!(42.5)).map(|id| id.to_string()).as_deref(), Some("42.5"));
    }

    #[test]
    fn context_id_rejects_null_and_blank() {
        assert!(ContextId::from_json(&Value::Null).is_none());
        assert!(ContextId::from_json(&json!("  ")).is_none());
        assert!(ContextId::from_json(&json!({"id": 1})).is_none());
    }

    #[test]
    fn integral_context_ids_serialize_as_numbers() {
        assert_eq!(serde_json::to_value(ContextId::from(7)).unwrap(), json!(7));
        assert_eq!(serde_json::to_value(ContextId::from("doc-7")).unwrap(), json!("doc-7"));
        assert_eq!(serde_json::to_value(ContextId::from("007")).unwrap(), json!("007"));
    }
}
