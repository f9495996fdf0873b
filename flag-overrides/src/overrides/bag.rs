use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An evaluated flag: enabled/disabled, a multivariate variant key, or
/// `Null` when the flag was off or unknown at capture time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
    #[default]
    Null,
}

impl FlagValue {
    /// Only active flags carry payloads, so callers use this to skip lookups.
    pub fn is_enabled(&self) -> bool {
        match self {
            FlagValue::Boolean(enabled) => *enabled,
            FlagValue::String(_) => true,
            FlagValue::Null => false,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Boolean(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<Option<FlagValue>> for FlagValue {
    fn from(value: Option<FlagValue>) -> Self {
        value.unwrap_or_default()
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Boolean(value) => write!(f, "{value}"),
            FlagValue::String(value) => write!(f, "{value}"),
            FlagValue::Null => write!(f, "null"),
        }
    }
}

/// The persisted set of overrides. Flags and payloads are always written
/// together, and each write replaces the previous bag entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverridesBag {
    pub flags: HashMap<String, FlagValue>,
    pub payloads: HashMap<String, Value>,
}

// Lenient shape for reading back what we stored: either map may be missing or null.
#[derive(Deserialize)]
struct StoredOverrides {
    #[serde(default)]
    flags: Option<HashMap<String, FlagValue>>,
    #[serde(default)]
    payloads: Option<HashMap<String, Value>>,
}

impl OverridesBag {
    pub fn new(flags: HashMap<String, FlagValue>, payloads: HashMap<String, Value>) -> Self {
        OverridesBag { flags, payloads }
    }

    pub fn from_json(raw: &str) -> Result<OverridesBag, serde_json::Error> {
        let stored: StoredOverrides = serde_json::from_str(raw)?;
        Ok(OverridesBag {
            flags: stored.flags.unwrap_or_default(),
            payloads: stored.payloads.unwrap_or_default(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Presence, not truthiness: a stored `Null` still overrides.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    pub fn flag(&self, key: &str) -> Option<&FlagValue> {
        self.flags.get(key)
    }

    pub fn payload(&self, key: &str) -> Option<&Value> {
        self.payloads.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
