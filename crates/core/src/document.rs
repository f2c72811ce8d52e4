//! Document records and import actions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A single source record: field name to JSON value
pub type Document = serde_json::Map<String, Value>;

/// Write semantics requested from the service for an import call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Create,
    #[default]
    Upsert,
    Update,
    Emplace,
}

impl ImportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Upsert => "upsert",
            Self::Update => "update",
            Self::Emplace => "emplace",
        }
    }
}

impl fmt::Display for ImportAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "upsert" => Ok(Self::Upsert),
            "update" => Ok(Self::Update),
            "emplace" => Ok(Self::Emplace),
            other => Err(Error::config(format!(
                "Invalid import action '{other}'. Must be one of: create, upsert, update, emplace"
            ))),
        }
    }
}

/// String form of a document's identity value.
///
/// Only non-empty strings and numbers qualify as identities.
pub fn identity_of(document: &Document, field: &str) -> Option<String> {
    match document.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_identity_of_accepts_strings_and_numbers() {
        assert_eq!(identity_of(&doc(json!({"id": "a1"})), "id"), Some("a1".into()));
        assert_eq!(identity_of(&doc(json!({"id": 42})), "id"), Some("42".into()));
    }

    #[test]
    fn test_identity_of_rejects_missing_and_blank() {
        assert_eq!(identity_of(&doc(json!({"name": "x"})), "id"), None);
        assert_eq!(identity_of(&doc(json!({"id": ""})), "id"), None);
        assert_eq!(identity_of(&doc(json!({"id": null})), "id"), None);
        assert_eq!(identity_of(&doc(json!({"id": [1]})), "id"), None);
    }

    #[test]
    fn test_import_action_parse() {
        assert_eq!("emplace".parse::<ImportAction>().unwrap(), ImportAction::Emplace);
        assert!("replace".parse::<ImportAction>().is_err());
        assert_eq!(ImportAction::default().to_string(), "upsert");
    }
}
