//! Compiled collection schema description
//!
//! The schema is the already-compiled form handed to the lifecycle engine:
//! a field list plus collection-level options, serialized in the shape the
//! search service accepts on `POST /collections` and returns on retrieval.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Field types the service sorts by default
const NUMERIC_TYPES: &[&str] = &["int32", "int64", "float", "bool"];

/// A single field declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub optional: bool,

    #[serde(default)]
    pub facet: bool,

    #[serde(default = "default_true")]
    pub index: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<bool>,

    #[serde(default)]
    pub infix: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Join target in `collection.field` form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

fn default_true() -> bool {
    true
}

impl FieldSpec {
    /// Creates a plain indexed field
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            optional: false,
            facet: false,
            index: true,
            sort: None,
            infix: false,
            locale: None,
            reference: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn facet(mut self) -> Self {
        self.facet = true;
        self
    }

    pub fn reference(mut self, target: impl Into<String>) -> Self {
        self.reference = Some(target.into());
        self
    }

    /// Effective sort flag: the service enables sorting on numeric fields
    /// unless told otherwise
    pub fn effective_sort(&self) -> bool {
        self.sort
            .unwrap_or_else(|| NUMERIC_TYPES.contains(&self.field_type.as_str()))
    }

    /// Copy with service-side defaults filled in, so a compiled field and the
    /// same field read back from the service compare equal
    pub fn normalized(&self) -> Self {
        Self {
            sort: Some(self.effective_sort()),
            locale: self.locale.clone().filter(|l| !l.is_empty()),
            ..self.clone()
        }
    }

    /// Splits `reference` into `(collection, field)`
    pub fn reference_target(&self) -> Option<(&str, &str)> {
        self.reference.as_deref().and_then(|r| r.split_once('.'))
    }
}

/// Compiled schema for one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Logical name when compiled, physical name once sent to the service
    pub name: String,

    pub fields: Vec<FieldSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sorting_field: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_separators: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols_to_index: Vec<String>,

    #[serde(default)]
    pub enable_nested_fields: bool,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            fields,
            default_sorting_field: None,
            token_separators: Vec::new(),
            symbols_to_index: Vec::new(),
            enable_nested_fields: false,
        }
    }

    /// Same schema addressed at another (physical) name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Collection-level options as comparable JSON values, keyed by option name
    pub fn options(&self) -> Vec<(&'static str, serde_json::Value)> {
        vec![
            (
                "default_sorting_field",
                serde_json::json!(self.default_sorting_field.clone().unwrap_or_default()),
            ),
            ("token_separators", serde_json::json!(self.token_separators)),
            ("symbols_to_index", serde_json::json!(self.symbols_to_index)),
            (
                "enable_nested_fields",
                serde_json::json!(self.enable_nested_fields),
            ),
        ]
    }

    /// Rejects schemas the service would refuse
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("Schema name cannot be empty"));
        }
        if self.fields.is_empty() {
            return Err(Error::validation(format!(
                "Schema '{}' declares no fields",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || field.field_type.is_empty() {
                return Err(Error::validation(format!(
                    "Schema '{}' has a field without name or type",
                    self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::validation(format!(
                    "Schema '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
            if field.reference.is_some() && field.reference_target().is_none() {
                return Err(Error::validation(format!(
                    "Field '{}' reference must be in 'collection.field' form",
                    field.name
                )));
            }
        }

        if let Some(sorting) = &self.default_sorting_field {
            if self.field(sorting).is_none() {
                return Err(Error::validation(format!(
                    "Unknown field '{sorting}' in default_sorting_field of '{}'",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_schema_deserializes_with_service_defaults() {
        let live = r#"{
            "name": "products_v1",
            "num_documents": 12,
            "created_at": 1700000000,
            "fields": [
                {"name": "id", "type": "int64", "facet": false, "index": true,
                 "optional": false, "sort": true, "infix": false, "locale": ""},
                {"name": "name", "type": "string"}
            ],
            "default_sorting_field": "",
            "enable_nested_fields": false,
            "symbols_to_index": [],
            "token_separators": []
        }"#;

        let schema: CollectionSchema = serde_json::from_str(live).unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields[1].index);
        assert_eq!(
            schema.fields[0].normalized(),
            FieldSpec::new("id", "int64").normalized()
        );
    }

    #[test]
    fn test_validate_rejects_unknown_sorting_field() {
        let mut schema = CollectionSchema::new("products", vec![FieldSpec::new("id", "string")]);
        schema.default_sorting_field = Some("rank".to_string());

        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown field 'rank'"));
    }

    #[test]
    fn test_validate_rejects_duplicate_fields() {
        let schema = CollectionSchema::new(
            "products",
            vec![FieldSpec::new("id", "string"), FieldSpec::new("id", "int64")],
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_reference_target_split() {
        let field = FieldSpec::new("author_id", "string").reference("authors.id");
        assert_eq!(field.reference_target(), Some(("authors", "id")));
    }
}
