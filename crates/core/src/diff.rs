//! Structural schema comparison
//!
//! A diff describes what applying the compiled schema would change relative to
//! the live collection. Field order never matters. An absent live collection is
//! reported through the `live` collection option rather than as a list of
//! added fields.

use crate::schema::{CollectionSchema, FieldSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Collection option key that marks a missing live collection
pub const LIVE_OPTION: &str = "live";

/// One attribute of a field that differs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: String,
    /// Live value
    pub from: Value,
    /// Compiled value
    pub to: Value,
}

/// Change of a collection-level option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptionChange {
    Missing,
    Changed { from: Value, to: Value },
}

/// Derived collection state; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    Absent,
    PresentInSync,
    PresentDrift,
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Absent => "absent",
            Self::PresentInSync => "present_in_sync",
            Self::PresentDrift => "present_drift",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub added_fields: Vec<String>,
    pub removed_fields: Vec<String>,
    pub changed_fields: BTreeMap<String, Vec<AttributeChange>>,
    pub collection_options: BTreeMap<String, OptionChange>,
}

impl SchemaDiff {
    /// Diff against a collection that does not exist
    pub fn missing() -> Self {
        let mut collection_options = BTreeMap::new();
        collection_options.insert(LIVE_OPTION.to_string(), OptionChange::Missing);
        Self {
            collection_options,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_fields.is_empty()
            && self.removed_fields.is_empty()
            && self.changed_fields.is_empty()
            && self.collection_options.is_empty()
    }

    pub fn is_missing(&self) -> bool {
        matches!(
            self.collection_options.get(LIVE_OPTION),
            Some(OptionChange::Missing)
        )
    }

    pub fn status(&self) -> SchemaStatus {
        if self.is_missing() {
            SchemaStatus::Absent
        } else if self.is_empty() {
            SchemaStatus::PresentInSync
        } else {
            SchemaStatus::PresentDrift
        }
    }
}

/// Comparable attributes of a field, excluding its name
fn attributes(field: &FieldSpec) -> BTreeMap<String, Value> {
    match serde_json::to_value(field.normalized()) {
        Ok(Value::Object(map)) => map.into_iter().filter(|(k, _)| k != "name").collect(),
        _ => BTreeMap::new(),
    }
}

/// Compare a compiled schema with the live one.
///
/// Pure; `live = None` yields [`SchemaDiff::missing`].
pub fn diff(compiled: &CollectionSchema, live: Option<&CollectionSchema>) -> SchemaDiff {
    let Some(live) = live else {
        return SchemaDiff::missing();
    };

    let compiled_fields: BTreeMap<&str, &FieldSpec> =
        compiled.fields.iter().map(|f| (f.name.as_str(), f)).collect();
    let live_fields: BTreeMap<&str, &FieldSpec> =
        live.fields.iter().map(|f| (f.name.as_str(), f)).collect();

    let mut result = SchemaDiff::default();

    for (name, field) in &compiled_fields {
        let Some(live_field) = live_fields.get(name) else {
            result.added_fields.push(name.to_string());
            continue;
        };

        let wanted = attributes(field);
        let actual = attributes(live_field);
        let keys: BTreeSet<&String> = wanted.keys().chain(actual.keys()).collect();
        let changes: Vec<AttributeChange> = keys
            .into_iter()
            .filter_map(|key| {
                let to = wanted.get(key).cloned().unwrap_or(Value::Null);
                let from = actual.get(key).cloned().unwrap_or(Value::Null);
                (from != to).then(|| AttributeChange {
                    attribute: key.clone(),
                    from,
                    to,
                })
            })
            .collect();
        if !changes.is_empty() {
            result.changed_fields.insert(name.to_string(), changes);
        }
    }

    result.removed_fields = live_fields
        .keys()
        .filter(|name| !compiled_fields.contains_key(*name))
        .map(|name| name.to_string())
        .collect();

    let live_options: BTreeMap<&str, Value> = live.options().into_iter().collect();
    for (key, to) in compiled.options() {
        let from = live_options.get(key).cloned().unwrap_or(Value::Null);
        if from != to {
            result
                .collection_options
                .insert(key.to_string(), OptionChange::Changed { from, to });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn products() -> CollectionSchema {
        CollectionSchema::new(
            "products",
            vec![FieldSpec::new("id", "int32"), FieldSpec::new("name", "string")],
        )
    }

    #[test]
    fn test_identical_schemas_are_in_sync() {
        let schema = products();
        let result = diff(&schema, Some(&schema));
        assert!(result.is_empty());
        assert_eq!(result.status(), SchemaStatus::PresentInSync);
    }

    #[test]
    fn test_field_order_is_ignored() {
        let compiled = products();
        let mut live = products().renamed("products_v1");
        live.fields.reverse();
        assert!(diff(&compiled, Some(&live)).is_empty());
    }

    #[test]
    fn test_service_defaults_do_not_count_as_drift() {
        let compiled = products();
        let mut live = products().renamed("products_v1");
        live.fields = live.fields.iter().map(|f| f.normalized()).collect();
        live.fields[1].locale = Some(String::new());
        assert!(diff(&compiled, Some(&live)).is_empty());
    }

    #[test]
    fn test_missing_live_collection() {
        let result = diff(&products(), None);
        assert!(result.added_fields.is_empty());
        assert_eq!(
            result.collection_options.get(LIVE_OPTION),
            Some(&OptionChange::Missing)
        );
        assert_eq!(result.status(), SchemaStatus::Absent);
    }

    #[test]
    fn test_added_removed_and_changed_fields() {
        let compiled = CollectionSchema::new(
            "products",
            vec![
                FieldSpec::new("id", "int32"),
                FieldSpec::new("name", "string").facet(),
                FieldSpec::new("price", "float"),
            ],
        );
        let live = CollectionSchema::new(
            "products_v1",
            vec![
                FieldSpec::new("id", "int32"),
                FieldSpec::new("name", "string"),
                FieldSpec::new("legacy", "string"),
            ],
        );

        let result = diff(&compiled, Some(&live));
        assert_eq!(result.added_fields, vec!["price".to_string()]);
        assert_eq!(result.removed_fields, vec!["legacy".to_string()]);
        assert_eq!(
            result.changed_fields.get("name"),
            Some(&vec![AttributeChange {
                attribute: "facet".to_string(),
                from: json!(false),
                to: json!(true),
            }])
        );
        assert_eq!(result.status(), SchemaStatus::PresentDrift);
    }

    #[test]
    fn test_collection_option_change() {
        let mut compiled = products();
        compiled.enable_nested_fields = true;
        let live = products().renamed("products_v1");

        let result = diff(&compiled, Some(&live));
        assert_eq!(
            result.collection_options.get("enable_nested_fields"),
            Some(&OptionChange::Changed {
                from: json!(false),
                to: json!(true),
            })
        );
    }

    #[test]
    fn test_diff_serializes_missing_marker() {
        let rendered = serde_json::to_value(SchemaDiff::missing()).unwrap();
        assert_eq!(rendered["collection_options"]["live"]["kind"], json!("missing"));
    }
}
