//! Collections manifest
//!
//! The manifest declares every collection the CLI manages: its schema,
//! partitions, staleness rules and joins. Documents are read from JSONL files
//! under `documents_dir`, resolved relative to the manifest.
//!
//! ```toml
//! documents_dir = "data"
//!
//! [[collections]]
//! name = "products"
//! fields = [
//!     { name = "id", type = "string" },
//!     { name = "region", type = "string", facet = true },
//! ]
//! partitions = { values = ["eu", "us"], field = "region", max_parallel = 2 }
//! stale = [{ kind = "not_refreshed" }]
//! ```

use anyhow::{anyhow, bail, Context, Result};
use searchkeeper_core::{CollectionSchema, FieldSpec, TokenValue};
use searchkeeper_indexer::{JsonlSource, PartitionSpec, StaleRule};
use searchkeeper_lifecycle::{CollectionDefinition, CollectionRegistry, JoinDeclaration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default manifest file name, looked up in the working directory
pub const DEFAULT_MANIFEST: &str = "searchkeeper.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Root of the JSONL document files
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    /// Documents read per batch; falls back to `indexer.documents_per_batch`
    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub collections: Vec<CollectionManifest>,

    /// Cascade edges not implied by any join
    #[serde(default)]
    pub cascade_edges: Vec<CascadeEdge>,

    /// Directory the manifest was read from
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub default_sorting_field: Option<String>,
    #[serde(default)]
    pub token_separators: Vec<String>,
    #[serde(default)]
    pub symbols_to_index: Vec<String>,
    #[serde(default)]
    pub enable_nested_fields: bool,
    #[serde(default)]
    pub partitions: Option<PartitionManifest>,
    #[serde(default)]
    pub stale: Vec<StaleRuleManifest>,
    #[serde(default)]
    pub scopes: BTreeMap<String, String>,
    #[serde(default)]
    pub joins: Vec<JoinManifest>,
}

/// Either `values` or `range`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionManifest {
    #[serde(default)]
    pub values: Option<Vec<TokenValue>>,
    #[serde(default)]
    pub range: Option<RangeManifest>,
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Document field holding the partition value
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeManifest {
    pub start: i64,
    pub end: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StaleRuleManifest {
    Scope {
        name: String,
    },
    Attribute {
        field: String,
        value: serde_json::Value,
    },
    Hash {
        matches: BTreeMap<String, serde_json::Value>,
    },
    RawFilter {
        expr: String,
    },
    NotRefreshed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinManifest {
    pub source: String,
    #[serde(default)]
    pub local_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeEdge {
    pub source: String,
    pub dependent: String,
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let manifest: Self =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse manifest: {e}"))?;
        if manifest.collections.is_empty() {
            bail!("Manifest declares no collections");
        }
        Ok(manifest)
    }

    /// Absolute-or-relative directory holding the JSONL documents
    pub fn documents_root(&self) -> PathBuf {
        if self.documents_dir.is_absolute() {
            self.documents_dir.clone()
        } else {
            self.base_dir.join(&self.documents_dir)
        }
    }

    pub fn extra_edges(&self) -> Vec<(String, String)> {
        self.cascade_edges
            .iter()
            .map(|e| (e.source.clone(), e.dependent.clone()))
            .collect()
    }

    /// Registry of every declared collection, each reading from its JSONL files
    pub fn registry(&self, default_batch_size: usize) -> Result<CollectionRegistry> {
        let root = self.documents_root();
        let batch_size = self.batch_size.unwrap_or(default_batch_size).max(1);

        let mut registry = CollectionRegistry::new();
        for collection in &self.collections {
            let source = Arc::new(JsonlSource::new(&root, &collection.name, batch_size));
            let definition = collection.definition(source)?;
            registry
                .register(definition)
                .with_context(|| format!("Invalid collection '{}'", collection.name))?;
        }
        Ok(registry)
    }
}

impl CollectionManifest {
    pub fn schema(&self) -> CollectionSchema {
        CollectionSchema {
            name: self.name.clone(),
            fields: self.fields.clone(),
            default_sorting_field: self.default_sorting_field.clone(),
            token_separators: self.token_separators.clone(),
            symbols_to_index: self.symbols_to_index.clone(),
            enable_nested_fields: self.enable_nested_fields,
        }
    }

    fn definition(&self, source: Arc<JsonlSource>) -> Result<CollectionDefinition> {
        let mut definition = CollectionDefinition::new(self.schema(), source);
        if let Some(partitions) = &self.partitions {
            definition = definition.with_partitions(partitions.spec(&self.name)?);
        }
        for rule in &self.stale {
            definition = definition.with_stale_rule(rule.to_rule());
        }
        for (name, expr) in &self.scopes {
            definition = definition.with_scope(name, expr);
        }
        for join in &self.joins {
            let mut declaration = JoinDeclaration::new(&join.source);
            if let Some(local_key) = &join.local_key {
                declaration = declaration.with_local_key(local_key);
            }
            definition = definition.with_join(declaration);
        }
        Ok(definition)
    }
}

impl PartitionManifest {
    fn spec(&self, collection: &str) -> Result<PartitionSpec> {
        let spec = match (&self.values, &self.range) {
            (Some(values), None) => PartitionSpec::enumerated(values.iter().cloned()),
            (None, Some(range)) => PartitionSpec::range(range.start, range.end, range.step),
            _ => bail!("Partitions of '{collection}' need exactly one of `values` or `range`"),
        };
        let spec = match self.max_parallel {
            Some(max_parallel) => spec.with_max_parallel(max_parallel),
            None => spec,
        };
        Ok(match &self.field {
            Some(field) => spec.with_field(field),
            None => spec,
        })
    }
}

impl StaleRuleManifest {
    fn to_rule(&self) -> StaleRule {
        match self {
            Self::Scope { name } => StaleRule::Scope { name: name.clone() },
            Self::Attribute { field, value } => StaleRule::Attribute {
                field: field.clone(),
                value: value.clone(),
            },
            Self::Hash { matches } => StaleRule::Hash(matches.clone()),
            Self::RawFilter { expr } => StaleRule::RawFilter { expr: expr.clone() },
            Self::NotRefreshed => StaleRule::NotRefreshed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        documents_dir = "docs"
        batch_size = 50

        [[collections]]
        name = "products"
        fields = [
            { name = "id", type = "string" },
            { name = "region", type = "string", facet = true },
        ]
        partitions = { values = ["eu", "us"], field = "region", max_parallel = 2 }
        stale = [
            { kind = "not_refreshed" },
            { kind = "attribute", field = "archived", value = true },
        ]

        [[collections]]
        name = "orders"
        fields = [
            { name = "id", type = "string" },
            { name = "product_id", type = "string", reference = "products.id" },
        ]

        [[cascade_edges]]
        source = "orders"
        dependent = "invoices"
    "#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_toml_str(MANIFEST).unwrap();
        assert_eq!(manifest.collections.len(), 2);
        assert_eq!(manifest.batch_size, Some(50));
        assert_eq!(
            manifest.extra_edges(),
            vec![("orders".to_string(), "invoices".to_string())]
        );

        let products = &manifest.collections[0];
        assert_eq!(products.stale.len(), 2);
        assert!(products.schema().field("region").unwrap().facet);
    }

    #[test]
    fn test_registry_from_manifest() {
        let manifest = Manifest::from_toml_str(MANIFEST).unwrap();
        let registry = manifest.registry(100).unwrap();

        assert_eq!(registry.names(), vec!["orders", "products"]);
        let orders = registry.get("orders").unwrap();
        assert_eq!(
            orders.all_joins(),
            vec![JoinDeclaration::new("products").with_local_key("product_id")]
        );
        let products = registry.get("products").unwrap();
        assert_eq!(products.partition_field(), Some("region"));
        assert!(products
            .compiled_schema("doc_updated_at")
            .field("doc_updated_at")
            .is_some());
    }

    #[test]
    fn test_partitions_need_values_or_range() {
        let manifest = Manifest::from_toml_str(
            r#"
            [[collections]]
            name = "events"
            fields = [{ name = "id", type = "string" }]
            partitions = { max_parallel = 2 }
            "#,
        )
        .unwrap();

        let err = manifest.registry(100).unwrap_err();
        assert!(err.to_string().contains("exactly one of"));
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        assert!(Manifest::from_toml_str("documents_dir = \"x\"").is_err());
    }
}
