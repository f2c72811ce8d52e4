//! Collection registrations
//!
//! A definition bundles everything the engine needs to run one logical
//! collection: its compiled schema, how it partitions, which documents go stale,
//! where documents come from, and which collections it joins against.

use searchkeeper_core::{CollectionSchema, Error, FieldSpec, Result};
use searchkeeper_indexer::{DocumentSource, PartitionSpec, StaleRule};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A join from a dependent onto the collection it reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDeclaration {
    /// Logical name of the collection joined against
    pub source: String,
    /// Field of the dependent holding the source identity, when known
    pub local_key: Option<String>,
}

impl JoinDeclaration {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            local_key: None,
        }
    }

    pub fn with_local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = Some(local_key.into());
        self
    }
}

pub struct CollectionDefinition {
    pub logical: String,
    pub schema: CollectionSchema,
    pub partitions: Option<PartitionSpec>,
    pub stale_rules: Vec<StaleRule>,
    /// Named filter expressions referenced by `StaleRule::Scope`
    pub scopes: BTreeMap<String, String>,
    pub joins: Vec<JoinDeclaration>,
    pub source: Arc<dyn DocumentSource>,
}

impl fmt::Debug for CollectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionDefinition")
            .field("logical", &self.logical)
            .field("schema", &self.schema)
            .field("partitions", &self.partitions)
            .field("stale_rules", &self.stale_rules)
            .field("scopes", &self.scopes)
            .field("joins", &self.joins)
            .finish_non_exhaustive()
    }
}

impl CollectionDefinition {
    /// Definition named after the compiled schema
    pub fn new(schema: CollectionSchema, source: Arc<dyn DocumentSource>) -> Self {
        Self {
            logical: schema.name.clone(),
            schema,
            partitions: None,
            stale_rules: Vec::new(),
            scopes: BTreeMap::new(),
            joins: Vec::new(),
            source,
        }
    }

    pub fn with_partitions(mut self, spec: PartitionSpec) -> Self {
        self.partitions = Some(spec);
        self
    }

    pub fn with_stale_rule(mut self, rule: StaleRule) -> Self {
        self.stale_rules.push(rule);
        self
    }

    pub fn with_scope(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.scopes.insert(name.into(), expr.into());
        self
    }

    pub fn with_join(mut self, join: JoinDeclaration) -> Self {
        self.joins.push(join);
        self
    }

    /// Declared joins plus the ones implied by `reference` fields.
    ///
    /// An explicit join on the same source wins over a derived one.
    pub fn all_joins(&self) -> Vec<JoinDeclaration> {
        let mut joins = self.joins.clone();
        for field in &self.schema.fields {
            let Some((target, _)) = field.reference_target() else {
                continue;
            };
            if joins.iter().any(|j| j.source == target) {
                continue;
            }
            joins.push(JoinDeclaration::new(target).with_local_key(field.name.clone()));
        }
        joins
    }

    /// Schema sent to the service.
    ///
    /// A `NotRefreshed` rule filters on the ingestion timestamp, so the field
    /// is declared as `int64` unless the schema already carries it.
    pub fn compiled_schema(&self, timestamp_field: &str) -> CollectionSchema {
        let mut schema = self.schema.clone();
        let filters_on_timestamp = self
            .stale_rules
            .iter()
            .any(|rule| matches!(rule, StaleRule::NotRefreshed));
        if filters_on_timestamp && schema.field(timestamp_field).is_none() {
            schema.fields.push(FieldSpec::new(timestamp_field, "int64"));
        }
        schema
    }

    /// Field holding the partition token, used to scope stale deletion
    pub fn partition_field(&self) -> Option<&str> {
        self.partitions.as_ref().and_then(|p| p.field.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        if self.logical.trim().is_empty() {
            return Err(Error::validation("Collection name must not be empty"));
        }
        self.schema.validate()?;
        if let Some(field) = self.partition_field() {
            if self.schema.field(field).is_none() {
                return Err(Error::validation(format!(
                    "Collection '{}' partitions on undeclared field '{field}'",
                    self.logical
                )));
            }
        }
        for name in self.stale_rules.iter().filter_map(|rule| match rule {
            StaleRule::Scope { name } => Some(name),
            _ => None,
        }) {
            if !self.scopes.contains_key(name) {
                return Err(Error::validation(format!(
                    "Collection '{}' has a stale rule on unknown scope '{name}'",
                    self.logical
                )));
            }
        }
        Ok(())
    }
}

/// Registered collections by logical name
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    definitions: BTreeMap<String, Arc<CollectionDefinition>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated definition; names must be unique
    pub fn register(&mut self, definition: CollectionDefinition) -> Result<()> {
        definition.validate()?;
        if self.definitions.contains_key(&definition.logical) {
            return Err(Error::validation(format!(
                "Collection '{}' is already registered",
                definition.logical
            )));
        }
        self.definitions
            .insert(definition.logical.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, logical: &str) -> Option<Arc<CollectionDefinition>> {
        self.definitions.get(logical).cloned()
    }

    pub fn contains(&self, logical: &str) -> bool {
        self.definitions.contains_key(logical)
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<CollectionDefinition>> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
