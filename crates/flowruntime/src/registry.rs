use crate::migration::{Migration, MigrationChain};
use crate::schema::{ConfigIssue, FieldSchema, NodeDefinition};
use async_trait::async_trait;
use flowcore::{Node, NodeContext, NodeError, Value};
use serde::Serialize;
use serde_json::Map;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Factory trait for creating node instances (legacy registration).
///
/// Legacy executors are flat: no schema, no versioning. They keep working
/// unmodified next to declarative ones.
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node with given configuration
    fn create(&self, config: &Map<String, Value>) -> Result<Box<dyn Node>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, category)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a legacy node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Modern executor: describes itself with a versioned schema and knows how
/// to upgrade configuration written for older versions.
#[async_trait]
pub trait DeclarativeNode: Send + Sync {
    fn definition(&self) -> NodeDefinition;

    /// Steps from older configuration versions to [`NodeDefinition::version`]
    fn migrations(&self) -> Vec<Migration> {
        Vec::new()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutorKind {
    Legacy,
    Declarative,
}

/// A registered executor, tagged by calling convention
#[derive(Clone)]
pub enum ExecutorEntry {
    Legacy {
        factory: Arc<dyn NodeFactory>,
        metadata: NodeMetadata,
    },
    Declarative {
        node: Arc<dyn DeclarativeNode>,
        definition: Arc<NodeDefinition>,
        migrations: Arc<MigrationChain>,
    },
}

impl ExecutorEntry {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            ExecutorEntry::Legacy { .. } => ExecutorKind::Legacy,
            ExecutorEntry::Declarative { .. } => ExecutorKind::Declarative,
        }
    }

    pub fn type_key(&self) -> &str {
        match self {
            ExecutorEntry::Legacy { factory, .. } => factory.node_type(),
            ExecutorEntry::Declarative { definition, .. } => &definition.node_type,
        }
    }

    pub fn version(&self) -> Option<u32> {
        match self {
            ExecutorEntry::Legacy { .. } => None,
            ExecutorEntry::Declarative { definition, .. } => Some(definition.version),
        }
    }

    pub fn descriptor(&self) -> NodeDescriptor {
        match self {
            ExecutorEntry::Legacy { factory, metadata } => NodeDescriptor {
                node_type: factory.node_type().to_string(),
                kind: ExecutorKind::Legacy,
                display_name: factory.node_type().to_string(),
                description: metadata.description.clone(),
                category: metadata.category.clone(),
                version: None,
                fields: Vec::new(),
            },
            ExecutorEntry::Declarative { definition, .. } => NodeDescriptor {
                node_type: definition.node_type.clone(),
                kind: ExecutorKind::Declarative,
                display_name: definition.display_name.clone(),
                description: definition.description.clone(),
                category: definition.category.clone(),
                version: Some(definition.version),
                fields: definition.fields.clone(),
            },
        }
    }

    /// Bring a stored configuration up to the executor's current version.
    ///
    /// Best effort: when the stored version is unknown or matches, or the
    /// entry is legacy, the configuration is returned as is. A failed
    /// migration is logged and the un-migrated configuration is returned.
    pub fn migrate_config(
        &self,
        node_id: &str,
        config: Map<String, Value>,
        stored_version: Option<u32>,
    ) -> Map<String, Value> {
        let ExecutorEntry::Declarative {
            definition,
            migrations,
            ..
        } = self
        else {
            return config;
        };
        let Some(stored) = stored_version else {
            return config;
        };
        if stored == definition.version {
            return config;
        }

        match migrations.migrate(&config, stored, definition.version) {
            Ok(migrated) => {
                tracing::info!(
                    node_id,
                    node_type = %definition.node_type,
                    from = stored,
                    to = definition.version,
                    "migrated node configuration"
                );
                migrated
            }
            Err(e) => {
                tracing::warn!(
                    node_id,
                    node_type = %definition.node_type,
                    from = stored,
                    to = definition.version,
                    error = %e,
                    "config migration failed, using original configuration"
                );
                config
            }
        }
    }
}

/// Serializable description of a registered node type
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub node_type: String,
    pub kind: ExecutorKind,
    pub display_name: String,
    pub description: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub fields: Vec<FieldSchema>,
}

/// Registry of available node types.
///
/// Built once at startup and shared by reference; nothing here is global.
#[derive(Default)]
pub struct NodeRegistry {
    declarative: HashMap<String, ExecutorEntry>,
    legacy: HashMap<String, ExecutorEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a legacy node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!(node_type = %node_type, kind = "legacy", "registering node type");
        let metadata = factory.metadata();
        self.legacy
            .insert(node_type, ExecutorEntry::Legacy { factory, metadata });
    }

    /// Register a declarative node
    pub fn register_declarative(&mut self, node: Arc<dyn DeclarativeNode>) {
        let definition = node.definition();
        let migrations = MigrationChain::new(node.migrations());
        tracing::info!(
            node_type = %definition.node_type,
            version = definition.version,
            kind = "declarative",
            "registering node type"
        );
        self.declarative.insert(
            definition.node_type.clone(),
            ExecutorEntry::Declarative {
                node,
                definition: Arc::new(definition),
                migrations: Arc::new(migrations),
            },
        );
    }

    /// Resolve a type key: modern catalog first, then legacy.
    pub fn resolve(&self, type_key: &str) -> Result<ExecutorEntry, NodeError> {
        self.lookup(type_key)
            .cloned()
            .ok_or_else(|| NodeError::TypeNotFound {
                candidates: vec![type_key.to_string()],
            })
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.lookup(type_key).is_some()
    }

    fn lookup(&self, type_key: &str) -> Option<&ExecutorEntry> {
        self.declarative
            .get(type_key)
            .or_else(|| self.legacy.get(type_key))
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .declarative
            .keys()
            .chain(self.legacy.keys().filter(|k| !self.declarative.contains_key(*k)))
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn list(&self) -> Vec<NodeDescriptor> {
        self.list_node_types()
            .iter()
            .filter_map(|t| self.get(t))
            .collect()
    }

    pub fn get(&self, type_key: &str) -> Option<NodeDescriptor> {
        self.lookup(type_key).map(ExecutorEntry::descriptor)
    }

    /// Node types grouped by category; categories and members sorted.
    pub fn categories(&self) -> BTreeMap<String, Vec<NodeDescriptor>> {
        let mut grouped: BTreeMap<String, Vec<NodeDescriptor>> = BTreeMap::new();
        for descriptor in self.list() {
            grouped
                .entry(descriptor.category.clone())
                .or_default()
                .push(descriptor);
        }
        grouped
    }

    /// Validate a configuration against the type's schema.
    pub fn validate_config(
        &self,
        type_key: &str,
        config: &Map<String, Value>,
    ) -> Result<(), Vec<ConfigIssue>> {
        match self.lookup(type_key) {
            None => Err(vec![ConfigIssue::Rejected {
                message: format!("unknown node type '{}'", type_key),
            }]),
            Some(ExecutorEntry::Declarative { definition, .. }) => definition.validate(config),
            Some(ExecutorEntry::Legacy { factory, .. }) => factory
                .create(config)
                .and_then(|node| node.validate_config(config))
                .map_err(|e| {
                    vec![ConfigIssue::Rejected {
                        message: e.to_string(),
                    }]
                }),
        }
    }
}
