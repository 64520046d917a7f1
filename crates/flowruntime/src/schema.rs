use flowcore::{json_type_name, Value};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::fmt;

/// Declared shape of a single configuration field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

impl FieldSchema {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// Describes a declarative executor: identity, version, schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub node_type: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    /// Current configuration version
    pub version: u32,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl NodeDefinition {
    pub fn new(node_type: impl Into<String>, category: impl Into<String>, version: u32) -> Self {
        let node_type = node_type.into();
        Self {
            display_name: node_type.clone(),
            node_type,
            description: String::new(),
            category: category.into(),
            version,
            fields: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a configuration against the declared fields. Unknown fields are
    /// tolerated; every problem is reported, not just the first.
    pub fn validate(&self, config: &Map<String, Value>) -> Result<(), Vec<ConfigIssue>> {
        let mut issues = Vec::new();
        for field in &self.fields {
            match config.get(&field.name) {
                None | Some(Value::Null) if field.required && field.default.is_none() => {
                    issues.push(ConfigIssue::Missing {
                        field: field.name.clone(),
                    });
                }
                Some(value) if !value.is_null() && !field.kind.accepts(value) => {
                    issues.push(ConfigIssue::WrongType {
                        field: field.name.clone(),
                        expected: field.kind,
                        actual: json_type_name(Some(value)).to_string(),
                    });
                }
                _ => {}
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Fill absent fields that declare a default.
    pub fn apply_defaults(&self, config: &mut Map<String, Value>) {
        for field in &self.fields {
            if let Some(default) = &field.default {
                config
                    .entry(field.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "issue", rename_all = "camelCase")]
pub enum ConfigIssue {
    Missing {
        field: String,
    },
    WrongType {
        field: String,
        expected: FieldKind,
        actual: String,
    },
    Rejected {
        message: String,
    },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::Missing { field } => write!(f, "missing required field '{}'", field),
            ConfigIssue::WrongType {
                field,
                expected,
                actual,
            } => write!(f, "field '{}' expected {}, got {}", field, expected, actual),
            ConfigIssue::Rejected { message } => f.write_str(message),
        }
    }
}
