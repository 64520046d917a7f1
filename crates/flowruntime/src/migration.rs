//! Upgrading stored node configuration to the shape a newer executor
//! version expects.
//!
//! A [`Migration`] moves a configuration from one version to the next with a
//! list of field operations. A [`MigrationChain`] strings them together so a
//! configuration authored against version N reaches the executor's current
//! version one step at a time.

use flowcore::{MigrationError, Value};
use serde_json::Map;
use std::fmt;
use std::sync::Arc;

type CustomOp = Arc<dyn Fn(&mut Map<String, Value>) -> Result<(), String> + Send + Sync>;

/// A single field-level transformation
#[derive(Clone)]
pub enum FieldOp {
    /// Move a value to a new key. No-op when the source is absent.
    Rename { from: String, to: String },
    /// Insert a value if the field is absent.
    SetDefault { field: String, value: Value },
    /// Drop a field the new schema no longer knows.
    Remove { field: String },
    /// Move several top-level fields into a nested object.
    Nest { fields: Vec<String>, into: String },
    /// Arbitrary rewrite; `field` is used for error reporting.
    Custom { field: String, op: CustomOp },
}

impl FieldOp {
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        FieldOp::Rename {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn set_default(field: impl Into<String>, value: Value) -> Self {
        FieldOp::SetDefault {
            field: field.into(),
            value,
        }
    }

    pub fn remove(field: impl Into<String>) -> Self {
        FieldOp::Remove {
            field: field.into(),
        }
    }

    pub fn nest<I, S>(fields: I, into: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldOp::Nest {
            fields: fields.into_iter().map(Into::into).collect(),
            into: into.into(),
        }
    }

    pub fn custom<F>(field: impl Into<String>, op: F) -> Self
    where
        F: Fn(&mut Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        FieldOp::Custom {
            field: field.into(),
            op: Arc::new(op),
        }
    }

    fn apply(&self, config: &mut Map<String, Value>) -> Result<(), (String, String)> {
        match self {
            FieldOp::Rename { from, to } => {
                if let Some(value) = config.remove(from) {
                    if config.contains_key(to) {
                        return Err((to.clone(), format!("target already set while renaming '{}'", from)));
                    }
                    config.insert(to.clone(), value);
                }
            }
            FieldOp::SetDefault { field, value } => {
                config.entry(field.clone()).or_insert_with(|| value.clone());
            }
            FieldOp::Remove { field } => {
                config.remove(field);
            }
            FieldOp::Nest { fields, into } => {
                let mut nested = match config.remove(into) {
                    Some(Value::Object(existing)) => existing,
                    Some(other) => {
                        let kind = flowcore::json_type_name(Some(&other));
                        config.insert(into.clone(), other);
                        return Err((into.clone(), format!("expected object, found {}", kind)));
                    }
                    None => Map::new(),
                };
                for field in fields {
                    if let Some(value) = config.remove(field) {
                        nested.insert(field.clone(), value);
                    }
                }
                config.insert(into.clone(), Value::Object(nested));
            }
            FieldOp::Custom { field, op } => {
                op(config).map_err(|message| (field.clone(), message))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FieldOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldOp::Rename { from, to } => write!(f, "Rename({} -> {})", from, to),
            FieldOp::SetDefault { field, value } => write!(f, "SetDefault({} = {})", field, value),
            FieldOp::Remove { field } => write!(f, "Remove({})", field),
            FieldOp::Nest { fields, into } => write!(f, "Nest({:?} -> {})", fields, into),
            FieldOp::Custom { field, .. } => write!(f, "Custom({})", field),
        }
    }
}

/// One version step
#[derive(Debug, Clone)]
pub struct Migration {
    pub from: u32,
    pub to: u32,
    pub ops: Vec<FieldOp>,
}

impl Migration {
    pub fn new(from: u32, to: u32) -> Self {
        Self {
            from,
            to,
            ops: Vec::new(),
        }
    }

    pub fn with(mut self, op: FieldOp) -> Self {
        self.ops.push(op);
        self
    }

    fn apply(&self, config: &mut Map<String, Value>) -> Result<(), MigrationError> {
        for op in &self.ops {
            op.apply(config).map_err(|(field, message)| MigrationError::Field {
                from: self.from,
                to: self.to,
                field,
                message,
            })?;
        }
        Ok(())
    }
}

/// Ordered set of migrations for one node type
#[derive(Debug, Clone, Default)]
pub struct MigrationChain {
    steps: Vec<Migration>,
}

impl MigrationChain {
    pub fn new(mut steps: Vec<Migration>) -> Self {
        steps.sort_by_key(|m| m.from);
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Upgrade `config` from version `from` to version `to`.
    ///
    /// Works on a copy: on error the caller still holds the original.
    pub fn migrate(
        &self,
        config: &Map<String, Value>,
        from: u32,
        to: u32,
    ) -> Result<Map<String, Value>, MigrationError> {
        if from > to {
            return Err(MigrationError::Downgrade { from, to });
        }

        let mut current = from;
        let mut migrated = config.clone();
        while current < to {
            let step = self
                .steps
                .iter()
                .find(|m| m.from == current && m.to > current && m.to <= to)
                .ok_or(MigrationError::MissingStep { from: current, to })?;
            step.apply(&mut migrated)?;
            tracing::debug!(from = step.from, to = step.to, "applied config migration");
            current = step.to;
        }
        Ok(migrated)
    }
}
