use crate::planner;
use crate::registry::NodeRegistry;
use crate::runner::candidate_type_keys;
use flowcore::{GraphError, WorkflowDefinition};

/// Save-time check of a workflow: the graph must plan, and every node's
/// type key must resolve directly and unambiguously.
///
/// The runner tolerates sloppy type keys through its fallback chain; this
/// pass keeps new definitions from relying on that.
pub fn validate_definition(
    workflow: &WorkflowDefinition,
    registry: &NodeRegistry,
) -> Result<(), GraphError> {
    planner::plan(workflow)?;
    validate_type_keys(workflow, registry)
}

pub fn validate_type_keys(
    workflow: &WorkflowDefinition,
    registry: &NodeRegistry,
) -> Result<(), GraphError> {
    let mut issues = Vec::new();

    for node in &workflow.nodes {
        let candidates = candidate_type_keys(node);
        let Some(primary) = candidates.first() else {
            issues.push(format!("node '{}' has no type", node.id));
            continue;
        };

        if registry.contains(primary) {
            if let Some(subtype) = &node.data.subtype {
                let distinct = subtype != &node.node_type
                    && registry.contains(&node.node_type)
                    && registry.resolve(subtype).ok().map(|e| e.type_key().to_string())
                        != registry.resolve(&node.node_type).ok().map(|e| e.type_key().to_string());
                if distinct {
                    issues.push(format!(
                        "node '{}': subtype '{}' and type '{}' resolve to different executors",
                        node.id, subtype, node.node_type
                    ));
                }
            }
            continue;
        }

        match candidates[1..].iter().find(|c| registry.contains(c)) {
            Some(fallback) => issues.push(format!(
                "node '{}': type '{}' only resolves via fallback '{}'",
                node.id, primary, fallback
            )),
            None => issues.push(format!(
                "node '{}': unknown type '{}' (tried: {})",
                node.id,
                primary,
                candidates.join(", ")
            )),
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        tracing::warn!(workflow_id = %workflow.id, issues = issues.len(), "workflow type keys rejected");
        Err(GraphError::InvalidTypeKeys { issues })
    }
}
