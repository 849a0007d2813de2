//! Workflow template graph and binding schema (§3, §4.B).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parameter's declared primitive type in a binding schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Float,
    String,
    Bool,
}

/// Where a client parameter gets injected: a graph-node-id + input field,
/// plus the declared type and fallback default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamMapping {
    pub graph_node_id: String,
    pub input_field: String,
    pub data_type: DataType,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

/// Per-template metadata describing which client parameters are accepted
/// and where each lands in the graph (§3 Template Binding Schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingSchema {
    pub name: String,
    pub allowed_params: Vec<String>,
    pub parameter_mapping: BTreeMap<String, ParamMapping>,
}

/// Parameters the intake layer accepts without validating against
/// `allowed_params` (§4.C step 2) — they are system-internal, not
/// graph-bound client input.
pub const SYSTEM_PARAM_ALLOWLIST: &[&str] = &[
    "job_id",
    "user_id",
    "job_kind",
    "workflow_name",
    "priority",
    "image_download_info",
    "file_download_info",
    "_downloaded_files",
];

/// One node in the canonical (legacy-form) template graph: a class type tag
/// plus an `inputs` map whose values are either literals or connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
}

/// A single input slot: either a literal value or a connection to another
/// node's output (§9 "cyclic graphs": represented as `(src-id, slot)`, no
/// back-pointers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Connection(String, i64),
    Literal(serde_json::Value),
}

/// The canonicalised template graph: node-id -> node record (§4.B).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateGraph {
    pub nodes: BTreeMap<String, GraphNode>,
}

impl TemplateGraph {
    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(node_id)
    }
}

/// A complete named template: its canonical graph plus binding schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub schema: BindingSchema,
    pub graph: TemplateGraph,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_form_roundtrips_through_json() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "3".to_string(),
            GraphNode {
                class_type: "KSampler".to_string(),
                inputs: BTreeMap::from([
                    ("seed".to_string(), InputValue::Literal(serde_json::json!(42))),
                    (
                        "model".to_string(),
                        InputValue::Connection("4".to_string(), 0),
                    ),
                ]),
            },
        );
        let graph = TemplateGraph { nodes };
        let json = serde_json::to_string(&graph).unwrap();
        let back: TemplateGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(graph, back);
    }
}
