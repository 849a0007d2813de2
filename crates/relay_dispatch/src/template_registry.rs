//! Template Registry (§4.B): loads, caches, and canonicalises workflow
//! template files and their binding schema.
//!
//! Two JSON source shapes exist on disk. `legacy` is already the canonical
//! internal shape (node-id -> `{class_type, inputs}`). `rich` is a UI-export
//! shape (`nodes` array + a `links` table + per-node `widgets_values`); it is
//! translated into `legacy` once, at load time, so every downstream
//! consumer (Parameter Engine, Execution Driver) only ever sees one shape.

use relay_protocol::template::{BindingSchema, DataType, GraphNode, InputValue, ParamMapping, Template, TemplateGraph};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown template `{0}`")]
    NotFound(String),
    #[error("failed reading template file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed template `{name}`: {reason}")]
    Malformed { name: String, reason: String },
}

/// On-disk representation, accepted in either shape (§4.B).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OnDiskTemplate {
    Rich(RichTemplateFile),
    Legacy(LegacyTemplateFile),
}

#[derive(Debug, Deserialize)]
struct LegacyTemplateFile {
    schema: OnDiskSchema,
    graph: TemplateGraph,
}

#[derive(Debug, Deserialize)]
struct OnDiskSchema {
    #[serde(default)]
    allowed_params: Vec<String>,
    #[serde(default)]
    parameter_mapping: BTreeMap<String, ParamMapping>,
}

#[derive(Debug, Deserialize)]
struct RichTemplateFile {
    schema: OnDiskSchema,
    nodes: Vec<RichNode>,
    #[serde(default)]
    links: Vec<RichLink>,
}

#[derive(Debug, Deserialize)]
struct RichNode {
    id: serde_json::Value,
    #[serde(rename = "type")]
    class_type: String,
    #[serde(default)]
    inputs: Vec<RichInput>,
    #[serde(default)]
    widgets_values: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RichInput {
    name: String,
    #[serde(default)]
    link: Option<i64>,
}

/// `[link-id, src-node, src-slot, dst-node, dst-slot, type]`
#[derive(Debug, Deserialize)]
struct RichLink(i64, serde_json::Value, i64, serde_json::Value, i64, serde_json::Value);

/// UI-only node types dropped during canonicalisation (§4.B).
const UI_ONLY_TYPES: &[&str] = &["Note", "Reroute", "PrimitiveNode", "MarkdownNote"];

/// Positional `widgets_values` -> named input field, per known class type
/// (§4.B: "samplers, encoders, latent factories, model loaders").
fn widget_schema(class_type: &str) -> Option<&'static [&'static str]> {
    match class_type {
        "KSampler" => Some(&["seed", "steps", "cfg", "sampler_name", "scheduler", "denoise"]),
        "KSamplerAdvanced" => Some(&[
            "add_noise",
            "seed",
            "control_after_generate",
            "steps",
            "cfg",
            "sampler_name",
            "scheduler",
            "start_at_step",
            "end_at_step",
            "return_with_leftover_noise",
        ]),
        "CLIPTextEncode" => Some(&["text"]),
        "EmptyLatentImage" => Some(&["width", "height", "batch_size"]),
        "CheckpointLoaderSimple" => Some(&["ckpt_name"]),
        "LoadImage" => Some(&["image", "upload"]),
        _ => None,
    }
}

fn node_id_str(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn canonicalize_rich(rich: RichTemplateFile) -> Result<TemplateGraph, TemplateError> {
    // link-id -> (src-node-id, src-slot)
    let link_table: BTreeMap<i64, (String, i64)> = rich
        .links
        .iter()
        .map(|l| (l.0, (node_id_str(&l.1), l.2)))
        .collect();

    let mut nodes = BTreeMap::new();
    for node in &rich.nodes {
        if UI_ONLY_TYPES.contains(&node.class_type.as_str()) {
            continue;
        }
        let node_id = node_id_str(&node.id);
        let mut inputs = BTreeMap::new();

        for input in &node.inputs {
            if let Some(link_id) = input.link {
                if let Some((src, slot)) = link_table.get(&link_id) {
                    inputs.insert(input.name.clone(), InputValue::Connection(src.clone(), *slot));
                }
            }
        }

        if let Some(schema) = widget_schema(&node.class_type) {
            for (idx, field) in schema.iter().enumerate() {
                if inputs.contains_key(*field) {
                    continue; // already a connection
                }
                if let Some(value) = node.widgets_values.get(idx) {
                    inputs.insert(field.to_string(), InputValue::Literal(value.clone()));
                }
            }
        }

        nodes.insert(node_id, GraphNode { class_type: node.class_type.clone(), inputs });
    }

    Ok(TemplateGraph { nodes })
}

/// Parse either shape and return the canonical graph plus schema.
fn parse_template_file(name: &str, contents: &str) -> Result<Template, TemplateError> {
    let on_disk: OnDiskTemplate = serde_json::from_str(contents).map_err(|e| TemplateError::Malformed {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    let (raw_schema, graph) = match on_disk {
        OnDiskTemplate::Legacy(legacy) => (legacy.schema, legacy.graph),
        OnDiskTemplate::Rich(rich) => {
            let schema = OnDiskSchema {
                allowed_params: rich.schema.allowed_params.clone(),
                parameter_mapping: rich.schema.parameter_mapping.clone(),
            };
            let graph = canonicalize_rich(rich)?;
            (schema, graph)
        }
    };

    Ok(Template {
        schema: BindingSchema {
            name: name.to_string(),
            allowed_params: raw_schema.allowed_params,
            parameter_mapping: raw_schema.parameter_mapping,
        },
        graph,
    })
}

/// Thread-safe, first-loader-wins cache keyed by normalised absolute path
/// (§4.B, §5 "Template cache: read-mostly; first-loader wins").
pub struct TemplateRegistry {
    templates_dir: PathBuf,
    cache: RwLock<BTreeMap<PathBuf, Arc<Template>>>,
}

impl TemplateRegistry {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.templates_dir.join(format!("{name}.json"))
    }

    /// Returns the cached canonical template, loading and parsing it on
    /// first use. Concurrent callers racing on the same never-before-seen
    /// template may both parse; the cache insertion is idempotent either way.
    pub async fn get(&self, name: &str) -> Result<Arc<Template>, TemplateError> {
        let path = self.path_for(name);
        let normalized = path
            .canonicalize()
            .unwrap_or_else(|_| path.clone());

        if let Some(template) = self.cache.read().await.get(&normalized) {
            return Ok(Arc::clone(template));
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TemplateError::NotFound(name.to_string())
            } else {
                TemplateError::Io { path: path.clone(), source: e }
            }
        })?;
        let template = Arc::new(parse_template_file(name, &contents)?);

        let mut cache = self.cache.write().await;
        let entry = cache.entry(normalized).or_insert_with(|| Arc::clone(&template));
        Ok(Arc::clone(entry))
    }

    /// Process-level reload: drop the entire cache so the next `get` re-parses.
    pub async fn reload(&self) {
        self.cache.write().await.clear();
    }
}

#[allow(dead_code)]
fn _assert_data_type_exhaustive(dt: DataType) {
    match dt {
        DataType::Int | DataType::Float | DataType::String | DataType::Bool => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{name}.json"))).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn canonicalising_legacy_form_is_the_identity() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = r#"{
            "schema": { "allowed_params": ["prompt"], "parameter_mapping": {} },
            "graph": { "3": { "class_type": "KSampler", "inputs": { "seed": 42 } } }
        }"#;
        write_file(dir.path(), "sd_basic", legacy);

        let registry = TemplateRegistry::new(dir.path());
        let template = registry.get("sd_basic").await.unwrap();
        assert_eq!(template.graph.nodes["3"].class_type, "KSampler");
        assert_eq!(
            template.graph.nodes["3"].inputs["seed"],
            InputValue::Literal(serde_json::json!(42))
        );
    }

    #[tokio::test]
    async fn rich_form_derives_connections_and_drops_ui_only_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let rich = r#"{
            "schema": { "allowed_params": [], "parameter_mapping": {} },
            "nodes": [
                { "id": 4, "type": "CheckpointLoaderSimple", "inputs": [], "widgets_values": ["model.safetensors"] },
                { "id": 3, "type": "KSampler", "inputs": [ { "name": "model", "link": 1 } ], "widgets_values": [42, 20, 8.0, "euler", "normal", 1.0] },
                { "id": 99, "type": "Note", "inputs": [], "widgets_values": ["a comment"] }
            ],
            "links": [ [1, 4, 0, 3, 0, "MODEL"] ]
        }"#;
        write_file(dir.path(), "rich_wf", rich);

        let registry = TemplateRegistry::new(dir.path());
        let template = registry.get("rich_wf").await.unwrap();

        assert!(!template.graph.nodes.contains_key("99"));
        assert_eq!(
            template.graph.nodes["3"].inputs["model"],
            InputValue::Connection("4".to_string(), 0)
        );
        assert_eq!(
            template.graph.nodes["3"].inputs["seed"],
            InputValue::Literal(serde_json::json!(42))
        );
        assert_eq!(
            template.graph.nodes["4"].inputs["ckpt_name"],
            InputValue::Literal(serde_json::json!("model.safetensors"))
        );
    }

    #[tokio::test]
    async fn unknown_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TemplateRegistry::new(dir.path());
        assert!(matches!(
            registry.get("does_not_exist").await,
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = r#"{"schema":{"allowed_params":[],"parameter_mapping":{}},"graph":{}}"#;
        write_file(dir.path(), "empty", legacy);
        let registry = TemplateRegistry::new(dir.path());

        let first = registry.get("empty").await.unwrap();
        std::fs::remove_file(dir.path().join("empty.json")).unwrap();
        let second = registry.get("empty").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
