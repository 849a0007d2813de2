//! Wire types for the backend inference node protocol (§6, consumed).
//!
//! The node is a black box speaking a fixed HTTP+WebSocket protocol; these
//! types describe exactly that wire shape, not our own domain model.

use crate::template::TemplateGraph;
use serde::{Deserialize, Serialize};

/// One entry of a `file_downloads` instruction embedded in a `/prompt`
/// submission (§4.J step 3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDownloadInstruction {
    pub download_url: String,
    pub local_path: String,
    pub filename: String,
    pub file_size: u64,
    /// `"<graph-node-id>.inputs.<field-name>"`
    pub target_field: String,
}

/// Body of `POST /prompt`.
#[derive(Debug, Clone, Serialize)]
pub struct PromptRequest {
    pub prompt: TemplateGraph,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_downloads: Option<Vec<FileDownloadInstruction>>,
}

/// 200 response of `POST /prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptResponse {
    pub prompt_id: String,
}

/// One output entry under `history[prompt_id].outputs[node_id].images[]`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryImageEntry {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HistoryNodeOutput {
    #[serde(default)]
    pub images: Vec<HistoryImageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: std::collections::BTreeMap<String, HistoryNodeOutput>,
}

/// Response of `GET /history/<prompt-id>`: keyed by prompt-id, single entry.
pub type HistoryResponse = std::collections::BTreeMap<String, HistoryEntry>;

/// A text frame received on `WS /ws?clientId=<job-id>` (§4.J step 5).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeEvent {
    Executing { node: Option<String> },
    Progress { value: u64, max: u64 },
    ExecutionError {
        #[serde(default)]
        exception_message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executing_with_null_node_parses_as_end_of_run() {
        let json = r#"{"type":"executing","data":{"node":null}}"#;
        let event: NodeEvent = serde_json::from_str(json).unwrap();
        match event {
            NodeEvent::Executing { node } => assert!(node.is_none()),
            _ => panic!("expected Executing"),
        }
    }

    #[test]
    fn progress_parses_value_and_max() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20}}"#;
        let event: NodeEvent = serde_json::from_str(json).unwrap();
        match event {
            NodeEvent::Progress { value, max } => {
                assert_eq!(value, 5);
                assert_eq!(max, 20);
            }
            _ => panic!("expected Progress"),
        }
    }

    #[test]
    fn unknown_message_type_falls_back_to_other() {
        let json = r#"{"type":"status","data":{}}"#;
        let event: NodeEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, NodeEvent::Other));
    }

    #[test]
    fn history_response_parses_nested_image_outputs() {
        let json = r#"{
            "abc123": {
                "outputs": {
                    "9": { "images": [ { "filename": "out.png", "subfolder": "" } ] }
                }
            }
        }"#;
        let history: HistoryResponse = serde_json::from_str(json).unwrap();
        let entry = history.get("abc123").unwrap();
        let images = &entry.outputs.get("9").unwrap().images;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, "out.png");
    }
}
