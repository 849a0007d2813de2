//! HTTP leg of the backend node protocol (§6): submit, harvest, health probe.

use relay_protocol::node_protocol::{FileDownloadInstruction, HistoryResponse, PromptRequest, PromptResponse};
use relay_protocol::template::TemplateGraph;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeClientError {
    #[error("request to node failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("node returned {status}: {body}")]
    BadStatus { status: u16, body: String },
}

/// A thin HTTP client bound to one node's base URL. Every call carries a
/// bounded deadline (§5 "every outbound call has a bounded deadline").
pub struct NodeClient {
    http: reqwest::Client,
    base_url: String,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into() }
    }

    /// The node's HTTP base URL, e.g. to derive its `ws://` monitor endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /prompt` (§6, §4.J step 3).
    pub async fn submit(
        &self,
        graph: TemplateGraph,
        client_id: &str,
        file_downloads: Vec<FileDownloadInstruction>,
    ) -> Result<String, NodeClientError> {
        let body = PromptRequest {
            prompt: graph,
            client_id: Some(client_id.to_string()),
            file_downloads: if file_downloads.is_empty() { None } else { Some(file_downloads) },
        };
        let response = self
            .http
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeClientError::BadStatus { status: status.as_u16(), body });
        }
        let parsed: PromptResponse = response.json().await?;
        Ok(parsed.prompt_id)
    }

    /// `GET /history/<prompt-id>` (§6, §4.J step 6 "harvest").
    pub async fn history(&self, prompt_id: &str) -> Result<HistoryResponse, NodeClientError> {
        let response = self
            .http
            .get(format!("{}/history/{}", self.base_url, prompt_id))
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeClientError::BadStatus { status: status.as_u16(), body });
        }
        Ok(response.json().await?)
    }

    /// `GET /view?filename=...&subfolder=...`: raw artifact bytes (§4.I egress).
    pub async fn view(&self, filename: &str, subfolder: &str) -> Result<(Vec<u8>, Option<String>), NodeClientError> {
        let mut url = reqwest::Url::parse(&format!("{}/view", self.base_url))
            .map_err(|e| NodeClientError::BadStatus { status: 0, body: e.to_string() })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("filename", filename);
            if !subfolder.is_empty() {
                query.append_pair("subfolder", subfolder);
            }
        }
        let response = self.http.get(url).timeout(Duration::from_secs(30)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeClientError::BadStatus { status: status.as_u16(), body: String::new() });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }

    /// `GET /system_stats`: 200 means healthy (§4.D health probe, §6).
    pub async fn system_stats(&self) -> Result<serde_json::Value, NodeClientError> {
        let response = self
            .http
            .get(format!("{}/system_stats", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeClientError::BadStatus { status: status.as_u16(), body: String::new() });
        }
        Ok(response.json().await?)
    }

    pub async fn is_healthy(&self) -> bool {
        self.system_stats().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_well_formed_base_url() {
        let client = NodeClient::new("http://10.0.0.1:8188");
        assert_eq!(client.base_url, "http://10.0.0.1:8188");
    }
}
