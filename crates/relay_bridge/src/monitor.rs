//! WebSocket leg of the backend node protocol (§6, §4.J step 5): streams
//! `executing`/`progress`/`execution_error` frames for one job.

use futures_util::StreamExt;
use relay_protocol::node_protocol::NodeEvent;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("websocket connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The terminal outcome of watching a job's event stream (§4.J "monitor").
#[derive(Debug, Clone)]
pub enum MonitorOutcome {
    /// `executing.data.node == null` observed: the run reached its end.
    Finished,
    /// `execution_error` observed.
    ExecutionError(Option<String>),
    /// The socket closed before either terminal event arrived.
    ClosedEarly,
}

/// Connects to `WS /ws?clientId=<job-id>` and drives `on_progress` for every
/// progress frame until a terminal event or the socket closes. Cancellation
/// is handled by the caller selecting against this future with a token.
pub async fn watch(
    base_url: &str,
    job_id: &str,
    mut on_progress: impl FnMut(u64, u64),
) -> Result<MonitorOutcome, MonitorError> {
    let ws_url = format!(
        "{}/ws?clientId={}",
        base_url.replacen("http://", "ws://", 1).replacen("https://", "wss://", 1),
        job_id
    );
    let (stream, _response) = tokio_tungstenite::connect_async(&ws_url).await?;
    let (_write, mut read) = stream.split();

    while let Some(message) = read.next().await {
        let message = match message {
            Ok(m) => m,
            Err(_) => return Ok(MonitorOutcome::ClosedEarly),
        };
        let Message::Text(text) = message else { continue };
        let Ok(event) = serde_json::from_str::<NodeEvent>(&text) else { continue };
        match event {
            NodeEvent::Progress { value, max } => on_progress(value, max),
            NodeEvent::Executing { node: None } => return Ok(MonitorOutcome::Finished),
            NodeEvent::Executing { node: Some(_) } => {}
            NodeEvent::ExecutionError { exception_message } => {
                return Ok(MonitorOutcome::ExecutionError(exception_message))
            }
            NodeEvent::Other => {}
        }
    }
    Ok(MonitorOutcome::ClosedEarly)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_url_becomes_ws() {
        let url = "http://10.0.0.1:8188".replacen("http://", "ws://", 1);
        assert_eq!(url, "ws://10.0.0.1:8188");
    }
}
