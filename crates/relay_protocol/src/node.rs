//! Node domain types (§3 Data Model: Node).

use crate::job::JobKind;
use chrono::{DateTime, Utc};
use relay_ids::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Node health status. Transitions online<->offline are probe-driven only
/// (§4.D); `Maintenance` is a human-set override never touched by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
    Error,
    Maintenance,
}

/// A registered backend inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub max_concurrent: u32,
    pub current_load: u32,
    pub capabilities: BTreeSet<JobKind>,
    pub last_heartbeat: DateTime<Utc>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Node {
    pub fn new(id: NodeId, host: impl Into<String>, port: u16, max_concurrent: u32) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            status: NodeStatus::Offline,
            max_concurrent,
            current_load: 0,
            capabilities: BTreeSet::new(),
            last_heartbeat: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn load_percentage(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 100.0;
        }
        100.0 * self.current_load as f64 / self.max_concurrent as f64
    }

    pub fn is_available(&self) -> bool {
        self.status == NodeStatus::Online && self.current_load < self.max_concurrent
    }

    pub fn accepts(&self, kind: JobKind) -> bool {
        self.capabilities.is_empty() || self.capabilities.contains(&kind)
    }

    pub fn priority_weight(&self) -> f64 {
        self.metadata
            .get("priority")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0)
    }
}

/// Derived, read-only fleet-wide diagnostics (§4.D).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    pub total_capacity: u32,
    pub current_load: u32,
    pub load_percentage: f64,
    pub available_slots: u32,
}

impl ClusterStats {
    pub fn from_nodes<'a>(nodes: impl Iterator<Item = &'a Node>) -> Self {
        let mut total_nodes = 0usize;
        let mut online_nodes = 0usize;
        let mut total_capacity = 0u32;
        let mut current_load = 0u32;
        for node in nodes {
            total_nodes += 1;
            if node.status == NodeStatus::Online {
                online_nodes += 1;
            }
            total_capacity += node.max_concurrent;
            current_load += node.current_load;
        }
        let load_percentage = if total_capacity > 0 {
            100.0 * current_load as f64 / total_capacity as f64
        } else {
            0.0
        };
        Self {
            total_nodes,
            online_nodes,
            offline_nodes: total_nodes - online_nodes,
            total_capacity,
            current_load,
            load_percentage,
            available_slots: total_capacity.saturating_sub(current_load),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_availability_respects_load_and_status() {
        let mut node = Node::new(NodeId::new("gpu-01").unwrap(), "127.0.0.1", 8188, 2);
        assert!(!node.is_available(), "offline node is never available");

        node.status = NodeStatus::Online;
        assert!(node.is_available());

        node.current_load = 2;
        assert!(!node.is_available(), "at capacity is not available");
    }

    #[test]
    fn empty_capabilities_accepts_any_kind() {
        let node = Node::new(NodeId::new("gpu-01").unwrap(), "127.0.0.1", 8188, 1);
        assert!(node.accepts(JobKind::ImageFromText));
        assert!(node.accepts(JobKind::VideoFromImage));
    }

    #[test]
    fn cluster_stats_aggregate_across_nodes() {
        let mut a = Node::new(NodeId::new("a").unwrap(), "h", 1, 4);
        a.status = NodeStatus::Online;
        a.current_load = 2;
        let mut b = Node::new(NodeId::new("b").unwrap(), "h", 1, 4);
        b.status = NodeStatus::Offline;

        let stats = ClusterStats::from_nodes([a, b].iter());
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.online_nodes, 1);
        assert_eq!(stats.total_capacity, 8);
        assert_eq!(stats.current_load, 2);
        assert_eq!(stats.available_slots, 6);
    }
}
