//! Load Balancer (§4.E): selects one node from a candidate set produced by
//! the Node Manager. Candidate filtering (online, has capacity, accepts the
//! job kind) happens upstream; this module only implements selection among
//! already-suitable nodes.

use rand::Rng;
pub use relay_protocol::config::LoadBalancingStrategy;
use relay_protocol::node::Node;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Selects among pre-filtered candidate nodes per the configured strategy
/// (§4.E). Stateless except for the round-robin cursor.
pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
    round_robin_cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self { strategy, round_robin_cursor: AtomicUsize::new(0) }
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: LoadBalancingStrategy) {
        self.strategy = strategy;
    }

    /// Picks one node from `candidates`, or `None` if it's empty.
    pub fn select<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        if candidates.is_empty() {
            return None;
        }
        match self.strategy {
            LoadBalancingStrategy::RoundRobin => self.select_round_robin(candidates),
            LoadBalancingStrategy::LeastLoaded => self.select_least_loaded(candidates),
            LoadBalancingStrategy::Weighted => self.select_weighted(candidates),
            LoadBalancingStrategy::Random => self.select_random(candidates),
            LoadBalancingStrategy::PriorityBased => self.select_priority_based(candidates),
        }
    }

    fn select_round_robin<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(idx)
    }

    fn select_least_loaded<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        candidates
            .iter()
            .min_by(|a, b| a.load_percentage().partial_cmp(&b.load_percentage()).unwrap())
    }

    fn select_random<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        candidates.get(idx)
    }

    /// Weighted-random by `priority * (1 - load/100)`, floored at 0.1 so a
    /// fully-loaded node retains a sliver of selection probability.
    fn select_weighted<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        let weights: Vec<f64> = candidates
            .iter()
            .map(|n| {
                let load_factor = (1.0 - n.load_percentage() / 100.0).max(0.1);
                n.priority_weight() * load_factor
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return candidates.first();
        }
        let pick = rand::thread_rng().gen_range(0.0..total);
        let mut running = 0.0;
        for (node, weight) in candidates.iter().zip(&weights) {
            running += weight;
            if pick <= running {
                return Some(node);
            }
        }
        candidates.last()
    }

    /// Groups by declared priority, then picks the least-loaded node within
    /// the highest-priority group.
    fn select_priority_based<'a>(&self, candidates: &'a [Node]) -> Option<&'a Node> {
        let highest = candidates
            .iter()
            .map(|n| n.priority_weight())
            .fold(f64::MIN, f64::max);
        candidates
            .iter()
            .filter(|n| (n.priority_weight() - highest).abs() < f64::EPSILON)
            .min_by(|a, b| a.load_percentage().partial_cmp(&b.load_percentage()).unwrap())
    }
}

/// Diagnostic score for a node under the current strategy (§4.E, used by
/// the fleet diagnostics endpoint, not by selection itself).
pub fn node_score(node: &Node) -> f64 {
    use relay_protocol::node::NodeStatus;
    if node.status != NodeStatus::Online {
        return 0.0;
    }
    let load_factor = 1.0 - node.load_percentage() / 100.0;
    100.0 * load_factor * node.priority_weight()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::job::JobKind;
    use relay_protocol::node::NodeStatus;
    use std::collections::BTreeSet;

    fn node(id: &str, load: u32, capacity: u32, priority: f64) -> Node {
        let mut n = Node::new(relay_ids::NodeId::new(id).unwrap(), "h", 1, capacity);
        n.status = NodeStatus::Online;
        n.current_load = load;
        n.capabilities = BTreeSet::from([JobKind::ImageFromText]);
        n.metadata.insert("priority".to_string(), serde_json::json!(priority));
        n
    }

    #[test]
    fn least_loaded_picks_lowest_load_percentage() {
        let nodes = vec![node("a", 3, 4, 1.0), node("b", 1, 4, 1.0)];
        let lb = LoadBalancer::new(LoadBalancingStrategy::LeastLoaded);
        assert_eq!(lb.select(&nodes).unwrap().id.as_str(), "b");
    }

    #[test]
    fn round_robin_cycles_through_candidates() {
        let nodes = vec![node("a", 0, 4, 1.0), node("b", 0, 4, 1.0), node("c", 0, 4, 1.0)];
        let lb = LoadBalancer::new(LoadBalancingStrategy::RoundRobin);
        let picks: Vec<&str> = (0..3).map(|_| lb.select(&nodes).unwrap().id.as_str()).collect();
        assert_eq!(picks, vec!["a", "b", "c"]);
    }

    #[test]
    fn priority_based_prefers_highest_priority_group_then_least_loaded() {
        let nodes = vec![
            node("low-priority-idle", 0, 4, 1.0),
            node("high-priority-busy", 3, 4, 5.0),
            node("high-priority-idle", 0, 4, 5.0),
        ];
        let lb = LoadBalancer::new(LoadBalancingStrategy::PriorityBased);
        assert_eq!(lb.select(&nodes).unwrap().id.as_str(), "high-priority-idle");
    }

    #[test]
    fn empty_candidates_select_none() {
        let lb = LoadBalancer::new(LoadBalancingStrategy::LeastLoaded);
        assert!(lb.select(&[]).is_none());
    }

    #[test]
    fn offline_node_scores_zero() {
        let mut n = node("a", 0, 4, 2.0);
        n.status = NodeStatus::Offline;
        assert_eq!(node_score(&n), 0.0);
    }

    #[test]
    fn idle_high_priority_node_scores_higher_than_busy_low_priority() {
        let idle = node("a", 0, 4, 2.0);
        let busy = node("b", 4, 4, 1.0);
        assert!(node_score(&idle) > node_score(&busy));
    }
}
