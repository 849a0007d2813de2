//! Config Store, Template Registry, Parameter Engine, Node Manager, Load
//! Balancer and Queue (§4 A/B/C/D/E/G) for the relay orchestrator.
//!
//! This crate is the stateful "brains" layer between the HTTP intake and
//! the Execution Driver: it knows how to turn a template name + client
//! parameters into a resolved graph, which node should run it, and where a
//! job descriptor sits in its dispatch queue. It does not itself talk to a
//! backend node over the wire — that lives in the node-protocol bridge.

pub mod config;
pub mod load_balancer;
pub mod node_manager;
pub mod parameter_engine;
pub mod queue;
pub mod template_registry;

pub use config::{ConfigStore, ConfigStoreError};
pub use load_balancer::{node_score, LoadBalancer, LoadBalancingStrategy};
pub use node_manager::{NodeHealthProbe, NodeManager, NodeManagerConfig};
pub use parameter_engine::resolve_parameters;
pub use queue::{PollBackoff, Queue, QueueEntry, QueueError};
pub use template_registry::{TemplateError, TemplateRegistry};
