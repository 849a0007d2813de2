//! The composition root (§9 Design Notes: "construct one top-level `Core`
//! value at startup that owns Node Manager, Load Balancer, Template
//! Registry, Job Store, Queue, Worker Pool, File Plane; pass it explicitly
//! to handlers. No hidden global state.").

use relay_bridge::{ExecutionDriver, FilePlane, HttpHealthProbe, WorkerPool};
use relay_db::job_store::{JobStore, SqliteJobStore};
use relay_db::uploads::{SqliteUploadRegistry, UploadRegistry};
use relay_dispatch::{LoadBalancer, NodeManager, NodeManagerConfig, Queue, TemplateRegistry};
use relay_protocol::config::SystemConfig;
use relay_protocol::node::{Node, NodeStatus};
use std::sync::Arc;
use std::time::Duration;

/// Everything a request handler or background task needs, built once at
/// startup from a validated [`SystemConfig`].
pub struct Core {
    pub config: Arc<SystemConfig>,
    pub node_manager: Arc<NodeManager>,
    pub load_balancer: Arc<LoadBalancer>,
    pub template_registry: Arc<TemplateRegistry>,
    pub queue: Arc<Queue>,
    pub job_store: Arc<dyn JobStore>,
    pub uploads: Arc<dyn UploadRegistry>,
    pub file_plane: Arc<FilePlane>,
    pub worker_pool: Arc<WorkerPool>,
    pub fleet_mode: bool,
}

impl Core {
    /// Builds every component and registers statically-declared fleet nodes
    /// (§4.A, §4.D), but does not yet spawn the Worker Pool or the Node
    /// Manager's health-sweep loop — that is [`Core::spawn_background_tasks`],
    /// kept separate so tests can build a `Core` without starting traffic.
    pub async fn build(config: Arc<SystemConfig>) -> anyhow::Result<Arc<Core>> {
        let fleet_mode = config.is_fleet_mode();

        let job_store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::connect(&config.job_store.database_url).await?);
        let uploads: Arc<dyn UploadRegistry> =
            Arc::new(SqliteUploadRegistry::connect(&config.job_store.database_url).await?);

        let queue = Arc::new(Queue::connect(&config.job_store.database_url).await);

        let template_registry = Arc::new(TemplateRegistry::new(config.templates_dir.clone()));

        let node_manager_config = config
            .distributed
            .as_ref()
            .map(|d| NodeManagerConfig {
                health_check_interval: Duration::from_secs(d.health_check_interval_secs),
                heartbeat_timeout: Duration::from_secs(d.heartbeat_timeout_secs),
            })
            .unwrap_or_default();
        let probe_timeout = config
            .distributed
            .as_ref()
            .map(|d| Duration::from_secs(d.health_check_timeout_secs))
            .unwrap_or_else(|| Duration::from_secs(5));
        let probe = Arc::new(HttpHealthProbe::new(probe_timeout));
        let node_manager = Arc::new(NodeManager::new(node_manager_config, probe));

        if fleet_mode {
            let dist = config.distributed.as_ref().expect("fleet_mode implies distributed is Some");
            for declared in &dist.static_nodes {
                let node_id = relay_ids::NodeId::new(declared.node_id.clone())?;
                let mut node = Node::new(node_id, declared.host.clone(), declared.port, declared.max_concurrent);
                node.capabilities = declared.capabilities.iter().copied().collect();
                node.metadata = declared
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                node_manager.register_node(node).await;
            }
        } else {
            let single = config
                .comfyui
                .as_ref()
                .expect("SystemConfig::validate rejects single-node mode without a comfyui section");
            let mut node = Node::new(
                relay_ids::NodeId::new("local").expect("the literal \"local\" is a valid node id"),
                single.host.clone(),
                single.port,
                1,
            );
            node.status = NodeStatus::Online;
            node_manager.register_node(node).await;
        }

        let load_balancer = Arc::new(LoadBalancer::new(
            config
                .distributed
                .as_ref()
                .map(|d| d.load_balancing_strategy)
                .unwrap_or_default(),
        ));

        let file_cache_ttl = config
            .distributed
            .as_ref()
            .map(|d| Duration::from_secs(d.file_cache_ttl_secs));
        let file_plane = Arc::new(FilePlane::new(
            Arc::clone(&uploads),
            config.uploads.root.clone(),
            Arc::clone(&node_manager),
            fleet_mode,
            config.auth.download_token_key.as_bytes().to_vec(),
            file_cache_ttl,
        ));

        let driver = Arc::new(ExecutionDriver {
            node_manager: Arc::clone(&node_manager),
            load_balancer: Arc::clone(&load_balancer),
            template_registry: Arc::clone(&template_registry),
            uploads: Arc::clone(&uploads),
            fleet_mode,
            download_token_key: config.auth.download_token_key.as_bytes().to_vec(),
            download_token_ttl_secs: config.auth.download_token_ttl_secs,
            public_base_url: config.public_base_url.clone(),
            node_select_timeout: Duration::from_secs(30),
            progress_flush_interval: Duration::from_millis(500),
        });

        let worker_pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&job_store),
            Arc::clone(&node_manager),
            Arc::clone(&template_registry),
            driver,
            config.queue.workers_per_kind,
        ));

        Ok(Arc::new(Core {
            config,
            node_manager,
            load_balancer,
            template_registry,
            queue,
            job_store,
            uploads,
            file_plane,
            worker_pool,
            fleet_mode,
        }))
    }

    /// Starts the Worker Pool's slots and the Node Manager's periodic
    /// health sweep. Separate from `build` so a caller can construct a
    /// `Core` for a one-shot diagnostic without starting any loops.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        self.worker_pool.spawn();
        self.node_manager.spawn_health_loop();
    }
}
