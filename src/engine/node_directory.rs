use {
    super::{
        cluster::{ClusterClient, ClusterNode},
        retry::{endless_retry, sleep_unless_exit},
    },
    log::*,
    solana_sdk::pubkey::Pubkey,
    std::{
        collections::{HashMap, HashSet},
        net::SocketAddr,
        sync::{
            atomic::AtomicBool,
            Arc, Mutex, RwLock,
        },
    },
    tokio::{task::JoinHandle, time::Duration},
};

#[derive(Default)]
struct NodeSnapshot {
    nodes: HashMap<Pubkey, SocketAddr>,
    // Identities looked up in this snapshot and found without a TPU address
    delinquents: HashSet<Pubkey>,
}

/// Periodically refreshed mapping of validator identity to TPU address.
pub struct NodeDirectory {
    snapshot: RwLock<NodeSnapshot>,
    t_refresher: Mutex<Option<JoinHandle<()>>>,
}

impl NodeDirectory {
    pub fn new(cluster_nodes: Vec<ClusterNode>) -> Self {
        Self {
            snapshot: RwLock::new(NodeSnapshot {
                nodes: Self::extract_tpu_sockets(cluster_nodes),
                delinquents: HashSet::new(),
            }),
            t_refresher: Mutex::new(None),
        }
    }

    /// Fetch the node list (retrying until the cluster answers) and keep it
    /// fresh every `refresh_interval` until `exit` is set.
    pub async fn start<C: ClusterClient>(
        cluster: Arc<C>,
        refresh_interval: Duration,
        retry_delay: Duration,
        exit: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let cluster_nodes = Self::fetch(cluster.as_ref(), retry_delay).await;
        let directory = Arc::new(Self::new(cluster_nodes));
        info!("Node directory started with {} TPU nodes", directory.len());

        let t_refresher = tokio::spawn(Self::run_refresher(
            directory.clone(),
            cluster,
            refresh_interval,
            retry_delay,
            exit,
        ));
        *directory.t_refresher.lock().unwrap() = Some(t_refresher);
        directory
    }

    pub async fn join(&self) {
        let t_refresher = self.t_refresher.lock().unwrap().take();
        if let Some(t_refresher) = t_refresher {
            if let Err(err) = t_refresher.await {
                warn!("Node directory refresher ended abnormally: {}", err);
            }
        }
    }

    pub fn tpu_address(&self, pubkey: &Pubkey) -> Option<SocketAddr> {
        self.snapshot.read().unwrap().nodes.get(pubkey).copied()
    }

    /// Record `pubkey` as unresolvable in the current snapshot. Returns `true`
    /// the first time an identity is recorded.
    pub fn mark_delinquent(&self, pubkey: &Pubkey) -> bool {
        self.snapshot.write().unwrap().delinquents.insert(*pubkey)
    }

    pub fn is_delinquent(&self, pubkey: &Pubkey) -> bool {
        self.snapshot.read().unwrap().delinquents.contains(pubkey)
    }

    pub fn delinquents(&self) -> HashSet<Pubkey> {
        self.snapshot.read().unwrap().delinquents.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().unwrap().nodes.len()
    }

    /// Swap in a new snapshot. Nothing carries over from the previous one,
    /// including the delinquent set.
    pub fn replace(&self, cluster_nodes: Vec<ClusterNode>) {
        let snapshot = NodeSnapshot {
            nodes: Self::extract_tpu_sockets(cluster_nodes),
            delinquents: HashSet::new(),
        };
        *self.snapshot.write().unwrap() = snapshot;
    }

    pub async fn refresh<C: ClusterClient>(&self, cluster: &C, retry_delay: Duration) {
        let cluster_nodes = Self::fetch(cluster, retry_delay).await;
        self.replace(cluster_nodes);
        debug!("Node directory refreshed, {} TPU nodes", self.len());
    }

    async fn fetch<C: ClusterClient>(cluster: &C, retry_delay: Duration) -> Vec<ClusterNode> {
        endless_retry("getClusterNodes", retry_delay, || cluster.get_cluster_nodes()).await
    }

    async fn run_refresher<C: ClusterClient>(
        directory: Arc<Self>,
        cluster: Arc<C>,
        refresh_interval: Duration,
        retry_delay: Duration,
        exit: Arc<AtomicBool>,
    ) {
        while sleep_unless_exit(refresh_interval, &exit).await {
            directory.refresh(cluster.as_ref(), retry_delay).await;
        }
    }

    fn extract_tpu_sockets(cluster_nodes: Vec<ClusterNode>) -> HashMap<Pubkey, SocketAddr> {
        cluster_nodes
            .into_iter()
            .filter_map(|node| Some((node.pubkey, node.tpu?)))
            .collect()
    }
}
