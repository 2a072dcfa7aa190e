use {
    super::{
        blockhash::BlockhashCache,
        cluster::ClusterClient,
        config::ProxyConfig,
        leader_schedule::LeaderSchedule,
        node_directory::NodeDirectory,
        retry::endless_retry,
        slot_tracker::SlotTracker,
        socket_pool::{SocketPool, TpuTransport, UdpTransport},
    },
    async_lock::Mutex,
    log::*,
    solana_measure::measure::Measure,
    solana_rpc_client::nonblocking::rpc_client::RpcClient,
    solana_sdk::{clock::Slot, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey},
    std::{
        collections::HashSet,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, RwLock,
        },
    },
    thiserror::Error,
    tokio::{
        task::JoinHandle,
        time::{sleep, Duration},
    },
    tokio_stream::StreamExt,
};

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0:?}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Outcome of the latest address reconciliation, replaced as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyState {
    pub slot: Slot,
    /// TPU addresses of upcoming leaders, earliest leader first
    pub tpu_addresses: Vec<SocketAddr>,
    /// Upcoming leaders with a known TPU address
    pub tpu_keys: HashSet<Pubkey>,
    pub cur_blockhash: Hash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// No live socket, the transaction was not sent
    Dropped,
    /// Written to `fanout` sockets. Individual writes may still have failed.
    Forwarded { fanout: usize },
}

/// Forwards wire transactions over UDP to the TPU ports of the current and
/// upcoming leaders, tracking the leader schedule as slots advance.
pub struct TpuProxy<C: ClusterClient = RpcClient, T: TpuTransport = UdpTransport> {
    core: Arc<ProxyCore<C, T>>,
    exit: Arc<AtomicBool>,
    t_slot_handler: Option<JoinHandle<()>>,
}

impl<C: ClusterClient> TpuProxy<C, UdpTransport> {
    pub async fn create(cluster: Arc<C>, config: ProxyConfig) -> Result<Self> {
        Self::create_with_transport(cluster, UdpTransport, config).await
    }
}

impl<C: ClusterClient, T: TpuTransport> TpuProxy<C, T> {
    /// Start every tracking service, reconcile once for the current slot and
    /// keep reconciling on each slot advance.
    pub async fn create_with_transport(
        cluster: Arc<C>,
        transport: T,
        config: ProxyConfig,
    ) -> Result<Self> {
        let config = config.validated()?;
        let exit = Arc::new(AtomicBool::new(false));

        let current_slot = endless_retry("getSlot", config.fetch_retry_delay, || {
            cluster.get_slot(CommitmentConfig::processed())
        })
        .await;
        info!("Starting TPU proxy at slot {}", current_slot);

        let (core, schedule) = ProxyCore::start(
            cluster.clone(),
            transport,
            &config,
            current_slot,
            exit.clone(),
        )
        .await;
        core.refresh_addresses(&schedule, current_slot);
        core.connect().await;

        let tracker = SlotTracker::new(
            cluster.clone(),
            current_slot,
            config.slot_poll_interval,
            config.fetch_retry_delay,
            exit.clone(),
        );
        let t_slot_handler = tokio::spawn(Self::run_slot_handler(
            core.clone(),
            cluster,
            schedule,
            tracker,
        ));

        Ok(Self {
            core,
            exit,
            t_slot_handler: Some(t_slot_handler),
        })
    }

    pub fn connected(&self) -> bool {
        self.core.connected()
    }

    /// Number of live TPU sockets
    pub fn active_proxies(&self) -> usize {
        self.core.active_proxies()
    }

    pub async fn connect(&self) {
        self.core.connect().await
    }

    /// Fire-and-forget broadcast of `wire_transaction` to every live socket.
    /// Without a live socket the transaction is dropped and a reconnect is
    /// started in the background.
    pub async fn send_raw_transaction(&self, wire_transaction: &[u8]) -> SendStatus {
        self.core.send_raw_transaction(wire_transaction).await
    }

    pub fn state(&self) -> ProxyState {
        self.core.state()
    }

    pub fn current_slot(&self) -> Slot {
        self.core.state.read().unwrap().slot
    }

    pub fn current_blockhash(&self) -> Hash {
        self.core.state.read().unwrap().cur_blockhash
    }

    pub async fn shutdown(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
        if let Some(t_slot_handler) = self.t_slot_handler.take() {
            if let Err(err) = t_slot_handler.await {
                warn!("Slot handler ended abnormally: {}", err);
            }
        }
        self.core.node_directory.join().await;
        self.core.blockhash_cache.join().await;
    }

    async fn run_slot_handler(
        core: Arc<ProxyCore<C, T>>,
        cluster: Arc<C>,
        mut schedule: LeaderSchedule,
        tracker: SlotTracker<C>,
    ) {
        let slots = tracker.into_stream();
        tokio::pin!(slots);
        while let Some(slot) = slots.next().await {
            if schedule.should_refresh(slot) {
                schedule.refresh(cluster.as_ref(), slot).await;
            }
            core.refresh_addresses(&schedule, slot);
            core.connect().await;
        }
        debug!("Slot handler stopped");
    }
}

impl<C: ClusterClient, T: TpuTransport> Drop for TpuProxy<C, T> {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
    }
}

/// State shared between the slot handler, background connects and senders.
struct ProxyCore<C: ClusterClient, T: TpuTransport> {
    node_directory: Arc<NodeDirectory>,
    blockhash_cache: Arc<BlockhashCache<C>>,
    state: RwLock<ProxyState>,
    pool: Mutex<SocketPool<T>>,
    active: AtomicUsize,
    connecting: AtomicBool,
    connect_attempts: AtomicUsize,
    connect_retry_delay: Duration,
    exit: Arc<AtomicBool>,
}

impl<C: ClusterClient, T: TpuTransport> ProxyCore<C, T> {
    async fn start(
        cluster: Arc<C>,
        transport: T,
        config: &ProxyConfig,
        current_slot: Slot,
        exit: Arc<AtomicBool>,
    ) -> (Arc<Self>, LeaderSchedule) {
        let node_directory = NodeDirectory::start(
            cluster.clone(),
            config.node_refresh_interval,
            config.fetch_retry_delay,
            exit.clone(),
        )
        .await;
        let blockhash_cache = BlockhashCache::start(
            cluster.clone(),
            config.blockhash_refresh_interval,
            config.fetch_retry_delay,
            exit.clone(),
        )
        .await;
        let schedule = LeaderSchedule::start(
            cluster.as_ref(),
            current_slot,
            config.past_slot_search,
            config.schedule_lookahead_slots,
            config.fanout_slots,
            config.fetch_retry_delay,
        )
        .await;

        let core = Arc::new(Self {
            node_directory,
            blockhash_cache,
            state: RwLock::new(ProxyState::default()),
            pool: Mutex::new(SocketPool::new(transport, config.max_pooled_sockets)),
            active: AtomicUsize::new(0),
            connecting: AtomicBool::new(false),
            connect_attempts: AtomicUsize::new(0),
            connect_retry_delay: config.connect_retry_delay,
            exit,
        });
        (core, schedule)
    }

    fn connected(&self) -> bool {
        self.active_proxies() > 0
    }

    fn active_proxies(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn state(&self) -> ProxyState {
        self.state.read().unwrap().clone()
    }

    /// Resolve the TPU addresses of the leaders of the next `fanout_slots`
    /// slots and publish them with the current blockhash.
    fn refresh_addresses(&self, schedule: &LeaderSchedule, current_slot: Slot) {
        let mut measure = Measure::start("refresh_addresses");
        let mut tpu_addresses = Vec::new();
        let mut tpu_keys = HashSet::new();
        let mut seen_addresses = HashSet::new();

        for leader in schedule.upcoming_leaders(current_slot) {
            match self.node_directory.tpu_address(&leader) {
                Some(tpu_address) => {
                    tpu_keys.insert(leader);
                    if seen_addresses.insert(tpu_address) {
                        tpu_addresses.push(tpu_address);
                    }
                }
                None => {
                    // The leader is probably delinquent
                    if self.node_directory.mark_delinquent(&leader) {
                        warn!("No TPU found for leader {}", leader);
                    }
                }
            }
        }

        let state = ProxyState {
            slot: current_slot,
            tpu_addresses,
            tpu_keys,
            cur_blockhash: self.blockhash_cache.blockhash(),
        };
        measure.stop();
        debug!(
            "Slot {}: {} upcoming TPU addresses, took {}us",
            current_slot,
            state.tpu_addresses.len(),
            measure.as_us()
        );
        *self.state.write().unwrap() = state;
    }

    /// Reconcile sockets against the published addresses until at least one
    /// is live. Concurrent calls return immediately.
    async fn connect(&self) {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return;
        }
        self.run_connect_loop().await;
    }

    fn trigger_connect(self: &Arc<Self>) {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let core = self.clone();
        tokio::spawn(async move { core.run_connect_loop().await });
    }

    async fn run_connect_loop(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        loop {
            match self.reconnect().await {
                Ok(live) if live > 0 => break,
                Ok(_) => {
                    if self.state.read().unwrap().tpu_addresses.is_empty() {
                        // Nothing to connect to until the next slot reconciles
                        break;
                    }
                }
                Err(err) => warn!("TPU proxy failed to connect, reconnecting: {}", err),
            }
            if self.exit.load(Ordering::Relaxed) {
                break;
            }
            sleep(self.connect_retry_delay).await;
        }
        self.connecting.store(false, Ordering::Release);
    }

    async fn reconnect(&self) -> Result<usize> {
        let tpu_addresses = self.state.read().unwrap().tpu_addresses.clone();
        let mut pool = self.pool.lock().await;
        let result = pool.reconcile(&tpu_addresses).await;
        self.active.store(pool.len(), Ordering::Relaxed);
        let live = result?;
        if live == 0 {
            warn!("No TPU sockets connected, not forwarding packets");
        } else {
            trace!("{} TPU port(s) connected", live);
        }
        Ok(live)
    }

    async fn send_raw_transaction(self: &Arc<Self>, wire_transaction: &[u8]) -> SendStatus {
        if !self.connected() {
            self.trigger_connect();
            return SendStatus::Dropped;
        }
        let mut pool = self.pool.lock().await;
        if pool.is_empty() {
            // Emptied since the check above
            drop(pool);
            self.active.store(0, Ordering::Relaxed);
            self.trigger_connect();
            return SendStatus::Dropped;
        }
        let fanout = pool.broadcast(wire_transaction).await;
        self.active.store(pool.len(), Ordering::Relaxed);
        SendStatus::Forwarded { fanout }
    }
}
