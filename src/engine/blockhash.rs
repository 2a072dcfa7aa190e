use {
    super::{
        cluster::ClusterClient,
        retry::{endless_retry, sleep_unless_exit},
    },
    log::*,
    solana_sdk::hash::Hash,
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    tokio::{task::JoinHandle, time::Duration},
};

/// Holds the most recently fetched blockhash and keeps it fresh.
pub struct BlockhashCache<C> {
    cluster: Arc<C>,
    blockhash: RwLock<Hash>,
    refreshing: AtomicBool,
    retry_delay: Duration,
    t_refresher: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ClusterClient> BlockhashCache<C> {
    /// Fetch the latest blockhash (retrying until the cluster answers) and
    /// refresh it every `refresh_interval` until `exit` is set.
    pub async fn start(
        cluster: Arc<C>,
        refresh_interval: Duration,
        retry_delay: Duration,
        exit: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let blockhash = Self::fetch(cluster.as_ref(), retry_delay).await;
        info!("Blockhash cache started at {}", blockhash);
        let cache = Arc::new(Self {
            cluster,
            blockhash: RwLock::new(blockhash),
            refreshing: AtomicBool::new(false),
            retry_delay,
            t_refresher: Mutex::new(None),
        });

        let t_refresher = tokio::spawn(Self::run_refresher(cache.clone(), refresh_interval, exit));
        *cache.t_refresher.lock().unwrap() = Some(t_refresher);
        cache
    }

    pub fn blockhash(&self) -> Hash {
        *self.blockhash.read().unwrap()
    }

    /// Fetch and publish a new blockhash. Does nothing while another refresh
    /// is in flight. Returns whether this call performed the refresh.
    pub async fn refresh(&self) -> bool {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let blockhash = Self::fetch(self.cluster.as_ref(), self.retry_delay).await;
        *self.blockhash.write().unwrap() = blockhash;
        self.refreshing.store(false, Ordering::Release);
        trace!("Blockhash refreshed to {}", blockhash);
        true
    }

    pub async fn join(&self) {
        let t_refresher = self.t_refresher.lock().unwrap().take();
        if let Some(t_refresher) = t_refresher {
            if let Err(err) = t_refresher.await {
                warn!("Blockhash refresher ended abnormally: {}", err);
            }
        }
    }

    async fn fetch(cluster: &C, retry_delay: Duration) -> Hash {
        endless_retry("getLatestBlockhash", retry_delay, || {
            cluster.get_latest_blockhash()
        })
        .await
    }

    async fn run_refresher(cache: Arc<Self>, refresh_interval: Duration, exit: Arc<AtomicBool>) {
        while sleep_unless_exit(refresh_interval, &exit).await {
            cache.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::engine::cluster::mock::MockCluster,
        tokio::time::{sleep, Instant},
    };

    const REFRESH: Duration = Duration::from_secs(2);
    const RETRY: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn test_start_serves_initial_blockhash() {
        let cluster = Arc::new(MockCluster::new(0));
        let expected = *cluster.blockhash.read().unwrap();
        let exit = Arc::new(AtomicBool::new(true));

        let cache = BlockhashCache::start(cluster, REFRESH, RETRY, exit).await;
        assert_eq!(cache.blockhash(), expected);
        cache.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_publishes_new_blockhash() {
        let cluster = Arc::new(MockCluster::new(0));
        let exit = Arc::new(AtomicBool::new(false));
        let cache = BlockhashCache::start(cluster.clone(), REFRESH, RETRY, exit.clone()).await;

        let next = Hash::new_unique();
        *cluster.blockhash.write().unwrap() = next;
        assert_ne!(cache.blockhash(), next);

        sleep(REFRESH + Duration::from_millis(1)).await;
        assert_eq!(cache.blockhash(), next);

        exit.store(true, Ordering::Relaxed);
        cache.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_refresh_is_skipped() {
        let cluster = Arc::new(MockCluster::new(0));
        let exit = Arc::new(AtomicBool::new(true));
        let cache = BlockhashCache::start(cluster.clone(), REFRESH, RETRY, exit).await;
        cache.join().await;

        // The first refresh parks in the retry delay while the cluster fails
        cluster.fail_next(1);
        let next = Hash::new_unique();
        *cluster.blockhash.write().unwrap() = next;

        let (first, second) = tokio::join!(cache.refresh(), cache.refresh());
        assert!(first);
        assert!(!second);
        assert_eq!(cache.blockhash(), next);
        // one initial fetch, one failed attempt, one successful retry
        assert_eq!(cluster.blockhash_calls.load(Ordering::Relaxed), 3);

        // The flag is cleared once the refresh completes
        assert!(cache.refresh().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_returns_soon_after_exit() {
        let cluster = Arc::new(MockCluster::new(0));
        let exit = Arc::new(AtomicBool::new(false));
        let cache =
            BlockhashCache::start(cluster.clone(), Duration::from_secs(60), RETRY, exit.clone())
                .await;
        sleep(Duration::from_secs(1)).await;

        let start = Instant::now();
        exit.store(true, Ordering::Relaxed);
        cache.join().await;
        assert!(start.elapsed() <= Duration::from_millis(100));
        assert_eq!(cluster.blockhash_calls.load(Ordering::Relaxed), 1);
    }
}
