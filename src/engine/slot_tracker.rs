use {
    super::{cluster::ClusterClient, retry::endless_retry},
    futures_util::stream::{self, Stream},
    log::*,
    solana_sdk::{clock::Slot, commitment_config::CommitmentConfig},
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    tokio::time::{sleep, Duration},
};

/// Polls the cluster for the processed slot and yields every advance.
///
/// Polling only happens while the consumer waits on [`SlotTracker::next_slot`],
/// so a consumer that handles one slot at a time is never overtaken.
pub struct SlotTracker<C> {
    cluster: Arc<C>,
    last_slot: Slot,
    poll_interval: Duration,
    retry_delay: Duration,
    exit: Arc<AtomicBool>,
}

impl<C: ClusterClient> SlotTracker<C> {
    pub fn new(
        cluster: Arc<C>,
        start_slot: Slot,
        poll_interval: Duration,
        retry_delay: Duration,
        exit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cluster,
            last_slot: start_slot,
            poll_interval,
            retry_delay,
            exit,
        }
    }

    pub fn last_slot(&self) -> Slot {
        self.last_slot
    }

    /// Wait for the next slot greater than the last one yielded. Returns
    /// `None` once `exit` is set. Repeated or lagging slots are swallowed.
    pub async fn next_slot(&mut self) -> Option<Slot> {
        while !self.exit.load(Ordering::Relaxed) {
            sleep(self.poll_interval).await;
            if self.exit.load(Ordering::Relaxed) {
                break;
            }

            let cluster = self.cluster.as_ref();
            let slot = endless_retry("getSlot", self.retry_delay, || {
                cluster.get_slot(CommitmentConfig::processed())
            })
            .await;
            if slot > self.last_slot {
                trace!("Slot advanced {} -> {}", self.last_slot, slot);
                self.last_slot = slot;
                return Some(slot);
            }
        }
        None
    }

    pub fn into_stream(self) -> impl Stream<Item = Slot> + Send {
        stream::unfold(self, |mut tracker| async move {
            let slot = tracker.next_slot().await?;
            Some((slot, tracker))
        })
    }
}
