use {
    super::{cluster::ClusterClient, retry::endless_retry},
    log::*,
    solana_sdk::{clock::Slot, pubkey::Pubkey},
    std::collections::{HashMap, HashSet},
    tokio::time::Duration,
};

/// Cached slot leaders for the window `[start_slot, end_slot)` around the
/// tracked slot.
pub struct LeaderSchedule {
    start_slot: Slot,
    end_slot: Slot,
    leaders: HashMap<Slot, Pubkey>,
    past_slot_search: u64,
    lookahead_slots: u64,
    fanout_slots: u64,
    retry_delay: Duration,
}

impl LeaderSchedule {
    pub async fn start<C: ClusterClient>(
        cluster: &C,
        current_slot: Slot,
        past_slot_search: u64,
        lookahead_slots: u64,
        fanout_slots: u64,
        retry_delay: Duration,
    ) -> Self {
        let mut schedule = Self {
            start_slot: 0,
            end_slot: 0,
            leaders: HashMap::new(),
            past_slot_search,
            lookahead_slots,
            fanout_slots,
            retry_delay,
        };
        schedule.refresh(cluster, current_slot).await;
        schedule
    }

    pub fn start_slot(&self) -> Slot {
        self.start_slot
    }

    pub fn end_slot(&self) -> Slot {
        self.end_slot
    }

    /// True once `current_slot` has left the window or the next
    /// `fanout_slots` slots would overrun its end.
    pub fn should_refresh(&self, current_slot: Slot) -> bool {
        current_slot < self.start_slot
            || current_slot.saturating_add(self.fanout_slots) >= self.end_slot
    }

    /// Re-fetch the whole window around `current_slot`, retrying until the
    /// cluster answers.
    pub async fn refresh<C: ClusterClient>(&mut self, cluster: &C, current_slot: Slot) {
        let start_slot = current_slot.saturating_sub(self.past_slot_search);
        let end_slot = current_slot.saturating_add(self.lookahead_slots);
        let limit = end_slot - start_slot;
        let leaders = endless_retry("getLeaderSchedule", self.retry_delay, || {
            cluster.get_leader_schedule(start_slot, limit)
        })
        .await;
        self.replace(start_slot, end_slot, leaders);
        debug!(
            "Leader schedule refreshed for slots [{},{}), {} assignments",
            self.start_slot,
            self.end_slot,
            self.leaders.len()
        );
    }

    pub fn get_slot_leader(&self, slot: Slot) -> Option<&Pubkey> {
        if (self.start_slot..self.end_slot).contains(&slot) {
            self.leaders.get(&slot)
        } else {
            None
        }
    }

    /// Distinct leaders of `[current_slot, current_slot + fanout_slots)` in
    /// the order of their first slot. Slots with an unknown leader are skipped.
    pub fn upcoming_leaders(&self, current_slot: Slot) -> Vec<Pubkey> {
        let mut seen = HashSet::new();
        let mut leaders = Vec::new();
        for leader_slot in current_slot..current_slot.saturating_add(self.fanout_slots) {
            match self.get_slot_leader(leader_slot) {
                Some(leader) => {
                    if seen.insert(*leader) {
                        leaders.push(*leader);
                    }
                }
                None => trace!(
                    "Leader not known for slot {}; cache holds slots [{},{})",
                    leader_slot,
                    self.start_slot,
                    self.end_slot
                ),
            }
        }
        leaders
    }

    fn replace(&mut self, start_slot: Slot, end_slot: Slot, mut leaders: HashMap<Slot, Pubkey>) {
        leaders.retain(|slot, _| (start_slot..end_slot).contains(slot));
        self.start_slot = start_slot;
        self.end_slot = end_slot;
        self.leaders = leaders;
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::engine::cluster::mock::MockCluster,
        std::sync::atomic::Ordering,
    };

    const RETRY: Duration = Duration::from_millis(500);

    async fn schedule_for(
        cluster: &MockCluster,
        current_slot: Slot,
        past: u64,
        lookahead: u64,
        fanout: u64,
    ) -> LeaderSchedule {
        LeaderSchedule::start(cluster, current_slot, past, lookahead, fanout, RETRY).await
    }

    #[tokio::test]
    async fn test_window_bounds_lookup() {
        let leader = Pubkey::new_unique();
        let cluster = MockCluster::new(100);
        *cluster.default_leader.write().unwrap() = Some(leader);

        let schedule = schedule_for(&cluster, 100, 10, 50, 20).await;
        assert_eq!(schedule.start_slot(), 90);
        assert_eq!(schedule.end_slot(), 150);
        assert_eq!(*cluster.schedule_calls.read().unwrap(), vec![(90, 60)]);

        assert_eq!(schedule.get_slot_leader(89), None);
        assert_eq!(schedule.get_slot_leader(90), Some(&leader));
        assert_eq!(schedule.get_slot_leader(149), Some(&leader));
        assert_eq!(schedule.get_slot_leader(150), None);
    }

    #[tokio::test]
    async fn test_window_start_saturates_at_genesis() {
        let cluster = MockCluster::new(3);
        let schedule = schedule_for(&cluster, 3, 10, 50, 20).await;
        assert_eq!(schedule.start_slot(), 0);
        assert_eq!(schedule.end_slot(), 53);
    }

    #[test]
    fn test_assignments_outside_window_are_dropped() {
        let leader = Pubkey::new_unique();
        let mut schedule = LeaderSchedule {
            start_slot: 0,
            end_slot: 0,
            leaders: HashMap::new(),
            past_slot_search: 0,
            lookahead_slots: 10,
            fanout_slots: 5,
            retry_delay: RETRY,
        };
        schedule.replace(10, 20, (5..25).map(|slot| (slot, leader)).collect());
        assert_eq!(schedule.leaders.len(), 10);
        assert!(schedule.leaders.keys().all(|slot| (10..20).contains(slot)));
    }

    #[tokio::test]
    async fn test_should_refresh_before_window_end() {
        let cluster = MockCluster::new(1000);
        let schedule = schedule_for(&cluster, 1000, 16, 200, 64).await;
        let end_slot = schedule.end_slot();

        assert!(!schedule.should_refresh(1000));
        assert!(schedule.should_refresh(999 - 16));

        // For any monotonic walk the refresh triggers strictly before `end_slot`
        let first_refresh = (1000..=end_slot)
            .find(|slot| schedule.should_refresh(*slot))
            .unwrap();
        assert!(first_refresh < end_slot);
        assert_eq!(first_refresh, end_slot - 64);
        assert!((first_refresh..=end_slot + 10).all(|slot| schedule.should_refresh(slot)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_recenters_window() {
        let cluster = MockCluster::new(100);
        let (l1, l2) = (Pubkey::new_unique(), Pubkey::new_unique());
        cluster.set_leaders(&[(100, l1), (300, l2)]);

        let mut schedule = schedule_for(&cluster, 100, 10, 200, 20).await;
        assert_eq!(schedule.get_slot_leader(100), Some(&l1));
        assert_eq!(schedule.get_slot_leader(300), None);

        cluster.fail_next(1);
        schedule.refresh(&cluster, 290).await;
        assert_eq!(schedule.start_slot(), 280);
        assert_eq!(schedule.end_slot(), 490);
        assert_eq!(schedule.get_slot_leader(100), None);
        assert_eq!(schedule.get_slot_leader(300), Some(&l2));
        assert_eq!(cluster.schedule_calls.read().unwrap().len(), 3);
        assert_eq!(cluster.failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_upcoming_leaders_keep_first_occurrence_order() {
        let cluster = MockCluster::new(10);
        let (l1, l2, l3) = (
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        );
        cluster.set_leaders(&[
            (10, l3),
            (11, l1),
            (12, l3),
            (13, l2),
            (14, l1),
            (15, l2),
        ]);
        let schedule = schedule_for(&cluster, 10, 5, 50, 6).await;
        assert_eq!(schedule.upcoming_leaders(10), vec![l3, l1, l2]);
        assert_eq!(schedule.upcoming_leaders(12), vec![l3, l2, l1]);
    }

    #[tokio::test]
    async fn test_upcoming_leaders_skip_unknown_slots() {
        let cluster = MockCluster::new(10);
        let (l1, l2) = (Pubkey::new_unique(), Pubkey::new_unique());
        cluster.set_leaders(&[(10, l1), (13, l2)]);
        let schedule = schedule_for(&cluster, 10, 0, 4, 8).await;

        // Slots 11, 12 have no assignment and 14..18 are past the window end
        assert_eq!(schedule.upcoming_leaders(10), vec![l1, l2]);
    }
}
