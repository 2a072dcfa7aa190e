use {
    super::tpu_proxy::{ProxyError, Result},
    solana_sdk::clock::DEFAULT_MS_PER_SLOT,
    std::{str::FromStr, time::Duration},
};

/// Default number of upcoming slots scanned when building the TPU fanout set
pub const DEFAULT_FANOUT_SLOTS: u64 = 64;

/// Maximum number of upcoming slots scanned when building the TPU fanout set
pub const MAX_FANOUT_SLOTS: u64 = 100;

/// Slots kept in the leader schedule window behind the current slot
pub const DEFAULT_PAST_SLOT_SEARCH: u64 = 16;

/// Slots fetched ahead of the current slot on every schedule refresh
pub const DEFAULT_SCHEDULE_LOOKAHEAD_SLOTS: u64 = 2 * MAX_FANOUT_SLOTS;

/// `getSlotLeaders` refuses ranges longer than this
pub const MAX_SCHEDULE_WINDOW_SLOTS: u64 = 5000;

pub const DEFAULT_FETCH_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_SLOT_POLL_MS: u64 = DEFAULT_MS_PER_SLOT / 2;
pub const DEFAULT_BLOCKHASH_REFRESH_MS: u64 = 2000;
pub const DEFAULT_NODE_REFRESH_SECS: u64 = 5 * 60;
pub const DEFAULT_MAX_POOLED_SOCKETS: usize = 64;

/// Config params for `TpuProxy`
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// The range of upcoming slots to include when determining which
    /// leaders to send transactions to (min: 1, max: `MAX_FANOUT_SLOTS`)
    pub fanout_slots: u64,
    pub past_slot_search: u64,
    pub schedule_lookahead_slots: u64,
    pub fetch_retry_delay: Duration,
    pub connect_retry_delay: Duration,
    pub slot_poll_interval: Duration,
    /// Blockhashes stay valid for ~150 slots, refreshing every few slots keeps
    /// the published value fresh without hammering the RPC node.
    pub blockhash_refresh_interval: Duration,
    /// Validators restart with new port configuration or join the cluster
    /// rarely, so the node directory is refreshed on a slow timer.
    pub node_refresh_interval: Duration,
    /// Released sockets beyond this count are closed instead of pooled
    pub max_pooled_sockets: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            fanout_slots: DEFAULT_FANOUT_SLOTS,
            past_slot_search: DEFAULT_PAST_SLOT_SEARCH,
            schedule_lookahead_slots: DEFAULT_SCHEDULE_LOOKAHEAD_SLOTS,
            fetch_retry_delay: Duration::from_millis(DEFAULT_FETCH_RETRY_DELAY_MS),
            connect_retry_delay: Duration::from_millis(DEFAULT_CONNECT_RETRY_DELAY_MS),
            slot_poll_interval: Duration::from_millis(DEFAULT_SLOT_POLL_MS),
            blockhash_refresh_interval: Duration::from_millis(DEFAULT_BLOCKHASH_REFRESH_MS),
            node_refresh_interval: Duration::from_secs(DEFAULT_NODE_REFRESH_SECS),
            max_pooled_sockets: DEFAULT_MAX_POOLED_SOCKETS,
        }
    }
}

impl ProxyConfig {
    /// Overlay `TPU_PROXY_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(slots) = parse_var(&lookup, "TPU_PROXY_FANOUT_SLOTS")? {
            config.fanout_slots = slots;
        }
        if let Some(slots) = parse_var(&lookup, "TPU_PROXY_PAST_SLOTS")? {
            config.past_slot_search = slots;
        }
        if let Some(slots) = parse_var(&lookup, "TPU_PROXY_SCHEDULE_LOOKAHEAD_SLOTS")? {
            config.schedule_lookahead_slots = slots;
        }
        if let Some(ms) = parse_var(&lookup, "TPU_PROXY_SLOT_POLL_MS")? {
            config.slot_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "TPU_PROXY_BLOCKHASH_REFRESH_MS")? {
            config.blockhash_refresh_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, "TPU_PROXY_NODE_REFRESH_SECS")? {
            config.node_refresh_interval = Duration::from_secs(secs);
        }
        if let Some(count) = parse_var(&lookup, "TPU_PROXY_MAX_POOLED_SOCKETS")? {
            config.max_pooled_sockets = count;
        }
        config.validated()
    }

    /// Clamp the fanout and reject windows the schedule cannot serve.
    pub fn validated(mut self) -> Result<Self> {
        self.fanout_slots = self.fanout_slots.clamp(1, MAX_FANOUT_SLOTS);
        if self.schedule_lookahead_slots <= self.fanout_slots {
            return Err(ProxyError::InvalidConfig(format!(
                "schedule lookahead ({}) must exceed fanout slots ({})",
                self.schedule_lookahead_slots, self.fanout_slots
            )));
        }
        if self
            .past_slot_search
            .checked_add(self.schedule_lookahead_slots)
            .filter(|window| *window <= MAX_SCHEDULE_WINDOW_SLOTS)
            .is_none()
        {
            return Err(ProxyError::InvalidConfig(format!(
                "schedule window of {} past and {} upcoming slots exceeds {}",
                self.past_slot_search, self.schedule_lookahead_slots, MAX_SCHEDULE_WINDOW_SLOTS
            )));
        }
        if self.slot_poll_interval.is_zero()
            || self.blockhash_refresh_interval.is_zero()
            || self.node_refresh_interval.is_zero()
        {
            return Err(ProxyError::InvalidConfig(
                "poll and refresh intervals must be non-zero".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|err| ProxyError::InvalidConfig(format!("{key}={value}: {err}")))
        })
        .transpose()
}
