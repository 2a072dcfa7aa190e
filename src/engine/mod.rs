pub mod blockhash;
pub mod cluster;
pub mod config;
pub mod leader_schedule;
pub mod node_directory;
pub mod retry;
pub mod slot_tracker;
pub mod socket_pool;
pub mod tpu_proxy;

pub use {
    cluster::{ClusterClient, ClusterNode},
    config::ProxyConfig,
    socket_pool::{TpuSocket, TpuTransport, UdpTransport},
    tpu_proxy::{ProxyError, ProxyState, Result, SendStatus, TpuProxy},
};
