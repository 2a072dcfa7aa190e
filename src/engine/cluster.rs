use {
    async_trait::async_trait,
    solana_rpc_client::nonblocking::rpc_client::RpcClient,
    solana_rpc_client_api::{client_error::Result as ClientResult, response::RpcContactInfo},
    solana_sdk::{clock::Slot, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey},
    std::{collections::HashMap, net::SocketAddr, str::FromStr},
};

/// A cluster node as seen by the proxy: its identity and, when advertised,
/// the UDP address of its transaction ingestion (TPU) port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterNode {
    pub pubkey: Pubkey,
    pub tpu: Option<SocketAddr>,
}

impl ClusterNode {
    fn from_contact_info(contact_info: RpcContactInfo) -> Option<Self> {
        let pubkey = Pubkey::from_str(&contact_info.pubkey).ok()?;
        Some(Self {
            pubkey,
            tpu: contact_info.tpu,
        })
    }
}

/// Cluster queries the proxy depends on. Every call is idempotent and safe to
/// retry.
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    async fn get_slot(&self, commitment: CommitmentConfig) -> ClientResult<Slot>;

    async fn get_latest_blockhash(&self) -> ClientResult<Hash>;

    async fn get_cluster_nodes(&self) -> ClientResult<Vec<ClusterNode>>;

    /// Leader assignments for up to `limit` consecutive slots starting at
    /// `start_slot`
    async fn get_leader_schedule(
        &self,
        start_slot: Slot,
        limit: u64,
    ) -> ClientResult<HashMap<Slot, Pubkey>>;
}

#[async_trait]
impl ClusterClient for RpcClient {
    async fn get_slot(&self, commitment: CommitmentConfig) -> ClientResult<Slot> {
        self.get_slot_with_commitment(commitment).await
    }

    async fn get_latest_blockhash(&self) -> ClientResult<Hash> {
        RpcClient::get_latest_blockhash(self).await
    }

    async fn get_cluster_nodes(&self) -> ClientResult<Vec<ClusterNode>> {
        let nodes = RpcClient::get_cluster_nodes(self).await?;
        Ok(nodes
            .into_iter()
            .filter_map(ClusterNode::from_contact_info)
            .collect())
    }

    async fn get_leader_schedule(
        &self,
        start_slot: Slot,
        limit: u64,
    ) -> ClientResult<HashMap<Slot, Pubkey>> {
        let leaders = self.get_slot_leaders(start_slot, limit).await?;
        Ok((start_slot..).zip(leaders).collect())
    }
}
