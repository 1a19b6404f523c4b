//! The admin client: control-plane operations against Strata nodes.
//!
//! Intended for administrative work that is useful and often needed, but
//! used sparingly at the application level: bulk extraction and loading of
//! entries, partition migration, and per-node metadata management. Every
//! operation borrows a pooled connection to the target node's admin port,
//! ships one typed request, and interprets the response; bulk operations
//! stream over the same connection until the end-of-stream marker.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use prost::Message;
use tokio::time;

use crate::cluster::{ClusterDescriptor, NodeId};
use crate::config::AdminClientConfig;
use crate::error::AdminError;
use crate::filter::{self, StreamFilter};
use crate::metadata::{self, MetadataKey, ServerState, StoreDefinition};
use crate::pool::{Destination, PoolStats, SocketPool};
use crate::proto;
use crate::stream::{EntryStream, FetchStream, KeyStream};
use crate::versioning::{PartitionEntry, Versioned};

/// First delay between async status polls.
const INITIAL_POLL_DELAY: Duration = Duration::from_millis(250);
/// The poll delay stops growing once it has passed this bound.
const MAX_POLL_DELAY: Duration = Duration::from_secs(60);

/// Poll delay grows by a factor of four, not two: deep backoff is reached
/// after three polls, keeping status polling sparse on long migrations.
/// Deployed nodes expect this schedule.
fn next_poll_delay(delay: Duration) -> Duration {
    if delay < MAX_POLL_DELAY {
        delay.saturating_mul(4)
    } else {
        delay
    }
}

/// Status snapshot of a background operation on a remote node.
#[derive(Clone, Debug)]
pub struct AsyncStatus {
    pub request_id: u64,
    pub description: String,
    pub status: String,
    pub complete: bool,
}

/// Control-plane client for a cluster of Strata nodes.
///
/// Thread-safe: independent operations may run concurrently from multiple
/// tasks and are served by distinct pooled connections up to the per-node
/// cap. The cluster descriptor is an atomically replaceable snapshot.
pub struct AdminClient {
    cluster: RwLock<Arc<ClusterDescriptor>>,
    pool: SocketPool,
}

impl AdminClient {
    /// Build a client around an already known cluster descriptor.
    pub fn with_cluster(cluster: ClusterDescriptor, config: &AdminClientConfig) -> Self {
        Self {
            cluster: RwLock::new(Arc::new(cluster)),
            pool: SocketPool::new(config),
        }
    }

    /// Build a client by fetching the cluster descriptor from the first
    /// reachable `config.bootstrap_urls` entry.
    pub async fn bootstrap(config: &AdminClientConfig) -> Result<Self, AdminError> {
        let pool = SocketPool::new(config);
        let mut last_error: Option<AdminError> = None;

        for url in &config.bootstrap_urls {
            let dest = match parse_bootstrap_url(url) {
                Ok((host, port)) => Destination::admin(host, port),
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            };
            match Self::fetch_bootstrap_cluster(&pool, &dest).await {
                Ok(cluster) => {
                    return Ok(Self {
                        cluster: RwLock::new(Arc::new(cluster)),
                        pool,
                    });
                }
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "bootstrap attempt failed");
                    last_error = Some(err);
                }
            }
        }

        let reason = match last_error {
            Some(err) => err.to_string(),
            None => "no bootstrap urls configured".to_string(),
        };
        Err(AdminError::Bootstrap {
            attempted: config.bootstrap_urls.len(),
            reason,
        })
    }

    async fn fetch_bootstrap_cluster(
        pool: &SocketPool,
        dest: &Destination,
    ) -> Result<ClusterDescriptor, AdminError> {
        let versioned = Self::get_metadata_at(pool, dest, MetadataKey::Cluster.wire_name()).await?;
        ClusterDescriptor::from_json(&versioned.value)
    }

    /// Current cluster snapshot.
    pub fn cluster(&self) -> Arc<ClusterDescriptor> {
        self.cluster.read().expect("cluster lock poisoned").clone()
    }

    /// Replace the cluster snapshot. Concurrent readers observe either the
    /// old or the new descriptor, never a torn one.
    pub fn set_cluster(&self, cluster: ClusterDescriptor) {
        *self.cluster.write().expect("cluster lock poisoned") = Arc::new(cluster);
    }

    fn admin_destination(&self, node_id: NodeId) -> Result<Destination, AdminError> {
        let cluster = self.cluster();
        let node = cluster.node(node_id)?;
        Ok(Destination::admin(node.host.clone(), node.admin_port))
    }

    /// One framed request, one framed response, over a pooled connection.
    async fn send_and_receive<Resp>(
        &self,
        node_id: NodeId,
        request: &proto::AdminRequest,
    ) -> Result<Resp, AdminError>
    where
        Resp: Message + Default,
    {
        let dest = self.admin_destination(node_id)?;
        Self::exchange(&self.pool, &dest, request).await
    }

    async fn exchange<Resp>(
        pool: &SocketPool,
        dest: &Destination,
        request: &proto::AdminRequest,
    ) -> Result<Resp, AdminError>
    where
        Resp: Message + Default,
    {
        let mut conn = pool.checkout(dest).await?;
        let result = async {
            conn.write_framed(request).await?;
            conn.flush().await?;
            conn.read_framed::<Resp>().await
        }
        .await;
        // A failed exchange has already invalidated the connection, so
        // checkin discards it; a clean one is parked for reuse.
        pool.checkin(conn);
        result
    }

    /// Stream entries into a store on the given node.
    ///
    /// The first record travels inside the request envelope together with
    /// the store name and the filter, if any; later records are written
    /// bare, buffered by the transport, and the stream closes with the
    /// end-of-stream marker followed by exactly one response. Entries
    /// reach the server in producer order. A transport failure anywhere
    /// aborts the upload and discards the connection.
    pub async fn update_entries<S>(
        &self,
        node_id: NodeId,
        store_name: &str,
        mut entries: S,
        filter: Option<&dyn StreamFilter>,
    ) -> Result<(), AdminError>
    where
        S: Stream<Item = PartitionEntry> + Unpin,
    {
        // Encode the filter before anything touches the network.
        let filter_spec = filter.map(filter::encode).transpose()?;
        let dest = self.admin_destination(node_id)?;
        let mut conn = self.pool.checkout(&dest).await?;

        let result = async {
            let mut first = true;
            while let Some(entry) = entries.next().await {
                let record = proto::UpdatePartitionEntriesRequest {
                    store: store_name.to_string(),
                    entry: Some(proto::PartitionEntry::from(entry)),
                    filter: if first { filter_spec.clone() } else { None },
                };
                if first {
                    conn.write_framed(&proto::AdminRequest::update_partition_entries(record))
                        .await?;
                    conn.flush().await?;
                    first = false;
                } else {
                    conn.write_framed(&record).await?;
                }
            }
            if first {
                // Empty source: still perform the handshake so the server
                // sees a well-formed stream.
                let record = proto::UpdatePartitionEntriesRequest {
                    store: store_name.to_string(),
                    entry: None,
                    filter: filter_spec.clone(),
                };
                conn.write_framed(&proto::AdminRequest::update_partition_entries(record))
                    .await?;
                conn.flush().await?;
            }
            conn.write_end_of_stream().await?;
            conn.flush().await?;

            let response: proto::UpdatePartitionEntriesResponse = conn.read_framed().await?;
            match response.error {
                Some(error) => Err(AdminError::from_remote(error)),
                None => Ok(()),
            }
        }
        .await;
        self.pool.checkin(conn);
        result
    }

    /// Stream `(key, versioned value)` records for the given partitions.
    ///
    /// Records are produced as the server iterates; nothing is buffered
    /// client-side. The returned cursor is single-shot and owns a pooled
    /// connection until it is drained, errors, or is closed.
    pub async fn fetch_entries(
        &self,
        node_id: NodeId,
        store_name: &str,
        partitions: &[u32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<EntryStream, AdminError> {
        let inner = self
            .start_fetch(node_id, store_name, partitions, filter, true)
            .await?;
        Ok(EntryStream::new(inner))
    }

    /// Like [`AdminClient::fetch_entries`] but streams only the keys.
    pub async fn fetch_keys(
        &self,
        node_id: NodeId,
        store_name: &str,
        partitions: &[u32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<KeyStream, AdminError> {
        let inner = self
            .start_fetch(node_id, store_name, partitions, filter, false)
            .await?;
        Ok(KeyStream::new(inner))
    }

    async fn start_fetch(
        &self,
        node_id: NodeId,
        store_name: &str,
        partitions: &[u32],
        filter: Option<&dyn StreamFilter>,
        fetch_values: bool,
    ) -> Result<FetchStream, AdminError> {
        let filter_spec = filter.map(filter::encode).transpose()?;
        let dest = self.admin_destination(node_id)?;
        let mut conn = self.pool.checkout(&dest).await?;

        let request =
            proto::AdminRequest::fetch_partition_entries(proto::FetchPartitionEntriesRequest {
                store: store_name.to_string(),
                partitions: partitions.to_vec(),
                fetch_values,
                filter: filter_spec,
            });
        let initiated = async {
            conn.write_framed(&request).await?;
            conn.flush().await
        }
        .await;
        match initiated {
            Ok(()) => Ok(FetchStream::new(self.pool.clone(), conn)),
            Err(err) => {
                self.pool.checkin(conn);
                Err(err)
            }
        }
    }

    /// Delete all entries of the given partitions on one node. Returns the
    /// number of entries the server removed.
    pub async fn delete_partitions(
        &self,
        node_id: NodeId,
        store_name: &str,
        partitions: &[u32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<u64, AdminError> {
        let filter_spec = filter.map(filter::encode).transpose()?;
        let request =
            proto::AdminRequest::delete_partition_entries(proto::DeletePartitionEntriesRequest {
                store: store_name.to_string(),
                partitions: partitions.to_vec(),
                filter: filter_spec,
            });
        let response: proto::DeletePartitionEntriesResponse =
            self.send_and_receive(node_id, &request).await?;
        match response.error {
            Some(error) => Err(AdminError::from_remote(error)),
            None => Ok(response.count),
        }
    }

    /// Copy the given partitions from the donor onto the stealer.
    ///
    /// Only the stealer is contacted; it pulls from the donor as a
    /// background operation and the donor keeps its copy. Returns the
    /// stealer's request id for status polling.
    pub async fn migrate_partitions(
        &self,
        donor_id: NodeId,
        stealer_id: NodeId,
        store_name: &str,
        partitions: &[u32],
        filter: Option<&dyn StreamFilter>,
    ) -> Result<u64, AdminError> {
        let filter_spec = filter.map(filter::encode).transpose()?;
        let request =
            proto::AdminRequest::initiate_fetch_and_update(proto::InitiateFetchAndUpdateRequest {
                donor_id,
                store: store_name.to_string(),
                partitions: partitions.to_vec(),
                filter: filter_spec,
            });
        let response: proto::AsyncOperationStatusResponse =
            self.send_and_receive(stealer_id, &request).await?;
        match response.error {
            Some(error) => Err(AdminError::from_remote(error)),
            None => Ok(response.request_id),
        }
    }

    /// Status of a background operation on a node.
    ///
    /// The server removes a completed operation from its in-progress table
    /// when its status is read, so a repeat query for a completed
    /// operation fails with [`AdminError::UnknownOperation`].
    pub async fn async_operation_status(
        &self,
        node_id: NodeId,
        request_id: u64,
    ) -> Result<AsyncStatus, AdminError> {
        let request = proto::AdminRequest::async_operation_status(
            proto::AsyncOperationStatusRequest { request_id },
        );
        let response: proto::AsyncOperationStatusResponse =
            self.send_and_receive(node_id, &request).await?;
        if let Some(error) = response.error {
            return Err(AdminError::from_remote(error));
        }
        Ok(AsyncStatus {
            request_id: response.request_id,
            description: response.description,
            status: response.status,
            complete: response.complete,
        })
    }

    /// Poll a background operation until it completes or `max_wait`
    /// elapses, backing off between polls (see [`next_poll_delay`]).
    pub async fn wait_for_completion(
        &self,
        node_id: NodeId,
        request_id: u64,
        max_wait: Duration,
    ) -> Result<(), AdminError> {
        let deadline = time::Instant::now() + max_wait;
        let mut delay = INITIAL_POLL_DELAY;

        while time::Instant::now() < deadline {
            let status = self.async_operation_status(node_id, request_id).await?;
            tracing::debug!(
                node_id,
                request_id,
                status = %status.status,
                complete = status.complete,
                "async operation status"
            );
            if status.complete {
                return Ok(());
            }
            time::sleep(delay).await;
            delay = next_poll_delay(delay);
        }
        Err(AdminError::OperationTimedOut {
            node_id,
            request_id,
            max_wait,
        })
    }

    /// Read one metadata value from a node.
    pub async fn get_remote_metadata(
        &self,
        node_id: NodeId,
        key: &str,
    ) -> Result<Versioned<String>, AdminError> {
        let dest = self.admin_destination(node_id)?;
        Self::get_metadata_at(&self.pool, &dest, key).await
    }

    async fn get_metadata_at(
        pool: &SocketPool,
        dest: &Destination,
        key: &str,
    ) -> Result<Versioned<String>, AdminError> {
        let request = proto::AdminRequest::get_metadata(proto::GetMetadataRequest {
            key: Bytes::copy_from_slice(key.as_bytes()),
        });
        let response: proto::GetMetadataResponse = Self::exchange(pool, dest, &request).await?;
        if let Some(error) = response.error {
            return Err(AdminError::from_remote(error));
        }
        let versioned = response.versioned.ok_or_else(|| {
            AdminError::MalformedResponse("get-metadata response missing its value".to_string())
        })?;
        let versioned = Versioned::<Bytes>::from(versioned);
        let value = String::from_utf8(versioned.value.to_vec()).map_err(|_| {
            AdminError::MetadataUtf8 {
                key: key.to_string(),
            }
        })?;
        Ok(Versioned::new(value, versioned.version))
    }

    /// Write one metadata value to a node. The caller supplies the version
    /// vector; the server rejects clocks that do not dominate its own.
    pub async fn update_remote_metadata(
        &self,
        node_id: NodeId,
        key: &str,
        value: Versioned<String>,
    ) -> Result<(), AdminError> {
        let request = proto::AdminRequest::update_metadata(proto::UpdateMetadataRequest {
            key: Bytes::copy_from_slice(key.as_bytes()),
            versioned: Some(proto::VersionedBytes::from(
                value.map(|text| Bytes::from(text.into_bytes())),
            )),
        });
        let response: proto::UpdateMetadataResponse =
            self.send_and_receive(node_id, &request).await?;
        match response.error {
            Some(error) => Err(AdminError::from_remote(error)),
            None => Ok(()),
        }
    }

    /// Cluster descriptor as the node currently sees it.
    pub async fn get_remote_cluster(
        &self,
        node_id: NodeId,
    ) -> Result<Versioned<ClusterDescriptor>, AdminError> {
        let versioned = self
            .get_remote_metadata(node_id, MetadataKey::Cluster.wire_name())
            .await?;
        let cluster = ClusterDescriptor::from_json(&versioned.value)?;
        Ok(Versioned::new(cluster, versioned.version))
    }

    /// Replace the cluster descriptor on one node: read its current
    /// version, advance the node's own slot, write back.
    pub async fn update_remote_cluster(
        &self,
        node_id: NodeId,
        cluster: &ClusterDescriptor,
    ) -> Result<(), AdminError> {
        let current = self.get_remote_cluster(node_id).await?;
        let clock = current.version.incremented(node_id, 1);
        self.update_remote_metadata(
            node_id,
            MetadataKey::Cluster.wire_name(),
            Versioned::new(cluster.to_json()?, clock),
        )
        .await
    }

    /// Store-definition list as the node currently sees it.
    pub async fn get_remote_store_defs(
        &self,
        node_id: NodeId,
    ) -> Result<Versioned<Vec<StoreDefinition>>, AdminError> {
        let versioned = self
            .get_remote_metadata(node_id, MetadataKey::Stores.wire_name())
            .await?;
        let defs = metadata::decode_store_defs(&versioned.value)?;
        Ok(Versioned::new(defs, versioned.version))
    }

    /// Replace the store-definition list on one node.
    pub async fn update_remote_store_defs(
        &self,
        node_id: NodeId,
        defs: &[StoreDefinition],
    ) -> Result<(), AdminError> {
        let current = self.get_remote_store_defs(node_id).await?;
        let clock = current.version.incremented(node_id, 1);
        self.update_remote_metadata(
            node_id,
            MetadataKey::Stores.wire_name(),
            Versioned::new(metadata::encode_store_defs(defs)?, clock),
        )
        .await
    }

    /// Operating state the node currently advertises.
    pub async fn get_remote_server_state(
        &self,
        node_id: NodeId,
    ) -> Result<Versioned<ServerState>, AdminError> {
        let versioned = self
            .get_remote_metadata(node_id, MetadataKey::ServerState.wire_name())
            .await?;
        let state = versioned.value.parse::<ServerState>()?;
        Ok(Versioned::new(state, versioned.version))
    }

    /// Set the operating state on one node.
    pub async fn update_remote_server_state(
        &self,
        node_id: NodeId,
        state: ServerState,
    ) -> Result<(), AdminError> {
        let current = self.get_remote_server_state(node_id).await?;
        let clock = current.version.incremented(node_id, 1);
        self.update_remote_metadata(
            node_id,
            MetadataKey::ServerState.wire_name(),
            Versioned::new(state.to_string(), clock),
        )
        .await
    }

    /// Pool counter snapshot, mainly for balance assertions in tests and
    /// operational logging.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Close the socket pool. In-flight streams backed by pooled
    /// connections must be drained or abandoned before shutdown.
    pub fn shutdown(&self) {
        self.pool.close();
    }
}

fn parse_bootstrap_url(url: &str) -> Result<(String, u16), AdminError> {
    let trimmed = url.strip_prefix("tcp://").unwrap_or(url);
    let invalid = || AdminError::InvalidBootstrapUrl {
        url: url.to_string(),
    };
    let (host, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
