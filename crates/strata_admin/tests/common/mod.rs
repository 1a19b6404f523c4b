//! Shared helpers for integration tests: an in-process Strata node that
//! speaks the admin wire protocol over real TCP, with scripted behaviors
//! and recorded traffic for assertions.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use strata_admin::framing::{self, FrameError};
use strata_admin::proto;
use strata_admin::{
    AdminClient, AdminClientConfig, CausalOrder, ClusterDescriptor, NodeDescriptor, NodeId,
    PartitionEntry, VectorClock,
};

/// Error code the mock uses for rejected metadata versions.
pub const CODE_OBSOLETE_VERSION: u32 = 3;
/// Error code the mock uses for unknown async operations.
pub const CODE_UNKNOWN_OPERATION: u32 = 4;
/// Error code the mock uses for unknown metadata keys.
pub const CODE_INVALID_METADATA: u32 = 5;

/// One scripted status step for a background operation.
#[derive(Clone, Debug)]
pub struct StatusStep {
    pub status: String,
    pub complete: bool,
}

impl StatusStep {
    pub fn running(status: &str) -> Self {
        Self {
            status: status.to_string(),
            complete: false,
        }
    }

    pub fn complete(status: &str) -> Self {
        Self {
            status: status.to_string(),
            complete: true,
        }
    }
}

/// One recorded upload stream.
#[derive(Clone, Debug, Default)]
pub struct RecordedUpload {
    pub store: String,
    /// Keys in arrival order.
    pub keys: Vec<Bytes>,
    /// Filter presence per on-wire message, envelope first.
    pub filters: Vec<bool>,
}

/// What the fetch handler serves.
#[derive(Clone, Debug, Default)]
pub struct FetchScript {
    pub entries: Vec<proto::PartitionEntry>,
    /// Send an error record after this many data records, instead of the
    /// end-of-stream marker.
    pub error_after: Option<(usize, u32, String)>,
    /// Drop the connection after this many data records, without a marker.
    pub drop_after: Option<usize>,
}

/// Mock configuration, consumed by [`AdminServer::spawn`].
#[derive(Default)]
pub struct ServerOptions {
    pub fetch: FetchScript,
    /// Scripted statuses per request id. The last step repeats until it
    /// completes; a completed operation is reaped when read.
    pub operations: HashMap<u64, Vec<StatusStep>>,
    /// Request id handed out for migration kickoffs.
    pub migrate_request_id: u64,
    /// Error attached to every upload response, if set.
    pub upload_error: Option<(u32, String)>,
}

/// Traffic observed by the mock.
#[derive(Clone, Debug, Default)]
pub struct Recorded {
    pub uploads: Vec<RecordedUpload>,
    pub migrations: Vec<proto::InitiateFetchAndUpdateRequest>,
    pub deletes: Vec<proto::DeletePartitionEntriesRequest>,
    pub fetches: Vec<proto::FetchPartitionEntriesRequest>,
    pub status_polls: Vec<Instant>,
}

struct Shared {
    fetch: FetchScript,
    migrate_request_id: u64,
    upload_error: Option<(u32, String)>,
    operations: Mutex<HashMap<u64, Vec<StatusStep>>>,
    metadata: Mutex<HashMap<String, proto::VersionedBytes>>,
    recorded: Mutex<Recorded>,
}

/// An in-process admin node bound to a loopback port.
pub struct AdminServer {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
    handle: JoinHandle<()>,
}

impl AdminServer {
    pub async fn spawn(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind admin listener");
        let addr = listener.local_addr().expect("listener addr");
        let shared = Arc::new(Shared {
            fetch: options.fetch,
            migrate_request_id: options.migrate_request_id,
            upload_error: options.upload_error,
            operations: Mutex::new(options.operations),
            metadata: Mutex::new(HashMap::new()),
            recorded: Mutex::new(Recorded::default()),
        });

        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let conn_shared = accept_shared.clone();
                tokio::spawn(async move {
                    let _ = serve_conn(conn_shared, socket).await;
                });
            }
        });

        Self {
            addr,
            shared,
            handle,
        }
    }

    /// Descriptor pointing this node id at the mock's port.
    pub fn node_descriptor(&self, node_id: NodeId) -> NodeDescriptor {
        NodeDescriptor {
            node_id,
            host: "127.0.0.1".to_string(),
            client_port: self.addr.port(),
            admin_port: self.addr.port(),
            partitions: vec![node_id as u32],
        }
    }

    /// Single-node cluster descriptor for this mock.
    pub fn cluster(&self, node_id: NodeId) -> ClusterDescriptor {
        ClusterDescriptor::new("itest", [self.node_descriptor(node_id)])
    }

    /// Client wired to this mock as the given node id.
    pub fn client(&self, node_id: NodeId) -> AdminClient {
        AdminClient::with_cluster(self.cluster(node_id), &AdminClientConfig::default())
    }

    pub fn seed_metadata(&self, key: &str, value: &str, clock: VectorClock) {
        self.shared.metadata.lock().expect("metadata lock").insert(
            key.to_string(),
            proto::VersionedBytes {
                value: Bytes::copy_from_slice(value.as_bytes()),
                clock: Some(proto::VectorClock::from(&clock)),
            },
        );
    }

    /// Current clock stored under a metadata key, if any.
    pub fn metadata_clock(&self, key: &str) -> Option<VectorClock> {
        self.shared
            .metadata
            .lock()
            .expect("metadata lock")
            .get(key)
            .and_then(|versioned| versioned.clock.clone())
            .map(VectorClock::from)
    }

    pub fn recorded(&self) -> Recorded {
        self.shared.recorded.lock().expect("recorded lock").clone()
    }
}

impl Drop for AdminServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Entry with a small fixed clock, for upload and fetch fixtures.
pub fn entry(key: &str, value: &str) -> PartitionEntry {
    PartitionEntry::new(
        key.as_bytes().to_vec(),
        value.as_bytes().to_vec(),
        VectorClock::from_entries([(1, 1)]),
    )
}

/// Wire form of [`entry`], for fetch scripts.
pub fn wire_entry(key: &str, value: &str) -> proto::PartitionEntry {
    proto::PartitionEntry::from(entry(key, value))
}

/// Node descriptor pointing at a port nothing listens on. Any attempt to
/// contact it fails the test with a connect error.
pub fn unreachable_node(node_id: NodeId) -> NodeDescriptor {
    NodeDescriptor {
        node_id,
        host: "127.0.0.1".to_string(),
        client_port: 9,
        admin_port: 9,
        partitions: vec![node_id as u32],
    }
}

async fn serve_conn(shared: Arc<Shared>, socket: TcpStream) -> Result<(), FrameError> {
    let mut stream = BufStream::new(socket);
    loop {
        let request: proto::AdminRequest = match framing::read_message(&mut stream).await {
            Ok(request) => request,
            // Peer hung up or sent garbage; either way the connection is done.
            Err(_) => return Ok(()),
        };
        match request.op() {
            Some(proto::AdminOp::UpdatePartitionEntries) => {
                handle_upload(&shared, &mut stream, request.update_partition_entries).await?
            }
            Some(proto::AdminOp::FetchPartitionEntries) => {
                handle_fetch(&shared, &mut stream, request.fetch_partition_entries).await?
            }
            Some(proto::AdminOp::DeletePartitionEntries) => {
                handle_delete(&shared, &mut stream, request.delete_partition_entries).await?
            }
            Some(proto::AdminOp::InitiateFetchAndUpdate) => {
                handle_migrate(&shared, &mut stream, request.initiate_fetch_and_update).await?
            }
            Some(proto::AdminOp::AsyncOperationStatus) => {
                handle_status(&shared, &mut stream, request.async_operation_status).await?
            }
            Some(proto::AdminOp::UpdateMetadata) => {
                handle_update_metadata(&shared, &mut stream, request.update_metadata).await?
            }
            Some(proto::AdminOp::GetMetadata) => {
                handle_get_metadata(&shared, &mut stream, request.get_metadata).await?
            }
            None => return Ok(()),
        }
    }
}

fn remote_error(code: u32, message: impl Into<String>) -> proto::RemoteError {
    proto::RemoteError {
        code,
        message: message.into(),
    }
}

async fn respond<M: prost::Message>(
    stream: &mut BufStream<TcpStream>,
    response: &M,
) -> Result<(), FrameError> {
    framing::write_message(stream, response).await?;
    stream.flush().await?;
    Ok(())
}

async fn handle_upload(
    shared: &Shared,
    stream: &mut BufStream<TcpStream>,
    envelope: Option<proto::UpdatePartitionEntriesRequest>,
) -> Result<(), FrameError> {
    let envelope = envelope.expect("upload envelope missing its sub-request");
    let mut upload = RecordedUpload {
        store: envelope.store.clone(),
        ..RecordedUpload::default()
    };
    upload.filters.push(envelope.filter.is_some());
    if let Some(entry) = &envelope.entry {
        upload.keys.push(entry.key.clone());
    }

    while let Some(record) =
        framing::read_record_or_end_of_stream::<proto::UpdatePartitionEntriesRequest, _>(stream)
            .await?
    {
        upload.filters.push(record.filter.is_some());
        if let Some(entry) = record.entry {
            upload.keys.push(entry.key);
        }
    }

    shared
        .recorded
        .lock()
        .expect("recorded lock")
        .uploads
        .push(upload);

    let response = proto::UpdatePartitionEntriesResponse {
        error: shared
            .upload_error
            .clone()
            .map(|(code, message)| remote_error(code, message)),
    };
    respond(stream, &response).await
}

async fn handle_fetch(
    shared: &Shared,
    stream: &mut BufStream<TcpStream>,
    request: Option<proto::FetchPartitionEntriesRequest>,
) -> Result<(), FrameError> {
    let request = request.expect("fetch request missing its sub-request");
    let fetch_values = request.fetch_values;
    shared
        .recorded
        .lock()
        .expect("recorded lock")
        .fetches
        .push(request);

    let script = &shared.fetch;
    let mut sent = 0usize;
    for entry in &script.entries {
        if script.drop_after == Some(sent) {
            stream.flush().await?;
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted connection drop",
            )));
        }
        if let Some((after, code, message)) = &script.error_after {
            if *after == sent {
                let response = proto::FetchPartitionEntriesResponse {
                    entry: None,
                    key: None,
                    error: Some(remote_error(*code, message.clone())),
                };
                framing::write_sized_message(stream, &response).await?;
                stream.flush().await?;
                return Ok(());
            }
        }
        let response = if fetch_values {
            proto::FetchPartitionEntriesResponse {
                entry: Some(entry.clone()),
                key: None,
                error: None,
            }
        } else {
            proto::FetchPartitionEntriesResponse {
                entry: None,
                key: Some(entry.key.clone()),
                error: None,
            }
        };
        framing::write_sized_message(stream, &response).await?;
        sent += 1;
    }

    if let Some((after, code, message)) = &script.error_after {
        if *after == sent {
            let response = proto::FetchPartitionEntriesResponse {
                entry: None,
                key: None,
                error: Some(remote_error(*code, message.clone())),
            };
            framing::write_sized_message(stream, &response).await?;
            stream.flush().await?;
            return Ok(());
        }
    }
    framing::write_end_of_stream(stream).await?;
    stream.flush().await?;
    Ok(())
}

async fn handle_delete(
    shared: &Shared,
    stream: &mut BufStream<TcpStream>,
    request: Option<proto::DeletePartitionEntriesRequest>,
) -> Result<(), FrameError> {
    let request = request.expect("delete request missing its sub-request");
    let count = request.partitions.len() as u64 * 10;
    shared
        .recorded
        .lock()
        .expect("recorded lock")
        .deletes
        .push(request);
    respond(
        stream,
        &proto::DeletePartitionEntriesResponse { count, error: None },
    )
    .await
}

async fn handle_migrate(
    shared: &Shared,
    stream: &mut BufStream<TcpStream>,
    request: Option<proto::InitiateFetchAndUpdateRequest>,
) -> Result<(), FrameError> {
    let request = request.expect("migrate request missing its sub-request");
    shared
        .recorded
        .lock()
        .expect("recorded lock")
        .migrations
        .push(request);
    respond(
        stream,
        &proto::AsyncOperationStatusResponse {
            request_id: shared.migrate_request_id,
            description: "fetch and update".to_string(),
            status: "started".to_string(),
            complete: false,
            error: None,
        },
    )
    .await
}

async fn handle_status(
    shared: &Shared,
    stream: &mut BufStream<TcpStream>,
    request: Option<proto::AsyncOperationStatusRequest>,
) -> Result<(), FrameError> {
    let request = request.expect("status request missing its sub-request");
    shared
        .recorded
        .lock()
        .expect("recorded lock")
        .status_polls
        .push(Instant::now());

    let response = {
        let mut operations = shared.operations.lock().expect("operations lock");
        match operations.get_mut(&request.request_id) {
            None => proto::AsyncOperationStatusResponse {
                error: Some(remote_error(
                    CODE_UNKNOWN_OPERATION,
                    format!("no operation {} in progress", request.request_id),
                )),
                ..proto::AsyncOperationStatusResponse::default()
            },
            Some(steps) => {
                let step = if steps.len() > 1 {
                    steps.remove(0)
                } else {
                    steps[0].clone()
                };
                if step.complete {
                    // Reap on read, like the real node.
                    operations.remove(&request.request_id);
                }
                proto::AsyncOperationStatusResponse {
                    request_id: request.request_id,
                    description: "fetch and update".to_string(),
                    status: step.status,
                    complete: step.complete,
                    error: None,
                }
            }
        }
    };
    respond(stream, &response).await
}

async fn handle_get_metadata(
    shared: &Shared,
    stream: &mut BufStream<TcpStream>,
    request: Option<proto::GetMetadataRequest>,
) -> Result<(), FrameError> {
    let request = request.expect("get-metadata request missing its sub-request");
    let key = String::from_utf8_lossy(&request.key).to_string();
    let response = match shared
        .metadata
        .lock()
        .expect("metadata lock")
        .get(&key)
    {
        Some(versioned) => proto::GetMetadataResponse {
            versioned: Some(versioned.clone()),
            error: None,
        },
        None => proto::GetMetadataResponse {
            versioned: None,
            error: Some(remote_error(
                CODE_INVALID_METADATA,
                format!("unknown metadata key {key:?}"),
            )),
        },
    };
    respond(stream, &response).await
}

async fn handle_update_metadata(
    shared: &Shared,
    stream: &mut BufStream<TcpStream>,
    request: Option<proto::UpdateMetadataRequest>,
) -> Result<(), FrameError> {
    let request = request.expect("update-metadata request missing its sub-request");
    let key = String::from_utf8_lossy(&request.key).to_string();
    let Some(versioned) = request.versioned else {
        return respond(
            stream,
            &proto::UpdateMetadataResponse {
                error: Some(remote_error(
                    CODE_INVALID_METADATA,
                    "update carries no value",
                )),
            },
        )
        .await;
    };

    let incoming = versioned
        .clock
        .clone()
        .map(VectorClock::from)
        .unwrap_or_default();
    let obsolete = {
        let mut metadata = shared.metadata.lock().expect("metadata lock");
        if let Some(current) = metadata.get(&key) {
            let current_clock = current
                .clock
                .clone()
                .map(VectorClock::from)
                .unwrap_or_default();
            if incoming.compare(&current_clock) != CausalOrder::After {
                true
            } else {
                metadata.insert(key.clone(), versioned);
                false
            }
        } else {
            metadata.insert(key.clone(), versioned);
            false
        }
    };
    if obsolete {
        return respond(
            stream,
            &proto::UpdateMetadataResponse {
                error: Some(remote_error(
                    CODE_OBSOLETE_VERSION,
                    format!("update for {key:?} does not dominate the stored version"),
                )),
            },
        )
        .await;
    }
    respond(stream, &proto::UpdateMetadataResponse { error: None }).await
}
