//! Admin wire messages.
//!
//! Hand-written prost records for the control-plane protocol. Every admin
//! exchange opens with an [`AdminRequest`] discriminator carrying exactly
//! one sub-request; responses are message-specific and all share the
//! optional [`RemoteError`] field.

use bytes::Bytes;
use prost::Message;

use crate::error::AdminError;
use crate::versioning;

/// Operation selector for [`AdminRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AdminOp {
    UpdatePartitionEntries = 1,
    FetchPartitionEntries = 2,
    DeletePartitionEntries = 3,
    InitiateFetchAndUpdate = 4,
    AsyncOperationStatus = 5,
    UpdateMetadata = 6,
    GetMetadata = 7,
}

/// Top-level request envelope. `op` names the populated sub-request.
#[derive(Clone, PartialEq, Message)]
pub struct AdminRequest {
    #[prost(enumeration = "AdminOp", tag = "1")]
    pub op_code: i32,
    #[prost(message, optional, tag = "2")]
    pub update_partition_entries: Option<UpdatePartitionEntriesRequest>,
    #[prost(message, optional, tag = "3")]
    pub fetch_partition_entries: Option<FetchPartitionEntriesRequest>,
    #[prost(message, optional, tag = "4")]
    pub delete_partition_entries: Option<DeletePartitionEntriesRequest>,
    #[prost(message, optional, tag = "5")]
    pub initiate_fetch_and_update: Option<InitiateFetchAndUpdateRequest>,
    #[prost(message, optional, tag = "6")]
    pub async_operation_status: Option<AsyncOperationStatusRequest>,
    #[prost(message, optional, tag = "7")]
    pub update_metadata: Option<UpdateMetadataRequest>,
    #[prost(message, optional, tag = "8")]
    pub get_metadata: Option<GetMetadataRequest>,
}

impl AdminRequest {
    pub fn op(&self) -> Option<AdminOp> {
        AdminOp::try_from(self.op_code).ok()
    }

    pub fn update_partition_entries(request: UpdatePartitionEntriesRequest) -> Self {
        Self {
            op_code: AdminOp::UpdatePartitionEntries as i32,
            update_partition_entries: Some(request),
            ..Self::default()
        }
    }

    pub fn fetch_partition_entries(request: FetchPartitionEntriesRequest) -> Self {
        Self {
            op_code: AdminOp::FetchPartitionEntries as i32,
            fetch_partition_entries: Some(request),
            ..Self::default()
        }
    }

    pub fn delete_partition_entries(request: DeletePartitionEntriesRequest) -> Self {
        Self {
            op_code: AdminOp::DeletePartitionEntries as i32,
            delete_partition_entries: Some(request),
            ..Self::default()
        }
    }

    pub fn initiate_fetch_and_update(request: InitiateFetchAndUpdateRequest) -> Self {
        Self {
            op_code: AdminOp::InitiateFetchAndUpdate as i32,
            initiate_fetch_and_update: Some(request),
            ..Self::default()
        }
    }

    pub fn async_operation_status(request: AsyncOperationStatusRequest) -> Self {
        Self {
            op_code: AdminOp::AsyncOperationStatus as i32,
            async_operation_status: Some(request),
            ..Self::default()
        }
    }

    pub fn update_metadata(request: UpdateMetadataRequest) -> Self {
        Self {
            op_code: AdminOp::UpdateMetadata as i32,
            update_metadata: Some(request),
            ..Self::default()
        }
    }

    pub fn get_metadata(request: GetMetadataRequest) -> Self {
        Self {
            op_code: AdminOp::GetMetadata as i32,
            get_metadata: Some(request),
            ..Self::default()
        }
    }
}

/// Server-side failure attached to a response.
#[derive(Clone, PartialEq, Message)]
pub struct RemoteError {
    /// u16-range failure code from the server's error table.
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// One `(node, counter)` slot of a vector clock.
#[derive(Clone, PartialEq, Message)]
pub struct ClockEntry {
    #[prost(uint64, tag = "1")]
    pub node_id: u64,
    #[prost(uint64, tag = "2")]
    pub version: u64,
}

/// Wire form of [`versioning::VectorClock`].
#[derive(Clone, PartialEq, Message)]
pub struct VectorClock {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<ClockEntry>,
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
}

/// A value and the clock of the write that produced it.
#[derive(Clone, PartialEq, Message)]
pub struct VersionedBytes {
    #[prost(bytes = "bytes", tag = "1")]
    pub value: Bytes,
    #[prost(message, optional, tag = "2")]
    pub clock: Option<VectorClock>,
}

/// Wire form of [`versioning::PartitionEntry`].
#[derive(Clone, PartialEq, Message)]
pub struct PartitionEntry {
    #[prost(bytes = "bytes", tag = "1")]
    pub key: Bytes,
    #[prost(message, optional, tag = "2")]
    pub versioned: Option<VersionedBytes>,
}

/// Named server-side predicate with an opaque parameter blob.
#[derive(Clone, PartialEq, Message)]
pub struct FilterSpec {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
}

/// Upload record. The first message of a stream travels inside the
/// [`AdminRequest`] envelope with the filter attached; later records are
/// written bare, without a filter.
#[derive(Clone, PartialEq, Message)]
pub struct UpdatePartitionEntriesRequest {
    #[prost(string, tag = "1")]
    pub store: String,
    #[prost(message, optional, tag = "2")]
    pub entry: Option<PartitionEntry>,
    #[prost(message, optional, tag = "3")]
    pub filter: Option<FilterSpec>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdatePartitionEntriesResponse {
    #[prost(message, optional, tag = "1")]
    pub error: Option<RemoteError>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FetchPartitionEntriesRequest {
    #[prost(string, tag = "1")]
    pub store: String,
    #[prost(uint32, repeated, tag = "2")]
    pub partitions: Vec<u32>,
    /// False requests a key-only stream.
    #[prost(bool, tag = "3")]
    pub fetch_values: bool,
    #[prost(message, optional, tag = "4")]
    pub filter: Option<FilterSpec>,
}

/// One download record: an entry or a bare key, or an in-stream error.
#[derive(Clone, PartialEq, Message)]
pub struct FetchPartitionEntriesResponse {
    #[prost(message, optional, tag = "1")]
    pub entry: Option<PartitionEntry>,
    #[prost(bytes = "bytes", optional, tag = "2")]
    pub key: Option<Bytes>,
    #[prost(message, optional, tag = "3")]
    pub error: Option<RemoteError>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeletePartitionEntriesRequest {
    #[prost(string, tag = "1")]
    pub store: String,
    #[prost(uint32, repeated, tag = "2")]
    pub partitions: Vec<u32>,
    #[prost(message, optional, tag = "3")]
    pub filter: Option<FilterSpec>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeletePartitionEntriesResponse {
    #[prost(uint64, tag = "1")]
    pub count: u64,
    #[prost(message, optional, tag = "2")]
    pub error: Option<RemoteError>,
}

/// Ask the receiving node (the stealer) to pull partitions from the donor
/// as a background operation.
#[derive(Clone, PartialEq, Message)]
pub struct InitiateFetchAndUpdateRequest {
    #[prost(uint64, tag = "1")]
    pub donor_id: u64,
    #[prost(string, tag = "2")]
    pub store: String,
    #[prost(uint32, repeated, tag = "3")]
    pub partitions: Vec<u32>,
    #[prost(message, optional, tag = "4")]
    pub filter: Option<FilterSpec>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AsyncOperationStatusRequest {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct AsyncOperationStatusResponse {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(string, tag = "3")]
    pub status: String,
    #[prost(bool, tag = "4")]
    pub complete: bool,
    #[prost(message, optional, tag = "5")]
    pub error: Option<RemoteError>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateMetadataRequest {
    #[prost(bytes = "bytes", tag = "1")]
    pub key: Bytes,
    #[prost(message, optional, tag = "2")]
    pub versioned: Option<VersionedBytes>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateMetadataResponse {
    #[prost(message, optional, tag = "1")]
    pub error: Option<RemoteError>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetMetadataRequest {
    #[prost(bytes = "bytes", tag = "1")]
    pub key: Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetMetadataResponse {
    #[prost(message, optional, tag = "1")]
    pub versioned: Option<VersionedBytes>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<RemoteError>,
}

impl From<&versioning::VectorClock> for VectorClock {
    fn from(clock: &versioning::VectorClock) -> Self {
        Self {
            entries: clock
                .entries()
                .map(|(node_id, version)| ClockEntry { node_id, version })
                .collect(),
            timestamp_ms: clock.timestamp_ms(),
        }
    }
}

impl From<VectorClock> for versioning::VectorClock {
    fn from(clock: VectorClock) -> Self {
        versioning::VectorClock::from_parts(
            clock.entries.iter().map(|entry| (entry.node_id, entry.version)),
            clock.timestamp_ms,
        )
    }
}

impl From<versioning::Versioned<Bytes>> for VersionedBytes {
    fn from(versioned: versioning::Versioned<Bytes>) -> Self {
        Self {
            value: versioned.value,
            clock: Some(VectorClock::from(&versioned.version)),
        }
    }
}

impl From<VersionedBytes> for versioning::Versioned<Bytes> {
    fn from(versioned: VersionedBytes) -> Self {
        // An omitted clock reads as the empty clock, as on a fresh node.
        let clock = versioned
            .clock
            .map(versioning::VectorClock::from)
            .unwrap_or_default();
        versioning::Versioned::new(versioned.value, clock)
    }
}

impl From<versioning::PartitionEntry> for PartitionEntry {
    fn from(entry: versioning::PartitionEntry) -> Self {
        Self {
            key: entry.key,
            versioned: Some(VersionedBytes::from(entry.versioned)),
        }
    }
}

impl PartitionEntry {
    /// Domain view of the record; fails when the wire record lacks its
    /// versioned value.
    pub fn into_domain(self) -> Result<versioning::PartitionEntry, AdminError> {
        let versioned = self.versioned.ok_or_else(|| {
            AdminError::MalformedResponse("partition entry missing its versioned value".to_string())
        })?;
        Ok(versioning::PartitionEntry {
            key: self.key,
            versioned: versioning::Versioned::from(versioned),
        })
    }
}
