//! Typed failures surfaced by the admin client.

use std::io;
use std::time::Duration;

use crate::cluster::NodeId;
use crate::framing::FrameError;
use crate::proto;

/// Remote failure codes understood by the client.
///
/// The table is kept in sync with the server's error mapper; codes outside
/// it fall through to [`AdminError::Remote`] with the message preserved.
const CODE_STORE_NOT_FOUND: u32 = 2;
const CODE_OBSOLETE_VERSION: u32 = 3;
const CODE_UNKNOWN_OPERATION: u32 = 4;
const CODE_INVALID_METADATA: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The current cluster descriptor has no node with this id.
    #[error("node {0} is not in the current cluster descriptor")]
    UnknownNode(NodeId),

    /// Establishing (or waiting for) an admin connection failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Read or write on an established admin connection failed; the
    /// connection has been discarded.
    #[error("i/o failure on admin connection to {addr}: {source}")]
    Transport {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A frame arrived but its protobuf payload did not parse.
    #[error("malformed admin frame: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A frame parsed but violated the response contract.
    #[error("malformed admin response: {0}")]
    MalformedResponse(String),

    /// Serializing or deserializing a metadata document failed.
    #[error("metadata codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// A metadata value that must be UTF-8 was not.
    #[error("metadata value for {key:?} is not valid utf-8")]
    MetadataUtf8 { key: String },

    /// A caller-supplied filter could not be turned into wire bytes.
    /// Raised before anything touches the network.
    #[error("filter {name:?} payload could not be encoded: {reason}")]
    FilterEncode { name: String, reason: String },

    /// The named store is not defined on the remote node.
    #[error("store not present on the remote node: {message}")]
    StoreNotFound { message: String },

    /// The remote node rejected a metadata update whose version vector
    /// does not dominate its current one.
    #[error("metadata update carries an obsolete version: {message}")]
    ObsoleteVersion { message: String },

    /// The remote node has no record of the async operation. Completed
    /// operations are reaped when their status is read, so this covers
    /// both "never existed" and "already reaped".
    #[error("async operation unknown to the remote node: {message}")]
    UnknownOperation { message: String },

    /// The remote node rejected the metadata payload itself.
    #[error("remote node rejected the metadata payload: {message}")]
    InvalidMetadata { message: String },

    /// Any other remote failure, with its wire code preserved.
    #[error("remote failure (code {code}): {message}")]
    Remote { code: u16, message: String },

    /// `wait_for_completion` ran out of its wait budget.
    #[error("async operation {request_id} on node {node_id} did not finish within {max_wait:?}")]
    OperationTimedOut {
        node_id: NodeId,
        request_id: u64,
        max_wait: Duration,
    },

    /// A bootstrap url did not parse as `tcp://host:port` or `host:port`.
    #[error("invalid bootstrap url {url:?}")]
    InvalidBootstrapUrl { url: String },

    /// Every configured bootstrap url failed.
    #[error("cluster bootstrap failed after {attempted} attempt(s): {reason}")]
    Bootstrap { attempted: usize, reason: String },

    /// The socket pool has been shut down.
    #[error("socket pool is shut down")]
    PoolClosed,
}

impl AdminError {
    /// Map a server-side `(code, message)` tuple into a typed failure.
    pub(crate) fn from_remote(error: proto::RemoteError) -> AdminError {
        let message = error.message;
        match error.code {
            CODE_STORE_NOT_FOUND => AdminError::StoreNotFound { message },
            CODE_OBSOLETE_VERSION => AdminError::ObsoleteVersion { message },
            CODE_UNKNOWN_OPERATION => AdminError::UnknownOperation { message },
            CODE_INVALID_METADATA => AdminError::InvalidMetadata { message },
            code => AdminError::Remote {
                code: code.min(u32::from(u16::MAX)) as u16,
                message,
            },
        }
    }

    /// Attach the peer address to a codec-level failure.
    pub(crate) fn from_frame(addr: &str, err: FrameError) -> AdminError {
        match err {
            FrameError::Io(source) => AdminError::Transport {
                addr: addr.to_string(),
                source,
            },
            FrameError::Decode(err) => AdminError::Decode(err),
            FrameError::Encode(err) => {
                AdminError::MalformedResponse(format!("request encode failed: {err}"))
            }
            FrameError::Oversized(len) => {
                AdminError::MalformedResponse(format!("frame of {len} bytes exceeds the frame cap"))
            }
        }
    }

    /// Transport failure for an operation that exceeded the socket timeout.
    pub(crate) fn timed_out(addr: &str, deadline: Duration) -> AdminError {
        AdminError::Transport {
            addr: addr.to_string(),
            source: io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no progress within {deadline:?}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_typed_variants() {
        let err = AdminError::from_remote(proto::RemoteError {
            code: CODE_OBSOLETE_VERSION,
            message: "clock {1:4} does not dominate {1:5}".to_string(),
        });
        assert!(matches!(err, AdminError::ObsoleteVersion { .. }));

        let err = AdminError::from_remote(proto::RemoteError {
            code: CODE_UNKNOWN_OPERATION,
            message: "no operation 9".to_string(),
        });
        assert!(matches!(err, AdminError::UnknownOperation { .. }));
    }

    #[test]
    fn unknown_code_preserves_code_and_message() {
        let err = AdminError::from_remote(proto::RemoteError {
            code: 7,
            message: "oops".to_string(),
        });
        match err {
            AdminError::Remote { code, message } => {
                assert_eq!(code, 7);
                assert_eq!(message, "oops");
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
