//! Lazy download cursors backed by pooled admin connections.
//!
//! A fetch returns a single-shot cursor that owns its connection. The
//! connection goes back to the pool when the end-of-stream marker arrives
//! or an error ends the stream; abandoning the cursor (drop or `close`)
//! discards the connection through the pool's balance accounting, so the
//! pool never leaks a slot.

use bytes::Bytes;

use crate::error::AdminError;
use crate::framing;
use crate::pool::{PooledStream, SocketPool};
use crate::proto;
use crate::versioning::PartitionEntry;

/// Pull-one-record engine shared by the entry and key cursors.
pub(crate) struct FetchStream {
    pool: SocketPool,
    conn: Option<PooledStream>,
    finished: bool,
}

impl FetchStream {
    pub(crate) fn new(pool: SocketPool, conn: PooledStream) -> Self {
        Self {
            pool,
            conn: Some(conn),
            finished: false,
        }
    }

    async fn next_response(
        &mut self,
    ) -> Result<Option<proto::FetchPartitionEntriesResponse>, AdminError> {
        if self.finished {
            return Ok(None);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };

        let len = match conn.read_frame_len().await {
            Ok(len) => len,
            Err(err) => {
                self.abandon();
                return Err(err);
            }
        };
        if len == framing::END_OF_STREAM {
            self.finished = true;
            if let Some(conn) = self.conn.take() {
                self.pool.checkin(conn);
            }
            return Ok(None);
        }
        if len < 0 {
            self.abandon();
            return Err(AdminError::MalformedResponse(format!(
                "negative record length {len}"
            )));
        }

        let response: proto::FetchPartitionEntriesResponse =
            match conn.read_sized(len as u64).await {
                Ok(response) => response,
                Err(err) => {
                    self.abandon();
                    return Err(err);
                }
            };
        if let Some(error) = response.error {
            // The server may still have frames in flight behind an
            // in-stream error, so the socket state is uncertain.
            self.abandon();
            return Err(AdminError::from_remote(error));
        }
        Ok(Some(response))
    }

    /// End the stream and discard the connection.
    fn abandon(&mut self) {
        self.finished = true;
        if let Some(mut conn) = self.conn.take() {
            conn.invalidate();
            self.pool.checkin(conn);
        }
    }
}

/// Cursor over `(key, versioned value)` records from `fetch_entries`.
/// Single-shot; iterate to exhaustion or call [`EntryStream::close`].
pub struct EntryStream {
    inner: FetchStream,
}

impl EntryStream {
    pub(crate) fn new(inner: FetchStream) -> Self {
        Self { inner }
    }

    /// Next entry, `Ok(None)` once the stream is exhausted.
    pub async fn next(&mut self) -> Result<Option<PartitionEntry>, AdminError> {
        match self.inner.next_response().await? {
            None => Ok(None),
            Some(response) => {
                let Some(entry) = response.entry else {
                    self.inner.abandon();
                    return Err(AdminError::MalformedResponse(
                        "fetch record missing its entry".to_string(),
                    ));
                };
                match entry.into_domain() {
                    Ok(entry) => Ok(Some(entry)),
                    Err(err) => {
                        self.inner.abandon();
                        Err(err)
                    }
                }
            }
        }
    }

    /// Drain the remainder of the stream into memory.
    pub async fn collect(mut self) -> Result<Vec<PartitionEntry>, AdminError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Abandon the stream, discarding its connection.
    pub fn close(mut self) {
        self.inner.abandon();
    }
}

/// Cursor over bare keys from `fetch_keys`. Single-shot; iterate to
/// exhaustion or call [`KeyStream::close`].
pub struct KeyStream {
    inner: FetchStream,
}

impl KeyStream {
    pub(crate) fn new(inner: FetchStream) -> Self {
        Self { inner }
    }

    /// Next key, `Ok(None)` once the stream is exhausted.
    pub async fn next(&mut self) -> Result<Option<Bytes>, AdminError> {
        match self.inner.next_response().await? {
            None => Ok(None),
            Some(response) => match response.key {
                Some(key) => Ok(Some(key)),
                None => {
                    self.inner.abandon();
                    Err(AdminError::MalformedResponse(
                        "fetch record missing its key".to_string(),
                    ))
                }
            },
        }
    }

    /// Drain the remainder of the stream into memory.
    pub async fn collect(mut self) -> Result<Vec<Bytes>, AdminError> {
        let mut keys = Vec::new();
        while let Some(key) = self.next().await? {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Abandon the stream, discarding its connection.
    pub fn close(mut self) {
        self.inner.abandon();
    }
}
