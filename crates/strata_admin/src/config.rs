//! Client-side tuning for the admin socket layer.

use std::time::Duration;

/// Configuration for [`AdminClient`](crate::AdminClient) and its socket
/// pool. Plain struct; construct with struct-update syntax over
/// [`Default`].
#[derive(Clone, Debug)]
pub struct AdminClientConfig {
    /// Upper bound on concurrent admin connections per node.
    pub max_connections_per_node: usize,
    /// Budget for obtaining a pooled connection. Covers both the wait for
    /// per-node capacity and the TCP connect itself.
    pub connection_timeout: Duration,
    /// Deadline for each read or write on an established connection.
    pub socket_timeout: Duration,
    /// Socket and stream buffer size in bytes, applied to the kernel
    /// send/receive buffers and the userspace buffered streams.
    pub socket_buffer_size: usize,
    /// Enable TCP keepalive on admin sockets.
    pub socket_keep_alive: bool,
    /// Nodes tried in order by [`AdminClient::bootstrap`](crate::AdminClient::bootstrap),
    /// each as `tcp://host:port` or `host:port`. Unused after construction.
    pub bootstrap_urls: Vec<String>,
}

impl Default for AdminClientConfig {
    fn default() -> Self {
        Self {
            max_connections_per_node: 6,
            connection_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(15),
            socket_buffer_size: 64 * 1024,
            socket_keep_alive: false,
            bootstrap_urls: Vec::new(),
        }
    }
}
