//! Configuration for pulsenet
//!
//! Centralized configuration with sensible defaults. Port and address are
//! always supplied by the caller; socket options (non-blocking, no-delay,
//! address reuse) are fixed policy and not configurable.

/// Configuration shared by sockets, connections and applications
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Socket Configuration
    // -------------------------------------------------------------------------
    /// Bytes read from the OS per `recv` call
    pub recv_chunk_size: usize,

    /// Max bytes queued for sending before the socket is considered dead
    pub max_pending_send_bytes: usize,

    /// Backlog passed to `listen`
    pub listen_backlog: i32,

    // -------------------------------------------------------------------------
    // Framing Configuration
    // -------------------------------------------------------------------------
    /// Largest frame body accepted from a peer (in bytes)
    pub max_frame_size: usize,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Interval between latency pings sent by clients (0 disables)
    pub ping_interval_ms: u32,

    /// Interval between keep-alive packets (0 disables)
    pub keep_alive_interval_ms: u32,

    /// Close a connection that received nothing for this long (0 disables)
    pub connection_timeout_ms: u32,

    /// Time to wait for a remote call response
    pub remote_call_timeout_ms: u32,

    // -------------------------------------------------------------------------
    // Application Configuration
    // -------------------------------------------------------------------------
    /// Name reported to clients looking for servers
    pub server_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recv_chunk_size: 1024,
            max_pending_send_bytes: 4 * 1024 * 1024, // 4 MB
            listen_backlog: 16,
            max_frame_size: 16 * 1024 * 1024, // 16 MB
            ping_interval_ms: 1000,
            keep_alive_interval_ms: 2500,
            connection_timeout_ms: 10_000,
            remote_call_timeout_ms: 60_000,
            server_name: "pulsenet".to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the number of bytes read per OS call
    pub fn recv_chunk_size(mut self, size: usize) -> Self {
        self.config.recv_chunk_size = size;
        self
    }

    /// Set the outbound queue limit (in bytes)
    pub fn max_pending_send_bytes(mut self, size: usize) -> Self {
        self.config.max_pending_send_bytes = size;
        self
    }

    /// Set the listen backlog
    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.config.listen_backlog = backlog;
        self
    }

    /// Set the largest accepted frame body (in bytes)
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the ping interval (in milliseconds)
    pub fn ping_interval_ms(mut self, ms: u32) -> Self {
        self.config.ping_interval_ms = ms;
        self
    }

    /// Set the keep-alive interval (in milliseconds)
    pub fn keep_alive_interval_ms(mut self, ms: u32) -> Self {
        self.config.keep_alive_interval_ms = ms;
        self
    }

    /// Set the idle connection timeout (in milliseconds)
    pub fn connection_timeout_ms(mut self, ms: u32) -> Self {
        self.config.connection_timeout_ms = ms;
        self
    }

    /// Set the remote call timeout (in milliseconds)
    pub fn remote_call_timeout_ms(mut self, ms: u32) -> Self {
        self.config.remote_call_timeout_ms = ms;
        self
    }

    /// Set the name reported to server detection requests
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Validate and build the config
    pub fn build(self) -> crate::Result<Config> {
        if self.config.recv_chunk_size == 0 {
            return Err(crate::NetError::Config(
                "recv_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.config.max_frame_size == 0 || self.config.max_frame_size > u32::MAX as usize {
            return Err(crate::NetError::Config(format!(
                "max_frame_size must be in 1..={}",
                u32::MAX
            )));
        }
        Ok(self.config)
    }
}
