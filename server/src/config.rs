use crate::outbox::DEFAULT_OUTBOX_CAPACITY;
use shared::DEFAULT_PORT;
use std::time::Duration;

/// Runtime settings for a [`crate::network::Server`]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to, `host:port`
    pub bind_addr: String,
    /// Maximum number of concurrently connected clients
    pub max_clients: usize,
    /// Silence after which a client is considered gone
    pub client_timeout: Duration,
    /// How often the liveness checker runs
    pub timeout_check_interval: Duration,
    /// Upper bound for writing one batch of packets to a client
    pub write_timeout: Duration,
    /// Outbound queue length per client before updates get dropped
    pub outbox_capacity: usize,
    /// Consecutive malformed messages tolerated before closing
    pub max_malformed: u32,
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_clients: 8,
            client_timeout: Duration::from_secs(10),
            timeout_check_interval: Duration::from_secs(1),
            write_timeout: Duration::from_secs(2),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_malformed: 10,
        }
    }
}
