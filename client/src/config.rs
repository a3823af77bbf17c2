use crate::interpolation::Smoothing;
use shared::{DEFAULT_MODEL, DEFAULT_PORT, DEFAULT_TEXTURE, DEFAULT_USERNAME, NO_COSMETIC};
use std::time::Duration;

/// Runtime settings for the client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`
    pub server_addr: String,
    pub username: String,
    pub model: String,
    pub texture: String,
    pub cosmetic: String,
    /// How long to wait for the server to accept and greet us
    pub connect_timeout: Duration,
    /// Minimum gap between two state sends
    pub send_interval: Duration,
    /// Silence after which a heartbeat is sent
    pub heartbeat_interval: Duration,
    pub smoothing: Smoothing,
    pub width: usize,
    pub height: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            username: DEFAULT_USERNAME.to_string(),
            model: DEFAULT_MODEL.to_string(),
            texture: DEFAULT_TEXTURE.to_string(),
            cosmetic: NO_COSMETIC.to_string(),
            connect_timeout: Duration::from_secs(10),
            send_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(2),
            smoothing: Smoothing::time_scaled(),
            width: 1024,
            height: 768,
        }
    }
}
