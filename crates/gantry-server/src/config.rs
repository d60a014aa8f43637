use std::time::Duration;

/// Network transport settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions idle for longer than this are evicted.
    pub idle_timeout: Duration,
    /// How often the reaper sweeps.
    pub sweep_interval: Duration,
    /// Per-session bound on queued push messages.
    pub push_queue: usize,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            push_queue: 256,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
