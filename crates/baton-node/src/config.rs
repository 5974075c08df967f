//! Node configuration.

use std::str::FromStr;
use std::time::Duration;

use baton_protocol::PeerId;

use crate::error::{Error, Result};

/// Configuration for a ring peer.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This peer's ring position (0 seeds the token)
    pub peer_id: PeerId,

    /// Number of peers in the ring
    pub ring_size: u32,

    /// Local UDP listen address (`host:port`)
    pub listen_addr: String,

    /// Ring successor's UDP address (`host:port`)
    pub successor_addr: String,

    /// Hop limit; `None` uses the ring size
    pub max_hops: Option<u32>,

    /// Bounded queue between the receive and process activities
    pub inbound_capacity: usize,

    /// Bounded queue feeding the send activity
    pub outbound_capacity: usize,

    /// Messages deferred until the token arrives
    pub waiting_capacity: usize,

    /// Receive deadline; bounds how long shutdown can go unnoticed
    pub read_deadline: Duration,

    pub heartbeat_interval: Duration,

    /// Delay before peer 0 creates the token
    pub settle_delay: Duration,

    /// How long a holder keeps the token before passing it on
    pub token_dwell: Duration,

    /// How long after a pass duplicates of the passed token are rejected
    pub pass_grace: Duration,

    /// Token-lost observation threshold
    pub token_timeout: Duration,

    pub dedup_clear_interval: Duration,

    /// Broadcast a TOKEN_REQUEST when traffic starts waiting for the token
    pub solicit_token: bool,

    /// Socket send buffer size in bytes
    pub send_buffer: usize,

    /// Socket receive buffer size in bytes
    pub recv_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: 0,
            ring_size: 4,
            listen_addr: "127.0.0.1:9000".to_string(),
            successor_addr: "127.0.0.1:9001".to_string(),
            max_hops: None,
            inbound_capacity: 100,
            outbound_capacity: 100,
            waiting_capacity: 256,
            read_deadline: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
            token_dwell: Duration::from_millis(500),
            pass_grace: Duration::from_millis(200),
            token_timeout: Duration::from_secs(30),
            dedup_clear_interval: Duration::from_secs(60),
            solicit_token: true,
            send_buffer: 256 * 1024,
            recv_buffer: 256 * 1024,
        }
    }
}

impl NodeConfig {
    /// Create a config for ring position `peer_id` of a `ring_size` ring.
    #[must_use]
    pub fn new(
        peer_id: PeerId,
        ring_size: u32,
        listen_addr: impl Into<String>,
        successor_addr: impl Into<String>,
    ) -> Self {
        Self {
            peer_id,
            ring_size,
            listen_addr: listen_addr.into(),
            successor_addr: successor_addr.into(),
            ..Default::default()
        }
    }

    /// Create config from environment variables with defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = env_parse("BATON_PEER_ID")? {
            config.peer_id = id;
        }
        if let Some(size) = env_parse("BATON_RING_SIZE")? {
            config.ring_size = size;
        }
        if let Ok(addr) = std::env::var("BATON_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(addr) = std::env::var("BATON_SUCCESSOR_ADDR") {
            config.successor_addr = addr;
        }
        config.max_hops = env_parse("BATON_MAX_HOPS")?;
        if let Some(ms) = env_parse("BATON_HEARTBEAT_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("BATON_DWELL_MS")? {
            config.token_dwell = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("BATON_SETTLE_MS")? {
            config.settle_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ring_size == 0 {
            return Err(Error::Config("ring_size must be at least 1".into()));
        }
        if self.peer_id < 0 || self.peer_id as u32 >= self.ring_size {
            return Err(Error::Config(format!(
                "peer_id {} outside ring of size {}",
                self.peer_id, self.ring_size
            )));
        }
        if self.max_hops == Some(0) {
            return Err(Error::Config("max_hops must be at least 1".into()));
        }
        if self.inbound_capacity == 0 || self.outbound_capacity == 0 || self.waiting_capacity == 0
        {
            return Err(Error::Config("queue capacities must be non-zero".into()));
        }
        if self.heartbeat_interval.is_zero() || self.dedup_clear_interval.is_zero() {
            return Err(Error::Config("periodic intervals must be non-zero".into()));
        }
        Ok(())
    }

    /// Ring position this peer hands the token to.
    pub fn next_peer(&self) -> PeerId {
        (self.peer_id + 1) % self.ring_size as PeerId
    }

    pub fn effective_max_hops(&self) -> u32 {
        self.max_hops.unwrap_or(self.ring_size)
    }

    /// The seed peer creates the ring's only token.
    pub fn is_seed(&self) -> bool {
        self.peer_id == 0
    }

    #[must_use]
    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_dedup_clear_interval(mut self, interval: Duration) -> Self {
        self.dedup_clear_interval = interval;
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn with_token_dwell(mut self, dwell: Duration) -> Self {
        self.token_dwell = dwell;
        self
    }

    #[must_use]
    pub fn with_pass_grace(mut self, grace: Duration) -> Self {
        self.pass_grace = grace;
        self
    }

    #[must_use]
    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_solicitation(mut self, enabled: bool) -> Self {
        self.solicit_token = enabled;
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, inbound: usize, outbound: usize) -> Self {
        self.inbound_capacity = inbound;
        self.outbound_capacity = outbound;
        self
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid {name}: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.effective_max_hops(), 4);
        assert_eq!(config.next_peer(), 1);
        assert!(config.is_seed());
    }

    #[test]
    fn test_next_peer_wraps() {
        let config = NodeConfig::new(3, 4, "127.0.0.1:9003", "127.0.0.1:9000");
        assert_eq!(config.next_peer(), 0);
        assert!(!config.is_seed());

        let single = NodeConfig::new(0, 1, "127.0.0.1:9000", "127.0.0.1:9000");
        assert_eq!(single.next_peer(), 0);
        assert_eq!(single.effective_max_hops(), 1);
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            NodeConfig {
                ring_size: 0,
                ..Default::default()
            },
            NodeConfig::new(4, 4, "a:1", "b:2"),
            NodeConfig::new(-1, 4, "a:1", "b:2"),
            NodeConfig::default().with_max_hops(0),
            NodeConfig::default().with_queue_capacity(0, 10),
            NodeConfig::default().with_heartbeat_interval(Duration::ZERO),
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "{config:?}"
            );
        }
    }

    #[test]
    fn test_builders() {
        let config = NodeConfig::default()
            .with_max_hops(9)
            .with_token_dwell(Duration::from_millis(5))
            .with_solicitation(false);
        assert_eq!(config.effective_max_hops(), 9);
        assert_eq!(config.token_dwell, Duration::from_millis(5));
        assert!(!config.solicit_token);
    }
}
