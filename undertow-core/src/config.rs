//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub torrent: TorrentConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

/// BitTorrent download behavior.
///
/// Controls block pipelining, worker retry policy and the optional
/// session-level stall timeout.
#[derive(Debug, Clone)]
pub struct TorrentConfig {
    /// BitTorrent client identifier, prefix of every generated peer id
    pub client_id: &'static str,
    /// Size of a single block request
    pub block_size: u32,
    /// Maximum number of outstanding block requests per peer
    pub max_backlog: usize,
    /// Attempts a worker makes on one peer before giving up on it
    pub worker_max_attempts: u32,
    /// Delay between worker attempts
    pub worker_retry_delay: Duration,
    /// Fail the session when no piece completes for this long (None = wait forever)
    pub stall_timeout: Option<Duration>,
}

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            client_id: "-UT0001-",
            block_size: 16384, // 16 KiB
            max_backlog: 10,
            worker_max_attempts: 10,
            worker_retry_delay: Duration::from_secs(5),
            stall_timeout: None,
        }
    }
}

/// Network communication and tracker configuration.
///
/// Controls tracker timeouts and retry policy, peer socket timeouts and
/// how often the swarm monitor asks for more peers.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port announced to trackers
    pub listen_port: u16,
    /// HTTP request timeout for tracker communication
    pub tracker_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
    /// First UDP tracker receive timeout, doubled on every retry
    pub udp_initial_timeout: Duration,
    /// Attempts per UDP tracker exchange
    pub udp_max_attempts: u32,
    /// Consecutive announce failures before an announcer is abandoned
    pub max_announce_failures: u32,
    /// Lower bound on re-announce interval
    pub min_announce_interval: Duration,
    /// Peer TCP connect timeout
    pub peer_connect_timeout: Duration,
    /// Maximum wait for a single peer message
    pub peer_read_timeout: Duration,
    /// Swarm monitor tick
    pub more_peers_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            tracker_timeout: Duration::from_secs(30),
            user_agent: "undertow/0.1.0",
            udp_initial_timeout: Duration::from_secs(15),
            udp_max_attempts: 2,
            max_announce_failures: 5,
            min_announce_interval: Duration::from_secs(60),
            peer_connect_timeout: Duration::from_secs(20),
            peer_read_timeout: Duration::from_secs(120),
            more_peers_interval: Duration::from_secs(5),
        }
    }
}

/// On-disk layout for piece shards and assembled output.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one shard file per verified piece
    pub shard_dir: PathBuf,
    /// Shard file name prefix, followed by the piece index
    pub shard_prefix: &'static str,
    /// Directory receiving the assembled files
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shard_dir: PathBuf::from("."),
            shard_prefix: "piece_",
            output_dir: PathBuf::from("."),
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Network configuration overrides
        if let Ok(timeout) = std::env::var("UNDERTOW_TRACKER_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.network.tracker_timeout = Duration::from_secs(seconds);
        }

        if let Ok(port) = std::env::var("UNDERTOW_LISTEN_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.network.listen_port = port;
        }

        // Storage configuration overrides
        if let Ok(dir) = std::env::var("UNDERTOW_SHARD_DIR") {
            config.storage.shard_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("UNDERTOW_OUTPUT_DIR") {
            config.storage.output_dir = PathBuf::from(dir);
        }

        if let Ok(stall) = std::env::var("UNDERTOW_STALL_TIMEOUT")
            && let Ok(seconds) = stall.parse::<u64>()
        {
            config.torrent.stall_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Shrinks every delay so that retry paths run in milliseconds.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.torrent.worker_max_attempts = 3;
        config.torrent.worker_retry_delay = Duration::from_millis(20);
        config.torrent.stall_timeout = Some(Duration::from_secs(20));
        config.network.tracker_timeout = Duration::from_secs(2);
        config.network.udp_initial_timeout = Duration::from_millis(200);
        config.network.min_announce_interval = Duration::from_millis(50);
        config.network.peer_connect_timeout = Duration::from_secs(2);
        config.network.peer_read_timeout = Duration::from_secs(5);
        config.network.more_peers_interval = Duration::from_millis(100);
        config
    }

    /// Points both shard and output directories at `dir`.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.storage.shard_dir = dir.clone();
        self.storage.output_dir = dir;
        self
    }
}
