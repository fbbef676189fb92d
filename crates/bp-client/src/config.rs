//! Adaptor configuration.
//!
//! Defaults match the provider's well-known endpoints. They can be
//! overridden from the environment (`BP_SOCKET`, `BP_SHM_DIR`,
//! `BP_NOTI_DIR`) or from a TOML document whose fields are all optional.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use bp_protocol::{DEFAULT_NOTI_DIR, DEFAULT_SHM_DIR, DEFAULT_SOCKET_PATH};

use crate::error::{AdaptorError, Result};

/// Number of immediate connect attempts before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;

/// Receive timeout applied to every read on the request socket.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(3500);

/// Pause after a failed handshake before the attempt is reported.
pub const DEFAULT_HANDSHAKE_FAILURE_DELAY: Duration = Duration::from_millis(50);

/// Pause before the listener re-registers its callback after the provider
/// closed the notification channel.
pub const DEFAULT_RENOTIFY_GRACE: Duration = Duration::from_millis(500);

/// Blobs of at least this many bytes go through shared memory by default.
pub const DEFAULT_SHM_THRESHOLD: usize = 4096;

/// Configuration for an [`AdaptorClient`](crate::AdaptorClient).
///
/// # Example
///
/// ```rust
/// use bp_client::AdaptorConfig;
/// use std::time::Duration;
///
/// let config = AdaptorConfig {
///     socket_path: std::path::PathBuf::from("/tmp/my-provider.sock"),
///     renotify_grace: None,
///     recv_timeout: Duration::from_secs(1),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptorConfig {
    /// Path to the provider's Unix socket.
    pub socket_path: PathBuf,

    /// Directory holding shared memory segments (`bp-shm-<cid>`).
    pub shm_dir: PathBuf,

    /// Directory holding notification FIFOs (`bp-noti-<cid>`).
    pub noti_dir: PathBuf,

    /// Connect attempts per `ensure_connected`, made back to back.
    pub connect_attempts: u32,

    /// Bound on every socket read.
    pub recv_timeout: Duration,

    /// Sleep after a failed handshake.
    pub handshake_failure_delay: Duration,

    /// Grace period before the listener re-registers after the provider
    /// went away. `None` disables automatic re-registration.
    pub renotify_grace: Option<Duration>,

    /// Size threshold for the default blob transport policy.
    pub shm_threshold: usize,
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            noti_dir: PathBuf::from(DEFAULT_NOTI_DIR),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            handshake_failure_delay: DEFAULT_HANDSHAKE_FAILURE_DELAY,
            renotify_grace: Some(DEFAULT_RENOTIFY_GRACE),
            shm_threshold: DEFAULT_SHM_THRESHOLD,
        }
    }
}

impl AdaptorConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = env::var("BP_SOCKET") {
            config.socket_path = PathBuf::from(path);
        }
        if let Ok(dir) = env::var("BP_SHM_DIR") {
            config.shm_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("BP_NOTI_DIR") {
            config.noti_dir = PathBuf::from(dir);
        }
        config
    }

    /// Parses a TOML document and merges it over the defaults.
    ///
    /// ```rust
    /// use bp_client::AdaptorConfig;
    ///
    /// let config = AdaptorConfig::from_toml_str(r#"
    ///     socket_path = "/run/provider.sock"
    ///     recv_timeout_ms = 1000
    ///     renotify_grace_ms = 0
    /// "#).unwrap();
    /// assert!(config.renotify_grace.is_none());
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| AdaptorError::Config(e.to_string()))?;
        file.merge_into(Self::default())
    }

    /// Rejects values the connection manager cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 {
            return Err(AdaptorError::Config(
                "connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.recv_timeout.is_zero() {
            return Err(AdaptorError::Config(
                "recv_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk form of [`AdaptorConfig`]. Durations are in milliseconds; a
/// `renotify_grace_ms` of `0` disables re-registration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    socket_path: Option<PathBuf>,
    shm_dir: Option<PathBuf>,
    noti_dir: Option<PathBuf>,
    connect_attempts: Option<u32>,
    recv_timeout_ms: Option<u64>,
    handshake_failure_delay_ms: Option<u64>,
    renotify_grace_ms: Option<u64>,
    shm_threshold: Option<usize>,
}

impl ConfigFile {
    fn merge_into(self, mut config: AdaptorConfig) -> Result<AdaptorConfig> {
        if let Some(path) = self.socket_path {
            config.socket_path = path;
        }
        if let Some(dir) = self.shm_dir {
            config.shm_dir = dir;
        }
        if let Some(dir) = self.noti_dir {
            config.noti_dir = dir;
        }
        if let Some(attempts) = self.connect_attempts {
            config.connect_attempts = attempts;
        }
        if let Some(ms) = self.recv_timeout_ms {
            config.recv_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.handshake_failure_delay_ms {
            config.handshake_failure_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.renotify_grace_ms {
            config.renotify_grace = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(threshold) = self.shm_threshold {
            config.shm_threshold = threshold;
        }
        config.validate()?;
        Ok(config)
    }
}
