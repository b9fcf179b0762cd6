use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rand::RngCore;

use crate::callback::RetryPolicy;
use crate::jobs::WARMUP_DELAY;
use crate::worker::executor::ONESHOT_TIMEOUT;
use crate::worker::supervisor::TERMINATE_GRACE;

/// Default port the agent listens on.
pub const DEFAULT_PORT: u16 = 8002;
/// Timeout for the built-in test run.
pub const TEST_RUN_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    /// Shared secret expected in the `X-API-Key` header.
    pub api_key: String,
    /// Media binary used by the test run.
    pub binary: String,
    /// Parent of every per-job staging directory.
    pub staging_dir: PathBuf,
    pub warmup: Duration,
    pub terminate_grace: Duration,
    pub callback_retry: RetryPolicy,
    pub oneshot_timeout: Duration,
    pub test_run_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            api_key: generate_api_key(),
            binary: "ffmpeg".to_string(),
            staging_dir: std::env::temp_dir().join("stream-agent"),
            warmup: WARMUP_DELAY,
            terminate_grace: TERMINATE_GRACE,
            callback_retry: RetryPolicy::default(),
            oneshot_timeout: ONESHOT_TIMEOUT,
            test_run_timeout: TEST_RUN_TIMEOUT,
        }
    }
}

impl AgentConfig {
    pub fn new(listen_addr: SocketAddr, api_key: impl Into<String>) -> Self {
        Self {
            listen_addr,
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }
}

/// Random 32-byte key, hex encoded.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
