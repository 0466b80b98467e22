use std::{collections::HashSet, fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};

/// Everything needed to bring a worker pool up.
///
/// Can be built in code or loaded from a JSON document such as:
///
/// ```json
/// { "executable": "target/release/worker", "device_ids": [0, 1, 2, 3] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// The worker executable, launched once per device.
    pub executable: PathBuf,
    /// Extra arguments passed verbatim to every worker.
    #[serde(default)]
    pub args: Vec<String>,
    /// One worker is spawned per listed device, in this order.
    pub device_ids: Vec<i32>,
    /// Upper bound on the amount of processes this host may launch.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Per worker receive timeout in milliseconds, receives block forever when absent.
    #[serde(default)]
    pub recv_timeout_ms: Option<u64>,
    /// Base seed forwarded to the workers' samplers.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PoolConfig {
    /// Creates a new `PoolConfig` with every optional setting disabled.
    ///
    /// # Arguments
    /// * `executable` - The worker executable.
    /// * `device_ids` - The devices to spawn a worker for.
    pub fn new(executable: impl Into<PathBuf>, device_ids: Vec<i32>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            device_ids,
            max_workers: None,
            recv_timeout_ms: None,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Bounds every receive by `timeout`, rounded up to whole milliseconds.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.recv_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    /// Parses a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoordinatorError::InvalidConfig(e.to_string()))
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CoordinatorError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;

        Self::from_json(&content)
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout_ms.map(Duration::from_millis)
    }

    /// Checks the configuration before anything is spawned.
    ///
    /// # Errors
    /// * `Spawn` if the group can't have the requested size or repeats a device.
    /// * `InvalidConfig` for negative device ids or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        let ndev = self.device_ids.len();

        if ndev == 0 {
            return Err(CoordinatorError::Spawn {
                detail: "at least one device id is required".into(),
                source: None,
            });
        }

        if let Some(max) = self.max_workers {
            if max < ndev {
                return Err(CoordinatorError::Spawn {
                    detail: format!("{ndev} workers requested but only {max} can be launched"),
                    source: None,
                });
            }
        }

        let mut seen = HashSet::with_capacity(ndev);
        for &device in &self.device_ids {
            if device < 0 {
                return Err(CoordinatorError::InvalidConfig(format!(
                    "device id {device} is negative"
                )));
            }

            if !seen.insert(device) {
                return Err(CoordinatorError::Spawn {
                    detail: format!("device id {device} is listed more than once"),
                    source: None,
                });
            }
        }

        if self.recv_timeout_ms == Some(0) {
            return Err(CoordinatorError::InvalidConfig(
                "recv_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}
