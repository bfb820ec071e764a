//! Node configuration: resolved values passed to `Node::start`, plus the
//! optional `<dataDir>/config.yaml` that seeds them. CLI flags win over the
//! file; the file wins over built-in defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use clawnet_core::constants::{
    DEFAULT_LISTEN_ADDR, DEFAULT_MIN_POW_DIFFICULTY, DEFAULT_MIN_SNAPSHOT_SIGNATURES,
    DEFAULT_POW_TICKET_TTL_MS, DEFAULT_RANGE_INTERVAL_MS, DEFAULT_SNAPSHOT_INTERVAL_MS,
    DEFAULT_STAKE_PROOF_TTL_MS,
};
use clawnet_core::error::ClawError;
use clawnet_state::SnapshotPolicy;
use clawnet_sync::SybilPolicy;

/// On-disk `config.yaml` shape. Every field is optional; missing fields fall
/// back to defaults or CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub listen: Vec<String>,
    pub bootstrap: Vec<String>,
    pub sybil_policy: Option<String>,
    pub allowlist: Vec<String>,
    pub min_pow_difficulty: Option<u8>,
    pub pow_ttl_ms: Option<u64>,
    pub stake_ttl_ms: Option<u64>,
    pub min_snapshot_signatures: Option<usize>,
}

impl FileConfig {
    /// Load `config.yaml` from `data_dir` if present.
    pub fn load(data_dir: &Path) -> Result<Self, ClawError> {
        let path = data_dir.join("config.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ClawError::StoreIo(e.to_string()))?;
        serde_yaml::from_str(&text).map_err(|e| ClawError::Serialization(e.to_string()))
    }
}

/// Fully resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub listen_addrs: Vec<String>,
    pub bootstrap_peers: Vec<String>,
    pub sybil: SybilPolicy,
    pub min_snapshot_signatures: usize,
    pub range_interval_ms: u64,
    pub snapshot_interval_ms: u64,
    pub range_on_start: bool,
    pub snapshot_on_start: bool,
    pub snapshot_policy: SnapshotPolicy,
    /// Passphrase protecting the node key record under `keys/`.
    pub key_passphrase: String,
}

impl NodeConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            listen_addrs: vec![DEFAULT_LISTEN_ADDR.into()],
            bootstrap_peers: Vec::new(),
            sybil: SybilPolicy::None,
            min_snapshot_signatures: DEFAULT_MIN_SNAPSHOT_SIGNATURES,
            range_interval_ms: DEFAULT_RANGE_INTERVAL_MS,
            snapshot_interval_ms: DEFAULT_SNAPSHOT_INTERVAL_MS,
            range_on_start: true,
            snapshot_on_start: true,
            snapshot_policy: SnapshotPolicy::default(),
            key_passphrase: String::new(),
        }
    }
}

/// Build a `SybilPolicy` from its flag/file spelling.
pub fn parse_sybil_policy(
    name: &str,
    allowlist: Vec<String>,
    min_pow_difficulty: Option<u8>,
    pow_ttl_ms: Option<u64>,
    stake_ttl_ms: Option<u64>,
) -> Result<SybilPolicy, ClawError> {
    match name {
        "none" => Ok(SybilPolicy::None),
        "allowlist" => Ok(SybilPolicy::Allowlist(allowlist)),
        "pow" => Ok(SybilPolicy::Pow {
            min_difficulty: min_pow_difficulty.unwrap_or(DEFAULT_MIN_POW_DIFFICULTY),
            ttl_ms: pow_ttl_ms.unwrap_or(DEFAULT_POW_TICKET_TTL_MS),
        }),
        "stake" => Ok(SybilPolicy::Stake {
            ttl_ms: stake_ttl_ms.unwrap_or(DEFAULT_STAKE_PROOF_TTL_MS),
        }),
        other => Err(ClawError::Serialization(format!(
            "unknown sybil policy: {other}"
        ))),
    }
}
