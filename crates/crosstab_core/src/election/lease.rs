//! Lease record and election timing.
//!
//! # Invariants
//! - One key per election scope holds the JSON lease record.
//! - `heartbeat_interval_ms < staleness_threshold_ms`, so a live leader is
//!   never treated as stale.

use crate::election::error::{ElectionError, ElectionResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_STALENESS_THRESHOLD_MS: u64 = 3_000;

const DEFAULT_SCOPE: &str = "default";
const KEY_PREFIX: &str = "crosstab.leader.";

static SCOPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.-]*$").expect("valid scope regex"));

/// Leadership record shared by every context of one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub leader_id: String,
    pub heartbeat_timestamp: u64,
}

impl LeaseRecord {
    pub fn new(leader_id: impl Into<String>, heartbeat_timestamp: u64) -> Self {
        Self {
            leader_id: leader_id.into(),
            heartbeat_timestamp,
        }
    }

    /// A heartbeat from the future is treated as fresh.
    pub fn is_stale(&self, now_ms: u64, staleness_threshold_ms: u64) -> bool {
        now_ms.saturating_sub(self.heartbeat_timestamp) > staleness_threshold_ms
    }

    pub fn encode(&self) -> ElectionResult<String> {
        serde_json::to_string(self).map_err(|err| ElectionError::Encode(err.to_string()))
    }

    /// Returns `None` for records that do not parse.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElectionConfig {
    pub scope: String,
    pub heartbeat_interval_ms: u64,
    pub staleness_threshold_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            staleness_threshold_ms: DEFAULT_STALENESS_THRESHOLD_MS,
        }
    }
}

impl ElectionConfig {
    pub fn with_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ElectionResult<()> {
        if !SCOPE_RE.is_match(&self.scope) {
            return Err(ElectionError::InvalidConfig(format!(
                "scope `{}` must match {}",
                self.scope,
                SCOPE_RE.as_str()
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ElectionError::InvalidConfig(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval_ms >= self.staleness_threshold_ms {
            return Err(ElectionError::InvalidConfig(format!(
                "heartbeat_interval_ms ({}) must be below staleness_threshold_ms ({})",
                self.heartbeat_interval_ms, self.staleness_threshold_ms
            )));
        }
        Ok(())
    }

    /// Storage key holding this scope's lease record.
    pub fn key(&self) -> String {
        format!("{KEY_PREFIX}{}", self.scope)
    }
}
