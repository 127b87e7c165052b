//! Engine configuration.
//!
//! Mirrors the numeric constants the specification pins (chunk sizes,
//! timers, retry limits, concurrency caps) as overridable defaults, so
//! integrators can tune the engine without forking the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub transfer: TransferConfig,
    pub mesh: MeshConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            transport: TransportConfig::default(),
            transfer: TransferConfig::default(),
            mesh: MeshConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(Error::from)
    }
}

/// Session layer (C3) tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(with = "humantime_secs")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_secs")]
    pub rekey_interval: Duration,
    #[serde(with = "humantime_secs")]
    pub rekey_min_interval: Duration,
    #[serde(with = "humantime_secs")]
    pub session_idle_timeout: Duration,
    pub previous_keys_capacity: usize,
    pub max_handshakes_per_minute: u32,
    pub max_messages_per_minute: u32,
    pub auth_failure_threshold: u32,
    #[serde(with = "humantime_secs")]
    pub auth_failure_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            rekey_interval: Duration::from_secs(60),
            rekey_min_interval: Duration::from_secs(300),
            session_idle_timeout: Duration::from_secs(300),
            previous_keys_capacity: 10,
            max_handshakes_per_minute: 10,
            max_messages_per_minute: 100,
            auth_failure_threshold: 3,
            auth_failure_window: Duration::from_secs(60),
        }
    }
}

/// Transport dispatcher (C5) tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub constrained_mtu: usize,
    pub highbw_mtu: usize,
    pub large_threshold_bytes: u64,
    pub small_threshold_bytes: u64,
    pub security_upgrade_threshold_bytes: u64,
    pub battery_ok_threshold: f32,
    pub battery_low_threshold: f32,
    #[serde(with = "humantime_secs")]
    pub constrained_pacing: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            constrained_mtu: 500,
            highbw_mtu: 1_000_000,
            large_threshold_bytes: 1_000_000,
            small_threshold_bytes: 1_000,
            security_upgrade_threshold_bytes: 10_000_000,
            battery_ok_threshold: 0.5,
            battery_low_threshold: 0.3,
            constrained_pacing: Duration::from_millis(100),
        }
    }
}

/// Transfer engine (C7) tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub chunk_bytes_constrained: usize,
    pub chunk_bytes_highbw: usize,
    pub max_concurrent_transfers: usize,
    pub max_outstanding_unacked: usize,
    #[serde(with = "humantime_secs")]
    pub retry_base_delay: Duration,
    pub max_retry_attempts: u8,
    #[serde(with = "humantime_secs")]
    pub manifest_grace_period: Duration,
    pub recommended_max_file_size: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_bytes_constrained: 480,
            chunk_bytes_highbw: 65_536,
            max_concurrent_transfers: 3,
            max_outstanding_unacked: 64,
            retry_base_delay: Duration::from_secs(1),
            max_retry_attempts: 5,
            manifest_grace_period: Duration::from_millis(500),
            recommended_max_file_size: 100 * 1024 * 1024,
        }
    }
}

/// Mesh router (C6) tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    pub broadcast_ttl: u8,
    pub directed_ttl: u8,
    #[serde(with = "humantime_secs")]
    pub dedup_window: Duration,
    pub store_and_forward_capacity_per_peer: usize,
    #[serde(with = "humantime_secs")]
    pub store_and_forward_retention: Duration,
    #[serde(with = "humantime_secs")]
    pub peer_ttl: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            broadcast_ttl: 7,
            directed_ttl: 2,
            dedup_window: Duration::from_secs(600),
            store_and_forward_capacity_per_peer: 50,
            store_and_forward_retention: Duration::from_secs(24 * 3600),
            peer_ttl: Duration::from_secs(120),
        }
    }
}

/// Minimal `serde_with`-style helper for `Duration` as seconds, since this
/// crate does not depend on `humantime-serde`.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.transfer.chunk_bytes_constrained, 480);
        assert_eq!(cfg.transfer.chunk_bytes_highbw, 65_536);
        assert_eq!(cfg.transfer.max_concurrent_transfers, 3);
        assert_eq!(cfg.mesh.broadcast_ttl, 7);
        assert_eq!(cfg.mesh.directed_ttl, 2);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = EngineConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed = EngineConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.transfer.chunk_bytes_constrained, cfg.transfer.chunk_bytes_constrained);
    }
}
