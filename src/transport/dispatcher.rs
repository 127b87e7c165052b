//! Transport dispatcher (C5): picks a transport per outbound frame and
//! reacts to battery state, per spec §4.5.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::PeerId;
use crate::transport::radio::TransportKind;

const LARGE_THRESHOLD_BYTES: u64 = 1_000_000;
const SMALL_THRESHOLD_BYTES: u64 = 1_000;
const SECURITY_UPGRADE_THRESHOLD_BYTES: u64 = 10_000_000;
const BATTERY_OK_THRESHOLD: f32 = 0.5;
const BATTERY_LOW_THRESHOLD: f32 = 0.3;

/// Pure transport-selection policy, exactly as specified:
///
/// ```text
/// BAT_OK = bat > 0.5 || chg
/// LARGE  = size > 1_000_000
/// SMALL  = size < 1_000
/// SECURITY_UPGRADE = size > 10_000_000
/// ```
pub fn select_transport(size: u64, bat: f32, chg: bool, caps: &HashSet<TransportKind>) -> Result<TransportKind> {
    let bat_ok = bat > BATTERY_OK_THRESHOLD || chg;
    let large = size > LARGE_THRESHOLD_BYTES;
    let small = size < SMALL_THRESHOLD_BYTES;
    let security_upgrade = size > SECURITY_UPGRADE_THRESHOLD_BYTES;

    if security_upgrade && caps.contains(&TransportKind::HighBW) {
        return Ok(TransportKind::HighBW);
    }
    if large && bat_ok && caps.contains(&TransportKind::HighBW) {
        return Ok(TransportKind::HighBW);
    }
    if (small || bat < BATTERY_LOW_THRESHOLD) && caps.contains(&TransportKind::Low) {
        return Ok(TransportKind::Low);
    }
    if bat_ok && caps.contains(&TransportKind::HighBW) {
        return Ok(TransportKind::HighBW);
    }
    if caps.contains(&TransportKind::Low) {
        return Ok(TransportKind::Low);
    }
    caps.iter()
        .next()
        .copied()
        .ok_or_else(|| Error::Transport("no compatible transport for peer".into()))
}

#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connections_established: u64,
    pub connections_failed: u64,
    pub last_activity_ms: Option<u64>,
}

/// Owns routing/capability tables and per-transport statistics; decides
/// which transport an outbound frame takes and reacts to battery changes.
pub struct Dispatcher {
    routing_table: RwLock<HashMap<PeerId, HashSet<TransportKind>>>,
    peer_capabilities: RwLock<HashMap<PeerId, HashSet<TransportKind>>>,
    available_transports: RwLock<HashSet<TransportKind>>,
    stats: RwLock<HashMap<TransportKind, TransportStats>>,
    battery_level: RwLock<f32>,
    charging: RwLock<bool>,
    highbw_discovery_active: std::sync::atomic::AtomicBool,
    messages_sent_total: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routing_table: RwLock::new(HashMap::new()),
            peer_capabilities: RwLock::new(HashMap::new()),
            available_transports: RwLock::new(HashSet::new()),
            stats: RwLock::new(HashMap::new()),
            battery_level: RwLock::new(1.0),
            charging: RwLock::new(false),
            highbw_discovery_active: std::sync::atomic::AtomicBool::new(false),
            messages_sent_total: AtomicU64::new(0),
        }
    }

    pub async fn register_transport_available(&self, kind: TransportKind) {
        self.available_transports.write().await.insert(kind);
    }

    pub async fn set_peer_capabilities(&self, peer_id: PeerId, caps: HashSet<TransportKind>) {
        self.routing_table.write().await.insert(peer_id, caps.clone());
        self.peer_capabilities.write().await.insert(peer_id, caps);
    }

    pub async fn remove_peer(&self, peer_id: &PeerId) {
        self.routing_table.write().await.remove(peer_id);
        self.peer_capabilities.write().await.remove(peer_id);
    }

    /// `rotate_peer_id(old, new)`: moves a peer's entries to the new id
    /// atomically, per the testable property in spec §8.
    pub async fn rotate_peer_id(&self, old: &PeerId, new: PeerId) {
        let mut routing = self.routing_table.write().await;
        if let Some(caps) = routing.remove(old) {
            routing.insert(new, caps);
        }
        let mut capabilities = self.peer_capabilities.write().await;
        if let Some(caps) = capabilities.remove(old) {
            capabilities.insert(new, caps);
        }
    }

    pub async fn select_for_peer(&self, peer_id: &PeerId, size: u64) -> Result<TransportKind> {
        let bat = *self.battery_level.read().await;
        let chg = *self.charging.read().await;
        let peer_caps = self
            .peer_capabilities
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))?;
        let available = self.available_transports.read().await.clone();
        let caps: HashSet<TransportKind> = peer_caps.intersection(&available).copied().collect();
        select_transport(size, bat, chg, &caps)
    }

    pub async fn record_send(&self, kind: TransportKind, bytes: u64) {
        self.messages_sent_total.fetch_add(1, Ordering::Relaxed);
        let mut stats = self.stats.write().await;
        let entry = stats.entry(kind).or_default();
        entry.messages_sent += 1;
        entry.bytes_sent += bytes;
        entry.last_activity_ms = Some(crate::protocol::now_ms());
    }

    pub async fn record_receive(&self, kind: TransportKind, bytes: u64) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(kind).or_default();
        entry.messages_received += 1;
        entry.bytes_received += bytes;
        entry.last_activity_ms = Some(crate::protocol::now_ms());
    }

    pub async fn stats_snapshot(&self) -> HashMap<TransportKind, TransportStats> {
        self.stats.read().await.clone()
    }

    /// Applies a battery reading, starting or stopping HighBW discovery per
    /// spec §4.5's transition rules. Returns `Some(true/false)` if an
    /// action was taken, for the caller to invoke on the actual radio.
    pub async fn on_battery_update(&self, level: f32, charging: bool) -> Option<bool> {
        *self.battery_level.write().await = level;
        *self.charging.write().await = charging;

        let active = self.highbw_discovery_active.load(Ordering::SeqCst);
        if level < BATTERY_LOW_THRESHOLD && active {
            self.highbw_discovery_active.store(false, Ordering::SeqCst);
            debug!(level, "battery low, stopping HighBW discovery");
            return Some(false);
        }
        if (level > BATTERY_OK_THRESHOLD || charging) && !active {
            self.highbw_discovery_active.store(true, Ordering::SeqCst);
            debug!(level, charging, "battery ok, starting HighBW discovery");
            return Some(true);
        }
        None
    }
}
