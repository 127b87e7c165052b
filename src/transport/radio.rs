//! Radio abstraction (C4): the capability boundary between the engine and
//! whatever BLE-class or WiFi-Direct-class driver an integrator supplies.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::PeerId;

/// Relative power draw of a radio, used by the dispatcher's battery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerClass {
    Low,
    Medium,
    High,
}

/// Which kind of transport a radio provides — the dispatcher's routing and
/// capability tables are keyed by this, not by radio identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Low,
    HighBW,
}

/// Static properties of a radio backend, advertised once at registration.
#[derive(Debug, Clone, Copy)]
pub struct RadioCapability {
    pub kind: TransportKind,
    pub max_frame_bytes: usize,
    pub typical_throughput_bps: u64,
    pub typical_latency_ms: u32,
    pub power_class: PowerClass,
    pub range_m: u32,
}

/// Events a [`RadioBackend`] pushes to the engine.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    PeerDiscovered {
        peer_id: PeerId,
        link_quality: f32,
        advertised_transports: Vec<TransportKind>,
    },
    PeerLost {
        peer_id: PeerId,
    },
    FrameReceived {
        sender_id: PeerId,
        bytes: Vec<u8>,
        link_quality: f32,
    },
    AvailabilityChanged {
        available: bool,
    },
}

/// The capability an integrator provides for one physical or virtual radio.
#[async_trait]
pub trait RadioBackend: Send + Sync {
    fn capability(&self) -> RadioCapability;
    async fn start_discovery(&self) -> Result<()>;
    async fn stop_discovery(&self) -> Result<()>;
    async fn send(&self, frame_bytes: &[u8], recipient: Option<PeerId>) -> Result<()>;
    fn is_available(&self) -> bool;
}

/// In-memory radio pair for tests: frames sent on one end arrive as
/// `FrameReceived` events on whatever peer is wired to it via [`connect`].
pub struct LoopbackRadio {
    kind: TransportKind,
    max_frame_bytes: usize,
    self_id: PeerId,
    peer_tx: mpsc::UnboundedSender<RadioEvent>,
    discovering: std::sync::atomic::AtomicBool,
    available: std::sync::atomic::AtomicBool,
}

impl LoopbackRadio {
    pub fn new(kind: TransportKind, max_frame_bytes: usize, self_id: PeerId) -> (Self, mpsc::UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                kind,
                max_frame_bytes,
                self_id,
                peer_tx: tx,
                discovering: std::sync::atomic::AtomicBool::new(false),
                available: std::sync::atomic::AtomicBool::new(true),
            },
            rx,
        )
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, std::sync::atomic::Ordering::SeqCst);
    }

    /// Deliver `bytes` as if received over the air from `self_id`.
    pub fn deliver_to(&self, bytes: Vec<u8>) {
        let _ = self.peer_tx.send(RadioEvent::FrameReceived {
            sender_id: self.self_id,
            bytes,
            link_quality: 1.0,
        });
    }
}

#[async_trait]
impl RadioBackend for LoopbackRadio {
    fn capability(&self) -> RadioCapability {
        RadioCapability {
            kind: self.kind,
            max_frame_bytes: self.max_frame_bytes,
            typical_throughput_bps: if self.kind == TransportKind::HighBW { 10_000_000 } else { 20_000 },
            typical_latency_ms: if self.kind == TransportKind::HighBW { 5 } else { 50 },
            power_class: if self.kind == TransportKind::HighBW { PowerClass::High } else { PowerClass::Low },
            range_m: if self.kind == TransportKind::HighBW { 30 } else { 10 },
        }
    }

    async fn start_discovery(&self) -> Result<()> {
        self.discovering.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.discovering.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, _frame_bytes: &[u8], _recipient: Option<PeerId>) -> Result<()> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Wraps another backend and drops the first `N` sends matching a
/// predicate — used to reproduce scenario S2 (chunk loss).
pub struct FaultInjectingRadio<R: RadioBackend> {
    inner: R,
    drops_remaining: std::sync::atomic::AtomicU32,
}

impl<R: RadioBackend> FaultInjectingRadio<R> {
    pub fn new(inner: R, drop_count: u32) -> Self {
        Self {
            inner,
            drops_remaining: std::sync::atomic::AtomicU32::new(drop_count),
        }
    }
}

#[async_trait]
impl<R: RadioBackend> RadioBackend for FaultInjectingRadio<R> {
    fn capability(&self) -> RadioCapability {
        self.inner.capability()
    }

    async fn start_discovery(&self) -> Result<()> {
        self.inner.start_discovery().await
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.inner.stop_discovery().await
    }

    async fn send(&self, frame_bytes: &[u8], recipient: Option<PeerId>) -> Result<()> {
        let remaining = self.drops_remaining.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.drops_remaining.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Ok(());
        }
        self.inner.send(frame_bytes, recipient).await
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
