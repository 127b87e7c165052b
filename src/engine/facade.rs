//! Engine facade (C8): the single public entry point. Owns the three
//! mandatory long-running tasks (spec §5) as retained `JoinHandle`s so none
//! outlives the `Engine` value.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blob::BlobStore;
use crate::config::EngineConfig;
use crate::engine::events::Event;
use crate::error::{Error, Result};
use crate::identity::IdentityManager;
use crate::keystore::KeyStore;
use crate::mesh::{Peer, RouteOutcome, Router};
use crate::protocol::ack::Ack;
use crate::protocol::chunk::Chunk;
use crate::protocol::envelope::EncryptedEnvelope;
use crate::protocol::frame::{Frame, FrameType};
use crate::protocol::handshake::EphemeralKeyPayload;
use crate::protocol::identity_announce::IdentityAnnouncement;
use crate::protocol::manifest::Manifest;
use crate::protocol::types::{PeerId, Priority};
use crate::session::{SessionEvent, SessionManager};
use crate::transport::radio::{RadioBackend, RadioEvent, TransportKind};
use crate::transport::Dispatcher;
use crate::transfer::{Direction, TransferEvent, TransferId, TransferManager};

/// The single owned engine instance. Constructed explicitly at startup (no
/// global singleton); `start()`/`shutdown()` bracket the worker tasks'
/// lifetime.
pub struct Engine {
    self_id: SyncMutex<PeerId>,
    config: EngineConfig,
    identity: Arc<IdentityManager>,
    session: Arc<SessionManager>,
    dispatcher: Arc<Dispatcher>,
    router: Arc<Router>,
    transfer: Arc<TransferManager>,
    radios: RwLock<HashMap<TransportKind, Arc<dyn RadioBackend>>>,
    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub async fn new(config: EngineConfig, keystore: Arc<dyn KeyStore>, blob_store: Arc<dyn BlobStore>) -> Result<Arc<Self>> {
        let identity = Arc::new(IdentityManager::load_or_create(keystore).await?);
        let self_id = identity.current_peer_id();

        let (session, mut session_events) = SessionManager::new(identity.clone(), config.session.clone());
        let session = Arc::new(session);

        let dispatcher = Arc::new(Dispatcher::new());
        let router = Arc::new(Router::with_peer_ttl(
            self_id,
            dispatcher.clone(),
            config.mesh.store_and_forward_capacity_per_peer,
            config.mesh.store_and_forward_retention,
            config.mesh.peer_ttl,
        ));

        let (transfer, mut transfer_events) = TransferManager::new(
            self_id,
            blob_store,
            config.transfer.chunk_bytes_constrained,
            config.transfer.recommended_max_file_size,
        );
        let transfer = Arc::new(transfer);

        let (events_tx, events_rx) = mpsc::channel(512);

        let engine = Arc::new(Self {
            self_id: SyncMutex::new(self_id),
            config,
            identity,
            session,
            dispatcher,
            router,
            transfer,
            radios: RwLock::new(HashMap::new()),
            events_tx: events_tx.clone(),
            events_rx: Mutex::new(Some(events_rx)),
            tasks: SyncMutex::new(Vec::new()),
        });

        let tx_for_sessions = events_tx.clone();
        let session_relay = tokio::spawn(async move {
            while let Some(event) = session_events.recv().await {
                let mapped = match event {
                    SessionEvent::Established { peer_id } => Some(Event::SessionEstablished { peer_id }),
                    SessionEvent::Rekeyed { peer_id, epoch } => Some(Event::RekeyComplete { peer_id, epoch }),
                    SessionEvent::Closed { peer_id, .. } => Some(Event::SessionExpired { peer_id }),
                    SessionEvent::AuthTornDown { peer_id } => Some(Event::SessionExpired { peer_id }),
                };
                if let Some(event) = mapped {
                    let _ = tx_for_sessions.send(event).await;
                }
            }
        });

        let tx_for_transfers = events_tx.clone();
        let engine_for_transfers = engine.clone();
        let transfer_relay = tokio::spawn(async move {
            while let Some(event) = transfer_events.recv().await {
                if let TransferEvent::Started { transfer_id, peer_id, direction: Direction::Outgoing } = &event {
                    let engine = engine_for_transfers.clone();
                    let (transfer_id, peer_id) = (*transfer_id, *peer_id);
                    tokio::spawn(async move {
                        if let Err(e) = engine.send_manifest(transfer_id, peer_id).await {
                            warn!(%transfer_id, error = %e, "failed to send manifest");
                        }
                    });
                }
                let mapped = match event {
                    TransferEvent::Started { transfer_id, peer_id, .. } => Some(Event::TransferStarted { transfer_id, peer_id }),
                    TransferEvent::Progress { transfer_id, fraction } => Some(Event::TransferProgress { transfer_id, fraction }),
                    TransferEvent::Paused { transfer_id } => Some(Event::TransferPaused { transfer_id }),
                    TransferEvent::Resumed { transfer_id } => Some(Event::TransferResumed { transfer_id }),
                    TransferEvent::Completed { transfer_id } => Some(Event::TransferCompleted { transfer_id, sink: transfer_id.to_string() }),
                    TransferEvent::Failed { transfer_id, reason, retryable } => Some(Event::TransferFailed { transfer_id, reason, retryable }),
                };
                if let Some(event) = mapped {
                    let _ = tx_for_transfers.send(event).await;
                }
            }
        });

        engine.tasks.lock().push(session_relay);
        engine.tasks.lock().push(transfer_relay);

        Ok(engine)
    }

    /// Registers an inbound radio and starts forwarding its events into the
    /// router/session/transfer pipeline.
    pub async fn register_radio(self: &Arc<Self>, radio: Arc<dyn RadioBackend>, mut inbound: mpsc::UnboundedReceiver<RadioEvent>) {
        let capability = radio.capability();
        self.radios.write().await.insert(capability.kind, radio);
        self.dispatcher.register_transport_available(capability.kind).await;

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                engine.handle_radio_event(event).await;
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Starts the three mandatory background tasks: session housekeeping
    /// (rekey/idle/handshake-timeout sweeps, rotating-identity schedule),
    /// the transfer-admission loop, and nothing further for the router,
    /// which is purely reactive to `register_radio`'s forwarding task.
    pub fn start(self: &Arc<Self>) {
        let session_task = {
            let engine = self.clone();
            tokio::spawn(async move { engine.session_housekeeping_loop().await })
        };
        let transfer_task = {
            let engine = self.clone();
            tokio::spawn(async move { engine.transfer_admission_loop().await })
        };
        self.tasks.lock().push(session_task);
        self.tasks.lock().push(transfer_task);
    }

    pub async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.session.emergency_wipe().await;
    }

    async fn session_housekeeping_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            ticker.tick().await;
            for peer_id in self.session.due_for_rekey().await {
                if let Err(e) = self.initiate_rekey(&peer_id).await {
                    warn!(peer = %peer_id, error = %e, "rekey attempt failed");
                }
            }
            for peer_id in self.session.idle_sessions().await {
                self.session.close(&peer_id, "idle timeout").await;
            }
            self.router.evict_expired_peers(crate::protocol::now_ms());
            if self.identity.due_for_rotation() {
                self.rotate_identity().await;
            }
        }
    }

    async fn transfer_admission_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.transport.constrained_pacing);
        loop {
            ticker.tick().await;
            self.transfer.admit();
            self.send_pending_chunks().await;
        }
    }

    /// Sends one not-yet-transmitted chunk for every `Transferring` outgoing
    /// transfer, per tick — the pacing the `constrained_pacing` interval
    /// exists to enforce (spec §4.5's constrained-transport budget).
    async fn send_pending_chunks(self: &Arc<Self>) {
        for transfer_id in self.transfer.outgoing_in_flight() {
            match self.transfer.next_chunk_to_send(transfer_id).await {
                Some(Ok(chunk)) => {
                    if let Err(e) = self.send_chunk(transfer_id, chunk).await {
                        warn!(%transfer_id, error = %e, "failed to send chunk");
                    }
                }
                Some(Err(e)) => warn!(%transfer_id, error = %e, "failed to read chunk from blob"),
                None => {}
            }
        }
    }

    async fn initiate_rekey(&self, peer_id: &PeerId) -> Result<()> {
        let our_new = self.session.initiate_rekey(peer_id).await?;
        let frame = Frame::new(
            FrameType::RekeyRequest,
            self.config.mesh.directed_ttl,
            self.self_id(),
            Some(*peer_id),
            crate::protocol::now_ms(),
            EphemeralKeyPayload::new(*our_new.as_bytes()).encode(),
        );
        self.send_frame(peer_id, frame).await
    }

    /// Rotates our own ephemeral peer id (spec §3 / §8) and broadcasts a
    /// signed `IdentityAnnounce` so the rest of the mesh can remap routing
    /// and session state without a fresh handshake.
    async fn rotate_identity(self: &Arc<Self>) {
        let rotated = self.identity.rotate_peer_id();
        self.router.rotate_self_id(rotated.new);
        self.session.rotate_peer_id(&rotated.old, rotated.new).await;
        self.dispatcher.rotate_peer_id(&rotated.old, rotated.new).await;
        self.transfer.rotate_peer_id(&rotated.old, rotated.new);
        *self.self_id.lock() = rotated.new;

        let signed_bytes = IdentityAnnouncement::signed_bytes(&rotated.old, &rotated.new);
        let announcement = IdentityAnnouncement {
            old_peer_id: rotated.old,
            new_peer_id: rotated.new,
            long_term_public: self.identity.verifying_key_bytes(),
            signature: self.identity.sign(&signed_bytes).to_bytes(),
        };
        let payload = match announcement.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode identity_announce");
                return;
            }
        };
        let frame = Frame::new(
            FrameType::IdentityAnnounce,
            self.config.mesh.broadcast_ttl,
            rotated.new,
            None,
            crate::protocol::now_ms(),
            payload,
        );
        for peer_id in self.router.known_peers_except(&rotated.new) {
            if let Err(e) = self.send_frame(&peer_id, frame.clone()).await {
                warn!(peer = %peer_id, error = %e, "failed to broadcast identity_announce");
            }
        }
        let _ = self.events_tx.send(Event::PeerIdRotated { old: rotated.old, new: rotated.new }).await;
    }

    async fn handle_radio_event(self: &Arc<Self>, event: RadioEvent) {
        match event {
            RadioEvent::PeerDiscovered { peer_id, link_quality, advertised_transports } => {
                let caps: std::collections::HashSet<_> = advertised_transports.iter().copied().collect();
                self.router.note_peer_seen(peer_id, link_quality, advertised_transports, crate::protocol::now_ms());
                self.dispatcher.set_peer_capabilities(peer_id, caps).await;
                self.transfer.on_peer_connected(&peer_id);
                let _ = self.events_tx.send(Event::PeerDiscovered { peer_id }).await;
            }
            RadioEvent::PeerLost { peer_id } => {
                self.router.note_peer_lost(&peer_id);
                self.dispatcher.remove_peer(&peer_id).await;
                self.transfer.on_peer_disconnected(&peer_id);
                let _ = self.events_tx.send(Event::PeerLost { peer_id }).await;
            }
            RadioEvent::FrameReceived { sender_id, bytes, link_quality } => {
                self.router.note_peer_seen(sender_id, link_quality, Vec::new(), crate::protocol::now_ms());
                match Frame::decode(&bytes) {
                    Ok(frame) => self.handle_inbound_frame(sender_id, frame).await,
                    Err(e) => debug!(error = %e, "dropping malformed frame"),
                }
            }
            RadioEvent::AvailabilityChanged { .. } => {}
        }
    }

    async fn handle_inbound_frame(self: &Arc<Self>, sender_id: PeerId, frame: Frame) {
        match self.router.route_inbound(sender_id, frame) {
            RouteOutcome::Dropped => {}
            RouteOutcome::Forward { frame, exclude } => {
                for peer_id in self.router.known_peers_except(&exclude) {
                    let _ = self.send_frame(&peer_id, frame.clone()).await;
                }
            }
            RouteOutcome::Deliver(frame) => self.deliver_locally(sender_id, frame).await,
        }
    }

    async fn deliver_locally(self: &Arc<Self>, sender_id: PeerId, frame: Frame) {
        let result = match frame.frame_type {
            FrameType::Handshake => self.on_handshake(sender_id, &frame.payload).await,
            FrameType::RekeyRequest => self.on_rekey_request(sender_id, &frame.payload).await,
            FrameType::RekeyResponse => self.on_rekey_response(sender_id, &frame.payload).await,
            FrameType::Encrypted => self.on_encrypted(sender_id, &frame.payload).await,
            FrameType::IdentityAnnounce => self.on_identity_announce(sender_id, &frame.payload).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!(peer = %sender_id, error = %e, "error handling inbound frame");
        }
    }

    async fn on_handshake(self: &Arc<Self>, sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let their_ephemeral = EphemeralKeyPayload::decode(payload)?;
        let public = x25519_dalek::PublicKey::from(their_ephemeral.public_key);
        if let Some(our_reply) = self.session.handle_handshake(sender_id, public).await? {
            let _ = self.events_tx.send(Event::PeerAuthenticated { peer_id: sender_id }).await;
            let frame = Frame::new(
                FrameType::Handshake,
                self.config.mesh.directed_ttl,
                self.self_id(),
                Some(sender_id),
                crate::protocol::now_ms(),
                EphemeralKeyPayload::new(*our_reply.as_bytes()).encode(),
            );
            self.send_frame(&sender_id, frame).await?;
        } else {
            let _ = self.events_tx.send(Event::PeerAuthenticated { peer_id: sender_id }).await;
        }
        Ok(())
    }

    async fn on_rekey_request(self: &Arc<Self>, sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let their_ephemeral = EphemeralKeyPayload::decode(payload)?;
        let public = x25519_dalek::PublicKey::from(their_ephemeral.public_key);
        self.session.complete_rekey(&sender_id, public).await?;
        let our_new = self.session.initiate_rekey(&sender_id).await?;
        let frame = Frame::new(
            FrameType::RekeyResponse,
            self.config.mesh.directed_ttl,
            self.self_id(),
            Some(sender_id),
            crate::protocol::now_ms(),
            EphemeralKeyPayload::new(*our_new.as_bytes()).encode(),
        );
        self.send_frame(&sender_id, frame).await
    }

    async fn on_rekey_response(&self, sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let their_ephemeral = EphemeralKeyPayload::decode(payload)?;
        let public = x25519_dalek::PublicKey::from(their_ephemeral.public_key);
        self.session.complete_rekey(&sender_id, public).await
    }

    /// Verifies and applies an `IdentityAnnounce`: remaps every table keyed
    /// on the old peer id (routing, session, in-flight transfers) to the new
    /// one, per spec §8's rotation property.
    async fn on_identity_announce(self: &Arc<Self>, _sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let announcement = IdentityAnnouncement::decode(payload)?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&announcement.long_term_public)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let signed_bytes = IdentityAnnouncement::signed_bytes(&announcement.old_peer_id, &announcement.new_peer_id);
        crate::crypto::keys::verify(&verifying_key, &signed_bytes, &announcement.signature())?;

        self.identity.remap_peer_rotation(announcement.old_peer_id, announcement.new_peer_id, announcement.long_term_public.to_vec());
        self.router.rotate_peer(&announcement.old_peer_id, announcement.new_peer_id);
        self.router.set_long_term_public(&announcement.new_peer_id, announcement.long_term_public.to_vec());
        self.session.rotate_peer_id(&announcement.old_peer_id, announcement.new_peer_id).await;
        self.dispatcher.rotate_peer_id(&announcement.old_peer_id, announcement.new_peer_id).await;
        self.transfer.rotate_peer_id(&announcement.old_peer_id, announcement.new_peer_id);

        let _ = self
            .events_tx
            .send(Event::PeerIdRotated { old: announcement.old_peer_id, new: announcement.new_peer_id })
            .await;
        Ok(())
    }

    /// Seals `plaintext` under the established session with `peer_id` and
    /// sends it as an `ENCRYPTED` frame tagging `inner_type` (spec §4.4:
    /// manifests, chunks, and acks all travel session-encrypted).
    async fn send_encrypted(&self, peer_id: PeerId, inner_type: FrameType, plaintext: &[u8]) -> Result<()> {
        let (counter, ciphertext) = self.session.encrypt_for(&peer_id, plaintext).await?;
        let envelope = EncryptedEnvelope { inner_type, counter, ciphertext };
        let frame = Frame::new(
            FrameType::Encrypted,
            self.config.mesh.directed_ttl,
            self.self_id(),
            Some(peer_id),
            crate::protocol::now_ms(),
            envelope.encode()?,
        );
        self.send_frame(&peer_id, frame).await
    }

    async fn on_encrypted(self: &Arc<Self>, sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let envelope = EncryptedEnvelope::decode(payload)?;
        let plaintext = self.session.decrypt_from(&sender_id, envelope.counter, &envelope.ciphertext).await?;
        match envelope.inner_type {
            FrameType::FileManifest => self.on_manifest(sender_id, &plaintext).await,
            FrameType::FileChunk => self.on_chunk(sender_id, &plaintext).await,
            FrameType::FileAck => self.on_ack(sender_id, &plaintext).await,
            _ => Ok(()),
        }
    }

    async fn on_manifest(self: &Arc<Self>, sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let manifest = Manifest::decode(payload)?;
        let ack = self.transfer.handle_manifest(sender_id, manifest, crate::protocol::now_ms()).await?;
        self.send_ack(sender_id, ack).await
    }

    async fn on_chunk(self: &Arc<Self>, sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let chunk = Chunk::decode(payload)?;
        let transfer_id: TransferId = chunk.file_id.into();
        if let Some(ack) = self.transfer.handle_chunk(transfer_id, chunk, crate::protocol::now_ms()).await? {
            self.send_ack(sender_id, ack).await?;
        }
        Ok(())
    }

    async fn on_ack(self: &Arc<Self>, sender_id: PeerId, payload: &[u8]) -> Result<()> {
        let ack = Ack::decode(payload)?;
        let transfer_id: TransferId = ack.file_id.into();
        let pending = self.transfer.handle_ack(transfer_id, &ack);
        for chunk_index in pending {
            self.resend_chunk(sender_id, transfer_id, chunk_index).await;
        }
        Ok(())
    }

    /// Schedules backoff bookkeeping for an unacked chunk, then actually
    /// retransmits it once the computed delay elapses.
    async fn resend_chunk(self: &Arc<Self>, peer_id: PeerId, transfer_id: TransferId, chunk_index: u32) {
        let Some(delay) = self.transfer.schedule_retry(transfer_id, chunk_index) else {
            return;
        };
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match engine.transfer.read_chunk(transfer_id, chunk_index).await {
                Some(Ok(chunk)) => {
                    if let Err(e) = engine.send_chunk(transfer_id, chunk).await {
                        warn!(peer = %peer_id, %transfer_id, chunk_index, error = %e, "retransmit failed");
                    }
                }
                Some(Err(e)) => warn!(peer = %peer_id, %transfer_id, chunk_index, error = %e, "failed to re-read chunk"),
                None => {}
            }
        });
    }

    async fn send_manifest(&self, transfer_id: TransferId, peer_id: PeerId) -> Result<()> {
        let Some(manifest) = self.transfer.manifest_for(&transfer_id) else {
            return Ok(());
        };
        self.send_encrypted(peer_id, FrameType::FileManifest, &manifest.encode()?).await
    }

    async fn send_chunk(&self, transfer_id: TransferId, chunk: Chunk) -> Result<()> {
        let Some(peer_id) = self.transfer.peer_of(&transfer_id) else {
            return Ok(());
        };
        self.send_encrypted(peer_id, FrameType::FileChunk, &chunk.encode()?).await
    }

    async fn send_ack(&self, peer_id: PeerId, ack: Ack) -> Result<()> {
        self.send_encrypted(peer_id, FrameType::FileAck, &ack.encode()?).await
    }

    async fn send_frame(&self, peer_id: &PeerId, frame: Frame) -> Result<()> {
        let bytes = frame.encode()?;
        let kind = self.dispatcher.select_for_peer(peer_id, bytes.len() as u64).await?;
        let radios = self.radios.read().await;
        let radio = radios.get(&kind).ok_or_else(|| Error::Transport(format!("no radio registered for {kind:?}")))?;
        radio.send(&bytes, Some(*peer_id)).await?;
        self.dispatcher.record_send(kind, bytes.len() as u64).await;
        Ok(())
    }

    /// `queue_send(path, peer_id, priority)`: the public send entry point.
    pub async fn queue_send(&self, path: &Path, peer_id: PeerId, priority: Priority) -> Result<TransferId> {
        let transfer_id = self
            .transfer
            .queue_send(peer_id, path, priority, crate::protocol::now_ms())
            .await?;
        let _ = self.events_tx.send(Event::TransferEnqueued { transfer_id, peer_id }).await;
        Ok(transfer_id)
    }

    pub fn pause(&self, transfer_id: &TransferId) {
        self.transfer.pause(transfer_id);
    }

    pub fn resume(&self, transfer_id: &TransferId) {
        self.transfer.resume(transfer_id);
    }

    pub fn cancel(&self, transfer_id: &TransferId) {
        self.transfer.cancel(transfer_id);
    }

    /// Re-arms a failed, retryable transfer by resuming it and letting the
    /// admission loop pick it back up.
    pub fn retry(&self, transfer_id: &TransferId) {
        self.transfer.resume(transfer_id);
        self.transfer.admit();
    }

    /// Hands out the single-consumer event stream. Panics-free: returns an
    /// error if called more than once.
    pub async fn observe(&self) -> Result<mpsc::Receiver<Event>> {
        self.events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::InvalidState("engine event stream already taken".into()))
    }

    /// Snapshot of every peer currently known to the router (nickname,
    /// signal quality, supported transports, last-seen, long-term public key
    /// if authenticated), minus ourselves.
    pub fn peers(&self) -> Vec<Peer> {
        self.router.peers_snapshot(crate::protocol::now_ms())
    }

    pub fn self_id(&self) -> PeerId {
        *self.self_id.lock()
    }
}
