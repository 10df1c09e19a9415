//! Advertiser-side fan-out of alert payloads to every connected viewer.
//!
//! The registry is an actor: one task owns the set of tracked peers and the
//! single pending-payload slot, and nothing else mutates them.  Callers talk
//! to it through a cheap, cloneable [`PeerRegistry`] handle; sessions report
//! their state changes through the channel returned by
//! [`PeerRegistry::event_sender`].
//!
//! # Delivery rules
//!
//! - With at least one `Ready` peer, a broadcast goes to all of them.  A
//!   failing peer never keeps the others from receiving the payload.
//! - With no `Ready` peer, the payload is held as *pending*.  A newer
//!   broadcast replaces it; at most one payload is ever held.
//! - The pending payload is flushed to every `Ready` peer the moment any peer
//!   becomes `Ready`.
//! - Peers are dropped from the set when they reach a terminal state.
//! - If the latest payload comes back undelivered from every peer it was
//!   queued on, it is held as pending again.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::session::{SessionEvent, SessionHandle, SessionId, SessionState, TransportError};

/// What the registry needs from a connected peer.
#[cfg_attr(test, mockall::automock)]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> SessionId;

    fn state(&self) -> SessionState;

    /// Queues `payload` for the peer without waiting for the write.
    fn try_deliver(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    fn cancel(&self);
}

impl PeerLink for SessionHandle {
    fn id(&self) -> SessionId {
        SessionHandle::id(self)
    }

    fn state(&self) -> SessionState {
        SessionHandle::state(self)
    }

    fn try_deliver(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.try_send(payload)
    }

    fn cancel(&self) {
        SessionHandle::cancel(self)
    }
}

/// Result of a [`PeerRegistry::broadcast`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Queued on this many ready peers.
    Delivered(usize),
    /// No ready peer accepted it; held for the next one.
    Pending,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrySnapshot {
    pub peers: usize,
    pub ready: usize,
    pub has_pending: bool,
}

enum RegistryCommand {
    Register(Box<dyn PeerLink>),
    Broadcast {
        payload: Vec<u8>,
        reply: oneshot::Sender<BroadcastOutcome>,
    },
    Snapshot(oneshot::Sender<RegistrySnapshot>),
    DisconnectAll(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the registry task.
#[derive(Clone)]
pub struct PeerRegistry {
    commands: mpsc::Sender<RegistryCommand>,
    events: mpsc::Sender<SessionEvent>,
}

impl PeerRegistry {
    /// Spawns the registry task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(256);
        let actor = RegistryActor {
            peers: HashMap::new(),
            pending: None,
            latest: None,
        };
        tokio::spawn(actor.run(commands_rx, events_rx));
        Self {
            commands: commands_tx,
            events: events_tx,
        }
    }

    /// Channel sessions tracked by this registry must report to.
    pub fn event_sender(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Starts tracking `link` until it reaches a terminal state.
    pub async fn register(&self, link: Box<dyn PeerLink>) {
        if self
            .commands
            .send(RegistryCommand::Register(link))
            .await
            .is_err()
        {
            warn!("peer registry is shut down; dropping registration");
        }
    }

    /// Delivers `payload` to every ready peer or holds it as pending.
    ///
    /// After [`PeerRegistry::shutdown`] the payload is dropped and
    /// `Pending` is returned.
    pub async fn broadcast(&self, payload: Vec<u8>) -> BroadcastOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::Broadcast { payload, reply })
            .await
            .is_err()
        {
            warn!("peer registry is shut down; dropping broadcast");
            return BroadcastOutcome::Pending;
        }
        rx.await.unwrap_or(BroadcastOutcome::Pending)
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::Snapshot(reply))
            .await
            .is_err()
        {
            return RegistrySnapshot::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Cancels and forgets every tracked peer.  A pending payload is kept.
    pub async fn disconnect_all(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::DisconnectAll(reply))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Cancels every peer and stops the registry task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(RegistryCommand::Shutdown(reply))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// The most recent broadcast and the peers it is still queued on.
struct LatestBroadcast {
    payload: Vec<u8>,
    queued_on: HashSet<SessionId>,
}

struct RegistryActor {
    peers: HashMap<SessionId, Box<dyn PeerLink>>,
    pending: Option<Vec<u8>>,
    latest: Option<LatestBroadcast>,
}

impl RegistryActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<RegistryCommand>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RegistryCommand::Register(link)) => self.register(link),
                    Some(RegistryCommand::Broadcast { payload, reply }) => {
                        let _ = reply.send(self.broadcast(payload));
                    }
                    Some(RegistryCommand::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(RegistryCommand::DisconnectAll(reply)) => {
                        self.disconnect_all();
                        let _ = reply.send(());
                    }
                    Some(RegistryCommand::Shutdown(reply)) => {
                        self.disconnect_all();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.disconnect_all();
                        break;
                    }
                },
                Some(event) = events.recv() => self.on_session_event(event),
            }
        }
        debug!("peer registry stopped");
    }

    fn register(&mut self, link: Box<dyn PeerLink>) {
        let id = link.id();
        // The session may have changed state before this command arrived.
        let state = link.state();
        if state.is_terminal() {
            debug!("peer {id} already {state:?}; not tracking");
            return;
        }
        info!("tracking peer {id} ({state:?})");
        self.peers.insert(id, link);
        if state.is_ready() {
            self.flush_pending();
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { id, state } => {
                if state.is_terminal() {
                    if self.peers.remove(&id).is_some() {
                        info!("peer {id} left ({state:?})");
                    }
                } else if state.is_ready() && self.peers.contains_key(&id) {
                    self.flush_pending();
                }
            }
            SessionEvent::PayloadReceived { id, payload } => {
                debug!("ignoring {} byte payload from peer {id}", payload.len());
            }
            SessionEvent::Undelivered { id, payload } => self.on_undelivered(id, payload),
        }
    }

    fn on_undelivered(&mut self, id: SessionId, payload: Vec<u8>) {
        // The session is closing; its terminal state follows this event.
        if self.peers.remove(&id).is_some() {
            debug!("peer {id} is closing with unwritten payloads");
        }
        let Some(latest) = self.latest.as_mut() else {
            return;
        };
        if latest.payload != payload || !latest.queued_on.remove(&id) {
            debug!("dropping superseded {} byte payload from peer {id}", payload.len());
            return;
        }
        if !latest.queued_on.is_empty() {
            return;
        }
        if self.pending.is_none() {
            warn!("latest payload reached no peer; holding it again");
            self.pending = Some(payload);
            self.flush_pending();
        }
    }

    fn broadcast(&mut self, payload: Vec<u8>) -> BroadcastOutcome {
        let queued_on = self.deliver(&payload);
        let outcome = if queued_on.is_empty() {
            debug!("no ready peer; holding {} byte payload", payload.len());
            self.pending = Some(payload.clone());
            BroadcastOutcome::Pending
        } else {
            info!("broadcast {} byte payload to {} peer(s)", payload.len(), queued_on.len());
            BroadcastOutcome::Delivered(queued_on.len())
        };
        self.latest = Some(LatestBroadcast { payload, queued_on });
        outcome
    }

    fn flush_pending(&mut self) {
        let Some(payload) = self.pending.take() else {
            return;
        };
        let queued_on = self.deliver(&payload);
        if queued_on.is_empty() {
            self.pending = Some(payload);
            return;
        }
        info!("flushed pending payload to {} peer(s)", queued_on.len());
        match self.latest.as_mut() {
            Some(latest) if latest.payload == payload => latest.queued_on.extend(queued_on),
            _ => self.latest = Some(LatestBroadcast { payload, queued_on }),
        }
    }

    /// Queues `payload` on every ready peer and returns the ones that accepted it.
    fn deliver(&self, payload: &[u8]) -> HashSet<SessionId> {
        self.peers
            .values()
            .filter(|link| link.state().is_ready())
            .filter(|link| match link.try_deliver(payload.to_vec()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("delivery to peer {} failed: {e}", link.id());
                    false
                }
            })
            .map(|link| link.id())
            .collect()
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            peers: self.peers.len(),
            ready: self
                .peers
                .values()
                .filter(|link| link.state().is_ready())
                .count(),
            has_pending: self.pending.is_some(),
        }
    }

    fn disconnect_all(&mut self) {
        for (id, link) in self.peers.drain() {
            debug!("cancelling peer {id}");
            link.cancel();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A mock peer whose readiness is controlled by `ready` and whose
    /// deliveries are recorded in `received`.
    fn mock_peer(
        id: SessionId,
        ready: Arc<AtomicBool>,
        received: Arc<Mutex<Vec<Vec<u8>>>>,
    ) -> MockPeerLink {
        let mut link = MockPeerLink::new();
        link.expect_id().return_const(id);
        link.expect_state().returning(move || {
            if ready.load(Ordering::SeqCst) {
                SessionState::Ready
            } else {
                SessionState::Connecting
            }
        });
        link.expect_try_deliver().returning(move |payload| {
            received.lock().unwrap().push(payload);
            Ok(())
        });
        link.expect_cancel().return_const(());
        link
    }

    /// Events and commands travel on separate channels, so a snapshot can
    /// overtake an event.  Polls until `done` holds or gives up.
    async fn settle(
        registry: &PeerRegistry,
        done: impl Fn(&RegistrySnapshot) -> bool,
    ) -> RegistrySnapshot {
        let mut snapshot = registry.snapshot().await;
        for _ in 0..100 {
            if done(&snapshot) {
                break;
            }
            tokio::task::yield_now().await;
            snapshot = registry.snapshot().await;
        }
        snapshot
    }

    #[tokio::test]
    async fn test_broadcast_without_peers_is_held() {
        let registry = PeerRegistry::spawn();

        let outcome = registry.broadcast(b"first".to_vec()).await;

        assert_eq!(outcome, BroadcastOutcome::Pending);
        assert!(registry.snapshot().await.has_pending);
    }

    #[tokio::test]
    async fn test_pending_payload_is_delivered_once_when_peer_becomes_ready() {
        // Arrange
        let registry = PeerRegistry::spawn();
        let id = SessionId::new();
        let ready = Arc::new(AtomicBool::new(false));
        let received = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(mock_peer(id, Arc::clone(&ready), Arc::clone(&received))))
            .await;

        // Act
        registry.broadcast(b"older".to_vec()).await;
        registry.broadcast(b"latest".to_vec()).await;
        ready.store(true, Ordering::SeqCst);
        registry
            .event_sender()
            .send(SessionEvent::StateChanged { id, state: SessionState::Ready })
            .await
            .unwrap();
        let snapshot = settle(&registry, |s| !s.has_pending).await;

        // Assert
        assert!(!snapshot.has_pending);
        assert_eq!(*received.lock().unwrap(), vec![b"latest".to_vec()]);
    }

    #[tokio::test]
    async fn test_registering_a_ready_peer_flushes_pending() {
        let registry = PeerRegistry::spawn();
        registry.broadcast(b"held".to_vec()).await;
        let received = Arc::new(Mutex::new(Vec::new()));

        registry
            .register(Box::new(mock_peer(
                SessionId::new(),
                Arc::new(AtomicBool::new(true)),
                Arc::clone(&received),
            )))
            .await;
        let snapshot = registry.snapshot().await;

        assert_eq!(snapshot.ready, 1);
        assert!(!snapshot.has_pending);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_peer_does_not_block_others() {
        let registry = PeerRegistry::spawn();
        let received = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            registry
                .register(Box::new(mock_peer(
                    SessionId::new(),
                    Arc::new(AtomicBool::new(true)),
                    Arc::clone(&received),
                )))
                .await;
        }
        let mut broken = MockPeerLink::new();
        let broken_id = SessionId::new();
        broken.expect_id().return_const(broken_id);
        broken.expect_state().return_const(SessionState::Ready);
        broken
            .expect_try_deliver()
            .times(1)
            .returning(move |_| Err(TransportError::SessionClosed(broken_id)));
        broken.expect_cancel().return_const(());
        registry.register(Box::new(broken)).await;

        let outcome = registry.broadcast(b"alert".to_vec()).await;

        assert_eq!(outcome, BroadcastOutcome::Delivered(2));
        assert_eq!(received.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_latest_payload_returned_undelivered_is_held_again() {
        // Arrange
        let registry = PeerRegistry::spawn();
        let first = SessionId::new();
        registry
            .register(Box::new(mock_peer(
                first,
                Arc::new(AtomicBool::new(true)),
                Arc::new(Mutex::new(Vec::new())),
            )))
            .await;
        assert_eq!(
            registry.broadcast(b"alert".to_vec()).await,
            BroadcastOutcome::Delivered(1)
        );

        // Act
        registry
            .event_sender()
            .send(SessionEvent::Undelivered {
                id: first,
                payload: b"alert".to_vec(),
            })
            .await
            .unwrap();
        let snapshot = settle(&registry, |s| s.has_pending).await;
        let received = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(mock_peer(
                SessionId::new(),
                Arc::new(AtomicBool::new(true)),
                Arc::clone(&received),
            )))
            .await;

        // Assert
        assert!(snapshot.has_pending);
        assert_eq!(snapshot.peers, 0);
        assert_eq!(*received.lock().unwrap(), vec![b"alert".to_vec()]);
        assert!(!registry.snapshot().await.has_pending);
    }

    #[tokio::test]
    async fn test_undelivered_payload_still_queued_elsewhere_is_not_held() {
        let registry = PeerRegistry::spawn();
        let failing = SessionId::new();
        let healthy = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(Box::new(mock_peer(
                failing,
                Arc::new(AtomicBool::new(true)),
                Arc::new(Mutex::new(Vec::new())),
            )))
            .await;
        registry
            .register(Box::new(mock_peer(
                SessionId::new(),
                Arc::new(AtomicBool::new(true)),
                Arc::clone(&healthy),
            )))
            .await;
        registry.broadcast(b"alert".to_vec()).await;

        registry
            .event_sender()
            .send(SessionEvent::Undelivered {
                id: failing,
                payload: b"alert".to_vec(),
            })
            .await
            .unwrap();
        let snapshot = settle(&registry, |s| s.peers == 1).await;

        assert_eq!(snapshot.peers, 1);
        assert!(!snapshot.has_pending);
        assert_eq!(healthy.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_undelivered_payload_is_dropped() {
        let registry = PeerRegistry::spawn();
        let id = SessionId::new();
        registry
            .register(Box::new(mock_peer(
                id,
                Arc::new(AtomicBool::new(true)),
                Arc::new(Mutex::new(Vec::new())),
            )))
            .await;
        registry.broadcast(b"old".to_vec()).await;
        registry.broadcast(b"new".to_vec()).await;

        registry
            .event_sender()
            .send(SessionEvent::Undelivered {
                id,
                payload: b"old".to_vec(),
            })
            .await
            .unwrap();
        let snapshot = settle(&registry, |s| s.peers == 0).await;

        assert_eq!(snapshot.peers, 0);
        assert!(!snapshot.has_pending);
    }

    #[tokio::test]
    async fn test_terminal_peer_is_removed() {
        let registry = PeerRegistry::spawn();
        let id = SessionId::new();
        registry
            .register(Box::new(mock_peer(
                id,
                Arc::new(AtomicBool::new(true)),
                Arc::new(Mutex::new(Vec::new())),
            )))
            .await;

        registry
            .event_sender()
            .send(SessionEvent::StateChanged {
                id,
                state: SessionState::Failed("connection closed by peer".into()),
            })
            .await
            .unwrap();
        let snapshot = settle(&registry, |s| s.peers == 0).await;

        assert_eq!(snapshot.peers, 0);
    }

    #[tokio::test]
    async fn test_already_terminal_peer_is_not_tracked() {
        let registry = PeerRegistry::spawn();
        let mut link = MockPeerLink::new();
        link.expect_id().return_const(SessionId::new());
        link.expect_state().return_const(SessionState::Cancelled);

        registry.register(Box::new(link)).await;

        assert_eq!(registry.snapshot().await.peers, 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_every_peer() {
        let registry = PeerRegistry::spawn();
        let cancelled = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let mut link = MockPeerLink::new();
            link.expect_id().return_const(SessionId::new());
            link.expect_state().return_const(SessionState::Ready);
            let counter = Arc::clone(&cancelled);
            link.expect_cancel().times(1).returning(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            registry.register(Box::new(link)).await;
        }

        registry.shutdown().await;

        assert_eq!(cancelled.load(Ordering::SeqCst), 3);
        assert_eq!(registry.broadcast(b"late".to_vec()).await, BroadcastOutcome::Pending);
    }
}
