//! ViewerLink: find the beacon, stay connected, feed the alert list.
//!
//! While started, one task owns a [`ServiceBrowser`] and at most one alert
//! session.  Every endpoint the browser reports is connected to at once; a
//! newly found endpoint replaces the current session, since a changed
//! address means the beacon restarted.
//!
//! Frame bodies are decoded into the shared [`AlertFeed`].  A body that does
//! not decode is recorded as the feed's last error and the session stays
//! open.
//!
//! # Status (for beginners)
//!
//! The UI shows a single line of text plus a connected flag.  Both live in a
//! [`ConnectionStatus`] published on a `watch` channel: subscribers always
//! see the latest value and never a backlog.
//!
//! ```text
//!   disconnected ──start──► searching ──endpoint──► connecting to … ──► connected
//!        ▲                     ▲                                          │
//!        └────────stop─────────┴──────────── connection error: … ◄───────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use sos_net::{
    connect, BrowserConfig, BrowserStatus, ServiceBrowser, ServiceEndpoint, SessionConfig,
    SessionEvent, SessionHandle, SessionState,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::alert_feed::AlertFeed;

/// The alert feed shared between the link task and the UI.
pub type SharedFeed = Arc<Mutex<AlertFeed>>;

/// Connection flag plus a human-readable status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub status: String,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self::offline("disconnected")
    }

    pub fn searching() -> Self {
        Self::offline("searching for the mobile app…")
    }

    pub fn connecting(endpoint: &ServiceEndpoint) -> Self {
        Self::offline(format!("connecting to {endpoint}…"))
    }

    pub fn connected() -> Self {
        Self {
            is_connected: true,
            status: "connected to the mobile app".to_string(),
        }
    }

    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self::offline(format!("connection error: {reason}"))
    }

    fn offline(status: impl Into<String>) -> Self {
        Self {
            is_connected: false,
            status: status.into(),
        }
    }
}

struct ActiveLink {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Discovers the beacon and keeps the alert feed filled.
pub struct ViewerLink {
    browser_config: BrowserConfig,
    session_config: SessionConfig,
    feed: SharedFeed,
    status: watch::Sender<ConnectionStatus>,
    active: Option<ActiveLink>,
}

impl ViewerLink {
    pub fn new(browser_config: BrowserConfig, session_config: SessionConfig, feed: SharedFeed) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::disconnected());
        Self {
            browser_config,
            session_config,
            feed,
            status,
            active: None,
        }
    }

    pub fn feed(&self) -> SharedFeed {
        Arc::clone(&self.feed)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Starts searching, restarting any search in progress.
    pub async fn start(&mut self) {
        self.halt().await;
        self.status.send_replace(ConnectionStatus::searching());

        let (cancel, cancel_rx) = oneshot::channel();
        let task = LinkTask {
            browser: ServiceBrowser::new(self.browser_config.clone()),
            session_config: self.session_config.clone(),
            feed: Arc::clone(&self.feed),
            status: self.status.clone(),
            session: None,
        };
        let task = tokio::spawn(task.run(cancel_rx));
        self.active = Some(ActiveLink { cancel, task });
    }

    /// Stops searching and closes the alert session.  Idempotent.
    pub async fn stop(&mut self) {
        self.halt().await;
        self.status.send_replace(ConnectionStatus::disconnected());
    }

    async fn halt(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.cancel.send(());
        if let Err(e) = active.task.await {
            warn!("viewer link task ended abnormally: {e}");
        }
    }
}

struct LinkTask {
    browser: ServiceBrowser,
    session_config: SessionConfig,
    feed: SharedFeed,
    status: watch::Sender<ConnectionStatus>,
    session: Option<SessionHandle>,
}

impl LinkTask {
    async fn run(mut self, mut cancel: oneshot::Receiver<()>) {
        let mut endpoints = self.browser.start_browsing().await;
        if let BrowserStatus::Failed(reason) = self.browser.status() {
            self.status.send_replace(ConnectionStatus::error(reason));
            return;
        }

        let (events_tx, mut events) = mpsc::channel(32);
        let mut browsing = true;

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => break,
                endpoint = endpoints.recv(), if browsing => match endpoint {
                    Some(endpoint) => self.connect_to(endpoint, events_tx.clone()),
                    None => {
                        debug!("browse ended");
                        browsing = false;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }

        if let Some(session) = self.session.take() {
            session.cancel();
        }
        self.browser.stop_browsing().await;
    }

    fn connect_to(&mut self, endpoint: ServiceEndpoint, events: mpsc::Sender<SessionEvent>) {
        if let Some(previous) = self.session.take() {
            info!("replacing session {} with {endpoint}", previous.id());
            previous.cancel();
        }
        info!("connecting to {endpoint}");
        self.status.send_replace(ConnectionStatus::connecting(&endpoint));
        self.session = Some(connect(endpoint.addr, events, self.session_config.clone()));
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PayloadReceived { id, payload } => {
                let mut feed = self.feed.lock().await;
                match feed.ingest(&payload, Utc::now()) {
                    Ok(alert) => info!(
                        session = %id,
                        sound = alert.primary().map(|d| d.sound.as_str()).unwrap_or("-"),
                        "alert received"
                    ),
                    Err(e) => warn!(session = %id, "{e}"),
                }
            }
            // The viewer never queues fire-and-forget payloads.
            SessionEvent::Undelivered { .. } => {}
            SessionEvent::StateChanged { id, state } => {
                // Transitions of a replaced session are stale.
                if self.session.as_ref().map(SessionHandle::id) != Some(id) {
                    return;
                }
                match state {
                    SessionState::Connecting => {}
                    SessionState::Ready => {
                        self.status.send_replace(ConnectionStatus::connected());
                    }
                    SessionState::Failed(reason) => {
                        self.session = None;
                        self.status.send_replace(ConnectionStatus::error(reason));
                    }
                    SessionState::Cancelled => {
                        self.session = None;
                        self.status.send_replace(ConnectionStatus::disconnected());
                    }
                }
            }
        }
    }
}
