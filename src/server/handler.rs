//! Connection handler
//!
//! Classifies each connection as downloader or uploader and drives the
//! matching protocol flow against the shared [`PairingRegistry`].

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::error::RendezvousError;
use crate::pairing::{MatchNotice, PairingRegistry, UidGenerator, DEFAULT_UID_LENGTH};
use crate::protocol::{ClientRole, Message};
use crate::server::connection::ClientConnection;
use crate::server::liveness::{Liveness, LivenessMonitor, LivenessSettings};
use crate::server::state::{ConnectionState, DownloaderOutcome, SessionOutcome, UploaderOutcome};

/// Default maximum time a downloader may wait for an uploader
pub const DEFAULT_CEILING_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default time a matched downloader has to acknowledge readiness
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time the uploader side waits beyond the downloader's ack window
const CONFIRM_GRACE: Duration = Duration::from_secs(5);

/// Halt reason sent when the ceiling timeout fires
pub const HALT_TIMEOUT: &str = "timeout";

/// Halt reason sent to an uploader whose downloader never acknowledged
pub const HALT_PEER_NOT_READY: &str = "peer not ready";

/// Tunables for the pairing flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingSettings {
    /// Identifier length handed out and accepted
    pub uid_length: usize,
    /// Maximum time a downloader stays registered without a match
    pub ceiling_timeout: Duration,
    /// Time a matched downloader has to send ReadyAck
    pub confirm_timeout: Duration,
    /// Ping/pong timing while waiting
    pub liveness: LivenessSettings,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            uid_length: DEFAULT_UID_LENGTH,
            ceiling_timeout: DEFAULT_CEILING_TIMEOUT,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            liveness: LivenessSettings::default(),
        }
    }
}

/// What ended a downloader's wait
#[derive(Debug)]
enum WaitTrigger {
    Ready(MatchNotice),
    Timeout,
    Halt(String),
    Dead,
    /// The registry closed the entry without our involvement
    Evicted,
}

/// What ended an uploader's wait for confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirmation {
    Ready,
    NotReady,
    Abandoned,
}

/// Per-connection protocol driver; one instance is shared by all tasks
#[derive(Debug)]
pub struct ConnectionHandler {
    registry: Arc<PairingRegistry>,
    generator: UidGenerator,
    settings: PairingSettings,
}

impl ConnectionHandler {
    /// Create a handler backed by `registry`
    pub fn new(registry: Arc<PairingRegistry>, settings: PairingSettings) -> Self {
        Self {
            registry,
            generator: UidGenerator::new(settings.uid_length),
            settings,
        }
    }

    /// The registry this handler pairs against
    pub fn registry(&self) -> &Arc<PairingRegistry> {
        &self.registry
    }

    /// The active settings
    pub fn settings(&self) -> &PairingSettings {
        &self.settings
    }

    /// Drive one connection to completion.
    ///
    /// Errors never escape: they are logged, reported to the peer when the
    /// transport is still writable, and turned into [`SessionOutcome::Rejected`].
    pub async fn handle<S>(&self, mut conn: ClientConnection<S>) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = conn.peer_addr();
        info!("Incoming connection from {}", peer);

        let result = match self.classify(&mut conn).await {
            Ok(ClientRole::Downloader) => self.handle_downloader(&mut conn).await.map(SessionOutcome::Downloader),
            Ok(ClientRole::Uploader) => self.handle_uploader(&mut conn).await.map(SessionOutcome::Uploader),
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                report_failure(&mut conn, &e).await;
                SessionOutcome::Rejected(e.to_string())
            }
        };

        conn.close().await;
        info!("Connection from {} finished: {}", peer, outcome);
        outcome
    }

    /// Read the ClientType message
    async fn classify<S>(&self, conn: &mut ClientConnection<S>) -> Result<ClientRole>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        conn.set_state(ConnectionState::AwaitingClassification);
        match conn.receive_message_timeout(self.settings.liveness.deadline).await? {
            Message::ClientType(role) => Ok(role),
            other => Err(RendezvousError::protocol_error_with_source(
                "Expected ClientType",
                format!("got {:?}", other.kind())
            ).into()),
        }
    }

    async fn handle_downloader<S>(&self, conn: &mut ClientConnection<S>) -> Result<DownloaderOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = conn.peer_addr();
        info!("{} identified as downloader", peer);

        let (mut registration, mut ready_rx) = self.registry.register(peer, &self.generator)?;
        let uid = registration.uid().to_string();

        conn.send_message(&Message::UidAssignment(uid.clone())).await?;
        conn.set_state(ConnectionState::Registered);
        info!("Sent uid to {}", peer);

        let mut trigger = self.wait_for_match(conn, &mut ready_rx).await;

        // Whatever fired, the id is no longer matchable from here on
        registration.release();

        if !matches!(trigger, WaitTrigger::Ready(_)) {
            // An uploader may have committed its signal just before removal
            if let Ok(notice) = ready_rx.try_recv() {
                if matches!(trigger, WaitTrigger::Timeout) {
                    debug!("Match for {} committed before the ceiling timeout", peer);
                    trigger = WaitTrigger::Ready(notice);
                } else {
                    // Dropping the notice tells the uploader the peer is not ready
                    debug!("Discarding match for departed downloader {}", peer);
                }
            }
        }

        match trigger {
            WaitTrigger::Ready(notice) => {
                conn.set_state(ConnectionState::Matched);
                let confirmed = self.complete_match(conn, notice).await;
                Ok(DownloaderOutcome::Matched { uid, confirmed })
            }
            WaitTrigger::Timeout => {
                conn.set_state(ConnectionState::TimedOut);
                info!("Downloader {} timed out after {:?}", peer, self.settings.ceiling_timeout);
                conn.send_halt(HALT_TIMEOUT).await;
                Ok(DownloaderOutcome::TimedOut { uid })
            }
            WaitTrigger::Halt(reason) => {
                conn.set_state(ConnectionState::Halted);
                info!("Downloader {} halted: {}", peer, reason);
                conn.send_halt(&reason).await;
                Ok(DownloaderOutcome::Halted { uid, reason })
            }
            WaitTrigger::Dead => {
                conn.set_state(ConnectionState::LivenessFailed);
                info!("Downloader {} is unreachable, dropping registration", peer);
                Ok(DownloaderOutcome::LivenessFailed { uid })
            }
            WaitTrigger::Evicted => Err(RendezvousError::peer_error_with_peer(
                "Registration closed while waiting",
                peer.to_string()
            ).into()),
        }
    }

    /// Wait for the first of: ready signal, ceiling timeout, Halt from the
    /// downloader, liveness failure.
    async fn wait_for_match<S>(
        &self,
        conn: &mut ClientConnection<S>,
        ready_rx: &mut oneshot::Receiver<MatchNotice>,
    ) -> WaitTrigger
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let ceiling = sleep(self.settings.ceiling_timeout);
        tokio::pin!(ceiling);

        let mut liveness = LivenessMonitor::new(self.settings.liveness);
        let mut ticker = liveness.ticker();

        loop {
            tokio::select! {
                biased;

                notice = &mut *ready_rx => {
                    return match notice {
                        Ok(notice) => WaitTrigger::Ready(notice),
                        Err(_) => WaitTrigger::Evicted,
                    };
                }
                _ = &mut ceiling => return WaitTrigger::Timeout,
                received = conn.receive_message() => match received {
                    Ok(Message::Halt(reason)) => return WaitTrigger::Halt(reason),
                    Ok(message) => {
                        if liveness.on_message(&message) == Liveness::Dead {
                            return WaitTrigger::Dead;
                        }
                    }
                    Err(e) => {
                        info!("Downloader {} went away: {}", conn.peer_addr(), e);
                        return WaitTrigger::Dead;
                    }
                },
                _ = ticker.tick() => {
                    if liveness.on_tick(conn).await == Liveness::Dead {
                        return WaitTrigger::Dead;
                    }
                }
            }
        }
    }

    /// Tell the downloader about its uploader and relay its acknowledgement
    async fn complete_match<S>(&self, conn: &mut ClientConnection<S>, notice: MatchNotice) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        info!("Downloader {} matched with uploader {}", conn.peer_addr(), notice.uploader_addr);

        let confirmed = match conn.send_message(&Message::PeerReady(notice.uploader_addr.to_string())).await {
            Ok(()) => self.await_ready_ack(conn).await,
            Err(e) => {
                info!("Could not notify downloader {}: {}", conn.peer_addr(), e);
                false
            }
        };

        if notice.confirm.send(confirmed).is_err() {
            debug!("Uploader {} left before confirmation", notice.uploader_addr);
        }
        confirmed
    }

    async fn await_ready_ack<S>(&self, conn: &mut ClientConnection<S>) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let acknowledged = timeout(self.settings.confirm_timeout, async {
            loop {
                match conn.receive_message().await {
                    Ok(Message::ReadyAck) => return true,
                    // Late answer to a liveness ping
                    Ok(Message::Pong) => continue,
                    Ok(Message::Halt(reason)) => {
                        info!("Downloader {} halted instead of acknowledging: {}", conn.peer_addr(), reason);
                        return false;
                    }
                    Ok(other) => {
                        warn!("Expected ReadyAck from {}, got {:?}", conn.peer_addr(), other.kind());
                        return false;
                    }
                    Err(e) => {
                        info!("Downloader {} did not acknowledge: {}", conn.peer_addr(), e);
                        return false;
                    }
                }
            }
        })
        .await;

        acknowledged.unwrap_or_else(|_| {
            info!("Downloader {} did not acknowledge within {:?}", conn.peer_addr(), self.settings.confirm_timeout);
            false
        })
    }

    async fn handle_uploader<S>(&self, conn: &mut ClientConnection<S>) -> Result<UploaderOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let peer = conn.peer_addr();
        info!("{} identified as uploader", peer);
        conn.set_state(ConnectionState::AwaitingUid);

        let uid = match conn.receive_message_timeout(self.settings.liveness.deadline).await? {
            Message::UidRequest(uid) => uid,
            other => {
                return Err(RendezvousError::protocol_error_with_source(
                    "Expected UidRequest",
                    format!("got {:?}", other.kind())
                ).into());
            }
        };

        if !self.generator.is_valid_length(&uid) {
            return Err(RendezvousError::protocol_error_with_source(
                "Invalid uid length",
                format!("expected {}, got {}", self.generator.length(), uid.len())
            ).into());
        }

        let (confirm_tx, confirm_rx) = oneshot::channel();
        let notice = MatchNotice {
            uploader_addr: peer,
            confirm: confirm_tx,
        };

        let downloader_addr = match self.registry.find(&uid) {
            Some(entry) => match entry.signal_ready(notice) {
                Ok(()) => Some(entry.addr()),
                Err(reason) => {
                    debug!("Pending downloader rejected signal from {}: {:?}", peer, reason);
                    None
                }
            },
            None => None,
        };

        let Some(downloader_addr) = downloader_addr else {
            info!("No downloader waiting for uploader {}", peer);
            conn.send_message(&Message::PeerNotFound).await?;
            return Ok(UploaderOutcome::PeerNotFound { uid });
        };

        info!("Uploader {} matched downloader {}", peer, downloader_addr);
        conn.send_message(&Message::PeerReady(downloader_addr.to_string())).await?;
        conn.set_state(ConnectionState::AwaitingConfirmation);

        match self.wait_for_confirmation(conn, confirm_rx).await {
            Confirmation::Ready => {
                conn.send_message(&Message::ReadyAck).await?;
                conn.set_state(ConnectionState::Matched);
                Ok(UploaderOutcome::Paired { uid, confirmed: true })
            }
            Confirmation::NotReady => {
                info!("Downloader {} was not ready for uploader {}", downloader_addr, peer);
                conn.send_halt(HALT_PEER_NOT_READY).await;
                Ok(UploaderOutcome::Paired { uid, confirmed: false })
            }
            Confirmation::Abandoned => {
                conn.set_state(ConnectionState::LivenessFailed);
                Ok(UploaderOutcome::Abandoned { uid })
            }
        }
    }

    /// Wait for the downloader's acknowledgement while keeping an eye on
    /// the uploader itself.
    async fn wait_for_confirmation<S>(
        &self,
        conn: &mut ClientConnection<S>,
        mut confirm_rx: oneshot::Receiver<bool>,
    ) -> Confirmation
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let window = sleep(self.settings.confirm_timeout.saturating_add(CONFIRM_GRACE));
        tokio::pin!(window);

        let mut liveness = LivenessMonitor::new(self.settings.liveness);
        let mut ticker = liveness.ticker();

        loop {
            tokio::select! {
                biased;

                confirmed = &mut confirm_rx => {
                    return match confirmed {
                        Ok(true) => Confirmation::Ready,
                        // Downloader reported failure or dropped the notice
                        Ok(false) | Err(_) => Confirmation::NotReady,
                    };
                }
                _ = &mut window => return Confirmation::NotReady,
                received = conn.receive_message() => match received {
                    Ok(Message::Halt(reason)) => {
                        info!("Uploader {} halted while waiting: {}", conn.peer_addr(), reason);
                        return Confirmation::Abandoned;
                    }
                    Ok(message) => {
                        if liveness.on_message(&message) == Liveness::Dead {
                            return Confirmation::Abandoned;
                        }
                    }
                    Err(e) => {
                        info!("Uploader {} went away: {}", conn.peer_addr(), e);
                        return Confirmation::Abandoned;
                    }
                },
                _ = ticker.tick() => {
                    if liveness.on_tick(conn).await == Liveness::Dead {
                        return Confirmation::Abandoned;
                    }
                }
            }
        }
    }
}

/// Log a failed session and tell the peer when that makes sense
async fn report_failure<S>(conn: &mut ClientConnection<S>, err: &anyhow::Error)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match err.downcast_ref::<RendezvousError>() {
        Some(RendezvousError::ProtocolError { .. }) => conn.reject(err).await,
        Some(RendezvousError::IdentifierError { .. }) => {
            error!("Could not allocate uid for {}: {}", conn.peer_addr(), err);
            conn.send_halt("internal error").await;
        }
        _ => warn!("Connection from {} failed: {}", conn.peer_addr(), err),
    }
}
