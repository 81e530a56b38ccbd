//! Liveness monitor
//!
//! Application-level ping/pong used while a handler is blocked waiting on
//! the other side. A peer whose TCP stack is alive but whose process hangs
//! still fails these checks.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{info, trace};

use crate::protocol::Message;
use crate::server::connection::ClientConnection;

/// Default interval between liveness checks
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Default time a peer has to answer a ping
pub const DEFAULT_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);

/// Longest period the ticker will wait between checks
pub const LONGEST_TICK: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Probe timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    /// How often the monitor checks in on an idle peer
    pub probe_interval: Duration,
    /// How long an outstanding ping may go unanswered
    pub deadline: Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            deadline: DEFAULT_LIVENESS_DEADLINE,
        }
    }
}

/// Result of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Peer answered or is still within its deadline
    Alive,
    /// Peer missed the deadline or answered with the wrong message
    Dead,
}

/// Tracks the outstanding ping for one connection
#[derive(Debug)]
pub struct LivenessMonitor {
    settings: LivenessSettings,
    /// When the unanswered ping was sent
    outstanding: Option<Instant>,
}

impl LivenessMonitor {
    /// Create a monitor with no ping outstanding
    pub fn new(settings: LivenessSettings) -> Self {
        Self {
            settings,
            outstanding: None,
        }
    }

    /// Interval driving [`on_tick`](Self::on_tick). The first tick fires one
    /// probe interval from now, capped at [`LONGEST_TICK`]; missed ticks are
    /// delayed, not bunched.
    pub fn ticker(&self) -> Interval {
        let period = self.settings.probe_interval.min(LONGEST_TICK);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Whether a ping is waiting for its pong
    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Periodic check: ping an idle peer, or declare it dead once its
    /// outstanding ping is past the deadline.
    pub async fn on_tick<S>(&mut self, conn: &mut ClientConnection<S>) -> Liveness
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self.outstanding {
            Some(sent_at) if sent_at.elapsed() >= self.settings.deadline => {
                info!("{} missed its ping deadline of {:?}", conn.peer_addr(), self.settings.deadline);
                Liveness::Dead
            }
            Some(_) => Liveness::Alive,
            None => {
                if let Err(e) = conn.send_message(&Message::Ping).await {
                    info!("Could not ping {}: {}", conn.peer_addr(), e);
                    return Liveness::Dead;
                }
                trace!("Pinged {}", conn.peer_addr());
                self.outstanding = Some(Instant::now());
                Liveness::Alive
            }
        }
    }

    /// Account for a message received while waiting. A Pong answers the
    /// outstanding ping; any other kind means the peer is not speaking the
    /// waiting protocol and is treated as gone.
    pub fn on_message(&mut self, message: &Message) -> Liveness {
        match message {
            Message::Pong => {
                if let Some(sent_at) = self.outstanding.take() {
                    trace!("Pong after {:?}", sent_at.elapsed());
                }
                Liveness::Alive
            }
            other => {
                info!("Expected Pong while waiting, got {:?}", other.kind());
                Liveness::Dead
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{duplex, DuplexStream};

    fn settings() -> LivenessSettings {
        LivenessSettings {
            probe_interval: Duration::from_millis(10),
            deadline: Duration::from_millis(50),
        }
    }

    fn pair() -> (ClientConnection<DuplexStream>, ClientConnection<DuplexStream>) {
        let addr = SocketAddr::from(([127, 0, 0, 1], 4000));
        let (a, b) = duplex(1024);
        (ClientConnection::new(a, addr), ClientConnection::new(b, addr))
    }

    #[test]
    fn test_default_settings() {
        let settings = LivenessSettings::default();
        assert_eq!(settings.probe_interval, Duration::from_secs(1));
        assert_eq!(settings.deadline, Duration::from_secs(30));
    }

    #[test]
    fn test_wrong_message_is_dead() {
        let mut monitor = LivenessMonitor::new(settings());
        assert_eq!(monitor.on_message(&Message::ReadyAck), Liveness::Dead);
        assert_eq!(monitor.on_message(&Message::Pong), Liveness::Alive);
    }

    #[tokio::test]
    async fn test_tick_sends_ping_then_pong_clears() {
        let (mut server, mut peer) = pair();
        let mut monitor = LivenessMonitor::new(settings());

        assert_eq!(monitor.on_tick(&mut server).await, Liveness::Alive);
        assert!(monitor.is_outstanding());
        assert_eq!(peer.receive_message().await.unwrap(), Message::Ping);

        // A second tick inside the deadline does not send another ping
        assert_eq!(monitor.on_tick(&mut server).await, Liveness::Alive);

        assert_eq!(monitor.on_message(&Message::Pong), Liveness::Alive);
        assert!(!monitor.is_outstanding());
    }

    #[tokio::test]
    async fn test_tick_past_deadline_is_dead() {
        let (mut server, _peer) = pair();
        let mut monitor = LivenessMonitor::new(settings());

        monitor.on_tick(&mut server).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(monitor.on_tick(&mut server).await, Liveness::Dead);
    }

    #[tokio::test]
    async fn test_ticker_first_tick_is_delayed() {
        let monitor = LivenessMonitor::new(settings());
        let mut ticker = monitor.ticker();
        let start = Instant::now();
        ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_millis(9));
    }

    #[tokio::test]
    async fn test_ticker_with_huge_interval() {
        let monitor = LivenessMonitor::new(LivenessSettings {
            probe_interval: Duration::MAX,
            deadline: Duration::MAX,
        });
        let ticker = monitor.ticker();
        assert_eq!(ticker.period(), LONGEST_TICK);
    }
}
