//! Datagram session transport.
//!
//! A minimal connection-oriented UDP session layer:
//! - a `SessionHost` either listens (accepting at most one remote session)
//!   or dials out;
//! - frames carry a one-byte kind: CONNECT/ACCEPT handshake, DATA with a
//!   channel id, DISCONNECT, PING/PONG keepalive;
//! - connect, packet, and disconnect notifications reach the owner over an
//!   `mpsc` sender, so all session state lives on the owning task.
//!
//! Commands from the owner are processed in order by a single driver task;
//! by the time a `Disconnect` command runs, every earlier `Send` has hit
//! the socket, which is what the `Later` mode relies on. A failed dial
//! leaves no residue: the slot is reusable immediately.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, trace, warn};

const FRAME_CONNECT: u8 = 1;
const FRAME_ACCEPT: u8 = 2;
const FRAME_DATA: u8 = 3;
const FRAME_DISCONNECT: u8 = 4;
const FRAME_PING: u8 = 5;
const FRAME_PONG: u8 = 6;

/// Timer granularity; also the CONNECT retransmit spacing.
const TICK: Duration = Duration::from_millis(250);
/// CONNECT retransmissions before a dial is reported failed.
const DIAL_ATTEMPTS: u32 = 8;
/// Idle time before a keepalive is sent.
const PING_AFTER: Duration = Duration::from_secs(5);
/// Idle time before an established session is dropped.
const TIMEOUT_AFTER: Duration = Duration::from_secs(15);

/// Identifies one remote session within a host.
pub type PeerId = u32;

/// How eagerly a disconnect tears the session down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectMode {
    /// Immediate teardown with a single best-effort notify.
    Now,
    /// Teardown after previously queued sends.
    Later,
    /// Graceful notify.
    Normal,
}

/// Notifications delivered to the host owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The socket is bound and the driver is running.
    Ready,
    Connected {
        peer: PeerId,
    },
    Packet {
        peer: PeerId,
        channel: u8,
        data: Vec<u8>,
    },
    /// Remote disconnect, local disconnect, dial failure, or timeout.
    Disconnected {
        peer: PeerId,
    },
}

enum HostCmd {
    Connect { addr: SocketAddr },
    Send { peer: PeerId, channel: u8, data: Vec<u8> },
    Disconnect { peer: PeerId, mode: DisconnectMode },
    Shutdown,
}

/// Handle to a bound session host. Dropping it stops the driver task.
pub struct SessionHost {
    cmd: mpsc::UnboundedSender<HostCmd>,
    local_addr: SocketAddr,
}

impl SessionHost {
    /// Binds a listening host. At most one remote session is accepted at a
    /// time; further CONNECTs are ignored until it ends.
    pub async fn listen(
        addr: SocketAddr,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        Self::bind(addr, true, events).await
    }

    /// Binds a dialing host; sessions are initiated with [`connect`].
    ///
    /// [`connect`]: SessionHost::connect
    pub async fn dialer(
        addr: SocketAddr,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        Self::bind(addr, false, events).await
    }

    async fn bind(
        addr: SocketAddr,
        accepting: bool,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("udp bind {addr}"))?;
        let local_addr = socket.local_addr().context("udp local addr")?;
        let (cmd, rx) = mpsc::unbounded_channel();

        let driver = Driver {
            socket,
            accepting,
            peers: HashMap::new(),
            routes: HashMap::new(),
            next_peer: 1,
            events,
            rx,
        };
        tokio::spawn(driver.run());

        Ok(Self { cmd, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts a dial. Any prior session on this host is discarded without
    /// notification; the owner is expected to have released it.
    pub fn connect(&self, addr: SocketAddr) -> bool {
        self.cmd.send(HostCmd::Connect { addr }).is_ok()
    }

    pub fn send(&self, peer: PeerId, channel: u8, data: Vec<u8>) -> bool {
        self.cmd.send(HostCmd::Send { peer, channel, data }).is_ok()
    }

    pub fn disconnect(&self, peer: PeerId, mode: DisconnectMode) -> bool {
        self.cmd.send(HostCmd::Disconnect { peer, mode }).is_ok()
    }

    /// Notifies every remote and stops the driver.
    pub fn shutdown(&self) {
        let _ = self.cmd.send(HostCmd::Shutdown);
    }
}

struct PeerState {
    id: PeerId,
    addr: SocketAddr,
    established: bool,
    dial_attempts: u32,
    last_recv: Instant,
    last_ping: Instant,
}

struct Driver {
    socket: UdpSocket,
    accepting: bool,
    peers: HashMap<SocketAddr, PeerState>,
    routes: HashMap<PeerId, SocketAddr>,
    next_peer: PeerId,
    events: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<HostCmd>,
}

impl Driver {
    async fn run(mut self) {
        let mut buf = vec![0u8; 64 * 1024];
        let mut tick = interval(TICK);
        self.emit(SessionEvent::Ready);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_cmd(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                recv = self.socket.recv_from(&mut buf) => match recv {
                    Ok((n, from)) => self.handle_frame(&buf[..n], from).await,
                    Err(err) => {
                        // Transient (e.g. ICMP unreachable surfaced on the
                        // socket); sessions reap via timeout.
                        trace!(error = %err, "udp recv error");
                    }
                },
                _ = tick.tick() => self.handle_tick().await,
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn send_kind(&self, addr: SocketAddr, kind: u8) {
        if let Err(err) = self.socket.send_to(&[kind], addr).await {
            trace!(%addr, kind, error = %err, "udp send error");
        }
    }

    async fn handle_cmd(&mut self, cmd: HostCmd) -> bool {
        match cmd {
            HostCmd::Connect { addr } => {
                self.peers.clear();
                self.routes.clear();
                let id = self.next_peer;
                self.next_peer += 1;
                self.peers.insert(
                    addr,
                    PeerState {
                        id,
                        addr,
                        established: false,
                        dial_attempts: 1,
                        last_recv: Instant::now(),
                        last_ping: Instant::now(),
                    },
                );
                self.routes.insert(id, addr);
                debug!(%addr, peer = id, "dialing");
                self.send_kind(addr, FRAME_CONNECT).await;
                false
            }
            HostCmd::Send { peer, channel, data } => {
                let Some(addr) = self.routes.get(&peer).copied() else {
                    trace!(peer, "send to unknown peer dropped");
                    return false;
                };
                let mut frame = BytesMut::with_capacity(2 + data.len());
                frame.put_u8(FRAME_DATA);
                frame.put_u8(channel);
                frame.put_slice(&data);
                if let Err(err) = self.socket.send_to(&frame, addr).await {
                    trace!(%addr, error = %err, "udp send error");
                }
                false
            }
            HostCmd::Disconnect { peer, mode } => {
                if let Some(addr) = self.routes.remove(&peer) {
                    self.peers.remove(&addr);
                    debug!(%addr, peer, ?mode, "disconnecting");
                    self.send_kind(addr, FRAME_DISCONNECT).await;
                    self.emit(SessionEvent::Disconnected { peer });
                }
                false
            }
            HostCmd::Shutdown => {
                for addr in self.routes.values().copied().collect::<Vec<_>>() {
                    self.send_kind(addr, FRAME_DISCONNECT).await;
                }
                true
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8], from: SocketAddr) {
        let Some(&kind) = frame.first() else {
            return;
        };
        match kind {
            FRAME_CONNECT => {
                if !self.accepting {
                    return;
                }
                if let Some(peer) = self.peers.get_mut(&from) {
                    // Retransmitted dial; answer again.
                    peer.last_recv = Instant::now();
                    self.send_kind(from, FRAME_ACCEPT).await;
                    return;
                }
                if !self.peers.is_empty() {
                    trace!(%from, "session busy, dial ignored");
                    return;
                }
                let id = self.next_peer;
                self.next_peer += 1;
                self.peers.insert(
                    from,
                    PeerState {
                        id,
                        addr: from,
                        established: true,
                        dial_attempts: 0,
                        last_recv: Instant::now(),
                        last_ping: Instant::now(),
                    },
                );
                self.routes.insert(id, from);
                self.send_kind(from, FRAME_ACCEPT).await;
                debug!(%from, peer = id, "session accepted");
                self.emit(SessionEvent::Connected { peer: id });
            }
            FRAME_ACCEPT => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.last_recv = Instant::now();
                    if !peer.established {
                        peer.established = true;
                        let id = peer.id;
                        debug!(%from, peer = id, "dial accepted");
                        self.emit(SessionEvent::Connected { peer: id });
                    }
                }
            }
            FRAME_DATA => {
                if frame.len() < 2 {
                    return;
                }
                if let Some(peer) = self.peers.get_mut(&from) {
                    if !peer.established {
                        return;
                    }
                    peer.last_recv = Instant::now();
                    let id = peer.id;
                    self.emit(SessionEvent::Packet {
                        peer: id,
                        channel: frame[1],
                        data: frame[2..].to_vec(),
                    });
                }
            }
            FRAME_DISCONNECT => {
                if let Some(peer) = self.peers.remove(&from) {
                    self.routes.remove(&peer.id);
                    debug!(%from, peer = peer.id, "remote disconnected");
                    self.emit(SessionEvent::Disconnected { peer: peer.id });
                }
            }
            FRAME_PING => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.last_recv = Instant::now();
                }
                self.send_kind(from, FRAME_PONG).await;
            }
            FRAME_PONG => {
                if let Some(peer) = self.peers.get_mut(&from) {
                    peer.last_recv = Instant::now();
                }
            }
            other => trace!(%from, kind = other, "unknown frame kind"),
        }
    }

    async fn handle_tick(&mut self) {
        let now = Instant::now();
        let mut dropped: Vec<PeerId> = Vec::new();
        let mut dial_again: Vec<SocketAddr> = Vec::new();
        let mut ping: Vec<SocketAddr> = Vec::new();

        for peer in self.peers.values_mut() {
            if !peer.established {
                peer.dial_attempts += 1;
                if peer.dial_attempts > DIAL_ATTEMPTS {
                    warn!(addr = %peer.addr, peer = peer.id, "dial timed out");
                    dropped.push(peer.id);
                } else {
                    dial_again.push(peer.addr);
                }
            } else if now.duration_since(peer.last_recv) > TIMEOUT_AFTER {
                warn!(addr = %peer.addr, peer = peer.id, "session timed out");
                dropped.push(peer.id);
            } else if now.duration_since(peer.last_recv) > PING_AFTER
                && now.duration_since(peer.last_ping) > PING_AFTER
            {
                peer.last_ping = now;
                ping.push(peer.addr);
            }
        }

        for addr in dial_again {
            self.send_kind(addr, FRAME_CONNECT).await;
        }
        for addr in ping {
            self.send_kind(addr, FRAME_PING).await;
        }
        for id in dropped {
            if let Some(addr) = self.routes.remove(&id) {
                self.peers.remove(&addr);
            }
            self.emit(SessionEvent::Disconnected { peer: id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn expect_event(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        what: &str,
    ) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .unwrap_or_else(|| panic!("channel closed waiting for {what}"))
    }

    #[tokio::test]
    async fn connect_exchange_disconnect() {
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let (client_tx, mut client_rx) = mpsc::unbounded_channel();

        let server = SessionHost::listen(loopback(), server_tx).await.unwrap();
        let client = SessionHost::dialer(loopback(), client_tx).await.unwrap();

        assert_eq!(expect_event(&mut server_rx, "ready").await, SessionEvent::Ready);
        assert_eq!(expect_event(&mut client_rx, "ready").await, SessionEvent::Ready);

        assert!(client.connect(server.local_addr()));
        let client_peer = match expect_event(&mut client_rx, "dial accept").await {
            SessionEvent::Connected { peer } => peer,
            other => panic!("expected Connected, got {other:?}"),
        };
        let server_peer = match expect_event(&mut server_rx, "accept").await {
            SessionEvent::Connected { peer } => peer,
            other => panic!("expected Connected, got {other:?}"),
        };

        assert!(client.send(client_peer, 0, b"hello".to_vec()));
        match expect_event(&mut server_rx, "packet").await {
            SessionEvent::Packet { peer, channel, data } => {
                assert_eq!(peer, server_peer);
                assert_eq!(channel, 0);
                assert_eq!(data, b"hello");
            }
            other => panic!("expected Packet, got {other:?}"),
        }

        assert!(server.send(server_peer, 1, b"world".to_vec()));
        match expect_event(&mut client_rx, "packet").await {
            SessionEvent::Packet { channel, data, .. } => {
                assert_eq!(channel, 1);
                assert_eq!(data, b"world");
            }
            other => panic!("expected Packet, got {other:?}"),
        }

        assert!(client.disconnect(client_peer, DisconnectMode::Normal));
        assert_eq!(
            expect_event(&mut client_rx, "local disconnect").await,
            SessionEvent::Disconnected { peer: client_peer }
        );
        assert_eq!(
            expect_event(&mut server_rx, "remote disconnect").await,
            SessionEvent::Disconnected { peer: server_peer }
        );
    }

    #[tokio::test]
    async fn dial_to_dead_port_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = SessionHost::dialer(loopback(), tx).await.unwrap();
        assert_eq!(expect_event(&mut rx, "ready").await, SessionEvent::Ready);

        // Bind-and-drop to get a port nothing listens on.
        let dead = {
            let s = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            s.local_addr().unwrap()
        };

        assert!(client.connect(dead));
        match expect_event(&mut rx, "dial failure").await {
            SessionEvent::Disconnected { .. } => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_dial_is_ignored_while_busy() {
        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();

        let server = SessionHost::listen(loopback(), server_tx).await.unwrap();
        let a = SessionHost::dialer(loopback(), a_tx).await.unwrap();
        let b = SessionHost::dialer(loopback(), b_tx).await.unwrap();
        assert_eq!(expect_event(&mut server_rx, "ready").await, SessionEvent::Ready);
        assert_eq!(expect_event(&mut a_rx, "ready").await, SessionEvent::Ready);
        assert_eq!(expect_event(&mut b_rx, "ready").await, SessionEvent::Ready);

        assert!(a.connect(server.local_addr()));
        assert!(matches!(
            expect_event(&mut a_rx, "first dial").await,
            SessionEvent::Connected { .. }
        ));
        assert!(matches!(
            expect_event(&mut server_rx, "first accept").await,
            SessionEvent::Connected { .. }
        ));

        // The second dial must never produce an accept while the first
        // session is alive; it eventually times out.
        assert!(b.connect(server.local_addr()));
        match expect_event(&mut b_rx, "second dial outcome").await {
            SessionEvent::Disconnected { .. } => {}
            other => panic!("expected rejected dial, got {other:?}"),
        }
    }
}
