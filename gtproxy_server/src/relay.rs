//! Relay core.
//!
//! One task owns every piece of session state: the inbound listener the
//! game client dials, the outbound dialer to the real server, the pending
//! upstream endpoint, world state, and the retry counter. Everything else
//! (transport drivers, HTTPS interceptor, scheduled retries, the signal
//! watcher) posts onto the relay's single event channel, so no state is
//! ever observed torn.
//!
//! State flow: the listener reports ready, the client connects, and as
//! soon as a valid pending endpoint exists (bootstrap response or in-band
//! handoff) the relay dials upstream. Outbound loss with a valid pending
//! endpoint re-dials immediately; inbound loss tears the outbound side
//! down but keeps a valid endpoint for the next session.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gtproxy_shared::command::CommandRegistry;
use gtproxy_shared::config::ProxyConfig;
use gtproxy_shared::hooks::{Direction, HookBus, PacketEvent};
use gtproxy_shared::packet::{classify, PacketId, ParsedPacket, Payload};
use gtproxy_shared::scheduler::TaskScheduler;
use gtproxy_shared::transport::{DisconnectMode, PeerId, SessionEvent, SessionHost};
use gtproxy_shared::variant::{Variant, VariantArg};
use gtproxy_shared::world::{WorldParticipant, WorldTracker};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::inject;
use crate::inject::VariantOptions;
use crate::plugins;
use crate::resolve::ResolveIpv4;
use crate::trafficlog;

/// Scheduler tag for outbound reconnect ticks.
pub const RETRY_TAG: &str = "outbound-reconnect";
/// Hard budget of outbound connect attempts per handoff.
pub const MAX_CONNECT_ATTEMPTS: u32 = 12;
/// Backoff step; the delay grows linearly with the attempt count.
const RETRY_STEP: Duration = Duration::from_millis(250);
/// Backoff ceiling.
const RETRY_CAP: Duration = Duration::from_millis(3000);
/// Inbound port conflicts scan up to this many replacement ports.
const PORT_SCAN_RANGE: u16 = 200;

/// The next upstream endpoint the outbound side should dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEndpoint {
    pub host: String,
    pub port: u16,
}

impl PendingEndpoint {
    /// Builds an endpoint from raw wire fields. The host is stripped of
    /// NULs and whitespace; out-of-range ports are stored as 0 and fail
    /// [`is_valid`].
    ///
    /// [`is_valid`]: PendingEndpoint::is_valid
    pub fn new(host: &str, port: i64) -> Self {
        let host = host
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string();
        let port = u16::try_from(port).unwrap_or(0);
        Self { host, port }
    }

    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port >= 1
    }
}

impl fmt::Display for PendingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything the relay reacts to, funneled through one channel.
#[derive(Debug)]
pub enum ProxyEvent {
    FromClient(SessionEvent),
    FromServer(SessionEvent),
    /// A bootstrap response recorded the true upstream endpoint.
    Bootstrap(PendingEndpoint),
    RetryConnect,
    Shutdown,
}

/// Linear backoff with a hard attempt budget.
#[derive(Debug, Default)]
pub struct RetryPolicy {
    attempts: u32,
}

impl RetryPolicy {
    /// Records one failed attempt and returns its ordinal.
    pub fn record_failure(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// The delay before the next attempt, or `None` once the budget is
    /// spent.
    pub fn next_delay(&self) -> Option<Duration> {
        if self.attempts >= MAX_CONNECT_ATTEMPTS {
            return None;
        }
        Some(RETRY_STEP.saturating_mul(self.attempts).min(RETRY_CAP))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Deferred injection requested by a command handler. Handlers run while
/// the relay is borrowed, so sends are queued and applied right after
/// dispatch.
#[derive(Debug, Clone)]
pub enum InjectAction {
    Log(String),
    JoinRequest { world: String, invited: bool },
    QuitToExit,
    VariantToClient {
        function: String,
        args: Vec<VariantArg>,
        options: VariantOptions,
    },
}

/// What a command handler sees and may do.
pub struct CommandContext {
    pub prefix: char,
    pub local_net_id: i32,
    pub participants: Vec<WorldParticipant>,
    pub command_names: Vec<String>,
    actions: Vec<InjectAction>,
}

impl CommandContext {
    pub fn new(
        prefix: char,
        local_net_id: i32,
        participants: Vec<WorldParticipant>,
        command_names: Vec<String>,
    ) -> Self {
        Self {
            prefix,
            local_net_id,
            participants,
            command_names,
            actions: Vec::new(),
        }
    }

    /// Prints a line to the client's in-game console.
    pub fn log(&mut self, message: impl Into<String>) {
        self.actions.push(InjectAction::Log(message.into()));
    }

    pub fn join_world(&mut self, world: &str, invited: bool) {
        self.actions.push(InjectAction::JoinRequest {
            world: world.to_string(),
            invited,
        });
    }

    pub fn quit_to_exit(&mut self) {
        self.actions.push(InjectAction::QuitToExit);
    }

    pub fn variant_to_client(
        &mut self,
        function: &str,
        args: Vec<VariantArg>,
        options: VariantOptions,
    ) {
        self.actions.push(InjectAction::VariantToClient {
            function: function.to_string(),
            args,
            options,
        });
    }

    pub fn take_actions(&mut self) -> Vec<InjectAction> {
        std::mem::take(&mut self.actions)
    }
}

enum Teardown {
    /// Client asked to quit: polite to the client, immediate upstream.
    Quit,
    /// Hard disconnect on both sides.
    Both,
}

/// The relay state machine.
pub struct Relay {
    config: ProxyConfig,
    listen_port: u16,
    resolver: Arc<dyn ResolveIpv4>,

    inbound_host: SessionHost,
    outbound_host: SessionHost,
    inbound_peer: Option<PeerId>,
    outbound_peer: Option<PeerId>,
    outbound_connecting: bool,

    pending: Option<PendingEndpoint>,
    /// In-flight dial target; retries re-dial this after `pending` was
    /// consumed.
    dial_target: Option<PendingEndpoint>,
    retry: RetryPolicy,

    world: WorldTracker,
    commands: CommandRegistry<CommandContext>,
    hooks: HookBus,
    scheduler: TaskScheduler<ProxyEvent>,

    events_rx: mpsc::UnboundedReceiver<ProxyEvent>,
}

impl Relay {
    /// Binds both datagram sockets, wires the event channel, and installs
    /// the plugin surface. Returns the relay, the sender other components
    /// post through, and the actual inbound listen port.
    pub async fn build(
        config: ProxyConfig,
        resolver: Arc<dyn ResolveIpv4>,
    ) -> anyhow::Result<(Self, mpsc::UnboundedSender<ProxyEvent>, u16)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (inbound_rx, inbound_host, listen_port) =
            bind_inbound(config.server.port).await?;
        let (outbound_rx, outbound_host) = bind_outbound(config.client.local_port).await?;
        forward_session_events(inbound_rx, events_tx.clone(), ProxyEvent::FromClient);
        forward_session_events(outbound_rx, events_tx.clone(), ProxyEvent::FromServer);

        let mut commands = CommandRegistry::new(config.command.prefix_char());
        let mut hooks = HookBus::new();
        if config.scripts.enabled {
            plugins::install(&config, &mut commands, &mut hooks);
        }

        let relay = Self {
            listen_port,
            resolver,
            inbound_host,
            outbound_host,
            inbound_peer: None,
            outbound_peer: None,
            outbound_connecting: false,
            pending: None,
            dial_target: None,
            retry: RetryPolicy::default(),
            world: WorldTracker::new(),
            commands,
            hooks,
            scheduler: TaskScheduler::new(events_tx.clone()),
            events_rx,
            config,
        };
        Ok((relay, events_tx, listen_port))
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Runs until shutdown is requested or every sender is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.events_rx.recv().await {
            if self.handle_event(event).await {
                break;
            }
        }
        info!("relay stopped");
    }

    async fn handle_event(&mut self, event: ProxyEvent) -> bool {
        match event {
            ProxyEvent::FromClient(ev) => self.on_client_event(ev).await,
            ProxyEvent::FromServer(ev) => self.on_server_event(ev).await,
            ProxyEvent::Bootstrap(endpoint) => self.on_bootstrap(endpoint).await,
            ProxyEvent::RetryConnect => self.start_outbound_connect().await,
            ProxyEvent::Shutdown => {
                self.shutdown();
                return true;
            }
        }
        false
    }

    async fn on_client_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Ready => {
                info!(port = self.listen_port, "waiting for game client");
            }
            SessionEvent::Connected { peer } => {
                info!(net_id = peer, "game client connected");
                self.inbound_peer = Some(peer);
                if self.pending.as_ref().is_some_and(PendingEndpoint::is_valid) {
                    self.start_outbound_connect().await;
                } else {
                    info!("no upstream endpoint yet, waiting for bootstrap or handoff");
                }
            }
            SessionEvent::Packet { peer, channel, data } => {
                if self.inbound_peer == Some(peer) {
                    self.handle_server_bound(channel, data).await;
                }
            }
            SessionEvent::Disconnected { peer } => {
                if self.inbound_peer != Some(peer) {
                    return;
                }
                info!("game client disconnected");
                self.inbound_peer = None;
                self.retry.reset();
                self.scheduler.cancel(RETRY_TAG);
                self.dial_target = None;
                self.outbound_connecting = false;
                self.world.clear();
                // A valid endpoint survives for the next session; a stale
                // invalid one does not.
                if self.pending.as_ref().is_some_and(|p| !p.is_valid()) {
                    self.pending = None;
                }
                if let Some(peer) = self.outbound_peer.take() {
                    self.outbound_host.disconnect(peer, DisconnectMode::Later);
                }
            }
        }
    }

    async fn on_server_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Ready => {
                debug!("outbound transport ready");
            }
            SessionEvent::Connected { peer } => {
                if self.inbound_peer.is_none() {
                    // The client left while the dial was in flight.
                    self.outbound_host.disconnect(peer, DisconnectMode::Now);
                    self.outbound_connecting = false;
                    return;
                }
                info!(net_id = peer, "connected to upstream server");
                self.outbound_peer = Some(peer);
                self.outbound_connecting = false;
                self.retry.reset();
                self.dial_target = None;
                self.scheduler.cancel(RETRY_TAG);
            }
            SessionEvent::Packet { peer, channel, data } => {
                if self.outbound_peer == Some(peer) {
                    self.handle_client_bound(channel, data).await;
                }
            }
            SessionEvent::Disconnected { peer } => {
                if self.outbound_peer == Some(peer) {
                    info!("upstream session closed");
                    self.outbound_peer = None;
                    if self.inbound_peer.is_some()
                        && self.pending.as_ref().is_some_and(PendingEndpoint::is_valid)
                    {
                        self.start_outbound_connect().await;
                    } else if let Some(inbound) = self.inbound_peer {
                        self.inbound_host.disconnect(inbound, DisconnectMode::Later);
                    }
                } else if self.outbound_connecting {
                    self.connect_failed();
                }
            }
        }
    }

    async fn on_bootstrap(&mut self, endpoint: PendingEndpoint) {
        info!(%endpoint, "bootstrap recorded upstream endpoint");
        self.pending = Some(endpoint);
        if self.inbound_peer.is_some() && self.outbound_peer.is_none() && !self.outbound_connecting
        {
            self.start_outbound_connect().await;
        }
    }

    /// One outbound connect attempt against the freshest endpoint.
    async fn start_outbound_connect(&mut self) {
        if self.inbound_peer.is_none() {
            debug!("skipping outbound connect, no client session");
            self.dial_target = None;
            return;
        }
        if let Some(peer) = self.outbound_peer.take() {
            // A live session means this is a handoff; tear it down first
            // and come back on the retry tick.
            self.outbound_host.disconnect(peer, DisconnectMode::Now);
            self.scheduler
                .schedule(RETRY_TAG, RETRY_STEP, ProxyEvent::RetryConnect);
            return;
        }

        // The most recently set endpoint always wins; retries fall back to
        // the in-flight target.
        let target = match self
            .pending
            .take()
            .filter(PendingEndpoint::is_valid)
            .or_else(|| self.dial_target.take())
        {
            Some(target) => target,
            None => {
                debug!("no upstream endpoint to dial");
                return;
            }
        };
        self.dial_target = Some(target.clone());

        let addr = match self.resolve_endpoint(&target).await {
            Ok(addr) => addr,
            Err(err) => {
                warn!(endpoint = %target, error = %err, "endpoint resolution failed");
                self.connect_failed();
                return;
            }
        };

        info!(endpoint = %target, %addr, attempt = self.retry.attempts() + 1, "dialing upstream");
        self.outbound_connecting = true;
        if !self.outbound_host.connect(addr) {
            error!("outbound transport gone");
            self.outbound_connecting = false;
        }
    }

    async fn resolve_endpoint(&self, endpoint: &PendingEndpoint) -> anyhow::Result<SocketAddr> {
        if let Ok(ip) = endpoint.host.parse::<Ipv4Addr>() {
            return Ok(SocketAddr::new(IpAddr::V4(ip), endpoint.port));
        }
        let addrs = self.resolver.lookup(&endpoint.host).await?;
        let ip = addrs
            .first()
            .copied()
            .with_context(|| format!("no addresses for {}", endpoint.host))?;
        Ok(SocketAddr::new(IpAddr::V4(ip), endpoint.port))
    }

    fn connect_failed(&mut self) {
        self.outbound_connecting = false;
        let attempt = self.retry.record_failure();
        warn!(attempt, max = MAX_CONNECT_ATTEMPTS, "outbound connect failed");
        match self.retry.next_delay() {
            Some(delay) => {
                self.scheduler
                    .schedule(RETRY_TAG, delay, ProxyEvent::RetryConnect);
            }
            None => {
                error!(
                    attempts = self.retry.attempts(),
                    "outbound connect budget exhausted"
                );
                self.retry.reset();
                self.dial_target = None;
            }
        }
    }

    async fn handle_server_bound(&mut self, channel: u8, data: Vec<u8>) {
        let parsed = classify(&data);
        trafficlog::log_frame(&self.config.log, Direction::ServerBound, &parsed);

        let mut teardown = None;
        let mut event = PacketEvent {
            direction: Direction::ServerBound,
            channel_id: channel,
            parsed,
            raw: data,
            canceled: false,
        };

        match event.parsed.id {
            PacketId::JoinRequest => {
                self.world.clear();
            }
            PacketId::Input => {
                if self.try_dispatch_command(&event.parsed) {
                    event.canceled = true;
                }
            }
            PacketId::Quit => {
                event.canceled = true;
                teardown = Some(Teardown::Quit);
            }
            PacketId::Disconnect => {
                event.canceled = true;
                teardown = Some(Teardown::Both);
            }
            _ => {}
        }

        self.hooks.dispatch(&mut event);

        if !event.canceled {
            match self.outbound_peer {
                Some(peer) => {
                    self.outbound_host.send(peer, channel, event.raw);
                }
                None => debug!("dropping server-bound frame, no upstream session"),
            }
        }

        match teardown {
            Some(Teardown::Quit) => {
                if let Some(peer) = self.inbound_peer.take() {
                    self.inbound_host.disconnect(peer, DisconnectMode::Normal);
                }
                if let Some(peer) = self.outbound_peer.take() {
                    self.outbound_host.disconnect(peer, DisconnectMode::Now);
                }
            }
            Some(Teardown::Both) => {
                if let Some(peer) = self.inbound_peer.take() {
                    self.inbound_host.disconnect(peer, DisconnectMode::Now);
                }
                if let Some(peer) = self.outbound_peer.take() {
                    self.outbound_host.disconnect(peer, DisconnectMode::Now);
                }
            }
            None => {}
        }
    }

    async fn handle_client_bound(&mut self, channel: u8, data: Vec<u8>) {
        let mut parsed = classify(&data);
        trafficlog::log_frame(&self.config.log, Direction::ClientBound, &parsed);

        let mut raw = data;
        if parsed.id == PacketId::OnSendToServer {
            match rewrite_send_to_server(&parsed, self.listen_port) {
                Some((rewritten, endpoint)) => {
                    info!(%endpoint, "intercepted server handoff");
                    self.pending = Some(endpoint);
                    raw = rewritten;
                    parsed = classify(&raw);
                    if self.inbound_peer.is_some()
                        && self.outbound_peer.is_none()
                        && !self.outbound_connecting
                    {
                        self.start_outbound_connect().await;
                    }
                    // With a live upstream session the endpoint waits for
                    // the next reconnect cycle.
                }
                None => {
                    warn!("malformed handoff arguments, forwarding untouched");
                }
            }
        }

        match parsed.id {
            PacketId::OnSpawn => {
                if let Some(participant) = participant_from_variant(&parsed) {
                    debug!(net_id = participant.net_id, name = %participant.name, "participant spawned");
                    self.world.on_spawn(participant);
                }
            }
            PacketId::OnRemove => {
                if let Some(net_id) = net_id_from_variant(&parsed) {
                    debug!(net_id, "participant removed");
                    self.world.on_remove(net_id);
                }
            }
            _ => {}
        }

        let mut event = PacketEvent {
            direction: Direction::ClientBound,
            channel_id: channel,
            parsed,
            raw,
            canceled: false,
        };
        self.hooks.dispatch(&mut event);

        if !event.canceled {
            match self.inbound_peer {
                Some(peer) => {
                    self.inbound_host.send(peer, channel, event.raw);
                }
                None => debug!("dropping client-bound frame, no client session"),
            }
        }
    }

    fn try_dispatch_command(&mut self, parsed: &ParsedPacket) -> bool {
        for candidate in input_candidates(parsed) {
            let mut ctx = self.command_context();
            if self.commands.execute(&candidate, &mut ctx) {
                let actions = ctx.take_actions();
                self.apply_actions(actions);
                return true;
            }
        }
        false
    }

    fn command_context(&self) -> CommandContext {
        CommandContext::new(
            self.commands.prefix(),
            self.world.local_net_id(),
            self.world.iter().cloned().collect(),
            self.commands
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        )
    }

    fn apply_actions(&mut self, actions: Vec<InjectAction>) {
        for action in actions {
            match action {
                InjectAction::Log(message) => {
                    inject::send_log(&self.inbound_host, self.inbound_peer, &message);
                }
                InjectAction::JoinRequest { world, invited } => {
                    inject::send_join_request(
                        &self.outbound_host,
                        self.outbound_peer,
                        &world,
                        invited,
                    );
                }
                InjectAction::QuitToExit => {
                    inject::send_quit_to_exit(&self.outbound_host, self.outbound_peer);
                }
                InjectAction::VariantToClient {
                    function,
                    args,
                    options,
                } => {
                    inject::send_variant_to_client(
                        &self.inbound_host,
                        self.inbound_peer,
                        &function,
                        &args,
                        options,
                    );
                }
            }
        }
    }

    fn shutdown(&mut self) {
        info!("shutting down relay");
        self.scheduler.cancel_all();
        if let Some(peer) = self.inbound_peer.take() {
            self.inbound_host.disconnect(peer, DisconnectMode::Now);
        }
        if let Some(peer) = self.outbound_peer.take() {
            self.outbound_host.disconnect(peer, DisconnectMode::Now);
        }
        self.inbound_host.shutdown();
        self.outbound_host.shutdown();
    }
}

fn forward_session_events(
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    tx: mpsc::UnboundedSender<ProxyEvent>,
    wrap: fn(SessionEvent) -> ProxyEvent,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if tx.send(wrap(event)).is_err() {
                break;
            }
        }
    });
}

/// Binds the inbound listener on the configured port, scanning the next
/// [`PORT_SCAN_RANGE`] ports when it is taken.
async fn bind_inbound(
    port: u16,
) -> anyhow::Result<(mpsc::UnboundedReceiver<SessionEvent>, SessionHost, u16)> {
    let last = port.saturating_add(PORT_SCAN_RANGE).min(65535);
    for candidate in port..=last {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), candidate);
        match SessionHost::listen(addr, tx).await {
            Ok(host) => {
                let actual = host.local_addr().port();
                if candidate != port {
                    warn!(
                        configured = port,
                        actual,
                        "inbound port taken, using replacement"
                    );
                }
                return Ok((rx, host, actual));
            }
            Err(err) => debug!(port = candidate, error = %err, "inbound bind failed"),
        }
    }
    anyhow::bail!("no free inbound port in [{port}, {last}]")
}

/// Binds the outbound socket on the configured local port, falling back to
/// an ephemeral one.
async fn bind_outbound(
    local_port: u16,
) -> anyhow::Result<(mpsc::UnboundedReceiver<SessionEvent>, SessionHost)> {
    if local_port != 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port);
        match SessionHost::dialer(addr, tx).await {
            Ok(host) => return Ok((rx, host)),
            Err(err) => {
                warn!(local_port, error = %err, "local port taken, using ephemeral");
            }
        }
    }
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    let host = SessionHost::dialer(addr, tx).await?;
    Ok((rx, host))
}

/// Candidate command strings for an `Input` frame: the cached `text` value
/// first, then the raw-line fallback that survives pipes in the message.
fn input_candidates(parsed: &ParsedPacket) -> Vec<String> {
    let mut candidates = Vec::with_capacity(2);
    if let Some(text) = parsed.input_text.as_deref() {
        if !text.is_empty() {
            candidates.push(text.to_string());
        }
    }
    if let Payload::Text { text, .. } = &parsed.payload {
        if let Some(line) = fallback_input_line(text) {
            if !candidates.contains(&line) {
                candidates.push(line);
            }
        }
    }
    candidates
}

fn fallback_input_line(body: &str) -> Option<String> {
    for line in body.split('\n') {
        for prefix in ["text|", "|text|"] {
            if let Some(rest) = line.strip_prefix(prefix) {
                return Some(rest.to_string());
            }
        }
    }
    None
}

/// Rewrites an intercepted `OnSendToServer` so the client re-dials the
/// proxy: argument 1 becomes the proxy listen port (keeping the original
/// numeric tag) and argument 4's leading address becomes `127.0.0.1`. The
/// decoded upstream endpoint and the rebuilt frame are returned; `None`
/// declines the rewrite and the original payload is forwarded.
pub fn rewrite_send_to_server(
    parsed: &ParsedPacket,
    listen_port: u16,
) -> Option<(Vec<u8>, PendingEndpoint)> {
    let Payload::Tank { packet, variant } = &parsed.payload else {
        return None;
    };

    let port = variant.get(1).and_then(Variant::as_i64)?;
    let route = variant.get(4).and_then(Variant::as_str)?.to_string();
    let (address, rest) = match route.split_once('|') {
        Some((address, rest)) => (address.to_string(), Some(rest.to_string())),
        None => (route, None),
    };
    let endpoint = PendingEndpoint::new(&address, port);

    let mut variant = variant.clone();
    let port_entry = variant.get_mut(1)?;
    let new_port = match port_entry.value() {
        Variant::Signed(_) => Variant::Signed(i32::from(listen_port)),
        Variant::Float(_) => Variant::Float(f32::from(listen_port)),
        _ => Variant::Unsigned(u32::from(listen_port)),
    };
    port_entry.set(new_port);

    let new_route = match rest {
        Some(rest) => format!("127.0.0.1|{rest}"),
        None => "127.0.0.1".to_string(),
    };
    variant.get_mut(4)?.set(Variant::Str(new_route));

    let mut packet = packet.clone();
    packet.set_extra(variant.encode());
    Some((packet.to_bytes(parsed.had_trailing_nul), endpoint))
}

fn participant_from_variant(parsed: &ParsedPacket) -> Option<WorldParticipant> {
    let Payload::Tank { variant, .. } = &parsed.payload else {
        return None;
    };
    let text = variant.get(1).and_then(Variant::as_str)?;
    WorldParticipant::from_text(&gtproxy_shared::text::TextParse::parse(text))
}

fn net_id_from_variant(parsed: &ParsedPacket) -> Option<i32> {
    let Payload::Tank { variant, .. } = &parsed.payload else {
        return None;
    };
    let text = variant.get(1).and_then(Variant::as_str)?;
    let records = gtproxy_shared::text::TextParse::parse(text);
    let net_id = records.get_int("netID", -1);
    (net_id >= 0).then_some(net_id as i32)
}
