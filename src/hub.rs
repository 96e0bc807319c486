//! The hub: the process-wide singleton that owns everything in §3's "Hub"
//! paragraph and runs the single-threaded cooperative event loop (§5) that
//! ties the connection dispatcher (C/D/E), the protocol probe, the session
//! state machine (H), and the router (J) together.
//!
//! Grounded on the shutdown-flag pattern from the pack's `trybotster` CLI
//! (`signal_hook::flag::register` into an `AtomicBool` polled each loop
//! iteration) and on the teacher's `Pool`/`ClientConnection` split for "one
//! struct owns the index, one per-connection struct owns the transport" —
//! generalized from an async multi-session client pool to a synchronous
//! single-threaded server accepting many connections.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::Interest;
use tracing::{debug, info, warn};

use crate::cfg::config::Config;
use crate::command::{register_builtins, CommandContext, CommandRegistry};
use crate::identity::address::{address_in_range, AddressRange};
use crate::identity::{parse_address_v4_hint, Sid, SidPool};
use crate::net::io_loop::Token;
use crate::net::tls::{build_server_config, certificate_fingerprint, fingerprint_uri, TlsAdapter, TlsState};
use crate::net::{probe, Connection, ConnectionOwner, EnqueueOutcome, IoLoop};
use crate::proto::{AdcMessage, Context as FrameContext, ParseError, Priority};
use crate::router::{route, AuthPlugin, HubPlugin, PolicyChain, PolicyVerdict, RouteOutcome};
use crate::session::{handshake, is_frame_allowed, DisconnectReason, SessionState};
use crate::user::{user_update_info, validate_inf, InfError, User, UserManager, UserQuotas};

/// Per-connection bookkeeping the hub keeps outside of [`User`] itself,
/// since a connection exists (as a probe) before any user record does.
struct ConnSlot {
    conn: Connection,
    addr: IpAddr,
    stage: ConnStage,
}

enum ConnStage {
    /// Pre-classification; `deadline` is the probe timeout.
    Probing,
    /// A TLS ClientHello was classified; handshake runs until `Connected`.
    TlsHandshake { tls: Box<TlsAdapter> },
    /// Handed off to a session. `sid` is only meaningful once
    /// `state >= Identify`, i.e. after `HSUP` assigned one.
    Session {
        sid: Sid,
        state: SessionState,
        challenge: Option<String>,
        pending_pid: Option<String>,
    },
}

/// Resolves to [`crate::session::DisconnectReason`] plus whether to also
/// attempt a final write before closing.
struct CloseRequest {
    token: Token,
    reason: DisconnectReason,
    redirect: Option<String>,
}

/// The hub singleton. Generic over the auth/event plugin so the core never
/// depends on a concrete SQLite-backed (or any other) implementation —
/// only the trait seam from [`crate::router::plugin`].
pub struct Hub<A: AuthPlugin, P: HubPlugin> {
    config: Config,
    io: IoLoop,
    listener: TcpListener,
    listener_token: Token,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    sid_pool: SidPool<Token>,
    users: UserManager,
    commands: CommandRegistry,
    policy: PolicyChain,
    auth: A,
    plugin: P,
    bans: Vec<AddressRange>,
    conns: HashMap<Token, ConnSlot>,
    per_address: HashMap<IpAddr, u32>,
    shutting_down: bool,
}

impl<A: AuthPlugin, P: HubPlugin> Hub<A, P> {
    /// Binds the listener and builds the hub's initial (empty) state. Does
    /// not start accepting; call [`Hub::run`] for that.
    pub fn new(config: Config, auth: A, plugin: P) -> anyhow::Result<Self> {
        let bind_addr = parse_address_v4_hint(&config.network.bind_address).unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        let socket_addr = SocketAddr::new(bind_addr, config.network.port);

        let mut listener = TcpListener::bind(socket_addr)?;
        let mut io = IoLoop::new(1024)?;
        let listener_token = io.register(&mut listener, Interest::READABLE)?;

        let tls_config = if config.tls.enable.as_bool() {
            let built = build_server_config(&config.tls.cert_file, &config.tls.key_file, config.tls.min_version == "tls1.2")?;
            if let Ok(fp) = certificate_fingerprint(&config.tls.cert_file) {
                info!(uri = %fingerprint_uri(&config.identity.name, config.network.port, &fp), "tls certificate fingerprint");
            }
            Some(built)
        } else {
            None
        };

        let mut commands = CommandRegistry::new();
        register_builtins(&mut commands);

        let sid_pool = SidPool::new(config.limits.max_users);

        Ok(Hub {
            sid_pool,
            io,
            listener,
            listener_token,
            tls_config,
            users: UserManager::new(),
            commands,
            policy: PolicyChain::new(),
            auth,
            plugin,
            bans: Vec::new(),
            conns: HashMap::new(),
            per_address: HashMap::new(),
            shutting_down: false,
            config,
        })
    }

    pub fn policy_mut(&mut self) -> &mut PolicyChain {
        &mut self.policy
    }

    /// The listener's bound address, e.g. to discover the ephemeral port
    /// chosen when `network.port` is configured as `0`.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn register_ban(&mut self, range: AddressRange) {
        self.bans.push(range);
    }

    /// Runs the accept/event loop until a shutdown signal is observed and
    /// every user has been quiesced, per §3's Hub lifecycle and §9's
    /// design note on coroutine-free async: there is exactly one
    /// suspension point, the call to [`IoLoop::poll`] inside this loop.
    pub fn run(&mut self, shutdown: &Arc<AtomicBool>) -> anyhow::Result<()> {
        info!(port = self.config.network.port, "hub listening");
        loop {
            if shutdown.load(Ordering::Relaxed) && !self.shutting_down {
                self.begin_shutdown();
            }
            if self.shutting_down && self.conns.is_empty() {
                info!("all sessions drained, exiting");
                return Ok(());
            }

            let outcome = self.io.poll(Some(Duration::from_millis(500)))?;

            let mut to_close = Vec::new();

            for token in &outcome.expired {
                if let Some(reason) = self.handle_timeout(*token) {
                    to_close.push(reason);
                }
            }

            for event in &outcome.ready {
                if event.token == self.listener_token {
                    self.accept_all();
                    continue;
                }
                if event.readable {
                    if let Some(reason) = self.handle_readable(event.token) {
                        to_close.push(reason);
                    }
                }
                if event.writable {
                    self.handle_writable(event.token);
                }
            }

            // Deferred closes, per §4.C's ordering rule: callbacks may
            // close connections, but the actual teardown happens at the
            // end of the iteration to avoid use-after-free against a
            // token still referenced earlier in this same wakeup.
            for req in to_close {
                self.close_connection(req.token, req.reason, req.redirect.as_deref());
            }

            if !shutdown.load(Ordering::Relaxed) {
                continue;
            }
        }
    }

    fn begin_shutdown(&mut self) {
        info!("shutdown requested, quiescing sessions");
        self.shutting_down = true;
        let sids: Vec<(Token, Sid)> = self
            .conns
            .iter()
            .filter_map(|(token, slot)| match slot.stage {
                ConnStage::Session { sid, state: SessionState::Normal, .. } => Some((*token, sid)),
                _ => None,
            })
            .collect();
        for (token, _) in sids {
            self.close_connection(token, DisconnectReason::HubShutdown, None);
        }
        // Anything not yet in `normal` (still probing/handshaking) is
        // dropped outright; it never joined, so no quit is owed to anyone.
        let stragglers: Vec<Token> = self
            .conns
            .iter()
            .filter(|(_, slot)| !matches!(slot.stage, ConnStage::Session { state: SessionState::Normal, .. }))
            .map(|(token, _)| *token)
            .collect();
        for token in stragglers {
            self.close_connection(token, DisconnectReason::HubShutdown, None);
        }
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.accept_one(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                },
            }
        }
    }

    fn accept_one(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if self.shutting_down {
            return;
        }
        let count = self.per_address.entry(addr.ip()).or_insert(0);
        if *count >= self.config.limits.max_connections_per_address {
            debug!(%addr, "rejected: too many connections from this address");
            return;
        }
        *count += 1;

        let _ = stream.set_nodelay(true);
        let token = match self.io.register(&mut stream, Interest::READABLE) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to register accepted connection");
                return;
            },
        };
        self.io.reset_deadline(token, self.config.timeouts.probe);

        let conn = Connection::new_plain(
            stream,
            addr,
            self.config.limits.max_sendbuf_bytes as usize,
            self.config.limits.max_recvbuf_bytes as usize,
        );
        self.conns.insert(token, ConnSlot { conn, addr: addr.ip(), stage: ConnStage::Probing });
    }

    fn handle_timeout(&mut self, token: Token) -> Option<CloseRequest> {
        let slot = self.conns.get(&token)?;
        match &slot.stage {
            ConnStage::Probing => {
                if !self.config.redirects.nmdc_redirect_addr.is_empty() {
                    let banner = probe::nmdc_redirect_banner(&self.config.redirects.nmdc_redirect_addr);
                    self.write_raw(token, banner.into_bytes());
                }
                None
            },
            ConnStage::TlsHandshake { .. } => Some(CloseRequest { token, reason: DisconnectReason::TlsError, redirect: None }),
            ConnStage::Session { state: SessionState::Normal, .. } => {
                Some(CloseRequest { token, reason: DisconnectReason::IdleTimeout, redirect: None })
            },
            ConnStage::Session { .. } => Some(CloseRequest { token, reason: DisconnectReason::HandshakeTimeout, redirect: None }),
        }
        .or_else(|| {
            // Probing branch already handled its own teardown via a plain
            // close below, since it's not a disconnect-reason scenario.
            if matches!(self.conns.get(&token)?.stage, ConnStage::Probing) {
                self.teardown(token);
            }
            None
        })
    }

    fn handle_readable(&mut self, token: Token) -> Option<CloseRequest> {
        let slot = self.conns.get_mut(&token)?;
        match slot.conn.read_available() {
            Ok(0) => {},
            Ok(_) => {},
            Err(_) => return Some(CloseRequest { token, reason: DisconnectReason::RecvBufferOverflow, redirect: None }),
        }

        match &slot.stage {
            ConnStage::Probing => self.pump_probe(token),
            ConnStage::TlsHandshake { .. } => self.pump_tls(token),
            ConnStage::Session { .. } => self.pump_session(token),
        }
    }

    fn handle_writable(&mut self, token: Token) {
        if let Some(slot) = self.conns.get_mut(&token) {
            let _ = slot.conn.flush();
        }
    }

    /// Classifies the peeked prefix of a probing connection and either
    /// hands it to a session, starts a TLS handshake, answers an HTTP/NMDC
    /// probe, or drops it (§4.E).
    fn pump_probe(&mut self, token: Token) -> Option<CloseRequest> {
        let peek = { self.conns.get(&token)?.peek_prefix() };
        if peek.len() < probe::PROBE_PEEK_SIZE && peek.is_empty() {
            return None;
        }
        let verdict = probe::classify(&peek);
        match verdict {
            probe::ProbeVerdict::Adc => {
                if self.config.tls.require.as_bool() {
                    let addr = if self.config.tls.require_redirect_addr.is_empty() {
                        format!("adcs://{}:{}", self.config.identity.name, self.config.network.port)
                    } else {
                        self.config.tls.require_redirect_addr.clone()
                    };
                    let frame = probe::tls_require_redirect(&[], &addr);
                    self.write_raw(token, frame.into_bytes());
                    self.teardown(token);
                    return None;
                }
                self.start_session(token);
                None
            },
            probe::ProbeVerdict::Tls => {
                if let Some(cfg) = self.tls_config.clone() {
                    self.start_tls(token, cfg);
                } else {
                    self.teardown(token);
                }
                None
            },
            probe::ProbeVerdict::Http => {
                let body = if self.config.redirects.ignore_http {
                    None
                } else if !self.config.redirects.http_redirect_addr.is_empty() {
                    Some(probe::http_redirect(&self.config.redirects.http_redirect_addr))
                } else {
                    Some(probe::http_not_implemented().to_owned())
                };
                if let Some(body) = body {
                    self.write_raw(token, body.into_bytes());
                }
                self.teardown(token);
                None
            },
            probe::ProbeVerdict::Irc | probe::ProbeVerdict::Unknown => {
                debug!(?verdict, "rejecting non-ADC connection");
                self.teardown(token);
                None
            },
        }
    }

    fn start_tls(&mut self, token: Token, cfg: Arc<rustls::ServerConfig>) {
        let Some(slot) = self.conns.get_mut(&token) else { return };
        let Ok(mut tls) = TlsAdapter::new_server(cfg) else {
            self.teardown(token);
            return;
        };
        let peeked = slot.conn.drain_recvbuf();
        let _ = tls.feed_peeked(&peeked);
        slot.stage = ConnStage::TlsHandshake { tls: Box::new(tls) };
        self.io.reset_deadline(token, self.config.timeouts.tls_handshake);
        self.pump_tls(token);
    }

    fn pump_tls(&mut self, token: Token) -> Option<CloseRequest> {
        let slot = self.conns.get_mut(&token)?;
        let ConnStage::TlsHandshake { tls } = &mut slot.stage else { return None };
        let socket = slot.conn.socket_mut();
        if tls.read_tls(socket).is_err() || tls.process_new_packets().is_err() {
            return Some(CloseRequest { token, reason: DisconnectReason::TlsError, redirect: None });
        }
        let _ = tls.write_tls(socket);

        if tls.state() == TlsState::Connected {
            let Some(alpn_ok) = Some(tls.alpn_protocol().is_none_or(|p| p == crate::net::tls::ALPN_ADC)) else {
                return None;
            };
            if !alpn_ok {
                return Some(CloseRequest { token, reason: DisconnectReason::TlsError, redirect: None });
            }
            let ConnStage::TlsHandshake { tls } = std::mem::replace(&mut slot.stage, ConnStage::Probing) else {
                unreachable!("matched above")
            };
            slot.conn.upgrade_to_tls(*tls);
            self.start_session(token);
        }
        None
    }

    /// Transitions a connection from probe/TLS ownership into a live
    /// session: allocates a SID, marks the connection owner, and sends
    /// `ISUP`/`ISID` (§4.H, `protocol → identify`).
    fn start_session(&mut self, token: Token) {
        let Some(slot) = self.conns.get_mut(&token) else { return };
        let is_tls = slot.conn.is_tls();

        let sid = match self.sid_pool.allocate(token) {
            Ok(sid) => sid,
            Err(_) => {
                let frame = DisconnectReason::HubFull.to_iqui_frame("AAAB", None);
                self.write_raw(token, frame.into_bytes());
                self.teardown(token);
                return;
            },
        };

        let mut user = User::new(
            sid,
            slot.addr,
            token,
            UserQuotas {
                max_sendbuf_bytes: self.config.limits.max_sendbuf_bytes,
                max_recvbuf_bytes: self.config.limits.max_recvbuf_bytes,
                ratelimit_frames: 40,
                ratelimit_window: Duration::from_secs(1),
            },
        );
        if is_tls {
            user.flags |= crate::user::UserFlags::TLS;
        }
        self.users.add(user);

        let slot = self.conns.get_mut(&token).expect("just resolved above");
        slot.stage = ConnStage::Session {
            sid,
            state: SessionState::Protocol,
            challenge: None,
            pending_pid: None,
        };
        self.io.reset_deadline(token, self.config.timeouts.handshake);

        self.write_raw(token, handshake::build_isup().into_bytes());
        self.write_raw(token, handshake::build_isid(sid).into_bytes());
        self.write_raw(token, handshake::build_iinf(&self.config.identity.name, &self.config.identity.description).into_bytes());
    }

    /// Drains complete frames from a session connection and steps the
    /// state machine/router once per frame, per §4.H/§4.J.
    fn pump_session(&mut self, token: Token) -> Option<CloseRequest> {
        loop {
            let Some(slot) = self.conns.get_mut(&token) else { return None };
            let Some(frame_bytes) = slot.conn.take_one_frame() else { break };

            let ConnStage::Session { sid, state, .. } = slot.stage else { return None };

            let msg = match AdcMessage::parse_verify(&frame_bytes, sid) {
                Ok(msg) => msg,
                Err(ParseError::SourceMismatch { .. }) => {
                    return Some(CloseRequest { token, reason: DisconnectReason::ProtocolViolation, redirect: None });
                },
                Err(e) => {
                    self.write_raw(token, format!("ISTA {} {}\n", e.status_code(), e).into_bytes());
                    continue;
                },
            };

            if !is_frame_allowed(state, &msg.command()) {
                return Some(CloseRequest { token, reason: DisconnectReason::ProtocolViolation, redirect: None });
            }

            self.io.reset_deadline(token, state.timeout(&self.config.timeouts).unwrap_or(self.config.timeouts.idle));

            if let Some(close) = self.step_session(token, sid, state, &msg) {
                return Some(close);
            }
        }
        None
    }

    fn step_session(&mut self, token: Token, sid: Sid, state: SessionState, msg: &AdcMessage) -> Option<CloseRequest> {
        match state {
            SessionState::Protocol => {
                if msg.command() == "HSUP" {
                    self.advance_session(token, SessionState::Identify);
                }
                None
            },
            SessionState::Identify => self.handle_identify(token, sid, msg),
            SessionState::Verify => self.handle_verify(token, sid, msg),
            SessionState::Normal => self.handle_normal(token, sid, msg),
            SessionState::Cleanup | SessionState::Closed => None,
        }
    }

    fn handle_identify(&mut self, token: Token, sid: Sid, msg: &AdcMessage) -> Option<CloseRequest> {
        if msg.command() != "BINF" {
            return None;
        }
        let (cid, pid) = match handshake::extract_identify_fields(msg) {
            Ok(pair) => pair,
            Err(_) => return Some(CloseRequest { token, reason: DisconnectReason::ProtocolViolation, redirect: None }),
        };
        let max_nick_len = 64;
        let existing_cids = self.users.existing_cids();
        let existing_nicks = self.users.existing_nicks_casefold();
        let parsed = match validate_inf(msg, &existing_cids, &existing_nicks, max_nick_len) {
            Ok(p) => p,
            Err(e) => {
                let reason = match e {
                    InfError::DuplicateCid => DisconnectReason::DuplicateCid,
                    InfError::DuplicateNick => DisconnectReason::DuplicateNick,
                    _ => DisconnectReason::ProtocolViolation,
                };
                let attempted_nick = msg.get_named_argument(*b"NI").unwrap_or("");
                self.plugin.on_user_login_error(attempted_nick, &e.to_string());
                return Some(CloseRequest { token, reason, redirect: None });
            },
        };

        let challenge = handshake::generate_challenge();
        self.users.assign_identity(sid, parsed.cid, parsed.nick);
        if let Some(user) = self.users.lookup_by_sid_mut(sid) {
            user_update_info(user, msg);
        }

        self.write_raw(token, handshake::build_igpa(&challenge).into_bytes());
        if let Some(ConnSlot { stage: ConnStage::Session { state, challenge: slot_challenge, pending_pid, .. }, .. }) = self.conns.get_mut(&token) {
            *state = SessionState::Verify;
            *slot_challenge = Some(challenge);
            *pending_pid = Some(pid.to_owned());
        }
        None
    }

    fn handle_verify(&mut self, token: Token, sid: Sid, msg: &AdcMessage) -> Option<CloseRequest> {
        if msg.command() != "BINF" {
            return None;
        }
        let pd = match handshake::extract_verify_response(msg) {
            Ok(pd) => pd.to_owned(),
            Err(_) => return Some(CloseRequest { token, reason: DisconnectReason::ProtocolViolation, redirect: None }),
        };
        let (challenge, pid) = match self.conns.get(&token).map(|s| &s.stage) {
            Some(ConnStage::Session { challenge: Some(c), pending_pid: Some(p), .. }) => (c.clone(), p.clone()),
            _ => return Some(CloseRequest { token, reason: DisconnectReason::ProtocolViolation, redirect: None }),
        };
        if !handshake::verify_pid(&challenge, &pid, &pd) {
            return Some(CloseRequest { token, reason: DisconnectReason::ProtocolViolation, redirect: None });
        }

        let nick = self.users.lookup_by_sid(sid).map(|u| u.nick.clone()).unwrap_or_default();

        if self.users.len() as u32 > self.config.limits.max_users {
            self.plugin.on_user_login_error(&nick, "hub full");
            return Some(CloseRequest { token, reason: DisconnectReason::HubFull, redirect: None });
        }
        if let Some(user) = self.users.lookup_by_sid(sid) {
            if self.bans.iter().any(|b| address_in_range(user.address, b)) {
                self.plugin.on_user_login_error(&nick, "banned");
                return Some(CloseRequest { token, reason: DisconnectReason::Banned, redirect: None });
            }
        }

        // Credentials come from the auth plugin's user record, per §6's
        // `get_user` contract; an unregistered nick resolves to `none`,
        // the unprivileged default.
        let credentials = self.auth.get_user(&nick).map(|info| info.credentials).unwrap_or(crate::cfg::enums::Credentials::None);
        if credentials < self.config.limits.min_join_credentials {
            self.plugin.on_user_login_error(&nick, "insufficient credentials");
            return Some(CloseRequest { token, reason: DisconnectReason::InsufficientCredentials, redirect: None });
        }
        self.users.lookup_by_sid_mut(sid).map(|u| u.credentials = credentials);
        self.advance_session(token, SessionState::Normal);
        self.plugin.on_user_login(self.users.lookup_by_sid(sid).map(|u| u.nick.as_str()).unwrap_or(""), self.conns.get(&token).map(|s| s.addr).unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)));

        let join_frame = self.users.lookup_by_sid(sid).and_then(|u| u.info.as_ref()).map(|m| m.cache().to_owned());
        if let Some(frame) = join_frame {
            self.broadcast_to_normal(frame.into_bytes(), Priority::Normal);
        }
        let roster: Vec<Sid> = self
            .users
            .iter()
            .filter(|other| other.sid != sid && other.info.is_some() && self.is_normal(other.conn_token))
            .map(|other| other.sid)
            .collect();
        for other_sid in roster {
            if let Some(info) = self.users.lookup_by_sid(other_sid).and_then(|u| u.info.as_ref()) {
                let bytes = info.cache().as_bytes().to_vec();
                self.enqueue_for(token, bytes, Priority::Normal, false);
            }
        }
        None
    }

    /// True if `token`'s session has cleared admission and is in `normal`.
    /// Only users satisfying this are valid recipients of a `B`/`F`-context
    /// frame (§4.J); a user still mid-handshake must not observe chat
    /// traffic or appear in another joiner's roster.
    fn is_normal(&self, token: Token) -> bool {
        matches!(self.conns.get(&token).map(|s| &s.stage), Some(ConnStage::Session { state: SessionState::Normal, .. }))
    }

    /// Dispatches a `normal`-stage frame to the appropriate [`HubPlugin`]
    /// observation hook (§9's dispatch table), by its 4-char command
    /// token. Purely observational: it never affects routing, which is
    /// decided separately by [`route`].
    fn fire_event_hooks(&mut self, sid: Sid, msg: &AdcMessage) {
        let Some(nick) = self.users.lookup_by_sid(sid).map(|u| u.nick.clone()) else {
            return;
        };
        let target_nick = |mgr: &UserManager, s: Option<Sid>| s.and_then(|s| mgr.lookup_by_sid(s)).map(|u| u.nick.clone()).unwrap_or_default();

        match msg.command().as_str() {
            "BMSG" | "FMSG" => self.plugin.on_chat_msg(&nick, msg),
            "DMSG" | "EMSG" => {
                let to = target_nick(&self.users, msg.target());
                self.plugin.on_private_msg(&nick, &to, msg);
            },
            "BSCH" | "FSCH" => self.plugin.on_search(&nick, msg),
            "DRES" => self.plugin.on_search_result(&nick, msg),
            "DCTM" | "UCTM" => {
                let to = target_nick(&self.users, msg.target());
                self.plugin.on_p2p_connect(&nick, &to);
            },
            "DRCM" | "URCM" => {
                let to = target_nick(&self.users, msg.target());
                self.plugin.on_p2p_revconnect(&nick, &to);
            },
            _ => {},
        }
    }

    fn handle_normal(&mut self, token: Token, sid: Sid, msg: &AdcMessage) -> Option<CloseRequest> {
        if msg.context() == FrameContext::B && msg.command() == "BMSG" {
            if let Some(text) = msg.get_argument(0) {
                if let Some(rest) = text.strip_prefix('!').or_else(|| text.strip_prefix('+')) {
                    self.run_command(token, sid, rest);
                    return None;
                }
            }
        }

        let verdict = match self.users.lookup_by_sid(sid) {
            Some(user) => self.policy.evaluate(user, msg),
            None => PolicyVerdict::Deny,
        };
        if verdict == PolicyVerdict::Deny {
            self.write_raw(token, "ISTA 40 policy denied\n".to_owned().into_bytes());
            return None;
        }

        self.fire_event_hooks(sid, msg);

        let restrict_to_normal = matches!(msg.context(), FrameContext::B | FrameContext::F);
        match route(msg, &self.users) {
            RouteOutcome::Deliver(recipients) => {
                let bytes = msg.cache().as_bytes().to_vec();
                for recipient in recipients {
                    if let Some(target_user) = self.users.lookup_by_sid(recipient) {
                        let target_token = target_user.conn_token;
                        if restrict_to_normal && !self.is_normal(target_token) {
                            continue;
                        }
                        self.enqueue_for(target_token, bytes.clone(), msg.priority(), false);
                    }
                }
            },
            RouteOutcome::ToHub | RouteOutcome::Rejected => {},
        }
        None
    }

    fn run_command(&mut self, token: Token, sid: Sid, line: &str) {
        let caller_credentials = self.users.lookup_by_sid(sid).map(|u| u.credentials).unwrap_or(crate::cfg::enums::Credentials::None);
        let mut ctx = CommandContext {
            users: &mut self.users,
            auth: &mut self.auth,
            caller_sid: sid,
            caller_credentials,
        };
        let (_, response) = self.commands.dispatch(line, &mut ctx);
        let mut frame = AdcMessage::parse(b"ISTA 00\n").expect("static frame");
        frame.add_argument(response);
        self.enqueue_for(token, frame.cache().as_bytes().to_vec(), Priority::High, true);
    }

    fn advance_session(&mut self, token: Token, next: SessionState) {
        if let Some(ConnSlot { stage: ConnStage::Session { state, .. }, .. }) = self.conns.get_mut(&token) {
            *state = next;
        }
    }

    fn broadcast_to_normal(&mut self, bytes: Vec<u8>, priority: Priority) {
        let tokens: Vec<Token> = self
            .users
            .iter()
            .filter(|u| matches!(self.conns.get(&u.conn_token).map(|s| &s.stage), Some(ConnStage::Session { state: SessionState::Normal, .. })))
            .map(|u| u.conn_token)
            .collect();
        for token in tokens {
            self.enqueue_for(token, bytes.clone(), priority, false);
        }
    }

    fn enqueue_for(&mut self, token: Token, bytes: Vec<u8>, priority: Priority, critical: bool) {
        let Some(slot) = self.conns.get_mut(&token) else { return };
        match slot.conn.enqueue(bytes, priority, critical) {
            EnqueueOutcome::Queued | EnqueueOutcome::Dropped => {
                let _ = slot.conn.flush();
            },
            EnqueueOutcome::Overflow => {
                self.close_connection(token, DisconnectReason::SendBufferOverflow, None);
            },
        }
    }

    fn write_raw(&mut self, token: Token, bytes: Vec<u8>) {
        self.enqueue_for(token, bytes, Priority::High, true);
    }

    /// Sends the `IQUI`/`ISTA` reason frame (when applicable), removes the
    /// user from every index, broadcasts the quit if it had joined
    /// `normal`, and tears down the connection — in that order, so the
    /// quit is observable to remaining users before the SID is freed
    /// (§5's ordering guarantee).
    fn close_connection(&mut self, token: Token, reason: DisconnectReason, redirect: Option<&str>) {
        let Some(slot) = self.conns.get(&token) else { return };
        if let ConnStage::Session { sid, state, .. } = slot.stage {
            let sid_text = sid.to_string();
            let frame = reason.to_iqui_frame(&sid_text, redirect);
            self.write_raw(token, frame.into_bytes());

            if let Some(slot) = self.conns.get_mut(&token) {
                let _ = slot.conn.flush();
            }

            let should_broadcast = state.should_broadcast_quit();
            let nick = self.users.lookup_by_sid(sid).map(|u| u.nick.clone());
            self.users.remove(sid);
            self.sid_pool.release(sid);
            if should_broadcast {
                let quit_frame = format!("BQUI {sid_text}\n").into_bytes();
                self.broadcast_to_normal(quit_frame, Priority::High);
            }
            if let Some(nick) = nick {
                self.plugin.on_user_logout(&nick);
            }
        }
        self.teardown(token);
    }

    fn teardown(&mut self, token: Token) {
        if let Some(mut slot) = self.conns.remove(&token) {
            let count = self.per_address.entry(slot.addr).or_insert(0);
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_address.remove(&slot.addr);
            }
            let _ = self.io.deregister(slot.conn.socket_mut());
            self.io.clear_deadline(token);
        }
    }
}
