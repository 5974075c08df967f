//! Ring node - one peer of the token ring.
//!
//! A node owns its UDP transport, the token controller, the seen-message
//! cache and its statistics. Once started it runs four activities:
//!
//! - **receive**: reads datagrams with a short deadline, decodes them and
//!   pushes them onto the bounded inbound queue
//! - **process**: dedups, applies the hop limit, delivers to handlers and
//!   forwards what is not ours (broadcasts are both delivered and forwarded)
//! - **send**: drains the bounded outbound queue to the successor
//! - **heartbeat**: periodic heartbeats, dedup clearing and the token-lost
//!   observation
//!
//! Token passes, grace-window closes and the initial seeding are one-shot
//! timers owned by the node and cancelled on [`RingNode::stop`], which also
//! releases the socket.
//!
//! Controller, dedup cache and statistics share a single lock. It is never
//! held across an await; pushes onto the outbound queue are non-blocking and
//! happen under it, so the "only the holder originates" check and the push
//! are one step.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use baton_protocol::{
    DedupCache, Message, MessageKind, Payload, PeerId, Priority, Token, TokenController,
    TokenState,
};
use baton_transfer::{RingTransport, TransportConfig, RECV_BUFFER};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::handlers::HandlerRegistry;
use crate::stats::NodeStatistics;
use crate::timers::Timers;

/// Lifecycle of a node's activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Outcome of [`NodeHandle::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Placed on the outbound queue.
    Sent { id: String },
    /// Deferred until this peer holds the token.
    Queued { id: String },
}

impl Submission {
    pub fn id(&self) -> &str {
        match self {
            Self::Sent { id } | Self::Queued { id } => id,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

struct PeerState {
    controller: TokenController,
    dedup: DedupCache,
    stats: NodeStatistics,
}

struct Shared {
    config: NodeConfig,
    local_addr: SocketAddr,
    successor: SocketAddr,
    /// Taken on stop; the receive and send activities hold their own clones.
    transport: Mutex<Option<RingTransport>>,
    peer: Mutex<PeerState>,
    handlers: HandlerRegistry,
    outbound: mpsc::Sender<Message>,
    timers: Timers,
    heartbeat_seq: AtomicU64,
}

/// Cloneable access to a node, handed to message handlers.
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("peer_id", &self.peer_id())
            .field("successor", &self.shared.successor)
            .finish_non_exhaustive()
    }
}

impl NodeHandle {
    pub fn peer_id(&self) -> PeerId {
        self.shared.config.peer_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn token_state(&self) -> TokenState {
        self.peer().controller.state()
    }

    pub fn is_holding(&self) -> bool {
        self.peer().controller.is_holding()
    }

    /// Messages deferred until the token arrives.
    pub fn waiting_len(&self) -> usize {
        self.peer().controller.waiting_len()
    }

    /// Snapshot of the node's counters.
    pub fn stats(&self) -> NodeStatistics {
        self.peer().stats.clone()
    }

    /// Install a handler for `kind`, replacing any existing one.
    pub fn register_handler<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&NodeHandle, Message) + Send + Sync + 'static,
    {
        if self
            .shared
            .handlers
            .register(kind, Arc::new(handler))
            .is_some()
        {
            debug!(peer = self.peer_id(), kind = %kind, "Handler replaced");
        }
    }

    /// Originate a message from this peer.
    ///
    /// HIGH priority traffic, and anything submitted while holding the token,
    /// goes straight to the outbound queue. Everything else waits for the
    /// token; the first deferral of a waiting episode also solicits the
    /// token when solicitation is enabled.
    pub fn submit(&self, to: PeerId, payload: Payload, priority: Priority) -> Result<Submission> {
        let msg = Message::new(self.peer_id(), to, payload, priority);
        let id = msg.id.clone();

        let mut peer = self.peer();
        peer.dedup.insert(&id);

        if priority == Priority::High || peer.controller.is_holding() {
            self.push(&mut peer, msg)?;
            trace!(peer = self.peer_id(), id = %id, to, "Message queued for send");
            return Ok(Submission::Sent { id });
        }

        peer.controller.enqueue_waiting(msg)?;
        if peer.controller.request_token() && self.shared.config.solicit_token {
            self.solicit(&mut peer);
        }
        debug!(
            peer = self.peer_id(),
            id = %id,
            waiting = peer.controller.waiting_len(),
            "Message deferred until token arrives"
        );
        Ok(Submission::Queued { id })
    }

    /// [`submit`](Self::submit) with the content given as kind plus untyped JSON.
    pub fn submit_value(
        &self,
        to: PeerId,
        kind: MessageKind,
        content: Value,
        priority: Priority,
    ) -> Result<Submission> {
        let payload = Payload::from_value(kind, content)?;
        self.submit(to, payload, priority)
    }

    fn transport(&self) -> MutexGuard<'_, Option<RingTransport>> {
        self.shared
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self) -> MutexGuard<'_, PeerState> {
        self.shared
            .peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking push onto the outbound queue; a full queue drops `msg`.
    fn push(&self, peer: &mut PeerState, msg: Message) -> Result<()> {
        match self.shared.outbound.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                peer.stats.record_queue_full();
                warn!(
                    peer = self.peer_id(),
                    id = %msg.id,
                    kind = %msg.kind(),
                    "Outbound queue full; message dropped"
                );
                Err(Error::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(Error::NotRunning),
        }
    }

    fn solicit(&self, peer: &mut PeerState) {
        let request = Message::token_request(self.peer_id());
        peer.dedup.insert(&request.id);
        if self.push(peer, request).is_ok() {
            peer.stats.token_requests_sent += 1;
            debug!(peer = self.peer_id(), "Token solicited");
        }
    }

    /// Run one inbound message through dedup, hop limit, delivery and forwarding.
    pub(crate) fn process(&self, mut msg: Message) {
        let me = self.peer_id();
        {
            let mut peer = self.peer();
            if !peer.dedup.insert(&msg.id) {
                peer.stats.record_duplicate();
                trace!(peer = me, id = %msg.id, "Duplicate dropped");
                return;
            }
            if msg.from == me {
                peer.stats.dropped += 1;
                trace!(peer = me, id = %msg.id, kind = %msg.kind(), "Own message returned; dropped");
                return;
            }
            msg.increment_hops();
            if msg.should_discard(self.shared.config.effective_max_hops()) {
                peer.stats.record_hop_limit();
                debug!(
                    peer = me,
                    id = %msg.id,
                    from = msg.from,
                    hops = msg.hops,
                    "Hop limit reached; dropped"
                );
                return;
            }
        }

        if !msg.is_for_peer(me) {
            self.forward(msg);
            return;
        }
        if msg.is_broadcast() {
            self.forward(msg.clone());
        }
        self.dispatch(msg);
    }

    fn forward(&self, msg: Message) {
        let mut peer = self.peer();
        if self.push(&mut peer, msg).is_ok() {
            peer.stats.forwarded += 1;
        }
    }

    fn dispatch(&self, msg: Message) {
        let kind = msg.kind();
        let Some(handler) = self.shared.handlers.get(kind) else {
            self.peer().stats.dropped += 1;
            debug!(peer = self.peer_id(), kind = %kind, "No handler registered; dropped");
            return;
        };
        self.peer().stats.delivered += 1;
        handler(self, msg);
    }

    /// Take the token, drain deferred traffic behind it and schedule the pass.
    pub(crate) fn accept_token(&self, token: Token) {
        let mut peer = self.peer();
        let sequence = match peer.controller.receive_token(token) {
            Ok(token) => token.sequence,
            Err(e) => {
                peer.stats.dropped += 1;
                warn!(peer = self.peer_id(), error = %e, "Token rejected");
                return;
            }
        };
        peer.stats.token_received += 1;

        let drained = peer.controller.drain_waiting();
        let count = drained.len();
        let mut lost = 0;
        for msg in drained {
            if self.push(&mut peer, msg).is_err() {
                lost += 1;
            }
        }
        drop(peer);

        if count > 0 {
            debug!(peer = self.peer_id(), count, lost, "Deferred messages released");
        }
        self.schedule_pass(sequence, self.shared.config.token_dwell);
    }

    /// Pass early if holding; otherwise the request is someone else's to answer.
    pub(crate) fn answer_token_request(&self, requester: PeerId) {
        if requester == self.peer_id() {
            return;
        }
        let holding = self.peer().controller.holding_sequence();
        if let Some(sequence) = holding {
            debug!(peer = self.peer_id(), requester, "Passing token early on request");
            self.schedule_pass(sequence, Duration::ZERO);
        }
    }

    pub(crate) fn record_heartbeat(&self, from: PeerId) {
        self.peer().stats.record_heartbeat(from);
    }

    fn schedule_pass(&self, sequence: u64, delay: Duration) {
        let node = self.clone();
        self.shared
            .timers
            .schedule(delay, move || node.pass_if_current(sequence));
    }

    /// Pass the token if this peer still holds the copy that scheduled the pass.
    fn pass_if_current(&self, sequence: u64) {
        let me = self.peer_id();
        let next = self.shared.config.next_peer();

        let mut peer = self.peer();
        if peer.controller.holding_sequence() != Some(sequence) {
            return;
        }
        let msg = match peer.controller.pass_token(next) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(peer = me, error = %e, "Token pass failed");
                return;
            }
        };

        if next == me {
            // Single-peer ring: the token comes straight back without touching the network.
            peer.controller.finish_pass(sequence);
            peer.stats.token_passed += 1;
            drop(peer);
            if let Payload::Token(token) = msg.payload {
                self.accept_token(token);
            }
            return;
        }

        peer.dedup.insert(&msg.id);
        match self.push(&mut peer, msg) {
            Ok(()) => {
                peer.stats.token_passed += 1;
                drop(peer);
                let node = self.clone();
                self.shared
                    .timers
                    .schedule(self.shared.config.pass_grace, move || {
                        node.close_grace(sequence)
                    });
            }
            Err(e) => {
                if let Err(e) = peer.controller.revert_pass() {
                    warn!(peer = me, error = %e, "Could not revert token pass");
                    return;
                }
                drop(peer);
                warn!(peer = me, error = %e, "Token pass deferred");
                self.schedule_pass(sequence, self.shared.config.token_dwell);
            }
        }
    }

    fn close_grace(&self, sequence: u64) {
        let mut peer = self.peer();
        if !peer.controller.finish_pass(sequence) {
            return;
        }
        trace!(peer = self.peer_id(), sequence, state = %peer.controller.state(), "Grace window closed");
        // Traffic deferred while passing starts a new waiting episode.
        if peer.controller.state() == TokenState::Waiting && self.shared.config.solicit_token {
            self.solicit(&mut peer);
        }
    }

    fn seed_token(&self) {
        info!(peer = self.peer_id(), "Seeding ring token");
        self.accept_token(Token::new(self.peer_id()));
    }

    /// Heartbeats bypass the token and go straight to the outbound queue.
    fn send_heartbeat(&self) {
        let sequence = self.shared.heartbeat_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let msg = Message::heartbeat(self.peer_id(), sequence);
        let mut peer = self.peer();
        peer.dedup.insert(&msg.id);
        if self.push(&mut peer, msg).is_ok() {
            trace!(peer = self.peer_id(), sequence, "Heartbeat queued");
        }
    }

    /// Warn if the token has not been seen within the timeout. Returns whether it warned.
    fn check_token_liveness(&self) -> bool {
        let idle = {
            let peer = self.peer();
            if !peer.controller.is_token_lost(self.shared.config.token_timeout) {
                return false;
            }
            peer.controller.last_seen().elapsed()
        };
        warn!(
            peer = self.peer_id(),
            idle_secs = idle.as_secs(),
            "Token not seen recently; it may be lost"
        );
        true
    }

    fn clear_dedup(&self) {
        let mut peer = self.peer();
        let cleared = peer.dedup.len();
        peer.dedup.clear();
        debug!(
            peer = self.peer_id(),
            cleared,
            clears = peer.dedup.clears(),
            "Seen-message cache cleared"
        );
    }
}

/// A ring peer and its activities.
#[derive(Debug)]
pub struct RingNode {
    handle: NodeHandle,
    state: ConnectionState,
    shutdown: watch::Sender<bool>,
    outbound_rx: Option<mpsc::Receiver<Message>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RingNode {
    /// Validate `config`, resolve both addresses and bind the socket.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let bind = RingTransport::resolve(&config.listen_addr).await?;
        let successor = RingTransport::resolve(&config.successor_addr).await?;
        let transport = RingTransport::bind(
            TransportConfig {
                bind,
                sndbuf: config.send_buffer,
                rcvbuf: config.recv_buffer,
            },
            successor,
        )
        .await?;

        let local_addr = transport.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity);

        info!(
            peer = config.peer_id,
            ring_size = config.ring_size,
            local = %local_addr,
            %successor,
            "Ring node bound"
        );

        let shared = Shared {
            peer: Mutex::new(PeerState {
                controller: TokenController::new(config.peer_id, config.waiting_capacity),
                dedup: DedupCache::new(),
                stats: NodeStatistics::default(),
            }),
            config,
            local_addr,
            successor,
            transport: Mutex::new(Some(transport)),
            handlers: HandlerRegistry::with_defaults(),
            outbound,
            timers: Timers::new(shutdown_rx),
            heartbeat_seq: AtomicU64::new(0),
        };

        Ok(Self {
            handle: NodeHandle {
                shared: Arc::new(shared),
            },
            state: ConnectionState::Disconnected,
            shutdown,
            outbound_rx: Some(outbound_rx),
            tasks: Vec::new(),
        })
    }

    /// Spawn the activities, and on the seed peer schedule token creation.
    ///
    /// A node runs once; calling `start` again returns [`Error::AlreadyStarted`].
    pub fn start(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(Error::AlreadyStarted);
        }
        let Some(transport) = self.handle.transport().clone() else {
            return Err(Error::AlreadyStarted);
        };
        let Some(outbound_rx) = self.outbound_rx.take() else {
            return Err(Error::AlreadyStarted);
        };
        self.state = ConnectionState::Connecting;

        let config = &self.handle.shared.config;
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);

        self.tasks = vec![
            tokio::spawn(receive_loop(
                self.handle.clone(),
                transport.clone(),
                inbound_tx,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(process_loop(
                self.handle.clone(),
                inbound_rx,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(send_loop(
                self.handle.clone(),
                transport,
                outbound_rx,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(heartbeat_loop(
                self.handle.clone(),
                self.shutdown.subscribe(),
            )),
        ];

        if config.is_seed() {
            let node = self.handle.clone();
            self.handle
                .shared
                .timers
                .schedule(config.settle_delay, move || node.seed_token());
        }

        self.state = ConnectionState::Connected;
        info!(peer = config.peer_id, "Ring node started");
        Ok(())
    }

    /// Signal shutdown, join every activity, cancel pending timers and close
    /// the socket.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(Error::NotRunning);
        }
        self.shutdown.send_replace(true);

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Node activity ended abnormally");
            }
        }
        self.handle.shared.timers.shutdown().await;
        // Activities are joined, so this is the last reference to the socket.
        drop(self.handle.transport().take());
        self.state = ConnectionState::Disconnected;

        let stats = self.handle.stats();
        info!(
            peer = self.handle.peer_id(),
            sent = stats.sent,
            received = stats.received,
            forwarded = stats.forwarded,
            dropped = stats.dropped,
            tokens = stats.token_received,
            "Ring node stopped"
        );
        Ok(())
    }

    /// Cloneable handle for submitting and registering handlers from elsewhere.
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer_id(&self) -> PeerId {
        self.handle.peer_id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn submit(&self, to: PeerId, payload: Payload, priority: Priority) -> Result<Submission> {
        self.handle.submit(to, payload, priority)
    }

    pub fn submit_value(
        &self,
        to: PeerId,
        kind: MessageKind,
        content: Value,
        priority: Priority,
    ) -> Result<Submission> {
        self.handle.submit_value(to, kind, content, priority)
    }

    pub fn register_handler<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&NodeHandle, Message) + Send + Sync + 'static,
    {
        self.handle.register_handler(kind, handler);
    }

    pub fn token_state(&self) -> TokenState {
        self.handle.token_state()
    }

    pub fn stats(&self) -> NodeStatistics {
        self.handle.stats()
    }
}

impl Drop for RingNode {
    fn drop(&mut self) {
        // Activities and timers hold the shared state; let them wind down.
        self.shutdown.send_replace(true);
    }
}

async fn receive_loop(
    node: NodeHandle,
    transport: RingTransport,
    inbound: mpsc::Sender<Message>,
    shutdown: watch::Receiver<bool>,
) {
    let deadline = node.shared.config.read_deadline;
    let mut buf = vec![0u8; RECV_BUFFER];

    while !*shutdown.borrow() {
        match transport.recv_within(&mut buf, deadline).await {
            Ok(None) => {}
            Ok(Some((msg, from))) => {
                trace!(peer = node.peer_id(), %from, id = %msg.id, kind = %msg.kind(), "Datagram received");
                let mut peer = node.peer();
                peer.stats.record_received();
                match inbound.try_send(msg) {
                    Ok(()) => {}
                    Err(TrySendError::Full(msg)) => {
                        peer.stats.record_queue_full();
                        warn!(peer = node.peer_id(), id = %msg.id, "Inbound queue full; message dropped");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Err(baton_transfer::Error::Protocol(e)) => {
                node.peer().stats.record_decode_failure();
                warn!(peer = node.peer_id(), error = %e, "Malformed datagram dropped");
            }
            Err(e) => {
                node.peer().stats.errors += 1;
                warn!(peer = node.peer_id(), error = %e, "Receive failed");
            }
        }
    }
    debug!(peer = node.peer_id(), "Receive activity stopped");
}

async fn process_loop(
    node: NodeHandle,
    mut inbound: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = inbound.recv() => match msg {
                Some(msg) => node.process(msg),
                None => break,
            },
        }
    }
    debug!(peer = node.peer_id(), "Process activity stopped");
}

async fn send_loop(
    node: NodeHandle,
    transport: RingTransport,
    mut outbound: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        match transport.send(&msg).await {
            Ok(_) => node.peer().stats.record_sent(),
            Err(e) => {
                node.peer().stats.errors += 1;
                warn!(peer = node.peer_id(), id = %msg.id, kind = %msg.kind(), error = %e, "Send failed");
            }
        }
    }
    debug!(peer = node.peer_id(), "Send activity stopped");
}

async fn heartbeat_loop(node: NodeHandle, mut shutdown: watch::Receiver<bool>) {
    let config = node.config();
    let start = Instant::now();

    let mut heartbeat = interval_at(start + config.heartbeat_interval, config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut clear = interval_at(
        start + config.dedup_clear_interval,
        config.dedup_clear_interval,
    );
    clear.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = heartbeat.tick() => {
                node.send_heartbeat();
                node.check_token_liveness();
            }
            _ = clear.tick() => node.clear_dedup(),
        }
    }
    debug!(peer = node.peer_id(), "Heartbeat activity stopped");
}
