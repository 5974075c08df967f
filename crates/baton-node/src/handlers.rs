//! Message handler registry and the built-in handlers.
//!
//! Handlers run on the process activity, one message at a time. They get a
//! [`NodeHandle`] so they can submit replies; they must not block.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use baton_protocol::{AckContent, Message, MessageKind, Payload, Priority};
use tracing::{debug, info, trace, warn};

use crate::node::NodeHandle;

/// Callback invoked for every delivered message of one kind.
pub type Handler = Arc<dyn Fn(&NodeHandle, Message) + Send + Sync>;

/// Handlers keyed by message kind. Registering a kind again replaces it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageKind, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the handlers every node needs to take part in the ring.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(MessageKind::Token, Arc::new(on_token));
        registry.register(MessageKind::Heartbeat, Arc::new(on_heartbeat));
        registry.register(MessageKind::Error, Arc::new(on_error));
        registry.register(MessageKind::Ack, Arc::new(on_ack));
        registry.register(MessageKind::TokenRequest, Arc::new(on_token_request));
        registry
    }

    /// Install `handler` for `kind`, returning the one it replaced.
    pub fn register(&self, kind: MessageKind, handler: Handler) -> Option<Handler> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler)
    }

    pub fn get(&self, kind: MessageKind) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut kinds: Vec<_> = handlers.keys().copied().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

/// TOKEN: hand the token to the controller.
pub fn on_token(node: &NodeHandle, msg: Message) {
    match msg.payload {
        Payload::Token(token) => node.accept_token(token),
        other => warn!(kind = %other.kind(), "TOKEN handler got a non-token payload"),
    }
}

/// HEARTBEAT: record liveness, and acknowledge heartbeats addressed to us.
pub fn on_heartbeat(node: &NodeHandle, msg: Message) {
    node.record_heartbeat(msg.from);
    trace!(peer = node.peer_id(), from = msg.from, "Heartbeat");

    if msg.to == node.peer_id() {
        let ack = AckContent {
            original_message_id: msg.id,
            status: "success".to_string(),
        };
        if let Err(e) = node.submit(msg.from, Payload::Ack(ack), Priority::High) {
            warn!(error = %e, "Failed to acknowledge heartbeat");
        }
    }
}

pub fn on_error(node: &NodeHandle, msg: Message) {
    if let Payload::Error(err) = msg.payload {
        warn!(
            peer = node.peer_id(),
            from = msg.from,
            code = err.code,
            details = %err.details,
            "Peer reported error: {}",
            err.description
        );
    }
}

pub fn on_ack(node: &NodeHandle, msg: Message) {
    if let Payload::Ack(ack) = msg.payload {
        debug!(
            peer = node.peer_id(),
            from = msg.from,
            original = %ack.original_message_id,
            status = %ack.status,
            "Ack received"
        );
    }
}

/// TOKEN_REQUEST: a holder passes early instead of waiting out its dwell.
pub fn on_token_request(node: &NodeHandle, msg: Message) {
    if let Payload::TokenRequest(request) = msg.payload {
        info!(
            peer = node.peer_id(),
            requester = request.requester,
            "Token requested"
        );
        node.answer_token_request(request.requester);
    }
}
