//! Token Controller - per-peer state machine for ring token possession.
//!
//! The controller decides whether this peer may originate ordinary traffic.
//! It owns the held token, the FIFO of messages deferred until the token
//! arrives, and the bookkeeping needed to reject stale copies of a token
//! this peer has just handed on.
//!
//! The controller performs no I/O and keeps no timers. The node drives it:
//! it sends whatever [`pass_token`](TokenController::pass_token) returns and
//! calls [`finish_pass`](TokenController::finish_pass) once the grace window
//! has elapsed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::TokenError;
use crate::message::{unix_timestamp, Message, PeerId};
use crate::token::Token;

/// Token possession state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Not holding and not interested.
    None,
    /// Has deferred traffic and wants the token.
    Waiting,
    /// Holds the token; may originate traffic.
    Holding,
    /// Just handed the token on; still inside the grace window.
    Passing,
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Waiting => write!(f, "WAITING"),
            Self::Holding => write!(f, "HOLDING"),
            Self::Passing => write!(f, "PASSING"),
        }
    }
}

/// The last hand-off, remembered until the grace window closes.
#[derive(Debug, Clone)]
struct PassRecord {
    token_id: String,
    sequence: u64,
}

/// Per-peer token state machine.
#[derive(Debug)]
pub struct TokenController {
    peer_id: PeerId,
    state: TokenState,
    /// Held token; kept while PASSING so a failed hand-off can be reverted.
    token: Option<Token>,
    waiting: VecDeque<Message>,
    waiting_capacity: usize,
    last_seen: Instant,
    passed: Option<PassRecord>,
}

impl TokenController {
    /// Create a controller for `peer_id` with a bounded deferred-send queue.
    #[must_use]
    pub fn new(peer_id: PeerId, waiting_capacity: usize) -> Self {
        Self {
            peer_id,
            state: TokenState::None,
            token: None,
            waiting: VecDeque::new(),
            waiting_capacity,
            last_seen: Instant::now(),
            passed: None,
        }
    }

    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    #[must_use]
    pub const fn state(&self) -> TokenState {
        self.state
    }

    #[must_use]
    pub fn is_holding(&self) -> bool {
        self.state == TokenState::Holding
    }

    /// The token currently held (or being handed on).
    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// Sequence of the held token, if HOLDING.
    #[must_use]
    pub fn holding_sequence(&self) -> Option<u64> {
        match (&self.state, &self.token) {
            (TokenState::Holding, Some(t)) => Some(t.sequence),
            _ => None,
        }
    }

    /// When the token was last received or passed by this peer.
    #[must_use]
    pub const fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Accept a token: take ownership, bump its sequence and move to HOLDING.
    ///
    /// While PASSING, a copy of the token we just handed on (same id, sequence
    /// not newer than the one we passed) is rejected as a duplicate. A
    /// different token arriving while HOLDING replaces the held one; the two
    /// are not reconciled.
    pub fn receive_token(&mut self, mut token: Token) -> Result<&Token, TokenError> {
        if token.id.is_empty() {
            return Err(TokenError::InvalidToken);
        }

        if self.state == TokenState::Passing {
            if let Some(passed) = &self.passed {
                if passed.token_id == token.id && token.sequence <= passed.sequence {
                    return Err(TokenError::DuplicateToken {
                        id: token.id,
                        sequence: token.sequence,
                    });
                }
            }
        }

        if let (TokenState::Holding, Some(held)) = (&self.state, &self.token) {
            if held.id != token.id {
                warn!(
                    peer = self.peer_id,
                    held = %held.id,
                    incoming = %token.id,
                    "Received a second token while holding; replacing held token"
                );
            }
        }

        token.owner = self.peer_id;
        token.sequence = token.sequence.saturating_add(1);
        token.timestamp = unix_timestamp();

        debug!(
            peer = self.peer_id,
            token = %token.id,
            sequence = token.sequence,
            from_state = %self.state,
            "Token acquired"
        );

        self.state = TokenState::Holding;
        self.last_seen = Instant::now();
        self.passed = None;
        Ok(self.token.insert(token))
    }

    /// Hand the token to `next`.
    ///
    /// Returns the TOKEN message the transport must send. The controller
    /// moves to PASSING and stays there until [`finish_pass`](Self::finish_pass).
    pub fn pass_token(&mut self, next: PeerId) -> Result<Message, TokenError> {
        if self.state != TokenState::Holding {
            return Err(TokenError::NoToken { state: self.state });
        }
        let Some(token) = self.token.as_mut() else {
            return Err(TokenError::NoToken { state: self.state });
        };

        token.owner = next;
        token.timestamp = unix_timestamp();

        self.passed = Some(PassRecord {
            token_id: token.id.clone(),
            sequence: token.sequence,
        });
        self.state = TokenState::Passing;
        self.last_seen = Instant::now();

        debug!(
            peer = self.peer_id,
            next,
            token = %token.id,
            sequence = token.sequence,
            "Token passed"
        );

        Ok(Message::token(self.peer_id, next, token.clone()))
    }

    /// Close the grace window opened by the pass of `sequence`.
    ///
    /// Returns false (and changes nothing) if that pass is no longer current,
    /// e.g. because the token already came back around.
    pub fn finish_pass(&mut self, sequence: u64) -> bool {
        let current = matches!(&self.passed, Some(p) if p.sequence == sequence);
        if self.state != TokenState::Passing || !current {
            return false;
        }
        self.passed = None;
        self.token = None;
        self.state = if self.waiting.is_empty() {
            TokenState::None
        } else {
            TokenState::Waiting
        };
        true
    }

    /// Undo a pass whose TOKEN message could not be queued for sending.
    pub fn revert_pass(&mut self) -> Result<(), TokenError> {
        if self.state != TokenState::Passing {
            return Err(TokenError::NoToken { state: self.state });
        }
        let Some(token) = self.token.as_mut() else {
            return Err(TokenError::NoToken { state: self.state });
        };
        token.owner = self.peer_id;
        self.passed = None;
        self.state = TokenState::Holding;
        Ok(())
    }

    /// Record interest in the token.
    ///
    /// Returns true on the NONE → WAITING transition, i.e. the first request
    /// of a waiting episode.
    pub fn request_token(&mut self) -> bool {
        if self.state == TokenState::None {
            self.state = TokenState::Waiting;
            return true;
        }
        false
    }

    /// Defer `msg` until the token arrives.
    pub fn enqueue_waiting(&mut self, msg: Message) -> Result<(), TokenError> {
        if self.waiting.len() >= self.waiting_capacity {
            return Err(TokenError::WaitingQueueFull {
                capacity: self.waiting_capacity,
            });
        }
        self.waiting.push_back(msg);
        Ok(())
    }

    /// Take every deferred message, oldest first.
    pub fn drain_waiting(&mut self) -> Vec<Message> {
        self.waiting.drain(..).collect()
    }

    #[must_use]
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// True if the token has not been seen for longer than `timeout` and this
    /// peer is not holding it. Purely observational.
    #[must_use]
    pub fn is_token_lost(&self, timeout: Duration) -> bool {
        self.state != TokenState::Holding && self.last_seen.elapsed() > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Payload, Priority, BROADCAST};
    use serde_json::json;
    use std::thread::sleep;

    fn data(from: PeerId, text: &str) -> Message {
        Message::new(from, BROADCAST, Payload::Data(json!(text)), Priority::Normal)
    }

    #[test]
    fn test_controller_creation() {
        let c = TokenController::new(2, 8);
        assert_eq!(c.state(), TokenState::None);
        assert!(!c.is_holding());
        assert!(c.token().is_none());
        assert_eq!(c.waiting_len(), 0);
    }

    #[test]
    fn test_receive_token_takes_ownership() {
        let mut c = TokenController::new(2, 8);
        let token = c.receive_token(Token::new(0)).unwrap();
        assert_eq!(token.owner, 2);
        assert_eq!(token.sequence, 1);
        assert_eq!(c.state(), TokenState::Holding);
        assert_eq!(c.holding_sequence(), Some(1));
    }

    #[test]
    fn test_receive_empty_token_rejected() {
        let mut c = TokenController::new(1, 8);
        let mut token = Token::new(0);
        token.id.clear();
        assert_eq!(c.receive_token(token), Err(TokenError::InvalidToken));
        assert_eq!(c.state(), TokenState::None);
    }

    #[test]
    fn test_pass_without_token_fails() {
        let mut c = TokenController::new(0, 8);
        assert_eq!(
            c.pass_token(1).unwrap_err(),
            TokenError::NoToken {
                state: TokenState::None
            }
        );
        c.request_token();
        assert!(matches!(
            c.pass_token(1),
            Err(TokenError::NoToken {
                state: TokenState::Waiting
            })
        ));
        assert_eq!(c.state(), TokenState::Waiting);
    }

    #[test]
    fn test_pass_then_finish() {
        let mut c = TokenController::new(0, 8);
        c.receive_token(Token::new(0)).unwrap();
        let msg = c.pass_token(1).unwrap();
        assert_eq!(c.state(), TokenState::Passing);
        assert_eq!(msg.from, 0);
        assert_eq!(msg.to, 1);
        assert_eq!(msg.priority, Priority::High);
        let Payload::Token(token) = &msg.payload else {
            panic!("expected token payload");
        };
        assert_eq!(token.owner, 1);
        assert_eq!(token.sequence, 1);

        // Passing twice is not allowed.
        assert!(c.pass_token(1).is_err());

        assert!(!c.finish_pass(99));
        assert!(c.finish_pass(1));
        assert_eq!(c.state(), TokenState::None);
        assert!(c.token().is_none());
    }

    #[test]
    fn test_duplicate_rejected_during_grace() {
        let mut c = TokenController::new(0, 8);
        c.receive_token(Token::new(0)).unwrap();
        let msg = c.pass_token(1).unwrap();
        let Payload::Token(copy) = msg.payload else {
            panic!("expected token payload");
        };

        let err = c.receive_token(copy.clone()).unwrap_err();
        assert!(matches!(err, TokenError::DuplicateToken { sequence: 1, .. }));
        assert_eq!(c.state(), TokenState::Passing);

        // The same token after a full lap carries a newer sequence.
        let mut lapped = copy;
        lapped.sequence += 3;
        c.receive_token(lapped).unwrap();
        assert_eq!(c.state(), TokenState::Holding);
        assert_eq!(c.holding_sequence(), Some(5));
    }

    #[test]
    fn test_second_token_replaces_held_one() {
        // Conflicting tokens are not reconciled: the newest arrival wins.
        let mut c = TokenController::new(1, 8);
        c.receive_token(Token::new(0)).unwrap();
        let other = Token::new(3);
        let other_id = other.id.clone();
        c.receive_token(other).unwrap();
        assert_eq!(c.state(), TokenState::Holding);
        assert_eq!(c.token().unwrap().id, other_id);
    }

    #[test]
    fn test_revert_pass() {
        let mut c = TokenController::new(3, 8);
        c.receive_token(Token::new(0)).unwrap();
        c.pass_token(0).unwrap();
        c.revert_pass().unwrap();
        assert_eq!(c.state(), TokenState::Holding);
        assert_eq!(c.token().unwrap().owner, 3);
        assert!(c.revert_pass().is_err());
    }

    #[test]
    fn test_request_token_only_from_none() {
        let mut c = TokenController::new(1, 8);
        assert!(c.request_token());
        assert_eq!(c.state(), TokenState::Waiting);
        assert!(!c.request_token());

        c.receive_token(Token::new(0)).unwrap();
        assert!(!c.request_token());
        assert_eq!(c.state(), TokenState::Holding);
    }

    #[test]
    fn test_waiting_queue_fifo() {
        let mut c = TokenController::new(2, 8);
        for text in ["a", "b", "c"] {
            c.enqueue_waiting(data(2, text)).unwrap();
        }
        c.request_token();
        c.receive_token(Token::new(0)).unwrap();

        let drained: Vec<_> = c
            .drain_waiting()
            .into_iter()
            .map(|m| match m.payload {
                Payload::Data(v) => v,
                _ => panic!("unexpected payload"),
            })
            .collect();
        assert_eq!(drained, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(c.waiting_len(), 0);
    }

    #[test]
    fn test_waiting_queue_bounded() {
        let mut c = TokenController::new(2, 2);
        c.enqueue_waiting(data(2, "a")).unwrap();
        c.enqueue_waiting(data(2, "b")).unwrap();
        assert_eq!(
            c.enqueue_waiting(data(2, "c")),
            Err(TokenError::WaitingQueueFull { capacity: 2 })
        );
        assert_eq!(c.waiting_len(), 2);
    }

    #[test]
    fn test_finish_pass_with_pending_work_waits() {
        let mut c = TokenController::new(0, 8);
        c.receive_token(Token::new(0)).unwrap();
        c.pass_token(1).unwrap();
        c.enqueue_waiting(data(0, "late")).unwrap();
        assert!(c.finish_pass(1));
        assert_eq!(c.state(), TokenState::Waiting);
    }

    #[test]
    fn test_token_lost_observation() {
        let mut c = TokenController::new(1, 8);
        sleep(Duration::from_millis(5));
        assert!(c.is_token_lost(Duration::from_millis(1)));
        assert!(!c.is_token_lost(Duration::from_secs(60)));

        c.receive_token(Token::new(0)).unwrap();
        sleep(Duration::from_millis(5));
        // Never "lost" while we hold it.
        assert!(!c.is_token_lost(Duration::from_millis(1)));
    }

    #[test]
    fn test_simulated_ring_mutual_exclusion() {
        const RING: usize = 5;
        let mut ring: Vec<TokenController> = (0..RING)
            .map(|i| TokenController::new(i as PeerId, 8))
            .collect();

        ring[0].receive_token(Token::new(0)).unwrap();
        let mut holder = 0usize;

        for step in 0..(RING * 6) {
            let holding = ring.iter().filter(|c| c.is_holding()).count();
            assert_eq!(holding, 1, "step {step}: expected exactly one holder");

            let next = (holder + 1) % RING;
            let msg = ring[holder].pass_token(next as PeerId).unwrap();
            assert!(ring.iter().all(|c| !c.is_holding()), "token in flight");

            let Payload::Token(token) = msg.payload else {
                panic!("expected token payload");
            };
            let seq = token.sequence;
            ring[next].receive_token(token).unwrap();
            assert!(ring[holder].finish_pass(seq));
            holder = next;
        }

        assert_eq!(
            ring[holder].holding_sequence(),
            Some(1 + (RING * 6) as u64)
        );
    }
}
