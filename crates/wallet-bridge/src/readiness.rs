//! Host boot/handshake tracking and the bounded wait in front of every call.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    NotReady,
    Handshaking,
    Ready,
    /// Terminal: navigation failed, the host closed, or the readiness
    /// ceiling elapsed.
    Failed,
}

impl TransportState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    const fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

pub struct ReadinessGate {
    state: watch::Sender<TransportState>,
    ceiling: Duration,
    first_wait: Mutex<Option<Instant>>,
}

impl ReadinessGate {
    pub fn new(ceiling: Duration) -> Self {
        let (state, _) = watch::channel(TransportState::NotReady);
        Self {
            state,
            ceiling,
            first_wait: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// `NotReady -> Handshaking`. Returns `false` if the host was already past
    /// that point.
    pub fn begin_handshake(&self) -> bool {
        self.transition(|state| match state {
            TransportState::NotReady => Some(TransportState::Handshaking),
            _ => None,
        })
    }

    /// Applies the init acknowledgement.
    pub fn mark_ready(&self) -> bool {
        self.transition(|state| match state {
            TransportState::NotReady => {
                tracing::debug!("Bridge init ack arrived before navigation finished");
                Some(TransportState::Ready)
            }
            TransportState::Handshaking => Some(TransportState::Ready),
            TransportState::Ready | TransportState::Failed => None,
        })
    }

    pub fn mark_failed(&self) -> bool {
        self.transition(|state| (state != TransportState::Failed).then_some(TransportState::Failed))
    }

    fn transition(&self, next: impl FnOnce(TransportState) -> Option<TransportState>) -> bool {
        self.state.send_if_modified(|state| match next(*state) {
            Some(updated) => {
                tracing::debug!(from = state.label(), to = updated.label(), "Bridge transport state changed");
                *state = updated;
                true
            }
            None => false,
        })
    }

    /// Waits until the host is ready. The ceiling is measured from the first
    /// wait on this gate, not per call; once it elapses the gate fails for good.
    pub async fn ensure_ready(&self) -> Result<(), BridgeError> {
        match self.state() {
            TransportState::Ready => return Ok(()),
            TransportState::Failed => return Err(BridgeError::NotReady),
            TransportState::NotReady | TransportState::Handshaking => {}
        }

        let deadline = {
            let mut first_wait = self
                .first_wait
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *first_wait.get_or_insert_with(Instant::now) + self.ceiling
        };

        let mut receiver = self.state.subscribe();
        let settled = tokio::time::timeout_at(
            deadline,
            receiver.wait_for(|state| state.is_settled()),
        )
        .await;

        match settled {
            Ok(Ok(state)) if *state == TransportState::Ready => Ok(()),
            Ok(_) => Err(BridgeError::NotReady),
            Err(_) => {
                tracing::warn!(
                    ceiling_ms = self.ceiling.as_millis() as u64,
                    "Bridge host never finished its handshake"
                );
                self.mark_failed();
                Err(BridgeError::NotReady)
            }
        }
    }
}
