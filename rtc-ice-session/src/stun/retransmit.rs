use std::fmt;
use std::time::{Duration, Instant};

use super::TransactionId;
use crate::error::Error;

/// Progress of one outstanding STUN/TURN transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RetransmitState {
    /// Nothing sent yet, or a retry has been scheduled.
    #[default]
    AwaitingTransmitSlot,
    AwaitingResponse,
    /// Server asked for credentials; resend at once.
    ReceivedAuthenticateResponse,
    ReceivedSuccessResponse,
    ReceivedErrorResponse,
    NoResponseToAllRetries,
    Error,
}

impl fmt::Display for RetransmitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::AwaitingTransmitSlot => "awaiting-transmit-slot",
            Self::AwaitingResponse => "awaiting-response",
            Self::ReceivedAuthenticateResponse => "received-authenticate-response",
            Self::ReceivedSuccessResponse => "received-success-response",
            Self::ReceivedErrorResponse => "received-error-response",
            Self::NoResponseToAllRetries => "no-response-to-all-retries",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Retry bookkeeping shared by gathering/refresh activities and pair checks.
#[derive(Debug, Clone)]
pub struct Retransmit {
    pub(crate) state: RetransmitState,
    pub(crate) transaction_id: Option<TransactionId>,
    pub(crate) attempts: u16,
    pub(crate) max_attempts: u16,
    pub(crate) timeout: Duration,
    /// When the current wait for a transmit slot began; `None` is older than any instant.
    pub(crate) queued_at: Option<Instant>,
    pub(crate) sent_at: Option<Instant>,
    pub(crate) error: Option<Error>,
    /// A 401 already came back for this transaction; our credentials were refused.
    pub(crate) challenged: bool,
}

impl Retransmit {
    pub fn new(max_attempts: u16, timeout: Duration, now: Instant) -> Self {
        Retransmit {
            state: RetransmitState::AwaitingTransmitSlot,
            transaction_id: None,
            attempts: 0,
            max_attempts,
            timeout,
            queued_at: Some(now),
            sent_at: None,
            error: None,
            challenged: false,
        }
    }

    pub fn state(&self) -> RetransmitState {
        self.state
    }

    pub fn attempts(&self) -> u16 {
        self.attempts
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub(crate) fn set_state(&mut self, state: RetransmitState) {
        self.state = state;
    }

    /// The outstanding request went unanswered for a full retry timeout.
    pub fn retry_timed_out(&self, now: Instant) -> bool {
        self.state == RetransmitState::AwaitingResponse
            && self
                .sent_at
                .is_none_or(|sent| now.saturating_duration_since(sent) >= self.timeout)
    }

    pub fn any_retries_not_sent(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn retry_available(&self, now: Instant) -> bool {
        self.retry_timed_out(now) && self.any_retries_not_sent()
    }

    /// How long this transaction has been waiting for its next transmit slot.
    pub fn awaiting_transmit_time(&self, now: Instant) -> Duration {
        match self.queued_at {
            Some(queued_at) => now.saturating_duration_since(queued_at),
            None => Duration::MAX,
        }
    }

    /// Moves this transaction ahead of everything else waiting for a slot.
    pub fn prematurely_age(&mut self) {
        self.queued_at = None;
    }

    /// Records a send that opens a brand new transaction.
    pub(crate) fn start(&mut self, transaction_id: TransactionId, now: Instant) {
        self.attempts = 0;
        self.error = None;
        self.challenged = false;
        self.resend(transaction_id, now);
    }

    /// Records a send of `transaction_id` counting against the retry budget.
    pub(crate) fn resend(&mut self, transaction_id: TransactionId, now: Instant) {
        self.attempts = self.attempts.saturating_add(1);
        self.transaction_id = Some(transaction_id);
        self.state = RetransmitState::AwaitingResponse;
        self.sent_at = Some(now);
        self.queued_at = Some(now);
    }

    /// Records a fire-and-forget send such as a keepalive indication.
    pub(crate) fn mark_sent(&mut self, now: Instant) {
        self.sent_at = Some(now);
        self.queued_at = Some(now);
    }

    pub(crate) fn received_success(&mut self, now: Instant) {
        self.state = RetransmitState::ReceivedSuccessResponse;
        self.queued_at = Some(now);
    }

    pub(crate) fn received_error(&mut self, err: Error, now: Instant) {
        self.state = RetransmitState::ReceivedErrorResponse;
        self.error = Some(err);
        self.queued_at = Some(now);
    }

    pub(crate) fn matches(&self, transaction_id: &TransactionId) -> bool {
        self.transaction_id.as_ref() == Some(transaction_id)
    }
}

/// What an activity's STUN exchange is for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    /// Binding or Allocate sent from a host candidate while gathering.
    Gather,
    /// Binding indication keeping a reflexive NAT binding open.
    Keepalive,
    /// TURN Refresh keeping a relayed allocation alive.
    AllocationRefresh,
    /// TURN CreatePermission for the remote candidates of a relayed candidate's stream.
    PermissionRefresh,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Gather => "gather",
            Self::Keepalive => "keepalive",
            Self::AllocationRefresh => "allocation-refresh",
            Self::PermissionRefresh => "permission-refresh",
        };
        write!(f, "{s}")
    }
}

/// A candidate's pending STUN/TURN work, scheduled by the session pacing loop.
#[derive(Debug, Clone)]
pub struct StunActivity {
    /// Index of the candidate in its stream's candidate arena.
    pub(crate) candidate: usize,
    pub(crate) kind: ActivityKind,
    pub(crate) retransmit: Retransmit,
}

impl StunActivity {
    pub fn new(candidate: usize, kind: ActivityKind, retransmit: Retransmit) -> Self {
        StunActivity {
            candidate,
            kind,
            retransmit,
        }
    }

    pub fn candidate(&self) -> usize {
        self.candidate
    }

    pub fn kind(&self) -> ActivityKind {
        self.kind
    }

    pub fn retransmit(&self) -> &Retransmit {
        &self.retransmit
    }
}
