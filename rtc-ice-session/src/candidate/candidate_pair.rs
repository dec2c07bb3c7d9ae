use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

use crate::stun::TransactionId;
use crate::stun::retransmit::Retransmit;

/// Represent the ICE candidate pair state.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    /// Means a check for this pair is not sent until a pair sharing its foundation succeeds.
    #[default]
    #[serde(rename = "frozen")]
    Frozen,

    /// Means a check has not been performed for this pair.
    #[serde(rename = "waiting")]
    Waiting,

    /// Means a check has been sent for this pair, but the transaction is in progress.
    #[serde(rename = "in-progress")]
    InProgress,

    /// Means a check for this pair was already done and produced a successful result.
    #[serde(rename = "succeeded")]
    Succeeded,

    /// Means a check for this pair was already done and failed, either never producing any response
    /// or producing an unrecoverable failure response.
    #[serde(rename = "failed")]
    Failed,
}

impl CandidatePairState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };

        write!(f, "{s}")
    }
}

/// How a connectivity check ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatus {
    Succeeded,
    RoleConflict,
    Timeout,
    GenericFailure,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Succeeded => "succeeded",
            Self::RoleConflict => "role-conflict",
            Self::Timeout => "timeout",
            Self::GenericFailure => "generic-failure",
        };
        write!(f, "{s}")
    }
}

/// RFC 5245 - 5.7.2.  Computing Pair Priority and Ordering Pairs
/// Let G be the priority for the candidate provided by the controlling
/// agent.  Let D be the priority for the candidate provided by the
/// controlled agent.
/// pair priority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)
pub fn compute_pair_priority(controlling: bool, local_priority: u32, remote_priority: u32) -> u64 {
    let (g, d) = if controlling {
        (local_priority, remote_priority)
    } else {
        (remote_priority, local_priority)
    };

    (u64::from(std::cmp::min(g, d)) << 32)
        .wrapping_add(2 * u64::from(std::cmp::max(g, d)))
        .wrapping_add(u64::from(g > d))
}

/// Represents a combination of a local and remote candidate.
///
/// Both candidates live in the owning stream's candidate arena and are
/// referenced here by index.
#[derive(Clone)]
pub struct CandidatePair {
    pub local_index: usize,
    pub remote_index: usize,
    pub local_priority: u32,
    pub remote_priority: u32,
    pub(crate) component_id: u16,
    pub(crate) foundation: String,
    pub(crate) priority: u64,
    pub(crate) state: CandidatePairState,
    pub(crate) is_default: bool,
    pub(crate) is_nominated: bool,
    /// Controlled side saw USE-CANDIDATE before this pair succeeded.
    pub(crate) nominated_contingent: bool,
    /// Next check carries USE-CANDIDATE.
    pub(crate) use_candidate: bool,
    pub(crate) is_triggered: bool,
    pub(crate) tie_breaker: u64,
    /// PRIORITY attribute value sent in checks (the peer reflexive priority of the local candidate).
    pub(crate) bind_request_priority: u32,
    pub(crate) retry: Retransmit,
    pub(crate) canceled_transaction_ids: Vec<TransactionId>,
}

impl fmt::Debug for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {}) {}",
            self.priority,
            self.local_priority,
            self.local_index,
            self.remote_index,
            self.remote_priority,
            self.state,
        )
    }
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local, prio {}) {} <-> {} (remote, prio {})",
            self.priority,
            self.local_priority,
            self.local_index,
            self.remote_index,
            self.remote_priority,
        )
    }
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local_index == other.local_index && self.remote_index == other.remote_index
    }
}

/// Parameters fixed when a pair is formed.
#[derive(Debug, Clone)]
pub struct CandidatePairConfig {
    pub local_index: usize,
    pub remote_index: usize,
    pub local_priority: u32,
    pub remote_priority: u32,
    pub component_id: u16,
    pub local_foundation: String,
    pub remote_foundation: String,
    pub controlling: bool,
    pub is_default: bool,
    pub tie_breaker: u64,
    pub bind_request_priority: u32,
    pub use_aggressive_nomination: bool,
    pub max_check_retries: u16,
    pub check_retry_timeout: Duration,
}

impl CandidatePair {
    #[must_use]
    pub fn new(config: CandidatePairConfig, now: Instant) -> Self {
        Self {
            local_index: config.local_index,
            remote_index: config.remote_index,
            local_priority: config.local_priority,
            remote_priority: config.remote_priority,
            component_id: config.component_id,
            foundation: format!("{}:{}", config.local_foundation, config.remote_foundation),
            priority: compute_pair_priority(
                config.controlling,
                config.local_priority,
                config.remote_priority,
            ),
            state: CandidatePairState::Frozen,
            is_default: config.is_default,
            is_nominated: false,
            nominated_contingent: false,
            use_candidate: config.controlling && config.use_aggressive_nomination,
            is_triggered: false,
            tie_breaker: config.tie_breaker,
            bind_request_priority: config.bind_request_priority,
            retry: Retransmit {
                queued_at: None,
                ..Retransmit::new(config.max_check_retries, config.check_retry_timeout, now)
            },
            canceled_transaction_ids: vec![],
        }
    }

    /// Fixed at creation; never recomputed.
    pub fn priority(&self) -> u64 {
        self.priority
    }

    pub fn state(&self) -> CandidatePairState {
        self.state
    }

    pub fn foundation(&self) -> &str {
        &self.foundation
    }

    pub fn component_id(&self) -> u16 {
        self.component_id
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_nominated(&self) -> bool {
        self.is_nominated
    }

    pub fn is_triggered(&self) -> bool {
        self.is_triggered
    }

    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }

    pub fn bind_request_priority(&self) -> u32 {
        self.bind_request_priority
    }

    pub fn retry(&self) -> &Retransmit {
        &self.retry
    }

    /// InProgress with its last attempt timed out and attempts left.
    pub(crate) fn retry_available(&self, now: Instant) -> bool {
        self.state == CandidatePairState::InProgress && self.retry.retry_available(now)
    }

    /// Waiting, or InProgress with a retry due.
    pub(crate) fn is_ready(&self, now: Instant) -> bool {
        self.state == CandidatePairState::Waiting || self.retry_available(now)
    }

    /// InProgress with its last attempt timed out and nothing left to send.
    pub(crate) fn retries_exhausted(&self, now: Instant) -> bool {
        self.state == CandidatePairState::InProgress
            && self.retry.retry_timed_out(now)
            && !self.retry.any_retries_not_sent()
    }

    /// Queues this pair for a triggered check. Any transaction in flight is
    /// canceled; a late response to it is still honoured.
    pub(crate) fn add_triggered(&mut self, now: Instant) {
        if let Some(tid) = self.retry.transaction_id.take() {
            self.canceled_transaction_ids.push(tid);
        }
        self.retry.attempts = 0;
        self.retry.set_state(Default::default());
        self.retry.queued_at = Some(now);
        self.is_triggered = true;
        if self.state != CandidatePairState::Succeeded || self.use_candidate {
            self.state = CandidatePairState::Waiting;
        }
    }

    /// Records a check transmission and returns the transaction id it carries.
    pub(crate) fn increment_retry_attempt(&mut self, now: Instant) -> TransactionId {
        let tid = match self.retry.transaction_id {
            Some(tid) => tid,
            None => TransactionId::new(),
        };
        self.retry.resend(tid, now);
        self.state = CandidatePairState::InProgress;
        self.is_triggered = false;
        tid
    }

    pub(crate) fn matches_transaction(&self, tid: &TransactionId) -> bool {
        self.retry.matches(tid) || self.canceled_transaction_ids.contains(tid)
    }

    /// Oldest queued first, ties broken by higher priority.
    pub(crate) fn compare_by_queued_time(&self, other: &Self) -> Ordering {
        let by_time = match (self.retry.queued_at, other.retry.queued_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        };
        by_time.then_with(|| other.priority.cmp(&self.priority))
    }
}
