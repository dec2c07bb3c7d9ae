use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates the operation is not allowed in the current session state.
    #[error("operation not allowed in current session state")]
    ErrInvalidState,
    #[error("no network interface is up")]
    ErrNoNetworkInterface,
    #[error("no host candidate could be gathered")]
    ErrNoHostCandidate,
    #[error("stun server did not respond to any retransmission")]
    ErrStunServerNoResponse,
    #[error("stun server rejected the request")]
    ErrStunErrorResponse,
    #[error("turn allocate rejected, server out of resources")]
    ErrAllocateRejectedNoResources,
    #[error("turn allocation quota reached")]
    ErrAllocationQuotaReached,
    #[error("turn allocation mismatch")]
    ErrAllocationMismatch,
    #[error("stun server requires authentication")]
    ErrStunUnauthorized,
    #[error("check list formation produced no candidate pairs")]
    ErrEmptyCheckList,
    #[error("no stream with index {0}")]
    ErrStreamNotFound(usize),
    #[error("component has no nominated candidate pair")]
    ErrNoSelectedPair,
    /// Indicates agent does not have a valid remote ufrag.
    #[error("remote ufrag is empty")]
    ErrRemoteUfragEmpty,
    /// Indicates agent does not have a valid remote pwd.
    #[error("remote pwd is empty")]
    ErrRemotePwdEmpty,
    #[error("unknown candidate type {0}")]
    ErrUnknownCandidateType(String),
    #[error("unknown transport protocol {0}")]
    ErrUnknownTransportProtocol(String),
    #[error("candidate pair check did not complete")]
    ErrCheckFailed,
    #[error("ice session not found")]
    ErrSessionNotFound,
    #[error("ice session is closed")]
    ErrSessionClosed,
    #[error("failed to send stun message: {0}")]
    ErrTransportSend(String),

    #[error("io error: {0}")]
    Io(String),
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
