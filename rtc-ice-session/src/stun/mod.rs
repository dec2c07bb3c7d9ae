#[cfg(test)]
mod stun_test;

pub mod retransmit;

use std::fmt;
use std::net::SocketAddr;

pub use ::stun::error_code::{
    CODE_ALLOC_MISMATCH, CODE_ALLOC_QUOTA_REACHED, CODE_INSUFFICIENT_CAPACITY, CODE_ROLE_CONFLICT,
    CODE_UNAUTHORIZED, ErrorCode,
};
pub use ::stun::message::{TRANSACTION_ID_SIZE, TransactionId};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageClass {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Binding,
    Allocate,
    Refresh,
    CreatePermission,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Method::Binding => "Binding",
            Method::Allocate => "Allocate",
            Method::Refresh => "Refresh",
            Method::CreatePermission => "CreatePermission",
        };
        write!(f, "{s}")
    }
}

/// The attributes the session reads or writes. The transport owns the wire
/// encoding; `MessageIntegrity` carries the key it must sign with and
/// `Fingerprint` only marks that a FINGERPRINT has to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    Software(String),
    Username(String),
    MessageIntegrity(Vec<u8>),
    Fingerprint,
    /// Seconds.
    Lifetime(u32),
    RequestedTransport(u8),
    XorMappedAddress(SocketAddr),
    XorRelayedAddress(SocketAddr),
    XorPeerAddress(SocketAddr),
    Priority(u32),
    UseCandidate,
    IceControlling(u64),
    IceControlled(u64),
    ErrorCode { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    pub class: MessageClass,
    pub method: Method,
    pub transaction_id: TransactionId,
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Creates a message with a fresh random transaction id.
    pub fn new(class: MessageClass, method: Method) -> Self {
        Self::with_transaction_id(class, method, TransactionId::new())
    }

    pub fn with_transaction_id(
        class: MessageClass,
        method: Method,
        transaction_id: TransactionId,
    ) -> Self {
        StunMessage {
            class,
            method,
            transaction_id,
            attributes: vec![],
        }
    }

    pub fn add(&mut self, attr: StunAttribute) {
        self.attributes.push(attr);
    }

    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    pub fn xor_relayed_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::XorRelayedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    pub fn lifetime(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::Lifetime(secs) => Some(*secs),
            _ => None,
        })
    }

    pub fn priority(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::Priority(p) => Some(*p),
            _ => None,
        })
    }

    pub fn username(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::Username(u) => Some(u.as_str()),
            _ => None,
        })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::ErrorCode { code, .. } => Some(ErrorCode(*code)),
            _ => None,
        })
    }

    pub fn has_use_candidate(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, StunAttribute::UseCandidate))
    }

    /// Returns `Some(true)` for ICE-CONTROLLING, `Some(false)` for
    /// ICE-CONTROLLED, along with the peer's tie-breaker.
    pub fn ice_role(&self) -> Option<(bool, u64)> {
        self.attributes.iter().find_map(|a| match a {
            StunAttribute::IceControlling(tie) => Some((true, *tie)),
            StunAttribute::IceControlled(tie) => Some((false, *tie)),
            _ => None,
        })
    }
}

impl fmt::Display for StunMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} tid={:?} attrs={}",
            self.method,
            self.class,
            self.transaction_id,
            self.attributes.len()
        )
    }
}
