use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::stun::StunMessage;

/// Type of transport protocol, either UDP or TCP
#[derive(
    Default, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TransportProtocol {
    /// UDP
    #[default]
    #[serde(rename = "udp")]
    Udp,
    /// TCP
    #[serde(rename = "tcp")]
    Tcp,
}

impl TransportProtocol {
    /// IANA protocol number carried in a TURN REQUESTED-TRANSPORT attribute.
    pub const fn protocol_number(self) -> u8 {
        match self {
            Self::Udp => 17,
            Self::Tcp => 6,
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TransportProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            _ => Err(Error::ErrUnknownTransportProtocol(s.to_owned())),
        }
    }
}

/// Transport Context with local address, peer address and protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransportContext {
    /// Local socket address, the bound endpoint of a host candidate
    pub local_addr: SocketAddr,
    /// Peer socket address, either a STUN/TURN server or a remote candidate
    pub peer_addr: SocketAddr,
    /// Type of transport protocol, either UDP or TCP
    pub transport_protocol: TransportProtocol,
}

impl Default for TransportContext {
    fn default() -> Self {
        let unspecified = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        Self {
            local_addr: unspecified,
            peer_addr: unspecified,
            transport_protocol: TransportProtocol::Udp,
        }
    }
}

/// A generic message with [TransportContext]
#[derive(Debug, Clone)]
pub struct TransportMessage<T> {
    /// Received/Sent time
    pub now: Instant,
    /// A transport context with [local_addr](TransportContext::local_addr) and [peer_addr](TransportContext::peer_addr)
    pub transport: TransportContext,
    /// Message body with generic type
    pub message: T,
}

/// A STUN message received on one of the host sockets.
pub type InboundStun = TransportMessage<StunMessage>;

/// A STUN message the session wants sent from the socket at `transport.local_addr`.
#[derive(Debug, Clone)]
pub struct Transmit {
    pub now: Instant,
    pub transport: TransportContext,
    /// True when the destination is a remote peer rather than a STUN/TURN server.
    pub to_peer: bool,
    pub message: StunMessage,
}

/// Socket I/O and STUN wire encoding live behind this trait; the session only
/// composes messages and decides where they go.
pub trait StunTransport: Send + Sync {
    /// Opens a socket on `ip` with an ephemeral port and returns its bound endpoint.
    fn bind(&self, ip: IpAddr) -> Result<SocketAddr>;

    /// Encodes and sends `message` from the socket bound at `local`.
    fn send(
        &self,
        local: SocketAddr,
        message: &StunMessage,
        destination: SocketAddr,
        to_peer: bool,
    ) -> Result<()>;
}
