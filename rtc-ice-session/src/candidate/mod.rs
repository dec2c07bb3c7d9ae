#[cfg(test)]
mod candidate_pair_test;
#[cfg(test)]
mod candidate_test;

pub mod candidate_pair;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::*;
use crate::transport::TransportProtocol;

/// Indicates that the candidate is used for RTP.
pub(crate) const COMPONENT_ID_RTP: u16 = 1;

/// Priority value of a candidate that has not been through priority assignment yet.
pub(crate) const PRIORITY_UNSET: u32 = 0;

/// Represents the type of candidate `CandidateType` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateType {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
}

// String makes CandidateType printable
impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relay => "relay",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CandidateType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::ServerReflexive),
            "prflx" => Ok(CandidateType::PeerReflexive),
            "relay" => Ok(CandidateType::Relay),
            _ => Err(Error::ErrUnknownCandidateType(s.to_owned())),
        }
    }
}

impl CandidateType {
    /// Returns the preference weight of a `CandidateType`.
    ///
    /// 4.1.2.2.  Guidelines for Choosing Type and Local Preferences
    /// The RECOMMENDED values are 126 for host candidates, 100
    /// for server reflexive candidates, 110 for peer reflexive candidates,
    /// and 0 for relayed candidates.
    #[must_use]
    pub const fn preference(self) -> u32 {
        match self {
            Self::Host => 126,
            Self::PeerReflexive => 110,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }

    /// Relay < ServerReflexive < PeerReflexive < Host. Orders foundation groups
    /// and picks a component's default candidate; the highest wins.
    pub(crate) const fn rank(self) -> u8 {
        match self {
            Self::Relay => 0,
            Self::ServerReflexive => 1,
            Self::PeerReflexive => 2,
            Self::Host => 3,
        }
    }
}

/// priority = (2^24)*(type preference) + (2^8)*(local preference) + (2^0)*(256 - component ID)
///
/// Type preference is limited to 7 bits and local preference to 16 bits.
pub fn compute_priority(type_preference: u32, local_preference: u32, component_id: u16) -> u32 {
    ((type_preference << 24) & 0x7e00_0000)
        .wrapping_add((local_preference << 8) & 0x00ff_ff00)
        .wrapping_add(256u32.wrapping_sub(u32::from(component_id)))
}

/// One local or remote transport address of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub(crate) candidate_type: CandidateType,
    pub(crate) endpoint: SocketAddr,
    pub(crate) base: SocketAddr,
    /// Server reflexive address learnt alongside a relayed allocation, or
    /// the related address advertised for a remote candidate.
    pub(crate) mapped_address: Option<SocketAddr>,
    /// STUN/TURN server that produced this candidate.
    pub(crate) server: Option<SocketAddr>,
    pub(crate) priority: u32,
    pub(crate) foundation: String,
    pub(crate) component_id: u16,
    pub(crate) transport_protocol: TransportProtocol,
    /// Arena index of the host candidate whose socket this candidate sends from.
    pub(crate) host_index: Option<usize>,
    pub(crate) allocation_lifetime: Option<Duration>,
    pub(crate) is_remote: bool,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} component {}",
            self.transport_protocol, self.candidate_type, self.endpoint, self.component_id
        )?;
        if self.base != self.endpoint {
            write!(f, " base {}", self.base)?;
        }
        Ok(())
    }
}

impl Candidate {
    fn new(
        candidate_type: CandidateType,
        endpoint: SocketAddr,
        base: SocketAddr,
        component_id: u16,
        transport_protocol: TransportProtocol,
    ) -> Self {
        Candidate {
            candidate_type,
            endpoint,
            base,
            mapped_address: None,
            server: None,
            priority: PRIORITY_UNSET,
            foundation: String::new(),
            component_id,
            transport_protocol,
            host_index: None,
            allocation_lifetime: None,
            is_remote: false,
        }
    }

    pub fn new_host(
        component_id: u16,
        endpoint: SocketAddr,
        transport_protocol: TransportProtocol,
    ) -> Self {
        Self::new(
            CandidateType::Host,
            endpoint,
            endpoint,
            component_id,
            transport_protocol,
        )
    }

    pub fn new_server_reflexive(
        component_id: u16,
        mapped: SocketAddr,
        base: SocketAddr,
        server: SocketAddr,
        host_index: usize,
    ) -> Self {
        let mut c = Self::new(
            CandidateType::ServerReflexive,
            mapped,
            base,
            component_id,
            TransportProtocol::Udp,
        );
        c.server = Some(server);
        c.host_index = Some(host_index);
        c
    }

    /// Relayed candidates are their own base.
    pub fn new_relayed(
        component_id: u16,
        relayed: SocketAddr,
        mapped: Option<SocketAddr>,
        server: SocketAddr,
        host_index: usize,
        lifetime: Duration,
    ) -> Self {
        let mut c = Self::new(
            CandidateType::Relay,
            relayed,
            relayed,
            component_id,
            TransportProtocol::Udp,
        );
        c.mapped_address = mapped;
        c.server = Some(server);
        c.host_index = Some(host_index);
        c.allocation_lifetime = Some(lifetime);
        c
    }

    pub fn new_peer_reflexive(
        component_id: u16,
        mapped: SocketAddr,
        base: SocketAddr,
        transport_protocol: TransportProtocol,
        host_index: Option<usize>,
    ) -> Self {
        let mut c = Self::new(
            CandidateType::PeerReflexive,
            mapped,
            base,
            component_id,
            transport_protocol,
        );
        c.host_index = host_index;
        c
    }

    /// Builds the local-side object for a candidate the peer advertised.
    pub fn new_remote(record: &IceCandidateRecord) -> Self {
        let endpoint = SocketAddr::new(record.address, record.port);
        let mut c = Self::new(
            record.candidate_type,
            endpoint,
            endpoint,
            record.component_id,
            record.transport,
        );
        c.priority = record.priority;
        c.foundation = record.foundation.clone();
        c.mapped_address = match record.candidate_type {
            CandidateType::Relay => match (record.raddress, record.rport) {
                (Some(addr), Some(port)) => Some(SocketAddr::new(addr, port)),
                _ => None,
            },
            CandidateType::ServerReflexive => Some(endpoint),
            _ => None,
        };
        c.is_remote = true;
        c
    }

    pub fn candidate_type(&self) -> CandidateType {
        self.candidate_type
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn base(&self) -> SocketAddr {
        self.base
    }

    pub fn mapped_address(&self) -> Option<SocketAddr> {
        self.mapped_address
    }

    pub fn server(&self) -> Option<SocketAddr> {
        self.server
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn foundation(&self) -> &str {
        &self.foundation
    }

    pub fn component_id(&self) -> u16 {
        self.component_id
    }

    pub fn transport_protocol(&self) -> TransportProtocol {
        self.transport_protocol
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn allocation_lifetime(&self) -> Option<Duration> {
        self.allocation_lifetime
    }

    /// Server address as used for foundation grouping; empty for host candidates.
    pub(crate) fn server_string(&self) -> String {
        self.server.map(|s| s.ip().to_string()).unwrap_or_default()
    }

    /// The wire-format record handed to the signaling channel.
    pub fn to_record(&self) -> IceCandidateRecord {
        let related = match self.candidate_type {
            CandidateType::Host => None,
            CandidateType::ServerReflexive | CandidateType::PeerReflexive => Some(self.base),
            CandidateType::Relay => self.mapped_address,
        };
        IceCandidateRecord {
            candidate_type: self.candidate_type,
            foundation: self.foundation.clone(),
            component_id: self.component_id,
            transport: self.transport_protocol,
            priority: self.priority,
            address: self.endpoint.ip(),
            port: self.endpoint.port(),
            raddress: related.map(|r| r.ip()),
            rport: related.map(|r| r.port()),
        }
    }
}

/// A candidate as exchanged with the remote peer over the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateRecord {
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    pub foundation: String,
    pub component_id: u16,
    pub transport: TransportProtocol,
    pub priority: u32,
    pub address: IpAddr,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raddress: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rport: Option<u16>,
}

impl IceCandidateRecord {
    /// Returns the string representation of the candidate in SDP attribute form.
    pub fn marshal(&self) -> String {
        let mut val = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component_id,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.candidate_type
        );

        if let (Some(raddr), Some(rport)) = (self.raddress, self.rport) {
            val += format!(" raddr {raddr} rport {rport}").as_str();
        }

        val
    }
}

/// Creates a candidate record from its string representation.
pub fn unmarshal_candidate(raw: &str) -> Result<IceCandidateRecord> {
    let split: Vec<&str> = raw.split_whitespace().collect();
    if split.len() < 8 {
        return Err(Error::Other(format!(
            "attribute not long enough to be ICE candidate ({})",
            split.len()
        )));
    }

    let foundation = split[0].to_owned();
    let component_id: u16 = split[1]
        .parse()
        .map_err(|e| Error::Other(format!("invalid component {}: {e}", split[1])))?;
    let transport = TransportProtocol::from_str(split[2])?;
    let priority: u32 = split[3]
        .parse()
        .map_err(|e| Error::Other(format!("invalid priority {}: {e}", split[3])))?;
    let address: IpAddr = split[4]
        .parse()
        .map_err(|e| Error::Other(format!("invalid address {}: {e}", split[4])))?;
    let port: u16 = split[5]
        .parse()
        .map_err(|e| Error::Other(format!("invalid port {}: {e}", split[5])))?;
    // split[6] is "typ"
    let candidate_type = CandidateType::from_str(split[7])?;

    let mut raddress = None;
    let mut rport = None;
    if split.len() > 8 {
        let tail = &split[8..];
        if tail.len() < 4 || tail[0] != "raddr" || tail[2] != "rport" {
            return Err(Error::Other(format!(
                "could not parse related addresses: {}",
                tail.join(" ")
            )));
        }
        raddress = Some(
            tail[1]
                .parse()
                .map_err(|e| Error::Other(format!("invalid raddr {}: {e}", tail[1])))?,
        );
        rport = Some(
            tail[3]
                .parse()
                .map_err(|e| Error::Other(format!("invalid rport {}: {e}", tail[3])))?,
        );
    }

    Ok(IceCandidateRecord {
        candidate_type,
        foundation,
        component_id,
        transport,
        priority,
        address,
        port,
        raddress,
        rport,
    })
}
