use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::network_interface::NetworkInterface;

/// How often the pacing loop looks for STUN/TURN work.
pub(crate) const DEFAULT_PACING_INTERVAL: Duration = Duration::from_millis(500);

/// Base interval between connectivity checks of one stream.
pub(crate) const DEFAULT_CHECK_PACING_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) const DEFAULT_STUN_RETRY_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) const DEFAULT_MAX_STUN_RETRIES: u16 = 7;

/// Max binding requests on a pair before it is considered failed.
pub(crate) const DEFAULT_MAX_CHECK_RETRIES: u16 = 7;

pub(crate) const DEFAULT_CHECK_RETRY_TIMEOUT: Duration = Duration::from_millis(500);

/// NAT binding keepalive for reflexive candidates.
pub(crate) const DEFAULT_STUN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub(crate) const DEFAULT_TURN_PERMISSION_REFRESH_PERIOD: Duration = Duration::from_secs(300);

/// Refreshes are sent this long before an allocation or permission expires.
pub(crate) const DEFAULT_TURN_REFRESH_WARNING_PERIOD: Duration = Duration::from_secs(60);

pub(crate) const DEFAULT_TURN_ALLOCATION_LIFETIME: Duration = Duration::from_secs(600);

/// Total number of candidate pairs shared by all check lists of a session.
pub(crate) const DEFAULT_MAX_CHECK_PAIRS: usize = 100;

pub(crate) const SOFTWARE: &str = concat!("rtc-ice-session ", env!("CARGO_PKG_VERSION"));

/// TURN relay endpoint of a [`StunServerInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayInfo {
    pub address: IpAddr,
    pub port: u16,
}

impl RelayInfo {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// The STUN server used for reflexive candidates, optionally with a TURN relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunServerInfo {
    pub address: IpAddr,
    pub port: u16,
    pub account: String,
    pub password: String,
    pub relay_info: Option<RelayInfo>,
}

impl StunServerInfo {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Collects the arguments to `IceSession` construction into a single structure.
#[derive(Default, Clone)]
pub struct SessionConfig {
    /// Prefix of every log line of this session; a random one is generated when empty.
    pub name: String,

    pub add_host_candidates: bool,
    pub add_relayed_candidates: bool,
    pub enable_ipv6: bool,

    pub stun_info: Option<StunServerInfo>,

    /// Addresses already used by the on-demand and persistent signaling
    /// connections. Host candidates on these get a local preference bonus.
    pub on_demand_address: Option<IpAddr>,
    pub persistent_address: Option<IpAddr>,

    pub is_controlling: bool,

    /// Checks sent by the controlling agent carry USE-CANDIDATE from the start.
    pub use_aggressive_nomination: bool,

    /// A relayed candidate's refresh or permission failure fails the session.
    pub aggressive_fail_gathering: bool,

    /// Defaults to one stream.
    pub num_streams: Option<usize>,
    /// Components per stream, numbered from 1. Defaults to 1 (RTP only).
    pub num_components: Option<u16>,

    /// Interfaces to gather on. Defaults to the system's interfaces.
    pub network_interface: Option<NetworkInterface>,

    pub pacing_interval: Option<Duration>,
    pub check_pacing_interval: Option<Duration>,
    pub stun_retry_timeout: Option<Duration>,
    pub max_stun_retries: Option<u16>,
    pub max_check_retries: Option<u16>,
    pub check_retry_timeout: Option<Duration>,
    pub stun_keepalive_interval: Option<Duration>,
    pub turn_permission_refresh_period: Option<Duration>,
    pub turn_refresh_warning_period: Option<Duration>,
    pub turn_allocation_lifetime: Option<Duration>,
    /// Total pair budget over all streams. Defaults to 100.
    pub max_check_pairs: Option<usize>,
}
