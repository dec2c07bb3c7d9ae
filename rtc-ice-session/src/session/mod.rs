
mod session_checks;
pub mod session_config;
mod session_gather;
mod session_proto;

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::candidate::candidate_pair::*;
use crate::candidate::*;
use crate::error::{Error, Result};
use crate::network_interface::NetworkInterface;
use crate::rand::*;
use crate::state::*;
use crate::stream::IceStream;
use crate::transport::*;
use session_config::*;

/// What the session reports to its listener.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Local candidates are final; see [`IceSession::local_candidates`].
    CandidatesGathered,
    /// Every component has a selected pair; see [`IceSession::selected_candidate_pairs`].
    ChecksSucceeded,
    /// See [`IceSession::error_code`].
    ProcessingFailed,
}

/// Outcome of one dispatcher tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Tick again after the given interval.
    Continue(Duration),
    /// The dispatcher has nothing left to do and must stop.
    Finished,
}

/// A stream whose check list needs a dispatcher started.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DispatcherRequest {
    pub stream: usize,
    pub epoch: u64,
}

/// The pair chosen for one component once checks succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedCandidatePair {
    pub stream: usize,
    pub component_id: u16,
    pub local: Candidate,
    pub remote: Candidate,
    pub priority: u64,
}

/// The local candidates and credentials handed to the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalIceCandidates {
    pub ufrag: String,
    pub pwd: String,
    pub candidates: Vec<IceCandidateRecord>,
}

/// `(stream, component position, activity position)`
pub(crate) type ActivityHandle = (usize, usize, usize);

/// The sans-IO ICE agent: candidate gathering, check lists and nomination
/// for every stream of one session.
pub struct IceSession {
    pub(crate) name: String,

    pub(crate) add_host_candidates: bool,
    pub(crate) add_relayed_candidates: bool,
    pub(crate) enable_ipv6: bool,
    pub(crate) stun_info: Option<StunServerInfo>,
    pub(crate) on_demand_address: Option<std::net::IpAddr>,
    pub(crate) persistent_address: Option<std::net::IpAddr>,
    pub(crate) use_aggressive_nomination: bool,
    pub(crate) aggressive_fail_gathering: bool,

    pub(crate) pacing_interval: Duration,
    pub(crate) check_pacing_interval: Duration,
    pub(crate) stun_retry_timeout: Duration,
    pub(crate) max_stun_retries: u16,
    pub(crate) max_check_retries: u16,
    pub(crate) check_retry_timeout: Duration,
    pub(crate) stun_keepalive_interval: Duration,
    pub(crate) turn_permission_refresh_period: Duration,
    pub(crate) turn_refresh_warning_period: Duration,
    pub(crate) turn_allocation_lifetime: Duration,
    pub(crate) max_check_pairs: usize,

    pub(crate) network_interface: NetworkInterface,
    pub(crate) streams: Vec<IceStream>,

    pub(crate) role: IceRole,
    pub(crate) tie_breaker: u64,
    pub(crate) state: SessionState,
    pub(crate) foundation_counter: u32,

    pub(crate) local_ufrag: String,
    pub(crate) local_pwd: String,
    pub(crate) remote_ufrag: String,
    pub(crate) remote_pwd: String,
    pub(crate) local_candidates: Vec<IceCandidateRecord>,

    pub(crate) error: Option<Error>,
    pub(crate) success_notified: bool,
    pub(crate) failure_notified: bool,

    pub(crate) next_pacing: Option<Instant>,
    pub(crate) terminating: bool,
    pub(crate) dispatcher_requests: Vec<DispatcherRequest>,

    pub(crate) transmits: VecDeque<Transmit>,
    pub(crate) events: VecDeque<SessionEvent>,
}

impl IceSession {
    /// Creates a new session with its streams and components. Nothing is
    /// gathered until [`gather_host_candidates`](Self::gather_host_candidates).
    pub fn new(config: SessionConfig) -> Result<Self> {
        let num_streams = config.num_streams.unwrap_or(1);
        let num_components = config.num_components.unwrap_or(1);
        if num_streams == 0 || num_components == 0 {
            return Err(Error::Other(
                "a session needs at least one stream and one component".to_owned(),
            ));
        }

        let streams = (0..num_streams)
            .map(|index| {
                let mut stream = IceStream::new(index);
                for id in 1..=num_components {
                    stream.add_component(id);
                }
                stream
            })
            .collect();

        let name = if config.name.is_empty() {
            generate_ufrag()
        } else {
            config.name
        };

        Ok(IceSession {
            name,

            add_host_candidates: config.add_host_candidates,
            add_relayed_candidates: config.add_relayed_candidates,
            enable_ipv6: config.enable_ipv6,
            stun_info: config.stun_info,
            on_demand_address: config.on_demand_address,
            persistent_address: config.persistent_address,
            use_aggressive_nomination: config.use_aggressive_nomination,
            aggressive_fail_gathering: config.aggressive_fail_gathering,

            pacing_interval: config.pacing_interval.unwrap_or(DEFAULT_PACING_INTERVAL),
            check_pacing_interval: config
                .check_pacing_interval
                .unwrap_or(DEFAULT_CHECK_PACING_INTERVAL),
            stun_retry_timeout: config
                .stun_retry_timeout
                .unwrap_or(DEFAULT_STUN_RETRY_TIMEOUT),
            max_stun_retries: config.max_stun_retries.unwrap_or(DEFAULT_MAX_STUN_RETRIES),
            max_check_retries: config
                .max_check_retries
                .unwrap_or(DEFAULT_MAX_CHECK_RETRIES),
            check_retry_timeout: config
                .check_retry_timeout
                .unwrap_or(DEFAULT_CHECK_RETRY_TIMEOUT),
            stun_keepalive_interval: config
                .stun_keepalive_interval
                .unwrap_or(DEFAULT_STUN_KEEPALIVE_INTERVAL),
            turn_permission_refresh_period: config
                .turn_permission_refresh_period
                .unwrap_or(DEFAULT_TURN_PERMISSION_REFRESH_PERIOD),
            turn_refresh_warning_period: config
                .turn_refresh_warning_period
                .unwrap_or(DEFAULT_TURN_REFRESH_WARNING_PERIOD),
            turn_allocation_lifetime: config
                .turn_allocation_lifetime
                .unwrap_or(DEFAULT_TURN_ALLOCATION_LIFETIME),
            max_check_pairs: config.max_check_pairs.unwrap_or(DEFAULT_MAX_CHECK_PAIRS),

            network_interface: config.network_interface.unwrap_or_default(),
            streams,

            role: if config.is_controlling {
                IceRole::Controlling
            } else {
                IceRole::Controlled
            },
            tie_breaker: generate_tie_breaker(),
            state: SessionState::GatheringCandidates,
            foundation_counter: 0,

            local_ufrag: String::new(),
            local_pwd: String::new(),
            remote_ufrag: String::new(),
            remote_pwd: String::new(),
            local_candidates: vec![],

            error: None,
            success_notified: false,
            failure_notified: false,

            next_pacing: None,
            terminating: false,
            dispatcher_requests: vec![],

            transmits: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> IceRole {
        self.role
    }

    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }

    pub fn streams(&self) -> &[IceStream] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Result<&IceStream> {
        self.streams
            .get(index)
            .ok_or(Error::ErrStreamNotFound(index))
    }

    /// The error that moved the session to `ProcessingFailed`.
    pub fn error_code(&self) -> Option<Error> {
        self.error.clone()
    }

    pub fn get_local_user_credentials(&self) -> (String, String) {
        (self.local_ufrag.clone(), self.local_pwd.clone())
    }

    pub fn get_remote_user_credentials(&self) -> (String, String) {
        (self.remote_ufrag.clone(), self.remote_pwd.clone())
    }

    /// The candidates and credentials to send to the peer.
    pub fn local_candidates(&self) -> Result<LocalIceCandidates> {
        if matches!(
            self.state,
            SessionState::GatheringCandidates | SessionState::ProcessingFailed
        ) {
            return Err(Error::ErrInvalidState);
        }
        Ok(LocalIceCandidates {
            ufrag: self.local_ufrag.clone(),
            pwd: self.local_pwd.clone(),
            candidates: self.local_candidates.clone(),
        })
    }

    /// One pair per component of every stream, once checks succeeded.
    pub fn selected_candidate_pairs(&self) -> Result<Vec<SelectedCandidatePair>> {
        if self.state != SessionState::ChecksSucceeded {
            return Err(Error::ErrInvalidState);
        }

        let mut selected = vec![];
        for stream in &self.streams {
            for component in &stream.components {
                let p = component.selected_pair.ok_or(Error::ErrNoSelectedPair)?;
                let pair = &stream.pairs[p];
                selected.push(SelectedCandidatePair {
                    stream: stream.index,
                    component_id: component.id,
                    local: stream.candidates[pair.local_index].clone(),
                    remote: stream.candidates[pair.remote_index].clone(),
                    priority: pair.priority,
                });
            }
        }
        Ok(selected)
    }

    /// Streams whose check list dispatcher was started since the last call.
    pub fn take_dispatcher_requests(&mut self) -> Vec<DispatcherRequest> {
        std::mem::take(&mut self.dispatcher_requests)
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    /// Stops pacing and every dispatcher.
    pub fn close_session(&mut self) {
        self.terminating = true;
        self.next_pacing = None;
        for stream in &mut self.streams {
            stream.set_terminate();
        }
        self.dispatcher_requests.clear();
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("[{}]: session state {} -> {}", self.name, self.state, state);
            self.state = state;
        }
    }

    /// Moves the session to `ProcessingFailed` and reports it once.
    pub(crate) fn fail_session(&mut self, err: Error) {
        if self.state == SessionState::ProcessingFailed {
            return;
        }
        warn!("[{}]: session failed: {}", self.name, err);
        self.error = Some(err);
        for stream in &mut self.streams {
            stream.set_terminate();
        }
        self.next_pacing = None;
        self.set_state(SessionState::ProcessingFailed);
        if !self.failure_notified {
            self.failure_notified = true;
            self.events.push_back(SessionEvent::ProcessingFailed);
        }
    }

    /// Starts the dispatcher of a stream that is not already finished.
    pub(crate) fn start_dispatcher(&mut self, stream: usize, now: Instant) {
        if self.terminating
            || matches!(
                self.streams[stream].state,
                CheckListState::Completed | CheckListState::Failed
            )
        {
            return;
        }
        if let Some(epoch) = self.streams[stream].start_check_list_dispatcher(now) {
            debug!("[{}]: starting dispatcher of stream {}", self.name, stream);
            self.dispatcher_requests.retain(|r| r.stream != stream);
            self.dispatcher_requests
                .push(DispatcherRequest { stream, epoch });
        }
    }

    /// Local candidates of every stream, in stream then component order.
    pub(crate) fn local_candidate_handles(&self) -> Vec<(usize, usize)> {
        self.streams
            .iter()
            .enumerate()
            .flat_map(|(s, stream)| {
                stream
                    .components
                    .iter()
                    .flat_map(move |component| component.candidates.iter().map(move |&c| (s, c)))
            })
            .collect()
    }

    /// The endpoint of the socket a local candidate sends from.
    pub(crate) fn host_socket(&self, stream: usize, candidate: usize) -> SocketAddr {
        let arena = &self.streams[stream].candidates;
        match arena[candidate].host_index {
            Some(host) => arena[host].endpoint,
            None => arena[candidate].base,
        }
    }

    pub(crate) fn next_foundation(&mut self) -> String {
        self.foundation_counter += 1;
        self.foundation_counter.to_string()
    }

    /// Priority of `candidate` were it of type `candidate_type`.
    ///
    /// Type preference follows RFC 8445 except that host candidates on a VPN
    /// interface of a multi-homed host get 0. On a multi-homed host, local
    /// preference favours IPv6, and any base already carrying signaling
    /// traffic gets a bonus, VPN hosts included.
    pub(crate) fn assign_priority(&self, candidate: &Candidate, candidate_type: CandidateType) -> u32 {
        let multi_homed = self.network_interface.is_multi_homed();
        let base_ip = candidate.base.ip();
        let vpn = multi_homed && self.network_interface.is_vpn(base_ip);

        let type_preference = match candidate_type {
            CandidateType::Host if vpn => 0,
            t => t.preference(),
        };

        let local_preference = if !multi_homed {
            65535
        } else {
            let preference = if vpn && candidate_type == CandidateType::Host {
                0
            } else if base_ip.is_ipv6() {
                40000
            } else {
                20000
            };
            if Some(base_ip) == self.on_demand_address || Some(base_ip) == self.persistent_address
            {
                preference + 25535
            } else {
                preference
            }
        };

        compute_priority(type_preference, local_preference, candidate.component_id)
    }

    /// Candidates sharing type, base address, server and transport share a
    /// foundation; every other group gets a fresh one.
    pub(crate) fn assign_foundations(&mut self) {
        let mut keyed: Vec<_> = self
            .local_candidate_handles()
            .into_iter()
            .map(|(s, c)| {
                let candidate = &self.streams[s].candidates[c];
                (
                    (
                        candidate.candidate_type.rank(),
                        candidate.base.ip().to_string(),
                        candidate.server_string(),
                        candidate.transport_protocol,
                    ),
                    (s, c),
                )
            })
            .collect();
        keyed.sort_by(|a, b| b.0.cmp(&a.0));

        let mut previous = None;
        let mut foundation = String::new();
        for (key, (s, c)) in keyed {
            if previous.as_ref() != Some(&key) {
                foundation = self.next_foundation();
                previous = Some(key);
            }
            self.streams[s].candidates[c].foundation = foundation.clone();
        }
    }

    /// Foundation for a peer reflexive candidate learned during checks.
    pub(crate) fn peer_reflexive_foundation(
        &mut self,
        base: SocketAddr,
        transport_protocol: TransportProtocol,
    ) -> String {
        let existing = self.local_candidate_handles().into_iter().find_map(|(s, c)| {
            let candidate = &self.streams[s].candidates[c];
            (candidate.candidate_type == CandidateType::PeerReflexive
                && candidate.base.ip() == base.ip()
                && candidate.transport_protocol == transport_protocol)
                .then(|| candidate.foundation.clone())
        });
        match existing {
            Some(foundation) => foundation,
            None => self.next_foundation(),
        }
    }

    pub(crate) fn assign_priorities(&mut self) {
        for (s, c) in self.local_candidate_handles() {
            let candidate = &self.streams[s].candidates[c];
            let priority = self.assign_priority(candidate, candidate.candidate_type);
            self.streams[s].candidates[c].priority = priority;
        }
    }

    /// Drops candidates whose endpoint and base duplicate a higher priority one.
    pub(crate) fn eliminate_redundant_candidates(&mut self) {
        let mut keyed: Vec<_> = self
            .local_candidate_handles()
            .into_iter()
            .map(|(s, c)| {
                let candidate = &self.streams[s].candidates[c];
                (
                    (
                        candidate.endpoint.ip().to_string(),
                        candidate.endpoint.port(),
                        candidate.base.ip().to_string(),
                        candidate.base.port(),
                        candidate.priority,
                    ),
                    (s, c),
                )
            })
            .collect();
        keyed.sort_by(|a, b| b.0.cmp(&a.0));

        let mut previous: Option<(SocketAddr, SocketAddr)> = None;
        for (_, (s, c)) in keyed {
            let stream = &mut self.streams[s];
            let candidate = &stream.candidates[c];
            let addresses = (candidate.endpoint, candidate.base);
            if previous == Some(addresses) {
                debug!("[{}]: removing redundant candidate {}", self.name, candidate);
                if let Some(position) = stream.component_position(candidate.component_id) {
                    stream.components[position].remove_candidate(c);
                }
            } else {
                previous = Some(addresses);
            }
        }
    }

    pub(crate) fn choose_default_candidates(&mut self) {
        for stream in &mut self.streams {
            let IceStream {
                candidates,
                components,
                ..
            } = stream;
            for component in components.iter_mut() {
                component.default_candidate = None;
                for c in component.candidates.clone() {
                    component.assign_default_candidate(c, candidates);
                }
            }
        }
    }

    /// Materializes the wire records of the local candidates.
    pub(crate) fn update_local_ice_candidates(&mut self) {
        if self.local_ufrag.is_empty() {
            self.local_ufrag = generate_ufrag();
            self.local_pwd = generate_pwd();
        }
        self.local_candidates = self
            .local_candidate_handles()
            .into_iter()
            .map(|(s, c)| self.streams[s].candidates[c].to_record())
            .collect();
    }
}
