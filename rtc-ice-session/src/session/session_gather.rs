use log::{error, trace};

use super::*;
use crate::stun::retransmit::{ActivityKind, Retransmit, RetransmitState, StunActivity};
use crate::stun::*;

impl IceSession {
    /// Opens a socket on every live non-loopback interface of an allowed
    /// family and registers a host candidate for each component. Interfaces
    /// that fail to bind are skipped.
    pub fn gather_host_candidates(
        &mut self,
        transport: &dyn StunTransport,
        now: Instant,
    ) -> Result<()> {
        if self.state != SessionState::GatheringCandidates || self.next_pacing.is_some() {
            return Err(Error::ErrInvalidState);
        }

        if self.add_host_candidates {
            self.network_interface.update_network_interfaces()?;
            if !self.network_interface.is_any_network_interface_up() {
                return Err(Error::ErrNoNetworkInterface);
            }

            let entries: Vec<_> = self
                .network_interface
                .live_interfaces()
                .iter()
                .filter(|e| !e.is_loopback && (self.enable_ipv6 || e.addr.is_ipv4()))
                .cloned()
                .collect();

            let mut gathered = 0;
            for entry in &entries {
                for s in 0..self.streams.len() {
                    let component_ids: Vec<u16> =
                        self.streams[s].components.iter().map(|c| c.id).collect();
                    for component_id in component_ids {
                        let endpoint = match transport.bind(entry.addr) {
                            Ok(endpoint) => endpoint,
                            Err(err) => {
                                warn!(
                                    "[{}]: skipping interface {} ({}): {}",
                                    self.name, entry.name, entry.addr, err
                                );
                                continue;
                            }
                        };
                        self.add_host_candidate(s, component_id, endpoint, now)?;
                        gathered += 1;
                    }
                }
            }

            if gathered == 0 {
                return Err(Error::ErrNoHostCandidate);
            }
        }

        self.next_pacing = Some(now);
        Ok(())
    }

    fn add_host_candidate(
        &mut self,
        stream: usize,
        component_id: u16,
        endpoint: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let candidate = Candidate::new_host(component_id, endpoint, TransportProtocol::Udp);
        debug!("[{}]: new host candidate {}", self.name, candidate);
        let index = self.streams[stream].add_local_candidate(candidate)?;

        if self.stun_info.is_some() {
            let activity = StunActivity::new(
                index,
                ActivityKind::Gather,
                Retransmit::new(self.max_stun_retries, self.stun_retry_timeout, now),
            );
            self.component_mut(stream, component_id)?
                .add_stun_activity(activity);
        }
        Ok(())
    }

    pub(crate) fn component_mut(
        &mut self,
        stream: usize,
        component_id: u16,
    ) -> Result<&mut crate::component::Component> {
        let s = self
            .streams
            .get_mut(stream)
            .ok_or(Error::ErrStreamNotFound(stream))?;
        let position = s
            .component_position(component_id)
            .ok_or_else(|| Error::Other(format!("no component {component_id}")))?;
        Ok(&mut s.components[position])
    }

    /// One pacing tick: finishes gathering once no host exchange is pending,
    /// then sends the single STUN/TURN work item that waited longest.
    ///
    /// Returns the delay until the next tick, or `None` once pacing stopped.
    pub fn pacing_tick(&mut self, now: Instant) -> Option<Duration> {
        if self.terminating || self.state == SessionState::ProcessingFailed {
            self.next_pacing = None;
            return None;
        }

        if self.state == SessionState::GatheringCandidates && !self.host_gathering_pending() {
            self.on_gathering_complete();
        }

        match self.get_all_ready_stun_activities(now) {
            Ok(ready) => {
                let oldest = ready.into_iter().max_by_key(|&(s, c, a)| {
                    self.streams[s].components[c].stun_activities[a]
                        .retransmit
                        .awaiting_transmit_time(now)
                });
                if let Some(handle) = oldest {
                    self.send_stun_activity(handle, now);
                }
            }
            Err(err) => {
                self.fail_session(err);
                return None;
            }
        }

        self.next_pacing = Some(now + self.pacing_interval);
        Some(self.pacing_interval)
    }

    /// Any host candidate still waiting for its server exchange.
    pub(crate) fn host_gathering_pending(&self) -> bool {
        self.streams.iter().any(|stream| {
            stream.components.iter().any(|component| {
                component.stun_activities.iter().any(|a| {
                    a.kind == ActivityKind::Gather
                        && matches!(
                            a.retransmit.state,
                            RetransmitState::AwaitingTransmitSlot
                                | RetransmitState::AwaitingResponse
                                | RetransmitState::ReceivedAuthenticateResponse
                        )
                })
            })
        })
    }

    /// Collects every activity with something to send now. Exhausted activities
    /// are marked as such; the error returned is fatal to the session.
    pub(crate) fn get_all_ready_stun_activities(
        &mut self,
        now: Instant,
    ) -> Result<Vec<ActivityHandle>> {
        let keepalive_interval = self.stun_keepalive_interval;
        let permission_period = self.turn_permission_refresh_period;
        let warning_period = self.turn_refresh_warning_period;
        let default_lifetime = self.turn_allocation_lifetime;
        let aggressive = self.aggressive_fail_gathering;

        let mut ready = vec![];
        for (s, stream) in self.streams.iter_mut().enumerate() {
            let IceStream {
                candidates,
                components,
                ..
            } = stream;
            for (c, component) in components.iter_mut().enumerate() {
                for (a, activity) in component.stun_activities.iter_mut().enumerate() {
                    let kind = activity.kind;
                    let r = &mut activity.retransmit;
                    match kind {
                        ActivityKind::Gather => match r.state {
                            RetransmitState::AwaitingTransmitSlot
                            | RetransmitState::ReceivedAuthenticateResponse => {
                                ready.push((s, c, a))
                            }
                            RetransmitState::AwaitingResponse if r.retry_available(now) => {
                                ready.push((s, c, a))
                            }
                            RetransmitState::AwaitingResponse if r.retry_timed_out(now) => {
                                r.set_state(RetransmitState::NoResponseToAllRetries);
                                r.error = Some(Error::ErrStunServerNoResponse);
                                return Err(Error::ErrStunServerNoResponse);
                            }
                            _ => {}
                        },
                        ActivityKind::Keepalive => {
                            if r.awaiting_transmit_time(now) >= keepalive_interval {
                                ready.push((s, c, a));
                            }
                        }
                        ActivityKind::AllocationRefresh | ActivityKind::PermissionRefresh => {
                            if kind == ActivityKind::PermissionRefresh
                                && r.transaction_id.is_none()
                            {
                                continue;
                            }
                            match r.state {
                                RetransmitState::AwaitingTransmitSlot
                                | RetransmitState::ReceivedAuthenticateResponse => {
                                    ready.push((s, c, a))
                                }
                                RetransmitState::AwaitingResponse if r.retry_available(now) => {
                                    ready.push((s, c, a))
                                }
                                RetransmitState::AwaitingResponse if r.retry_timed_out(now) => {
                                    warn!(
                                        "{} of candidate {} got no response",
                                        kind, candidates[activity.candidate]
                                    );
                                    r.set_state(RetransmitState::NoResponseToAllRetries);
                                    r.error = Some(Error::ErrStunServerNoResponse);
                                    if aggressive {
                                        return Err(Error::ErrStunServerNoResponse);
                                    }
                                }
                                RetransmitState::ReceivedSuccessResponse => {
                                    let period = if kind == ActivityKind::PermissionRefresh {
                                        permission_period
                                    } else {
                                        candidates[activity.candidate]
                                            .allocation_lifetime
                                            .unwrap_or(default_lifetime)
                                    };
                                    if r.awaiting_transmit_time(now).saturating_add(warning_period)
                                        > period
                                    {
                                        ready.push((s, c, a));
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
        }
        Ok(ready)
    }

    /// Composes the request (or indication) of one activity and queues it.
    pub(crate) fn send_stun_activity(&mut self, (s, c, a): ActivityHandle, now: Instant) {
        let Some(stun) = self.stun_info.clone() else {
            return;
        };
        let relay_addr = stun.relay_info.as_ref().map(|r| r.addr());
        let allocate_allowed = self.add_relayed_candidates && relay_addr.is_some();
        let requested_lifetime = self.turn_allocation_lifetime;

        let local_addr = {
            let candidate = self.streams[s].components[c].stun_activities[a].candidate;
            self.host_socket(s, candidate)
        };

        let stream = &mut self.streams[s];
        let remote_endpoints: Vec<SocketAddr> = stream
            .remote_candidates
            .iter()
            .map(|&r| stream.candidates[r].endpoint)
            .collect();
        let IceStream {
            candidates,
            components,
            ..
        } = stream;
        let activity = &mut components[c].stun_activities[a];
        let kind = activity.kind;
        let candidate = &candidates[activity.candidate];
        let r = &mut activity.retransmit;

        let (tid, fresh) = match r.state {
            RetransmitState::AwaitingResponse => {
                (r.transaction_id.unwrap_or_else(TransactionId::new), false)
            }
            RetransmitState::AwaitingTransmitSlot if kind == ActivityKind::PermissionRefresh => {
                (r.transaction_id.unwrap_or_else(TransactionId::new), false)
            }
            RetransmitState::AwaitingTransmitSlot
            | RetransmitState::ReceivedAuthenticateResponse => (TransactionId::new(), false),
            _ => (TransactionId::new(), true),
        };

        let lifetime_secs =
            |d: Duration| StunAttribute::Lifetime(u32::try_from(d.as_secs()).unwrap_or(u32::MAX));

        let mut attributes = vec![StunAttribute::Software(SOFTWARE.to_owned())];
        let (class, method, destination) = match kind {
            ActivityKind::Gather => {
                let allocate =
                    allocate_allowed && r.error != Some(Error::ErrAllocateRejectedNoResources);
                match (allocate, relay_addr) {
                    (true, Some(relay)) => {
                        attributes.push(StunAttribute::RequestedTransport(
                            TransportProtocol::Udp.protocol_number(),
                        ));
                        attributes.push(lifetime_secs(requested_lifetime));
                        (MessageClass::Request, Method::Allocate, relay)
                    }
                    _ => (MessageClass::Request, Method::Binding, stun.addr()),
                }
            }
            ActivityKind::AllocationRefresh => {
                attributes.push(lifetime_secs(
                    candidate
                        .allocation_lifetime
                        .unwrap_or(requested_lifetime),
                ));
                (
                    MessageClass::Request,
                    Method::Refresh,
                    candidate.server.or(relay_addr).unwrap_or(stun.addr()),
                )
            }
            ActivityKind::PermissionRefresh => {
                let peers: Vec<SocketAddr> = remote_endpoints
                    .into_iter()
                    .filter(|e| e.is_ipv4() == candidate.endpoint.is_ipv4())
                    .collect();
                if peers.is_empty() {
                    trace!("no peers to permit for relayed candidate {candidate}");
                    r.received_success(now);
                    return;
                }
                attributes.extend(peers.into_iter().map(StunAttribute::XorPeerAddress));
                (
                    MessageClass::Request,
                    Method::CreatePermission,
                    candidate.server.or(relay_addr).unwrap_or(stun.addr()),
                )
            }
            ActivityKind::Keepalive => (
                MessageClass::Indication,
                Method::Binding,
                candidate.server.unwrap_or(stun.addr()),
            ),
        };

        if kind == ActivityKind::Keepalive {
            r.mark_sent(now);
        } else {
            attributes.push(StunAttribute::Username(stun.account.clone()));
            attributes.push(StunAttribute::MessageIntegrity(
                stun.password.as_bytes().to_vec(),
            ));
            if fresh {
                r.start(tid, now);
            } else {
                r.resend(tid, now);
            }
        }
        attributes.push(StunAttribute::Fingerprint);

        let message = StunMessage {
            class,
            method,
            transaction_id: tid,
            attributes,
        };
        trace!(
            "[{}]: {} for candidate {} to {}: {}",
            self.name, kind, candidate, destination, message
        );
        self.transmits.push_back(Transmit {
            now,
            transport: TransportContext {
                local_addr,
                peer_addr: destination,
                transport_protocol: TransportProtocol::Udp,
            },
            to_peer: false,
            message,
        });
    }

    pub(crate) fn find_stun_activity(&self, tid: &TransactionId) -> Option<ActivityHandle> {
        self.streams.iter().enumerate().find_map(|(s, stream)| {
            stream
                .components
                .iter()
                .enumerate()
                .find_map(|(c, component)| component.find_stun_activity(tid).map(|a| (s, c, a)))
        })
    }

    /// Applies a server's response to the activity that sent the request.
    pub(crate) fn handle_stun_activity_response(
        &mut self,
        (s, c, a): ActivityHandle,
        msg: &InboundStun,
        now: Instant,
    ) -> Result<()> {
        let (kind, candidate) = {
            let activity = &self.streams[s].components[c].stun_activities[a];
            (activity.kind, activity.candidate)
        };

        match msg.message.class {
            MessageClass::SuccessResponse => {
                self.streams[s].components[c].stun_activities[a]
                    .retransmit
                    .received_success(now);
                match kind {
                    ActivityKind::Gather if self.state == SessionState::GatheringCandidates => {
                        self.on_gather_success(
                            s,
                            candidate,
                            &msg.message,
                            msg.transport.peer_addr,
                            now,
                        )?;
                    }
                    ActivityKind::AllocationRefresh => {
                        if let Some(secs) = msg.message.lifetime() {
                            self.streams[s].candidates[candidate].allocation_lifetime =
                                Some(Duration::from_secs(u64::from(secs)));
                        }
                    }
                    _ => {}
                }
            }
            MessageClass::ErrorResponse => {
                let code = msg.message.error_code().unwrap_or_default();
                debug!(
                    "[{}]: {} got error {} from {}",
                    self.name, kind, code.0, msg.transport.peer_addr
                );
                let r = &mut self.streams[s].components[c].stun_activities[a].retransmit;
                let failure = match code {
                    CODE_UNAUTHORIZED if r.challenged => {
                        r.received_error(Error::ErrStunUnauthorized, now);
                        Some(Error::ErrStunUnauthorized)
                    }
                    CODE_UNAUTHORIZED => {
                        r.challenged = true;
                        r.set_state(RetransmitState::ReceivedAuthenticateResponse);
                        r.prematurely_age();
                        None
                    }
                    CODE_INSUFFICIENT_CAPACITY => {
                        r.error = Some(Error::ErrAllocateRejectedNoResources);
                        r.set_state(RetransmitState::AwaitingTransmitSlot);
                        r.prematurely_age();
                        None
                    }
                    CODE_ALLOC_QUOTA_REACHED => {
                        r.received_error(Error::ErrAllocationQuotaReached, now);
                        None
                    }
                    CODE_ALLOC_MISMATCH => {
                        r.received_error(Error::ErrAllocationMismatch, now);
                        None
                    }
                    _ => {
                        r.received_error(Error::ErrStunErrorResponse, now);
                        Some(Error::ErrStunErrorResponse)
                    }
                };
                if let Some(err) = failure {
                    let fatal = match kind {
                        ActivityKind::Gather => self.state == SessionState::GatheringCandidates,
                        ActivityKind::AllocationRefresh | ActivityKind::PermissionRefresh => {
                            self.aggressive_fail_gathering
                        }
                        ActivityKind::Keepalive => false,
                    };
                    if fatal {
                        error!(
                            "[{}]: {} rejected by {} with {}",
                            self.name, kind, msg.transport.peer_addr, code.0
                        );
                        self.fail_session(err);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Registers the reflexive and relayed candidates a host's gathering
    /// exchange produced.
    fn on_gather_success(
        &mut self,
        s: usize,
        host: usize,
        message: &StunMessage,
        server: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let (component_id, host_endpoint, host_base) = {
            let candidate = &self.streams[s].candidates[host];
            (candidate.component_id, candidate.endpoint, candidate.base)
        };
        let mapped = message.xor_mapped_address();

        if let Some(mapped) = mapped.filter(|m| *m != host_endpoint) {
            let candidate =
                Candidate::new_server_reflexive(component_id, mapped, host_base, server, host);
            debug!("[{}]: new server reflexive candidate {}", self.name, candidate);
            let index = self.streams[s].add_local_candidate(candidate)?;
            let keepalive = StunActivity::new(
                index,
                ActivityKind::Keepalive,
                Retransmit::new(self.max_stun_retries, self.stun_retry_timeout, now),
            );
            self.component_mut(s, component_id)?
                .add_stun_activity(keepalive);
        }

        if let Some(relayed) = message.xor_relayed_address() {
            let lifetime = message
                .lifetime()
                .map(|secs| Duration::from_secs(u64::from(secs)))
                .unwrap_or(self.turn_allocation_lifetime);
            let candidate =
                Candidate::new_relayed(component_id, relayed, mapped, server, host, lifetime);
            debug!("[{}]: new relayed candidate {}", self.name, candidate);
            let index = self.streams[s].add_local_candidate(candidate)?;

            let mut refresh = Retransmit::new(self.max_stun_retries, self.stun_retry_timeout, now);
            refresh.received_success(now);
            let permission = Retransmit::new(self.max_stun_retries, self.stun_retry_timeout, now);

            let component = self.component_mut(s, component_id)?;
            component.add_stun_activity(StunActivity::new(
                index,
                ActivityKind::AllocationRefresh,
                refresh,
            ));
            component.add_stun_activity(StunActivity::new(
                index,
                ActivityKind::PermissionRefresh,
                permission,
            ));
        }
        Ok(())
    }

    /// Finalizes local candidates once no host exchange is pending.
    pub(crate) fn on_gathering_complete(&mut self) {
        self.set_state(SessionState::CandidatesGathered);
        self.assign_foundations();
        self.assign_priorities();
        self.eliminate_redundant_candidates();
        self.choose_default_candidates();
        self.update_local_ice_candidates();
        info!(
            "[{}]: gathered {} local candidate(s)",
            self.name,
            self.local_candidates.len()
        );
        self.events.push_back(SessionEvent::CandidatesGathered);
    }

    /// Arms the permission activity of every relayed candidate a check list uses.
    pub(crate) fn set_turn_permissions(&mut self) {
        for stream in &mut self.streams {
            let IceStream {
                components,
                pairs,
                check_list,
                ..
            } = stream;
            for component in components.iter_mut() {
                for activity in component.stun_activities.iter_mut() {
                    if activity.kind != ActivityKind::PermissionRefresh
                        || activity.retransmit.transaction_id.is_some()
                    {
                        continue;
                    }
                    let paired = check_list
                        .iter()
                        .any(|&p| pairs[p].local_index == activity.candidate);
                    if paired {
                        activity.retransmit.transaction_id = Some(TransactionId::new());
                        activity
                            .retransmit
                            .set_state(RetransmitState::AwaitingTransmitSlot);
                        activity.retransmit.prematurely_age();
                    }
                }
            }
        }
    }
}
