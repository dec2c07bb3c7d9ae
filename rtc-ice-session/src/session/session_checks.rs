use log::trace;

use super::*;
use crate::stun::retransmit::{ActivityKind, Retransmit, StunActivity};
use crate::stun::*;

impl IceSession {
    /// Pairs the peer's candidates with ours, prunes every check list to its
    /// share of the pair budget and starts checking the first stream.
    pub fn form_check_lists(
        &mut self,
        remote_candidates: &[IceCandidateRecord],
        remote_ufrag: &str,
        remote_pwd: &str,
        now: Instant,
    ) -> Result<()> {
        if self.state != SessionState::CandidatesGathered {
            return Err(Error::ErrInvalidState);
        }
        if remote_ufrag.is_empty() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if remote_pwd.is_empty() {
            return Err(Error::ErrRemotePwdEmpty);
        }
        self.remote_ufrag = remote_ufrag.to_owned();
        self.remote_pwd = remote_pwd.to_owned();

        for s in 0..self.streams.len() {
            for record in remote_candidates {
                let locals: Vec<usize> = {
                    let stream = &self.streams[s];
                    let Some(position) = stream.component_position(record.component_id) else {
                        continue;
                    };
                    stream.components[position]
                        .candidates
                        .iter()
                        .copied()
                        .filter(|&c| {
                            let local = &stream.candidates[c];
                            local.endpoint.is_ipv4() == record.address.is_ipv4()
                                && local.transport_protocol == record.transport
                        })
                        .collect()
                };
                if locals.is_empty() {
                    trace!(
                        "[{}]: no local candidate for remote {}",
                        self.name,
                        record.marshal()
                    );
                    continue;
                }

                let endpoint = SocketAddr::new(record.address, record.port);
                let existing = self.streams[s].remote_candidates.iter().copied().find(|&r| {
                    let c = &self.streams[s].candidates[r];
                    c.endpoint == endpoint && c.component_id == record.component_id
                });
                let remote = match existing {
                    Some(r) => r,
                    None => self.streams[s].add_remote_candidate(Candidate::new_remote(record)),
                };

                for local in locals {
                    let config = self.pair_config(s, local, remote);
                    let p = self.streams[s].add_candidate_pair(CandidatePair::new(config, now));
                    trace!(
                        "[{}]: stream {} new pair {}",
                        self.name, s, self.streams[s].pairs[p]
                    );
                }
            }
        }

        let budget = (self.max_check_pairs / self.streams.len()).max(1);
        for stream in &mut self.streams {
            stream.sort_and_prune_candidate_pairs(budget);
        }

        if self.streams.iter().any(|s| s.check_list_empty()) {
            for stream in &mut self.streams {
                stream.clear_checks(now);
            }
            self.remote_ufrag.clear();
            self.remote_pwd.clear();
            return Err(Error::ErrEmptyCheckList);
        }

        self.set_turn_permissions();
        self.set_state(SessionState::ChecksRunning);
        self.streams[0].set_pairs_waiting();
        self.start_dispatcher(0, now);
        Ok(())
    }

    pub(crate) fn pair_config(&self, s: usize, local: usize, remote: usize) -> CandidatePairConfig {
        let stream = &self.streams[s];
        let l = &stream.candidates[local];
        let r = &stream.candidates[remote];
        let is_default = stream
            .component_position(l.component_id)
            .and_then(|position| stream.components[position].default_candidate)
            == Some(local);

        CandidatePairConfig {
            local_index: local,
            remote_index: remote,
            local_priority: l.priority,
            remote_priority: r.priority,
            component_id: l.component_id,
            local_foundation: l.foundation.clone(),
            remote_foundation: r.foundation.clone(),
            controlling: self.role.is_controlling(),
            is_default,
            tie_breaker: self.tie_breaker,
            bind_request_priority: self.assign_priority(l, CandidateType::PeerReflexive),
            use_aggressive_nomination: self.use_aggressive_nomination,
            max_check_retries: self.max_check_retries,
            check_retry_timeout: self.check_retry_timeout,
        }
    }

    /// One dispatcher tick of a stream: settles expired checks and sends the
    /// next one. A dispatcher whose `epoch` is stale must stop.
    pub fn dispatch_tick(&mut self, stream: usize, epoch: u64, now: Instant) -> DispatchResult {
        let Some(st) = self.streams.get(stream) else {
            return DispatchResult::Finished;
        };
        if st.dispatcher_epoch != epoch || st.next_dispatch.is_none() {
            return DispatchResult::Finished;
        }
        if self.terminating || self.state != SessionState::ChecksRunning || st.terminating {
            self.streams[stream].next_dispatch = None;
            return DispatchResult::Finished;
        }

        for p in self.streams[stream].expired_checks(now) {
            self.process_check_event(stream, p, CheckStatus::Timeout, now);
        }

        let st = &self.streams[stream];
        if st.dispatcher_epoch != epoch || st.next_dispatch.is_none() {
            return DispatchResult::Finished;
        }
        if self.state != SessionState::ChecksRunning || st.checks_finished(now) {
            trace!("[{}]: stream {} dispatcher idle", self.name, stream);
            self.streams[stream].next_dispatch = None;
            return DispatchResult::Finished;
        }

        let active = self
            .streams
            .iter()
            .filter(|s| s.check_list_is_active())
            .count()
            .max(1);
        let interval = self.check_pacing_interval * u32::try_from(active).unwrap_or(u32::MAX);

        if let Some(p) = self.streams[stream].get_next_check_pair(now) {
            self.send_check(stream, p, now);
        }
        self.streams[stream].next_dispatch = Some(now + interval);
        DispatchResult::Continue(interval)
    }

    fn send_check(&mut self, s: usize, p: usize, now: Instant) {
        let stream = &self.streams[s];
        let pair = &stream.pairs[p];
        let Some(tid) = pair.retry.transaction_id else {
            return;
        };
        let destination = stream.candidates[pair.remote_index].endpoint;
        let controlling = self.role.is_controlling();

        let mut message =
            StunMessage::with_transaction_id(MessageClass::Request, Method::Binding, tid);
        message.add(StunAttribute::Username(format!(
            "{}:{}",
            self.remote_ufrag, self.local_ufrag
        )));
        message.add(StunAttribute::Priority(pair.bind_request_priority));
        message.add(if controlling {
            StunAttribute::IceControlling(pair.tie_breaker)
        } else {
            StunAttribute::IceControlled(pair.tie_breaker)
        });
        if controlling && pair.use_candidate {
            message.add(StunAttribute::UseCandidate);
        }
        message.add(StunAttribute::MessageIntegrity(
            self.remote_pwd.as_bytes().to_vec(),
        ));
        message.add(StunAttribute::Fingerprint);

        let local_addr = self.host_socket(s, pair.local_index);
        trace!(
            "[{}]: check #{} on stream {} pair {}: {}",
            self.name,
            pair.retry.attempts,
            s,
            pair,
            message
        );
        self.transmits.push_back(Transmit {
            now,
            transport: TransportContext {
                local_addr,
                peer_addr: destination,
                transport_protocol: TransportProtocol::Udp,
            },
            to_peer: true,
            message,
        });
    }

    /// Routes one inbound STUN message.
    pub fn handle_inbound(&mut self, msg: InboundStun) -> Result<()> {
        if self.terminating {
            return Ok(());
        }
        let now = msg.now;
        match msg.message.class {
            MessageClass::Request if msg.message.method == Method::Binding => {
                self.handle_binding_request(&msg, now)
            }
            MessageClass::SuccessResponse | MessageClass::ErrorResponse => {
                self.handle_response(&msg, now)
            }
            _ => {
                trace!(
                    "[{}]: ignoring {} from {}",
                    self.name, msg.message, msg.transport.peer_addr
                );
                Ok(())
            }
        }
    }

    fn handle_response(&mut self, msg: &InboundStun, now: Instant) -> Result<()> {
        let tid = msg.message.transaction_id;
        if let Some(handle) = self.find_stun_activity(&tid) {
            return self.handle_stun_activity_response(handle, msg, now);
        }

        if self.state == SessionState::ChecksRunning {
            for s in 0..self.streams.len() {
                if let Some(p) = self.streams[s].match_check_list_transaction(&tid) {
                    return self.handle_check_response(s, p, msg, now);
                }
            }
        }

        warn!(
            "[{}]: no transaction {:?} for {} from {}",
            self.name, tid, msg.message, msg.transport.peer_addr
        );
        Ok(())
    }

    fn handle_check_response(
        &mut self,
        s: usize,
        p: usize,
        msg: &InboundStun,
        now: Instant,
    ) -> Result<()> {
        let (remote_endpoint, state, canceled, use_candidate) = {
            let pair = &self.streams[s].pairs[p];
            (
                self.streams[s].candidates[pair.remote_index].endpoint,
                pair.state,
                !pair.retry.matches(&msg.message.transaction_id),
                pair.use_candidate,
            )
        };

        if msg.transport.peer_addr != remote_endpoint {
            warn!(
                "[{}]: response from {} for a check sent to {}",
                self.name, msg.transport.peer_addr, remote_endpoint
            );
            self.process_check_event(s, p, CheckStatus::GenericFailure, now);
            return Ok(());
        }

        match msg.message.class {
            MessageClass::SuccessResponse => {
                if state == CandidatePairState::Succeeded
                    || (canceled && use_candidate && !self.use_aggressive_nomination)
                {
                    trace!("[{}]: stale check response on stream {}", self.name, s);
                    return Ok(());
                }
                if let Some(mapped) = msg.message.xor_mapped_address() {
                    self.discover_peer_reflexive(s, p, mapped, now)?;
                }
                self.process_check_event(s, p, CheckStatus::Succeeded, now);
            }
            MessageClass::ErrorResponse => {
                let status = if msg.message.error_code() == Some(CODE_ROLE_CONFLICT) {
                    CheckStatus::RoleConflict
                } else {
                    CheckStatus::GenericFailure
                };
                self.process_check_event(s, p, status, now);
            }
            _ => {}
        }
        Ok(())
    }

    /// Learns a local peer reflexive candidate from a check's mapped address.
    fn discover_peer_reflexive(
        &mut self,
        s: usize,
        p: usize,
        mapped: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let stream = &self.streams[s];
        let pair = &stream.pairs[p];
        let Some(position) = stream.component_position(pair.component_id) else {
            return Ok(());
        };
        if stream.components[position]
            .candidates
            .iter()
            .any(|&c| stream.candidates[c].endpoint == mapped)
        {
            return Ok(());
        }

        let local = &stream.candidates[pair.local_index];
        let host_index = match local.candidate_type {
            CandidateType::Host => Some(pair.local_index),
            _ => local.host_index,
        };
        let (base, transport_protocol, component_id, priority) = (
            local.base,
            local.transport_protocol,
            pair.component_id,
            pair.bind_request_priority,
        );

        let mut candidate = Candidate::new_peer_reflexive(
            component_id,
            mapped,
            base,
            transport_protocol,
            host_index,
        );
        candidate.priority = priority;
        candidate.foundation = self.peer_reflexive_foundation(base, transport_protocol);
        debug!("[{}]: new peer reflexive candidate {}", self.name, candidate);
        let index = self.streams[s].add_local_candidate(candidate)?;

        if self.stun_info.is_some() {
            let keepalive = StunActivity::new(
                index,
                ActivityKind::Keepalive,
                Retransmit::new(self.max_stun_retries, self.stun_retry_timeout, now),
            );
            self.component_mut(s, component_id)?
                .add_stun_activity(keepalive);
        }
        Ok(())
    }

    /// Applies the outcome of one connectivity check.
    pub(crate) fn process_check_event(
        &mut self,
        s: usize,
        p: usize,
        status: CheckStatus,
        now: Instant,
    ) {
        debug!(
            "[{}]: stream {} check {}: {}",
            self.name, s, self.streams[s].pairs[p], status
        );

        match status {
            CheckStatus::RoleConflict => {
                self.switch_role();
                self.streams[s].pairs[p].add_triggered(now);
                self.start_dispatcher(s, now);
                return;
            }
            CheckStatus::Succeeded => {
                let (component_id, foundation) = {
                    let pair = &mut self.streams[s].pairs[p];
                    pair.state = CandidatePairState::Succeeded;
                    (pair.component_id, pair.foundation.clone())
                };
                if let Some(position) = self.streams[s].component_position(component_id) {
                    self.streams[s].components[position].add_to_valid_list(p);
                }
                self.streams[s].unfreeze_matching_pairs(&foundation);
                self.update_pair_states(s, p, now);
                self.update_nomination(s, p, now);
            }
            CheckStatus::Timeout | CheckStatus::GenericFailure => {
                if self.fail_pair(s, p, now) {
                    self.start_dispatcher(s, now);
                }
            }
        }

        if self.streams[s].update_check_list_and_timer_state() {
            for other in 0..self.streams.len() {
                let o = &self.streams[other];
                if other != s
                    && !o.check_list_empty()
                    && o.check_list_is_frozen()
                    && matches!(o.state, CheckListState::Initial | CheckListState::Running)
                {
                    self.streams[other].set_pairs_waiting();
                    self.start_dispatcher(other, now);
                }
            }
        }
        self.update_ice_stream_states();
    }

    /// Marks a pair Failed. When it carried the component's nomination, the
    /// best remaining valid pair is nominated instead; returns whether one was.
    fn fail_pair(&mut self, s: usize, p: usize, now: Instant) -> bool {
        let aggressive = self.use_aggressive_nomination;
        let IceStream {
            components, pairs, ..
        } = &mut self.streams[s];

        let pair = &mut pairs[p];
        pair.state = CandidatePairState::Failed;
        let nominating = pair.use_candidate && !aggressive;
        pair.use_candidate = false;

        let Some(component) = components.iter_mut().find(|c| c.id == pair.component_id) else {
            return false;
        };
        if !nominating || !component.valid_list.contains(&p) {
            return false;
        }

        component.remove_from_valid_list(p);
        component.nominating = false;
        let best = component
            .valid_list
            .iter()
            .copied()
            .max_by_key(|&q| pairs[q].priority);
        match best {
            Some(q) => {
                pairs[q].use_candidate = true;
                pairs[q].add_triggered(now);
                component.nominating = true;
                true
            }
            None => false,
        }
    }

    fn switch_role(&mut self) {
        let role = self.role.swapped();
        info!("[{}]: role {} -> {}", self.name, self.role, role);
        self.role = role;
    }

    /// Once every component of stream `s` has a valid pair, wakes the pairs of
    /// the other streams whose foundation matches the valid list of the
    /// component pair `p` belongs to.
    fn update_pair_states(&mut self, s: usize, p: usize, now: Instant) {
        let stream = &self.streams[s];
        if !stream.components.iter().all(|c| c.has_valid_pair()) {
            return;
        }
        let Some(position) = stream.component_position(stream.pairs[p].component_id) else {
            return;
        };

        for other in 0..self.streams.len() {
            let validated = &self.streams[s];
            let o = &self.streams[other];
            if other == s
                || o.check_list_empty()
                || matches!(o.state, CheckListState::Completed | CheckListState::Failed)
            {
                continue;
            }

            let component = &validated.components[position];
            let matching = o.frozen_pairs_matching(|foundation| {
                component.foundation_matches_valid_pair(foundation, &validated.pairs)
            });
            let active = o.check_list_is_active();

            let o = &mut self.streams[other];
            if !active && matching.is_empty() {
                o.set_pairs_waiting();
            } else {
                for q in matching {
                    o.pairs[q].state = CandidatePairState::Waiting;
                }
            }
            if !active {
                self.start_dispatcher(other, now);
            }
        }
    }

    fn update_nomination(&mut self, s: usize, p: usize, now: Instant) {
        let controlling = self.role.is_controlling();
        let IceStream {
            components, pairs, ..
        } = &mut self.streams[s];
        let pair = &mut pairs[p];
        let Some(component) = components.iter_mut().find(|c| c.id == pair.component_id) else {
            return;
        };

        let mut retrigger = false;
        if controlling {
            if pair.use_candidate {
                pair.is_nominated = true;
            } else if !component.nominating {
                component.nominating = true;
                pair.use_candidate = true;
                pair.add_triggered(now);
                retrigger = true;
            }
        } else if pair.nominated_contingent {
            pair.is_nominated = true;
        }

        if pair.is_nominated {
            debug!("[{}]: stream {} nominated {}", self.name, s, pair);
        }
        if retrigger {
            self.start_dispatcher(s, now);
        }
    }

    /// Completes streams whose components are all nominated and settles the
    /// session once every stream completed or any failed.
    pub(crate) fn update_ice_stream_states(&mut self) {
        if self.state != SessionState::ChecksRunning {
            return;
        }

        for stream in &mut self.streams {
            if stream.state != CheckListState::Running {
                continue;
            }
            let nominated: Vec<(u16, Option<u64>)> = stream
                .components
                .iter()
                .map(|c| (c.id, c.lowest_nominated_priority(&stream.pairs)))
                .collect();
            for &(id, lowest) in &nominated {
                if let Some(lowest) = lowest {
                    stream.remove_wait_frozen_pairs_for_component(id);
                    stream.cease_retransmissions(id, lowest);
                }
            }
            if nominated.iter().all(|(_, lowest)| lowest.is_some()) {
                debug!("[{}]: stream {} completed", self.name, stream.index);
                stream.state = CheckListState::Completed;
                stream.set_terminate();
            }
        }

        if self
            .streams
            .iter()
            .any(|s| s.state == CheckListState::Failed)
        {
            for stream in &mut self.streams {
                if stream.state != CheckListState::Completed {
                    stream.state = CheckListState::Failed;
                    stream.set_terminate();
                }
            }
            self.fail_session(Error::ErrCheckFailed);
            return;
        }

        if !self
            .streams
            .iter()
            .all(|s| s.state == CheckListState::Completed)
        {
            return;
        }

        let mut failure = None;
        'streams: for stream in &mut self.streams {
            let IceStream {
                components, pairs, ..
            } = stream;
            for component in components.iter_mut() {
                match component.get_selected_candidate_pair(pairs) {
                    Ok(p) => component.selected_pair = Some(p),
                    Err(err) => {
                        failure = Some(err);
                        break 'streams;
                    }
                }
            }
        }
        if let Some(err) = failure {
            self.fail_session(err);
            return;
        }

        self.set_state(SessionState::ChecksSucceeded);
        if !self.success_notified {
            self.success_notified = true;
            self.events.push_back(SessionEvent::ChecksSucceeded);
        }
    }

    /// Answers a peer's connectivity check and turns it into a triggered check.
    fn handle_binding_request(&mut self, msg: &InboundStun, now: Instant) -> Result<()> {
        if matches!(
            self.state,
            SessionState::GatheringCandidates | SessionState::ProcessingFailed
        ) {
            warn!(
                "[{}]: dropping check from {} in state {}",
                self.name, msg.transport.peer_addr, self.state
            );
            return Ok(());
        }

        let prefix = format!("{}:", self.local_ufrag);
        if !msg
            .message
            .username()
            .is_some_and(|username| username.starts_with(&prefix))
        {
            warn!(
                "[{}]: dropping check from {} with unexpected username",
                self.name, msg.transport.peer_addr
            );
            return Ok(());
        }

        if let Some((peer_controlling, peer_tie_breaker)) = msg.message.ice_role() {
            let ours_wins = self.tie_breaker >= peer_tie_breaker;
            match (self.role.is_controlling(), peer_controlling) {
                (true, true) if ours_wins => {
                    self.send_role_conflict(msg, now);
                    return Ok(());
                }
                (false, false) if !ours_wins => {
                    self.send_role_conflict(msg, now);
                    return Ok(());
                }
                (true, true) | (false, false) => self.switch_role(),
                _ => {}
            }
        }

        self.send_binding_success(msg, now);

        if self.state != SessionState::ChecksRunning {
            return Ok(());
        }

        let Some((s, local)) = self.find_host_candidate(msg.transport.local_addr) else {
            warn!(
                "[{}]: check received on unknown socket {}",
                self.name, msg.transport.local_addr
            );
            return Ok(());
        };
        if matches!(
            self.streams[s].state,
            CheckListState::Completed | CheckListState::Failed
        ) {
            return Ok(());
        }

        let source = msg.transport.peer_addr;
        let (local_endpoint, component_id) = {
            let c = &self.streams[s].candidates[local];
            (c.endpoint, c.component_id)
        };

        let remote = match self.streams[s].match_remote_candidate(source) {
            Some(r) => r,
            None => {
                let record = IceCandidateRecord {
                    candidate_type: CandidateType::PeerReflexive,
                    foundation: source.to_string(),
                    component_id,
                    transport: msg.transport.transport_protocol,
                    priority: msg.message.priority().unwrap_or_default(),
                    address: source.ip(),
                    port: source.port(),
                    raddress: None,
                    rport: None,
                };
                let candidate = Candidate::new_remote(&record);
                debug!(
                    "[{}]: new remote peer reflexive candidate {}",
                    self.name, candidate
                );
                self.streams[s].add_remote_candidate(candidate)
            }
        };

        let p = match self.streams[s].match_check_list_endpoint(local_endpoint, source) {
            Some(p) => p,
            None => {
                let config = self.pair_config(s, local, remote);
                self.streams[s].add_candidate_pair(CandidatePair::new(config, now))
            }
        };

        let controlled = !self.role.is_controlling();
        let IceStream {
            components, pairs, ..
        } = &mut self.streams[s];
        let pair = &mut pairs[p];
        if pair.state != CandidatePairState::Succeeded {
            pair.add_triggered(now);
        }
        if controlled && msg.message.has_use_candidate() {
            if pair.state == CandidatePairState::Succeeded {
                pair.is_nominated = true;
                if let Some(component) = components.iter_mut().find(|c| c.id == component_id) {
                    component.add_to_valid_list(p);
                }
            } else {
                pair.nominated_contingent = true;
            }
        }

        self.start_dispatcher(s, now);
        self.update_ice_stream_states();
        Ok(())
    }

    /// The stream and index of the host candidate bound at `endpoint`.
    fn find_host_candidate(&self, endpoint: SocketAddr) -> Option<(usize, usize)> {
        self.local_candidate_handles().into_iter().find(|&(s, c)| {
            let candidate = &self.streams[s].candidates[c];
            candidate.candidate_type == CandidateType::Host && candidate.endpoint == endpoint
        })
    }

    fn send_binding_success(&mut self, msg: &InboundStun, now: Instant) {
        let mut message = StunMessage::with_transaction_id(
            MessageClass::SuccessResponse,
            Method::Binding,
            msg.message.transaction_id,
        );
        message.add(StunAttribute::XorMappedAddress(msg.transport.peer_addr));
        message.add(StunAttribute::MessageIntegrity(
            self.local_pwd.as_bytes().to_vec(),
        ));
        message.add(StunAttribute::Fingerprint);
        self.transmits.push_back(Transmit {
            now,
            transport: msg.transport,
            to_peer: true,
            message,
        });
    }

    fn send_role_conflict(&mut self, msg: &InboundStun, now: Instant) {
        debug!(
            "[{}]: role conflict with {}, keeping role {}",
            self.name, msg.transport.peer_addr, self.role
        );
        let mut message = StunMessage::with_transaction_id(
            MessageClass::ErrorResponse,
            Method::Binding,
            msg.message.transaction_id,
        );
        message.add(StunAttribute::ErrorCode {
            code: CODE_ROLE_CONFLICT.0,
            reason: "Role Conflict".to_owned(),
        });
        message.add(StunAttribute::MessageIntegrity(
            self.local_pwd.as_bytes().to_vec(),
        ));
        message.add(StunAttribute::Fingerprint);
        self.transmits.push_back(Transmit {
            now,
            transport: msg.transport,
            to_peer: true,
            message,
        });
    }

    /// Stops every dispatcher and discards check lists and remote candidates so
    /// that [`form_check_lists`](Self::form_check_lists) can run again.
    pub fn cancel_checks(&mut self, now: Instant) -> Result<()> {
        if self.state != SessionState::ChecksRunning {
            return Err(Error::ErrInvalidState);
        }
        for stream in &mut self.streams {
            stream.clear_checks(now);
        }
        self.remote_ufrag.clear();
        self.remote_pwd.clear();
        self.dispatcher_requests.clear();
        self.set_state(SessionState::CandidatesGathered);
        Ok(())
    }
}
