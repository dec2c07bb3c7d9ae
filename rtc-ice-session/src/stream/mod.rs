
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::candidate::candidate_pair::{CandidatePair, CandidatePairState};
use crate::candidate::{Candidate, CandidateType};
use crate::component::Component;
use crate::error::{Error, Result};
use crate::state::CheckListState;
use crate::stun::TransactionId;

/// A media stream: its components, the candidate and pair arenas they index
/// into, and the check list driving connectivity checks.
#[derive(Debug, Clone, Default)]
pub struct IceStream {
    pub(crate) index: usize,
    pub(crate) candidates: Vec<Candidate>,
    pub(crate) components: Vec<Component>,
    pub(crate) remote_candidates: Vec<usize>,
    pub(crate) pairs: Vec<CandidatePair>,
    /// Pair indices, sorted by descending pair priority.
    pub(crate) check_list: Vec<usize>,
    pub(crate) state: CheckListState,
    pub(crate) terminating: bool,
    /// When the dispatcher should next pick a pair; `None` while it is stopped.
    pub(crate) next_dispatch: Option<Instant>,
    /// Bumped every time a new dispatcher is needed; a dispatcher holding an
    /// older value stops.
    pub(crate) dispatcher_epoch: u64,
}

impl IceStream {
    pub fn new(index: usize) -> Self {
        IceStream {
            index,
            ..Default::default()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> CheckListState {
        self.state
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn candidate(&self, index: usize) -> &Candidate {
        &self.candidates[index]
    }

    pub fn pair(&self, index: usize) -> &CandidatePair {
        &self.pairs[index]
    }

    pub fn check_list(&self) -> &[usize] {
        &self.check_list
    }

    pub fn remote_candidates(&self) -> &[usize] {
        &self.remote_candidates
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub(crate) fn add_component(&mut self, id: u16) -> usize {
        self.components.push(Component::new(id));
        self.components.len() - 1
    }

    pub(crate) fn component_position(&self, id: u16) -> Option<usize> {
        self.components.iter().position(|c| c.id == id)
    }

    /// Adds a local candidate to the arena and to its component.
    pub(crate) fn add_local_candidate(&mut self, candidate: Candidate) -> Result<usize> {
        let position = self
            .component_position(candidate.component_id)
            .ok_or_else(|| {
                Error::Other(format!(
                    "stream {} has no component {}",
                    self.index, candidate.component_id
                ))
            })?;
        self.candidates.push(candidate);
        let index = self.candidates.len() - 1;
        self.components[position].add_candidate(index);
        Ok(index)
    }

    pub(crate) fn add_remote_candidate(&mut self, candidate: Candidate) -> usize {
        self.candidates.push(candidate);
        let index = self.candidates.len() - 1;
        self.remote_candidates.push(index);
        index
    }

    pub(crate) fn add_candidate_pair(&mut self, pair: CandidatePair) -> usize {
        self.pairs.push(pair);
        let index = self.pairs.len() - 1;
        self.check_list.push(index);
        self.sort_check_list();
        index
    }

    fn sort_check_list(&mut self) {
        let pairs = &self.pairs;
        self.check_list
            .sort_by(|&a, &b| pairs[b].priority.cmp(&pairs[a].priority));
    }

    pub fn check_list_empty(&self) -> bool {
        self.check_list.is_empty()
    }

    /// The address a local candidate is known by when looking for redundant pairs.
    fn prune_key(&self, pair: &CandidatePair) -> (SocketAddr, SocketAddr) {
        let local = &self.candidates[pair.local_index];
        let local_addr = if local.candidate_type == CandidateType::ServerReflexive {
            local.base
        } else {
            local.endpoint
        };
        (local_addr, self.candidates[pair.remote_index].endpoint)
    }

    /// Sorts the check list by descending priority, drops pairs redundant with a
    /// higher priority one, and keeps at most `max_pairs`.
    pub(crate) fn sort_and_prune_candidate_pairs(&mut self, max_pairs: usize) {
        self.sort_check_list();

        let mut kept: Vec<usize> = Vec::with_capacity(self.check_list.len());
        let mut seen: Vec<(SocketAddr, SocketAddr)> = vec![];
        for &p in &self.check_list {
            let key = self.prune_key(&self.pairs[p]);
            if seen.contains(&key) {
                log::trace!(
                    "[stream {}]: pruned redundant pair {}",
                    self.index,
                    self.pairs[p]
                );
                continue;
            }
            seen.push(key);
            kept.push(p);
        }
        kept.truncate(max_pairs);
        self.check_list = kept;
    }

    /// For every foundation, moves the pair with the lowest component id
    /// (then highest priority) from Frozen to Waiting. Pairs already in
    /// progress count, so their foundation gets nothing new.
    pub(crate) fn set_pairs_waiting(&mut self) {
        let mut best: BTreeMap<&str, usize> = BTreeMap::new();
        for &p in &self.check_list {
            let pair = &self.pairs[p];
            if !matches!(
                pair.state,
                CandidatePairState::Frozen
                    | CandidatePairState::Waiting
                    | CandidatePairState::InProgress
            ) {
                continue;
            }
            match best.get(pair.foundation.as_str()) {
                Some(&current) => {
                    let cur = &self.pairs[current];
                    if pair.component_id < cur.component_id
                        || (pair.component_id == cur.component_id && pair.priority > cur.priority)
                    {
                        best.insert(pair.foundation.as_str(), p);
                    }
                }
                None => {
                    best.insert(pair.foundation.as_str(), p);
                }
            }
        }

        let chosen: Vec<usize> = best.into_values().collect();
        for p in chosen {
            if self.pairs[p].state == CandidatePairState::Frozen {
                self.pairs[p].state = CandidatePairState::Waiting;
            }
        }
    }

    /// Marks the check list Running. Returns the epoch of a dispatcher that has
    /// to be spawned, or `None` when one is already running.
    pub(crate) fn start_check_list_dispatcher(&mut self, now: Instant) -> Option<u64> {
        self.state = CheckListState::Running;
        self.terminating = false;
        if self.next_dispatch.is_some() {
            return None;
        }
        self.next_dispatch = Some(now);
        self.dispatcher_epoch += 1;
        Some(self.dispatcher_epoch)
    }

    pub(crate) fn set_terminate(&mut self) {
        self.terminating = true;
        self.next_dispatch = None;
    }

    pub fn dispatcher_active(&self) -> bool {
        !self.terminating && self.next_dispatch.is_some()
    }

    /// Picks the pair to check next and marks it InProgress.
    ///
    /// Triggered pairs come first, then ordinary Waiting pairs or pairs with a
    /// retry due, each oldest-queued first. Only when nothing is Waiting or
    /// InProgress is the highest priority Frozen pair unfrozen.
    pub(crate) fn get_next_check_pair(&mut self, now: Instant) -> Option<usize> {
        let ready = |triggered: bool| -> Option<usize> {
            self.check_list
                .iter()
                .copied()
                .filter(|&p| self.pairs[p].is_triggered == triggered && self.pairs[p].is_ready(now))
                .min_by(|&a, &b| self.pairs[a].compare_by_queued_time(&self.pairs[b]))
        };

        let chosen = ready(true).or_else(|| ready(false)).or_else(|| {
            let no_waiting_pairs = self.check_list.iter().all(|&p| {
                !matches!(
                    self.pairs[p].state,
                    CandidatePairState::Waiting | CandidatePairState::InProgress
                )
            });
            if no_waiting_pairs {
                self.check_list
                    .iter()
                    .copied()
                    .find(|&p| self.pairs[p].state == CandidatePairState::Frozen)
            } else {
                None
            }
        })?;

        self.pairs[chosen].increment_retry_attempt(now);
        Some(chosen)
    }

    /// True once no pair has work left, or the check list already failed.
    pub(crate) fn checks_finished(&self, now: Instant) -> bool {
        if self.state == CheckListState::Failed {
            return true;
        }
        self.check_list.iter().all(|&p| {
            let pair = &self.pairs[p];
            pair.state.is_terminal() || pair.retries_exhausted(now)
        })
    }

    /// InProgress pairs whose final retry went unanswered.
    pub(crate) fn expired_checks(&self, now: Instant) -> Vec<usize> {
        self.check_list
            .iter()
            .copied()
            .filter(|&p| self.pairs[p].retries_exhausted(now))
            .collect()
    }

    pub(crate) fn unfreeze_matching_pairs(&mut self, foundation: &str) {
        for &p in &self.check_list {
            let pair = &mut self.pairs[p];
            if pair.state == CandidatePairState::Frozen && pair.foundation == foundation {
                pair.state = CandidatePairState::Waiting;
            }
        }
    }

    /// Frozen pairs whose foundation satisfies `matches`.
    pub(crate) fn frozen_pairs_matching(&self, matches: impl Fn(&str) -> bool) -> Vec<usize> {
        self.check_list
            .iter()
            .copied()
            .filter(|&p| {
                self.pairs[p].state == CandidatePairState::Frozen && matches(&self.pairs[p].foundation)
            })
            .collect()
    }

    /// At least one check is in flight.
    pub fn check_list_is_active(&self) -> bool {
        self.check_list
            .iter()
            .any(|&p| self.pairs[p].state == CandidatePairState::InProgress)
    }

    /// Every pair is Frozen.
    pub fn check_list_is_frozen(&self) -> bool {
        self.check_list
            .iter()
            .all(|&p| self.pairs[p].state == CandidatePairState::Frozen)
    }

    pub(crate) fn all_pairs_terminal(&self) -> bool {
        self.check_list
            .iter()
            .all(|&p| self.pairs[p].state.is_terminal())
    }

    pub(crate) fn remove_wait_frozen_pairs_for_component(&mut self, component_id: u16) {
        let pairs = &self.pairs;
        self.check_list.retain(|&p| {
            !(pairs[p].component_id == component_id
                && matches!(
                    pairs[p].state,
                    CandidatePairState::Frozen | CandidatePairState::Waiting
                ))
        });
    }

    /// Stops checks in flight whose priority is below `lowest_priority`.
    pub(crate) fn cease_retransmissions(&mut self, component_id: u16, lowest_priority: u64) {
        let pairs = &self.pairs;
        self.check_list.retain(|&p| {
            !(pairs[p].component_id == component_id
                && pairs[p].state == CandidatePairState::InProgress
                && pairs[p].priority < lowest_priority)
        });
    }

    /// When every pair is terminal, fails the check list if some component
    /// ended up without a valid pair. Returns whether every pair is terminal.
    pub(crate) fn update_check_list_and_timer_state(&mut self) -> bool {
        if !self.all_pairs_terminal() {
            return false;
        }

        if self.components.iter().any(|c| !c.has_valid_pair()) {
            log::debug!(
                "[stream {}]: all checks done, a component has no valid pair",
                self.index
            );
            self.state = CheckListState::Failed;
        }
        true
    }

    pub(crate) fn match_check_list_transaction(&self, tid: &TransactionId) -> Option<usize> {
        self.check_list
            .iter()
            .copied()
            .find(|&p| self.pairs[p].matches_transaction(tid))
    }

    pub(crate) fn match_check_list_endpoint(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Option<usize> {
        self.check_list.iter().copied().find(|&p| {
            let pair = &self.pairs[p];
            self.candidates[pair.local_index].endpoint == local
                && self.candidates[pair.remote_index].endpoint == remote
        })
    }

    pub(crate) fn match_remote_candidate(&self, endpoint: SocketAddr) -> Option<usize> {
        self.remote_candidates
            .iter()
            .copied()
            .find(|&r| self.candidates[r].endpoint == endpoint)
    }

    /// Throws away everything check-list formation produced, including the
    /// remote candidates, and compacts the candidate arena around the local
    /// ones.
    pub(crate) fn clear_checks(&mut self, now: Instant) {
        self.set_terminate();
        self.check_list.clear();
        self.pairs.clear();

        let mut remap = vec![None; self.candidates.len()];
        let mut kept = Vec::with_capacity(self.candidates.len() - self.remote_candidates.len());
        for (index, candidate) in std::mem::take(&mut self.candidates).into_iter().enumerate() {
            if !self.remote_candidates.contains(&index) {
                remap[index] = Some(kept.len());
                kept.push(candidate);
            }
        }
        for candidate in &mut kept {
            candidate.host_index = candidate.host_index.and_then(|h| remap[h]);
        }
        self.candidates = kept;
        self.remote_candidates.clear();
        for component in &mut self.components {
            component.remap_candidates(&remap);
        }

        self.state = CheckListState::Initial;
        for component in &mut self.components {
            component.clear_checks(now);
        }
    }
}
