
use std::time::Instant;

use crate::candidate::Candidate;
use crate::candidate::candidate_pair::CandidatePair;
use crate::error::{Error, Result};
use crate::stun::TransactionId;
use crate::stun::retransmit::{ActivityKind, StunActivity};

/// One logical sub-channel of a stream (e.g. RTP).
///
/// Candidates and pairs are owned by the stream; a component refers to them
/// by their arena index.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub(crate) id: u16,
    pub(crate) candidates: Vec<usize>,
    pub(crate) valid_list: Vec<usize>,
    pub(crate) default_candidate: Option<usize>,
    pub(crate) selected_pair: Option<usize>,
    pub(crate) stun_activities: Vec<StunActivity>,
    /// A nominating check has been queued (regular nomination).
    pub(crate) nominating: bool,
}

impl Component {
    pub fn new(id: u16) -> Self {
        Component {
            id,
            ..Default::default()
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }

    pub fn valid_list(&self) -> &[usize] {
        &self.valid_list
    }

    pub fn default_candidate(&self) -> Option<usize> {
        self.default_candidate
    }

    pub fn selected_pair(&self) -> Option<usize> {
        self.selected_pair
    }

    pub fn stun_activities(&self) -> &[StunActivity] {
        &self.stun_activities
    }

    pub(crate) fn add_candidate(&mut self, index: usize) {
        if !self.candidates.contains(&index) {
            self.candidates.push(index);
        }
    }

    /// Drops a candidate together with any STUN work scheduled for it.
    pub(crate) fn remove_candidate(&mut self, index: usize) {
        self.candidates.retain(|&c| c != index);
        self.stun_activities.retain(|a| a.candidate != index);
        if self.default_candidate == Some(index) {
            self.default_candidate = None;
        }
    }

    /// Rewrites candidate indices after the stream compacted its arena;
    /// `remap[old]` is the new index, or `None` if the candidate is gone.
    pub(crate) fn remap_candidates(&mut self, remap: &[Option<usize>]) {
        self.candidates = self.candidates.iter().filter_map(|&c| remap[c]).collect();
        self.default_candidate = self.default_candidate.and_then(|c| remap[c]);
        self.stun_activities.retain_mut(|activity| match remap[activity.candidate] {
            Some(index) => {
                activity.candidate = index;
                true
            }
            None => false,
        });
    }

    pub(crate) fn add_stun_activity(&mut self, activity: StunActivity) {
        self.stun_activities.push(activity);
    }

    pub(crate) fn find_stun_activity(&self, tid: &TransactionId) -> Option<usize> {
        self.stun_activities
            .iter()
            .position(|a| a.retransmit.matches(tid))
    }

    /// Keeps the highest default-ranked candidate seen so far; the first one wins ties.
    pub(crate) fn assign_default_candidate(&mut self, index: usize, arena: &[Candidate]) {
        let replace = match self.default_candidate {
            None => true,
            Some(current) => {
                arena[index].candidate_type.rank()
                    > arena[current].candidate_type.rank()
            }
        };
        if replace {
            self.default_candidate = Some(index);
        }
    }

    pub(crate) fn add_to_valid_list(&mut self, pair: usize) {
        if !self.valid_list.contains(&pair) {
            self.valid_list.push(pair);
        }
    }

    pub(crate) fn remove_from_valid_list(&mut self, pair: usize) {
        self.valid_list.retain(|&p| p != pair);
    }

    pub fn has_valid_pair(&self) -> bool {
        !self.valid_list.is_empty()
    }

    pub(crate) fn foundation_matches_valid_pair(
        &self,
        foundation: &str,
        pairs: &[CandidatePair],
    ) -> bool {
        self.valid_list
            .iter()
            .any(|&p| pairs[p].foundation == foundation)
    }

    /// Lowest priority among the nominated pairs of the valid list.
    pub(crate) fn lowest_nominated_priority(&self, pairs: &[CandidatePair]) -> Option<u64> {
        self.valid_list
            .iter()
            .filter(|&&p| pairs[p].is_nominated)
            .map(|&p| pairs[p].priority)
            .min()
    }

    /// The highest priority nominated pair of the valid list.
    pub fn get_selected_candidate_pair(&self, pairs: &[CandidatePair]) -> Result<usize> {
        self.valid_list
            .iter()
            .copied()
            .filter(|&p| pairs[p].is_nominated)
            .max_by_key(|&p| pairs[p].priority)
            .ok_or(Error::ErrNoSelectedPair)
    }

    /// Resets everything check-list formation produced.
    pub(crate) fn clear_checks(&mut self, now: Instant) {
        self.valid_list.clear();
        self.selected_pair = None;
        self.nominating = false;
        for activity in &mut self.stun_activities {
            if activity.kind == ActivityKind::PermissionRefresh {
                activity.retransmit.transaction_id = None;
                activity.retransmit.set_state(Default::default());
                activity.retransmit.queued_at = Some(now);
            }
        }
    }
}
