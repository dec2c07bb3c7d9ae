#[cfg(test)]
mod state_test;

use std::fmt;

/// Overall progress of an ICE session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Host candidates exist; STUN/TURN exchanges for reflexive and relayed candidates are pending.
    #[default]
    GatheringCandidates,

    /// Local candidates are final and may be handed to the signaling channel.
    CandidatesGathered,

    /// Check lists are formed and connectivity checks are in flight.
    ChecksRunning,

    /// Every stream has a nominated pair per component.
    ChecksSucceeded,

    /// Gathering or checking failed; see the session error code.
    ProcessingFailed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::GatheringCandidates => "GatheringCandidates",
            Self::CandidatesGathered => "CandidatesGathered",
            Self::ChecksRunning => "ChecksRunning",
            Self::ChecksSucceeded => "ChecksSucceeded",
            Self::ProcessingFailed => "ProcessingFailed",
        };
        write!(f, "{s}")
    }
}

/// Aggregate state of one stream's check list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CheckListState {
    #[default]
    Initial,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for CheckListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Initial => "Initial",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// The ICE role this agent plays towards its peer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IceRole {
    #[default]
    Controlled,
    Controlling,
}

impl IceRole {
    pub fn is_controlling(self) -> bool {
        self == Self::Controlling
    }

    pub fn swapped(self) -> Self {
        match self {
            Self::Controlled => Self::Controlling,
            Self::Controlling => Self::Controlled,
        }
    }
}

impl fmt::Display for IceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Controlled => "controlled",
            Self::Controlling => "controlling",
        };
        write!(f, "{s}")
    }
}
