use super::*;

#[test]
fn test_session_state_string() {
    let tests = vec![
        (SessionState::GatheringCandidates, "GatheringCandidates"),
        (SessionState::CandidatesGathered, "CandidatesGathered"),
        (SessionState::ChecksRunning, "ChecksRunning"),
        (SessionState::ChecksSucceeded, "ChecksSucceeded"),
        (SessionState::ProcessingFailed, "ProcessingFailed"),
    ];

    for (state, expected_string) in tests {
        assert_eq!(
            state.to_string(),
            expected_string,
            "testCase: {expected_string} vs {state}",
        )
    }
}

#[test]
fn test_check_list_state_string() {
    let tests = vec![
        (CheckListState::Initial, "Initial"),
        (CheckListState::Running, "Running"),
        (CheckListState::Completed, "Completed"),
        (CheckListState::Failed, "Failed"),
    ];

    for (state, expected_string) in tests {
        assert_eq!(state.to_string(), expected_string)
    }
}

#[test]
fn test_role_swap() {
    assert_eq!(IceRole::Controlling.swapped(), IceRole::Controlled);
    assert_eq!(IceRole::Controlled.swapped(), IceRole::Controlling);
    assert!(IceRole::Controlling.is_controlling());
}
