use super::candidate_pair::*;
use super::*;
use std::time::{Duration, Instant};

pub(crate) const HOST_PRIORITY: u32 = 2130706431;
pub(crate) const PRFLX_PRIORITY: u32 = 1862270975;
pub(crate) const SRFLX_PRIORITY: u32 = 1694498815;
pub(crate) const RELAY_PRIORITY: u32 = 16777215;

pub(crate) fn pair_config(
    local_index: usize,
    remote_index: usize,
    local_priority: u32,
    remote_priority: u32,
    controlling: bool,
) -> CandidatePairConfig {
    CandidatePairConfig {
        local_index,
        remote_index,
        local_priority,
        remote_priority,
        component_id: COMPONENT_ID_RTP,
        local_foundation: "1".to_owned(),
        remote_foundation: "a".to_owned(),
        controlling,
        is_default: false,
        tie_breaker: 0x1122_3344_5566_7788,
        bind_request_priority: PRFLX_PRIORITY,
        use_aggressive_nomination: false,
        max_check_retries: 3,
        check_retry_timeout: Duration::from_millis(500),
    }
}

#[test]
fn test_candidate_priority_by_type() {
    let tests = vec![
        (CandidateType::Host, HOST_PRIORITY),
        (CandidateType::PeerReflexive, PRFLX_PRIORITY),
        (CandidateType::ServerReflexive, SRFLX_PRIORITY),
        (CandidateType::Relay, RELAY_PRIORITY),
    ];

    for (candidate_type, expected) in tests {
        assert_eq!(
            compute_priority(candidate_type.preference(), 65535, COMPONENT_ID_RTP),
            expected,
            "priority for {candidate_type}"
        );
    }
}

#[test]
fn test_candidate_pair_priority() {
    let now = Instant::now();
    let tests = vec![
        (
            pair_config(0, 0, HOST_PRIORITY, HOST_PRIORITY, false),
            9151314442783293438,
        ),
        (
            pair_config(0, 0, HOST_PRIORITY, HOST_PRIORITY, true),
            9151314442783293438,
        ),
        (
            pair_config(0, 1, HOST_PRIORITY, PRFLX_PRIORITY, true),
            7998392938176446463,
        ),
        (
            pair_config(0, 1, HOST_PRIORITY, PRFLX_PRIORITY, false),
            7998392938176446462,
        ),
        (
            pair_config(0, 2, HOST_PRIORITY, SRFLX_PRIORITY, true),
            7277816997797167103,
        ),
        (
            pair_config(0, 3, HOST_PRIORITY, RELAY_PRIORITY, true),
            72057594004373503,
        ),
        (
            pair_config(0, 3, HOST_PRIORITY, RELAY_PRIORITY, false),
            72057594004373502,
        ),
    ];

    for (config, want) in tests {
        let pair = CandidatePair::new(config, now);
        let got = pair.priority();
        assert_eq!(
            got, want,
            "CandidatePair({pair}).Priority() = {got}, want {want}"
        );
    }
}

#[test]
fn test_candidate_pair_priority_is_fixed() {
    let now = Instant::now();
    let mut pair = CandidatePair::new(pair_config(0, 1, HOST_PRIORITY, 100, true), now);
    let before = pair.priority();
    assert_eq!(before, 433758142463);

    pair.add_triggered(now);
    pair.increment_retry_attempt(now);
    pair.state = CandidatePairState::Succeeded;
    assert_eq!(pair.priority(), before);
    assert_eq!(pair.foundation(), "1:a");
}

#[test]
fn test_candidate_pair_equality() {
    let now = Instant::now();
    let pair_a = CandidatePair::new(pair_config(0, 1, HOST_PRIORITY, SRFLX_PRIORITY, true), now);
    let pair_b = CandidatePair::new(pair_config(0, 1, HOST_PRIORITY, SRFLX_PRIORITY, false), now);
    let pair_c = CandidatePair::new(pair_config(0, 2, HOST_PRIORITY, SRFLX_PRIORITY, true), now);

    assert_eq!(pair_a, pair_b, "Expected {pair_a} to equal {pair_b}");
    assert_ne!(pair_a, pair_c);
}

#[test]
fn test_candidate_pair_check_retries() {
    let start = Instant::now();
    let timeout = Duration::from_millis(500);
    let mut pair = CandidatePair::new(pair_config(0, 1, HOST_PRIORITY, 100, true), start);
    pair.state = CandidatePairState::Waiting;
    assert!(pair.is_ready(start));

    let tid = pair.increment_retry_attempt(start);
    assert_eq!(pair.state(), CandidatePairState::InProgress);
    assert!(!pair.is_ready(start));
    assert!(pair.is_ready(start + timeout), "retry due after timeout");

    let retry_tid = pair.increment_retry_attempt(start + timeout);
    assert_eq!(tid, retry_tid, "retransmissions reuse the transaction id");
    pair.increment_retry_attempt(start + timeout * 2);
    assert_eq!(pair.retry().attempts(), 3);
    assert!(!pair.is_ready(start + timeout * 3));
    assert!(pair.retries_exhausted(start + timeout * 3));
}

#[test]
fn test_candidate_pair_triggered_cancels_transaction() {
    let now = Instant::now();
    let mut pair = CandidatePair::new(pair_config(0, 1, HOST_PRIORITY, 100, true), now);
    pair.state = CandidatePairState::Waiting;
    let tid = pair.increment_retry_attempt(now);

    pair.add_triggered(now);
    assert!(pair.is_triggered());
    assert_eq!(pair.state(), CandidatePairState::Waiting);
    assert!(pair.matches_transaction(&tid), "canceled tid still matches");

    let next = pair.increment_retry_attempt(now);
    assert_ne!(tid, next);
    assert_eq!(pair.retry().attempts(), 1);
}

#[test]
fn test_candidate_pair_queue_order() {
    let start = Instant::now();
    let mut older = CandidatePair::new(pair_config(0, 1, SRFLX_PRIORITY, 100, true), start);
    let mut newer = CandidatePair::new(pair_config(0, 2, HOST_PRIORITY, 100, true), start);
    older.add_triggered(start);
    newer.add_triggered(start + Duration::from_millis(10));

    assert_eq!(older.compare_by_queued_time(&newer), std::cmp::Ordering::Less);

    let mut high = CandidatePair::new(pair_config(0, 2, HOST_PRIORITY, 100, true), start);
    let mut low = CandidatePair::new(pair_config(0, 1, SRFLX_PRIORITY, 100, true), start);
    high.add_triggered(start);
    low.add_triggered(start);
    assert_eq!(
        high.compare_by_queued_time(&low),
        std::cmp::Ordering::Less,
        "equal queue time prefers higher priority"
    );
}
