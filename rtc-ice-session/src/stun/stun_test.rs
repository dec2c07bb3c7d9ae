use super::retransmit::*;
use super::*;
use std::time::{Duration, Instant};

#[test]
fn test_transaction_id_is_random() {
    let a = TransactionId::new();
    let b = TransactionId::new();
    assert_ne!(a, b, "two transaction ids collided");
    assert_eq!(a.0.len(), TRANSACTION_ID_SIZE);
}

#[test]
fn test_message_attribute_lookup() {
    let mapped: SocketAddr = "203.0.113.7:40000".parse().unwrap();
    let mut m = StunMessage::new(MessageClass::SuccessResponse, Method::Binding);
    m.add(StunAttribute::XorMappedAddress(mapped));
    m.add(StunAttribute::Lifetime(600));
    m.add(StunAttribute::IceControlled(42));
    m.add(StunAttribute::UseCandidate);

    assert_eq!(m.xor_mapped_address(), Some(mapped));
    assert_eq!(m.xor_relayed_address(), None);
    assert_eq!(m.lifetime(), Some(600));
    assert_eq!(m.ice_role(), Some((false, 42)));
    assert!(m.has_use_candidate());
    assert!(m.error_code().is_none());
}

#[test]
fn test_retransmit_retry_budget() {
    let start = Instant::now();
    let timeout = Duration::from_millis(500);
    let mut r = Retransmit::new(2, timeout, start);

    assert_eq!(r.state(), RetransmitState::AwaitingTransmitSlot);
    assert!(!r.retry_timed_out(start));

    let tid = TransactionId::new();
    r.resend(tid, start);
    assert_eq!(r.attempts(), 1);
    assert!(r.matches(&tid));
    assert!(!r.retry_timed_out(start + Duration::from_millis(499)));
    assert!(r.retry_available(start + timeout));

    r.resend(tid, start + timeout);
    assert_eq!(r.attempts(), 2);
    assert!(r.retry_timed_out(start + timeout * 2));
    assert!(
        !r.retry_available(start + timeout * 2),
        "retry budget should be exhausted"
    );
}

#[test]
fn test_retransmit_aging() {
    let start = Instant::now();
    let mut r = Retransmit::new(7, Duration::from_secs(1), start);
    assert_eq!(
        r.awaiting_transmit_time(start + Duration::from_secs(3)),
        Duration::from_secs(3)
    );

    r.prematurely_age();
    assert_eq!(r.awaiting_transmit_time(start), Duration::MAX);

    r.start(TransactionId::new(), start);
    assert_eq!(r.attempts(), 1);
    r.received_success(start + Duration::from_secs(1));
    assert_eq!(r.state(), RetransmitState::ReceivedSuccessResponse);
    assert_eq!(
        r.awaiting_transmit_time(start + Duration::from_secs(2)),
        Duration::from_secs(1)
    );
}
