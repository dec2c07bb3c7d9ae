use super::*;
use std::time::Duration;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[test]
fn test_candidate_type_round_trip() -> Result<()> {
    let tests = vec![
        (CandidateType::Host, "host"),
        (CandidateType::ServerReflexive, "srflx"),
        (CandidateType::PeerReflexive, "prflx"),
        (CandidateType::Relay, "relay"),
    ];

    for (candidate_type, s) in tests {
        assert_eq!(candidate_type.to_string(), s);
        assert_eq!(CandidateType::from_str(s)?, candidate_type);
    }
    assert_eq!(
        CandidateType::from_str("bogus"),
        Err(Error::ErrUnknownCandidateType("bogus".to_owned()))
    );

    Ok(())
}

#[test]
fn test_candidate_type_rank_order() {
    assert!(CandidateType::Relay.rank() < CandidateType::ServerReflexive.rank());
    assert!(
        CandidateType::ServerReflexive.rank() < CandidateType::PeerReflexive.rank()
    );
    assert!(CandidateType::PeerReflexive.rank() < CandidateType::Host.rank());
}

#[test]
fn test_candidate_to_record() {
    let host = addr("192.168.1.10:5000");
    let mapped = addr("203.0.113.7:40000");
    let relayed = addr("198.51.100.1:50000");
    let server = addr("198.51.100.1:3478");

    let mut srflx = Candidate::new_server_reflexive(1, mapped, host, server, 0);
    srflx.priority = 1694498815;
    srflx.foundation = "2".to_owned();
    let record = srflx.to_record();
    assert_eq!(record.candidate_type, CandidateType::ServerReflexive);
    assert_eq!(record.raddress, Some(host.ip()));
    assert_eq!(record.rport, Some(host.port()));
    assert_eq!(
        record.marshal(),
        "2 1 udp 1694498815 203.0.113.7 40000 typ srflx raddr 192.168.1.10 rport 5000"
    );

    let relay =
        Candidate::new_relayed(1, relayed, Some(mapped), server, 0, Duration::from_secs(600));
    let record = relay.to_record();
    assert_eq!(relay.base(), relayed, "relayed candidates are their own base");
    assert_eq!(record.raddress, Some(mapped.ip()));
    assert_eq!(record.rport, Some(mapped.port()));

    let record = Candidate::new_host(1, host, TransportProtocol::Udp).to_record();
    assert_eq!(record.raddress, None);
    assert_eq!(record.rport, None);
}

#[test]
fn test_unmarshal_candidate() -> Result<()> {
    let tests = vec![
        (
            "1 1 udp 2130706431 10.0.75.1 53634 typ host",
            CandidateType::Host,
            false,
        ),
        (
            "4207374051 1 udp 1685790463 191.228.238.68 53991 typ srflx raddr 192.168.0.27 rport 53991",
            CandidateType::ServerReflexive,
            true,
        ),
        (
            "848194626 1 udp 16777215 50.0.0.1 5000 typ relay raddr 192.168.0.1 rport 5001",
            CandidateType::Relay,
            true,
        ),
    ];

    for (raw, candidate_type, has_related) in tests {
        let record = unmarshal_candidate(raw)?;
        assert_eq!(record.candidate_type, candidate_type, "{raw}");
        assert_eq!(record.raddress.is_some(), has_related, "{raw}");
        assert_eq!(record.marshal(), raw);
    }

    let bad = vec![
        "1 1 udp 2130706431 10.0.75.1",
        "1 1 sctp 2130706431 10.0.75.1 53634 typ host",
        "1 1 udp 2130706431 10.0.75.1 53634 typ host raddr",
        "1 1 udp 2130706431 10.0.75.1 53634 typ srflx raddr 192.168.0.274 rport 1",
    ];
    for raw in bad {
        assert!(unmarshal_candidate(raw).is_err(), "{raw} should not parse");
    }

    Ok(())
}

#[test]
fn test_remote_candidate_from_record() {
    let record = IceCandidateRecord {
        candidate_type: CandidateType::Relay,
        foundation: "a".to_owned(),
        component_id: 1,
        transport: TransportProtocol::Udp,
        priority: 100,
        address: "50.0.0.1".parse().unwrap(),
        port: 5000,
        raddress: Some("192.168.0.1".parse().unwrap()),
        rport: Some(5001),
    };

    let remote = Candidate::new_remote(&record);
    assert!(remote.is_remote());
    assert_eq!(remote.priority(), 100);
    assert_eq!(remote.foundation(), "a");
    assert_eq!(remote.endpoint(), addr("50.0.0.1:5000"));
    assert_eq!(remote.mapped_address(), Some(addr("192.168.0.1:5001")));
}

#[test]
fn test_record_json() {
    let record = IceCandidateRecord {
        candidate_type: CandidateType::Host,
        foundation: "1".to_owned(),
        component_id: 1,
        transport: TransportProtocol::Udp,
        priority: 2130706431,
        address: "10.0.0.1".parse().unwrap(),
        port: 4000,
        raddress: None,
        rport: None,
    };

    let json = serde_json::to_string(&record).unwrap();
    assert_eq!(
        json,
        r#"{"type":"host","foundation":"1","component_id":1,"transport":"udp","priority":2130706431,"address":"10.0.0.1","port":4000}"#
    );
    let parsed: IceCandidateRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, record);
}
