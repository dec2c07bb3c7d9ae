use super::*;
use crate::candidate::CandidateType;
use crate::network_interface::{InterfaceEntry, NetworkInterface};
use crate::session::session_config::StunServerInfo;
use crate::stun::*;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicUsize};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const HOST_IP: &str = "192.168.1.10";
const REMOTE: &str = "10.0.0.1:4000";

struct Sent {
    local: SocketAddr,
    message: StunMessage,
    destination: SocketAddr,
    to_peer: bool,
}

struct RecordingTransport {
    next_port: AtomicU16,
    sent_tx: mpsc::UnboundedSender<Sent>,
}

impl StunTransport for RecordingTransport {
    fn bind(&self, ip: IpAddr) -> Result<SocketAddr> {
        Ok(SocketAddr::new(
            ip,
            self.next_port.fetch_add(1, Ordering::SeqCst),
        ))
    }

    fn send(
        &self,
        local: SocketAddr,
        message: &StunMessage,
        destination: SocketAddr,
        to_peer: bool,
    ) -> Result<()> {
        self.sent_tx
            .send(Sent {
                local,
                message: message.clone(),
                destination,
                to_peer,
            })
            .map_err(|err| Error::ErrTransportSend(err.to_string()))
    }
}

struct CountingListener {
    calls: AtomicUsize,
    states_tx: mpsc::UnboundedSender<SessionState>,
}

impl SessionListener for CountingListener {
    fn on_session_changed(&self, agent: &IceAgent) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.states_tx.send(agent.state());
    }
}

struct Harness {
    agent: IceAgent,
    listener: Arc<CountingListener>,
    sent_rx: mpsc::UnboundedReceiver<Sent>,
    states_rx: mpsc::UnboundedReceiver<SessionState>,
}

fn harness(config: SessionConfig) -> Result<Harness> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (states_tx, states_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(RecordingTransport {
        next_port: AtomicU16::new(50000),
        sent_tx,
    });
    let listener = Arc::new(CountingListener {
        calls: AtomicUsize::new(0),
        states_tx,
    });
    let agent = IceAgent::new(config, transport, listener.clone())?;
    Ok(Harness {
        agent,
        listener,
        sent_rx,
        states_rx,
    })
}

fn config(controlling: bool) -> SessionConfig {
    SessionConfig {
        name: "agent".to_owned(),
        add_host_candidates: true,
        is_controlling: controlling,
        network_interface: Some(NetworkInterface::from_entries(vec![InterfaceEntry::new(
            "eth0",
            HOST_IP.parse().unwrap(),
        )])),
        ..Default::default()
    }
}

fn remote_record() -> IceCandidateRecord {
    let remote: SocketAddr = REMOTE.parse().unwrap();
    IceCandidateRecord {
        candidate_type: CandidateType::Host,
        foundation: "a".to_owned(),
        component_id: 1,
        transport: TransportProtocol::Udp,
        priority: 100,
        address: remote.ip(),
        port: remote.port(),
        raddress: None,
        rport: None,
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Result<T> {
    timeout(WAIT, rx.recv())
        .await
        .map_err(|_| Error::Other("timed out".to_owned()))?
        .ok_or_else(|| Error::Other("channel closed".to_owned()))
}

#[tokio::test]
async fn test_agent_gathers_host_candidates() -> Result<()> {
    let mut h = harness(config(true))?;
    assert!(h.agent.local_candidates().is_err());

    h.agent.gather()?;
    assert_eq!(next(&mut h.states_rx).await?, SessionState::CandidatesGathered);
    assert_eq!(h.listener.calls.load(Ordering::SeqCst), 1);

    let local = h.agent.local_candidates()?;
    assert_eq!(local.ufrag.len(), 16);
    assert_eq!(local.pwd.len(), 32);
    assert_eq!(local.candidates.len(), 1);
    assert_eq!(local.candidates[0].port, 50000);

    assert_eq!(h.agent.gather(), Err(Error::ErrInvalidState));

    h.agent.close().await?;
    assert_eq!(h.agent.close().await, Err(Error::ErrSessionClosed));
    assert_eq!(
        h.agent.start_checks(&[remote_record()], "rufrag", "rpwd"),
        Err(Error::ErrSessionClosed)
    );
    Ok(())
}

#[tokio::test]
async fn test_agent_checks_succeed() -> Result<()> {
    let mut h = harness(SessionConfig {
        use_aggressive_nomination: true,
        ..config(true)
    })?;
    h.agent.gather()?;
    assert_eq!(next(&mut h.states_rx).await?, SessionState::CandidatesGathered);

    h.agent.start_checks(&[remote_record()], "rufrag", "rpwd")?;
    assert_eq!(h.agent.state(), SessionState::ChecksRunning);

    let check = next(&mut h.sent_rx).await?;
    let remote: SocketAddr = REMOTE.parse().unwrap();
    assert!(check.to_peer);
    assert_eq!(check.destination, remote);
    assert!(check.message.has_use_candidate());

    h.agent.handle_inbound(TransportMessage {
        now: Instant::now(),
        transport: TransportContext {
            local_addr: check.local,
            peer_addr: remote,
            transport_protocol: TransportProtocol::Udp,
        },
        message: StunMessage {
            class: MessageClass::SuccessResponse,
            method: Method::Binding,
            transaction_id: check.message.transaction_id,
            attributes: vec![StunAttribute::XorMappedAddress(check.local)],
        },
    })?;
    assert_eq!(next(&mut h.states_rx).await?, SessionState::ChecksSucceeded);
    assert_eq!(h.listener.calls.load(Ordering::SeqCst), 2);

    let selected = h.agent.selected_candidate_pairs()?;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].local.endpoint, check.local);
    assert_eq!(selected[0].remote.endpoint, remote);

    h.agent.close().await?;
    assert_eq!(h.agent.state(), SessionState::ChecksSucceeded);
    Ok(())
}

#[tokio::test]
async fn test_agent_cancel_and_restart_checks() -> Result<()> {
    let mut h = harness(config(false))?;
    h.agent.gather()?;
    assert_eq!(next(&mut h.states_rx).await?, SessionState::CandidatesGathered);

    assert_eq!(h.agent.cancel_checks(), Err(Error::ErrInvalidState));

    h.agent.start_checks(&[remote_record()], "rufrag", "rpwd")?;
    let first = next(&mut h.sent_rx).await?;

    h.agent.cancel_checks()?;
    assert_eq!(h.agent.state(), SessionState::CandidatesGathered);
    assert!(h.agent.selected_candidate_pairs().is_err());

    h.agent.start_checks(&[remote_record()], "rufrag2", "rpwd2")?;
    let username = format!("rufrag2:{}", h.agent.local_candidates()?.ufrag);
    let second = loop {
        let sent = next(&mut h.sent_rx).await?;
        if sent.message.username() == Some(username.as_str()) {
            break sent;
        }
    };
    assert_ne!(first.message.transaction_id, second.message.transaction_id);
    assert_eq!(h.listener.calls.load(Ordering::SeqCst), 1);

    h.agent.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_agent_unresponsive_stun_server_notifies_once() -> Result<()> {
    let server: SocketAddr = "1.2.3.4:3478".parse().unwrap();
    let mut h = harness(SessionConfig {
        stun_info: Some(StunServerInfo {
            address: server.ip(),
            port: server.port(),
            account: "user".to_owned(),
            password: "secret".to_owned(),
            relay_info: None,
        }),
        pacing_interval: Some(Duration::from_millis(10)),
        stun_retry_timeout: Some(Duration::from_millis(20)),
        max_stun_retries: Some(2),
        ..config(true)
    })?;
    h.agent.gather()?;

    assert_eq!(next(&mut h.states_rx).await?, SessionState::ProcessingFailed);
    assert_eq!(h.agent.error_code(), Some(Error::ErrStunServerNoResponse));
    assert!(h.agent.local_candidates().is_err());

    h.agent.close().await?;
    assert_eq!(h.listener.calls.load(Ordering::SeqCst), 1);

    let mut requests = vec![];
    while let Ok(sent) = h.sent_rx.try_recv() {
        requests.push(sent);
    }
    assert_eq!(requests.len(), 2);
    for sent in &requests {
        assert!(!sent.to_peer);
        assert_eq!(sent.destination, server);
        assert_eq!(sent.message.method, Method::Binding);
    }
    Ok(())
}

#[tokio::test]
async fn test_agent_ignores_inbound_after_close() -> Result<()> {
    let mut h = harness(config(true))?;
    h.agent.gather()?;
    assert_eq!(next(&mut h.states_rx).await?, SessionState::CandidatesGathered);
    h.agent.close().await?;

    let local = h.agent.local_candidates()?.candidates[0].clone();
    h.agent.handle_inbound(TransportMessage {
        now: Instant::now(),
        transport: TransportContext {
            local_addr: SocketAddr::new(local.address, local.port),
            peer_addr: REMOTE.parse().unwrap(),
            transport_protocol: TransportProtocol::Udp,
        },
        message: StunMessage::new(MessageClass::Request, Method::Binding),
    })?;
    assert!(h.sent_rx.try_recv().is_err());
    assert_eq!(h.listener.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_agent_spawns_nothing_after_close() -> Result<()> {
    let mut h = harness(config(true))?;
    h.agent.gather()?;
    assert_eq!(next(&mut h.states_rx).await?, SessionState::CandidatesGathered);
    h.agent.start_checks(&[remote_record()], "rufrag", "rpwd")?;
    let _ = next(&mut h.sent_rx).await?;

    let closing = h.agent.clone();
    let close = tokio::spawn(async move { closing.close().await });
    for _ in 0..10 {
        h.agent.spawn_pacing();
        h.agent.spawn_dispatcher(DispatcherRequest {
            stream: 0,
            epoch: u64::MAX,
        });
        tokio::task::yield_now().await;
    }
    close
        .await
        .map_err(|err| Error::Other(err.to_string()))??;

    h.agent.spawn_pacing();
    assert!(h.agent.tasks().is_empty(), "no task outlives close");
    Ok(())
}
