#[cfg(test)]
mod agent_test;

use log::{debug, error, trace};
use sansio::Protocol;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::candidate::IceCandidateRecord;
use crate::error::{Error, Result};
use crate::session::session_config::SessionConfig;
use crate::session::*;
use crate::state::SessionState;
use crate::transport::*;

/// Receives the session's progress: candidates gathered, checks succeeded or
/// processing failed. Each of these is reported at most once per session.
///
/// Called from the agent's tasks with no lock held; the listener may read the
/// agent back but must not await [`IceAgent::close`] from inside the callback.
pub trait SessionListener: Send + Sync {
    fn on_session_changed(&self, agent: &IceAgent);
}

struct AgentInner {
    name: String,
    session: Mutex<IceSession>,
    transport: Arc<dyn StunTransport>,
    listener: Arc<dyn SessionListener>,
    terminating: AtomicBool,
    done_tx: watch::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Runs an [`IceSession`] on tokio: one pacing task for STUN/TURN work and one
/// dispatcher task per stream with checks in flight.
#[derive(Clone)]
pub struct IceAgent {
    inner: Arc<AgentInner>,
}

impl IceAgent {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn StunTransport>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self> {
        let session = IceSession::new(config)?;
        let (done_tx, _) = watch::channel(());
        Ok(IceAgent {
            inner: Arc::new(AgentInner {
                name: session.name().to_owned(),
                session: Mutex::new(session),
                transport,
                listener,
                terminating: AtomicBool::new(false),
                done_tx,
                tasks: Mutex::new(vec![]),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn ptr_eq(&self, other: &IceAgent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Gathers host candidates and starts the pacing task that completes
    /// gathering. Must be called from within a tokio runtime.
    pub fn gather(&self) -> Result<()> {
        self.ensure_running()?;
        {
            let mut session = self.session();
            session.gather_host_candidates(self.inner.transport.as_ref(), Instant::now())?;
        }
        self.spawn_pacing();
        self.flush();
        Ok(())
    }

    /// Pairs the peer's candidates with the local ones and starts checking.
    pub fn start_checks(
        &self,
        remote_candidates: &[IceCandidateRecord],
        remote_ufrag: &str,
        remote_pwd: &str,
    ) -> Result<()> {
        self.ensure_running()?;
        self.session().form_check_lists(
            remote_candidates,
            remote_ufrag,
            remote_pwd,
            Instant::now(),
        )?;
        self.flush();
        Ok(())
    }

    /// Stops every dispatcher and returns the session to `CandidatesGathered`.
    pub fn cancel_checks(&self) -> Result<()> {
        self.ensure_running()?;
        self.session().cancel_checks(Instant::now())?;
        self.flush();
        Ok(())
    }

    /// Delivers a STUN message received on one of the host sockets.
    pub fn handle_inbound(&self, msg: InboundStun) -> Result<()> {
        if self.inner.terminating.load(Ordering::SeqCst) {
            trace!("[{}]: dropping inbound message after close", self.name());
            return Ok(());
        }
        let result = self.session().handle_read(msg);
        self.flush();
        result
    }

    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    pub fn error_code(&self) -> Option<Error> {
        self.session().error_code()
    }

    pub fn local_candidates(&self) -> Result<LocalIceCandidates> {
        self.session().local_candidates()
    }

    pub fn selected_candidate_pairs(&self) -> Result<Vec<SelectedCandidatePair>> {
        self.session().selected_candidate_pairs()
    }

    /// Stops the pacing and dispatcher tasks and waits for them to exit.
    pub async fn close(&self) -> Result<()> {
        let tasks = {
            let mut tasks = self.tasks();
            if self.inner.terminating.swap(true, Ordering::SeqCst) {
                return Err(Error::ErrSessionClosed);
            }
            std::mem::take(&mut *tasks)
        };
        debug!("[{}]: closing", self.name());

        self.session().close()?;
        self.inner.done_tx.send_replace(());

        for task in tasks {
            if let Err(err) = task.await {
                error!("[{}]: task ended abnormally: {}", self.name(), err);
            }
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.terminating.load(Ordering::SeqCst) {
            Err(Error::ErrSessionClosed)
        } else {
            Ok(())
        }
    }

    fn session(&self) -> MutexGuard<'_, IceSession> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes everything the session produced under one lock, then sends,
    /// notifies and starts dispatchers with the lock released.
    fn flush(&self) {
        let (transmits, events, requests) = {
            let mut session = self.session();
            let transmits: Vec<Transmit> = std::iter::from_fn(|| session.poll_write()).collect();
            let events: Vec<SessionEvent> = std::iter::from_fn(|| session.poll_event()).collect();
            (transmits, events, session.take_dispatcher_requests())
        };

        for transmit in transmits {
            trace!(
                "[{}]: {} -> {}: {}",
                self.name(),
                transmit.transport.local_addr,
                transmit.transport.peer_addr,
                transmit.message
            );
            if let Err(err) = self.inner.transport.send(
                transmit.transport.local_addr,
                &transmit.message,
                transmit.transport.peer_addr,
                transmit.to_peer,
            ) {
                error!(
                    "[{}]: failed to send to {}: {}",
                    self.name(),
                    transmit.transport.peer_addr,
                    err
                );
            }
        }

        for request in requests {
            self.spawn_dispatcher(request);
        }

        for event in events {
            debug!("[{}]: notifying {:?}", self.name(), event);
            self.inner.listener.on_session_changed(self);
        }
    }

    fn spawn_pacing(&self) {
        let agent = self.clone();
        self.spawn(async move {
            let mut done_rx = agent.inner.done_tx.subscribe();
            loop {
                if agent.inner.terminating.load(Ordering::SeqCst) {
                    break;
                }
                let next = agent.session().pacing_tick(Instant::now());
                agent.flush();
                let Some(interval) = next else {
                    break;
                };
                if !agent.sleep_or_close(&mut done_rx, interval).await {
                    break;
                }
            }
            trace!("[{}]: pacing stopped", agent.name());
        });
    }

    fn spawn_dispatcher(&self, request: DispatcherRequest) {
        let agent = self.clone();
        self.spawn(async move {
            let mut done_rx = agent.inner.done_tx.subscribe();
            loop {
                if agent.inner.terminating.load(Ordering::SeqCst) {
                    break;
                }
                let result =
                    agent
                        .session()
                        .dispatch_tick(request.stream, request.epoch, Instant::now());
                agent.flush();
                let DispatchResult::Continue(interval) = result else {
                    break;
                };
                if !agent.sleep_or_close(&mut done_rx, interval).await {
                    break;
                }
            }
            trace!(
                "[{}]: dispatcher of stream {} (epoch {}) stopped",
                agent.name(),
                request.stream,
                request.epoch
            );
        });
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Same lock close() takes the handles under.
        let mut tasks = self.tasks();
        if self.inner.terminating.load(Ordering::SeqCst) {
            return;
        }
        tasks.retain(|t| !t.is_finished());
        tasks.push(tokio::spawn(task));
    }

    /// Returns false when woken by [`close`](Self::close).
    async fn sleep_or_close(&self, done_rx: &mut watch::Receiver<()>, interval: Duration) -> bool {
        tokio::select! {
            _ = done_rx.changed() => false,
            _ = tokio::time::sleep(interval) => !self.inner.terminating.load(Ordering::SeqCst),
        }
    }
}
