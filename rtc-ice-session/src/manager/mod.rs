
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::agent::{IceAgent, SessionListener};
use crate::error::{Error, Result};
use crate::session::session_config::SessionConfig;
use crate::transport::StunTransport;

/// Registry of the live sessions of one process.
#[derive(Default)]
pub struct IceManager {
    sessions: Mutex<Vec<IceAgent>>,
}

impl IceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session and keeps it until [`deallocate_session`](Self::deallocate_session).
    pub fn allocate_session(
        &self,
        config: SessionConfig,
        transport: Arc<dyn StunTransport>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<IceAgent> {
        let agent = IceAgent::new(config, transport, listener)?;
        debug!("[{}]: session allocated", agent.name());
        self.sessions().push(agent.clone());
        Ok(agent)
    }

    /// Closes the session and forgets it.
    pub async fn deallocate_session(&self, agent: &IceAgent) -> Result<()> {
        let removed = {
            let mut sessions = self.sessions();
            let position = sessions
                .iter()
                .position(|s| s.ptr_eq(agent))
                .ok_or(Error::ErrSessionNotFound)?;
            sessions.remove(position)
        };
        debug!("[{}]: session deallocated", removed.name());
        match removed.close().await {
            Ok(()) | Err(Error::ErrSessionClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    fn sessions(&self) -> MutexGuard<'_, Vec<IceAgent>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
