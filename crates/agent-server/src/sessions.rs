//! Live Sessions
//!
//! Chat sessions outlive a single HTTP request, so they are parked here
//! between calls. Nothing is persisted; a restart forgets every session.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use agent_core::{Result, Session, SessionConfig, SessionId};

/// Starts a fresh tool-provider session
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Session>;
}

/// Spawns the configured tool-provider program
pub struct ProcessLauncher {
    config: SessionConfig,
}

impl ProcessLauncher {
    pub const fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Session> {
        Session::open(&self.config).await
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

pub struct SessionManager {
    launcher: Arc<dyn SessionLauncher>,
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn SessionLauncher>) -> Self {
        Self {
            launcher,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a session and keep it for later requests
    pub async fn create(&self) -> Result<(SessionId, SharedSession)> {
        let session = self.launcher.launch().await?;
        let id = session.id().clone();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.lock().await.insert(id.clone(), Arc::clone(&shared));
        info!(session_id = %id, "session started");
        Ok((id, shared))
    }

    /// A session that is not kept; the caller closes it
    pub async fn transient(&self) -> Result<Session> {
        self.launcher.launch().await
    }

    pub async fn get(&self, id: &SessionId) -> Option<SharedSession> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Drop a session without closing it
    pub async fn forget(&self, id: &SessionId) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    /// Close and drop a session
    pub async fn remove(&self, id: &SessionId) -> bool {
        let Some(shared) = self.sessions.lock().await.remove(id) else {
            return false;
        };
        shared.lock().await.close().await;
        info!(session_id = %id, "session ended");
        true
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Close every live session
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        for (id, shared) in drained {
            shared.lock().await.close().await;
            info!(session_id = %id, "session closed at shutdown");
        }
    }
}
