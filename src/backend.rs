use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::{Forest, MoveAck, MoveRequest, TreeSnapshot};
use crate::tree::build_forest;

/// Authentication context passed explicitly to every backend call.
#[derive(Clone)]
pub struct SessionContext {
    token: Arc<str>,
}

impl SessionContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext").field("token", &"<redacted>").finish()
    }
}

/// The remote source of truth for the folder tree.
///
/// `persist_move` must be idempotent for a given `request_id`, since the
/// workflow may retry it once.
#[allow(async_fn_in_trait)]
pub trait TreeBackend {
    async fn fetch_tree_snapshot(&self, session: &SessionContext) -> Result<Forest, String>;

    async fn persist_move(&self, session: &SessionContext, request: &MoveRequest) -> Result<MoveAck, String>;
}

#[derive(Default)]
struct BackendState {
    snapshot: TreeSnapshot,
    required_token: Option<String>,
    failing_persists: usize,
    failing_fetches: bool,
    persist_calls: usize,
    fetch_calls: usize,
    acknowledged: HashMap<Uuid, MoveAck>,
    gate: Option<Arc<Notify>>,
    fetch_gate: Option<Arc<Notify>>,
}

/// Backend kept entirely in memory over a flat [`TreeSnapshot`].
///
/// Used for local sessions and tests; failures and slow responses can be
/// injected.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
}

impl InMemoryBackend {
    pub fn new(snapshot: TreeSnapshot) -> Self {
        Self {
            state: Mutex::new(BackendState {
                snapshot,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rejects calls whose session token differs from `token`.
    pub fn require_token(&self, token: impl Into<String>) {
        self.state().required_token = Some(token.into());
    }

    /// Makes the next `count` persist calls fail.
    pub fn fail_next_persists(&self, count: usize) {
        self.state().failing_persists = count;
    }

    pub fn fail_fetches(&self, failing: bool) {
        self.state().failing_fetches = failing;
    }

    /// Holds every persist call until the returned handle is notified.
    pub fn pause_persists(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state().gate = Some(Arc::clone(&gate));
        gate
    }

    /// Holds every fetch until the returned handle is notified, once per call.
    pub fn pause_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state().fetch_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn persist_calls(&self) -> usize {
        self.state().persist_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.state().snapshot.clone()
    }

    /// Applies a server-side change outside of any client request.
    pub fn mutate_snapshot<F>(&self, f: F)
    where
        F: FnOnce(&mut TreeSnapshot),
    {
        f(&mut self.state().snapshot);
    }

    fn check_token(state: &BackendState, session: &SessionContext) -> Result<(), String> {
        match &state.required_token {
            Some(expected) if expected != session.token() => Err("401 Unauthorized".to_string()),
            _ => Ok(()),
        }
    }
}

impl TreeBackend for InMemoryBackend {
    async fn fetch_tree_snapshot(&self, session: &SessionContext) -> Result<Forest, String> {
        let gate = self.state().fetch_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let snapshot = {
            let mut state = self.state();
            state.fetch_calls += 1;
            Self::check_token(&state, session)?;
            if state.failing_fetches {
                return Err("503 Service Unavailable".to_string());
            }
            state.snapshot.clone()
        };
        build_forest(&snapshot).map_err(|e| format!("Corrupt snapshot: {}", e))
    }

    async fn persist_move(&self, session: &SessionContext, request: &MoveRequest) -> Result<MoveAck, String> {
        let gate = self.state().gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state();
        state.persist_calls += 1;
        Self::check_token(&state, session)?;
        if state.failing_persists > 0 {
            state.failing_persists -= 1;
            return Err("503 Service Unavailable".to_string());
        }
        if let Some(ack) = state.acknowledged.get(&request.request_id) {
            return Ok(ack.clone());
        }
        if !state.snapshot.folders.iter().any(|f| f.id == request.target_folder_id) {
            return Err(format!("404 Folder '{}' not found", request.target_folder_id));
        }
        let document = state
            .snapshot
            .documents
            .iter_mut()
            .find(|d| d.id == request.document_id)
            .ok_or_else(|| format!("404 Document '{}' not found", request.document_id))?;
        document.folder_id = request.target_folder_id.clone();
        document.updated_at = Some(Utc::now());

        let ack = MoveAck {
            request_id: request.request_id,
            document_id: request.document_id.clone(),
            folder_id: request.target_folder_id.clone(),
            acknowledged_at: Utc::now(),
        };
        state.acknowledged.insert(request.request_id, ack.clone());
        Ok(ack)
    }
}
