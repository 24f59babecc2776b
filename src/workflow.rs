use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::{SessionContext, TreeBackend};
use crate::config::MAX_PERSIST_RETRIES;
use crate::error::{MoveError, MoveResult};
use crate::models::{Config, DocumentRef, FolderId, Forest, MoveAck, MoveRequest};
use crate::mutation::{merge_snapshot, move_document, verify_move, PlacementDrift};
use crate::navigation::NavigationState;
use crate::tree::{audit_forest, collect_client_folders, find_client_root, find_folder_by_id, ClientRootMatcher};

/// Observable phase of the move workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MovePhaseKind {
    Idle,
    CandidateSelection,
    Optimistic,
    Reconciling,
    Settled,
    RolledBack,
}

impl MovePhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovePhaseKind::Idle => "Idle",
            MovePhaseKind::CandidateSelection => "CandidateSelection",
            MovePhaseKind::Optimistic => "Optimistic",
            MovePhaseKind::Reconciling => "Reconciling",
            MovePhaseKind::Settled => "Settled",
            MovePhaseKind::RolledBack => "RolledBack",
        }
    }
}

impl fmt::Display for MovePhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A folder offered as a move destination
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCandidate {
    pub folder_id: FolderId,
    pub name: String,
    pub is_source: bool,
}

/// State of an open "move to" dialog.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveDialog {
    pub document: DocumentRef,
    pub source_folder_id: FolderId,
    pub client_root_name: Option<String>,
    /// Direct children of the client root; the root itself is never offered
    pub candidates: Vec<MoveCandidate>,
    pub selected_target: Option<FolderId>,
    /// Set when no destination can be offered at all
    pub blocked: Option<MoveError>,
}

impl MoveDialog {
    pub fn can_submit(&self) -> bool {
        self.blocked.is_none() && self.selected_target.is_some()
    }

    fn is_candidate(&self, folder_id: &str) -> bool {
        self.candidates.iter().any(|c| c.folder_id == folder_id)
    }
}

/// How a confirmed move ended, when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Persisted; `refreshed` is false when the follow-up fetch failed and
    /// the optimistic tree is still shown.
    Settled {
        ack: MoveAck,
        refreshed: bool,
        drift: Vec<PlacementDrift>,
    },
    /// Source and target were the same folder; nothing was sent.
    Unchanged,
    /// The session was torn down while the backend call was in flight.
    Discarded,
}

enum Phase {
    Idle,
    CandidateSelection(MoveDialog),
    InFlight { request: MoveRequest, stage: MovePhaseKind },
}

impl Phase {
    fn kind(&self) -> MovePhaseKind {
        match self {
            Phase::Idle => MovePhaseKind::Idle,
            Phase::CandidateSelection(_) => MovePhaseKind::CandidateSelection,
            Phase::InFlight { stage, .. } => *stage,
        }
    }
}

/// Owns the folder tree and runs document moves through
/// `Idle → CandidateSelection → Optimistic → Reconciling → Settled | RolledBack`.
///
/// All methods take `&self`; locks are never held across a backend call, so
/// readers and a second caller are served while a move is in flight. Only one
/// move may be in flight at a time, anything else that would rewrite the tree
/// meanwhile gets [`MoveError::Busy`].
pub struct MoveWorkflow<B> {
    backend: B,
    session: SessionContext,
    config: Config,
    matcher: ClientRootMatcher,
    tree: watch::Sender<Arc<Forest>>,
    phase: Mutex<Phase>,
    phase_log: Mutex<Vec<MovePhaseKind>>,
    navigation: Mutex<NavigationState>,
    refreshing: AtomicBool,
    torn_down: AtomicBool,
}

impl<B: TreeBackend> MoveWorkflow<B> {
    /// Creates a workflow with an empty tree. Call [`MoveWorkflow::load`]
    /// before use.
    ///
    /// # Returns
    /// * `Err(String)` - If the configured client root pattern is invalid
    pub fn new(backend: B, session: SessionContext, config: Config) -> Result<Self, String> {
        let matcher = ClientRootMatcher::new(&config.client_root_pattern)?;
        let (tree, _) = watch::channel(Arc::new(Forest::default()));
        Ok(Self {
            backend,
            session,
            config,
            matcher,
            tree,
            phase: Mutex::new(Phase::Idle),
            phase_log: Mutex::new(Vec::new()),
            navigation: Mutex::new(NavigationState::new()),
            refreshing: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn matcher(&self) -> &ClientRootMatcher {
        &self.matcher
    }

    /// Current tree value. Never mutated once handed out.
    pub fn snapshot(&self) -> Arc<Forest> {
        Arc::clone(&self.tree.borrow())
    }

    /// Receiver notified whenever a new tree value is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Forest>> {
        self.tree.subscribe()
    }

    pub fn phase(&self) -> MovePhaseKind {
        self.lock_phase().kind()
    }

    /// Phases visited since the current dialog was opened.
    pub fn phase_log(&self) -> Vec<MovePhaseKind> {
        self.phase_log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn dialog(&self) -> Option<MoveDialog> {
        match &*self.lock_phase() {
            Phase::CandidateSelection(dialog) => Some(dialog.clone()),
            _ => None,
        }
    }

    pub fn in_flight(&self) -> Option<MoveRequest> {
        match &*self.lock_phase() {
            Phase::InFlight { request, .. } => Some(request.clone()),
            _ => None,
        }
    }

    pub fn navigation(&self) -> NavigationState {
        self.lock_navigation().clone()
    }

    /// Runs `f` against the navigation state and the current tree.
    pub fn with_navigation<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut NavigationState, &Forest) -> R,
    {
        let forest = self.snapshot();
        let mut navigation = self.lock_navigation();
        f(&mut navigation, &forest)
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_navigation(&self) -> MutexGuard<'_, NavigationState> {
        self.navigation.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, kind: MovePhaseKind) {
        log::debug!("Move workflow entered {}", kind);
        self.phase_log.lock().unwrap_or_else(|p| p.into_inner()).push(kind);
    }

    fn publish(&self, forest: Arc<Forest>) {
        self.tree.send_replace(forest);
    }

    fn ensure_alive(&self) -> MoveResult<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            Err(MoveError::TornDown)
        } else {
            Ok(())
        }
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Fetches the initial tree and expands client roots if configured.
    pub async fn load(&self) -> MoveResult<()> {
        self.refresh().await?;
        if self.config.expand_client_roots_on_load {
            let forest = self.snapshot();
            self.lock_navigation().expand_client_roots(&forest, &self.matcher);
        }
        Ok(())
    }

    /// Replaces the tree with a fresh backend snapshot.
    pub async fn refresh(&self) -> MoveResult<()> {
        self.ensure_alive()?;
        if matches!(*self.lock_phase(), Phase::InFlight { .. }) {
            return Err(MoveError::Busy);
        }
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return Err(MoveError::Busy);
        }

        let fetched = {
            let _refreshing = RefreshGuard(&self.refreshing);
            self.backend.fetch_tree_snapshot(&self.session).await
        };
        if self.is_torn_down() {
            return Err(MoveError::TornDown);
        }

        let fresh = fetched.map_err(MoveError::Persistence)?;
        audit_forest(&fresh)?;
        self.install(fresh);
        Ok(())
    }

    fn install(&self, fresh: Forest) {
        self.lock_navigation().retain_existing(&fresh);
        self.publish(Arc::new(fresh));
    }

    /// Opens the move dialog for `document_id`, currently in `source_folder_id`.
    ///
    /// Destinations are limited to the working folders of the document's
    /// client. When the source has no client root the dialog still opens,
    /// but with no candidates and submission blocked.
    pub fn begin_move(&self, document_id: &str, source_folder_id: &str) -> MoveResult<MoveDialog> {
        self.ensure_alive()?;
        if self.refreshing.load(Ordering::SeqCst) {
            return Err(MoveError::Busy);
        }
        let mut phase = self.lock_phase();
        if matches!(*phase, Phase::InFlight { .. }) {
            return Err(MoveError::Busy);
        }

        let forest = self.snapshot();
        let source = find_folder_by_id(&forest, source_folder_id)
            .ok_or_else(|| MoveError::FolderNotFound(source_folder_id.to_string()))?;
        let document = source
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| MoveError::DocumentNotFound {
                document_id: document_id.to_string(),
                folder_id: source_folder_id.to_string(),
            })?;

        let dialog = match find_client_root(&forest, source_folder_id, &self.matcher) {
            Some(client_root) => MoveDialog {
                document,
                source_folder_id: source_folder_id.to_string(),
                client_root_name: Some(client_root.name.clone()),
                candidates: collect_client_folders(client_root)
                    .into_iter()
                    .skip(1)
                    .map(|folder| MoveCandidate {
                        folder_id: folder.id.clone(),
                        name: folder.name.clone(),
                        is_source: folder.id == source_folder_id,
                    })
                    .collect(),
                selected_target: None,
                blocked: None,
            },
            None => {
                log::info!("Folder '{}' has no client root, move disabled", source_folder_id);
                MoveDialog {
                    document,
                    source_folder_id: source_folder_id.to_string(),
                    client_root_name: None,
                    candidates: Vec::new(),
                    selected_target: None,
                    blocked: Some(MoveError::NoClientRoot(source_folder_id.to_string())),
                }
            }
        };

        *phase = Phase::CandidateSelection(dialog.clone());
        self.phase_log.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.record(MovePhaseKind::CandidateSelection);
        Ok(dialog)
    }

    /// Picks the single destination for the open dialog.
    pub fn select_target(&self, folder_id: &str) -> MoveResult<MoveDialog> {
        self.ensure_alive()?;
        let mut phase = self.lock_phase();
        let dialog = match &mut *phase {
            Phase::CandidateSelection(dialog) => dialog,
            other => {
                return Err(MoveError::InvalidState {
                    expected: MovePhaseKind::CandidateSelection.as_str(),
                    actual: other.kind().as_str(),
                })
            }
        };
        if let Some(blocked) = &dialog.blocked {
            return Err(blocked.clone());
        }
        if !dialog.is_candidate(folder_id) {
            return Err(MoveError::TargetNotCandidate(folder_id.to_string()));
        }
        dialog.selected_target = Some(folder_id.to_string());
        Ok(dialog.clone())
    }

    /// Closes the dialog without moving anything.
    pub fn cancel(&self) -> MoveResult<()> {
        let mut phase = self.lock_phase();
        match &*phase {
            Phase::Idle => Ok(()),
            Phase::CandidateSelection(_) => {
                *phase = Phase::Idle;
                self.record(MovePhaseKind::Idle);
                Ok(())
            }
            Phase::InFlight { .. } => Err(MoveError::Busy),
        }
    }

    /// Marks the session as gone. A move already in flight finishes its
    /// backend call, but its result is dropped.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        let mut phase = self.lock_phase();
        if matches!(*phase, Phase::CandidateSelection(_)) {
            *phase = Phase::Idle;
        }
    }

    /// Applies the selected move locally, persists it, then reconciles.
    ///
    /// Dropping the returned future mid-flight still returns the workflow to
    /// `Idle`, restoring the known-good tree if the move was not yet saved.
    ///
    /// # Returns
    /// * `Ok(MoveOutcome)` - The move settled, was a no-op, or was discarded
    /// * `Err(MoveError::Persistence)` - The backend refused; the last
    ///   known-good tree has been restored
    /// * `Err(_)` - Any other error aborts before anything is published
    pub async fn confirm(&self) -> MoveResult<MoveOutcome> {
        self.ensure_alive()?;
        if self.refreshing.load(Ordering::SeqCst) {
            return Err(MoveError::Busy);
        }

        let (request, known_good) = {
            let mut phase = self.lock_phase();
            let dialog = match &*phase {
                Phase::CandidateSelection(dialog) => dialog.clone(),
                Phase::InFlight { .. } => return Err(MoveError::Busy),
                Phase::Idle => {
                    return Err(MoveError::InvalidState {
                        expected: MovePhaseKind::CandidateSelection.as_str(),
                        actual: MovePhaseKind::Idle.as_str(),
                    })
                }
            };
            if let Some(blocked) = dialog.blocked {
                return Err(blocked);
            }
            let target = dialog.selected_target.ok_or(MoveError::NoTargetSelected)?;
            let request = MoveRequest::new(dialog.document.id, dialog.source_folder_id, target);
            let known_good = self.snapshot();

            if request.is_identity() {
                *phase = Phase::Idle;
                self.record(MovePhaseKind::Settled);
                self.record(MovePhaseKind::Idle);
                return Ok(MoveOutcome::Unchanged);
            }

            let optimistic = match self.apply_optimistic(&known_good, &request) {
                Ok(optimistic) => optimistic,
                Err(error) => {
                    log::error!("Move {} aborted before persisting: {}", request.request_id, error);
                    *phase = Phase::Idle;
                    self.record(MovePhaseKind::Idle);
                    return Err(error);
                }
            };

            *phase = Phase::InFlight {
                request: request.clone(),
                stage: MovePhaseKind::Optimistic,
            };
            self.record(MovePhaseKind::Optimistic);
            self.publish(Arc::new(optimistic));

            *phase = Phase::InFlight {
                request: request.clone(),
                stage: MovePhaseKind::Reconciling,
            };
            self.record(MovePhaseKind::Reconciling);
            (request, known_good)
        };
        let mut guard = MoveGuard {
            workflow: self,
            request_id: request.request_id,
            known_good: Arc::clone(&known_good),
            persisted: false,
            active: true,
        };

        let persisted = self.persist_with_retry(&request).await;
        if self.is_torn_down() {
            log::info!("Session closed, discarding result of move {}", request.request_id);
            return Ok(MoveOutcome::Discarded);
        }

        match persisted {
            Ok(ack) => {
                guard.persisted = true;
                let (refreshed, drift) = self.reconcile().await;
                if self.is_torn_down() {
                    log::info!("Session closed, discarding refresh for move {}", request.request_id);
                    return Ok(MoveOutcome::Discarded);
                }
                guard.disarm();
                self.finish(MovePhaseKind::Settled);
                log::info!(
                    "Moved document '{}' to folder '{}'",
                    request.document_id,
                    request.target_folder_id
                );
                Ok(MoveOutcome::Settled { ack, refreshed, drift })
            }
            Err(error) => {
                log::warn!("Move {} failed, rolling back: {}", request.request_id, error);
                guard.disarm();
                self.publish(known_good);
                self.finish(MovePhaseKind::RolledBack);
                Err(MoveError::Persistence(error))
            }
        }
    }

    fn apply_optimistic(&self, known_good: &Forest, request: &MoveRequest) -> MoveResult<Forest> {
        let optimistic = move_document(known_good, request)?;
        if self.config.verify_invariants {
            verify_move(known_good, &optimistic, request)?;
        }
        Ok(optimistic)
    }

    async fn persist_with_retry(&self, request: &MoveRequest) -> Result<MoveAck, String> {
        let attempts = 1 + self.config.persist_retry_limit.min(MAX_PERSIST_RETRIES);
        let timeout = Duration::from_millis(self.config.persist_timeout_ms);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, self.backend.persist_move(&self.session, request)).await {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(error)) => last_error = error,
                Err(_) => last_error = format!("no response within {} ms", self.config.persist_timeout_ms),
            }
            log::warn!(
                "Persisting move {} failed (attempt {}/{}): {}",
                request.request_id,
                attempt,
                attempts,
                last_error
            );
        }
        Err(last_error)
    }

    /// Replaces the optimistic tree with the backend's. When the fetch fails
    /// the optimistic tree stays in place.
    async fn reconcile(&self) -> (bool, Vec<PlacementDrift>) {
        let fresh = match self.backend.fetch_tree_snapshot(&self.session).await {
            Ok(fresh) => fresh,
            Err(error) => {
                log::warn!("Could not refresh tree after move: {}", error);
                return (false, Vec::new());
            }
        };
        if let Err(error) = audit_forest(&fresh) {
            log::error!("Backend returned an inconsistent tree: {}", error);
            return (false, Vec::new());
        }
        if self.is_torn_down() {
            return (false, Vec::new());
        }

        let optimistic = self.snapshot();
        let (merged, drift) = merge_snapshot(&optimistic, fresh);
        self.install(merged);
        (true, drift)
    }

    fn finish(&self, kind: MovePhaseKind) {
        *self.lock_phase() = Phase::Idle;
        self.record(kind);
        self.record(MovePhaseKind::Idle);
    }
}

/// Clears the refresh flag however the fetch ends, including when the
/// caller stops polling.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Brings the workflow back to `Idle` when a confirmed move is abandoned
/// before it settles, e.g. because the `confirm` future was dropped.
///
/// Before the backend acknowledged the move the known-good tree is restored
/// and the move counts as rolled back. Afterwards the optimistic tree is kept
/// and the move counts as settled. After teardown nothing is published.
struct MoveGuard<'a, B: TreeBackend> {
    workflow: &'a MoveWorkflow<B>,
    request_id: Uuid,
    known_good: Arc<Forest>,
    persisted: bool,
    active: bool,
}

impl<B: TreeBackend> MoveGuard<'_, B> {
    fn disarm(&mut self) {
        self.active = false;
    }
}

impl<B: TreeBackend> Drop for MoveGuard<'_, B> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if self.workflow.is_torn_down() {
            *self.workflow.lock_phase() = Phase::Idle;
            return;
        }
        if self.persisted {
            log::warn!("Move {} abandoned during reconciliation, keeping optimistic tree", self.request_id);
            self.workflow.finish(MovePhaseKind::Settled);
        } else {
            log::warn!("Move {} abandoned before it was saved, rolling back", self.request_id);
            self.workflow.publish(Arc::clone(&self.known_good));
            self.workflow.finish(MovePhaseKind::RolledBack);
        }
    }
}
