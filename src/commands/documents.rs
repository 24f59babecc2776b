use serde::Serialize;

use crate::backend::TreeBackend;
use crate::commands::{error_result, user_facing};
use crate::models::ApiResult;
use crate::workflow::{MoveCandidate, MoveDialog, MoveOutcome, MoveWorkflow};

/// Reported when the session closed while a move was being saved
pub const SESSION_CLOSED: &str = "The session closed before the move finished; reload to see where the document is";

/// What the "move to" dialog renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveDialogView {
    pub document_id: String,
    pub title: String,
    pub client_name: Option<String>,
    pub candidates: Vec<MoveCandidate>,
    pub selected_target: Option<String>,
    pub can_submit: bool,
    /// Shown instead of the candidate list when the move is unavailable
    pub notice: Option<String>,
}

impl From<MoveDialog> for MoveDialogView {
    fn from(dialog: MoveDialog) -> Self {
        Self {
            can_submit: dialog.can_submit(),
            notice: dialog.blocked.as_ref().map(user_facing),
            document_id: dialog.document.id,
            title: dialog.document.title,
            client_name: dialog.client_root_name,
            candidates: dialog.candidates,
            selected_target: dialog.selected_target,
        }
    }
}

/// Opens the move dialog for a document.
///
/// # Arguments
/// * `document_id` - The document to move
/// * `folder_id` - The folder the UI currently shows it in
pub async fn open_move_dialog<B: TreeBackend>(
    document_id: String,
    folder_id: String,
    workflow: &MoveWorkflow<B>,
) -> Result<MoveDialogView, String> {
    workflow
        .begin_move(&document_id, &folder_id)
        .map(MoveDialogView::from)
        .map_err(|e| user_facing(&e))
}

/// Picks the destination folder in the open dialog.
///
/// # Arguments
/// * `folder_id` - One of the dialog's candidate folders
pub async fn choose_move_target<B: TreeBackend>(
    folder_id: String,
    workflow: &MoveWorkflow<B>,
) -> Result<MoveDialogView, String> {
    workflow
        .select_target(&folder_id)
        .map(MoveDialogView::from)
        .map_err(|e| user_facing(&e))
}

/// Submits the open dialog.
///
/// # Arguments
/// * `workflow` - The session's move workflow holding the dialog
///
/// # Returns
/// ApiResult naming the document's folder after the move. `refreshed` is
/// false when the tree could not be re-fetched afterwards.
pub async fn confirm_move<B: TreeBackend>(workflow: &MoveWorkflow<B>) -> Result<ApiResult, String> {
    let dialog = workflow.dialog();
    match workflow.confirm().await {
        Ok(MoveOutcome::Settled { ack, refreshed, .. }) => Ok(ApiResult {
            refreshed: Some(refreshed),
            ..ApiResult::with_placement(ack.document_id, ack.folder_id)
        }),
        Ok(MoveOutcome::Unchanged) => Ok(match dialog {
            Some(dialog) => ApiResult::with_placement(dialog.document.id, dialog.source_folder_id),
            None => ApiResult::success(),
        }),
        Ok(MoveOutcome::Discarded) => Ok(ApiResult {
            document_id: dialog.map(|dialog| dialog.document.id),
            refreshed: Some(false),
            ..ApiResult::error(SESSION_CLOSED)
        }),
        Err(e) => Ok(error_result(&e)),
    }
}

/// Closes the dialog without moving anything.
///
/// # Arguments
/// * `workflow` - The session's move workflow holding the dialog
pub async fn cancel_move<B: TreeBackend>(workflow: &MoveWorkflow<B>) -> Result<ApiResult, String> {
    match workflow.cancel() {
        Ok(()) => Ok(ApiResult::success()),
        Err(e) => Ok(error_result(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, SessionContext};
    use crate::commands::GENERIC_FAILURE;
    use crate::fixtures::acme_snapshot;
    use crate::models::Config;
    use crate::workflow::MovePhaseKind;

    async fn workflow(config: Config) -> MoveWorkflow<InMemoryBackend> {
        let workflow =
            MoveWorkflow::new(InMemoryBackend::new(acme_snapshot()), SessionContext::new("token"), config).unwrap();
        workflow.load().await.unwrap();
        workflow
    }

    #[tokio::test]
    async fn test_move_through_commands() {
        let workflow = workflow(Config::default()).await;

        let view = open_move_dialog("d1".to_string(), "contracts".to_string(), &workflow)
            .await
            .unwrap();
        assert_eq!(view.title, "Master Agreement");
        assert_eq!(view.candidates.len(), 2);
        assert!(!view.can_submit);
        assert!(view.notice.is_none());

        let view = choose_move_target("invoices".to_string(), &workflow).await.unwrap();
        assert!(view.can_submit);

        let result = confirm_move(&workflow).await.unwrap();
        assert!(result.success);
        assert_eq!(result.document_id.as_deref(), Some("d1"));
        assert_eq!(result.folder_id.as_deref(), Some("invoices"));
        assert_eq!(result.refreshed, Some(true));
    }

    #[tokio::test]
    async fn test_dialog_without_client_shows_notice() {
        let workflow = workflow(Config::default()).await;

        let view = open_move_dialog("d3".to_string(), "scratch".to_string(), &workflow)
            .await
            .unwrap();
        assert!(view.candidates.is_empty());
        assert!(!view.can_submit);
        assert!(view.notice.unwrap().contains("client"));
    }

    #[tokio::test]
    async fn test_persist_failure_reported_to_user() {
        let workflow = workflow(Config {
            persist_retry_limit: 0,
            ..Config::default()
        })
        .await;
        workflow.backend().fail_next_persists(1);

        open_move_dialog("d1".to_string(), "contracts".to_string(), &workflow)
            .await
            .unwrap();
        choose_move_target("invoices".to_string(), &workflow).await.unwrap();
        let result = confirm_move(&workflow).await.unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("503"));
        assert_eq!(workflow.phase(), MovePhaseKind::Idle);
    }

    #[tokio::test]
    async fn test_stale_document_is_masked() {
        let workflow = workflow(Config::default()).await;
        let error = open_move_dialog("d1".to_string(), "invoices".to_string(), &workflow)
            .await
            .unwrap_err();
        assert_eq!(error, GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn test_identity_move_reports_source() {
        let workflow = workflow(Config::default()).await;
        open_move_dialog("d1".to_string(), "contracts".to_string(), &workflow)
            .await
            .unwrap();
        choose_move_target("contracts".to_string(), &workflow).await.unwrap();

        let result = confirm_move(&workflow).await.unwrap();
        assert_eq!(result, ApiResult::with_placement("d1", "contracts"));
    }

    #[tokio::test]
    async fn test_discarded_move_is_not_reported_as_success() {
        let workflow = workflow(Config::default()).await;
        let gate = workflow.backend().pause_persists();
        open_move_dialog("d1".to_string(), "contracts".to_string(), &workflow)
            .await
            .unwrap();
        choose_move_target("invoices".to_string(), &workflow).await.unwrap();

        let (result, ()) = tokio::join!(confirm_move(&workflow), async {
            while workflow.phase() != MovePhaseKind::Reconciling {
                tokio::task::yield_now().await;
            }
            workflow.teardown();
            gate.notify_one();
        });

        let result = result.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(SESSION_CLOSED));
        assert_eq!(result.document_id.as_deref(), Some("d1"));
        assert_eq!(result.refreshed, Some(false));
    }

    #[tokio::test]
    async fn test_cancel_move() {
        let workflow = workflow(Config::default()).await;
        open_move_dialog("d1".to_string(), "contracts".to_string(), &workflow)
            .await
            .unwrap();

        assert!(cancel_move(&workflow).await.unwrap().success);
        assert_eq!(workflow.phase(), MovePhaseKind::Idle);
    }
}
