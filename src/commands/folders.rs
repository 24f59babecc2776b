use crate::backend::TreeBackend;
use crate::commands::{error_result, user_facing};
use crate::error::MoveError;
use crate::models::ApiResult;
use crate::navigation::VisibleFolder;
use crate::tree::find_folder_by_id;
use crate::workflow::MoveWorkflow;

/// Lists the folder rows currently visible in the sidebar.
///
/// Rows follow display order; children of collapsed folders are omitted.
///
/// # Arguments
/// * `workflow` - The session's move workflow, which owns the tree
pub async fn list_folders<B: TreeBackend>(workflow: &MoveWorkflow<B>) -> Result<Vec<VisibleFolder>, String> {
    Ok(workflow.with_navigation(|navigation, forest| navigation.visible_folders(forest)))
}

/// Expands or collapses a folder.
///
/// # Arguments
/// * `folder_id` - The folder to toggle
///
/// # Returns
/// ApiResult with `expanded` set to the new state
pub async fn toggle_folder<B: TreeBackend>(folder_id: String, workflow: &MoveWorkflow<B>) -> Result<ApiResult, String> {
    let toggled = workflow.with_navigation(|navigation, forest| {
        if find_folder_by_id(forest, &folder_id).is_none() {
            return Err(MoveError::FolderNotFound(folder_id.clone()));
        }
        Ok(navigation.toggle(&folder_id))
    });
    match toggled {
        Ok(expanded) => Ok(ApiResult {
            success: true,
            folder_id: Some(folder_id),
            expanded: Some(expanded),
            ..Default::default()
        }),
        Err(e) => Ok(error_result(&e)),
    }
}

/// Selects a folder, expanding its ancestors.
///
/// # Arguments
/// * `folder_id` - The folder to select
pub async fn select_folder<B: TreeBackend>(folder_id: String, workflow: &MoveWorkflow<B>) -> Result<ApiResult, String> {
    match workflow.with_navigation(|navigation, forest| navigation.select(forest, &folder_id)) {
        Ok(()) => Ok(ApiResult {
            success: true,
            folder_id: Some(folder_id),
            ..Default::default()
        }),
        Err(e) => Ok(error_result(&e)),
    }
}

/// Re-fetches the whole tree from the backend.
///
/// # Arguments
/// * `workflow` - The session's move workflow
///
/// # Returns
/// The user-facing message as `Err` when the fetch fails
pub async fn refresh_tree<B: TreeBackend>(workflow: &MoveWorkflow<B>) -> Result<ApiResult, String> {
    match workflow.refresh().await {
        Ok(()) => Ok(ApiResult {
            success: true,
            refreshed: Some(true),
            ..Default::default()
        }),
        Err(e) => Err(user_facing(&e)),
    }
}
