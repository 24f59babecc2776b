use thiserror::Error;

use crate::models::{DocumentId, FolderId};

/// Errors raised by the tree engine and the move workflow.
///
/// Only [`MoveError::Persistence`] and [`MoveError::NoClientRoot`] are meant
/// for the user; everything else is a local staleness or programming error
/// that aborts the operation at hand.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MoveError {
    #[error("folder '{0}' is not present in the tree")]
    FolderNotFound(FolderId),

    #[error("document '{document_id}' is not present in folder '{folder_id}'")]
    DocumentNotFound {
        document_id: DocumentId,
        folder_id: FolderId,
    },

    #[error("folder '{0}' does not belong to any client")]
    NoClientRoot(FolderId),

    #[error("the move could not be saved: {0}")]
    Persistence(String),

    #[error("tree invariant violated: {0}")]
    InvariantViolation(String),

    #[error("another move is still in progress")]
    Busy,

    #[error("expected the workflow to be {expected}, but it is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("no target folder has been selected")]
    NoTargetSelected,

    #[error("folder '{0}' is not a valid destination for this document")]
    TargetNotCandidate(FolderId),

    #[error("the session has been closed")]
    TornDown,
}

impl MoveError {
    /// Whether this error should be shown to the user as-is.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, MoveError::Persistence(_) | MoveError::NoClientRoot(_))
    }

    /// Message suitable for display, or `None` for errors that stay in logs.
    pub fn user_message(&self) -> Option<String> {
        match self {
            MoveError::Persistence(_) => Some(self.to_string()),
            MoveError::NoClientRoot(_) => {
                Some("This folder is not filed under a client, so the document cannot be moved".to_string())
            }
            _ => None,
        }
    }
}

pub type MoveResult<T> = Result<T, MoveError>;
