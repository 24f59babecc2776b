use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned folder identifier, unique across the whole tree
pub type FolderId = String;
/// Server-assigned document identifier
pub type DocumentId = String;

/// Placement of one document inside a folder
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub id: DocumentId,
    pub title: String,
    /// Id of the folder whose `documents` currently holds this entry
    pub folder_id: FolderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            folder_id: folder_id.into(),
            updated_at: None,
        }
    }
}

/// One folder of the tree, owning its child folders and documents.
///
/// Children sit behind `Arc` so that a mutation only rebuilds the path from
/// the changed folder up to its root; every other subtree is shared with the
/// previous tree value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    pub id: FolderId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<FolderId>,
    #[serde(default)]
    pub children: Vec<Arc<FolderNode>>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
}

impl FolderNode {
    /// Creates an empty root folder.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            children: Vec::new(),
            documents: Vec::new(),
        }
    }

    /// Appends a child folder, pointing its `parent_id` at this folder.
    pub fn with_child(mut self, mut child: FolderNode) -> Self {
        child.parent_id = Some(self.id.clone());
        self.children.push(Arc::new(child));
        self
    }

    /// Appends a document, pointing its `folder_id` at this folder.
    pub fn with_document(mut self, id: impl Into<String>, title: impl Into<String>) -> Self {
        let document = DocumentRef::new(id, title, self.id.clone());
        self.documents.push(document);
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of documents held directly by this folder
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Number of documents in this folder and all of its descendants
    pub fn total_documents(&self) -> usize {
        self.documents.len()
            + self
                .children
                .iter()
                .map(|child| child.total_documents())
                .sum::<usize>()
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.documents.iter().any(|d| d.id == document_id)
    }
}

/// The full folder forest as delivered by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct Forest {
    pub roots: Vec<Arc<FolderNode>>,
}

impl Forest {
    pub fn new(roots: Vec<FolderNode>) -> Self {
        Self {
            roots: roots.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// All folders in depth-first pre-order
    pub fn folders(&self) -> Vec<&FolderNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&FolderNode> = self.roots.iter().rev().map(|r| r.as_ref()).collect();
        while let Some(folder) = stack.pop() {
            out.push(folder);
            stack.extend(folder.children.iter().rev().map(|c| c.as_ref()));
        }
        out
    }

    /// All documents in depth-first folder order
    pub fn documents(&self) -> Vec<&DocumentRef> {
        self.folders()
            .into_iter()
            .flat_map(|folder| folder.documents.iter())
            .collect()
    }
}

/// One in-flight move of a document between two folders
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Idempotency key sent along with the persistence call
    pub request_id: Uuid,
    pub document_id: DocumentId,
    pub source_folder_id: FolderId,
    pub target_folder_id: FolderId,
}

impl MoveRequest {
    pub fn new(
        document_id: impl Into<String>,
        source_folder_id: impl Into<String>,
        target_folder_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            document_id: document_id.into(),
            source_folder_id: source_folder_id.into(),
            target_folder_id: target_folder_id.into(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.source_folder_id == self.target_folder_id
    }
}

/// Backend acknowledgement of a persisted move
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveAck {
    pub request_id: Uuid,
    pub document_id: DocumentId,
    pub folder_id: FolderId,
    pub acknowledged_at: DateTime<Utc>,
}

/// Flat folder row as stored by the backend
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: FolderId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<FolderId>,
}

impl FolderRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(str::to_string),
        }
    }
}

/// Flat wire form of the tree: folder rows plus document placements
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TreeSnapshot {
    #[serde(default)]
    pub folders: Vec<FolderRecord>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
}

/// Generic API result for UI commands
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
}

impl ApiResult {
    /// Create a successful result
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Create a success result naming where a document now lives
    pub fn with_placement(document_id: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            success: true,
            document_id: Some(document_id.into()),
            folder_id: Some(folder_id.into()),
            ..Default::default()
        }
    }
}

/// Engine configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Regex locating the client code inside a folder name
    pub client_root_pattern: String,
    /// Automatic retries of a failed persist call (at most 1 is honoured)
    pub persist_retry_limit: u8,
    pub persist_timeout_ms: u64,
    /// Audit every optimistic mutation before publishing it
    pub verify_invariants: bool,
    pub log_filter: String,
    pub expand_client_roots_on_load: bool,
}

/// Default client code pattern: `(PF-12345678-1234)` or `(EM-12345678-1234)`
pub const DEFAULT_CLIENT_ROOT_PATTERN: &str = r"\((PF|EM)-\d{8}-\d{4}\)";

impl Default for Config {
    fn default() -> Self {
        Self {
            client_root_pattern: DEFAULT_CLIENT_ROOT_PATTERN.to_string(),
            persist_retry_limit: 1,
            persist_timeout_ms: 10_000,
            verify_invariants: cfg!(debug_assertions),
            log_filter: "info".to_string(),
            expand_client_roots_on_load: true,
        }
    }
}
