use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{MoveError, MoveResult};
use crate::models::{FolderId, FolderNode, Forest};
use crate::tree::{ancestor_ids, find_folder_by_id, ClientRootMatcher};

/// Expand/collapse set and selected folder for the folder sidebar.
///
/// Holds ids only, so it survives a tree being replaced by a fresh snapshot;
/// call [`NavigationState::retain_existing`] afterwards to drop ids that
/// disappeared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationState {
    pub expanded_folder_ids: HashSet<FolderId>,
    pub selected_folder_id: Option<FolderId>,
}

/// One row of the projected sidebar
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleFolder {
    pub id: FolderId,
    pub name: String,
    pub depth: usize,
    pub is_last: bool,
    pub is_expanded: bool,
    pub is_selected: bool,
    pub has_children: bool,
    pub document_count: usize,
    pub total_documents: usize,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, folder_id: &str) -> bool {
        self.expanded_folder_ids.contains(folder_id)
    }

    pub fn expand(&mut self, folder_id: &str) {
        self.expanded_folder_ids.insert(folder_id.to_string());
    }

    pub fn collapse(&mut self, folder_id: &str) {
        self.expanded_folder_ids.remove(folder_id);
    }

    /// Flips the expansion of a folder and returns whether it is now expanded.
    pub fn toggle(&mut self, folder_id: &str) -> bool {
        if self.expanded_folder_ids.remove(folder_id) {
            false
        } else {
            self.expanded_folder_ids.insert(folder_id.to_string());
            true
        }
    }

    pub fn expand_all(&mut self, forest: &Forest) {
        for folder in forest.folders() {
            if !folder.children.is_empty() {
                self.expanded_folder_ids.insert(folder.id.clone());
            }
        }
    }

    pub fn collapse_all(&mut self) {
        self.expanded_folder_ids.clear();
    }

    /// Expands every client root so its working folders are visible.
    pub fn expand_client_roots(&mut self, forest: &Forest, matcher: &ClientRootMatcher) {
        for folder in forest.folders() {
            if matcher.is_client_root(folder) {
                self.expanded_folder_ids.insert(folder.id.clone());
            }
        }
    }

    /// Selects a folder and expands its ancestors so the selection is visible.
    pub fn select(&mut self, forest: &Forest, folder_id: &str) -> MoveResult<()> {
        let ancestors =
            ancestor_ids(forest, folder_id).ok_or_else(|| MoveError::FolderNotFound(folder_id.to_string()))?;
        self.expanded_folder_ids.extend(ancestors);
        self.selected_folder_id = Some(folder_id.to_string());
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected_folder_id = None;
    }

    /// Drops expanded and selected ids that are no longer in `forest`.
    pub fn retain_existing(&mut self, forest: &Forest) {
        let present: HashSet<&str> = forest.folders().iter().map(|f| f.id.as_str()).collect();
        self.expanded_folder_ids.retain(|id| present.contains(id.as_str()));
        if let Some(selected) = &self.selected_folder_id {
            if !present.contains(selected.as_str()) {
                log::debug!("Selected folder '{}' vanished from the tree", selected);
                self.selected_folder_id = None;
            }
        }
    }

    /// The selected folder, if it still exists in `forest`.
    pub fn selected_folder<'a>(&self, forest: &'a Forest) -> Option<&'a FolderNode> {
        self.selected_folder_id
            .as_deref()
            .and_then(|id| find_folder_by_id(forest, id))
    }

    /// Flattens the visible part of the forest into sidebar rows.
    ///
    /// Children of a collapsed folder are skipped along with their subtree.
    pub fn visible_folders(&self, forest: &Forest) -> Vec<VisibleFolder> {
        let mut rows = Vec::new();
        self.project(&forest.roots, 0, &mut rows);
        rows
    }

    fn project(&self, nodes: &[Arc<FolderNode>], depth: usize, rows: &mut Vec<VisibleFolder>) {
        let len = nodes.len();
        for (i, node) in nodes.iter().enumerate() {
            let is_expanded = self.is_expanded(&node.id);
            rows.push(VisibleFolder {
                id: node.id.clone(),
                name: node.name.clone(),
                depth,
                is_last: i + 1 == len,
                is_expanded,
                is_selected: self.selected_folder_id.as_deref() == Some(node.id.as_str()),
                has_children: !node.children.is_empty(),
                document_count: node.document_count(),
                total_documents: node.total_documents(),
            });
            if is_expanded {
                self.project(&node.children, depth + 1, rows);
            }
        }
    }
}
