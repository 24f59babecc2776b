use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{MoveError, MoveResult};
use crate::models::{DocumentId, DocumentRef, FolderId, FolderNode, Forest, MoveRequest};
use crate::tree::{audit_forest, find_folder_by_id};

/// Replaces the folder `folder_id` with `f(folder)` and returns the new forest.
///
/// Every ancestor on the path to the root is rebuilt; all other subtrees are
/// shared with `forest` by pointer.
pub fn apply_to_folder<F>(forest: &Forest, folder_id: &str, f: F) -> MoveResult<Forest>
where
    F: FnOnce(&FolderNode) -> FolderNode,
{
    update_folder(forest, folder_id, |folder| Ok((f(folder), ()))).map(|(forest, ())| forest)
}

/// Fallible form of [`apply_to_folder`] that also hands back a value
/// produced while rewriting the folder.
fn update_folder<T, F>(forest: &Forest, folder_id: &str, f: F) -> MoveResult<(Forest, T)>
where
    F: FnOnce(&FolderNode) -> MoveResult<(FolderNode, T)>,
{
    let path = index_path(&forest.roots, folder_id)
        .ok_or_else(|| MoveError::FolderNotFound(folder_id.to_string()))?;
    let (roots, value) = rebuild_along(&forest.roots, &path, f)?;
    Ok((Forest { roots }, value))
}

/// Child indices leading from the roots down to `id`.
fn index_path(nodes: &[Arc<FolderNode>], id: &str) -> Option<Vec<usize>> {
    let mut path = Vec::new();
    if push_path_reversed(nodes, id, &mut path) {
        path.reverse();
        Some(path)
    } else {
        None
    }
}

fn push_path_reversed(nodes: &[Arc<FolderNode>], id: &str, path: &mut Vec<usize>) -> bool {
    for (i, node) in nodes.iter().enumerate() {
        if node.id == id || push_path_reversed(&node.children, id, path) {
            path.push(i);
            return true;
        }
    }
    false
}

fn rebuild_along<T, F>(nodes: &[Arc<FolderNode>], path: &[usize], f: F) -> MoveResult<(Vec<Arc<FolderNode>>, T)>
where
    F: FnOnce(&FolderNode) -> MoveResult<(FolderNode, T)>,
{
    let Some((&i, rest)) = path.split_first() else {
        return Err(MoveError::InvariantViolation("empty folder path".to_string()));
    };
    let target = &nodes[i];

    let (replacement, value) = if rest.is_empty() {
        let (replacement, value) = f(target.as_ref())?;
        if replacement.id != target.id {
            return Err(MoveError::InvariantViolation(format!(
                "folder '{}' was replaced by '{}'",
                target.id, replacement.id
            )));
        }
        (replacement, value)
    } else {
        let (children, value) = rebuild_along(&target.children, rest, f)?;
        let mut copy = FolderNode::clone(target);
        copy.children = children;
        (copy, value)
    };

    let mut rebuilt = nodes.to_vec();
    rebuilt[i] = Arc::new(replacement);
    Ok((rebuilt, value))
}

/// Removes `document_id` from the folder `folder_id`.
///
/// # Returns
/// * `Ok((Forest, DocumentRef))` - The new forest and the removed document
/// * `Err(MoveError)` - If the folder is unknown or does not hold the document
pub fn remove_document(forest: &Forest, folder_id: &str, document_id: &str) -> MoveResult<(Forest, DocumentRef)> {
    update_folder(forest, folder_id, |folder| {
        let position = folder
            .documents
            .iter()
            .position(|d| d.id == document_id)
            .ok_or_else(|| MoveError::DocumentNotFound {
                document_id: document_id.to_string(),
                folder_id: folder_id.to_string(),
            })?;
        let mut next = folder.clone();
        let removed = next.documents.remove(position);
        Ok((next, removed))
    })
}

/// Appends `document` to the folder `folder_id`, rewriting its `folder_id`
/// to the destination first.
pub fn insert_document(forest: &Forest, folder_id: &str, mut document: DocumentRef) -> MoveResult<Forest> {
    update_folder(forest, folder_id, move |folder| {
        if folder.contains_document(&document.id) {
            return Err(MoveError::InvariantViolation(format!(
                "document '{}' is already in folder '{}'",
                document.id, folder.id
            )));
        }
        document.folder_id = folder.id.clone();
        let mut next = folder.clone();
        next.documents.push(document);
        Ok((next, ()))
    })
    .map(|(forest, ())| forest)
}

/// Moves a document between folders as a single all-or-nothing step.
///
/// Moving into the source folder returns an equal forest. A document that is
/// not in its claimed source, including a source that no longer exists, is
/// `DocumentNotFound`. On any error the input is left untouched and no
/// intermediate tree escapes.
pub fn move_document(forest: &Forest, request: &MoveRequest) -> MoveResult<Forest> {
    let in_source = find_folder_by_id(forest, &request.source_folder_id)
        .is_some_and(|source| source.contains_document(&request.document_id));
    if !in_source {
        return Err(MoveError::DocumentNotFound {
            document_id: request.document_id.clone(),
            folder_id: request.source_folder_id.clone(),
        });
    }
    if find_folder_by_id(forest, &request.target_folder_id).is_none() {
        return Err(MoveError::FolderNotFound(request.target_folder_id.clone()));
    }
    if request.is_identity() {
        return Ok(forest.clone());
    }

    let (without, document) = remove_document(forest, &request.source_folder_id, &request.document_id)?;
    insert_document(&without, &request.target_folder_id, document)
}

fn placements(forest: &Forest) -> HashMap<&str, Vec<&str>> {
    let mut out: HashMap<&str, Vec<&str>> = HashMap::new();
    for folder in forest.folders() {
        for document in &folder.documents {
            out.entry(document.id.as_str()).or_default().push(folder.id.as_str());
        }
    }
    out
}

/// Post-mutation check that `after` is exactly `before` with the requested
/// document relocated: nothing lost, nothing duplicated.
pub fn verify_move(before: &Forest, after: &Forest, request: &MoveRequest) -> MoveResult<()> {
    audit_forest(after)?;

    let before = placements(before);
    let after = placements(after);
    if before.len() != after.len() {
        return Err(MoveError::InvariantViolation(format!(
            "document count changed from {} to {}",
            before.len(),
            after.len()
        )));
    }
    for document_id in before.keys() {
        match after.get(document_id).map(Vec::as_slice) {
            Some([_]) => {}
            Some(folders) => {
                return Err(MoveError::InvariantViolation(format!(
                    "document '{}' is placed in {} folders",
                    document_id,
                    folders.len()
                )))
            }
            None => {
                return Err(MoveError::InvariantViolation(format!(
                    "document '{}' was lost",
                    document_id
                )))
            }
        }
    }
    match after.get(request.document_id.as_str()).map(Vec::as_slice) {
        Some([folder]) if *folder == request.target_folder_id => Ok(()),
        _ => Err(MoveError::InvariantViolation(format!(
            "document '{}' did not arrive in folder '{}'",
            request.document_id, request.target_folder_id
        ))),
    }
}

/// Difference between where the client believed a document was and where
/// the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlacementDrift {
    Relocated {
        document_id: DocumentId,
        expected: FolderId,
        actual: FolderId,
    },
    Missing {
        document_id: DocumentId,
        expected: FolderId,
    },
    Appeared {
        document_id: DocumentId,
        actual: FolderId,
    },
}

/// Reconciles an optimistic forest with a fresh backend snapshot.
///
/// The fresh snapshot always wins; the returned drift lists, ordered by
/// document id, every placement the optimistic tree got wrong.
pub fn merge_snapshot(optimistic: &Forest, fresh: Forest) -> (Forest, Vec<PlacementDrift>) {
    let drift = placement_drift(optimistic, &fresh);
    for entry in &drift {
        log::warn!("Backend placement differs from optimistic tree: {:?}", entry);
    }
    (fresh, drift)
}

fn placement_drift(optimistic: &Forest, fresh: &Forest) -> Vec<PlacementDrift> {
    let expected: BTreeMap<&str, &str> = optimistic
        .documents()
        .into_iter()
        .map(|d| (d.id.as_str(), d.folder_id.as_str()))
        .collect();
    let actual: BTreeMap<&str, &str> = fresh
        .documents()
        .into_iter()
        .map(|d| (d.id.as_str(), d.folder_id.as_str()))
        .collect();

    let mut drift = Vec::new();
    for (document_id, expected_folder) in &expected {
        match actual.get(document_id) {
            Some(actual_folder) if actual_folder == expected_folder => {}
            Some(actual_folder) => drift.push(PlacementDrift::Relocated {
                document_id: document_id.to_string(),
                expected: expected_folder.to_string(),
                actual: actual_folder.to_string(),
            }),
            None => drift.push(PlacementDrift::Missing {
                document_id: document_id.to_string(),
                expected: expected_folder.to_string(),
            }),
        }
    }
    for (document_id, actual_folder) in &actual {
        if !expected.contains_key(document_id) {
            drift.push(PlacementDrift::Appeared {
                document_id: document_id.to_string(),
                actual: actual_folder.to_string(),
            });
        }
    }
    drift.sort_by(|a, b| drift_key(a).cmp(drift_key(b)));
    drift
}

fn drift_key(drift: &PlacementDrift) -> &str {
    match drift {
        PlacementDrift::Relocated { document_id, .. }
        | PlacementDrift::Missing { document_id, .. }
        | PlacementDrift::Appeared { document_id, .. } => document_id.as_str(),
    }
}
