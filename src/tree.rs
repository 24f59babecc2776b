use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;

use crate::error::{MoveError, MoveResult};
use crate::models::{DocumentRef, FolderId, FolderNode, FolderRecord, Forest, TreeSnapshot, DEFAULT_CLIENT_ROOT_PATTERN};

/// Recognizes client-root folders by the client code embedded in their name.
#[derive(Debug, Clone)]
pub struct ClientRootMatcher {
    pattern: Regex,
}

impl ClientRootMatcher {
    /// Compiles a matcher from a regex pattern.
    ///
    /// # Returns
    /// * `Ok(ClientRootMatcher)` - The compiled matcher
    /// * `Err(String)` - If the pattern is not a valid regex
    pub fn new(pattern: &str) -> Result<Self, String> {
        let pattern = Regex::new(pattern)
            .map_err(|e| format!("Invalid client root pattern '{}': {}", pattern, e))?;
        Ok(Self { pattern })
    }

    pub fn is_client_root(&self, folder: &FolderNode) -> bool {
        self.pattern.is_match(&folder.name)
    }
}

impl Default for ClientRootMatcher {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_CLIENT_ROOT_PATTERN).expect("default client root pattern compiles"),
        }
    }
}

/// Depth-first search for a folder anywhere in the forest.
pub fn find_folder_by_id<'a>(forest: &'a Forest, id: &str) -> Option<&'a FolderNode> {
    find_in(&forest.roots, &|folder: &FolderNode| folder.id == id)
}

/// Depth-first search for the folder whose `children` contains `child_id`.
///
/// Roots have no parent, so this returns `None` for them.
pub fn find_parent_of<'a>(forest: &'a Forest, child_id: &str) -> Option<&'a FolderNode> {
    find_in(&forest.roots, &|folder: &FolderNode| {
        folder.children.iter().any(|child| child.id == child_id)
    })
}

fn find_in<'a, P>(nodes: &'a [Arc<FolderNode>], predicate: &P) -> Option<&'a FolderNode>
where
    P: Fn(&FolderNode) -> bool,
{
    let mut stack: Vec<&FolderNode> = nodes.iter().rev().map(|n| n.as_ref()).collect();
    while let Some(node) = stack.pop() {
        if predicate(node) {
            return Some(node);
        }
        stack.extend(node.children.iter().rev().map(|c| c.as_ref()));
    }
    None
}

/// Locates the folder currently holding `document_id`.
pub fn find_document<'a>(forest: &'a Forest, document_id: &str) -> Option<(&'a FolderNode, &'a DocumentRef)> {
    forest.folders().into_iter().find_map(|folder| {
        folder
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .map(|document| (folder, document))
    })
}

/// Walks upward from `start_id` and returns the first folder whose name
/// carries a client code, starting with the folder itself.
///
/// Returns `None` when `start_id` is unknown or no ancestor matches.
pub fn find_client_root<'a>(
    forest: &'a Forest,
    start_id: &str,
    matcher: &ClientRootMatcher,
) -> Option<&'a FolderNode> {
    let mut current = find_folder_by_id(forest, start_id)?;
    loop {
        if matcher.is_client_root(current) {
            return Some(current);
        }
        current = find_parent_of(forest, &current.id)?;
    }
}

/// The client root followed by its direct children.
///
/// The first entry is the container itself; move dialogs only offer the
/// remaining entries as destinations.
pub fn collect_client_folders(client_root: &FolderNode) -> Vec<&FolderNode> {
    std::iter::once(client_root)
        .chain(client_root.children.iter().map(|child| child.as_ref()))
        .collect()
}

/// Ids of the ancestors of `id`, root first, excluding the folder itself.
pub fn ancestor_ids(forest: &Forest, id: &str) -> Option<Vec<FolderId>> {
    let mut path = Vec::new();
    if path_to(&forest.roots, id, &mut path) {
        path.pop();
        Some(path)
    } else {
        None
    }
}

fn path_to(nodes: &[Arc<FolderNode>], id: &str, path: &mut Vec<FolderId>) -> bool {
    for node in nodes {
        path.push(node.id.clone());
        if node.id == id || path_to(&node.children, id, path) {
            return true;
        }
        path.pop();
    }
    false
}

/// Builds the nested forest from a flat backend snapshot.
///
/// Sibling order follows snapshot order. A folder whose parent is missing
/// from the snapshot is promoted to a root.
pub fn build_forest(snapshot: &TreeSnapshot) -> MoveResult<Forest> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(snapshot.folders.len());
    for (i, record) in snapshot.folders.iter().enumerate() {
        if index.insert(record.id.as_str(), i).is_some() {
            return Err(MoveError::InvariantViolation(format!(
                "folder '{}' appears more than once in the snapshot",
                record.id
            )));
        }
    }

    let mut roots = Vec::new();
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, record) in snapshot.folders.iter().enumerate() {
        match record.parent_id.as_deref() {
            Some(parent) if index.contains_key(parent) => {
                children.entry(parent).or_default().push(i);
            }
            Some(parent) => {
                log::warn!(
                    "Folder '{}' references unknown parent '{}', treating it as a root",
                    record.id,
                    parent
                );
                roots.push(i);
            }
            None => roots.push(i),
        }
    }

    let mut documents: HashMap<&str, Vec<DocumentRef>> = HashMap::new();
    let mut seen_documents = HashSet::new();
    for document in &snapshot.documents {
        if !index.contains_key(document.folder_id.as_str()) {
            return Err(MoveError::FolderNotFound(document.folder_id.clone()));
        }
        if !seen_documents.insert(document.id.as_str()) {
            return Err(MoveError::InvariantViolation(format!(
                "document '{}' is placed in more than one folder",
                document.id
            )));
        }
        documents
            .entry(document.folder_id.as_str())
            .or_default()
            .push(document.clone());
    }

    let mut builder = ForestBuilder {
        records: &snapshot.folders,
        children: &children,
        documents: &mut documents,
        built: 0,
    };
    let forest = Forest {
        roots: roots
            .into_iter()
            .map(|i| builder.build(i).map(Arc::new))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| MoveError::InvariantViolation("folder tree could not be assembled".to_string()))?,
    };

    // Folders only reachable through a parent cycle are never visited.
    if builder.built != snapshot.folders.len() {
        return Err(MoveError::InvariantViolation(format!(
            "{} folder(s) form a parent cycle",
            snapshot.folders.len() - builder.built
        )));
    }

    Ok(forest)
}

struct ForestBuilder<'s, 'm> {
    records: &'s [FolderRecord],
    children: &'m HashMap<&'s str, Vec<usize>>,
    documents: &'m mut HashMap<&'s str, Vec<DocumentRef>>,
    built: usize,
}

impl<'s, 'm> ForestBuilder<'s, 'm> {
    /// Builds the subtree under `root` bottom-up, without recursion.
    fn build(&mut self, root: usize) -> Option<FolderNode> {
        let records = self.records;

        // Pre-order: every folder comes after its parent.
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            order.push(i);
            if let Some(children) = self.children.get(records[i].id.as_str()) {
                stack.extend(children.iter().copied());
            }
        }
        self.built += order.len();

        let mut finished: HashMap<usize, FolderNode> = HashMap::with_capacity(order.len());
        for &i in order.iter().rev() {
            let record = &records[i];
            let children = match self.children.get(record.id.as_str()) {
                Some(indices) => indices
                    .iter()
                    .filter_map(|c| finished.remove(c))
                    .map(Arc::new)
                    .collect(),
                None => Vec::new(),
            };
            let node = FolderNode {
                id: record.id.clone(),
                name: record.name.clone(),
                parent_id: if i == root { None } else { record.parent_id.clone() },
                children,
                documents: self.documents.remove(record.id.as_str()).unwrap_or_default(),
            };
            finished.insert(i, node);
        }
        finished.remove(&root)
    }
}

/// Checks the structural invariants of a forest:
/// unique folder ids, `parent_id` naming the containing folder, and every
/// document placed exactly once with a matching `folder_id`.
pub fn audit_forest(forest: &Forest) -> MoveResult<()> {
    let mut folder_ids = HashSet::new();
    let mut document_ids = HashSet::new();
    let mut stack: Vec<(&FolderNode, Option<&str>)> =
        forest.roots.iter().map(|r| (r.as_ref(), None)).collect();

    while let Some((folder, expected_parent)) = stack.pop() {
        if !folder_ids.insert(folder.id.as_str()) {
            return Err(MoveError::InvariantViolation(format!(
                "folder '{}' appears more than once",
                folder.id
            )));
        }
        if folder.parent_id.as_deref() != expected_parent {
            return Err(MoveError::InvariantViolation(format!(
                "folder '{}' records parent {:?} but sits under {:?}",
                folder.id, folder.parent_id, expected_parent
            )));
        }
        for document in &folder.documents {
            if document.folder_id != folder.id {
                return Err(MoveError::InvariantViolation(format!(
                    "document '{}' records folder '{}' but sits in '{}'",
                    document.id, document.folder_id, folder.id
                )));
            }
            if !document_ids.insert(document.id.as_str()) {
                return Err(MoveError::InvariantViolation(format!(
                    "document '{}' is placed in more than one folder",
                    document.id
                )));
            }
        }
        stack.extend(folder.children.iter().map(|c| (c.as_ref(), Some(folder.id.as_str()))));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{acme_forest, forest_strategy, two_client_forest};
    use proptest::prelude::*;

    #[test]
    fn test_find_folder_by_id_nested() {
        let forest = acme_forest();
        let contracts = find_folder_by_id(&forest, "contracts").unwrap();
        assert_eq!(contracts.name, "Contracts");
        assert!(find_folder_by_id(&forest, "missing").is_none());
    }

    #[test]
    fn test_find_parent_of_root_is_none() {
        let forest = acme_forest();
        assert!(find_parent_of(&forest, "acme").is_none());
        assert_eq!(find_parent_of(&forest, "invoices").unwrap().id, "acme");
    }

    #[test]
    fn test_matcher_accepts_both_client_kinds() {
        let matcher = ClientRootMatcher::default();
        assert!(matcher.is_client_root(&FolderNode::new("a", "Acme Corp (EM-20230101-0001)")));
        assert!(matcher.is_client_root(&FolderNode::new("b", "(PF-12345678-9999) Jane")));
        assert!(!matcher.is_client_root(&FolderNode::new("c", "Acme Corp (XX-20230101-0001)")));
        assert!(!matcher.is_client_root(&FolderNode::new("d", "Acme Corp (EM-2023010-0001)")));
        assert!(!matcher.is_client_root(&FolderNode::new("e", "EM-20230101-0001")));
    }

    #[test]
    fn test_matcher_rejects_invalid_pattern() {
        let result = ClientRootMatcher::new("(unclosed");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("(unclosed"));
    }

    #[test]
    fn test_find_client_root_from_deep_descendant() {
        let forest = acme_forest();
        let matcher = ClientRootMatcher::default();

        let root = find_client_root(&forest, "signed", &matcher).unwrap();
        assert_eq!(root.id, "acme");
        let root = find_client_root(&forest, "acme", &matcher).unwrap();
        assert_eq!(root.id, "acme");
    }

    #[test]
    fn test_find_client_root_orphan_is_none() {
        let forest = acme_forest();
        let matcher = ClientRootMatcher::default();
        assert!(find_client_root(&forest, "scratch", &matcher).is_none());
        assert!(find_client_root(&forest, "missing", &matcher).is_none());
    }

    #[test]
    fn test_collect_client_folders_scenario() {
        let forest = acme_forest();
        let acme = find_folder_by_id(&forest, "acme").unwrap();
        let names: Vec<&str> = collect_client_folders(acme).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Acme Corp (EM-20230101-0001)", "Contracts", "Invoices"]);
    }

    #[test]
    fn test_client_scoping_between_two_clients() {
        let forest = two_client_forest();
        let matcher = ClientRootMatcher::default();

        for (client, folders) in [
            ("client-a", ["a-docs", "a-docs-old", "a-misc"].as_slice()),
            ("client-b", ["b-docs", "b-misc"].as_slice()),
        ] {
            for id in folders {
                assert_eq!(find_client_root(&forest, id, &matcher).unwrap().id, client);
            }
        }

        let ids = |client: &str| -> Vec<String> {
            let root = find_folder_by_id(&forest, client).unwrap();
            collect_client_folders(root).iter().map(|f| f.id.clone()).collect()
        };
        assert_eq!(ids("client-a"), vec!["client-a", "a-docs", "a-misc"]);
        assert_eq!(ids("client-b"), vec!["client-b", "b-docs", "b-misc"]);
    }

    #[test]
    fn test_find_document() {
        let forest = acme_forest();
        let (folder, document) = find_document(&forest, "d1").unwrap();
        assert_eq!(folder.id, "contracts");
        assert_eq!(document.title, "Master Agreement");
        assert!(find_document(&forest, "nope").is_none());
    }

    #[test]
    fn test_ancestor_ids_root_first() {
        let forest = acme_forest();
        assert_eq!(
            ancestor_ids(&forest, "signed"),
            Some(vec!["acme".to_string(), "contracts".to_string()])
        );
        assert_eq!(ancestor_ids(&forest, "acme"), Some(vec![]));
        assert_eq!(ancestor_ids(&forest, "missing"), None);
    }

    #[test]
    fn test_build_forest_nests_in_snapshot_order() {
        let snapshot = TreeSnapshot {
            folders: vec![
                FolderRecord::new("b", "B", Some("root")),
                FolderRecord::new("root", "Root", None),
                FolderRecord::new("a", "A", Some("root")),
            ],
            documents: vec![DocumentRef::new("d1", "Doc", "a")],
        };

        let forest = build_forest(&snapshot).unwrap();
        assert_eq!(forest.roots.len(), 1);
        let ids: Vec<&str> = forest.roots[0].children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(forest.roots[0].children[1].documents[0].id, "d1");
        assert!(audit_forest(&forest).is_ok());
    }

    #[test]
    fn test_build_forest_promotes_orphans() {
        let snapshot = TreeSnapshot {
            folders: vec![FolderRecord::new("lost", "Lost", Some("gone"))],
            documents: vec![],
        };
        let forest = build_forest(&snapshot).unwrap();
        assert_eq!(forest.roots[0].id, "lost");
        assert!(forest.roots[0].parent_id.is_none());
    }

    #[test]
    fn test_build_forest_rejects_bad_snapshots() {
        let unknown_folder = TreeSnapshot {
            folders: vec![FolderRecord::new("a", "A", None)],
            documents: vec![DocumentRef::new("d", "Doc", "zzz")],
        };
        assert_eq!(
            build_forest(&unknown_folder),
            Err(MoveError::FolderNotFound("zzz".to_string()))
        );

        let duplicate_document = TreeSnapshot {
            folders: vec![FolderRecord::new("a", "A", None), FolderRecord::new("b", "B", None)],
            documents: vec![DocumentRef::new("d", "Doc", "a"), DocumentRef::new("d", "Doc", "b")],
        };
        assert!(matches!(
            build_forest(&duplicate_document),
            Err(MoveError::InvariantViolation(_))
        ));

        let cycle = TreeSnapshot {
            folders: vec![
                FolderRecord::new("root", "Root", None),
                FolderRecord::new("x", "X", Some("y")),
                FolderRecord::new("y", "Y", Some("x")),
            ],
            documents: vec![],
        };
        assert!(matches!(build_forest(&cycle), Err(MoveError::InvariantViolation(_))));
    }

    #[test]
    fn test_build_and_search_deep_chain() {
        let depth = 1_000;
        let folders = (0..depth)
            .map(|i| {
                let parent = if i == 0 { None } else { Some(format!("f{}", i - 1)) };
                FolderRecord {
                    id: format!("f{}", i),
                    name: format!("Level {}", i),
                    parent_id: parent,
                }
            })
            .collect();
        let snapshot = TreeSnapshot {
            folders,
            documents: vec![DocumentRef::new("deep", "Deep", format!("f{}", depth - 1))],
        };

        let forest = build_forest(&snapshot).unwrap();
        let leaf = format!("f{}", depth - 1);
        assert_eq!(find_folder_by_id(&forest, &leaf).unwrap().documents[0].id, "deep");
        assert_eq!(find_parent_of(&forest, &leaf).unwrap().id, format!("f{}", depth - 2));
        assert_eq!(find_document(&forest, "deep").unwrap().0.id, leaf);
    }

    #[test]
    fn test_audit_detects_stale_folder_id() {
        let mut contracts = FolderNode::new("contracts", "Contracts").with_document("d1", "Doc");
        contracts.documents[0].folder_id = "elsewhere".to_string();
        let forest = Forest::new(vec![FolderNode::new("acme", "Acme").with_child(contracts)]);

        assert!(matches!(audit_forest(&forest), Err(MoveError::InvariantViolation(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// **Property: Round-trip search**
        ///
        /// For every folder, looking it up by id and then asking for the
        /// parent of each of its children yields the same folder.
        #[test]
        fn prop_find_then_parent_round_trip(forest in forest_strategy()) {
            for folder in forest.folders() {
                let found = find_folder_by_id(&forest, &folder.id).unwrap();
                prop_assert_eq!(&found.id, &folder.id);
                for child in &found.children {
                    let parent = find_parent_of(&forest, &child.id).unwrap();
                    prop_assert_eq!(&parent.id, &folder.id);
                }
            }
        }

        /// **Property: Client root is the nearest matching ancestor**
        ///
        /// `find_client_root` returns the folder itself or an ancestor, and no
        /// folder in between carries a client code. The working folders of two
        /// different clients never overlap.
        #[test]
        fn prop_client_root_is_nearest_matching_ancestor(forest in forest_strategy()) {
            let matcher = ClientRootMatcher::default();
            for folder in forest.folders() {
                let ancestors = ancestor_ids(&forest, &folder.id).unwrap();
                let mut chain = vec![folder.id.as_str()];
                chain.extend(ancestors.iter().rev().map(String::as_str));
                let nearest = chain
                    .iter()
                    .copied()
                    .find(|id| matcher.is_client_root(find_folder_by_id(&forest, id).unwrap()));

                let found = find_client_root(&forest, &folder.id, &matcher).map(|root| root.id.as_str());
                prop_assert_eq!(found, nearest);
            }

            let roots: Vec<&FolderNode> = forest
                .folders()
                .into_iter()
                .filter(|f| matcher.is_client_root(f))
                .collect();
            let mut owner: HashMap<&str, &str> = HashMap::new();
            for root in &roots {
                for candidate in collect_client_folders(root).into_iter().skip(1) {
                    if let Some(previous) = owner.insert(candidate.id.as_str(), root.id.as_str()) {
                        prop_assert!(false, "'{}' offered by '{}' and '{}'", candidate.id, previous, root.id);
                    }
                    if !matcher.is_client_root(candidate) {
                        let resolved = find_client_root(&forest, &candidate.id, &matcher).unwrap();
                        prop_assert_eq!(&resolved.id, &root.id);
                    }
                }
            }
        }

        /// **Property: Generated forests satisfy the structural audit**
        #[test]
        fn prop_generated_forests_pass_audit(forest in forest_strategy()) {
            prop_assert!(audit_forest(&forest).is_ok());
        }
    }
}
