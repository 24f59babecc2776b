//! Shared trees and generators for unit tests.

use proptest::collection::vec;
use proptest::prelude::*;
use proptest::sample::Index;

use crate::models::{DocumentRef, FolderNode, FolderRecord, Forest, TreeSnapshot};
use crate::tree::build_forest;

/// ```text
/// Acme Corp (EM-20230101-0001)   [acme]
/// ├── Contracts                  [contracts]  d1
/// │   └── Signed                 [signed]     d2
/// └── Invoices                   [invoices]
/// Scratch                        [scratch]    d3
/// ```
pub fn acme_forest() -> Forest {
    Forest::new(vec![
        FolderNode::new("acme", "Acme Corp (EM-20230101-0001)")
            .with_child(
                FolderNode::new("contracts", "Contracts")
                    .with_document("d1", "Master Agreement")
                    .with_child(FolderNode::new("signed", "Signed").with_document("d2", "NDA")),
            )
            .with_child(FolderNode::new("invoices", "Invoices")),
        FolderNode::new("scratch", "Scratch").with_document("d3", "Notes"),
    ])
}

pub fn acme_snapshot() -> TreeSnapshot {
    TreeSnapshot {
        folders: vec![
            FolderRecord::new("acme", "Acme Corp (EM-20230101-0001)", None),
            FolderRecord::new("contracts", "Contracts", Some("acme")),
            FolderRecord::new("signed", "Signed", Some("contracts")),
            FolderRecord::new("invoices", "Invoices", Some("acme")),
            FolderRecord::new("scratch", "Scratch", None),
        ],
        documents: vec![
            DocumentRef::new("d1", "Master Agreement", "contracts"),
            DocumentRef::new("d2", "NDA", "signed"),
            DocumentRef::new("d3", "Notes", "scratch"),
        ],
    }
}

/// Two independent clients with the same inner layout.
pub fn two_client_forest() -> Forest {
    Forest::new(vec![
        FolderNode::new("client-a", "Alpha Ltd (PF-11111111-0001)")
            .with_child(
                FolderNode::new("a-docs", "Documents")
                    .with_document("ad1", "Lease")
                    .with_child(FolderNode::new("a-docs-old", "Archive")),
            )
            .with_child(FolderNode::new("a-misc", "Misc")),
        FolderNode::new("client-b", "Beta Ltd (PF-22222222-0002)")
            .with_child(FolderNode::new("b-docs", "Documents").with_document("bd1", "Deed"))
            .with_child(FolderNode::new("b-misc", "Misc")),
    ])
}

/// Random forests with unique ids. Every fourth folder carries a client code.
pub fn forest_strategy() -> impl Strategy<Value = Forest> {
    (1usize..16).prop_flat_map(|n| {
        (
            vec(proptest::option::of(any::<Index>()), n),
            vec(any::<Index>(), 0..24),
        )
            .prop_map(move |(parents, placements)| {
                let folders = parents
                    .iter()
                    .enumerate()
                    .map(|(i, parent)| {
                        let name = if i % 4 == 0 {
                            format!("Client {} (PF-{:08}-{:04})", i, i, i)
                        } else {
                            format!("Folder {}", i)
                        };
                        let parent_id = match parent {
                            Some(p) if i > 0 => Some(format!("f{}", p.index(i))),
                            _ => None,
                        };
                        FolderRecord {
                            id: format!("f{}", i),
                            name,
                            parent_id,
                        }
                    })
                    .collect();
                let documents = placements
                    .iter()
                    .enumerate()
                    .map(|(j, folder)| {
                        DocumentRef::new(format!("d{}", j), format!("Document {}", j), format!("f{}", folder.index(n)))
                    })
                    .collect();
                build_forest(&TreeSnapshot { folders, documents }).expect("generated snapshot is valid")
            })
    })
}
