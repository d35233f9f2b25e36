//! Commit to index mutation translation.
//!
//! [`translate_commit`] is pure: the same commit always yields the same
//! mutation list, which is what makes replaying a partially applied commit
//! safe. Every mutation maps to exactly one index store call in
//! [`apply_mutation`].

use std::collections::BTreeSet;

use siteindex_core::{
    is_page, item_system_type, parent_folder, AuditEntry, AuditOperation, ChangeKind, Commit,
    CommitId, DependencyEdge, ItemRecord, ItemStates, NavigationOrderSequence, PathChange,
    SiteId, AUDIT_ORIGIN_GIT,
};
use siteindex_storage::{IndexStore, StoreResult};

use crate::TranslationError;

#[derive(Debug, Clone, PartialEq)]
pub enum IndexMutation {
    InsertGitLog {
        site_id: SiteId,
        commit_id: CommitId,
    },
    UpsertItem(ItemRecord),
    UpdateStates {
        site_id: SiteId,
        paths: Vec<String>,
        on: ItemStates,
        off: ItemStates,
    },
    DeleteItem {
        site_id: SiteId,
        path: String,
    },
    MoveItem {
        site_id: SiteId,
        old_path: String,
        new_path: String,
    },
    DeleteSourceDependencies {
        site_id: SiteId,
        source_path: String,
    },
    InsertDependencies(Vec<DependencyEdge>),
    MoveDependency {
        site_id: SiteId,
        old_path: String,
        new_path: String,
    },
    InsertNavigationSequence(NavigationOrderSequence),
    DeleteWorkflow {
        site_id: SiteId,
        path: String,
    },
    CancelPublishWorkflow {
        site_id: SiteId,
        path: String,
    },
    InsertAudit(AuditEntry),
    MarkGitLogAudited {
        site_id: SiteId,
        commit_id: CommitId,
    },
    MarkGitLogProcessed {
        site_id: SiteId,
        commit_id: CommitId,
    },
}

impl IndexMutation {
    /// Name of the store operation this mutation is applied with.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::InsertGitLog { .. } => "insert_git_log",
            Self::UpsertItem(_) => "upsert_entry",
            Self::UpdateStates { .. } => "update_states_by_site_and_path_bulk",
            Self::DeleteItem { .. } => "delete_by_site_and_path",
            Self::MoveItem { .. } => "move_item",
            Self::DeleteSourceDependencies { .. } => "delete_all_source_dependencies",
            Self::InsertDependencies(_) => "insert_dependencies",
            Self::MoveDependency { .. } => "move_dependency",
            Self::InsertNavigationSequence(_) => "insert_navigation_order_sequence",
            Self::DeleteWorkflow { .. } => "delete_workflow_entry",
            Self::CancelPublishWorkflow { .. } => "cancel_workflow",
            Self::InsertAudit(_) => "insert_audit_log",
            Self::MarkGitLogAudited { .. } => "mark_git_log_audited",
            Self::MarkGitLogProcessed { .. } => "mark_git_log_processed",
        }
    }
}

pub fn translate_commit(
    site_id: &SiteId,
    commit: &Commit,
) -> Result<Vec<IndexMutation>, TranslationError> {
    let mut out = vec![IndexMutation::InsertGitLog {
        site_id: site_id.clone(),
        commit_id: commit.id.clone(),
    }];

    for change in &commit.changes {
        validate_path(&change.path)?;
        match &change.kind {
            ChangeKind::Added => {
                write_item(&mut out, site_id, commit, change, ItemStates::NEW);
                if is_page(&change.path) {
                    if let Some(folder) = parent_folder(&change.path) {
                        out.push(IndexMutation::InsertNavigationSequence(
                            NavigationOrderSequence::for_folder(site_id, folder),
                        ));
                    }
                }
                out.push(audit(site_id, commit, &change.path, AuditOperation::Create));
            }
            ChangeKind::Modified => {
                write_item(&mut out, site_id, commit, change, ItemStates::MODIFIED);
                out.push(audit(site_id, commit, &change.path, AuditOperation::Update));
            }
            ChangeKind::Deleted => {
                let path = change.path.clone();
                out.push(IndexMutation::DeleteItem {
                    site_id: site_id.clone(),
                    path: path.clone(),
                });
                out.push(IndexMutation::DeleteSourceDependencies {
                    site_id: site_id.clone(),
                    source_path: path.clone(),
                });
                out.push(IndexMutation::DeleteWorkflow {
                    site_id: site_id.clone(),
                    path: path.clone(),
                });
                out.push(IndexMutation::CancelPublishWorkflow {
                    site_id: site_id.clone(),
                    path,
                });
                out.push(audit(site_id, commit, &change.path, AuditOperation::Delete));
            }
            ChangeKind::Renamed { from } => {
                validate_path(from)?;
                out.push(IndexMutation::MoveItem {
                    site_id: site_id.clone(),
                    old_path: from.clone(),
                    new_path: change.path.clone(),
                });
                out.push(IndexMutation::MoveDependency {
                    site_id: site_id.clone(),
                    old_path: from.clone(),
                    new_path: change.path.clone(),
                });
                out.push(IndexMutation::DeleteWorkflow {
                    site_id: site_id.clone(),
                    path: from.clone(),
                });
                write_item(&mut out, site_id, commit, change, ItemStates::MODIFIED);
                out.push(audit(site_id, commit, &change.path, AuditOperation::Move));
            }
            ChangeKind::Unsupported { status } => {
                return Err(TranslationError::UnsupportedChange {
                    path: change.path.clone(),
                    status: status.clone(),
                });
            }
        }
    }

    out.push(IndexMutation::MarkGitLogAudited {
        site_id: site_id.clone(),
        commit_id: commit.id.clone(),
    });
    out.push(IndexMutation::MarkGitLogProcessed {
        site_id: site_id.clone(),
        commit_id: commit.id.clone(),
    });
    Ok(out)
}

/// Item row, state bits and outgoing dependency edges for a written path.
fn write_item(
    out: &mut Vec<IndexMutation>,
    site_id: &SiteId,
    commit: &Commit,
    change: &PathChange,
    on: ItemStates,
) {
    out.push(IndexMutation::UpsertItem(ItemRecord::from_commit(
        site_id,
        &change.path,
        commit,
    )));
    out.push(IndexMutation::UpdateStates {
        site_id: site_id.clone(),
        paths: vec![change.path.clone()],
        on,
        off: ItemStates::DELETED,
    });
    out.push(IndexMutation::DeleteSourceDependencies {
        site_id: site_id.clone(),
        source_path: change.path.clone(),
    });

    let targets: BTreeSet<&str> = change
        .references
        .iter()
        .map(String::as_str)
        .filter(|target| *target != change.path && validate_path(target).is_ok())
        .collect();
    if !targets.is_empty() {
        out.push(IndexMutation::InsertDependencies(
            targets
                .into_iter()
                .map(|target| DependencyEdge::new(site_id, &change.path, target))
                .collect(),
        ));
    }
}

fn audit(site_id: &SiteId, commit: &Commit, path: &str, operation: AuditOperation) -> IndexMutation {
    IndexMutation::InsertAudit(AuditEntry {
        site_id: site_id.clone(),
        operation,
        actor: commit.author.clone(),
        target_path: path.to_string(),
        target_type: item_system_type(path).to_string(),
        origin: AUDIT_ORIGIN_GIT.to_string(),
        commit_id: Some(commit.id.clone()),
        performed_at: commit.timestamp,
    })
}

pub fn validate_path(path: &str) -> Result<(), TranslationError> {
    let malformed = |reason| TranslationError::MalformedPath {
        path: path.to_string(),
        reason,
    };
    let Some(rest) = path.strip_prefix('/') else {
        return Err(malformed("not absolute"));
    };
    if rest.is_empty() || rest.ends_with('/') {
        return Err(malformed("trailing slash"));
    }
    if path.chars().any(char::is_control) {
        return Err(malformed("control character"));
    }
    for segment in rest.split('/') {
        match segment {
            "" => return Err(malformed("empty segment")),
            "." | ".." => return Err(malformed("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

pub async fn apply_mutation<S>(store: &S, mutation: &IndexMutation) -> StoreResult<()>
where
    S: IndexStore + ?Sized,
{
    match mutation {
        IndexMutation::InsertGitLog { site_id, commit_id } => {
            store.insert_git_log(site_id, commit_id, false, false).await
        }
        IndexMutation::UpsertItem(item) => store.upsert_entry(item).await,
        IndexMutation::UpdateStates {
            site_id,
            paths,
            on,
            off,
        } => {
            store
                .update_states_by_site_and_path_bulk(site_id, paths, *on, *off)
                .await
        }
        IndexMutation::DeleteItem { site_id, path } => {
            store.delete_by_site_and_path(site_id, path).await
        }
        IndexMutation::MoveItem {
            site_id,
            old_path,
            new_path,
        } => store.move_item(site_id, old_path, new_path).await,
        IndexMutation::DeleteSourceDependencies {
            site_id,
            source_path,
        } => store.delete_all_source_dependencies(site_id, source_path).await,
        IndexMutation::InsertDependencies(edges) => store.insert_dependencies(edges).await,
        IndexMutation::MoveDependency {
            site_id,
            old_path,
            new_path,
        } => store.move_dependency(site_id, old_path, new_path).await,
        IndexMutation::InsertNavigationSequence(sequence) => {
            store.insert_navigation_order_sequence(sequence).await
        }
        IndexMutation::DeleteWorkflow { site_id, path } => {
            store.delete_workflow_entry(site_id, path).await
        }
        IndexMutation::CancelPublishWorkflow { site_id, path } => {
            store.cancel_workflow(site_id, path).await
        }
        IndexMutation::InsertAudit(entry) => store.insert_audit_log(entry).await.map(|_| ()),
        IndexMutation::MarkGitLogAudited { site_id, commit_id } => {
            store.mark_git_log_audited(site_id, commit_id).await
        }
        IndexMutation::MarkGitLogProcessed { site_id, commit_id } => {
            store.mark_git_log_processed(site_id, commit_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use siteindex_storage::MemoryIndexStore;

    fn commit(changes: Vec<PathChange>) -> Commit {
        Commit {
            id: CommitId::new("8d1e0c4"),
            author: "rosa".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single().unwrap(),
            message: "edit".into(),
            changes,
            audited: false,
            processed: false,
        }
    }

    fn ops(mutations: &[IndexMutation]) -> Vec<&'static str> {
        mutations.iter().map(IndexMutation::op_name).collect()
    }

    #[test]
    fn added_page_writes_item_edges_navigation_and_audit() {
        let site = SiteId::new("blog");
        let change = PathChange::added("/site/website/about/index.xml").with_references(vec![
            "/site/components/header.xml".into(),
            "/site/components/header.xml".into(),
            "/site/website/about/index.xml".into(),
        ]);
        let mutations = translate_commit(&site, &commit(vec![change])).unwrap();

        assert_eq!(
            ops(&mutations),
            [
                "insert_git_log",
                "upsert_entry",
                "update_states_by_site_and_path_bulk",
                "delete_all_source_dependencies",
                "insert_dependencies",
                "insert_navigation_order_sequence",
                "insert_audit_log",
                "mark_git_log_audited",
                "mark_git_log_processed",
            ]
        );
        let IndexMutation::InsertDependencies(edges) = &mutations[4] else {
            panic!("expected dependency insert");
        };
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_path, "/site/components/header.xml");
        let IndexMutation::InsertNavigationSequence(nav) = &mutations[5] else {
            panic!("expected navigation sequence");
        };
        assert_eq!(nav.path, "/site/website/about");
        let IndexMutation::InsertAudit(entry) = &mutations[6] else {
            panic!("expected audit entry");
        };
        assert_eq!(entry.operation, AuditOperation::Create);
        assert_eq!(entry.origin, "GIT");
        assert_eq!(entry.performed_at, commit(vec![]).timestamp);
    }

    #[test]
    fn deletion_clears_item_edges_and_workflow() {
        let site = SiteId::new("blog");
        let mutations =
            translate_commit(&site, &commit(vec![PathChange::deleted("/static-assets/a.css")]))
                .unwrap();
        assert_eq!(
            ops(&mutations)[1..6],
            [
                "delete_by_site_and_path",
                "delete_all_source_dependencies",
                "delete_workflow_entry",
                "cancel_workflow",
                "insert_audit_log",
            ]
        );
    }

    #[test]
    fn rename_moves_before_rewriting() {
        let site = SiteId::new("blog");
        let mutations = translate_commit(
            &site,
            &commit(vec![PathChange::renamed(
                "/site/components/old.xml",
                "/site/components/new.xml",
            )]),
        )
        .unwrap();
        assert_eq!(
            ops(&mutations)[1..4],
            ["move_item", "move_dependency", "delete_workflow_entry"]
        );
        let IndexMutation::UpdateStates { on, .. } = &mutations[5] else {
            panic!("expected state update");
        };
        assert_eq!(*on, ItemStates::MODIFIED);
    }

    #[test]
    fn translation_is_deterministic() {
        let site = SiteId::new("blog");
        let c = commit(vec![
            PathChange::added("/site/website/index.xml"),
            PathChange::modified("/templates/web/page.ftl"),
        ]);
        assert_eq!(translate_commit(&site, &c), translate_commit(&site, &c));
    }

    #[test]
    fn malformed_and_unsupported_changes_fail() {
        let site = SiteId::new("blog");
        for path in ["site/x.xml", "/site/", "/site//x.xml", "/site/../x.xml", "/site/a\u{7}.xml"] {
            let err = translate_commit(&site, &commit(vec![PathChange::modified(path)])).unwrap_err();
            assert!(matches!(err, TranslationError::MalformedPath { .. }), "{path}");
        }

        let unsupported = PathChange {
            path: "/site/x.xml".into(),
            kind: ChangeKind::Unsupported {
                status: "Conflicted".into(),
            },
            references: Vec::new(),
        };
        let err = translate_commit(&site, &commit(vec![unsupported])).unwrap_err();
        assert!(matches!(err, TranslationError::UnsupportedChange { .. }));
    }

    #[tokio::test]
    async fn each_mutation_is_one_store_call() {
        let store = MemoryIndexStore::new();
        let site = SiteId::new("blog");
        let mutations = translate_commit(
            &site,
            &commit(vec![
                PathChange::added("/site/website/index.xml")
                    .with_references(vec!["/static-assets/logo.png".into()]),
                PathChange::deleted("/scripts/old.groovy"),
            ]),
        )
        .unwrap();

        for mutation in &mutations {
            apply_mutation(&store, mutation).await.unwrap();
        }

        assert_eq!(store.mutation_count().await, mutations.len());
        let snapshot = store.snapshot().await;
        let item = &snapshot.items[&(site.clone(), "/site/website/index.xml".to_string())];
        assert!(item.states.contains(ItemStates::NEW));
        assert_eq!(snapshot.dependencies.len(), 1);
        assert_eq!(snapshot.audit.len(), 2);
        let log = &snapshot.git_log[&(site, CommitId::new("8d1e0c4"))];
        assert!(log.processed && log.audited);
    }
}
