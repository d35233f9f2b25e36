use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::DateTime;
use git2::{Delta, DiffDelta, DiffFindOptions, ErrorCode, Oid, Repository, Sort, Tree};
use regex::Regex;
use siteindex_core::{ChangeKind, Commit, CommitId, PathChange, SiteId};
use tracing::debug;

use crate::{IdentityMarker, RepoError, RepoResult, RepositoryProvider};

pub const DEFAULT_SITES_REPOS_PATH: &str = "sites";
pub const DEFAULT_SANDBOX_DIR: &str = "sandbox";
pub const DEFAULT_IDENTITY_MARKER: &str = "site.uuid";

/// On-disk arrangement of site repositories:
/// `<repo_base_path>/<sites_repos_path>/<site>/<sandbox_dir>` holds the git
/// repository and `<repo_base_path>/<sites_repos_path>/<site>/<identity_marker>`
/// the identity marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLayout {
    pub repo_base_path: PathBuf,
    pub sites_repos_path: String,
    pub sandbox_dir: String,
    pub identity_marker: String,
}

impl RepositoryLayout {
    pub fn new(repo_base_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_base_path: repo_base_path.into(),
            sites_repos_path: DEFAULT_SITES_REPOS_PATH.to_string(),
            sandbox_dir: DEFAULT_SANDBOX_DIR.to_string(),
            identity_marker: DEFAULT_IDENTITY_MARKER.to_string(),
        }
    }

    pub fn site_root(&self, site_id: &SiteId) -> PathBuf {
        self.repo_base_path
            .join(&self.sites_repos_path)
            .join(site_id.as_str())
    }

    pub fn sandbox_path(&self, site_id: &SiteId) -> PathBuf {
        self.site_root(site_id).join(&self.sandbox_dir)
    }

    pub fn marker_path(&self, site_id: &SiteId) -> PathBuf {
        self.site_root(site_id).join(&self.identity_marker)
    }
}

#[derive(Debug, Clone)]
pub struct GitRepositoryProvider {
    layout: RepositoryLayout,
}

impl GitRepositoryProvider {
    pub fn new(layout: RepositoryLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }
}

#[async_trait]
impl RepositoryProvider for GitRepositoryProvider {
    async fn identity_marker(&self, site_id: &SiteId) -> RepoResult<IdentityMarker> {
        let path = self.layout.marker_path(site_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(IdentityMarker::parse(&text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let root = self.layout.site_root(site_id);
                let root_exists = tokio::fs::try_exists(&root)
                    .await
                    .map_err(|source| RepoError::Io { path: root, source })?;
                if root_exists {
                    Err(RepoError::MarkerMissing(site_id.clone()))
                } else {
                    Err(RepoError::SiteNotFound(site_id.clone()))
                }
            }
            Err(source) => Err(RepoError::Io { path, source }),
        }
    }

    async fn commits_after(
        &self,
        site_id: &SiteId,
        watermark: Option<&CommitId>,
    ) -> RepoResult<Vec<Commit>> {
        let sandbox = self.layout.sandbox_path(site_id);
        let site = site_id.clone();
        let watermark = watermark.cloned();
        let join_path = sandbox.clone();

        let commits = tokio::task::spawn_blocking(move || {
            read_commits(&sandbox, &site, watermark.as_ref())
        })
        .await
        .map_err(|err| RepoError::Io {
            path: join_path,
            source: io::Error::other(err),
        })??;

        debug!(site = %site_id, commits = commits.len(), "read repository log");
        Ok(commits)
    }
}

fn read_commits(
    sandbox: &Path,
    site_id: &SiteId,
    watermark: Option<&CommitId>,
) -> RepoResult<Vec<Commit>> {
    let repo = match Repository::open(sandbox) {
        Ok(repo) => repo,
        Err(err) if err.code() == ErrorCode::NotFound => {
            return Err(RepoError::SiteNotFound(site_id.clone()))
        }
        Err(err) => return Err(err.into()),
    };

    let head = match repo.head() {
        Ok(head) => head.peel_to_commit()?.id(),
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            return Ok(Vec::new())
        }
        Err(err) => return Err(err.into()),
    };

    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    // Each commit is diffed against its first parent, so merges must not
    // also yield the side branch's commits.
    walk.simplify_first_parent()?;
    walk.push(head)?;
    if let Some(watermark) = watermark {
        let oid = resolve_watermark(&repo, head, site_id, watermark)?;
        walk.hide(oid)?;
    }

    let mut commits = Vec::new();
    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        commits.push(to_commit(&repo, &commit)?);
    }
    Ok(commits)
}

/// The watermark must be HEAD or one of its ancestors.
fn resolve_watermark(
    repo: &Repository,
    head: Oid,
    site_id: &SiteId,
    watermark: &CommitId,
) -> RepoResult<Oid> {
    let unknown = || RepoError::UnknownCommit {
        site: site_id.clone(),
        commit: watermark.clone(),
    };
    let oid = Oid::from_str(watermark.as_str()).map_err(|_| unknown())?;
    if repo.find_commit(oid).is_err() {
        return Err(unknown());
    }
    if oid == head || repo.graph_descendant_of(head, oid)? {
        Ok(oid)
    } else {
        Err(unknown())
    }
}

fn to_commit(repo: &Repository, commit: &git2::Commit<'_>) -> RepoResult<Commit> {
    let tree = commit.tree()?;
    let parent_tree: Option<Tree<'_>> = if commit.parent_count() > 0 {
        Some(commit.parent(0)?.tree()?)
    } else {
        None
    };

    let mut diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))?;

    let mut changes = Vec::new();
    for delta in diff.deltas() {
        let path = repo_path(&delta);
        let kind = match delta.status() {
            Delta::Added | Delta::Copied => ChangeKind::Added,
            Delta::Modified | Delta::Typechange => ChangeKind::Modified,
            Delta::Deleted => ChangeKind::Deleted,
            Delta::Renamed => ChangeKind::Renamed {
                from: file_path(delta.old_file().path()),
            },
            other => ChangeKind::Unsupported {
                status: format!("{other:?}"),
            },
        };
        let references = match kind {
            ChangeKind::Deleted | ChangeKind::Unsupported { .. } => Vec::new(),
            _ => blob_references(repo, delta.new_file().id(), &path)?,
        };
        changes.push(PathChange {
            path,
            kind,
            references,
        });
    }

    let author = commit.author();
    Ok(Commit {
        id: CommitId::new(commit.id().to_string()),
        author: author.name().unwrap_or_default().to_string(),
        timestamp: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        message: commit.message().unwrap_or_default().trim_end().to_string(),
        changes,
        audited: false,
        processed: false,
    })
}

fn repo_path(delta: &DiffDelta<'_>) -> String {
    let path = delta.new_file().path().or_else(|| delta.old_file().path());
    file_path(path)
}

fn file_path(path: Option<&Path>) -> String {
    let rel = path
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    format!("/{rel}")
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"/(?:site|static-assets|templates|scripts)/[^\s"'<>)]+"#)
            .unwrap_or_else(|err| panic!("invalid reference pattern: {err}"))
    })
}

/// Repository paths referenced by a text blob, sorted and without the blob's
/// own path.
fn blob_references(repo: &Repository, oid: Oid, own_path: &str) -> RepoResult<Vec<String>> {
    if oid.is_zero() {
        return Ok(Vec::new());
    }
    let blob = match repo.find_blob(oid) {
        Ok(blob) => blob,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    if blob.is_binary() {
        return Ok(Vec::new());
    }
    let Ok(text) = std::str::from_utf8(blob.content()) else {
        return Ok(Vec::new());
    };
    Ok(scan_references(text, own_path))
}

fn scan_references(text: &str, own_path: &str) -> Vec<String> {
    reference_pattern()
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|found| *found != own_path)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_joins_site_paths() {
        let layout = RepositoryLayout::new("/var/data/repos");
        let site = SiteId::new("blog");
        assert_eq!(
            layout.sandbox_path(&site),
            PathBuf::from("/var/data/repos/sites/blog/sandbox")
        );
        assert_eq!(
            layout.marker_path(&site),
            PathBuf::from("/var/data/repos/sites/blog/site.uuid")
        );
    }

    #[test]
    fn references_are_deduplicated_and_exclude_self() {
        let text = r#"<page>
  <include>/site/components/header.xml</include>
  <img src="/static-assets/img/logo.png"/>
  <include>/site/components/header.xml</include>
  <self>/site/website/index.xml</self>
  <template>/templates/web/page.ftl</template>
</page>"#;
        let refs = scan_references(text, "/site/website/index.xml");
        assert_eq!(
            refs,
            vec![
                "/site/components/header.xml".to_string(),
                "/static-assets/img/logo.png".to_string(),
                "/templates/web/page.ftl".to_string(),
            ]
        );
    }

    #[test]
    fn unrelated_paths_are_not_references() {
        let refs = scan_references("see /config/studio/site-config.xml and /etc/hosts", "/a");
        assert!(refs.is_empty());
    }
}
