use std::fs;
use std::path::Path;

use git2::{IndexAddOption, Oid, Repository, ResetType, Signature, Time};
use siteindex_core::{ChangeKind, CommitId, SiteId};
use siteindex_repo::{GitRepositoryProvider, RepoError, RepositoryLayout, RepositoryProvider};
use tempfile::TempDir;

const SITE_UUID: &str = "0b9c5a3e-4d2f-4a51-8c7e-2f1d6b8a9e10";

struct Fixture {
    _dir: TempDir,
    provider: GitRepositoryProvider,
    repo: Repository,
    site: SiteId,
    clock: i64,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepositoryLayout::new(dir.path());
        let site = SiteId::new("editorial");
        let sandbox = layout.sandbox_path(&site);
        fs::create_dir_all(&sandbox).unwrap();
        fs::write(
            layout.marker_path(&site),
            format!("# identity of this repository\n\n{SITE_UUID}\n"),
        )
        .unwrap();
        let repo = Repository::init(&sandbox).unwrap();
        Self {
            _dir: dir,
            provider: GitRepositoryProvider::new(layout),
            repo,
            site,
            clock: 1_760_000_000,
        }
    }

    fn workdir(&self) -> &Path {
        self.repo.workdir().unwrap()
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.workdir().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn remove(&self, rel: &str) {
        fs::remove_file(self.workdir().join(rel)).unwrap();
    }

    fn rename(&self, from: &str, to: &str) {
        let target = self.workdir().join(to);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::rename(self.workdir().join(from), target).unwrap();
    }

    fn commit(&mut self, message: &str) -> CommitId {
        let mut index = self.repo.index().unwrap();
        index.add_all(["*"], IndexAddOption::DEFAULT, None).unwrap();
        index.update_all(["*"], None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        self.clock += 60;
        let sig = Signature::new("Jane Editor", "jane@example.com", &Time::new(self.clock, 0))
            .unwrap();
        let parent = self.repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
        CommitId::new(oid.to_string())
    }
}

const HOME_PAGE: &str = r#"<page>
  <title>Home</title>
  <header>/site/components/header.xml</header>
  <logo>/static-assets/images/logo.png</logo>
</page>
"#;

const ARTICLE: &str = r#"<page>
  <title>Launch notes</title>
  <body>The launch went well. This text is long enough to keep its identity across a rename.</body>
  <author>/site/components/authors/jane.xml</author>
</page>
"#;

#[tokio::test]
async fn empty_repository_has_no_commits() {
    let fixture = Fixture::new();
    let commits = fixture
        .provider
        .commits_after(&fixture.site, None)
        .await
        .unwrap();
    assert!(commits.is_empty());
}

#[tokio::test]
async fn identity_marker_is_read_from_site_root() {
    let fixture = Fixture::new();
    let marker = fixture.provider.identity_marker(&fixture.site).await.unwrap();
    assert!(marker.matches(SITE_UUID));
    assert!(!marker.matches("# identity of this repository"));
}

#[tokio::test]
async fn missing_marker_and_missing_site_are_distinct() {
    let fixture = Fixture::new();
    fs::remove_file(fixture.provider.layout().marker_path(&fixture.site)).unwrap();

    let err = fixture
        .provider
        .identity_marker(&fixture.site)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::MarkerMissing(_)));

    let ghost = SiteId::new("ghost");
    let err = fixture.provider.identity_marker(&ghost).await.unwrap_err();
    assert!(matches!(err, RepoError::SiteNotFound(_)));
    let err = fixture.provider.commits_after(&ghost, None).await.unwrap_err();
    assert!(matches!(err, RepoError::SiteNotFound(_)));
}

#[tokio::test]
async fn history_is_replayed_oldest_first_with_changes() {
    let mut fixture = Fixture::new();
    fixture.write("site/website/index.xml", HOME_PAGE);
    fixture.write("site/components/header.xml", "<component/>\n");
    let c1 = fixture.commit("Initial site");

    fixture.write("site/website/news/launch/index.xml", ARTICLE);
    fixture.write("site/components/header.xml", "<component><title>Top</title></component>\n");
    let c2 = fixture.commit("Add launch article");

    fixture.rename(
        "site/website/news/launch/index.xml",
        "site/website/news/release/index.xml",
    );
    fixture.remove("site/components/header.xml");
    let c3 = fixture.commit("Rename article, drop header");

    let commits = fixture
        .provider
        .commits_after(&fixture.site, None)
        .await
        .unwrap();
    let ids: Vec<_> = commits.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec![c1, c2, c3]);

    let first = &commits[0];
    assert_eq!(first.author, "Jane Editor");
    assert_eq!(first.message, "Initial site");
    let home = first
        .changes
        .iter()
        .find(|c| c.path == "/site/website/index.xml")
        .unwrap();
    assert_eq!(home.kind, ChangeKind::Added);
    assert_eq!(
        home.references,
        vec![
            "/site/components/header.xml".to_string(),
            "/static-assets/images/logo.png".to_string(),
        ]
    );

    let second = &commits[1];
    let header = second
        .changes
        .iter()
        .find(|c| c.path == "/site/components/header.xml")
        .unwrap();
    assert_eq!(header.kind, ChangeKind::Modified);
    assert!(second.timestamp > first.timestamp);

    let third = &commits[2];
    let renamed = third
        .changes
        .iter()
        .find(|c| c.path == "/site/website/news/release/index.xml")
        .unwrap();
    assert_eq!(
        renamed.kind,
        ChangeKind::Renamed {
            from: "/site/website/news/launch/index.xml".into()
        }
    );
    assert_eq!(renamed.references, vec!["/site/components/authors/jane.xml".to_string()]);
    let deleted = third
        .changes
        .iter()
        .find(|c| c.path == "/site/components/header.xml")
        .unwrap();
    assert_eq!(deleted.kind, ChangeKind::Deleted);
    assert!(deleted.references.is_empty());
}

#[tokio::test]
async fn watermark_slices_history_strictly_after() {
    let mut fixture = Fixture::new();
    fixture.write("site/website/index.xml", HOME_PAGE);
    let c1 = fixture.commit("one");
    fixture.write("site/website/about/index.xml", "<page/>\n");
    let c2 = fixture.commit("two");
    fixture.write("site/website/contact/index.xml", "<page/>\n");
    let c3 = fixture.commit("three");

    let after_c1 = fixture
        .provider
        .commits_after(&fixture.site, Some(&c1))
        .await
        .unwrap();
    let ids: Vec<_> = after_c1.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec![c2, c3.clone()]);

    let after_head = fixture
        .provider
        .commits_after(&fixture.site, Some(&c3))
        .await
        .unwrap();
    assert!(after_head.is_empty());
}

#[tokio::test]
async fn merged_branch_changes_arrive_once_through_the_merge() {
    let mut fixture = Fixture::new();
    fixture.write("site/website/index.xml", HOME_PAGE);
    let c1 = fixture.commit("one");
    fixture.write("site/website/side/index.xml", "<page/>\n");
    let side = fixture.commit("side branch");

    let base = fixture
        .repo
        .find_object(Oid::from_str(c1.as_str()).unwrap(), None)
        .unwrap();
    fixture.repo.reset(&base, ResetType::Hard, None).unwrap();
    drop(base);
    fixture.write("site/website/main/index.xml", "<page/>\n");
    let main = fixture.commit("main line");

    fixture.write("site/website/side/index.xml", "<page/>\n");
    let mut index = fixture.repo.index().unwrap();
    index.add_all(["*"], IndexAddOption::DEFAULT, None).unwrap();
    index.write().unwrap();
    let tree = fixture.repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::new("Jane Editor", "jane@example.com", &Time::new(fixture.clock + 60, 0))
        .unwrap();
    let first = fixture.repo.find_commit(Oid::from_str(main.as_str()).unwrap()).unwrap();
    let second = fixture.repo.find_commit(Oid::from_str(side.as_str()).unwrap()).unwrap();
    let merge = fixture
        .repo
        .commit(Some("HEAD"), &sig, &sig, "merge side", &tree, &[&first, &second])
        .unwrap();

    let commits = fixture.provider.commits_after(&fixture.site, None).await.unwrap();
    let ids: Vec<_> = commits.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec![c1, main, CommitId::new(merge.to_string())]);

    let side_adds = commits
        .iter()
        .flat_map(|c| &c.changes)
        .filter(|change| change.path == "/site/website/side/index.xml")
        .count();
    assert_eq!(side_adds, 1);
}

#[tokio::test]
async fn foreign_watermark_is_unknown() {
    let mut fixture = Fixture::new();
    fixture.write("site/website/index.xml", HOME_PAGE);
    fixture.commit("one");

    for bogus in ["not-a-sha", "0123456789abcdef0123456789abcdef01234567"] {
        let err = fixture
            .provider
            .commits_after(&fixture.site, Some(&CommitId::new(bogus)))
            .await
            .unwrap_err();
        assert!(
            matches!(err, RepoError::UnknownCommit { .. }),
            "{bogus}: {err}"
        );
    }
}
