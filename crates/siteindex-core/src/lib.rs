//! Core domain model for the site index: sites, repository commits and the
//! index rows derived from them.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "siteindex-core";

/// Stable, human-assigned site identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SiteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Content-addressed commit identifier as reported by the repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CommitId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteState {
    Creating,
    Ready,
    Deleting,
    Deleted,
}

impl SiteState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Ready => "READY",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATING" => Some(Self::Creating),
            "READY" => Some(Self::Ready),
            "DELETING" => Some(Self::Deleting),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Registry view of one site.
///
/// `site_uuid` is the identity token written into the repository when it was
/// provisioned. The two watermark fields are only moved by the sync task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: i64,
    pub site_id: SiteId,
    pub site_uuid: String,
    pub name: String,
    pub description: Option<String>,
    pub state: SiteState,
    pub enabled: bool,
    pub publishing_enabled: bool,
    pub publishing_status: Option<String>,
    pub publishing_lock_owner: Option<String>,
    pub publishing_lock_heartbeat: Option<DateTime<Utc>>,
    pub last_commit_id: Option<CommitId>,
    pub last_verified_commit_id: Option<CommitId>,
    pub last_synced_commit_id: Option<CommitId>,
}

impl SiteRecord {
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.state == SiteState::Ready
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSite {
    pub site_id: SiteId,
    pub site_uuid: String,
    pub name: String,
    pub description: Option<String>,
}

/// One entry of a site's repository log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub changes: Vec<PathChange>,
    pub audited: bool,
    pub processed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathChange {
    pub path: String,
    pub kind: ChangeKind,
    /// Repository paths referenced by the new content (dependency targets).
    #[serde(default)]
    pub references: Vec<String>,
}

impl PathChange {
    pub fn added(path: impl Into<String>) -> Self {
        Self::with_kind(path, ChangeKind::Added)
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self::with_kind(path, ChangeKind::Modified)
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self::with_kind(path, ChangeKind::Deleted)
    }

    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::with_kind(to, ChangeKind::Renamed { from: from.into() })
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    fn with_kind(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            references: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
    /// A change the repository reported but the index has no mapping for.
    Unsupported { status: String },
}

bitflags! {
    /// Item workflow/state bitmask, stored as a single integer column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ItemStates: u64 {
        const NEW               = 1 << 0;
        const MODIFIED          = 1 << 1;
        const DELETED           = 1 << 2;
        const USER_LOCKED       = 1 << 3;
        const SYSTEM_PROCESSING = 1 << 4;
        const IN_WORKFLOW       = 1 << 5;
        const SCHEDULED         = 1 << 6;
        const STAGED            = 1 << 7;
        const LIVE              = 1 << 8;
    }
}

impl Default for ItemStates {
    fn default() -> Self {
        Self::empty()
    }
}

impl ItemStates {
    pub const NONE: Self = Self::empty();

    /// Turns `on` bits on, then `off` bits off.
    pub const fn apply(self, on: Self, off: Self) -> Self {
        Self::from_bits_retain((self.bits() | on.bits()) & !off.bits())
    }
}

/// Projection of one repository path into the item table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub site_id: SiteId,
    pub path: String,
    pub preview_url: Option<String>,
    pub states: ItemStates,
    pub system_type: String,
    pub label: String,
    pub locked_by: Option<String>,
    pub last_modified_by: String,
    pub last_modified_on: DateTime<Utc>,
    pub last_published_on: Option<DateTime<Utc>>,
    pub commit_id: Option<CommitId>,
    pub previous_path: Option<String>,
}

impl ItemRecord {
    /// Builds the row for a path as last written by `commit`.
    pub fn from_commit(site_id: &SiteId, path: &str, commit: &Commit) -> Self {
        Self {
            site_id: site_id.clone(),
            path: path.to_string(),
            preview_url: item_preview_url(path),
            states: ItemStates::NONE,
            system_type: item_system_type(path).to_string(),
            label: item_label(path),
            locked_by: None,
            last_modified_by: commit.author.clone(),
            last_modified_on: commit.timestamp,
            last_published_on: None,
            commit_id: Some(commit.id.clone()),
            previous_path: None,
        }
    }
}

/// Folder move: every item under `old_path` is re-rooted under `new_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveItems {
    pub site_id: SiteId,
    pub old_path: String,
    pub new_path: String,
    pub old_preview_url: Option<String>,
    pub new_preview_url: Option<String>,
    pub on_states: ItemStates,
    pub off_states: ItemStates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEntry {
    pub site_id: SiteId,
    pub path: String,
    pub state: String,
    pub submitter: String,
    pub reviewer: Option<String>,
    pub submitter_comment: Option<String>,
    pub publishing_target: Option<String>,
    pub schedule: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub site_id: SiteId,
    pub source_path: String,
    pub target_path: String,
    pub kind: String,
}

impl DependencyEdge {
    pub fn new(site_id: &SiteId, source_path: &str, target_path: &str) -> Self {
        Self {
            site_id: site_id.clone(),
            source_path: source_path.to_string(),
            target_path: target_path.to_string(),
            kind: item_system_type(target_path).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationOrderSequence {
    pub folder_id: Uuid,
    pub site_id: SiteId,
    pub path: String,
    pub max_count: f64,
}

impl NavigationOrderSequence {
    /// Sequence row for a folder; the folder id is derived from site and path
    /// so replays always produce the same row.
    pub fn for_folder(site_id: &SiteId, folder_path: &str) -> Self {
        let key = format!("{}:{}", site_id, folder_path);
        Self {
            folder_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()),
            site_id: site_id.clone(),
            path: folder_path.to_string(),
            max_count: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
    Move,
}

impl AuditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Move => "MOVE",
        }
    }
}

pub const AUDIT_ORIGIN_GIT: &str = "GIT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub site_id: SiteId,
    pub operation: AuditOperation,
    pub actor: String,
    pub target_path: String,
    pub target_type: String,
    pub origin: String,
    pub commit_id: Option<CommitId>,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditParam {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLogEntry {
    pub site_id: SiteId,
    pub commit_id: CommitId,
    pub processed: bool,
    pub audited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Zero until the member has been stored.
    pub id: i64,
    pub local_address: String,
    pub state: String,
    pub git_url: String,
    pub git_remote_name: String,
    pub heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSiteSyncRepo {
    pub cluster_node_id: i64,
    pub site_id: SiteId,
    pub node_last_commit_id: Option<CommitId>,
    pub node_last_verified_commit_id: Option<CommitId>,
    pub node_last_synced_commit_id: Option<CommitId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishRequestState {
    ReadyForLive,
    Processing,
    Completed,
    Cancelled,
    Blocked,
}

impl PublishRequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadyForLive => "READY_FOR_LIVE",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Blocked => "BLOCKED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "READY_FOR_LIVE" => Some(Self::ReadyForLive),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            "BLOCKED" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub id: i64,
    pub site_id: SiteId,
    pub environment: String,
    pub path: String,
    pub old_path: Option<String>,
    pub action: String,
    pub username: String,
    pub package_id: String,
    pub state: PublishRequestState,
    pub scheduled_date: DateTime<Utc>,
    pub commit_id: Option<CommitId>,
    pub completed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: i64,
    pub label: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub enabled: bool,
    pub externally_managed: bool,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub org_id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub site_id: SiteId,
    pub remote_name: String,
    pub remote_url: String,
    pub authentication_type: String,
    pub remote_username: Option<String>,
}

/// User properties are scoped per site.
pub type UserProperties = BTreeMap<String, String>;

const WEBSITE_ROOT: &str = "/site/website";
const PAGE_INDEX: &str = "index.xml";
const PAGE_INDEX_SUFFIX: &str = "/index.xml";
const LEVEL_DESCRIPTOR: &str = "crafter-level-descriptor.level.xml";

pub fn is_page(path: &str) -> bool {
    path.starts_with("/site/website/") && path.ends_with(".xml")
}

/// Classifies a repository path into the item system type.
pub fn item_system_type(path: &str) -> &'static str {
    if path.ends_with(LEVEL_DESCRIPTOR) {
        "levelDescriptor"
    } else if is_page(path) {
        "page"
    } else if path.starts_with("/site/components/") {
        "component"
    } else if path.starts_with("/site/taxonomy/") {
        "taxonomy"
    } else if path.starts_with("/static-assets/") {
        "asset"
    } else if path.starts_with("/templates/") {
        "renderingTemplate"
    } else if path.starts_with("/scripts/") {
        "script"
    } else if path.starts_with("/config/") {
        "config"
    } else {
        "file"
    }
}

/// Preview URL of a path: pages map to their folder URL, static assets to
/// themselves, everything else has none.
pub fn item_preview_url(path: &str) -> Option<String> {
    if is_page(path) && !path.ends_with(LEVEL_DESCRIPTOR) {
        let rel = path.trim_start_matches(WEBSITE_ROOT);
        let rel = rel
            .strip_suffix(PAGE_INDEX_SUFFIX)
            .map(str::to_string)
            .unwrap_or_else(|| rel.trim_end_matches(".xml").to_string());
        if rel.is_empty() {
            Some("/".to_string())
        } else {
            Some(rel)
        }
    } else if path.starts_with("/static-assets/") {
        Some(path.to_string())
    } else {
        None
    }
}

pub fn item_label(path: &str) -> String {
    let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
    match segments.next() {
        Some(PAGE_INDEX) => segments.next().unwrap_or(PAGE_INDEX).to_string(),
        Some(name) => name.to_string(),
        None => "/".to_string(),
    }
}

/// Parent folder of a path (`/` for top-level entries).
pub fn parent_folder(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    if parent.is_empty() {
        Some("/")
    } else {
        Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_states_apply_on_then_off() {
        let states = ItemStates::NEW | ItemStates::DELETED;
        let next = states.apply(ItemStates::MODIFIED, ItemStates::DELETED);
        assert!(next.contains(ItemStates::NEW));
        assert!(next.contains(ItemStates::MODIFIED));
        assert!(!next.contains(ItemStates::DELETED));
        assert_eq!(next.bits(), 0b11);
        assert_eq!(ItemStates::NONE.apply(ItemStates::NONE, ItemStates::all()), ItemStates::empty());
    }

    #[test]
    fn item_states_keep_unknown_bits_from_storage() {
        let stored = ItemStates::from_bits_retain(1 << 40 | 1);
        let next = stored.apply(ItemStates::LIVE, ItemStates::NEW);
        assert_eq!(next.bits(), 1 << 40 | 1 << 8);
    }

    #[test]
    fn page_paths_map_to_folder_preview_urls() {
        assert_eq!(item_preview_url("/site/website/index.xml").as_deref(), Some("/"));
        assert_eq!(
            item_preview_url("/site/website/about/team/index.xml").as_deref(),
            Some("/about/team")
        );
        assert_eq!(item_preview_url("/site/website/faq.xml").as_deref(), Some("/faq"));
        assert_eq!(
            item_preview_url("/static-assets/img/logo.png").as_deref(),
            Some("/static-assets/img/logo.png")
        );
        assert_eq!(item_preview_url("/site/components/header.xml"), None);
    }

    #[test]
    fn system_types_follow_repository_layout() {
        assert_eq!(item_system_type("/site/website/about/index.xml"), "page");
        assert_eq!(
            item_system_type("/site/website/crafter-level-descriptor.level.xml"),
            "levelDescriptor"
        );
        assert_eq!(item_system_type("/site/components/header.xml"), "component");
        assert_eq!(item_system_type("/static-assets/css/main.css"), "asset");
        assert_eq!(item_system_type("/templates/web/page.ftl"), "renderingTemplate");
        assert_eq!(item_system_type("/scripts/rest/ping.groovy"), "script");
        assert_eq!(item_system_type("/README.md"), "file");
    }

    #[test]
    fn labels_and_parents() {
        assert_eq!(item_label("/site/website/about/index.xml"), "about");
        assert_eq!(item_label("/static-assets/img/logo.png"), "logo.png");
        assert_eq!(parent_folder("/site/website/about/index.xml"), Some("/site/website/about"));
        assert_eq!(parent_folder("/README.md"), Some("/"));
        assert_eq!(parent_folder("README.md"), None);
    }

    #[test]
    fn navigation_folder_ids_are_deterministic() {
        let site = SiteId::new("editorial");
        let a = NavigationOrderSequence::for_folder(&site, "/site/website/about");
        let b = NavigationOrderSequence::for_folder(&site, "/site/website/about");
        let other = NavigationOrderSequence::for_folder(&SiteId::new("blog"), "/site/website/about");
        assert_eq!(a.folder_id, b.folder_id);
        assert_ne!(a.folder_id, other.folder_id);
    }

    #[test]
    fn change_kind_serializes_with_tag() {
        let change = PathChange::renamed("/a.xml", "/b.xml");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["kind"]["kind"], "renamed");
        assert_eq!(json["kind"]["from"], "/a.xml");
        assert_eq!(json["path"], "/b.xml");
    }

    #[test]
    fn site_state_round_trips_through_text() {
        for state in [SiteState::Creating, SiteState::Ready, SiteState::Deleting, SiteState::Deleted] {
            assert_eq!(SiteState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SiteState::parse("bogus"), None);
    }
}
