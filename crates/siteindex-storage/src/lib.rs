//! Index store for the site index: capability traits per projection kind, the
//! retrying mutation facade every writer goes through, the site registry and
//! the memory/Postgres backends.

use thiserror::Error;

pub mod facade;
pub mod memory;
pub mod ops;
pub mod postgres;
pub mod registry;
pub mod retry;

pub use facade::RetryingIndexStore;
pub use memory::{FaultKind, FaultPlan, IndexSnapshot, MemoryIndexStore};
pub use ops::{
    AuditMutations, ClusterMutations, DependencyMutations, GitLogMutations, GroupMutations,
    IndexStore, ItemMutations, NavigationMutations, PublishRequestMutations,
    RemoteRepositoryMutations, SecurityMutations, SiteMutations, SiteQueries, UserMutations,
    WorkflowMutations,
};
pub use postgres::{classify_sqlstate, PgIndexStore};
pub use registry::{SiteRegistry, WatermarkAdvance};
pub use retry::{with_retry, BackoffPolicy, Classifier, RetryDisposition, RetryPolicy};

pub const CRATE_NAME: &str = "siteindex-storage";

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure surfaced by any index store operation, already classified.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Contention or timeout class (serialization conflict, lock wait, deadlock
    /// victim, dropped connection). Safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// Constraint violation or malformed input. Never retried.
    #[error("permanent storage failure: {0}")]
    Permanent(String),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("{op} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        op: &'static str,
        attempts: usize,
        #[source]
        last: Box<StoreError>,
    },
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Default classification used by the retry layer.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Transient(_) => RetryDisposition::Retryable,
            Self::Permanent(_) | Self::NotFound { .. } | Self::RetriesExhausted { .. } => {
                RetryDisposition::NonRetryable
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
