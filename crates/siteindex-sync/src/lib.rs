//! Repository to index synchronization: configuration, commit translation,
//! the clock-driven scheduler and the per-site sync task.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod task;
pub mod translate;

pub use config::SyncConfig;
pub use error::{SyncError, TranslationError};
pub use scheduler::{
    is_eligible, ClockScheduler, CycleCounter, RecurringTask, RunStatus, SiteRun, SiteSource,
    SiteTask, TickReport,
};
pub use task::{RepositorySyncTask, SyncOutcome, SyncPhase, SYNC_TASK_NAME};
pub use translate::{apply_mutation, translate_commit, IndexMutation};

pub const CRATE_NAME: &str = "siteindex-sync";
