pub mod attachments;
pub mod backend;
pub mod db;
pub mod errors;
pub mod hashtags;
pub mod list_cache;
pub mod models;
pub mod partition;
pub mod reconcile;
pub mod service;
pub mod tag_index;

#[cfg(feature = "desktop")]
mod desktop;

pub use crate::attachments::AttachmentStore;
pub use crate::backend::{SqliteBackend, TodoBackend};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::list_cache::{ListCache, ListSource, UNKNOWN_TOTAL};
pub use crate::models::{
    AppSettings, PageResponse, Tag, Todo, TodoCreate, TodoListQuery, TodoUpdate,
};
pub use crate::partition::{Partition, ResolvedView, ViewKind, ViewRouter};
pub use crate::reconcile::{ListCaches, Mutation, MutationKind};
pub use crate::service::{StoreEvent, TodoService};
pub use crate::tag_index::TagIndex;

#[cfg(feature = "desktop")]
pub use crate::desktop::run;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger under `<app_data_dir>/logs`. Calling it again
/// after a subscriber is set returns an error and leaves the first one active.
pub fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "fon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

pub fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
