use thiserror::Error;

/// Shared error type for `judge-common`'s components (Job Store, Language
/// Registry, Config). Per-job failures never surface through this type —
/// those become `JobRecord` result fields — this is reserved for
/// process-wide conditions that should propagate and crash the worker or
/// API process under an external supervisor.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("language config error: {0}")]
    LanguageConfig(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job {job_id} is not in the running state")]
    NotRunning { job_id: uuid::Uuid },
}
