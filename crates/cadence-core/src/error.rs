use thiserror::Error;
use uuid::Uuid;

/// Stable error taxonomy. Callers match on variant, not on message text.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid order_by field: {0}")]
    InvalidOrderBy(String),

    #[error("invalid recurrence config: {0}")]
    InvalidRecurrenceConfig(String),

    #[error("list not found: {0}")]
    ListNotFound(Uuid),

    #[error("item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("template not found: {0}")]
    TemplateNotFound(Uuid),

    #[error("exception not found for template {template_id} at {occurs_at}")]
    ExceptionNotFound {
        template_id: Uuid,
        occurs_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("an exception already exists for template {template_id} at {occurs_at}")]
    ExceptionAlreadyExists {
        template_id: Uuid,
        occurs_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("template {0} already has an active job")]
    JobAlreadyActive(Uuid),

    #[error("job ownership lost for job {0}")]
    JobOwnershipLost(Uuid),

    #[error("version conflict on item {0}")]
    VersionConflict(Uuid),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
