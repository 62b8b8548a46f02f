use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaintError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("remote call '{method}' failed: {message}")]
    Api { method: String, message: String },

    #[error("unable to find system '{0}'. Is this system registered?")]
    SystemNotFound(String),

    #[error("duplicate system '{0}' ({1} matches). Please fix and run again.")]
    DuplicateSystem(String, usize),

    #[error("unable to schedule {action} for system {system_id}: {message}")]
    Submission {
        action: String,
        system_id: i64,
        message: String,
    },

    #[error("status query for job {job_id} failed: {message}")]
    PollingTransient { job_id: i64, message: String },

    #[error("unable to get status of job {job_id}. Tried {attempts} times. Aborting.")]
    PollingExhausted { job_id: i64, attempts: u32 },

    #[error("{action} failed: {message}")]
    JobFailed { action: String, message: String },

    #[error("action '{action}' ran into the timeout of {timeout_seconds}s")]
    JobTimedOut { action: String, timeout_seconds: u64 },

    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{0}")]
    PreconditionViolation(String),

    #[error("no migration available: {0}")]
    MigrationUnavailable(String),

    #[error("aborted on fatal {category} error: {message}")]
    Aborted { category: String, message: String },

    #[error("notification failed: {0}")]
    Notify(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl MaintError {
    /// True for errors that end the run regardless of the error policy.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MaintError::PollingTransient { .. }
                | MaintError::JobFailed { .. }
                | MaintError::JobTimedOut { .. }
                | MaintError::MigrationUnavailable(_)
                | MaintError::Notify(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MaintError>;
