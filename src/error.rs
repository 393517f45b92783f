pub type DeployResult<T> = Result<T, DeployError>;

/// Coarse classification used to decide whether a failure aborts
/// the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Local prerequisite missing. Raised before any mutation.
    Precondition,
    /// The resource already exists. Swallowed by `ensure_*`.
    Conflict,
    /// Aborts the remaining steps. Created resources stay in place.
    Fatal,
    /// Reported to the operator, never aborts.
    Soft,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("command failed: {command}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("required tool missing: {0}")]
    ToolMissing(String),

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("environment variable missing: {0}")]
    EnvMissing(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("bootstrap failed at stage '{0}'")]
    BootstrapFailed(String),

    #[error("bootstrap did not report completion after {0} attempts")]
    BootstrapTimeout(u32),

    #[error("certificate issuance failed for {0}")]
    CertificateFailed(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    /// Whether a failed cloud call reported that the resource it
    /// tried to create is already there.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("already exists")
                    || stderr.contains("already own it")
                    || has_status(&stderr, 409)
            }
            _ => false,
        }
    }

    /// Whether a failed describe/list call reported a missing
    /// resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("not found")
                    || stderr.contains("was not found")
                    || has_status(&stderr, 404)
                    || stderr.contains("matched no objects")
            }
            Self::InstanceNotFound(_) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ToolMissing(_)
            | Self::CommandNotFound(_)
            | Self::PrerequisiteMissing(_)
            | Self::EnvMissing(_)
            | Self::FileNotFound(_)
            | Self::InvalidConfig(_) => ErrorClass::Precondition,
            Self::CertificateFailed(_) => ErrorClass::Soft,
            e if e.is_already_exists() => ErrorClass::Conflict,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Whether lowercased CLI stderr carries HTTP status `code`, as
/// `HTTPError 409` or `code=409`. Digits elsewhere (project ids,
/// object names) do not count.
fn has_status(stderr: &str, code: u16) -> bool {
    [format!("httperror {code}"), format!("code={code}"), format!("code: {code}")]
        .iter()
        .any(|marker| stderr.contains(marker.as_str()))
}
