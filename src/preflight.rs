use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cmd::CommandRunner;
use crate::error::{DeployError, DeployResult};

/// One local prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Tool(String),
    File(PathBuf),
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tool(name) => write!(f, "tool {name}"),
            Self::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

#[derive(Debug)]
pub struct CheckResult {
    pub check: Check,
    pub error: Option<DeployError>,
}

impl CheckResult {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of every check, in the order they ran.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub results: Vec<CheckResult>,
}

impl PreflightReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.results.iter().all(CheckResult::passed)
    }

    /// The first failure, if any.
    pub fn into_result(self) -> DeployResult<()> {
        match self.results.into_iter().find_map(|r| r.error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Check tools on `PATH` and files under `root`. Touches nothing.
pub fn run(
    runner: &dyn CommandRunner,
    tools: &[String],
    root: &Path,
    files: &[String],
) -> PreflightReport {
    let mut report = PreflightReport::default();

    for tool in tools {
        let error = (!runner.command_exists(tool)).then(|| {
            DeployError::ToolMissing(format!("{tool} is not installed or not on PATH"))
        });
        report.results.push(CheckResult {
            check: Check::Tool(tool.clone()),
            error,
        });
    }

    for file in files {
        let path = root.join(file);
        let error = (!path.exists()).then(|| {
            DeployError::FileNotFound(format!(
                "{} is required. Create it before deploying",
                path.display()
            ))
        });
        report.results.push(CheckResult {
            check: Check::File(path),
            error,
        });
    }

    for result in &report.results {
        match &result.error {
            None => info!(check = %result.check, "ok"),
            Some(e) => warn!(check = %result.check, error = %e, "failed"),
        }
    }

    report
}
