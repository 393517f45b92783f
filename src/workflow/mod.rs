//! Ordered, resumable provisioning steps.
//!
//! Every [`Step`] is checked before it runs: if its effect is
//! already in place it is skipped, whatever earlier runs recorded.
//! Progress is persisted to a [`RunState`] file after each step, so
//! an interrupted deployment can be rerun and converges on the same
//! end state.

pub mod steps;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::{StagedArtifact, Staging};
use crate::cmd::CommandRunner;
use crate::config::DeploymentTarget;
use crate::error::DeployResult;
use crate::provision::Provisioner;
use crate::stack::Stack;

/// Shared inputs and accumulated state of a workflow run.
pub struct Context<'a> {
    pub target: &'a DeploymentTarget,
    pub stack: &'a Stack,
    pub root: &'a Path,
    pub runner: &'a dyn CommandRunner,
    pub provisioner: &'a dyn Provisioner,
    pub staging: &'a Staging<'a>,
    pub state: RunState,
}

/// One named unit of provisioning work.
pub trait Step {
    fn name(&self) -> &'static str;

    /// Whether the step's effect is already in place.
    fn precheck(&self, _ctx: &mut Context<'_>) -> DeployResult<bool> {
        Ok(false)
    }

    fn run(&self, ctx: &mut Context<'_>) -> DeployResult<()>;

    /// Post-condition, checked after [`Step::run`].
    fn verify(&self, _ctx: &mut Context<'_>) -> DeployResult<()> {
        Ok(())
    }
}

/// Progress of the last run for one instance, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub instance: String,
    #[serde(default)]
    pub completed: Vec<String>,
    pub last_completed: Option<String>,
    /// Staging bucket the run used, `gs://` form.
    #[serde(default)]
    pub bucket: Option<String>,
    pub artifact: Option<StagedArtifact>,
    pub instance_ip: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RunState {
    #[must_use]
    pub fn new(instance: &str) -> Self {
        Self {
            instance: instance.to_string(),
            ..Self::default()
        }
    }

    /// Load the state file, or start fresh when there is none.
    pub fn load(path: &Path, instance: &str) -> DeployResult<Self> {
        if !path.exists() {
            return Ok(Self::new(instance));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write atomically: temp file, then rename.
    pub fn save(&self, path: &Path) -> DeployResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    #[must_use]
    pub fn is_complete(&self, step: &str) -> bool {
        self.completed.iter().any(|s| s == step)
    }

    pub fn mark_complete(&mut self, step: &str) {
        if !self.is_complete(step) {
            self.completed.push(step.to_string());
        }
        self.last_completed = Some(step.to_string());
        self.updated_at = Some(Utc::now());
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub ran: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

/// Runs steps in order, one at a time.
#[derive(Default)]
pub struct Workflow {
    steps: Vec<Box<dyn Step>>,
    state_path: Option<PathBuf>,
}

impl Workflow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Persist run state to `path` after every step.
    #[must_use]
    pub fn persist_to(mut self, path: &Path) -> Self {
        self.state_path = Some(path.to_path_buf());
        self
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step. Stops at the first error; completed steps
    /// and created resources stay as they are.
    pub fn run(&self, ctx: &mut Context<'_>) -> DeployResult<Report> {
        if let Some(last) = &ctx.state.last_completed {
            info!(last_completed = %last, "resuming from recorded progress");
        }

        let mut report = Report::default();

        for step in &self.steps {
            let name = step.name();

            if step.precheck(ctx)? {
                info!(step = name, "already satisfied, skipping");
                report.skipped.push(name);
            } else {
                if ctx.state.is_complete(name) {
                    warn!(step = name, "recorded as done but no longer satisfied, running again");
                }
                info!(step = name, "running");
                step.run(ctx)?;
                step.verify(ctx)?;
                report.ran.push(name);
            }

            ctx.state.mark_complete(name);
            if let Some(path) = &self.state_path {
                ctx.state.save(path)?;
            }
        }

        Ok(report)
    }
}
