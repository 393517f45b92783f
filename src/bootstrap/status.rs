use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::bootstrap::{CERTIFICATE_STATUS_FILE, STATUS_FILE};
use crate::error::{DeployError, DeployResult};
use crate::ssh::RemoteShell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Started,
    Done,
    Skipped,
    Failed,
    SoftFailed,
}

impl StageState {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "started" => Some(Self::Started),
            "done" => Some(Self::Done),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            "soft-failed" => Some(Self::SoftFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No status written yet, or a run is in progress.
    Running { current: Option<String> },
    Completed,
    /// Finished, but the listed soft stages failed.
    Degraded(Vec<String>),
    Failed(String),
}

impl Outcome {
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        !matches!(self, Self::Running { .. })
    }
}

/// Progress of the most recent bootstrap run on an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapStatus {
    pub stages: Vec<(String, StageState)>,
    pub outcome: Outcome,
}

impl BootstrapStatus {
    /// Parse the status file. Only lines after the last
    /// `run started` marker count.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let start = lines
            .iter()
            .rposition(|l| l.starts_with("run started"))
            .map_or(0, |i| i + 1);

        let mut stages: Vec<(String, StageState)> = Vec::new();
        let mut outcome = None;

        for line in &lines[start..] {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("stage") => {
                    let (Some(name), Some(state)) =
                        (words.next(), words.next().and_then(StageState::parse))
                    else {
                        continue;
                    };
                    if let Some(entry) = stages.iter_mut().find(|(n, _)| n == name) {
                        entry.1 = state;
                    } else {
                        stages.push((name.to_string(), state));
                    }
                }
                Some("result") => {
                    outcome = match words.next() {
                        Some("ok") => Some(Outcome::Completed),
                        Some("degraded") => {
                            Some(Outcome::Degraded(words.map(String::from).collect()))
                        }
                        Some("failed") => {
                            Some(Outcome::Failed(words.next().unwrap_or("unknown").to_string()))
                        }
                        _ => outcome,
                    };
                }
                _ => {}
            }
        }

        let outcome = outcome.unwrap_or_else(|| Outcome::Running {
            current: stages
                .iter()
                .rev()
                .find(|(_, s)| *s == StageState::Started)
                .map(|(n, _)| n.clone()),
        });

        Self { stages, outcome }
    }
}

/// Poll budget for [`wait_for_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Poll {
    /// Spread `timeout` over attempts `interval` apart.
    #[must_use]
    pub fn within(timeout: Duration, interval: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let attempts = u32::try_from(timeout.as_millis() / interval_ms).unwrap_or(u32::MAX);
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }
}

impl Default for Poll {
    fn default() -> Self {
        Self::within(Duration::from_secs(900), Duration::from_secs(15))
    }
}

/// Read the status file once.
pub fn fetch(shell: &RemoteShell<'_>) -> DeployResult<BootstrapStatus> {
    Ok(BootstrapStatus::parse(&shell.read_file(STATUS_FILE)?))
}

/// Read the progress of the last `onager certificate` run. Empty
/// when there was none.
pub fn fetch_certificate_retry(shell: &RemoteShell<'_>) -> DeployResult<BootstrapStatus> {
    Ok(BootstrapStatus::parse(&shell.read_file(CERTIFICATE_STATUS_FILE)?))
}

/// Poll the status file until the bootstrap reports a result.
///
/// Returns the status on `ok` and `degraded`. A fatal stage
/// failure is [`DeployError::BootstrapFailed`]; running out of
/// attempts is [`DeployError::BootstrapTimeout`]. SSH errors while
/// the instance is still booting count as "not yet".
pub fn wait_for_completion(shell: &RemoteShell<'_>, poll: Poll) -> DeployResult<BootstrapStatus> {
    for attempt in 1..=poll.attempts {
        match fetch(shell) {
            Ok(status) => match &status.outcome {
                Outcome::Completed | Outcome::Degraded(_) => return Ok(status),
                Outcome::Failed(stage) => {
                    return Err(DeployError::BootstrapFailed(stage.clone()));
                }
                Outcome::Running { current } => {
                    info!(
                        attempt,
                        attempts = poll.attempts,
                        stage = current.as_deref().unwrap_or("pending"),
                        "bootstrap in progress"
                    );
                }
            },
            Err(e) => {
                warn!(attempt, attempts = poll.attempts, error = %e, "instance not reachable yet");
            }
        }

        if attempt < poll.attempts {
            thread::sleep(poll.interval);
        }
    }

    Err(DeployError::BootstrapTimeout(poll.attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_running() {
        let status = BootstrapStatus::parse("");
        assert_eq!(status.outcome, Outcome::Running { current: None });
        assert!(status.stages.is_empty());
    }

    #[test]
    fn in_progress_reports_current_stage() {
        let status = BootstrapStatus::parse(
            "run started 2026-01-01T00:00:00+00:00\n\
             stage update-packages started\n\
             stage update-packages done\n\
             stage install-packages started\n",
        );

        assert_eq!(
            status.outcome,
            Outcome::Running {
                current: Some("install-packages".into())
            }
        );
        assert_eq!(status.stages[0], ("update-packages".into(), StageState::Done));
    }

    #[test]
    fn only_latest_run_counts() {
        let status = BootstrapStatus::parse(
            "run started a\nstage fetch-artifact failed\nresult failed fetch-artifact\n\
             run started b\nstage fetch-artifact done\nresult ok\n",
        );

        assert_eq!(status.outcome, Outcome::Completed);
        assert_eq!(status.stages, vec![("fetch-artifact".into(), StageState::Done)]);
    }

    #[test]
    fn degraded_lists_soft_failures() {
        let status = BootstrapStatus::parse(
            "run started x\nstage issue-certificate soft-failed\n\
             stage https-proxy soft-failed\nresult degraded issue-certificate https-proxy\n",
        );

        assert_eq!(
            status.outcome,
            Outcome::Degraded(vec!["issue-certificate".into(), "https-proxy".into()])
        );
    }

    #[test]
    fn poll_within_divides_timeout() {
        let poll = Poll::within(Duration::from_secs(60), Duration::from_secs(15));
        assert_eq!(poll.attempts, 4);

        let poll = Poll::within(Duration::from_secs(1), Duration::from_secs(15));
        assert_eq!(poll.attempts, 1);
    }
}
