use crate::cmd::{CommandRunner, shell_quote};
use crate::error::DeployResult;

/// Shell on a Compute Engine instance through `gcloud compute ssh`.
pub struct RemoteShell<'r> {
    runner: &'r dyn CommandRunner,
    instance: String,
    zone: String,
    project: String,
}

impl<'r> RemoteShell<'r> {
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner, instance: &str, zone: &str, project: &str) -> Self {
        Self {
            runner,
            instance: instance.to_string(),
            zone: zone.to_string(),
            project: project.to_string(),
        }
    }

    /// Execute a command on the instance and capture output.
    pub fn exec(&self, command: &str) -> DeployResult<String> {
        let args = self.build_args(command);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner.run("gcloud", &refs)
    }

    /// Execute a command on the instance with the terminal attached.
    pub fn exec_interactive(&self, command: &str) -> DeployResult<()> {
        let args = self.build_args(command);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner.run_interactive("gcloud", &refs)
    }

    /// Run a bash script as root, streaming its output.
    pub fn run_script(&self, script: &str) -> DeployResult<()> {
        self.exec_interactive(&format!("sudo bash -c {}", shell_quote(script)))
    }

    /// Read a root-owned file. A missing file reads as empty.
    pub fn read_file(&self, path: &str) -> DeployResult<String> {
        let path = shell_quote(path);
        self.exec(&format!("sudo cat {path} 2>/dev/null || true"))
    }

    fn build_args(&self, command: &str) -> Vec<String> {
        vec![
            "compute".to_string(),
            "ssh".to_string(),
            self.instance.clone(),
            format!("--zone={}", self.zone),
            format!("--project={}", self.project),
            "--quiet".to_string(),
            format!("--command={command}"),
        ]
    }
}
