use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::artifact::{StagedArtifact, Staging};
use crate::bootstrap::status::{self, Outcome, Poll};
use crate::bootstrap::{BootstrapPlan, LOG_FILE};
use crate::certificate;
use crate::cmd::{CommandRunner, System};
use crate::compose;
use crate::config::{self, DeploymentTarget};
use crate::dns;
use crate::error::{DeployError, DeployResult};
use crate::nginx;
use crate::provision::Provisioner;
use crate::provision::gce::ComputeEngine;
use crate::ssh::RemoteShell;
use crate::stack::Stack;
use crate::units::ServiceUnit;
use crate::workflow::{self, Context, Report, RunState};

const POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Entry point tying the stack, the cloud and the CLI together.
pub struct Pipeline {
    stack: Stack,
    runner: Box<dyn CommandRunner>,
    root: PathBuf,
    state_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl Pipeline {
    #[must_use]
    pub fn new(stack: Stack) -> Self {
        Self {
            stack,
            runner: Box::new(System),
            root: PathBuf::from("."),
            state_dir: PathBuf::from(".onager/state"),
            scratch_dir: std::env::temp_dir(),
        }
    }

    #[must_use]
    pub fn runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    /// Project root the sources and secrets are relative to.
    #[must_use]
    pub fn root(mut self, root: &Path) -> Self {
        self.root = root.to_path_buf();
        self
    }

    #[must_use]
    pub fn state_dir(mut self, dir: &Path) -> Self {
        self.state_dir = dir.to_path_buf();
        self
    }

    /// Directory for the temporary archive and startup script.
    #[must_use]
    pub fn scratch_dir(mut self, dir: &Path) -> Self {
        self.scratch_dir = dir.to_path_buf();
        self
    }

    #[must_use]
    pub fn state_path(&self, instance: &str) -> PathBuf {
        self.state_dir.join(format!("{instance}.json"))
    }

    /// Parse CLI arguments and dispatch the appropriate command.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatched command fails.
    pub fn run(&self) -> DeployResult<()> {
        self.dispatch(Cli::parse())
    }

    /// Same as [`Pipeline::run`] with explicit arguments.
    pub fn run_from<I, T>(&self, args: I) -> DeployResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| DeployError::Other(e.to_string()))?;
        self.dispatch(cli)
    }

    fn dispatch(&self, cli: Cli) -> DeployResult<()> {
        let base = || -> DeployResult<DeploymentTarget> {
            let project = config::resolve_project(
                cli.project.as_deref(),
                |var| std::env::var(var).ok(),
                config::prompt_project,
            )?;
            Ok(DeploymentTarget::new(&project).zone(&cli.zone))
        };

        match cli.command {
            Command::Deploy {
                instance,
                domain,
                email,
                machine_type,
                disk_size,
                bucket,
                wait,
                timeout,
                dry_run,
            } => {
                let mut target = with_positionals(base()?, instance, domain, email)
                    .machine_type(&machine_type)
                    .disk_size_gb(disk_size);
                if let Some(b) = bucket {
                    target = target.bucket(&b);
                }
                if dry_run {
                    return self.cmd_dry_run(&target);
                }
                let poll = wait.then(|| Poll::within(Duration::from_secs(timeout), POLL_INTERVAL));
                self.deploy(&target, poll).map(|_| ())
            }
            Command::Status {
                instance,
                wait,
                timeout,
            } => {
                let target = base()?.instance(&instance);
                let poll = wait.then(|| Poll::within(Duration::from_secs(timeout), POLL_INTERVAL));
                self.cmd_status(&target, poll)
            }
            Command::Logs { instance, lines } => self.cmd_logs(&base()?.instance(&instance), lines),
            Command::Certificate {
                instance,
                domain,
                email,
            } => self.cmd_certificate(&with_positionals(base()?, instance, domain, email)),
            Command::Destroy {
                instance,
                bucket,
                yes,
            } => self.cmd_destroy(&base()?.instance(&instance), bucket.as_deref(), yes),
            Command::Render { domain } => self.cmd_render(domain.as_deref()),
        }
    }

    /// Run the provisioning workflow for `target`. With `wait`, also
    /// poll until the instance reports its bootstrap result.
    pub fn deploy(&self, target: &DeploymentTarget, wait: Option<Poll>) -> DeployResult<Report> {
        let runner = self.runner.as_ref();
        let engine = ComputeEngine::new(runner, &target.project, &target.zone)
            .scratch_dir(&self.scratch_dir);
        let staging = Staging::new(runner, &target.bucket_uri()).scratch_dir(&self.scratch_dir);
        let state_path = self.state_path(&target.instance);

        let mut ctx = Context {
            target,
            stack: &self.stack,
            root: &self.root,
            runner,
            provisioner: &engine,
            staging: &staging,
            state: RunState::load(&state_path, &target.instance)?,
        };

        info!(
            instance = %target.instance,
            project = %target.project,
            zone = %target.zone,
            domain = %target.domain,
            "deploying"
        );

        let report = workflow::steps::deploy(&target.network_tag, wait)
            .persist_to(&state_path)
            .run(&mut ctx)?;

        print_summary(target, ctx.state.instance_ip.as_deref(), wait.is_some());
        Ok(report)
    }

    fn cmd_dry_run(&self, target: &DeploymentTarget) -> DeployResult<()> {
        target.validate()?;
        let steps = workflow::steps::deploy(&target.network_tag, None).names();

        eprintln!("=== Dry run: no changes will be made ===");
        eprintln!();
        eprintln!("Instance: {} ({}, {})", target.instance, target.machine_type, target.zone);
        eprintln!("Project:  {}", target.project);
        eprintln!("Bucket:   {}", target.bucket_uri());
        eprintln!("Domain:   {} (contact {})", target.domain, target.email);
        eprintln!();
        eprintln!("--- Steps ---");
        for (i, step) in steps.iter().enumerate() {
            eprintln!("{}. {step}", i + 1);
        }
        eprintln!();
        self.print_configs(target)
    }

    fn cmd_render(&self, domain: Option<&str>) -> DeployResult<()> {
        let mut target = DeploymentTarget::new("PROJECT");
        if let Some(d) = domain {
            target = target.domain(d);
        }
        self.print_configs(&target)
    }

    fn print_configs(&self, target: &DeploymentTarget) -> DeployResult<()> {
        let compose_content =
            compose::render(&self.stack.apps, &format!("{}-network", target.instance))?;
        let unit = ServiceUnit::compose(&target.instance, &target.install_dir());

        eprintln!("--- docker-compose.yml ---");
        println!("{compose_content}");
        eprintln!("--- nginx (before certificate) ---");
        println!("{}", nginx::render_http_only(&self.stack.proxy, &target.domain));
        eprintln!("--- nginx (with certificate) ---");
        println!("{}", nginx::render_https(&self.stack.proxy, &target.domain));
        eprintln!("--- {} ---", unit.path());
        println!("{}", unit.render());
        Ok(())
    }

    fn cmd_status(&self, target: &DeploymentTarget, wait: Option<Poll>) -> DeployResult<()> {
        let runner = self.runner.as_ref();
        let engine = ComputeEngine::new(runner, &target.project, &target.zone);
        let instance = engine
            .get_instance(&target.instance)?
            .ok_or_else(|| DeployError::InstanceNotFound(target.instance.clone()))?;

        eprintln!("Instance: {} ({})", instance.name, instance.status);
        eprintln!("IP: {}", instance.ip.as_deref().unwrap_or("-"));

        let shell = RemoteShell::new(runner, &target.instance, &target.zone, &target.project);
        let current = match wait {
            Some(poll) => status::wait_for_completion(&shell, poll)?,
            None => status::fetch(&shell)?,
        };

        eprintln!();
        for (stage, state) in &current.stages {
            eprintln!("  {stage:<20} {state:?}");
        }
        eprintln!();
        match &current.outcome {
            Outcome::Running { current: stage } => {
                eprintln!("Bootstrap running ({})", stage.as_deref().unwrap_or("pending"));
            }
            Outcome::Completed => eprintln!("Bootstrap complete"),
            Outcome::Degraded(stages) => {
                eprintln!("Bootstrap complete with failures: {}", stages.join(", "));
            }
            Outcome::Failed(stage) => eprintln!("Bootstrap failed at {stage}"),
        }

        let retry = status::fetch_certificate_retry(&shell)?;
        if !retry.stages.is_empty() {
            let result = match &retry.outcome {
                Outcome::Completed => "ok".to_string(),
                Outcome::Failed(stage) => format!("failed at {stage}"),
                Outcome::Degraded(stages) => format!("failed: {}", stages.join(", ")),
                Outcome::Running { .. } => "running".to_string(),
            };
            eprintln!("Last `onager certificate` run: {result}");
        }

        let certs = certificate::parse_certificates(
            &shell.exec("sudo certbot certificates 2>/dev/null || true")?,
        );
        let now = Utc::now();
        for cert in &certs {
            let note = if cert.needs_renewal(now) { " (renewal due)" } else { "" };
            eprintln!(
                "Certificate {}: {} days left{note}",
                cert.domains.join(", "),
                cert.days_left(now)
            );
        }
        if certs.is_empty() {
            eprintln!("No certificate issued yet");
        }
        Ok(())
    }

    fn cmd_logs(&self, target: &DeploymentTarget, lines: u32) -> DeployResult<()> {
        let shell = RemoteShell::new(
            self.runner.as_ref(),
            &target.instance,
            &target.zone,
            &target.project,
        );
        shell.exec_interactive(&format!("sudo tail -n {lines} {LOG_FILE}"))
    }

    fn cmd_certificate(&self, target: &DeploymentTarget) -> DeployResult<()> {
        target.validate()?;
        let runner = self.runner.as_ref();
        let engine = ComputeEngine::new(runner, &target.project, &target.zone);
        let instance = engine
            .get_instance(&target.instance)?
            .ok_or_else(|| DeployError::InstanceNotFound(target.instance.clone()))?;

        if let Some(ip) = &instance.ip {
            if dns::points_to(&target.domain, ip) {
                info!(domain = %target.domain, %ip, "DNS points at the instance");
            } else {
                warn!(
                    domain = %target.domain,
                    %ip,
                    "DNS does not resolve to the instance yet; issuance will likely fail"
                );
            }
        }

        let state = RunState::load(&self.state_path(&target.instance), &target.instance)?;
        let artifact = state.artifact.unwrap_or_default();
        let plan = BootstrapPlan::new(target, &self.stack.apps, &self.stack.proxy, &artifact);

        let shell = RemoteShell::new(runner, &target.instance, &target.zone, &target.project);
        shell
            .run_script(&plan.render_certificate_retry()?)
            .map_err(|e| {
                warn!(error = %e, "certificate script failed");
                DeployError::CertificateFailed(target.domain.clone())
            })?;

        eprintln!("HTTPS is live: https://{}", target.domain);
        Ok(())
    }

    /// Delete the instance, the secrets it was staged with and the
    /// local run state. Secrets are removed from every bucket the
    /// run state recorded and from `bucket` when given. With neither,
    /// the derived default bucket is used.
    fn cmd_destroy(
        &self,
        target: &DeploymentTarget,
        bucket: Option<&str>,
        yes: bool,
    ) -> DeployResult<()> {
        let state_path = self.state_path(&target.instance);
        let state = RunState::load(&state_path, &target.instance)?;

        let mut buckets = BTreeSet::new();
        buckets.extend(state.bucket);
        buckets.extend(state.artifact.as_ref().and_then(StagedArtifact::bucket_uri));
        if let Some(name) = bucket {
            buckets.insert(format!("gs://{}", name.trim_start_matches("gs://")));
        }
        if buckets.is_empty() {
            buckets.insert(target.bucket_uri());
        }

        eprintln!(
            "WARNING: This will permanently delete \
             instance '{}' and its staged secrets",
            target.instance
        );
        for bucket in &buckets {
            eprintln!("  secrets under {bucket}/secrets/{}/", target.instance);
        }
        eprintln!("Firewall rules and buckets are kept.");
        eprintln!();

        if !yes {
            eprint!("Are you sure? Type 'yes' to confirm: ");
            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;
            if input.trim() != "yes" {
                eprintln!("Aborted.");
                return Ok(());
            }
        }

        let runner = self.runner.as_ref();
        ComputeEngine::new(runner, &target.project, &target.zone)
            .destroy_instance(&target.instance)?;

        for bucket in &buckets {
            let staging = Staging::new(runner, bucket);
            let prefix = staging.secret_uri(&target.instance, "");
            staging.remove(&prefix)?;
            info!(%prefix, "removed staged secrets");
        }

        if state_path.exists() {
            std::fs::remove_file(&state_path)?;
        }

        eprintln!("Cleanup complete!");
        Ok(())
    }
}

fn with_positionals(
    base: DeploymentTarget,
    instance: Option<String>,
    domain: Option<String>,
    email: Option<String>,
) -> DeploymentTarget {
    let name = instance.unwrap_or_else(|| config::DEFAULT_INSTANCE.to_string());
    let mut target = base.instance(&name);
    if let Some(d) = domain {
        target = target.domain(&d);
    }
    if let Some(e) = email {
        target = target.email(&e);
    }
    target
}

fn print_summary(target: &DeploymentTarget, ip: Option<&str>, waited: bool) {
    let ip = ip.unwrap_or("<pending>");
    eprintln!();
    eprintln!("========================================");
    eprintln!("Instance '{}' is provisioned", target.instance);
    eprintln!("========================================");
    eprintln!();
    eprintln!("IP: {ip}");
    eprintln!("Domain: {}", target.domain);
    eprintln!();
    eprintln!("Point an A record for {} at {ip}.", target.domain);
    if !waited {
        eprintln!("The instance finishes setup on its own. Follow it with:");
        eprintln!("  onager logs {}", target.instance);
        eprintln!("  onager status {} --wait", target.instance);
    }
    eprintln!("If the certificate could not be issued, once DNS resolves run:");
    eprintln!("  onager certificate {} {} {}", target.instance, target.domain, target.email);
    eprintln!();
}

#[derive(Parser)]
#[command(name = "onager", version)]
#[command(about = "Provision a Compute Engine instance and serve the app over HTTPS")]
struct Cli {
    /// Google Cloud project id (defaults to $GOOGLE_CLOUD_PROJECT)
    #[arg(long, global = true)]
    project: Option<String>,

    /// Compute Engine zone
    #[arg(long, global = true, default_value = config::DEFAULT_ZONE)]
    zone: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision resources and start the instance bootstrap
    Deploy {
        /// Instance name
        instance: Option<String>,

        /// Domain served by the instance
        domain: Option<String>,

        /// Contact email for Let's Encrypt
        email: Option<String>,

        /// Machine type
        #[arg(long, default_value = config::DEFAULT_MACHINE_TYPE)]
        machine_type: String,

        /// Boot disk size in GB
        #[arg(long, default_value_t = config::DEFAULT_DISK_SIZE_GB)]
        disk_size: u32,

        /// Staging bucket name (default: <project>-<instance>-deploy)
        #[arg(long)]
        bucket: Option<String>,

        /// Wait for the instance to finish its bootstrap
        #[arg(long)]
        wait: bool,

        /// Seconds to wait with --wait
        #[arg(long, default_value_t = 900)]
        timeout: u64,

        /// Preview generated files without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show instance and bootstrap status
    Status {
        /// Instance name
        instance: String,

        /// Wait for the bootstrap to report a result
        #[arg(long)]
        wait: bool,

        /// Seconds to wait with --wait
        #[arg(long, default_value_t = 900)]
        timeout: u64,
    },

    /// Print the tail of the bootstrap log
    Logs {
        /// Instance name
        instance: String,

        /// Number of lines
        #[arg(long, default_value_t = 100)]
        lines: u32,
    },

    /// Issue the certificate and switch Nginx to HTTPS
    Certificate {
        /// Instance name
        instance: Option<String>,

        /// Domain served by the instance
        domain: Option<String>,

        /// Contact email for Let's Encrypt
        email: Option<String>,
    },

    /// Delete an instance and its staged secrets
    Destroy {
        /// Instance name
        instance: String,

        /// Staging bucket used at deploy time, when the run state is gone
        #[arg(long)]
        bucket: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Print the generated configuration files
    Render {
        /// Domain to render for
        domain: Option<String>,
    },
}
