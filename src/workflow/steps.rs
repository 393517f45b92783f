use chrono::Utc;
use tracing::{info, warn};

use crate::artifact::{self, ArtifactBundle};
use crate::bootstrap::BootstrapPlan;
use crate::bootstrap::status::{self, Outcome, Poll};
use crate::error::{DeployError, DeployResult};
use crate::preflight;
use crate::provision::{FirewallRule, InstanceSpec};
use crate::ssh::RemoteShell;
use crate::workflow::{Context, Step, Workflow};

/// Steps of a deployment, in order. `wait` adds a final step that
/// polls the instance until the bootstrap reports a result.
#[must_use]
pub fn deploy(tag: &str, wait: Option<Poll>) -> Workflow {
    let workflow = Workflow::new()
        .step(Preflight)
        .step(Firewall::new("firewall-http", FirewallRule::http(tag)))
        .step(Firewall::new("firewall-https", FirewallRule::https(tag)))
        .step(Bucket)
        .step(StageArtifact)
        .step(CreateInstance);

    match wait {
        Some(poll) => workflow.step(AwaitBootstrap(poll)),
        None => workflow,
    }
}

/// Local tools, files and cloud credentials.
pub struct Preflight;

impl Step for Preflight {
    fn name(&self) -> &'static str {
        "preflight"
    }

    fn run(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        ctx.target.validate()?;

        let files: Vec<String> = ctx
            .stack
            .sources
            .iter()
            .chain(&ctx.stack.secrets)
            .cloned()
            .collect();
        preflight::run(ctx.runner, &ctx.stack.required_tools, ctx.root, &files).into_result()?;

        ctx.provisioner.check_prerequisites()
    }
}

pub struct Firewall {
    name: &'static str,
    rule: FirewallRule,
}

impl Firewall {
    #[must_use]
    pub const fn new(name: &'static str, rule: FirewallRule) -> Self {
        Self { name, rule }
    }
}

impl Step for Firewall {
    fn name(&self) -> &'static str {
        self.name
    }

    fn precheck(&self, ctx: &mut Context<'_>) -> DeployResult<bool> {
        ctx.provisioner.firewall_rule_exists(&self.rule.name)
    }

    fn run(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        ctx.provisioner.ensure_firewall_rule(&self.rule).map(|_| ())
    }

    fn verify(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        if ctx.provisioner.firewall_rule_exists(&self.rule.name)? {
            Ok(())
        } else {
            Err(DeployError::Other(format!(
                "firewall rule {} missing after creation",
                self.rule.name
            )))
        }
    }
}

/// Staging bucket in the instance's region.
pub struct Bucket;

impl Step for Bucket {
    fn name(&self) -> &'static str {
        "bucket"
    }

    fn precheck(&self, ctx: &mut Context<'_>) -> DeployResult<bool> {
        ctx.state.bucket = Some(ctx.target.bucket_uri());
        ctx.provisioner.bucket_exists(&ctx.target.bucket)
    }

    fn run(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        ctx.provisioner
            .ensure_bucket(&ctx.target.bucket, ctx.target.region())
            .map(|_| ())
    }

    fn verify(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        if ctx.provisioner.bucket_exists(&ctx.target.bucket)? {
            Ok(())
        } else {
            Err(DeployError::Other(format!(
                "bucket {} missing after creation",
                ctx.target.bucket_uri()
            )))
        }
    }
}

/// Package and upload the source tree and secrets.
pub struct StageArtifact;

impl Step for StageArtifact {
    fn name(&self) -> &'static str {
        "stage-artifact"
    }

    /// Satisfied when the instance already exists (it fetched its
    /// artifact on first boot) or the recorded upload is still in
    /// the bucket.
    fn precheck(&self, ctx: &mut Context<'_>) -> DeployResult<bool> {
        if ctx.provisioner.get_instance(&ctx.target.instance)?.is_some() {
            return Ok(true);
        }

        let Some(staged) = ctx.state.artifact.clone() else {
            return Ok(false);
        };
        if !ctx.staging.exists(&staged.archive_uri)? {
            return Ok(false);
        }
        for secret in &staged.secrets {
            if !ctx.staging.exists(&secret.uri)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn run(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        let bundle = ArtifactBundle::new(ctx.root, &ctx.stack.sources, ctx.stack.excludes.clone());
        let name = ArtifactBundle::archive_name(&ctx.target.instance, Utc::now());

        let staged = artifact::package_and_upload(
            &bundle,
            &ctx.stack.secrets,
            ctx.staging,
            &ctx.target.instance,
            &name,
        )?;
        ctx.state.artifact = Some(staged);
        Ok(())
    }

    fn verify(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        let staged = ctx
            .state
            .artifact
            .as_ref()
            .ok_or_else(|| DeployError::Other("no artifact recorded after upload".into()))?;
        if ctx.staging.exists(&staged.archive_uri)? {
            Ok(())
        } else {
            Err(DeployError::Other(format!(
                "{} missing after upload",
                staged.archive_uri
            )))
        }
    }
}

/// Create the instance with the rendered startup script, unless an
/// instance of that name exists.
pub struct CreateInstance;

impl Step for CreateInstance {
    fn name(&self) -> &'static str {
        "create-instance"
    }

    fn precheck(&self, ctx: &mut Context<'_>) -> DeployResult<bool> {
        match ctx.provisioner.get_instance(&ctx.target.instance)? {
            Some(existing) => {
                info!(
                    instance = %existing.name,
                    status = %existing.status,
                    ip = existing.ip.as_deref().unwrap_or("-"),
                    "instance already exists, not creating another"
                );
                ctx.state.instance_ip = existing.ip;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn run(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        let staged = ctx.state.artifact.clone().ok_or_else(|| {
            DeployError::Other("no staged artifact recorded; stage-artifact must run first".into())
        })?;

        let plan = BootstrapPlan::new(ctx.target, &ctx.stack.apps, &ctx.stack.proxy, &staged);
        let t = ctx.target;

        let spec = InstanceSpec {
            name: t.instance.clone(),
            zone: t.zone.clone(),
            machine_type: t.machine_type.clone(),
            disk_size_gb: t.disk_size_gb,
            image_family: t.image_family.clone(),
            image_project: t.image_project.clone(),
            tags: vec![t.network_tag.clone()],
            startup_script: plan.render()?,
            metadata: vec![
                ("onager-artifact".to_string(), staged.archive_uri.clone()),
                ("onager-domain".to_string(), t.domain.clone()),
            ],
        };

        let instance = ctx.provisioner.create_instance(&spec)?;
        ctx.state.instance_ip = instance.ip;
        Ok(())
    }

    fn verify(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        ctx.provisioner
            .get_instance(&ctx.target.instance)?
            .map(|_| ())
            .ok_or_else(|| DeployError::InstanceNotFound(ctx.target.instance.clone()))
    }
}

/// Poll the bootstrap status until it reports a result.
pub struct AwaitBootstrap(pub Poll);

impl Step for AwaitBootstrap {
    fn name(&self) -> &'static str {
        "await-bootstrap"
    }

    fn run(&self, ctx: &mut Context<'_>) -> DeployResult<()> {
        let t = ctx.target;
        let shell = RemoteShell::new(ctx.runner, &t.instance, &t.zone, &t.project);
        let status = status::wait_for_completion(&shell, self.0)?;

        match &status.outcome {
            Outcome::Degraded(stages)
                if stages
                    .iter()
                    .any(|s| s == "issue-certificate" || s == "https-proxy") =>
            {
                warn!(
                    stages = %stages.join(", "),
                    domain = %t.domain,
                    "no certificate yet, the application is served over HTTP only. \
                     Point DNS at the instance and run `onager certificate`"
                );
            }
            Outcome::Degraded(stages) => {
                warn!(stages = %stages.join(", "), "bootstrap finished with soft failures");
            }
            _ => info!(instance = %t.instance, "bootstrap finished"),
        }
        Ok(())
    }
}
