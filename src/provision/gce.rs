use std::io::Write;
use std::path::PathBuf;

use tracing::info;

use crate::cmd::CommandRunner;
use crate::error::{DeployError, DeployResult};
use crate::provision::{ComputeInstance, Ensured, FirewallRule, InstanceSpec, Provisioner};

/// Compute Engine provisioner using the `gcloud` CLI.
pub struct ComputeEngine<'r> {
    runner: &'r dyn CommandRunner,
    pub project: String,
    pub zone: String,
    scratch_dir: PathBuf,
}

impl<'r> ComputeEngine<'r> {
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner, project: &str, zone: &str) -> Self {
        Self {
            runner,
            project: project.to_string(),
            zone: zone.to_string(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory the startup script is written to before upload.
    #[must_use]
    pub fn scratch_dir(mut self, dir: &std::path::Path) -> Self {
        self.scratch_dir = dir.to_path_buf();
        self
    }

    fn gcloud(&self, args: &[&str]) -> DeployResult<String> {
        let project = format!("--project={}", self.project);
        let mut full: Vec<&str> = args.to_vec();
        full.push(&project);
        full.push("--quiet");
        self.runner.run("gcloud", &full)
    }
}

impl Provisioner for ComputeEngine<'_> {
    fn check_prerequisites(&self) -> DeployResult<()> {
        if !self.runner.command_exists("gcloud") {
            return Err(DeployError::ToolMissing(
                "gcloud is not installed. \
                 Install from: https://cloud.google.com/sdk/docs/install"
                    .into(),
            ));
        }

        let account = self
            .runner
            .run(
                "gcloud",
                &[
                    "auth",
                    "list",
                    "--filter=status:ACTIVE",
                    "--format=value(account)",
                ],
            )
            .unwrap_or_default();

        if account.trim().is_empty() {
            return Err(DeployError::PrerequisiteMissing(
                "gcloud is not authenticated. Run: gcloud auth login".into(),
            ));
        }

        info!(account = %account.trim(), project = %self.project, "gcloud ready");
        Ok(())
    }

    fn ensure_firewall_rule(&self, rule: &FirewallRule) -> DeployResult<Ensured> {
        let allow = format!("--allow=tcp:{}", rule.port);
        let tags = format!("--target-tags={}", rule.tag);
        let description = format!("--description={}", rule.description);

        let result = self
            .gcloud(&[
                "compute",
                "firewall-rules",
                "create",
                &rule.name,
                &allow,
                &tags,
                "--direction=INGRESS",
                "--source-ranges=0.0.0.0/0",
                &description,
            ])
            .map(|_| ());

        super::ensure(&format!("firewall rule {}", rule.name), result)
    }

    fn firewall_rule_exists(&self, name: &str) -> DeployResult<bool> {
        match self.gcloud(&[
            "compute",
            "firewall-rules",
            "describe",
            name,
            "--format=value(name)",
        ]) {
            Ok(out) => Ok(out.trim() == name),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn ensure_bucket(&self, name: &str, region: &str) -> DeployResult<Ensured> {
        let uri = format!("gs://{name}");
        let location = format!("--location={region}");

        let result = self
            .gcloud(&[
                "storage",
                "buckets",
                "create",
                &uri,
                &location,
                "--uniform-bucket-level-access",
            ])
            .map(|_| ());

        super::ensure(&format!("bucket {uri}"), result)
    }

    fn bucket_exists(&self, name: &str) -> DeployResult<bool> {
        let uri = format!("gs://{name}");
        match self.gcloud(&["storage", "buckets", "describe", &uri, "--format=value(name)"]) {
            Ok(out) => Ok(!out.trim().is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_instance(&self, spec: &InstanceSpec) -> DeployResult<ComputeInstance> {
        info!(instance = %spec.name, zone = %spec.zone, "creating instance");

        let mut script = tempfile::Builder::new()
            .prefix("onager-startup-")
            .suffix(".sh")
            .tempfile_in(&self.scratch_dir)?;
        script.write_all(spec.startup_script.as_bytes())?;
        script.flush()?;

        let zone = format!("--zone={}", spec.zone);
        let machine_type = format!("--machine-type={}", spec.machine_type);
        let disk = format!("--boot-disk-size={}GB", spec.disk_size_gb);
        let family = format!("--image-family={}", spec.image_family);
        let image_project = format!("--image-project={}", spec.image_project);
        let tags = format!("--tags={}", spec.tags.join(","));
        let startup = format!(
            "--metadata-from-file=startup-script={}",
            script.path().display()
        );

        let mut args = vec![
            "compute",
            "instances",
            "create",
            &spec.name,
            &zone,
            &machine_type,
            &disk,
            "--boot-disk-type=pd-balanced",
            &family,
            &image_project,
            &tags,
            "--scopes=storage-rw",
            &startup,
        ];

        let metadata = if spec.metadata.is_empty() {
            None
        } else {
            Some(format!(
                "--metadata={}",
                spec.metadata
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",")
            ))
        };
        if let Some(m) = &metadata {
            args.push(m);
        }

        self.gcloud(&args)?;

        let instance = self
            .get_instance(&spec.name)?
            .ok_or_else(|| DeployError::InstanceNotFound(spec.name.clone()))?;
        info!(
            instance = %instance.name,
            ip = instance.ip.as_deref().unwrap_or("-"),
            "instance created"
        );
        Ok(instance)
    }

    fn get_instance(&self, name: &str) -> DeployResult<Option<ComputeInstance>> {
        let zone = format!("--zone={}", self.zone);
        let output = match self.gcloud(&[
            "compute",
            "instances",
            "describe",
            name,
            &zone,
            "--format=value(status,networkInterfaces[0].accessConfigs[0].natIP)",
        ]) {
            Ok(out) => out,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(parse_describe(name, &self.zone, &output))
    }

    fn destroy_instance(&self, name: &str) -> DeployResult<()> {
        if self.get_instance(name)?.is_none() {
            return Err(DeployError::InstanceNotFound(name.into()));
        }

        info!(instance = name, "deleting instance");
        let zone = format!("--zone={}", self.zone);
        self.gcloud(&["compute", "instances", "delete", name, &zone])?;
        info!(instance = name, "instance deleted");
        Ok(())
    }
}

/// Parse `value(status,natIP)` output: tab- or space-separated.
fn parse_describe(name: &str, zone: &str, output: &str) -> Option<ComputeInstance> {
    let mut fields = output.split_whitespace();
    let status = fields.next()?.to_string();
    let ip = fields.next().map(String::from);

    Some(ComputeInstance {
        name: name.to_string(),
        zone: zone.to_string(),
        status,
        ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_running_instance() {
        let instance = parse_describe("demo", "us-central1-a", "RUNNING\t34.10.20.30");

        assert_eq!(
            instance,
            Some(ComputeInstance {
                name: "demo".into(),
                zone: "us-central1-a".into(),
                status: "RUNNING".into(),
                ip: Some("34.10.20.30".into()),
            })
        );
    }

    #[test]
    fn parse_instance_without_ip() {
        let instance = parse_describe("demo", "z", "TERMINATED").expect("instance");
        assert_eq!(instance.status, "TERMINATED");
        assert!(instance.ip.is_none());
    }

    #[test]
    fn parse_empty_output() {
        assert!(parse_describe("demo", "z", "").is_none());
    }
}
