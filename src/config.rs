use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

pub const DEFAULT_INSTANCE: &str = "app-server";
pub const DEFAULT_DOMAIN: &str = "app.example.com";
pub const DEFAULT_EMAIL: &str = "admin@example.com";
pub const DEFAULT_ZONE: &str = "us-central1-a";
pub const DEFAULT_MACHINE_TYPE: &str = "e2-medium";
pub const DEFAULT_DISK_SIZE_GB: u32 = 30;

/// Environment variables consulted for the project id, in order.
pub const PROJECT_ENV_VARS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "CLOUDSDK_CORE_PROJECT"];

/// Where and how to deploy. Resolved once before the workflow
/// starts and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub instance: String,
    pub project: String,
    pub zone: String,
    pub machine_type: String,
    pub disk_size_gb: u32,
    pub image_family: String,
    pub image_project: String,
    /// Network tag the firewall rules target.
    pub network_tag: String,
    /// Staging bucket name, without the `gs://` prefix.
    pub bucket: String,
    pub domain: String,
    pub email: String,
}

impl DeploymentTarget {
    /// Build a target with defaults for everything but the
    /// project. The bucket name is derived from project and
    /// instance.
    #[must_use]
    pub fn new(project: &str) -> Self {
        Self {
            instance: DEFAULT_INSTANCE.to_string(),
            project: project.to_string(),
            zone: DEFAULT_ZONE.to_string(),
            machine_type: DEFAULT_MACHINE_TYPE.to_string(),
            disk_size_gb: DEFAULT_DISK_SIZE_GB,
            image_family: "ubuntu-2204-lts".to_string(),
            image_project: "ubuntu-os-cloud".to_string(),
            network_tag: "http-server".to_string(),
            bucket: default_bucket(project, DEFAULT_INSTANCE),
            domain: DEFAULT_DOMAIN.to_string(),
            email: DEFAULT_EMAIL.to_string(),
        }
    }

    /// Changing the instance also moves the derived bucket name
    /// unless a bucket was set explicitly afterwards.
    #[must_use]
    pub fn instance(mut self, name: &str) -> Self {
        self.instance = name.to_string();
        self.bucket = default_bucket(&self.project, name);
        self
    }

    #[must_use]
    pub fn zone(mut self, zone: &str) -> Self {
        self.zone = zone.to_string();
        self
    }

    #[must_use]
    pub fn machine_type(mut self, machine_type: &str) -> Self {
        self.machine_type = machine_type.to_string();
        self
    }

    #[must_use]
    pub const fn disk_size_gb(mut self, gb: u32) -> Self {
        self.disk_size_gb = gb;
        self
    }

    #[must_use]
    pub fn bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    /// Region derived from the zone: `us-central1-a` -> `us-central1`.
    #[must_use]
    pub fn region(&self) -> &str {
        self.zone
            .rsplit_once('-')
            .map_or(self.zone.as_str(), |(region, _)| region)
    }

    #[must_use]
    pub fn bucket_uri(&self) -> String {
        format!("gs://{}", self.bucket)
    }

    /// Remote directory holding the extracted artifact.
    #[must_use]
    pub fn install_dir(&self) -> String {
        format!("/opt/{}", self.instance)
    }

    /// Reject values that would break resource names or generated
    /// configuration.
    pub fn validate(&self) -> DeployResult<()> {
        if !is_resource_name(&self.instance) {
            return Err(DeployError::InvalidConfig(format!(
                "instance name '{}' must be lowercase letters, digits \
                 and hyphens, start with a letter, at most 63 chars",
                self.instance
            )));
        }
        if self.project.trim().is_empty() {
            return Err(DeployError::InvalidConfig("project id is empty".into()));
        }
        if !is_bucket_name(&self.bucket) {
            return Err(DeployError::InvalidConfig(format!(
                "bucket name '{}' must be 3-63 lowercase letters, digits, '-', '_' \
                 or '.', starting and ending with a letter or digit; \
                 pass a shorter one with --bucket",
                self.bucket
            )));
        }
        if !is_hostname(&self.domain) {
            return Err(DeployError::InvalidConfig(format!(
                "domain '{}' is not a valid hostname",
                self.domain
            )));
        }
        if !self.email.contains('@') || self.email.chars().any(char::is_whitespace) {
            return Err(DeployError::InvalidConfig(format!(
                "email '{}' is not a valid address",
                self.email
            )));
        }
        if self.disk_size_gb < 10 {
            return Err(DeployError::InvalidConfig(
                "disk size must be at least 10 GB".into(),
            ));
        }
        Ok(())
    }
}

/// Resolve the project id: explicit value, then the environment,
/// then the prompt.
pub fn resolve_project(
    explicit: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    prompt: impl FnOnce() -> DeployResult<String>,
) -> DeployResult<String> {
    if let Some(project) = explicit.filter(|p| !p.trim().is_empty()) {
        return Ok(project.trim().to_string());
    }

    for var in PROJECT_ENV_VARS {
        if let Some(project) = env(var).filter(|p| !p.trim().is_empty()) {
            return Ok(project.trim().to_string());
        }
    }

    let project = prompt()?;
    if project.trim().is_empty() {
        return Err(DeployError::EnvMissing(format!(
            "{} (no project id entered)",
            PROJECT_ENV_VARS[0]
        )));
    }
    Ok(project.trim().to_string())
}

/// Ask for the project id on stdin.
pub fn prompt_project() -> DeployResult<String> {
    eprint!("Google Cloud project id: ");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn default_bucket(project: &str, instance: &str) -> String {
    format!("{project}-{instance}-deploy")
}

fn is_resource_name(name: &str) -> bool {
    name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_bucket_name(name: &str) -> bool {
    let edge_ok = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    (3..=63).contains(&name.len())
        && name.starts_with(edge_ok)
        && name.ends_with(edge_ok)
        && name
            .chars()
            .all(|c| edge_ok(c) || matches!(c, '-' | '_' | '.'))
}

fn is_hostname(domain: &str) -> bool {
    !domain.is_empty()
        && domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let target = DeploymentTarget::new("my-proj");

        assert_eq!(target.instance, "app-server");
        assert_eq!(target.zone, "us-central1-a");
        assert_eq!(target.region(), "us-central1");
        assert_eq!(target.bucket, "my-proj-app-server-deploy");
        assert_eq!(target.install_dir(), "/opt/app-server");
        assert!(target.validate().is_ok());
    }

    #[test]
    fn explicit_bucket_survives_later_setters() {
        let target = DeploymentTarget::new("p")
            .instance("demo")
            .bucket("staging")
            .zone("europe-west1-b");

        assert_eq!(target.bucket, "staging");
        assert_eq!(target.region(), "europe-west1");
    }

    #[test]
    fn rejects_derived_bucket_over_length_limit() {
        let target = DeploymentTarget::new("my-company-production-42")
            .instance("customer-portal-backend-staging-eu");

        assert!(target.bucket.len() > 63);
        assert!(matches!(
            target.validate(),
            Err(DeployError::InvalidConfig(ref msg)) if msg.contains("--bucket")
        ));
        assert!(target.bucket("portal-staging").validate().is_ok());
    }

    #[test]
    fn rejects_bucket_from_domain_scoped_project() {
        let target = DeploymentTarget::new("example.com:web").instance("demo");
        assert!(matches!(
            target.validate(),
            Err(DeployError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_instance_name() {
        let target = DeploymentTarget::new("p").instance("Demo_1");
        assert!(matches!(
            target.validate(),
            Err(DeployError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_domain_with_spaces() {
        let target = DeploymentTarget::new("p").domain("demo example.com");
        assert!(target.validate().is_err());
    }
}
