pub mod gce;

use tracing::info;

use crate::error::DeployResult;

/// An ingress rule opening one TCP port to instances carrying a
/// network tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub port: u16,
    pub tag: String,
    pub description: String,
}

impl FirewallRule {
    #[must_use]
    pub fn new(name: &str, port: u16, tag: &str) -> Self {
        Self {
            name: name.to_string(),
            port,
            tag: tag.to_string(),
            description: format!("Allow TCP {port} to instances tagged {tag}"),
        }
    }

    #[must_use]
    pub fn http(tag: &str) -> Self {
        Self::new("allow-http", 80, tag)
    }

    #[must_use]
    pub fn https(tag: &str) -> Self {
        Self::new("allow-https", 443, tag)
    }
}

/// Everything needed to create a compute instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub disk_size_gb: u32,
    pub image_family: String,
    pub image_project: String,
    pub tags: Vec<String>,
    pub startup_script: String,
    pub metadata: Vec<(String, String)>,
}

/// An existing compute instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeInstance {
    pub name: String,
    pub zone: String,
    pub status: String,
    pub ip: Option<String>,
}

/// Result of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyExists,
}

/// Creates, inspects and destroys the cloud resources of a
/// deployment.
pub trait Provisioner {
    /// Check that the cloud CLI is installed and authenticated.
    fn check_prerequisites(&self) -> DeployResult<()>;

    /// Create the rule unless one with the same name exists.
    fn ensure_firewall_rule(&self, rule: &FirewallRule) -> DeployResult<Ensured>;

    fn firewall_rule_exists(&self, name: &str) -> DeployResult<bool>;

    /// Create the bucket unless it exists.
    fn ensure_bucket(&self, name: &str, region: &str) -> DeployResult<Ensured>;

    fn bucket_exists(&self, name: &str) -> DeployResult<bool>;

    /// Create an instance. Not idempotent: calling this twice with
    /// the same name fails the second time. Guard with
    /// [`Provisioner::get_instance`].
    fn create_instance(&self, spec: &InstanceSpec) -> DeployResult<ComputeInstance>;

    /// Get an existing instance by name.
    fn get_instance(&self, name: &str) -> DeployResult<Option<ComputeInstance>>;

    /// Destroy an instance by name.
    fn destroy_instance(&self, name: &str) -> DeployResult<()>;
}

/// Turn the outcome of a create call into a conditional create:
/// "already exists" becomes [`Ensured::AlreadyExists`].
pub fn ensure(resource: &str, result: DeployResult<()>) -> DeployResult<Ensured> {
    match result {
        Ok(()) => {
            info!(resource, "created");
            Ok(Ensured::Created)
        }
        Err(e) if e.is_already_exists() => {
            info!(resource, "already exists, continuing");
            Ok(Ensured::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}
