//! Startup script run by the instance on boot.
//!
//! The script is a fixed sequence of [`Stage`]s rendered from
//! typed configuration. Each stage runs in a subshell with
//! `errexit`, writes a `.done` marker on success and is skipped
//! when the marker exists, so the script is safe to run again on
//! every boot. Progress is appended to [`STATUS_FILE`] for
//! [`status::wait_for_completion`] to poll; all output goes to
//! [`LOG_FILE`].

pub mod status;

use std::fmt::Write as _;

use crate::app::App;
use crate::artifact::StagedArtifact;
use crate::certificate::{self, CertificateRequest};
use crate::cmd::shell_quote;
use crate::compose;
use crate::config::DeploymentTarget;
use crate::error::{DeployError, DeployResult};
use crate::nginx;
use crate::proxy::Proxy;
use crate::units::{LogRotate, ServiceUnit};

pub const LOG_FILE: &str = "/var/log/onager-bootstrap.log";
pub const STATE_DIR: &str = "/var/lib/onager";
pub const STATUS_FILE: &str = "/var/lib/onager/status";
/// Progress of `onager certificate` runs, kept apart from the boot
/// history.
pub const CERTIFICATE_STATUS_FILE: &str = "/var/lib/onager/certificate-status";
pub const LOGROTATE_PATH: &str = "/etc/logrotate.d/onager-bootstrap";

const HEREDOC_END: &str = "ONAGER_EOF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    UpdatePackages,
    InstallPackages,
    FetchArtifact,
    StartContainers,
    HttpProxy,
    IssueCertificate,
    HttpsProxy,
    ServiceUnit,
    Cleanup,
}

impl Stage {
    pub const ALL: [Self; 9] = [
        Self::UpdatePackages,
        Self::InstallPackages,
        Self::FetchArtifact,
        Self::StartContainers,
        Self::HttpProxy,
        Self::IssueCertificate,
        Self::HttpsProxy,
        Self::ServiceUnit,
        Self::Cleanup,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::UpdatePackages => "update-packages",
            Self::InstallPackages => "install-packages",
            Self::FetchArtifact => "fetch-artifact",
            Self::StartContainers => "start-containers",
            Self::HttpProxy => "http-proxy",
            Self::IssueCertificate => "issue-certificate",
            Self::HttpsProxy => "https-proxy",
            Self::ServiceUnit => "service-unit",
            Self::Cleanup => "cleanup",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Whether a failure stops the bootstrap. Certificate work and
    /// cleanup degrade the deployment instead.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::IssueCertificate | Self::HttpsProxy | Self::Cleanup)
    }

    fn function_name(self) -> String {
        format!("stage_{}", self.name().replace('-', "_"))
    }
}

/// Everything the instance needs to bring the stack up.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub target: DeploymentTarget,
    pub apps: Vec<App>,
    pub proxy: Proxy,
    pub artifact: StagedArtifact,
}

impl BootstrapPlan {
    #[must_use]
    pub fn new(
        target: &DeploymentTarget,
        apps: &[App],
        proxy: &Proxy,
        artifact: &StagedArtifact,
    ) -> Self {
        Self {
            target: target.clone(),
            apps: apps.to_vec(),
            proxy: proxy.clone(),
            artifact: artifact.clone(),
        }
    }

    #[must_use]
    pub fn certificate_request(&self) -> CertificateRequest {
        CertificateRequest::new(&self.target.domain, &self.target.email, &self.proxy.acme_webroot)
    }

    fn site_path(&self) -> String {
        format!("/etc/nginx/sites-available/{}", self.target.instance)
    }

    /// The startup script: every stage, output to the log file.
    pub fn render(&self) -> DeployResult<String> {
        let mut out = self.preamble(true, STATUS_FILE);
        for stage in Stage::ALL {
            out.push_str(&self.stage_function(stage)?);
        }
        out.push('\n');
        for stage in Stage::ALL {
            let policy = if stage.is_fatal() { "fatal" } else { "soft" };
            let _ = writeln!(out, "run_stage {} {policy}", stage.name());
        }
        out.push_str(FINISH);
        Ok(out)
    }

    /// Script for `onager certificate`: forget earlier certificate
    /// attempts, issue, swap to HTTPS. Any failure is fatal so the
    /// operator sees it in the exit code. Progress goes to
    /// [`CERTIFICATE_STATUS_FILE`].
    pub fn render_certificate_retry(&self) -> DeployResult<String> {
        let stages = [Stage::IssueCertificate, Stage::HttpsProxy];
        let mut out = self.preamble(false, CERTIFICATE_STATUS_FILE);
        for stage in stages {
            out.push_str(&self.stage_function(stage)?);
        }
        out.push('\n');
        for stage in stages {
            let _ = writeln!(out, "rm -f \"$STATE_DIR/stages/{}.done\"", stage.name());
            let _ = writeln!(out, "run_stage {} fatal", stage.name());
        }
        out.push_str(FINISH);
        Ok(out)
    }

    /// Shell body of one stage.
    pub fn stage_body(&self, stage: Stage) -> DeployResult<String> {
        let t = &self.target;
        let install_dir = shell_quote(&t.install_dir());
        let mut body = String::new();

        match stage {
            Stage::UpdatePackages => {
                body.push_str("apt-get update -y\n");
                body.push_str("apt-get upgrade -y\n");
            }
            Stage::InstallPackages => {
                body.push_str("apt-get install -y ca-certificates curl gnupg nginx certbot\n");
                body.push_str(
                    "if ! command -v docker >/dev/null 2>&1; then\n    \
                     curl -fsSL https://get.docker.com | sh\n\
                     fi\n",
                );
                body.push_str("docker compose version\n");
                body.push_str("systemctl enable --now docker\n");
                body.push_str("systemctl enable --now nginx\n");
            }
            Stage::FetchArtifact => {
                let archive = shell_quote(&self.artifact.archive_uri);
                let _ = writeln!(body, "install -d -m 755 {install_dir}");
                let _ = writeln!(body, "gcloud storage cp {archive} /tmp/onager-artifact.tar.gz");
                let _ = writeln!(body, "tar -xzf /tmp/onager-artifact.tar.gz -C {install_dir}");
                body.push_str("rm -f /tmp/onager-artifact.tar.gz\n");
                for secret in &self.artifact.secrets {
                    let dest = shell_quote(&format!("{}/{}", t.install_dir(), secret.path));
                    let _ = writeln!(body, "install -d -m 755 \"$(dirname {dest})\"");
                    let _ = writeln!(body, "gcloud storage cp {} {dest}", shell_quote(&secret.uri));
                    let _ = writeln!(body, "chmod 600 {dest}");
                }
            }
            Stage::StartContainers => {
                let content = compose::render(&self.apps, &format!("{}-network", t.instance))?;
                let path = format!("{}/docker-compose.yml", t.install_dir());
                body.push_str(&write_file(&path, &content, "644")?);
                let _ = writeln!(body, "cd {install_dir}");
                body.push_str("docker compose up -d --build\n");
            }
            Stage::HttpProxy => {
                let site = self.site_path();
                let _ = writeln!(
                    body,
                    "install -d -m 755 {}",
                    shell_quote(&self.proxy.acme_webroot)
                );
                let http_only = nginx::render_http_only(&self.proxy, &t.domain);
                body.push_str(&write_file(&site, &http_only, "644")?);
                body.push_str(&enable_site(&site, &t.instance));
                body.push_str(RELOAD_NGINX);
            }
            Stage::IssueCertificate => {
                let request = self.certificate_request();
                body.push_str(&write_file(
                    certificate::RENEWAL_HOOK_PATH,
                    &certificate::renewal_hook(),
                    "755",
                )?);
                let _ = writeln!(body, "{}", request.certbot_command());
                body.push_str("systemctl enable --now certbot.timer || true\n");
            }
            Stage::HttpsProxy => {
                let request = self.certificate_request();
                let fullchain = shell_quote(&request.fullchain_path());
                let _ = writeln!(body, "if [ ! -f {fullchain} ]; then");
                let _ = writeln!(
                    body,
                    "    echo \"no certificate at {fullchain}, keeping HTTP-only site\""
                );
                body.push_str("    exit 1\nfi\n");
                let https = nginx::render_https(&self.proxy, &t.domain);
                body.push_str(&write_file(&self.site_path(), &https, "644")?);
                body.push_str(RELOAD_NGINX);
            }
            Stage::ServiceUnit => {
                let unit = ServiceUnit::compose(&t.instance, &t.install_dir());
                body.push_str(&write_file(&unit.path(), &unit.render(), "644")?);
                body.push_str("systemctl daemon-reload\n");
                let _ = writeln!(body, "systemctl enable {}.service", shell_quote(&unit.name));
            }
            Stage::Cleanup => {
                let rotate = LogRotate::weekly(LOG_FILE);
                body.push_str(&write_file(LOGROTATE_PATH, &rotate.render(), "644")?);
                let _ = writeln!(
                    body,
                    "gcloud storage rm {}",
                    shell_quote(&self.artifact.archive_uri)
                );
            }
        }

        Ok(body)
    }

    fn stage_function(&self, stage: Stage) -> DeployResult<String> {
        let body = self.stage_body(stage)?;
        // Bodies stay unindented: heredoc payloads are written verbatim.
        Ok(format!("\n{}() {{\n{body}}}\n", stage.function_name()))
    }

    fn preamble(&self, to_log_file: bool, status_file: &str) -> String {
        let mut out = String::from(
            "#!/usr/bin/env bash\n# Generated by onager. Do not edit.\nset -uo pipefail\n\n",
        );
        let _ = writeln!(out, "LOG_FILE={LOG_FILE}");
        let _ = writeln!(out, "STATE_DIR={STATE_DIR}");
        let _ = writeln!(out, "STATUS_FILE={status_file}");
        out.push_str("export DEBIAN_FRONTEND=noninteractive\n\n");
        out.push_str("mkdir -p \"$STATE_DIR/stages\"\n");
        if to_log_file {
            out.push_str("exec >>\"$LOG_FILE\" 2>&1\n");
        } else {
            out.push_str("exec > >(tee -a \"$LOG_FILE\") 2>&1\n");
        }
        out.push_str(RUNTIME);
        out
    }
}

const RUNTIME: &str = r#"
SOFT_FAILURES=""

status() {
    printf '%s\n' "$*" >>"$STATUS_FILE"
}

log() {
    echo "[$(date -Is)] $*"
}

run_stage() {
    local name="$1" policy="$2"
    if [ -f "$STATE_DIR/stages/$name.done" ]; then
        log "stage $name already done, skipping"
        status "stage $name skipped"
        return 0
    fi
    log "stage $name started"
    status "stage $name started"
    ( set -e; "stage_${name//-/_}" )
    local rc=$?
    if [ "$rc" -eq 0 ]; then
        touch "$STATE_DIR/stages/$name.done"
        log "stage $name done"
        status "stage $name done"
    elif [ "$policy" = fatal ]; then
        log "stage $name failed with exit code $rc, aborting"
        status "stage $name failed"
        status "result failed $name"
        exit 1
    else
        log "stage $name failed with exit code $rc, continuing"
        status "stage $name soft-failed"
        SOFT_FAILURES="$SOFT_FAILURES $name"
    fi
}

status "run started $(date -Is)"
"#;

const FINISH: &str = r#"
if [ -n "$SOFT_FAILURES" ]; then
    log "bootstrap finished with failures:$SOFT_FAILURES"
    status "result degraded$SOFT_FAILURES"
else
    log "bootstrap finished"
    status "result ok"
fi
"#;

const RELOAD_NGINX: &str = "nginx -t\nsystemctl reload nginx\n";

/// Write `content` to `path` through a quoted heredoc, so nothing
/// in it is expanded by the shell.
fn write_file(path: &str, content: &str, mode: &str) -> DeployResult<String> {
    if content.lines().any(|l| l.trim() == HEREDOC_END) {
        return Err(DeployError::InvalidConfig(format!(
            "content for {path} contains the line {HEREDOC_END}"
        )));
    }

    let quoted = shell_quote(path);
    let mut out = String::new();
    let _ = writeln!(out, "install -d -m 755 \"$(dirname {quoted})\"");
    let _ = writeln!(out, "cat >{quoted} <<'{HEREDOC_END}'");
    out.push_str(content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "{HEREDOC_END}");
    let _ = writeln!(out, "chmod {mode} {quoted}");
    Ok(out)
}

fn enable_site(site_path: &str, name: &str) -> String {
    format!(
        "ln -sf {} {}\nrm -f /etc/nginx/sites-enabled/default\n",
        shell_quote(site_path),
        shell_quote(&format!("/etc/nginx/sites-enabled/{name}"))
    )
}
