mod common;

use std::time::Duration;

use common::FakeCloud;
use onager::artifact::{StagedArtifact, StagedSecret};
use onager::bootstrap::status::{self, BootstrapStatus, Outcome, Poll, StageState};
use onager::bootstrap::{BootstrapPlan, Stage};
use onager::error::DeployError;
use onager::ssh::RemoteShell;
use onager::{DeploymentTarget, Stack};

fn plan() -> BootstrapPlan {
    let target = DeploymentTarget::new("proj")
        .instance("demo")
        .domain("demo.example.com")
        .email("ops@example.com");
    let artifact = StagedArtifact {
        archive_uri: "gs://proj-demo-deploy/artifacts/demo-20260101000000.tar.gz".into(),
        secrets: vec![StagedSecret {
            path: "backend/.env".into(),
            uri: "gs://proj-demo-deploy/secrets/demo/backend/.env".into(),
        }],
    };
    let stack = Stack::web();
    BootstrapPlan::new(&target, &stack.apps, &stack.proxy, &artifact)
}

#[test]
fn stages_run_in_order_with_policies() {
    let script = plan().render().expect("render");

    let runs: Vec<&str> = script
        .lines()
        .filter(|l| l.starts_with("run_stage "))
        .collect();
    assert_eq!(
        runs,
        vec![
            "run_stage update-packages fatal",
            "run_stage install-packages fatal",
            "run_stage fetch-artifact fatal",
            "run_stage start-containers fatal",
            "run_stage http-proxy fatal",
            "run_stage issue-certificate soft",
            "run_stage https-proxy soft",
            "run_stage service-unit fatal",
            "run_stage cleanup soft",
        ]
    );
}

#[test]
fn script_logs_and_records_progress() {
    let script = plan().render().expect("render");

    assert!(script.starts_with("#!/usr/bin/env bash\n"));
    assert!(script.contains("exec >>\"$LOG_FILE\" 2>&1"));
    assert!(script.contains("LOG_FILE=/var/log/onager-bootstrap.log"));
    assert!(script.contains("status \"run started"));
    assert!(script.contains("( set -e; \"stage_${name//-/_}\" )"));
    assert!(script.contains("touch \"$STATE_DIR/stages/$name.done\""));
    assert!(script.contains("status \"result ok\""));
    assert!(script.contains("status \"result degraded$SOFT_FAILURES\""));
    for stage in Stage::ALL {
        let function = format!("stage_{}() {{", stage.name().replace('-', "_"));
        assert!(script.contains(&function), "missing {function}");
    }
}

#[test]
fn nginx_is_reloaded_never_restarted() {
    let plan = plan();
    for stage in Stage::ALL {
        let body = plan.stage_body(stage).expect("body");
        assert!(!body.contains("restart nginx"), "{} restarts nginx", stage.name());
    }
    for stage in [Stage::HttpProxy, Stage::HttpsProxy] {
        let body = plan.stage_body(stage).expect("body");
        assert!(body.contains("nginx -t\nsystemctl reload nginx\n"));
    }
}

#[test]
fn fetch_stage_installs_secrets_privately() {
    let body = plan().stage_body(Stage::FetchArtifact).expect("body");

    assert!(body.contains(
        "gcloud storage cp gs://proj-demo-deploy/artifacts/demo-20260101000000.tar.gz /tmp/onager-artifact.tar.gz"
    ));
    assert!(body.contains("tar -xzf /tmp/onager-artifact.tar.gz -C /opt/demo"));
    assert!(body.contains(
        "gcloud storage cp gs://proj-demo-deploy/secrets/demo/backend/.env /opt/demo/backend/.env"
    ));
    assert!(body.contains("chmod 600 /opt/demo/backend/.env"));
}

#[test]
fn containers_stage_writes_compose_file() {
    let body = plan().stage_body(Stage::StartContainers).expect("body");

    assert!(body.contains("cat >/opt/demo/docker-compose.yml <<'ONAGER_EOF'"));
    assert!(body.contains("demo-network"));
    assert!(body.contains("cd /opt/demo\ndocker compose up -d --build\n"));
}

#[test]
fn http_stage_enables_site() {
    let body = plan().stage_body(Stage::HttpProxy).expect("body");

    assert!(body.contains("install -d -m 755 /var/www/certbot"));
    assert!(body.contains("cat >/etc/nginx/sites-available/demo <<'ONAGER_EOF'"));
    assert!(body.contains("ln -sf /etc/nginx/sites-available/demo /etc/nginx/sites-enabled/demo"));
    assert!(body.contains("rm -f /etc/nginx/sites-enabled/default"));
    assert!(!body.contains("listen 443"));
}

#[test]
fn certificate_stage_uses_webroot_and_installs_hook() {
    let body = plan().stage_body(Stage::IssueCertificate).expect("body");

    assert!(body.contains(
        "certbot certonly --webroot -w /var/www/certbot -d demo.example.com --email ops@example.com"
    ));
    assert!(body.contains("--keep-until-expiring"));
    assert!(body.contains("/etc/letsencrypt/renewal-hooks/deploy/reload-nginx.sh"));
    assert!(body.contains("nginx -t && systemctl reload nginx"));
}

#[test]
fn https_stage_requires_certificate() {
    let body = plan().stage_body(Stage::HttpsProxy).expect("body");

    assert!(
        body.contains("if [ ! -f /etc/letsencrypt/live/demo.example.com/fullchain.pem ]; then")
    );
    assert!(body.contains("listen 443 ssl http2;"));
}

#[test]
fn service_unit_and_cleanup() {
    let plan = plan();
    let unit = plan.stage_body(Stage::ServiceUnit).expect("body");
    let cleanup = plan.stage_body(Stage::Cleanup).expect("body");

    assert!(unit.contains("cat >/etc/systemd/system/demo.service <<'ONAGER_EOF'"));
    assert!(unit.contains("WorkingDirectory=/opt/demo"));
    assert!(unit.contains("systemctl enable demo.service"));
    assert!(cleanup.contains("/etc/logrotate.d/onager-bootstrap"));
    assert!(cleanup.contains(
        "gcloud storage rm gs://proj-demo-deploy/artifacts/demo-20260101000000.tar.gz"
    ));
}

#[test]
fn certificate_retry_forgets_markers_and_is_fatal() {
    let script = plan().render_certificate_retry().expect("render");

    assert!(script.contains("rm -f \"$STATE_DIR/stages/issue-certificate.done\""));
    assert!(script.contains("rm -f \"$STATE_DIR/stages/https-proxy.done\""));
    assert!(script.contains("run_stage issue-certificate fatal"));
    assert!(script.contains("run_stage https-proxy fatal"));
    assert!(script.contains("tee -a \"$LOG_FILE\""));
    assert!(!script.contains("apt-get"));
    assert!(!script.contains("run_stage fetch-artifact"));
}

#[test]
fn certificate_retry_keeps_boot_history() {
    let script = plan().render_certificate_retry().expect("render");

    assert!(script.contains("STATUS_FILE=/var/lib/onager/certificate-status"));
    assert!(!script.contains("STATUS_FILE=/var/lib/onager/status\n"));
    assert!(plan().render().expect("render").contains("STATUS_FILE=/var/lib/onager/status\n"));
}

fn shell_with_status(text: &str) -> FakeCloud {
    let cloud = FakeCloud::new();
    cloud.with(|s| {
        s.instances.insert("demo".into(), String::new());
        s.status_file = text.to_string();
    });
    cloud
}

const fn instant(attempts: u32) -> Poll {
    Poll {
        attempts,
        interval: Duration::ZERO,
    }
}

#[test]
fn wait_returns_completed_status() {
    let cloud = shell_with_status("run started t\nstage cleanup done\nresult ok\n");
    let shell = RemoteShell::new(&cloud, "demo", "us-central1-a", "proj");

    let status = status::wait_for_completion(&shell, instant(5)).expect("completed");

    assert_eq!(status.outcome, Outcome::Completed);
    assert_eq!(cloud.count_calls("compute ssh"), 1);
}

#[test]
fn wait_surfaces_fatal_failure() {
    let cloud = shell_with_status(
        "run started t\nstage fetch-artifact failed\nresult failed fetch-artifact\n",
    );
    let shell = RemoteShell::new(&cloud, "demo", "us-central1-a", "proj");

    let err = status::wait_for_completion(&shell, instant(5)).unwrap_err();

    assert!(matches!(err, DeployError::BootstrapFailed(ref s) if s == "fetch-artifact"));
}

#[test]
fn unreachable_instance_counts_as_pending() {
    let cloud = FakeCloud::new();
    let shell = RemoteShell::new(&cloud, "demo", "us-central1-a", "proj");

    let err = status::wait_for_completion(&shell, instant(3)).unwrap_err();

    assert!(matches!(err, DeployError::BootstrapTimeout(3)));
    assert_eq!(cloud.count_calls("compute ssh"), 3);
}

#[test]
fn skipped_stages_from_rerun_are_parsed() {
    let status = BootstrapStatus::parse(
        "run started t\nstage update-packages skipped\nstage fetch-artifact skipped\n\
         stage issue-certificate started\n",
    );

    assert_eq!(status.stages[0], ("update-packages".into(), StageState::Skipped));
    assert_eq!(
        status.outcome,
        Outcome::Running {
            current: Some("issue-certificate".into())
        }
    );
}

#[test]
fn certificate_retry_status_is_read_separately() {
    let cloud = shell_with_status(
        "run started t\nstage start-containers done\nstage issue-certificate soft-failed\n\
         result degraded issue-certificate\n",
    );
    cloud.with(|s| {
        s.certificate_status = "run started u\nstage issue-certificate done\n\
                                stage https-proxy done\nresult ok\n"
            .into();
    });
    let shell = RemoteShell::new(&cloud, "demo", "us-central1-a", "proj");

    let boot = status::fetch(&shell).expect("boot status");
    let retry = status::fetch_certificate_retry(&shell).expect("retry status");

    assert!(boot.stages.iter().any(|(n, _)| n == "start-containers"));
    assert_eq!(boot.outcome, Outcome::Degraded(vec!["issue-certificate".into()]));
    assert_eq!(retry.stages.len(), 2);
    assert_eq!(retry.outcome, Outcome::Completed);
}
