use std::fmt::Write as _;

/// A systemd service unit that brings the compose stack up on
/// boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub name: String,
    pub description: String,
    pub working_dir: String,
    pub requires: Vec<String>,
    pub after: Vec<String>,
    pub exec_start: String,
    pub exec_stop: String,
}

impl ServiceUnit {
    /// Unit for a compose project in `working_dir`.
    #[must_use]
    pub fn compose(name: &str, working_dir: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("{name} application stack"),
            working_dir: working_dir.to_string(),
            requires: vec!["docker.service".to_string()],
            after: vec![
                "docker.service".to_string(),
                "network-online.target".to_string(),
            ],
            exec_start: "/usr/bin/docker compose up -d".to_string(),
            exec_stop: "/usr/bin/docker compose down".to_string(),
        }
    }

    #[must_use]
    pub fn path(&self) -> String {
        format!("/etc/systemd/system/{}.service", self.name)
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[Unit]\n");
        let _ = writeln!(out, "Description={}", self.description);
        if !self.requires.is_empty() {
            let _ = writeln!(out, "Requires={}", self.requires.join(" "));
        }
        if !self.after.is_empty() {
            let _ = writeln!(out, "After={}", self.after.join(" "));
        }
        out.push_str("\n[Service]\n");
        out.push_str("Type=oneshot\n");
        out.push_str("RemainAfterExit=yes\n");
        let _ = writeln!(out, "WorkingDirectory={}", self.working_dir);
        let _ = writeln!(out, "ExecStart={}", self.exec_start);
        let _ = writeln!(out, "ExecStop={}", self.exec_stop);
        out.push_str("TimeoutStartSec=0\n");
        out.push_str("\n[Install]\n");
        out.push_str("WantedBy=multi-user.target\n");
        out
    }
}

/// Rotation policy for a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRotate {
    pub log_path: String,
    pub frequency: String,
    pub keep: u32,
}

impl LogRotate {
    #[must_use]
    pub fn weekly(log_path: &str) -> Self {
        Self {
            log_path: log_path.to_string(),
            frequency: "weekly".to_string(),
            keep: 4,
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "{} {{\n    {}\n    rotate {}\n    compress\n    delaycompress\n    \
             missingok\n    notifempty\n    copytruncate\n}}\n",
            self.log_path, self.frequency, self.keep
        )
    }
}
