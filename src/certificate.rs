use chrono::{DateTime, FixedOffset, Utc};

use crate::cmd::shell_quote;

/// Deploy hook run by certbot after every successful renewal.
pub const RENEWAL_HOOK_PATH: &str = "/etc/letsencrypt/renewal-hooks/deploy/reload-nginx.sh";

/// Days before expiry at which a certificate counts as due.
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

/// A webroot (HTTP challenge) issuance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub domain: String,
    pub email: String,
    pub webroot: String,
}

impl CertificateRequest {
    #[must_use]
    pub fn new(domain: &str, email: &str, webroot: &str) -> Self {
        Self {
            domain: domain.to_string(),
            email: email.to_string(),
            webroot: webroot.to_string(),
        }
    }

    /// `certbot certonly` invocation. Keeps an existing valid
    /// certificate instead of reissuing.
    #[must_use]
    pub fn certbot_command(&self) -> String {
        format!(
            "certbot certonly --webroot -w {} -d {} --email {} \
             --agree-tos --non-interactive --keep-until-expiring",
            shell_quote(&self.webroot),
            shell_quote(&self.domain),
            shell_quote(&self.email),
        )
    }

    #[must_use]
    pub fn fullchain_path(&self) -> String {
        format!("{}/fullchain.pem", crate::nginx::cert_dir(&self.domain))
    }
}

/// Hook body: reload, never restart, so open connections survive.
#[must_use]
pub fn renewal_hook() -> String {
    "#!/bin/sh\nnginx -t && systemctl reload nginx\n".to_string()
}

/// A certificate as reported by `certbot certificates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateState {
    pub name: String,
    pub domains: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl CertificateState {
    #[must_use]
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }

    #[must_use]
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        self.days_left(now) < RENEWAL_WINDOW_DAYS
    }

    #[must_use]
    pub fn covers(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d == domain)
    }
}

/// Parse the output of `certbot certificates`. Entries without a
/// readable expiry date are skipped.
#[must_use]
pub fn parse_certificates(output: &str) -> Vec<CertificateState> {
    let mut certs = Vec::new();
    let mut name: Option<String> = None;
    let mut domains: Vec<String> = Vec::new();

    for line in output.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix("Certificate Name:") {
            name = Some(value.trim().to_string());
            domains.clear();
        } else if let Some(value) = line.strip_prefix("Domains:") {
            domains = value.split_whitespace().map(String::from).collect();
        } else if let Some(value) = line.strip_prefix("Expiry Date:") {
            let Some(current) = name.take() else { continue };
            if let Some(expires_at) = parse_expiry(value) {
                certs.push(CertificateState {
                    name: current,
                    domains: std::mem::take(&mut domains),
                    expires_at,
                });
            }
        }
    }

    certs
}

// "2025-03-01 12:00:00+00:00 (VALID: 89 days)"
fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let stamp = value.split('(').next()?.trim();
    DateTime::<FixedOffset>::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S%:z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
