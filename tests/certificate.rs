use chrono::{TimeZone, Utc};
use onager::certificate::{self, CertificateRequest};

const CERTBOT_OUTPUT: &str = "\
Saving debug log to /var/log/letsencrypt/letsencrypt.log

- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
Found the following certs:
  Certificate Name: demo.example.com
    Serial Number: 4a1b2c3d
    Key Type: ECDSA
    Domains: demo.example.com www.demo.example.com
    Expiry Date: 2026-03-01 12:00:00+00:00 (VALID: 89 days)
    Certificate Path: /etc/letsencrypt/live/demo.example.com/fullchain.pem
    Private Key Path: /etc/letsencrypt/live/demo.example.com/privkey.pem
  Certificate Name: old.example.com
    Domains: old.example.com
    Expiry Date: 2026-01-10 00:00:00+00:00 (VALID: 9 days)
- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
";

#[test]
fn parses_every_certificate() {
    let certs = certificate::parse_certificates(CERTBOT_OUTPUT);

    assert_eq!(certs.len(), 2);
    assert_eq!(certs[0].name, "demo.example.com");
    assert_eq!(certs[0].domains, vec!["demo.example.com", "www.demo.example.com"]);
    assert_eq!(
        certs[0].expires_at,
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    );
    assert!(certs[0].covers("www.demo.example.com"));
    assert!(!certs[0].covers("example.com"));
}

#[test]
fn renewal_window() {
    let certs = certificate::parse_certificates(CERTBOT_OUTPUT);
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    assert_eq!(certs[0].days_left(now), 59);
    assert!(!certs[0].needs_renewal(now));
    assert_eq!(certs[1].days_left(now), 9);
    assert!(certs[1].needs_renewal(now));
}

#[test]
fn no_certificates() {
    assert!(certificate::parse_certificates("No certificates found.\n").is_empty());
    assert!(certificate::parse_certificates("").is_empty());
}

#[test]
fn unreadable_expiry_is_skipped() {
    let certs = certificate::parse_certificates(
        "Certificate Name: x.example.com\nDomains: x.example.com\nExpiry Date: soon\n",
    );
    assert!(certs.is_empty());
}

#[test]
fn values_with_spaces_are_quoted() {
    let req = CertificateRequest::new("demo.example.com", "ops@example.com", "/srv/acme root");

    assert!(req.certbot_command().contains("-w '/srv/acme root'"));
}
