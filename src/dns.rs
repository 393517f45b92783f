use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

/// Addresses `domain` currently resolves to. Resolution failures
/// yield an empty list.
#[must_use]
pub fn resolve(domain: &str) -> Vec<IpAddr> {
    match (domain, 80).to_socket_addrs() {
        Ok(addrs) => {
            let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            ips.sort();
            ips.dedup();
            ips
        }
        Err(e) => {
            debug!(domain, error = %e, "DNS lookup failed");
            Vec::new()
        }
    }
}

/// Whether `domain` resolves to `ip`. Best effort: a local lookup
/// says nothing about what the certificate authority sees.
#[must_use]
pub fn points_to(domain: &str, ip: &str) -> bool {
    let Ok(expected) = ip.parse::<IpAddr>() else {
        return false;
    };
    resolve(domain).contains(&expected)
}
