//! This host's own addresses, listed as peers so the list is never empty on a healthy host.

use std::net::IpAddr;

use tracing::warn;

/// IPv4 addresses of non-loopback interfaces. Enumeration errors yield an empty list.
pub fn local_ipv4_addrs() -> Vec<IpAddr> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => {
            let mut out: Vec<IpAddr> = ifaces
                .iter()
                .filter(|i| !i.is_loopback())
                .map(|i| i.ip())
                .filter(|ip| ip.is_ipv4())
                .collect();
            out.dedup();
            out
        }
        Err(e) => {
            warn!(error = %e, "cannot enumerate local interfaces");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_lists_loopback_or_v6() {
        for ip in local_ipv4_addrs() {
            assert!(ip.is_ipv4());
            assert!(!ip.is_loopback());
        }
    }
}
