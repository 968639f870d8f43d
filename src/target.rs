use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;

use crate::error::ScanError;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A validated scan target in normalized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Ipv4(Ipv4Addr),
    Network(Ipv4Net),
    Hostname(String),
}

impl Target {
    /// Validate and normalize a user-supplied target.
    ///
    /// CIDRs are truncated to their network address, hostnames are lowercased
    /// with any trailing dot removed.
    pub fn parse(raw: &str) -> Result<Target, ScanError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(ScanError::InvalidTarget(raw.to_string()));
        }
        if s.contains('/') {
            return s
                .parse::<Ipv4Net>()
                .map(|n| Target::Network(n.trunc()))
                .map_err(|_| ScanError::InvalidTarget(raw.to_string()));
        }
        if let Ok(ip) = s.parse::<Ipv4Addr>() {
            return Ok(Target::Ipv4(ip));
        }
        let host = s.strip_suffix('.').unwrap_or(s).to_ascii_lowercase();
        if is_valid_hostname(&host) {
            Ok(Target::Hostname(host))
        } else {
            Err(ScanError::InvalidTarget(raw.to_string()))
        }
    }

    /// Short human-readable description for status views.
    pub fn describe(&self) -> String {
        match self {
            Target::Ipv4(ip) => format!("{ip} (host)"),
            Target::Network(net) => {
                let hosts = host_count(net);
                format!("{net} (network, {hosts} hosts)")
            }
            Target::Hostname(h) => format!("{h} (hostname)"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Ipv4(ip) => write!(f, "{ip}"),
            Target::Network(net) => write!(f, "{net}"),
            Target::Hostname(h) => f.write_str(h),
        }
    }
}

/// RFC 1123 hostname check. Labels may not start with `-`, which also keeps
/// a hostname from ever being read as a scanner option.
fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    let labels: Vec<&str> = host.split('.').collect();
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    // A numeric last label means a malformed IP such as `999.1.1.1`, not a name.
    let tld_ok = labels
        .last()
        .is_some_and(|tld| !tld.chars().all(|c| c.is_ascii_digit()));
    labels_ok && tld_ok
}

/// Usable host addresses in a network, excluding network and broadcast for prefixes up to /30.
pub fn host_count(net: &Ipv4Net) -> u64 {
    let total = 1u64 << (32 - u32::from(net.prefix_len()));
    if total > 2 {
        total - 2
    } else {
        total
    }
}

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed and the result is sorted.
pub fn detect_local_networks() -> Result<Vec<Ipv4Net>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    let mut nets: Vec<Ipv4Net> = set.into_iter().collect();
    nets.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    Ok(nets)
}

/// Convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24).expect("/24 is always valid")
}
