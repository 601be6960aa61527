use std::net::Ipv4Addr;

/// Check a client address against the admin IP allowlist.
///
/// Entries are exact IPv4 strings or CIDR blocks in `a.b.c.d/prefix`
/// notation (0 ≤ prefix ≤ 32). IPv4-mapped IPv6 clients (the usual shape
/// when the listener binds a dual-stack socket) are compared after the
/// `::ffff:` prefix is stripped.
///
/// An empty allowlist admits loopback only, so a fresh deployment is not
/// remotely administrable by accident.
pub fn client_ip_allowed(entries: &[String], client: &str) -> bool {
    let client = normalize_client(client);

    if entries.is_empty() {
        return client == "127.0.0.1" || client == "::1";
    }

    let client_v4: Option<Ipv4Addr> = client.parse().ok();

    entries.iter().any(|entry| {
        let entry = entry.trim();
        if entry == client {
            return true;
        }
        match (entry.split_once('/'), client_v4) {
            (Some((net, prefix)), Some(ip)) => cidr_matches(net, prefix, ip),
            _ => false,
        }
    })
}

fn normalize_client(client: &str) -> &str {
    client.strip_prefix("::ffff:").unwrap_or(client)
}

fn cidr_matches(net: &str, prefix: &str, ip: Ipv4Addr) -> bool {
    let net: Ipv4Addr = match net.parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    let prefix: u32 = match prefix.parse() {
        Ok(v) if v <= 32 => v,
        _ => return false,
    };
    let mask: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (u32::from(ip) & mask) == (u32::from(net) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_list_admits_loopback_only() {
        assert!(client_ip_allowed(&[], "127.0.0.1"));
        assert!(client_ip_allowed(&[], "::1"));
        assert!(!client_ip_allowed(&[], "203.0.113.9"));
    }

    #[test]
    fn exact_match() {
        let list = entries(&["203.0.113.9"]);
        assert!(client_ip_allowed(&list, "203.0.113.9"));
        assert!(!client_ip_allowed(&list, "203.0.113.10"));
    }

    #[test]
    fn cidr_match() {
        let list = entries(&["10.0.0.0/8"]);
        assert!(client_ip_allowed(&list, "10.200.3.4"));
        assert!(!client_ip_allowed(&list, "11.0.0.1"));
    }

    #[test]
    fn cidr_prefix_boundaries() {
        let list = entries(&["192.168.4.0/22"]);
        assert!(client_ip_allowed(&list, "192.168.4.1"));
        assert!(client_ip_allowed(&list, "192.168.7.254"));
        assert!(!client_ip_allowed(&list, "192.168.8.1"));
    }

    #[test]
    fn zero_prefix_matches_everything() {
        let list = entries(&["0.0.0.0/0"]);
        assert!(client_ip_allowed(&list, "8.8.8.8"));
        assert!(client_ip_allowed(&list, "192.0.2.1"));
    }

    #[test]
    fn mapped_v6_client_is_stripped() {
        let list = entries(&["203.0.113.9"]);
        assert!(client_ip_allowed(&list, "::ffff:203.0.113.9"));
        let cidr = entries(&["203.0.113.0/24"]);
        assert!(client_ip_allowed(&cidr, "::ffff:203.0.113.77"));
    }

    #[test]
    fn malformed_entries_never_match() {
        let list = entries(&["not-an-ip", "10.0.0.0/33", "10.0.0.0/x"]);
        assert!(!client_ip_allowed(&list, "10.1.1.1"));
    }
}
