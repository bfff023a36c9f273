//! Which URLs the fetcher may touch: allowed-domain policy plus SSRF guard.

use std::net::IpAddr;

use url::Url;

use taxdesk_shared::{AllowedDomain, Result, TaxDeskError};

// ---------------------------------------------------------------------------
// Allowed-domain policy
// ---------------------------------------------------------------------------

/// Host/path allow-list for portal fetches.
///
/// Rules are tried in order; the first rule whose host pattern matches decides.
/// An empty policy allows every host.
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    rules: Vec<AllowedDomain>,
}

impl DomainPolicy {
    pub fn new(rules: Vec<AllowedDomain>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                let pattern = rule.pattern.trim().to_lowercase();
                if pattern.is_empty() {
                    return None;
                }
                let path_allowlist = rule
                    .path_allowlist
                    .iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                Some(AllowedDomain {
                    pattern,
                    path_allowlist,
                })
            })
            .collect();
        Self { rules }
    }

    /// A policy that allows every host.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check `url` against the policy, explaining a rejection.
    pub fn check(&self, url: &Url) -> Result<()> {
        if self.rules.is_empty() {
            return Ok(());
        }

        let host = url.host_str().unwrap_or("").trim().to_lowercase();
        let path = normalize_path(url.path());

        for rule in &self.rules {
            if !matches_host(&host, &rule.pattern) {
                continue;
            }
            if rule.path_allowlist.is_empty()
                || rule
                    .path_allowlist
                    .iter()
                    .any(|prefix| path_matches_prefix(&path, prefix))
            {
                return Ok(());
            }
            return Err(TaxDeskError::validation(format!(
                "{url} is only allowed under specific paths of '{}': {}",
                rule.pattern,
                rule.path_allowlist.join(", ")
            )));
        }

        let allowed: Vec<&str> = self.rules.iter().map(|r| r.pattern.as_str()).collect();
        Err(TaxDeskError::validation(format!(
            "{url} is outside the allowed domains: {}",
            allowed.join(", ")
        )))
    }

    pub fn is_allowed(&self, url: &Url) -> bool {
        self.check(url).is_ok()
    }
}

/// `*.example.com` matches any sub-domain of `example.com`; anything else is exact.
fn matches_host(host: &str, pattern: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) if suffix.starts_with('.') => host.ends_with(suffix),
        _ => host == pattern,
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".into()
    } else {
        path.to_lowercase()
    }
}

/// Prefix match that respects segment boundaries: `/a/b` accepts `/a/b` and
/// `/a/b/c` but not `/a/bc`.
fn path_matches_prefix(path: &str, prefix: &str) -> bool {
    let mut prefix = prefix.trim().to_lowercase();
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    let base = prefix.strip_suffix('/').unwrap_or(&prefix);

    match path.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
