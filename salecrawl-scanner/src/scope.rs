//! Registered-domain scoping for crawl runs.
//!
//! A [`DomainScope`] is the `(domain, tld)` pair of a URL as seen through the
//! public suffix list: `www.shop.example.co.uk` has domain `example` and tld
//! `co.uk`. Hosts without a known suffix (`localhost`, IP addresses, private
//! names) keep their last label as the domain and an empty tld.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Host, Url};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainScope {
    pub domain: String,
    pub tld: String,
}

impl DomainScope {
    pub fn new(domain: impl Into<String>, tld: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            tld: tld.into(),
        }
    }

    /// Resolve the scope of `url`. Never fails; unparseable or relative
    /// input yields an empty scope.
    pub fn resolve(url: &str) -> Self {
        match extract_host(url) {
            Some(host) => scope_for_host(&host),
            None => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }

    /// True when both scopes are non-empty and identical. An empty scope
    /// matches nothing, including another empty scope.
    pub fn matches(&self, other: &DomainScope) -> bool {
        !self.is_empty() && self == other
    }

    /// Whether `url` falls inside this scope.
    pub fn contains_url(&self, url: &str) -> bool {
        self.matches(&Self::resolve(url))
    }

    /// Stable file-system friendly key for state tied to this scope.
    pub fn handle(&self) -> String {
        format!("{}{}", self.domain, self.tld)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for DomainScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tld.is_empty() {
            write!(f, "{}", self.domain)
        } else {
            write!(f, "{}.{}", self.domain, self.tld)
        }
    }
}

/// Free-function form of [`DomainScope::resolve`].
pub fn resolve(url: &str) -> DomainScope {
    DomainScope::resolve(url)
}

fn extract_host(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('/')
        || trimmed.starts_with('#')
        || trimmed.starts_with('?')
        || trimmed.starts_with('.')
    {
        return None;
    }

    let parsed = match Url::parse(trimmed) {
        // `www.a.com:8080/x` parses with `www.a.com` as its scheme.
        Ok(url) if url.host().is_none() && looks_like_host_port(&url) => {
            Url::parse(&format!("http://{}", trimmed)).ok()?
        }
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("http://{}", trimmed)).ok()?
        }
        Err(_) => return None,
    };

    match parsed.host()? {
        Host::Domain(domain) => {
            let host = domain.trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() { None } else { Some(host) }
        }
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

/// A hostless parse whose path is a bare port, as in `host:8080` or
/// `host:8080/path`.
fn looks_like_host_port(url: &Url) -> bool {
    let port = url.path().split(['/', '?', '#']).next().unwrap_or("");
    !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
}

/// Longest matching suffix from the ICANN section of the list. Private
/// entries such as `github.io` are skipped, so `a.github.io` belongs to
/// `github.io` rather than being a registered domain of its own.
fn icann_suffix(host: &str) -> Option<&str> {
    let mut candidate = host;
    loop {
        let suffix = psl::suffix(candidate.as_bytes())?;
        if !suffix.is_known() {
            return None;
        }
        let len = suffix.as_bytes().len();
        let text = candidate.get(candidate.len().checked_sub(len)?..)?;
        if !matches!(suffix.typ(), Some(psl::Type::Private)) {
            return Some(text);
        }
        let (_, shorter) = text.split_once('.')?;
        candidate = shorter;
    }
}

fn scope_for_host(host: &str) -> DomainScope {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return DomainScope::new(host, "");
    }

    if let Some(tld) = icann_suffix(host) {
        let tld = tld.to_string();
        if host == tld {
            return DomainScope::new("", tld);
        }
        let rest = host
            .strip_suffix(tld.as_str())
            .map(|r| r.trim_end_matches('.'))
            .unwrap_or(host);
        let domain = rest.rsplit('.').next().unwrap_or(rest);
        return DomainScope::new(domain, tld);
    }

    let domain = host.rsplit('.').next().unwrap_or(host);
    DomainScope::new(domain, "")
}
