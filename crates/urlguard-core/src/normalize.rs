//! URL normalization
//!
//! Every evaluation keys its cache entry and extracts its hostname from the
//! normalized form, so `normalize(normalize(x)) == normalize(x)` must hold.

use crate::error::{GuardError, GuardResult};
use std::fmt;
use url::{Host, Url};

/// A URL in canonical form.
///
/// Scheme and host are lower-cased, the fragment is dropped, leading `www.`
/// labels are removed from the host and trailing slashes are removed from the
/// path when there is no query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl {
    url: String,
    host: String,
    https: bool,
    port: Option<u16>,
    ip_host: bool,
}

impl NormalizedUrl {
    /// Parse and normalize a raw URL.
    ///
    /// Input without a scheme (`example.com/login`) is read as `http://`.
    pub fn parse(raw: &str) -> GuardResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GuardError::InvalidInput("empty URL".into()));
        }

        let mut parsed = match Url::parse(trimmed) {
            Ok(url) if looks_like_host_port(&url, trimmed) => with_http_prefix(trimmed)?,
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => with_http_prefix(trimmed)?,
            Err(e) => return Err(GuardError::InvalidInput(format!("{}: {}", trimmed, e))),
        };

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(GuardError::InvalidInput(format!("unsupported scheme: {}", other)));
            }
        }

        let (host, ip_host) = match parsed.host() {
            Some(Host::Domain(domain)) => {
                let stripped = strip_www(domain.trim_end_matches('.'));
                if stripped.is_empty() || (!stripped.contains('.') && stripped != "localhost") {
                    return Err(GuardError::InvalidInput(format!("not a hostname: {}", domain)));
                }
                (stripped.to_string(), false)
            }
            Some(Host::Ipv4(ip)) => (ip.to_string(), true),
            Some(Host::Ipv6(ip)) => (ip.to_string(), true),
            None => return Err(GuardError::InvalidInput(format!("no host in {}", trimmed))),
        };

        if !ip_host {
            parsed
                .set_host(Some(&host))
                .map_err(|e| GuardError::InvalidInput(format!("{}: {}", host, e)))?;
        }
        parsed.set_fragment(None);

        let mut url = String::from(parsed.as_str());
        if parsed.query().is_none() {
            let len = url.trim_end_matches('/').len();
            url.truncate(len);
        }

        Ok(Self {
            url,
            host,
            https: parsed.scheme() == "https",
            port: parsed.port(),
            ip_host,
        })
    }

    /// Canonical string; also the cache key
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Lower-cased host without leading `www.`
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_https(&self) -> bool {
        self.https
    }

    /// Explicit non-default port, if any
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Host is an IP literal rather than a domain name
    pub fn is_ip_host(&self) -> bool {
        self.ip_host
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.url
    }
}

/// Normalize a raw URL to its canonical string.
pub fn normalize(raw: &str) -> GuardResult<String> {
    NormalizedUrl::parse(raw).map(|u| u.url)
}

/// `host:port/...` without a scheme parses with the host as the scheme.
fn looks_like_host_port(url: &Url, raw: &str) -> bool {
    if matches!(url.scheme(), "http" | "https") || raw.contains("://") {
        return false;
    }
    raw.split_once(':')
        .map(|(_, rest)| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn with_http_prefix(raw: &str) -> GuardResult<Url> {
    Url::parse(&format!("http://{}", raw))
        .map_err(|e| GuardError::InvalidInput(format!("{}: {}", raw, e)))
}

/// Strip leading `www.` labels while a registrable name remains.
fn strip_www(mut host: &str) -> &str {
    while let Some(rest) = host.strip_prefix("www.") {
        if !rest.contains('.') {
            break;
        }
        host = rest;
    }
    host
}
