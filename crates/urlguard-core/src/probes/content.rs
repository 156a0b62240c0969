//! Content scan probe
//!
//! Downloads the page and looks for fraud-indicative phrases.

use crate::config::ContentConfig;
use crate::error::{GuardError, GuardResult, ProbeError};
use crate::normalize::NormalizedUrl;
use crate::probe::{Probe, ProbeKind, ProbeVerdict};
use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Page download
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Page body as text
    async fn fetch(&self, url: &NormalizedUrl) -> Result<String, ProbeError>;
}

/// Loopback, private, link-local or unspecified address
pub fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_internal_ip(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // fc00::/7
                || (first & 0xffc0) == 0xfe80 // fe80::/10
        }
    }
}

fn internal_target(url: &reqwest::Url) -> Option<IpAddr> {
    let ip = match url.host()? {
        url::Host::Ipv4(ip) => IpAddr::V4(ip),
        url::Host::Ipv6(ip) => IpAddr::V6(ip),
        url::Host::Domain(_) => return None,
    };
    is_internal_ip(ip).then_some(ip)
}

/// reqwest-based fetcher with a capped body size.
///
/// IP-literal hosts on internal ranges are refused, for the first request and
/// for every redirect hop.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &ContentConfig) -> GuardResult<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .redirect(redirect_policy(config.max_redirects))
            .build()
            .map_err(|e| GuardError::Config(format!("content fetcher: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            max_body_bytes: config.max_body_bytes,
        })
    }

    fn map_err(&self, err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::adapter(format!("fetch failed: {}", err))
        }
    }
}

fn redirect_policy(max_redirects: usize) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            attempt.error(format!("more than {} redirects", max_redirects))
        } else if let Some(ip) = internal_target(attempt.url()) {
            attempt.error(format!("redirect to internal address {}", ip))
        } else {
            attempt.follow()
        }
    })
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &NormalizedUrl) -> Result<String, ProbeError> {
        if url.is_ip_host() {
            if let Ok(ip) = url.host().parse::<IpAddr>() {
                if is_internal_ip(ip) {
                    return Err(ProbeError::adapter(format!("refusing internal address {}", ip)));
                }
            }
        }

        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_err(e))? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= self.max_body_bytes {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Case-insensitive multi-keyword matcher
pub struct KeywordScanner {
    matcher: AhoCorasick,
    keywords: Vec<String>,
}

impl KeywordScanner {
    pub fn new(keywords: &[String]) -> GuardResult<Self> {
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(keywords)
            .map_err(|e| GuardError::Config(format!("keyword matcher: {}", e)))?;

        Ok(Self {
            matcher,
            keywords: keywords.to_vec(),
        })
    }

    /// Distinct matched keywords, in configured order
    pub fn scan(&self, text: &str) -> Vec<String> {
        let hits: BTreeSet<usize> = self
            .matcher
            .find_overlapping_iter(text)
            .map(|m| m.pattern().as_usize())
            .collect();

        hits.into_iter().map(|idx| self.keywords[idx].clone()).collect()
    }
}

/// Content scan probe
pub struct ContentProbe {
    fetcher: Arc<dyn PageFetcher>,
    scanner: KeywordScanner,
    deadline: Duration,
}

impl ContentProbe {
    pub fn new(fetcher: Arc<dyn PageFetcher>, scanner: KeywordScanner, deadline: Duration) -> Self {
        Self { fetcher, scanner, deadline }
    }
}

#[async_trait]
impl Probe for ContentProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::ContentScan
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn invoke(&self, url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError> {
        let page = self.fetcher.fetch(url).await?;
        let matched_keywords = self.scanner.scan(&page);
        Ok(ProbeVerdict::Content {
            keywords_found: !matched_keywords.is_empty(),
            matched_keywords,
        })
    }
}
