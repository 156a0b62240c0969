//! Reputation database probe
//!
//! Checks the URL against a known-bad list of domains and full URLs.

use crate::error::{GuardError, GuardResult, ProbeError};
use crate::normalize::NormalizedUrl;
use crate::probe::{Probe, ProbeKind, ProbeVerdict};
use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;

/// Known-bad lookup
#[async_trait]
pub trait ReputationSource: Send + Sync {
    /// The matching list entry, if the URL is listed
    async fn check(&self, url: &NormalizedUrl) -> Result<Option<String>, ProbeError>;
}

/// In-memory known-bad list.
///
/// Domain entries match the host and every subdomain on label boundaries:
/// `example.com` lists `login.example.com` but not `notexample.com`. URL
/// entries match the normalized URL exactly.
#[derive(Debug, Default)]
pub struct Blocklist {
    domains: DashSet<String>,
    urls: DashSet<String>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, skipping invalid ones
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Self::new();
        for entry in entries {
            if let Err(e) = list.add(entry.as_ref()) {
                tracing::warn!("Skipping blocklist entry: {}", e);
            }
        }
        list
    }

    /// Add a domain (`bad.example`) or URL (`http://bad.example/login`)
    pub fn add(&self, entry: &str) -> GuardResult<()> {
        let entry = entry.trim();
        let url = NormalizedUrl::parse(entry)?;
        if entry.contains('/') {
            self.urls.insert(url.as_str().to_string());
        } else {
            self.domains.insert(url.host().to_string());
        }
        Ok(())
    }

    /// Load a newline-delimited file; `#` starts a comment
    pub fn load_file(&self, path: &str) -> GuardResult<usize> {
        let content = std::fs::read_to_string(path)?;
        let mut added = 0;
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            match self.add(line) {
                Ok(()) => added += 1,
                Err(GuardError::InvalidInput(msg)) => {
                    tracing::warn!("{}: skipping blocklist line: {}", path, msg);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("Loaded {} blocklist entries from {}", added, path);
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.domains.len() + self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Matching entry for the URL
    pub fn lookup(&self, url: &NormalizedUrl) -> Option<String> {
        if self.urls.contains(url.as_str()) {
            return Some(url.as_str().to_string());
        }

        let host = url.host();
        let mut suffix = host;
        loop {
            if self.domains.contains(suffix) {
                return Some(suffix.to_string());
            }
            match suffix.find('.') {
                Some(idx) => suffix = &suffix[idx + 1..],
                None => return None,
            }
        }
    }
}

#[async_trait]
impl ReputationSource for Blocklist {
    async fn check(&self, url: &NormalizedUrl) -> Result<Option<String>, ProbeError> {
        Ok(self.lookup(url))
    }
}

/// Reputation probe
pub struct ReputationProbe {
    source: Arc<dyn ReputationSource>,
    deadline: Duration,
}

impl ReputationProbe {
    pub fn new(source: Arc<dyn ReputationSource>, deadline: Duration) -> Self {
        Self { source, deadline }
    }
}

#[async_trait]
impl Probe for ReputationProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::ReputationDb
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn invoke(&self, url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError> {
        let matched = self.source.check(url).await?;
        Ok(ProbeVerdict::Reputation {
            listed: matched.is_some(),
            matched,
        })
    }
}
