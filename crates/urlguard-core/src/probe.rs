//! Probe contract
//!
//! A probe wraps one external collaborator (reputation list, page content,
//! WHOIS, classification service, model, geolocation) behind a single async
//! operation. Probes never see each other and never touch shared state.

use crate::error::ProbeError;
use crate::normalize::NormalizedUrl;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Probe identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    ReputationDb,
    ContentScan,
    DomainInfo,
    ThirdPartyClassifier,
    ModelScorer,
    GeoLocator,
}

impl ProbeKind {
    /// Default invocation order
    pub const ALL: [ProbeKind; 6] = [
        ProbeKind::ReputationDb,
        ProbeKind::ContentScan,
        ProbeKind::DomainInfo,
        ProbeKind::ThirdPartyClassifier,
        ProbeKind::ModelScorer,
        ProbeKind::GeoLocator,
    ];

    /// Label used for the report entry
    pub fn label(&self) -> &'static str {
        match self {
            ProbeKind::ReputationDb => "phishing_database",
            ProbeKind::ContentScan => "content_analysis",
            ProbeKind::DomainInfo => "domain_info",
            ProbeKind::ThirdPartyClassifier => "third_party",
            ProbeKind::ModelScorer => "ml_model",
            ProbeKind::GeoLocator => "server_location",
        }
    }
}

/// How a probe execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Failed,
    TimedOut,
}

/// Safe / unsafe rating reported by classifier-style probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Safe,
    Unsafe,
    Unknown,
}

/// Outcome of geolocating the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoResolution {
    /// IP resolved and country found
    Located,
    /// IP resolved, country unknown
    Unlocated,
    /// Hostname did not resolve
    Unresolved,
}

/// Domain registration verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainInfoVerdict {
    pub domain: String,
    pub country: Option<String>,
    pub creation_date: Option<NaiveDate>,
    pub age_days: Option<i64>,
    pub age_months: Option<f64>,
    pub is_gov: bool,
    pub is_edu: bool,
    pub lookup_error: Option<String>,
    pub is_fraud: bool,
}

/// Probe-specific verdict record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeVerdict {
    Reputation {
        listed: bool,
        matched: Option<String>,
    },
    Content {
        keywords_found: bool,
        matched_keywords: Vec<String>,
    },
    DomainInfo(DomainInfoVerdict),
    Classification {
        category: i64,
        rating: Rating,
        detail: Option<String>,
    },
    Model {
        malicious_probability: f64,
        rating: Rating,
        model_available: bool,
    },
    Geo {
        country: String,
        ip: Option<IpAddr>,
        resolution: GeoResolution,
    },
}

impl ProbeVerdict {
    /// Whether this verdict on its own points at fraud
    pub fn indicates_fraud(&self) -> bool {
        match self {
            ProbeVerdict::Reputation { listed, .. } => *listed,
            ProbeVerdict::Content { keywords_found, .. } => *keywords_found,
            ProbeVerdict::DomainInfo(info) => info.is_fraud,
            ProbeVerdict::Classification { rating, .. } => *rating == Rating::Unsafe,
            ProbeVerdict::Model { rating, .. } => *rating == Rating::Unsafe,
            ProbeVerdict::Geo { .. } => false,
        }
    }
}

/// Result of one probe execution. Lives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub probe: ProbeKind,
    pub status: ProbeStatus,
    pub verdict: Option<ProbeVerdict>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ProbeOutcome {
    pub fn success(probe: ProbeKind, verdict: ProbeVerdict, elapsed: Duration) -> Self {
        Self {
            probe,
            status: ProbeStatus::Success,
            verdict: Some(verdict),
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(probe: ProbeKind, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            probe,
            status: ProbeStatus::Failed,
            verdict: None,
            error: Some(error.into()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn timed_out(probe: ProbeKind, deadline: Duration) -> Self {
        Self {
            probe,
            status: ProbeStatus::TimedOut,
            verdict: None,
            error: Some(ProbeError::Timeout(deadline).to_string()),
            elapsed_ms: deadline.as_millis() as u64,
        }
    }

    /// Build the outcome from a finished invocation
    pub fn from_result(
        probe: ProbeKind,
        result: Result<ProbeVerdict, ProbeError>,
        elapsed: Duration,
    ) -> Self {
        match result {
            Ok(verdict) => Self::success(probe, verdict, elapsed),
            Err(ProbeError::Timeout(budget)) => Self::timed_out(probe, budget),
            Err(ProbeError::Adapter(msg)) => Self::failed(probe, msg, elapsed),
        }
    }
}

/// Uniform probe operation
#[async_trait]
pub trait Probe: Send + Sync {
    /// Which probe this is
    fn kind(&self) -> ProbeKind;

    /// Hard deadline the orchestrator enforces on `invoke`
    fn deadline(&self) -> Duration;

    /// Produce a verdict for the URL
    async fn invoke(&self, url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError>;
}
