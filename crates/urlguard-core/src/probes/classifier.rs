//! Third-party URL classification probe

use crate::config::ClassifierConfig;
use crate::error::{GuardError, GuardResult, ProbeError};
use crate::normalize::NormalizedUrl;
use crate::probe::{Probe, ProbeKind, ProbeVerdict, Rating};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Category the service assigns to clean URLs
pub const SAFE_CATEGORY: i64 = 1;
/// Category reported when the service gave no usable answer
pub const UNKNOWN_CATEGORY: i64 = -1;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    category: Option<i64>,
}

/// External classification service
#[async_trait]
pub trait UrlClassifier: Send + Sync {
    /// Category code for the URL
    async fn classify(&self, url: &NormalizedUrl) -> Result<i64, ProbeError>;
}

/// JSON-over-HTTP classification client
pub struct ClassifierClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ClassifierClient {
    pub fn new(config: &ClassifierConfig) -> GuardResult<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardError::Config(format!("classifier client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl UrlClassifier for ClassifierClient {
    async fn classify(&self, url: &NormalizedUrl) -> Result<i64, ProbeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest { url: url.as_str() })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(self.timeout)
                } else {
                    ProbeError::adapter(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::adapter(format!("service returned {}", status)));
        }

        let body: ClassifyResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::adapter(format!("undecodable response: {}", e))
            }
        })?;

        body.category
            .ok_or_else(|| ProbeError::adapter("response has no category"))
    }
}

/// Third-party classification probe.
///
/// Any fault other than a timeout fails closed: the URL is rated unsafe with
/// category -1 and the reason in `detail`.
pub struct ClassifierProbe {
    classifier: Arc<dyn UrlClassifier>,
    deadline: Duration,
}

impl ClassifierProbe {
    pub fn new(classifier: Arc<dyn UrlClassifier>, deadline: Duration) -> Self {
        Self { classifier, deadline }
    }
}

#[async_trait]
impl Probe for ClassifierProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::ThirdPartyClassifier
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn invoke(&self, url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError> {
        match self.classifier.classify(url).await {
            Ok(category) => Ok(ProbeVerdict::Classification {
                category,
                rating: if category == SAFE_CATEGORY { Rating::Safe } else { Rating::Unsafe },
                detail: None,
            }),
            Err(ProbeError::Timeout(budget)) => Err(ProbeError::Timeout(budget)),
            Err(ProbeError::Adapter(reason)) => {
                tracing::debug!("Classifier failed closed for {}: {}", url, reason);
                Ok(ProbeVerdict::Classification {
                    category: UNKNOWN_CATEGORY,
                    rating: Rating::Unsafe,
                    detail: Some(reason),
                })
            }
        }
    }
}
