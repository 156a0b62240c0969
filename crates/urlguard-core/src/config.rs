//! URLGuard Configuration

use crate::error::{GuardError, GuardResult};
use crate::probe::ProbeKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "URLGUARD_CONFIG";
/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/urlguard/config.json";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// HTTP boundary settings
    pub server: ServerConfig,
    /// Cache settings
    pub cache: CacheConfig,
    /// Probe settings
    pub probes: ProbeConfig,
}

impl GuardConfig {
    /// Load from file
    pub fn load(path: &str) -> GuardResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| GuardError::Config(format!("{}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &str) -> GuardResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| GuardError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `REDIS_URL` and `URLGUARD_BIND` overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.cache.backend = CacheBackend::Redis;
            self.cache.redis_url = url;
        }
        if let Ok(bind) = std::env::var("URLGUARD_BIND") {
            self.server.bind = bind;
        }
    }

    /// Check deadlines and budgets are consistent
    pub fn validate(&self) -> GuardResult<()> {
        let p = &self.probes;

        if p.enabled.is_empty() {
            return Err(GuardError::Config("no probes enabled".into()));
        }
        let unique: HashSet<_> = p.enabled.iter().collect();
        if unique.len() != p.enabled.len() {
            return Err(GuardError::Config("probe listed twice in probes.enabled".into()));
        }

        for kind in ProbeKind::ALL {
            if p.deadline(kind).is_zero() {
                return Err(GuardError::Config(format!("{} deadline must be non-zero", kind.label())));
            }
        }

        check_budget("content_scan.request_timeout_ms", p.content.request_timeout_ms, p.content.deadline_ms)?;
        check_budget("domain_info.whois_timeout_ms", p.domain_info.whois_timeout_ms, p.domain_info.deadline_ms)?;
        check_budget("classifier.request_timeout_ms", p.classifier.request_timeout_ms, p.classifier.deadline_ms)?;
        check_budget("geo.resolve_timeout_ms", p.geo.resolve_timeout_ms, p.geo.deadline_ms)?;
        if p.geo.country_db_path.is_none() {
            check_budget("geo.country_timeout_ms", p.geo.country_timeout_ms, p.geo.deadline_ms)?;
            check_budget(
                "geo.resolve_timeout_ms + geo.country_timeout_ms",
                p.geo.resolve_timeout_ms + p.geo.country_timeout_ms,
                p.geo.deadline_ms,
            )?;
            if !p.geo.country_endpoint.contains(COUNTRY_ENDPOINT_IP) {
                return Err(GuardError::Config(format!(
                    "geo.country_endpoint must contain {}",
                    COUNTRY_ENDPOINT_IP
                )));
            }
        }

        if !(0.0..=1.0).contains(&p.model.threshold) {
            return Err(GuardError::Config("model.threshold must be within [0, 1]".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(GuardError::Config("cache.ttl_secs must be non-zero".into()));
        }
        Ok(())
    }
}

fn check_budget(name: &str, inner_ms: u64, deadline_ms: u64) -> GuardResult<()> {
    if inner_ms == 0 || inner_ms >= deadline_ms {
        return Err(GuardError::Config(format!(
            "{} ({}ms) must be non-zero and shorter than the probe deadline ({}ms)",
            name, inner_ms, deadline_ms
        )));
    }
    Ok(())
}

/// HTTP boundary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8001".into() }
    }
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
    Disabled,
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub ttl_secs: u64,
    /// Max entries for the memory backend
    pub capacity: u64,
    /// Upper bound on any single cache operation
    pub op_timeout_ms: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://localhost:6379/0".into(),
            ttl_secs: 3600,
            capacity: 100_000,
            op_timeout_ms: 500,
        }
    }
}

/// Probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probes to run, in report order
    pub enabled: Vec<ProbeKind>,
    pub reputation: ReputationConfig,
    pub content: ContentConfig,
    pub domain_info: DomainInfoConfig,
    pub classifier: ClassifierConfig,
    pub model: ModelConfig,
    pub geo: GeoConfig,
}

impl ProbeConfig {
    /// Deadline for a probe
    pub fn deadline(&self, kind: ProbeKind) -> Duration {
        let ms = match kind {
            ProbeKind::ReputationDb => self.reputation.deadline_ms,
            ProbeKind::ContentScan => self.content.deadline_ms,
            ProbeKind::DomainInfo => self.domain_info.deadline_ms,
            ProbeKind::ThirdPartyClassifier => self.classifier.deadline_ms,
            ProbeKind::ModelScorer => self.model.deadline_ms,
            ProbeKind::GeoLocator => self.geo.deadline_ms,
        };
        Duration::from_millis(ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: ProbeKind::ALL.to_vec(),
            reputation: ReputationConfig::default(),
            content: ContentConfig::default(),
            domain_info: DomainInfoConfig::default(),
            classifier: ClassifierConfig::default(),
            model: ModelConfig::default(),
            geo: GeoConfig::default(),
        }
    }
}

/// Known-bad list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub deadline_ms: u64,
    /// Domains or full URLs
    pub blocklist: Vec<String>,
    /// Newline-delimited file of domains or URLs
    pub blocklist_path: Option<String>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 1000,
            blocklist: vec!["example.com".into()],
            blocklist_path: None,
        }
    }
}

/// Page content scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub deadline_ms: u64,
    pub request_timeout_ms: u64,
    pub max_body_bytes: usize,
    pub max_redirects: usize,
    pub user_agent: String,
    pub keywords: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 4000,
            request_timeout_ms: 3500,
            max_body_bytes: 1024 * 1024,
            max_redirects: 3,
            user_agent: concat!("urlguard/", env!("CARGO_PKG_VERSION")).into(),
            keywords: default_keywords(),
        }
    }
}

fn default_keywords() -> Vec<String> {
    [
        "verify your account",
        "account suspended",
        "confirm your password",
        "update your payment",
        "urgent action required",
        "unusual sign-in activity",
        "your account will be closed",
        "claim your prize",
        "lottery winner",
        "gift card",
        "crypto giveaway",
        "guaranteed return",
        "wire transfer",
        "social security number",
        "驗證您的帳戶",
        "帳戶已停用",
        "中獎",
        "保證獲利",
        "投資群組",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

/// WHOIS domain registration lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainInfoConfig {
    pub deadline_ms: u64,
    pub whois_server: String,
    pub whois_timeout_ms: u64,
    /// Domains younger than this are flagged
    pub min_age_days: i64,
    pub gov_suffixes: Vec<String>,
    pub edu_suffixes: Vec<String>,
}

impl Default for DomainInfoConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 5000,
            whois_server: "whois.iana.org".into(),
            whois_timeout_ms: 4500,
            min_age_days: 180,
            gov_suffixes: vec!["gov".into(), "gov.tw".into(), "gov.taipei".into()],
            edu_suffixes: vec!["edu".into(), "edu.tw".into()],
        }
    }
}

/// Third-party URL classification service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub deadline_ms: u64,
    pub endpoint: String,
    pub request_timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 5000,
            endpoint: "https://link-checker.nordvpn.com/v1/public-url-checker/check-url".into(),
            request_timeout_ms: 4500,
        }
    }
}

/// Phishing model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub deadline_ms: u64,
    /// JSON random forest artifact
    pub artifact_path: Option<String>,
    /// Malicious probability at or above which the URL is unsafe
    pub threshold: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 1000,
            artifact_path: Some("phishing_model.json".into()),
            threshold: 0.5,
        }
    }
}

/// Placeholder replaced with the address in `GeoConfig::country_endpoint`
pub const COUNTRY_ENDPOINT_IP: &str = "{ip}";

/// Server geolocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub deadline_ms: u64,
    pub resolve_timeout_ms: u64,
    /// IP-to-country HTTP service answering `{"country": "TW"}`
    pub country_endpoint: String,
    pub country_timeout_ms: u64,
    /// Offline `cidr,country` CSV; replaces the HTTP service when set
    pub country_db_path: Option<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 3000,
            resolve_timeout_ms: 1000,
            country_endpoint: "https://ipinfo.io/{ip}/json".into(),
            country_timeout_ms: 1500,
            country_db_path: None,
        }
    }
}
