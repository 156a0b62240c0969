//! Server geolocation probe

use crate::config::{GeoConfig, COUNTRY_ENDPOINT_IP};
use crate::error::{GuardError, GuardResult, ProbeError};
use crate::normalize::NormalizedUrl;
use crate::probe::{GeoResolution, Probe, ProbeKind, ProbeVerdict};
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use parking_lot::RwLock;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Country reported when the host cannot be placed
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Hostname to IP
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// First address for the host, `None` if it does not resolve
    async fn resolve(&self, host: &str) -> Result<Option<IpAddr>, ProbeError>;
}

/// IP to country code
#[async_trait]
pub trait CountryLookup: Send + Sync {
    /// Country code, `None` if the address cannot be placed
    async fn country(&self, ip: IpAddr) -> Result<Option<String>, ProbeError>;
}

/// System resolver through `tokio::net::lookup_host`
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Option<IpAddr>, ProbeError> {
        if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            return Ok(Some(ip));
        }

        match tokio::time::timeout(self.timeout, tokio::net::lookup_host((host, 0))).await {
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
            Ok(Ok(mut addrs)) => Ok(addrs.next().map(|a| a.ip())),
            Ok(Err(e)) => {
                tracing::debug!("{} did not resolve: {}", host, e);
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountryResponse {
    country: Option<String>,
}

/// IP-to-country HTTP service client.
///
/// `GET`s the endpoint with `{ip}` substituted and reads `country` from the
/// JSON body. Reserved addresses come back without one.
pub struct HttpCountryLookup {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpCountryLookup {
    pub fn new(endpoint: &str, timeout: Duration) -> GuardResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardError::Config(format!("country lookup client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            timeout,
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        self.endpoint.replace(COUNTRY_ENDPOINT_IP, &ip.to_string())
    }

    fn map_err(&self, err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout(self.timeout)
        } else {
            ProbeError::adapter(format!("country lookup failed: {}", err))
        }
    }
}

#[async_trait]
impl CountryLookup for HttpCountryLookup {
    async fn country(&self, ip: IpAddr) -> Result<Option<String>, ProbeError> {
        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::adapter(format!("country service returned {}", status)));
        }

        let body: CountryResponse = response.json().await.map_err(|e| self.map_err(e))?;
        Ok(body
            .country
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty()))
    }
}

/// Longest-prefix country table over `cidr,country` rows
#[derive(Default)]
pub struct CidrCountryDb {
    networks: RwLock<Vec<(IpNetwork, String)>>,
}

impl CidrCountryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse CSV text; blank lines and `#` comments are skipped
    pub fn from_csv(text: &str) -> GuardResult<Self> {
        let db = Self::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (cidr, country) = line
                .split_once(',')
                .ok_or_else(|| GuardError::Config(format!("country db line {}: expected cidr,country", n + 1)))?;
            let network: IpNetwork = cidr
                .trim()
                .parse()
                .map_err(|e| GuardError::Config(format!("country db line {}: {}", n + 1, e)))?;
            db.insert(network, country.trim().to_uppercase());
        }
        Ok(db)
    }

    pub fn load(path: &str) -> GuardResult<Self> {
        let db = Self::from_csv(&std::fs::read_to_string(path)?)?;
        tracing::info!("Loaded {} country networks from {}", db.len(), path);
        Ok(db)
    }

    pub fn insert(&self, network: IpNetwork, country: String) {
        self.networks.write().push((network, country));
    }

    pub fn len(&self) -> usize {
        self.networks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most specific network containing the address
    pub fn lookup(&self, ip: IpAddr) -> Option<String> {
        self.networks
            .read()
            .iter()
            .filter(|(net, _)| net.contains(ip))
            .max_by_key(|(net, _)| net.prefix())
            .map(|(_, country)| country.clone())
    }
}

#[async_trait]
impl CountryLookup for CidrCountryDb {
    async fn country(&self, ip: IpAddr) -> Result<Option<String>, ProbeError> {
        Ok(self.lookup(ip))
    }
}

/// Geolocation probe. Never flags fraud on its own.
pub struct GeoProbe {
    resolver: Arc<dyn HostResolver>,
    countries: Arc<dyn CountryLookup>,
    deadline: Duration,
}

impl GeoProbe {
    pub fn new(resolver: Arc<dyn HostResolver>, countries: Arc<dyn CountryLookup>, deadline: Duration) -> Self {
        Self { resolver, countries, deadline }
    }

    pub fn from_config(config: &GeoConfig) -> GuardResult<Self> {
        let countries: Arc<dyn CountryLookup> = match &config.country_db_path {
            Some(path) => Arc::new(CidrCountryDb::load(path)?),
            None => Arc::new(HttpCountryLookup::new(
                &config.country_endpoint,
                Duration::from_millis(config.country_timeout_ms),
            )?),
        };
        Ok(Self::new(
            Arc::new(SystemResolver::new(Duration::from_millis(config.resolve_timeout_ms))),
            countries,
            Duration::from_millis(config.deadline_ms),
        ))
    }
}

#[async_trait]
impl Probe for GeoProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::GeoLocator
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn invoke(&self, url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError> {
        let Some(ip) = self.resolver.resolve(url.host()).await? else {
            return Ok(ProbeVerdict::Geo {
                country: UNKNOWN_COUNTRY.into(),
                ip: None,
                resolution: GeoResolution::Unresolved,
            });
        };

        let verdict = match self.countries.country(ip).await? {
            Some(country) => ProbeVerdict::Geo { country, ip: Some(ip), resolution: GeoResolution::Located },
            None => ProbeVerdict::Geo {
                country: UNKNOWN_COUNTRY.into(),
                ip: Some(ip),
                resolution: GeoResolution::Unlocated,
            },
        };
        Ok(verdict)
    }
}
