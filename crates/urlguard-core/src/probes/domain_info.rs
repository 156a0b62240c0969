//! Domain registration probe
//!
//! Looks up the registrable domain over WHOIS and flags young or
//! unregistered-looking domains. Government and education domains are exempt
//! from the missing-data rule because their registries commonly hide WHOIS
//! records.

use crate::config::DomainInfoConfig;
use crate::error::{GuardError, GuardResult, ProbeError};
use crate::normalize::NormalizedUrl;
use crate::probe::{DomainInfoVerdict, Probe, ProbeKind, ProbeVerdict};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WHOIS_PORT: u16 = 43;
const MAX_WHOIS_RESPONSE: u64 = 256 * 1024;

/// Second-level labels under which registrations happen one level deeper
const SECOND_LEVEL_LABELS: &[&str] = &[
    "ac", "co", "com", "edu", "go", "gov", "idv", "mil", "ne", "net", "or", "org",
];

/// Fields the probe needs from a WHOIS record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoisRecord {
    pub country: Option<String>,
    pub creation_date: Option<NaiveDate>,
}

/// Domain registration lookup
#[async_trait]
pub trait WhoisLookup: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<WhoisRecord, ProbeError>;
}

/// Pulls creation date, country and referral out of WHOIS text
pub struct WhoisParser {
    created: Regex,
    registrant_country: Regex,
    country: Regex,
    referral: Regex,
    not_found: Regex,
}

impl WhoisParser {
    pub fn new() -> GuardResult<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| GuardError::Config(format!("whois pattern: {}", e)))
        };

        Ok(Self {
            created: build(
                r"(?im)^\s*(?:creation date|created date|created on|created|registered on|registration time|registration date|record created on|domain record activated)\s*[:.]?\s*(\S.*?)\s*$",
            )?,
            registrant_country: build(r"(?im)^\s*registrant country\s*:\s*(\S.*?)\s*$")?,
            country: build(r"(?im)^\s*country\s*:\s*(\S.*?)\s*$")?,
            referral: build(r"(?im)^\s*(?:refer|whois|registrar whois server)\s*:\s*(\S+)")?,
            not_found: build(r"(?im)no match|not found|no data found|no entries found|^\s*status:\s*free")?,
        })
    }

    /// Next WHOIS server to ask, if the text names one
    pub fn referral(&self, text: &str) -> Option<String> {
        self.referral
            .captures(text)
            .map(|c| c[1].trim_end_matches('.').to_lowercase())
    }

    /// Parse a registry answer
    pub fn parse(&self, text: &str) -> Result<WhoisRecord, ProbeError> {
        let creation_date = self
            .created
            .captures_iter(text)
            .find_map(|c| parse_whois_date(&c[1]));

        let country = self
            .registrant_country
            .captures(text)
            .or_else(|| self.country.captures(text))
            .map(|c| c[1].to_uppercase());

        if creation_date.is_none() && country.is_none() && self.not_found.is_match(text) {
            return Err(ProbeError::adapter("No WHOIS data found"));
        }

        Ok(WhoisRecord { country, creation_date })
    }
}

/// Parse the date formats registries commonly use
pub fn parse_whois_date(value: &str) -> Option<NaiveDate> {
    let token = value.split_whitespace().next()?;

    if let Some(prefix) = token.get(..10) {
        for fmt in ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y"] {
            if let Ok(date) = NaiveDate::parse_from_str(prefix, fmt) {
                return Some(date);
            }
        }
    }

    for fmt in ["%d-%b-%Y", "%d-%B-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(token, fmt) {
            return Some(date);
        }
    }
    None
}

/// Port-43 WHOIS client.
///
/// Asks the root server first and follows its referral to the registry.
pub struct WhoisClient {
    root_server: String,
    timeout: Duration,
    parser: WhoisParser,
}

impl WhoisClient {
    pub fn new(root_server: &str, timeout: Duration) -> GuardResult<Self> {
        Ok(Self {
            root_server: root_server.to_string(),
            timeout,
            parser: WhoisParser::new()?,
        })
    }

    async fn query(&self, server: &str, domain: &str) -> Result<String, ProbeError> {
        let mut stream = TcpStream::connect((server, WHOIS_PORT))
            .await
            .map_err(|e| ProbeError::adapter(format!("{}: {}", server, e)))?;

        stream
            .write_all(format!("{}\r\n", domain).as_bytes())
            .await
            .map_err(|e| ProbeError::adapter(format!("{}: {}", server, e)))?;

        let mut buf = Vec::new();
        stream
            .take(MAX_WHOIS_RESPONSE)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ProbeError::adapter(format!("{}: {}", server, e)))?;

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn lookup_inner(&self, domain: &str) -> Result<WhoisRecord, ProbeError> {
        let root_answer = self.query(&self.root_server, domain).await?;
        let answer = match self.parser.referral(&root_answer) {
            Some(server) if server != self.root_server => self.query(&server, domain).await?,
            _ => root_answer,
        };
        self.parser.parse(&answer)
    }
}

#[async_trait]
impl WhoisLookup for WhoisClient {
    async fn lookup(&self, domain: &str) -> Result<WhoisRecord, ProbeError> {
        tokio::time::timeout(self.timeout, self.lookup_inner(domain))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }
}

/// Registrable domain for a host (`a.b.example.co.uk` -> `example.co.uk`)
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    let n = labels.len();
    if n <= 2 || host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }

    let take = if labels[n - 1].len() == 2 && SECOND_LEVEL_LABELS.contains(&labels[n - 2]) {
        3
    } else {
        2
    };
    labels[n - take..].join(".")
}

/// Gov/edu exemption and minimum age
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    pub gov_suffixes: Vec<String>,
    pub edu_suffixes: Vec<String>,
    pub min_age_days: i64,
}

impl DomainPolicy {
    pub fn from_config(config: &DomainInfoConfig) -> Self {
        Self {
            gov_suffixes: config.gov_suffixes.clone(),
            edu_suffixes: config.edu_suffixes.clone(),
            min_age_days: config.min_age_days,
        }
    }

    pub fn is_gov(&self, host: &str) -> bool {
        self.gov_suffixes.iter().any(|s| has_suffix(host, s))
    }

    pub fn is_edu(&self, host: &str) -> bool {
        self.edu_suffixes.iter().any(|s| has_suffix(host, s))
    }

    /// The fraud decision table.
    ///
    /// | lookup | gov/edu | creation date | fraud |
    /// |--------|---------|---------------|-------|
    /// | error  | yes     | -             | no    |
    /// | error  | no      | -             | yes   |
    /// | ok     | yes     | none          | no    |
    /// | ok     | no      | none          | yes   |
    /// | ok     | any     | < min age     | yes   |
    /// | ok     | any     | >= min age    | no    |
    pub fn decide(
        &self,
        host: &str,
        domain: &str,
        lookup: Result<WhoisRecord, String>,
        today: NaiveDate,
    ) -> DomainInfoVerdict {
        let is_gov = self.is_gov(host);
        let is_edu = self.is_edu(host);
        let exempt = is_gov || is_edu;

        let mut verdict = DomainInfoVerdict {
            domain: domain.to_string(),
            country: None,
            creation_date: None,
            age_days: None,
            age_months: None,
            is_gov,
            is_edu,
            lookup_error: None,
            is_fraud: false,
        };

        match lookup {
            Err(error) => {
                verdict.lookup_error = Some(error);
                verdict.is_fraud = !exempt;
            }
            Ok(record) => {
                verdict.country = record.country;
                match record.creation_date {
                    Some(created) => {
                        let age = (today - created).num_days();
                        verdict.creation_date = Some(created);
                        verdict.age_days = Some(age);
                        verdict.age_months = Some(age as f64 / 30.0);
                        verdict.is_fraud = age < self.min_age_days;
                    }
                    None => verdict.is_fraud = !exempt,
                }
            }
        }
        verdict
    }
}

fn has_suffix(host: &str, suffix: &str) -> bool {
    let suffix = suffix.trim_start_matches('.');
    host == suffix || host.ends_with(&format!(".{}", suffix))
}

/// Domain registration probe
pub struct DomainInfoProbe {
    whois: Arc<dyn WhoisLookup>,
    policy: DomainPolicy,
    deadline: Duration,
}

impl DomainInfoProbe {
    pub fn new(whois: Arc<dyn WhoisLookup>, policy: DomainPolicy, deadline: Duration) -> Self {
        Self { whois, policy, deadline }
    }
}

#[async_trait]
impl Probe for DomainInfoProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::DomainInfo
    }

    fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn invoke(&self, url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError> {
        let host = url.host();
        let domain = registrable_domain(host);

        let lookup = if url.is_ip_host() {
            Err("IP address host has no domain registration".to_string())
        } else {
            match self.whois.lookup(&domain).await {
                Ok(record) => Ok(record),
                Err(ProbeError::Timeout(budget)) => return Err(ProbeError::Timeout(budget)),
                Err(ProbeError::Adapter(msg)) => Err(msg),
            }
        };

        let verdict = self.policy.decide(host, &domain, lookup, Utc::now().date_naive());
        Ok(ProbeVerdict::DomainInfo(verdict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DomainPolicy {
        DomainPolicy::from_config(&DomainInfoConfig::default())
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn created(days_ago: i64) -> Result<WhoisRecord, String> {
        Ok(WhoisRecord {
            country: Some("TW".into()),
            creation_date: Some(today() - chrono::Duration::days(days_ago)),
        })
    }

    #[test]
    fn test_decision_table() {
        let p = policy();
        let no_date = || Ok(WhoisRecord::default());
        let error = || Err("connection refused".to_string());

        // (host, lookup, expected fraud)
        let cases: Vec<(&str, Result<WhoisRecord, String>, bool)> = vec![
            ("shop.com", error(), true),
            ("moe.edu.tw", error(), false),
            ("tax.gov.taipei", error(), false),
            ("shop.com", no_date(), true),
            ("www2.gov.tw", no_date(), false),
            ("shop.com", created(10), true),
            ("ntu.edu.tw", created(10), true),
            ("shop.com", created(179), true),
            ("shop.com", created(180), false),
            ("shop.com", created(400), false),
        ];

        for (host, lookup, expected) in cases {
            let verdict = p.decide(host, host, lookup, today());
            assert_eq!(verdict.is_fraud, expected, "{host}");
        }
    }

    #[test]
    fn test_verdict_fields() {
        let verdict = policy().decide("shop.com", "shop.com", created(60), today());
        assert_eq!(verdict.age_days, Some(60));
        assert_eq!(verdict.age_months, Some(2.0));
        assert_eq!(verdict.country.as_deref(), Some("TW"));
        assert!(!verdict.is_gov && !verdict.is_edu);
        assert!(verdict.lookup_error.is_none());
    }

    #[test]
    fn test_gov_suffix_requires_label_boundary() {
        let p = policy();
        assert!(p.is_gov("www.gov.tw"));
        assert!(p.is_gov("gov.tw"));
        assert!(!p.is_gov("notgov.tw"));
        assert!(p.is_edu("cs.ntu.edu.tw"));
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("login.secure.example.com"), "example.com");
        assert_eq!(registrable_domain("shop.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("www.ntu.edu.tw"), "ntu.edu.tw");
        assert_eq!(registrable_domain("a.b.gov.taipei"), "gov.taipei");
        assert_eq!(registrable_domain("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn test_parse_dates() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day);
        assert_eq!(parse_whois_date("1995-08-14T04:00:00Z"), d(1995, 8, 14));
        assert_eq!(parse_whois_date("2020-01-15"), d(2020, 1, 15));
        assert_eq!(parse_whois_date("15-Jan-2020"), d(2020, 1, 15));
        assert_eq!(parse_whois_date("2020.01.15 10:00:00"), d(2020, 1, 15));
        assert_eq!(parse_whois_date("2020/01/15"), d(2020, 1, 15));
        assert_eq!(parse_whois_date("before 1996"), None);
    }

    #[test]
    fn test_parse_gtld_record() {
        let text = "   Domain Name: EXAMPLE.COM\r\n   Registrar WHOIS Server: whois.iana.org\r\n   Creation Date: 1995-08-14T04:00:00Z\r\nRegistrant Country: us\r\n";
        let record = WhoisParser::new().unwrap().parse(text).unwrap();
        assert_eq!(record.creation_date, NaiveDate::from_ymd_opt(1995, 8, 14));
        assert_eq!(record.country.as_deref(), Some("US"));
    }

    #[test]
    fn test_parse_twnic_record() {
        let text = "Domain Name: shop.com.tw\n   Record expires on 2027-03-01 23:59:59 (UTC+8)\n   Record created on 2023-03-01 10:12:44 (UTC+8)\n";
        let record = WhoisParser::new().unwrap().parse(text).unwrap();
        assert_eq!(record.creation_date, NaiveDate::from_ymd_opt(2023, 3, 1));
        assert_eq!(record.country, None);
    }

    #[test]
    fn test_parse_not_found() {
        let err = WhoisParser::new().unwrap().parse("No match for \"NOPE-XYZ.COM\".\n").unwrap_err();
        assert_eq!(err, ProbeError::adapter("No WHOIS data found"));
    }

    #[test]
    fn test_referral() {
        let text = "% IANA WHOIS server\n\ndomain:       COM\n\nrefer:        whois.verisign-grs.com\n";
        assert_eq!(
            WhoisParser::new().unwrap().referral(text).as_deref(),
            Some("whois.verisign-grs.com")
        );
    }

    struct FixedWhois(Result<WhoisRecord, ProbeError>);

    #[async_trait]
    impl WhoisLookup for FixedWhois {
        async fn lookup(&self, _domain: &str) -> Result<WhoisRecord, ProbeError> {
            self.0.clone()
        }
    }

    fn probe(result: Result<WhoisRecord, ProbeError>) -> DomainInfoProbe {
        DomainInfoProbe::new(Arc::new(FixedWhois(result)), policy(), Duration::from_secs(5))
    }

    fn domain_verdict(verdict: ProbeVerdict) -> DomainInfoVerdict {
        match verdict {
            ProbeVerdict::DomainInfo(info) => info,
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_young_and_old_domains() {
        let now = Utc::now().date_naive();
        let url = NormalizedUrl::parse("https://fresh-shop.com/login").unwrap();

        let young = probe(Ok(WhoisRecord {
            country: None,
            creation_date: Some(now - chrono::Duration::days(10)),
        }));
        assert!(domain_verdict(young.invoke(&url).await.unwrap()).is_fraud);

        let old = probe(Ok(WhoisRecord {
            country: None,
            creation_date: Some(now - chrono::Duration::days(400)),
        }));
        assert!(!domain_verdict(old.invoke(&url).await.unwrap()).is_fraud);
    }

    #[tokio::test]
    async fn test_probe_lookup_error_is_a_verdict() {
        let url = NormalizedUrl::parse("https://shop.com").unwrap();
        let info = domain_verdict(
            probe(Err(ProbeError::adapter("connection refused"))).invoke(&url).await.unwrap(),
        );
        assert!(info.is_fraud);
        assert_eq!(info.lookup_error.as_deref(), Some("connection refused"));

        let gov = NormalizedUrl::parse("https://www.tax.gov.tw").unwrap();
        let info = domain_verdict(
            probe(Err(ProbeError::adapter("connection refused"))).invoke(&gov).await.unwrap(),
        );
        assert!(!info.is_fraud);
        assert!(info.is_gov);
    }

    #[tokio::test]
    async fn test_probe_whois_timeout_propagates() {
        let url = NormalizedUrl::parse("https://shop.com").unwrap();
        let err = probe(Err(ProbeError::Timeout(Duration::from_secs(4))))
            .invoke(&url)
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Timeout(Duration::from_secs(4)));
    }
}
