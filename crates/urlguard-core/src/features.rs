//! URL feature extraction for the phishing model
//!
//! Produces the 25 attributes of the phishing-websites dataset the model is
//! trained on, in dataset column order. Values follow the dataset encoding:
//! `1` legitimate, `0` suspicious, `-1` phishing. Attributes that need the
//! page body or registry data cannot be derived from the URL and are `0`.

use crate::normalize::NormalizedUrl;
use serde::{Deserialize, Serialize};

/// Number of model inputs
pub const FEATURE_COUNT: usize = 25;

/// Dataset column names, in model input order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "having_IP_Address",
    "URL_Length",
    "Shortining_Service",
    "having_At_Symbol",
    "double_slash_redirecting",
    "Prefix_Suffix",
    "having_Sub_Domain",
    "SSLfinal_State",
    "Domain_registeration_length",
    "Favicon",
    "port",
    "HTTPS_token",
    "Request_URL",
    "URL_of_Anchor",
    "Links_in_tags",
    "SFH",
    "Submitting_to_email",
    "Abnormal_URL",
    "Redirect",
    "on_mouseover",
    "RightClick",
    "popUpWidnow",
    "Iframe",
    "age_of_domain",
    "DNSRecord",
];

const SHORTENERS: &[&str] = &[
    "bit.ly", "goo.gl", "tinyurl.com", "ow.ly", "t.co", "is.gd", "buff.ly", "adf.ly",
    "bitly.com", "cutt.ly", "rebrand.ly", "shorturl.at", "tiny.cc", "lnkd.in", "db.tt",
    "qr.ae", "reurl.cc", "pse.is", "lihi.cc", "v.gd", "x.co", "soo.gd", "s2r.co",
];

const LEGITIMATE: f64 = 1.0;
const SUSPICIOUS: f64 = 0.0;
const PHISHING: f64 = -1.0;

/// Lexical URL features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlFeatures {
    pub having_ip_address: f64,
    pub url_length: f64,
    pub shortening_service: f64,
    pub having_at_symbol: f64,
    pub double_slash_redirecting: f64,
    pub prefix_suffix: f64,
    pub having_sub_domain: f64,
    pub ssl_final_state: f64,
    pub port: f64,
    pub https_token: f64,
}

impl UrlFeatures {
    /// Extract from a normalized URL
    pub fn extract(url: &NormalizedUrl) -> Self {
        let raw = url.as_str();
        let host = url.host();

        let url_length = match raw.len() {
            0..=53 => LEGITIMATE,
            54..=75 => SUSPICIOUS,
            _ => PHISHING,
        };

        // "http://" puts the scheme's slashes at 5-6, "https://" at 6-7
        let double_slash_redirecting = match raw.rfind("//") {
            Some(pos) if pos > 7 => PHISHING,
            _ => LEGITIMATE,
        };

        let having_sub_domain = if url.is_ip_host() {
            LEGITIMATE
        } else {
            match host.matches('.').count() {
                0 | 1 => LEGITIMATE,
                2 => SUSPICIOUS,
                _ => PHISHING,
            }
        };

        let shortened = SHORTENERS
            .iter()
            .any(|s| host == *s || host.ends_with(&format!(".{}", s)));

        let default_port = url.port().is_none();

        Self {
            having_ip_address: flag(url.is_ip_host()),
            url_length,
            shortening_service: flag(shortened),
            having_at_symbol: flag(raw.contains('@')),
            double_slash_redirecting,
            prefix_suffix: flag(host.contains('-')),
            having_sub_domain,
            ssl_final_state: if url.is_https() { LEGITIMATE } else { PHISHING },
            port: flag(!default_port),
            https_token: flag(host.contains("https")),
        }
    }

    /// Model input vector in dataset column order
    pub fn to_vector(&self) -> [f64; FEATURE_COUNT] {
        let unknown = SUSPICIOUS;
        [
            self.having_ip_address,
            self.url_length,
            self.shortening_service,
            self.having_at_symbol,
            self.double_slash_redirecting,
            self.prefix_suffix,
            self.having_sub_domain,
            self.ssl_final_state,
            unknown, // Domain_registeration_length
            unknown, // Favicon
            self.port,
            self.https_token,
            unknown, // Request_URL
            unknown, // URL_of_Anchor
            unknown, // Links_in_tags
            unknown, // SFH
            unknown, // Submitting_to_email
            unknown, // Abnormal_URL
            unknown, // Redirect
            unknown, // on_mouseover
            unknown, // RightClick
            unknown, // popUpWidnow
            unknown, // Iframe
            unknown, // age_of_domain
            unknown, // DNSRecord
        ]
    }
}

/// `-1` when the phishing indicator is present, `1` otherwise
fn flag(indicator: bool) -> f64 {
    if indicator {
        PHISHING
    } else {
        LEGITIMATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(raw: &str) -> UrlFeatures {
        UrlFeatures::extract(&NormalizedUrl::parse(raw).unwrap())
    }

    #[test]
    fn test_clean_short_https_url() {
        let f = features("https://rust-lang.org/learn");
        assert_eq!(f.having_ip_address, 1.0);
        assert_eq!(f.url_length, 1.0);
        assert_eq!(f.ssl_final_state, 1.0);
        assert_eq!(f.having_sub_domain, 1.0);
        assert_eq!(f.prefix_suffix, -1.0);
        assert_eq!(f.port, 1.0);
    }

    #[test]
    fn test_phishing_indicators() {
        let f = features("http://192.168.10.4:8080/login//paypal.com@evil");
        assert_eq!(f.having_ip_address, -1.0);
        assert_eq!(f.having_at_symbol, -1.0);
        assert_eq!(f.double_slash_redirecting, -1.0);
        assert_eq!(f.ssl_final_state, -1.0);
        assert_eq!(f.port, -1.0);
    }

    #[test]
    fn test_subdomain_depth_and_shortener() {
        assert_eq!(features("http://a.b.example.com").having_sub_domain, -1.0);
        assert_eq!(features("http://mail.example.com").having_sub_domain, 0.0);
        assert_eq!(features("https://bit.ly/3xYz").shortening_service, -1.0);
        assert_eq!(features("https://https-secure-login.com").https_token, -1.0);
    }

    #[test]
    fn test_url_length_bands() {
        let long = format!("http://example.com/{}", "a".repeat(80));
        assert_eq!(features(&long).url_length, -1.0);
        let medium = format!("http://example.com/{}", "a".repeat(40));
        assert_eq!(features(&medium).url_length, 0.0);
    }

    #[test]
    fn test_vector_layout() {
        let v = features("https://example.com").to_vector();
        assert_eq!(v.len(), FEATURE_NAMES.len());
        assert_eq!(v[FEATURE_NAMES.iter().position(|n| *n == "port").unwrap()], 1.0);
        assert_eq!(v[FEATURE_NAMES.iter().position(|n| *n == "Favicon").unwrap()], 0.0);
        assert!(v.iter().all(|x| [-1.0, 0.0, 1.0].contains(x)));
    }
}
