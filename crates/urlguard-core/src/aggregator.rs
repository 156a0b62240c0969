//! Result aggregation
//!
//! Maps the ordered probe outcomes onto the report one-to-one. No voting:
//! consumers decide what the individual entries add up to.

use crate::probe::{ProbeKind, ProbeOutcome, ProbeStatus, ProbeVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label of the synthetic entry produced for unparseable input
pub const INPUT_VALIDATION_LABEL: &str = "input_validation";

/// Status of a report entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    Failed,
    TimedOut,
    InvalidInput,
}

impl From<ProbeStatus> for EntryStatus {
    fn from(status: ProbeStatus) -> Self {
        match status {
            ProbeStatus::Success => EntryStatus::Success,
            ProbeStatus::Failed => EntryStatus::Failed,
            ProbeStatus::TimedOut => EntryStatus::TimedOut,
        }
    }
}

/// One labeled entry of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub label: String,
    pub probe: Option<ProbeKind>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ProbeVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only set on the synthetic invalid-input entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fraud: Option<bool>,
}

impl ReportEntry {
    /// Whether the entry points at fraud on its own
    pub fn indicates_fraud(&self) -> bool {
        self.is_fraud.unwrap_or(false)
            || self.verdict.as_ref().map(|v| v.indicates_fraud()).unwrap_or(false)
    }
}

/// Aggregate report for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub url: String,
    pub entries: Vec<ReportEntry>,
    pub generated_at: DateTime<Utc>,
}

impl AggregateReport {
    /// Entry for a given probe
    pub fn entry(&self, kind: ProbeKind) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.probe == Some(kind))
    }

    /// Labels of entries whose verdict points at fraud, in report order
    pub fn flagged_by(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.indicates_fraud())
            .map(|e| e.label.as_str())
            .collect()
    }

    /// Whether this is the synthetic invalid-input report
    pub fn is_invalid_input(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].status == EntryStatus::InvalidInput
    }

    /// Entries that did not produce a verdict
    pub fn failures(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, EntryStatus::Failed | EntryStatus::TimedOut))
            .count()
    }
}

/// Build the report from outcomes in configured probe order.
pub fn build_report(url: &str, outcomes: Vec<ProbeOutcome>) -> AggregateReport {
    let entries = outcomes
        .into_iter()
        .map(|outcome| ReportEntry {
            label: outcome.probe.label().to_string(),
            probe: Some(outcome.probe),
            status: outcome.status.into(),
            verdict: outcome.verdict,
            error: outcome.error,
            is_fraud: None,
        })
        .collect();

    AggregateReport {
        url: url.to_string(),
        entries,
        generated_at: Utc::now(),
    }
}

/// Fail-closed report for input that could not be normalized.
pub fn invalid_input_report(raw: &str, reason: &str) -> AggregateReport {
    AggregateReport {
        url: raw.to_string(),
        entries: vec![ReportEntry {
            label: INPUT_VALIDATION_LABEL.to_string(),
            probe: None,
            status: EntryStatus::InvalidInput,
            verdict: None,
            error: Some(format!("Invalid URL format: {}", reason)),
            is_fraud: Some(true),
        }],
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Rating;
    use std::time::Duration;

    fn outcomes() -> Vec<ProbeOutcome> {
        vec![
            ProbeOutcome::success(
                ProbeKind::ReputationDb,
                ProbeVerdict::Reputation { listed: true, matched: Some("example.com".into()) },
                Duration::from_millis(3),
            ),
            ProbeOutcome::timed_out(ProbeKind::ContentScan, Duration::from_secs(2)),
            ProbeOutcome::failed(ProbeKind::DomainInfo, "whois refused", Duration::from_millis(80)),
            ProbeOutcome::success(
                ProbeKind::ThirdPartyClassifier,
                ProbeVerdict::Classification { category: 1, rating: Rating::Safe, detail: None },
                Duration::from_millis(300),
            ),
        ]
    }

    #[test]
    fn test_preserves_order_and_count() {
        let report = build_report("http://example.com", outcomes());
        let labels: Vec<_> = report.entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["phishing_database", "content_analysis", "domain_info", "third_party"]);
        assert_eq!(report.failures(), 2);
    }

    #[test]
    fn test_failed_entries_keep_error_not_verdict() {
        let report = build_report("http://example.com", outcomes());
        let content = report.entry(ProbeKind::ContentScan).unwrap();
        assert_eq!(content.status, EntryStatus::TimedOut);
        assert!(content.verdict.is_none());
        assert!(content.error.as_deref().unwrap().contains("timed out"));
    }

    #[test]
    fn test_flagged_by() {
        let report = build_report("http://example.com", outcomes());
        assert_eq!(report.flagged_by(), ["phishing_database"]);
    }

    #[test]
    fn test_invalid_input_report() {
        let report = invalid_input_report("not a url", "relative URL without a base");
        assert!(report.is_invalid_input());
        assert_eq!(report.entries[0].label, INPUT_VALIDATION_LABEL);
        assert_eq!(report.flagged_by(), [INPUT_VALIDATION_LABEL]);
    }

    #[test]
    fn test_report_survives_json() {
        let report = build_report("http://example.com", outcomes());
        let json = serde_json::to_string(&report).unwrap();
        let back: AggregateReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
