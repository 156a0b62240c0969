//! Evaluation orchestrator
//!
//! Cache check, concurrent probe fan-out with per-probe deadlines, ordered
//! join, aggregation and cache write-back. `evaluate` never fails: every
//! internal fault ends up as an entry of the returned report.

use crate::aggregator::{build_report, invalid_input_report, AggregateReport};
use crate::cache::CacheStore;
use crate::error::GuardError;
use crate::normalize::NormalizedUrl;
use crate::probe::{Probe, ProbeKind, ProbeOutcome, ProbeStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default lifetime of a cached report
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
/// Slack on top of the slowest probe deadline before stragglers are aborted
pub const DEFAULT_JOIN_GRACE: Duration = Duration::from_millis(250);

/// Evaluation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStats {
    pub evaluations: u64,
    pub invalid_inputs: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub probe_failures: u64,
    pub probe_timeouts: u64,
    pub total_latency_us: u64,
}

impl EvaluationStats {
    /// Average evaluation latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        if self.evaluations == 0 { 0.0 }
        else { self.total_latency_us as f64 / self.evaluations as f64 }
    }

    /// Share of lookups answered from cache
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 { 0.0 }
        else { self.cache_hits as f64 / lookups as f64 }
    }
}

/// Runs probes for a URL and assembles the report
pub struct Orchestrator {
    probes: Vec<Arc<dyn Probe>>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    join_grace: Duration,
    stats: RwLock<EvaluationStats>,
}

impl Orchestrator {
    /// Probes run and are reported in the order given
    pub fn new(probes: Vec<Arc<dyn Probe>>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            probes,
            cache,
            ttl,
            join_grace: DEFAULT_JOIN_GRACE,
            stats: RwLock::new(EvaluationStats::default()),
        }
    }

    pub fn with_join_grace(mut self, grace: Duration) -> Self {
        self.join_grace = grace;
        self
    }

    /// Configured probes, in report order
    pub fn probe_kinds(&self) -> Vec<ProbeKind> {
        self.probes.iter().map(|p| p.kind()).collect()
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Longest time `evaluate` waits on probes
    pub fn overall_deadline(&self) -> Duration {
        self.probes
            .iter()
            .map(|p| p.deadline())
            .max()
            .unwrap_or_default()
            + self.join_grace
    }

    /// Get evaluation stats
    pub fn stats(&self) -> EvaluationStats {
        self.stats.read().clone()
    }

    /// Evaluate a raw URL
    pub async fn evaluate(&self, raw: &str) -> AggregateReport {
        let start = Instant::now();

        let url = match NormalizedUrl::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                let reason = match e {
                    GuardError::InvalidInput(msg) => msg,
                    other => other.to_string(),
                };
                tracing::debug!("Rejected input {:?}: {}", raw, reason);
                self.record(start, |s| s.invalid_inputs += 1);
                return invalid_input_report(raw, &reason);
            }
        };
        let key = url.as_str();

        match self.cache.get(key).await {
            Ok(Some(report)) => {
                tracing::debug!("Cache hit for {}", key);
                self.record(start, |s| s.cache_hits += 1);
                return report;
            }
            Ok(None) => {
                tracing::debug!("Cache miss for {}", key);
                self.stats.write().cache_misses += 1;
            }
            Err(e) => {
                tracing::warn!("Cache read failed for {}, evaluating: {}", key, e);
                let mut stats = self.stats.write();
                stats.cache_misses += 1;
                stats.cache_errors += 1;
            }
        }

        let outcomes = self.run_probes(&url).await;
        let report = build_report(key, outcomes);

        if let Err(e) = self.cache.put(key, &report, self.ttl).await {
            tracing::warn!("Cache write failed for {}: {}", key, e);
            self.stats.write().cache_errors += 1;
        }

        self.record(start, |_| {});
        report
    }

    /// Spawn every probe, then join in configured order against one overall
    /// deadline. Tasks still running at the deadline are aborted.
    async fn run_probes(&self, url: &NormalizedUrl) -> Vec<ProbeOutcome> {
        let url = Arc::new(url.clone());
        let started = Instant::now();
        let overall = tokio::time::Instant::now() + self.overall_deadline();

        let handles: Vec<_> = self
            .probes
            .iter()
            .map(|probe| {
                let probe = Arc::clone(probe);
                let url = Arc::clone(&url);
                tokio::spawn(async move { run_probe(probe.as_ref(), &url).await })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (probe, mut handle) in self.probes.iter().zip(handles) {
            let kind = probe.kind();
            let outcome = match tokio::time::timeout_at(overall, &mut handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    let reason = if e.is_panic() { "probe panicked" } else { "probe task cancelled" };
                    ProbeOutcome::failed(kind, reason, started.elapsed())
                }
                Err(_) => {
                    handle.abort();
                    ProbeOutcome::timed_out(kind, probe.deadline())
                }
            };

            match outcome.status {
                ProbeStatus::Success => {
                    tracing::debug!("{} finished in {}ms", kind.label(), outcome.elapsed_ms);
                }
                ProbeStatus::Failed => {
                    tracing::warn!(
                        "{} failed for {}: {}",
                        kind.label(),
                        url,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                    self.stats.write().probe_failures += 1;
                }
                ProbeStatus::TimedOut => {
                    tracing::warn!("{} timed out for {}", kind.label(), url);
                    self.stats.write().probe_timeouts += 1;
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    fn record(&self, start: Instant, update: impl FnOnce(&mut EvaluationStats)) {
        let mut stats = self.stats.write();
        stats.evaluations += 1;
        stats.total_latency_us += start.elapsed().as_micros() as u64;
        update(&mut stats);
    }
}

/// Invoke one probe under its own deadline
async fn run_probe(probe: &dyn Probe, url: &NormalizedUrl) -> ProbeOutcome {
    let kind = probe.kind();
    let deadline = probe.deadline();
    let start = Instant::now();

    match tokio::time::timeout(deadline, probe.invoke(url)).await {
        Ok(result) => ProbeOutcome::from_result(kind, result, start.elapsed()),
        Err(_) => ProbeOutcome::timed_out(kind, deadline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::EntryStatus;
    use crate::cache::MemoryCache;
    use crate::error::{CacheError, ProbeError};
    use crate::probe::ProbeVerdict;
    use crate::probes::{Blocklist, ReputationProbe};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Verdict(Duration),
        Fail,
        Hang,
        Panic,
        /// Holds the worker thread without yielding
        Block(Duration),
    }

    struct FakeProbe {
        kind: ProbeKind,
        deadline: Duration,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(kind: ProbeKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                deadline: Duration::from_millis(100),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        fn kind(&self) -> ProbeKind {
            self.kind
        }

        fn deadline(&self) -> Duration {
            self.deadline
        }

        async fn invoke(&self, _url: &NormalizedUrl) -> Result<ProbeVerdict, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Verdict(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(ProbeVerdict::Content { keywords_found: false, matched_keywords: vec![] })
                }
                Behavior::Fail => Err(ProbeError::adapter("collaborator down")),
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("probe bug"),
                Behavior::Block(duration) => {
                    std::thread::sleep(duration);
                    Ok(ProbeVerdict::Content { keywords_found: false, matched_keywords: vec![] })
                }
            }
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<AggregateReport>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn put(&self, _key: &str, _report: &AggregateReport, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn is_available(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingCache {
        inner: MemoryCache,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for CountingCache {
        async fn get(&self, key: &str) -> Result<Option<AggregateReport>, CacheError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, report: &AggregateReport, ttl: Duration) -> Result<(), CacheError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, report, ttl).await
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    fn as_probes(fakes: &[Arc<FakeProbe>]) -> Vec<Arc<dyn Probe>> {
        fakes.iter().map(|f| Arc::clone(f) as Arc<dyn Probe>).collect()
    }

    fn kinds(report: &AggregateReport) -> Vec<Option<ProbeKind>> {
        report.entries.iter().map(|e| e.probe).collect()
    }

    #[tokio::test]
    async fn test_entries_follow_configured_order_not_completion_order() {
        let fakes = vec![
            FakeProbe::new(ProbeKind::ReputationDb, Behavior::Verdict(Duration::from_millis(60))),
            FakeProbe::new(ProbeKind::ContentScan, Behavior::Verdict(Duration::from_millis(30))),
            FakeProbe::new(ProbeKind::DomainInfo, Behavior::Verdict(Duration::ZERO)),
        ];
        let orchestrator = Orchestrator::new(as_probes(&fakes), Arc::new(MemoryCache::default()), DEFAULT_TTL);

        let report = orchestrator.evaluate("https://shop.example.net").await;
        assert_eq!(
            kinds(&report),
            vec![Some(ProbeKind::ReputationDb), Some(ProbeKind::ContentScan), Some(ProbeKind::DomainInfo)]
        );
        assert!(report.entries.iter().all(|e| e.status == EntryStatus::Success));
    }

    #[tokio::test]
    async fn test_second_evaluation_served_from_cache() {
        let fakes = vec![
            FakeProbe::new(ProbeKind::ReputationDb, Behavior::Verdict(Duration::ZERO)),
            FakeProbe::new(ProbeKind::GeoLocator, Behavior::Fail),
        ];
        let orchestrator = Orchestrator::new(as_probes(&fakes), Arc::new(MemoryCache::default()), DEFAULT_TTL);

        let first = orchestrator.evaluate("https://shop.example.net/").await;
        let second = orchestrator.evaluate("HTTPS://www.shop.example.net").await;

        assert_eq!(first, second);
        assert!(fakes.iter().all(|f| f.calls() == 1));

        let stats = orchestrator.stats();
        assert_eq!(stats.evaluations, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.probe_failures, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_listed_domain_flagged_regardless_of_other_probes() {
        let reputation: Arc<dyn Probe> = Arc::new(ReputationProbe::new(
            Arc::new(Blocklist::from_entries(["example.com"])),
            Duration::from_secs(1),
        ));
        let probes = vec![
            reputation,
            FakeProbe::new(ProbeKind::ContentScan, Behavior::Fail) as Arc<dyn Probe>,
            FakeProbe::new(ProbeKind::ThirdPartyClassifier, Behavior::Hang) as Arc<dyn Probe>,
        ];
        let orchestrator = Orchestrator::new(probes, Arc::new(MemoryCache::default()), DEFAULT_TTL);

        let report = orchestrator.evaluate("http://example.com").await;
        let entry = report.entry(ProbeKind::ReputationDb).unwrap();
        assert_eq!(
            entry.verdict,
            Some(ProbeVerdict::Reputation { listed: true, matched: Some("example.com".into()) })
        );
        assert_eq!(report.flagged_by(), vec!["phishing_database"]);
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_to_miss_path() {
        let fakes = vec![
            FakeProbe::new(ProbeKind::ReputationDb, Behavior::Verdict(Duration::ZERO)),
            FakeProbe::new(ProbeKind::ModelScorer, Behavior::Verdict(Duration::ZERO)),
        ];
        let healthy = Orchestrator::new(as_probes(&fakes), Arc::new(MemoryCache::default()), DEFAULT_TTL);
        let broken = Orchestrator::new(as_probes(&fakes), Arc::new(BrokenCache), DEFAULT_TTL);

        let expected = healthy.evaluate("https://a.example.org").await;
        let report = broken.evaluate("https://a.example.org").await;

        assert_eq!(kinds(&report), kinds(&expected));
        assert_eq!(report.url, expected.url);
        assert_eq!(broken.stats().cache_errors, 2);

        // every call goes to the probes again
        broken.evaluate("https://a.example.org").await;
        assert!(fakes.iter().all(|f| f.calls() == 3));
    }

    #[tokio::test]
    async fn test_invalid_input_short_circuits() {
        let fake = FakeProbe::new(ProbeKind::ReputationDb, Behavior::Verdict(Duration::ZERO));
        let cache = Arc::new(CountingCache::default());
        let orchestrator = Orchestrator::new(as_probes(&[fake.clone()]), cache.clone(), DEFAULT_TTL);

        let report = orchestrator.evaluate("not a url").await;

        assert!(report.is_invalid_input());
        assert_eq!(report.entries[0].is_fraud, Some(true));
        assert!(report.entries[0].error.as_deref().unwrap().starts_with("Invalid URL format"));
        assert_eq!(fake.calls(), 0);
        assert_eq!(cache.puts.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.stats().invalid_inputs, 1);
    }

    #[tokio::test]
    async fn test_hanging_probe_bounded_by_its_deadline() {
        let fakes = vec![
            FakeProbe::new(ProbeKind::ReputationDb, Behavior::Verdict(Duration::ZERO)),
            FakeProbe::new(ProbeKind::ThirdPartyClassifier, Behavior::Hang),
            FakeProbe::new(ProbeKind::GeoLocator, Behavior::Verdict(Duration::from_millis(10))),
        ];
        let orchestrator = Orchestrator::new(as_probes(&fakes), Arc::new(MemoryCache::default()), DEFAULT_TTL);

        let start = Instant::now();
        let report = orchestrator.evaluate("https://slow.example.net").await;
        assert!(start.elapsed() < Duration::from_secs(1));

        let statuses: Vec<_> = report.entries.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![EntryStatus::Success, EntryStatus::TimedOut, EntryStatus::Success]);
        assert_eq!(report.entries[1].error.as_deref(), Some("timed out after 100ms"));
        assert_eq!(orchestrator.stats().probe_timeouts, 1);
    }

    #[tokio::test]
    async fn test_every_probe_failing_still_yields_full_report() {
        let fakes = vec![
            FakeProbe::new(ProbeKind::ReputationDb, Behavior::Fail),
            FakeProbe::new(ProbeKind::ContentScan, Behavior::Panic),
            FakeProbe::new(ProbeKind::DomainInfo, Behavior::Hang),
        ];
        let cache = Arc::new(CountingCache::default());
        let orchestrator = Orchestrator::new(as_probes(&fakes), cache.clone(), DEFAULT_TTL);

        let report = orchestrator.evaluate("https://down.example.net").await;

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.failures(), 3);
        assert!(report.entries.iter().all(|e| e.verdict.is_none() && e.error.is_some()));
        assert_eq!(report.entries[1].error.as_deref(), Some("probe panicked"));
        assert_eq!(cache.puts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_overall_deadline_is_max_not_sum() {
        let fakes = vec![
            FakeProbe::new(ProbeKind::ReputationDb, Behavior::Fail),
            FakeProbe::new(ProbeKind::ContentScan, Behavior::Fail),
        ];
        let orchestrator = Orchestrator::new(as_probes(&fakes), Arc::new(MemoryCache::default()), DEFAULT_TTL)
            .with_join_grace(Duration::from_millis(5));
        assert_eq!(orchestrator.overall_deadline(), Duration::from_millis(105));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_thread_blocking_check_cut_off_at_overall_deadline() {
        let fakes = vec![
            FakeProbe::new(ProbeKind::ReputationDb, Behavior::Block(Duration::from_millis(1000))),
            FakeProbe::new(ProbeKind::ContentScan, Behavior::Verdict(Duration::ZERO)),
            FakeProbe::new(ProbeKind::DomainInfo, Behavior::Verdict(Duration::from_millis(20))),
        ];
        let orchestrator = Orchestrator::new(as_probes(&fakes), Arc::new(MemoryCache::default()), DEFAULT_TTL)
            .with_join_grace(Duration::from_millis(50));
        let overall = orchestrator.overall_deadline();

        let started = Instant::now();
        let report = orchestrator.evaluate("https://stuck.example.net").await;
        let elapsed = started.elapsed();

        // the inner timeout cannot fire while the thread sleeps
        assert!(elapsed >= overall, "returned after {elapsed:?}, before {overall:?}");
        assert!(elapsed < overall + Duration::from_millis(300), "returned after {elapsed:?}");

        assert_eq!(report.entries[0].status, EntryStatus::TimedOut);
        assert!(report.entries[0].verdict.is_none());
        assert_eq!(report.entries[1].status, EntryStatus::Success);
        assert_eq!(report.entries[2].status, EntryStatus::Success);
        assert_eq!(orchestrator.stats().probe_timeouts, 1);
    }
}
