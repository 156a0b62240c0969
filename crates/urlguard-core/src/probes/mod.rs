//! Probe implementations and their shipped collaborators

pub mod classifier;
pub mod content;
pub mod domain_info;
pub mod geo;
pub mod model;
pub mod reputation;

pub use classifier::{ClassifierClient, ClassifierProbe, UrlClassifier};
pub use content::{ContentProbe, HttpFetcher, KeywordScanner, PageFetcher};
pub use domain_info::{DomainInfoProbe, DomainPolicy, WhoisClient, WhoisLookup, WhoisRecord};
pub use geo::{CidrCountryDb, CountryLookup, GeoProbe, HostResolver, HttpCountryLookup, SystemResolver};
pub use model::{ModelProbe, ModelStore, RandomForest};
pub use reputation::{Blocklist, ReputationProbe, ReputationSource};

use crate::config::ProbeConfig;
use crate::error::GuardResult;
use crate::probe::{Probe, ProbeKind};
use std::sync::Arc;
use std::time::Duration;

/// Build the enabled probes, in configured order
pub fn build_probes(config: &ProbeConfig) -> GuardResult<Vec<Arc<dyn Probe>>> {
    let mut probes: Vec<Arc<dyn Probe>> = Vec::with_capacity(config.enabled.len());

    for kind in &config.enabled {
        let deadline = config.deadline(*kind);
        let probe: Arc<dyn Probe> = match kind {
            ProbeKind::ReputationDb => {
                let list = Blocklist::from_entries(&config.reputation.blocklist);
                if let Some(path) = &config.reputation.blocklist_path {
                    list.load_file(path)?;
                }
                Arc::new(ReputationProbe::new(Arc::new(list), deadline))
            }
            ProbeKind::ContentScan => Arc::new(ContentProbe::new(
                Arc::new(HttpFetcher::new(&config.content)?),
                KeywordScanner::new(&config.content.keywords)?,
                deadline,
            )),
            ProbeKind::DomainInfo => Arc::new(DomainInfoProbe::new(
                Arc::new(WhoisClient::new(
                    &config.domain_info.whois_server,
                    Duration::from_millis(config.domain_info.whois_timeout_ms),
                )?),
                DomainPolicy::from_config(&config.domain_info),
                deadline,
            )),
            ProbeKind::ThirdPartyClassifier => Arc::new(ClassifierProbe::new(
                Arc::new(ClassifierClient::new(&config.classifier)?),
                deadline,
            )),
            ProbeKind::ModelScorer => Arc::new(ModelProbe::new(
                Arc::new(ModelStore::from_config(&config.model)),
                config.model.threshold,
                deadline,
            )),
            ProbeKind::GeoLocator => Arc::new(GeoProbe::from_config(&config.geo)?),
        };
        probes.push(probe);
    }

    tracing::info!("Built {} probes", probes.len());
    Ok(probes)
}
