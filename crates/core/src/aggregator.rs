use crate::error::ScorerError;
use crate::scorers::MetricsMap;
use crate::session::Domain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Canonical per-domain metrics of one session.
///
/// Every domain and every canonical metric is present. Values are finite and
/// within `[MIN_SCORE, MAX_SCORE]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreRecord(BTreeMap<Domain, MetricsMap>);

impl ScoreRecord {
    /// A record holding zero for every canonical metric.
    pub fn zeroed() -> Self {
        Self(Domain::ALL.iter().map(|d| (*d, zeroed_metrics(*d))).collect())
    }

    pub fn domain(&self, domain: Domain) -> Option<&MetricsMap> {
        self.0.get(&domain)
    }

    /// A metric's value, or zero if it was never reported.
    pub fn metric(&self, domain: Domain, name: &str) -> f64 {
        self.0
            .get(&domain)
            .and_then(|metrics| metrics.get(name))
            .copied()
            .unwrap_or(MIN_SCORE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Domain, &MetricsMap)> {
        self.0.iter().map(|(domain, metrics)| (*domain, metrics))
    }
}

/// The merged record plus the domains that could not be scored.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedScores {
    pub record: ScoreRecord,
    /// Failure message per domain. Not part of the record itself.
    pub failures: BTreeMap<Domain, String>,
}

impl AggregatedScores {
    pub fn is_failed(&self, domain: Domain) -> bool {
        self.failures.contains_key(&domain)
    }
}

/// Merges scorer results into the canonical record. Never fails: a domain
/// whose scorer failed, or that has no result at all, is zero-filled and
/// listed in `failures`.
pub fn aggregate(
    mut results: BTreeMap<Domain, Result<MetricsMap, ScorerError>>,
) -> AggregatedScores {
    let mut record = BTreeMap::new();
    let mut failures = BTreeMap::new();

    for domain in Domain::ALL {
        match results.remove(&domain) {
            Some(Ok(metrics)) => {
                record.insert(domain, normalize(domain, metrics));
            }
            Some(Err(e)) => {
                tracing::warn!("{domain} scores unavailable: {e}");
                failures.insert(domain, e.to_string());
                record.insert(domain, zeroed_metrics(domain));
            }
            None => {
                tracing::warn!("{domain} scores unavailable: no scorer result");
                failures.insert(domain, "no scorer result".to_string());
                record.insert(domain, zeroed_metrics(domain));
            }
        }
    }

    AggregatedScores {
        record: ScoreRecord(record),
        failures,
    }
}

fn zeroed_metrics(domain: Domain) -> MetricsMap {
    domain
        .metric_names()
        .iter()
        .map(|name| (name.to_string(), MIN_SCORE))
        .collect()
}

fn normalize(domain: Domain, metrics: MetricsMap) -> MetricsMap {
    let mut normalized = zeroed_metrics(domain);
    for (name, value) in metrics {
        let bounded = if !value.is_finite() {
            tracing::warn!("{domain}.{name} is not a number ({value}), using 0");
            MIN_SCORE
        } else if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
            tracing::warn!("{domain}.{name} = {value} is out of range, clamping");
            value.clamp(MIN_SCORE, MAX_SCORE)
        } else {
            value
        };
        normalized.insert(name, bounded);
    }
    normalized
}
