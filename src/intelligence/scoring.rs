//! CVSS scoring for findings

use super::correlation::{search_terms, VulnerabilityLookup};
use crate::report::{FindingDraft, Severity};
use rand::Rng;
use std::sync::Arc;

/// Half-open score range for each severity
pub fn severity_range(severity: Severity) -> Option<(f64, f64)> {
    match severity {
        Severity::Critical => Some((9.0, 10.0)),
        Severity::High => Some((7.0, 9.0)),
        Severity::Medium => Some((4.0, 7.0)),
        Severity::Low => Some((1.0, 4.0)),
        Severity::Info => None,
    }
}

/// Random score inside the severity bucket, rounded to one decimal.
/// Rounding can land exactly on the bucket's upper bound.
pub fn heuristic_cvss(severity: Severity) -> f64 {
    match severity_range(severity) {
        Some((low, high)) => {
            let raw = rand::thread_rng().gen_range(low..high);
            (raw * 10.0).round() / 10.0
        }
        None => 0.0,
    }
}

/// Assigns scores, preferring an external lookup when one is configured
#[derive(Clone, Default)]
pub struct Scorer {
    lookup: Option<Arc<dyn VulnerabilityLookup>>,
}

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup(lookup: Arc<dyn VulnerabilityLookup>) -> Self {
        Self { lookup: Some(lookup) }
    }

    /// Fill in `cvss_score` (and `cve` on a lookup hit) when the draft has none
    pub async fn score(&self, draft: &mut FindingDraft) {
        if draft.cvss_score.is_some() {
            return;
        }

        if draft.is_vulnerability() {
            if let Some(lookup) = &self.lookup {
                let terms = search_terms(&draft.title, &draft.description);
                if !terms.is_empty() {
                    match lookup.search(&terms).await {
                        Ok(matches) => {
                            if let Some(first) = matches.into_iter().next() {
                                log::debug!("'{}' correlated with {}", draft.title, first.id);
                                if draft.cve.is_none() {
                                    draft.cve = Some(first.id);
                                }
                                draft.cvss_score = Some(first.score);
                                return;
                            }
                        }
                        Err(e) => log::warn!("Vulnerability lookup for '{}' failed: {}", draft.title, e),
                    }
                }
            }
        }

        draft.cvss_score = Some(heuristic_cvss(draft.severity));
    }
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer").field("lookup", &self.lookup.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::correlation::VulnerabilityMatch;
    use crate::{ScanError, ScanResult};
    use async_trait::async_trait;

    struct FixedLookup(Option<VulnerabilityMatch>);

    #[async_trait]
    impl VulnerabilityLookup for FixedLookup {
        async fn search(&self, _terms: &[String]) -> ScanResult<Vec<VulnerabilityMatch>> {
            match &self.0 {
                Some(m) => Ok(vec![m.clone()]),
                None => Err(ScanError::TimeoutError),
            }
        }
    }

    #[test]
    fn test_heuristic_ranges() {
        for severity in Severity::all() {
            for _ in 0..200 {
                let score = heuristic_cvss(severity);
                match severity_range(severity) {
                    Some((low, high)) => assert!(score >= low && score <= high, "{} out of range", score),
                    None => assert_eq!(score, 0.0),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_lookup_overrides_heuristic() {
        let scorer = Scorer::with_lookup(Arc::new(FixedLookup(Some(VulnerabilityMatch {
            id: "CVE-2018-0171".to_string(),
            score: 9.8,
            description: None,
        }))));
        let mut draft = FindingDraft::vulnerability(Severity::Medium, "Cisco Smart Install", "Cisco IOS switch");
        scorer.score(&mut draft).await;
        assert_eq!(draft.cvss_score, Some(9.8));
        assert_eq!(draft.cve.as_deref(), Some("CVE-2018-0171"));
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back() {
        let scorer = Scorer::with_lookup(Arc::new(FixedLookup(None)));
        let mut draft = FindingDraft::vulnerability(Severity::High, "Telnet Service Exposed", "telnet on 23");
        scorer.score(&mut draft).await;
        let score = draft.cvss_score.unwrap();
        assert!((7.0..=9.0).contains(&score));
        assert!(draft.cve.is_none());
    }

    #[test]
    fn test_existing_score_kept() {
        let scorer = Scorer::new();
        let mut draft = FindingDraft::vulnerability(Severity::Low, "x", "y").with_score(3.3);
        tokio_test::block_on(scorer.score(&mut draft));
        assert_eq!(draft.cvss_score, Some(3.3));
    }

    #[test]
    fn test_information_scores_zero_without_lookup() {
        let scorer = Scorer::new();
        let mut draft = FindingDraft::information("Open Ports Detected", "22/ssh");
        tokio_test::block_on(scorer.score(&mut draft));
        assert_eq!(draft.cvss_score, Some(0.0));
        assert!(draft.cve.is_none());
    }
}
