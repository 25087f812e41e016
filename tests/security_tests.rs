//! Classification, scoring and correlation behaviour

use async_trait::async_trait;
use netaudit::{
    config::EngineConfig,
    credentials::Credential,
    intelligence::{
        classifier::{classify_device, extract_manufacturer, extract_version, DeviceCategory},
        correlation::{search_terms, VulnerabilityLookup, VulnerabilityMatch, MAX_SEARCH_TERMS},
        scoring::{heuristic_cvss, Scorer},
    },
    report::{FindingDraft, Severity},
    scanner::{ModuleContext, ModuleRunner, ScanEngine, ScanModule, ScanRequest},
    ScanError, ScanResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Lookup that records the terms it was asked for
#[derive(Default)]
struct RecordingLookup {
    calls: AtomicUsize,
    last_terms: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl VulnerabilityLookup for RecordingLookup {
    async fn search(&self, terms: &[String]) -> ScanResult<Vec<VulnerabilityMatch>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_terms.lock() {
            *last = terms.to_vec();
        }
        if self.fail {
            return Err(ScanError::NetworkError("lookup offline".into()));
        }
        Ok(vec![
            VulnerabilityMatch {
                id: "CVE-2021-1234".into(),
                score: 8.1,
                description: None,
            },
            VulnerabilityMatch {
                id: "CVE-2019-0001".into(),
                score: 5.0,
                description: None,
            },
        ])
    }
}

struct TelnetRunner;

#[async_trait]
impl ModuleRunner for TelnetRunner {
    fn module(&self) -> ScanModule {
        ScanModule::Network
    }

    async fn run(&self, _target: &str, _credentials: &[Credential], _ctx: &ModuleContext) -> ScanResult<Vec<FindingDraft>> {
        Ok(vec![
            FindingDraft::vulnerability(Severity::High, "Telnet Service Exposed", "telnet is listening"),
            FindingDraft::information("Open Ports Detected", "23/telnet"),
        ])
    }
}

#[test]
fn test_device_classification() {
    assert_eq!(classify_device("Cisco IOS Router"), DeviceCategory::Router);
    assert_eq!(extract_manufacturer("Cisco IOS Router"), "Cisco Systems");
    assert_eq!(classify_device("HP LaserJet Pro M404"), DeviceCategory::Printer);
    assert_eq!(extract_manufacturer("HP LaserJet Pro M404"), "HP");
    assert_eq!(classify_device("APC Web/SNMP Management Card"), DeviceCategory::Ups);
    assert_eq!(classify_device("FortiGate-60E v6.4.9"), DeviceCategory::Firewall);
    assert_eq!(classify_device("Hikvision DS-2CD2143G0-I"), DeviceCategory::Camera);
    assert_eq!(classify_device("Linux nas 5.15.0"), DeviceCategory::Server);
    assert_eq!(classify_device("Acme Widget"), DeviceCategory::NetworkDevice);
    assert_eq!(extract_manufacturer("Acme Widget"), "Unknown");
}

#[test]
fn test_first_category_rule_wins() {
    // "router" comes before "server" in the rule order
    assert_eq!(classify_device("Linux based router"), DeviceCategory::Router);
}

#[test]
fn test_version_extraction_order() {
    assert_eq!(
        extract_version("Cisco IOS Software, Version 15.2(4)M7, RELEASE").as_deref(),
        Some("15.2(4)M7")
    );
    assert_eq!(extract_version("RouterOS v7.11.2").as_deref(), Some("7.11.2"));
    assert_eq!(extract_version("firmware 2.4.1 build").as_deref(), Some("2.4.1"));
    assert_eq!(extract_version("no digits here"), None);
}

#[test]
fn test_critical_heuristic_scores_stay_in_range() {
    for _ in 0..1000 {
        let score = heuristic_cvss(Severity::Critical);
        assert!((9.0..=10.0).contains(&score), "score {} out of range", score);
        assert_eq!((score * 10.0).round() / 10.0, score);
    }
    for _ in 0..200 {
        assert!((1.0..=4.0).contains(&heuristic_cvss(Severity::Low)));
    }
    assert_eq!(heuristic_cvss(Severity::Info), 0.0);
}

#[test]
fn test_search_terms() {
    let terms = search_terms(
        "Weak SSH Default Configuration Detected",
        "OpenSSH on Linux allows ssh password logins",
    );
    assert_eq!(terms, vec!["SSH", "Configuration", "Linux", "OpenSSH"]);

    let many = search_terms(
        "Apache httpd mod_proxy request smuggling",
        "Apache over HTTP and TLS on Windows with OpenSSL and MySQL",
    );
    assert_eq!(many.len(), MAX_SEARCH_TERMS);
    assert_eq!(many[0], "Apache");
    assert_eq!(many.iter().filter(|t| t.eq_ignore_ascii_case("apache")).count(), 1);
}

#[tokio::test]
async fn test_lookup_overrides_heuristic() {
    let lookup = Arc::new(RecordingLookup::default());
    let scorer = Scorer::with_lookup(lookup.clone());

    let mut draft = FindingDraft::vulnerability(Severity::Medium, "Insecure Telnet Service", "Telnet enabled");
    scorer.score(&mut draft).await;

    assert_eq!(draft.cve.as_deref(), Some("CVE-2021-1234"));
    assert_eq!(draft.cvss_score, Some(8.1));
    assert_eq!(*lookup.last_terms.lock().unwrap(), vec!["Telnet", "Service"]);
}

#[tokio::test]
async fn test_lookup_failure_falls_back() {
    let lookup = Arc::new(RecordingLookup {
        fail: true,
        ..Default::default()
    });
    let scorer = Scorer::with_lookup(lookup.clone());

    let mut draft = FindingDraft::vulnerability(Severity::High, "FTP Service Exposed", "ftp on 21");
    scorer.score(&mut draft).await;

    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    assert!(draft.cve.is_none());
    assert!((7.0..=9.0).contains(&draft.cvss_score.unwrap()));
}

#[tokio::test]
async fn test_engine_scores_every_finding() {
    let lookup = Arc::new(RecordingLookup::default());
    let engine = ScanEngine::new(EngineConfig::default())
        .unwrap()
        .with_runner(Arc::new(TelnetRunner))
        .with_lookup(lookup.clone());

    let report = engine
        .run(ScanRequest::new(vec!["10.20.30.40".into()], vec![ScanModule::Network]))
        .await;

    // Only the vulnerability goes to the lookup
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    let telnet = report.findings.iter().find(|f| f.is_vulnerability()).unwrap();
    assert_eq!(telnet.cve.as_deref(), Some("CVE-2021-1234"));
    assert_eq!(telnet.cvss_score, 8.1);
    let info = report.findings.iter().find(|f| !f.is_vulnerability()).unwrap();
    assert_eq!(info.cvss_score, 0.0);
    assert!(info.cve.is_none());
}
