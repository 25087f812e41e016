//! Bounded-concurrency TCP connect probing

use crate::config::PortScanConfig;
use crate::intelligence::classifier::{DeviceProfile, UNKNOWN_MANUFACTURER};
use crate::network::protocol::ServiceDatabase;
use crate::network::socket::TcpConnectScanner;
use crate::network::{PortResult, PortState};
use crate::report::{FindingDraft, Severity};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Probes a list of TCP ports on one target.
///
/// Connect attempts are bounded by a semaphore. Probers built from the same
/// limiter share one bound, so several targets scanned at once never exceed it.
#[derive(Debug, Clone)]
pub struct PortProber {
    scanner: TcpConnectScanner,
    service_db: ServiceDatabase,
    limiter: Arc<Semaphore>,
    banner_timeout: Option<Duration>,
}

impl PortProber {
    pub fn new(connect_timeout: Duration, concurrency: usize) -> Self {
        Self {
            scanner: TcpConnectScanner::new(connect_timeout),
            service_db: ServiceDatabase::new(),
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            banner_timeout: None,
        }
    }

    pub fn from_config(config: &PortScanConfig) -> Self {
        let prober = Self::new(Duration::from_millis(config.timeout_ms), config.concurrency);
        if config.grab_banners {
            prober.with_banners(Duration::from_millis(config.banner_timeout_ms))
        } else {
            prober
        }
    }

    /// Read a banner from each open port, waiting at most `wait`
    pub fn with_banners(mut self, wait: Duration) -> Self {
        self.banner_timeout = Some(wait);
        self
    }

    /// Draw connect permits from a shared limiter instead of a private one
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Open ports only, sorted by port number
    pub async fn scan(&self, target: &str, ports: &[u16]) -> Vec<PortResult> {
        let tasks = ports.iter().copied().map(|port| async move {
            let _permit = self.limiter.acquire().await.ok()?;
            Some(self.probe(target, port).await)
        });

        let results: Vec<PortResult> = join_all(tasks).await.into_iter().flatten().collect();
        let filtered = results.iter().filter(|r| r.state == PortState::Filtered).count();

        let mut open: Vec<PortResult> = results.into_iter().filter(PortResult::is_open).collect();
        open.sort_by_key(|result| result.port);
        open.dedup_by_key(|result| result.port);

        log::debug!(
            "{}: {} of {} ports open, {} filtered",
            target,
            open.len(),
            ports.len(),
            filtered
        );
        open
    }

    async fn probe(&self, target: &str, port: u16) -> PortResult {
        let service = self.service_db.service_name(port);
        let start = Instant::now();
        let mut stream = match self.scanner.connect(target, port).await {
            Ok(stream) => stream,
            Err(e) => {
                let state = if e.is_timeout() {
                    PortState::Filtered
                } else {
                    PortState::Closed
                };
                log::trace!("{}:{} {}: {}", target, port, state, e);
                return PortResult::new(port, state, service);
            }
        };

        let mut result = PortResult::new(port, PortState::Open, service).with_response_time(start.elapsed());

        if let Some(wait) = self.banner_timeout {
            if let Some(banner) = TcpConnectScanner::grab_banner(&mut stream, wait).await {
                result = result.with_banner(banner);
            }
        }

        result
    }
}

/// Exposed services that warrant a vulnerability finding when open
const RISKY_SERVICES: &[(u16, Severity, &str, &str)] = &[
    (21, Severity::Medium, "FTP Service Exposed", "Replace FTP with SFTP or FTPS"),
    (23, Severity::High, "Telnet Service Exposed", "Disable telnet and use SSH"),
    (445, Severity::Medium, "SMB Service Exposed", "Restrict SMB to trusted networks"),
    (512, Severity::High, "rexec Service Exposed", "Disable the r-services and use SSH"),
    (513, Severity::High, "rlogin Service Exposed", "Disable the r-services and use SSH"),
    (514, Severity::High, "rsh Service Exposed", "Disable the r-services and use SSH"),
    (1433, Severity::Medium, "Database Port Exposed", "Restrict database listeners to application hosts"),
    (3306, Severity::Medium, "Database Port Exposed", "Restrict database listeners to application hosts"),
    (3389, Severity::Medium, "RDP Service Exposed", "Require a VPN or gateway in front of RDP"),
    (5432, Severity::Medium, "Database Port Exposed", "Restrict database listeners to application hosts"),
    (5900, Severity::Medium, "VNC Service Exposed", "Tunnel VNC over SSH or a VPN"),
    (6379, Severity::Medium, "Database Port Exposed", "Restrict database listeners to application hosts"),
    (27017, Severity::Medium, "Database Port Exposed", "Restrict database listeners to application hosts"),
];

/// Turn probe results into network-module findings
pub fn port_findings(target: &str, open: &[PortResult]) -> Vec<FindingDraft> {
    if open.is_empty() {
        return Vec::new();
    }

    let listing: Vec<String> = open.iter().map(|r| format!("{}/{}", r.port, r.service)).collect();
    let mut findings = vec![FindingDraft::information(
        "Open Ports Detected",
        format!("{} open TCP ports on {}: {}", open.len(), target, listing.join(", ")),
    )
    .with_detail("ports", open.iter().map(|r| r.port).collect::<Vec<_>>())
    .with_detail("services", listing)];

    for result in open {
        let Some((_, severity, title, solution)) = RISKY_SERVICES.iter().find(|(port, ..)| *port == result.port) else {
            continue;
        };
        findings.push(
            FindingDraft::vulnerability(
                *severity,
                *title,
                format!("{} is listening on {}:{}", result.service, target, result.port),
            )
            .with_solution(*solution)
            .with_detail("port", result.port)
            .with_detail("service", result.service.clone()),
        );
    }

    let banners: Vec<&PortResult> = open.iter().filter(|r| r.banner.is_some()).collect();
    if let Some(profile) = banners
        .iter()
        .filter_map(|r| r.banner.as_deref())
        .map(DeviceProfile::from_description)
        .find(|p| p.manufacturer != UNKNOWN_MANUFACTURER || p.version.is_some())
    {
        let mut finding = FindingDraft::information(
            "Service Banner Fingerprint",
            format!(
                "Banners on {} suggest a {} from {}",
                target,
                profile.category.as_str(),
                profile.manufacturer
            ),
        )
        .with_detail("category", profile.category.as_str())
        .with_detail("manufacturer", profile.manufacturer);
        if let Some(version) = profile.version {
            finding = finding.with_detail("version", version);
        }
        let samples: Vec<String> = banners
            .iter()
            .filter_map(|r| r.banner.as_ref().map(|b| format!("{}: {}", r.port, b)))
            .collect();
        findings.push(finding.with_detail("banners", samples));
    }

    findings
}
