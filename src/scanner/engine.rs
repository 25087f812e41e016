//! Scan orchestration

use crate::config::EngineConfig;
use crate::credentials::Credential;
use crate::intelligence::correlation::{NvdLookup, VulnerabilityLookup};
use crate::intelligence::scoring::Scorer;
use crate::report::{FindingDraft, ScanReport, ScanStatus};
use crate::scanner::modules::{ModuleContext, ModuleRegistry, ModuleRunner, ScanModule};
use crate::utils::target_parser::TargetParser;
use crate::ScanError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// What to scan and with which modules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRequest {
    /// Addresses, hostnames, dashed ranges or CIDR blocks
    pub targets: Vec<String>,
    pub modules: Vec<ScanModule>,
    pub credentials: Vec<Credential>,
    /// Overrides the configured TCP port list
    pub ports: Option<Vec<u16>>,
    /// Overrides the configured SNMP communities
    pub communities: Option<Vec<String>>,
}

impl ScanRequest {
    pub fn new(targets: Vec<String>, modules: Vec<ScanModule>) -> Self {
        Self {
            targets,
            modules,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Vec<Credential>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn with_communities(mut self, communities: Vec<String>) -> Self {
        self.communities = Some(communities);
        self
    }

    /// Enabled modules in request order, duplicates removed
    fn enabled_modules(&self) -> Vec<ScanModule> {
        let mut modules = Vec::new();
        for module in &self.modules {
            if !modules.contains(module) {
                modules.push(*module);
            }
        }
        modules
    }
}

/// Messages from target workers to the report writer
#[derive(Debug)]
enum ReportEvent {
    Finding {
        target: String,
        module: ScanModule,
        draft: FindingDraft,
    },
    Diagnostic {
        target: String,
        module: Option<ScanModule>,
        message: String,
    },
}

/// Runs scan requests and builds their reports
pub struct ScanEngine {
    config: Arc<EngineConfig>,
    registry: ModuleRegistry,
    scorer: Scorer,
    /// Token for the current or next run, replaced once a run observes it cancelled
    cancel: Mutex<CancellationToken>,
}

impl ScanEngine {
    /// Create a new engine with the built-in module runners
    pub fn new(config: EngineConfig) -> crate::Result<Self> {
        config.validate()?;

        let scorer = if config.lookup.enabled {
            let lookup = NvdLookup::new(&config.lookup)?;
            log::info!("Vulnerability correlation enabled via {}", config.lookup.base_url);
            Scorer::with_lookup(Arc::new(lookup))
        } else {
            Scorer::new()
        };

        Ok(Self {
            registry: ModuleRegistry::with_defaults(&config),
            config: Arc::new(config),
            scorer,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Use a different vulnerability lookup for correlation
    pub fn with_lookup(mut self, lookup: Arc<dyn VulnerabilityLookup>) -> Self {
        self.scorer = Scorer::with_lookup(lookup);
        self
    }

    /// Replace the runner registered for the runner's module
    pub fn with_runner(mut self, runner: Arc<dyn ModuleRunner>) -> Self {
        self.registry.register(runner);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that cancels the current run, or the next one if none is active
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token().cancel();
    }

    /// Give later runs a fresh token once `used` has been cancelled
    fn rearm(&self, used: &CancellationToken) {
        if !used.is_cancelled() {
            return;
        }
        let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
    }

    /// Expand the request's target expressions under the applicable cap
    pub fn resolve_targets(&self, request: &ScanRequest) -> Vec<String> {
        let cap = if request.modules.iter().any(ScanModule::is_credentialed) {
            self.config.credentialed_target_cap
        } else {
            self.config.snmp_target_cap
        };
        TargetParser::new(cap).resolve_all(&request.targets)
    }

    /// Execute a request to completion, cancellation or failure.
    ///
    /// Module failures never abort the run; they become information
    /// findings. Only an empty target set or module list fails it.
    pub async fn run(&self, request: ScanRequest) -> ScanReport {
        let modules = self.enabled_modules(&request);
        let mut report = ScanReport::new(modules.clone());

        let targets = self.resolve_targets(&request);
        report.start(targets.len());

        if modules.is_empty() {
            log::error!("Scan {} has no runnable modules", report.scan_info.id);
            report.fail("No scan modules enabled");
            return report;
        }
        if targets.is_empty() {
            log::error!("Scan {} resolved no targets from {:?}", report.scan_info.id, request.targets);
            report.fail("No targets resolved");
            return report;
        }

        let start_time = Instant::now();
        log::info!(
            "Scan {} started: {} targets, modules {:?}",
            report.scan_info.id,
            targets.len(),
            modules
        );

        let cancel = self.cancellation_token();
        let mut ctx = ModuleContext::new(self.config.clone(), cancel.clone());
        if let Some(ports) = &request.ports {
            ctx.ports = ports.clone();
        }
        if let Some(communities) = &request.communities {
            ctx.communities = communities.clone();
        }
        let ctx = Arc::new(ctx);
        let credentials = Arc::new(request.credentials);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ReportEvent>();

        // Single writer: the only place the report is mutated while targets run
        let collector = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    ReportEvent::Finding { target, module, draft } => {
                        report.push_finding(&target, module, draft);
                    }
                    ReportEvent::Diagnostic { target, module, message } => {
                        report.log(Some(&target), module, message);
                    }
                }
            }
            report
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_targets.max(1)));
        let mut handles = Vec::new();

        for target in targets {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                _ = cancel.cancelled() => break,
            };
            let Ok(permit) = permit else { break };

            let runners: Vec<Arc<dyn ModuleRunner>> =
                modules.iter().filter_map(|module| self.registry.get(*module)).collect();
            let worker = TargetWorker {
                target,
                runners,
                credentials: credentials.clone(),
                ctx: ctx.clone(),
                scorer: self.scorer.clone(),
                events: event_tx.clone(),
            };

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                worker.run().await;
            }));
        }

        drop(event_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Target task failed: {}", e);
            }
        }

        let mut report = match collector.await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Report collector failed: {}", e);
                let mut report = ScanReport::new(modules);
                report.fail(format!("Report collector failed: {}", e));
                return report;
            }
        };

        let status = if cancel.is_cancelled() {
            report.log(None, None, "Scan cancelled");
            self.rearm(&cancel);
            ScanStatus::Cancelled
        } else {
            ScanStatus::Completed
        };
        report.finalize(status);

        log::info!(
            "Scan {} {:?} in {:.2}s with {} findings",
            report.scan_info.id,
            report.status(),
            start_time.elapsed().as_secs_f64(),
            report.summary.total
        );
        report
    }

    fn enabled_modules(&self, request: &ScanRequest) -> Vec<ScanModule> {
        request
            .enabled_modules()
            .into_iter()
            .filter(|module| {
                let known = self.registry.get(*module).is_some();
                if !known {
                    log::warn!("No runner registered for module {}", module);
                }
                known
            })
            .collect()
    }
}

/// Runs every enabled module against one target, in order
struct TargetWorker {
    target: String,
    runners: Vec<Arc<dyn ModuleRunner>>,
    credentials: Arc<Vec<Credential>>,
    ctx: Arc<ModuleContext>,
    scorer: Scorer,
    events: mpsc::UnboundedSender<ReportEvent>,
}

impl TargetWorker {
    async fn run(self) {
        for runner in &self.runners {
            let module = runner.module();
            if self.ctx.cancel.is_cancelled() {
                self.diagnostic(Some(module), "Skipped: scan cancelled");
                break;
            }

            self.diagnostic(Some(module), format!("Running {} module", module));
            let started = Instant::now();
            // In-flight modules finish; cancellation only stops the next one
            let outcome = runner.run(&self.target, &self.credentials, &self.ctx).await;

            let drafts = match outcome {
                Ok(drafts) => {
                    self.diagnostic(
                        Some(module),
                        format!("{} findings in {}ms", drafts.len(), started.elapsed().as_millis()),
                    );
                    drafts
                }
                Err(ScanError::Cancelled) => {
                    self.diagnostic(Some(module), "Cancelled");
                    break;
                }
                Err(e) => {
                    log::warn!("{} module failed on {}: {}", module, self.target, e);
                    self.diagnostic(Some(module), format!("Module error: {}", e));
                    vec![FindingDraft::from_error(module, &e)]
                }
            };

            for mut draft in drafts {
                self.scorer.score(&mut draft).await;
                let event = ReportEvent::Finding {
                    target: self.target.clone(),
                    module,
                    draft,
                };
                if self.events.send(event).is_err() {
                    log::error!("Report writer gone, dropping findings for {}", self.target);
                    return;
                }
            }
        }
    }

    fn diagnostic(&self, module: Option<ScanModule>, message: impl Into<String>) {
        let message = message.into();
        log::debug!("[{}] {}", self.target, message);
        let _ = self.events.send(ReportEvent::Diagnostic {
            target: self.target.clone(),
            module,
            message,
        });
    }
}
