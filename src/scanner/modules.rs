//! Scan modules and the runners that execute them against one target

use crate::config::EngineConfig;
use crate::credentials::{
    database::DatabaseDriver, not_authenticated_finding, run_session, ssh::SshDriver, web::WebDriver, Credential,
    SessionDriver,
};
use crate::intelligence::classifier::DeviceProfile;
use crate::report::{FindingDraft, Severity};
use crate::scanner::port_prober::{port_findings, PortProber};
use crate::snmp::discovery::{SnmpAccess, SnmpDeviceInfo, SnmpDiscovery};
use crate::{ScanError, ScanResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// The closed set of scan modules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanModule {
    Network,
    Snmp,
    Web,
    Ssh,
    Database,
}

impl ScanModule {
    pub fn all() -> [ScanModule; 5] {
        [
            ScanModule::Network,
            ScanModule::Snmp,
            ScanModule::Web,
            ScanModule::Ssh,
            ScanModule::Database,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanModule::Network => "network",
            ScanModule::Snmp => "snmp",
            ScanModule::Web => "web",
            ScanModule::Ssh => "ssh",
            ScanModule::Database => "database",
        }
    }

    /// Name used in finding titles
    pub fn display_name(&self) -> &'static str {
        match self {
            ScanModule::Network => "Network",
            ScanModule::Snmp => "SNMP",
            ScanModule::Web => "Web",
            ScanModule::Ssh => "SSH",
            ScanModule::Database => "Database",
        }
    }

    /// Modules that need credentials and therefore the tighter target cap
    pub fn is_credentialed(&self) -> bool {
        matches!(self, ScanModule::Web | ScanModule::Ssh | ScanModule::Database)
    }
}

impl fmt::Display for ScanModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanModule {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "network" | "ports" => Ok(ScanModule::Network),
            "snmp" => Ok(ScanModule::Snmp),
            "web" | "http" => Ok(ScanModule::Web),
            "ssh" => Ok(ScanModule::Ssh),
            "database" | "db" => Ok(ScanModule::Database),
            other => Err(ScanError::ConfigError(format!("Unknown scan module '{}'", other))),
        }
    }
}

/// Per-run settings shared by every module invocation
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub config: Arc<EngineConfig>,
    /// TCP ports for the network module
    pub ports: Vec<u16>,
    /// Community strings for the SNMP module
    pub communities: Vec<String>,
    /// TCP connect permits shared by every target of the run
    pub connect_limiter: Arc<Semaphore>,
    pub cancel: CancellationToken,
}

impl ModuleContext {
    pub fn new(config: Arc<EngineConfig>, cancel: CancellationToken) -> Self {
        Self {
            ports: config.ports.ports.clone(),
            communities: config.snmp.communities.clone(),
            connect_limiter: Arc::new(Semaphore::new(config.ports.concurrency.max(1))),
            config,
            cancel,
        }
    }
}

/// Executes one module against one target
#[async_trait]
pub trait ModuleRunner: Send + Sync {
    fn module(&self) -> ScanModule;

    async fn run(
        &self,
        target: &str,
        credentials: &[Credential],
        ctx: &ModuleContext,
    ) -> ScanResult<Vec<FindingDraft>>;
}

/// TCP port probing
pub struct NetworkRunner;

#[async_trait]
impl ModuleRunner for NetworkRunner {
    fn module(&self) -> ScanModule {
        ScanModule::Network
    }

    async fn run(&self, target: &str, _credentials: &[Credential], ctx: &ModuleContext) -> ScanResult<Vec<FindingDraft>> {
        let prober = PortProber::from_config(&ctx.config.ports).with_limiter(ctx.connect_limiter.clone());
        let open = prober.scan(target, &ctx.ports).await;
        Ok(port_findings(target, &open))
    }
}

/// SNMP community discovery and device information
pub struct SnmpRunner;

#[async_trait]
impl ModuleRunner for SnmpRunner {
    fn module(&self) -> ScanModule {
        ScanModule::Snmp
    }

    async fn run(&self, target: &str, _credentials: &[Credential], ctx: &ModuleContext) -> ScanResult<Vec<FindingDraft>> {
        let discovery = SnmpDiscovery::new(&ctx.config.snmp).with_communities(ctx.communities.clone());
        match discovery.discover(target, &ctx.cancel).await? {
            Some((access, info)) => Ok(snmp_findings(target, &access, &info)),
            None => {
                log::debug!("{}: no SNMP response on ports {:?}", target, ctx.config.snmp.ports);
                Ok(Vec::new())
            }
        }
    }
}

pub fn snmp_findings(target: &str, access: &SnmpAccess, info: &SnmpDeviceInfo) -> Vec<FindingDraft> {
    let profile = DeviceProfile::from_description(&info.sys_descr);

    let mut discovered = FindingDraft::information(
        "SNMP Device Discovered",
        format!(
            "{} answers SNMP on UDP {}: {}",
            target, access.port, info.sys_descr
        ),
    )
    .with_detail("port", access.port)
    .with_detail("category", profile.category.as_str())
    .with_detail("manufacturer", profile.manufacturer.clone())
    .with_detail("interfaces", info.interfaces.len());
    if let Some(version) = &profile.version {
        discovered = discovered.with_detail("version", version.clone());
    }
    if let Ok(device) = serde_json::to_value(info) {
        discovered = discovered.with_detail("device", device);
    }

    let mut findings = vec![discovered];

    if access.is_default_community() {
        let (severity, access_kind) = if access.is_write_default() {
            (Severity::High, "read-write")
        } else {
            (Severity::Medium, "read-only")
        };
        findings.push(
            FindingDraft::vulnerability(
                severity,
                "Default SNMP Community String",
                format!(
                    "{} accepts the default community '{}', commonly granted {} access",
                    target, access.community, access_kind
                ),
            )
            .with_solution("Change the community string or move to SNMPv3 with authentication")
            .with_detail("community", access.community.clone())
            .with_detail("port", access.port),
        );
    }

    findings
}

/// Credentialed module backed by a session driver
pub struct SessionRunner<D> {
    module: ScanModule,
    driver: D,
}

impl<D: SessionDriver> SessionRunner<D> {
    pub fn new(module: ScanModule, driver: D) -> Self {
        Self { module, driver }
    }
}

#[async_trait]
impl<D: SessionDriver> ModuleRunner for SessionRunner<D> {
    fn module(&self) -> ScanModule {
        self.module
    }

    async fn run(&self, target: &str, credentials: &[Credential], ctx: &ModuleContext) -> ScanResult<Vec<FindingDraft>> {
        let report = run_session(&self.driver, target, credentials, &ctx.cancel).await?;
        if report.is_authenticated() {
            Ok(report.findings)
        } else {
            Ok(vec![not_authenticated_finding(&report)])
        }
    }
}

/// Dispatch table from module to runner
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    runners: HashMap<ScanModule, Arc<dyn ModuleRunner>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in runner for every module
    pub fn with_defaults(config: &EngineConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NetworkRunner));
        registry.register(Arc::new(SnmpRunner));
        registry.register(Arc::new(SessionRunner::new(
            ScanModule::Web,
            WebDriver::new(config.web.clone()),
        )));
        registry.register(Arc::new(SessionRunner::new(
            ScanModule::Ssh,
            SshDriver::new(config.ssh.clone()),
        )));
        registry.register(Arc::new(SessionRunner::new(
            ScanModule::Database,
            DatabaseDriver::new(config.database.clone()),
        )));
        registry
    }

    /// Add or replace the runner for its module
    pub fn register(&mut self, runner: Arc<dyn ModuleRunner>) {
        self.runners.insert(runner.module(), runner);
    }

    pub fn get(&self, module: ScanModule) -> Option<Arc<dyn ModuleRunner>> {
        self.runners.get(&module).cloned()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut modules: Vec<_> = self.runners.keys().collect();
        modules.sort();
        f.debug_struct("ModuleRegistry").field("modules", &modules).finish()
    }
}
