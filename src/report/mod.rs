//! Findings and the aggregated scan report

use crate::scanner::modules::ScanModule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Severity level for findings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational finding, no security impact
    #[default]
    Info,
    Low,
    Medium,
    High,
    /// Critical severity, immediate action required
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// All severities, most severe first
    pub fn all() -> [Severity; 5] {
        [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Info,
        ]
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a finding is an observation or a weakness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingType {
    Information,
    Vulnerability,
}

/// A finding as produced by a module, before the report numbers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingDraft {
    pub finding_type: FindingType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub cve: Option<String>,
    pub cvss_score: Option<f64>,
    pub solution: String,
    pub details: Map<String, Value>,
}

impl FindingDraft {
    pub fn new(
        finding_type: FindingType,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            finding_type,
            severity,
            title: title.into(),
            description: description.into(),
            cve: None,
            cvss_score: None,
            solution: String::new(),
            details: Map::new(),
        }
    }

    /// Informational observation, severity `info`
    pub fn information(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(FindingType::Information, Severity::Info, title, description)
    }

    pub fn vulnerability(
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(FindingType::Vulnerability, severity, title, description)
    }

    /// Information finding carrying the text of a recoverable failure
    pub fn from_error(module: ScanModule, error: &crate::ScanError) -> Self {
        Self::information(
            format!("{} Module Error", module.display_name()),
            format!("The {} module did not complete: {}", module, error),
        )
        .with_detail("error", error.to_string())
        .with_detail("error_kind", error.kind())
    }

    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = solution.into();
        self
    }

    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.cve = Some(cve.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.cvss_score = Some(score);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn is_vulnerability(&self) -> bool {
        self.finding_type == FindingType::Vulnerability
    }
}

/// A numbered, immutable finding inside a report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Sequence number, unique within one run, starting at 1
    pub id: u64,
    pub target: String,
    pub module: ScanModule,
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub cve: Option<String>,
    pub cvss_score: f64,
    pub solution: String,
    pub details: Map<String, Value>,
    pub discovered_at: DateTime<Utc>,
}

impl Finding {
    pub fn is_vulnerability(&self) -> bool {
        self.finding_type == FindingType::Vulnerability
    }
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanInfo {
    pub id: Uuid,
    pub status: ScanStatus,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub modules: Vec<ScanModule>,
    pub target_count: usize,
    pub error: Option<String>,
}

/// Finding counts per severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub total: usize,
}

impl SeveritySummary {
    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
        self.total += 1;
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

/// One line of the per-target / per-module diagnostic log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub timestamp: DateTime<Utc>,
    pub target: Option<String>,
    pub module: Option<ScanModule>,
    pub message: String,
}

/// Aggregated result of one scan run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scan_info: ScanInfo,
    pub summary: SeveritySummary,
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<DiagnosticEntry>,
}

impl ScanReport {
    /// New report in the `Queued` state
    pub fn new(modules: Vec<ScanModule>) -> Self {
        Self {
            scan_info: ScanInfo {
                id: Uuid::new_v4(),
                status: ScanStatus::Queued,
                start: None,
                end: None,
                modules,
                target_count: 0,
                error: None,
            },
            summary: SeveritySummary::default(),
            findings: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.scan_info.status
    }

    /// Move to `Running` and stamp the start time
    pub fn start(&mut self, target_count: usize) {
        if self.scan_info.status == ScanStatus::Queued {
            self.scan_info.status = ScanStatus::Running;
            self.scan_info.start = Some(Utc::now());
            self.scan_info.target_count = target_count;
        }
    }

    /// Append a finding, assigning the next sequence number.
    /// Findings arriving after finalization are dropped.
    pub fn push_finding(&mut self, target: &str, module: ScanModule, draft: FindingDraft) -> Option<&Finding> {
        if self.scan_info.status.is_terminal() {
            log::warn!("Dropping finding '{}' for finalized report", draft.title);
            return None;
        }

        let finding = Finding {
            id: self.findings.len() as u64 + 1,
            target: target.to_string(),
            module,
            finding_type: draft.finding_type,
            severity: draft.severity,
            title: draft.title,
            description: draft.description,
            cve: draft.cve,
            cvss_score: draft.cvss_score.unwrap_or(0.0),
            solution: draft.solution,
            details: draft.details,
            discovered_at: Utc::now(),
        };

        self.summary.record(finding.severity);
        self.findings.push(finding);
        self.findings.last()
    }

    pub fn log(&mut self, target: Option<&str>, module: Option<ScanModule>, message: impl Into<String>) {
        self.diagnostics.push(DiagnosticEntry {
            timestamp: Utc::now(),
            target: target.map(str::to_string),
            module,
            message: message.into(),
        });
    }

    /// Set a terminal status and the end timestamp. Later calls are ignored.
    pub fn finalize(&mut self, status: ScanStatus) {
        if self.scan_info.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.scan_info.status = status;
        self.scan_info.end = Some(Utc::now());
    }

    /// Mark the run failed for a reason outside any single target
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.log(None, None, reason.clone());
        self.scan_info.error = Some(reason);
        self.finalize(ScanStatus::Failed);
    }

    pub fn findings_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.target == target)
    }
}
