//! netaudit - network assessment engine
//!
//! Resolves target ranges, probes TCP services, discovers SNMP devices,
//! runs credentialed SSH, web and database sessions, and aggregates the
//! scored findings into a single [`report::ScanReport`].

pub mod config;
pub mod credentials;
pub mod error;
pub mod intelligence;
pub mod network;
pub mod report;
pub mod scanner;
pub mod snmp;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use credentials::{Credential, CredentialKind};
pub use error::{ScanError, ScanResult};
pub use report::{Finding, FindingDraft, ScanReport, ScanStatus, Severity};
pub use scanner::{ScanEngine, ScanModule, ScanRequest};

pub type Result<T> = std::result::Result<T, ScanError>;
