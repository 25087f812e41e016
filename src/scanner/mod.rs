//! Scan orchestration: module runners, the TCP port prober and the engine

pub mod engine;
pub mod modules;
pub mod port_prober;

pub use engine::{ScanEngine, ScanRequest};
pub use modules::{ModuleContext, ModuleRegistry, ModuleRunner, ScanModule};
pub use port_prober::PortProber;
