//! Finding intelligence: device classification, scoring and CVE correlation

pub mod classifier;
pub mod correlation;
pub mod scoring;

pub use classifier::{classify_device, extract_manufacturer, extract_version, DeviceCategory, DeviceProfile};
pub use correlation::{search_terms, NvdLookup, VulnerabilityLookup, VulnerabilityMatch};
pub use scoring::{heuristic_cvss, Scorer};
