//! Device classification from banner and sysDescr text

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Broad device category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Router,
    Switch,
    Printer,
    Ups,
    Firewall,
    WirelessAccessPoint,
    Camera,
    Server,
    NetworkDevice,
}

impl DeviceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCategory::Router => "router",
            DeviceCategory::Switch => "switch",
            DeviceCategory::Printer => "printer",
            DeviceCategory::Ups => "ups",
            DeviceCategory::Firewall => "firewall",
            DeviceCategory::WirelessAccessPoint => "wireless access point",
            DeviceCategory::Camera => "camera",
            DeviceCategory::Server => "server",
            DeviceCategory::NetworkDevice => "network device",
        }
    }
}

impl std::fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered keyword rules; the first category with a matching keyword wins
const CATEGORY_RULES: [(DeviceCategory, &[&str]); 8] = [
    (DeviceCategory::Router, &["router", "ios", "routeros", "edgeos"]),
    (DeviceCategory::Switch, &["switch", "catalyst", "procurve"]),
    (DeviceCategory::Printer, &["printer", "laserjet", "officejet", "jetdirect"]),
    (DeviceCategory::Ups, &["ups", "apc", "powerware"]),
    (DeviceCategory::Firewall, &["firewall", "fortigate", "pfsense", "asa"]),
    (
        DeviceCategory::WirelessAccessPoint,
        &["wireless", "access point", "aironet", "unifi"],
    ),
    (DeviceCategory::Camera, &["camera", "ipcam", "hikvision"]),
    (DeviceCategory::Server, &["linux", "windows", "server", "unix"]),
];

static MANUFACTURER_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)cisco", "Cisco Systems"),
        (r"(?i)\bhp\b|hewlett", "HP"),
        (r"(?i)juniper|junos", "Juniper Networks"),
        (r"(?i)mikrotik|routeros", "MikroTik"),
        (r"(?i)ubiquiti|unifi|edgeos", "Ubiquiti"),
        (r"(?i)fortinet|fortigate", "Fortinet"),
        (r"(?i)\bapc\b|american power conversion", "APC"),
        (r"(?i)\bdell\b", "Dell"),
        (r"(?i)netgear", "Netgear"),
        (r"(?i)aruba", "Aruba Networks"),
        (r"(?i)hikvision", "Hikvision"),
        (r"(?i)microsoft|windows", "Microsoft"),
        (r"(?i)linux", "Linux"),
    ]
    .into_iter()
    .filter_map(|(pattern, name)| Regex::new(pattern).ok().map(|re| (re, name)))
    .collect()
});

static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)version\s+(\d+(?:\.\d+)+[\w.()\-]*)",
        r"(?i)\bv(\d+(?:\.\d+)+)",
        r"(\d+\.\d+(?:\.\d+)*)",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

pub const UNKNOWN_MANUFACTURER: &str = "Unknown";

/// Classification derived from one description string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub category: DeviceCategory,
    pub manufacturer: String,
    pub version: Option<String>,
}

impl DeviceProfile {
    pub fn from_description(description: &str) -> Self {
        Self {
            category: classify_device(description),
            manufacturer: extract_manufacturer(description).to_string(),
            version: extract_version(description),
        }
    }
}

pub fn classify_device(description: &str) -> DeviceCategory {
    let lowered = description.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(DeviceCategory::NetworkDevice)
}

pub fn extract_manufacturer(description: &str) -> &'static str {
    MANUFACTURER_RULES
        .iter()
        .find(|(re, _)| re.is_match(description))
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_MANUFACTURER)
}

pub fn extract_version(description: &str) -> Option<String> {
    VERSION_PATTERNS.iter().find_map(|re| {
        re.captures(description)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches(',').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cisco_router() {
        let profile = DeviceProfile::from_description("Cisco IOS Router");
        assert_eq!(profile.category, DeviceCategory::Router);
        assert_eq!(profile.manufacturer, "Cisco Systems");
    }

    #[test]
    fn test_hp_printer() {
        let profile = DeviceProfile::from_description("HP LaserJet 4250");
        assert_eq!(profile.category, DeviceCategory::Printer);
        assert_eq!(profile.manufacturer, "HP");
    }

    #[test]
    fn test_rule_order_matters() {
        // "ios" precedes the switch keywords
        assert_eq!(classify_device("Cisco IOS Catalyst 2960 Switch"), DeviceCategory::Router);
        assert_eq!(classify_device("ProCurve J9280A"), DeviceCategory::Switch);
        assert_eq!(classify_device("Smart-UPS 1500"), DeviceCategory::Ups);
        assert_eq!(classify_device("Linux nas 5.10.0"), DeviceCategory::Server);
        assert_eq!(classify_device("Embedded SNMP agent"), DeviceCategory::NetworkDevice);
    }

    #[test]
    fn test_version_patterns() {
        assert_eq!(
            extract_version("Cisco IOS Software, Version 15.2(4)M7, RELEASE SOFTWARE").as_deref(),
            Some("15.2(4)M7")
        );
        assert_eq!(extract_version("RouterOS v6.48.6").as_deref(), Some("6.48.6"));
        assert_eq!(extract_version("Linux host 5.15.0-91-generic").as_deref(), Some("5.15.0"));
        assert_eq!(extract_version("no numbers here"), None);
    }

    #[test]
    fn test_unknown_manufacturer() {
        assert_eq!(extract_manufacturer("Generic embedded agent"), UNKNOWN_MANUFACTURER);
    }
}
