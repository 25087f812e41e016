//! Utility modules for the engine

pub mod target_parser;

pub use target_parser::{resolve, TargetParser, CREDENTIALED_TARGET_CAP, SNMP_TARGET_CAP};

use std::time::Duration;

/// Logging utilities
pub struct Logger;

impl Logger {
    /// Initialize logger with the given default level; `RUST_LOG` still wins
    pub fn init(level: log::LevelFilter) {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .format_timestamp_secs()
            .init();
    }

    /// Log scan completion
    pub fn log_scan_complete(duration: Duration, targets: usize, findings: usize) {
        log::info!(
            "Scan completed in {:.2}s - {} findings across {} targets",
            duration.as_secs_f64(),
            findings,
            targets
        );
    }
}

/// Parse a port list such as `22,80,8000-8010`; the result is sorted and unique
pub fn parse_ports(spec: &str) -> crate::Result<Vec<u16>> {
    let mut ports = Vec::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start: u16 = start.trim().parse()?;
            let end: u16 = end.trim().parse()?;
            if start == 0 || start > end {
                return Err(crate::ScanError::ConfigError(format!("Invalid port range: {}", part)));
            }
            ports.extend(start..=end);
        } else {
            let port: u16 = part.parse()?;
            if port == 0 {
                return Err(crate::ScanError::ConfigError("Port 0 is not valid".to_string()));
            }
            ports.push(port);
        }
    }

    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports("443, 22,80-82,22").unwrap(), vec![22, 80, 81, 82, 443]);
        assert!(parse_ports("0").is_err());
        assert!(parse_ports("90-80").is_err());
        assert!(parse_ports("http").is_err());
        assert!(parse_ports("").unwrap().is_empty());
    }
}
