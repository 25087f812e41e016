//! Target range expansion
//!
//! Turns operator supplied range expressions into a bounded, ordered list of
//! concrete targets:
//! - CIDR notation (`10.0.0.0/24`), expanded only for prefixes of 24 or longer
//! - Dash ranges on the last octet (`10.0.0.10-20`)
//! - Bare IP addresses or hostnames, passed through unchanged
//!
//! Parsing never fails. Malformed input yields an empty or single-element list.

use ipnetwork::Ipv4Network;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Cap applied when credentialed modules are part of the run
pub const CREDENTIALED_TARGET_CAP: usize = 100;

/// Cap applied to SNMP / discovery style runs
pub const SNMP_TARGET_CAP: usize = 254;

/// Smallest CIDR prefix that is expanded
pub const MIN_EXPANDED_PREFIX: u8 = 24;

/// Shape of the expression a target list came from
#[derive(Debug, Clone, PartialEq)]
pub enum TargetType {
    Cidr,
    DashRange,
    Single,
    Empty,
}

/// A parsed range expression with its expanded targets
#[derive(Debug, Clone)]
pub struct ParsedTarget {
    pub original: String,
    pub target_type: TargetType,
    pub targets: Vec<String>,
}

/// Target parser with a hard output cap
#[derive(Debug, Clone)]
pub struct TargetParser {
    max_targets: usize,
}

impl Default for TargetParser {
    fn default() -> Self {
        Self {
            max_targets: CREDENTIALED_TARGET_CAP,
        }
    }
}

impl TargetParser {
    /// Create a parser truncating every expansion to `max_targets`
    pub fn new(max_targets: usize) -> Self {
        Self { max_targets }
    }

    /// Parser using the SNMP discovery cap
    pub fn for_snmp() -> Self {
        Self::new(SNMP_TARGET_CAP)
    }

    pub fn max_targets(&self) -> usize {
        self.max_targets
    }

    /// Parse a single range expression
    pub fn parse_target(&self, expression: &str) -> ParsedTarget {
        let expression = expression.trim();

        let (target_type, mut targets) = if expression.is_empty() {
            (TargetType::Empty, Vec::new())
        } else if expression.contains('/') {
            (TargetType::Cidr, self.expand_cidr(expression))
        } else if let Some(range) = Self::expand_dash_range(expression) {
            (TargetType::DashRange, range)
        } else {
            (TargetType::Single, vec![expression.to_string()])
        };

        targets.truncate(self.max_targets);

        ParsedTarget {
            original: expression.to_string(),
            target_type,
            targets,
        }
    }

    /// Expand one expression into concrete targets
    pub fn resolve(&self, expression: &str) -> Vec<String> {
        self.parse_target(expression).targets
    }

    /// Expand several expressions (each may itself be comma separated),
    /// de-duplicate while keeping first-seen order, then apply the cap.
    pub fn resolve_all<S: AsRef<str>>(&self, expressions: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for expression in expressions.iter().flat_map(|e| e.as_ref().split(',')) {
            for target in self.resolve(expression) {
                if targets.len() >= self.max_targets {
                    return targets;
                }
                if seen.insert(target.clone()) {
                    targets.push(target);
                }
            }
        }

        targets
    }

    /// Expand IPv4 CIDR notation; prefixes shorter than /24 expand to nothing
    fn expand_cidr(&self, expression: &str) -> Vec<String> {
        let network = match Ipv4Network::from_str(expression) {
            Ok(network) => network,
            Err(e) => {
                log::debug!("Ignoring malformed CIDR {}: {}", expression, e);
                return Vec::new();
            }
        };

        let prefix = network.prefix();
        if prefix < MIN_EXPANDED_PREFIX {
            log::warn!(
                "CIDR {} is wider than /{}; not expanded",
                expression,
                MIN_EXPANDED_PREFIX
            );
            return Vec::new();
        }

        let host_bits = 32 - u32::from(prefix);
        let usable = (1u32 << host_bits).saturating_sub(2).min(254);
        let base = u32::from(network.network());

        (1..=usable)
            .map(|offset| Ipv4Addr::from(base + offset).to_string())
            .collect()
    }

    /// Expand `a.b.c.start-end`; anything else is not a dash range
    fn expand_dash_range(expression: &str) -> Option<Vec<String>> {
        let (prefix, range) = expression.rsplit_once('.')?;
        let (start, end) = range.split_once('-')?;

        let octets: Vec<u8> = prefix
            .split('.')
            .map(|o| o.parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        if octets.len() != 3 {
            return None;
        }

        let start: u8 = start.trim().parse().ok()?;
        let end: u8 = end.trim().parse().ok()?;

        Some(
            (start..=end)
                .map(|last| Ipv4Addr::new(octets[0], octets[1], octets[2], last).to_string())
                .collect(),
        )
    }
}

/// Expand an expression with an explicit cap
pub fn resolve(expression: &str, cap: usize) -> Vec<String> {
    TargetParser::new(cap).resolve(expression)
}
