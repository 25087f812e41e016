//! TCP probing and service naming

pub mod protocol;
pub mod socket;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Port state as seen by a connect probe: refused is closed, no answer is filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
        }
    }
}

/// Probe result for a single port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
    #[serde(rename = "status")]
    pub state: PortState,
    pub service: String,
    pub banner: Option<String>,
    pub response_time: Duration,
}

impl PortResult {
    pub fn new(port: u16, state: PortState, service: impl Into<String>) -> Self {
        Self {
            port,
            state,
            service: service.into(),
            banner: None,
            response_time: Duration::from_millis(0),
        }
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }

    pub fn with_banner(mut self, banner: String) -> Self {
        self.banner = Some(banner);
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}
