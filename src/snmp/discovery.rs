//! SNMP access discovery and device information gathering

use super::ber::SnmpValue;
use super::client::SnmpClient;
use super::oids;
use crate::config::SnmpConfig;
use crate::error::retry_on_timeout;
use crate::ScanResult;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Community strings shipped as vendor defaults
pub const DEFAULT_COMMUNITIES: [&str; 6] = ["public", "private", "community", "admin", "manager", "snmp"];

/// Defaults that usually grant write access
pub const WRITE_DEFAULT_COMMUNITIES: [&str; 3] = ["private", "admin", "manager"];

/// A working port/community pair for a target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnmpAccess {
    pub port: u16,
    pub community: String,
    pub sys_descr: String,
}

impl SnmpAccess {
    pub fn is_default_community(&self) -> bool {
        DEFAULT_COMMUNITIES.contains(&self.community.as_str())
    }

    pub fn is_write_default(&self) -> bool {
        WRITE_DEFAULT_COMMUNITIES.contains(&self.community.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterfaceInfo {
    pub index: u32,
    pub descr: Option<String>,
    pub if_type: Option<u64>,
    pub speed: Option<u64>,
    pub phys_address: Option<String>,
}

/// Everything the information pass managed to read
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnmpDeviceInfo {
    pub sys_descr: String,
    pub sys_name: Option<String>,
    pub sys_contact: Option<String>,
    pub sys_location: Option<String>,
    pub sys_uptime: Option<String>,
    pub sys_object_id: Option<String>,
    pub if_number: Option<u64>,
    pub interfaces: Vec<InterfaceInfo>,
    pub host_resources: BTreeMap<String, String>,
}

/// Iterates ports and communities to find SNMP access, then reads device info
#[derive(Debug, Clone)]
pub struct SnmpDiscovery {
    client: SnmpClient,
    ports: Vec<u16>,
    communities: Vec<String>,
    retries: usize,
    retry_delay: Duration,
    max_interfaces: u32,
}

impl SnmpDiscovery {
    pub fn new(config: &SnmpConfig) -> Self {
        Self {
            client: SnmpClient::new(Duration::from_millis(config.timeout_ms)),
            ports: config.ports.clone(),
            communities: config.communities.clone(),
            retries: config.retries,
            retry_delay: Duration::from_millis(100),
            max_interfaces: config.max_interfaces,
        }
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_communities(mut self, communities: Vec<String>) -> Self {
        self.communities = communities;
        self
    }

    /// Try each port and community against sysDescr; the first answer wins.
    /// `Ok(None)` means the target did not answer any combination.
    pub async fn find_access(&self, target: &str, cancel: &CancellationToken) -> ScanResult<Option<SnmpAccess>> {
        for &port in &self.ports {
            for community in &self.communities {
                if cancel.is_cancelled() {
                    return Err(crate::ScanError::Cancelled);
                }

                let attempt = retry_on_timeout(self.retries, self.retry_delay, || {
                    self.client.query(target, port, community, &oids::SYS_DESCR)
                })
                .await;

                match attempt {
                    Ok(value) => {
                        log::info!("SNMP access on {}:{} with community '{}'", target, port, community);
                        return Ok(Some(SnmpAccess {
                            port,
                            community: community.clone(),
                            sys_descr: value.as_text(),
                        }));
                    }
                    Err(e) => {
                        log::debug!("SNMP {}:{} community '{}' failed: {}", target, port, community, e);
                    }
                }
            }
        }

        Ok(None)
    }

    /// Best-effort information pass; failed OIDs are skipped
    pub async fn gather(&self, target: &str, access: &SnmpAccess) -> SnmpDeviceInfo {
        let mut info = SnmpDeviceInfo {
            sys_descr: access.sys_descr.clone(),
            ..Default::default()
        };

        info.sys_name = self.get_text(target, access, &oids::SYS_NAME).await;
        info.sys_contact = self.get_text(target, access, &oids::SYS_CONTACT).await;
        info.sys_location = self.get_text(target, access, &oids::SYS_LOCATION).await;
        info.sys_uptime = self.get_text(target, access, &oids::SYS_UPTIME).await;
        info.sys_object_id = self.get_text(target, access, &oids::SYS_OBJECT_ID).await;
        info.if_number = self.get(target, access, &oids::IF_NUMBER).await.and_then(|v| v.as_u64());

        let interface_count = info
            .if_number
            .map(|n| n.min(u64::from(self.max_interfaces)) as u32)
            .unwrap_or(0);
        for index in 1..=interface_count {
            info.interfaces.push(self.gather_interface(target, access, index).await);
        }

        for (name, oid) in oids::HOST_RESOURCES {
            if let Some(value) = self.get_text(target, access, oid).await {
                info.host_resources.insert(name.to_string(), value);
            }
        }

        info
    }

    async fn gather_interface(&self, target: &str, access: &SnmpAccess, index: u32) -> InterfaceInfo {
        InterfaceInfo {
            index,
            descr: self.get_text(target, access, &oids::indexed(&oids::IF_DESCR, index)).await,
            if_type: self
                .get(target, access, &oids::indexed(&oids::IF_TYPE, index))
                .await
                .and_then(|v| v.as_u64()),
            speed: self
                .get(target, access, &oids::indexed(&oids::IF_SPEED, index))
                .await
                .and_then(|v| v.as_u64()),
            phys_address: self
                .get(target, access, &oids::indexed(&oids::IF_PHYS_ADDRESS, index))
                .await
                .and_then(|v| v.as_hex())
                .filter(|mac| !mac.is_empty()),
        }
    }

    /// Find access and gather device info in one step
    pub async fn discover(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> ScanResult<Option<(SnmpAccess, SnmpDeviceInfo)>> {
        match self.find_access(target, cancel).await? {
            Some(access) => {
                let info = self.gather(target, &access).await;
                Ok(Some((access, info)))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, target: &str, access: &SnmpAccess, oid: &[u32]) -> Option<SnmpValue> {
        match self.client.query(target, access.port, &access.community, oid).await {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!("SNMP {} on {} skipped: {}", super::ber::format_oid(oid), target, e);
                None
            }
        }
    }

    async fn get_text(&self, target: &str, access: &SnmpAccess, oid: &[u32]) -> Option<String> {
        self.get(target, access, oid)
            .await
            .map(|v| v.as_text())
            .filter(|s| !s.trim().is_empty())
    }
}
