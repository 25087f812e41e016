//! Static port to service naming

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Label used for ports missing from the table
pub const UNKNOWN_SERVICE: &str = "unknown";

static TCP_SERVICES: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (21, "ftp"),
        (22, "ssh"),
        (23, "telnet"),
        (25, "smtp"),
        (53, "domain"),
        (80, "http"),
        (110, "pop3"),
        (111, "rpcbind"),
        (135, "msrpc"),
        (139, "netbios-ssn"),
        (143, "imap"),
        (389, "ldap"),
        (443, "https"),
        (445, "microsoft-ds"),
        (512, "exec"),
        (513, "login"),
        (514, "shell"),
        (515, "printer"),
        (631, "ipp"),
        (636, "ldaps"),
        (993, "imaps"),
        (995, "pop3s"),
        (1433, "mssql"),
        (1521, "oracle"),
        (2049, "nfs"),
        (3306, "mysql"),
        (3389, "rdp"),
        (5432, "postgresql"),
        (5900, "vnc"),
        (5984, "couchdb"),
        (6379, "redis"),
        (8080, "http-proxy"),
        (8443, "https-alt"),
        (9100, "jetdirect"),
        (27017, "mongodb"),
    ])
});

/// Common service ports mapping
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceDatabase;

impl ServiceDatabase {
    pub fn new() -> Self {
        Self
    }

    /// Service name for a TCP port, if the table knows it
    pub fn get_tcp_service(&self, port: u16) -> Option<&'static str> {
        TCP_SERVICES.get(&port).copied()
    }

    /// Service name for a TCP port, falling back to a generic label
    pub fn service_name(&self, port: u16) -> &'static str {
        self.get_tcp_service(port).unwrap_or(UNKNOWN_SERVICE)
    }

    /// Ports probed when a request does not list any
    pub fn default_tcp_ports() -> Vec<u16> {
        vec![
            21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 389, 443, 445, 512, 513, 514, 631,
            993, 995, 1433, 1521, 2049, 3306, 3389, 5432, 5900, 6379, 8080, 8443, 9100, 27017,
        ]
    }
}
