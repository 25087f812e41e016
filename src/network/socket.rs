//! TCP connect probing

use crate::{ScanError, ScanResult};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Upper bound on bytes kept from a service banner
const MAX_BANNER_BYTES: usize = 512;

/// TCP connect scanner for non-raw socket scanning
#[derive(Debug, Clone)]
pub struct TcpConnectScanner {
    timeout: Duration,
}

impl TcpConnectScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open a TCP connection to `host:port` within the connect timeout.
    /// Hostnames are resolved as part of the attempt.
    pub async fn connect(&self, host: &str, port: u16) -> ScanResult<TcpStream> {
        match timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ScanError::NetworkError(format!("{}:{}: {}", host, port, e))),
            Err(_) => Err(ScanError::TimeoutError),
        }
    }

    /// Perform a TCP connect probe on a single port
    pub async fn scan_port(&self, host: &str, port: u16) -> bool {
        self.connect(host, port).await.is_ok()
    }

    /// Read whatever the service volunteers right after connecting.
    /// Services that wait for the client to speak first yield `None`.
    pub async fn grab_banner(stream: &mut TcpStream, wait: Duration) -> Option<String> {
        let mut buffer = vec![0u8; MAX_BANNER_BYTES];
        match timeout(wait, stream.read(&mut buffer)).await {
            Ok(Ok(read)) if read > 0 => {
                let banner = String::from_utf8_lossy(&buffer[..read])
                    .chars()
                    .filter(|c| !c.is_control() || *c == ' ')
                    .collect::<String>()
                    .trim()
                    .to_string();
                (!banner.is_empty()).then_some(banner)
            }
            _ => None,
        }
    }
}
