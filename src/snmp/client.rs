//! Single-shot SNMP GET over UDP

use super::ber::{self, SnmpValue};
use crate::{ScanError, ScanResult};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Largest datagram accepted from an agent
const MAX_DATAGRAM: usize = 65_507;

/// SNMP v2c client. Each query sends exactly one datagram and never retries.
#[derive(Debug, Clone)]
pub struct SnmpClient {
    timeout: Duration,
}

impl Default for SnmpClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl SnmpClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET one OID from `target:port` with the given community.
    ///
    /// No reply within the timeout yields `TimeoutError`; socket failures
    /// surface immediately as `NetworkError`.
    pub async fn query(&self, target: &str, port: u16, community: &str, oid: &[u32]) -> ScanResult<SnmpValue> {
        let remote = resolve(target, port).await?;
        let local: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse()?
        } else {
            "0.0.0.0:0".parse()?
        };

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ScanError::NetworkError(e.to_string()))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| ScanError::NetworkError(e.to_string()))?;

        let request_id = rand::thread_rng().gen_range(1..i32::MAX);
        let request = ber::build_get_request(community, oid, request_id)?;

        socket
            .send(&request)
            .await
            .map_err(|e| ScanError::NetworkError(e.to_string()))?;
        log::trace!(
            "SNMP GET {} -> {} (community '{}', request-id {})",
            ber::format_oid(oid),
            remote,
            community,
            request_id
        );

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let received = match timeout(self.timeout, socket.recv(&mut buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ScanError::NetworkError(e.to_string())),
            Err(_) => return Err(ScanError::TimeoutError),
        };

        ber::decode_response(&buffer[..received], request_id)
    }

    /// GET by dotted OID text
    pub async fn query_text(&self, target: &str, port: u16, community: &str, oid: &str) -> ScanResult<SnmpValue> {
        let arcs = ber::parse_oid(oid)?;
        self.query(target, port, community, &arcs).await
    }
}

async fn resolve(target: &str, port: u16) -> ScanResult<SocketAddr> {
    tokio::net::lookup_host((target, port))
        .await
        .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", target, e)))?
        .next()
        .ok_or_else(|| ScanError::InvalidTarget(format!("{} did not resolve", target)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_against_local_agent() {
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = agent.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            let (n, peer) = agent.recv_from(&mut buf).await.unwrap();
            let request = ber::decode_message(&buf[..n]).unwrap();
            let response = ber::build_get_response(
                &request.community,
                request.request_id,
                &request.varbinds[0].0,
                &SnmpValue::OctetString(b"Linux edge-01 5.15.0".to_vec()),
            )
            .unwrap();
            agent.send_to(&response, peer).await.unwrap();
        });

        let client = SnmpClient::new(Duration::from_secs(1));
        let value = client
            .query_text("127.0.0.1", port, "public", "1.3.6.1.2.1.1.1.0")
            .await
            .unwrap();
        assert_eq!(value.to_string(), "Linux edge-01 5.15.0");
    }
}
