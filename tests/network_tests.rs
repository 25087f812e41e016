//! Transport level tests: SNMP over UDP and TCP connect probing

use netaudit::{
    network::socket::TcpConnectScanner,
    scanner::{port_prober::port_findings, PortProber},
    snmp::{ber, oids, SnmpClient, SnmpValue},
    ScanError,
};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};

#[tokio::test]
async fn test_snmp_timeout_sends_exactly_one_datagram() {
    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = sink.local_addr().unwrap().port();

    let client = SnmpClient::new(Duration::from_millis(200));
    let started = Instant::now();
    let result = client.query("127.0.0.1", port, "public", &oids::SYS_DESCR).await;

    assert!(matches!(result, Err(ScanError::TimeoutError)));
    assert!(started.elapsed() >= Duration::from_millis(200));

    let mut buf = [0u8; 1024];
    let (n, _) = sink.recv_from(&mut buf).await.unwrap();
    let request = ber::decode_message(&buf[..n]).unwrap();
    assert_eq!(request.community, "public");
    assert_eq!(request.pdu_type, ber::PDU_GET_REQUEST);
    assert_eq!(request.varbinds[0].0, oids::SYS_DESCR.to_vec());

    let mut extra = [0u8; 1024];
    assert!(sink.try_recv_from(&mut extra).is_err());
}

#[tokio::test]
async fn test_snmp_mismatched_request_id_is_protocol_error() {
    let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = agent.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        if let Ok((n, peer)) = agent.recv_from(&mut buf).await {
            let request = ber::decode_message(&buf[..n]).unwrap();
            let wrong_id = request.request_id.wrapping_add(1);
            let response = ber::build_get_response(
                "public",
                wrong_id,
                &oids::SYS_DESCR,
                &SnmpValue::OctetString(b"stale".to_vec()),
            )
            .unwrap();
            let _ = agent.send_to(&response, peer).await;
        }
    });

    let client = SnmpClient::new(Duration::from_secs(2));
    let result = client.query("127.0.0.1", port, "public", &oids::SYS_DESCR).await;
    assert!(matches!(result, Err(ScanError::ProtocolError(_))));
}

#[tokio::test]
async fn test_snmp_numeric_value_roundtrip_over_udp() {
    let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = agent.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        if let Ok((n, peer)) = agent.recv_from(&mut buf).await {
            let request = ber::decode_message(&buf[..n]).unwrap();
            let response = ber::build_get_response(
                &request.community,
                request.request_id,
                &oids::SYS_UPTIME,
                &SnmpValue::TimeTicks(123_456),
            )
            .unwrap();
            let _ = agent.send_to(&response, peer).await;
        }
    });

    let client = SnmpClient::new(Duration::from_secs(2));
    let value = client
        .query_text("127.0.0.1", port, "public", "1.3.6.1.2.1.1.3.0")
        .await
        .unwrap();
    assert_eq!(value, SnmpValue::TimeTicks(123_456));
    assert_eq!(value.as_u64(), Some(123_456));
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let scanner = TcpConnectScanner::new(Duration::from_millis(500));
    assert!(!scanner.scan_port("127.0.0.1", port).await);
}

#[tokio::test]
async fn test_banner_feeds_fingerprint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(b"220 MikroTik FTP server (MikroTik 6.49.7) ready\r\n").await;
        }
    });

    let prober = PortProber::new(Duration::from_millis(500), 4).with_banners(Duration::from_millis(500));
    let results = prober.scan("127.0.0.1", &[port]).await;
    assert_eq!(results.len(), 1);
    let banner = results[0].banner.as_deref().unwrap();
    assert!(banner.contains("MikroTik"));

    let findings = port_findings("127.0.0.1", &results);
    let fingerprint = findings
        .iter()
        .find(|f| f.title == "Service Banner Fingerprint")
        .unwrap();
    assert_eq!(fingerprint.details["manufacturer"], "MikroTik");
    assert_eq!(fingerprint.details["version"], "6.49.7");
}

#[tokio::test]
async fn test_unresolvable_host_is_invalid_target() {
    let client = SnmpClient::new(Duration::from_millis(200));
    let result = client
        .query("host.that.does.not.exist.invalid", 161, "public", &oids::SYS_DESCR)
        .await;
    assert!(matches!(result, Err(ScanError::InvalidTarget(_))));
}
