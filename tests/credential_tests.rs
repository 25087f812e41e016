//! Credentialed session tests against a small local HTTP application

use netaudit::{
    config::{EngineConfig, WebConfig},
    credentials::{run_session, web::WebDriver, Credential, CredentialKind, SessionOutcome, SessionState},
    report::{ScanStatus, Severity},
    scanner::{ScanEngine, ScanModule, ScanRequest},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const LOGIN_PAGE: &str = r#"<html><head><title>Sign in</title></head><body>
<form method="post" action="/session">
  <input type="hidden" name="authenticity_token" value="tok123">
  <input type="text" name="username">
  <input type="password" name="password">
</form>
<p>Please login with your password</p>
</body></html>"#;

const HOME_PAGE: &str = r#"<html><head><title>Home</title></head><body>
<a href="/logout">Sign out</a>
<a href="/dashboard">Dashboard</a>
<a href="/profile">Profile</a>
<a href="https://example.com/elsewhere">External</a>
<a href="mailto:ops@example.com">Mail</a>
</body></html>"#;

const DASHBOARD_PAGE: &str = r#"<html><head><title>Dashboard</title></head><body>
<script>var config = { api_key = "ABCDEF0123456789abcd" };</script>
<a href="/">Home</a>
</body></html>"#;

const PROFILE_PAGE: &str = r#"<html><head><title>Profile</title></head><body>
<form method="post" action="/update"><input name="email"></form>
</body></html>"#;

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

async fn handle(mut stream: TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
        if let Some(end) = find_header_end(&data) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while data.len() < header_end + content_length {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
    let body = String::from_utf8_lossy(&data[header_end..]).to_string();

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let logged_in = head.lines().any(|line| line.starts_with("cookie:") && line.contains("sid=abc"));

    let (status, extra, page) = match (method.as_str(), path.as_str()) {
        ("get", "/login") => ("200 OK", String::new(), LOGIN_PAGE),
        ("post", "/session") => {
            let accepted = body.contains("username=admin")
                && body.contains("password=s3cret")
                && body.contains("authenticity_token=tok123");
            if accepted {
                ("302 Found", "Location: /\r\nSet-Cookie: sid=abc; Path=/\r\n".to_string(), "")
            } else {
                ("200 OK", String::new(), LOGIN_PAGE)
            }
        }
        (_, _) if !logged_in => ("302 Found", "Location: /login\r\n".to_string(), ""),
        ("get", "/") => ("200 OK", String::new(), HOME_PAGE),
        ("get", "/logout") => (
            "302 Found",
            "Location: /login\r\nSet-Cookie: sid=; Path=/; Max-Age=0\r\n".to_string(),
            "",
        ),
        ("get", "/dashboard") => ("200 OK", String::new(), DASHBOARD_PAGE),
        ("get", "/profile") => ("200 OK", String::new(), PROFILE_PAGE),
        _ => ("404 Not Found", String::new(), "not found"),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
        status,
        page.len(),
        extra,
        page
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Server with no login endpoint at all
async fn spawn_not_found_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let page = "<html><body><h1>Not Found</h1></body></html>";
                let response = format!(
                    "HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    page.len(),
                    page
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr.to_string()
}

async fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle(stream));
        }
    });
    addr.to_string()
}

#[tokio::test]
async fn test_web_login_tries_credentials_in_order_and_crawls() {
    let target = spawn_app().await;
    let driver = WebDriver::new(WebConfig::default());
    let credentials = vec![
        Credential::password(CredentialKind::Web, "admin", "wrong"),
        Credential::password(CredentialKind::Web, "admin", "s3cret"),
        Credential::password(CredentialKind::Web, "never-tried", "x"),
    ];

    let report = run_session(&driver, &target, &credentials, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        SessionOutcome::Authenticated {
            username: "admin".to_string()
        }
    );
    assert_eq!(report.final_state, SessionState::Done);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].error_kind, "authentication");

    let titles: Vec<&str> = report.findings.iter().map(|f| f.title.as_str()).collect();
    assert_eq!(titles[0], "Web Application Login Successful");
    assert!(titles.contains(&"Login Form Served Over HTTP"));
    assert!(titles.contains(&"Sensitive Data Exposure: API Key"));

    let form = report
        .findings
        .iter()
        .find(|f| f.title == "Form Submits Over Insecure Channel")
        .unwrap();
    assert_eq!(form.severity, Severity::Low);
    assert!(form.details["action"].as_str().unwrap().ends_with("/update"));

    let crawl = report.findings.last().unwrap();
    assert_eq!(crawl.title, "Authenticated Web Crawl");
    let urls: Vec<&str> = crawl.details["pages"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|page| page["url"].as_str())
        .collect();
    assert_eq!(urls.len(), 3);
    assert!(urls.iter().all(|url| url.starts_with(&format!("http://{}/", target))));
}

#[tokio::test]
async fn test_web_login_rejected_for_every_credential() {
    let target = spawn_app().await;
    let driver = WebDriver::new(WebConfig::default());
    let credentials = vec![
        Credential::password(CredentialKind::Web, "admin", "admin"),
        Credential::password(CredentialKind::Web, "root", "root"),
    ];

    let report = run_session(&driver, &target, &credentials, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::NotAuthenticated);
    assert_eq!(report.final_state, SessionState::Failed);
    assert_eq!(report.attempts.len(), 2);
    assert!(report.findings.is_empty());
}

#[tokio::test]
async fn test_missing_login_endpoint_is_not_authenticated() {
    let target = spawn_not_found_app().await;
    let driver = WebDriver::new(WebConfig::default());

    let report = run_session(
        &driver,
        &target,
        &[Credential::password(CredentialKind::Web, "admin", "x")],
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, SessionOutcome::NotAuthenticated);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].error_kind, "protocol");
    assert!(report.attempts[0].message.contains("404"));
    assert!(report.findings.is_empty());
}

#[tokio::test]
async fn test_web_module_through_engine() {
    let target = spawn_app().await;
    let engine = ScanEngine::new(EngineConfig::default()).unwrap();
    let request = ScanRequest::new(vec![target.clone()], vec![ScanModule::Web]).with_credentials(vec![
        Credential::password(CredentialKind::Ssh, "root", "toor"),
        Credential::password(CredentialKind::Web, "guest", "guest"),
    ]);

    let report = engine.run(request).await;
    assert_eq!(report.status(), ScanStatus::Completed);
    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.title, "Web Authentication Unsuccessful");
    assert_eq!(finding.target, target);
    assert_eq!(finding.module, ScanModule::Web);
}

#[tokio::test]
async fn test_cancelled_session_stops_iteration() {
    let driver = WebDriver::new(WebConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_session(
        &driver,
        "127.0.0.1:9",
        &[Credential::password(CredentialKind::Web, "admin", "admin")],
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(netaudit::ScanError::Cancelled)));
}
