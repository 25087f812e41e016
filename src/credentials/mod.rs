//! Credentialed session probing
//!
//! Each protocol implements [`SessionDriver`]; [`run_session`] walks the
//! caller's credentials of that protocol in order, stops at the first one
//! that authenticates, and runs the driver's enumeration on that session.

pub mod database;
pub mod html;
pub mod ssh;
pub mod web;

use crate::report::FindingDraft;
use crate::{ScanError, ScanResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

pub use database::DatabaseDriver;
pub use ssh::SshDriver;
pub use web::WebDriver;

/// Protocol a credential is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Ssh,
    Web,
    Database,
}

impl CredentialKind {
    /// Name used in finding titles
    pub fn display_name(&self) -> &'static str {
        match self {
            CredentialKind::Ssh => "SSH",
            CredentialKind::Web => "Web",
            CredentialKind::Database => "Database",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::Ssh => write!(f, "ssh"),
            CredentialKind::Web => write!(f, "web"),
            CredentialKind::Database => write!(f, "database"),
        }
    }
}

/// Password or private key material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Secret {
    Password(String),
    /// PEM / OpenSSH encoded private key
    PrivateKey(String),
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Password(_) => write!(f, "Password(<redacted>)"),
            Secret::PrivateKey(_) => write!(f, "PrivateKey(<redacted>)"),
        }
    }
}

impl Secret {
    pub fn password(&self) -> Option<&str> {
        match self {
            Secret::Password(p) => Some(p),
            Secret::PrivateKey(_) => None,
        }
    }
}

/// Per-protocol knobs carried by a credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolOptions {
    pub port: Option<u16>,
    /// `mysql` or `mariadb`
    pub database_type: Option<String>,
    pub login_path: Option<String>,
    /// Overrides the `scheme://target` origin for web sessions
    pub base_url: Option<String>,
    pub username_field: Option<String>,
    pub password_field: Option<String>,
    pub key_passphrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    pub username: String,
    pub secret: Secret,
    #[serde(default, rename = "protocolOptions", alias = "options")]
    pub options: ProtocolOptions,
}

impl Credential {
    pub fn password(kind: CredentialKind, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            kind,
            username: username.into(),
            secret: Secret::Password(password.into()),
            options: ProtocolOptions::default(),
        }
    }

    pub fn private_key(username: impl Into<String>, pem: impl Into<String>) -> Self {
        Self {
            kind: CredentialKind::Ssh,
            username: username.into(),
            secret: Secret::PrivateKey(pem.into()),
            options: ProtocolOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProtocolOptions) -> Self {
        self.options = options;
        self
    }
}

/// Credentials of one kind, in caller order. Empty is an error.
pub fn select_credentials(credentials: &[Credential], kind: CredentialKind) -> ScanResult<Vec<&Credential>> {
    let selected: Vec<&Credential> = credentials.iter().filter(|c| c.kind == kind).collect();
    if selected.is_empty() {
        return Err(ScanError::NoCredentials(kind.to_string()));
    }
    Ok(selected)
}

/// Session lifecycle shared by all drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    Authenticated,
    Enumerating,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    fn can_move_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Authenticating)
                | (Authenticating, Authenticated)
                | (Authenticated, Enumerating)
                | (Enumerating, Done)
                | (Connecting | Authenticating | Authenticated | Enumerating, Failed)
                // a failed attempt is reset before the next credential
                | (Failed, Idle)
        )
    }
}

/// Guards session state changes
#[derive(Debug, Clone)]
pub struct SessionTracker {
    state: SessionState,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> ScanResult<()> {
        if !self.state.can_move_to(next) {
            return Err(ScanError::ProtocolError(format!(
                "illegal session transition {:?} -> {:?}",
                self.state, next
            )));
        }
        log::trace!("session {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() && self.state != SessionState::Idle {
            self.state = SessionState::Failed;
        }
    }

    fn reset(&mut self) -> ScanResult<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            _ => self.transition(SessionState::Idle),
        }
    }
}

/// One rejected or failed credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub username: String,
    pub error_kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SessionOutcome {
    Authenticated { username: String },
    NotAuthenticated,
}

/// Everything one driver run produced
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub kind: CredentialKind,
    pub outcome: SessionOutcome,
    pub final_state: SessionState,
    pub attempts: Vec<AttemptFailure>,
    pub findings: Vec<FindingDraft>,
}

impl SessionReport {
    pub fn is_authenticated(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Authenticated { .. })
    }
}

/// A protocol-specific session client
#[async_trait]
pub trait SessionDriver: Send + Sync {
    type Session: Send;

    fn kind(&self) -> CredentialKind;

    /// Reject credentials this driver can never use, before any network I/O
    fn preflight(&self, _credential: &Credential) -> ScanResult<()> {
        Ok(())
    }

    /// Connect and authenticate. Implementations move the tracker from
    /// `Connecting` to `Authenticating` once the transport is up.
    async fn open(
        &self,
        target: &str,
        credential: &Credential,
        tracker: &mut SessionTracker,
    ) -> ScanResult<Self::Session>;

    /// Best-effort enumeration on an authenticated session
    async fn enumerate(&self, target: &str, session: &mut Self::Session) -> Vec<FindingDraft>;

    async fn close(&self, session: Self::Session);
}

/// Try credentials in order until one authenticates, then enumerate.
///
/// An empty credential list fails with `NoCredentials` and an unusable
/// configuration with `UnsupportedConfiguration`, both before any network
/// attempt. Every other per-credential failure moves on to the next one.
pub async fn run_session<D: SessionDriver>(
    driver: &D,
    target: &str,
    credentials: &[Credential],
    cancel: &CancellationToken,
) -> ScanResult<SessionReport> {
    let kind = driver.kind();
    let selected = select_credentials(credentials, kind)?;
    for credential in &selected {
        driver.preflight(credential)?;
    }

    let mut tracker = SessionTracker::new();
    let mut attempts = Vec::new();

    for credential in selected {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        tracker.reset()?;
        tracker.transition(SessionState::Connecting)?;
        log::debug!("{} session to {} as '{}'", kind, target, credential.username);

        let opened = driver.open(target, credential, &mut tracker).await;
        let mut session = match opened {
            Ok(session) => session,
            Err(e @ ScanError::UnsupportedConfiguration(_)) => return Err(e),
            Err(e) => {
                tracker.fail();
                log::info!("{} login to {} as '{}' failed: {}", kind, target, credential.username, e);
                attempts.push(AttemptFailure {
                    username: credential.username.clone(),
                    error_kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        tracker.transition(SessionState::Authenticated)?;
        log::info!("{} authenticated on {} as '{}'", kind, target, credential.username);

        tracker.transition(SessionState::Enumerating)?;
        let findings = driver.enumerate(target, &mut session).await;
        driver.close(session).await;
        tracker.transition(SessionState::Done)?;

        return Ok(SessionReport {
            kind,
            outcome: SessionOutcome::Authenticated {
                username: credential.username.clone(),
            },
            final_state: tracker.state(),
            attempts,
            findings,
        });
    }

    Ok(SessionReport {
        kind,
        outcome: SessionOutcome::NotAuthenticated,
        final_state: tracker.state(),
        attempts,
        findings: Vec::new(),
    })
}

/// Information finding summarising a run where nothing authenticated
pub fn not_authenticated_finding(report: &SessionReport) -> FindingDraft {
    let users: Vec<&str> = report.attempts.iter().map(|a| a.username.as_str()).collect();
    FindingDraft::information(
        format!("{} Authentication Unsuccessful", report.kind.display_name()),
        format!(
            "None of the {} supplied {} credentials authenticated",
            report.attempts.len(),
            report.kind
        ),
    )
    .with_detail("usernames", users)
    .with_detail(
        "errors",
        report
            .attempts
            .iter()
            .map(|a| format!("{}: {}", a.username, a.message))
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts exactly one password
    struct FakeDriver {
        accepted: &'static str,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl SessionDriver for FakeDriver {
        type Session = String;

        fn kind(&self) -> CredentialKind {
            CredentialKind::Ssh
        }

        async fn open(&self, _target: &str, credential: &Credential, tracker: &mut SessionTracker) -> ScanResult<String> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tracker.transition(SessionState::Authenticating)?;
            match credential.secret.password() {
                Some(p) if p == self.accepted => Ok(credential.username.clone()),
                _ => Err(ScanError::AuthenticationFailure("denied".to_string())),
            }
        }

        async fn enumerate(&self, _target: &str, session: &mut String) -> Vec<FindingDraft> {
            vec![FindingDraft::information("Session", session.clone())]
        }

        async fn close(&self, _session: String) {}
    }

    fn driver() -> FakeDriver {
        FakeDriver {
            accepted: "s3cret",
            opens: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let driver = driver();
        let creds = vec![
            Credential::password(CredentialKind::Ssh, "alice", "wrong"),
            Credential::password(CredentialKind::Web, "web", "s3cret"),
            Credential::password(CredentialKind::Ssh, "bob", "s3cret"),
            Credential::password(CredentialKind::Ssh, "carol", "s3cret"),
        ];

        let report = run_session(&driver, "10.0.0.1", &creds, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            report.outcome,
            SessionOutcome::Authenticated {
                username: "bob".to_string()
            }
        );
        assert_eq!(report.final_state, SessionState::Done);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(driver.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_authenticated_is_not_an_error() {
        let driver = driver();
        let creds = vec![Credential::password(CredentialKind::Ssh, "alice", "nope")];
        let report = run_session(&driver, "10.0.0.1", &creds, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, SessionOutcome::NotAuthenticated);
        assert_eq!(report.final_state, SessionState::Failed);
        assert_eq!(not_authenticated_finding(&report).title, "SSH Authentication Unsuccessful");
    }

    #[tokio::test]
    async fn test_no_credentials_before_network() {
        let driver = driver();
        let creds = vec![Credential::password(CredentialKind::Database, "root", "x")];
        let result = run_session(&driver, "10.0.0.1", &creds, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::NoCredentials(_))));
        assert_eq!(driver.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_illegal_transition() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.transition(SessionState::Authenticated).is_err());
        tracker.transition(SessionState::Connecting).unwrap();
        tracker.transition(SessionState::Failed).unwrap();
        assert!(tracker.transition(SessionState::Done).is_err());
        tracker.transition(SessionState::Idle).unwrap();
    }

    #[test]
    fn test_secret_is_redacted() {
        let cred = Credential::password(CredentialKind::Web, "admin", "hunter2");
        assert!(!format!("{:?}", cred).contains("hunter2"));
    }

    #[test]
    fn test_credential_json_shape() {
        let cred: Credential = serde_json::from_str(
            r#"{"type":"database","username":"root","secret":{"password":"toor"},
                "protocolOptions":{"database_type":"mariadb","port":3307}}"#,
        )
        .unwrap();
        assert_eq!(cred.kind, CredentialKind::Database);
        assert_eq!(cred.options.port, Some(3307));
        assert_eq!(cred.secret.password(), Some("toor"));
    }
}
