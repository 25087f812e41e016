//! MySQL / MariaDB session driver

use super::{Credential, CredentialKind, Secret, SessionDriver, SessionState, SessionTracker};
use crate::config::DatabaseConfig;
use crate::report::{FindingDraft, Severity};
use crate::{ScanError, ScanResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::{ConnectOptions, Connection, Row};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;

static DANGEROUS_GRANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(ALL PRIVILEGES|SUPER|GRANT OPTION|FILE)\b").expect("valid grant regex"));

/// Supported relational database flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    MySql,
    MariaDb,
}

impl DatabaseType {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::MySql | DatabaseType::MariaDb => 3306,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::MySql => "mysql",
            DatabaseType::MariaDb => "mariadb",
        }
    }
}

impl FromStr for DatabaseType {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(DatabaseType::MySql),
            "mariadb" => Ok(DatabaseType::MariaDb),
            other => Err(ScanError::UnsupportedConfiguration(format!(
                "database type '{}' is not supported",
                other
            ))),
        }
    }
}

pub struct DatabaseSession {
    conn: MySqlConnection,
    db_type: DatabaseType,
    username: String,
}

pub struct DatabaseDriver {
    config: DatabaseConfig,
}

impl DatabaseDriver {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn database_type(&self, credential: &Credential) -> ScanResult<DatabaseType> {
        credential
            .options
            .database_type
            .as_deref()
            .unwrap_or(&self.config.default_type)
            .parse()
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn fetch(&self, conn: &mut MySqlConnection, sql: &str) -> ScanResult<Vec<MySqlRow>> {
        Ok(timeout(self.query_timeout(), sqlx::query(sql).fetch_all(conn)).await??)
    }

    async fn version(&self, session: &mut DatabaseSession) -> ScanResult<String> {
        let rows = self.fetch(&mut session.conn, "SELECT VERSION()").await?;
        rows.first()
            .and_then(|row| column_text(row, 0))
            .ok_or_else(|| ScanError::ProtocolError("VERSION() returned no rows".to_string()))
    }

    async fn accounts(&self, session: &mut DatabaseSession) -> ScanResult<Vec<(String, String)>> {
        let rows = self.fetch(&mut session.conn, "SELECT User, Host FROM mysql.user").await?;
        Ok(rows
            .iter()
            .filter_map(|row| Some((column_text(row, 0)?, column_text(row, 1)?)))
            .collect())
    }

    async fn grants(&self, session: &mut DatabaseSession) -> ScanResult<Vec<String>> {
        let rows = self.fetch(&mut session.conn, "SHOW GRANTS").await?;
        Ok(rows.iter().filter_map(|row| column_text(row, 0)).collect())
    }

    async fn variables(&self, session: &mut DatabaseSession) -> ScanResult<BTreeMap<String, String>> {
        let rows = self.fetch(&mut session.conn, "SHOW GLOBAL VARIABLES").await?;
        Ok(rows
            .iter()
            .filter_map(|row| Some((column_text(row, 0)?.to_lowercase(), column_text(row, 1)?)))
            .collect())
    }
}

/// Text column, falling back to lossy bytes for binary collations
fn column_text(row: &MySqlRow, index: usize) -> Option<String> {
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Some(value);
    }
    row.try_get::<Vec<u8>, _>(index)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl SessionDriver for DatabaseDriver {
    type Session = DatabaseSession;

    fn kind(&self) -> CredentialKind {
        CredentialKind::Database
    }

    fn preflight(&self, credential: &Credential) -> ScanResult<()> {
        self.database_type(credential).map(|_| ())
    }

    async fn open(
        &self,
        target: &str,
        credential: &Credential,
        tracker: &mut SessionTracker,
    ) -> ScanResult<DatabaseSession> {
        let db_type = self.database_type(credential)?;
        let password = match &credential.secret {
            Secret::Password(password) => password.as_str(),
            Secret::PrivateKey(_) => {
                return Err(ScanError::ConfigError("database logins need a password".to_string()));
            }
        };
        let port = credential.options.port.unwrap_or_else(|| db_type.default_port());

        let options = MySqlConnectOptions::new()
            .host(target)
            .port(port)
            .username(&credential.username)
            .password(password)
            .ssl_mode(MySqlSslMode::Preferred)
            .disable_statement_logging();

        // the MySQL handshake authenticates as part of connecting
        tracker.transition(SessionState::Authenticating)?;
        let conn = timeout(self.query_timeout(), options.connect()).await??;

        Ok(DatabaseSession {
            conn,
            db_type,
            username: credential.username.clone(),
        })
    }

    async fn enumerate(&self, target: &str, session: &mut DatabaseSession) -> Vec<FindingDraft> {
        let mut findings = Vec::new();

        match self.version(session).await {
            Ok(version) => findings.push(version_finding(session.db_type, &session.username, &version)),
            Err(e) => log::debug!("Version query on {} failed: {}", target, e),
        }

        match self.accounts(session).await {
            Ok(accounts) => findings.extend(analyze_accounts(&accounts)),
            Err(e) => log::debug!("Account enumeration on {} failed: {}", target, e),
        }

        match self.grants(session).await {
            Ok(grants) => findings.extend(analyze_grants(&session.username, &grants)),
            Err(e) => log::debug!("SHOW GRANTS on {} failed: {}", target, e),
        }

        match self.variables(session).await {
            Ok(variables) => findings.extend(analyze_variables(&variables)),
            Err(e) => log::debug!("SHOW VARIABLES on {} failed: {}", target, e),
        }

        findings
    }

    async fn close(&self, session: DatabaseSession) {
        if let Err(e) = session.conn.close().await {
            log::debug!("Database close failed: {}", e);
        }
    }
}

pub fn version_finding(db_type: DatabaseType, username: &str, version: &str) -> FindingDraft {
    let flavour = if version.to_lowercase().contains("mariadb") {
        "MariaDB"
    } else {
        "MySQL"
    };
    FindingDraft::information(
        "Database Server Version",
        format!("{} {} (authenticated as '{}')", flavour, version, username),
    )
    .with_detail("database_type", db_type.as_str())
    .with_detail("version", version)
}

pub fn analyze_accounts(accounts: &[(String, String)]) -> Vec<FindingDraft> {
    let mut findings = Vec::new();

    let anonymous: Vec<String> = accounts
        .iter()
        .filter(|(user, _)| user.is_empty())
        .map(|(_, host)| format!("''@'{}'", host))
        .collect();
    if !anonymous.is_empty() {
        findings.push(
            FindingDraft::vulnerability(
                Severity::High,
                "Anonymous Database Account",
                "The server has accounts with an empty user name that anyone can log in with",
            )
            .with_solution("DROP USER the anonymous accounts")
            .with_detail("accounts", anonymous),
        );
    }

    let wildcard: Vec<String> = accounts
        .iter()
        .filter(|(_, host)| host == "%")
        .map(|(user, _)| format!("'{}'@'%'", user))
        .collect();
    if !wildcard.is_empty() {
        findings.push(
            FindingDraft::vulnerability(
                Severity::Medium,
                "Database Account Accessible From Any Host",
                format!("{} accounts accept connections from any host", wildcard.len()),
            )
            .with_solution("Restrict account hosts to the addresses that need access")
            .with_detail("accounts", wildcard),
        );
    }

    findings
}

pub fn analyze_grants(username: &str, grants: &[String]) -> Vec<FindingDraft> {
    let dangerous: Vec<&String> = grants.iter().filter(|g| DANGEROUS_GRANT_RE.is_match(g)).collect();
    if dangerous.is_empty() {
        return Vec::new();
    }

    let privileges: Vec<String> = dangerous
        .iter()
        .flat_map(|g| DANGEROUS_GRANT_RE.find_iter(g).map(|m| m.as_str().to_string()))
        .fold(Vec::new(), |mut acc, p| {
            if !acc.contains(&p) {
                acc.push(p);
            }
            acc
        });

    vec![FindingDraft::vulnerability(
        Severity::High,
        "Excessive Database Privileges",
        format!("Account '{}' holds {}", username, privileges.join(", ")),
    )
    .with_solution("Grant only the privileges the application needs")
    .with_detail("privileges", privileges)
    .with_detail("grants", dangerous.into_iter().cloned().collect::<Vec<_>>())]
}

pub fn analyze_variables(variables: &BTreeMap<String, String>) -> Vec<FindingDraft> {
    let mut findings = Vec::new();

    if variables
        .get("local_infile")
        .is_some_and(|v| v.eq_ignore_ascii_case("on") || v == "1")
    {
        findings.push(
            FindingDraft::vulnerability(
                Severity::Medium,
                "LOCAL INFILE Enabled",
                "local_infile=ON lets clients read files through LOAD DATA LOCAL",
            )
            .with_solution("Set local_infile=OFF")
            .with_detail("local_infile", "ON"),
        );
    }

    if let Some(ssl) = variables.get("have_ssl") {
        if ssl.eq_ignore_ascii_case("disabled") || ssl.eq_ignore_ascii_case("no") {
            findings.push(
                FindingDraft::vulnerability(
                    Severity::Medium,
                    "Database TLS Disabled",
                    format!("have_ssl is {}; client traffic travels in cleartext", ssl),
                )
                .with_solution("Configure ssl_cert / ssl_key and require TLS for remote accounts")
                .with_detail("have_ssl", ssl.clone()),
            );
        }
    }

    findings
}
