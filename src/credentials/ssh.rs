//! Shell session driver over SSH

use super::{Credential, CredentialKind, Secret, SessionDriver, SessionState, SessionTracker};
use crate::config::SshConfig;
use crate::intelligence::DeviceProfile;
use crate::report::{FindingDraft, Severity};
use crate::{ScanError, ScanResult};
use async_trait::async_trait;
use russh::keys::key;
use russh::{client, ChannelMsg, Disconnect};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Commands run after login, keyed by a short name
pub const ENUMERATION_COMMANDS: [(&str, &str); 6] = [
    ("uname", "uname -a"),
    ("passwd", "cat /etc/passwd"),
    ("sudo", "sudo -l -n"),
    ("sshd_config", "cat /etc/ssh/sshd_config"),
    ("login_defs", "cat /etc/login.defs"),
    (
        "world_writable",
        "find / -xdev -type f -perm -0002 -not -path '/proc/*' -not -path '/sys/*' 2>/dev/null | head -n 50",
    ),
];

/// Password ageing beyond this many days is flagged
const MAX_PASSWORD_AGE_DAYS: u64 = 90;

/// Accepts any host key; the engine audits hosts, it does not pin them
struct AuditHandler;

#[async_trait]
impl client::Handler for AuditHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &key::PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct SshSession {
    handle: client::Handle<AuditHandler>,
    username: String,
}

pub struct SshDriver {
    config: SshConfig,
}

impl SshDriver {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<AuditHandler>,
        credential: &Credential,
    ) -> ScanResult<bool> {
        let accepted = match &credential.secret {
            Secret::Password(password) => handle.authenticate_password(&credential.username, password).await?,
            Secret::PrivateKey(pem) => {
                let key_pair = russh::keys::decode_secret_key(pem, credential.options.key_passphrase.as_deref())
                    .map_err(|e| ScanError::ConfigError(format!("unreadable private key: {}", e)))?;
                handle
                    .authenticate_publickey(&credential.username, Arc::new(key_pair))
                    .await?
            }
        };
        Ok(accepted)
    }

    /// Run one command, collecting stdout until the channel closes
    async fn exec(&self, session: &mut SshSession, command: &str) -> ScanResult<String> {
        let run = async {
            let mut channel = session.handle.channel_open_session().await?;
            channel.exec(true, command).await?;

            let mut stdout = Vec::new();
            let mut exit_status = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                    _ => {}
                }
            }
            log::trace!("'{}' exited with {:?}", command, exit_status);
            Ok::<_, ScanError>(String::from_utf8_lossy(&stdout).into_owned())
        };

        timeout(Duration::from_millis(self.config.command_timeout_ms), run).await?
    }
}

#[async_trait]
impl SessionDriver for SshDriver {
    type Session = SshSession;

    fn kind(&self) -> CredentialKind {
        CredentialKind::Ssh
    }

    async fn open(&self, target: &str, credential: &Credential, tracker: &mut SessionTracker) -> ScanResult<SshSession> {
        let port = credential.options.port.unwrap_or(self.config.port);
        let connect_timeout = Duration::from_millis(self.config.timeout_ms);
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(connect_timeout),
            ..Default::default()
        });

        let mut handle = timeout(connect_timeout, client::connect(config, (target, port), AuditHandler)).await??;
        tracker.transition(SessionState::Authenticating)?;

        let accepted = timeout(connect_timeout, self.authenticate(&mut handle, credential)).await??;
        if !accepted {
            let _ = handle.disconnect(Disconnect::ByApplication, "", "English").await;
            return Err(ScanError::AuthenticationFailure(format!(
                "{}@{}:{} rejected",
                credential.username, target, port
            )));
        }

        Ok(SshSession {
            handle,
            username: credential.username.clone(),
        })
    }

    async fn enumerate(&self, target: &str, session: &mut SshSession) -> Vec<FindingDraft> {
        let mut outputs = BTreeMap::new();
        for (name, command) in ENUMERATION_COMMANDS {
            match self.exec(session, command).await {
                Ok(output) => {
                    outputs.insert(name, output);
                }
                Err(e) => log::debug!("'{}' on {} failed: {}", command, target, e),
            }
        }

        let mut findings = vec![FindingDraft::information(
            "SSH Authenticated Access",
            format!("Authenticated shell access as '{}'", session.username),
        )
        .with_detail("username", session.username.clone())
        .with_detail("commands_completed", outputs.len())];

        findings.extend(analyze_outputs(&outputs));
        findings
    }

    async fn close(&self, session: SshSession) {
        if let Err(e) = session
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            log::debug!("SSH disconnect failed: {}", e);
        }
    }
}

/// Derive findings from the collected command outputs
pub fn analyze_outputs(outputs: &BTreeMap<&str, String>) -> Vec<FindingDraft> {
    let mut findings = Vec::new();
    if let Some(uname) = outputs.get("uname") {
        findings.extend(analyze_uname(uname));
    }
    if let Some(passwd) = outputs.get("passwd") {
        findings.extend(analyze_passwd(passwd));
    }
    if let Some(sudo) = outputs.get("sudo") {
        findings.extend(analyze_sudo(sudo));
    }
    if let Some(config) = outputs.get("sshd_config") {
        findings.extend(analyze_sshd_config(config));
    }
    if let Some(defs) = outputs.get("login_defs") {
        findings.extend(analyze_login_defs(defs));
    }
    if let Some(files) = outputs.get("world_writable") {
        findings.extend(analyze_world_writable(files));
    }
    findings
}

pub fn analyze_uname(output: &str) -> Option<FindingDraft> {
    let banner = output.trim();
    if banner.is_empty() {
        return None;
    }
    let profile = DeviceProfile::from_description(banner);
    Some(
        FindingDraft::information("Operating System Identified", banner)
            .with_detail("classification", profile.category.as_str())
            .with_detail("manufacturer", profile.manufacturer)
            .with_detail("version", profile.version),
    )
}

/// `Key value` directives, comments stripped, keys lower-cased
fn directives(text: &str) -> impl Iterator<Item = (String, String)> + '_ {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next()?.to_lowercase();
            let value = parts.next()?.trim().to_string();
            Some((key, value))
        })
}

pub fn analyze_sshd_config(text: &str) -> Vec<FindingDraft> {
    let mut findings = Vec::new();
    for (key, value) in directives(text) {
        let enabled = value.eq_ignore_ascii_case("yes");
        match key.as_str() {
            "permitrootlogin" if enabled => findings.push(
                FindingDraft::vulnerability(
                    Severity::High,
                    "SSH Root Login Permitted",
                    "sshd_config sets PermitRootLogin yes, allowing direct root logins over SSH",
                )
                .with_solution("Set PermitRootLogin to 'no' or 'prohibit-password' and restart sshd")
                .with_detail("directive", format!("PermitRootLogin {}", value)),
            ),
            "passwordauthentication" if enabled => findings.push(
                FindingDraft::vulnerability(
                    Severity::Medium,
                    "SSH Password Authentication Enabled",
                    "sshd_config sets PasswordAuthentication yes, exposing the host to password guessing",
                )
                .with_solution("Disable PasswordAuthentication and use key based authentication")
                .with_detail("directive", format!("PasswordAuthentication {}", value)),
            ),
            _ => {}
        }
    }
    findings
}

pub fn analyze_passwd(text: &str) -> Vec<FindingDraft> {
    let accounts: Vec<&str> = text
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            (fields.len() >= 4 && fields[2] == "0" && fields[0] != "root").then_some(fields[0])
        })
        .collect();

    if accounts.is_empty() {
        return Vec::new();
    }

    vec![FindingDraft::vulnerability(
        Severity::Critical,
        "Non-root Account With UID 0",
        format!("Accounts other than root have UID 0: {}", accounts.join(", ")),
    )
    .with_solution("Remove or renumber the extra UID 0 accounts")
    .with_detail("accounts", accounts)]
}

pub fn analyze_sudo(text: &str) -> Vec<FindingDraft> {
    let entries: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("NOPASSWD"))
        .collect();

    if entries.is_empty() {
        return Vec::new();
    }

    vec![FindingDraft::vulnerability(
        Severity::High,
        "Passwordless Sudo Rules",
        "The account can run commands through sudo without a password",
    )
    .with_solution("Remove NOPASSWD from sudoers entries that are not strictly required")
    .with_detail("entries", entries)]
}

pub fn analyze_login_defs(text: &str) -> Vec<FindingDraft> {
    directives(text)
        .filter(|(key, _)| key == "pass_max_days")
        .filter_map(|(_, value)| value.parse::<u64>().ok())
        .filter(|days| *days > MAX_PASSWORD_AGE_DAYS)
        .take(1)
        .map(|days| {
            FindingDraft::vulnerability(
                Severity::Low,
                "Password Expiry Policy Too Long",
                format!("PASS_MAX_DAYS is {} days", days),
            )
            .with_solution(format!("Set PASS_MAX_DAYS to {} or less", MAX_PASSWORD_AGE_DAYS))
            .with_detail("pass_max_days", days)
        })
        .collect()
}

pub fn analyze_world_writable(text: &str) -> Vec<FindingDraft> {
    let files: Vec<&str> = text.lines().map(str::trim).filter(|l| l.starts_with('/')).collect();
    if files.is_empty() {
        return Vec::new();
    }

    vec![FindingDraft::vulnerability(
        Severity::Medium,
        "World-Writable Files",
        format!("{} world-writable files found", files.len()),
    )
    .with_solution("Remove the world-write bit (chmod o-w) from these files")
    .with_detail("files", files)]
}
