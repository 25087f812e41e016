//! Web form login and authenticated crawl

use super::html::{self, HtmlForm};
use super::{Credential, CredentialKind, Secret, SessionDriver, SessionState, SessionTracker};
use crate::config::WebConfig;
use crate::report::{FindingDraft, Severity};
use crate::{ScanError, ScanResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{redirect, Client, StatusCode, Url};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Sensitive data patterns checked on every crawled page
static SENSITIVE_PATTERNS: Lazy<Vec<(&'static str, Severity, Regex)>> = Lazy::new(|| {
    [
        (
            "Password",
            Severity::High,
            r#"(?i)\b(?:password|passwd|pwd)\s*[:=]\s*["']?([^\s"'<>&]{4,})"#,
        ),
        (
            "API Key",
            Severity::High,
            r#"(?i)\bapi[_-]?key\s*[:=]\s*["']?([A-Za-z0-9_\-]{16,})"#,
        ),
        (
            "Secret",
            Severity::High,
            r#"(?i)\b(?:client_secret|secret_key|secret)\s*[:=]\s*["']?([A-Za-z0-9_\-/+]{8,})"#,
        ),
        (
            "Token",
            Severity::Medium,
            r#"(?i)\b(?:access_token|auth_token|bearer)\s*[:=\s]\s*["']?([A-Za-z0-9_\-.]{16,})"#,
        ),
        (
            "Credit Card Number",
            Severity::High,
            r"\b((?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6011)[- ]?\d{4}[- ]?\d{4}[- ]?\d{1,4})\b",
        ),
        ("Social Security Number", Severity::High, r"\b(\d{3}-\d{2}-\d{4})\b"),
    ]
    .into_iter()
    .filter_map(|(label, severity, pattern)| Regex::new(pattern).ok().map(|re| (label, severity, re)))
    .collect()
});

/// Paths that end the authenticated session when fetched
static SESSION_ENDING_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)log[-_]?out|sign[-_]?out|log[-_]?off").expect("valid logout regex"));

/// Summary of one crawled page
#[derive(Debug, Clone, Serialize)]
pub struct CrawledPage {
    pub url: String,
    pub status: u16,
    pub depth: u32,
    pub title: Option<String>,
    pub links: usize,
    pub forms: usize,
}

pub struct WebSession {
    client: Client,
    base: Url,
    login_url: Url,
    username: String,
}

pub struct WebDriver {
    config: WebConfig,
}

impl WebDriver {
    pub fn new(config: WebConfig) -> Self {
        Self { config }
    }

    fn base_url(&self, target: &str, credential: &Credential) -> ScanResult<Url> {
        let raw = credential
            .options
            .base_url
            .clone()
            .unwrap_or_else(|| format!("{}://{}/", self.config.default_scheme, target));
        Url::parse(&raw).map_err(|e| ScanError::InvalidTarget(format!("{}: {}", raw, e)))
    }

    fn build_client(&self) -> ScanResult<Client> {
        Ok(Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .user_agent(self.config.user_agent.clone())
            .danger_accept_invalid_certs(true)
            .build()?)
    }

    /// Breadth-first same-origin crawl from the session's base URL
    async fn crawl(&self, session: &WebSession, findings: &mut Vec<FindingDraft>) -> Vec<CrawledPage> {
        let mut pages = Vec::new();
        let mut queue: VecDeque<(Url, u32)> = VecDeque::from([(session.base.clone(), 0)]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut flagged_forms: HashSet<String> = HashSet::new();

        while let Some((url, depth)) = queue.pop_front() {
            if pages.len() >= self.config.max_pages {
                log::debug!("Crawl page limit {} reached", self.config.max_pages);
                break;
            }
            if depth > self.config.max_depth || !visited.insert(url.to_string()) {
                continue;
            }

            let response = match session.client.get(url.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    log::debug!("Crawl fetch {} failed: {}", url, e);
                    continue;
                }
            };
            let status = response.status();

            if status.is_redirection() {
                if let Some(next) = location(&response, &url).filter(|next| crawlable(next, &session.base)) {
                    queue.push_back((next, depth));
                }
                continue;
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    log::debug!("Crawl body {} failed: {}", url, e);
                    continue;
                }
            };

            let links = html::extract_links(&body, &url);
            let forms = html::extract_forms(&body, &url);

            findings.extend(scan_sensitive_data(url.as_str(), &body));
            for form in &forms {
                if flagged_forms.insert(form.action.clone()) {
                    findings.extend(insecure_form_finding(url.as_str(), form));
                }
            }

            pages.push(CrawledPage {
                url: url.to_string(),
                status: status.as_u16(),
                depth,
                title: html::extract_title(&body),
                links: links.len(),
                forms: forms.len(),
            });

            for link in links {
                if crawlable(&link, &session.base) && !visited.contains(link.as_str()) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        pages
    }
}

#[async_trait]
impl SessionDriver for WebDriver {
    type Session = WebSession;

    fn kind(&self) -> CredentialKind {
        CredentialKind::Web
    }

    async fn open(&self, target: &str, credential: &Credential, tracker: &mut SessionTracker) -> ScanResult<WebSession> {
        let password = match &credential.secret {
            Secret::Password(password) => password.clone(),
            Secret::PrivateKey(_) => {
                return Err(ScanError::ConfigError("web logins need a password".to_string()));
            }
        };

        let base = self.base_url(target, credential)?;
        let login_path = credential.options.login_path.as_deref().unwrap_or(&self.config.login_path);
        let login_url = base
            .join(login_path)
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", login_path, e)))?;
        let client = self.build_client()?;

        let response = client.get(login_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ScanError::ProtocolError(format!(
                "login page {} answered {}",
                login_url,
                response.status()
            )));
        }
        let login_page = response.text().await?;
        tracker.transition(SessionState::Authenticating)?;

        let login_form = html::extract_forms(&login_page, &login_url)
            .into_iter()
            .find(HtmlForm::has_password_field);
        let post_url = match &login_form {
            Some(form) => Url::parse(&form.action).unwrap_or_else(|_| login_url.clone()),
            None => login_url.clone(),
        };

        let username_field = credential
            .options
            .username_field
            .clone()
            .unwrap_or_else(|| self.config.username_field.clone());
        let password_field = credential
            .options
            .password_field
            .clone()
            .unwrap_or_else(|| self.config.password_field.clone());

        let mut form = vec![
            (username_field, credential.username.clone()),
            (password_field, password),
        ];
        if let Some((name, value)) = html::extract_token(&login_page) {
            log::debug!("Submitting anti-forgery token '{}'", name);
            form.push((name, value));
        }

        let response = client.post(post_url).form(&form).send().await?;
        let status = response.status();
        let body = if status.is_redirection() {
            String::new()
        } else {
            response.text().await?
        };

        if !login_succeeded(status, &body) {
            return Err(ScanError::AuthenticationFailure(format!(
                "{} rejected login for '{}' ({})",
                login_url, credential.username, status
            )));
        }

        Ok(WebSession {
            client,
            base,
            login_url,
            username: credential.username.clone(),
        })
    }

    async fn enumerate(&self, target: &str, session: &mut WebSession) -> Vec<FindingDraft> {
        let mut findings = vec![FindingDraft::information(
            "Web Application Login Successful",
            format!("Form login at {} accepted '{}'", session.login_url, session.username),
        )
        .with_detail("login_url", session.login_url.to_string())];

        if session.login_url.scheme() == "http" {
            findings.push(
                FindingDraft::vulnerability(
                    Severity::Medium,
                    "Login Form Served Over HTTP",
                    format!("The login page {} is served without TLS", session.login_url),
                )
                .with_solution("Serve the login page and its form target over HTTPS only")
                .with_detail("url", session.login_url.to_string()),
            );
        }

        let pages = self.crawl(session, &mut findings).await;
        log::info!("Crawled {} pages on {}", pages.len(), target);

        findings.push(
            FindingDraft::information(
                "Authenticated Web Crawl",
                format!("{} pages reachable after login", pages.len()),
            )
            .with_detail("pages", serde_json::to_value(&pages).unwrap_or_default()),
        );
        findings
    }

    async fn close(&self, _session: WebSession) {}
}

/// A redirect counts as success; otherwise the body must no longer look like a login page
pub fn login_succeeded(status: StatusCode, body: &str) -> bool {
    if status.is_redirection() {
        return true;
    }
    if status.is_client_error() || status.is_server_error() {
        return false;
    }
    let lowered = body.to_lowercase();
    !(lowered.contains("login") && lowered.contains("password"))
}

fn location(response: &reqwest::Response, current: &Url) -> Option<Url> {
    let value = response.headers().get(reqwest::header::LOCATION)?.to_str().ok()?;
    html::resolve_url(value, current)
}

fn same_origin(url: &Url, base: &Url) -> bool {
    url.origin() == base.origin()
}

/// Same-origin links, minus the ones that would log the crawler out
fn crawlable(url: &Url, base: &Url) -> bool {
    if !same_origin(url, base) {
        return false;
    }
    if SESSION_ENDING_PATH.is_match(url.path()) {
        log::debug!("Not following session-ending link {}", url);
        return false;
    }
    true
}

/// One finding per pattern category found in the page
pub fn scan_sensitive_data(url: &str, body: &str) -> Vec<FindingDraft> {
    SENSITIVE_PATTERNS
        .iter()
        .filter_map(|(label, severity, re)| {
            let samples: Vec<String> = re
                .captures_iter(body)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
                .filter(|value| *label != "Credit Card Number" || luhn_valid(value))
                .take(3)
                .map(mask)
                .collect();
            if samples.is_empty() {
                return None;
            }
            Some(
                FindingDraft::vulnerability(
                    *severity,
                    format!("Sensitive Data Exposure: {}", label),
                    format!("{} pattern found in the content of {}", label, url),
                )
                .with_solution("Remove sensitive values from rendered pages and client-side code")
                .with_detail("url", url)
                .with_detail("samples", samples),
            )
        })
        .collect()
}

/// Forms posting anywhere but HTTPS
pub fn insecure_form_finding(page_url: &str, form: &HtmlForm) -> Option<FindingDraft> {
    let action = Url::parse(&form.action).ok()?;
    if action.scheme() == "https" {
        return None;
    }
    let severity = if form.has_password_field() {
        Severity::Medium
    } else {
        Severity::Low
    };
    Some(
        FindingDraft::vulnerability(
            severity,
            "Form Submits Over Insecure Channel",
            format!("A form on {} submits to {} without TLS", page_url, form.action),
        )
        .with_solution("Point form actions at HTTPS endpoints")
        .with_detail("page", page_url)
        .with_detail("action", form.action.clone())
        .with_detail("method", form.method.clone()),
    )
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{}****", visible)
}
