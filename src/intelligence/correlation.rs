//! Search-term extraction and external vulnerability lookups

use crate::config::LookupConfig;
use crate::{ScanError, ScanResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Words dropped from finding names before they become search terms
const GENERIC_WORDS: [&str; 7] = [
    "vulnerable",
    "insecure",
    "vulnerability",
    "issue",
    "detected",
    "default",
    "weak",
];

/// Technology keywords recognised in descriptions
const TECHNOLOGY_KEYWORDS: [&str; 17] = [
    "TLS", "SSL", "SSH", "SNMP", "FTP", "Telnet", "RDP", "SMB", "HTTP", "Apache", "nginx", "IIS", "Windows",
    "Linux", "OpenSSL", "OpenSSH", "MySQL",
];

const MAX_NAME_TERMS: usize = 3;
pub const MAX_SEARCH_TERMS: usize = 5;

/// Build lookup terms from a finding name and description
pub fn search_terms(name: &str, description: &str) -> Vec<String> {
    let mut terms: Vec<String> = name
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '.')
        .filter(|word| word.chars().count() > 2)
        .filter(|word| !GENERIC_WORDS.contains(&word.to_lowercase().as_str()))
        .take(MAX_NAME_TERMS)
        .map(str::to_string)
        .collect();

    let lowered = description.to_lowercase();
    terms.extend(
        TECHNOLOGY_KEYWORDS
            .iter()
            .filter(|keyword| lowered.contains(&keyword.to_lowercase()))
            .map(|keyword| keyword.to_string()),
    );

    let mut seen = HashSet::new();
    terms.retain(|term| seen.insert(term.to_lowercase()));
    terms.truncate(MAX_SEARCH_TERMS);
    terms
}

/// One record returned by a lookup backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityMatch {
    pub id: String,
    pub score: f64,
    pub description: Option<String>,
}

/// External vulnerability database collaborator
#[async_trait]
pub trait VulnerabilityLookup: Send + Sync {
    async fn search(&self, terms: &[String]) -> ScanResult<Vec<VulnerabilityMatch>>;
}

/// NVD CVE API 2.0 keyword search
#[derive(Debug, Clone)]
pub struct NvdLookup {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_results: usize,
}

impl NvdLookup {
    pub fn new(config: &LookupConfig) -> ScanResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("netaudit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            max_results: config.max_results.max(1),
        })
    }

    /// Pull matches out of an NVD 2.0 response body
    pub fn parse_response(body: &Value) -> Vec<VulnerabilityMatch> {
        body["vulnerabilities"]
            .as_array()
            .map(|items| items.iter().filter_map(|item| Self::parse_cve(&item["cve"])).collect())
            .unwrap_or_default()
    }

    fn parse_cve(cve: &Value) -> Option<VulnerabilityMatch> {
        let id = cve["id"].as_str()?.to_string();
        let metrics = &cve["metrics"];
        let score = ["cvssMetricV31", "cvssMetricV30", "cvssMetricV2"]
            .iter()
            .find_map(|key| metrics[*key][0]["cvssData"]["baseScore"].as_f64())?;
        let description = cve["descriptions"].as_array().and_then(|descriptions| {
            descriptions
                .iter()
                .find(|d| d["lang"].as_str() == Some("en"))
                .and_then(|d| d["value"].as_str())
                .map(str::to_string)
        });

        Some(VulnerabilityMatch {
            id,
            score: (score * 10.0).round() / 10.0,
            description,
        })
    }
}

#[async_trait]
impl VulnerabilityLookup for NvdLookup {
    async fn search(&self, terms: &[String]) -> ScanResult<Vec<VulnerabilityMatch>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let keywords = terms.join(" ");
        let per_page = self.max_results.to_string();
        let mut request = self
            .client
            .get(&self.base_url)
            .query(&[("keywordSearch", keywords.as_str()), ("resultsPerPage", per_page.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ScanError::ProtocolError(format!(
                "NVD lookup for '{}' returned {}",
                keywords,
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let matches = Self::parse_response(&body);
        log::debug!("NVD lookup '{}' returned {} matches", keywords, matches.len());
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generic_words_removed() {
        let terms = search_terms("Default SNMP Community String", "");
        assert_eq!(terms, vec!["SNMP", "Community", "String"]);
    }

    #[test]
    fn test_keywords_from_description_dedup_and_cap() {
        let terms = search_terms(
            "Weak SSH Configuration",
            "The OpenSSH daemon allows ssh password logins over TLS on Linux with telnet enabled",
        );
        assert_eq!(terms, vec!["SSH", "Configuration", "TLS", "Telnet", "Linux"]);
    }

    #[test]
    fn test_parse_nvd_response_prefers_v31() {
        let body = json!({
            "vulnerabilities": [
                {"cve": {
                    "id": "CVE-2023-0001",
                    "descriptions": [{"lang": "es", "value": "x"}, {"lang": "en", "value": "Buffer overflow"}],
                    "metrics": {
                        "cvssMetricV31": [{"cvssData": {"baseScore": 9.8}}],
                        "cvssMetricV2": [{"cvssData": {"baseScore": 7.5}}]
                    }
                }},
                {"cve": {
                    "id": "CVE-2010-0002",
                    "metrics": {"cvssMetricV2": [{"cvssData": {"baseScore": 5.0}}]}
                }},
                {"cve": {"id": "CVE-2024-0003", "metrics": {}}}
            ]
        });

        let matches = NvdLookup::parse_response(&body);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "CVE-2023-0001");
        assert_eq!(matches[0].score, 9.8);
        assert_eq!(matches[0].description.as_deref(), Some("Buffer overflow"));
        assert_eq!(matches[1].score, 5.0);
    }
}
