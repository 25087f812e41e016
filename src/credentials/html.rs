//! Regex based HTML extraction for the web session driver

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::collections::HashMap;

static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));
static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<a\s[^>]*>").expect("valid anchor regex"));
static FORM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form>").expect("valid form regex"));
static INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(input|select|textarea)\b([^>]*)>").expect("valid input regex"));
static META_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\s([^>]*)>").expect("valid meta regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*(?:=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("valid attribute regex")
});
static TOKEN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)csrf|_token|authenticity_token|xsrf").expect("valid token name regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormInput {
    pub name: String,
    pub input_type: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlForm {
    /// Resolved absolute action; the page URL when the form has none
    pub action: String,
    pub method: String,
    pub inputs: Vec<FormInput>,
}

impl HtmlForm {
    pub fn has_password_field(&self) -> bool {
        self.inputs.iter().any(|i| i.input_type.eq_ignore_ascii_case("password"))
    }
}

/// Lower-cased attribute names mapped to their (unescaped) values
fn attributes(tag_body: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(tag_body)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// Resolve an href against the page, skipping non-navigational schemes
pub fn resolve_url(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("data:")
        || href.starts_with("tel:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url)
}

pub fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|title| !title.is_empty())
}

/// Absolute link targets in document order, duplicates removed
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let mut links: Vec<Url> = Vec::new();
    for tag in ANCHOR_RE.find_iter(html) {
        let attrs = attributes(&tag.as_str()[2..]);
        if let Some(url) = attrs.get("href").and_then(|href| resolve_url(href, base)) {
            if !links.contains(&url) {
                links.push(url);
            }
        }
    }
    links
}

pub fn extract_forms(html: &str, base: &Url) -> Vec<HtmlForm> {
    FORM_RE
        .captures_iter(html)
        .map(|caps| {
            let form_attrs = attributes(caps.get(1).map_or("", |m| m.as_str()));
            let body = caps.get(2).map_or("", |m| m.as_str());

            let action = form_attrs
                .get("action")
                .filter(|a| !a.trim().is_empty())
                .and_then(|a| resolve_url(a, base))
                .unwrap_or_else(|| base.clone())
                .to_string();
            let method = form_attrs
                .get("method")
                .map(|m| m.to_uppercase())
                .unwrap_or_else(|| "GET".to_string());

            let inputs = INPUT_RE
                .captures_iter(body)
                .filter_map(|input| {
                    let tag = input.get(1)?.as_str().to_lowercase();
                    let attrs = attributes(input.get(2)?.as_str());
                    let name = attrs.get("name").filter(|n| !n.is_empty())?.clone();
                    let input_type = if tag == "input" {
                        attrs.get("type").cloned().unwrap_or_else(|| "text".to_string()).to_lowercase()
                    } else {
                        tag
                    };
                    Some(FormInput {
                        name,
                        input_type,
                        value: attrs.get("value").cloned(),
                    })
                })
                .collect();

            HtmlForm { action, method, inputs }
        })
        .collect()
}

/// Anti-forgery token from a hidden input or a meta tag, as `(field name, value)`
pub fn extract_token(html: &str) -> Option<(String, String)> {
    for input in INPUT_RE.captures_iter(html) {
        let attrs = attributes(input.get(2).map_or("", |m| m.as_str()));
        if let (Some(name), Some(value)) = (attrs.get("name"), attrs.get("value")) {
            if TOKEN_NAME_RE.is_match(name) && !value.is_empty() {
                return Some((name.clone(), value.clone()));
            }
        }
    }

    for meta in META_RE.captures_iter(html) {
        let attrs = attributes(meta.get(1).map_or("", |m| m.as_str()));
        if let (Some(name), Some(content)) = (attrs.get("name"), attrs.get("content")) {
            if TOKEN_NAME_RE.is_match(name) && !content.is_empty() {
                return Some((name.clone(), content.clone()));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"
        <html><head>
          <title>
            Admin   Login
          </title>
          <meta name="csrf-token" content="meta-token-value">
        </head><body>
          <form method="post" action="/session?next=%2F">
            <input type="hidden" name="authenticity_token" value="abc&amp;123">
            <input name=username>
            <input type='password' name='password'>
            <select name="realm"><option>local</option></select>
          </form>
          <a href="/dashboard">Dash</a>
          <a class="x" href='reports/index.html#top'>Reports</a>
          <a href="https://other.example.com/">Elsewhere</a>
          <a href="javascript:void(0)">noop</a>
          <a href="/dashboard">Again</a>
        </body></html>
    "#;

    fn base() -> Url {
        Url::parse("http://10.0.0.5/admin/login").unwrap()
    }

    #[test]
    fn test_title() {
        assert_eq!(extract_title(LOGIN_PAGE).as_deref(), Some("Admin Login"));
        assert_eq!(extract_title("<p>no title</p>"), None);
    }

    #[test]
    fn test_links_resolved_and_deduplicated() {
        let links: Vec<String> = extract_links(LOGIN_PAGE, &base()).into_iter().map(|u| u.to_string()).collect();
        assert_eq!(
            links,
            vec![
                "http://10.0.0.5/dashboard",
                "http://10.0.0.5/admin/reports/index.html",
                "https://other.example.com/",
            ]
        );
    }

    #[test]
    fn test_forms() {
        let forms = extract_forms(LOGIN_PAGE, &base());
        assert_eq!(forms.len(), 1);
        let form = &forms[0];
        assert_eq!(form.method, "POST");
        assert_eq!(form.action, "http://10.0.0.5/session?next=%2F");
        assert!(form.has_password_field());
        let names: Vec<&str> = form.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["authenticity_token", "username", "password", "realm"]);
        assert_eq!(form.inputs[1].input_type, "text");
    }

    #[test]
    fn test_token_prefers_input() {
        assert_eq!(
            extract_token(LOGIN_PAGE),
            Some(("authenticity_token".to_string(), "abc&123".to_string()))
        );
        let meta_only = r#"<meta content="m-1" name="_xsrf">"#;
        assert_eq!(extract_token(meta_only), Some(("_xsrf".to_string(), "m-1".to_string())));
        assert_eq!(extract_token("<input name='q' value='x'>"), None);
    }

    #[test]
    fn test_form_without_action_posts_to_page() {
        let forms = extract_forms("<form><input name='q'></form>", &base());
        assert_eq!(forms[0].action, "http://10.0.0.5/admin/login");
        assert_eq!(forms[0].method, "GET");
    }
}
