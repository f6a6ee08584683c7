//! Request header inspection.
//!
//! Shared by the network analyzer and the decision aggregator:
//! - Automation tool markers in header names or values
//! - Proxy and CDN forwarding headers
//! - Browser header self-consistency

use super::user_agent::{claims_browser, UserAgentParser};
use crate::telemetry::RequestMeta;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Headers that real browsers typically send.
static BROWSER_HEADERS: &[&str] = &["accept", "accept-language", "accept-encoding"];

/// Headers that indicate automation tools.
static AUTOMATION_HEADERS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "x-selenium",
        "x-puppeteer",
        "x-playwright",
        "x-cypress",
        "x-automation",
        "x-headless",
        "x-webdriver",
    ])
});

/// Automation vocabulary matched against header names and values.
static AUTOMATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)webdriver|chromedriver|geckodriver|selenium|headless|puppeteer|playwright|cypress|phantom|nightmare")
        .unwrap()
});

/// Headers added by forward proxies, load balancers and CDNs.
static PROXY_HEADERS: &[&str] = &[
    "via",
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "x-proxy-id",
    "x-proxy-connection",
    "proxy-connection",
    "proxy-authorization",
    "client-ip",
    "true-client-ip",
    "x-client-ip",
    "x-originating-ip",
    "cf-connecting-ip",
    "cf-ray",
    "fastly-client-ip",
    "akamai-origin-hop",
    "x-akamai-edgescape",
    "x-azure-clientip",
    "x-bluecoat-via",
];

/// Automation markers found in request headers, one entry per match.
pub fn automation_markers(req: &RequestMeta) -> Vec<String> {
    let mut markers = Vec::new();
    let mut names: Vec<&String> = req.headers.keys().collect();
    names.sort();

    for name in names {
        if AUTOMATION_HEADERS.contains(name.as_str()) || AUTOMATION_PATTERN.is_match(name) {
            markers.push(format!("header {}", name));
            continue;
        }
        if let Some(values) = req.headers.get(name) {
            if let Some(hit) = values.iter().find_map(|v| AUTOMATION_PATTERN.find(v)) {
                markers.push(format!("{} contains {}", name, hit.as_str().to_lowercase()));
            }
        }
    }

    markers
}

/// Proxy-indicating headers present on the request, in table order.
pub fn proxy_headers(req: &RequestMeta) -> Vec<&'static str> {
    PROXY_HEADERS
        .iter()
        .copied()
        .filter(|h| req.has_header(h))
        .collect()
}

/// Outcome of the browser header self-consistency check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderConsistency {
    /// The User-Agent claims a graphical browser
    pub claims_browser: bool,
    /// Contradictions between the claimed browser and the other headers
    pub contradictions: Vec<String>,
}

impl HeaderConsistency {
    pub fn is_consistent(&self) -> bool {
        self.contradictions.is_empty()
    }
}

/// Check that the headers agree with the browser the User-Agent claims.
pub fn check_consistency(req: &RequestMeta) -> HeaderConsistency {
    let ua = req.user_agent().unwrap_or("");
    let mut result = HeaderConsistency {
        claims_browser: claims_browser(ua),
        contradictions: vec![],
    };
    if !result.claims_browser {
        return result;
    }

    for header in BROWSER_HEADERS {
        if !req.has_header(header) {
            result.contradictions.push(format!("missing_{}", header.replace('-', "_")));
        }
    }

    if let Some(accept) = req.header("accept") {
        if accept.trim().is_empty() {
            result.contradictions.push("empty_accept".to_string());
        }
    }

    if let Some(lang) = req.header("accept-language") {
        if lang.trim().len() < 2 {
            result.contradictions.push("suspicious_accept_language".to_string());
        }
    }

    // Chrome 89+ sends client hints on secure requests
    let claims_chrome = ua.contains("Chrome/") && !ua.contains("Chromium/");
    if claims_chrome && !req.has_header("sec-ch-ua") {
        if let Some(version) = UserAgentParser::extract_version(ua, "Chrome/") {
            if version >= 89 {
                result.contradictions.push("missing_sec_ch_ua_for_chrome".to_string());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_req(headers: Vec<(&str, &str)>) -> RequestMeta {
        RequestMeta::new(None, headers)
    }

    #[test]
    fn test_browser_headers_consistent() {
        let req = make_req(vec![
            ("accept", "text/html,application/xhtml+xml"),
            ("accept-language", "en-US,en;q=0.9"),
            ("accept-encoding", "gzip, deflate, br"),
            ("user-agent", "Mozilla/5.0 Chrome/120"),
            ("sec-ch-ua", "\"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\""),
        ]);
        let result = check_consistency(&req);
        assert!(result.claims_browser);
        assert!(result.is_consistent(), "{:?}", result.contradictions);
    }

    #[test]
    fn test_browser_headers_missing() {
        let req = make_req(vec![("user-agent", "Mozilla/5.0 Chrome/120")]);
        let result = check_consistency(&req);
        assert!(result.contradictions.contains(&"missing_accept_language".to_string()));
        assert!(result.contradictions.contains(&"missing_sec_ch_ua_for_chrome".to_string()));
    }

    #[test]
    fn test_non_browser_not_checked() {
        let req = make_req(vec![("user-agent", "curl/8.4.0")]);
        let result = check_consistency(&req);
        assert!(!result.claims_browser);
        assert!(result.is_consistent());
    }

    #[test]
    fn test_automation_markers() {
        let req = make_req(vec![
            ("x-selenium", "true"),
            ("user-agent", "Mozilla/5.0 HeadlessChrome/120"),
            ("accept", "text/html"),
        ]);
        let markers = automation_markers(&req);
        assert_eq!(markers.len(), 2);
        assert!(markers.iter().any(|m| m.contains("x-selenium")));
        assert!(markers.iter().any(|m| m.contains("headless")));
    }

    #[test]
    fn test_proxy_headers() {
        let req = make_req(vec![("Via", "1.1 proxy"), ("CF-Connecting-IP", "1.2.3.4")]);
        assert_eq!(proxy_headers(&req), vec!["via", "cf-connecting-ip"]);
        assert!(proxy_headers(&make_req(vec![])).is_empty());
    }
}
