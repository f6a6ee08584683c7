//! Server-side User-Agent parsing.
//!
//! The collector reports its own parse of `navigator.userAgent`; this module
//! parses the HTTP `User-Agent` header independently so the two results can be
//! compared. Names from both sides go through [`browser_family`] and
//! [`os_family`] before comparison so that spelling differences between
//! parsers ("Mac OS X" vs "macOS") are not reported as disagreement.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Browser patterns, most specific first.
static BROWSER_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"Edg(?:e|A|iOS)?/[\d.]+").unwrap(), "Edge"),
        (Regex::new(r"(?:OPR|Opera)/[\d.]+").unwrap(), "Opera"),
        (Regex::new(r"SamsungBrowser/[\d.]+").unwrap(), "Samsung Internet"),
        (Regex::new(r"(?:Firefox|FxiOS)/[\d.]+").unwrap(), "Firefox"),
        (Regex::new(r"HeadlessChrome/[\d.]+").unwrap(), "Chrome"),
        (Regex::new(r"(?:Chrome|CriOS)/[\d.]+").unwrap(), "Chrome"),
        (Regex::new(r"Chromium/[\d.]+").unwrap(), "Chromium"),
        (Regex::new(r"Version/[\d.]+.*Safari/").unwrap(), "Safari"),
        (Regex::new(r"(?:MSIE |Trident/.*rv:)[\d.]+").unwrap(), "IE"),
        (Regex::new(r"PhantomJS/[\d.]+").unwrap(), "PhantomJS"),
    ]
});

/// OS patterns, most specific first.
static OS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"Windows Phone").unwrap(), "Windows Phone"),
        (Regex::new(r"Windows").unwrap(), "Windows"),
        (Regex::new(r"(?:iPhone|iPad|iPod).*OS [\d_]+").unwrap(), "iOS"),
        (Regex::new(r"Android").unwrap(), "Android"),
        (Regex::new(r"CrOS").unwrap(), "Chrome OS"),
        (Regex::new(r"Mac OS X|Macintosh").unwrap(), "Mac OS"),
        (Regex::new(r"Linux|X11").unwrap(), "Linux"),
    ]
});

/// Result of parsing a User-Agent header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerParsedAgent {
    pub browser: Option<String>,
    pub os: Option<String>,
}

/// User-Agent parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserAgentParser;

impl UserAgentParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse browser and OS names out of a raw User-Agent string.
    pub fn parse(&self, ua: &str) -> ServerParsedAgent {
        let first_match = |patterns: &[(Regex, &'static str)]| {
            patterns
                .iter()
                .find(|(pattern, _)| pattern.is_match(ua))
                .map(|(_, name)| name.to_string())
        };

        ServerParsedAgent {
            browser: first_match(BROWSER_PATTERNS.as_slice()),
            os: first_match(OS_PATTERNS.as_slice()),
        }
    }

    /// Extract version number from User-Agent.
    pub fn extract_version(ua: &str, prefix: &str) -> Option<u32> {
        let idx = ua.find(prefix)?;
        let start = idx + prefix.len();
        let rest = &ua[start..];
        let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        rest[..end].parse().ok()
    }
}

/// Canonical browser family used for cross-parser comparison.
pub fn browser_family(name: &str) -> String {
    let lower = name.to_lowercase();
    let lower = lower
        .trim_start_matches("mobile ")
        .trim_end_matches(" mobile")
        .trim();
    match lower {
        "headlesschrome" | "chrome headless" | "chrome webview" | "chrome ios" | "crios" => {
            "chrome".to_string()
        }
        "microsoft edge" | "edge" | "edgios" => "edge".to_string(),
        "opera" | "opr" => "opera".to_string(),
        "firefox ios" | "fxios" => "firefox".to_string(),
        "internet explorer" | "ie" | "msie" => "ie".to_string(),
        "samsung browser" | "samsung internet" | "samsungbrowser" => "samsung internet".to_string(),
        other => other.to_string(),
    }
}

/// Canonical OS family used for cross-parser comparison.
pub fn os_family(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.starts_with("windows phone") {
        "windows phone".to_string()
    } else if lower.starts_with("windows") {
        "windows".to_string()
    } else if lower.starts_with("mac") || lower == "os x" {
        "mac os".to_string()
    } else if lower == "ios" || lower.starts_with("iphone") || lower.starts_with("ipad") {
        "ios".to_string()
    } else if lower.starts_with("chrome os") || lower == "cros" || lower == "chromium os" {
        "chrome os".to_string()
    } else if lower.contains("android") {
        "android".to_string()
    } else if ["linux", "ubuntu", "debian", "fedora", "arch", "x11"]
        .iter()
        .any(|d| lower.starts_with(d))
    {
        "linux".to_string()
    } else {
        lower
    }
}

/// OS families a `navigator.platform` value is compatible with, or `None`
/// for platform strings the table does not know.
pub fn platform_families(platform: &str) -> Option<&'static [&'static str]> {
    let lower = platform.to_lowercase();
    if lower.starts_with("win") {
        Some(&["windows", "windows phone"])
    } else if lower.starts_with("mac") {
        // iPadOS reports MacIntel
        Some(&["mac os", "ios"])
    } else if lower.starts_with("iphone") || lower.starts_with("ipad") || lower.starts_with("ipod") {
        Some(&["ios"])
    } else if lower.starts_with("linux") || lower.contains("x11") {
        Some(&["linux", "android", "chrome os"])
    } else if lower.starts_with("android") {
        Some(&["android"])
    } else if lower.starts_with("cros") {
        Some(&["chrome os"])
    } else {
        None
    }
}

/// True if the User-Agent claims a graphical browser.
pub fn claims_browser(ua: &str) -> bool {
    ua.starts_with("Mozilla/") || ua.starts_with("Opera/")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_parse_chrome_mac() {
        let parsed = UserAgentParser::new().parse(CHROME_MAC);
        assert_eq!(parsed.browser.as_deref(), Some("Chrome"));
        assert_eq!(parsed.os.as_deref(), Some("Mac OS"));
    }

    #[test]
    fn test_parse_edge_windows() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
        let parsed = UserAgentParser::new().parse(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Edge"));
        assert_eq!(parsed.os.as_deref(), Some("Windows"));
    }

    #[test]
    fn test_parse_safari_iphone() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";
        let parsed = UserAgentParser::new().parse(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Safari"));
        assert_eq!(parsed.os.as_deref(), Some("iOS"));
    }

    #[test]
    fn test_parse_headless() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) HeadlessChrome/120.0.0.0 Safari/537.36";
        let parsed = UserAgentParser::new().parse(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Chrome"));
        assert_eq!(parsed.os.as_deref(), Some("Linux"));
    }

    #[test]
    fn test_parse_unknown() {
        let parsed = UserAgentParser::new().parse("curl/8.4.0");
        assert!(parsed.browser.is_none());
        assert!(parsed.os.is_none());
    }

    #[test]
    fn test_families() {
        assert_eq!(browser_family("Mobile Safari"), "safari");
        assert_eq!(browser_family("HeadlessChrome"), "chrome");
        assert_eq!(os_family("Mac OS X"), "mac os");
        assert_eq!(os_family("macOS"), "mac os");
        assert_eq!(os_family("Windows 10"), "windows");
        assert_eq!(os_family("Ubuntu"), "linux");
    }

    #[test]
    fn test_platform_families() {
        assert!(platform_families("Win32").unwrap().contains(&"windows"));
        assert!(platform_families("Linux armv8l").unwrap().contains(&"android"));
        assert!(!platform_families("MacIntel").unwrap().contains(&"windows"));
        assert!(platform_families("PlayStation 5").is_none());
    }

    #[test]
    fn test_version_extraction() {
        assert_eq!(UserAgentParser::extract_version("Chrome/120.0.0.0", "Chrome/"), Some(120));
        assert_eq!(UserAgentParser::extract_version("Safari/537.36", "Chrome/"), None);
    }
}
