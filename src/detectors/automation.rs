//! Automation signature detector.
//!
//! Looks for structural traces of browser-automation tooling in the snapshot:
//! - Driver flags and tool-specific globals or User-Agent tokens
//! - Missing browser API surface (plugins, languages, `window.chrome`)
//! - Disagreement between the client and server User-Agent parses
//! - Defaults typical of headless environments (timezone, CPUs, screen size)
//!
//! Scoring is additive. The webdriver flag is definitive: it marks the
//! snapshot automated whatever the total.

use super::fingerprint::is_generic_timezone;
use super::user_agent::{browser_family, claims_browser, os_family, platform_families, UserAgentParser};
use super::{DetectionContext, Detector};
use crate::rules::{Rule, RuleHit, ScoreSheet};
use crate::telemetry::{RequestMeta, TelemetrySnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const WEBDRIVER_SIGNAL: &str = "webdriver_flag";

/// Screen sizes that headless browsers and drivers report by default.
static HEADLESS_SCREENS: &[(u32, u32)] = &[(800, 600), (1024, 768), (640, 480), (400, 300), (0, 0)];

/// Where a tool marker is looked for.
enum MarkerSource {
    /// Global property names; a trailing `*` matches a prefix
    Global(&'static [&'static str]),
    /// Case-sensitive User-Agent substrings
    UserAgent(&'static [&'static str]),
}

struct ToolMarker {
    tool: &'static str,
    delta: i32,
    source: MarkerSource,
}

/// Known tool-specific markers.
static TOOL_MARKERS: &[ToolMarker] = &[
    ToolMarker {
        tool: "Selenium",
        delta: 30,
        source: MarkerSource::Global(&[
            "_selenium",
            "callSelenium",
            "_Selenium_IDE_Recorder",
            "__selenium_evaluate",
            "__selenium_unwrapped",
            "__webdriver_evaluate",
            "__webdriver_script_fn",
            "__webdriver_unwrapped",
            "__driver_evaluate",
            "__driver_unwrapped",
            "__fxdriver_evaluate",
            "__fxdriver_unwrapped",
            "cdc_*",
            "$cdc_*",
            "$wdc_*",
        ]),
    },
    ToolMarker {
        tool: "Puppeteer",
        delta: 30,
        source: MarkerSource::Global(&["__puppeteer_evaluation_script__", "puppeteer*"]),
    },
    ToolMarker {
        tool: "Playwright",
        delta: 30,
        source: MarkerSource::Global(&["__playwright*", "__pwInitScripts", "__pw_*"]),
    },
    ToolMarker {
        tool: "PhantomJS",
        delta: 30,
        source: MarkerSource::Global(&["_phantom", "callPhantom", "__phantomas", "phantom"]),
    },
    ToolMarker {
        tool: "PhantomJS",
        delta: 30,
        source: MarkerSource::UserAgent(&["PhantomJS"]),
    },
    ToolMarker {
        tool: "Nightmare",
        delta: 30,
        source: MarkerSource::Global(&["__nightmare", "nightmare"]),
    },
    ToolMarker {
        tool: "Headless Chrome",
        delta: 30,
        source: MarkerSource::UserAgent(&["HeadlessChrome"]),
    },
    ToolMarker {
        tool: "SlimerJS",
        delta: 30,
        source: MarkerSource::UserAgent(&["SlimerJS"]),
    },
    ToolMarker {
        tool: "Chrome Automation",
        delta: 25,
        source: MarkerSource::Global(&["domAutomation", "domAutomationController"]),
    },
    ToolMarker {
        tool: "Cypress",
        delta: 25,
        source: MarkerSource::Global(&["Cypress", "__cypress*"]),
    },
    ToolMarker {
        tool: "Awesomium",
        delta: 20,
        source: MarkerSource::Global(&["awesomium"]),
    },
    ToolMarker {
        tool: "Electron",
        delta: 15,
        source: MarkerSource::UserAgent(&["Electron/"]),
    },
    ToolMarker {
        tool: "Node.js",
        delta: 15,
        source: MarkerSource::Global(&["process", "Buffer", "emit", "spawn"]),
    },
];

fn marker_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => value == pattern,
    }
}

/// Facts the rule table is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct AutomationFacts {
    pub webdriver: bool,
    pub plugins_empty: bool,
    pub languages_empty: bool,
    pub chrome_runtime_incomplete: bool,
    pub browser_disagreement: bool,
    pub os_disagreement: bool,
    pub platform_mismatch: bool,
    pub generic_timezone: bool,
    pub low_cpu: bool,
    pub locale_header_missing: bool,
    pub user_agent_mismatch: bool,
    pub headless_screen: bool,
}

impl AutomationFacts {
    /// Derive the facts from the snapshot and the creation request.
    pub fn derive(snapshot: &TelemetrySnapshot, request: &RequestMeta) -> Self {
        let flags = &snapshot.automation;
        let client_ua = snapshot.user_agent.as_ref();
        let client_raw = client_ua.and_then(|ua| ua.raw.as_deref());
        let header_ua = request.user_agent();
        let server = header_ua
            .or(client_raw)
            .map(|ua| UserAgentParser::new().parse(ua))
            .unwrap_or_default();

        let client_browser = client_ua.and_then(|ua| ua.browser_name()).map(browser_family);
        let client_os = client_ua.and_then(|ua| ua.os_name()).map(os_family);
        let server_browser = server.browser.as_deref().map(browser_family);
        let server_os = server.os.as_deref().map(os_family);

        let claimed_browser = client_browser.clone().or_else(|| server_browser.clone());
        let claims_chrome = claimed_browser.as_deref() == Some("chrome")
            && client_os.as_deref().or(server_os.as_deref()) != Some("ios");

        let chrome_runtime_incomplete = claims_chrome
            && !flags.chrome_runtime.map(|c| c.is_complete()).unwrap_or(false);

        let platform_mismatch = match (
            snapshot.device.platform.as_deref(),
            client_os.as_deref().or(server_os.as_deref()),
        ) {
            (Some(platform), Some(os)) => {
                platform_families(platform).is_some_and(|families| !families.contains(&os))
            }
            _ => false,
        };

        let headless_screen = snapshot.device.screen_resolution.is_some_and(|res| {
            HEADLESS_SCREENS.contains(&(res.width, res.height))
                || res.aspect_ratio().is_some_and(|r| !(0.25..=4.0).contains(&r))
        });

        Self {
            webdriver: flags.webdriver == Some(true),
            plugins_empty: flags.plugins.as_ref().is_some_and(|p| p.is_empty()),
            languages_empty: flags.languages.as_ref().is_some_and(|l| l.is_empty()),
            chrome_runtime_incomplete,
            browser_disagreement: disagree(&client_browser, &server_browser),
            os_disagreement: disagree(&client_os, &server_os),
            platform_mismatch,
            generic_timezone: snapshot
                .device
                .timezone
                .as_deref()
                .is_some_and(is_generic_timezone),
            low_cpu: snapshot.hardware.hardware_concurrency.is_some_and(|n| n <= 2),
            locale_header_missing: header_ua.is_some_and(claims_browser)
                && !request.has_header("accept-language"),
            user_agent_mismatch: match (client_raw, header_ua) {
                (Some(client), Some(header)) => client.trim() != header.trim(),
                _ => false,
            },
            headless_screen,
        }
    }
}

fn disagree(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}

/// Additive automation rules.
pub static AUTOMATION_RULES: &[Rule<AutomationFacts>] = &[
    Rule {
        signal: WEBDRIVER_SIGNAL,
        delta: 30,
        predicate: |f| f.webdriver,
        message: "navigator.webdriver is set",
    },
    Rule {
        signal: "empty_plugins",
        delta: 10,
        predicate: |f| f.plugins_empty,
        message: "plugin list is empty",
    },
    Rule {
        signal: "empty_languages",
        delta: 10,
        predicate: |f| f.languages_empty,
        message: "language list is empty",
    },
    Rule {
        signal: "incomplete_chrome_runtime",
        delta: 15,
        predicate: |f| f.chrome_runtime_incomplete,
        message: "window.chrome is missing parts of its API surface",
    },
    Rule {
        signal: "browser_parse_mismatch",
        delta: 15,
        predicate: |f| f.browser_disagreement,
        message: "client and server disagree on the browser",
    },
    Rule {
        signal: "os_parse_mismatch",
        delta: 15,
        predicate: |f| f.os_disagreement,
        message: "client and server disagree on the operating system",
    },
    Rule {
        signal: "platform_mismatch",
        delta: 20,
        predicate: |f| f.platform_mismatch,
        message: "navigator.platform does not match the operating system",
    },
    Rule {
        signal: "generic_timezone",
        delta: 10,
        predicate: |f| f.generic_timezone,
        message: "timezone is a generic UTC alias",
    },
    Rule {
        signal: "low_cpu_count",
        delta: 10,
        predicate: |f| f.low_cpu,
        message: "two or fewer logical CPUs",
    },
    Rule {
        signal: "missing_locale_header",
        delta: 5,
        predicate: |f| f.locale_header_missing,
        message: "browser request without Accept-Language",
    },
    Rule {
        signal: "user_agent_mismatch",
        delta: 20,
        predicate: |f| f.user_agent_mismatch,
        message: "navigator.userAgent differs from the User-Agent header",
    },
    Rule {
        signal: "headless_screen",
        delta: 10,
        predicate: |f| f.headless_screen,
        message: "screen size is a headless default or has an extreme aspect ratio",
    },
];

/// Automation detector output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationAnalysis {
    pub score: u8,
    pub is_automated: bool,
    pub detected_tools: Vec<String>,
    pub anomalies: Vec<String>,
    pub signals: Vec<RuleHit>,
}

impl AutomationAnalysis {
    /// The webdriver flag fired together with at least one other signal.
    pub fn webdriver_corroborated(&self) -> bool {
        self.signals.iter().any(|h| h.signal == WEBDRIVER_SIGNAL) && self.signals.len() > 1
    }
}

/// Automation signature detector.
pub struct AutomationDetector {
    /// Score at which the snapshot counts as automated
    detection_threshold: u8,
}

impl AutomationDetector {
    pub fn new(detection_threshold: u8) -> Self {
        Self { detection_threshold }
    }

    /// Score a snapshot.
    pub fn inspect(&self, snapshot: &TelemetrySnapshot, request: &RequestMeta) -> AutomationAnalysis {
        let facts = AutomationFacts::derive(snapshot, request);
        let mut sheet = ScoreSheet::new(0);
        sheet.apply(AUTOMATION_RULES, &facts);

        let mut detected_tools: Vec<String> = Vec::new();
        if facts.webdriver {
            detected_tools.push("WebDriver".to_string());
        }

        let user_agents: Vec<&str> = [
            request.user_agent(),
            snapshot.user_agent.as_ref().and_then(|ua| ua.raw.as_deref()),
        ]
        .into_iter()
        .flatten()
        .collect();

        for marker in TOOL_MARKERS {
            if detected_tools.iter().any(|t| t == marker.tool) {
                continue;
            }
            let found = match &marker.source {
                MarkerSource::Global(names) => snapshot
                    .automation
                    .globals
                    .iter()
                    .find(|g| names.iter().any(|p| marker_matches(p, g)))
                    .map(|g| format!("global {}", g)),
                MarkerSource::UserAgent(tokens) => tokens
                    .iter()
                    .find(|t| user_agents.iter().any(|ua| ua.contains(*t)))
                    .map(|t| format!("user agent token {}", t)),
            };
            if let Some(evidence) = found {
                sheet.push(RuleHit::new(
                    format!("tool_{}", marker.tool.to_lowercase().replace([' ', '.'], "_")),
                    marker.delta,
                    format!("{} marker: {}", marker.tool, evidence),
                ));
                detected_tools.push(marker.tool.to_string());
            }
        }

        let score = sheet.score();
        let definitive = sheet.fired(WEBDRIVER_SIGNAL);
        let signals = sheet.into_hits();

        AutomationAnalysis {
            score,
            is_automated: definitive || score >= self.detection_threshold,
            detected_tools,
            // Every automation signal counts against the session
            anomalies: signals.iter().map(|h| h.message.clone()).collect(),
            signals,
        }
    }
}

impl Default for AutomationDetector {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait]
impl Detector for AutomationDetector {
    type Output = AutomationAnalysis;

    async fn analyze(&self, ctx: &DetectionContext) -> AutomationAnalysis {
        self.inspect(&ctx.snapshot, &ctx.request)
    }

    fn name(&self) -> &'static str {
        "automation_detector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{ChromeRuntime, NamedVersion, ParsedUserAgent, ScreenResolution};

    const CHROME_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn named(name: &str) -> Option<NamedVersion> {
        Some(NamedVersion {
            name: Some(name.to_string()),
            version: None,
        })
    }

    fn human_snapshot() -> TelemetrySnapshot {
        let mut s = TelemetrySnapshot::default();
        s.user_agent = Some(ParsedUserAgent {
            raw: Some(CHROME_WIN.to_string()),
            browser: named("Chrome"),
            os: named("Windows"),
            device: None,
        });
        s.device.platform = Some("Win32".into());
        s.device.timezone = Some("Europe/Berlin".into());
        s.device.screen_resolution = Some(ScreenResolution::new(1920, 1080));
        s.hardware.hardware_concurrency = Some(8);
        s.automation.webdriver = Some(false);
        s.automation.plugins = Some(vec!["PDF Viewer".into(), "Chrome PDF Viewer".into()]);
        s.automation.languages = Some(vec!["de-DE".into(), "en".into()]);
        s.automation.chrome_runtime = Some(ChromeRuntime {
            present: true,
            app: true,
            csi: true,
            load_times: true,
            runtime: true,
        });
        s
    }

    fn human_request() -> RequestMeta {
        RequestMeta::new(
            None,
            [("user-agent", CHROME_WIN), ("accept-language", "de-DE,de;q=0.9")],
        )
    }

    #[test]
    fn test_human_snapshot_scores_zero() {
        let result = AutomationDetector::default().inspect(&human_snapshot(), &human_request());
        assert_eq!(result.score, 0, "{:?}", result.signals);
        assert!(!result.is_automated);
        assert!(result.detected_tools.is_empty());
    }

    #[test]
    fn test_webdriver_is_definitive() {
        let mut snapshot = human_snapshot();
        snapshot.automation.webdriver = Some(true);
        let result = AutomationDetector::default().inspect(&snapshot, &human_request());
        assert_eq!(result.score, 30);
        assert!(result.is_automated);
        assert_eq!(result.detected_tools, vec!["WebDriver".to_string()]);
    }

    #[test]
    fn test_headless_chrome_profile() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) HeadlessChrome/120.0.0.0 Safari/537.36";
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.user_agent = Some(ParsedUserAgent {
            raw: Some(ua.to_string()),
            browser: named("Chrome Headless"),
            os: named("Linux"),
            device: None,
        });
        snapshot.automation.webdriver = Some(true);
        snapshot.automation.plugins = Some(vec![]);
        snapshot.automation.languages = Some(vec![]);
        snapshot.device.timezone = Some("UTC".into());
        snapshot.device.screen_resolution = Some(ScreenResolution::new(800, 600));
        snapshot.hardware.hardware_concurrency = Some(2);
        let request = RequestMeta::new(None, [("user-agent", ua)]);

        let result = AutomationDetector::default().inspect(&snapshot, &request);
        assert_eq!(result.score, 100);
        assert!(result.is_automated);
        assert!(result.detected_tools.contains(&"Headless Chrome".to_string()));
        assert!(result.detected_tools.contains(&"WebDriver".to_string()));
    }

    #[test]
    fn test_webdriver_corroboration() {
        let mut snapshot = human_snapshot();
        snapshot.automation.webdriver = Some(true);
        let alone = AutomationDetector::default().inspect(&snapshot, &human_request());
        assert!(!alone.webdriver_corroborated());

        snapshot.automation.plugins = Some(vec![]);
        let with_plugins = AutomationDetector::default().inspect(&snapshot, &human_request());
        assert_eq!(with_plugins.score, 40);
        assert!(with_plugins.webdriver_corroborated());

        snapshot.automation.webdriver = Some(false);
        let without_flag = AutomationDetector::default().inspect(&snapshot, &human_request());
        assert!(!without_flag.webdriver_corroborated());
    }

    #[test]
    fn test_global_markers_add_tools_once() {
        let mut snapshot = human_snapshot();
        snapshot.automation.globals = vec![
            "cdc_adoQpoasnfa76pfcZLmcfl_Array".into(),
            "__webdriver_evaluate".into(),
            "__nightmare".into(),
        ];
        let result = AutomationDetector::default().inspect(&snapshot, &human_request());
        assert_eq!(result.detected_tools, vec!["Selenium".to_string(), "Nightmare".to_string()]);
        assert_eq!(result.score, 60);
        assert!(result.is_automated);
    }

    #[test]
    fn test_parser_disagreement_and_platform() {
        let mut snapshot = human_snapshot();
        snapshot.user_agent.as_mut().unwrap().browser = named("Firefox");
        snapshot.user_agent.as_mut().unwrap().os = named("Mac OS X");
        let result = AutomationDetector::default().inspect(&snapshot, &human_request());
        let signals: Vec<_> = result.signals.iter().map(|h| h.signal.as_str()).collect();
        assert!(signals.contains(&"browser_parse_mismatch"));
        assert!(signals.contains(&"os_parse_mismatch"));
        // Win32 platform against a Mac OS claim
        assert!(signals.contains(&"platform_mismatch"));
    }

    #[test]
    fn test_transport_user_agent_mismatch() {
        let request = RequestMeta::new(
            None,
            [("user-agent", "python-requests/2.31"), ("accept-language", "en")],
        );
        let result = AutomationDetector::default().inspect(&human_snapshot(), &request);
        assert!(result.signals.iter().any(|h| h.signal == "user_agent_mismatch"));
    }

    #[test]
    fn test_missing_locale_header() {
        let request = RequestMeta::new(None, [("user-agent", CHROME_WIN)]);
        let result = AutomationDetector::default().inspect(&human_snapshot(), &request);
        assert_eq!(result.score, 5);
    }

    #[test]
    fn test_empty_snapshot_is_not_automated() {
        let result = AutomationDetector::default()
            .inspect(&TelemetrySnapshot::default(), &RequestMeta::default());
        assert_eq!(result.score, 0);
        assert!(!result.is_automated);
    }

    #[test]
    fn test_extreme_aspect_ratio() {
        let mut snapshot = human_snapshot();
        snapshot.device.screen_resolution = Some(ScreenResolution::new(5000, 300));
        let result = AutomationDetector::default().inspect(&snapshot, &human_request());
        assert!(result.signals.iter().any(|h| h.signal == "headless_screen"));
    }

    #[tokio::test]
    async fn test_detector_trait() {
        let detector = AutomationDetector::default();
        let ctx = DetectionContext::new(human_snapshot(), human_request());
        assert_eq!(detector.analyze(&ctx).await.score, 0);
        assert_eq!(detector.name(), "automation_detector");
    }
}
