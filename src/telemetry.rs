//! Client telemetry consumed by the detectors.
//!
//! The snapshot is reported once by the browser-side collector when a session
//! is opened. Every field is optional: a value the collector could not obtain
//! is `None`, which the detectors score as its own condition rather than
//! treating it as `false` or zero.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// One-time device/browser/network descriptor for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub network: Option<NetworkOrigin>,
    pub user_agent: Option<ParsedUserAgent>,
    pub components: FingerprintComponents,
    pub device: DeviceInfo,
    pub hardware: HardwareInfo,
    pub capabilities: Capabilities,
    pub automation: AutomationFlags,
}

/// Network origin as declared by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkOrigin {
    pub ip: Option<IpAddr>,
    /// Proxy-related headers the collector saw on its own page request
    pub proxy_headers: Vec<String>,
}

/// User agent as parsed on the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParsedUserAgent {
    /// `navigator.userAgent`
    pub raw: Option<String>,
    pub browser: Option<NamedVersion>,
    pub os: Option<NamedVersion>,
    pub device: Option<DeviceModel>,
}

impl ParsedUserAgent {
    pub fn browser_name(&self) -> Option<&str> {
        self.browser.as_ref().and_then(|b| b.name.as_deref())
    }

    pub fn os_name(&self) -> Option<&str> {
        self.os.as_ref().and_then(|o| o.name.as_deref())
    }

    /// A parse is complete when both browser and OS names are known.
    pub fn is_complete(&self) -> bool {
        self.browser_name().is_some_and(|n| !n.is_empty())
            && self.os_name().is_some_and(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedVersion {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceModel {
    pub vendor: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Canonical fingerprint material.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FingerprintComponents {
    pub basic: Option<String>,
    pub canvas: Option<String>,
    pub webgl: Option<String>,
    pub webgl_vendor: Option<String>,
    pub webgl_renderer: Option<String>,
    pub audio: Option<String>,
    pub fonts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenResolution {
    pub width: u32,
    pub height: u32,
}

impl ScreenResolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; `None` for a zero height.
    pub fn aspect_ratio(&self) -> Option<f64> {
        (self.height > 0).then(|| self.width as f64 / self.height as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    pub screen_resolution: Option<ScreenResolution>,
    pub color_depth: Option<u32>,
    pub pixel_ratio: Option<f64>,
    pub timezone: Option<String>,
    /// Browser convention: minutes to add to local time to get UTC
    pub timezone_offset: Option<i32>,
    pub language: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HardwareInfo {
    pub hardware_concurrency: Option<u32>,
    pub device_memory: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Capabilities {
    pub touch_support: Option<bool>,
    pub max_touch_points: Option<u32>,
    pub cookies_enabled: Option<bool>,
    pub local_storage: Option<bool>,
    pub session_storage: Option<bool>,
    pub indexed_db: Option<bool>,
    pub ad_blocker: Option<bool>,
}

/// Automation-related facts reported by the collector itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationFlags {
    /// `navigator.webdriver`
    pub webdriver: Option<bool>,
    /// `navigator.plugins` names
    pub plugins: Option<Vec<String>>,
    /// `navigator.languages`
    pub languages: Option<Vec<String>>,
    /// Global property names the collector found on `window`/`document`
    pub globals: Vec<String>,
    /// Shape of the `window.chrome` object
    pub chrome_runtime: Option<ChromeRuntime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChromeRuntime {
    pub present: bool,
    pub app: bool,
    pub csi: bool,
    pub load_times: bool,
    pub runtime: bool,
}

impl ChromeRuntime {
    /// Real Chrome exposes all of these on `window.chrome`.
    pub fn is_complete(&self) -> bool {
        self.present && self.app && self.csi && self.load_times && self.runtime
    }
}

/// What the transport layer observed on the session-creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestMeta {
    pub remote_addr: Option<IpAddr>,
    /// Request headers (lowercase keys)
    #[serde(deserialize_with = "lowercase_headers")]
    pub headers: HashMap<String, Vec<String>>,
    pub tls: Option<TlsInfo>,
}

impl RequestMeta {
    /// Build request metadata, lowercasing header names.
    pub fn new<I, K, V>(remote_addr: Option<IpAddr>, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in headers {
            map.entry(k.as_ref().to_lowercase())
                .or_default()
                .push(v.into());
        }
        Self {
            remote_addr,
            headers: map,
            tls: None,
        }
    }

    pub fn with_tls(mut self, version: impl Into<String>, cipher: impl Into<String>) -> Self {
        self.tls = Some(TlsInfo {
            version: version.into(),
            cipher: cipher.into(),
        });
        self
    }

    /// Get a single header value (first if multiple).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_lowercase())
    }

    /// Get the User-Agent header.
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }
}

/// A header given as one string or as a list of values.
#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

/// Header maps arrive with whatever casing the transport used; lookups are
/// by lowercase name, so keys are folded here and values of duplicate names
/// merged.
fn lowercase_headers<'de, D>(deserializer: D) -> Result<HashMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, HeaderValues>::deserialize(deserializer)?;
    let mut headers: HashMap<String, Vec<String>> = HashMap::with_capacity(raw.len());
    for (name, values) in raw {
        let entry = headers.entry(name.to_lowercase()).or_default();
        match values {
            HeaderValues::One(value) => entry.push(value),
            HeaderValues::Many(values) => entry.extend(values),
        }
    }
    Ok(headers)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsInfo {
    pub version: String,
    pub cipher: String,
}

/// Interaction event type.
///
/// Types outside the fixed vocabulary are kept verbatim so that the event log
/// stays faithful to what the client sent; analyzers skip them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PointerMove,
    Click,
    KeyPress,
    Scroll,
    TouchStart,
    TouchMove,
    TouchEnd,
    VisibilityChange,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PointerMove => "pointer_move",
            EventKind::Click => "click",
            EventKind::KeyPress => "key_press",
            EventKind::Scroll => "scroll",
            EventKind::TouchStart => "touch_start",
            EventKind::TouchMove => "touch_move",
            EventKind::TouchEnd => "touch_end",
            EventKind::VisibilityChange => "visibility_change",
            EventKind::Other(name) => name,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pointer_move" | "mousemove" => EventKind::PointerMove,
            "click" => EventKind::Click,
            "key_press" | "keypress" | "keydown" => EventKind::KeyPress,
            "scroll" => EventKind::Scroll,
            "touch_start" | "touchstart" => EventKind::TouchStart,
            "touch_move" | "touchmove" => EventKind::TouchMove,
            "touch_end" | "touchend" => EventKind::TouchEnd,
            "visibility_change" | "visibilitychange" => EventKind::VisibilityChange,
            _ => EventKind::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-interaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Milliseconds, client clock
    #[serde(deserialize_with = "rounded_millis")]
    pub timestamp: u64,
}

/// Collectors report `performance.now()`-style fractional milliseconds.
fn rounded_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = f64::deserialize(deserializer)?;
    Ok(ms.round().max(0.0) as u64)
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value, timestamp: u64) -> Self {
        Self {
            kind,
            payload,
            timestamp,
        }
    }

    pub fn pointer_move(x: f64, y: f64, timestamp: u64) -> Self {
        Self::new(EventKind::PointerMove, serde_json::json!({ "x": x, "y": y }), timestamp)
    }

    pub fn click(x: f64, y: f64, timestamp: u64) -> Self {
        Self::new(EventKind::Click, serde_json::json!({ "x": x, "y": y }), timestamp)
    }

    pub fn key_press(timestamp: u64) -> Self {
        Self::new(EventKind::KeyPress, serde_json::Value::Null, timestamp)
    }

    /// The `(x, y)` carried by the payload, if any.
    pub fn point(&self) -> Option<(f64, f64)> {
        let x = self.payload.get("x")?.as_f64()?;
        let y = self.payload.get("y")?.as_f64()?;
        Some((x, y))
    }

    pub fn is(&self, kind: &EventKind) -> bool {
        &self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_absent_fields() {
        let snapshot: TelemetrySnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot, TelemetrySnapshot::default());
        assert!(snapshot.device.timezone.is_none());
        assert!(snapshot.automation.webdriver.is_none());
    }

    #[test]
    fn test_snapshot_camel_case() {
        let json = r#"{
            "device": { "screenResolution": { "width": 1920, "height": 1080 }, "timezoneOffset": -60 },
            "capabilities": { "touchSupport": false, "maxTouchPoints": 0 },
            "automation": { "webdriver": false, "chromeRuntime": { "present": true } }
        }"#;
        let snapshot: TelemetrySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.device.screen_resolution, Some(ScreenResolution::new(1920, 1080)));
        assert_eq!(snapshot.device.timezone_offset, Some(-60));
        assert_eq!(snapshot.capabilities.touch_support, Some(false));
        assert_eq!(snapshot.automation.webdriver, Some(false));
        assert!(!snapshot.automation.chrome_runtime.unwrap().is_complete());
    }

    #[test]
    fn test_event_kind_vocabulary() {
        let ev: Event = serde_json::from_str(r#"{"type":"pointer_move","payload":{"x":1,"y":2},"timestamp":5}"#).unwrap();
        assert_eq!(ev.kind, EventKind::PointerMove);
        assert_eq!(ev.point(), Some((1.0, 2.0)));

        let ev: Event = serde_json::from_str(r#"{"type":"gamepad","timestamp":9}"#).unwrap();
        assert_eq!(ev.kind, EventKind::Other("gamepad".to_string()));
        assert!(ev.point().is_none());
        assert_eq!(serde_json::to_value(&ev).unwrap()["type"], "gamepad");
    }

    #[test]
    fn test_request_meta_headers() {
        let meta = RequestMeta::new(None, [("User-Agent", "Mozilla/5.0"), ("Accept", "text/html")]);
        assert_eq!(meta.user_agent(), Some("Mozilla/5.0"));
        assert!(meta.has_header("ACCEPT"));
        assert!(!meta.has_header("accept-language"));
    }

    #[test]
    fn test_fractional_timestamps() {
        let ev: Event =
            serde_json::from_str(r#"{"type":"pointer_move","payload":{"x":3,"y":4},"timestamp":1234.56}"#).unwrap();
        assert_eq!(ev.timestamp, 1235);

        let json = serde_json::to_string(&ev).unwrap();
        let again: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(again, ev);

        let ev: Event = serde_json::from_str(r#"{"type":"click","timestamp":-3.2}"#).unwrap();
        assert_eq!(ev.timestamp, 0);
        assert!(serde_json::from_str::<Event>(r#"{"type":"click","timestamp":"soon"}"#).is_err());
    }

    #[test]
    fn test_deserialized_headers_are_lowercased() {
        let json = r#"{
            "remote_addr": "203.0.113.9",
            "headers": {
                "User-Agent": ["Mozilla/5.0"],
                "Accept-Language": "en-US",
                "X-Forwarded-For": ["198.51.100.1"],
                "x-forwarded-for": ["198.51.100.2"]
            }
        }"#;
        let meta: RequestMeta = serde_json::from_str(json).unwrap();

        assert_eq!(meta.user_agent(), Some("Mozilla/5.0"));
        assert!(meta.has_header("accept-language"));
        assert_eq!(meta.header("Accept-Language"), Some("en-US"));
        assert!(meta.headers.keys().all(|k| k == &k.to_lowercase()));
        assert_eq!(meta.headers["x-forwarded-for"].len(), 2);
    }

    #[test]
    fn test_user_agent_completeness() {
        let mut ua = ParsedUserAgent::default();
        assert!(!ua.is_complete());
        ua.browser = Some(NamedVersion { name: Some("Chrome".into()), version: None });
        ua.os = Some(NamedVersion { name: Some("Windows".into()), version: None });
        assert!(ua.is_complete());
    }
}
