//! Fingerprint consistency analyzer.
//!
//! Starts from a neutral 50 and moves the score up or down per component:
//! presence and length of the canvas/WebGL/audio fingerprints, denylisted
//! values from automation environments, font coverage, plugin count, screen
//! and hardware plausibility, timezone coherence and touch support.
//!
//! The analyzer also derives a stable identity hash over the full component
//! set. The hash is for tracking and deduplication only and does not affect
//! the score.

use super::{DetectionContext, Detector};
use crate::rules::{Rule, RuleHit, ScoreSheet};
use crate::telemetry::{
    Capabilities, DeviceInfo, FingerprintComponents, HardwareInfo, TelemetrySnapshot,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

const BASE_SCORE: i32 = 50;

/// Fingerprints shorter than this are truncated or stubbed.
const MIN_FINGERPRINT_LEN: usize = 16;

/// Allowed distance between the declared offset and the table entry (DST).
const OFFSET_TOLERANCE_MINUTES: i32 = 60;

/// Canvas and audio values produced by blank or stubbed rendering.
static FINGERPRINT_DENYLIST: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        // sha256("")
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        // md5("")
        "d41d8cd98f00b204e9800998ecf8427e",
        "0",
        "null",
        "undefined",
        "data:,",
    ])
});

/// WebGL vendor/renderer substrings of software rasterizers and VMs.
static SOFTWARE_RENDERERS: &[&str] = &[
    "swiftshader",
    "llvmpipe",
    "softpipe",
    "mesa offscreen",
    "basic render driver",
    "vmware svga",
    "virtualbox",
    "parallels display",
    "brian paul",
];

/// Fonts installed on nearly every desktop.
static COMMON_FONTS: &[&str] = &[
    "arial",
    "arial black",
    "calibri",
    "cambria",
    "comic sans ms",
    "courier new",
    "georgia",
    "helvetica",
    "impact",
    "lucida grande",
    "menlo",
    "monaco",
    "palatino",
    "segoe ui",
    "tahoma",
    "times new roman",
    "trebuchet ms",
    "verdana",
    "roboto",
    "dejavu sans",
    "liberation sans",
    "noto sans",
    "ubuntu",
];

const MIN_COMMON_FONTS: usize = 3;

/// Timezone aliases that carry no location.
static GENERIC_TIMEZONES: &[&str] = &[
    "utc",
    "gmt",
    "uct",
    "zulu",
    "universal",
    "greenwich",
    "gmt0",
    "gmt+0",
    "gmt-0",
    "etc/utc",
    "etc/gmt",
    "etc/uct",
    "etc/zulu",
    "etc/universal",
    "etc/greenwich",
    "etc/gmt0",
    "etc/gmt+0",
    "etc/gmt-0",
];

/// True for timezone names that are generic UTC aliases.
pub fn is_generic_timezone(tz: &str) -> bool {
    GENERIC_TIMEZONES.contains(&tz.trim().to_lowercase().as_str())
}

/// Standard-time offsets in browser convention (UTC minus local, minutes).
static TIMEZONE_OFFSETS: LazyLock<HashMap<&'static str, i32>> = LazyLock::new(|| {
    HashMap::from([
        ("America/New_York", 300),
        ("America/Detroit", 300),
        ("America/Toronto", 300),
        ("America/Chicago", 360),
        ("America/Mexico_City", 360),
        ("America/Denver", 420),
        ("America/Phoenix", 420),
        ("America/Los_Angeles", 480),
        ("America/Vancouver", 480),
        ("America/Anchorage", 540),
        ("Pacific/Honolulu", 600),
        ("America/Bogota", 300),
        ("America/Lima", 300),
        ("America/Santiago", 240),
        ("America/Sao_Paulo", 180),
        ("America/Argentina/Buenos_Aires", 180),
        ("Europe/London", 0),
        ("Europe/Dublin", 0),
        ("Europe/Lisbon", 0),
        ("Europe/Paris", -60),
        ("Europe/Berlin", -60),
        ("Europe/Madrid", -60),
        ("Europe/Rome", -60),
        ("Europe/Amsterdam", -60),
        ("Europe/Brussels", -60),
        ("Europe/Vienna", -60),
        ("Europe/Zurich", -60),
        ("Europe/Stockholm", -60),
        ("Europe/Oslo", -60),
        ("Europe/Copenhagen", -60),
        ("Europe/Warsaw", -60),
        ("Europe/Prague", -60),
        ("Europe/Budapest", -60),
        ("Africa/Lagos", -60),
        ("Europe/Athens", -120),
        ("Europe/Helsinki", -120),
        ("Europe/Kiev", -120),
        ("Europe/Kyiv", -120),
        ("Europe/Bucharest", -120),
        ("Africa/Cairo", -120),
        ("Africa/Johannesburg", -120),
        ("Europe/Istanbul", -180),
        ("Europe/Moscow", -180),
        ("Africa/Nairobi", -180),
        ("Asia/Dubai", -240),
        ("Asia/Karachi", -300),
        ("Asia/Kolkata", -330),
        ("Asia/Calcutta", -330),
        ("Asia/Dhaka", -360),
        ("Asia/Bangkok", -420),
        ("Asia/Jakarta", -420),
        ("Asia/Ho_Chi_Minh", -420),
        ("Asia/Singapore", -480),
        ("Asia/Shanghai", -480),
        ("Asia/Hong_Kong", -480),
        ("Asia/Taipei", -480),
        ("Asia/Manila", -480),
        ("Australia/Perth", -480),
        ("Asia/Seoul", -540),
        ("Asia/Tokyo", -540),
        ("Australia/Adelaide", -570),
        ("Australia/Brisbane", -600),
        ("Australia/Sydney", -600),
        ("Australia/Melbourne", -600),
        ("Pacific/Auckland", -720),
    ])
});

/// Expected standard-time offset for a timezone, if the table knows it.
pub fn expected_offset(tz: &str) -> Option<i32> {
    TIMEZONE_OFFSETS.get(tz).copied()
}

fn usable(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn missing(value: &Option<String>) -> bool {
    usable(value).is_none()
}

fn long_enough(value: &Option<String>) -> Option<&str> {
    usable(value).filter(|v| v.len() >= MIN_FINGERPRINT_LEN)
}

fn denylisted(value: &Option<String>) -> bool {
    usable(value).is_some_and(|v| FINGERPRINT_DENYLIST.contains(v))
}

fn software_renderer(c: &FingerprintComponents) -> bool {
    [&c.webgl_vendor, &c.webgl_renderer].iter().any(|v| {
        usable(v).is_some_and(|v| {
            let lower = v.to_lowercase();
            SOFTWARE_RENDERERS.iter().any(|s| lower.contains(s))
        })
    })
}

fn common_font_count(fonts: &[String]) -> usize {
    fonts
        .iter()
        .filter(|f| COMMON_FONTS.contains(&f.trim().to_lowercase().as_str()))
        .count()
}

fn offset_delta(d: &DeviceInfo) -> Option<i32> {
    let tz = usable(&d.timezone)?;
    let expected = expected_offset(tz)?;
    Some((d.timezone_offset? - expected).abs())
}

fn touch_consistent(c: &Capabilities) -> Option<bool> {
    let touch = c.touch_support?;
    let points = c.max_touch_points.unwrap_or(0);
    Some(touch == (points > 0))
}

/// Per-component fingerprint rules, evaluated against the snapshot.
pub static FINGERPRINT_RULES: &[Rule<TelemetrySnapshot>] = &[
    // canvas
    Rule {
        signal: "missing_canvas",
        delta: -10,
        predicate: |s| missing(&s.components.canvas),
        message: "canvas fingerprint missing",
    },
    Rule {
        signal: "short_canvas",
        delta: -10,
        predicate: |s| {
            !missing(&s.components.canvas)
                && long_enough(&s.components.canvas).is_none()
                && !denylisted(&s.components.canvas)
        },
        message: "canvas fingerprint too short",
    },
    Rule {
        signal: "denylisted_canvas",
        delta: -20,
        predicate: |s| denylisted(&s.components.canvas),
        message: "canvas fingerprint matches a known automation signature",
    },
    Rule {
        signal: "canvas_present",
        delta: 10,
        predicate: |s| long_enough(&s.components.canvas).is_some() && !denylisted(&s.components.canvas),
        message: "canvas fingerprint present",
    },
    // webgl
    Rule {
        signal: "missing_webgl",
        delta: -10,
        predicate: |s| missing(&s.components.webgl),
        message: "WebGL fingerprint missing",
    },
    Rule {
        signal: "short_webgl",
        delta: -5,
        predicate: |s| !missing(&s.components.webgl) && long_enough(&s.components.webgl).is_none(),
        message: "WebGL fingerprint too short",
    },
    Rule {
        signal: "webgl_present",
        delta: 5,
        predicate: |s| long_enough(&s.components.webgl).is_some(),
        message: "WebGL fingerprint present",
    },
    Rule {
        signal: "missing_webgl_vendor",
        delta: -5,
        predicate: |s| missing(&s.components.webgl_vendor) && missing(&s.components.webgl_renderer),
        message: "WebGL vendor and renderer missing",
    },
    Rule {
        signal: "software_renderer",
        delta: -20,
        predicate: |s| software_renderer(&s.components),
        message: "WebGL renderer is a software rasterizer or virtual GPU",
    },
    // audio
    Rule {
        signal: "missing_audio",
        delta: -10,
        predicate: |s| missing(&s.components.audio),
        message: "audio fingerprint missing",
    },
    Rule {
        signal: "short_audio",
        delta: -5,
        predicate: |s| !missing(&s.components.audio) && long_enough(&s.components.audio).is_none() && !denylisted(&s.components.audio),
        message: "audio fingerprint too short",
    },
    Rule {
        signal: "denylisted_audio",
        delta: -15,
        predicate: |s| denylisted(&s.components.audio),
        message: "audio fingerprint matches a known automation signature",
    },
    Rule {
        signal: "audio_present",
        delta: 5,
        predicate: |s| long_enough(&s.components.audio).is_some() && !denylisted(&s.components.audio),
        message: "audio fingerprint present",
    },
    // fonts
    Rule {
        signal: "missing_fonts",
        delta: -10,
        predicate: |s| s.components.fonts.is_none(),
        message: "font list missing",
    },
    Rule {
        signal: "few_fonts",
        delta: -15,
        predicate: |s| s.components.fonts.as_ref().is_some_and(|f| f.len() < 5),
        message: "fewer than 5 fonts installed",
    },
    Rule {
        signal: "rich_fonts",
        delta: 10,
        predicate: |s| s.components.fonts.as_ref().is_some_and(|f| f.len() >= 20),
        message: "20 or more fonts installed",
    },
    Rule {
        signal: "common_fonts_absent",
        delta: -5,
        predicate: |s| {
            s.components
                .fonts
                .as_ref()
                .is_some_and(|f| f.len() >= 5 && common_font_count(f) < MIN_COMMON_FONTS)
        },
        message: "few common system fonts",
    },
    Rule {
        signal: "common_fonts_present",
        delta: 5,
        predicate: |s| {
            s.components
                .fonts
                .as_ref()
                .is_some_and(|f| common_font_count(f) >= MIN_COMMON_FONTS)
        },
        message: "common system fonts present",
    },
    // plugins
    Rule {
        signal: "missing_plugins",
        delta: -5,
        predicate: |s| s.automation.plugins.is_none(),
        message: "plugin list missing",
    },
    Rule {
        signal: "no_plugins",
        delta: -10,
        predicate: |s| s.automation.plugins.as_ref().is_some_and(|p| p.is_empty()),
        message: "no plugins",
    },
    Rule {
        signal: "plugins_present",
        delta: 5,
        predicate: |s| s.automation.plugins.as_ref().is_some_and(|p| p.len() >= 3),
        message: "three or more plugins",
    },
    // screen
    Rule {
        signal: "missing_screen",
        delta: -10,
        predicate: |s| s.device.screen_resolution.is_none(),
        message: "screen resolution missing",
    },
    Rule {
        signal: "screen_too_small",
        delta: -15,
        predicate: |s| s.device.screen_resolution.is_some_and(|r| r.width < 320 || r.height < 240),
        message: "screen smaller than 320x240",
    },
    Rule {
        signal: "screen_plausible",
        delta: 5,
        predicate: |s| s.device.screen_resolution.is_some_and(|r| r.width >= 320 && r.height >= 240),
        message: "screen resolution plausible",
    },
    Rule {
        signal: "missing_color_depth",
        delta: -5,
        predicate: |s| s.device.color_depth.is_none(),
        message: "color depth missing",
    },
    Rule {
        signal: "low_color_depth",
        delta: -10,
        predicate: |s| s.device.color_depth.is_some_and(|d| d < 24),
        message: "color depth below 24 bits",
    },
    Rule {
        signal: "color_depth_plausible",
        delta: 5,
        predicate: |s| s.device.color_depth.is_some_and(|d| d >= 24),
        message: "color depth plausible",
    },
    Rule {
        signal: "missing_pixel_ratio",
        delta: -5,
        predicate: |s| s.device.pixel_ratio.is_none(),
        message: "pixel ratio missing",
    },
    Rule {
        signal: "implausible_pixel_ratio",
        delta: -10,
        predicate: |s| s.device.pixel_ratio.is_some_and(|r| !(1.0..=5.0).contains(&r)),
        message: "pixel ratio outside 1-5",
    },
    Rule {
        signal: "pixel_ratio_plausible",
        delta: 5,
        predicate: |s| s.device.pixel_ratio.is_some_and(|r| (1.0..=5.0).contains(&r)),
        message: "pixel ratio plausible",
    },
    // hardware
    Rule {
        signal: "missing_hardware_concurrency",
        delta: -5,
        predicate: |s| s.hardware.hardware_concurrency.is_none(),
        message: "CPU count missing",
    },
    Rule {
        signal: "implausible_hardware_concurrency",
        delta: -10,
        predicate: |s| s.hardware.hardware_concurrency.is_some_and(|n| !(2..=16).contains(&n)),
        message: "CPU count outside 2-16",
    },
    Rule {
        signal: "hardware_concurrency_plausible",
        delta: 5,
        predicate: |s| s.hardware.hardware_concurrency.is_some_and(|n| (2..=16).contains(&n)),
        message: "CPU count plausible",
    },
    // timezone
    Rule {
        signal: "missing_timezone",
        delta: -10,
        predicate: |s| missing(&s.device.timezone),
        message: "timezone missing",
    },
    Rule {
        signal: "generic_timezone",
        delta: -10,
        predicate: |s| usable(&s.device.timezone).is_some_and(is_generic_timezone),
        message: "timezone is a generic UTC alias",
    },
    Rule {
        signal: "timezone_offset_mismatch",
        delta: -15,
        predicate: |s| offset_delta(&s.device).is_some_and(|d| d > OFFSET_TOLERANCE_MINUTES),
        message: "timezone offset does not match the timezone",
    },
    Rule {
        signal: "timezone_offset_consistent",
        delta: 5,
        predicate: |s| offset_delta(&s.device).is_some_and(|d| d <= OFFSET_TOLERANCE_MINUTES),
        message: "timezone offset matches the timezone",
    },
    // touch
    Rule {
        signal: "missing_touch_support",
        delta: -5,
        predicate: |s| s.capabilities.touch_support.is_none(),
        message: "touch support missing",
    },
    Rule {
        signal: "touch_inconsistent",
        delta: -10,
        predicate: |s| touch_consistent(&s.capabilities) == Some(false),
        message: "touch support disagrees with max touch points",
    },
    Rule {
        signal: "touch_consistent",
        delta: 5,
        predicate: |s| touch_consistent(&s.capabilities) == Some(true),
        message: "touch support consistent",
    },
];

/// Material the identity hash is computed over, in a fixed field order.
#[derive(Serialize)]
struct IdentityMaterial<'a> {
    components: &'a FingerprintComponents,
    device: &'a DeviceInfo,
    hardware: &'a HardwareInfo,
    capabilities: &'a Capabilities,
    user_agent: Option<&'a str>,
    plugins: Option<&'a Vec<String>>,
}

/// SHA-256 (hex) over the canonical JSON form of the component set.
pub fn identity_hash(snapshot: &TelemetrySnapshot) -> String {
    let material = IdentityMaterial {
        components: &snapshot.components,
        device: &snapshot.device,
        hardware: &snapshot.hardware,
        capabilities: &snapshot.capabilities,
        user_agent: snapshot.user_agent.as_ref().and_then(|ua| ua.raw.as_deref()),
        plugins: snapshot.automation.plugins.as_ref(),
    };
    // Serializing plain structs and vectors cannot fail
    let canonical = serde_json::to_vec(&material).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Fingerprint analyzer output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintAnalysis {
    pub score: u8,
    pub fingerprint_id: String,
    pub anomalies: Vec<String>,
    pub signals: Vec<RuleHit>,
    pub font_count: Option<usize>,
    pub common_font_count: Option<usize>,
}

/// Fingerprint consistency analyzer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FingerprintAnalyzer;

impl FingerprintAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Score a snapshot.
    pub fn inspect(&self, snapshot: &TelemetrySnapshot) -> FingerprintAnalysis {
        let mut sheet = ScoreSheet::new(BASE_SCORE);
        sheet.apply(FINGERPRINT_RULES, snapshot);

        let fonts = snapshot.components.fonts.as_deref();
        FingerprintAnalysis {
            score: sheet.score(),
            fingerprint_id: identity_hash(snapshot),
            anomalies: sheet.anomalies(),
            signals: sheet.into_hits(),
            font_count: fonts.map(|f| f.len()),
            common_font_count: fonts.map(common_font_count),
        }
    }
}

#[async_trait]
impl Detector for FingerprintAnalyzer {
    type Output = FingerprintAnalysis;

    async fn analyze(&self, ctx: &DetectionContext) -> FingerprintAnalysis {
        self.inspect(&ctx.snapshot)
    }

    fn name(&self) -> &'static str {
        "fingerprint_analyzer"
    }
}
