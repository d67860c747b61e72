//! Loose caller options → [`ConversionConfig`].
//!
//! Options arrive as a JSON object from forms and scripts, so every setting
//! accepts several spellings and both numbers and numeric strings. Nothing
//! here fails: a value that does not parse is skipped in favour of the next
//! spelling, then the default.

use crate::config::ConversionConfig;
use serde_json::{Map, Value};

const PAGE_WIDTH_KEYS: &[&str] = &["page_width_in", "pageWidth", "pageWidthInches", "page_width"];
const PAGE_HEIGHT_KEYS: &[&str] = &[
    "page_height_in",
    "pageHeight",
    "pageHeightInches",
    "page_height",
];
const DPI_KEYS: &[&str] = &["dpi", "DPI", "resolution"];
const MAX_SCALE_KEYS: &[&str] = &["max_scale", "maxScale"];
const SCALE_UP_KEYS: &[&str] = &["allow_scale_up", "allowScaleUp"];
const SCALE_KEYS: &[&str] = &["scale"];
const MARGIN_MM_KEY: &str = "margin";
const MARGIN_IN_KEYS: &[&str] = &["margin_in", "marginInches"];
const BACKGROUND_KEYS: &[&str] = &["background", "background_color"];

const MM_PER_INCH: f64 = 25.4;

/// Build a conversion config from caller options, defaulting anything absent
/// or unparseable.
///
/// ```rust
/// use newsletter_store::options::conversion_config_from_options;
/// use serde_json::json;
///
/// let opts = json!({"pageWidth": "11", "DPI": 300, "margin": 10, "background": "#f00"});
/// let config = conversion_config_from_options(opts.as_object().unwrap());
/// assert_eq!(config.page_width_in, 11.0);
/// assert_eq!(config.dpi, 300);
/// assert_eq!(config.background, [255, 0, 0]);
/// ```
pub fn conversion_config_from_options(options: &Map<String, Value>) -> ConversionConfig {
    let defaults = ConversionConfig::default();

    let page_width_in = positive_number(options, PAGE_WIDTH_KEYS).unwrap_or(defaults.page_width_in);
    let page_height_in =
        positive_number(options, PAGE_HEIGHT_KEYS).unwrap_or(defaults.page_height_in);

    let dpi = number(options, DPI_KEYS)
        .map(|d| d.trunc().clamp(1.0, u32::MAX as f64) as u32)
        .unwrap_or(defaults.dpi);

    let max_scale = number(options, MAX_SCALE_KEYS)
        .unwrap_or(defaults.max_scale)
        .max(0.1);

    let allow_scale_up = boolean(options, SCALE_UP_KEYS).unwrap_or(defaults.allow_scale_up);

    let manual_scale = match number(options, SCALE_KEYS).map(|p| p / 100.0) {
        Some(scale) if scale > 0.0 => scale,
        _ => defaults.manual_scale,
    };

    let margin_in = options
        .get(MARGIN_MM_KEY)
        .and_then(parse_number)
        .map(|mm| (mm / MM_PER_INCH).max(0.0))
        .or_else(|| number(options, MARGIN_IN_KEYS))
        .unwrap_or(defaults.margin_in);

    let background = BACKGROUND_KEYS
        .iter()
        .filter_map(|k| options.get(*k))
        .find(|v| is_truthy(v))
        .and_then(Value::as_str)
        .and_then(parse_hex_color)
        .unwrap_or(defaults.background);

    ConversionConfig {
        page_width_in,
        page_height_in,
        margin_in,
        dpi,
        manual_scale,
        allow_scale_up,
        max_scale,
        background,
    }
}

/// Parse `#rgb`, `rgb`, `#rrggbb` or `rrggbb`.
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };

    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// First key whose value parses as a finite number.
fn number(options: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| options.get(*k))
        .find_map(parse_number)
}

fn positive_number(options: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| options.get(*k))
        .filter_map(parse_number)
        .find(|v| *v > 0.0)
}

fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// First key holding a recognisable boolean.
fn boolean(options: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .filter_map(|k| options.get(*k))
        .find_map(|value| match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
