//! HTML and JSON parsing for portal pages
//!
//! The portal's markup is not an API. Every extractor here is best effort:
//! a field that cannot be found falls back to a placeholder instead of
//! failing the whole page.

use crate::error::{PortalError, PortalResult};
use crate::models::{DashboardSnapshot, PaymentRecord, UsageEntry};
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer};
use std::sync::LazyLock;

pub const NAME_PLACEHOLDER: &str = "User";
pub const PLACEHOLDER: &str = "N/A";

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>").unwrap()
});
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)\b[^>]*?(/?)>").unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());

static ASIDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<aside\b[^>]*>(.*?)</aside>").unwrap());
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h2\b([^>]*)>(.*?)</h2>").unwrap());
static CLASS_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)class\s*=\s*["']([^"']*)["']"#).unwrap());
static PACKAGE_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">([^<]*Mbps[^<]*)<").unwrap());
static CONTAINER_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(div|li|section|article|tr)\s*>").unwrap());
static VALUE_PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").unwrap());

static TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").unwrap());
static TBODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tbody\b[^>]*>(.*?)</tbody>").unwrap());
static ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static CELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").unwrap());

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Parse the post-login dashboard page
pub fn parse_dashboard(html: &str) -> DashboardSnapshot {
    let html = strip_noise(html);

    DashboardSnapshot {
        name: subscriber_name(&html).unwrap_or_else(|| NAME_PLACEHOLDER.to_string()),
        package: package_descriptor(&html).unwrap_or_else(|| PLACEHOLDER.to_string()),
        account_status: card_value(&html, "Account Status"),
        connection_status: normalize_connection_status(&card_value(&html, "Connection Status")),
        expiry_date: card_value(&html, "Expiry Date"),
        plan_rate: card_value(&html, "Plan rate"),
    }
}

/// `ONLINE` / `OFFLINE` when the raw text mentions either, else unchanged
pub fn normalize_connection_status(raw: &str) -> String {
    let upper = raw.to_uppercase();
    if upper.contains("ONLINE") {
        "ONLINE".to_string()
    } else if upper.contains("OFFLINE") {
        "OFFLINE".to_string()
    } else {
        raw.to_string()
    }
}

/// Whether a page is (still) the sign-in form
pub fn is_sign_in_page(body: &str, marker: &str) -> bool {
    !marker.is_empty() && body.contains(marker)
}

/// Sidebar header holding the customer's name, minus any icon markup
fn subscriber_name(html: &str) -> Option<String> {
    let scope = ASIDE
        .captures(html)
        .and_then(|c| c.get(1))
        .map_or(html, |m| m.as_str());

    let header = HEADING.captures_iter(scope).find(is_name_heading)?;
    non_empty(own_text(&header[2]))
}

/// The name header is a flex row (`flex items-center`) next to its icon
fn is_name_heading(heading: &Captures) -> bool {
    let Some(class) = CLASS_ATTR.captures(&heading[1]) else {
        return false;
    };
    let tokens: Vec<&str> = class[1].split_whitespace().collect();
    tokens.contains(&"flex") && tokens.contains(&"items-center")
}

fn package_descriptor(html: &str) -> Option<String> {
    PACKAGE_TEXT
        .captures(html)
        .and_then(|c| non_empty(clean_text(&c[1])))
}

/// Value shown next to a label on a dashboard card
fn card_value(html: &str, label: &str) -> String {
    labelled_value(html, label).unwrap_or_else(|| PLACEHOLDER.to_string())
}

fn labelled_value(html: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?i)>[^<]*{}[^<]*<", regex::escape(label));
    let label_match = Regex::new(&pattern).ok()?.find(html)?;

    // Everything after the label text, up to where its card closes
    let rest = &html[label_match.end() - 1..];
    let scope_end = CONTAINER_END.find(rest).map_or(rest.len(), |m| m.start());
    let scope = &rest[..scope_end];

    if let Some(p) = VALUE_PARAGRAPH.captures(scope) {
        return non_empty(html_text(&p[1]));
    }
    non_empty(html_text(scope))
}

/// Parse `{"value": ["{\"date\":..}", ...]}` where each element is itself JSON
pub fn parse_usage_history(body: &str) -> PortalResult<Vec<UsageEntry>> {
    #[derive(Deserialize)]
    struct Envelope {
        value: Vec<serde_json::Value>,
    }

    #[derive(Deserialize)]
    struct RawUsage {
        date: String,
        #[serde(deserialize_with = "lenient_u64")]
        download: u64,
        #[serde(deserialize_with = "lenient_u64")]
        upload: u64,
    }

    let envelope: Envelope = serde_json::from_str(body.trim())?;

    envelope
        .value
        .into_iter()
        .map(|element| -> PortalResult<UsageEntry> {
            let raw: RawUsage = match element {
                serde_json::Value::String(encoded) => serde_json::from_str(&encoded)?,
                other => serde_json::from_value(other)?,
            };
            Ok(UsageEntry {
                date: raw.date,
                download: raw.download,
                upload: raw.upload,
            })
        })
        .collect()
}

/// Byte counts arrive as integers, floats or numeric strings
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f as u64)
            })
        }
        _ => None,
    };

    parsed.ok_or_else(|| D::Error::custom(format!("not a byte count: {}", value)))
}

/// Parse the billing history table; rows with fewer than four cells are skipped
pub fn parse_payment_history(html: &str) -> PortalResult<Vec<PaymentRecord>> {
    let html = strip_noise(html);

    let Some(table) = TABLE
        .captures_iter(&html)
        .map(|c| c.get(1).map_or("", |m| m.as_str()))
        .find(|t| CELL.is_match(t))
    else {
        return Err(PortalError::ParseMiss("no data table on payment page".to_string()));
    };

    let body = TBODY
        .captures(table)
        .and_then(|c| c.get(1))
        .map_or(table, |m| m.as_str());

    let records = ROW
        .captures_iter(body)
        .filter_map(|row| {
            let cells: Vec<String> = CELL
                .captures_iter(&row[1])
                .map(|c| html_text(&c[1]))
                .collect();

            if cells.len() < 4 {
                return None;
            }

            let mut cells = cells.into_iter();
            Some(PaymentRecord {
                date: cells.next().unwrap_or_default(),
                amount: cells.next().unwrap_or_default(),
                method: cells.next().unwrap_or_default(),
                status: cells.next().unwrap_or_default(),
                transaction_id: cells.next().unwrap_or_default(),
            })
        })
        .collect();

    Ok(records)
}

/// Drop comments, scripts and styles before any text search
fn strip_noise(html: &str) -> String {
    let html = COMMENT.replace_all(html, "");
    SCRIPT.replace_all(&html, "").into_owned()
}

/// Visible text of an HTML fragment
pub fn html_text(fragment: &str) -> String {
    clean_text(&ANY_TAG.replace_all(fragment, " "))
}

/// Text that belongs to the element itself, not to nested elements
pub fn own_text(inner_html: &str) -> String {
    let mut depth = 0usize;
    let mut last = 0;
    let mut text = String::new();

    for tag in TAG.captures_iter(inner_html) {
        let Some(whole) = tag.get(0) else {
            continue;
        };

        if depth == 0 {
            text.push_str(&inner_html[last..whole.start()]);
            text.push(' ');
        }
        last = whole.end();

        let closing = !tag[1].is_empty();
        let self_closing = !tag[3].is_empty();
        let name = tag[2].to_ascii_lowercase();

        if closing {
            depth = depth.saturating_sub(1);
        } else if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            depth += 1;
        }
    }

    if depth == 0 {
        text.push_str(&inner_html[last..]);
    }

    clean_text(&text)
}

/// Decode entities and collapse whitespace
fn clean_text(text: &str) -> String {
    let decoded = decode_entities(text);
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ if entity.starts_with('#') => {
                    entity[1..].parse::<u32>().ok().and_then(char::from_u32)
                }
                _ => None,
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
