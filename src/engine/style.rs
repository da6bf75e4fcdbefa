use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::NameKey;

pub const DEFAULT_BACKGROUND: &str = "#fff8d1";
pub const DEFAULT_FOREGROUND: &str = "#2d2d2d";

static HEX6_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid hex6 regex"));
static HEX3_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{3}$").expect("valid hex3 regex"));

/// A color override as stored in settings or carried in an export file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawColor {
    Hex(String),
    Pair {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bg: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fg: Option<String>,
    },
    /// Anything else; resolves to an empty style.
    Other(serde_json::Value),
}

/// Normalized colors; an empty component means "no override".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HighlightStyle {
    pub background: String,
    pub foreground: String,
}

impl HighlightStyle {
    pub fn default_style() -> Self {
        Self {
            background: DEFAULT_BACKGROUND.to_string(),
            foreground: DEFAULT_FOREGROUND.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.background.is_empty() && self.foreground.is_empty()
    }

    /// Fills empty components with the default style.
    pub fn effective(&self) -> Self {
        Self {
            background: non_empty_or(&self.background, DEFAULT_BACKGROUND),
            foreground: non_empty_or(&self.foreground, DEFAULT_FOREGROUND),
        }
    }
}

impl From<&HighlightStyle> for RawColor {
    fn from(style: &HighlightStyle) -> Self {
        RawColor::Pair {
            bg: Some(style.background.clone()).filter(|v| !v.is_empty()),
            fg: Some(style.foreground.clone()).filter(|v| !v.is_empty()),
        }
    }
}

/// Canonical 6-digit lowercase hex, or empty when the value is not a 3/6-digit hex color.
pub fn normalize_hex(value: &str) -> String {
    let value = value.trim();
    if HEX6_REGEX.is_match(value) {
        return value.to_lowercase();
    }
    if HEX3_REGEX.is_match(value) {
        let mut out = String::with_capacity(7);
        out.push('#');
        for ch in value[1..].chars().map(|c| c.to_ascii_lowercase()) {
            out.push(ch);
            out.push(ch);
        }
        return out;
    }
    String::new()
}

/// Normalizes a color override. Defaults are applied at the point of use, not here.
pub fn resolve_style(raw: Option<&RawColor>) -> HighlightStyle {
    match raw {
        Some(RawColor::Hex(hex)) => HighlightStyle {
            background: normalize_hex(hex),
            foreground: String::new(),
        },
        Some(RawColor::Pair { bg, fg }) => HighlightStyle {
            background: bg.as_deref().map(normalize_hex).unwrap_or_default(),
            foreground: fg.as_deref().map(normalize_hex).unwrap_or_default(),
        },
        Some(RawColor::Other(_)) | None => HighlightStyle::default(),
    }
}

/// True when every component is either unset or equal to the default.
pub fn is_default_style(style: &HighlightStyle) -> bool {
    let bg = &style.background;
    let fg = &style.foreground;
    (bg.is_empty() || bg == DEFAULT_BACKGROUND) && (fg.is_empty() || fg == DEFAULT_FOREGROUND)
}

pub type StyleMap = HashMap<NameKey, HighlightStyle>;

/// Per-user styles from list color overrides. Subscribed lists are consulted in order, then
/// any remaining source list; the first list with a non-empty style wins for a user.
pub fn highlight_style_map(
    subscription_order: &[String],
    sources: &BTreeMap<String, Vec<String>>,
    colors: &BTreeMap<String, RawColor>,
) -> StyleMap {
    let mut map = StyleMap::new();
    let mut seen: HashSet<&str> = HashSet::new();

    let ordered = subscription_order
        .iter()
        .map(String::as_str)
        .chain(sources.keys().map(String::as_str));

    for list_id in ordered {
        if list_id.is_empty() || !seen.insert(list_id) {
            continue;
        }
        let style = resolve_style(colors.get(list_id));
        if style.is_empty() {
            continue;
        }
        let Some(members) = sources.get(list_id) else {
            continue;
        };
        for member in members {
            if let Some(key) = NameKey::new(member) {
                map.entry(key).or_insert_with(|| style.clone());
            }
        }
    }
    map
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_short_and_long_hex() {
        assert_eq!(normalize_hex("#ABC"), "#aabbcc");
        assert_eq!(normalize_hex(" #D9F99D "), "#d9f99d");
        assert_eq!(normalize_hex("red"), "");
        assert_eq!(normalize_hex("#abcd"), "");
        assert_eq!(normalize_hex(""), "");
    }

    #[test]
    fn string_color_only_sets_background() {
        let style = resolve_style(Some(&RawColor::Hex("#123".into())));
        assert_eq!(style.background, "#112233");
        assert_eq!(style.foreground, "");
    }

    #[test]
    fn invalid_components_resolve_to_empty() {
        let raw: RawColor = serde_json::from_str(r##"{"bg":"nope","fg":"#14532D"}"##).unwrap();
        let style = resolve_style(Some(&raw));
        assert_eq!(style.background, "");
        assert_eq!(style.foreground, "#14532d");
        assert_eq!(style.effective().background, DEFAULT_BACKGROUND);

        let other: RawColor = serde_json::from_str("42").unwrap();
        assert!(resolve_style(Some(&other)).is_empty());
        assert!(resolve_style(None).is_empty());
    }

    #[test]
    fn resolving_twice_is_stable() {
        let inputs = [
            RawColor::Hex("#AbC".into()),
            RawColor::Pair {
                bg: Some("#FFF".into()),
                fg: Some("#000000".into()),
            },
            RawColor::Pair {
                bg: None,
                fg: Some("#0f0".into()),
            },
            RawColor::Hex("garbage".into()),
        ];
        for raw in inputs {
            let once = resolve_style(Some(&raw));
            let twice = resolve_style(Some(&RawColor::from(&once)));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn default_style_detection() {
        assert!(is_default_style(&HighlightStyle::default()));
        assert!(is_default_style(&HighlightStyle::default_style()));
        assert!(is_default_style(&HighlightStyle {
            background: DEFAULT_BACKGROUND.into(),
            foreground: String::new(),
        }));
        assert!(!is_default_style(&HighlightStyle {
            background: "#000000".into(),
            foreground: String::new(),
        }));
    }

    #[test]
    fn first_styled_list_wins_per_user() {
        let order = vec!["plain".to_string(), "green".to_string(), "blue".to_string()];
        let mut sources = BTreeMap::new();
        sources.insert("plain".to_string(), vec!["alice".to_string()]);
        sources.insert("green".to_string(), vec!["Alice".to_string(), "bob".to_string()]);
        sources.insert("blue".to_string(), vec!["bob".to_string(), "carol".to_string()]);
        sources.insert("zeta".to_string(), vec!["dave".to_string()]);
        let mut colors = BTreeMap::new();
        colors.insert("green".to_string(), RawColor::Hex("#0f0".into()));
        colors.insert("blue".to_string(), RawColor::Hex("#00f".into()));
        colors.insert("zeta".to_string(), RawColor::Hex("#f00".into()));

        let map = highlight_style_map(&order, &sources, &colors);
        let bg = |name: &str| map[&NameKey::new(name).unwrap()].background.clone();
        assert_eq!(bg("alice"), "#00ff00");
        assert_eq!(bg("bob"), "#00ff00");
        assert_eq!(bg("carol"), "#0000ff");
        assert_eq!(bg("dave"), "#ff0000");
    }
}
