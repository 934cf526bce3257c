use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys whose presence marks a caption selection as naming an actual track.
const TRACK_ID_KEYS: [&str; 3] = [
    "languageCode",
    "translationLanguageCode",
    "sourceLanguageCode",
];

/// Snapshot of the playing video as seen from the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackContext {
    pub playback_rate: f64,
    pub paused: bool,
    /// `document.visibilityState == "visible"`.
    pub visible: bool,
}

impl PlaybackContext {
    pub fn is_fast(&self, threshold: f64) -> bool {
        self.playback_rate >= threshold
    }
}

/// The active caption track as reported by the player, or the empty "none"
/// selection. Always held by value: the JSON is a private copy of whatever
/// the page returned.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptionTrackSelection(Map<String, Value>);

impl CaptionTrackSelection {
    /// The "no track" selection, `{}`.
    pub fn none() -> Self {
        Self(Map::new())
    }

    /// Anything that is not a JSON object (null, undefined, a string...) is
    /// treated as no track.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::none(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_track_identifier(&self) -> bool {
        TRACK_ID_KEYS
            .iter()
            .any(|k| self.0.get(*k).map(is_truthy).unwrap_or(false))
    }

    pub fn language_code(&self) -> Option<&str> {
        self.0.get("languageCode").and_then(|v| v.as_str())
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A URL glob where `*` matches any run of characters, e.g.
/// `*://www.youtube.com/watch*`.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    glob: String,
    re: Regex,
}

impl UrlPattern {
    pub fn new(glob: &str) -> crate::Result<Self> {
        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let re = Regex::new(&format!("^{}$", body))
            .map_err(|e| crate::Error::Validation(format!("bad URL pattern '{}': {}", glob, e)))?;
        Ok(Self {
            glob: glob.to_string(),
            re,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.re.is_match(url)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

/// Compile a list of globs; an empty list matches every URL.
pub fn compile_patterns(globs: &[String]) -> crate::Result<Vec<UrlPattern>> {
    globs.iter().map(|g| UrlPattern::new(g)).collect()
}

pub fn any_match(patterns: &[UrlPattern], url: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.matches(url))
}
