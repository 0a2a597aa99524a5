use serde::{Deserialize, Serialize};
use std::fmt;

/// Value carried by a tag on either runtime.
///
/// Untagged on the wire: `true`, `48.0` and `"RUN"` decode to `Bool`,
/// `Number` and `Text` respectively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl TagValue {
    /// Raw-value equality used for conflict detection.
    ///
    /// Numbers compare at full precision. NaN equals NaN so a tag stuck at
    /// NaN on both runtimes does not raise a conflict that can never clear.
    /// Different variants are never equal (`1.0` is not `true`).
    pub fn same_as(&self, other: &TagValue) -> bool {
        match (self, other) {
            (TagValue::Bool(a), TagValue::Bool(b)) => a == b,
            (TagValue::Number(a), TagValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (TagValue::Text(a), TagValue::Text(b)) => a == b,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TagValue::Bool(_) => "bool",
            TagValue::Number(_) => "number",
            TagValue::Text(_) => "text",
        }
    }

    /// Parse operator input: `true`/`false`, then numbers, then free text.
    pub fn parse_loose(input: &str) -> Self {
        match input.trim() {
            "true" | "TRUE" | "on" => TagValue::Bool(true),
            "false" | "FALSE" | "off" => TagValue::Bool(false),
            other => other
                .parse::<f64>()
                .map(TagValue::Number)
                .unwrap_or_else(|_| TagValue::Text(other.to_string())),
        }
    }
}

impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Number(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Number(value as f64)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

/// Display form for panels and the console. Numbers are rounded to two
/// decimals here and nowhere else.
impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            TagValue::Number(n) => write!(f, "{:.2}", n),
            TagValue::Text(s) => write!(f, "{}", s),
        }
    }
}
