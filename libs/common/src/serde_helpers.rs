//! Lenient deserializers for request bodies posted by browser forms
//!
//! Form inputs often arrive as strings (`"502"`) or empty strings; these
//! helpers accept both shapes so range validation can report a precise error
//! instead of a generic parse failure.

use serde::{Deserialize, Deserializer};

/// Deserialize optional i64
///
/// Supports the following input formats:
/// - `null` or missing → `None`
/// - `""` → `None`
/// - `123` or `"123"` → `Some(123)`
///
/// # Example
/// ```ignore
/// #[derive(Deserialize)]
/// struct Request {
///     #[serde(default, deserialize_with = "deserialize_optional_i64")]
///     port: Option<i64>,
/// }
/// ```
pub fn deserialize_optional_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        Int(i64),
        String(String),
    }

    match Option::<StringOrInt>::deserialize(deserializer)? {
        None => Ok(None),
        Some(StringOrInt::Int(i)) => Ok(Some(i)),
        Some(StringOrInt::String(s)) if s.trim().is_empty() => Ok(None),
        Some(StringOrInt::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid integer: {}", s))),
    }
}

/// Deserialize optional bool from a JSON boolean, `0`/`1`, or a string
///
/// Strings accept `true`/`false` and `1`/`0` (case-insensitive).
pub fn deserialize_optional_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrStringOrInt {
        Bool(bool),
        Int(i64),
        String(String),
    }

    match Option::<BoolOrStringOrInt>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrStringOrInt::Bool(b)) => Ok(Some(b)),
        Some(BoolOrStringOrInt::Int(0)) => Ok(Some(false)),
        Some(BoolOrStringOrInt::Int(1)) => Ok(Some(true)),
        Some(BoolOrStringOrInt::Int(i)) => Err(D::Error::custom(format!(
            "Invalid integer value {}, expected 0 or 1",
            i
        ))),
        Some(BoolOrStringOrInt::String(s)) => {
            let t = s.trim();
            if t == "1" || t.eq_ignore_ascii_case("true") {
                Ok(Some(true))
            } else if t == "0" || t.eq_ignore_ascii_case("false") {
                Ok(Some(false))
            } else {
                Err(D::Error::custom(format!(
                    "Invalid boolean value '{}', expected true/false or 1/0",
                    s
                )))
            }
        },
    }
}
