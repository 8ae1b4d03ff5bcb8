//! Serde helpers for backend values that arrive either as JSON numbers or as
//! numeric strings.

use serde::{Deserialize, Deserializer, de::Error};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Str(String),
    Int(i64),
    Float(f64),
}

impl NumOrStr {
    fn into_string(self) -> String {
        match self {
            NumOrStr::Str(s) => s,
            NumOrStr::Int(i) => i.to_string(),
            NumOrStr::Float(f) => f.to_string(),
        }
    }
}

pub fn numeric_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(NumOrStr::deserialize(deserializer)?.into_string())
}

pub fn optional_numeric_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<NumOrStr>::deserialize(deserializer)?.map(NumOrStr::into_string))
}

pub fn optional_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<NumOrStr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Int(i)) => Ok(Some(i as f64)),
        Some(NumOrStr::Float(f)) => Ok(Some(f)),
        Some(NumOrStr::Str(s)) => s.trim().parse().map(Some).map_err(D::Error::custom),
    }
}

/// Integer timestamp; integral floats and numeric strings are accepted.
pub fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Int(i) => Ok(i),
        NumOrStr::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(f as i64),
        NumOrStr::Float(f) => Err(D::Error::custom(format!("non-integral timestamp {f}"))),
        NumOrStr::Str(s) => s.trim().parse().map_err(D::Error::custom),
    }
}

pub fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Float(_) => Err(D::Error::custom("id must be a string or an integer")),
        other => Ok(other.into_string()),
    }
}
