//! Forgiving serde field deserializers for registry payloads and dumps.
//!
//! The registry is inconsistent about scalar types: numbers arrive as JSON
//! numbers or numeric strings, flags as booleans, `"Y"`/`"N"` or 0/1, and any
//! field may be `null`. Each helper maps whatever arrives onto an `Option`,
//! yielding `None` for values it cannot interpret instead of failing the
//! whole record. Use with `#[serde(default, deserialize_with = "...")]`.

use serde::{Deserialize, Deserializer, de::IgnoredAny};

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  #[allow(dead_code)]
  Other(IgnoredAny),
}

fn scalar<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Scalar>, D::Error> {
  Option::<Scalar>::deserialize(d)
}

/// Strings as-is (blank becomes `None`); numbers rendered as text.
pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
  Ok(match scalar(d)? {
    Some(Scalar::Str(s)) if !s.trim().is_empty() => Some(s),
    Some(Scalar::Int(i)) => Some(i.to_string()),
    Some(Scalar::Float(f)) if f.is_finite() && f.fract() == 0.0 => Some(format!("{f:.0}")),
    Some(Scalar::Float(f)) => Some(f.to_string()),
    _ => None,
  })
}

pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
  Ok(match scalar(d)? {
    Some(Scalar::Int(i)) => Some(i as f64),
    Some(Scalar::Float(f)) if f.is_finite() => Some(f),
    Some(Scalar::Str(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
    _ => None,
  })
}

pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
  Ok(match scalar(d)? {
    Some(Scalar::Int(i)) => Some(i),
    Some(Scalar::Float(f)) if f.is_finite() => Some(f.trunc() as i64),
    Some(Scalar::Str(s)) => s.trim().parse::<i64>().ok(),
    _ => None,
  })
}

pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
  Ok(match scalar(d)? {
    Some(Scalar::Bool(b)) => Some(b),
    Some(Scalar::Int(0)) => Some(false),
    Some(Scalar::Int(1)) => Some(true),
    Some(Scalar::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
      "true" | "t" | "yes" | "y" | "1" => Some(true),
      "false" | "f" | "no" | "n" | "0" => Some(false),
      _ => None,
    },
    _ => None,
  })
}

#[cfg(test)]
mod tests {
  use serde::Deserialize;

  #[derive(Deserialize)]
  struct Row {
    #[serde(default, deserialize_with = "super::string")]
    text:  Option<String>,
    #[serde(default, deserialize_with = "super::number")]
    money: Option<f64>,
    #[serde(default, deserialize_with = "super::integer")]
    id:    Option<i64>,
    #[serde(default, deserialize_with = "super::flag")]
    chair: Option<bool>,
  }

  fn row(json: &str) -> Row { serde_json::from_str(json).unwrap() }

  #[test]
  fn accepts_mixed_scalar_types() {
    let r = row(r#"{"text": 12345, "money": "1500.50", "id": "202918", "chair": "Y"}"#);
    assert_eq!(r.text.as_deref(), Some("12345"));
    assert_eq!(r.money, Some(1500.5));
    assert_eq!(r.id, Some(202918));
    assert_eq!(r.chair, Some(true));
  }

  #[test]
  fn nulls_blanks_and_garbage_become_none() {
    let r = row(r#"{"text": "  ", "money": "n/a", "id": null, "chair": [1]}"#);
    assert!(r.text.is_none());
    assert!(r.money.is_none());
    assert!(r.id.is_none());
    assert!(r.chair.is_none());

    let empty = row("{}");
    assert!(empty.text.is_none() && empty.id.is_none());
  }
}
