// value.rs
use crate::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::fmt;

/// Largest integer an f64 represents exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Valor escalar de una condición o de una asignación de variable.
///
/// Se serializa sin etiqueta: `true`, `42`, `"abc"` o `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
  Bool(bool),
  Number(Number),
  Text(String),
  Null,
}

impl ScalarValue {
  /// Coerción de escritura para valores recibidos desde formularios.
  ///
  /// Strings numéricos pasan a número (enteros exactos como enteros),
  /// `"true"`/`"false"` en cualquier capitalización pasan a booleano y el
  /// resto queda como texto. Los escalares JSON que no son strings se
  /// conservan; arrays y objetos se rechazan.
  pub fn coerce(raw: &JsonValue) -> Result<Self, DomainError> {
    match raw {
      JsonValue::Null => Ok(ScalarValue::Null),
      JsonValue::Bool(b) => Ok(ScalarValue::Bool(*b)),
      JsonValue::Number(n) => Ok(ScalarValue::Number(n.clone())),
      JsonValue::String(s) => Ok(Self::coerce_str(s)),
      JsonValue::Array(_) | JsonValue::Object(_) => {
        Err(DomainError::ValidationError("Condition value must be a string, number or boolean".to_string()))
      }
    }
  }

  pub fn coerce_str(s: &str) -> Self {
    let t = s.trim();
    if !t.is_empty() {
      if let Ok(f) = t.parse::<f64>() {
        if f.is_finite() {
          if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
            return ScalarValue::Number(Number::from(f as i64));
          }
          if let Some(n) = Number::from_f64(f) {
            return ScalarValue::Number(n);
          }
        }
      }
      if t.eq_ignore_ascii_case("true") {
        return ScalarValue::Bool(true);
      }
      if t.eq_ignore_ascii_case("false") {
        return ScalarValue::Bool(false);
      }
    }
    ScalarValue::Text(s.to_string())
  }

  pub fn to_json(&self) -> JsonValue {
    match self {
      ScalarValue::Bool(b) => JsonValue::Bool(*b),
      ScalarValue::Number(n) => JsonValue::Number(n.clone()),
      ScalarValue::Text(s) => JsonValue::String(s.clone()),
      ScalarValue::Null => JsonValue::Null,
    }
  }

  /// Inverso de `to_json` para valores leídos del almacenamiento (sin
  /// coerción: un texto guardado sigue siendo texto).
  pub fn from_stored(raw: &JsonValue) -> Result<Self, DomainError> {
    match raw {
      JsonValue::String(s) => Ok(ScalarValue::Text(s.clone())),
      other => Self::coerce(other),
    }
  }
}

impl fmt::Display for ScalarValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ScalarValue::Bool(b) => write!(f, "{}", b),
      ScalarValue::Number(n) => write!(f, "{}", n),
      ScalarValue::Text(s) => f.write_str(s),
      ScalarValue::Null => f.write_str("null"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn numeric_strings_become_numbers() {
    assert_eq!(ScalarValue::coerce(&json!("42")).unwrap().to_json(), json!(42));
    assert_eq!(ScalarValue::coerce(&json!(" 37.5 ")).unwrap().to_json(), json!(37.5));
    assert_eq!(ScalarValue::coerce(&json!("-3")).unwrap().to_json(), json!(-3));
  }

  #[test]
  fn boolean_strings_ignore_case() {
    assert_eq!(ScalarValue::coerce(&json!("true")).unwrap(), ScalarValue::Bool(true));
    assert_eq!(ScalarValue::coerce(&json!("TRUE")).unwrap(), ScalarValue::Bool(true));
    assert_eq!(ScalarValue::coerce(&json!("False")).unwrap(), ScalarValue::Bool(false));
  }

  #[test]
  fn other_strings_stay_text() {
    assert_eq!(ScalarValue::coerce(&json!("abc")).unwrap(), ScalarValue::Text("abc".into()));
    assert_eq!(ScalarValue::coerce(&json!("")).unwrap(), ScalarValue::Text("".into()));
    assert_eq!(ScalarValue::coerce(&json!("  ")).unwrap(), ScalarValue::Text("  ".into()));
    // parse succeeds but the value is not finite
    assert_eq!(ScalarValue::coerce(&json!("inf")).unwrap(), ScalarValue::Text("inf".into()));
    assert_eq!(ScalarValue::coerce(&json!("NaN")).unwrap(), ScalarValue::Text("NaN".into()));
  }

  #[test]
  fn non_string_scalars_are_kept_and_containers_rejected() {
    assert_eq!(ScalarValue::coerce(&json!(7)).unwrap().to_json(), json!(7));
    assert_eq!(ScalarValue::coerce(&json!(null)).unwrap(), ScalarValue::Null);
    assert!(matches!(ScalarValue::coerce(&json!([1])), Err(DomainError::ValidationError(_))));
    assert!(matches!(ScalarValue::coerce(&json!({"a": 1})), Err(DomainError::ValidationError(_))));
  }

  #[test]
  fn stored_text_is_not_coerced_again() {
    assert_eq!(ScalarValue::from_stored(&json!("42")).unwrap(), ScalarValue::Text("42".into()));
    assert_eq!(ScalarValue::from_stored(&json!(42)).unwrap().to_json(), json!(42));
  }

  #[test]
  fn untagged_serde_shape() {
    let v: ScalarValue = serde_json::from_value(json!(null)).unwrap();
    assert_eq!(v, ScalarValue::Null);
    let v: ScalarValue = serde_json::from_value(json!("x")).unwrap();
    assert_eq!(serde_json::to_value(&v).unwrap(), json!("x"));
  }
}
