// condition.rs
use crate::value::ScalarValue;
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
  Equals,
  NotEquals,
  GreaterThan,
  LessThan,
  GreaterThanEquals,
  LessThanEquals,
  Contains,
  NotContains,
}

impl Operator {
  pub fn as_str(&self) -> &'static str {
    match self {
      Operator::Equals => "equals",
      Operator::NotEquals => "not_equals",
      Operator::GreaterThan => "greater_than",
      Operator::LessThan => "less_than",
      Operator::GreaterThanEquals => "greater_than_equals",
      Operator::LessThanEquals => "less_than_equals",
      Operator::Contains => "contains",
      Operator::NotContains => "not_contains",
    }
  }
}

impl FromStr for Operator {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, DomainError> {
    serde_json::from_value(JsonValue::String(s.to_string()))
      .map_err(|_| DomainError::ValidationError(format!("Operador desconocido: {}", s)))
  }
}

/// Combinador con la condición anterior del mismo grupo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
  #[serde(rename = "AND")]
  And,
  #[serde(rename = "OR")]
  Or,
}

impl LogicalOperator {
  pub fn as_str(&self) -> &'static str {
    match self {
      LogicalOperator::And => "AND",
      LogicalOperator::Or => "OR",
    }
  }
}

impl FromStr for LogicalOperator {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, DomainError> {
    match s {
      "AND" => Ok(LogicalOperator::And),
      "OR" => Ok(LogicalOperator::Or),
      other => Err(DomainError::ValidationError(format!("Operador lógico desconocido: {}", other))),
    }
  }
}

/// `entry` condiciona la entrada al flow; `diagnosis` condiciona un
/// diagnóstico (`reference_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
  Entry,
  Diagnosis,
}

impl ConditionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ConditionKind::Entry => "entry",
      ConditionKind::Diagnosis => "diagnosis",
    }
  }
}

impl FromStr for ConditionKind {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, DomainError> {
    match s {
      "entry" => Ok(ConditionKind::Entry),
      "diagnosis" => Ok(ConditionKind::Diagnosis),
      other => Err(DomainError::ValidationError(format!("Tipo de condición desconocido: {}", other))),
    }
  }
}

/// Condición almacenada. `variable_name` se resuelve al leer y es `None` si
/// la variable ya no existe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub id: Uuid,
  pub flow_version_id: Uuid,
  pub variable_id: Uuid,
  pub operator: Operator,
  pub value: ScalarValue,
  #[serde(rename = "type")]
  pub kind: ConditionKind,
  pub reference_id: Option<Uuid>,
  pub logical_operator: Option<LogicalOperator>,
  pub group_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
  pub variable_name: Option<String>,
}

/// Condición tal como llega del formulario; `value` sin coercionar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionInput {
  pub variable_id: Uuid,
  pub operator: Operator,
  pub value: JsonValue,
  #[serde(default)]
  pub logical_operator: Option<LogicalOperator>,
  #[serde(default)]
  pub group_id: Option<Uuid>,
}

/// Condición lista para persistir: tipo fijado y valor ya coercionado.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCondition {
  pub id: Uuid,
  pub flow_version_id: Uuid,
  pub variable_id: Uuid,
  pub operator: Operator,
  pub value: ScalarValue,
  pub kind: ConditionKind,
  pub reference_id: Option<Uuid>,
  pub logical_operator: Option<LogicalOperator>,
  pub group_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
}

impl ConditionInput {
  pub fn new(variable_id: Uuid, operator: Operator, value: JsonValue) -> Self {
    Self { variable_id, operator, value, logical_operator: None, group_id: None }
  }

  fn build(self, flow_version_id: Uuid, kind: ConditionKind, reference_id: Option<Uuid>)
           -> Result<NewCondition, DomainError> {
    Ok(NewCondition { id: Uuid::new_v4(),
                      flow_version_id,
                      variable_id: self.variable_id,
                      operator: self.operator,
                      value: ScalarValue::coerce(&self.value)?,
                      kind,
                      reference_id,
                      logical_operator: self.logical_operator,
                      group_id: self.group_id,
                      created_at: Utc::now() })
  }

  /// Condición de entrada: `type=entry`, `reference_id` nulo.
  pub fn entry(self, flow_version_id: Uuid) -> Result<NewCondition, DomainError> {
    self.build(flow_version_id, ConditionKind::Entry, None)
  }

  /// Condición de diagnóstico: `type=diagnosis`, `reference_id` = diagnóstico.
  pub fn for_diagnosis(self, flow_version_id: Uuid, diagnosis_id: Uuid) -> Result<NewCondition, DomainError> {
    self.build(flow_version_id, ConditionKind::Diagnosis, Some(diagnosis_id))
  }
}

impl NewCondition {
  pub fn into_condition(self, variable_name: Option<String>) -> Condition {
    Condition { id: self.id,
                flow_version_id: self.flow_version_id,
                variable_id: self.variable_id,
                operator: self.operator,
                value: self.value,
                kind: self.kind,
                reference_id: self.reference_id,
                logical_operator: self.logical_operator,
                group_id: self.group_id,
                created_at: self.created_at,
                variable_name }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn entry_and_diagnosis_tagging() {
    let v = Uuid::new_v4();
    let d = Uuid::new_v4();
    let input = ConditionInput::new(Uuid::new_v4(), Operator::GreaterThan, json!("42"));
    let e = input.clone().entry(v).unwrap();
    assert_eq!(e.kind, ConditionKind::Entry);
    assert_eq!(e.reference_id, None);
    assert_eq!(e.value.to_json(), json!(42));
    let g = input.for_diagnosis(v, d).unwrap();
    assert_eq!(g.kind, ConditionKind::Diagnosis);
    assert_eq!(g.reference_id, Some(d));
  }

  #[test]
  fn wire_names() {
    assert_eq!("greater_than_equals".parse::<Operator>().unwrap(), Operator::GreaterThanEquals);
    assert!("approximately".parse::<Operator>().is_err());
    assert_eq!(serde_json::to_value(LogicalOperator::Or).unwrap(), json!("OR"));
    let c = ConditionInput::new(Uuid::nil(), Operator::Equals, json!("TRUE")).entry(Uuid::nil())
                                                                              .unwrap()
                                                                              .into_condition(Some("fever".into()));
    let wire = serde_json::to_value(&c).unwrap();
    assert_eq!(wire["type"], json!("entry"));
    assert_eq!(wire["value"], json!(true));
    assert_eq!(wire["operator"], json!("equals"));
    assert_eq!(wire["variable_name"], json!("fever"));
  }
}
