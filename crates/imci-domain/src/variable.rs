// variable.rs
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
  #[default]
  String,
  Number,
  Boolean,
}

impl VariableType {
  pub fn as_str(&self) -> &'static str {
    match self {
      VariableType::String => "string",
      VariableType::Number => "number",
      VariableType::Boolean => "boolean",
    }
  }
}

impl FromStr for VariableType {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, DomainError> {
    match s {
      "string" => Ok(VariableType::String),
      "number" => Ok(VariableType::Number),
      "boolean" => Ok(VariableType::Boolean),
      other => Err(DomainError::ValidationError(format!("Tipo de variable desconocido: {}", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableCategory {
  Patient,
  #[default]
  System,
  Custom,
}

impl VariableCategory {
  pub fn as_str(&self) -> &'static str {
    match self {
      VariableCategory::Patient => "patient",
      VariableCategory::System => "system",
      VariableCategory::Custom => "custom",
    }
  }
}

impl FromStr for VariableCategory {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, DomainError> {
    match s {
      "patient" => Ok(VariableCategory::Patient),
      "system" => Ok(VariableCategory::System),
      "custom" => Ok(VariableCategory::Custom),
      other => Err(DomainError::ValidationError(format!("Categoría de variable desconocida: {}", other))),
    }
  }
}

/// Variable con nombre y tipo. Global (`flow_version_id` nulo) o propia de
/// una versión.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
  pub id: Uuid,
  pub variable_id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub variable_type: VariableType,
  pub description: Option<String>,
  pub default_value: String,
  pub is_global: bool,
  pub flow_version_id: Option<Uuid>,
  pub category: VariableCategory,
  pub required: bool,
  pub created_by: Option<Uuid>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Variable tal como llega del formulario. `id` presente = actualización
/// (sólo relevante en lotes).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableInput {
  #[serde(default)]
  pub id: Option<Uuid>,
  #[serde(default)]
  pub variable_id: String,
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type", default)]
  pub variable_type: Option<VariableType>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub default_value: Option<String>,
  #[serde(default)]
  pub is_global: Option<bool>,
  #[serde(default)]
  pub flow_version_id: Option<Uuid>,
  #[serde(default)]
  pub category: Option<VariableCategory>,
  #[serde(default)]
  pub required: Option<bool>,
}

/// Variable validada y normalizada, lista para persistir.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVariable {
  pub variable_id: String,
  pub name: String,
  pub variable_type: VariableType,
  pub description: Option<String>,
  pub default_value: String,
  pub is_global: bool,
  pub flow_version_id: Option<Uuid>,
  pub category: VariableCategory,
  pub required: bool,
}

impl VariableInput {
  pub fn global(variable_id: &str, name: &str, variable_type: VariableType) -> Self {
    Self { variable_id: variable_id.to_string(),
           name: name.to_string(),
           variable_type: Some(variable_type),
           is_global: Some(true),
           ..Default::default() }
  }

  pub fn scoped(variable_id: &str, name: &str, variable_type: VariableType, flow_version_id: Uuid) -> Self {
    Self { variable_id: variable_id.to_string(),
           name: name.to_string(),
           variable_type: Some(variable_type),
           is_global: Some(false),
           flow_version_id: Some(flow_version_id),
           ..Default::default() }
  }

  /// Valida y aplica los valores por defecto (type string, category system,
  /// global). Una variable global nunca conserva `flow_version_id`.
  pub fn validated(self) -> Result<NewVariable, DomainError> {
    let variable_id = self.variable_id.trim().to_string();
    let name = self.name.trim().to_string();
    if variable_id.is_empty() || name.is_empty() {
      return Err(DomainError::ValidationError("Missing required fields".to_string()));
    }
    let is_global = self.is_global.unwrap_or(true);
    let flow_version_id = if is_global { None } else { self.flow_version_id };
    if !is_global && flow_version_id.is_none() {
      return Err(DomainError::ValidationError("Flow-scoped variables require a flow version".to_string()));
    }
    Ok(NewVariable { variable_id,
                     name,
                     variable_type: self.variable_type.unwrap_or_default(),
                     description: self.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
                     default_value: self.default_value.unwrap_or_default(),
                     is_global,
                     flow_version_id,
                     category: self.category.unwrap_or_default(),
                     required: self.required.unwrap_or(false) })
  }
}

impl NewVariable {
  pub fn into_variable(self, created_by: Option<Uuid>) -> Variable {
    let now = Utc::now();
    Variable { id: Uuid::new_v4(),
               variable_id: self.variable_id,
               name: self.name,
               variable_type: self.variable_type,
               description: self.description,
               default_value: self.default_value,
               is_global: self.is_global,
               flow_version_id: self.flow_version_id,
               category: self.category,
               required: self.required,
               created_by,
               created_at: now,
               updated_at: now }
  }

  /// Aplica los cambios sobre una variable existente, conservando id y
  /// auditoría de creación.
  pub fn apply_to(self, existing: &Variable) -> Variable {
    Variable { id: existing.id,
               created_by: existing.created_by,
               created_at: existing.created_at,
               updated_at: Utc::now(),
               ..self.into_variable(existing.created_by) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn global_variables_drop_version_reference() {
    let mut input = VariableInput::global("age_months", "Age (months)", VariableType::Number);
    input.flow_version_id = Some(Uuid::new_v4());
    let v = input.validated().unwrap();
    assert!(v.is_global);
    assert_eq!(v.flow_version_id, None);
  }

  #[test]
  fn defaults_applied() {
    let v = VariableInput { variable_id: "cough".into(), name: "Cough".into(), ..Default::default() }.validated()
                                                                                                     .unwrap();
    assert_eq!(v.variable_type, VariableType::String);
    assert_eq!(v.category, VariableCategory::System);
    assert!(v.is_global);
    assert!(!v.required);
    assert_eq!(v.default_value, "");
  }

  #[test]
  fn missing_fields_and_unscoped_locals_rejected() {
    match (VariableInput { name: "x".into(), ..Default::default() }).validated() {
      Err(DomainError::ValidationError(m)) => assert_eq!(m, "Missing required fields"),
      other => panic!("expected validation error, got {:?}", other),
    }
    let mut local = VariableInput::scoped("x", "X", VariableType::Boolean, Uuid::new_v4());
    local.flow_version_id = None;
    assert!(matches!(local.validated(), Err(DomainError::ValidationError(_))));
  }
}
