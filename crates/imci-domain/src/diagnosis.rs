// diagnosis.rs
use crate::condition::Condition;
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
  pub id: Uuid,
  pub flow_version_id: Uuid,
  pub name: String,
  pub description: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisInput {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
}

impl DiagnosisInput {
  pub fn new(name: &str, description: Option<&str>) -> Self {
    Self { name: name.to_string(), description: description.map(str::to_string) }
  }

  pub fn validated(self) -> Result<Self, DomainError> {
    let name = self.name.trim().to_string();
    if name.is_empty() {
      return Err(DomainError::ValidationError("Name is required".to_string()));
    }
    Ok(Self { name, description: self.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()) })
  }

  pub fn into_diagnosis(self, flow_version_id: Uuid) -> Result<Diagnosis, DomainError> {
    let v = self.validated()?;
    let now = Utc::now();
    Ok(Diagnosis { id: Uuid::new_v4(),
                   flow_version_id,
                   name: v.name,
                   description: v.description,
                   created_at: now,
                   updated_at: now })
  }

  pub fn apply_to(self, existing: &Diagnosis) -> Result<Diagnosis, DomainError> {
    let v = self.validated()?;
    Ok(Diagnosis { name: v.name,
                   description: v.description,
                   updated_at: Utc::now(),
                   ..existing.clone() })
  }
}

/// Medicamento prescrito por un diagnóstico. `medication_name` y
/// `medication_unit` se resuelven al leer desde el catálogo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisMedication {
  pub id: Uuid,
  pub diagnosis_id: Uuid,
  pub medication_id: Uuid,
  pub dosage: String,
  pub duration: Option<String>,
  pub instructions: Option<String>,
  pub order_index: i32,
  pub medication_name: Option<String>,
  pub medication_unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisMedicationInput {
  pub medication_id: Option<Uuid>,
  #[serde(default)]
  pub dosage: String,
  #[serde(default)]
  pub duration: Option<String>,
  #[serde(default)]
  pub instructions: Option<String>,
  #[serde(default)]
  pub order_index: Option<i32>,
}

impl DiagnosisMedicationInput {
  pub fn into_link(self, diagnosis_id: Uuid) -> Result<DiagnosisMedication, DomainError> {
    let mut errors = Vec::new();
    if self.medication_id.is_none() {
      errors.push("Medication is required");
    }
    if self.dosage.trim().is_empty() {
      errors.push("Dosage is required");
    }
    let medication_id = match self.medication_id {
      Some(id) if errors.is_empty() => id,
      _ => return Err(DomainError::ValidationError(errors.join(", "))),
    };
    Ok(DiagnosisMedication { id: Uuid::new_v4(),
                             diagnosis_id,
                             medication_id,
                             dosage: self.dosage.trim().to_string(),
                             duration: non_blank(self.duration),
                             instructions: non_blank(self.instructions),
                             order_index: self.order_index.unwrap_or(0),
                             medication_name: None,
                             medication_unit: None })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdviceCategory {
  Warning,
  Instruction,
  FollowUp,
  General,
}

impl AdviceCategory {
  pub fn as_str(&self) -> &'static str {
    match self {
      AdviceCategory::Warning => "warning",
      AdviceCategory::Instruction => "instruction",
      AdviceCategory::FollowUp => "follow-up",
      AdviceCategory::General => "general",
    }
  }
}

impl FromStr for AdviceCategory {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, DomainError> {
    match s {
      "warning" => Ok(AdviceCategory::Warning),
      "instruction" => Ok(AdviceCategory::Instruction),
      "follow-up" => Ok(AdviceCategory::FollowUp),
      "general" => Ok(AdviceCategory::General),
      other => Err(DomainError::ValidationError(format!("Categoría de consejo desconocida: {}", other))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisAdvice {
  pub id: Uuid,
  pub diagnosis_id: Uuid,
  pub advice_text: String,
  pub priority: i32,
  pub category: Option<AdviceCategory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisAdviceInput {
  #[serde(default)]
  pub advice_text: String,
  #[serde(default)]
  pub priority: Option<i32>,
  #[serde(default)]
  pub category: Option<AdviceCategory>,
}

impl DiagnosisAdviceInput {
  pub fn into_advice(self, diagnosis_id: Uuid) -> Result<DiagnosisAdvice, DomainError> {
    let advice_text = self.advice_text.trim().to_string();
    if advice_text.is_empty() {
      return Err(DomainError::ValidationError("Advice text is required".to_string()));
    }
    Ok(DiagnosisAdvice { id: Uuid::new_v4(),
                         diagnosis_id,
                         advice_text,
                         priority: self.priority.unwrap_or(0),
                         category: self.category })
  }
}

/// Diagnóstico con todo su contenido propio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisWithDetails {
  #[serde(flatten)]
  pub diagnosis: Diagnosis,
  pub conditions: Vec<Condition>,
  pub medications: Vec<DiagnosisMedication>,
  pub advice: Vec<DiagnosisAdvice>,
}

fn non_blank(s: Option<String>) -> Option<String> {
  s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn medication_link_reports_all_missing_fields() {
    match DiagnosisMedicationInput::default().into_link(Uuid::new_v4()) {
      Err(DomainError::ValidationError(m)) => assert_eq!(m, "Medication is required, Dosage is required"),
      other => panic!("expected validation error, got {:?}", other),
    }
  }

  #[test]
  fn advice_category_uses_kebab_case() {
    assert_eq!(serde_json::to_value(AdviceCategory::FollowUp).unwrap(), json!("follow-up"));
    assert_eq!("follow-up".parse::<AdviceCategory>().unwrap(), AdviceCategory::FollowUp);
    assert!(DiagnosisAdviceInput::default().into_advice(Uuid::new_v4()).is_err());
  }

  #[test]
  fn diagnosis_name_required() {
    match DiagnosisInput::new("  ", None).into_diagnosis(Uuid::new_v4()) {
      Err(DomainError::ValidationError(m)) => assert_eq!(m, "Name is required"),
      other => panic!("expected validation error, got {:?}", other),
    }
  }
}
