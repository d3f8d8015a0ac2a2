// medication.rs
use crate::DomainError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entrada del catálogo de medicamentos, independiente de los flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
  pub id: Uuid,
  pub name: String,
  pub generic_name: Option<String>,
  pub category: Option<String>,
  pub unit: String,
  pub description: Option<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicationInput {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub generic_name: Option<String>,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub unit: String,
  #[serde(default)]
  pub description: Option<String>,
}

impl MedicationInput {
  pub fn new(name: &str, generic_name: &str, category: &str, unit: &str, description: &str) -> Self {
    Self { name: name.to_string(),
           generic_name: Some(generic_name.to_string()),
           category: Some(category.to_string()),
           unit: unit.to_string(),
           description: Some(description.to_string()) }
  }

  /// Todos los errores se informan juntos, separados por ", ".
  pub fn validated(self) -> Result<Self, DomainError> {
    let mut errors = Vec::new();
    if self.name.trim().is_empty() {
      errors.push("Name is required");
    }
    if self.unit.trim().is_empty() {
      errors.push("Unit is required");
    }
    if !errors.is_empty() {
      return Err(DomainError::ValidationError(errors.join(", ")));
    }
    Ok(Self { name: self.name.trim().to_string(),
              generic_name: non_blank(self.generic_name),
              category: non_blank(self.category),
              unit: self.unit.trim().to_string(),
              description: non_blank(self.description) })
  }

  pub fn into_medication(self) -> Result<Medication, DomainError> {
    let v = self.validated()?;
    Ok(Medication { id: Uuid::new_v4(),
                    name: v.name,
                    generic_name: v.generic_name,
                    category: v.category,
                    unit: v.unit,
                    description: v.description,
                    created_at: Utc::now() })
  }

  pub fn apply_to(self, existing: &Medication) -> Result<Medication, DomainError> {
    let v = self.validated()?;
    Ok(Medication { id: existing.id,
                    name: v.name,
                    generic_name: v.generic_name,
                    category: v.category,
                    unit: v.unit,
                    description: v.description,
                    created_at: existing.created_at })
  }
}

fn non_blank(s: Option<String>) -> Option<String> {
  s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Catálogo base cargado por el seed.
pub static STANDARD_MEDICATIONS: Lazy<Vec<MedicationInput>> = Lazy::new(|| {
  vec![MedicationInput::new("Paracetamol", "Acetaminophen", "antipyretic", "mg", "Pain reliever and fever reducer"),
       MedicationInput::new("Ibuprofen", "Ibuprofen", "analgesic", "mg", "Anti-inflammatory pain reliever"),
       MedicationInput::new("Amoxicillin", "Amoxicillin", "antibiotic", "mg", "Penicillin antibiotic"),
       MedicationInput::new("ORS", "Oral Rehydration Salts", "supplement", "sachets", "For dehydration treatment"),
       MedicationInput::new("Vitamin A", "Retinol", "vitamin", "units", "Essential vitamin for immune function"),
       MedicationInput::new("Zinc Sulfate", "Zinc", "supplement", "mg", "Mineral supplement for diarrhea treatment"),
       MedicationInput::new("Cotrimoxazole",
                            "Trimethoprim-Sulfamethoxazole",
                            "antibiotic",
                            "mg",
                            "Antibiotic for bacterial infections"),
       MedicationInput::new("Cetirizine", "Cetirizine", "antihistamine", "mg", "Antihistamine for allergic reactions"),]
});

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validation_errors_are_joined() {
    match MedicationInput::default().validated() {
      Err(DomainError::ValidationError(m)) => assert_eq!(m, "Name is required, Unit is required"),
      other => panic!("expected validation error, got {:?}", other),
    }
    let only_unit = MedicationInput { name: "ORS".into(), ..Default::default() };
    assert_eq!(only_unit.validated(), Err(DomainError::ValidationError("Unit is required".into())));
  }

  #[test]
  fn standard_catalog_is_valid() {
    assert_eq!(STANDARD_MEDICATIONS.len(), 8);
    for m in STANDARD_MEDICATIONS.iter() {
      assert!(m.clone().validated().is_ok(), "{} should validate", m.name);
    }
  }
}
