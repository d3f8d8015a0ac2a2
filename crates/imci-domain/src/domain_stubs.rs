use crate::domain_repository::{DomainRepository, InMemoryDomainRepository};
use crate::medication::STANDARD_MEDICATIONS;
use crate::variable::{VariableCategory, VariableInput, VariableType};
use crate::DomainError;

pub struct DomainStubs;

impl DomainStubs {
    /// Repositorio en memoria con el catálogo estándar de medicamentos y un
    /// par de variables globales de paciente.
    pub fn sample_repo() -> Result<InMemoryDomainRepository, DomainError> {
        let repo = InMemoryDomainRepository::new();
        repo.seed_medications(&STANDARD_MEDICATIONS)?;

        let mut age = VariableInput::global("age_months", "Age (months)", VariableType::Number);
        age.category = Some(VariableCategory::Patient);
        age.required = Some(true);
        let mut cough = VariableInput::global("cough", "Cough", VariableType::Boolean);
        cough.category = Some(VariableCategory::Patient);
        cough.default_value = Some("false".to_string());
        repo.save_variables(vec![age, cough], None)?;

        Ok(repo)
    }
}
