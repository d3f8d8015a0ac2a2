// errors.rs
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
  #[error("Error de validación: {0}")]
  ValidationError(String),
  #[error("No encontrado: {0}")]
  NotFound(String),
  #[error("Conflicto: {0}")]
  Conflict(String),
  #[error("Error externo: {0}")]
  ExternalError(String),
  #[error("Error de serialización: {0}")]
  SerializationError(String),
}

impl DomainError {
  /// Mensaje para el usuario. Los fallos externos (BD, pool) se registran y
  /// se reemplazan por `generic`.
  pub fn public_message(&self, generic: &str) -> String {
    match self {
      DomainError::ValidationError(m) | DomainError::NotFound(m) | DomainError::Conflict(m) => m.clone(),
      DomainError::ExternalError(detail) | DomainError::SerializationError(detail) => {
        log::error!("domain storage failure: {}", detail);
        generic.to_string()
      }
    }
  }
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::SerializationError(e.to_string())
  }
}
