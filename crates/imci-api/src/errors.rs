use flow::FlowError;
use imci_domain::DomainError;
use imci_persistence::PersistenceError;
use thiserror::Error;

// Errores de la capa de API.
//
// Agrupa los errores de los crates inferiores (`FlowError`, `DomainError`,
// `PersistenceError`) junto con los propios del cifrado de la API key y de
// la configuración del proceso.
#[derive(Error, Debug)]
pub enum ApiError {
  /// Errores del ciclo de vida de flows.
  #[error("Error de flujo: {0}")]
  Flow(#[from] FlowError),

  /// Errores del contenido clínico.
  #[error("Error de dominio: {0}")]
  Domain(#[from] DomainError),

  /// Fallos del almacenamiento fuera de los repositorios (fila api_config).
  #[error("Error de persistencia: {0}")]
  Persistence(#[from] PersistenceError),

  /// Texto cifrado mal formado, fallo de autenticación GCM o del RNG.
  #[error("Error de cifrado: {0}")]
  Crypto(String),

  /// Configuración ausente o inválida. El mensaje es apto para el cliente.
  #[error("Configuración: {0}")]
  Config(String),

  /// Credenciales rechazadas. El mensaje es apto para el cliente.
  #[error("No autorizado: {0}")]
  Unauthorized(String),

  #[error("Error interno: {0}")]
  Internal(String),
}

impl ApiError {
  /// Mensaje para el cliente. Los detalles internos se registran y se
  /// sustituyen por `generic`.
  pub fn public_message(&self, generic: &str) -> String {
    match self {
      ApiError::Flow(e) => e.public_message(generic),
      ApiError::Domain(e) => e.public_message(generic),
      ApiError::Config(m) | ApiError::Unauthorized(m) => m.clone(),
      ApiError::Persistence(_) | ApiError::Crypto(_) | ApiError::Internal(_) => {
        log::error!("{}", self);
        generic.to_string()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn internal_details_are_not_exposed() {
    let e = ApiError::Crypto("aead::Unspecified".into());
    assert_eq!(e.public_message("Internal server error"), "Internal server error");
    let e = ApiError::Unauthorized("Invalid API key".into());
    assert_eq!(e.public_message("Internal server error"), "Invalid API key");
    let e = ApiError::from(FlowError::NotFound("Flow not found".into()));
    assert_eq!(e.public_message("Internal server error"), "Flow not found");
  }
}
