// Archivo: errors.rs
// Propósito: definir los errores del dominio de flujos y el alias Result<T>
// usado por las APIs del crate.
use thiserror::Error;

/// Mensaje genérico devuelto al caller cuando falla el almacenamiento.
pub const GENERIC_FAILURE: &str = "Could not complete the operation.";

/// Errores comunes del dominio de flujos.
///
/// - `NotFound`: entidad referenciada inexistente.
/// - `InvalidState`: operación ilegal para el estado actual de la versión.
/// - `Validation`: campos obligatorios ausentes o mal formados.
/// - `AuthRequired`: no hay principal autenticado.
/// - `Unauthorized`: credenciales rechazadas (email no permitido, API key).
/// - `Conflict`: violación de unicidad o escritura concurrente.
/// - `Storage`: fallo inesperado del almacenamiento.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("No encontrado: {0}")]
    NotFound(String),
    #[error("Estado inválido: {0}")]
    InvalidState(String),
    #[error("Error de validación: {0}")]
    Validation(String),
    #[error("Autenticación requerida: {0}")]
    AuthRequired(String),
    #[error("No autorizado: {0}")]
    Unauthorized(String),
    #[error("Conflicto: {0}")]
    Conflict(String),
    /// Error genérico de almacenamiento (BD, pool, mutex).
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
}

impl FlowError {
    /// Mensaje apto para el usuario final. Los errores de almacenamiento se
    /// registran y se sustituyen por `generic` para no filtrar detalles
    /// internos.
    pub fn public_message(&self, generic: &str) -> String {
        match self {
            FlowError::NotFound(m)
            | FlowError::InvalidState(m)
            | FlowError::Validation(m)
            | FlowError::AuthRequired(m)
            | FlowError::Unauthorized(m)
            | FlowError::Conflict(m) => m.clone(),
            FlowError::Storage(detail) => {
                log::error!("storage failure: {}", detail);
                generic.to_string()
            }
        }
    }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_details_are_hidden() {
        let e = FlowError::Storage("db: relation flow_versions does not exist".into());
        assert_eq!(e.public_message("Could not publish version."), "Could not publish version.");
        let e = FlowError::NotFound("Version not found".into());
        assert_eq!(e.public_message(GENERIC_FAILURE), "Version not found");
    }
}
