// Archivo: domain.rs
// Propósito: tipos del dominio de flujos (`Flow`, `FlowVersion`) y las reglas
// del ciclo de vida de versiones draft -> published -> archived.
use crate::errors::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Estado compartido por `Flow` y `FlowVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Draft,
    Published,
    Archived,
}

impl FlowStatus {
    /// Representación textual usada en la columna `status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Draft => "draft",
            FlowStatus::Published => "published",
            FlowStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(FlowStatus::Draft),
            "published" => Ok(FlowStatus::Published),
            "archived" => Ok(FlowStatus::Archived),
            other => Err(FlowError::Storage(format!("estado desconocido: {}", other))),
        }
    }
}

/// Árbol de decisión clínico con nombre. Cada flow tiene al menos una
/// versión.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: FlowStatus,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flow con el número de versiones, para listados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    #[serde(flatten)]
    pub flow: Flow,
    pub versions_count: i64,
}

/// Datos de entrada para crear un flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFlow {
    pub name: String,
    pub description: Option<String>,
}

impl NewFlow {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self { name: name.into(), description }
    }

    /// Normaliza el nombre (trim) y rechaza nombres vacíos.
    pub fn validated(self) -> Result<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(FlowError::Validation("Flow name is required".into()));
        }
        let description = self.description
                              .map(|d| d.trim().to_string())
                              .filter(|d| !d.is_empty());
        Ok(Self { name, description })
    }
}

/// Versión numerada de un flow. `entry_conditions` es un payload JSON opaco
/// que se copia tal cual al duplicar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVersion {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub version_number: i32,
    pub status: FlowStatus,
    pub entry_conditions: JsonValue,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub published_by: Option<Uuid>,
}

impl FlowVersion {
    /// Construye una versión nueva en estado `draft`.
    pub fn draft(flow_id: Uuid, version_number: i32, entry_conditions: JsonValue, created_by: Uuid) -> Self {
        Self { id: Uuid::new_v4(),
               flow_id,
               version_number,
               status: FlowStatus::Draft,
               entry_conditions,
               created_by: Some(created_by),
               created_at: Utc::now(),
               published_at: None,
               published_by: None }
    }

    /// Una versión archivada es terminal y no puede volver a publicarse.
    pub fn ensure_publishable(&self) -> Result<()> {
        if self.status == FlowStatus::Archived {
            return Err(FlowError::InvalidState("Archived versions cannot be published".into()));
        }
        Ok(())
    }

    pub fn ensure_archivable(&self) -> Result<()> {
        if self.status != FlowStatus::Published {
            return Err(FlowError::InvalidState("Only published versions can be archived".into()));
        }
        Ok(())
    }

    /// `total_versions` es el número de versiones del flow, incluida esta.
    pub fn ensure_deletable(&self, total_versions: i64) -> Result<()> {
        if self.status != FlowStatus::Draft {
            return Err(FlowError::InvalidState("Only draft versions can be deleted".into()));
        }
        if total_versions <= 1 {
            return Err(FlowError::InvalidState("Cannot delete the only version of a flow".into()));
        }
        Ok(())
    }
}

/// Payload inicial de `entry_conditions` para versiones nuevas.
pub fn empty_entry_conditions() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

/// Siguiente número de versión. `last_issued` es el último número entregado
/// para el flow (aunque esa versión ya se haya borrado); se toma el mayor
/// entre él y las versiones existentes, de modo que un número no se repite.
pub fn next_version_number<I>(last_issued: i32, existing: I) -> i32
    where I: IntoIterator<Item = i32>
{
    existing.into_iter().max().unwrap_or(0).max(last_issued) + 1
}

/// Versión acompañada del nombre del flow al que pertenece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionWithFlow {
    #[serde(flatten)]
    pub version: FlowVersion,
    pub flow_name: String,
}

/// Resultado de publicar: la versión publicada y, si la había, la versión
/// anterior que fue archivada en la misma transacción.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub version: FlowVersion,
    pub demoted: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn version(status: FlowStatus) -> FlowVersion {
        let mut v = FlowVersion::draft(Uuid::new_v4(), 1, json!({}), Uuid::new_v4());
        v.status = status;
        v
    }

    #[test]
    fn next_number_starts_at_one_and_skips_gaps() {
        assert_eq!(next_version_number(0, Vec::<i32>::new()), 1);
        assert_eq!(next_version_number(0, vec![1, 2, 5]), 6);
    }

    #[test]
    fn next_number_honours_deleted_highest() {
        // v3 fue entregada y borrada: sólo quedan 1 y 2
        assert_eq!(next_version_number(3, vec![1, 2]), 4);
        assert_eq!(next_version_number(1, vec![1, 2]), 3);
    }

    #[test]
    fn archive_requires_published() {
        assert!(version(FlowStatus::Published).ensure_archivable().is_ok());
        for s in [FlowStatus::Draft, FlowStatus::Archived] {
            match version(s).ensure_archivable() {
                Err(FlowError::InvalidState(msg)) => assert_eq!(msg, "Only published versions can be archived"),
                other => panic!("expected InvalidState, got {:?}", other),
            }
        }
    }

    #[test]
    fn delete_requires_draft_and_siblings() {
        assert!(version(FlowStatus::Draft).ensure_deletable(2).is_ok());
        match version(FlowStatus::Draft).ensure_deletable(1) {
            Err(FlowError::InvalidState(msg)) => assert_eq!(msg, "Cannot delete the only version of a flow"),
            other => panic!("expected InvalidState, got {:?}", other),
        }
        match version(FlowStatus::Published).ensure_deletable(3) {
            Err(FlowError::InvalidState(msg)) => assert_eq!(msg, "Only draft versions can be deleted"),
            other => panic!("expected InvalidState, got {:?}", other),
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [FlowStatus::Draft, FlowStatus::Published, FlowStatus::Archived] {
            assert_eq!(s.as_str().parse::<FlowStatus>().unwrap(), s);
        }
        assert!("pending".parse::<FlowStatus>().is_err());
    }

    #[test]
    fn new_flow_rejects_blank_names() {
        assert!(matches!(NewFlow::new("   ", None).validated(), Err(FlowError::Validation(_))));
        let ok = NewFlow::new(" Cough ", Some("  ".into())).validated().unwrap();
        assert_eq!(ok.name, "Cough");
        assert!(ok.description.is_none());
    }
}
