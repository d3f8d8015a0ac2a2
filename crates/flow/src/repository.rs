// Archivo: repository.rs
// Propósito: definir el trait `FlowRepository`, contrato que deben cumplir
// las persistencias (Diesel, in-memory). Las operaciones que combinan varias
// escrituras son atómicas en el repositorio concreto.
use crate::domain::{Flow, FlowStatus, FlowSummary, FlowVersion, NewFlow, PublishOutcome, VersionWithFlow};
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Contrato del repositorio de flujos y versiones.
///
/// Las reglas del ciclo de vida (`FlowVersion::ensure_*`) se evalúan dentro
/// de la misma transacción que aplica el cambio, sobre el estado releído en
/// ella, nunca sobre una lectura previa del caller.
pub trait FlowRepository: Send + Sync {
    /// Crea el flow (status draft) y su versión 1 en una única transacción.
    fn create_flow_with_initial_version(&self, new_flow: &NewFlow, created_by: Uuid) -> Result<(Flow, FlowVersion)>;

    /// `NotFound("Flow not found")` si no existe.
    fn get_flow(&self, flow_id: &Uuid) -> Result<Flow>;

    /// Flows con su conteo de versiones, ordenados por `updated_at` desc.
    fn list_flows(&self) -> Result<Vec<FlowSummary>>;

    fn update_flow_details(&self, flow_id: &Uuid, name: &str, description: &str) -> Result<Flow>;

    fn set_flow_status(&self, flow_id: &Uuid, status: FlowStatus) -> Result<Flow>;

    /// `NotFound("Version not found")` si no existe.
    fn get_version(&self, version_id: &Uuid) -> Result<FlowVersion>;

    /// Versiones de un flow ordenadas por `version_number`.
    fn list_versions(&self, flow_id: &Uuid) -> Result<Vec<VersionWithFlow>>;

    /// Todas las versiones, ordenadas por nombre de flow y número.
    fn list_all_versions(&self) -> Result<Vec<VersionWithFlow>>;

    /// Versiones publicadas (a lo sumo una por flow).
    fn list_published_versions(&self) -> Result<Vec<VersionWithFlow>>;

    fn get_published_version(&self, flow_id: &Uuid) -> Result<Option<FlowVersion>>;

    /// Inserta un draft con el siguiente número del flow (ver
    /// `next_version_number`), calculado y reservado dentro de la
    /// transacción. `NotFound` si el flow no existe.
    fn insert_next_version(&self, flow_id: &Uuid, entry_conditions: JsonValue, created_by: Uuid)
                           -> Result<FlowVersion>;

    /// Archiva la versión publicada previa (si es otra) y publica la
    /// indicada, en una transacción.
    fn publish_version(&self, version_id: &Uuid, published_by: Uuid, at: DateTime<Utc>) -> Result<PublishOutcome>;

    fn archive_version(&self, version_id: &Uuid) -> Result<FlowVersion>;

    /// Borra un draft y todo su contenido (nodos, condiciones, diagnósticos,
    /// variables de la versión) en una transacción.
    fn delete_version(&self, version_id: &Uuid) -> Result<()>;
}
