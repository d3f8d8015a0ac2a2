//! Documento de exportación de las versiones publicadas.
//!
//! Cada versión publicada produce un `PublishedFlowData` con su cabecera y el
//! contenido completo (`flowData`). Una lectura parcial que falla deja ese
//! apartado vacío y se registra; nunca aborta la exportación.
use crate::errors::ApiError;
use chrono::{DateTime, Utc};
use flow::{FlowRepository, FlowStatus, VersionWithFlow};
use imci_domain::{DiagnosisWithDetails, DomainRepository, Node, VariableType};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotVersion {
    pub id: Uuid,
    pub status: FlowStatus,
    pub version_number: i32,
    pub entry_conditions: JsonValue,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub flow_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotVariable {
    pub id: Uuid,
    pub variable_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub default_value: String,
    pub is_global: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotFlow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: FlowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowData {
    pub nodes: Vec<Node>,
    pub variables: Vec<SnapshotVariable>,
    pub conditions: Vec<JsonValue>,
    pub diagnoses: Vec<DiagnosisWithDetails>,
    pub flow: Option<SnapshotFlow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedFlowData {
    pub version: SnapshotVersion,
    #[serde(rename = "flowData")]
    pub flow_data: FlowData,
}

pub struct ExportService {
    flows: Arc<dyn FlowRepository>,
    domain: Arc<dyn DomainRepository>,
}

/// Resultado de una lectura parcial: si falla se registra y se usa el valor
/// por defecto.
fn degraded<T, E>(res: Result<T, E>, what: &str, version_id: &Uuid) -> T
    where T: Default,
          E: Display
{
    res.unwrap_or_else(|e| {
           log::warn!("export: {} unavailable for version {}: {}", what, version_id, e);
           T::default()
       })
}

/// Condiciones del payload `entry_conditions`, marcadas como de entrada.
fn payload_conditions(entry_conditions: &JsonValue) -> Vec<JsonValue> {
    match entry_conditions {
        JsonValue::Array(items) => items.iter()
                                        .map(|item| {
                                            let mut item = item.clone();
                                            if let JsonValue::Object(map) = &mut item {
                                                map.insert("type".to_string(), JsonValue::from("entry"));
                                            }
                                            item
                                        })
                                        .collect(),
        _ => Vec::new(),
    }
}

impl ExportService {
    pub fn new(flows: Arc<dyn FlowRepository>, domain: Arc<dyn DomainRepository>) -> Self {
        Self { flows, domain }
    }

    /// Un documento por versión publicada. Sólo falla si no se puede listar
    /// las versiones publicadas.
    pub fn published_snapshot(&self) -> Result<Vec<PublishedFlowData>, ApiError> {
        let published = self.flows.list_published_versions()?;
        Ok(published.into_iter().map(|v| self.snapshot_of(v)).collect())
    }

    fn snapshot_of(&self, v: VersionWithFlow) -> PublishedFlowData {
        let VersionWithFlow { version, flow_name } = v;
        let vid = version.id;

        let nodes = degraded(self.domain.list_nodes(&vid), "nodes", &vid);
        let variables = degraded(self.domain.list_variables_for_version(&vid), "variables", &vid)
            .into_iter()
            .map(|var| SnapshotVariable { id: var.id,
                                          variable_id: var.variable_id,
                                          name: var.name,
                                          variable_type: var.variable_type,
                                          description: var.description,
                                          default_value: var.default_value,
                                          is_global: var.is_global })
            .collect();

        let mut conditions = payload_conditions(&version.entry_conditions);
        for c in degraded(self.domain.list_version_conditions(&vid), "conditions", &vid) {
            match serde_json::to_value(&c) {
                Ok(value) => conditions.push(value),
                Err(e) => log::warn!("export: condition {} skipped: {}", c.id, e),
            }
        }

        let diagnoses = degraded(self.domain.list_diagnoses(&vid), "diagnoses", &vid)
            .into_iter()
            .map(|d| {
                let id = d.id;
                self.domain.get_diagnosis_details(&id).unwrap_or_else(|e| {
                    log::warn!("export: details of diagnosis {} unavailable: {}", id, e);
                    DiagnosisWithDetails { diagnosis: d, conditions: vec![], medications: vec![], advice: vec![] }
                })
            })
            .collect();

        let flow = match self.flows.get_flow(&version.flow_id) {
            Ok(f) => Some(SnapshotFlow { id: f.id,
                                         name: f.name,
                                         description: f.description,
                                         status: f.status,
                                         created_at: f.created_at,
                                         updated_at: f.updated_at }),
            Err(e) => {
                log::warn!("export: flow {} unavailable: {}", version.flow_id, e);
                None
            }
        };

        let entry_conditions = match &version.entry_conditions {
            JsonValue::Null => JsonValue::Array(vec![]),
            other => other.clone(),
        };
        PublishedFlowData { version: SnapshotVersion { id: vid,
                                                       status: version.status,
                                                       version_number: version.version_number,
                                                       entry_conditions,
                                                       created_at: version.created_at,
                                                       published_at: version.published_at,
                                                       flow_name },
                            flow_data: FlowData { nodes, variables, conditions, diagnoses, flow } }
    }
}
