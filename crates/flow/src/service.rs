// Archivo: service.rs
// Propósito: implementar `FlowVersionService`, la capa orquestadora del ciclo
// de vida de versiones (crear, publicar, archivar, borrar, duplicar). Debe
// ser invocada desde handlers HTTP o desde la CLI con un `Principal` ya
// resuelto.
use crate::auth::Principal;
use crate::domain::{empty_entry_conditions, Flow, FlowStatus, FlowSummary, FlowVersion, NewFlow, VersionWithFlow};
use crate::errors::Result;
use crate::repository::FlowRepository;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Servicio de alto nivel sobre flows y versiones.
///
/// No mantiene caché: cada lectura consulta el repositorio, de modo que el
/// export siempre ve el último estado confirmado.
pub struct FlowVersionService<R> where R: FlowRepository
{
    repo: Arc<R>,
}

impl<R> Clone for FlowVersionService<R> where R: FlowRepository
{
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone() }
    }
}

impl<R> FlowVersionService<R> where R: FlowRepository
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    /// Crea un flow junto con su versión 1 (draft) de forma atómica.
    pub fn create_flow(&self, new_flow: NewFlow, principal: &Principal) -> Result<(Flow, FlowVersion)> {
        let new_flow = new_flow.validated()?;
        let (flow, version) = self.repo.create_flow_with_initial_version(&new_flow, principal.user_id)?;
        log::info!("flow {} '{}' created by {}", flow.id, flow.name, principal.email);
        Ok((flow, version))
    }

    pub fn get_flow(&self, flow_id: &Uuid) -> Result<Flow> {
        self.repo.get_flow(flow_id)
    }

    pub fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        self.repo.list_flows()
    }

    /// Actualiza nombre y descripción (descripción vacía por defecto).
    pub fn update_flow_details(&self,
                               flow_id: &Uuid,
                               name: &str,
                               description: Option<&str>,
                               principal: &Principal)
                               -> Result<Flow> {
        let details = NewFlow::new(name, None).validated()?;
        let flow = self.repo
                       .update_flow_details(flow_id, &details.name, description.unwrap_or("").trim())?;
        log::info!("flow {} details updated by {}", flow_id, principal.email);
        Ok(flow)
    }

    /// Marca el flow (no sus versiones) como publicado.
    pub fn publish_flow(&self, flow_id: &Uuid, principal: &Principal) -> Result<Flow> {
        let flow = self.repo.set_flow_status(flow_id, FlowStatus::Published)?;
        log::info!("flow {} marked published by {}", flow_id, principal.email);
        Ok(flow)
    }

    /// Nuevo draft con número máximo + 1.
    pub fn create(&self, flow_id: &Uuid, principal: &Principal) -> Result<FlowVersion> {
        let v = self.repo.insert_next_version(flow_id, empty_entry_conditions(), principal.user_id)?;
        log::info!("version {} (#{}) created for flow {}", v.id, v.version_number, flow_id);
        Ok(v)
    }

    /// Devuelve la última versión del flow, creando la 1 si no tiene.
    pub fn get_or_create(&self, flow_id: &Uuid, principal: &Principal) -> Result<FlowVersion> {
        let versions = self.repo.list_versions(flow_id)?;
        match versions.into_iter().max_by_key(|v| v.version.version_number) {
            Some(latest) => Ok(latest.version),
            None => self.create(flow_id, principal),
        }
    }

    /// Publica la versión, archivando la anterior publicada del mismo flow.
    pub fn publish(&self, version_id: &Uuid, principal: &Principal) -> Result<FlowVersion> {
        let outcome = self.repo.publish_version(version_id, principal.user_id, Utc::now())?;
        if let Some(old) = outcome.demoted {
            log::info!("version {} archived in favour of {}", old, version_id);
        }
        log::info!("version {} published by {}", version_id, principal.email);
        Ok(outcome.version)
    }

    pub fn archive(&self, version_id: &Uuid, principal: &Principal) -> Result<FlowVersion> {
        let v = self.repo.archive_version(version_id)?;
        log::info!("version {} archived by {}", version_id, principal.email);
        Ok(v)
    }

    pub fn delete(&self, version_id: &Uuid, principal: &Principal) -> Result<()> {
        self.repo.delete_version(version_id)?;
        log::info!("version {} deleted by {}", version_id, principal.email);
        Ok(())
    }

    /// Duplica una versión como nuevo draft copiando sólo
    /// `entry_conditions`. Nodos, diagnósticos y variables no se copian.
    pub fn duplicate(&self, version_id: &Uuid, notes: Option<&str>, principal: &Principal) -> Result<FlowVersion> {
        let source = self.repo.get_version(version_id)?;
        let v = self.repo
                    .insert_next_version(&source.flow_id, source.entry_conditions.clone(), principal.user_id)?;
        log::info!("version {} duplicated into {} (#{}) notes={:?}",
                   version_id,
                   v.id,
                   v.version_number,
                   notes.unwrap_or(""));
        Ok(v)
    }

    pub fn get_version(&self, version_id: &Uuid) -> Result<FlowVersion> {
        self.repo.get_version(version_id)
    }

    pub fn get_published(&self, flow_id: &Uuid) -> Result<Option<FlowVersion>> {
        self.repo.get_published_version(flow_id)
    }

    pub fn versions(&self, flow_id: &Uuid) -> Result<Vec<VersionWithFlow>> {
        self.repo.list_versions(flow_id)
    }

    pub fn all_versions(&self) -> Result<Vec<VersionWithFlow>> {
        self.repo.list_all_versions()
    }

    pub fn published_versions(&self) -> Result<Vec<VersionWithFlow>> {
        self.repo.list_published_versions()
    }
}
