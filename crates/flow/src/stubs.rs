// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// `InMemoryFlowRepository` guarda flows, versiones, usuarios y sesiones en un
// único `Mutex`, de modo que las operaciones compuestas (publicar, borrar)
// son atómicas igual que en la persistencia real. No es durable.
use crate::analytics::{AnalyticsRepository, FlowSession};
use crate::auth::{User, UserDirectory};
use crate::domain::{empty_entry_conditions, next_version_number, Flow, FlowStatus, FlowSummary, FlowVersion, NewFlow,
                    PublishOutcome, VersionWithFlow};
use crate::errors::{FlowError, Result};
use crate::repository::FlowRepository;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct MemState {
    flows: HashMap<Uuid, Flow>,
    versions: HashMap<Uuid, FlowVersion>,
    users: HashMap<Uuid, User>,
    sessions: Vec<FlowSession>,
    // último número de versión entregado por flow
    last_version: HashMap<Uuid, i32>,
}

impl MemState {
    fn flow_versions(&self, flow_id: &Uuid) -> impl Iterator<Item = &FlowVersion> + '_ {
        let flow_id = *flow_id;
        self.versions.values().filter(move |v| v.flow_id == flow_id)
    }

    fn with_flow_name(&self, v: &FlowVersion) -> VersionWithFlow {
        let flow_name = self.flows.get(&v.flow_id).map(|f| f.name.clone()).unwrap_or_default();
        VersionWithFlow { version: v.clone(), flow_name }
    }
}

// Minimal in-memory repository (not durable)
pub struct InMemoryFlowRepository {
    state: Mutex<MemState>,
}

impl InMemoryFlowRepository {
    /// Crea una nueva instancia del repositorio en memoria.
    pub fn new() -> Self {
        Self { state: Mutex::new(MemState::default()) }
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `FlowError::Storage`.
    fn lock(&self) -> Result<MutexGuard<'_, MemState>> {
        self.state.lock().map_err(|e| FlowError::Storage(format!("mutex poisoned: {:?}", e)))
    }
}

impl Default for InMemoryFlowRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn version_not_found() -> FlowError {
    FlowError::NotFound("Version not found".into())
}

fn flow_not_found() -> FlowError {
    FlowError::NotFound("Flow not found".into())
}

impl FlowRepository for InMemoryFlowRepository {
    fn create_flow_with_initial_version(&self, new_flow: &NewFlow, created_by: Uuid) -> Result<(Flow, FlowVersion)> {
        let now = Utc::now();
        let flow = Flow { id: Uuid::new_v4(),
                          name: new_flow.name.clone(),
                          description: new_flow.description.clone(),
                          status: FlowStatus::Draft,
                          created_by: Some(created_by),
                          created_at: now,
                          updated_at: now };
        let version = FlowVersion::draft(flow.id, 1, empty_entry_conditions(), created_by);
        let mut st = self.lock()?;
        st.flows.insert(flow.id, flow.clone());
        st.last_version.insert(flow.id, version.version_number);
        st.versions.insert(version.id, version.clone());
        Ok((flow, version))
    }

    fn get_flow(&self, flow_id: &Uuid) -> Result<Flow> {
        self.lock()?.flows.get(flow_id).cloned().ok_or_else(flow_not_found)
    }

    fn list_flows(&self) -> Result<Vec<FlowSummary>> {
        let st = self.lock()?;
        let mut out: Vec<FlowSummary> = st.flows
                                          .values()
                                          .map(|f| FlowSummary { flow: f.clone(),
                                                                 versions_count: st.flow_versions(&f.id).count() as i64 })
                                          .collect();
        out.sort_by(|a, b| b.flow.updated_at.cmp(&a.flow.updated_at));
        Ok(out)
    }

    fn update_flow_details(&self, flow_id: &Uuid, name: &str, description: &str) -> Result<Flow> {
        let mut st = self.lock()?;
        let flow = st.flows.get_mut(flow_id).ok_or_else(flow_not_found)?;
        flow.name = name.to_string();
        flow.description = Some(description.to_string());
        flow.updated_at = Utc::now();
        Ok(flow.clone())
    }

    fn set_flow_status(&self, flow_id: &Uuid, status: FlowStatus) -> Result<Flow> {
        let mut st = self.lock()?;
        let flow = st.flows.get_mut(flow_id).ok_or_else(flow_not_found)?;
        flow.status = status;
        flow.updated_at = Utc::now();
        Ok(flow.clone())
    }

    fn get_version(&self, version_id: &Uuid) -> Result<FlowVersion> {
        self.lock()?.versions.get(version_id).cloned().ok_or_else(version_not_found)
    }

    fn list_versions(&self, flow_id: &Uuid) -> Result<Vec<VersionWithFlow>> {
        let st = self.lock()?;
        let mut out: Vec<VersionWithFlow> = st.flow_versions(flow_id).map(|v| st.with_flow_name(v)).collect();
        out.sort_by_key(|v| v.version.version_number);
        Ok(out)
    }

    fn list_all_versions(&self) -> Result<Vec<VersionWithFlow>> {
        let st = self.lock()?;
        let mut out: Vec<VersionWithFlow> = st.versions.values().map(|v| st.with_flow_name(v)).collect();
        out.sort_by(|a, b| {
               a.flow_name
                .cmp(&b.flow_name)
                .then(a.version.version_number.cmp(&b.version.version_number))
           });
        Ok(out)
    }

    fn list_published_versions(&self) -> Result<Vec<VersionWithFlow>> {
        Ok(self.list_all_versions()?
               .into_iter()
               .filter(|v| v.version.status == FlowStatus::Published)
               .collect())
    }

    fn get_published_version(&self, flow_id: &Uuid) -> Result<Option<FlowVersion>> {
        let st = self.lock()?;
        let found = st.flow_versions(flow_id).find(|v| v.status == FlowStatus::Published).cloned();
        Ok(found)
    }

    fn insert_next_version(&self, flow_id: &Uuid, entry_conditions: JsonValue, created_by: Uuid)
                           -> Result<FlowVersion> {
        let mut st = self.lock()?;
        if !st.flows.contains_key(flow_id) {
            return Err(flow_not_found());
        }
        let last_issued = st.last_version.get(flow_id).copied().unwrap_or(0);
        let number = next_version_number(last_issued, st.flow_versions(flow_id).map(|v| v.version_number));
        let version = FlowVersion::draft(*flow_id, number, entry_conditions, created_by);
        st.last_version.insert(*flow_id, number);
        st.versions.insert(version.id, version.clone());
        Ok(version)
    }

    fn publish_version(&self, version_id: &Uuid, published_by: Uuid, at: DateTime<Utc>) -> Result<PublishOutcome> {
        let mut st = self.lock()?;
        let target = st.versions.get(version_id).cloned().ok_or_else(version_not_found)?;
        target.ensure_publishable()?;
        if target.status == FlowStatus::Published {
            return Ok(PublishOutcome { version: target, demoted: None });
        }
        let demoted = st.flow_versions(&target.flow_id)
                        .find(|v| v.status == FlowStatus::Published && v.id != target.id)
                        .map(|v| v.id);
        if let Some(old) = demoted {
            if let Some(v) = st.versions.get_mut(&old) {
                v.status = FlowStatus::Archived;
            }
        }
        let v = st.versions.get_mut(version_id).ok_or_else(version_not_found)?;
        v.status = FlowStatus::Published;
        v.published_at = Some(at);
        v.published_by = Some(published_by);
        Ok(PublishOutcome { version: v.clone(), demoted })
    }

    fn archive_version(&self, version_id: &Uuid) -> Result<FlowVersion> {
        let mut st = self.lock()?;
        let v = st.versions.get_mut(version_id).ok_or_else(version_not_found)?;
        v.ensure_archivable()?;
        v.status = FlowStatus::Archived;
        Ok(v.clone())
    }

    fn delete_version(&self, version_id: &Uuid) -> Result<()> {
        let mut st = self.lock()?;
        let v = st.versions.get(version_id).cloned().ok_or_else(version_not_found)?;
        let total = st.flow_versions(&v.flow_id).count() as i64;
        v.ensure_deletable(total)?;
        st.versions.remove(version_id);
        for s in st.sessions.iter_mut().filter(|s| s.flow_version_id == Some(*version_id)) {
            s.flow_version_id = None;
        }
        Ok(())
    }
}

impl UserDirectory for InMemoryFlowRepository {
    fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let st = self.lock()?;
        Ok(st.users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    fn create_user(&self, user: &User) -> Result<()> {
        let mut st = self.lock()?;
        if st.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(FlowError::Conflict(format!("user {} already exists", user.email)));
        }
        st.users.insert(user.id, user.clone());
        Ok(())
    }

    fn update_username(&self, user_id: &Uuid, username: &str) -> Result<User> {
        let mut st = self.lock()?;
        let u = st.users
                  .get_mut(user_id)
                  .ok_or_else(|| FlowError::NotFound("User not found".into()))?;
        u.username = username.to_string();
        Ok(u.clone())
    }

    fn count_users(&self) -> Result<i64> {
        Ok(self.lock()?.users.len() as i64)
    }
}

impl AnalyticsRepository for InMemoryFlowRepository {
    fn insert_session(&self, session: &FlowSession) -> Result<()> {
        self.lock()?.sessions.push(session.clone());
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<FlowSession> {
        self.lock()?
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
            .ok_or_else(|| FlowError::NotFound("Session not found".into()))
    }

    fn update_session(&self, session: &FlowSession) -> Result<()> {
        let mut st = self.lock()?;
        let slot = st.sessions
                     .iter_mut()
                     .find(|s| s.id == session.id)
                     .ok_or_else(|| FlowError::NotFound("Session not found".into()))?;
        *slot = session.clone();
        Ok(())
    }

    fn list_sessions(&self, flow_id: Option<&Uuid>) -> Result<Vec<FlowSession>> {
        let st = self.lock()?;
        let mut out: Vec<FlowSession> = st.sessions
                                          .iter()
                                          .filter(|s| flow_id.map_or(true, |f| s.flow_id == *f))
                                          .cloned()
                                          .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }
}
