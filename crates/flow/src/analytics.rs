// Archivo: analytics.rs
// Propósito: sesiones de uso de flows (tabla `flow_analytics`) y el cálculo
// de resúmenes por flow.
use crate::errors::{FlowError, Result};
use crate::repository::FlowRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Número de sesiones recientes devueltas por defecto.
pub const RECENT_SESSIONS_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSession {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub flow_version_id: Option<Uuid>,
    pub session_id: String,
    pub user_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_finalized: bool,
    pub finalized_at: Option<DateTime<Utc>>,
    pub total_nodes_visited: i32,
}

impl FlowSession {
    /// Minutos entre inicio y fin, redondeados. `None` si no terminó.
    pub fn duration_minutes(&self) -> Option<i64> {
        self.completed_at.map(|end| {
                             let secs = (end - self.started_at).num_seconds() as f64;
                             (secs / 60.0).round() as i64
                         })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowUsageSummary {
    pub flow_id: Uuid,
    pub flow_name: String,
    pub total_sessions: i64,
    pub completed_sessions: i64,
    pub finalized_sessions: i64,
    pub completion_rate: f64,
    pub finalization_rate: f64,
    pub average_nodes_visited: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_finalized: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSession {
    #[serde(flatten)]
    pub session: FlowSession,
    pub duration_minutes: Option<i64>,
}

/// Persistencia de sesiones.
pub trait AnalyticsRepository: Send + Sync {
    fn insert_session(&self, session: &FlowSession) -> Result<()>;
    /// `NotFound` si no hay sesión con ese `session_id`.
    fn get_session(&self, session_id: &str) -> Result<FlowSession>;
    fn update_session(&self, session: &FlowSession) -> Result<()>;
    /// Sesiones (de un flow, o todas) ordenadas por `started_at` desc.
    fn list_sessions(&self, flow_id: Option<&Uuid>) -> Result<Vec<FlowSession>>;
}

/// Agrega las sesiones de un flow. Las tasas se expresan en porcentaje y
/// valen 0 cuando no hay sesiones.
pub fn summarize(flow_id: Uuid, flow_name: &str, sessions: &[FlowSession]) -> FlowUsageSummary {
    let total = sessions.len() as i64;
    let completed = sessions.iter().filter(|s| s.completed_at.is_some()).count() as i64;
    let finalized = sessions.iter().filter(|s| s.is_finalized).count() as i64;
    let rate = |n: i64| if total > 0 { n as f64 / total as f64 * 100.0 } else { 0.0 };
    let average = if total > 0 {
        let sum: i64 = sessions.iter().map(|s| s.total_nodes_visited as i64).sum();
        (sum as f64 / total as f64).round() as i64
    } else {
        0
    };
    FlowUsageSummary { flow_id,
                       flow_name: flow_name.to_string(),
                       total_sessions: total,
                       completed_sessions: completed,
                       finalized_sessions: finalized,
                       completion_rate: rate(completed),
                       finalization_rate: rate(finalized),
                       average_nodes_visited: average,
                       last_used: sessions.iter().map(|s| s.started_at).max(),
                       last_finalized: sessions.iter().filter_map(|s| s.finalized_at).max() }
}

/// Identificador de sesión `session_{millis}_{9 caracteres}`.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("session_{}_{}", now.timestamp_millis(), suffix)
}

/// Servicio de analítica de uso.
pub struct AnalyticsService<R> where R: AnalyticsRepository + FlowRepository
{
    repo: Arc<R>,
}

impl<R> AnalyticsService<R> where R: AnalyticsRepository + FlowRepository
{
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Registra el inicio de una sesión y devuelve su identificador.
    pub fn track_session(&self,
                         flow_id: Uuid,
                         flow_version_id: Option<Uuid>,
                         session_id: Option<String>,
                         user_id: Option<Uuid>)
                         -> Result<String> {
        self.repo.get_flow(&flow_id)?;
        let now = Utc::now();
        let session_id = session_id.filter(|s| !s.trim().is_empty())
                                   .unwrap_or_else(|| generate_session_id(now));
        let session = FlowSession { id: Uuid::new_v4(),
                                    flow_id,
                                    flow_version_id,
                                    session_id: session_id.clone(),
                                    user_id,
                                    started_at: now,
                                    completed_at: None,
                                    is_finalized: false,
                                    finalized_at: None,
                                    total_nodes_visited: 0 };
        self.repo.insert_session(&session)?;
        Ok(session_id)
    }

    pub fn complete_session(&self, session_id: &str) -> Result<FlowSession> {
        let mut s = self.repo.get_session(session_id)?;
        s.completed_at = Some(Utc::now());
        self.repo.update_session(&s)?;
        Ok(s)
    }

    /// Finaliza la sesión; también la marca como completada.
    pub fn finalize_session(&self, session_id: &str) -> Result<FlowSession> {
        let mut s = self.repo.get_session(session_id)?;
        let now = Utc::now();
        s.is_finalized = true;
        s.finalized_at = Some(now);
        s.completed_at = Some(now);
        self.repo.update_session(&s)?;
        Ok(s)
    }

    pub fn update_nodes_visited(&self, session_id: &str, nodes_visited: i32) -> Result<FlowSession> {
        if nodes_visited < 0 {
            return Err(FlowError::Validation("nodes visited cannot be negative".into()));
        }
        let mut s = self.repo.get_session(session_id)?;
        s.total_nodes_visited = nodes_visited;
        self.repo.update_session(&s)?;
        Ok(s)
    }

    pub fn flow_summary(&self, flow_id: &Uuid) -> Result<FlowUsageSummary> {
        let flow = self.repo.get_flow(flow_id)?;
        let sessions = self.repo.list_sessions(Some(flow_id))?;
        Ok(summarize(flow.id, &flow.name, &sessions))
    }

    /// Resumen para todos los flows, en el orden de `list_flows`.
    pub fn all_flow_summaries(&self) -> Result<Vec<FlowUsageSummary>> {
        let flows = self.repo.list_flows()?;
        let mut by_flow: HashMap<Uuid, Vec<FlowSession>> = HashMap::new();
        for s in self.repo.list_sessions(None)? {
            by_flow.entry(s.flow_id).or_default().push(s);
        }
        Ok(flows.into_iter()
                .map(|f| {
                    let sessions = by_flow.remove(&f.flow.id).unwrap_or_default();
                    summarize(f.flow.id, &f.flow.name, &sessions)
                })
                .collect())
    }

    pub fn recent_sessions(&self, flow_id: &Uuid, limit: Option<usize>) -> Result<Vec<RecentSession>> {
        let limit = limit.unwrap_or(RECENT_SESSIONS_LIMIT);
        Ok(self.repo
               .list_sessions(Some(flow_id))?
               .into_iter()
               .take(limit)
               .map(|session| {
                   let duration_minutes = session.duration_minutes();
                   RecentSession { session, duration_minutes }
               })
               .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(completed: bool, finalized: bool, nodes: i32) -> FlowSession {
        let started = Utc::now() - Duration::minutes(10);
        FlowSession { id: Uuid::new_v4(),
                      flow_id: Uuid::nil(),
                      flow_version_id: None,
                      session_id: "s".into(),
                      user_id: None,
                      started_at: started,
                      completed_at: if completed { Some(started + Duration::seconds(150)) } else { None },
                      is_finalized: finalized,
                      finalized_at: if finalized { Some(started + Duration::seconds(150)) } else { None },
                      total_nodes_visited: nodes }
    }

    #[test]
    fn summary_of_no_sessions_is_zeroed() {
        let s = summarize(Uuid::nil(), "Cough", &[]);
        assert_eq!(s.total_sessions, 0);
        assert_eq!(s.completion_rate, 0.0);
        assert_eq!(s.average_nodes_visited, 0);
        assert!(s.last_used.is_none());
    }

    #[test]
    fn summary_rates_are_percentages() {
        let sessions = vec![session(true, true, 4), session(true, false, 3), session(false, false, 0),
                            session(false, false, 2)];
        let s = summarize(Uuid::nil(), "Cough", &sessions);
        assert_eq!(s.total_sessions, 4);
        assert_eq!(s.completed_sessions, 2);
        assert_eq!(s.finalized_sessions, 1);
        assert_eq!(s.completion_rate, 50.0);
        assert_eq!(s.finalization_rate, 25.0);
        // (4 + 3 + 0 + 2) / 4 = 2.25
        assert_eq!(s.average_nodes_visited, 2);
        assert!(s.last_finalized.is_some());
    }

    #[test]
    fn duration_rounds_to_minutes() {
        assert_eq!(session(true, false, 0).duration_minutes(), Some(3));
        assert_eq!(session(false, false, 0).duration_minutes(), None);
    }

    #[test]
    fn generated_session_ids_have_expected_shape() {
        let id = generate_session_id(Utc::now());
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }
}
