use crate::errors::ApiError;
use chrono::{DateTime, Utc};
use flow::{AnalyticsRepository, FlowRepository, UserDirectory};
use imci_domain::DomainRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastUpdatedFlow {
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Cifras de la portada del administrador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub user_count: i64,
    pub flow_count: i64,
    pub variable_count: i64,
    pub total_sessions: i64,
    pub total_finalized_sessions: i64,
    pub last_updated_flow: Option<LastUpdatedFlow>,
}

pub struct DashboardService<R>
    where R: FlowRepository + UserDirectory + AnalyticsRepository
{
    repo: Arc<R>,
    domain: Arc<dyn DomainRepository>,
}

impl<R> DashboardService<R> where R: FlowRepository + UserDirectory + AnalyticsRepository
{
    pub fn new(repo: Arc<R>, domain: Arc<dyn DomainRepository>) -> Self {
        Self { repo, domain }
    }

    pub fn stats(&self) -> Result<DashboardStats, ApiError> {
        let flows = self.repo.list_flows()?;
        let sessions = self.repo.list_sessions(None)?;
        let last_updated_flow = flows.iter()
                                     .max_by_key(|f| f.flow.updated_at)
                                     .map(|f| LastUpdatedFlow { title: f.flow.name.clone(),
                                                                updated_at: f.flow.updated_at });
        Ok(DashboardStats { user_count: self.repo.count_users()?,
                            flow_count: flows.len() as i64,
                            variable_count: self.domain.list_global_variables()?.len() as i64,
                            total_sessions: sessions.len() as i64,
                            total_finalized_sessions: sessions.iter().filter(|s| s.is_finalized).count() as i64,
                            last_updated_flow })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::stubs::InMemoryFlowRepository;
    use flow::{AnalyticsService, FlowVersionService, NewFlow, Principal, Role};
    use imci_domain::DomainStubs;
    use uuid::Uuid;

    #[test]
    fn stats_count_everything() {
        let repo = Arc::new(InMemoryFlowRepository::new());
        let domain: Arc<dyn DomainRepository> = Arc::new(DomainStubs::sample_repo().unwrap());
        let dashboard = DashboardService::new(repo.clone(), domain);
        let empty = dashboard.stats().unwrap();
        assert_eq!(empty.flow_count, 0);
        assert_eq!(empty.variable_count, 2);
        assert_eq!(empty.last_updated_flow, None);

        let who = Principal { user_id: Uuid::new_v4(), email: "editor@clinic.org".into(), role: Role::Editor };
        let versions = FlowVersionService::new(repo.clone());
        let (flow, _) = versions.create_flow(NewFlow::new("Cough Assessment", None), &who).unwrap();
        let analytics = AnalyticsService::new(repo.clone());
        let s1 = analytics.track_session(flow.id, None, None, None).unwrap();
        analytics.track_session(flow.id, None, Some("manual-session".into()), None).unwrap();
        analytics.finalize_session(&s1).unwrap();

        let stats = dashboard.stats().unwrap();
        assert_eq!(stats.flow_count, 1);
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_finalized_sessions, 1);
        assert_eq!(stats.last_updated_flow.map(|f| f.title), Some("Cough Assessment".to_string()));
    }
}
