//! imci-api: configuración, protección de la API key, exportación de las
//! versiones publicadas y superficie HTTP del administrador IMCI.
//!
//! Se apoya en `flow::FlowRepository` e `imci_domain::DomainRepository`;
//! los binarios conectan las implementaciones Diesel de `imci-persistence`.

pub mod api_key;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod export;
pub mod http;
pub mod persistence;

pub use api_key::{ApiConfigView, ApiKeyCipher, ApiKeyManager, ApiKeyStore, InMemoryApiKeyStore};
pub use config::AdminConfig;
pub use dashboard::{DashboardService, DashboardStats, LastUpdatedFlow};
pub use errors::ApiError;
pub use export::{ExportService, FlowData, PublishedFlowData};
pub use http::{configure, AppState, FETCH_FAILED};
