//! Superficie HTTP (actix-web): exportación autenticada y health check.
use crate::api_key::ApiKeyManager;
use crate::config::AdminConfig;
use crate::errors::ApiError;
use crate::export::{ExportService, PublishedFlowData};
use actix_web::http::{header, StatusCode};
use actix_web::{get, web, HttpRequest, HttpResponse, Responder, ResponseError, Result as ActixResult};
use chrono::{SecondsFormat, Utc};
use flow::{FlowError, GENERIC_FAILURE};
use imci_domain::DomainError;
use imci_persistence::Database;
use serde::Serialize;
use std::sync::Arc;

pub const FETCH_FAILED: &str = "Could not fetch published flow versions with data.";

/// Estado compartido por los handlers.
pub struct AppState {
    pub api_keys: Arc<ApiKeyManager>,
    pub export: Arc<ExportService>,
}

impl AppState {
    pub fn new(api_keys: ApiKeyManager, export: ExportService) -> Self {
        Self { api_keys: Arc::new(api_keys), export: Arc::new(export) }
    }

    /// Estado respaldado por la base de datos configurada.
    pub fn from_database(db: &Database, config: &AdminConfig) -> Result<Self, ApiError> {
        let api_keys = ApiKeyManager::new(Arc::new(db.api_config_repository()), config.cipher()?, &config.api_base_url);
        let export = ExportService::new(Arc::new(db.flow_repository()), Arc::new(db.domain_repository()));
        Ok(Self::new(api_keys, export))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct FlowsResponse {
    success: bool,
    data: Vec<PublishedFlowData>,
    timestamp: String,
    total_flows: usize,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Flow(FlowError::AuthRequired(_)) | ApiError::Flow(FlowError::Unauthorized(_)) => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Flow(FlowError::NotFound(_)) | ApiError::Domain(DomainError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Flow(FlowError::Validation(_)) | ApiError::Domain(DomainError::ValidationError(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Flow(FlowError::Conflict(_))
            | ApiError::Flow(FlowError::InvalidState(_))
            | ApiError::Domain(DomainError::Conflict(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse { error: self.public_message(GENERIC_FAILURE) })
    }
}

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imci-flows"
    }))
}

/// Versiones publicadas con todo su contenido. Requiere
/// `Authorization: Bearer <api key>`.
#[get("/api/flows")]
async fn list_published_flows(req: HttpRequest, data: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let authorization = req.headers()
                           .get(header::AUTHORIZATION)
                           .and_then(|h| h.to_str().ok())
                           .map(str::to_string);
    let api_keys = data.api_keys.clone();
    let auth = web::block(move || api_keys.authorize(authorization.as_deref())).await;
    auth.map_err(|e| ApiError::Internal(e.to_string()))??;

    let export = data.export.clone();
    let snapshot = web::block(move || export.published_snapshot()).await;
    match snapshot {
        Ok(Ok(flows)) => {
            let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            Ok(HttpResponse::Ok().json(FlowsResponse { success: true, total_flows: flows.len(), data: flows, timestamp }))
        }
        Ok(Err(e)) => {
            log::error!("published snapshot failed: {}", e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse { error: FETCH_FAILED.to_string() }))
        }
        Err(e) => {
            log::error!("published snapshot task failed: {}", e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse { error: FETCH_FAILED.to_string() }))
        }
    }
}

/// Registra las rutas en una `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check).service(list_published_flows);
}
