//! Crate `flow`: modelo y ciclo de vida de flujos clínicos versionados.
//!
//! Define los tipos de dominio (`Flow`, `FlowVersion`), el contrato de
//! persistencia `FlowRepository`, el servicio `FlowVersionService` que aplica
//! las transiciones draft -> published -> archived, la identidad explícita
//! del operador (`Principal`) y la analítica de sesiones. Incluye una
//! implementación en memoria útil para pruebas (`InMemoryFlowRepository`).
//!
//! Reglas principales:
//! - A lo sumo una versión publicada por flow; publicar archiva la anterior
//!   en la misma transacción.
//! - Los números de versión son crecientes por flow y no se reutilizan.
//! - Sólo se archivan versiones publicadas; sólo se borran drafts de flows
//!   con más de una versión.
//!
//! Ejemplo rápido:
//! ```rust
//! use flow::stubs::InMemoryFlowRepository;
//! use flow::{FlowVersionService, NewFlow, Principal, Role};
//! use std::sync::Arc;
//! let service = FlowVersionService::new(Arc::new(InMemoryFlowRepository::new()));
//! let who = Principal { user_id: uuid::Uuid::new_v4(), email: "nurse@clinic.org".into(), role: Role::Editor };
//! let (_flow, v1) = service.create_flow(NewFlow::new("Cough Assessment", None), &who).unwrap();
//! assert_eq!(v1.version_number, 1);
//! ```
pub mod analytics;
pub mod auth;
pub mod domain;
pub mod errors;
pub mod repository;
pub mod service;
pub mod stubs;

pub use analytics::*;
pub use auth::*;
pub use domain::*;
pub use errors::*;
pub use repository::*;
pub use service::*;
pub use stubs::*;
