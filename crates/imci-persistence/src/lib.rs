//! Persistencia Diesel de los flows IMCI.
//!
//! `Database` abre el pool (SQLite por defecto, Postgres con la feature
//! `pg`) y aplica las migraciones embebidas; de él se obtienen los
//! repositorios que implementan los traits de `flow` e `imci-domain`.

mod api_config;
mod db;
mod domain_persistence;
mod flow_persistence;
pub mod schema;

pub use api_config::DieselApiConfigRepository;
#[cfg(not(feature = "pg"))]
pub use db::new_sqlite_for_test;
pub use db::{Database, PersistenceError, MIGRATIONS};
pub use domain_persistence::DieselDomainRepository;
pub use flow_persistence::DieselFlowRepository;
