use crate::domain_persistence::DieselDomainRepository;
use crate::flow_persistence::DieselFlowRepository;
use crate::api_config::DieselApiConfigRepository;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use flow::FlowError;
use imci_domain::DomainError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

const POOL_SIZE: u32 = 8;
const MIGRATION_ATTEMPTS: u32 = 3;
const MIGRATION_RETRY_DELAY: Duration = Duration::from_secs(1);

#[cfg(feature = "pg")]
pub(crate) type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
pub(crate) type DbConn = SqliteConnection;
type DbPool = Pool<ConnectionManager<DbConn>>;
pub(crate) type PooledConn = PooledConnection<ConnectionManager<DbConn>>;

/// Errores propios de la capa de persistencia (pool, migraciones, filas
/// corruptas). Se convierten en `FlowError::Storage` / `DomainError::ExternalError`.
#[derive(Debug, Error)]
pub enum PersistenceError {
  #[error("Configuración de base de datos: {0}")]
  Config(String),
  #[error("Pool de conexiones: {0}")]
  Pool(String),
  #[error("Migraciones: {0}")]
  Migration(String),
  #[error("db: {0}")]
  Database(#[from] DieselError),
  #[error("Fila corrupta: {0}")]
  Corrupt(String),
}

impl From<PersistenceError> for FlowError {
  fn from(e: PersistenceError) -> Self {
    FlowError::Storage(e.to_string())
  }
}

impl From<PersistenceError> for DomainError {
  fn from(e: PersistenceError) -> Self {
    DomainError::ExternalError(e.to_string())
  }
}

/// Error de una closure transaccional: fallo de Diesel (provoca rollback y
/// se reporta como error de almacenamiento) o error de dominio.
pub(crate) enum TxError<E> {
  Db(DieselError),
  App(E),
}

impl<E> From<DieselError> for TxError<E> {
  fn from(e: DieselError) -> Self {
    TxError::Db(e)
  }
}

impl From<TxError<FlowError>> for FlowError {
  fn from(e: TxError<FlowError>) -> Self {
    match e {
      TxError::Db(e) => FlowError::Storage(format!("db: {}", e)),
      TxError::App(e) => e,
    }
  }
}

impl From<TxError<DomainError>> for DomainError {
  fn from(e: TxError<DomainError>) -> Self {
    match e {
      TxError::Db(e) => DomainError::ExternalError(format!("db: {}", e)),
      TxError::App(e) => e,
    }
  }
}

/// Transacción de escritura. En SQLite es `BEGIN IMMEDIATE`, que serializa
/// a los escritores; en Postgres las operaciones bloquean la fila del flow
/// con `lock_flow`.
#[cfg(not(feature = "pg"))]
pub(crate) fn write_tx<T, E, F>(conn: &mut DbConn, f: F) -> Result<T, E>
  where F: FnOnce(&mut DbConn) -> Result<T, E>,
        E: From<DieselError>
{
  conn.immediate_transaction(f)
}

#[cfg(feature = "pg")]
pub(crate) fn write_tx<T, E, F>(conn: &mut DbConn, f: F) -> Result<T, E>
  where F: FnOnce(&mut DbConn) -> Result<T, E>,
        E: From<DieselError>
{
  conn.transaction(f)
}

/// Bloquea la fila del flow hasta el fin de la transacción. Devuelve false
/// si el flow no existe.
#[cfg(feature = "pg")]
pub(crate) fn lock_flow(conn: &mut DbConn, flow_id: &str) -> QueryResult<bool> {
  use crate::schema::flows;
  let row = flows::table.filter(flows::id.eq(flow_id))
                        .select(flows::id)
                        .for_update()
                        .first::<String>(conn)
                        .optional()?;
  Ok(row.is_some())
}

#[cfg(not(feature = "pg"))]
pub(crate) fn lock_flow(conn: &mut DbConn, flow_id: &str) -> QueryResult<bool> {
  use crate::schema::flows;
  let row = flows::table.filter(flows::id.eq(flow_id)).select(flows::id).first::<String>(conn).optional()?;
  Ok(row.is_some())
}

#[cfg(not(feature = "pg"))]
#[derive(Debug)]
struct SqlitePragmas;

#[cfg(not(feature = "pg"))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
    use diesel::connection::SimpleConnection;
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

/// Pool de conexiones compartido por los repositorios Diesel.
#[derive(Clone)]
pub struct Database {
  pool: Arc<DbPool>,
}

impl Database {
  /// Abre el pool y aplica las migraciones pendientes.
  pub fn open(database_url: &str) -> Result<Self, PersistenceError> {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let builder = Pool::builder().max_size(POOL_SIZE);
    #[cfg(not(feature = "pg"))]
    let builder = builder.connection_customizer(Box::new(SqlitePragmas));
    let pool = builder.build(manager).map_err(|e| PersistenceError::Pool(e.to_string()))?;
    let db = Database { pool: Arc::new(pool) };
    db.run_migrations()?;
    Ok(db)
  }

  /// Lee `DATABASE_URL` (o `IMCI_DB_URL`) tras cargar `.env`.
  pub fn from_env() -> Result<Self, PersistenceError> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").or_else(|_| std::env::var("IMCI_DB_URL"))
                                           .map_err(|_| {
                                             PersistenceError::Config("DATABASE_URL / IMCI_DB_URL not set".into())
                                           })?;
    let l = url.to_lowercase();
    let looks_pg = l.starts_with("postgres://") || l.starts_with("postgresql://");
    if cfg!(feature = "pg") && !looks_pg {
      return Err(PersistenceError::Config("DATABASE_URL does not look like a Postgres URL".into()));
    }
    if !cfg!(feature = "pg") && looks_pg {
      return Err(PersistenceError::Config("imci-persistence was compiled without the 'pg' feature; enable it to \
                                           use Postgres"
                                                        .into()));
    }
    Self::open(&url)
  }

  fn run_migrations(&self) -> Result<(), PersistenceError> {
    let mut attempt = 1;
    loop {
      match self.try_migrate() {
        Ok(applied) => {
          if applied > 0 {
            log::info!("applied {} migration(s)", applied);
          }
          return Ok(());
        }
        Err(e) if attempt < MIGRATION_ATTEMPTS => {
          log::warn!("migration attempt {}/{} failed: {}", attempt, MIGRATION_ATTEMPTS, e);
          std::thread::sleep(MIGRATION_RETRY_DELAY);
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }

  fn try_migrate(&self) -> Result<usize, PersistenceError> {
    let mut pooled = self.conn()?;
    let conn: &mut DbConn = &mut pooled;
    #[cfg(not(feature = "pg"))]
    {
      use diesel::connection::SimpleConnection;
      conn.batch_execute("PRAGMA journal_mode = WAL;")?;
    }
    let applied = conn.run_pending_migrations(MIGRATIONS)
                      .map_err(|e| PersistenceError::Migration(e.to_string()))?;
    Ok(applied.len())
  }

  pub(crate) fn conn(&self) -> Result<PooledConn, PersistenceError> {
    self.pool.get().map_err(|e| PersistenceError::Pool(e.to_string()))
  }

  pub fn flow_repository(&self) -> DieselFlowRepository {
    DieselFlowRepository::new(self.clone())
  }

  pub fn domain_repository(&self) -> DieselDomainRepository {
    DieselDomainRepository::new(self.clone())
  }

  pub fn api_config_repository(&self) -> DieselApiConfigRepository {
    DieselApiConfigRepository::new(self.clone())
  }
}

/// Base SQLite en un fichero explícito, sin pasar por el entorno.
#[cfg(not(feature = "pg"))]
pub fn new_sqlite_for_test(path: &str) -> Result<Database, PersistenceError> {
  Database::open(path)
}

pub(crate) fn to_ts(t: DateTime<Utc>) -> i64 {
  t.timestamp_millis()
}

pub(crate) fn from_ts(ms: i64) -> Result<DateTime<Utc>, PersistenceError> {
  DateTime::from_timestamp_millis(ms).ok_or_else(|| PersistenceError::Corrupt(format!("timestamp {}", ms)))
}

pub(crate) fn from_opt_ts(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, PersistenceError> {
  ms.map(from_ts).transpose()
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, PersistenceError> {
  Uuid::parse_str(s).map_err(|e| PersistenceError::Corrupt(format!("uuid '{}': {}", s, e)))
}

pub(crate) fn parse_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>, PersistenceError> {
  s.map(parse_uuid).transpose()
}

pub(crate) fn is_unique_violation(e: &DieselError) -> bool {
  matches!(e,
           DieselError::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _))
}
