use crate::db::{to_ts, write_tx, Database, PersistenceError};
use crate::schema::api_config;
use chrono::Utc;
use diesel::prelude::*;

/// Fila única de configuración donde se guarda la API key cifrada.
const CONFIG_ROW: &str = "main";

/// Acceso a la fila `api_config`. Sólo maneja el texto cifrado; el cifrado
/// vive en la capa de API.
pub struct DieselApiConfigRepository {
  db: Database,
}

impl DieselApiConfigRepository {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Texto cifrado almacenado, o `None` si nunca se configuró.
  pub fn load_api_key(&self) -> Result<Option<String>, PersistenceError> {
    let mut conn = self.db.conn()?;
    let stored = api_config::table.filter(api_config::id.eq(CONFIG_ROW))
                                  .select(api_config::api_key)
                                  .first::<Option<String>>(&mut conn)
                                  .optional()?;
    Ok(stored.flatten())
  }

  pub fn store_api_key(&self, encrypted: &str) -> Result<(), PersistenceError> {
    let mut conn = self.db.conn()?;
    let now = to_ts(Utc::now());
    write_tx(&mut conn, |c| {
      let n = diesel::update(api_config::table.filter(api_config::id.eq(CONFIG_ROW)))
                .set((api_config::api_key.eq(Some(encrypted)), api_config::updated_at_ts.eq(now)))
                .execute(c)?;
      if n == 0 {
        diesel::insert_into(api_config::table).values((api_config::id.eq(CONFIG_ROW),
                                                        api_config::api_key.eq(Some(encrypted)),
                                                        api_config::updated_at_ts.eq(now)))
                                              .execute(c)?;
      }
      Ok::<_, PersistenceError>(())
    })?;
    log::info!("api key updated");
    Ok(())
  }
}
