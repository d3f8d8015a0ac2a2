use crate::db::{from_opt_ts, from_ts, is_unique_violation, lock_flow, parse_opt_uuid, parse_uuid, to_ts, write_tx,
                Database, DbConn, PersistenceError, TxError};
use crate::schema::{conditions, diagnoses, diagnosis_advice, diagnosis_medications, flow_analytics, flow_versions,
                    flows, nodes, users, variables};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use flow::{empty_entry_conditions, next_version_number, AnalyticsRepository, Flow, FlowError, FlowRepository,
           FlowSession, FlowStatus, FlowSummary, FlowVersion, NewFlow, PublishOutcome, User, UserDirectory,
           VersionWithFlow};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

type FlowResult<T> = Result<T, FlowError>;
type Tx<T> = Result<T, TxError<FlowError>>;

/// Repo Diesel que implementa `FlowRepository`, `UserDirectory` y
/// `AnalyticsRepository`.
pub struct DieselFlowRepository {
  db: Database,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = flows)]
struct FlowRow {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub status: String,
  pub created_by: Option<String>,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
  pub last_version_number: i32,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = flow_versions)]
struct VersionRow {
  pub id: String,
  pub flow_id: String,
  pub version_number: i32,
  pub status: String,
  pub entry_conditions: String,
  pub created_by: Option<String>,
  pub created_at_ts: i64,
  pub published_at_ts: Option<i64>,
  pub published_by: Option<String>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = users)]
struct UserRow {
  pub id: String,
  pub email: String,
  pub username: String,
  pub role: String,
  pub created_at_ts: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = flow_analytics)]
struct SessionRow {
  pub id: String,
  pub flow_id: String,
  pub flow_version_id: Option<String>,
  pub session_id: String,
  pub user_id: Option<String>,
  pub started_at_ts: i64,
  pub completed_at_ts: Option<i64>,
  pub is_finalized: bool,
  pub finalized_at_ts: Option<i64>,
  pub total_nodes_visited: i32,
}

impl FlowRow {
  fn from_flow(f: &Flow) -> Self {
    FlowRow { id: f.id.to_string(),
              name: f.name.clone(),
              description: f.description.clone(),
              status: f.status.as_str().to_string(),
              created_by: f.created_by.map(|u| u.to_string()),
              created_at_ts: to_ts(f.created_at),
              updated_at_ts: to_ts(f.updated_at),
              last_version_number: 1 }
  }

  fn into_flow(self) -> FlowResult<Flow> {
    Ok(Flow { id: parse_uuid(&self.id)?,
              name: self.name,
              description: self.description,
              status: self.status.parse()?,
              created_by: parse_opt_uuid(self.created_by.as_deref())?,
              created_at: from_ts(self.created_at_ts)?,
              updated_at: from_ts(self.updated_at_ts)? })
  }
}

impl VersionRow {
  fn from_version(v: &FlowVersion) -> Self {
    VersionRow { id: v.id.to_string(),
                 flow_id: v.flow_id.to_string(),
                 version_number: v.version_number,
                 status: v.status.as_str().to_string(),
                 entry_conditions: v.entry_conditions.to_string(),
                 created_by: v.created_by.map(|u| u.to_string()),
                 created_at_ts: to_ts(v.created_at),
                 published_at_ts: v.published_at.map(to_ts),
                 published_by: v.published_by.map(|u| u.to_string()) }
  }

  fn into_version(self) -> FlowResult<FlowVersion> {
    let entry_conditions: JsonValue = serde_json::from_str(&self.entry_conditions)
      .map_err(|e| PersistenceError::Corrupt(format!("entry_conditions: {}", e)))?;
    Ok(FlowVersion { id: parse_uuid(&self.id)?,
                     flow_id: parse_uuid(&self.flow_id)?,
                     version_number: self.version_number,
                     status: self.status.parse()?,
                     entry_conditions,
                     created_by: parse_opt_uuid(self.created_by.as_deref())?,
                     created_at: from_ts(self.created_at_ts)?,
                     published_at: from_opt_ts(self.published_at_ts)?,
                     published_by: parse_opt_uuid(self.published_by.as_deref())? })
  }
}

impl UserRow {
  fn into_user(self) -> FlowResult<User> {
    Ok(User { id: parse_uuid(&self.id)?,
              email: self.email,
              username: self.username,
              role: self.role.parse()?,
              created_at: from_ts(self.created_at_ts)? })
  }
}

impl SessionRow {
  fn from_session(s: &FlowSession) -> Self {
    SessionRow { id: s.id.to_string(),
                 flow_id: s.flow_id.to_string(),
                 flow_version_id: s.flow_version_id.map(|u| u.to_string()),
                 session_id: s.session_id.clone(),
                 user_id: s.user_id.map(|u| u.to_string()),
                 started_at_ts: to_ts(s.started_at),
                 completed_at_ts: s.completed_at.map(to_ts),
                 is_finalized: s.is_finalized,
                 finalized_at_ts: s.finalized_at.map(to_ts),
                 total_nodes_visited: s.total_nodes_visited }
  }

  fn into_session(self) -> FlowResult<FlowSession> {
    Ok(FlowSession { id: parse_uuid(&self.id)?,
                     flow_id: parse_uuid(&self.flow_id)?,
                     flow_version_id: parse_opt_uuid(self.flow_version_id.as_deref())?,
                     session_id: self.session_id,
                     user_id: parse_opt_uuid(self.user_id.as_deref())?,
                     started_at: from_ts(self.started_at_ts)?,
                     completed_at: from_opt_ts(self.completed_at_ts)?,
                     is_finalized: self.is_finalized,
                     finalized_at: from_opt_ts(self.finalized_at_ts)?,
                     total_nodes_visited: self.total_nodes_visited })
  }
}

fn flow_not_found() -> TxError<FlowError> {
  TxError::App(FlowError::NotFound("Flow not found".into()))
}

fn version_not_found() -> TxError<FlowError> {
  TxError::App(FlowError::NotFound("Version not found".into()))
}

fn app<T>(res: FlowResult<T>) -> Tx<T> {
  res.map_err(TxError::App)
}

fn load_version(c: &mut DbConn, version_id: &str) -> Tx<FlowVersion> {
  let row = flow_versions::table.filter(flow_versions::id.eq(version_id))
                                .first::<VersionRow>(c)
                                .optional()?
                                .ok_or_else(version_not_found)?;
  app(row.into_version())
}

fn load_flow(c: &mut DbConn, flow_id: &str) -> Tx<Flow> {
  let row = flows::table.filter(flows::id.eq(flow_id))
                        .first::<FlowRow>(c)
                        .optional()?
                        .ok_or_else(flow_not_found)?;
  app(row.into_flow())
}

fn flow_names(c: &mut DbConn) -> Tx<HashMap<String, String>> {
  let pairs = flows::table.select((flows::id, flows::name)).load::<(String, String)>(c)?;
  Ok(pairs.into_iter().collect())
}

fn with_names(rows: Vec<VersionRow>, names: &HashMap<String, String>) -> Tx<Vec<VersionWithFlow>> {
  let mut out = Vec::with_capacity(rows.len());
  for r in rows {
    let flow_name = names.get(&r.flow_id).cloned().unwrap_or_default();
    out.push(VersionWithFlow { version: app(r.into_version())?, flow_name });
  }
  Ok(out)
}

/// Borra una versión y su contenido. Las sesiones que la referencian
/// conservan la fila con `flow_version_id` nulo.
fn cascade_delete_version(c: &mut DbConn, version_id: &str) -> QueryResult<()> {
  diesel::delete(conditions::table.filter(conditions::flow_version_id.eq(version_id))).execute(c)?;
  let diagnosis_ids = diagnoses::table.filter(diagnoses::flow_version_id.eq(version_id))
                                      .select(diagnoses::id)
                                      .load::<String>(c)?;
  diesel::delete(diagnosis_medications::table.filter(diagnosis_medications::diagnosis_id.eq_any(diagnosis_ids.clone())))
    .execute(c)?;
  diesel::delete(diagnosis_advice::table.filter(diagnosis_advice::diagnosis_id.eq_any(diagnosis_ids))).execute(c)?;
  diesel::delete(diagnoses::table.filter(diagnoses::flow_version_id.eq(version_id))).execute(c)?;
  diesel::delete(nodes::table.filter(nodes::flow_version_id.eq(version_id))).execute(c)?;
  diesel::delete(variables::table.filter(variables::flow_version_id.eq(version_id))).execute(c)?;
  diesel::update(flow_analytics::table.filter(flow_analytics::flow_version_id.eq(version_id)))
    .set(flow_analytics::flow_version_id.eq(None::<String>))
    .execute(c)?;
  diesel::delete(flow_versions::table.filter(flow_versions::id.eq(version_id))).execute(c)?;
  Ok(())
}

impl DieselFlowRepository {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  fn read<T, F>(&self, f: F) -> FlowResult<T>
    where F: FnOnce(&mut DbConn) -> Tx<T>
  {
    let mut conn = self.db.conn()?;
    Ok(f(&mut conn)?)
  }

  fn write<T, F>(&self, f: F) -> FlowResult<T>
    where F: FnOnce(&mut DbConn) -> Tx<T>
  {
    let mut conn = self.db.conn()?;
    Ok(write_tx(&mut conn, f)?)
  }
}

impl FlowRepository for DieselFlowRepository {
  fn create_flow_with_initial_version(&self, new_flow: &NewFlow, created_by: Uuid) -> FlowResult<(Flow, FlowVersion)> {
    let now = Utc::now();
    let flow = Flow { id: Uuid::new_v4(),
                      name: new_flow.name.clone(),
                      description: new_flow.description.clone(),
                      status: FlowStatus::Draft,
                      created_by: Some(created_by),
                      created_at: now,
                      updated_at: now };
    let flow_row = FlowRow::from_flow(&flow);
    let version_row = VersionRow::from_version(&FlowVersion::draft(flow.id, 1, empty_entry_conditions(), created_by));
    self.write(|c| {
          diesel::insert_into(flows::table).values(&flow_row).execute(c)?;
          diesel::insert_into(flow_versions::table).values(&version_row).execute(c)?;
          Ok(())
        })?;
    Ok((flow_row.into_flow()?, version_row.into_version()?))
  }

  fn get_flow(&self, flow_id: &Uuid) -> FlowResult<Flow> {
    self.read(|c| load_flow(c, &flow_id.to_string()))
  }

  fn list_flows(&self) -> FlowResult<Vec<FlowSummary>> {
    self.read(|c| {
          let rows = flows::table.order(flows::updated_at_ts.desc()).load::<FlowRow>(c)?;
          let version_flow_ids = flow_versions::table.select(flow_versions::flow_id).load::<String>(c)?;
          let mut counts: HashMap<String, i64> = HashMap::new();
          for id in version_flow_ids {
            *counts.entry(id).or_insert(0) += 1;
          }
          let mut out = Vec::with_capacity(rows.len());
          for r in rows {
            let versions_count = counts.get(&r.id).copied().unwrap_or(0);
            out.push(FlowSummary { flow: app(r.into_flow())?, versions_count });
          }
          Ok(out)
        })
  }

  fn update_flow_details(&self, flow_id: &Uuid, name: &str, description: &str) -> FlowResult<Flow> {
    let id_s = flow_id.to_string();
    self.write(|c| {
          let n = diesel::update(flows::table.filter(flows::id.eq(&id_s)))
                    .set((flows::name.eq(name),
                          flows::description.eq(Some(description)),
                          flows::updated_at_ts.eq(to_ts(Utc::now()))))
                    .execute(c)?;
          if n == 0 {
            return Err(flow_not_found());
          }
          load_flow(c, &id_s)
        })
  }

  fn set_flow_status(&self, flow_id: &Uuid, status: FlowStatus) -> FlowResult<Flow> {
    let id_s = flow_id.to_string();
    self.write(|c| {
          let n = diesel::update(flows::table.filter(flows::id.eq(&id_s)))
                    .set((flows::status.eq(status.as_str()), flows::updated_at_ts.eq(to_ts(Utc::now()))))
                    .execute(c)?;
          if n == 0 {
            return Err(flow_not_found());
          }
          load_flow(c, &id_s)
        })
  }

  fn get_version(&self, version_id: &Uuid) -> FlowResult<FlowVersion> {
    self.read(|c| load_version(c, &version_id.to_string()))
  }

  fn list_versions(&self, flow_id: &Uuid) -> FlowResult<Vec<VersionWithFlow>> {
    let id_s = flow_id.to_string();
    self.read(|c| {
          let rows = flow_versions::table.filter(flow_versions::flow_id.eq(&id_s))
                                         .order(flow_versions::version_number.asc())
                                         .load::<VersionRow>(c)?;
          let names = flow_names(c)?;
          with_names(rows, &names)
        })
  }

  fn list_all_versions(&self) -> FlowResult<Vec<VersionWithFlow>> {
    let mut out = self.read(|c| {
                        let rows = flow_versions::table.load::<VersionRow>(c)?;
                        let names = flow_names(c)?;
                        with_names(rows, &names)
                      })?;
    out.sort_by(|a, b| {
         a.flow_name
          .cmp(&b.flow_name)
          .then(a.version.version_number.cmp(&b.version.version_number))
       });
    Ok(out)
  }

  fn list_published_versions(&self) -> FlowResult<Vec<VersionWithFlow>> {
    let mut out = self.read(|c| {
                        let rows = flow_versions::table.filter(flow_versions::status.eq(FlowStatus::Published.as_str()))
                                                       .load::<VersionRow>(c)?;
                        let names = flow_names(c)?;
                        with_names(rows, &names)
                      })?;
    out.sort_by(|a, b| a.flow_name.cmp(&b.flow_name));
    Ok(out)
  }

  fn get_published_version(&self, flow_id: &Uuid) -> FlowResult<Option<FlowVersion>> {
    let id_s = flow_id.to_string();
    self.read(|c| {
          let row = flow_versions::table.filter(flow_versions::flow_id.eq(&id_s))
                                        .filter(flow_versions::status.eq(FlowStatus::Published.as_str()))
                                        .first::<VersionRow>(c)
                                        .optional()?;
          match row {
            Some(r) => Ok(Some(app(r.into_version())?)),
            None => Ok(None),
          }
        })
  }

  fn insert_next_version(&self, flow_id: &Uuid, entry_conditions: JsonValue, created_by: Uuid)
                         -> FlowResult<FlowVersion> {
    let id_s = flow_id.to_string();
    let row = self.write(|c| {
                    if !lock_flow(c, &id_s)? {
                      return Err(flow_not_found());
                    }
                    let last_issued = flows::table.filter(flows::id.eq(&id_s))
                                                  .select(flows::last_version_number)
                                                  .first::<i32>(c)?;
                    let max = flow_versions::table.filter(flow_versions::flow_id.eq(&id_s))
                                                  .select(diesel::dsl::max(flow_versions::version_number))
                                                  .get_result::<Option<i32>>(c)?;
                    let number = next_version_number(last_issued, max);
                    let draft = FlowVersion::draft(*flow_id, number, entry_conditions, created_by);
                    let row = VersionRow::from_version(&draft);
                    diesel::insert_into(flow_versions::table).values(&row).execute(c)?;
                    diesel::update(flows::table.filter(flows::id.eq(&id_s)))
                      .set(flows::last_version_number.eq(number))
                      .execute(c)?;
                    Ok(row)
                  })?;
    row.into_version()
  }

  fn publish_version(&self, version_id: &Uuid, published_by: Uuid, at: DateTime<Utc>) -> FlowResult<PublishOutcome> {
    let id_s = version_id.to_string();
    let outcome = self.write(|c| {
                        let first = load_version(c, &id_s)?;
                        lock_flow(c, &first.flow_id.to_string())?;
                        // re-read under the lock
                        let target = load_version(c, &id_s)?;
                        app(target.ensure_publishable())?;
                        if target.status == FlowStatus::Published {
                          return Ok(PublishOutcome { version: target, demoted: None });
                        }
                        let flow_s = target.flow_id.to_string();
                        let previous = flow_versions::table.filter(flow_versions::flow_id.eq(&flow_s))
                                                           .filter(flow_versions::status
                                                                     .eq(FlowStatus::Published.as_str()))
                                                           .filter(flow_versions::id.ne(&id_s))
                                                           .select(flow_versions::id)
                                                           .first::<String>(c)
                                                           .optional()?;
                        if let Some(old) = &previous {
                          diesel::update(flow_versions::table.filter(flow_versions::id.eq(old)))
                            .set(flow_versions::status.eq(FlowStatus::Archived.as_str()))
                            .execute(c)?;
                        }
                        diesel::update(flow_versions::table.filter(flow_versions::id.eq(&id_s)))
                          .set((flow_versions::status.eq(FlowStatus::Published.as_str()),
                                flow_versions::published_at_ts.eq(Some(to_ts(at))),
                                flow_versions::published_by.eq(Some(published_by.to_string()))))
                          .execute(c)
                          .map_err(|e| {
                            if is_unique_violation(&e) {
                              // the partial index rejected a second published version
                              TxError::App(FlowError::Conflict("Another version of this flow is already published".into()))
                            } else {
                              TxError::Db(e)
                            }
                          })?;
                        let demoted = match previous {
                          Some(old) => Some(app(parse_uuid(&old).map_err(FlowError::from))?),
                          None => None,
                        };
                        Ok(PublishOutcome { version: load_version(c, &id_s)?, demoted })
                      })?;
    log::info!("published version {} (demoted: {:?})", version_id, outcome.demoted);
    Ok(outcome)
  }

  fn archive_version(&self, version_id: &Uuid) -> FlowResult<FlowVersion> {
    let id_s = version_id.to_string();
    self.write(|c| {
          let v = load_version(c, &id_s)?;
          app(v.ensure_archivable())?;
          diesel::update(flow_versions::table.filter(flow_versions::id.eq(&id_s)))
            .set(flow_versions::status.eq(FlowStatus::Archived.as_str()))
            .execute(c)?;
          load_version(c, &id_s)
        })
  }

  fn delete_version(&self, version_id: &Uuid) -> FlowResult<()> {
    let id_s = version_id.to_string();
    self.write(|c| {
          let first = load_version(c, &id_s)?;
          let flow_s = first.flow_id.to_string();
          lock_flow(c, &flow_s)?;
          // re-read under the lock: a concurrent publish may have changed the status
          let v = load_version(c, &id_s)?;
          let total = flow_versions::table.filter(flow_versions::flow_id.eq(&flow_s))
                                          .count()
                                          .get_result::<i64>(c)?;
          app(v.ensure_deletable(total))?;
          cascade_delete_version(c, &id_s)?;
          Ok(())
        })?;
    log::info!("deleted version {} and its content", version_id);
    Ok(())
  }
}

impl UserDirectory for DieselFlowRepository {
  fn find_by_email(&self, email: &str) -> FlowResult<Option<User>> {
    let email = email.to_lowercase();
    self.read(|c| {
          let row = users::table.filter(users::email.eq(&email)).first::<UserRow>(c).optional()?;
          match row {
            Some(r) => Ok(Some(app(r.into_user())?)),
            None => Ok(None),
          }
        })
  }

  fn create_user(&self, user: &User) -> FlowResult<()> {
    let row = UserRow { id: user.id.to_string(),
                        email: user.email.to_lowercase(),
                        username: user.username.clone(),
                        role: user.role.as_str().to_string(),
                        created_at_ts: to_ts(user.created_at) };
    let mut conn = self.db.conn()?;
    match diesel::insert_into(users::table).values(&row).execute(&mut conn) {
      Ok(_) => Ok(()),
      Err(e) if is_unique_violation(&e) => Err(FlowError::Conflict(format!("user {} already exists", user.email))),
      Err(e) => Err(FlowError::Storage(format!("db: {}", e))),
    }
  }

  fn update_username(&self, user_id: &Uuid, username: &str) -> FlowResult<User> {
    let id_s = user_id.to_string();
    self.write(|c| {
          let n = diesel::update(users::table.filter(users::id.eq(&id_s))).set(users::username.eq(username))
                                                                          .execute(c)?;
          if n == 0 {
            return Err(TxError::App(FlowError::NotFound("User not found".into())));
          }
          let row = users::table.filter(users::id.eq(&id_s)).first::<UserRow>(c)?;
          app(row.into_user())
        })
  }

  fn count_users(&self) -> FlowResult<i64> {
    self.read(|c| Ok(users::table.count().get_result::<i64>(c)?))
  }
}

impl AnalyticsRepository for DieselFlowRepository {
  fn insert_session(&self, session: &FlowSession) -> FlowResult<()> {
    let row = SessionRow::from_session(session);
    let mut conn = self.db.conn()?;
    match diesel::insert_into(flow_analytics::table).values(&row).execute(&mut conn) {
      Ok(_) => Ok(()),
      Err(e) if is_unique_violation(&e) => {
        Err(FlowError::Conflict(format!("Session {} already exists", session.session_id)))
      }
      Err(e) => Err(FlowError::Storage(format!("db: {}", e))),
    }
  }

  fn get_session(&self, session_id: &str) -> FlowResult<FlowSession> {
    self.read(|c| {
          let row = flow_analytics::table.filter(flow_analytics::session_id.eq(session_id))
                                         .first::<SessionRow>(c)
                                         .optional()?
                                         .ok_or_else(|| TxError::App(FlowError::NotFound("Session not found".into())))?;
          app(row.into_session())
        })
  }

  fn update_session(&self, session: &FlowSession) -> FlowResult<()> {
    let row = SessionRow::from_session(session);
    self.write(|c| {
          let n = diesel::update(flow_analytics::table.filter(flow_analytics::id.eq(&row.id)))
                    .set((flow_analytics::flow_version_id.eq(row.flow_version_id.clone()),
                          flow_analytics::completed_at_ts.eq(row.completed_at_ts),
                          flow_analytics::is_finalized.eq(row.is_finalized),
                          flow_analytics::finalized_at_ts.eq(row.finalized_at_ts),
                          flow_analytics::total_nodes_visited.eq(row.total_nodes_visited)))
                    .execute(c)?;
          if n == 0 {
            return Err(TxError::App(FlowError::NotFound("Session not found".into())));
          }
          Ok(())
        })
  }

  fn list_sessions(&self, flow_id: Option<&Uuid>) -> FlowResult<Vec<FlowSession>> {
    self.read(|c| {
          let rows = match flow_id {
            Some(f) => flow_analytics::table.filter(flow_analytics::flow_id.eq(f.to_string()))
                                            .order(flow_analytics::started_at_ts.desc())
                                            .load::<SessionRow>(c)?,
            None => flow_analytics::table.order(flow_analytics::started_at_ts.desc())
                                         .load::<SessionRow>(c)?,
          };
          rows.into_iter().map(|r| app(r.into_session())).collect()
        })
  }
}
