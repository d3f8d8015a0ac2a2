use crate::db::{from_ts, is_unique_violation, parse_opt_uuid, parse_uuid, to_ts, write_tx, Database, DbConn, TxError};
use crate::schema::{conditions, diagnoses, diagnosis_advice, diagnosis_medications, medications, nodes, variables};
use diesel::prelude::*;
use imci_domain::{Condition, ConditionInput, ConditionKind, Diagnosis, DiagnosisAdvice, DiagnosisAdviceInput,
                  DiagnosisInput, DiagnosisMedication, DiagnosisMedicationInput, DomainError, DomainRepository,
                  Medication, MedicationInput, NewCondition, Node, NodeInput, NodeUpdate, ScalarValue, Variable,
                  VariableInput};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

type DomainResult<T> = Result<T, DomainError>;
type Tx<T> = Result<T, TxError<DomainError>>;

/// Repo Diesel que implementa `DomainRepository`.
pub struct DieselDomainRepository {
  db: Database,
}

// Diesel row structs for the content tables
#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = variables, treat_none_as_null = true)]
struct VariableRow {
  pub id: String,
  pub variable_id: String,
  pub name: String,
  pub variable_type: String,
  pub description: Option<String>,
  pub default_value: String,
  pub is_global: bool,
  pub flow_version_id: Option<String>,
  pub category: String,
  pub required: bool,
  pub created_by: Option<String>,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = conditions)]
struct ConditionRow {
  pub id: String,
  pub flow_version_id: String,
  pub variable_id: String,
  pub operator: String,
  pub value: String,
  pub condition_type: String,
  pub reference_id: Option<String>,
  pub logical_operator: Option<String>,
  pub group_id: Option<String>,
  pub created_at_ts: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = nodes)]
struct NodeRow {
  pub id: String,
  pub node_id: String,
  pub flow_version_id: String,
  pub node_type: String,
  pub content: String,
  pub node_order: i32,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = diagnoses)]
struct DiagnosisRow {
  pub id: String,
  pub flow_version_id: String,
  pub name: String,
  pub description: Option<String>,
  pub created_at_ts: i64,
  pub updated_at_ts: i64,
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = medications, treat_none_as_null = true)]
struct MedicationRow {
  pub id: String,
  pub name: String,
  pub generic_name: Option<String>,
  pub category: Option<String>,
  pub unit: String,
  pub description: Option<String>,
  pub created_at_ts: i64,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = diagnosis_medications)]
struct DiagnosisMedicationRow {
  pub id: String,
  pub diagnosis_id: String,
  pub medication_id: String,
  pub dosage: String,
  pub duration: Option<String>,
  pub instructions: Option<String>,
  pub order_index: i32,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = diagnosis_advice)]
struct AdviceRow {
  pub id: String,
  pub diagnosis_id: String,
  pub advice_text: String,
  pub priority: i32,
  pub category: Option<String>,
}

impl VariableRow {
  fn from_variable(v: &Variable) -> Self {
    VariableRow { id: v.id.to_string(),
                  variable_id: v.variable_id.clone(),
                  name: v.name.clone(),
                  variable_type: v.variable_type.as_str().to_string(),
                  description: v.description.clone(),
                  default_value: v.default_value.clone(),
                  is_global: v.is_global,
                  flow_version_id: v.flow_version_id.map(|u| u.to_string()),
                  category: v.category.as_str().to_string(),
                  required: v.required,
                  created_by: v.created_by.map(|u| u.to_string()),
                  created_at_ts: to_ts(v.created_at),
                  updated_at_ts: to_ts(v.updated_at) }
  }

  fn into_variable(self) -> DomainResult<Variable> {
    Ok(Variable { id: parse_uuid(&self.id)?,
                  variable_id: self.variable_id,
                  name: self.name,
                  variable_type: self.variable_type.parse()?,
                  description: self.description,
                  default_value: self.default_value,
                  is_global: self.is_global,
                  flow_version_id: parse_opt_uuid(self.flow_version_id.as_deref())?,
                  category: self.category.parse()?,
                  required: self.required,
                  created_by: parse_opt_uuid(self.created_by.as_deref())?,
                  created_at: from_ts(self.created_at_ts)?,
                  updated_at: from_ts(self.updated_at_ts)? })
  }
}

impl ConditionRow {
  fn from_new(c: &NewCondition) -> DomainResult<Self> {
    Ok(ConditionRow { id: c.id.to_string(),
                      flow_version_id: c.flow_version_id.to_string(),
                      variable_id: c.variable_id.to_string(),
                      operator: c.operator.as_str().to_string(),
                      value: serde_json::to_string(&c.value)?,
                      condition_type: c.kind.as_str().to_string(),
                      reference_id: c.reference_id.map(|u| u.to_string()),
                      logical_operator: c.logical_operator.map(|l| l.as_str().to_string()),
                      group_id: c.group_id.map(|u| u.to_string()),
                      created_at_ts: to_ts(c.created_at) })
  }

  fn into_condition(self, variable_name: Option<String>) -> DomainResult<Condition> {
    let raw: serde_json::Value = serde_json::from_str(&self.value)?;
    Ok(Condition { id: parse_uuid(&self.id)?,
                   flow_version_id: parse_uuid(&self.flow_version_id)?,
                   variable_id: parse_uuid(&self.variable_id)?,
                   operator: self.operator.parse()?,
                   value: ScalarValue::from_stored(&raw)?,
                   kind: self.condition_type.parse()?,
                   reference_id: parse_opt_uuid(self.reference_id.as_deref())?,
                   logical_operator: self.logical_operator.as_deref().map(str::parse).transpose()?,
                   group_id: parse_opt_uuid(self.group_id.as_deref())?,
                   created_at: from_ts(self.created_at_ts)?,
                   variable_name })
  }
}

impl NodeRow {
  fn from_node(n: &Node) -> DomainResult<Self> {
    Ok(NodeRow { id: n.id.to_string(),
                 node_id: n.node_id.clone(),
                 flow_version_id: n.flow_version_id.to_string(),
                 node_type: n.node_type.as_str().to_string(),
                 content: serde_json::to_string(&n.content)?,
                 node_order: n.order,
                 created_at_ts: to_ts(n.created_at),
                 updated_at_ts: to_ts(n.updated_at) })
  }

  fn into_node(self) -> DomainResult<Node> {
    Ok(Node { id: parse_uuid(&self.id)?,
              node_id: self.node_id,
              flow_version_id: parse_uuid(&self.flow_version_id)?,
              node_type: Default::default(),
              content: serde_json::from_str(&self.content)?,
              order: self.node_order,
              created_at: from_ts(self.created_at_ts)?,
              updated_at: from_ts(self.updated_at_ts)? })
  }
}

impl DiagnosisRow {
  fn from_diagnosis(d: &Diagnosis) -> Self {
    DiagnosisRow { id: d.id.to_string(),
                   flow_version_id: d.flow_version_id.to_string(),
                   name: d.name.clone(),
                   description: d.description.clone(),
                   created_at_ts: to_ts(d.created_at),
                   updated_at_ts: to_ts(d.updated_at) }
  }

  fn into_diagnosis(self) -> DomainResult<Diagnosis> {
    Ok(Diagnosis { id: parse_uuid(&self.id)?,
                   flow_version_id: parse_uuid(&self.flow_version_id)?,
                   name: self.name,
                   description: self.description,
                   created_at: from_ts(self.created_at_ts)?,
                   updated_at: from_ts(self.updated_at_ts)? })
  }
}

impl MedicationRow {
  fn from_medication(m: &Medication) -> Self {
    MedicationRow { id: m.id.to_string(),
                    name: m.name.clone(),
                    generic_name: m.generic_name.clone(),
                    category: m.category.clone(),
                    unit: m.unit.clone(),
                    description: m.description.clone(),
                    created_at_ts: to_ts(m.created_at) }
  }

  fn into_medication(self) -> DomainResult<Medication> {
    Ok(Medication { id: parse_uuid(&self.id)?,
                    name: self.name,
                    generic_name: self.generic_name,
                    category: self.category,
                    unit: self.unit,
                    description: self.description,
                    created_at: from_ts(self.created_at_ts)? })
  }
}

impl DiagnosisMedicationRow {
  fn from_link(m: &DiagnosisMedication) -> Self {
    DiagnosisMedicationRow { id: m.id.to_string(),
                             diagnosis_id: m.diagnosis_id.to_string(),
                             medication_id: m.medication_id.to_string(),
                             dosage: m.dosage.clone(),
                             duration: m.duration.clone(),
                             instructions: m.instructions.clone(),
                             order_index: m.order_index }
  }

  fn into_link(self, medication: &Medication) -> DomainResult<DiagnosisMedication> {
    Ok(DiagnosisMedication { id: parse_uuid(&self.id)?,
                             diagnosis_id: parse_uuid(&self.diagnosis_id)?,
                             medication_id: parse_uuid(&self.medication_id)?,
                             dosage: self.dosage,
                             duration: self.duration,
                             instructions: self.instructions,
                             order_index: self.order_index,
                             medication_name: Some(medication.name.clone()),
                             medication_unit: Some(medication.unit.clone()) })
  }
}

impl AdviceRow {
  fn from_advice(a: &DiagnosisAdvice) -> Self {
    AdviceRow { id: a.id.to_string(),
                diagnosis_id: a.diagnosis_id.to_string(),
                advice_text: a.advice_text.clone(),
                priority: a.priority,
                category: a.category.map(|c| c.as_str().to_string()) }
  }

  fn into_advice(self) -> DomainResult<DiagnosisAdvice> {
    Ok(DiagnosisAdvice { id: parse_uuid(&self.id)?,
                         diagnosis_id: parse_uuid(&self.diagnosis_id)?,
                         advice_text: self.advice_text,
                         priority: self.priority,
                         category: self.category.as_deref().map(str::parse).transpose()? })
  }
}

fn not_found(what: &str) -> TxError<DomainError> {
  TxError::App(DomainError::NotFound(format!("{} not found", what)))
}

fn app<T>(res: DomainResult<T>) -> Tx<T> {
  res.map_err(TxError::App)
}

fn variable_conflict(variable_id: &str) -> TxError<DomainError> {
  TxError::App(DomainError::Conflict(format!("Variable ID '{}' already exists", variable_id)))
}

fn ensure_variable_id_free(c: &mut DbConn, variable_id: &str, except: Option<&str>) -> Tx<()> {
  let owner = variables::table.filter(variables::variable_id.eq(variable_id))
                              .select(variables::id)
                              .first::<String>(c)
                              .optional()?;
  match owner {
    Some(id) if Some(id.as_str()) != except => Err(variable_conflict(variable_id)),
    _ => Ok(()),
  }
}

fn load_variable(c: &mut DbConn, id: &str) -> Tx<Variable> {
  let row = variables::table.filter(variables::id.eq(id))
                            .first::<VariableRow>(c)
                            .optional()?
                            .ok_or_else(|| not_found("Variable"))?;
  app(row.into_variable())
}

fn insert_variable(c: &mut DbConn, v: &Variable) -> Tx<Variable> {
  ensure_variable_id_free(c, &v.variable_id, None)?;
  let row = VariableRow::from_variable(v);
  diesel::insert_into(variables::table).values(&row)
                                       .execute(c)
                                       .map_err(|e| {
                                         if is_unique_violation(&e) {
                                           variable_conflict(&v.variable_id)
                                         } else {
                                           TxError::Db(e)
                                         }
                                       })?;
  app(row.into_variable())
}

fn replace_variable(c: &mut DbConn, v: &Variable) -> Tx<Variable> {
  let id_s = v.id.to_string();
  ensure_variable_id_free(c, &v.variable_id, Some(&id_s))?;
  let row = VariableRow::from_variable(v);
  diesel::update(variables::table.filter(variables::id.eq(&id_s))).set(&row).execute(c)?;
  app(row.into_variable())
}

/// Resuelve `variable_name` para un lote de condiciones con una sola query.
fn attach_variable_names(c: &mut DbConn, rows: Vec<ConditionRow>) -> Tx<Vec<Condition>> {
  let ids: Vec<String> = rows.iter()
                             .map(|r| r.variable_id.clone())
                             .collect::<HashSet<_>>()
                             .into_iter()
                             .collect();
  let names: HashMap<String, String> = variables::table.filter(variables::id.eq_any(ids))
                                                       .select((variables::id, variables::name))
                                                       .load::<(String, String)>(c)?
                                                       .into_iter()
                                                       .collect();
  rows.into_iter()
      .map(|r| {
        let name = names.get(&r.variable_id).cloned();
        app(r.into_condition(name))
      })
      .collect()
}

fn insert_condition(c: &mut DbConn, new: &NewCondition) -> Tx<Condition> {
  let row = app(ConditionRow::from_new(new))?;
  diesel::insert_into(conditions::table).values(&row).execute(c)?;
  let mut out = attach_variable_names(c, vec![row])?;
  out.pop().ok_or_else(|| not_found("Condition"))
}

fn load_diagnosis(c: &mut DbConn, id: &str) -> Tx<Diagnosis> {
  let row = diagnoses::table.filter(diagnoses::id.eq(id))
                            .first::<DiagnosisRow>(c)
                            .optional()?
                            .ok_or_else(|| not_found("Diagnosis"))?;
  app(row.into_diagnosis())
}

fn load_medication(c: &mut DbConn, id: &str) -> Tx<Medication> {
  let row = medications::table.filter(medications::id.eq(id))
                              .first::<MedicationRow>(c)
                              .optional()?
                              .ok_or_else(|| not_found("Medication"))?;
  app(row.into_medication())
}

fn load_node(c: &mut DbConn, id: &str) -> Tx<Node> {
  let row = nodes::table.filter(nodes::id.eq(id))
                        .first::<NodeRow>(c)
                        .optional()?
                        .ok_or_else(|| not_found("Node"))?;
  app(row.into_node())
}

fn delete_by_id(deleted: usize, what: &str) -> Tx<()> {
  if deleted == 0 {
    return Err(not_found(what));
  }
  Ok(())
}

impl DieselDomainRepository {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  fn read<T, F>(&self, f: F) -> DomainResult<T>
    where F: FnOnce(&mut DbConn) -> Tx<T>
  {
    let mut conn = self.db.conn()?;
    Ok(f(&mut conn)?)
  }

  fn write<T, F>(&self, f: F) -> DomainResult<T>
    where F: FnOnce(&mut DbConn) -> Tx<T>
  {
    let mut conn = self.db.conn()?;
    Ok(write_tx(&mut conn, f)?)
  }
}

impl DomainRepository for DieselDomainRepository {
  fn list_global_variables(&self) -> DomainResult<Vec<Variable>> {
    self.read(|c| {
          let rows = variables::table.filter(variables::is_global.eq(true))
                                     .order(variables::name.asc())
                                     .load::<VariableRow>(c)?;
          rows.into_iter().map(|r| app(r.into_variable())).collect()
        })
  }

  fn list_version_variables(&self, flow_version_id: &Uuid) -> DomainResult<Vec<Variable>> {
    let v_s = flow_version_id.to_string();
    self.read(|c| {
          let rows = variables::table.filter(variables::flow_version_id.eq(&v_s))
                                     .order(variables::name.asc())
                                     .load::<VariableRow>(c)?;
          rows.into_iter().map(|r| app(r.into_variable())).collect()
        })
  }

  fn get_variable(&self, id: &Uuid) -> DomainResult<Variable> {
    self.read(|c| load_variable(c, &id.to_string()))
  }

  fn create_variable(&self, input: VariableInput, created_by: Option<Uuid>) -> DomainResult<Variable> {
    let v = input.validated()?.into_variable(created_by);
    self.write(|c| insert_variable(c, &v))
  }

  fn update_variable(&self, id: &Uuid, input: VariableInput) -> DomainResult<Variable> {
    let new = input.validated()?;
    self.write(|c| {
          let existing = load_variable(c, &id.to_string())?;
          replace_variable(c, &new.apply_to(&existing))
        })
  }

  fn delete_variable(&self, id: &Uuid) -> DomainResult<()> {
    let id_s = id.to_string();
    self.write(|c| {
          let n = diesel::delete(variables::table.filter(variables::id.eq(&id_s))).execute(c)?;
          delete_by_id(n, "Variable")
        })
  }

  fn save_variables(&self, batch: Vec<VariableInput>, created_by: Option<Uuid>) -> DomainResult<Vec<Variable>> {
    let saved = self.write(|c| {
                      let mut out = Vec::with_capacity(batch.len());
                      for input in batch {
                        let id = input.id;
                        let new = app(input.validated())?;
                        let v = match id {
                          Some(id) => {
                            let existing = load_variable(c, &id.to_string())?;
                            replace_variable(c, &new.apply_to(&existing))?
                          }
                          None => insert_variable(c, &new.into_variable(created_by))?,
                        };
                        out.push(v);
                      }
                      Ok(out)
                    })?;
    log::info!("saved {} variable(s)", saved.len());
    Ok(saved)
  }

  fn create_entry_condition(&self, flow_version_id: &Uuid, input: ConditionInput) -> DomainResult<Condition> {
    let new = input.entry(*flow_version_id)?;
    self.write(|c| insert_condition(c, &new))
  }

  fn create_diagnosis_condition(&self, diagnosis_id: &Uuid, input: ConditionInput) -> DomainResult<Condition> {
    self.write(|c| {
          let d = load_diagnosis(c, &diagnosis_id.to_string())?;
          let new = app(input.for_diagnosis(d.flow_version_id, d.id))?;
          insert_condition(c, &new)
        })
  }

  fn list_entry_conditions(&self, flow_version_id: &Uuid) -> DomainResult<Vec<Condition>> {
    let v_s = flow_version_id.to_string();
    self.read(|c| {
          let rows = conditions::table.filter(conditions::flow_version_id.eq(&v_s))
                                      .filter(conditions::condition_type.eq(ConditionKind::Entry.as_str()))
                                      .order(conditions::created_at_ts.asc())
                                      .load::<ConditionRow>(c)?;
          attach_variable_names(c, rows)
        })
  }

  fn list_diagnosis_conditions(&self, diagnosis_id: &Uuid) -> DomainResult<Vec<Condition>> {
    let d_s = diagnosis_id.to_string();
    self.read(|c| {
          let rows = conditions::table.filter(conditions::reference_id.eq(&d_s))
                                      .filter(conditions::condition_type.eq(ConditionKind::Diagnosis.as_str()))
                                      .order(conditions::created_at_ts.asc())
                                      .load::<ConditionRow>(c)?;
          attach_variable_names(c, rows)
        })
  }

  fn list_version_conditions(&self, flow_version_id: &Uuid) -> DomainResult<Vec<Condition>> {
    let v_s = flow_version_id.to_string();
    self.read(|c| {
          let rows = conditions::table.filter(conditions::flow_version_id.eq(&v_s))
                                      .order(conditions::created_at_ts.asc())
                                      .load::<ConditionRow>(c)?;
          attach_variable_names(c, rows)
        })
  }

  fn delete_condition(&self, id: &Uuid, kind: ConditionKind) -> DomainResult<()> {
    let id_s = id.to_string();
    self.write(|c| {
          let n = diesel::delete(conditions::table.filter(conditions::id.eq(&id_s))
                                                  .filter(conditions::condition_type.eq(kind.as_str())))
                    .execute(c)?;
          delete_by_id(n, "Condition")
        })
  }

  fn list_nodes(&self, flow_version_id: &Uuid) -> DomainResult<Vec<Node>> {
    let v_s = flow_version_id.to_string();
    self.read(|c| {
          let rows = nodes::table.filter(nodes::flow_version_id.eq(&v_s))
                                 .order((nodes::node_order.asc(), nodes::created_at_ts.asc()))
                                 .load::<NodeRow>(c)?;
          rows.into_iter().map(|r| app(r.into_node())).collect()
        })
  }

  fn get_node(&self, id: &Uuid) -> DomainResult<Node> {
    self.read(|c| load_node(c, &id.to_string()))
  }

  fn create_node(&self, input: NodeInput) -> DomainResult<Node> {
    let node = input.into_node()?;
    let row = NodeRow::from_node(&node)?;
    self.write(|c| {
          let taken = nodes::table.filter(nodes::flow_version_id.eq(&row.flow_version_id))
                                  .filter(nodes::node_id.eq(&row.node_id))
                                  .count()
                                  .get_result::<i64>(c)?;
          if taken > 0 {
            return Err(TxError::App(DomainError::Conflict(format!("Node ID '{}' already exists in this version",
                                                                  row.node_id))));
          }
          diesel::insert_into(nodes::table).values(&row).execute(c)?;
          app(row.clone().into_node())
        })
  }

  fn update_node(&self, id: &Uuid, update: NodeUpdate) -> DomainResult<Node> {
    let id_s = id.to_string();
    self.write(|c| {
          let existing = load_node(c, &id_s)?;
          let node = app(update.apply_to(&existing))?;
          let row = app(NodeRow::from_node(&node))?;
          diesel::update(nodes::table.filter(nodes::id.eq(&id_s)))
            .set((nodes::content.eq(&row.content),
                  nodes::node_order.eq(row.node_order),
                  nodes::updated_at_ts.eq(row.updated_at_ts)))
            .execute(c)?;
          app(row.into_node())
        })
  }

  fn delete_node(&self, id: &Uuid) -> DomainResult<()> {
    let id_s = id.to_string();
    self.write(|c| {
          let n = diesel::delete(nodes::table.filter(nodes::id.eq(&id_s))).execute(c)?;
          delete_by_id(n, "Node")
        })
  }

  fn list_diagnoses(&self, flow_version_id: &Uuid) -> DomainResult<Vec<Diagnosis>> {
    let v_s = flow_version_id.to_string();
    self.read(|c| {
          let rows = diagnoses::table.filter(diagnoses::flow_version_id.eq(&v_s))
                                     .order(diagnoses::created_at_ts.asc())
                                     .load::<DiagnosisRow>(c)?;
          rows.into_iter().map(|r| app(r.into_diagnosis())).collect()
        })
  }

  fn get_diagnosis(&self, id: &Uuid) -> DomainResult<Diagnosis> {
    self.read(|c| load_diagnosis(c, &id.to_string()))
  }

  fn create_diagnosis(&self, flow_version_id: &Uuid, input: DiagnosisInput) -> DomainResult<Diagnosis> {
    let row = DiagnosisRow::from_diagnosis(&input.into_diagnosis(*flow_version_id)?);
    self.write(|c| {
          diesel::insert_into(diagnoses::table).values(&row).execute(c)?;
          app(row.clone().into_diagnosis())
        })
  }

  fn update_diagnosis(&self, id: &Uuid, input: DiagnosisInput) -> DomainResult<Diagnosis> {
    let id_s = id.to_string();
    self.write(|c| {
          let existing = load_diagnosis(c, &id_s)?;
          let row = DiagnosisRow::from_diagnosis(&app(input.apply_to(&existing))?);
          diesel::update(diagnoses::table.filter(diagnoses::id.eq(&id_s)))
            .set((diagnoses::name.eq(&row.name),
                  diagnoses::description.eq(row.description.clone()),
                  diagnoses::updated_at_ts.eq(row.updated_at_ts)))
            .execute(c)?;
          app(row.into_diagnosis())
        })
  }

  fn delete_diagnosis(&self, id: &Uuid) -> DomainResult<()> {
    let id_s = id.to_string();
    self.write(|c| {
          load_diagnosis(c, &id_s)?;
          diesel::delete(conditions::table.filter(conditions::reference_id.eq(&id_s))
                                          .filter(conditions::condition_type.eq(ConditionKind::Diagnosis.as_str())))
            .execute(c)?;
          diesel::delete(diagnosis_medications::table.filter(diagnosis_medications::diagnosis_id.eq(&id_s)))
            .execute(c)?;
          diesel::delete(diagnosis_advice::table.filter(diagnosis_advice::diagnosis_id.eq(&id_s))).execute(c)?;
          diesel::delete(diagnoses::table.filter(diagnoses::id.eq(&id_s))).execute(c)?;
          Ok(())
        })?;
    log::info!("deleted diagnosis {} with its conditions, medications and advice", id);
    Ok(())
  }

  fn list_diagnosis_medications(&self, diagnosis_id: &Uuid) -> DomainResult<Vec<DiagnosisMedication>> {
    let d_s = diagnosis_id.to_string();
    self.read(|c| {
          let links = diagnosis_medications::table.filter(diagnosis_medications::diagnosis_id.eq(&d_s))
                                                  .order(diagnosis_medications::order_index.asc())
                                                  .load::<DiagnosisMedicationRow>(c)?;
          let ids: Vec<String> = links.iter().map(|l| l.medication_id.clone()).collect();
          let catalog: HashMap<String, MedicationRow> =
            medications::table.filter(medications::id.eq_any(ids))
                              .load::<MedicationRow>(c)?
                              .into_iter()
                              .map(|m| (m.id.clone(), m))
                              .collect();
          let mut out = Vec::with_capacity(links.len());
          for link in links {
            if let Some(m) = catalog.get(&link.medication_id) {
              let med = app(m.clone().into_medication())?;
              out.push(app(link.into_link(&med))?);
            }
          }
          Ok(out)
        })
  }

  fn add_diagnosis_medication(&self, diagnosis_id: &Uuid, input: DiagnosisMedicationInput)
                              -> DomainResult<DiagnosisMedication> {
    let link = input.into_link(*diagnosis_id)?;
    let row = DiagnosisMedicationRow::from_link(&link);
    self.write(|c| {
          load_diagnosis(c, &row.diagnosis_id)?;
          let med = load_medication(c, &row.medication_id)?;
          diesel::insert_into(diagnosis_medications::table).values(&row).execute(c)?;
          app(row.clone().into_link(&med))
        })
  }

  fn remove_diagnosis_medication(&self, id: &Uuid) -> DomainResult<()> {
    let id_s = id.to_string();
    self.write(|c| {
          let n = diesel::delete(diagnosis_medications::table.filter(diagnosis_medications::id.eq(&id_s))).execute(c)?;
          delete_by_id(n, "Diagnosis medication")
        })
  }

  fn list_diagnosis_advice(&self, diagnosis_id: &Uuid) -> DomainResult<Vec<DiagnosisAdvice>> {
    let d_s = diagnosis_id.to_string();
    self.read(|c| {
          let rows = diagnosis_advice::table.filter(diagnosis_advice::diagnosis_id.eq(&d_s))
                                            .order(diagnosis_advice::priority.asc())
                                            .load::<AdviceRow>(c)?;
          rows.into_iter().map(|r| app(r.into_advice())).collect()
        })
  }

  fn add_diagnosis_advice(&self, diagnosis_id: &Uuid, input: DiagnosisAdviceInput) -> DomainResult<DiagnosisAdvice> {
    let row = AdviceRow::from_advice(&input.into_advice(*diagnosis_id)?);
    self.write(|c| {
          load_diagnosis(c, &row.diagnosis_id)?;
          diesel::insert_into(diagnosis_advice::table).values(&row).execute(c)?;
          app(row.clone().into_advice())
        })
  }

  fn remove_diagnosis_advice(&self, id: &Uuid) -> DomainResult<()> {
    let id_s = id.to_string();
    self.write(|c| {
          let n = diesel::delete(diagnosis_advice::table.filter(diagnosis_advice::id.eq(&id_s))).execute(c)?;
          delete_by_id(n, "Advice")
        })
  }

  fn list_medications(&self) -> DomainResult<Vec<Medication>> {
    self.read(|c| {
          let rows = medications::table.order(medications::name.asc()).load::<MedicationRow>(c)?;
          rows.into_iter().map(|r| app(r.into_medication())).collect()
        })
  }

  fn get_medication(&self, id: &Uuid) -> DomainResult<Medication> {
    self.read(|c| load_medication(c, &id.to_string()))
  }

  fn create_medication(&self, input: MedicationInput) -> DomainResult<Medication> {
    let row = MedicationRow::from_medication(&input.into_medication()?);
    self.write(|c| {
          diesel::insert_into(medications::table).values(&row).execute(c)?;
          app(row.clone().into_medication())
        })
  }

  fn update_medication(&self, id: &Uuid, input: MedicationInput) -> DomainResult<Medication> {
    let id_s = id.to_string();
    self.write(|c| {
          let existing = load_medication(c, &id_s)?;
          let row = MedicationRow::from_medication(&app(input.apply_to(&existing))?);
          diesel::update(medications::table.filter(medications::id.eq(&id_s))).set(&row).execute(c)?;
          app(row.into_medication())
        })
  }

  fn delete_medication(&self, id: &Uuid) -> DomainResult<()> {
    let id_s = id.to_string();
    self.write(|c| {
          let in_use = medication_in_use(c, &id_s)?;
          if in_use {
            let msg = "Medication is prescribed by a diagnosis and cannot be deleted";
            return Err(TxError::App(DomainError::ValidationError(msg.to_string())));
          }
          let n = diesel::delete(medications::table.filter(medications::id.eq(&id_s))).execute(c)?;
          delete_by_id(n, "Medication")
        })
  }
}

fn medication_in_use(c: &mut DbConn, medication_id: &str) -> Tx<bool> {
  let n = diagnosis_medications::table.filter(diagnosis_medications::medication_id.eq(medication_id))
                                      .count()
                                      .get_result::<i64>(c)?;
  Ok(n > 0)
}
