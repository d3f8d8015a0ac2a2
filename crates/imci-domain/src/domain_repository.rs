use crate::condition::{Condition, ConditionInput, ConditionKind};
use crate::diagnosis::{Diagnosis, DiagnosisAdvice, DiagnosisAdviceInput, DiagnosisInput, DiagnosisMedication,
                       DiagnosisMedicationInput, DiagnosisWithDetails};
use crate::medication::{Medication, MedicationInput};
use crate::node::{Node, NodeInput, NodeUpdate};
use crate::variable::{Variable, VariableInput};
use crate::DomainError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Trait de persistencia del contenido clínico de una versión (variables,
/// condiciones, nodos, diagnósticos) y del catálogo de medicamentos.
///
/// Las escrituras reciben la entrada sin validar y la validan ellas mismas;
/// la coerción del valor de una condición se hace una única vez, al crearla.
pub trait DomainRepository: Send + Sync {
    // --- variables ---
    fn list_global_variables(&self) -> Result<Vec<Variable>, DomainError>;
    fn list_version_variables(&self, flow_version_id: &Uuid) -> Result<Vec<Variable>, DomainError>;
    /// `NotFound("Variable not found")` si no existe.
    fn get_variable(&self, id: &Uuid) -> Result<Variable, DomainError>;
    /// `Conflict` si el `variable_id` ya existe.
    fn create_variable(&self, input: VariableInput, created_by: Option<Uuid>) -> Result<Variable, DomainError>;
    fn update_variable(&self, id: &Uuid, input: VariableInput) -> Result<Variable, DomainError>;
    fn delete_variable(&self, id: &Uuid) -> Result<(), DomainError>;
    /// Lote atómico: entradas con `id` se actualizan, el resto se crea. Si
    /// una falla no se aplica ninguna.
    fn save_variables(&self, batch: Vec<VariableInput>, created_by: Option<Uuid>) -> Result<Vec<Variable>, DomainError>;

    /// Variables visibles desde una versión: globales y propias, por nombre.
    fn list_variables_for_version(&self, flow_version_id: &Uuid) -> Result<Vec<Variable>, DomainError> {
        let mut all = self.list_global_variables()?;
        all.extend(self.list_version_variables(flow_version_id)?);
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    // --- conditions ---
    fn create_entry_condition(&self, flow_version_id: &Uuid, input: ConditionInput) -> Result<Condition, DomainError>;
    /// `NotFound("Diagnosis not found")` si el diagnóstico no existe.
    fn create_diagnosis_condition(&self, diagnosis_id: &Uuid, input: ConditionInput) -> Result<Condition, DomainError>;
    fn list_entry_conditions(&self, flow_version_id: &Uuid) -> Result<Vec<Condition>, DomainError>;
    fn list_diagnosis_conditions(&self, diagnosis_id: &Uuid) -> Result<Vec<Condition>, DomainError>;
    /// Entrada y diagnóstico de la versión, por fecha de creación.
    fn list_version_conditions(&self, flow_version_id: &Uuid) -> Result<Vec<Condition>, DomainError>;
    /// Borra filtrando por id y tipo.
    fn delete_condition(&self, id: &Uuid, kind: ConditionKind) -> Result<(), DomainError>;

    // --- nodes ---
    fn list_nodes(&self, flow_version_id: &Uuid) -> Result<Vec<Node>, DomainError>;
    fn get_node(&self, id: &Uuid) -> Result<Node, DomainError>;
    fn create_node(&self, input: NodeInput) -> Result<Node, DomainError>;
    fn update_node(&self, id: &Uuid, update: NodeUpdate) -> Result<Node, DomainError>;
    fn delete_node(&self, id: &Uuid) -> Result<(), DomainError>;

    // --- diagnoses ---
    fn list_diagnoses(&self, flow_version_id: &Uuid) -> Result<Vec<Diagnosis>, DomainError>;
    fn get_diagnosis(&self, id: &Uuid) -> Result<Diagnosis, DomainError>;
    fn create_diagnosis(&self, flow_version_id: &Uuid, input: DiagnosisInput) -> Result<Diagnosis, DomainError>;
    fn update_diagnosis(&self, id: &Uuid, input: DiagnosisInput) -> Result<Diagnosis, DomainError>;
    /// Borra el diagnóstico con sus condiciones, medicamentos y consejos en
    /// una transacción.
    fn delete_diagnosis(&self, id: &Uuid) -> Result<(), DomainError>;
    /// Ordenados por `order_index`; sólo enlaces cuyo medicamento existe.
    fn list_diagnosis_medications(&self, diagnosis_id: &Uuid) -> Result<Vec<DiagnosisMedication>, DomainError>;
    fn add_diagnosis_medication(&self, diagnosis_id: &Uuid, input: DiagnosisMedicationInput)
                                -> Result<DiagnosisMedication, DomainError>;
    fn remove_diagnosis_medication(&self, id: &Uuid) -> Result<(), DomainError>;
    /// Ordenados por prioridad.
    fn list_diagnosis_advice(&self, diagnosis_id: &Uuid) -> Result<Vec<DiagnosisAdvice>, DomainError>;
    fn add_diagnosis_advice(&self, diagnosis_id: &Uuid, input: DiagnosisAdviceInput)
                            -> Result<DiagnosisAdvice, DomainError>;
    fn remove_diagnosis_advice(&self, id: &Uuid) -> Result<(), DomainError>;

    fn get_diagnosis_details(&self, id: &Uuid) -> Result<DiagnosisWithDetails, DomainError> {
        let diagnosis = self.get_diagnosis(id)?;
        Ok(DiagnosisWithDetails { conditions: self.list_diagnosis_conditions(id)?,
                                  medications: self.list_diagnosis_medications(id)?,
                                  advice: self.list_diagnosis_advice(id)?,
                                  diagnosis })
    }

    // --- medications ---
    /// Ordenados por nombre.
    fn list_medications(&self) -> Result<Vec<Medication>, DomainError>;
    fn get_medication(&self, id: &Uuid) -> Result<Medication, DomainError>;
    fn create_medication(&self, input: MedicationInput) -> Result<Medication, DomainError>;
    fn update_medication(&self, id: &Uuid, input: MedicationInput) -> Result<Medication, DomainError>;
    /// No permite borrar un medicamento prescrito por algún diagnóstico; en
    /// ese caso retorna ValidationError.
    fn delete_medication(&self, id: &Uuid) -> Result<(), DomainError>;

    /// Categorías distintas y no nulas, ordenadas.
    fn medication_categories(&self) -> Result<Vec<String>, DomainError> {
        let set: BTreeSet<String> = self.list_medications()?.into_iter().filter_map(|m| m.category).collect();
        Ok(set.into_iter().collect())
    }

    fn medications_by_category(&self, category: &str) -> Result<Vec<Medication>, DomainError> {
        Ok(self.list_medications()?
               .into_iter()
               .filter(|m| m.category.as_deref() == Some(category))
               .collect())
    }

    /// Inserta los medicamentos del catálogo cuyo nombre aún no existe.
    /// Devuelve cuántos se crearon.
    fn seed_medications(&self, catalog: &[MedicationInput]) -> Result<usize, DomainError> {
        let existing: BTreeSet<String> = self.list_medications()?.into_iter().map(|m| m.name).collect();
        let mut created = 0;
        for m in catalog.iter().filter(|m| !existing.contains(m.name.trim())) {
            self.create_medication(m.clone())?;
            log::info!("seeded medication {}", m.name);
            created += 1;
        }
        Ok(created)
    }
}

#[derive(Default)]
struct ContentState {
    variables: HashMap<Uuid, Variable>,
    conditions: HashMap<Uuid, Condition>,
    nodes: HashMap<Uuid, Node>,
    diagnoses: HashMap<Uuid, Diagnosis>,
    diagnosis_medications: HashMap<Uuid, DiagnosisMedication>,
    diagnosis_advice: HashMap<Uuid, DiagnosisAdvice>,
    medications: HashMap<Uuid, Medication>,
}

impl ContentState {
    fn variable_name(&self, id: &Uuid) -> Option<String> {
        self.variables.get(id).map(|v| v.name.clone())
    }

    fn conditions_where<F>(&self, pred: F) -> Vec<Condition>
        where F: Fn(&Condition) -> bool
    {
        let mut out: Vec<Condition> = self.conditions
                                          .values()
                                          .filter(|c| pred(c))
                                          .map(|c| Condition { variable_name: self.variable_name(&c.variable_id),
                                                               ..c.clone() })
                                          .collect();
        out.sort_by_key(|c| c.created_at);
        out
    }

    fn check_variable_id_free(&self, variable_id: &str, except: Option<&Uuid>) -> Result<(), DomainError> {
        if self.variables.values().any(|v| v.variable_id == variable_id && Some(&v.id) != except) {
            return Err(DomainError::Conflict(format!("Variable ID '{}' already exists", variable_id)));
        }
        Ok(())
    }
}

/// Implementación en memoria para tests y desarrollo.
pub struct InMemoryDomainRepository {
    state: Mutex<ContentState>,
}

impl InMemoryDomainRepository {
    pub fn new() -> Self {
        Self { state: Mutex::new(ContentState::default()) }
    }

    // Helper to map poisoned mutex errors into DomainError
    fn lock(&self) -> Result<MutexGuard<'_, ContentState>, DomainError> {
        self.state
            .lock()
            .map_err(|e| DomainError::ExternalError(format!("Mutex 'content' poisoned: {}", e)))
    }
}

impl Default for InMemoryDomainRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(what: &str) -> DomainError {
    DomainError::NotFound(format!("{} not found", what))
}

impl DomainRepository for InMemoryDomainRepository {
    fn list_global_variables(&self) -> Result<Vec<Variable>, DomainError> {
        let st = self.lock()?;
        let mut out: Vec<Variable> = st.variables.values().filter(|v| v.is_global).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn list_version_variables(&self, flow_version_id: &Uuid) -> Result<Vec<Variable>, DomainError> {
        let st = self.lock()?;
        let mut out: Vec<Variable> = st.variables
                                       .values()
                                       .filter(|v| v.flow_version_id == Some(*flow_version_id))
                                       .cloned()
                                       .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn get_variable(&self, id: &Uuid) -> Result<Variable, DomainError> {
        self.lock()?.variables.get(id).cloned().ok_or_else(|| not_found("Variable"))
    }

    fn create_variable(&self, input: VariableInput, created_by: Option<Uuid>) -> Result<Variable, DomainError> {
        let new = input.validated()?;
        let mut st = self.lock()?;
        st.check_variable_id_free(&new.variable_id, None)?;
        let v = new.into_variable(created_by);
        st.variables.insert(v.id, v.clone());
        Ok(v)
    }

    fn update_variable(&self, id: &Uuid, input: VariableInput) -> Result<Variable, DomainError> {
        let new = input.validated()?;
        let mut st = self.lock()?;
        let existing = st.variables.get(id).cloned().ok_or_else(|| not_found("Variable"))?;
        st.check_variable_id_free(&new.variable_id, Some(id))?;
        let v = new.apply_to(&existing);
        st.variables.insert(v.id, v.clone());
        Ok(v)
    }

    fn delete_variable(&self, id: &Uuid) -> Result<(), DomainError> {
        self.lock()?.variables.remove(id).map(|_| ()).ok_or_else(|| not_found("Variable"))
    }

    fn save_variables(&self, batch: Vec<VariableInput>, created_by: Option<Uuid>) -> Result<Vec<Variable>, DomainError> {
        let mut st = self.lock()?;
        // trabajar sobre una copia y publicarla sólo si todo el lote es válido
        let mut staged = st.variables.clone();
        let mut out = Vec::with_capacity(batch.len());
        for input in batch {
            let id = input.id;
            let new = input.validated()?;
            let v = match id {
                Some(id) => {
                    let existing = staged.get(&id).cloned().ok_or_else(|| not_found("Variable"))?;
                    new.apply_to(&existing)
                }
                None => new.into_variable(created_by),
            };
            if staged.values().any(|o| o.variable_id == v.variable_id && o.id != v.id) {
                return Err(DomainError::Conflict(format!("Variable ID '{}' already exists", v.variable_id)));
            }
            staged.insert(v.id, v.clone());
            out.push(v);
        }
        st.variables = staged;
        Ok(out)
    }

    fn create_entry_condition(&self, flow_version_id: &Uuid, input: ConditionInput) -> Result<Condition, DomainError> {
        let new = input.entry(*flow_version_id)?;
        let mut st = self.lock()?;
        let c = new.into_condition(None);
        st.conditions.insert(c.id, c.clone());
        let name = st.variable_name(&c.variable_id);
        Ok(Condition { variable_name: name, ..c })
    }

    fn create_diagnosis_condition(&self, diagnosis_id: &Uuid, input: ConditionInput) -> Result<Condition, DomainError> {
        let mut st = self.lock()?;
        let version = st.diagnoses
                        .get(diagnosis_id)
                        .map(|d| d.flow_version_id)
                        .ok_or_else(|| not_found("Diagnosis"))?;
        let c = input.for_diagnosis(version, *diagnosis_id)?.into_condition(None);
        st.conditions.insert(c.id, c.clone());
        let name = st.variable_name(&c.variable_id);
        Ok(Condition { variable_name: name, ..c })
    }

    fn list_entry_conditions(&self, flow_version_id: &Uuid) -> Result<Vec<Condition>, DomainError> {
        let st = self.lock()?;
        Ok(st.conditions_where(|c| c.kind == ConditionKind::Entry && c.flow_version_id == *flow_version_id))
    }

    fn list_diagnosis_conditions(&self, diagnosis_id: &Uuid) -> Result<Vec<Condition>, DomainError> {
        let st = self.lock()?;
        Ok(st.conditions_where(|c| c.kind == ConditionKind::Diagnosis && c.reference_id == Some(*diagnosis_id)))
    }

    fn list_version_conditions(&self, flow_version_id: &Uuid) -> Result<Vec<Condition>, DomainError> {
        let st = self.lock()?;
        Ok(st.conditions_where(|c| c.flow_version_id == *flow_version_id))
    }

    fn delete_condition(&self, id: &Uuid, kind: ConditionKind) -> Result<(), DomainError> {
        let mut st = self.lock()?;
        match st.conditions.get(id) {
            Some(c) if c.kind == kind => {
                st.conditions.remove(id);
                Ok(())
            }
            _ => Err(not_found("Condition")),
        }
    }

    fn list_nodes(&self, flow_version_id: &Uuid) -> Result<Vec<Node>, DomainError> {
        let st = self.lock()?;
        let mut out: Vec<Node> = st.nodes
                                   .values()
                                   .filter(|n| n.flow_version_id == *flow_version_id)
                                   .cloned()
                                   .collect();
        out.sort_by_key(|n| (n.order, n.created_at));
        Ok(out)
    }

    fn get_node(&self, id: &Uuid) -> Result<Node, DomainError> {
        self.lock()?.nodes.get(id).cloned().ok_or_else(|| not_found("Node"))
    }

    fn create_node(&self, input: NodeInput) -> Result<Node, DomainError> {
        let node = input.into_node()?;
        let mut st = self.lock()?;
        if st.nodes
             .values()
             .any(|n| n.flow_version_id == node.flow_version_id && n.node_id == node.node_id)
        {
            return Err(DomainError::Conflict(format!("Node ID '{}' already exists in this version", node.node_id)));
        }
        st.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    fn update_node(&self, id: &Uuid, update: NodeUpdate) -> Result<Node, DomainError> {
        let mut st = self.lock()?;
        let existing = st.nodes.get(id).cloned().ok_or_else(|| not_found("Node"))?;
        let node = update.apply_to(&existing)?;
        st.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    fn delete_node(&self, id: &Uuid) -> Result<(), DomainError> {
        self.lock()?.nodes.remove(id).map(|_| ()).ok_or_else(|| not_found("Node"))
    }

    fn list_diagnoses(&self, flow_version_id: &Uuid) -> Result<Vec<Diagnosis>, DomainError> {
        let st = self.lock()?;
        let mut out: Vec<Diagnosis> = st.diagnoses
                                        .values()
                                        .filter(|d| d.flow_version_id == *flow_version_id)
                                        .cloned()
                                        .collect();
        out.sort_by_key(|d| d.created_at);
        Ok(out)
    }

    fn get_diagnosis(&self, id: &Uuid) -> Result<Diagnosis, DomainError> {
        self.lock()?.diagnoses.get(id).cloned().ok_or_else(|| not_found("Diagnosis"))
    }

    fn create_diagnosis(&self, flow_version_id: &Uuid, input: DiagnosisInput) -> Result<Diagnosis, DomainError> {
        let d = input.into_diagnosis(*flow_version_id)?;
        self.lock()?.diagnoses.insert(d.id, d.clone());
        Ok(d)
    }

    fn update_diagnosis(&self, id: &Uuid, input: DiagnosisInput) -> Result<Diagnosis, DomainError> {
        let mut st = self.lock()?;
        let existing = st.diagnoses.get(id).cloned().ok_or_else(|| not_found("Diagnosis"))?;
        let d = input.apply_to(&existing)?;
        st.diagnoses.insert(d.id, d.clone());
        Ok(d)
    }

    fn delete_diagnosis(&self, id: &Uuid) -> Result<(), DomainError> {
        let mut st = self.lock()?;
        if st.diagnoses.remove(id).is_none() {
            return Err(not_found("Diagnosis"));
        }
        st.conditions
          .retain(|_, c| !(c.kind == ConditionKind::Diagnosis && c.reference_id == Some(*id)));
        st.diagnosis_medications.retain(|_, m| m.diagnosis_id != *id);
        st.diagnosis_advice.retain(|_, a| a.diagnosis_id != *id);
        Ok(())
    }

    fn list_diagnosis_medications(&self, diagnosis_id: &Uuid) -> Result<Vec<DiagnosisMedication>, DomainError> {
        let st = self.lock()?;
        let mut out: Vec<DiagnosisMedication> =
            st.diagnosis_medications
              .values()
              .filter(|m| m.diagnosis_id == *diagnosis_id)
              .filter_map(|m| {
                  st.medications.get(&m.medication_id).map(|med| DiagnosisMedication {
                      medication_name: Some(med.name.clone()),
                      medication_unit: Some(med.unit.clone()),
                      ..m.clone()
                  })
              })
              .collect();
        out.sort_by_key(|m| m.order_index);
        Ok(out)
    }

    fn add_diagnosis_medication(&self, diagnosis_id: &Uuid, input: DiagnosisMedicationInput)
                                -> Result<DiagnosisMedication, DomainError> {
        let link = input.into_link(*diagnosis_id)?;
        let mut st = self.lock()?;
        if !st.diagnoses.contains_key(diagnosis_id) {
            return Err(not_found("Diagnosis"));
        }
        let med = st.medications.get(&link.medication_id).cloned().ok_or_else(|| not_found("Medication"))?;
        st.diagnosis_medications.insert(link.id, link.clone());
        Ok(DiagnosisMedication { medication_name: Some(med.name),
                                 medication_unit: Some(med.unit),
                                 ..link })
    }

    fn remove_diagnosis_medication(&self, id: &Uuid) -> Result<(), DomainError> {
        self.lock()?
            .diagnosis_medications
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("Diagnosis medication"))
    }

    fn list_diagnosis_advice(&self, diagnosis_id: &Uuid) -> Result<Vec<DiagnosisAdvice>, DomainError> {
        let st = self.lock()?;
        let mut out: Vec<DiagnosisAdvice> = st.diagnosis_advice
                                              .values()
                                              .filter(|a| a.diagnosis_id == *diagnosis_id)
                                              .cloned()
                                              .collect();
        out.sort_by_key(|a| a.priority);
        Ok(out)
    }

    fn add_diagnosis_advice(&self, diagnosis_id: &Uuid, input: DiagnosisAdviceInput)
                            -> Result<DiagnosisAdvice, DomainError> {
        let advice = input.into_advice(*diagnosis_id)?;
        let mut st = self.lock()?;
        if !st.diagnoses.contains_key(diagnosis_id) {
            return Err(not_found("Diagnosis"));
        }
        st.diagnosis_advice.insert(advice.id, advice.clone());
        Ok(advice)
    }

    fn remove_diagnosis_advice(&self, id: &Uuid) -> Result<(), DomainError> {
        self.lock()?
            .diagnosis_advice
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("Advice"))
    }

    fn list_medications(&self) -> Result<Vec<Medication>, DomainError> {
        let st = self.lock()?;
        let mut out: Vec<Medication> = st.medications.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn get_medication(&self, id: &Uuid) -> Result<Medication, DomainError> {
        self.lock()?.medications.get(id).cloned().ok_or_else(|| not_found("Medication"))
    }

    fn create_medication(&self, input: MedicationInput) -> Result<Medication, DomainError> {
        let m = input.into_medication()?;
        self.lock()?.medications.insert(m.id, m.clone());
        Ok(m)
    }

    fn update_medication(&self, id: &Uuid, input: MedicationInput) -> Result<Medication, DomainError> {
        let mut st = self.lock()?;
        let existing = st.medications.get(id).cloned().ok_or_else(|| not_found("Medication"))?;
        let m = input.apply_to(&existing)?;
        st.medications.insert(m.id, m.clone());
        Ok(m)
    }

    fn delete_medication(&self, id: &Uuid) -> Result<(), DomainError> {
        let mut st = self.lock()?;
        if st.diagnosis_medications.values().any(|m| m.medication_id == *id) {
            let msg = "Medication is prescribed by a diagnosis and cannot be deleted";
            return Err(DomainError::ValidationError(msg.to_string()));
        }
        st.medications.remove(id).map(|_| ()).ok_or_else(|| not_found("Medication"))
    }
}
