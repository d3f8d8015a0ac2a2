//! Contenido clínico de los flows IMCI: variables, condiciones, nodos de
//! pregunta, diagnósticos y el catálogo de medicamentos.
mod condition;
mod diagnosis;
mod domain_repository;
mod domain_stubs;
mod errors;
mod medication;
mod node;
mod value;
mod variable;

pub use condition::{Condition, ConditionInput, ConditionKind, LogicalOperator, NewCondition, Operator};
pub use diagnosis::{AdviceCategory, Diagnosis, DiagnosisAdvice, DiagnosisAdviceInput, DiagnosisInput,
                    DiagnosisMedication, DiagnosisMedicationInput, DiagnosisWithDetails};
pub use domain_repository::{DomainRepository, InMemoryDomainRepository};
pub use domain_stubs::DomainStubs;
pub use errors::DomainError;
pub use medication::{Medication, MedicationInput, STANDARD_MEDICATIONS};
pub use node::{Node, NodeContent, NodeInput, NodeOption, NodeType, NodeUpdate, VariableAssignment};
pub use value::ScalarValue;
pub use variable::{NewVariable, Variable, VariableCategory, VariableInput, VariableType};
