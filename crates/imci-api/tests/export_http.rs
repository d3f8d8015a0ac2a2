use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use chrono::{DateTime, Utc};
use flow::stubs::InMemoryFlowRepository;
use flow::{Flow, FlowError, FlowRepository, FlowStatus, FlowSummary, FlowVersion, FlowVersionService, NewFlow, Principal,
           PublishOutcome, Role, VersionWithFlow};
use imci_api::{configure, AdminConfig, ApiKeyCipher, ApiKeyManager, AppState, ExportService, InMemoryApiKeyStore,
               FETCH_FAILED};
use imci_domain::{Condition, ConditionInput, ConditionKind, Diagnosis, DiagnosisAdvice, DiagnosisAdviceInput,
                  DiagnosisInput, DiagnosisMedication, DiagnosisMedicationInput, DiagnosisWithDetails, DomainError,
                  DomainRepository, DomainStubs, InMemoryDomainRepository, Medication, MedicationInput, Node, NodeInput,
                  NodeOption, NodeUpdate, Operator, Variable, VariableInput, VariableType};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const KEY: &str = "imci-live-key";

fn editor() -> Principal {
  Principal { user_id: Uuid::new_v4(), email: "editor@clinic.org".into(), role: Role::Editor }
}

/// "Cough Assessment" publicado con contenido, más un flow que queda en draft.
fn seeded_repos() -> (Arc<InMemoryFlowRepository>, Arc<InMemoryDomainRepository>) {
  let flows = Arc::new(InMemoryFlowRepository::new());
  let domain = Arc::new(DomainStubs::sample_repo().expect("sample repo"));
  let service = FlowVersionService::new(flows.clone());
  let who = editor();

  let (_flow, v1) = service.create_flow(NewFlow::new("Cough Assessment", Some("Children 2-59 months".into())), &who)
                           .expect("create flow");
  service.create_flow(NewFlow::new("Draft Only", None), &who).expect("create draft flow");

  let breaths = domain.create_variable(VariableInput::scoped("breaths", "Breaths per minute", VariableType::Number, v1.id),
                                       Some(who.user_id))
                      .expect("variable");
  let options = vec![NodeOption { text: "Yes".into(), variables: None }];
  domain.create_node(NodeInput::question(v1.id, "q1", "Does the child have cough?", options, 1)).expect("node");
  domain.create_entry_condition(&v1.id, ConditionInput::new(breaths.id, Operator::GreaterThan, json!("50")))
        .expect("entry condition");
  let d = domain.create_diagnosis(&v1.id, DiagnosisInput::new("Pneumonia", None)).expect("diagnosis");
  domain.create_diagnosis_condition(&d.id, ConditionInput::new(breaths.id, Operator::GreaterThanEquals, json!("50")))
        .expect("diagnosis condition");
  let amoxicillin = domain.list_medications()
                          .expect("medications")
                          .into_iter()
                          .find(|m| m.name == "Amoxicillin")
                          .expect("seeded amoxicillin");
  domain.add_diagnosis_medication(&d.id,
                                  DiagnosisMedicationInput { medication_id: Some(amoxicillin.id),
                                                             dosage: "250".into(),
                                                             ..Default::default() })
        .expect("prescription");
  service.publish(&v1.id, &who).expect("publish");
  (flows, domain)
}

fn key_manager(with_key: bool) -> ApiKeyManager {
  let keys = ApiKeyManager::new(Arc::new(InMemoryApiKeyStore::new()),
                                ApiKeyCipher::new("test-master").expect("cipher"),
                                "http://localhost:3000");
  if with_key {
    keys.set_api_key(KEY, &editor()).expect("store key");
  }
  keys
}

fn seeded_state(with_key: bool) -> AppState {
  let (flows, domain) = seeded_repos();
  AppState::new(key_manager(with_key), ExportService::new(flows, domain))
}

async fn get_flows(state: AppState) -> (StatusCode, Value) {
  let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;
  let req = test::TestRequest::get().uri("/api/flows")
                                    .insert_header((header::AUTHORIZATION, format!("Bearer {}", KEY)))
                                    .to_request();
  let resp = test::call_service(&app, req).await;
  let status = resp.status();
  (status, test::read_body_json(resp).await)
}

/// Flow store whose published listing is unreachable.
struct UnreachablePublished(Arc<InMemoryFlowRepository>);

impl FlowRepository for UnreachablePublished {
  fn create_flow_with_initial_version(&self, new_flow: &NewFlow, created_by: Uuid)
                                      -> flow::Result<(Flow, FlowVersion)> {
    self.0.create_flow_with_initial_version(new_flow, created_by)
  }
  fn get_flow(&self, flow_id: &Uuid) -> flow::Result<Flow> {
    self.0.get_flow(flow_id)
  }
  fn list_flows(&self) -> flow::Result<Vec<FlowSummary>> {
    self.0.list_flows()
  }
  fn update_flow_details(&self, flow_id: &Uuid, name: &str, description: &str) -> flow::Result<Flow> {
    self.0.update_flow_details(flow_id, name, description)
  }
  fn set_flow_status(&self, flow_id: &Uuid, status: FlowStatus) -> flow::Result<Flow> {
    self.0.set_flow_status(flow_id, status)
  }
  fn get_version(&self, version_id: &Uuid) -> flow::Result<FlowVersion> {
    self.0.get_version(version_id)
  }
  fn list_versions(&self, flow_id: &Uuid) -> flow::Result<Vec<VersionWithFlow>> {
    self.0.list_versions(flow_id)
  }
  fn list_all_versions(&self) -> flow::Result<Vec<VersionWithFlow>> {
    self.0.list_all_versions()
  }
  fn list_published_versions(&self) -> flow::Result<Vec<VersionWithFlow>> {
    Err(FlowError::Storage("connection reset by peer".into()))
  }
  fn get_published_version(&self, flow_id: &Uuid) -> flow::Result<Option<FlowVersion>> {
    self.0.get_published_version(flow_id)
  }
  fn insert_next_version(&self, flow_id: &Uuid, entry_conditions: Value, created_by: Uuid)
                         -> flow::Result<FlowVersion> {
    self.0.insert_next_version(flow_id, entry_conditions, created_by)
  }
  fn publish_version(&self, version_id: &Uuid, published_by: Uuid, at: DateTime<Utc>)
                     -> flow::Result<PublishOutcome> {
    self.0.publish_version(version_id, published_by, at)
  }
  fn archive_version(&self, version_id: &Uuid) -> flow::Result<FlowVersion> {
    self.0.archive_version(version_id)
  }
  fn delete_version(&self, version_id: &Uuid) -> flow::Result<()> {
    self.0.delete_version(version_id)
  }
}

/// Content store where node listing and diagnosis details fail.
struct FlakyContent(Arc<InMemoryDomainRepository>);

fn flaky() -> DomainError {
  DomainError::ExternalError("read timed out".into())
}

impl DomainRepository for FlakyContent {
  fn list_global_variables(&self) -> Result<Vec<Variable>, DomainError> {
    self.0.list_global_variables()
  }
  fn list_version_variables(&self, flow_version_id: &Uuid) -> Result<Vec<Variable>, DomainError> {
    self.0.list_version_variables(flow_version_id)
  }
  fn get_variable(&self, id: &Uuid) -> Result<Variable, DomainError> {
    self.0.get_variable(id)
  }
  fn create_variable(&self, input: VariableInput, created_by: Option<Uuid>) -> Result<Variable, DomainError> {
    self.0.create_variable(input, created_by)
  }
  fn update_variable(&self, id: &Uuid, input: VariableInput) -> Result<Variable, DomainError> {
    self.0.update_variable(id, input)
  }
  fn delete_variable(&self, id: &Uuid) -> Result<(), DomainError> {
    self.0.delete_variable(id)
  }
  fn save_variables(&self, batch: Vec<VariableInput>, created_by: Option<Uuid>) -> Result<Vec<Variable>, DomainError> {
    self.0.save_variables(batch, created_by)
  }
  fn create_entry_condition(&self, flow_version_id: &Uuid, input: ConditionInput) -> Result<Condition, DomainError> {
    self.0.create_entry_condition(flow_version_id, input)
  }
  fn create_diagnosis_condition(&self, diagnosis_id: &Uuid, input: ConditionInput) -> Result<Condition, DomainError> {
    self.0.create_diagnosis_condition(diagnosis_id, input)
  }
  fn list_entry_conditions(&self, flow_version_id: &Uuid) -> Result<Vec<Condition>, DomainError> {
    self.0.list_entry_conditions(flow_version_id)
  }
  fn list_diagnosis_conditions(&self, diagnosis_id: &Uuid) -> Result<Vec<Condition>, DomainError> {
    self.0.list_diagnosis_conditions(diagnosis_id)
  }
  fn list_version_conditions(&self, flow_version_id: &Uuid) -> Result<Vec<Condition>, DomainError> {
    self.0.list_version_conditions(flow_version_id)
  }
  fn delete_condition(&self, id: &Uuid, kind: ConditionKind) -> Result<(), DomainError> {
    self.0.delete_condition(id, kind)
  }
  fn list_nodes(&self, _flow_version_id: &Uuid) -> Result<Vec<Node>, DomainError> {
    Err(flaky())
  }
  fn get_node(&self, id: &Uuid) -> Result<Node, DomainError> {
    self.0.get_node(id)
  }
  fn create_node(&self, input: NodeInput) -> Result<Node, DomainError> {
    self.0.create_node(input)
  }
  fn update_node(&self, id: &Uuid, update: NodeUpdate) -> Result<Node, DomainError> {
    self.0.update_node(id, update)
  }
  fn delete_node(&self, id: &Uuid) -> Result<(), DomainError> {
    self.0.delete_node(id)
  }
  fn list_diagnoses(&self, flow_version_id: &Uuid) -> Result<Vec<Diagnosis>, DomainError> {
    self.0.list_diagnoses(flow_version_id)
  }
  fn get_diagnosis(&self, id: &Uuid) -> Result<Diagnosis, DomainError> {
    self.0.get_diagnosis(id)
  }
  fn create_diagnosis(&self, flow_version_id: &Uuid, input: DiagnosisInput) -> Result<Diagnosis, DomainError> {
    self.0.create_diagnosis(flow_version_id, input)
  }
  fn update_diagnosis(&self, id: &Uuid, input: DiagnosisInput) -> Result<Diagnosis, DomainError> {
    self.0.update_diagnosis(id, input)
  }
  fn delete_diagnosis(&self, id: &Uuid) -> Result<(), DomainError> {
    self.0.delete_diagnosis(id)
  }
  fn list_diagnosis_medications(&self, diagnosis_id: &Uuid) -> Result<Vec<DiagnosisMedication>, DomainError> {
    self.0.list_diagnosis_medications(diagnosis_id)
  }
  fn add_diagnosis_medication(&self, diagnosis_id: &Uuid, input: DiagnosisMedicationInput)
                              -> Result<DiagnosisMedication, DomainError> {
    self.0.add_diagnosis_medication(diagnosis_id, input)
  }
  fn remove_diagnosis_medication(&self, id: &Uuid) -> Result<(), DomainError> {
    self.0.remove_diagnosis_medication(id)
  }
  fn list_diagnosis_advice(&self, diagnosis_id: &Uuid) -> Result<Vec<DiagnosisAdvice>, DomainError> {
    self.0.list_diagnosis_advice(diagnosis_id)
  }
  fn add_diagnosis_advice(&self, diagnosis_id: &Uuid, input: DiagnosisAdviceInput)
                          -> Result<DiagnosisAdvice, DomainError> {
    self.0.add_diagnosis_advice(diagnosis_id, input)
  }
  fn remove_diagnosis_advice(&self, id: &Uuid) -> Result<(), DomainError> {
    self.0.remove_diagnosis_advice(id)
  }
  fn get_diagnosis_details(&self, _id: &Uuid) -> Result<DiagnosisWithDetails, DomainError> {
    Err(flaky())
  }
  fn list_medications(&self) -> Result<Vec<Medication>, DomainError> {
    self.0.list_medications()
  }
  fn get_medication(&self, id: &Uuid) -> Result<Medication, DomainError> {
    self.0.get_medication(id)
  }
  fn create_medication(&self, input: MedicationInput) -> Result<Medication, DomainError> {
    self.0.create_medication(input)
  }
  fn update_medication(&self, id: &Uuid, input: MedicationInput) -> Result<Medication, DomainError> {
    self.0.update_medication(id, input)
  }
  fn delete_medication(&self, id: &Uuid) -> Result<(), DomainError> {
    self.0.delete_medication(id)
  }
}

#[actix_web::test]
async fn health_reports_service() {
  let app = test::init_service(App::new().app_data(web::Data::new(seeded_state(false))).configure(configure)).await;
  let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["status"], json!("healthy"));
  assert_eq!(body["service"], json!("imci-flows"));
}

#[actix_web::test]
async fn export_rejects_bad_credentials() {
  let app = test::init_service(App::new().app_data(web::Data::new(seeded_state(true))).configure(configure)).await;

  let cases = [(None, StatusCode::UNAUTHORIZED, "Missing or invalid authorization header"),
               (Some(format!("Basic {}", KEY)), StatusCode::UNAUTHORIZED, "Missing or invalid authorization header"),
               (Some("Bearer not-the-key".to_string()), StatusCode::UNAUTHORIZED, "Invalid API key")];
  for (auth, status, message) in cases {
    let mut req = test::TestRequest::get().uri("/api/flows");
    if let Some(value) = auth {
      req = req.insert_header((header::AUTHORIZATION, value));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), status);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "error": message }));
  }
}

#[actix_web::test]
async fn export_without_stored_key_is_a_server_error() {
  let app = test::init_service(App::new().app_data(web::Data::new(seeded_state(false))).configure(configure)).await;
  let req = test::TestRequest::get().uri("/api/flows")
                                    .insert_header((header::AUTHORIZATION, format!("Bearer {}", KEY)))
                                    .to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body, json!({ "error": "API key not configured" }));
}

#[actix_web::test]
async fn export_returns_published_versions_with_content() {
  let app = test::init_service(App::new().app_data(web::Data::new(seeded_state(true))).configure(configure)).await;
  let req = test::TestRequest::get().uri("/api/flows")
                                    .insert_header((header::AUTHORIZATION, format!("Bearer {}", KEY)))
                                    .to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;

  assert_eq!(body["success"], json!(true));
  assert_eq!(body["total_flows"], json!(1));
  assert!(chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok());

  let item = &body["data"][0];
  assert_eq!(item["version"]["flow_name"], json!("Cough Assessment"));
  assert_eq!(item["version"]["status"], json!("published"));
  assert_eq!(item["version"]["version_number"], json!(1));

  let data = &item["flowData"];
  assert_eq!(data["nodes"].as_array().unwrap().len(), 1);
  let names: Vec<&str> = data["variables"].as_array().unwrap().iter().map(|v| v["name"].as_str().unwrap()).collect();
  assert_eq!(names, vec!["Age (months)", "Breaths per minute", "Cough"]);

  let mut kinds: Vec<&str> = data["conditions"].as_array().unwrap().iter().map(|c| c["type"].as_str().unwrap()).collect();
  kinds.sort();
  assert_eq!(kinds, vec!["diagnosis", "entry"]);

  let diagnosis = &data["diagnoses"][0];
  assert_eq!(diagnosis["name"], json!("Pneumonia"));
  assert_eq!(diagnosis["conditions"].as_array().unwrap().len(), 1);
  assert_eq!(diagnosis["medications"][0]["medication_name"], json!("Amoxicillin"));
  assert_eq!(data["flow"]["description"], json!("Children 2-59 months"));
}

#[cfg(not(feature = "pg"))]
#[actix_web::test]
async fn database_backed_state_serves_an_empty_export() {
  let path = std::env::temp_dir().join(format!("imci_test_{}.db", Uuid::new_v4()));
  let db = imci_persistence::new_sqlite_for_test(path.to_str().unwrap()).expect("open sqlite db");
  let config = AdminConfig::from_lookup(|k| (k == "API_ENCRYPTION_KEY").then(|| "db-master".to_string()));
  let state = AppState::from_database(&db, &config).expect("state");
  state.api_keys.set_api_key(KEY, &editor()).expect("store key");

  let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;
  let req = test::TestRequest::get().uri("/api/flows")
                                    .insert_header((header::AUTHORIZATION, format!("Bearer {}", KEY)))
                                    .to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["total_flows"], json!(0));
  assert_eq!(body["data"], json!([]));
  let _ = std::fs::remove_file(path);
}

#[actix_web::test]
async fn failed_content_reads_degrade_that_section_only() {
  let (flows, domain) = seeded_repos();
  let state = AppState::new(key_manager(true), ExportService::new(flows, Arc::new(FlakyContent(domain))));
  let (status, body) = get_flows(state).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total_flows"], json!(1));

  let data = &body["data"][0]["flowData"];
  assert_eq!(data["nodes"], json!([]));
  // the rest of the document is still served
  assert_eq!(data["variables"].as_array().unwrap().len(), 3);
  assert_eq!(data["conditions"].as_array().unwrap().len(), 2);
  let diagnosis = &data["diagnoses"][0];
  assert_eq!(diagnosis["name"], json!("Pneumonia"));
  assert_eq!(diagnosis["conditions"], json!([]));
  assert_eq!(diagnosis["medications"], json!([]));
  assert_eq!(diagnosis["advice"], json!([]));
  assert_eq!(data["flow"]["name"], json!("Cough Assessment"));
}

#[actix_web::test]
async fn unreachable_published_listing_is_a_fetch_failure() {
  let (flows, domain) = seeded_repos();
  let state = AppState::new(key_manager(true), ExportService::new(Arc::new(UnreachablePublished(flows)), domain));
  let (status, body) = get_flows(state).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(body, json!({ "error": FETCH_FAILED }));
  assert_eq!(FETCH_FAILED, "Could not fetch published flow versions with data.");
}
