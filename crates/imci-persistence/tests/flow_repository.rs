use flow::{AnalyticsService, FlowError, FlowRepository, FlowStatus, FlowVersionService, NewFlow, Principal, Role};
use imci_domain::{ConditionInput, DiagnosisInput, DomainRepository, NodeInput, Operator, VariableInput, VariableType};
use imci_persistence::{new_sqlite_for_test, Database, DieselFlowRepository};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn temp_db() -> (Database, std::path::PathBuf) {
  let tmp_path = std::env::temp_dir().join(format!("imci_test_{}.db", Uuid::new_v4()));
  let db = new_sqlite_for_test(tmp_path.to_str().unwrap()).expect("open sqlite db");
  (db, tmp_path)
}

fn editor() -> Principal {
  Principal { user_id: Uuid::new_v4(), email: "editor@clinic.org".into(), role: Role::Editor }
}

#[test]
fn publish_archives_previous_version_in_sqlite() {
  let (db, path) = temp_db();
  let service = FlowVersionService::new(Arc::new(db.flow_repository()));
  let who = editor();
  let (flow, v1) = service.create_flow(NewFlow::new("Cough Assessment", None), &who).expect("create flow");
  service.publish(&v1.id, &who).expect("publish v1");
  let v2 = service.duplicate(&v1.id, Some("second round"), &who).expect("duplicate");
  assert_eq!(v2.version_number, 2);
  assert_eq!(v2.status, FlowStatus::Draft);

  service.publish(&v2.id, &who).expect("publish v2");
  let versions = service.versions(&flow.id).expect("versions");
  let statuses: Vec<FlowStatus> = versions.iter().map(|v| v.version.status).collect();
  assert_eq!(statuses, vec![FlowStatus::Archived, FlowStatus::Published]);
  assert_eq!(versions[0].flow_name, "Cough Assessment");

  // an archived version is terminal
  match service.publish(&v1.id, &who) {
    Err(FlowError::InvalidState(m)) => assert_eq!(m, "Archived versions cannot be published"),
    other => panic!("expected invalid state, got {:?}", other),
  }
  let published = service.get_published(&flow.id).expect("published").expect("one published");
  assert_eq!(published.id, v2.id);
  assert_eq!(published.published_by, Some(who.user_id));
  let _ = std::fs::remove_file(path);
}

#[test]
fn concurrent_publishes_leave_one_published_version() {
  let (db, path) = temp_db();
  let repo = Arc::new(db.flow_repository());
  let service = FlowVersionService::new(repo.clone());
  let who = editor();
  let (flow, v1) = service.create_flow(NewFlow::new("Fever", None), &who).expect("create flow");
  let v2 = service.create(&flow.id, &who).expect("v2");

  let handles: Vec<_> = vec![v1.id, v2.id].into_iter()
                                          .map(|id| {
                                            let service = service.clone();
                                            let who = who.clone();
                                            std::thread::spawn(move || service.publish(&id, &who))
                                          })
                                          .collect();
  for h in handles {
    let _ = h.join().expect("thread");
  }
  let published = repo.list_versions(&flow.id)
                      .expect("versions")
                      .into_iter()
                      .filter(|v| v.version.status == FlowStatus::Published)
                      .count();
  assert_eq!(published, 1);
  let _ = std::fs::remove_file(path);
}

#[test]
fn version_numbers_are_not_reused_after_delete() {
  let (db, path) = temp_db();
  let service = FlowVersionService::new(Arc::new(db.flow_repository()));
  let who = editor();
  let (flow, _v1) = service.create_flow(NewFlow::new("Diarrhoea", None), &who).expect("create flow");
  let v2 = service.create(&flow.id, &who).expect("v2");
  let v3 = service.create(&flow.id, &who).expect("v3");
  service.delete(&v2.id, &who).expect("delete v2");
  let v4 = service.create(&flow.id, &who).expect("v4");
  assert_eq!(v3.version_number, 3);
  assert_eq!(v4.version_number, 4);

  // the counter survives deleting the highest draft too
  service.delete(&v4.id, &who).expect("delete v4");
  let v5 = service.create(&flow.id, &who).expect("v5");
  assert_eq!(v5.version_number, 5);
  let _ = std::fs::remove_file(path);
}

#[test]
fn deleting_a_draft_removes_its_content() {
  let (db, path) = temp_db();
  let flows: Arc<DieselFlowRepository> = Arc::new(db.flow_repository());
  let content = db.domain_repository();
  let service = FlowVersionService::new(flows.clone());
  let analytics = AnalyticsService::new(flows.clone());
  let who = editor();
  let (flow, _v1) = service.create_flow(NewFlow::new("Malnutrition", None), &who).expect("create flow");
  let v2 = service.create(&flow.id, &who).expect("v2");

  let local = content.create_variable(VariableInput::scoped("muac", "MUAC (mm)", VariableType::Number, v2.id),
                                      Some(who.user_id))
                     .expect("variable");
  content.create_node(NodeInput::question(v2.id, "q1", "Is there visible wasting?", vec![], 1)).expect("node");
  let d = content.create_diagnosis(&v2.id, DiagnosisInput::new("Severe acute malnutrition", None))
                 .expect("diagnosis");
  content.create_diagnosis_condition(&d.id, ConditionInput::new(local.id, Operator::LessThan, json!("115")))
         .expect("condition");
  let session = analytics.track_session(flow.id, Some(v2.id), None, None).expect("session");

  service.delete(&v2.id, &who).expect("delete v2");

  assert!(content.list_nodes(&v2.id).expect("nodes").is_empty());
  assert!(content.list_diagnoses(&v2.id).expect("diagnoses").is_empty());
  assert!(content.list_version_conditions(&v2.id).expect("conditions").is_empty());
  assert!(content.list_version_variables(&v2.id).expect("variables").is_empty());
  let kept = flow::AnalyticsRepository::get_session(flows.as_ref(), &session).expect("session kept");
  assert_eq!(kept.flow_version_id, None);
  let _ = std::fs::remove_file(path);
}

#[test]
fn only_version_and_published_versions_cannot_be_deleted() {
  let (db, path) = temp_db();
  let service = FlowVersionService::new(Arc::new(db.flow_repository()));
  let who = editor();
  let (flow, v1) = service.create_flow(NewFlow::new("Ear problem", None), &who).expect("create flow");
  match service.delete(&v1.id, &who) {
    Err(FlowError::InvalidState(m)) => assert_eq!(m, "Cannot delete the only version of a flow"),
    other => panic!("expected invalid state, got {:?}", other),
  }
  service.create(&flow.id, &who).expect("v2");
  service.publish(&v1.id, &who).expect("publish");
  assert!(matches!(service.delete(&v1.id, &who), Err(FlowError::InvalidState(_))));
  let _ = std::fs::remove_file(path);
}

#[test]
fn racing_publish_and_delete_never_lose_the_published_version() {
  let (db, path) = temp_db();
  let service = FlowVersionService::new(Arc::new(db.flow_repository()));
  let who = editor();
  let (flow, _v1) = service.create_flow(NewFlow::new("Malnutrition", None), &who).expect("create flow");
  let v2 = service.create(&flow.id, &who).expect("v2").id;

  let publisher = {
    let (service, who) = (service.clone(), who.clone());
    std::thread::spawn(move || service.publish(&v2, &who).is_ok())
  };
  let deleter = {
    let (service, who) = (service.clone(), who.clone());
    std::thread::spawn(move || service.delete(&v2, &who).is_ok())
  };
  let published = publisher.join().expect("publisher thread");
  let deleted = deleter.join().expect("deleter thread");
  assert!(published ^ deleted, "exactly one of publish/delete must win");

  let current = service.get_published(&flow.id).expect("published lookup");
  if published {
    assert_eq!(current.map(|v| v.id), Some(v2));
  } else {
    assert!(current.is_none());
    assert!(matches!(service.get_version(&v2), Err(FlowError::NotFound(_))));
  }
  let _ = std::fs::remove_file(path);
}

#[test]
fn analytics_round_trip_through_sqlite() {
  let (db, path) = temp_db();
  let repo = Arc::new(db.flow_repository());
  let service = FlowVersionService::new(repo.clone());
  let analytics = AnalyticsService::new(repo.clone());
  let who = editor();
  let (flow, v1) = service.create_flow(NewFlow::new("Cough Assessment", None), &who).expect("create flow");

  let a = analytics.track_session(flow.id, Some(v1.id), None, Some(who.user_id)).expect("a");
  let b = analytics.track_session(flow.id, None, Some("session_custom".into()), None).expect("b");
  assert_eq!(b, "session_custom");
  analytics.update_nodes_visited(&a, 4).expect("nodes");
  analytics.finalize_session(&a).expect("finalize");
  analytics.update_nodes_visited(&b, 2).expect("nodes");

  let summary = analytics.flow_summary(&flow.id).expect("summary");
  assert_eq!(summary.total_sessions, 2);
  assert_eq!(summary.completed_sessions, 1);
  assert_eq!(summary.finalized_sessions, 1);
  assert_eq!(summary.completion_rate, 50.0);
  assert_eq!(summary.average_nodes_visited, 3);
  assert!(matches!(analytics.complete_session("missing"), Err(FlowError::NotFound(_))));
  let _ = std::fs::remove_file(path);
}
