// node.rs
use crate::value::ScalarValue;
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
  #[default]
  Question,
}

impl NodeType {
  pub fn as_str(&self) -> &'static str {
    "question"
  }
}

/// Asignación que realiza una opción al ser elegida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAssignment {
  pub id: String,
  pub value: ScalarValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOption {
  pub text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variables: Option<Vec<VariableAssignment>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeContent {
  pub text: String,
  #[serde(default)]
  pub options: Vec<NodeOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub id: Uuid,
  pub node_id: String,
  pub flow_version_id: Uuid,
  #[serde(rename = "type")]
  pub node_type: NodeType,
  pub content: NodeContent,
  pub order: i32,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
  #[serde(default)]
  pub node_id: String,
  #[serde(default)]
  pub flow_version_id: Option<Uuid>,
  #[serde(default)]
  pub content: Option<NodeContent>,
  #[serde(default)]
  pub order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
  pub content: NodeContent,
  #[serde(default)]
  pub order: Option<i32>,
}

impl NodeInput {
  pub fn question(flow_version_id: Uuid, node_id: &str, text: &str, options: Vec<NodeOption>, order: i32) -> Self {
    Self { node_id: node_id.to_string(),
           flow_version_id: Some(flow_version_id),
           content: Some(NodeContent { text: text.to_string(), options }),
           order: Some(order) }
  }

  /// `node_id` y `flow_version_id` son obligatorios; contenido vacío y
  /// orden 0 por defecto.
  pub fn into_node(self) -> Result<Node, DomainError> {
    let node_id = self.node_id.trim().to_string();
    let flow_version_id = match self.flow_version_id {
      Some(v) if !node_id.is_empty() => v,
      _ => return Err(DomainError::ValidationError("Missing required fields".to_string())),
    };
    let now = Utc::now();
    Ok(Node { id: Uuid::new_v4(),
              node_id,
              flow_version_id,
              node_type: NodeType::Question,
              content: self.content.unwrap_or_default(),
              order: self.order.unwrap_or(0),
              created_at: now,
              updated_at: now })
  }
}

impl NodeUpdate {
  pub fn apply_to(self, existing: &Node) -> Result<Node, DomainError> {
    if self.content.text.trim().is_empty() {
      return Err(DomainError::ValidationError("Question text is required".to_string()));
    }
    Ok(Node { content: self.content,
              order: self.order.unwrap_or(existing.order),
              updated_at: Utc::now(),
              ..existing.clone() })
  }
}
