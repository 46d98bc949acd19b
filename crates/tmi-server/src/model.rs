//! Tagged-union data model shared by the store, authorization, and HTTP
//! layers. Principals and diagram cells are variants, not a class hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed identity for the pseudo-group that matches every principal.
/// Cannot receive membership mutations.
pub const EVERYONE_ID: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reader,
    Writer,
    Owner,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Reader => 1,
            Role::Writer => 2,
            Role::Owner => 3,
        }
    }

    pub fn at_least(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}
impl Ord for Role {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// {user, group, everyone} tagged variant. The "everyone" variant carries no
/// payload; its identity is always [`EVERYONE_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Principal {
    User { id: Uuid, provider: String, provider_id: String },
    Group { id: Uuid },
    Everyone,
}

impl Principal {
    pub fn identity(&self) -> Uuid {
        match self {
            Principal::User { id, .. } => *id,
            Principal::Group { id } => *id,
            Principal::Everyone => EVERYONE_ID,
        }
    }

    pub fn is_everyone(&self) -> bool {
        matches!(self, Principal::Everyone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    /// "*" for TMI-managed groups, otherwise the external provider name.
    pub provider: String,
    pub group_name: String,
    pub first_used: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationEntry {
    pub principal: Principal,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for Severity {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threat {
    pub id: Uuid,
    pub threat_model_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub threat_type: Option<String>,
    pub mitigated: bool,
    pub mitigation: Option<String>,
    pub score: Option<f64>,
    pub metadata: Option<Vec<Metadata>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub threat_model_id: Uuid,
    pub name: String,
    pub uri: String,
    pub description: Option<String>,
    pub metadata: Option<Vec<Metadata>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub threat_model_id: Uuid,
    pub name: String,
    pub uri: String,
    pub description: Option<String>,
    pub repo_type: String,
    pub metadata: Option<Vec<Metadata>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Flat coordinates are the only form emitted. Input may arrive flat
/// (`{x,y,width,height}`) or nested (`{position:{x,y}, size:{width,height}}`);
/// [`Node`]'s `Deserialize` impl accepts either and normalizes to flat fields.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Deserialize)]
struct NodePosition {
    x: f64,
    y: f64,
}

#[derive(Deserialize)]
struct NodeSize {
    width: f64,
    height: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NodeInput {
    Flat { id: String, x: f64, y: f64, width: f64, height: f64 },
    Nested { id: String, position: NodePosition, size: NodeSize },
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match NodeInput::deserialize(deserializer)? {
            NodeInput::Flat { id, x, y, width, height } => Node { id, x, y, width, height },
            NodeInput::Nested { id, position, size } => {
                Node { id, x: position.x, y: position.y, width: size.width, height: size.height }
            }
        })
    }
}

pub const MIN_NODE_WIDTH: f64 = 40.0;
pub const MIN_NODE_HEIGHT: f64 = 30.0;

impl Node {
    /// Clamps width/height to the minimums.
    pub fn normalize(&mut self) {
        if self.width < MIN_NODE_WIDTH {
            self.width = MIN_NODE_WIDTH;
        }
        if self.height < MIN_NODE_HEIGHT {
            self.height = MIN_NODE_HEIGHT;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "snake_case")]
pub enum Cell {
    Node(Node),
    Edge(Edge),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagram {
    pub id: Uuid,
    pub threat_model_id: Uuid,
    pub name: String,
    pub diagram_type: String,
    pub cells: Vec<Cell>,
    pub metadata: Option<Vec<Metadata>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub threat_model_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatModel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub framework: String,
    pub owner: Principal,
    pub authorization: Vec<AuthorizationEntry>,
    pub security_reviewer: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub project_id: Option<Uuid>,
}

impl ThreatModel {
    /// ∀ T: the principal identified by `owner` appears in `authorization`
    /// with role `owner`.
    pub fn owner_invariant_holds(&self) -> bool {
        self.authorization
            .iter()
            .any(|e| e.principal.identity() == self.owner.identity() && e.role == Role::Owner)
    }

    pub fn reviewer_invariant_holds(&self) -> bool {
        match self.security_reviewer {
            None => true,
            Some(r) => self
                .authorization
                .iter()
                .any(|e| e.principal.identity() == r && e.role == Role::Owner),
        }
    }

    pub fn has_duplicate_principals(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.authorization.iter().any(|e| !seen.insert(e.principal.identity()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    Parent,
    Child,
    Dependency,
    Dependent,
    Supersedes,
    SupersededBy,
    RelatesTo,
}

impl RelationshipType {
    pub fn inverse(self) -> Option<RelationshipType> {
        use RelationshipType::*;
        match self {
            Parent => Some(Child),
            Child => Some(Parent),
            Dependency => Some(Dependent),
            Dependent => Some(Dependency),
            Supersedes => Some(SupersededBy),
            SupersededBy => Some(Supersedes),
            RelatesTo => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRelationship {
    pub from: Uuid,
    pub to: Uuid,
    pub relationship_type: RelationshipType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Member,
    Lead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: Uuid,
    pub role: TeamRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub members: Vec<TeamMember>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Administrator {
    pub id: Uuid,
    pub principal: Principal,
    pub provider_namespace: String,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Addon {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub threat_model_id: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl InvocationStatus {
    pub fn is_active(self) -> bool {
        matches!(self, InvocationStatus::Pending | InvocationStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub id: Uuid,
    pub addon_id: Uuid,
    pub status: InvocationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
    String,
    Int,
    Bool,
    Json,
}

pub const RESERVED_SETTING_KEYS: &[&str] = &["migrate"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub setting_type: SettingType,
    pub description: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub modified_by: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: Uuid, role: Role) -> AuthorizationEntry {
        AuthorizationEntry {
            principal: Principal::User { id, provider: "local".into(), provider_id: id.to_string() },
            role,
        }
    }

    #[test]
    fn owner_invariant_detects_missing_owner_entry() {
        let owner_id = Uuid::new_v4();
        let tm = ThreatModel {
            id: Uuid::new_v4(),
            name: "t".into(),
            description: None,
            framework: "STRIDE".into(),
            owner: Principal::User { id: owner_id, provider: "local".into(), provider_id: owner_id.to_string() },
            authorization: vec![],
            security_reviewer: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            created_by: owner_id,
            project_id: None,
        };
        assert!(!tm.owner_invariant_holds());
    }

    #[test]
    fn duplicate_principal_detection() {
        let id = Uuid::new_v4();
        let tm = ThreatModel {
            id: Uuid::new_v4(),
            name: "t".into(),
            description: None,
            framework: "STRIDE".into(),
            owner: Principal::User { id, provider: "local".into(), provider_id: id.to_string() },
            authorization: vec![entry(id, Role::Writer), entry(id, Role::Reader)],
            security_reviewer: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
            created_by: id,
            project_id: None,
        };
        assert!(tm.has_duplicate_principals());
    }

    #[test]
    fn node_normalizes_minimum_size() {
        let mut n = Node { id: "n1".into(), x: 0.0, y: 0.0, width: 10.0, height: 5.0 };
        n.normalize();
        assert_eq!(n.width, MIN_NODE_WIDTH);
        assert_eq!(n.height, MIN_NODE_HEIGHT);
    }

    #[test]
    fn relationship_inverse_is_symmetric() {
        assert_eq!(RelationshipType::Parent.inverse(), Some(RelationshipType::Child));
        assert_eq!(RelationshipType::Child.inverse(), Some(RelationshipType::Parent));
        assert_eq!(RelationshipType::RelatesTo.inverse(), None);
    }

    #[test]
    fn node_deserializes_flat_shape() {
        let n: Node = serde_json::from_str(r#"{"id":"n1","x":1.0,"y":2.0,"width":50.0,"height":60.0}"#).unwrap();
        assert_eq!((n.x, n.y, n.width, n.height), (1.0, 2.0, 50.0, 60.0));
    }

    #[test]
    fn node_deserializes_nested_shape() {
        let n: Node =
            serde_json::from_str(r#"{"id":"n1","position":{"x":1.0,"y":2.0},"size":{"width":50.0,"height":60.0}}"#)
                .unwrap();
        assert_eq!((n.x, n.y, n.width, n.height), (1.0, 2.0, 50.0, 60.0));
    }

    #[test]
    fn node_normalizes_after_nested_deserialize() {
        let mut n: Node =
            serde_json::from_str(r#"{"id":"n1","position":{"x":0.0,"y":0.0},"size":{"width":10.0,"height":5.0}}"#)
                .unwrap();
        n.normalize();
        assert_eq!(n.width, MIN_NODE_WIDTH);
        assert_eq!(n.height, MIN_NODE_HEIGHT);
    }
}
