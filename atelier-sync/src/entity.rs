//! Closed set of entity kinds carried by update batches.
//!
//! Each kind has a payload struct holding its identity and the relationship
//! fields reconciliation needs. Every other field is kept verbatim in
//! `extra`, so a payload can be handed back to consumers unchanged. The
//! `@class` discriminant stays in `extra` as well, which preserves sub-class
//! names like `TextDataBlock` that map onto a broader kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pending::Revision;

/// Numeric identity of a persisted entity.
pub type EntityId = i64;

/// Field carrying the kind discriminant in every entity payload.
pub const CLASS_FIELD: &str = "@class";

/// Every kind of entity the server may announce.
///
/// Adding a variant here forces every `match` on it (classification,
/// routing, decoding, index links) to be updated before the crate compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityKind {
    Card,
    CardContent,
    CardType,
    Document,
    Resource,
    User,
    Account,
    Project,
    TeamMember,
    TeamRole,
    Assignment,
    InstanceMaker,
    UserPresence,
    ActivityFlowLink,
    HttpSession,
    Change,
    CopyParam,
}

/// Where a classified item of a given kind is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Normalized cache and its secondary indices.
    Cache,
    /// Presence overlay.
    Presence,
    /// Pending change queue.
    Changes,
    /// Recognized and deliberately dropped.
    Ignore,
}

impl EntityKind {
    pub const ALL: [EntityKind; 17] = [
        EntityKind::Card,
        EntityKind::CardContent,
        EntityKind::CardType,
        EntityKind::Document,
        EntityKind::Resource,
        EntityKind::User,
        EntityKind::Account,
        EntityKind::Project,
        EntityKind::TeamMember,
        EntityKind::TeamRole,
        EntityKind::Assignment,
        EntityKind::InstanceMaker,
        EntityKind::UserPresence,
        EntityKind::ActivityFlowLink,
        EntityKind::HttpSession,
        EntityKind::Change,
        EntityKind::CopyParam,
    ];

    /// Resolve a wire class name, including sub-class aliases.
    pub fn from_class(class: &str) -> Option<Self> {
        let kind = match class {
            "Card" => EntityKind::Card,
            "CardContent" => EntityKind::CardContent,
            "CardType" | "CardTypeRef" | "AbstractCardType" => EntityKind::CardType,
            "Document" | "TextDataBlock" | "DocumentFile" | "ExternalLink" => EntityKind::Document,
            "Resource" | "ResourceRef" | "AbstractResource" => EntityKind::Resource,
            "User" => EntityKind::User,
            "Account" | "LocalAccount" => EntityKind::Account,
            "Project" => EntityKind::Project,
            "TeamMember" => EntityKind::TeamMember,
            "TeamRole" => EntityKind::TeamRole,
            "Assignment" => EntityKind::Assignment,
            "InstanceMaker" => EntityKind::InstanceMaker,
            "UserPresence" => EntityKind::UserPresence,
            "ActivityFlowLink" => EntityKind::ActivityFlowLink,
            "HttpSession" => EntityKind::HttpSession,
            "Change" => EntityKind::Change,
            "CopyParam" => EntityKind::CopyParam,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Card => "Card",
            EntityKind::CardContent => "CardContent",
            EntityKind::CardType => "CardType",
            EntityKind::Document => "Document",
            EntityKind::Resource => "Resource",
            EntityKind::User => "User",
            EntityKind::Account => "Account",
            EntityKind::Project => "Project",
            EntityKind::TeamMember => "TeamMember",
            EntityKind::TeamRole => "TeamRole",
            EntityKind::Assignment => "Assignment",
            EntityKind::InstanceMaker => "InstanceMaker",
            EntityKind::UserPresence => "UserPresence",
            EntityKind::ActivityFlowLink => "ActivityFlowLink",
            EntityKind::HttpSession => "HttpSession",
            EntityKind::Change => "Change",
            EntityKind::CopyParam => "CopyParam",
        }
    }

    pub fn route(self) -> Route {
        match self {
            EntityKind::Card
            | EntityKind::CardContent
            | EntityKind::CardType
            | EntityKind::Document
            | EntityKind::Resource
            | EntityKind::User
            | EntityKind::Account
            | EntityKind::Project
            | EntityKind::TeamMember
            | EntityKind::TeamRole
            | EntityKind::Assignment
            | EntityKind::InstanceMaker
            | EntityKind::ActivityFlowLink => Route::Cache,
            EntityKind::UserPresence => Route::Presence,
            EntityKind::Change => Route::Changes,
            EntityKind::HttpSession | EntityKind::CopyParam => Route::Ignore,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for EntityKind {
    type Error = String;

    fn try_from(class: String) -> Result<Self, Self::Error> {
        EntityKind::from_class(&class).ok_or_else(|| format!("unknown entity kind `{class}`"))
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.as_str().to_string()
    }
}

// ───────────────────────────────────────────────────────────────────
// Secondary indices
// ───────────────────────────────────────────────────────────────────

/// Named parent → children index maintained alongside the primary maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexName {
    /// Card content id → cards nested in it.
    ContentSubCards,
    /// Card id → its contents (variants).
    CardVariants,
    /// Card content id → documents it owns.
    ContentDocuments,
    /// Resource id → documents it owns.
    ResourceDocuments,
    /// Card id → resources attached to it.
    CardResources,
    /// Card content id → resources attached to it.
    ContentResources,
    /// Card type id → resources attached to it.
    CardTypeResources,
    /// Project id → card types.
    ProjectCardTypes,
    /// Project id → team members.
    ProjectMembers,
    /// Project id → team roles.
    ProjectRoles,
    /// Project id → instance makers.
    ProjectInstanceMakers,
    /// Card id → assignments.
    CardAssignments,
    /// Card id → activity-flow links leaving it.
    CardOutgoingLinks,
    /// Card id → activity-flow links arriving at it.
    CardIncomingLinks,
    /// User id → accounts.
    UserAccounts,
}

impl IndexName {
    /// Kind of the ids stored in this index.
    pub fn child_kind(&self) -> EntityKind {
        match self {
            IndexName::ContentSubCards => EntityKind::Card,
            IndexName::CardVariants => EntityKind::CardContent,
            IndexName::ContentDocuments | IndexName::ResourceDocuments => EntityKind::Document,
            IndexName::CardResources | IndexName::ContentResources | IndexName::CardTypeResources => {
                EntityKind::Resource
            }
            IndexName::ProjectCardTypes => EntityKind::CardType,
            IndexName::ProjectMembers => EntityKind::TeamMember,
            IndexName::ProjectRoles => EntityKind::TeamRole,
            IndexName::ProjectInstanceMakers => EntityKind::InstanceMaker,
            IndexName::CardAssignments => EntityKind::Assignment,
            IndexName::CardOutgoingLinks | IndexName::CardIncomingLinks => EntityKind::ActivityFlowLink,
            IndexName::UserAccounts => EntityKind::Account,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: EntityId,
    /// Card content this card is nested in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_type_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardContent {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardType {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_card_content_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_resource_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_content_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_card_type_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: EntityId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: EntityId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRole {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMaker {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Ephemeral "who is looking at what" record, keyed by WebSocket session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub ws_session_id: String,
    pub project_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFlowLink {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_card_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_card_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSession {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authoritative edit of a document-like entity, identified by revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub at_class: EntityKind,
    pub at_id: EntityId,
    pub revision: Revision,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyParam {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A classified entity payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Card(Card),
    CardContent(CardContent),
    CardType(CardType),
    Document(Document),
    Resource(Resource),
    User(User),
    Account(Account),
    Project(Project),
    TeamMember(TeamMember),
    TeamRole(TeamRole),
    Assignment(Assignment),
    InstanceMaker(InstanceMaker),
    UserPresence(UserPresence),
    ActivityFlowLink(ActivityFlowLink),
    HttpSession(HttpSession),
    Change(Change),
    CopyParam(CopyParam),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Card(_) => EntityKind::Card,
            Entity::CardContent(_) => EntityKind::CardContent,
            Entity::CardType(_) => EntityKind::CardType,
            Entity::Document(_) => EntityKind::Document,
            Entity::Resource(_) => EntityKind::Resource,
            Entity::User(_) => EntityKind::User,
            Entity::Account(_) => EntityKind::Account,
            Entity::Project(_) => EntityKind::Project,
            Entity::TeamMember(_) => EntityKind::TeamMember,
            Entity::TeamRole(_) => EntityKind::TeamRole,
            Entity::Assignment(_) => EntityKind::Assignment,
            Entity::InstanceMaker(_) => EntityKind::InstanceMaker,
            Entity::UserPresence(_) => EntityKind::UserPresence,
            Entity::ActivityFlowLink(_) => EntityKind::ActivityFlowLink,
            Entity::HttpSession(_) => EntityKind::HttpSession,
            Entity::Change(_) => EntityKind::Change,
            Entity::CopyParam(_) => EntityKind::CopyParam,
        }
    }

    /// Numeric id. Presences are keyed by session instead and have none;
    /// a change may arrive before the server assigned it one.
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Entity::Card(e) => Some(e.id),
            Entity::CardContent(e) => Some(e.id),
            Entity::CardType(e) => Some(e.id),
            Entity::Document(e) => Some(e.id),
            Entity::Resource(e) => Some(e.id),
            Entity::User(e) => Some(e.id),
            Entity::Account(e) => Some(e.id),
            Entity::Project(e) => Some(e.id),
            Entity::TeamMember(e) => Some(e.id),
            Entity::TeamRole(e) => Some(e.id),
            Entity::Assignment(e) => Some(e.id),
            Entity::InstanceMaker(e) => Some(e.id),
            Entity::UserPresence(_) => None,
            Entity::ActivityFlowLink(e) => Some(e.id),
            Entity::HttpSession(e) => Some(e.id),
            Entity::Change(e) => e.id,
            Entity::CopyParam(e) => Some(e.id),
        }
    }

    /// Secondary-index memberships of this snapshot: `(index, parent id)`.
    pub fn links(&self) -> Vec<(IndexName, EntityId)> {
        let mut links = Vec::new();
        let mut push = |index: IndexName, parent: Option<EntityId>| {
            if let Some(parent) = parent {
                links.push((index, parent));
            }
        };
        match self {
            Entity::Card(e) => push(IndexName::ContentSubCards, e.parent_id),
            Entity::CardContent(e) => push(IndexName::CardVariants, e.card_id),
            Entity::CardType(e) => push(IndexName::ProjectCardTypes, e.project_id),
            Entity::Document(e) => {
                push(IndexName::ContentDocuments, e.owning_card_content_id);
                push(IndexName::ResourceDocuments, e.owning_resource_id);
            }
            Entity::Resource(e) => {
                push(IndexName::CardResources, e.card_id);
                push(IndexName::ContentResources, e.card_content_id);
                push(IndexName::CardTypeResources, e.abstract_card_type_id);
            }
            Entity::Account(e) => push(IndexName::UserAccounts, e.user_id),
            Entity::TeamMember(e) => push(IndexName::ProjectMembers, e.project_id),
            Entity::TeamRole(e) => push(IndexName::ProjectRoles, e.project_id),
            Entity::Assignment(e) => push(IndexName::CardAssignments, e.card_id),
            Entity::InstanceMaker(e) => push(IndexName::ProjectInstanceMakers, e.project_id),
            Entity::ActivityFlowLink(e) => {
                push(IndexName::CardOutgoingLinks, e.previous_card_id);
                push(IndexName::CardIncomingLinks, e.next_card_id);
            }
            Entity::User(_)
            | Entity::Project(_)
            | Entity::UserPresence(_)
            | Entity::HttpSession(_)
            | Entity::Change(_)
            | Entity::CopyParam(_) => {}
        }
        links
    }

    /// Payload as JSON, with `@class` filled in when it was not carried.
    pub fn to_value(&self) -> Value {
        let value = match self {
            Entity::Card(e) => serde_json::to_value(e),
            Entity::CardContent(e) => serde_json::to_value(e),
            Entity::CardType(e) => serde_json::to_value(e),
            Entity::Document(e) => serde_json::to_value(e),
            Entity::Resource(e) => serde_json::to_value(e),
            Entity::User(e) => serde_json::to_value(e),
            Entity::Account(e) => serde_json::to_value(e),
            Entity::Project(e) => serde_json::to_value(e),
            Entity::TeamMember(e) => serde_json::to_value(e),
            Entity::TeamRole(e) => serde_json::to_value(e),
            Entity::Assignment(e) => serde_json::to_value(e),
            Entity::InstanceMaker(e) => serde_json::to_value(e),
            Entity::UserPresence(e) => serde_json::to_value(e),
            Entity::ActivityFlowLink(e) => serde_json::to_value(e),
            Entity::HttpSession(e) => serde_json::to_value(e),
            Entity::Change(e) => serde_json::to_value(e),
            Entity::CopyParam(e) => serde_json::to_value(e),
        };
        // Plain structs of JSON-compatible fields always serialize.
        let mut value = value.unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.entry(CLASS_FIELD)
                .or_insert_with(|| Value::String(self.kind().as_str().to_string()));
        }
        value
    }
}

// ───────────────────────────────────────────────────────────────────
// Deletions and batches
// ───────────────────────────────────────────────────────────────────

/// Key of a deletion marker: a numeric id, or a session id for presences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexKey {
    Id(EntityId),
    Session(String),
}

/// Minimal `(kind, id)` deletion marker. The kind is kept as the raw wire
/// class so that an unknown one can be reported instead of failing the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "type")]
    pub class: String,
    pub id: IndexKey,
}

impl IndexEntry {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self {
            class: kind.as_str().to_string(),
            id: IndexKey::Id(id),
        }
    }

    pub fn presence(ws_session_id: impl Into<String>) -> Self {
        Self {
            class: EntityKind::UserPresence.as_str().to_string(),
            id: IndexKey::Session(ws_session_id.into()),
        }
    }

    /// Wire form of the marker.
    pub fn to_value(&self) -> Value {
        let id = match &self.id {
            IndexKey::Id(id) => Value::from(*id),
            IndexKey::Session(session) => Value::String(session.clone()),
        };
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.class.clone()));
        map.insert("id".to_string(), id);
        Value::Object(map)
    }
}

impl From<IndexEntry> for Value {
    fn from(entry: IndexEntry) -> Self {
        entry.to_value()
    }
}

/// One batch of upserts and deletions, applied as a unit.
///
/// Both halves stay raw until classification: one unknown kind in `updated`
/// rejects the batch before anything is applied, while a bad marker in
/// `deleted` is skipped without losing the rest of the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    #[serde(default)]
    pub updated: Vec<Value>,
    #[serde(default)]
    pub deleted: Vec<Value>,
}

impl UpdateBatch {
    pub fn upserts(updated: Vec<Value>) -> Self {
        Self {
            updated,
            deleted: Vec::new(),
        }
    }

    pub fn deletions(deleted: Vec<IndexEntry>) -> Self {
        Self {
            updated: Vec::new(),
            deleted: deleted.into_iter().map(Value::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_class_resolves_aliases() {
        assert_eq!(EntityKind::from_class("TextDataBlock"), Some(EntityKind::Document));
        assert_eq!(EntityKind::from_class("LocalAccount"), Some(EntityKind::Account));
        assert_eq!(EntityKind::from_class("CardTypeRef"), Some(EntityKind::CardType));
        assert_eq!(EntityKind::from_class("Sticker"), None);
    }

    #[test]
    fn test_every_kind_round_trips_through_its_name() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_class(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_routes() {
        assert_eq!(EntityKind::Card.route(), Route::Cache);
        assert_eq!(EntityKind::UserPresence.route(), Route::Presence);
        assert_eq!(EntityKind::Change.route(), Route::Changes);
        assert_eq!(EntityKind::HttpSession.route(), Route::Ignore);
        assert_eq!(EntityKind::CopyParam.route(), Route::Ignore);
    }

    #[test]
    fn test_card_keeps_unknown_fields() {
        let card: Card = serde_json::from_value(json!({
            "@class": "Card", "id": 5, "parentId": 10, "title": "Plan", "color": "#fff"
        }))
        .unwrap();
        assert_eq!(card.parent_id, Some(10));
        assert_eq!(card.card_type_id, None);
        assert_eq!(card.extra.get("title"), Some(&json!("Plan")));

        let value = Entity::Card(card).to_value();
        assert_eq!(value["@class"], json!("Card"));
        assert_eq!(value["parentId"], json!(10));
        assert_eq!(value["color"], json!("#fff"));
    }

    #[test]
    fn test_to_value_keeps_subclass_name() {
        let doc: Document = serde_json::from_value(json!({
            "@class": "TextDataBlock", "id": 3, "owningCardContentId": 8
        }))
        .unwrap();
        assert_eq!(Entity::Document(doc).to_value()["@class"], json!("TextDataBlock"));
    }

    #[test]
    fn test_links_skip_missing_parents() {
        let resource = Entity::Resource(Resource {
            id: 1,
            card_id: Some(2),
            card_content_id: None,
            abstract_card_type_id: Some(4),
            extra: Map::new(),
        });
        assert_eq!(
            resource.links(),
            vec![(IndexName::CardResources, 2), (IndexName::CardTypeResources, 4)]
        );
        assert!(Entity::Project(Project { id: 1, extra: Map::new() }).links().is_empty());
    }

    #[test]
    fn test_index_entry_keys() {
        let entry: IndexEntry = serde_json::from_value(json!({"type": "Card", "id": 5})).unwrap();
        assert_eq!(entry, IndexEntry::new(EntityKind::Card, 5));

        let presence: IndexEntry =
            serde_json::from_value(json!({"type": "UserPresence", "id": "ws-9"})).unwrap();
        assert_eq!(presence, IndexEntry::presence("ws-9"));
    }

    #[test]
    fn test_change_at_class_accepts_alias() {
        let change: Change = serde_json::from_value(json!({
            "atClass": "TextDataBlock", "atId": 7, "revision": "r1", "ops": []
        }))
        .unwrap();
        assert_eq!(change.at_class, EntityKind::Document);
        assert_eq!(change.id, None);
        assert_eq!(change.revision, Revision::new("r1"));
    }

    #[test]
    fn test_index_child_kinds() {
        assert_eq!(IndexName::ContentSubCards.child_kind(), EntityKind::Card);
        assert_eq!(IndexName::CardIncomingLinks.child_kind(), EntityKind::ActivityFlowLink);
    }
}
