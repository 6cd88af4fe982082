//! Index entry and entity classification.
//!
//! Every item of an update batch lands in exactly one bucket: a kind bucket,
//! the ignored bucket, or (deletions only) the unrecognized bucket. The two
//! halves have different severities. An unknown kind or an unreadable marker
//! in `deleted` is logged and skipped, since the worst outcome is a stale
//! cache entry. An unknown
//! or malformed item in `updated` is an error and the caller must reject the
//! whole batch.

use std::collections::BTreeMap;

use log::warn;
use serde::Deserialize;
use serde_json::Value;

use crate::entity::{Entity, EntityKind, IndexEntry, IndexKey, Route, CLASS_FIELD};

/// Classification failures for upserted payloads.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("unknown entity kind `{class}` in updated payload")]
    UnknownKind { class: String },
    #[error("updated payload carries no `@class` discriminant")]
    MissingDiscriminant,
    #[error("malformed `{class}` payload: {source}")]
    Malformed {
        class: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Deletion markers bucketed by kind.
#[derive(Debug, Default)]
pub struct ClassifiedDeletions {
    pub by_kind: BTreeMap<EntityKind, Vec<IndexKey>>,
    /// Recognized kinds that are deliberately not acted upon.
    pub ignored: usize,
    /// Markers of kinds outside the known set, or without a readable
    /// `type`/`id`. Logged, then skipped.
    pub unrecognized: Vec<Value>,
}

impl ClassifiedDeletions {
    pub fn total(&self) -> usize {
        self.by_kind.values().map(|v| v.len()).sum::<usize>() + self.ignored + self.unrecognized.len()
    }
}

/// Upserted payloads bucketed by kind, in arrival order within a kind.
#[derive(Debug, Default)]
pub struct ClassifiedEntities {
    pub by_kind: BTreeMap<EntityKind, Vec<Entity>>,
    pub ignored: usize,
}

impl ClassifiedEntities {
    pub fn total(&self) -> usize {
        self.by_kind.values().map(|v| v.len()).sum::<usize>() + self.ignored
    }
}

pub fn classify_deletions(entries: Vec<Value>) -> ClassifiedDeletions {
    let mut out = ClassifiedDeletions::default();
    for value in entries {
        let entry = match IndexEntry::deserialize(&value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Unreadable deletion marker {value}, skipping: {e}");
                out.unrecognized.push(value);
                continue;
            }
        };
        match EntityKind::from_class(&entry.class) {
            Some(kind) if kind.route() == Route::Ignore => out.ignored += 1,
            Some(kind) => out.by_kind.entry(kind).or_default().push(entry.id),
            None => {
                warn!("Unrecognized entity kind `{}` in deleted entries, skipping", entry.class);
                out.unrecognized.push(value);
            }
        }
    }
    out
}

/// Discriminant of a raw payload, if it carries one.
pub fn class_of(value: &Value) -> Option<&str> {
    value.get(CLASS_FIELD).and_then(Value::as_str)
}

/// Resolve the kind of a raw payload without decoding it.
pub fn kind_of(value: &Value) -> Result<EntityKind, ClassifyError> {
    let class = class_of(value).ok_or(ClassifyError::MissingDiscriminant)?;
    EntityKind::from_class(class).ok_or_else(|| ClassifyError::UnknownKind {
        class: class.to_string(),
    })
}

/// Decode one payload into its typed entity.
pub fn classify_entity(value: Value) -> Result<Entity, ClassifyError> {
    let kind = kind_of(&value)?;
    decode(kind, value)
}

/// Classify every upserted payload, failing on the first fault.
///
/// Ignored kinds are recognized and counted, but not decoded.
pub fn classify_entities(values: Vec<Value>) -> Result<ClassifiedEntities, ClassifyError> {
    let mut out = ClassifiedEntities::default();
    for value in values {
        let kind = kind_of(&value)?;
        if kind.route() == Route::Ignore {
            out.ignored += 1;
            continue;
        }
        let entity = decode(kind, value)?;
        out.by_kind.entry(kind).or_default().push(entity);
    }
    Ok(out)
}

fn decode(kind: EntityKind, value: Value) -> Result<Entity, ClassifyError> {
    let class = class_of(&value).unwrap_or(kind.as_str()).to_string();
    let malformed = |source| ClassifyError::Malformed {
        class: class.clone(),
        source,
    };
    let entity = match kind {
        EntityKind::Card => Entity::Card(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::CardContent => Entity::CardContent(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::CardType => Entity::CardType(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::Document => Entity::Document(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::Resource => Entity::Resource(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::User => Entity::User(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::Account => Entity::Account(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::Project => Entity::Project(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::TeamMember => Entity::TeamMember(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::TeamRole => Entity::TeamRole(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::Assignment => Entity::Assignment(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::InstanceMaker => Entity::InstanceMaker(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::UserPresence => Entity::UserPresence(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::ActivityFlowLink => {
            Entity::ActivityFlowLink(serde_json::from_value(value).map_err(malformed)?)
        }
        EntityKind::HttpSession => Entity::HttpSession(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::Change => Entity::Change(serde_json::from_value(value).map_err(malformed)?),
        EntityKind::CopyParam => Entity::CopyParam(serde_json::from_value(value).map_err(malformed)?),
    };
    Ok(entity)
}
