//! Normalized entity cache.
//!
//! One id-keyed map per kind plus the derived parent → children indices
//! listed in [`IndexName`]. Snapshots are immutable and shared as
//! `Arc<Entity>`; a new payload for an id replaces the previous one whole.
//!
//! Invariant: an index never lists a child id that is absent from the
//! primary map of its kind. Parent-keyed lists may outlive the parent
//! itself, the children are still cached and still point at it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{Entity, EntityId, EntityKind, IndexName, Route};

/// Fetch state of one entity or one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Identical snapshot already cached.
    Unchanged,
    /// Kind is not cached here, or the payload carries no id.
    Rejected,
}

/// A child id listed in an index but missing from its primary map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DanglingLink {
    pub index: IndexName,
    pub parent: EntityId,
    pub child: EntityId,
}

#[derive(Debug, Default)]
pub struct NormalizedCache {
    entities: HashMap<EntityKind, HashMap<EntityId, Arc<Entity>>>,
    indices: HashMap<IndexName, HashMap<EntityId, Vec<EntityId>>>,
    entity_states: HashMap<(EntityKind, EntityId), LoadState>,
    collection_states: HashMap<(IndexName, EntityId), LoadState>,
}

impl NormalizedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached snapshot for the entity's id and relink it.
    ///
    /// Links held by the previous snapshot and absent from the new one are
    /// removed, so a moved entity leaves its old parent's list.
    pub fn upsert(&mut self, entity: Entity) -> UpsertOutcome {
        let kind = entity.kind();
        let id = match entity.id() {
            Some(id) if kind.route() == Route::Cache => id,
            _ => return UpsertOutcome::Rejected,
        };

        let previous = self.entities.get(&kind).and_then(|m| m.get(&id)).cloned();
        if previous.as_deref() == Some(&entity) {
            return UpsertOutcome::Unchanged;
        }

        let new_links = entity.links();
        if let Some(old) = &previous {
            for (index, parent) in old.links() {
                if !new_links.contains(&(index, parent)) {
                    self.unlink(index, parent, id);
                }
            }
        }
        for (index, parent) in new_links {
            self.link(index, parent, id);
        }

        self.entities
            .entry(kind)
            .or_default()
            .insert(id, Arc::new(entity));
        self.entity_states.insert((kind, id), LoadState::Ready);

        if previous.is_some() {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        }
    }

    /// Remove a cached entity and every index link it registered.
    /// Removing an absent id is a no-op.
    pub fn remove(&mut self, kind: EntityKind, id: EntityId) -> Option<Arc<Entity>> {
        let removed = self.entities.get_mut(&kind)?.remove(&id)?;
        for (index, parent) in removed.links() {
            self.unlink(index, parent, id);
        }
        self.entity_states.remove(&(kind, id));
        Some(removed)
    }

    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<Arc<Entity>> {
        self.entities.get(&kind)?.get(&id).cloned()
    }

    pub fn contains(&self, kind: EntityKind, id: EntityId) -> bool {
        self.entities.get(&kind).is_some_and(|m| m.contains_key(&id))
    }

    /// Child ids listed under a parent, in link order.
    pub fn children(&self, index: IndexName, parent: EntityId) -> &[EntityId] {
        self.indices
            .get(&index)
            .and_then(|m| m.get(&parent))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn children_entities(&self, index: IndexName, parent: EntityId) -> Vec<Arc<Entity>> {
        let kind = index.child_kind();
        self.children(index, parent)
            .iter()
            .filter_map(|id| self.get(kind, *id))
            .collect()
    }

    /// All cached entities of a kind, ordered by id.
    pub fn all(&self, kind: EntityKind) -> Vec<Arc<Entity>> {
        let mut entries: Vec<_> = self
            .entities
            .get(&kind)
            .map(|m| m.iter().map(|(id, e)| (*id, Arc::clone(e))).collect())
            .unwrap_or_default();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, e)| e).collect()
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.entities.get(&kind).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(|m| m.is_empty())
    }

    pub fn entity_state(&self, kind: EntityKind, id: EntityId) -> LoadState {
        if self.contains(kind, id) {
            return LoadState::Ready;
        }
        self.entity_states
            .get(&(kind, id))
            .copied()
            .unwrap_or(LoadState::NotLoaded)
    }

    /// Mark an entity as being fetched. Returns `false` when it is already
    /// cached or a fetch is in flight, in which case the caller must not fetch.
    pub fn begin_entity_load(&mut self, kind: EntityKind, id: EntityId) -> bool {
        match self.entity_state(kind, id) {
            LoadState::Ready | LoadState::Loading => false,
            LoadState::NotLoaded | LoadState::Error => {
                self.entity_states.insert((kind, id), LoadState::Loading);
                true
            }
        }
    }

    pub fn finish_entity_load(&mut self, kind: EntityKind, id: EntityId, ok: bool) {
        let state = if ok && self.contains(kind, id) {
            LoadState::Ready
        } else if ok {
            // Fetched but the payload did not land (e.g. deleted meanwhile).
            LoadState::NotLoaded
        } else {
            LoadState::Error
        };
        self.entity_states.insert((kind, id), state);
    }

    pub fn collection_state(&self, index: IndexName, parent: EntityId) -> LoadState {
        self.collection_states
            .get(&(index, parent))
            .copied()
            .unwrap_or(LoadState::NotLoaded)
    }

    pub fn begin_collection_load(&mut self, index: IndexName, parent: EntityId) -> bool {
        match self.collection_state(index, parent) {
            LoadState::Ready | LoadState::Loading => false,
            LoadState::NotLoaded | LoadState::Error => {
                self.collection_states.insert((index, parent), LoadState::Loading);
                true
            }
        }
    }

    pub fn finish_collection_load(&mut self, index: IndexName, parent: EntityId, ok: bool) {
        let state = if ok { LoadState::Ready } else { LoadState::Error };
        self.collection_states.insert((index, parent), state);
    }

    /// Every index entry whose child is missing from the primary map.
    /// Empty while the cache is consistent.
    pub fn verify_indices(&self) -> Vec<DanglingLink> {
        let mut dangling = Vec::new();
        for (index, lists) in &self.indices {
            let kind = index.child_kind();
            for (parent, children) in lists {
                for child in children {
                    if !self.contains(kind, *child) {
                        dangling.push(DanglingLink {
                            index: *index,
                            parent: *parent,
                            child: *child,
                        });
                    }
                }
            }
        }
        dangling
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.indices.clear();
        self.entity_states.clear();
        self.collection_states.clear();
    }

    fn link(&mut self, index: IndexName, parent: EntityId, child: EntityId) {
        let list = self.indices.entry(index).or_default().entry(parent).or_default();
        if !list.contains(&child) {
            list.push(child);
        }
    }

    fn unlink(&mut self, index: IndexName, parent: EntityId, child: EntityId) {
        if let Some(lists) = self.indices.get_mut(&index) {
            if let Some(list) = lists.get_mut(&parent) {
                list.retain(|id| *id != child);
                if list.is_empty() {
                    lists.remove(&parent);
                }
            }
            if lists.is_empty() {
                self.indices.remove(&index);
            }
        }
    }
}
