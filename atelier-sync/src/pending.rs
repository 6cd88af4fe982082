//! Pending change queue for concurrent document editing.
//!
//! Local edits are applied optimistically and queued per target entity,
//! keyed by revision. Authoritative `Change` records announced by the server
//! land in the same queue and replace the optimistic entry carrying the same
//! revision. Consumers render the authoritative entity overlaid with the
//! queued changes in revision order (see [`PendingChangeQueue::fold`]).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Change, Entity, EntityId, EntityKind};

/// Ordering key of one edit within a per-entity queue.
///
/// Revisions compare naturally: runs of digits compare by numeric value, so
/// `r2 < r10`. Revisions that compare equal that way (`r01` and `r1`) fall
/// back to plain string order, keeping the ordering total and consistent
/// with equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(revision: impl Into<String>) -> Self {
        Self(revision.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut a);
                let right = take_digits(&mut b);
                let left = left.trim_start_matches('0');
                let right = right.trim_start_matches('0');
                let ord = left.len().cmp(&right.len()).then_with(|| left.cmp(right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a.next();
                b.next();
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// The entity a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeTarget {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl ChangeTarget {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ChangeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// One queued edit.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub target: ChangeTarget,
    pub revision: Revision,
    /// Server-side id, known once the change was persisted.
    pub change_id: Option<EntityId>,
    pub payload: Value,
}

impl PendingChange {
    pub fn local(target: ChangeTarget, revision: Revision, payload: Value) -> Self {
        Self {
            target,
            revision,
            change_id: None,
            payload,
        }
    }

    /// Queue entry for an authoritative change announced by the server.
    pub fn from_change(change: Change) -> Self {
        let target = ChangeTarget::new(change.at_class, change.at_id);
        let revision = change.revision.clone();
        let change_id = change.id;
        Self {
            target,
            revision,
            change_id,
            payload: Entity::Change(change).to_value(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    /// Same revision was already queued; its payload was replaced.
    Replaced,
}

/// Revision-ordered queues of pending changes, one per target.
#[derive(Debug, Default)]
pub struct PendingChangeQueue {
    queues: HashMap<ChangeTarget, BTreeMap<Revision, PendingChange>>,
}

impl PendingChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a change, or replace the payload of the one with the same revision.
    pub fn apply(&mut self, change: PendingChange) -> ApplyOutcome {
        let queue = self.queues.entry(change.target).or_default();
        match queue.insert(change.revision.clone(), change) {
            Some(_) => ApplyOutcome::Replaced,
            None => ApplyOutcome::Inserted,
        }
    }

    /// Remove a single entry, e.g. on a targeted acknowledgment.
    pub fn remove(&mut self, target: ChangeTarget, revision: &Revision) -> Option<PendingChange> {
        let queue = self.queues.get_mut(&target)?;
        let removed = queue.remove(revision);
        if queue.is_empty() {
            self.queues.remove(&target);
        }
        removed
    }

    /// Remove the entry carrying the given server-side change id.
    pub fn remove_by_change_id(&mut self, change_id: EntityId) -> Option<PendingChange> {
        let (target, revision) = self.queues.iter().find_map(|(target, queue)| {
            queue
                .values()
                .find(|c| c.change_id == Some(change_id))
                .map(|c| (*target, c.revision.clone()))
        })?;
        self.remove(target, &revision)
    }

    /// Drop the whole queue of a target. Returns how many entries it held.
    pub fn flush_all(&mut self, target: ChangeTarget) -> usize {
        self.queues.remove(&target).map(|q| q.len()).unwrap_or(0)
    }

    /// Queued changes of a target in revision order.
    pub fn changes(&self, target: ChangeTarget) -> Vec<&PendingChange> {
        self.queues
            .get(&target)
            .map(|q| q.values().collect())
            .unwrap_or_default()
    }

    /// Fold the queued changes of a target over `init` in revision order.
    pub fn fold<T, F>(&self, target: ChangeTarget, init: T, f: F) -> T
    where
        F: FnMut(T, &PendingChange) -> T,
    {
        match self.queues.get(&target) {
            Some(queue) => queue.values().fold(init, f),
            None => init,
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &ChangeTarget> {
        self.queues.keys()
    }

    /// Total number of queued changes across all targets.
    pub fn len(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
