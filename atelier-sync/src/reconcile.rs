//! Update reconciler.
//!
//! Applies one [`UpdateBatch`] to the [`Store`] as a unit:
//!
//! ```text
//! UpdateBatch
//!   │
//!   ├─ classify deleted  (unknown kinds: warn, skip)
//!   ├─ classify updated  (any fault: reject batch, nothing applied)
//!   │
//!   ├─ apply deletions ──► cache.remove / presence clear / change ack
//!   └─ apply upserts   ──► cache.upsert / presence touch / change apply
//! ```
//!
//! Deletions always go before upserts, so a delete and an upsert of the
//! same id in one batch leave the entity present.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::cache::{NormalizedCache, UpsertOutcome};
use crate::classify::{classify_deletions, classify_entities, ClassifyError};
use crate::entity::{Entity, EntityId, EntityKind, IndexKey, Route, UpdateBatch};
use crate::pending::{ChangeTarget, PendingChange, PendingChangeQueue};
use crate::presence::PresenceOverlay;

/// Everything reconciliation mutates.
#[derive(Debug, Default)]
pub struct Store {
    pub cache: NormalizedCache,
    pub presence: PresenceOverlay,
    pub changes: PendingChangeQueue,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("update batch rejected: {0}")]
    Classify(#[from] ClassifyError),
}

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub presence_touched: usize,
    pub presence_cleared: usize,
    pub changes_applied: usize,
    pub changes_removed: usize,
    /// Recognized kinds that were dropped on purpose.
    pub ignored: usize,
    /// Deletion markers of unknown kinds.
    pub unrecognized: usize,
    /// Items classified into some bucket. Always equals the batch length.
    pub classified: usize,
    /// Cached kinds that changed.
    pub kinds: BTreeSet<EntityKind>,
    /// Projects whose presence list changed.
    pub presence_projects: BTreeSet<EntityId>,
    /// Targets whose pending-change queue changed.
    pub change_targets: BTreeSet<ChangeTarget>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.kinds.is_empty() && self.presence_projects.is_empty() && self.change_targets.is_empty()
    }
}

pub fn reconcile(store: &mut Store, batch: UpdateBatch) -> Result<ReconcileReport, ReconcileError> {
    let deletions = classify_deletions(batch.deleted);
    let upserts = classify_entities(batch.updated)?;

    let mut report = ReconcileReport {
        ignored: deletions.ignored + upserts.ignored,
        unrecognized: deletions.unrecognized.len(),
        classified: deletions.total() + upserts.total(),
        ..Default::default()
    };

    for (kind, keys) in deletions.by_kind {
        for key in keys {
            apply_deletion(store, kind, key, &mut report);
        }
    }

    for entity in upserts.by_kind.into_values().flatten() {
        apply_upsert(store, entity, &mut report);
    }

    debug!(
        "Reconciled batch: {} inserted, {} replaced, {} unchanged, {} removed, {} presence, {} changes",
        report.inserted,
        report.replaced,
        report.unchanged,
        report.removed,
        report.presence_touched + report.presence_cleared,
        report.changes_applied + report.changes_removed,
    );
    Ok(report)
}

fn apply_deletion(store: &mut Store, kind: EntityKind, key: IndexKey, report: &mut ReconcileReport) {
    match (kind.route(), key) {
        (Route::Cache, IndexKey::Id(id)) => {
            if store.cache.remove(kind, id).is_some() {
                report.removed += 1;
                report.kinds.insert(kind);
            }
            if kind == EntityKind::Project && store.presence.clear_project(id) > 0 {
                report.presence_cleared += 1;
                report.presence_projects.insert(id);
            }
        }
        (Route::Presence, IndexKey::Session(ws_session_id)) => {
            for project in store.presence.clear_session_everywhere(&ws_session_id) {
                report.presence_cleared += 1;
                report.presence_projects.insert(project);
            }
        }
        (Route::Changes, IndexKey::Id(change_id)) => {
            if let Some(change) = store.changes.remove_by_change_id(change_id) {
                report.changes_removed += 1;
                report.change_targets.insert(change.target);
            }
        }
        (Route::Ignore, _) => report.ignored += 1,
        (_, key) => warn!("Deletion of {kind} carries an unusable key {key:?}, skipping"),
    }
}

fn apply_upsert(store: &mut Store, entity: Entity, report: &mut ReconcileReport) {
    match entity {
        Entity::UserPresence(presence) => {
            report.presence_touched += 1;
            report.presence_projects.insert(presence.project_id);
            store.presence.touch(presence);
        }
        Entity::Change(change) => {
            let pending = PendingChange::from_change(change);
            report.changes_applied += 1;
            report.change_targets.insert(pending.target);
            store.changes.apply(pending);
        }
        other => {
            let kind = other.kind();
            match store.cache.upsert(other) {
                UpsertOutcome::Inserted => {
                    report.inserted += 1;
                    report.kinds.insert(kind);
                }
                UpsertOutcome::Replaced => {
                    report.replaced += 1;
                    report.kinds.insert(kind);
                }
                UpsertOutcome::Unchanged => report.unchanged += 1,
                UpsertOutcome::Rejected => warn!("{kind} payload is not cacheable, skipping"),
            }
        }
    }
}
