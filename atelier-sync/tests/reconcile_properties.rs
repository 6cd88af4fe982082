//! Convergence properties of reconciliation, channels and change queues,
//! checked through the public API.

use atelier_sync::channels::{ChannelOccupancy, ChannelRegistry, Retention};
use atelier_sync::classify::{classify_deletions, classify_entities};
use atelier_sync::entity::{EntityId, EntityKind, IndexEntry, IndexName, UpdateBatch};
use atelier_sync::pending::{ChangeTarget, PendingChange, PendingChangeQueue, Revision};
use atelier_sync::protocol::{Channel, SessionId};
use atelier_sync::reconcile::{reconcile, Store};
use serde_json::{json, Value};

fn card(id: EntityId, parent: EntityId) -> Value {
    json!({"@class": "Card", "id": id, "parentId": parent, "title": format!("card {id}")})
}

/// A batch touching every routing bucket, including ignored and unknown kinds.
fn mixed_batch() -> UpdateBatch {
    UpdateBatch {
        updated: vec![
            card(1, 10),
            card(2, 10),
            json!({"@class": "TextDataBlock", "id": 3, "owningCardContentId": 10}),
            json!({"@class": "ResourceRef", "id": 4, "cardId": 1}),
            json!({"@class": "TeamMember", "id": 5, "projectId": 9, "userId": 7}),
            json!({"@class": "UserPresence", "wsSessionId": "ws-a", "projectId": 9}),
            json!({"@class": "Change", "atClass": "Document", "atId": 3, "revision": "r1"}),
            json!({"@class": "HttpSession", "id": 11}),
            json!({"@class": "CopyParam", "id": 12}),
        ],
        deleted: vec![
            IndexEntry::new(EntityKind::Card, 99).into(),
            IndexEntry::presence("ws-gone").into(),
            IndexEntry::new(EntityKind::CopyParam, 1).into(),
            json!({"type": "Sticker", "id": 1}),
            json!({"type": "Card", "id": null}),
        ],
    }
}

#[test]
fn every_item_lands_in_exactly_one_bucket() {
    let batch = mixed_batch();
    let expected = batch.len();

    let deletions = classify_deletions(batch.deleted.clone());
    let upserts = classify_entities(batch.updated.clone()).unwrap();
    assert_eq!(deletions.total() + upserts.total(), expected);

    let report = reconcile(&mut Store::new(), batch).unwrap();
    assert_eq!(report.classified, expected);
}

#[test]
fn applying_an_upsert_twice_equals_applying_it_once() {
    let mut once = Store::new();
    reconcile(&mut once, mixed_batch()).unwrap();

    let mut twice = Store::new();
    reconcile(&mut twice, mixed_batch()).unwrap();
    let second = reconcile(&mut twice, mixed_batch()).unwrap();

    assert_eq!(second.inserted, 0);
    assert!(second.kinds.is_empty());
    for kind in EntityKind::ALL {
        assert_eq!(once.cache.all(kind), twice.cache.all(kind), "{kind}");
    }
    assert_eq!(
        once.cache.children(IndexName::ContentSubCards, 10),
        twice.cache.children(IndexName::ContentSubCards, 10)
    );
    assert_eq!(once.presence.list(9, None), twice.presence.list(9, None));
    assert_eq!(once.changes.len(), twice.changes.len());
    assert!(twice.cache.verify_indices().is_empty());
}

#[test]
fn delete_and_upsert_of_same_id_in_one_batch_leaves_it_present() {
    for already_cached in [false, true] {
        let mut store = Store::new();
        if already_cached {
            reconcile(&mut store, UpdateBatch::upserts(vec![card(5, 10)])).unwrap();
        }
        // Listed upsert-first on purpose: deletions still apply first.
        let batch = UpdateBatch {
            updated: vec![card(5, 10)],
            deleted: vec![IndexEntry::new(EntityKind::Card, 5).into()],
        };
        reconcile(&mut store, batch).unwrap();

        assert!(store.cache.get(EntityKind::Card, 5).is_some());
        assert_eq!(store.cache.children(IndexName::ContentSubCards, 10), &[5]);
    }
}

#[test]
fn secondary_index_follows_primary_map() {
    let mut store = Store::new();
    reconcile(&mut store, UpdateBatch::upserts(vec![card(5, 10), card(6, 10)])).unwrap();
    assert_eq!(store.cache.children(IndexName::ContentSubCards, 10), &[5, 6]);

    reconcile(
        &mut store,
        UpdateBatch::deletions(vec![IndexEntry::new(EntityKind::Card, 5)]),
    )
    .unwrap();
    assert_eq!(store.cache.children(IndexName::ContentSubCards, 10), &[6]);

    reconcile(&mut store, UpdateBatch::upserts(vec![card(5, 10)])).unwrap();
    reconcile(&mut store, UpdateBatch::upserts(vec![card(5, 10)])).unwrap();
    assert_eq!(store.cache.children(IndexName::ContentSubCards, 10), &[6, 5]);
    assert!(store.cache.verify_indices().is_empty());
}

#[test]
fn rejected_batch_leaves_store_untouched() {
    let mut store = Store::new();
    reconcile(&mut store, UpdateBatch::upserts(vec![card(1, 10)])).unwrap();

    let mut batch = mixed_batch();
    batch.updated.push(json!({"@class": "Sticker", "id": 1}));
    batch.deleted.push(IndexEntry::new(EntityKind::Card, 1).into());
    assert!(reconcile(&mut store, batch).is_err());

    assert!(store.cache.get(EntityKind::Card, 1).is_some());
    assert!(store.cache.get(EntityKind::Card, 2).is_none());
    assert!(store.presence.list(9, None).is_empty());
    assert!(store.changes.is_empty());
}

#[test]
fn occupancy_entry_disappears_at_zero() {
    let mut occupancy = ChannelOccupancy::new();
    for diff in [1, 1, -2] {
        occupancy.apply("urn:atelier:project:4", diff);
    }
    assert!(!occupancy.snapshot().contains_key("urn:atelier:project:4"));
}

#[test]
fn same_revision_replaces_in_place() {
    let mut queue = PendingChangeQueue::new();
    let target = ChangeTarget::new(EntityKind::Document, 7);
    queue.apply(PendingChange::local(target, Revision::new("r1"), json!("A")));
    queue.apply(PendingChange::local(target, Revision::new("r1"), json!("B")));

    let changes = queue.changes(target);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].payload, json!("B"));
}

#[test]
fn reconnect_reissues_sticky_channels_only() {
    let mut registry = ChannelRegistry::new();
    registry.session_issued(SessionId::new("s1"));
    registry.subscribe(Channel::Broadcast, Retention::Sticky);
    registry.subscribe(Channel::User(2), Retention::Sticky);
    registry.subscribe(Channel::ProjectContent(5), Retention::Transient);
    registry.subscribe(Channel::Block(6), Retention::Transient);

    registry.session_lost();
    assert!(registry.session().is_none());

    let reissued: Vec<Channel> = registry
        .session_issued(SessionId::new("s2"))
        .iter()
        .map(|c| c.channel())
        .collect();
    assert_eq!(reissued, vec![Channel::Broadcast, Channel::User(2)]);
}

#[test]
fn presence_list_never_contains_own_session() {
    let mut store = Store::new();
    let presences: Vec<Value> = ["ws-a", "ws-b", "ws-c"]
        .iter()
        .map(|ws| json!({"@class": "UserPresence", "wsSessionId": ws, "projectId": 1}))
        .collect();
    reconcile(&mut store, UpdateBatch::upserts(presences)).unwrap();

    for own in ["ws-a", "ws-b", "ws-c"] {
        let list = store.presence.list(1, Some(own));
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|p| p.ws_session_id != own));
    }
}
