//! Presence overlay: who is looking at what, per project.
//!
//! Entries are ephemeral and keyed by WebSocket session within a project.
//!
//! ```text
//! UpdateMessage { updated: [UserPresence …] }  ──► touch()
//! UpdateMessage { deleted: [UserPresence(ws)] } ──► clear_session_everywhere()
//! UpdateMessage { deleted: [Project(id)] }      ──► clear_project()
//!                                                        │
//!                                                        ▼
//!                                   list(project, own session excluded)
//! ```

use std::collections::HashMap;

use crate::entity::{EntityId, UserPresence};

// ───────────────────────────────────────────────────────────────────
// Overlay
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PresenceOverlay {
    /// Presence per project, indexed by ws session id.
    projects: HashMap<EntityId, HashMap<String, UserPresence>>,
}

impl PresenceOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or wholesale replace the entry of `presence.ws_session_id`
    /// within its project.
    pub fn touch(&mut self, presence: UserPresence) {
        self.projects
            .entry(presence.project_id)
            .or_default()
            .insert(presence.ws_session_id.clone(), presence);
    }

    /// Remove one session's entry from one project.
    pub fn clear_session(&mut self, project_id: EntityId, ws_session_id: &str) -> bool {
        let Some(room) = self.projects.get_mut(&project_id) else {
            return false;
        };
        let removed = room.remove(ws_session_id).is_some();
        if room.is_empty() {
            self.projects.remove(&project_id);
        }
        removed
    }

    /// Remove a session from every project it is present in. Deletion markers
    /// only name the session, so the projects are found by scanning.
    /// Returns the affected project ids.
    pub fn clear_session_everywhere(&mut self, ws_session_id: &str) -> Vec<EntityId> {
        let mut affected: Vec<EntityId> = self
            .projects
            .iter()
            .filter(|(_, room)| room.contains_key(ws_session_id))
            .map(|(project, _)| *project)
            .collect();
        affected.sort_unstable();
        for project in &affected {
            self.clear_session(*project, ws_session_id);
        }
        affected
    }

    /// Drop the whole presence list of a project.
    pub fn clear_project(&mut self, project_id: EntityId) -> usize {
        self.projects.remove(&project_id).map(|room| room.len()).unwrap_or(0)
    }

    /// Presence of a project ordered by session id, excluding `own_session`.
    pub fn list(&self, project_id: EntityId, own_session: Option<&str>) -> Vec<UserPresence> {
        let Some(room) = self.projects.get(&project_id) else {
            return Vec::new();
        };
        let mut entries: Vec<UserPresence> = room
            .values()
            .filter(|p| Some(p.ws_session_id.as_str()) != own_session)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.ws_session_id.cmp(&b.ws_session_id));
        entries
    }

    /// Sessions of a project currently viewing a document.
    pub fn viewers_of_document(&self, project_id: EntityId, document_id: EntityId) -> Vec<UserPresence> {
        let mut viewers: Vec<UserPresence> = self
            .projects
            .get(&project_id)
            .into_iter()
            .flat_map(|room| room.values())
            .filter(|p| p.document_id == Some(document_id))
            .cloned()
            .collect();
        viewers.sort_by(|a, b| a.ws_session_id.cmp(&b.ws_session_id));
        viewers
    }

    pub fn session_count(&self, project_id: EntityId) -> usize {
        self.projects.get(&project_id).map(|room| room.len()).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.projects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn presence(ws: &str, project: EntityId, document: Option<EntityId>) -> UserPresence {
        UserPresence {
            ws_session_id: ws.to_string(),
            project_id: project,
            user_id: Some(1),
            document_id: document,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_touch_replaces_wholesale() {
        let mut overlay = PresenceOverlay::new();
        overlay.touch(presence("a", 1, Some(7)));
        overlay.touch(presence("a", 1, None));

        let list = overlay.list(1, None);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].document_id, None);
    }

    #[test]
    fn test_list_excludes_own_session() {
        let mut overlay = PresenceOverlay::new();
        overlay.touch(presence("mine", 1, None));
        overlay.touch(presence("theirs", 1, None));

        let list = overlay.list(1, Some("mine"));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].ws_session_id, "theirs");
        assert_eq!(overlay.list(1, None).len(), 2);
    }

    #[test]
    fn test_clear_session() {
        let mut overlay = PresenceOverlay::new();
        overlay.touch(presence("a", 1, None));
        assert!(overlay.clear_session(1, "a"));
        assert!(!overlay.clear_session(1, "a"));
        assert_eq!(overlay.session_count(1), 0);
    }

    #[test]
    fn test_clear_session_everywhere() {
        let mut overlay = PresenceOverlay::new();
        overlay.touch(presence("a", 2, None));
        overlay.touch(presence("a", 1, None));
        overlay.touch(presence("b", 1, None));

        assert_eq!(overlay.clear_session_everywhere("a"), vec![1, 2]);
        assert_eq!(overlay.session_count(1), 1);
        assert_eq!(overlay.session_count(2), 0);
    }

    #[test]
    fn test_clear_project() {
        let mut overlay = PresenceOverlay::new();
        overlay.touch(presence("a", 1, None));
        overlay.touch(presence("b", 1, None));
        overlay.touch(presence("c", 2, None));

        assert_eq!(overlay.clear_project(1), 2);
        assert!(overlay.list(1, None).is_empty());
        assert_eq!(overlay.session_count(2), 1);
    }

    #[test]
    fn test_viewers_of_document() {
        let mut overlay = PresenceOverlay::new();
        overlay.touch(presence("a", 1, Some(7)));
        overlay.touch(presence("b", 1, Some(8)));
        overlay.touch(presence("c", 1, Some(7)));

        let viewers: Vec<_> = overlay
            .viewers_of_document(1, 7)
            .into_iter()
            .map(|p| p.ws_session_id)
            .collect();
        assert_eq!(viewers, vec!["a", "c"]);
    }
}
