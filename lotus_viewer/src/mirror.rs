//! Viewer-local mirror of a tab's history plus replay lineage
//!
//! Page records arrive over the session channel; modified records are local
//! replays. Deleting or replaying never reaches the capture process.

use lotus_common::CapturedRequest;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Where a mirrored record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Captured page traffic
    Page,
    /// Local replay
    Modified,
}

/// A record as the inspector sees it
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerRequest {
    pub id: String,
    pub source: Source,
    pub parent_id: Option<String>,
    /// The parent was deleted while this replay was kept
    pub orphaned: bool,
    pub record: CapturedRequest,
}

impl ViewerRequest {
    /// Wrap captured traffic. Records without a request id fall back to
    /// their position in the batch they arrived in.
    pub fn from_page(record: CapturedRequest, position: usize) -> Self {
        let id = if record.request_id.is_empty() {
            format!("req-{}", position)
        } else {
            record.request_id.clone()
        };
        Self {
            id,
            source: Source::Page,
            parent_id: None,
            orphaned: false,
            record,
        }
    }

    /// A fresh replay of `parent_id`
    pub fn replay_of(parent_id: &str, mut record: CapturedRequest) -> Self {
        let id = format!("modified-{}", Uuid::new_v4());
        record.request_id = id.clone();
        Self {
            id,
            source: Source::Modified,
            parent_id: Some(parent_id.to_string()),
            orphaned: false,
            record,
        }
    }

    /// Page records reported without an id only have a positional fallback,
    /// which a later INIT may hand to a different request.
    pub fn has_stable_id(&self) -> bool {
        !self.record.request_id.is_empty()
    }
}

/// Lineage of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Root { children: Vec<String> },
    Replay { parent: String, orphaned: bool },
    Unrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteChoice {
    /// Remove the record and every replay of it
    Cascade,
    /// Remove only the record; replays become orphaned
    KeepChildren,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    NotFound,
    ChoiceRequired { children: usize },
    Deleted { removed: Vec<String> },
}

#[derive(Debug, Default)]
pub struct Mirror {
    requests: Vec<ViewerRequest>,
    /// parent id -> replay ids, maintained on insert and delete
    children: HashMap<String, Vec<String>>,
    /// Position handed to the next page record; never reused within one snapshot
    next_position: usize,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Replace every page record with a fresh snapshot. Local replays stay
    /// and their orphan flags are recomputed against the new set.
    pub fn apply_init(&mut self, records: Vec<CapturedRequest>) {
        self.requests.retain(|r| r.source == Source::Modified);
        self.next_position = records.len();
        self.requests.extend(
            records
                .into_iter()
                .enumerate()
                .map(|(position, record)| ViewerRequest::from_page(record, position)),
        );

        let present: HashSet<String> = self.requests.iter().map(|r| r.id.clone()).collect();
        for request in &mut self.requests {
            if let Some(parent) = &request.parent_id {
                request.orphaned = !present.contains(parent);
            }
        }
    }

    /// Add a newly captured record. A record already mirrored (seen in the
    /// snapshot as well) is replaced in place.
    pub fn apply_new(&mut self, record: CapturedRequest) {
        let request = ViewerRequest::from_page(record, self.next_position);
        self.next_position += 1;
        match self
            .requests
            .iter_mut()
            .find(|r| r.source == Source::Page && r.id == request.id)
        {
            Some(existing) => *existing = request,
            None => self.requests.push(request),
        }
    }

    /// Replace a captured record by request id. Returns false for ids not in
    /// the mirror.
    pub fn apply_update(&mut self, record: CapturedRequest) -> bool {
        let Some(existing) = self
            .requests
            .iter_mut()
            .find(|r| r.source == Source::Page && r.id == record.request_id)
        else {
            return false;
        };
        existing.record = record;
        true
    }

    pub fn clear_local(&mut self) {
        self.requests.clear();
        self.children.clear();
        self.next_position = 0;
    }

    pub fn get(&self, id: &str) -> Option<&ViewerRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    /// Records whose url or method contains `filter` (case-insensitive),
    /// newest first
    pub fn list(&self, filter: &str) -> Vec<&ViewerRequest> {
        let needle = filter.trim().to_lowercase();
        let mut matches: Vec<&ViewerRequest> = self
            .requests
            .iter()
            .filter(|r| {
                needle.is_empty()
                    || r.record.url.to_lowercase().contains(&needle)
                    || r.record.method.to_lowercase().contains(&needle)
            })
            .collect();
        matches.sort_by(|a, b| b.record.timestamp.cmp(&a.record.timestamp));
        matches
    }

    /// Insert a replay at the head of the mirror and link it to its parent.
    /// A replay whose parent was deleted while it ran arrives orphaned.
    pub fn insert_replay(&mut self, mut request: ViewerRequest) {
        if let Some(parent) = &request.parent_id {
            request.orphaned = self.get(parent).is_none();
            self.children
                .entry(parent.clone())
                .or_default()
                .push(request.id.clone());
        }
        self.requests.insert(0, request);
    }

    pub fn delete(&mut self, id: &str, choice: Option<DeleteChoice>) -> DeleteOutcome {
        let Some(request) = self.get(id) else {
            return DeleteOutcome::NotFound;
        };

        if request.source == Source::Modified {
            self.remove_record(id);
            return DeleteOutcome::Deleted {
                removed: vec![id.to_string()],
            };
        }

        let children = self.children_of(id);
        if children.is_empty() {
            self.remove_record(id);
            self.children.remove(id);
            return DeleteOutcome::Deleted {
                removed: vec![id.to_string()],
            };
        }

        match choice {
            None => DeleteOutcome::ChoiceRequired {
                children: children.len(),
            },
            Some(DeleteChoice::Cascade) => {
                for child in &children {
                    self.remove_record(child);
                }
                self.remove_record(id);
                self.children.remove(id);

                let mut removed = vec![id.to_string()];
                removed.extend(children);
                DeleteOutcome::Deleted { removed }
            }
            Some(DeleteChoice::KeepChildren) => {
                self.remove_record(id);
                DeleteOutcome::Deleted {
                    removed: vec![id.to_string()],
                }
            }
        }
    }

    pub fn relation(&self, id: &str) -> Option<Relation> {
        let request = self.get(id)?;
        let relation = match (request.source, &request.parent_id) {
            (Source::Modified, Some(parent)) => Relation::Replay {
                parent: parent.clone(),
                orphaned: request.orphaned,
            },
            (Source::Modified, None) => Relation::Unrelated,
            (Source::Page, _) => {
                let children = self.children_of(id);
                if children.is_empty() {
                    Relation::Unrelated
                } else {
                    Relation::Root { children }
                }
            }
        };
        Some(relation)
    }

    /// Replays of `id` still present in the mirror
    fn children_of(&self, id: &str) -> Vec<String> {
        self.children
            .get(id)
            .map(|ids| {
                ids.iter()
                    .filter(|child| self.get(child).is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove one record, unlink it from its parent, and orphan its own
    /// replays
    fn remove_record(&mut self, id: &str) -> Option<ViewerRequest> {
        let position = self.requests.iter().position(|r| r.id == id)?;
        let removed = self.requests.remove(position);

        if let Some(parent) = &removed.parent_id {
            if let Some(siblings) = self.children.get_mut(parent) {
                siblings.retain(|child| child != id);
                if siblings.is_empty() {
                    self.children.remove(parent);
                }
            }
        }

        if let Some(replays) = self.children.get(id) {
            for request in &mut self.requests {
                if replays.contains(&request.id) {
                    request.orphaned = true;
                }
            }
        }

        Some(removed)
    }
}
