//! Per-tab request history with persistence and broadcast

use crate::persistence::{SnapshotFile, TabSnapshot};
use lotus_common::{CapturedRequest, SessionMessage, TabId};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{broadcast, RwLock};

/// Store mutations broadcast to session subscribers
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Appended {
        tab_id: TabId,
        request: CapturedRequest,
    },
    Updated {
        tab_id: TabId,
        request: CapturedRequest,
    },
}

impl StoreEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            StoreEvent::Appended { tab_id, .. } | StoreEvent::Updated { tab_id, .. } => *tab_id,
        }
    }

    pub fn into_message(self) -> SessionMessage {
        match self {
            StoreEvent::Appended { request, .. } => SessionMessage::New(request),
            StoreEvent::Updated { request, .. } => SessionMessage::Update(request),
        }
    }
}

/// Bounded, persisted store of captured requests keyed by tab
pub struct CaptureStore {
    tabs: RwLock<HashMap<TabId, VecDeque<CapturedRequest>>>,
    capacity: usize,
    snapshot_file: Option<SnapshotFile>,
    broadcast_tx: broadcast::Sender<StoreEvent>,
}

impl CaptureStore {
    pub fn new(capacity: usize, snapshot_file: Option<SnapshotFile>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        Self {
            tabs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            snapshot_file,
            broadcast_tx,
        }
    }

    /// Store without durable backing
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, None)
    }

    /// Load every tab's history from the snapshot file, replacing what is in
    /// memory. Must run before the first append. Returns the number of
    /// records loaded; an unreadable snapshot is logged and treated as empty.
    pub async fn hydrate(&self) -> usize {
        let Some(file) = &self.snapshot_file else {
            return 0;
        };

        let snapshot = match file.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Ignoring unreadable request snapshot: {}", e);
                return 0;
            }
        };

        let mut tabs = self.tabs.write().await;
        tabs.clear();
        let mut loaded = 0;
        for (tab_id, history) in snapshot {
            let skip = history.len().saturating_sub(self.capacity);
            let history: VecDeque<_> = history.into_iter().skip(skip).collect();
            loaded += history.len();
            tabs.insert(tab_id, history);
        }

        tracing::info!(
            "Loaded {} requests for {} tabs from {}",
            loaded,
            tabs.len(),
            file.path().display()
        );
        loaded
    }

    /// Append a record to the tab's history, evicting the oldest entries so
    /// the tab never exceeds capacity, then persist and broadcast NEW.
    pub async fn append(&self, tab_id: TabId, request: CapturedRequest) {
        let snapshot = {
            let mut tabs = self.tabs.write().await;
            let history = tabs.entry(tab_id).or_default();

            while history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(request.clone());

            self.snapshot_of(&tabs)
        };

        self.persist(snapshot).await;

        // Ignore if no viewers are connected
        let _ = self
            .broadcast_tx
            .send(StoreEvent::Appended { tab_id, request });
    }

    /// Empty the tab's history and persist
    pub async fn clear(&self, tab_id: TabId) {
        let snapshot = {
            let mut tabs = self.tabs.write().await;
            tabs.remove(&tab_id);
            self.snapshot_of(&tabs)
        };

        self.persist(snapshot).await;
        tracing::info!("Cleared requests for tab {}", tab_id);
    }

    /// Current history for a tab, oldest first
    pub async fn get(&self, tab_id: TabId) -> Vec<CapturedRequest> {
        self.tabs
            .read()
            .await
            .get(&tab_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a specific request by ID
    pub async fn get_request(&self, tab_id: TabId, request_id: &str) -> Option<CapturedRequest> {
        self.tabs
            .read()
            .await
            .get(&tab_id)?
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    /// Attach a response body to a stored record. Persists and broadcasts
    /// UPDATE only when the record is still in the tab's history.
    pub async fn set_response_body(&self, tab_id: TabId, request_id: &str, body: String) -> bool {
        let (updated, snapshot) = {
            let mut tabs = self.tabs.write().await;
            let Some(request) = tabs
                .get_mut(&tab_id)
                .and_then(|history| history.iter_mut().find(|r| r.request_id == request_id))
            else {
                return false;
            };

            request.response_body = Some(body);
            let updated = request.clone();
            (updated, self.snapshot_of(&tabs))
        };

        self.persist(snapshot).await;

        let _ = self.broadcast_tx.send(StoreEvent::Updated {
            tab_id,
            request: updated,
        });
        true
    }

    /// Tabs that currently hold history
    pub async fn tab_ids(&self) -> Vec<TabId> {
        let mut ids: Vec<TabId> = self
            .tabs
            .read()
            .await
            .iter()
            .filter(|(_, history)| !history.is_empty())
            .map(|(tab_id, _)| *tab_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Subscribe to store events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.broadcast_tx.subscribe()
    }

    fn snapshot_of(&self, tabs: &HashMap<TabId, VecDeque<CapturedRequest>>) -> Option<TabSnapshot> {
        self.snapshot_file.as_ref()?;
        Some(
            tabs.iter()
                .map(|(tab_id, history)| (*tab_id, history.iter().cloned().collect()))
                .collect(),
        )
    }

    /// Best-effort write; in-memory state stays authoritative on failure
    async fn persist(&self, snapshot: Option<TabSnapshot>) {
        let (Some(file), Some(snapshot)) = (&self.snapshot_file, snapshot) else {
            return;
        };

        if let Err(e) = file.save(&snapshot).await {
            tracing::warn!("Failed to persist requests: {}", e);
        }
    }
}
