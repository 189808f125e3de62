//! Registry of live viewer connections, at most one per tab

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lotus_common::TabId;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Handle to the viewer currently attached to a tab
#[derive(Debug)]
struct ViewerHandle {
    connection_id: Uuid,
    /// Fired when a newer connection for the same tab takes over
    superseded_tx: oneshot::Sender<()>,
    connected_at: DateTime<Utc>,
}

/// Registration returned to a freshly connected viewer
#[derive(Debug)]
pub struct ViewerRegistration {
    pub connection_id: Uuid,
    pub superseded: oneshot::Receiver<()>,
}

#[derive(Default)]
pub struct SessionRegistry {
    viewers: DashMap<TabId, ViewerHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a viewer to a tab. Any previous viewer for the tab is told it
    /// has been superseded.
    pub fn register(&self, tab_id: TabId) -> ViewerRegistration {
        let (superseded_tx, superseded) = oneshot::channel();
        let connection_id = Uuid::new_v4();

        let previous = self.viewers.insert(
            tab_id,
            ViewerHandle {
                connection_id,
                superseded_tx,
                connected_at: Utc::now(),
            },
        );

        if let Some(previous) = previous {
            tracing::info!(
                "Viewer {} for tab {} superseded by {} (connected at {})",
                previous.connection_id,
                tab_id,
                connection_id,
                previous.connected_at
            );
            let _ = previous.superseded_tx.send(());
        }

        ViewerRegistration {
            connection_id,
            superseded,
        }
    }

    /// Detach a viewer, unless a newer connection already replaced it
    pub fn unregister(&self, tab_id: TabId, connection_id: Uuid) -> bool {
        self.viewers
            .remove_if(&tab_id, |_, handle| handle.connection_id == connection_id)
            .is_some()
    }

    #[cfg(test)]
    pub fn is_connected(&self, tab_id: TabId) -> bool {
        self.viewers.contains_key(&tab_id)
    }

    /// Number of tabs with a live viewer
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }
}
