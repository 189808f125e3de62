//! Inspector application: owns the mirror and serializes every mutation
//!
//! Session events, prompt commands and finished replays all arrive on
//! channels and are handled one at a time on a single task.

pub mod prompt;
mod render;

use crate::mirror::{DeleteChoice, DeleteOutcome, Mirror, Relation, ViewerRequest};
use crate::replay::{ReplayDraft, ReplayError, Replayer};
use crate::session::{ConnectionState, DisconnectReason, SessionEvent};
use console::style;
use lotus_common::{SessionMessage, TabId, ViewerMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Requests from the interactive prompt
#[derive(Debug)]
pub enum Command {
    List {
        filter: String,
    },
    Show {
        id: String,
    },
    /// Fetch an editable copy of a record
    Draft {
        id: String,
        reply: oneshot::Sender<Result<ReplayDraft, String>>,
    },
    Replay {
        id: String,
        draft: ReplayDraft,
    },
    Relation {
        id: String,
        reply: oneshot::Sender<Option<Relation>>,
    },
    Delete {
        id: String,
        choice: Option<DeleteChoice>,
    },
    Clear,
    Status,
}

type ReplayResult = Result<ViewerRequest, ReplayError>;

pub struct App {
    tab_id: TabId,
    mirror: Mirror,
    state: ConnectionState,
    selected: Option<String>,
    outbound: mpsc::Sender<ViewerMessage>,
    replayer: Replayer,
    replay_tx: mpsc::Sender<ReplayResult>,
    replay_rx: Option<mpsc::Receiver<ReplayResult>>,
}

impl App {
    pub fn new(tab_id: TabId, outbound: mpsc::Sender<ViewerMessage>, replayer: Replayer) -> Self {
        let (replay_tx, replay_rx) = mpsc::channel(16);
        Self {
            tab_id,
            mirror: Mirror::new(),
            state: ConnectionState::Disconnected,
            selected: None,
            outbound,
            replayer,
            replay_tx,
            replay_rx: Some(replay_rx),
        }
    }

    /// Process events until the session client or the prompt goes away
    pub async fn run(
        mut self,
        mut session: mpsc::Receiver<SessionEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let Some(mut replays) = self.replay_rx.take() else {
            return;
        };

        loop {
            tokio::select! {
                event = session.recv() => match event {
                    Some(event) => self.handle_session_event(event),
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(result) = replays.recv() => self.handle_replay_result(result),
            }
        }

        tracing::debug!("Inspector for tab {} stopped", self.tab_id);
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        if let Some(state) = event.state() {
            self.state = state;
        }

        match event {
            SessionEvent::Connecting => {
                tracing::debug!("Connecting to tab {}", self.tab_id);
            }
            SessionEvent::Connected => {
                let _ = cliclack::log::success(format!(
                    "Connected to tab {}",
                    style(self.tab_id).cyan()
                ));
            }
            SessionEvent::Disconnected(DisconnectReason::Shutdown) => {}
            SessionEvent::Disconnected(DisconnectReason::Superseded) => {
                let _ = cliclack::log::warning(format!(
                    "Another inspector is now watching tab {}; this one has stopped (press Enter to exit)",
                    self.tab_id
                ));
            }
            SessionEvent::Disconnected(reason) => {
                let _ = cliclack::log::warning(format!("Disconnected ({:?}), reconnecting", reason));
            }
            SessionEvent::Message(message) => self.apply_message(message),
        }
    }

    fn apply_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Init(records) => {
                let count = records.len();
                self.mirror.apply_init(records);
                self.drop_stale_selection();
                let _ = cliclack::log::info(format!("Loaded {} captured requests", count));
            }
            SessionMessage::New(record) => {
                let id = record.request_id.clone();
                self.mirror.apply_new(record);
                if let Some(request) = self.mirror.get(&id) {
                    println!("{}", render::request_line(request));
                }
            }
            SessionMessage::Update(record) => {
                let id = record.request_id.clone();
                if !self.mirror.apply_update(record) {
                    tracing::debug!("Ignoring update for unknown request {}", id);
                    return;
                }
                if self.selected.as_deref() == Some(id.as_str()) {
                    self.show(&id);
                }
            }
            SessionMessage::HeartbeatAck => {}
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::List { filter } => {
                let requests = self.mirror.list(&filter);
                if self.mirror.is_empty() {
                    let _ = cliclack::log::info("No requests captured yet");
                } else if requests.is_empty() {
                    let _ = cliclack::log::info(format!("No requests matching {:?}", filter));
                }
                for request in requests {
                    println!("{}", render::request_line(request));
                }
            }
            Command::Show { id } => self.show(&id),
            Command::Draft { id, reply } => {
                let _ = reply.send(self.replay_source(&id).map(ReplayDraft::from_request));
            }
            Command::Replay { id, draft } => {
                self.start_replay(&id, draft);
            }
            Command::Relation { id, reply } => {
                let _ = reply.send(self.mirror.relation(&id));
            }
            Command::Delete { id, choice } => self.delete(&id, choice),
            Command::Clear => self.clear().await,
            Command::Status => {
                let _ = cliclack::log::info(format!(
                    "Tab {}: {}, {} requests in view",
                    self.tab_id,
                    self.state,
                    self.mirror.len()
                ));
            }
        }
    }

    fn show(&mut self, id: &str) {
        let Some(request) = self.mirror.get(id) else {
            let _ = cliclack::log::error(format!("No request {}", id));
            return;
        };
        let relation = self.mirror.relation(id).unwrap_or(Relation::Unrelated);
        println!("{}", render::request_detail(request, &relation));
        self.selected = Some(id.to_string());
    }

    /// A record that can be replayed, or the reason it cannot
    fn replay_source(&self, id: &str) -> Result<&ViewerRequest, String> {
        let source = self
            .mirror
            .get(id)
            .ok_or_else(|| format!("No request {}", id))?;
        if !source.has_stable_id() {
            return Err(ReplayError::UnstableSource(id.to_string()).to_string());
        }
        Ok(source)
    }

    fn start_replay(&mut self, id: &str, draft: ReplayDraft) -> Option<JoinHandle<()>> {
        let source = match self.replay_source(id) {
            Ok(source) => source.clone(),
            Err(message) => {
                let _ = cliclack::log::error(message);
                return None;
            }
        };

        // Bad header JSON is reported here and nothing is sent
        if let Err(e) = draft.parse_headers() {
            let _ = cliclack::log::error(e.to_string());
            return None;
        }

        let replayer = self.replayer.clone();
        let results = self.replay_tx.clone();
        Some(tokio::spawn(async move {
            let result = replayer.execute(&source, &draft).await;
            let _ = results.send(result).await;
        }))
    }

    pub fn handle_replay_result(&mut self, result: ReplayResult) {
        match result {
            Ok(request) => {
                let line = render::request_line(&request);
                self.mirror.insert_replay(request);
                let _ = cliclack::log::success(format!("Replayed\n{}", line));
            }
            Err(e) => {
                tracing::warn!("Replay failed: {}", e);
                let _ = cliclack::log::error(format!("Error sending modified request: {}", e));
            }
        }
    }

    fn delete(&mut self, id: &str, choice: Option<DeleteChoice>) {
        match self.mirror.delete(id, choice) {
            DeleteOutcome::NotFound => {
                let _ = cliclack::log::error(format!("No request {}", id));
            }
            DeleteOutcome::ChoiceRequired { children } => {
                let _ = cliclack::log::warning(format!(
                    "{} has {} replay(s); choose cascade or keep",
                    id, children
                ));
            }
            DeleteOutcome::Deleted { removed } => {
                self.drop_stale_selection();
                let _ = cliclack::log::success(format!("Deleted {}", removed.join(", ")));
            }
        }
    }

    async fn clear(&mut self) {
        if self.state != ConnectionState::Connected {
            let _ = cliclack::log::warning("Not connected; nothing cleared");
            return;
        }
        if self.outbound.send(ViewerMessage::Clear).await.is_err() {
            let _ = cliclack::log::error("Session closed; nothing cleared");
            return;
        }
        self.mirror.clear_local();
        self.selected = None;
        let _ = cliclack::log::success(format!("Cleared tab {}", self.tab_id));
    }

    fn drop_stale_selection(&mut self) {
        if let Some(id) = &self.selected {
            if self.mirror.get(id).is_none() {
                self.selected = None;
            }
        }
    }
}

#[cfg(test)]
impl App {
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lotus_common::CapturedRequest;

    fn record(id: &str) -> CapturedRequest {
        CapturedRequest {
            request_id: id.to_string(),
            url: format!("https://example.com/{}", id),
            method: "GET".to_string(),
            status: 200,
            status_text: String::new(),
            request_headers: Vec::new(),
            request_body: None,
            response_headers: Vec::new(),
            response_body: None,
            timestamp: Utc::now(),
        }
    }

    fn app() -> (App, mpsc::Receiver<ViewerMessage>) {
        let (outbound, outbound_rx) = mpsc::channel(4);
        (App::new(7, outbound, Replayer::new().unwrap()), outbound_rx)
    }

    #[tokio::test]
    async fn test_session_messages_drive_mirror() {
        let (mut app, _outbound) = app();
        app.handle_session_event(SessionEvent::Connected);
        assert_eq!(app.state(), ConnectionState::Connected);

        app.handle_session_event(SessionEvent::Message(SessionMessage::Init(vec![record("a")])));
        app.handle_session_event(SessionEvent::Message(SessionMessage::New(record("b"))));
        app.handle_session_event(SessionEvent::Message(SessionMessage::New(record("b"))));
        assert_eq!(app.mirror().len(), 2);

        let mut updated = record("b");
        updated.response_body = Some("done".to_string());
        app.handle_session_event(SessionEvent::Message(SessionMessage::Update(updated)));
        app.handle_session_event(SessionEvent::Message(SessionMessage::Update(record("zzz"))));
        assert_eq!(
            app.mirror().get("b").unwrap().record.response_body.as_deref(),
            Some("done")
        );
        assert_eq!(app.mirror().len(), 2);

        app.handle_session_event(SessionEvent::Disconnected(DisconnectReason::Closed));
        assert_eq!(app.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_clear_requires_connection() {
        let (mut app, mut outbound) = app();
        app.handle_session_event(SessionEvent::Message(SessionMessage::Init(vec![record("a")])));

        app.handle_command(Command::Clear).await;
        assert_eq!(app.mirror().len(), 1);
        assert!(outbound.try_recv().is_err());

        app.handle_session_event(SessionEvent::Connected);
        app.handle_command(Command::Clear).await;
        assert!(app.mirror().is_empty());
        assert_eq!(outbound.try_recv().unwrap(), ViewerMessage::Clear);
    }

    #[tokio::test]
    async fn test_replay_result_and_delete_flow() {
        let (mut app, _outbound) = app();
        app.handle_session_event(SessionEvent::Message(SessionMessage::Init(vec![record("a")])));

        let replay = ViewerRequest::replay_of("a", record("a"));
        let replay_id = replay.id.clone();
        app.handle_replay_result(Ok(replay));
        assert_eq!(app.mirror().len(), 2);

        let (reply, rx) = oneshot::channel();
        app.handle_command(Command::Relation {
            id: "a".to_string(),
            reply,
        })
        .await;
        assert_eq!(
            rx.await.unwrap(),
            Some(Relation::Root {
                children: vec![replay_id.clone()]
            })
        );

        app.handle_command(Command::Delete {
            id: "a".to_string(),
            choice: None,
        })
        .await;
        assert_eq!(app.mirror().len(), 2);

        app.handle_command(Command::Delete {
            id: "a".to_string(),
            choice: Some(DeleteChoice::KeepChildren),
        })
        .await;
        assert_eq!(app.mirror().len(), 1);
        assert!(app.mirror().get(&replay_id).unwrap().orphaned);
    }

    #[tokio::test]
    async fn test_draft_lookup() {
        let (mut app, _outbound) = app();
        app.handle_session_event(SessionEvent::Message(SessionMessage::Init(vec![record("a")])));

        let (reply, rx) = oneshot::channel();
        app.handle_command(Command::Draft {
            id: "a".to_string(),
            reply,
        })
        .await;
        assert_eq!(rx.await.unwrap().unwrap().url, "https://example.com/a");

        let (reply, rx) = oneshot::channel();
        app.handle_command(Command::Draft {
            id: "missing".to_string(),
            reply,
        })
        .await;
        assert_eq!(rx.await.unwrap().unwrap_err(), "No request missing");
    }

    #[tokio::test]
    async fn test_records_without_id_are_not_replayed() {
        let (mut app, _outbound) = app();
        app.handle_session_event(SessionEvent::Message(SessionMessage::Init(vec![
            record(""),
            record("b"),
        ])));
        assert!(app.mirror().get("req-0").is_some());

        let (reply, rx) = oneshot::channel();
        app.handle_command(Command::Draft {
            id: "req-0".to_string(),
            reply,
        })
        .await;
        assert!(rx.await.unwrap().unwrap_err().contains("no stable id"));

        let draft = ReplayDraft::from_request(app.mirror().get("req-0").unwrap());
        assert!(app.start_replay("req-0", draft).is_none());
    }

    #[test]
    fn test_superseded_disconnect_keeps_state_disconnected() {
        let (mut app, _outbound) = app();
        app.handle_session_event(SessionEvent::Connected);
        app.handle_session_event(SessionEvent::Disconnected(DisconnectReason::Superseded));
        assert_eq!(app.state(), ConnectionState::Disconnected);
    }
}
