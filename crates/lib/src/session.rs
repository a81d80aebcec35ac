//! Chat session: drives one conversation from mount to teardown on a single task.
//!
//! On start the session authenticates, requests the history and listens on the live channel
//! at the same time; frames that arrive before the history are buffered by the store.
//! Every change to the conversation is published as a [`Snapshot`] on a watch channel.
//! Outbound sends requested through [`SessionHandle`] run on the same task, between frames.

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{self, Config, Credentials};
use crate::conversation::{ApplyOutcome, ConversationStore, Snapshot};
use crate::transport::{ApiClient, ChatApi, LiveChannel, OutboundMessage, TransportError, WsLiveChannel};

/// Per-session settings resolved from config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub contact: String,
    pub credentials: Option<Credentials>,
    pub sender_label: String,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let contact = config::resolve_contact(config)
            .context("no contact configured; set contact.phone or CHATSYNC_CONTACT")?;
        Ok(Self {
            contact,
            credentials: config::resolve_credentials(config),
            sender_label: config.send.sender_label.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not authenticated; configure auth.email and auth.password")]
    NotAuthenticated,
    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
    #[error("session closed")]
    SessionClosed,
}

/// Request from the UI to the session task.
#[derive(Debug)]
pub enum SessionCommand {
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
}

/// One conversation session: owns the REST client, the live channel and the store.
pub struct ChatSession<A, L> {
    api: A,
    live: L,
    options: SessionOptions,
    store: ConversationStore,
}

impl<A, L> ChatSession<A, L>
where
    A: ChatApi + 'static,
    L: LiveChannel + 'static,
{
    pub fn new(api: A, live: L, options: SessionOptions) -> Self {
        Self {
            api,
            live,
            options,
            store: ConversationStore::new(),
        }
    }

    /// Run the session on a new task. Returns a handle to observe, send, and shut down.
    pub fn spawn(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (view_tx, view_rx) = watch::channel(self.store.current_view());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(commands_rx, view_tx, shutdown_rx));
        SessionHandle {
            commands: commands_tx,
            view: view_rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Session loop. Ends on shutdown or when the handle is dropped. Once the live channel
    /// ends it is no longer polled, but sends keep working. Returns the closed store.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<SessionCommand>,
        view: watch::Sender<Snapshot>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> ConversationStore {
        let ChatSession {
            api,
            mut live,
            options,
            mut store,
        } = self;

        let access_token = authenticate(&api, options.credentials.as_ref()).await;

        store.begin_history();
        let mut history = api.fetch_history(&options.contact);
        let mut awaiting_history = true;
        let mut live_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("session: shutdown requested");
                    break;
                }
                res = &mut history, if awaiting_history => {
                    awaiting_history = false;
                    match res {
                        Ok(records) => store.load_history(records),
                        Err(e) => {
                            log::warn!("session: history fetch failed: {}", e);
                            store.history_failed();
                        }
                    }
                    view.send_replace(store.current_view());
                }
                frame = live.next_frame(), if live_open => {
                    match frame {
                        Some(Ok(text)) => {
                            if store.apply_live_event(&text) == ApplyOutcome::Appended {
                                view.send_replace(store.current_view());
                            }
                        }
                        Some(Err(e)) => {
                            log::warn!("session: live channel error: {}", e);
                            live_open = false;
                        }
                        None => {
                            log::info!("session: live channel ended, sends still available");
                            live_open = false;
                        }
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Send { text, reply }) => {
                        let result = send(&api, access_token.as_deref(), &options, &text).await;
                        let _ = reply.send(result);
                    }
                    None => {
                        log::debug!("session: handle dropped");
                        break;
                    }
                },
            }
        }

        drop(history);
        store.close();
        live.close().await;
        store
    }
}

async fn authenticate<A: ChatApi>(api: &A, credentials: Option<&Credentials>) -> Option<String> {
    let Some(credentials) = credentials else {
        log::info!("session: no credentials configured, sending is disabled");
        return None;
    };
    match api.authenticate(credentials).await {
        Ok(tokens) => tokens.access,
        Err(e) => {
            log::warn!("session: authentication failed: {}", e);
            None
        }
    }
}

async fn send<A: ChatApi>(
    api: &A,
    access_token: Option<&str>,
    options: &SessionOptions,
    text: &str,
) -> Result<(), SendError> {
    let token = access_token.ok_or(SendError::NotAuthenticated)?;
    let message = OutboundMessage::from_user(&options.contact, &options.sender_label, text);
    api.send_message(token, &message).await?;
    log::debug!("session: sent message to {}", options.contact);
    Ok(())
}

/// Handle to a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<Snapshot>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<ConversationStore>,
}

impl SessionHandle {
    /// Subscribe to conversation snapshots. `changed()` errors once the session has ended.
    pub fn view(&self) -> watch::Receiver<Snapshot> {
        self.view.clone()
    }

    pub fn current_view(&self) -> Snapshot {
        self.view.borrow().clone()
    }

    /// Send a text message to the session's contact.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SendError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Send {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| SendError::SessionClosed)?;
        rx.await.map_err(|_| SendError::SessionClosed)?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session, release the live channel, and return the final conversation.
    pub async fn shutdown(mut self) -> Snapshot {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(store) => store.current_view(),
            Err(e) => {
                log::warn!("session: task failed: {}", e);
                self.view.borrow().clone()
            }
        }
    }
}

/// Build a session from config with the HTTP client and websocket channel, and start it.
/// A live socket that cannot be opened is logged; the history still loads.
pub async fn start(config: &Config) -> Result<SessionHandle> {
    let options = SessionOptions::from_config(config)?;
    let api = ApiClient::new(config.api.base_url.clone());
    let mut live = WsLiveChannel::new(config.api.ws_url.clone());
    if let Err(e) = live.connect().await {
        log::warn!("session: live updates unavailable: {}", e);
    }
    Ok(ChatSession::new(api, live, options).spawn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HistoryRecord;
    use crate::transport::TokenPair;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type HistoryResult = Result<Vec<HistoryRecord>, TransportError>;

    struct FakeApi {
        history: Mutex<Option<oneshot::Receiver<HistoryResult>>>,
        sent: Arc<Mutex<Vec<(String, OutboundMessage)>>>,
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn authenticate(&self, _: &Credentials) -> Result<TokenPair, TransportError> {
            Ok(TokenPair {
                access: Some("tok".to_string()),
                refresh: Some("ref".to_string()),
            })
        }

        async fn fetch_history(&self, _contact: &str) -> HistoryResult {
            let rx = self.history.lock().unwrap().take();
            match rx {
                Some(rx) => rx.await.unwrap_or_else(|_| Ok(Vec::new())),
                None => Ok(Vec::new()),
            }
        }

        async fn send_message(
            &self,
            access_token: &str,
            message: &OutboundMessage,
        ) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((access_token.to_string(), message.clone()));
            Ok(())
        }
    }

    struct FakeLive {
        rx: mpsc::UnboundedReceiver<String>,
        open: bool,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LiveChannel for FakeLive {
        async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
            if !self.open {
                return None;
            }
            match self.rx.recv().await {
                Some(text) => Some(Ok(text)),
                None => {
                    self.open = false;
                    None
                }
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) {
            if self.open {
                self.open = false;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct Harness {
        handle: SessionHandle,
        history_tx: oneshot::Sender<HistoryResult>,
        frames: mpsc::UnboundedSender<String>,
        sent: Arc<Mutex<Vec<(String, OutboundMessage)>>>,
        closes: Arc<AtomicUsize>,
    }

    fn harness(credentials: Option<Credentials>, live_open: bool) -> Harness {
        let (history_tx, history_rx) = oneshot::channel();
        let (frames, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        let api = FakeApi {
            history: Mutex::new(Some(history_rx)),
            sent: sent.clone(),
        };
        let live = FakeLive {
            rx,
            open: live_open,
            closes: closes.clone(),
        };
        let options = SessionOptions {
            contact: "+551199999999".to_string(),
            credentials,
            sender_label: "Usuário".to_string(),
        };
        Harness {
            handle: ChatSession::new(api, live, options).spawn(),
            history_tx,
            frames,
            sent,
            closes,
        }
    }

    fn credentials() -> Option<Credentials> {
        Some(Credentials {
            email: "user@example.com".to_string(),
            password: "string".to_string(),
        })
    }

    fn customer_frame(content: &str) -> String {
        serde_json::json!({
            "message": { "sender": "customer", "targetNumber": "+551199999999", "content": content }
        })
        .to_string()
    }

    fn agent_record(content: &str) -> HistoryRecord {
        HistoryRecord {
            content: Some(content.to_string()),
            sender: Some("agent".to_string()),
            ..Default::default()
        }
    }

    async fn wait_for_len(handle: &SessionHandle, n: usize) -> Snapshot {
        let mut rx = handle.view();
        let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| v.len() >= n))
            .await
            .expect("view did not reach expected length")
            .expect("session ended");
        view.clone()
    }

    #[tokio::test]
    async fn frames_before_history_appear_after_it() {
        let h = harness(credentials(), true);
        h.frames.send(customer_frame("early")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.handle.current_view().is_empty());

        h.history_tx.send(Ok(vec![agent_record("hi")])).unwrap();
        let view = wait_for_len(&h.handle, 2).await;
        assert_eq!(view[0].body, "hi");
        assert_eq!(view[1].body, "early");

        h.frames.send(customer_frame("late")).unwrap();
        let view = wait_for_len(&h.handle, 3).await;
        assert_eq!(view[2].body, "late");
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn filtered_and_broken_frames_do_not_end_subscription() {
        let h = harness(credentials(), true);
        h.history_tx.send(Ok(Vec::new())).unwrap();
        h.frames
            .send(r#"{"message":{"sender":"agent","content":"echo"}}"#.to_string())
            .unwrap();
        h.frames.send("not json".to_string()).unwrap();
        h.frames.send(customer_frame("ok")).unwrap();
        let view = wait_for_len(&h.handle, 1).await;
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].body, "ok");
        assert!(!h.handle.is_finished());
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_history_leaves_conversation_empty() {
        let h = harness(credentials(), true);
        h.history_tx
            .send(Err(TransportError::Api {
                status: 500,
                body: "boom".to_string(),
            }))
            .unwrap();
        h.frames.send(customer_frame("still live")).unwrap();
        let view = wait_for_len(&h.handle, 1).await;
        assert_eq!(view[0].body, "still live");
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_open_channel_once() {
        let h = harness(credentials(), true);
        h.history_tx.send(Ok(vec![agent_record("hi")])).unwrap();
        wait_for_len(&h.handle, 1).await;
        let final_view = h.handle.shutdown().await;
        assert_eq!(final_view.len(), 1);
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_opened_channel_is_not_released() {
        let h = harness(credentials(), false);
        h.history_tx.send(Ok(vec![agent_record("hi")])).unwrap();
        wait_for_len(&h.handle, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!h.handle.is_finished());
        let final_view = h.handle.shutdown().await;
        assert_eq!(final_view.len(), 1);
        assert_eq!(h.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_works_with_live_channel_down() {
        let h = harness(credentials(), false);
        h.history_tx.send(Ok(vec![agent_record("hi")])).unwrap();
        wait_for_len(&h.handle, 1).await;
        h.handle.send("olá").await.unwrap();
        assert_eq!(h.sent.lock().unwrap().len(), 1);
        assert!(!h.handle.is_finished());
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn dropping_handle_ends_session() {
        let h = harness(credentials(), false);
        h.history_tx.send(Ok(Vec::new())).unwrap();
        let mut rx = h.handle.view();
        drop(h.handle);
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.changed().await.is_ok() {}
        })
        .await
        .expect("session did not end after the handle was dropped");
    }

    #[tokio::test]
    async fn send_uses_access_token_and_label() {
        let h = harness(credentials(), true);
        h.history_tx.send(Ok(Vec::new())).unwrap();
        h.handle.send("olá").await.unwrap();
        let sent = h.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "tok");
        assert_eq!(
            sent[0].1,
            OutboundMessage::from_user("+551199999999", "Usuário", "olá")
        );
        // Outbound messages are not echoed into the conversation.
        assert!(h.handle.current_view().is_empty());
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn send_without_credentials_fails() {
        let h = harness(None, true);
        h.history_tx.send(Ok(Vec::new())).unwrap();
        let err = h.handle.send("olá").await.unwrap_err();
        assert!(matches!(err, SendError::NotAuthenticated));
        assert!(h.sent.lock().unwrap().is_empty());
        h.handle.shutdown().await;
    }

    #[test]
    fn options_use_configured_contact_and_label() {
        let mut config = Config::default();
        config.contact.phone = Some(" +551199999999 ".to_string());
        config.send.sender_label = "Equipe".to_string();
        let options = SessionOptions::from_config(&config).unwrap();
        if std::env::var("CHATSYNC_CONTACT").is_err() {
            assert_eq!(options.contact, "+551199999999");
        }
        assert_eq!(options.sender_label, "Equipe");
    }

    #[test]
    fn options_require_contact() {
        if std::env::var("CHATSYNC_CONTACT").is_ok() {
            return;
        }
        assert!(SessionOptions::from_config(&Config::default()).is_err());
    }
}
