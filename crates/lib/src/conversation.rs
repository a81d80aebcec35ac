//! Conversation store: the ordered, append-only message list of the active conversation.
//!
//! History is loaded once and replaces the list; live frames are appended in arrival order.
//! Nothing is ever reordered, merged or removed. Readers get [`Snapshot`]s, which are not
//! affected by later mutations.

use std::sync::Arc;

use crate::message::{self, CanonicalMessage, HistoryRecord, LiveOutcome};

/// Immutable view of the conversation at one point in time.
pub type Snapshot = Arc<Vec<CanonicalMessage>>;

/// Per-session lifecycle of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Constructed, no subscription yet.
    Idle,
    /// History request in flight; live frames are buffered.
    AwaitingHistory,
    /// Steady state; live frames are applied as they arrive.
    Live,
    /// Subscription released; everything is ignored.
    Closed,
}

/// What `apply_live_event` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Appended,
    /// Held until the history load completes.
    Buffered,
    /// Valid frame for another party; no-op.
    Filtered,
    /// Unparseable frame; dropped and logged.
    Rejected,
    /// Store is closed.
    Ignored,
}

/// Owns the conversation for one session. Mutated from a single task only.
#[derive(Debug)]
pub struct ConversationStore {
    state: SyncState,
    messages: Snapshot,
    pending: Vec<String>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            state: SyncState::Idle,
            messages: Arc::new(Vec::new()),
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of live frames waiting for the history load.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Mark the history request as in flight.
    pub fn begin_history(&mut self) {
        if self.state == SyncState::Idle {
            self.state = SyncState::AwaitingHistory;
        }
    }

    /// Replace the whole conversation with `records`, in order, then apply any buffered frames.
    /// A later call replaces again; it never merges.
    pub fn load_history<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = HistoryRecord>,
    {
        if self.state == SyncState::Closed {
            log::debug!("conversation: history arrived after close, ignoring");
            return;
        }
        let messages: Vec<CanonicalMessage> =
            records.into_iter().map(message::normalize_history).collect();
        log::info!("conversation: loaded {} history messages", messages.len());
        self.messages = Arc::new(messages);
        self.go_live();
    }

    /// History fetch failed: keep the conversation as it is and start applying live frames.
    pub fn history_failed(&mut self) {
        if self.state == SyncState::Closed {
            return;
        }
        self.go_live();
    }

    fn go_live(&mut self) {
        self.state = SyncState::Live;
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            log::debug!("conversation: applying {} buffered live frames", pending.len());
        }
        for frame in pending {
            self.apply_now(&frame);
        }
    }

    /// Run one raw live frame through the normalizer and append it if accepted.
    /// Never fails: filtered frames are a no-op and parse errors are logged and dropped.
    pub fn apply_live_event(&mut self, frame: &str) -> ApplyOutcome {
        match self.state {
            SyncState::Idle | SyncState::AwaitingHistory => {
                self.pending.push(frame.to_string());
                ApplyOutcome::Buffered
            }
            SyncState::Live => self.apply_now(frame),
            SyncState::Closed => ApplyOutcome::Ignored,
        }
    }

    fn apply_now(&mut self, frame: &str) -> ApplyOutcome {
        match message::normalize_live(frame) {
            Ok(LiveOutcome::Accepted(msg)) => {
                Arc::make_mut(&mut self.messages).push(msg);
                ApplyOutcome::Appended
            }
            Ok(LiveOutcome::Filtered) => {
                log::debug!("conversation: live frame filtered");
                ApplyOutcome::Filtered
            }
            Err(e) => {
                log::warn!("conversation: dropping live frame: {}", e);
                ApplyOutcome::Rejected
            }
        }
    }

    /// Current ordered messages, oldest first.
    pub fn current_view(&self) -> Snapshot {
        Arc::clone(&self.messages)
    }

    /// Stop accepting frames. Buffered frames are discarded. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state != SyncState::Closed {
            self.state = SyncState::Closed;
            self.pending.clear();
        }
    }
}
