use crate::config::ModelConfig;
use crate::models::ChatMessage;

/// Per-turn lifecycle of a session.
///
/// `Streaming` is re-entered only via cancel-then-restart; `on_complete` is
/// legal only from `Streaming`, so a settled turn can never be finalized a
/// second time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Settled,
    Failed,
    Cancelled,
}

/// One model's conversation session.
///
/// Owns the turn history, the in-flight streaming accumulator, and the
/// enablement flag. The identity index is stable for the session's lifetime
/// and is the routing key for every event that concerns it.
///
/// Every run carries the generation current when it was started; callbacks
/// from a superseded run fail the generation check and change nothing.
pub struct ChatSession {
    index: usize,
    model: ModelConfig,
    enabled: bool,
    history: Vec<ChatMessage>,
    accumulator: String,
    generation: u64,
    state: TurnState,
}

impl ChatSession {
    pub fn new(index: usize, model: ModelConfig) -> Self {
        Self {
            index,
            model,
            enabled: true,
            history: Vec::new(),
            accumulator: String::new(),
            generation: 0,
            state: TurnState::Idle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Current streaming accumulator contents (empty when idle).
    pub fn streamed_text(&self) -> &str {
        &self.accumulator
    }

    /// Start a new turn: reset the accumulator, append the user turn, and
    /// return the history snapshot for the outgoing request.
    ///
    /// The snapshot is taken *before* the user turn is appended: the
    /// endpoint client adds the new user message to the wire payload itself,
    /// so including it here would send it twice. The returned generation
    /// fences every later callback for this run.
    pub fn begin_turn(&mut self, user_message: &str) -> (Vec<ChatMessage>, u64) {
        debug_assert_ne!(self.state, TurnState::Streaming, "previous run not torn down");
        let snapshot = self.history.clone();
        self.accumulator.clear();
        self.history.push(ChatMessage::user(user_message));
        self.generation += 1;
        self.state = TurnState::Streaming;
        (snapshot, self.generation)
    }

    /// Append one streamed delta. Returns false (and changes nothing) when
    /// the run has been superseded or the session is no longer streaming.
    pub fn on_delta(&mut self, generation: u64, text: &str) -> bool {
        if generation != self.generation || self.state != TurnState::Streaming {
            return false;
        }
        self.accumulator.push_str(text);
        true
    }

    /// Finalize a completed run: the accumulator becomes the assistant turn
    /// and is reset. Returns the final text, or `None` when the run was
    /// superseded (no history mutation happens in that case).
    pub fn on_complete(&mut self, generation: u64) -> Option<String> {
        if generation != self.generation || self.state != TurnState::Streaming {
            return None;
        }
        let text = std::mem::take(&mut self.accumulator);
        self.history.push(ChatMessage::assistant(text.clone()));
        self.state = TurnState::Settled;
        Some(text)
    }

    /// Record a failed run. History is untouched; the accumulator keeps the
    /// partial reply for diagnostic display. Returns false for stale runs.
    pub fn on_error(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != TurnState::Streaming {
            return false;
        }
        self.state = TurnState::Failed;
        true
    }

    /// Mark the current run cancelled (superseded or explicitly stopped).
    pub fn on_cancelled(&mut self) {
        if self.state == TurnState::Streaming {
            self.state = TurnState::Cancelled;
        }
    }

    /// Explicitly truncate the conversation.
    pub fn clear(&mut self) {
        self.history.clear();
        self.accumulator.clear();
        if self.state != TurnState::Streaming {
            self.state = TurnState::Idle;
        }
    }

    /// Replace the history wholesale (session restore).
    pub fn restore_history(&mut self, history: Vec<ChatMessage>) {
        self.history = history;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ChatSession {
        ChatSession::new(
            0,
            ModelConfig {
                name: "m".into(),
                url: "http://localhost".into(),
                model: "test".into(),
                key: None,
            },
        )
    }

    #[test]
    fn test_successful_turn_grows_history_by_two() {
        let mut s = session();
        let (snapshot, generation) = s.begin_turn("hello");
        assert!(snapshot.is_empty());
        assert!(s.on_delta(generation, "Hi"));
        assert!(s.on_delta(generation, " there"));
        assert_eq!(s.on_complete(generation), Some("Hi there".into()));

        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[0], ChatMessage::user("hello"));
        assert_eq!(s.history()[1], ChatMessage::assistant("Hi there"));
        assert_eq!(s.streamed_text(), "");
        assert_eq!(s.state(), TurnState::Settled);
    }

    #[test]
    fn test_failed_turn_grows_history_by_one() {
        let mut s = session();
        let (_, generation) = s.begin_turn("hello");
        assert!(s.on_delta(generation, "partial"));
        assert!(s.on_error(generation));

        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0], ChatMessage::user("hello"));
        // Partial text is kept for diagnostics, not history.
        assert_eq!(s.streamed_text(), "partial");
        assert_eq!(s.state(), TurnState::Failed);
    }

    #[test]
    fn test_snapshot_excludes_new_user_turn() {
        let mut s = session();
        let (_, g1) = s.begin_turn("first");
        s.on_complete(g1);
        let (snapshot, _) = s.begin_turn("second");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].content, "first");
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let mut s = session();
        let (_, old) = s.begin_turn("first");
        s.on_cancelled();
        let (_, new) = s.begin_turn("second");

        assert!(!s.on_delta(old, "late"));
        assert_eq!(s.on_complete(old), None);
        assert!(!s.on_error(old));
        assert_eq!(s.streamed_text(), "");
        // The first user turn stays; no assistant turn ever lands for it.
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[1].content, "second");

        assert!(s.on_delta(new, "fresh"));
    }

    #[test]
    fn test_on_complete_is_one_shot() {
        let mut s = session();
        let (_, generation) = s.begin_turn("hello");
        s.on_delta(generation, "reply");
        assert!(s.on_complete(generation).is_some());
        // The state machine forbids a second finalization.
        assert_eq!(s.on_complete(generation), None);
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn test_accumulator_reset_at_run_start() {
        let mut s = session();
        let (_, g1) = s.begin_turn("first");
        s.on_delta(g1, "partial tok");
        s.on_cancelled();
        let (_, _) = s.begin_turn("second");
        assert_eq!(s.streamed_text(), "");
    }

    #[test]
    fn test_clear_truncates_history() {
        let mut s = session();
        let (_, g) = s.begin_turn("hello");
        s.on_complete(g);
        s.clear();
        assert!(s.history().is_empty());
        assert_eq!(s.state(), TurnState::Idle);
    }
}
