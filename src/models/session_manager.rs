use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::models::session::{ChatSession, TurnState};
use crate::models::ChatMessage;
use crate::services::llm_service::{ChatRequest, LlmService, StreamChunk};

/// Presentation-facing notifications, multiplexed from every session's run
/// into one stream. Each event is tagged with the session identity index;
/// ordering is guaranteed within a session, not across sessions.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    RunStarted {
        session: usize,
    },
    /// One incremental fragment of the reply (the delta text, not the
    /// accumulated reply, to keep transport small).
    Delta {
        session: usize,
        text: String,
    },
    /// The reply settled normally; carries the full final text. This is the
    /// signal that triggers rich-text rendering.
    TurnFinished {
        session: usize,
        text: String,
    },
    /// A run failed. `session` is `None` only for orchestrator-level faults.
    Error {
        session: Option<usize>,
        message: String,
    },
}

/// Options applied to every run the manager starts.
#[derive(Clone, Debug, Default)]
pub struct ManagerOptions {
    /// System prompt prepended to every outgoing request (empty = none).
    pub system_prompt: String,
    /// When set, a gap between stream chunks longer than this surfaces as a
    /// terminal error for that run. Unset, a silent endpoint keeps its
    /// session streaming until superseded or stopped.
    pub inactivity_timeout: Option<Duration>,
}

/// Handle to one in-flight run. The manager keeps it only for cancellation
/// routing; the run's state lives in its session.
struct RunHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Orchestrator for the concurrent fan-out.
///
/// Owns the session collection (arena; index = identity) and at most one run
/// handle per session. Constructed once and passed to the front end, with
/// no globals. Starting a new run for a session first cancels and joins any
/// previous run for that session, so no two tasks ever write one session's
/// accumulator.
pub struct SessionManager {
    sessions: Vec<Arc<Mutex<ChatSession>>>,
    runs: HashMap<usize, RunHandle>,
    events: mpsc::UnboundedSender<SessionEvent>,
    llm: Arc<LlmService>,
    options: ManagerOptions,
}

impl SessionManager {
    /// Create one session per model configuration, in index order.
    pub fn new(
        models: Vec<ModelConfig>,
        llm: Arc<LlmService>,
        options: ManagerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sessions = models
            .into_iter()
            .enumerate()
            .map(|(index, model)| Arc::new(Mutex::new(ChatSession::new(index, model))))
            .collect();

        (
            Self {
                sessions,
                runs: HashMap::new(),
                events: tx,
                llm,
                options,
            },
            rx,
        )
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn model(&self, index: usize) -> Option<ModelConfig> {
        self.sessions.get(index).map(|s| s.lock().model().clone())
    }

    pub fn enabled(&self, index: usize) -> bool {
        self.sessions
            .get(index)
            .map(|s| s.lock().enabled())
            .unwrap_or(false)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(session) = self.sessions.get(index) {
            session.lock().set_enabled(enabled);
        }
    }

    pub fn set_system_prompt(&mut self, prompt: String) {
        self.options.system_prompt = prompt;
    }

    pub fn is_streaming(&self, index: usize) -> bool {
        self.sessions
            .get(index)
            .map(|s| s.lock().state() == TurnState::Streaming)
            .unwrap_or(false)
    }

    pub fn history(&self, index: usize) -> Option<Vec<ChatMessage>> {
        self.sessions.get(index).map(|s| s.lock().history().to_vec())
    }

    /// Fan one user message out to every enabled session.
    ///
    /// Sessions are visited in index order; each run is independent and
    /// concurrent, so the order does not affect the outcome. Disabled
    /// sessions are skipped entirely: no run, no history mutation.
    pub async fn fan_out(&mut self, message: &str) {
        for index in 0..self.sessions.len() {
            if self.sessions[index].lock().enabled() {
                self.start_turn(index, message).await;
            }
        }
    }

    /// Start one turn on one session, superseding any run still in flight.
    ///
    /// The previous run is cancelled and joined *before* the new run begins;
    /// only then is the accumulator reset and the user turn appended.
    pub async fn start_turn(&mut self, index: usize, message: &str) {
        let Some(session) = self.sessions.get(index).cloned() else {
            return;
        };
        if !session.lock().enabled() {
            return;
        }

        self.cancel_run(index).await;

        let (request, generation) = {
            let mut session = session.lock();
            let (history, generation) = session.begin_turn(message);
            let model = session.model();
            (
                ChatRequest {
                    endpoint: model.url.clone(),
                    model: model.model.clone(),
                    api_key: model.key.clone(),
                    system_prompt: self.options.system_prompt.clone(),
                    history,
                    user_message: message.to_owned(),
                },
                generation,
            )
        };

        // Emit before spawning so a fast first delta can never precede it.
        let _ = self.events.send(SessionEvent::RunStarted { session: index });

        let cancel = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_stream(
            self.llm.clone(),
            session,
            index,
            generation,
            request,
            cancel.clone(),
            self.events.clone(),
            self.options.inactivity_timeout,
        ));
        self.runs.insert(index, RunHandle { cancel, task });
    }

    /// Stop a session's run without starting a new one. Emits nothing: a
    /// cancelled run is discarded silently.
    pub async fn stop(&mut self, index: usize) {
        self.cancel_run(index).await;
    }

    /// Stop every active run (shutdown path).
    pub async fn stop_all(&mut self) {
        for index in 0..self.sessions.len() {
            self.cancel_run(index).await;
        }
    }

    /// Explicitly truncate every session's history. Active runs are stopped
    /// first so a live accumulator is never cleared under a run.
    pub async fn clear_histories(&mut self) {
        self.stop_all().await;
        for session in &self.sessions {
            session.lock().clear();
        }
    }

    /// Snapshot every session's history for persistence.
    pub fn export_histories(&self) -> Vec<Vec<ChatMessage>> {
        self.sessions
            .iter()
            .map(|s| s.lock().history().to_vec())
            .collect()
    }

    /// Restore histories from a persisted snapshot. Extra snapshot entries
    /// beyond the session count are ignored (the panel layout may have
    /// changed since the save).
    pub fn restore_histories(&mut self, histories: Vec<Vec<ChatMessage>>) {
        for (session, history) in self.sessions.iter().zip(histories) {
            session.lock().restore_history(history);
        }
    }

    /// Cancel-and-join the session's run, if any.
    ///
    /// Cancellation is complete only once the join resolves; after that the
    /// run's task cannot emit another event, and the generation fence covers
    /// anything already scheduled.
    async fn cancel_run(&mut self, index: usize) {
        let Some(run) = self.runs.remove(&index) else {
            return;
        };
        run.cancel.store(true, Ordering::Relaxed);
        run.task.abort();
        if let Err(e) = run.task.await
            && !e.is_cancelled()
        {
            warn!(session = index, error = %e, "run task ended abnormally");
        }
        self.sessions[index].lock().on_cancelled();
        debug!(session = index, "cancelled previous run");
    }
}

/// One run: consume the endpoint stream, route every chunk back to the owning
/// session, and emit the matching presentation event.
///
/// The cancel flag is checked between chunks; all session mutation happens
/// under the session lock with no await in between, so an abort can never
/// leave a delta applied without its event sent.
#[allow(clippy::too_many_arguments)]
async fn run_stream(
    llm: Arc<LlmService>,
    session: Arc<Mutex<ChatSession>>,
    index: usize,
    generation: u64,
    request: ChatRequest,
    cancel: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    inactivity_timeout: Option<Duration>,
) {
    use futures::StreamExt;

    let fail = |message: String| {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if session.lock().on_error(generation) {
            warn!(session = index, error = %message, "run failed");
            let _ = events.send(SessionEvent::Error {
                session: Some(index),
                message,
            });
        }
    };

    let mut stream = match llm.stream_chat(request).await {
        Ok(stream) => stream,
        Err(e) => {
            fail(e.to_string());
            return;
        }
    };

    loop {
        let next = match inactivity_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    fail(format!("no stream activity for {limit:?}"));
                    return;
                }
            },
            None => stream.next().await,
        };

        match next {
            Some(Ok(StreamChunk::Text(text))) => {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                if !session.lock().on_delta(generation, &text) {
                    return;
                }
                let _ = events.send(SessionEvent::Delta {
                    session: index,
                    text,
                });
            }
            Some(Ok(StreamChunk::Done)) | None => {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(text) = session.lock().on_complete(generation) {
                    let _ = events.send(SessionEvent::TurnFinished {
                        session: index,
                        text,
                    });
                }
                return;
            }
            Some(Err(e)) => {
                fail(e.to_string());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(n: usize) -> Vec<ModelConfig> {
        (0..n)
            .map(|i| ModelConfig {
                name: format!("model-{i}"),
                // Nothing listens here; tests below never reach the network.
                url: "http://127.0.0.1:9".into(),
                model: "test".into(),
                key: None,
            })
            .collect()
    }

    fn manager(n: usize) -> (SessionManager, mpsc::UnboundedReceiver<SessionEvent>) {
        let llm = Arc::new(LlmService::new(None).unwrap());
        SessionManager::new(models(n), llm, ManagerOptions::default())
    }

    #[tokio::test]
    async fn test_disabled_sessions_are_skipped() {
        let (mut mgr, mut rx) = manager(2);
        mgr.set_enabled(0, false);
        mgr.set_enabled(1, false);

        mgr.fan_out("hello").await;

        assert!(rx.try_recv().is_err());
        assert!(mgr.history(0).unwrap().is_empty());
        assert!(mgr.history(1).unwrap().is_empty());
        assert!(!mgr.is_streaming(0));
    }

    #[tokio::test]
    async fn test_export_and_restore_histories() {
        let (mut mgr, _rx) = manager(2);
        mgr.restore_histories(vec![
            vec![ChatMessage::user("a"), ChatMessage::assistant("b")],
            vec![],
            // Extra entry beyond the session count is ignored.
            vec![ChatMessage::user("ghost")],
        ]);

        let exported = mgr.export_histories();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].len(), 2);
        assert!(exported[1].is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_run_is_a_no_op() {
        let (mut mgr, mut rx) = manager(1);
        mgr.stop(0).await;
        mgr.stop_all().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_ignored() {
        let (mut mgr, mut rx) = manager(1);
        mgr.start_turn(5, "hello").await;
        assert!(rx.try_recv().is_err());
        assert!(mgr.model(5).is_none());
        assert!(mgr.history(5).is_none());
    }
}
