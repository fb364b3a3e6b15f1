use crate::models::{ChatMessage, Role};
use crate::render::classifier::{ContentClassifier, MarkdownClassifier};
use crate::render::markdown::render_markdown;

/// Display content of one settled transcript block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockContent {
    /// Text shown exactly as it streamed in.
    Plain(String),
    /// Rendered rich markup (HTML) that replaced the streamed text.
    Rich(String),
    /// A run failure surfaced to the panel.
    Error(String),
}

/// One settled block in a panel's display transcript.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptBlock {
    pub role: Role,
    pub content: BlockContent,
}

/// Display state of one session's panel: the settled blocks plus at most one
/// live streaming tail.
#[derive(Default)]
struct PanelTranscript {
    blocks: Vec<TranscriptBlock>,
    live: Option<String>,
}

/// Reconciles each panel's incrementally-appended text with its final
/// rendered form.
///
/// While a reply streams, deltas append to the panel's live tail. Once the
/// turn finishes, the *complete* text is classified exactly once: with
/// structural markers present, the just-streamed tail is replaced in place by
/// one rendered rich block; without them, the tail is kept byte-for-byte as
/// the settled block. Earlier blocks are never touched, and the replacement
/// cannot run twice: finishing consumes the tail.
pub struct RenderReconciler {
    panels: Vec<PanelTranscript>,
    classifier: Box<dyn ContentClassifier + Send + Sync>,
}

impl RenderReconciler {
    pub fn new(panel_count: usize) -> Self {
        Self::with_classifier(panel_count, Box::new(MarkdownClassifier))
    }

    pub fn with_classifier(
        panel_count: usize,
        classifier: Box<dyn ContentClassifier + Send + Sync>,
    ) -> Self {
        Self {
            panels: (0..panel_count).map(|_| PanelTranscript::default()).collect(),
            classifier,
        }
    }

    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }

    /// Settled blocks of one panel.
    pub fn blocks(&self, session: usize) -> &[TranscriptBlock] {
        self.panels
            .get(session)
            .map(|p| p.blocks.as_slice())
            .unwrap_or(&[])
    }

    /// The live streaming tail, when the panel is mid-stream.
    pub fn live_text(&self, session: usize) -> Option<&str> {
        self.panels.get(session).and_then(|p| p.live.as_deref())
    }

    /// Open a new turn: show the user message and start an empty tail.
    ///
    /// A tail abandoned by a superseded or failed run stays visible, so it is
    /// frozen into a plain block first.
    pub fn begin_turn(&mut self, session: usize, user_text: &str) {
        let Some(panel) = self.panels.get_mut(session) else {
            return;
        };
        if let Some(tail) = panel.live.take()
            && !tail.is_empty()
        {
            panel.blocks.push(TranscriptBlock {
                role: Role::Assistant,
                content: BlockContent::Plain(tail),
            });
        }
        panel.blocks.push(TranscriptBlock {
            role: Role::User,
            content: BlockContent::Plain(user_text.to_owned()),
        });
        panel.live = Some(String::new());
    }

    /// Append one delta to the live tail.
    pub fn apply_delta(&mut self, session: usize, text: &str) {
        if let Some(panel) = self.panels.get_mut(session)
            && let Some(live) = panel.live.as_mut()
        {
            live.push_str(text);
        }
    }

    /// Settle the streamed reply, replacing it with rich markup when the
    /// final text carries structural markers.
    ///
    /// One-shot per turn: the tail is consumed, so a second call for the same
    /// turn returns `None` and changes nothing.
    pub fn finish_turn(&mut self, session: usize, final_text: &str) -> Option<&TranscriptBlock> {
        let panel = self.panels.get_mut(session)?;
        let tail = panel.live.take()?;

        let content = if self.classifier.is_rich(final_text) {
            BlockContent::Rich(render_markdown(final_text))
        } else {
            // No markers: the streamed text stands exactly as displayed.
            BlockContent::Plain(tail)
        };
        panel.blocks.push(TranscriptBlock {
            role: Role::Assistant,
            content,
        });
        panel.blocks.last()
    }

    /// Record a failed run. The partial tail stays visible for diagnostics;
    /// the error is appended as its own block.
    pub fn fail_turn(&mut self, session: usize, message: &str) {
        let Some(panel) = self.panels.get_mut(session) else {
            return;
        };
        if let Some(tail) = panel.live.take()
            && !tail.is_empty()
        {
            panel.blocks.push(TranscriptBlock {
                role: Role::Assistant,
                content: BlockContent::Plain(tail),
            });
        }
        panel.blocks.push(TranscriptBlock {
            role: Role::Assistant,
            content: BlockContent::Error(message.to_owned()),
        });
    }

    /// Rebuild a panel's transcript from a restored history.
    pub fn seed_history(&mut self, session: usize, history: &[ChatMessage]) {
        let Some(panel) = self.panels.get_mut(session) else {
            return;
        };
        panel.blocks = history
            .iter()
            .map(|turn| TranscriptBlock {
                role: turn.role,
                content: BlockContent::Plain(turn.content.clone()),
            })
            .collect();
        panel.live = None;
    }

    /// Clear every panel (explicit memory wipe).
    pub fn clear_all(&mut self) {
        for panel in &mut self.panels {
            panel.blocks.clear();
            panel.live = None;
        }
    }
}
