use std::sync::LazyLock;

use regex::Regex;

/// Structural markers that flag a settled reply as rich content.
///
/// Line-anchored markers: headings, unordered/ordered list items,
/// blockquotes, horizontal rules. Inline markers: bold/italic emphasis,
/// inline and fenced code, links, images. This marker set is the detection
/// contract; recall is deliberately not extended (a `#` mid-line is not a
/// heading marker), so classification stays reproducible.
static MARKDOWN_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(^#+\s|^[-*]\s|^\d+\.\s|\*\*.*\*\*|__.*__|\*.*\*|_.*_|`[^`]*`|```[\s\S]*?```|\[.*\]\(.*\)|!\[.*\]\(.*\)|^>|^---|^\*\*\*)",
    )
    .expect("markdown marker pattern is valid")
});

/// Decides whether a settled reply should be re-rendered as rich content.
///
/// Runs exactly once per completed turn, on the full final text, never on
/// partial deltas, where unclosed tokens would flicker between outcomes.
pub trait ContentClassifier {
    fn is_rich(&self, text: &str) -> bool;
}

/// Default classifier: a single multiline scan for Markdown markers.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkdownClassifier;

impl ContentClassifier for MarkdownClassifier {
    fn is_rich(&self, text: &str) -> bool {
        MARKDOWN_MARKERS.is_match(text)
    }
}
