use pulldown_cmark::{html, Event, Options, Parser};

/// Convert settled Markdown text to an HTML block.
///
/// Fenced code blocks are CommonMark core; tables come from the extension,
/// and single newlines become hard breaks (chat replies treat a newline as a
/// line break, not a paragraph join).
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });

    let mut out = String::with_capacity(text.len() * 2);
    html::push_html(&mut out, parser);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_renders_as_heading_element() {
        let html = render_markdown("# Title\nbody");
        assert!(html.contains("<h1>Title</h1>"), "got: {html}");
    }

    #[test]
    fn test_fenced_code_block() {
        let html = render_markdown("```rust\nfn main() {}\n```");
        assert!(html.contains("<pre><code"), "got: {html}");
        assert!(html.contains("fn main() {}"));
    }

    #[test]
    fn test_table() {
        let html = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(html.contains("<table>"), "got: {html}");
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn test_newline_becomes_break() {
        let html = render_markdown("first line\nsecond line");
        assert!(html.contains("<br />"), "got: {html}");
    }

    #[test]
    fn test_inline_code_and_emphasis() {
        let html = render_markdown("use `let` for **bindings**");
        assert!(html.contains("<code>let</code>"));
        assert!(html.contains("<strong>bindings</strong>"));
    }
}
