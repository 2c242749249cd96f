//! Message text normalization.
//!
//! Turns a message into one line of text for the embedding model:
//! - plain-text body if present and non-empty
//! - otherwise the visible text of the HTML body
//! - otherwise empty (logged as a warning)

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Node};
use tracing::warn;

use crate::mail::MailMessage;

static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[\t\r\n\u{a0}\u{0}]").unwrap());
static SPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(" {2,}").unwrap());

/// Elements whose text never renders.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Elements that start a new line when rendered.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6", "table",
    "section", "article", "blockquote", "pre", "hr",
];

/// HTML-to-text capability.
pub trait HtmlToText {
    fn extract_visible_text(&self, html: &str) -> String;
}

/// Renders the text nodes a browser would show, one line per block element.
#[derive(Debug, Default, Clone, Copy)]
pub struct VisibleText;

impl HtmlToText for VisibleText {
    fn extract_visible_text(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let mut out = String::new();

        for node in document.tree.root().descendants() {
            match node.value() {
                Node::Element(el) if BLOCK_ELEMENTS.contains(&el.name()) => out.push('\n'),
                Node::Text(text) => {
                    let hidden = node.ancestors().any(|a| {
                        a.value()
                            .as_element()
                            .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
                    });
                    if !hidden {
                        out.push_str(text);
                    }
                }
                _ => {}
            }
        }
        out
    }
}

/// Embedding input derived from one message.
///
/// Contains no tab, CR, LF, NBSP or NUL, no run of two or more spaces, and
/// no leading or trailing whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapse whitespace as described on [`NormalizedText`].
pub fn collapse(text: &str) -> String {
    let spaced = CONTROL_CHARS.replace_all(text, " ");
    SPACE_RUNS.replace_all(&spaced, " ").trim().to_string()
}

pub struct TextNormalizer<H = VisibleText> {
    html: H,
    max_chars: Option<usize>,
}

impl TextNormalizer<VisibleText> {
    pub fn new(max_chars: Option<usize>) -> Self {
        Self::with_html(VisibleText, max_chars)
    }
}

impl<H: HtmlToText> TextNormalizer<H> {
    pub fn with_html(html: H, max_chars: Option<usize>) -> Self {
        Self { html, max_chars }
    }

    pub fn normalize(&self, message: &MailMessage) -> NormalizedText {
        let text = match (message.text.as_deref(), message.html.as_deref()) {
            (Some(text), _) if !text.trim().is_empty() => collapse(text),
            (_, Some(html)) => collapse(&self.html.extract_visible_text(html)),
            _ => String::new(),
        };

        if text.is_empty() {
            warn!(
                subject = %message.subject,
                date = %message.received_at,
                "Message has neither text nor HTML content"
            );
            return NormalizedText(text);
        }

        match self.max_chars {
            Some(max) if text.chars().count() > max => {
                NormalizedText(text.chars().take(max).collect::<String>().trim_end().to_string())
            }
            _ => NormalizedText(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::mail::MessageId;

    fn message(text: Option<&str>, html: Option<&str>) -> MailMessage {
        MailMessage {
            id: MessageId(1),
            sender: "alice@example.org".into(),
            subject: "Impftermin".into(),
            text: text.map(String::from),
            html: html.map(String::from),
            raw: Vec::new(),
            flags: vec![],
            received_at: Utc::now(),
        }
    }

    #[test]
    fn collapses_control_characters_and_spaces() {
        let normalizer = TextNormalizer::new(None);
        let text = normalizer.normalize(&message(Some("Hello\t\tworld\n\n  there"), None));
        assert_eq!(text.as_str(), "Hello world there");
    }

    #[test]
    fn strips_nbsp_and_nul() {
        assert_eq!(collapse("\u{a0}a\u{0}\u{0}b\r\n"), "a b");
    }

    #[test]
    fn falls_back_to_html() {
        let normalizer = TextNormalizer::new(None);
        let html = "<html><head><title>ignored</title><style>p{}</style></head>\
                    <body><p>Ich brauche</p><p>einen <b>Termin</b></p>\
                    <script>alert(1)</script></body></html>";
        let text = normalizer.normalize(&message(None, Some(html)));
        assert_eq!(text.as_str(), "Ich brauche einen Termin");
    }

    #[test]
    fn blank_text_body_uses_html() {
        let normalizer = TextNormalizer::new(None);
        let text = normalizer.normalize(&message(Some(" \r\n"), Some("<p>Hallo</p>")));
        assert_eq!(text.as_str(), "Hallo");
    }

    #[test]
    fn no_content_gives_empty_text() {
        let normalizer = TextNormalizer::new(None);
        assert!(normalizer.normalize(&message(None, None)).is_empty());
    }

    #[test]
    fn truncates_after_normalizing() {
        let normalizer = TextNormalizer::new(Some(9));
        let text = normalizer.normalize(&message(Some("Grüß   Gott, wie geht's?"), None));
        assert_eq!(text.as_str(), "Grüß Gott");
    }

    #[test]
    fn custom_html_extractor() {
        struct Shouting;
        impl HtmlToText for Shouting {
            fn extract_visible_text(&self, html: &str) -> String {
                html.to_uppercase()
            }
        }
        let normalizer = TextNormalizer::with_html(Shouting, None);
        let text = normalizer.normalize(&message(None, Some("hi  there")));
        assert_eq!(text.as_str(), "HI THERE");
    }
}
