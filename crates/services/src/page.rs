//! Read-only view of the page the widget lives in.
//!
//! [`PageSource`] is what context extraction needs from a document. A live
//! extension host backs it with the DOM; [`HtmlPage`] backs it with a static
//! HTML snapshot.

use anyhow::Result;
use html2text::render::text_renderer::TrivialDecorator;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::LazyLock;

pub trait PageSource: Send + Sync {
    fn url(&self) -> String;
    fn title(&self) -> String;
    /// Current user selection, empty when nothing is selected.
    fn selected_text(&self) -> String;
    /// Text of the first element matching `selector`, or `None` when there
    /// is no match or the match is hidden. Script and style content is omitted.
    fn element_text(&self, selector: &str) -> Result<Option<String>>;
    /// Text of every visible paragraph, in document order.
    fn paragraph_texts(&self) -> Result<Vec<String>>;
    fn body_text(&self) -> Result<String>;
}

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)(\s[^>]*)?>").expect("open tag pattern"));
/// Any opening, closing or self-closing tag; the name must end at whitespace,
/// `/` or `>`.
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)(?:\s[^>]*?)?(/?)>").expect("tag pattern")
});
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z_:][a-zA-Z0-9_:.-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("attribute pattern")
});
static NON_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>|<!--.*?-->",
    )
    .expect("non-text pattern")
});
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").expect("title pattern"));
static HIDDEN_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)display\s*:\s*none|visibility\s*:\s*hidden|opacity\s*:\s*0(?:\.0*)?\s*(?:;|!|$)")
        .expect("hidden style pattern")
});

/// The selector forms content extraction uses.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Tag(String),
    Class(String),
    Id(String),
    Attribute { name: String, value: String },
}

impl Selector {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(class) = raw.strip_prefix('.') {
            return Some(Selector::Class(class.to_string()));
        }
        if let Some(id) = raw.strip_prefix('#') {
            return Some(Selector::Id(id.to_string()));
        }
        if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let (name, value) = inner.split_once('=')?;
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            return Some(Selector::Attribute {
                name: name.trim().to_ascii_lowercase(),
                value: value.to_string(),
            });
        }
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Some(Selector::Tag(raw.to_ascii_lowercase()));
        }
        None
    }

    fn matches(&self, tag: &str, attrs: &[(String, String)]) -> bool {
        let attr = |name: &str| attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str());
        match self {
            Selector::Tag(name) => tag == name,
            Selector::Class(class) => attr("class")
                .map(|v| v.split_whitespace().any(|c| c == class))
                .unwrap_or(false),
            Selector::Id(id) => attr("id") == Some(id.as_str()),
            Selector::Attribute { name, value } => attr(name) == Some(value.as_str()),
        }
    }
}

struct Element<'a> {
    attrs: Vec<(String, String)>,
    inner: &'a str,
}

impl Element<'_> {
    fn is_visible(&self) -> bool {
        let hidden_attr = self.attrs.iter().any(|(n, _)| n == "hidden");
        let hidden_style = self
            .attrs
            .iter()
            .find(|(n, _)| n == "style")
            .map(|(_, style)| HIDDEN_STYLE.is_match(style))
            .unwrap_or(false);
        !hidden_attr && !hidden_style
    }
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(raw.trim_end_matches('/'))
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str().to_ascii_lowercase();
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

/// Block elements whose start, or whose end, implicitly closes an open `<p>`.
const PARAGRAPH_BOUNDARIES: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "div", "dl", "dt", "fieldset",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "html", "li",
    "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "ul",
];

/// Byte offset where the element opened just before `from` closes.
fn element_end(html: &str, tag: &str, from: usize) -> usize {
    let implicit_close = tag == "p";
    let mut depth = 1usize;
    for cap in ANY_TAG.captures_iter(&html[from..]) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(2)) else {
            continue;
        };
        let name = name.as_str().to_ascii_lowercase();
        let closing = cap.get(1).is_some_and(|m| !m.as_str().is_empty());
        let self_closing = cap.get(3).is_some_and(|m| !m.as_str().is_empty());

        if implicit_close
            && PARAGRAPH_BOUNDARIES.contains(&name.as_str())
            && !(closing && name == "p")
        {
            return from + whole.start();
        }
        if name != tag {
            continue;
        }
        if closing {
            depth -= 1;
            if depth == 0 {
                return from + whole.start();
            }
        } else if !self_closing {
            depth += 1;
        }
    }
    html.len()
}

fn find_elements<'a>(html: &'a str, selector: &Selector, limit: usize) -> Vec<Element<'a>> {
    let mut found = Vec::new();
    for cap in OPEN_TAG.captures_iter(html) {
        let (Some(whole), Some(tag)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let tag = tag.as_str().to_ascii_lowercase();
        let attrs = parse_attrs(cap.get(2).map(|m| m.as_str()).unwrap_or(""));
        if !selector.matches(&tag, &attrs) {
            continue;
        }
        let start = whole.end();
        let end = element_end(html, &tag, start);
        found.push(Element {
            attrs,
            inner: &html[start..end],
        });
        if found.len() >= limit {
            break;
        }
    }
    found
}

fn fragment_text(fragment: &str) -> String {
    let stripped = NON_TEXT.replace_all(fragment, " ");
    html2text::from_read_with_decorator(stripped.as_bytes(), 1_000, TrivialDecorator::new())
}

/// Static HTML snapshot of a page.
pub struct HtmlPage {
    url: String,
    html: String,
    selection: RwLock<String>,
}

impl HtmlPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            selection: RwLock::new(String::new()),
        }
    }

    pub fn select(&self, text: impl Into<String>) {
        *self.selection.write() = text.into();
    }

    pub fn clear_selection(&self) {
        self.selection.write().clear();
    }
}

impl PageSource for HtmlPage {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn title(&self) -> String {
        TITLE
            .captures(&self.html)
            .and_then(|cap| cap.get(1))
            .map(|m| fragment_text(m.as_str()).trim().to_string())
            .unwrap_or_default()
    }

    fn selected_text(&self) -> String {
        self.selection.read().clone()
    }

    fn element_text(&self, selector: &str) -> Result<Option<String>> {
        let parsed = Selector::parse(selector)
            .ok_or_else(|| anyhow::anyhow!("unsupported selector: {}", selector))?;
        Ok(find_elements(&self.html, &parsed, 1)
            .into_iter()
            .next()
            .filter(Element::is_visible)
            .map(|el| fragment_text(el.inner)))
    }

    fn paragraph_texts(&self) -> Result<Vec<String>> {
        Ok(find_elements(&self.html, &Selector::Tag("p".into()), usize::MAX)
            .into_iter()
            .filter(Element::is_visible)
            .map(|el| fragment_text(el.inner))
            .collect())
    }

    fn body_text(&self) -> Result<String> {
        let body = find_elements(&self.html, &Selector::Tag("body".into()), 1)
            .into_iter()
            .next()
            .map(|el| el.inner)
            .unwrap_or(&self.html);
        Ok(fragment_text(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<html><head><title>Field Notes</title>
        <style>p { color: red }</style></head>
        <body>
          <nav>Home | About</nav>
          <div class="sidebar content-wide">Sidebar</div>
          <div id="content" style="display: none">Hidden content</div>
          <div class="post content"><div>Nested <b>bold</b></div> tail<script>var x = 1;</script></div>
          <p>First paragraph.</p>
          <p style="visibility:hidden">Secret.</p>
          <pre>not a paragraph</pre>
          <p>Second &amp; last.</p>
        </body></html>"#;

    fn squash(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(Selector::parse("main"), Some(Selector::Tag("main".into())));
        assert_eq!(Selector::parse(".post-content"), Some(Selector::Class("post-content".into())));
        assert_eq!(Selector::parse("#content"), Some(Selector::Id("content".into())));
        assert_eq!(
            Selector::parse(r#"[role="main"]"#),
            Some(Selector::Attribute {
                name: "role".into(),
                value: "main".into()
            })
        );
        assert_eq!(Selector::parse("div > p"), None);
    }

    #[test]
    fn test_title() {
        assert_eq!(HtmlPage::new("https://a.test", DOC).title(), "Field Notes");
    }

    #[test]
    fn test_class_match_is_exact_and_nesting_is_balanced() {
        let page = HtmlPage::new("https://a.test", DOC);
        let text = page.element_text(".content").unwrap().unwrap();
        assert_eq!(squash(&text), "Nested bold tail");
    }

    #[test]
    fn test_hidden_element_is_skipped() {
        let page = HtmlPage::new("https://a.test", DOC);
        assert_eq!(page.element_text("#content").unwrap(), None);
        assert_eq!(page.element_text("main").unwrap(), None);
    }

    #[test]
    fn test_paragraphs_visible_only() {
        let page = HtmlPage::new("https://a.test", DOC);
        let paragraphs: Vec<String> = page
            .paragraph_texts()
            .unwrap()
            .iter()
            .map(|p| squash(p))
            .collect();
        assert_eq!(paragraphs, vec!["First paragraph.", "Second & last."]);
    }

    #[test]
    fn test_body_text_drops_scripts_and_styles() {
        let page = HtmlPage::new("https://a.test", DOC);
        let body = page.body_text().unwrap();
        assert!(body.contains("Home | About"));
        assert!(!body.contains("var x"));
        assert!(!body.contains("color: red"));
    }

    #[test]
    fn test_selection() {
        let page = HtmlPage::new("https://a.test", DOC);
        assert_eq!(page.selected_text(), "");
        page.select("picked");
        assert_eq!(page.selected_text(), "picked");
        page.clear_selection();
        assert_eq!(page.selected_text(), "");
    }

    #[test]
    fn test_hyphenated_tag_is_not_the_same_element() {
        let html = "<main><main-nav>Menu</main-nav><p>Tide pool body text.</p></main><footer>End</footer>";
        let page = HtmlPage::new("https://a.test", html);
        let text = page.element_text("main").unwrap().unwrap();
        assert_eq!(squash(&text), "Menu Tide pool body text.");
    }

    #[test]
    fn test_unclosed_paragraphs_end_at_the_next_block() {
        let html = "<body><div><p>One<p>Two <b>bold</b></div><footer>Footer text</footer></body>";
        let page = HtmlPage::new("https://a.test", html);
        let paragraphs: Vec<String> = page
            .paragraph_texts()
            .unwrap()
            .iter()
            .map(|p| squash(p))
            .collect();
        assert_eq!(paragraphs, vec!["One", "Two bold"]);
    }
}
