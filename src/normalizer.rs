use crate::{error::ScrapeError, fetcher::RawDocument, utils};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use itertools::Itertools;
use lazy_regex::regex;
use scraper::{ElementRef, Html, Node};
use tracing::debug;

/// How much of the body is inspected when sniffing type and charset.
const SNIFF_LEN: usize = 1024;

const SKIPPED: &[&str] = &["head", "script", "style", "noscript", "template", "svg"];
const BLOCKS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "body",
    "br",
    "caption",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "html",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "td",
    "th",
    "tr",
    "ul",
];

#[derive(Debug)]
pub struct NormalizedDocument {
    /// Visible body text, one block per line, whitespace collapsed.
    pub text_content: String,
    /// Parsed tree; `None` for plain text.
    pub tree: Option<Html>,
    pub encoding: &'static Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Markup,
    Text,
}

pub fn normalize(raw: RawDocument) -> Result<NormalizedDocument, ScrapeError> {
    let head = &raw.body[..raw.body.len().min(SNIFF_LEN)];
    let (essence, charset) = match raw.content_type.as_deref() {
        Some(ct) => parse_content_type(ct),
        None => (String::new(), None),
    };
    let declared = charset
        .as_deref()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| Encoding::for_bom(&raw.body).map(|(enc, _)| enc));

    // NUL is ordinary in UTF-16 text.
    let wide = matches!(declared, Some(enc) if enc == UTF_16LE || enc == UTF_16BE);
    if !wide && head.contains(&0) {
        return Err(ScrapeError::Decode(format!("{} looks like binary content", raw.url)));
    }

    let kind = media_kind(&essence, &raw.body).ok_or_else(|| {
        ScrapeError::Decode(format!("unsupported content type `{}`", essence))
    })?;

    let encoding = declared
        .or_else(|| {
            if kind == MediaKind::Markup {
                sniff_meta_charset(head)
            } else {
                None
            }
        })
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(&raw.body);
    if had_errors && is_garbled(&text) {
        return Err(ScrapeError::Decode(format!(
            "{} is not valid {}",
            raw.url,
            used.name()
        )));
    }
    debug!("Decoded {} as {:?} ({:?})", raw.url, used.name(), kind);

    let doc = match kind {
        MediaKind::Markup => {
            let html = Html::parse_document(&text);
            NormalizedDocument {
                text_content: visible_text(&html),
                tree: Some(html),
                encoding: used,
            }
        }
        MediaKind::Text => NormalizedDocument {
            text_content: collapse_lines(text.lines()),
            tree: None,
            encoding: used,
        },
    };
    Ok(doc)
}

/// Splits `text/html; charset="UTF-8"` into `("text/html", Some("UTF-8"))`.
fn parse_content_type(ct: &str) -> (String, Option<String>) {
    let mut parts = ct.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        } else {
            None
        }
    });
    (essence, charset)
}

fn media_kind(essence: &str, body: &[u8]) -> Option<MediaKind> {
    match essence {
        "text/html" | "application/xhtml+xml" => Some(MediaKind::Markup),
        "text/plain" => Some(MediaKind::Text),
        "" => Some(sniff_kind(body)),
        _ => None,
    }
}

fn sniff_kind(body: &[u8]) -> MediaKind {
    let body = Encoding::for_bom(body).map_or(body, |(_, bom_len)| &body[bom_len..]);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => MediaKind::Markup,
        _ => MediaKind::Text,
    }
}

fn sniff_meta_charset(head: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(head);
    let caps = regex!(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).captures(&head)?;
    Encoding::for_label(caps.get(1)?.as_str().as_bytes())
}

fn is_garbled(text: &str) -> bool {
    let (total, replaced) = text.chars().fold((0usize, 0usize), |(t, r), c| {
        (t + 1, r + usize::from(c == char::REPLACEMENT_CHARACTER))
    });
    replaced * 4 > total
}

enum Step<'a> {
    Enter(ElementRef<'a>),
    Text(&'a str),
    Leave,
}

/// Flattens the body into lines, breaking at block elements.
/// Walks with an explicit stack so deeply nested markup cannot overflow.
fn visible_text(html: &Html) -> String {
    let mut out = String::new();
    let mut stack = vec![Step::Enter(html.root_element())];

    while let Some(step) = stack.pop() {
        match step {
            Step::Text(t) => out.push_str(t),
            Step::Leave => out.push('\n'),
            Step::Enter(el) => {
                let name = el.value().name();
                if SKIPPED.contains(&name) {
                    continue;
                }
                let block = BLOCKS.contains(&name);
                if block {
                    out.push('\n');
                    stack.push(Step::Leave);
                }
                let children: Vec<_> = el.children().collect();
                for child in children.into_iter().rev() {
                    match child.value() {
                        Node::Text(t) => stack.push(Step::Text(t)),
                        Node::Element(_) => {
                            if let Some(el) = ElementRef::wrap(child) {
                                stack.push(Step::Enter(el));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    collapse_lines(out.lines())
}

fn collapse_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    lines
        .map(utils::collapse_whitespace)
        .filter(|l| !l.is_empty())
        .join("\n")
}
