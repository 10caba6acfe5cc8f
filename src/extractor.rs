//! Declarative, priority-ordered extraction rules and their evaluator.
//!
//! A rule table is plain data (see [`RuleSpec`]); compiling it into a
//! [`RuleSet`] validates selectors and patterns once, up front. For each
//! field the rules are tried from highest to lowest priority and the first
//! one producing a non-empty value wins, whatever the document order.

use crate::{error::RuleError, normalizer::NormalizedDocument, utils};
use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::{cmp::Reverse, collections::BTreeMap, fmt, sync::Arc};
use tracing::debug;

const E: &str = "Invalid selector";
lazy_static! {
    static ref LABEL_ELEMENTS: Selector =
        Selector::parse("dt, th, h2, h3, h4, h5, h6").expect(E);
}

/// Compiled pattern size cap; patterns are linear-time but may still be huge.
const PATTERN_SIZE_LIMIT: usize = 4 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Description,
    Eligibility,
    Location,
    Tuition,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Title,
        Field::Description,
        Field::Eligibility,
        Field::Location,
        Field::Tuition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Eligibility => "eligibility",
            Field::Location => "location",
            Field::Tuition => "tuition",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw values pulled out of a document, keyed by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedRecord(BTreeMap<Field, String>);

impl ExtractedRecord {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn insert(&mut self, field: Field, value: impl Into<String>) {
        self.0.insert(field, value.into());
    }

    pub fn take(&mut self, field: Field) -> Option<String> {
        self.0.remove(&field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcess {
    #[default]
    None,
    FirstLine,
    FirstSentence,
    StripTrailingPunctuation,
}

impl PostProcess {
    fn apply(self, value: &str) -> String {
        match self {
            PostProcess::None => value.to_string(),
            PostProcess::FirstLine => value.lines().next().unwrap_or_default().to_string(),
            PostProcess::FirstSentence => match value.find(". ") {
                Some(end) => value[..=end].to_string(),
                None => value.to_string(),
            },
            PostProcess::StripTrailingPunctuation => value
                .trim_end()
                .trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':'))
                .to_string(),
        }
    }
}

/// Serializable form of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub field: Field,
    /// Higher wins.
    #[serde(default)]
    pub priority: u32,
    #[serde(flatten)]
    pub matcher: MatcherSpec,
    #[serde(default)]
    pub post: PostProcess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherSpec {
    /// `<meta>` tags whose `property`, `name` or `itemprop` is one of `keys`.
    Meta { keys: Vec<String> },
    /// Text of the matching elements, or one of their attributes.
    Selector {
        css: String,
        #[serde(default)]
        attribute: Option<String>,
    },
    /// Labelled values: `dt`/`dd` and `th`/`td` pairs, headings followed by
    /// content, and `Label: value` lines.
    Label { labels: Vec<String> },
    /// Free-text pattern over the visible text. Yields the `value` group,
    /// else group 1, else the whole match.
    Pattern { regex: String },
}

#[derive(Debug)]
enum Matcher {
    Meta(Selector),
    Selector {
        selector: Selector,
        attribute: Option<String>,
    },
    Label(Vec<String>),
    Pattern(Regex),
}

#[derive(Debug)]
pub struct Rule {
    pub field: Field,
    pub priority: u32,
    matcher: Matcher,
    post: PostProcess,
}

impl Rule {
    pub fn compile(spec: &RuleSpec) -> Result<Rule, RuleError> {
        let matcher = match &spec.matcher {
            MatcherSpec::Meta { keys } => {
                if keys.is_empty() {
                    return Err(RuleError::Empty(spec.field.to_string()));
                }
                if let Some(bad) = keys.iter().find(|k| !is_meta_key(k)) {
                    return Err(RuleError::MetaKey(bad.clone()));
                }
                let css = keys
                    .iter()
                    .flat_map(|k| {
                        ["property", "name", "itemprop"]
                            .into_iter()
                            .map(move |attr| format!(r#"meta[{}="{}"]"#, attr, k))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Matcher::Meta(parse_selector(&css)?)
            }
            MatcherSpec::Selector { css, attribute } => Matcher::Selector {
                selector: parse_selector(css)?,
                attribute: attribute.clone(),
            },
            MatcherSpec::Label { labels } => {
                let labels: Vec<String> = labels
                    .iter()
                    .map(|l| utils::collapse_whitespace(l).to_lowercase())
                    .filter(|l| !l.is_empty())
                    .collect();
                if labels.is_empty() {
                    return Err(RuleError::Empty(spec.field.to_string()));
                }
                Matcher::Label(labels)
            }
            MatcherSpec::Pattern { regex } => Matcher::Pattern(
                RegexBuilder::new(regex)
                    .size_limit(PATTERN_SIZE_LIMIT)
                    .build()
                    .map_err(|source| RuleError::Pattern {
                        pattern: regex.clone(),
                        source,
                    })?,
            ),
        };

        Ok(Rule {
            field: spec.field,
            priority: spec.priority,
            matcher,
            post: spec.post,
        })
    }

    /// First non-empty value this rule finds, looking at no more than
    /// `limit` bytes of any one input.
    fn evaluate(&self, doc: &NormalizedDocument, limit: usize) -> Option<String> {
        let found = match &self.matcher {
            Matcher::Meta(selector) => doc.tree.as_ref().and_then(|tree| {
                tree.select(selector)
                    .filter_map(|el| el.value().attr("content"))
                    .map(|content| utils::collapse_whitespace(utils::bounded(content, limit)))
                    .find(|v| !v.is_empty())
            }),
            Matcher::Selector {
                selector,
                attribute,
            } => doc.tree.as_ref().and_then(|tree| {
                tree.select(selector)
                    .filter_map(|el| match attribute {
                        Some(attr) => el
                            .value()
                            .attr(attr)
                            .map(|v| utils::bounded(v, limit).to_string()),
                        None => Some(bounded_text(el, limit)),
                    })
                    .map(|v| utils::collapse_whitespace(&v))
                    .find(|v| !v.is_empty())
            }),
            Matcher::Label(labels) => doc
                .tree
                .as_ref()
                .and_then(|tree| labelled_element(tree, labels, limit))
                .or_else(|| labelled_line(&doc.text_content, labels, limit)),
            Matcher::Pattern(regex) => {
                let text = utils::bounded(&doc.text_content, limit);
                regex.captures(text).and_then(|caps| {
                    caps.name("value")
                        .or_else(|| caps.get(1))
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().trim().to_string())
                })
            }
        }?;

        let value = self.post.apply(&found);
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// An ordered rule table.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn compile(specs: &[RuleSpec]) -> Result<RuleSet, RuleError> {
        let mut rules = specs.iter().map(Rule::compile).collect::<Result<Vec<_>, _>>()?;
        // Stable: equal priorities keep declaration order.
        rules.sort_by_key(|r| Reverse(r.priority));
        Ok(RuleSet { rules })
    }

    pub fn from_json(json: &str) -> Result<RuleSet, RuleError> {
        let specs: Vec<RuleSpec> = serde_json::from_str(json)?;
        RuleSet::compile(&specs)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules_for(&self, field: Field) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.field == field)
    }
}

/// Applies a [`RuleSet`] to normalized documents.
#[derive(Debug, Clone)]
pub struct Extractor {
    rules: Arc<RuleSet>,
    max_rule_input: usize,
}

impl Extractor {
    pub fn new(rules: Arc<RuleSet>, max_rule_input: usize) -> Extractor {
        Extractor {
            rules,
            max_rule_input,
        }
    }

    /// Never fails: fields no rule matches are simply absent.
    pub fn extract(&self, doc: &NormalizedDocument) -> ExtractedRecord {
        let mut record = ExtractedRecord::default();
        for field in Field::ALL {
            let hit = self
                .rules
                .rules_for(field)
                .find_map(|rule| rule.evaluate(doc, self.max_rule_input).map(|v| (rule, v)));
            if let Some((rule, value)) = hit {
                debug!("{} matched by rule with priority {}", field, rule.priority);
                record.insert(field, value);
            }
        }
        record
    }
}

fn parse_selector(css: &str) -> Result<Selector, RuleError> {
    Selector::parse(css).map_err(|e| RuleError::Selector {
        css: css.to_string(),
        reason: format!("{:?}", e),
    })
}

fn is_meta_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.' | '-'))
}

fn bounded_text(el: ElementRef<'_>, limit: usize) -> String {
    let mut out = String::new();
    for t in el.text() {
        if out.len() >= limit {
            break;
        }
        out.push_str(t);
    }
    utils::bounded(&out, limit).to_string()
}

fn normalized_label(text: &str) -> String {
    utils::collapse_whitespace(text)
        .trim_end_matches(|c| matches!(c, ':' | '-' | '–'))
        .trim_end()
        .to_lowercase()
}

/// `dt`→`dd`, `th`→`td` or heading→content: the first element sibling
/// after a label element whose text is one of `labels`.
fn labelled_element(tree: &Html, labels: &[String], limit: usize) -> Option<String> {
    tree.select(&LABEL_ELEMENTS)
        .filter(|el| {
            let text = bounded_text(*el, limit);
            labels.contains(&normalized_label(&text))
        })
        .filter_map(|el| el.next_siblings().find_map(ElementRef::wrap))
        .map(|value| utils::collapse_whitespace(&bounded_text(value, limit)))
        .find(|v| !v.is_empty())
}

/// `Label: value` or `Label - value` lines.
fn labelled_line(text: &str, labels: &[String], limit: usize) -> Option<String> {
    utils::bounded(text, limit).lines().find_map(|line| {
        labels.iter().find_map(|label| {
            let head = line.get(..label.len())?;
            if head.to_lowercase() != *label {
                return None;
            }
            let rest = line[label.len()..].trim_start();
            let value = rest
                .strip_prefix(':')
                .or_else(|| rest.strip_prefix('-'))
                .or_else(|| rest.strip_prefix('–'))?
                .trim();
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fetcher::RawDocument, normalizer::normalize};
    use pretty_assertions::assert_eq;
    use reqwest::Url;

    fn doc(html: &str) -> NormalizedDocument {
        normalize(RawDocument {
            url: Url::parse("https://example.edu/").unwrap(),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            body: html.as_bytes().to_vec(),
            fetched_at: utils::get_now(),
        })
        .unwrap()
    }

    fn rules(json: &str) -> Extractor {
        Extractor::new(Arc::new(RuleSet::from_json(json).unwrap()), 64 * 1024)
    }

    #[test]
    fn higher_priority_wins_regardless_of_document_order() {
        let extractor = rules(
            r#"[
                {"field": "location", "priority": 10, "kind": "pattern",
                 "regex": "located in (?P<value>[A-Za-z ]+)"},
                {"field": "location", "priority": 100, "kind": "selector",
                 "css": "[itemprop=\"addressLocality\"]"}
            ]"#,
        );
        let d = doc(r#"<p>The campus is located in Cambridge</p>
            <footer><span itemprop="addressLocality">Boston</span></footer>"#);

        assert_eq!(extractor.extract(&d).get(Field::Location), Some("Boston"));
    }

    #[test]
    fn equal_priority_keeps_declaration_order() {
        let extractor = rules(
            r#"[
                {"field": "title", "priority": 5, "kind": "selector", "css": "h2"},
                {"field": "title", "priority": 5, "kind": "selector", "css": "h1"}
            ]"#,
        );
        let d = doc("<h1>First heading</h1><h2>Second heading</h2>");
        assert_eq!(
            extractor.extract(&d).get(Field::Title),
            Some("Second heading")
        );
    }

    #[test]
    fn empty_match_falls_through_to_next_rule() {
        let extractor = rules(
            r#"[
                {"field": "description", "priority": 9, "kind": "meta", "keys": ["description"]},
                {"field": "description", "priority": 1, "kind": "selector", "css": "p.lead"}
            ]"#,
        );
        let d = doc(r#"<meta name="description" content="   "><p class="lead">A lead paragraph.</p>"#);
        assert_eq!(
            extractor.extract(&d).get(Field::Description),
            Some("A lead paragraph.")
        );
    }

    #[test]
    fn meta_and_attribute_matchers() {
        let extractor = rules(
            r#"[
                {"field": "title", "kind": "meta", "keys": ["og:title"]},
                {"field": "location", "kind": "selector", "css": "[data-city]", "attribute": "data-city"}
            ]"#,
        );
        let d = doc(r#"<head><meta property="og:title" content="Northern  College"></head>
            <body><div data-city="Tromsø"></div></body>"#);
        let record = extractor.extract(&d);
        assert_eq!(record.get(Field::Title), Some("Northern College"));
        assert_eq!(record.get(Field::Location), Some("Tromsø"));
    }

    #[test]
    fn label_matcher_reads_pairs_headings_and_lines() {
        let extractor = rules(
            r#"[
                {"field": "tuition", "kind": "label", "labels": ["Tuition"]},
                {"field": "eligibility", "kind": "label", "labels": ["Who can apply"]},
                {"field": "location", "kind": "label", "labels": ["Campus"]}
            ]"#,
        );
        let d = doc(r#"
            <dl><dt>Tuition:</dt><dd>$12,500 per year</dd></dl>
            <h3>Who can apply</h3><p>Undergraduates in their final year.</p>
            <p>Campus – Lisbon</p>"#);
        let record = extractor.extract(&d);
        assert_eq!(record.get(Field::Tuition), Some("$12,500 per year"));
        assert_eq!(
            record.get(Field::Eligibility),
            Some("Undergraduates in their final year.")
        );
        assert_eq!(record.get(Field::Location), Some("Lisbon"));
    }

    #[test]
    fn label_line_needs_a_separator() {
        assert_eq!(
            labelled_line("Costa Rica: beaches", &["cost".to_string()], 1024),
            None
        );
        assert_eq!(
            labelled_line("Tuition fees: €900", &["tuition".to_string(), "tuition fees".to_string()], 1024),
            Some("€900".to_string())
        );
        assert_eq!(
            labelled_line("Location - Oslo", &["location".to_string()], 1024),
            Some("Oslo".to_string())
        );
        assert_eq!(
            labelled_line("Location   – Bergen", &["location".to_string()], 1024),
            Some("Bergen".to_string())
        );
    }

    #[test]
    fn post_processing() {
        assert_eq!(PostProcess::FirstLine.apply("a\nb"), "a");
        assert_eq!(PostProcess::FirstSentence.apply("One. Two. Three"), "One.");
        assert_eq!(PostProcess::StripTrailingPunctuation.apply("Oslo;. "), "Oslo");
        assert_eq!(PostProcess::None.apply("x."), "x.");
    }

    #[test]
    fn rule_input_is_bounded() {
        let extractor = Extractor::new(
            Arc::new(
                RuleSet::from_json(
                    r#"[{"field": "tuition", "kind": "pattern", "regex": "\\$\\d+"}]"#,
                )
                .unwrap(),
            ),
            32,
        );
        let mut html = String::from("<p>");
        html.push_str(&"x".repeat(100));
        html.push_str(" $500</p>");
        assert_eq!(extractor.extract(&doc(&html)).get(Field::Tuition), None);
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert!(matches!(
            RuleSet::from_json(r#"[{"field": "title", "kind": "selector", "css": "h1[["}]"#),
            Err(RuleError::Selector { .. })
        ));
        assert!(matches!(
            RuleSet::from_json(r#"[{"field": "title", "kind": "pattern", "regex": "(unclosed"}]"#),
            Err(RuleError::Pattern { .. })
        ));
        assert!(matches!(
            RuleSet::from_json(r#"[{"field": "title", "kind": "meta", "keys": ["a\"]"]}]"#),
            Err(RuleError::MetaKey(_))
        ));
        assert!(matches!(
            RuleSet::from_json(r#"[{"field": "title", "kind": "label", "labels": ["  "]}]"#),
            Err(RuleError::Empty(_))
        ));
        assert!(matches!(
            RuleSet::from_json(r#"[{"field": "ranking", "kind": "label", "labels": ["x"]}]"#),
            Err(RuleError::Json(_))
        ));
    }
}
