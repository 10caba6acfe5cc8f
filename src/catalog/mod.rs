//! Institution and scholarship records, and the rule table that finds them.

use crate::{
    error::{ConfigError, RuleError},
    extractor::RuleSet,
};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, sync::Arc};

const CATALOG_RULES: &str = include_str!("rules.json");

lazy_static! {
    static ref RULES: Arc<RuleSet> =
        Arc::new(RuleSet::from_json(CATALOG_RULES).expect("Invalid built-in rule table"));
}

/// Built-in rules for university and scholarship pages.
pub fn rules() -> Arc<RuleSet> {
    Arc::clone(&RULES)
}

/// Loads a replacement rule table from JSON.
pub fn rules_from_json(json: &str) -> Result<Arc<RuleSet>, RuleError> {
    Ok(Arc::new(RuleSet::from_json(json)?))
}

pub fn rules_from_file(path: impl AsRef<Path>) -> Result<Arc<RuleSet>, ConfigError> {
    let json = fs::read_to_string(path)?;
    Ok(rules_from_json(&json)?)
}

/// The record handed to callers. Absent fields are left out when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuition: Option<String>,
    pub source_url: String,
}

impl OutputRecord {
    /// Number of populated fields, not counting `source_url`.
    pub fn field_count(&self) -> usize {
        [
            &self.title,
            &self.description,
            &self.eligibility,
            &self.location,
            &self.tuition,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Title", &self.title),
            ("Description", &self.description),
            ("Eligibility", &self.eligibility),
            ("Location", &self.location),
            ("Tuition", &self.tuition),
        ];
        for (name, value) in rows {
            writeln!(f, "{:<16}: {}", name, value.as_deref().unwrap_or("None"))?;
        }
        writeln!(f, "{:<16}: {}", "Source", self.source_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        extractor::Extractor, fetcher::RawDocument, mapper::Mapper, normalizer::normalize, utils,
    };
    use pretty_assertions::assert_eq;
    use reqwest::Url;

    fn scrape_fixture(name: &str, url: &str) -> OutputRecord {
        let html = fs::read(format!("tests/htmls/{}.html", name)).expect("Invalid file path");
        let doc = normalize(RawDocument {
            url: Url::parse(url).unwrap(),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            body: html,
            fetched_at: utils::get_now(),
        })
        .unwrap();
        let record = Extractor::new(rules(), 64 * 1024).extract(&doc);
        Mapper::new(2000).map(record, url).unwrap()
    }

    #[test]
    fn built_in_rules_compile() {
        assert!(!rules().is_empty());
    }

    #[test]
    fn missing_rule_file_is_an_io_error() {
        assert!(matches!(
            rules_from_file("tests/no-such-rules.json"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_program_page() {
        let url = "https://example.edu/program";
        assert_eq!(
            scrape_fixture("program", url),
            OutputRecord {
                title: Some("Example University".to_string()),
                tuition: Some("$20,000/yr".to_string()),
                source_url: url.to_string(),
                ..OutputRecord::default()
            }
        );
    }

    #[test]
    fn test_university_page() {
        let url = "https://nit.example.edu/admissions";
        assert_eq!(
            scrape_fixture("university", url),
            OutputRecord {
                title: Some("Northfield Institute of Technology".to_string()),
                description: Some(
                    "A public research institute focused on engineering and applied sciences."
                        .to_string()
                ),
                eligibility: Some(
                    "High school diploma with strong results in mathematics and physics."
                        .to_string()
                ),
                location: Some("Springfield, Illinois".to_string()),
                tuition: Some("USD 31,450 per year".to_string()),
                source_url: url.to_string(),
            }
        );
    }

    #[test]
    fn test_scholarship_page() {
        let url = "https://aurora.example.org/scholarship";
        assert_eq!(
            scrape_fixture("scholarship", url),
            OutputRecord {
                title: Some("Aurora Merit Scholarship 2025".to_string()),
                description: Some(
                    "The Aurora Merit Scholarship supports students pursuing a master's degree in Europe."
                        .to_string()
                ),
                eligibility: Some(
                    "Students are eligible if they hold a bachelor's degree with a GPA of 3.5 or higher."
                        .to_string()
                ),
                location: Some("Helsinki, Finland".to_string()),
                tuition: Some("€10,000 per year".to_string()),
                source_url: url.to_string(),
            }
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let url = "https://nit.example.edu/admissions";
        let first = serde_json::to_string(&scrape_fixture("university", url)).unwrap();
        let second = serde_json::to_string(&scrape_fixture("university", url)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn absent_fields_are_omitted_from_json() {
        let record = OutputRecord {
            title: Some("Example University".to_string()),
            source_url: "https://example.edu/program".to_string(),
            ..OutputRecord::default()
        };
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"title":"Example University","source_url":"https://example.edu/program"}"#
        );
        assert_eq!(record.field_count(), 1);
    }

    #[test]
    fn display_lists_every_field() {
        let record = OutputRecord {
            location: Some("Oslo".to_string()),
            source_url: "https://example.no".to_string(),
            ..OutputRecord::default()
        };
        let text = record.to_string();
        assert!(text.contains("Location        : Oslo"));
        assert!(text.contains("Tuition         : None"));
        assert!(text.ends_with("Source          : https://example.no\n"));
    }
}
