use crate::{
    catalog::OutputRecord,
    error::ScrapeError,
    extractor::{ExtractedRecord, Field},
    utils,
};

pub const TRUNCATION_MARKER: char = '…';

/// Turns raw extracted values into an [`OutputRecord`].
#[derive(Debug, Clone, Copy)]
pub struct Mapper {
    max_field_len: usize,
}

impl Mapper {
    pub fn new(max_field_len: usize) -> Mapper {
        Mapper { max_field_len }
    }

    /// Fails only when not a single field survives cleaning.
    pub fn map(
        &self,
        mut record: ExtractedRecord,
        source_url: &str,
    ) -> Result<OutputRecord, ScrapeError> {
        let mut clean = |field| record.take(field).and_then(|v| self.clean(&v));

        let output = OutputRecord {
            title: clean(Field::Title),
            description: clean(Field::Description),
            eligibility: clean(Field::Eligibility),
            location: clean(Field::Location),
            tuition: clean(Field::Tuition),
            source_url: source_url.to_string(),
        };

        if output.field_count() == 0 {
            return Err(ScrapeError::Validation(source_url.to_string()));
        }
        Ok(output)
    }

    fn clean(&self, value: &str) -> Option<String> {
        let value = utils::collapse_whitespace(value);
        if value.is_empty() {
            return None;
        }
        if value.chars().count() <= self.max_field_len {
            return Some(value);
        }
        let mut cut: String = value
            .chars()
            .take(self.max_field_len.saturating_sub(1))
            .collect();
        cut.push(TRUNCATION_MARKER);
        Some(cut)
    }
}
