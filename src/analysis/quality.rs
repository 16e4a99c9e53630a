//! Heuristic quality check for fallback search results.
//!
//! A fallback answer must cite a source, contain concrete figures, be
//! anchored in time, have a sensible length, and be more than a refusal.
//! Items failing the check are kept but flagged low-confidence.

use serde::{Deserialize, Serialize};

const SOURCE_MARKERS: &[&str] = &[
    "reuters",
    "bloomberg",
    "wall street journal",
    "financial times",
    "sec filing",
    "10-k",
    "10-q",
    "8-k",
    "federal reserve",
    "treasury",
    "moody's",
    "fitch",
    "s&p",
    "yahoo finance",
    "marketwatch",
    "source:",
    "according to",
];

const DATA_MARKERS: &[&str] = &[
    "$",
    "%",
    "billion",
    "million",
    "quarter",
    "Q1",
    "Q2",
    "Q3",
    "Q4",
    "fiscal year",
];

const TIME_MARKERS: &[&str] = &[
    "as of", "current", "latest", "recent", "today", "this year", "january", "february", "march",
    "april", "may", "june", "july", "august", "september", "october", "november", "december",
];

const REFUSAL_MARKERS: &[&str] = &["cannot provide", "unable to access", "no information available"];

const MIN_LENGTH: usize = 100;
const MAX_LENGTH: usize = 2000;
const REFUSAL_LENGTH: usize = 200;

/// Fraction of indicators that must hold for a result to be usable.
pub const MIN_QUALITY_SCORE: f64 = 0.6;

/// Individual quality signals for a fallback result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIndicators {
    pub has_sources: bool,
    pub has_specific_data: bool,
    pub has_timeframe: bool,
    pub appropriate_length: bool,
    pub no_disclaimers_only: bool,
}

impl QualityIndicators {
    /// Derive indicators from the text itself.
    pub fn detect(content: &str) -> Self {
        let lower = content.to_lowercase();
        let length = content.chars().count();

        Self {
            has_sources: SOURCE_MARKERS.iter().any(|m| lower.contains(m)),
            has_specific_data: DATA_MARKERS.iter().any(|m| content.contains(m))
                || contains_year(content),
            has_timeframe: TIME_MARKERS.iter().any(|m| lower.contains(m)),
            appropriate_length: length > MIN_LENGTH && length < MAX_LENGTH,
            no_disclaimers_only: !(length < REFUSAL_LENGTH
                && REFUSAL_MARKERS.iter().any(|m| lower.contains(m))),
        }
    }

    fn as_pairs(&self) -> [(&'static str, bool); 5] {
        [
            ("source citation", self.has_sources),
            ("concrete data", self.has_specific_data),
            ("timeframe", self.has_timeframe),
            ("appropriate length", self.appropriate_length),
            ("substantive answer", self.no_disclaimers_only),
        ]
    }

    /// Fraction of indicators that hold.
    pub fn score(&self) -> f64 {
        let pairs = self.as_pairs();
        pairs.iter().filter(|(_, ok)| *ok).count() as f64 / pairs.len() as f64
    }

    /// Per-indicator conjunction: a signal holds only if both sides hold.
    pub fn and(self, other: Self) -> Self {
        Self {
            has_sources: self.has_sources && other.has_sources,
            has_specific_data: self.has_specific_data && other.has_specific_data,
            has_timeframe: self.has_timeframe && other.has_timeframe,
            appropriate_length: self.appropriate_length && other.appropriate_length,
            no_disclaimers_only: self.no_disclaimers_only && other.no_disclaimers_only,
        }
    }

    /// Names of indicators that do not hold.
    pub fn missing(&self) -> Vec<&'static str> {
        self.as_pairs()
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// How a fallback result should be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRecommendation {
    Use,
    ReviewCarefully,
}

/// Outcome of the quality check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub indicators: QualityIndicators,
    pub score: f64,
    pub meets_standards: bool,
    pub recommendation: QualityRecommendation,
}

impl QualityAssessment {
    /// Assess fallback content.
    ///
    /// Indicators are always detected from the text. Indicators reported by
    /// the collaborator can only clear a signal, never set one.
    pub fn assess(content: &str, reported: Option<QualityIndicators>) -> Self {
        let detected = QualityIndicators::detect(content);
        let indicators = match reported {
            Some(reported) => detected.and(reported),
            None => detected,
        };
        let score = indicators.score();
        let meets_standards = indicators.has_specific_data
            && indicators.appropriate_length
            && indicators.no_disclaimers_only
            && score >= MIN_QUALITY_SCORE;

        Self {
            indicators,
            score,
            meets_standards,
            recommendation: if meets_standards {
                QualityRecommendation::Use
            } else {
                QualityRecommendation::ReviewCarefully
            },
        }
    }

    /// Reviewer note appended to evidence reasoning when standards are not met.
    pub fn warning(&self) -> Option<String> {
        if self.meets_standards {
            return None;
        }
        Some(format!(
            "Review carefully: fallback result below quality standards (score {:.1}; missing: {})",
            self.score,
            self.indicators.missing().join(", ")
        ))
    }
}

/// Whether the text contains a plausible four-digit year (1900-2099).
fn contains_year(content: &str) -> bool {
    let bytes = content.as_bytes();
    bytes.windows(4).enumerate().any(|(i, w)| {
        let digits = w.iter().all(u8::is_ascii_digit);
        let century = matches!(&w[..2], b"19" | b"20");
        let before_ok = i == 0 || !bytes[i - 1].is_ascii_digit();
        let after_ok = bytes.get(i + 4).map_or(true, |b| !b.is_ascii_digit());
        digits && century && before_ok && after_ok
    })
}
