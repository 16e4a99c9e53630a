//! Core data model for analysis sessions and their iteration history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowest and highest completeness score a draft can receive.
pub const SCORE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=10.0;

// ============================================================================
// Session status and termination
// ============================================================================

/// Lifecycle status of an analysis session.
///
/// Transitions are linear: `pending -> running -> {completed, cancelled, failed}`.
/// A pending session may also be cancelled or failed before it starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, waiting for an execution slot.
    #[default]
    Pending,
    /// The refinement loop is running.
    Running,
    /// Stopped on quality or the iteration cap.
    Completed,
    /// Stopped on a cancellation request.
    Cancelled,
    /// Stopped on a non-retryable collaborator error.
    Failed,
}

impl SessionStatus {
    /// Stable lowercase name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    /// Whether the session has stopped and is now immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    /// Whether moving from `self` to `next` respects the linear lifecycle.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A draft reached the quality threshold.
    QualityMet,
    /// The iteration cap was reached first.
    MaxIterations,
    /// A cancellation request was observed.
    Cancelled,
    /// A collaborator failed in a way the loop cannot recover from.
    Error,
}

impl TerminationReason {
    /// Stable lowercase name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::QualityMet => "quality_met",
            TerminationReason::MaxIterations => "max_iterations",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Error => "error",
        }
    }

    /// Terminal status a session takes when it stops for this reason.
    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            TerminationReason::QualityMet | TerminationReason::MaxIterations => {
                SessionStatus::Completed
            }
            TerminationReason::Cancelled => SessionStatus::Cancelled,
            TerminationReason::Error => SessionStatus::Failed,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TerminationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quality_met" => Ok(TerminationReason::QualityMet),
            "max_iterations" => Ok(TerminationReason::MaxIterations),
            "cancelled" => Ok(TerminationReason::Cancelled),
            "error" => Ok(TerminationReason::Error),
            _ => Err(format!("Unknown termination reason: {}", s)),
        }
    }
}

/// Step of the refinement loop a running session is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPhase {
    Generating,
    Evaluating,
    Planning,
    Retrieving,
    Validating,
    Aggregating,
    Committing,
}

impl IterationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationPhase::Generating => "generating",
            IterationPhase::Evaluating => "evaluating",
            IterationPhase::Planning => "planning",
            IterationPhase::Retrieving => "retrieving",
            IterationPhase::Validating => "validating",
            IterationPhase::Aggregating => "aggregating",
            IterationPhase::Committing => "committing",
        }
    }
}

impl std::fmt::Display for IterationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Drafts
// ============================================================================

/// A named section of an analysis draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSection {
    pub name: String,
    pub content: String,
}

impl DraftSection {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A generated analysis, split into named sections.
///
/// `revision` starts at 0 for the initial draft and increases by one with
/// every refinement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub revision: u32,
    pub sections: Vec<DraftSection>,
}

impl Draft {
    /// Create an initial (revision 0) draft.
    pub fn new(sections: Vec<DraftSection>) -> Self {
        Self {
            revision: 0,
            sections,
        }
    }

    /// Look up a section by name (case-insensitive).
    pub fn section(&self, name: &str) -> Option<&DraftSection> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Whether every section is blank.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.content.trim().is_empty())
    }

    /// Render the draft as markdown for prompts and exports.
    pub fn render(&self) -> String {
        self.sections
            .iter()
            .map(|s| format!("## {}\n{}", s.name, s.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ============================================================================
// Gaps, queries, evidence
// ============================================================================

/// A deficiency in a draft identified by evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapDescriptor {
    pub description: String,
    /// Higher values are addressed first.
    pub priority: f64,
    /// Retrieval queries proposed by the evaluator for this gap.
    #[serde(default)]
    pub suggested_queries: Vec<String>,
}

impl GapDescriptor {
    pub fn new(description: impl Into<String>, priority: f64) -> Self {
        Self {
            description: description.into(),
            priority,
            suggested_queries: Vec::new(),
        }
    }

    pub fn with_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggested_queries = queries.into_iter().map(Into::into).collect();
        self
    }
}

/// A retrieval query, identified session-wide by its normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// Lowercased, whitespace-collapsed query text.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_hint: Option<String>,
}

impl RetrievalQuery {
    /// Build a query from raw text, normalizing it.
    pub fn new(raw: &str, scope_hint: Option<String>) -> Self {
        Self {
            text: Self::normalize(raw),
            scope_hint,
        }
    }

    /// Lowercase, trim, and collapse internal whitespace.
    pub fn normalize(raw: &str) -> String {
        raw.split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Where an evidence item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    PrimaryIndex,
    FallbackSearch,
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceSource::PrimaryIndex => write!(f, "primary_index"),
            EvidenceSource::FallbackSearch => write!(f, "fallback_search"),
        }
    }
}

/// Trusted source categories the fallback search may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    /// SEC filings such as 10-K, 10-Q, 8-K and proxy statements.
    RegulatoryFilings,
    /// Reuters, Bloomberg, WSJ, Financial Times.
    FinancialNewswire,
    /// Federal Reserve, Treasury, BLS and other official statistics.
    GovernmentData,
    /// Recognized market data providers.
    MarketData,
    /// Research published by established investment banks.
    InvestmentResearch,
    /// Moody's, S&P, Fitch.
    RatingAgency,
}

impl SourceCategory {
    /// Every category, in a stable order.
    pub fn all() -> &'static [SourceCategory] {
        &[
            SourceCategory::RegulatoryFilings,
            SourceCategory::FinancialNewswire,
            SourceCategory::GovernmentData,
            SourceCategory::MarketData,
            SourceCategory::InvestmentResearch,
            SourceCategory::RatingAgency,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::RegulatoryFilings => "regulatory_filings",
            SourceCategory::FinancialNewswire => "financial_newswire",
            SourceCategory::GovernmentData => "government_data",
            SourceCategory::MarketData => "market_data",
            SourceCategory::InvestmentResearch => "investment_research",
            SourceCategory::RatingAgency => "rating_agency",
        }
    }

    /// Human-readable description used in fallback prompts.
    pub fn description(&self) -> &'static str {
        match self {
            SourceCategory::RegulatoryFilings => {
                "Regulatory filings (SEC EDGAR: 10-K, 10-Q, 8-K, proxy statements)"
            }
            SourceCategory::FinancialNewswire => {
                "Major financial news services (Reuters, Bloomberg, Wall Street Journal, Financial Times)"
            }
            SourceCategory::GovernmentData => {
                "Government data sources (Federal Reserve, Treasury, SEC, Bureau of Labor Statistics)"
            }
            SourceCategory::MarketData => {
                "Recognized market data providers (Yahoo Finance, MarketWatch, exchange data)"
            }
            SourceCategory::InvestmentResearch => "Established investment bank research",
            SourceCategory::RatingAgency => "Credit rating agencies (Moody's, S&P, Fitch)",
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("Unknown source category: {}", s))
    }
}

/// Provenance of a fallback search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub category: SourceCategory,
    /// Publisher or document name, e.g. "Reuters" or "ACME 10-K FY2024".
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// A unit of retrieved information for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// The query that produced this item.
    pub query: RetrievalQuery,
    pub content: String,
    pub source: EvidenceSource,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Validator or quality-check reasoning.
    pub reasoning: String,
    /// Non-empty exactly when `source` is `FallbackSearch`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribution: Vec<SourceAttribution>,
    /// Set when the item should be deprioritized during aggregation.
    #[serde(default)]
    pub low_confidence: bool,
}

impl EvidenceItem {
    /// Evidence taken from the primary index.
    pub fn primary(
        query: RetrievalQuery,
        content: impl Into<String>,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            query,
            content: content.into(),
            source: EvidenceSource::PrimaryIndex,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            attribution: Vec::new(),
            low_confidence: false,
        }
    }

    /// Evidence from the fallback search. Returns `None` without attribution.
    pub fn fallback(
        query: RetrievalQuery,
        content: impl Into<String>,
        confidence: f64,
        reasoning: impl Into<String>,
        attribution: Vec<SourceAttribution>,
    ) -> Option<Self> {
        if attribution.is_empty() {
            return None;
        }
        Some(Self {
            query,
            content: content.into(),
            source: EvidenceSource::FallbackSearch,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            attribution,
            low_confidence: false,
        })
    }

    /// Flag the item for deprioritization.
    pub fn flagged_low_confidence(mut self) -> Self {
        self.low_confidence = true;
        self
    }
}

// ============================================================================
// Iterations and sessions
// ============================================================================

/// Immutable snapshot of one pass through the refinement loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 0-based, contiguous within a session.
    pub index: u32,
    pub pre_draft: Draft,
    pub post_draft: Draft,
    /// Completeness score of `pre_draft`, within [`SCORE_RANGE`].
    pub score: f64,
    pub gaps: Vec<GapDescriptor>,
    pub queries: Vec<RetrievalQuery>,
    pub evidence: Vec<EvidenceItem>,
    /// Names of sections added or changed by refinement.
    pub updated_sections: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An analysis request and its full refinement history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_filter: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Latest draft: the initial draft, then each iteration's post-draft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_draft: Option<Draft>,
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisSession {
    /// Create a pending session.
    pub fn new(query: impl Into<String>, scope_filter: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            scope_filter,
            status: SessionStatus::Pending,
            termination_reason: None,
            error_message: None,
            cancel_requested: false,
            current_draft: None,
            iterations: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Score of the most recent iteration, if any.
    pub fn latest_score(&self) -> Option<f64> {
        self.iterations.last().map(|r| r.score)
    }

    /// Total evidence items collected so far.
    pub fn evidence_count(&self) -> usize {
        self.iterations.iter().map(|r| r.evidence.len()).sum()
    }

    /// Total retrieval queries issued so far.
    pub fn query_count(&self) -> usize {
        self.iterations.iter().map(|r| r.queries.len()).sum()
    }
}

/// Lightweight listing entry for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_filter: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    pub iteration_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Number of stored sessions in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl SessionCounts {
    pub fn add(&mut self, status: SessionStatus, count: u64) {
        let slot = match status {
            SessionStatus::Pending => &mut self.pending,
            SessionStatus::Running => &mut self.running,
            SessionStatus::Completed => &mut self.completed,
            SessionStatus::Cancelled => &mut self.cancelled,
            SessionStatus::Failed => &mut self.failed,
        };
        *slot += count;
    }

    pub fn active(&self) -> u64 {
        self.pending + self.running
    }

    pub fn total(&self) -> u64 {
        self.active() + self.completed + self.cancelled + self.failed
    }
}

/// Clamp a raw evaluator score into [`SCORE_RANGE`].
///
/// Returns `None` for NaN.
pub fn clamp_score(raw: f64) -> Option<f64> {
    if raw.is_nan() {
        None
    } else {
        Some(raw.clamp(*SCORE_RANGE.start(), *SCORE_RANGE.end()))
    }
}
