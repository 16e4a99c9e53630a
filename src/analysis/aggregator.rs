//! Folds an iteration's evidence into a refined draft.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{Draft, DraftSection, EvidenceItem};
use crate::collaborators::{CallPolicy, Generator};
use crate::error::CollaboratorResult;

/// Result of aggregating one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub post_draft: Draft,
    /// Sections changed or added by refinement, in draft order.
    pub updated_sections: Vec<String>,
    /// Evidence kept for the iteration, after the session cap.
    pub evidence: Vec<EvidenceItem>,
}

/// Refines drafts with evidence while enforcing the session evidence cap.
#[derive(Clone)]
pub struct Aggregator {
    generator: Arc<dyn Generator>,
    policy: CallPolicy,
    max_evidence: usize,
}

impl Aggregator {
    pub fn new(generator: Arc<dyn Generator>, policy: CallPolicy, max_evidence: usize) -> Self {
        Self {
            generator,
            policy,
            max_evidence,
        }
    }

    /// Evidence items the session may still collect.
    pub fn remaining_budget(&self, collected: usize) -> usize {
        self.max_evidence.saturating_sub(collected)
    }

    /// Refine `pre` with `evidence`.
    ///
    /// Evidence beyond the remaining budget is dropped. Without evidence the
    /// draft is carried over unchanged and the generator is not called.
    pub async fn aggregate(
        &self,
        session_id: &str,
        pre: &Draft,
        mut evidence: Vec<EvidenceItem>,
        collected: usize,
    ) -> CollaboratorResult<Aggregation> {
        let budget = self.remaining_budget(collected);
        if evidence.len() > budget {
            debug!(
                session_id = %session_id,
                dropped = evidence.len() - budget,
                "Evidence cap reached, dropping surplus items"
            );
            evidence.truncate(budget);
        }

        if evidence.is_empty() {
            debug!(session_id = %session_id, revision = pre.revision, "No new evidence, draft unchanged");
            return Ok(Aggregation {
                post_draft: pre.clone(),
                updated_sections: Vec::new(),
                evidence,
            });
        }

        let ordered = order_for_refine(&evidence);
        let generator = &self.generator;
        let items = ordered.as_slice();
        let refined = self
            .policy
            .call(
                session_id,
                "refine",
                json!({ "revision": pre.revision, "evidence": items.len() }),
                move || generator.refine(pre, items),
            )
            .await?;

        let (sections, updated_sections) = merge_sections(pre, refined);
        info!(
            session_id = %session_id,
            revision = pre.revision + 1,
            updated = updated_sections.len(),
            "Draft refined"
        );

        Ok(Aggregation {
            post_draft: Draft {
                revision: pre.revision + 1,
                sections,
            },
            updated_sections,
            evidence,
        })
    }
}

/// Trustworthy evidence first: unflagged before low-confidence, then by
/// descending confidence. Ties keep query order.
fn order_for_refine(evidence: &[EvidenceItem]) -> Vec<EvidenceItem> {
    let mut ordered = evidence.to_vec();
    ordered.sort_by(|a, b| {
        a.low_confidence
            .cmp(&b.low_confidence)
            .then(b.confidence.total_cmp(&a.confidence))
    });
    ordered
}

/// Merge refined sections into the pre-iteration layout.
///
/// Sections the refinement omitted keep their previous content; new
/// sections are appended.
fn merge_sections(pre: &Draft, refined: Draft) -> (Vec<DraftSection>, Vec<String>) {
    let mut remaining = refined.sections;
    let mut merged = Vec::with_capacity(pre.sections.len() + remaining.len());
    let mut updated = Vec::new();

    for section in &pre.sections {
        let replacement = remaining
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(&section.name))
            .map(|i| remaining.remove(i));

        match replacement {
            Some(new) if new.content != section.content => {
                updated.push(section.name.clone());
                merged.push(DraftSection::new(section.name.clone(), new.content));
            }
            _ => merged.push(section.clone()),
        }
    }

    for section in remaining {
        if merged.iter().any(|s| s.name.eq_ignore_ascii_case(&section.name)) {
            continue;
        }
        updated.push(section.name.clone());
        merged.push(section);
    }

    (merged, updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RetrievalQuery;
    use crate::collaborators::fakes::{ScriptedGenerator, FINDINGS_SECTION};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn policy() -> CallPolicy {
        CallPolicy::new(Duration::from_millis(100), 0, Duration::from_millis(1))
    }

    fn item(text: &str, confidence: f64, low: bool) -> EvidenceItem {
        let item = EvidenceItem::primary(RetrievalQuery::new(text, None), text, confidence, "r");
        if low {
            item.flagged_low_confidence()
        } else {
            item
        }
    }

    fn base_draft() -> Draft {
        Draft::new(vec![
            DraftSection::new("executive_summary", "Hold"),
            DraftSection::new(FINDINGS_SECTION, "none"),
            DraftSection::new("recommendation", "Hold"),
        ])
    }

    #[test]
    fn test_remaining_budget() {
        let aggregator = Aggregator::new(Arc::new(ScriptedGenerator::new()), policy(), 50);
        assert_eq!(aggregator.remaining_budget(0), 50);
        assert_eq!(aggregator.remaining_budget(48), 2);
        assert_eq!(aggregator.remaining_budget(60), 0);
    }

    #[test]
    fn test_order_for_refine() {
        let ordered = order_for_refine(&[
            item("a", 0.9, true),
            item("b", 0.4, false),
            item("c", 0.8, false),
            item("d", 0.8, false),
        ]);
        let names: Vec<&str> = ordered.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(names, vec!["c", "d", "b", "a"]);
    }

    #[test]
    fn test_merge_preserves_untouched_and_appends_new() {
        let pre = base_draft();
        let refined = Draft {
            revision: 9,
            sections: vec![
                DraftSection::new("Recommendation", "Buy"),
                DraftSection::new(FINDINGS_SECTION, "none"),
                DraftSection::new("risk_assessment", "FX exposure"),
            ],
        };

        let (sections, updated) = merge_sections(&pre, refined);
        assert_eq!(
            sections,
            vec![
                DraftSection::new("executive_summary", "Hold"),
                DraftSection::new(FINDINGS_SECTION, "none"),
                DraftSection::new("recommendation", "Buy"),
                DraftSection::new("risk_assessment", "FX exposure"),
            ]
        );
        assert_eq!(updated, vec!["recommendation", "risk_assessment"]);
    }

    #[tokio::test]
    async fn test_aggregate_without_evidence_skips_refine() {
        let generator = Arc::new(ScriptedGenerator::new());
        let aggregator = Aggregator::new(generator.clone(), policy(), 50);
        let pre = base_draft();

        let aggregation = aggregator.aggregate("s", &pre, Vec::new(), 0).await.unwrap();
        assert_eq!(aggregation.post_draft, pre);
        assert!(aggregation.updated_sections.is_empty());
        assert_eq!(generator.refine_calls(), 0);
    }

    #[tokio::test]
    async fn test_aggregate_truncates_to_cap() {
        let generator = Arc::new(ScriptedGenerator::new());
        let aggregator = Aggregator::new(generator.clone(), policy(), 5);
        let evidence = vec![item("a", 0.9, false), item("b", 0.9, false), item("c", 0.9, false)];

        let aggregation = aggregator.aggregate("s", &base_draft(), evidence, 3).await.unwrap();
        assert_eq!(aggregation.evidence.len(), 2);
        assert_eq!(aggregation.post_draft.revision, 1);
        assert_eq!(aggregation.updated_sections, vec![FINDINGS_SECTION]);

        let exhausted = aggregator
            .aggregate("s", &base_draft(), vec![item("d", 0.9, false)], 5)
            .await
            .unwrap();
        assert!(exhausted.evidence.is_empty());
        assert_eq!(generator.refine_calls(), 1);
    }

    struct EchoOrderGenerator;

    #[async_trait]
    impl Generator for EchoOrderGenerator {
        async fn generate(&self, _query: &str, _scope: Option<&str>) -> CollaboratorResult<Draft> {
            Ok(Draft::default())
        }

        async fn refine(&self, draft: &Draft, evidence: &[EvidenceItem]) -> CollaboratorResult<Draft> {
            let order: Vec<&str> = evidence.iter().map(|e| e.content.as_str()).collect();
            Ok(Draft {
                revision: draft.revision,
                sections: vec![DraftSection::new(FINDINGS_SECTION, order.join(","))],
            })
        }
    }

    #[tokio::test]
    async fn test_refine_receives_trusted_evidence_first() {
        let aggregator = Aggregator::new(Arc::new(EchoOrderGenerator), policy(), 50);
        let evidence = vec![item("weak", 0.2, true), item("strong", 0.9, false)];

        let aggregation = aggregator.aggregate("s", &base_draft(), evidence, 0).await.unwrap();
        assert_eq!(
            aggregation.post_draft.section(FINDINGS_SECTION).unwrap().content,
            "strong,weak"
        );
        // Record keeps query order.
        assert_eq!(aggregation.evidence[0].content, "weak");
    }
}
