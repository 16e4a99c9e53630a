//! Turns evaluation gaps into bounded, deduplicated retrieval queries.

use std::collections::HashSet;

use super::types::{GapDescriptor, RetrievalQuery};

/// Plans retrieval queries for one iteration.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    per_iteration_cap: usize,
}

impl QueryPlanner {
    pub fn new(per_iteration_cap: usize) -> Self {
        Self { per_iteration_cap }
    }

    /// Plan queries from `gaps`, highest priority first.
    ///
    /// Each gap contributes its suggested queries, or its description when it
    /// has none. Candidates whose normalized text is blank or already in
    /// `issued` (or earlier in this plan) are dropped. The result holds at
    /// most `min(per_iteration_cap, budget)` queries.
    pub fn plan(
        &self,
        gaps: &[GapDescriptor],
        issued: &HashSet<String>,
        scope_hint: Option<&str>,
        budget: usize,
    ) -> Vec<RetrievalQuery> {
        let limit = self.per_iteration_cap.min(budget);
        if limit == 0 {
            return Vec::new();
        }

        let mut ordered: Vec<&GapDescriptor> = gaps.iter().collect();
        // Stable: equal priorities keep evaluator order.
        ordered.sort_by(|a, b| b.priority.total_cmp(&a.priority));

        let mut seen: HashSet<String> = HashSet::new();
        let mut planned = Vec::with_capacity(limit);

        let candidates = ordered.into_iter().flat_map(|gap| {
            if gap.suggested_queries.is_empty() {
                vec![gap.description.as_str()]
            } else {
                gap.suggested_queries.iter().map(String::as_str).collect()
            }
        });

        for raw in candidates {
            let query = RetrievalQuery::new(raw, scope_hint.map(str::to_string));
            if query.text.is_empty() || issued.contains(&query.text) {
                continue;
            }
            if !seen.insert(query.text.clone()) {
                continue;
            }
            planned.push(query);
            if planned.len() == limit {
                break;
            }
        }

        planned
    }
}
