//! Iterative analysis refinement.
//!
//! - [`AnalysisEngine`]: schedules sessions on their own tasks
//! - [`AnalysisOrchestrator`]: the evaluate / plan / retrieve / aggregate loop
//! - [`ProgressTracker`]: control surface and progress publication
//! - [`QueryPlanner`], [`RetrievalPipeline`], [`Aggregator`], [`EvaluationStep`]:
//!   the per-iteration stages

mod aggregator;
mod engine;
mod evaluation;
mod orchestrator;
mod pipeline;
mod planner;
mod quality;
mod tracker;
mod types;


pub use aggregator::*;
pub use engine::*;
pub use evaluation::*;
pub use orchestrator::*;
pub use pipeline::*;
pub use planner::*;
pub use quality::*;
pub use tracker::*;
pub use types::*;
