//! Evaluation execution: the unit evaluator, the conversation
//! orchestrator, and the shared result collection.

pub mod evaluator;
pub mod orchestrator;
pub mod results;

pub use evaluator::UnitEvaluator;
pub use orchestrator::{ConversationOrchestrator, GroupRun, GroupState};
pub use results::ResultCollection;
