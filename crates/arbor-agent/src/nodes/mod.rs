//! The six node types an agent subgraph is assembled from.
//!
//! Every node follows the same contract: read the state, make at most one
//! external call, and hand back a `StateUpdate`. External failures never
//! escape; they become an `errors` entry plus a safe-default decision.

pub mod planner;
pub mod reasoning;
pub mod step_executor;
pub mod summary;
pub mod tool_caller;
pub mod tools;

pub use planner::PlannerNode;
pub use reasoning::ReasoningNode;
pub use step_executor::StepExecutorNode;
pub use summary::SummaryNode;
pub use tool_caller::ToolCallerNode;
pub use tools::ToolsNode;

use arbor_core::error::ArborError;
use arbor_core::state::{AgentError, AgentErrorKind};

/// State-level record of a failed model call. Rate limits and timeouts keep
/// their own kind; everything else is a `Model` error.
pub(crate) fn model_error(e: &ArborError) -> AgentError {
    let kind = match e.agent_error_kind() {
        kind @ (AgentErrorKind::RateLimit | AgentErrorKind::Timeout) => kind,
        _ => AgentErrorKind::Model,
    };
    AgentError::new(kind, e.to_string(), true)
}

/// `title:\nbody`, or nothing when the body is empty.
pub(crate) fn section(title: &str, body: &str) -> String {
    if body.trim().is_empty() {
        String::new()
    } else {
        format!("{}:\n{}", title, body)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use arbor_test_utils::{model_config, ScriptedLlm};

    use crate::model::BoundModel;

    pub fn bound(llm: &ScriptedLlm) -> BoundModel {
        BoundModel::new(Arc::new(llm.clone()), model_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_keeps_rate_limit_kind() {
        let err = model_error(&ArborError::RateLimited("429".into()));
        assert_eq!(err.kind, AgentErrorKind::RateLimit);
        assert!(err.recoverable);

        let err = model_error(&ArborError::ModelParse("bad".into()));
        assert_eq!(err.kind, AgentErrorKind::Model);
        assert!(err.recoverable);
    }

    #[test]
    fn test_section_skips_empty_body() {
        assert_eq!(section("Plan", ""), "");
        assert_eq!(section("Plan", "1. a"), "Plan:\n1. a");
    }
}
