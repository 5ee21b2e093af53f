pub mod graph;
pub mod model;
pub mod nodes;
pub mod prompt;
pub mod run_log;
pub mod structured;
pub mod subgraph;
pub mod workflow;

pub use graph::{GraphBuilder, GraphEngine, Handoff, MetaStats, NodeId, RunOptions, StepSnapshot};
pub use model::BoundModel;
pub use run_log::TraceLogger;
pub use subgraph::{AgentGraphBuilder, Decider};
pub use workflow::{StageReport, Workflow, WorkflowOutcome};
