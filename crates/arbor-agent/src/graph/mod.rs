//! Graph Execution Engine: a finite-state machine over agent nodes.
//!
//! A graph is a set of `Node`s keyed by `NodeId`, wired together by a
//! `Router` transition table. Each node maps the current `AgentState` to a
//! sparse `StateUpdate`; the `GraphEngine` merges that update, asks the
//! router for the successor and repeats until the end marker, the step
//! budget or the recursion limit stops the run.

pub mod executor;
pub mod handoff;
pub mod node;
pub mod router;

pub use executor::{GraphBuilder, GraphEngine, RunOptions, StepSnapshot};
pub use handoff::{Handoff, MetaStats, ToolOutput};
pub use node::{Node, NodeId};
pub use router::{Edge, Route, Router, Target};
